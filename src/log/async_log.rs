//! A double-buffered, background-thread log sink implementing `log::Log`.
//!
//! The front end (`log::info!`, etc.) only ever appends to an in-memory buffer under a
//! mutex; a dedicated writer thread swaps that buffer out and flushes it to disk, so a slow
//! disk never blocks a worker loop's hot path.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use chrono::Local;
use log::{Log, Metadata, Record};

/// Buffers larger than this are handed to the writer thread immediately rather than waiting
/// for the periodic flush.
const BUFFER_FLUSH_THRESHOLD: usize = 4 * 1024 * 1024;
/// Upper bound on how long a line can sit unflushed if logging is quiet.
const FLUSH_INTERVAL: Duration = Duration::from_secs(3);

struct Shared {
    current: Vec<u8>,
    ready: Vec<Vec<u8>>,
    stopped: bool,
}

/// A `log::Log` implementation that appends formatted lines into an in-memory buffer and
/// defers the actual file write to a background thread.
pub struct AsyncLog {
    shared: Arc<Mutex<Shared>>,
    condvar: Arc<Condvar>,
    writer_thread: Mutex<Option<JoinHandle<()>>>,
}

impl AsyncLog {
    /// Spawns the background writer thread, opening (creating/truncating) `path`.
    pub fn start(path: &Path) -> io::Result<Arc<Self>> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;

        let shared = Arc::new(Mutex::new(Shared {
            current: Vec::with_capacity(64 * 1024),
            ready: Vec::new(),
            stopped: false,
        }));
        let condvar = Arc::new(Condvar::new());

        let logger = Arc::new(Self {
            shared: shared.clone(),
            condvar: condvar.clone(),
            writer_thread: Mutex::new(None),
        });

        let thread_shared = shared;
        let thread_condvar = condvar;
        let handle = std::thread::Builder::new()
            .name("webreactor-logger".to_string())
            .spawn(move || run_writer(file, thread_shared, thread_condvar))
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;

        *logger.writer_thread.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);

        Ok(logger)
    }

    /// Installs `self` as the global `log` facade's backend at `level`.
    pub fn install(logger: Arc<Self>, level: log::LevelFilter) -> Result<(), log::SetLoggerError> {
        log::set_max_level(level);
        log::set_boxed_logger(Box::new(ArcLogger(logger)))
    }

    fn append(&self, line: &str) {
        let mut shared = self.shared.lock().unwrap_or_else(|e| e.into_inner());
        shared.current.extend_from_slice(line.as_bytes());
        if shared.current.len() >= BUFFER_FLUSH_THRESHOLD {
            let full = std::mem::replace(&mut shared.current, Vec::with_capacity(64 * 1024));
            shared.ready.push(full);
            self.condvar.notify_one();
        }
    }

    /// Logs a fatal message synchronously-enough to be visible, then aborts the process.
    ///
    /// For conditions the runtime itself must treat as unrecoverable (bind failure,
    /// poisoned global state) rather than a bug in caller code.
    pub fn fatal(&self, message: &str) -> ! {
        self.append(&format_line("FATAL", file!(), line!(), message));
        self.flush_blocking();
        std::process::abort();
    }

    /// Forces the current buffer to the writer thread and blocks until it has drained every
    /// pending buffer at least once.
    pub fn flush_blocking(&self) {
        {
            let mut shared = self.shared.lock().unwrap_or_else(|e| e.into_inner());
            if !shared.current.is_empty() {
                let full = std::mem::replace(&mut shared.current, Vec::with_capacity(64 * 1024));
                shared.ready.push(full);
            }
        }
        self.condvar.notify_one();

        // Give the writer thread a bounded window to drain; this is a best-effort flush used
        // before process exit, not a handshake protocol.
        for _ in 0..50 {
            if self.shared.lock().unwrap_or_else(|e| e.into_inner()).ready.is_empty() {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    /// Stops the writer thread after flushing everything buffered.
    pub fn shutdown(&self) {
        self.flush_blocking();
        {
            let mut shared = self.shared.lock().unwrap_or_else(|e| e.into_inner());
            shared.stopped = true;
        }
        self.condvar.notify_one();

        if let Some(handle) = self
            .writer_thread
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            let _ = handle.join();
        }
    }
}

impl Log for AsyncLog {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        let line = format_line(
            &record.level().to_string(),
            record.file().unwrap_or("?"),
            record.line().unwrap_or(0),
            &record.args().to_string(),
        );
        self.append(&line);
    }

    fn flush(&self) {
        self.flush_blocking();
    }
}

/// Adapts `Arc<AsyncLog>` to the `'static` owned logger `log::set_boxed_logger` wants.
struct ArcLogger(Arc<AsyncLog>);

impl Log for ArcLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        self.0.enabled(metadata)
    }

    fn log(&self, record: &Record) {
        self.0.log(record);
    }

    fn flush(&self) {
        self.0.flush();
    }
}

fn format_line(level_name: &str, file: &str, line: u32, message: &str) -> String {
    format!(
        "{} [{}] {}:{} - {}\n",
        Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
        level_name,
        file,
        line,
        message
    )
}

fn run_writer(mut file: File, shared: Arc<Mutex<Shared>>, condvar: Arc<Condvar>) {
    loop {
        let ready = {
            let guard = shared.lock().unwrap_or_else(|e| e.into_inner());
            let (mut guard, timeout) = condvar
                .wait_timeout_while(guard, FLUSH_INTERVAL, |s| s.ready.is_empty() && !s.stopped)
                .unwrap_or_else(|e| e.into_inner());

            if timeout.timed_out() && guard.ready.is_empty() && !guard.current.is_empty() {
                let full = std::mem::replace(&mut guard.current, Vec::with_capacity(64 * 1024));
                guard.ready.push(full);
            }

            let drained: Vec<Vec<u8>> = guard.ready.drain(..).collect();
            let done = guard.stopped && drained.is_empty() && guard.current.is_empty();
            (drained, done)
        };
        let (buffers, done) = ready;

        for buf in &buffers {
            if let Err(e) = file.write_all(buf) {
                eprintln!("webreactord: log write failed: {e}");
            }
        }
        if !buffers.is_empty() {
            let _ = file.flush();
        }

        if done {
            return;
        }
    }
}

/// Resolves a log file path relative to the current directory, matching the rest of the
/// crate's path handling.
pub fn default_log_path(name: &str) -> PathBuf {
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn appended_lines_are_flushed_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.log");

        let logger = AsyncLog::start(&path).unwrap();
        logger.append(&format_line("INFO", "test.rs", 42, "hello"));
        logger.flush_blocking();
        logger.shutdown();

        let mut contents = String::new();
        File::open(&path).unwrap().read_to_string(&mut contents).unwrap();
        assert!(contents.contains("hello"));
        assert!(contents.contains("[INFO]"));
        assert!(contents.contains("test.rs:42"));
    }

    #[test]
    fn fatal_message_reaches_disk_before_abort_would_fire() {
        // We can't actually call `fatal` in a test (it aborts the process); this exercises
        // the same append + flush path `fatal` uses.
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fatal.log");

        let logger = AsyncLog::start(&path).unwrap();
        logger.append(&format_line("FATAL", "fatal.rs", 7, "disk full"));
        logger.flush_blocking();
        logger.shutdown();

        let mut contents = String::new();
        File::open(&path).unwrap().read_to_string(&mut contents).unwrap();
        assert!(contents.contains("FATAL"));
        assert!(contents.contains("disk full"));
    }
}

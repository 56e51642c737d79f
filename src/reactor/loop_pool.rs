//! Spawns and owns the fixed-size pool of worker threads, each running its own [`EventLoop`].

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use mio::event::Source;

use crate::net::tcp_stream::TcpStream;
use crate::reactor::event_loop::{EventLoop, EventLoopConfig, EventLoopHandle, EventLoopStopper};

/// A fixed-size pool of worker reactors, each pinned to its own OS thread.
///
/// New connections are handed off round-robin via [`LoopPool::next`], mirroring the
/// one-acceptor-thread, N-worker-thread layout described for the acceptor/server component.
pub struct LoopPool<S>
where
    S: TcpStream + std::io::Read + std::io::Write + Source + Send + 'static,
{
    handles: Vec<EventLoopHandle<S>>,
    stoppers: Vec<EventLoopStopper>,
    threads: Vec<JoinHandle<()>>,
    next: AtomicUsize,
}

impl<S> LoopPool<S>
where
    S: TcpStream + std::io::Read + std::io::Write + Source + Send + 'static,
{
    /// Spawns `worker_count` threads, each constructing and running its own `EventLoop`.
    pub fn spawn(worker_count: usize, config: EventLoopConfig) -> io::Result<Self> {
        assert!(worker_count > 0, "a pool needs at least one worker");

        let mut handles = Vec::with_capacity(worker_count);
        let mut stoppers = Vec::with_capacity(worker_count);
        let mut threads = Vec::with_capacity(worker_count);

        for index in 0..worker_count {
            let config = config.clone();
            let (handle_tx, handle_rx) = std::sync::mpsc::channel();

            let thread = std::thread::Builder::new()
                .name(format!("webreactor-worker-{index}"))
                .spawn(move || {
                    let mut event_loop = match EventLoop::<S>::new(config) {
                        Ok(event_loop) => event_loop,
                        Err(e) => {
                            log::error!("worker {index}: failed to construct event loop: {e}");
                            return;
                        }
                    };
                    let _ = handle_tx.send((event_loop.handle(), event_loop.stopper()));
                    event_loop.run();
                })
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;

            let (handle, stopper) = handle_rx.recv().map_err(|_| {
                io::Error::new(
                    io::ErrorKind::Other,
                    "worker thread exited before starting its event loop",
                )
            })?;

            handles.push(handle);
            stoppers.push(stopper);
            threads.push(thread);
        }

        Ok(Self {
            handles,
            stoppers,
            threads,
            next: AtomicUsize::new(0),
        })
    }

    /// Number of worker loops in the pool.
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Whether the pool has any workers (always true for a pool built with [`LoopPool::spawn`]).
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Returns the next loop handle in round-robin order.
    pub fn next(&self) -> EventLoopHandle<S> {
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.handles.len();
        self.handles[index].clone()
    }

    /// Signals every worker loop to stop and waits for its thread to exit.
    pub fn shutdown(self) {
        for stopper in &self.stoppers {
            stopper.stop();
        }
        for thread in self.threads {
            let _ = thread.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ResourceCache;
    use crate::metrics::Metrics;
    use std::path::PathBuf;
    use std::time::Duration;

    fn test_config() -> EventLoopConfig {
        EventLoopConfig {
            doc_root: Arc::new(PathBuf::from(".")),
            cache: Arc::new(ResourceCache::new(1024 * 1024)),
            metrics: Arc::new(Metrics::default()),
            idle_timeout: Duration::from_secs(60),
            max_line_len: crate::http::DEFAULT_MAX_LINE_LEN,
        }
    }

    #[test]
    fn round_robins_across_workers() {
        let pool = LoopPool::<mio::net::TcpStream>::spawn(3, test_config()).unwrap();
        assert_eq!(pool.len(), 3);

        let first = pool.next();
        let second = pool.next();
        let third = pool.next();
        let fourth = pool.next();

        assert_ne!(first.owner(), second.owner());
        assert_ne!(second.owner(), third.owner());
        assert_eq!(first.owner(), fourth.owner());

        pool.shutdown();
    }
}

//! A single-threaded reactor: one `mio::Poll`, one `Slab` of connections, one task queue.
//!
//! [`EventLoop`] owns everything mutable and never leaves the thread it was constructed on.
//! [`EventLoopHandle`] is the cheap, `Send + Sync`, cloneable half that lets other threads
//! hand it work via [`EventLoopHandle::post`]. Unlike a callback invoked synchronously from
//! another thread, `post` always enqueues onto a channel; the loop drains that channel once
//! per iteration, right after dispatching I/O events. When `post` is called from the loop's
//! own thread the task still goes through the queue, only the cross-thread wakeup write is
//! skipped, since the loop will see it on its very next iteration regardless.

use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::ThreadId;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use mio::{event::Source, Events, Poll, Token, Waker};
use slab::Slab;

use crate::cache::ResourceCache;
use crate::connection::Connection;
use crate::metrics::Metrics;
use crate::net::tcp_stream::TcpStream;
use crate::timer::wheel::TimerWheel;

const WAKE_TOKEN: Token = Token(usize::MAX - 1);
const DEFAULT_EVENTS_CAPACITY: usize = 1024;

/// A unit of work posted to a loop, run with exclusive access to it.
pub type Task<S> = Box<dyn FnOnce(&mut EventLoop<S>) + Send>;

/// A cloneable, cross-thread capable reference to a running [`EventLoop`].
pub struct EventLoopHandle<S> {
    tasks: Sender<Task<S>>,
    waker: Arc<Waker>,
    owner: ThreadId,
}

impl<S> Clone for EventLoopHandle<S> {
    fn clone(&self) -> Self {
        Self {
            tasks: self.tasks.clone(),
            waker: self.waker.clone(),
            owner: self.owner,
        }
    }
}

// Safety: `EventLoopHandle` holds no `S` value directly, only a `Sender<Task<S>>` and a
// `Waker`, both of which are `Send + Sync` regardless of `S`.
unsafe impl<S> Send for EventLoopHandle<S> {}
unsafe impl<S> Sync for EventLoopHandle<S> {}

impl<S> EventLoopHandle<S> {
    /// Whether the caller is already running on the owning loop's thread.
    pub fn is_in_loop_thread(&self) -> bool {
        std::thread::current().id() == self.owner
    }

    /// The `ThreadId` of the loop this handle belongs to, used by [`LoopPool`](crate::reactor::LoopPool)'s
    /// tests to verify round-robin assignment without exposing loop internals more broadly.
    pub(crate) fn owner(&self) -> ThreadId {
        self.owner
    }

    /// Schedules `task` to run with exclusive access to the loop, on the loop's own thread.
    ///
    /// Always enqueues; never runs `task` inline even when called from the owning thread.
    /// This sidesteps the recursive-`&mut self` access a truly synchronous inline call would
    /// require, at the cost of a one-iteration delay when posting from the loop to itself.
    pub fn post<F>(&self, task: F)
    where
        F: FnOnce(&mut EventLoop<S>) + Send + 'static,
    {
        if self.tasks.send(Box::new(task)).is_err() {
            return;
        }
        if !self.is_in_loop_thread() {
            let _ = self.waker.wake();
        }
    }
}

/// A handle that stops a specific loop's [`EventLoop::run`] from any thread.
#[derive(Clone)]
pub struct EventLoopStopper {
    running: Arc<AtomicBool>,
    waker: Arc<Waker>,
}

impl EventLoopStopper {
    /// Requests that the loop exit its dispatch loop and return from `run`.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
        let _ = self.waker.wake();
    }
}

/// Construction parameters shared by every loop a [`crate::reactor::LoopPool`] spawns.
#[derive(Clone)]
pub struct EventLoopConfig {
    /// Root directory static file requests are resolved against.
    pub doc_root: Arc<PathBuf>,
    /// Shared mmap cache, one instance per process.
    pub cache: Arc<ResourceCache>,
    /// Shared process-wide counters.
    pub metrics: Arc<Metrics>,
    /// Idle timeout applied to every accepted connection.
    pub idle_timeout: Duration,
    /// Maximum accepted request-line/header-line length.
    pub max_line_len: usize,
}

/// One worker's reactor: a poll loop, its connections, and its pending task queue.
///
/// Must be constructed on the thread that will call [`EventLoop::run`]; the owning
/// [`ThreadId`] is captured at construction time and used to distinguish same-thread from
/// cross-thread [`EventLoopHandle::post`] calls.
pub struct EventLoop<S>
where
    S: TcpStream + std::io::Read + std::io::Write + Source,
{
    poll: Poll,
    events_capacity: usize,
    connections: Slab<Connection<S>>,
    tasks_tx: Sender<Task<S>>,
    tasks_rx: Receiver<Task<S>>,
    waker: Arc<Waker>,
    owner: ThreadId,
    timers: TimerWheel,
    config: EventLoopConfig,
    running: Arc<AtomicBool>,
}

impl<S> EventLoop<S>
where
    S: TcpStream + std::io::Read + std::io::Write + Source,
{
    /// Creates a loop. Must be called from the thread that will subsequently call
    /// [`EventLoop::run`].
    pub fn new(config: EventLoopConfig) -> io::Result<Self> {
        let poll = Poll::new()?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKE_TOKEN)?);
        let (tasks_tx, tasks_rx) = crossbeam_channel::unbounded();

        Ok(Self {
            poll,
            events_capacity: DEFAULT_EVENTS_CAPACITY,
            connections: Slab::new(),
            tasks_tx,
            tasks_rx,
            waker,
            owner: std::thread::current().id(),
            timers: TimerWheel::new(),
            config,
            running: Arc::new(AtomicBool::new(true)),
        })
    }

    /// A cloneable handle other threads can use to post work onto this loop.
    pub fn handle(&self) -> EventLoopHandle<S> {
        EventLoopHandle {
            tasks: self.tasks_tx.clone(),
            waker: self.waker.clone(),
            owner: self.owner,
        }
    }

    /// A stop switch for this loop: flips a flag `run` checks each iteration and wakes the
    /// poll so it notices promptly even while blocked waiting for I/O.
    pub fn stopper(&self) -> EventLoopStopper {
        EventLoopStopper {
            running: self.running.clone(),
            waker: self.waker.clone(),
        }
    }

    /// Registers a freshly accepted stream and starts tracking its idle timeout.
    pub fn add_connection(&mut self, stream: S) -> io::Result<Token> {
        let entry = self.connections.vacant_entry();
        let token = Token(entry.key());
        let conn = Connection::new(
            token,
            stream,
            self.poll.registry(),
            self.config.doc_root.clone(),
            self.config.cache.clone(),
            self.config.metrics.clone(),
            self.config.max_line_len,
        )?;
        entry.insert(conn);
        self.timers.add(token, Instant::now(), self.config.idle_timeout);
        self.config.metrics.connection_accepted();
        Ok(token)
    }

    /// Runs the dispatch loop until [`EventLoopStopper::stop`] is called. A poll error other
    /// than `Interrupted` is logged and ends the loop early.
    pub fn run(&mut self) {
        let mut events = Events::with_capacity(self.events_capacity);

        while self.running.load(Ordering::Acquire) {
            let now = Instant::now();
            match self.poll.poll(&mut events, self.poll_timeout(now)) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    log::error!("event loop poll failed: {e}");
                    return;
                }
            }

            for event in events.iter() {
                if event.token() == WAKE_TOKEN {
                    continue;
                }
                self.handle_io(event.token(), event.is_readable(), event.is_writable());
            }

            self.drain_tasks();
            self.reap_expired();
        }
    }

    #[cfg(test)]
    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn handle_io(&mut self, token: Token, readable: bool, writable: bool) {
        let Some(conn) = self.connections.get_mut(token.0) else {
            return;
        };

        if readable {
            conn.on_readable();
        }
        if writable && !conn.is_closed() {
            conn.on_writable();
        }

        if conn.is_closed() {
            let _ = conn.deregister(self.poll.registry());
            self.connections.remove(token.0);
            self.timers.remove(token);
            self.config.metrics.connection_closed();
            return;
        }

        self.timers
            .adjust(token, Instant::now(), self.config.idle_timeout);
        let _ = conn.reregister(self.poll.registry());
    }

    fn drain_tasks(&mut self) {
        while let Ok(task) = self.tasks_rx.try_recv() {
            task(self);
        }
    }

    fn reap_expired(&mut self) {
        let expired = self.timers.handle_expired(Instant::now());
        for token in expired {
            if let Some(mut conn) = self.try_remove_connection(token) {
                let _ = conn.deregister(self.poll.registry());
                self.config.metrics.connection_closed();
            }
        }
    }

    fn try_remove_connection(&mut self, token: Token) -> Option<Connection<S>> {
        if self.connections.contains(token.0) {
            Some(self.connections.remove(token.0))
        } else {
            None
        }
    }

    fn poll_timeout(&self, now: Instant) -> Option<Duration> {
        match self.timers.next_timeout_ms(now) {
            -1 => None,
            ms => Some(Duration::from_millis(ms as u64)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ResourceCache;
    use crate::metrics::Metrics;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration as StdDuration;

    fn test_config() -> EventLoopConfig {
        EventLoopConfig {
            doc_root: Arc::new(PathBuf::from(".")),
            cache: Arc::new(ResourceCache::new(1024 * 1024)),
            metrics: Arc::new(Metrics::default()),
            idle_timeout: StdDuration::from_secs(60),
            max_line_len: crate::http::DEFAULT_MAX_LINE_LEN,
        }
    }

    #[test]
    fn handle_recognizes_its_own_thread() {
        let event_loop = EventLoop::<mio::net::TcpStream>::new(test_config()).unwrap();
        let handle = event_loop.handle();
        assert!(handle.is_in_loop_thread());

        let joined = std::thread::spawn(move || handle.is_in_loop_thread())
            .join()
            .unwrap();
        assert!(!joined);
    }

    #[test]
    fn posted_task_runs_and_stop_ends_run() {
        let mut event_loop = EventLoop::<mio::net::TcpStream>::new(test_config()).unwrap();
        let handle = event_loop.handle();
        let stopper = event_loop.stopper();
        let ran = Arc::new(AtomicUsize::new(0));

        let worker = std::thread::spawn(move || {
            event_loop.run();
        });

        let ran_clone = ran.clone();
        handle.post(move |_loop: &mut EventLoop<mio::net::TcpStream>| {
            ran_clone.fetch_add(1, Ordering::SeqCst);
        });

        // Give the loop a moment to drain the posted task before stopping it.
        std::thread::sleep(StdDuration::from_millis(50));
        stopper.stop();
        worker.join().unwrap();

        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }
}

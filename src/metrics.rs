//! Atomic counters exposed for diagnostics.

use std::sync::atomic::{AtomicU64, Ordering};

/// Process-global request/connection counters.
///
/// All operations use `Ordering::Relaxed`: these are independent counters with no
/// cross-counter invariant that requires synchronization.
#[derive(Debug, Default)]
pub struct Metrics {
    connections_accepted: AtomicU64,
    connections_closed: AtomicU64,
    requests_handled: AtomicU64,
    framing_errors: AtomicU64,
    bytes_written: AtomicU64,
}

/// Point-in-time snapshot of [`Metrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    /// Total accepted connections since start.
    pub connections_accepted: u64,
    /// Total connections that reached `Disconnected`.
    pub connections_closed: u64,
    /// Total requests that were successfully framed and handled.
    pub requests_handled: u64,
    /// Total requests rejected for framing errors.
    pub framing_errors: u64,
    /// Total bytes written to sockets across all connections.
    pub bytes_written: u64,
}

impl Metrics {
    /// Creates a zeroed counter set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a newly accepted connection.
    pub fn connection_accepted(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a connection reaching its terminal state.
    pub fn connection_closed(&self) {
        self.connections_closed.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a successfully framed and handled request.
    pub fn request_handled(&self) {
        self.requests_handled.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a request rejected for a framing error.
    pub fn framing_error(&self) {
        self.framing_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Records `n` bytes written to a socket.
    pub fn bytes_written(&self, n: u64) {
        self.bytes_written.fetch_add(n, Ordering::Relaxed);
    }

    /// Takes a consistent-enough snapshot of all counters for reporting.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connections_accepted: self.connections_accepted.load(Ordering::Relaxed),
            connections_closed: self.connections_closed.load(Ordering::Relaxed),
            requests_handled: self.requests_handled.load(Ordering::Relaxed),
            framing_errors: self.framing_errors.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let m = Metrics::new();
        m.connection_accepted();
        m.connection_accepted();
        m.request_handled();
        m.bytes_written(128);

        let snap = m.snapshot();
        assert_eq!(snap.connections_accepted, 2);
        assert_eq!(snap.requests_handled, 1);
        assert_eq!(snap.bytes_written, 128);
        assert_eq!(snap.connections_closed, 0);
    }
}

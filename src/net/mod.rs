//! Socket trait abstractions over `mio`/`std` TCP types.
//!
//! Generalizing the reactor and [`crate::connection::Connection`] over these traits keeps the
//! event-loop and connection-state-machine code free of a hard dependency on `mio::net`, which
//! matters for unit tests that want a socket-shaped double without a real fd.

pub mod tcp_listener;
pub mod tcp_stream;

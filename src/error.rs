//! Crate-wide error type.
//!
//! Transient I/O and peer-induced errors never reach this type (they're handled inline by
//! [`crate::connection::Connection`]); only framing errors, cache misses, lock poisoning,
//! and fatal init failures are represented here.

use std::io;

use crate::http::FramingError;

/// Errors surfaced across module boundaries.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An I/O operation failed in a way that isn't would-block or peer-close.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// The request line or headers could not be framed.
    #[error("framing error: {0}")]
    Framing(#[from] FramingError),

    /// A requested path has no corresponding cache entry and could not be loaded.
    #[error("resource not found")]
    CacheMiss,

    /// A mutex guarding shared state was poisoned by a panicking holder.
    #[error("lock poisoned")]
    PoisonedLock,
}

//! Asynchronous logging backend plugged into the `log` crate's facade.

pub mod async_log;

pub use async_log::AsyncLog;

//! CLI surface and runtime configuration.

use std::net::IpAddr;
use std::path::PathBuf;

use clap::Parser;

const DEFAULT_CACHE_BYTES: u64 = 64 * 1024 * 1024;
const DEFAULT_IDLE_TIMEOUT_MS: u64 = 60_000;

/// Configuration for a single `webreactord` instance.
#[derive(Debug, Clone, Parser)]
#[command(name = "webreactord", about = "Multi-reactor static-file HTTP server")]
pub struct Config {
    /// Address to listen on.
    #[arg(long, default_value = "0.0.0.0")]
    pub address: IpAddr,

    /// Port to listen on.
    #[arg(long, default_value_t = 8080)]
    pub port: u16,

    /// Document root served for GET requests.
    #[arg(long, default_value = "./public")]
    pub doc_root: PathBuf,

    /// Path to the append-only log file.
    #[arg(long, default_value = "webreactord.log")]
    pub log_file: PathBuf,

    /// Number of worker reactor loops (in addition to the acceptor loop).
    #[arg(long, default_value_t = default_worker_count())]
    pub workers: usize,

    /// Resource cache byte budget.
    #[arg(long, default_value_t = DEFAULT_CACHE_BYTES)]
    pub cache_bytes: u64,

    /// Idle connection timeout, in milliseconds.
    #[arg(long, default_value_t = DEFAULT_IDLE_TIMEOUT_MS)]
    pub idle_timeout_ms: u64,
}

fn default_worker_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get().saturating_sub(1).max(1))
        .unwrap_or(1)
}

impl Config {
    /// Parses configuration from `std::env::args`.
    pub fn parse_args() -> Self {
        Config::parse()
    }

    /// The full listen address as a `SocketAddr`.
    pub fn listen_addr(&self) -> std::net::SocketAddr {
        std::net::SocketAddr::new(self.address, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = Config::parse_from(["webreactord"]);
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.cache_bytes, DEFAULT_CACHE_BYTES);
        assert_eq!(cfg.idle_timeout_ms, DEFAULT_IDLE_TIMEOUT_MS);
        assert!(cfg.workers >= 1);
    }

    #[test]
    fn overrides_apply() {
        let cfg = Config::parse_from([
            "webreactord",
            "--port",
            "9090",
            "--cache-bytes",
            "1024",
            "--workers",
            "4",
        ]);
        assert_eq!(cfg.port, 9090);
        assert_eq!(cfg.cache_bytes, 1024);
        assert_eq!(cfg.workers, 4);
    }
}

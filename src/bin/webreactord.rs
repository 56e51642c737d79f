// Copyright 2022 Ryan Seipp
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! CLI entry point: parses configuration, wires up logging, builds the worker pool and
//! acceptor, and runs until a SIGINT/SIGTERM or a bind failure ends the process.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;

use webreactor::cache::ResourceCache;
use webreactor::config::Config;
use webreactor::log::async_log::AsyncLog;
use webreactor::metrics::Metrics;
use webreactor::reactor::event_loop::EventLoopConfig;
use webreactor::reactor::LoopPool;
use webreactor::server::{self, Server};

fn main() -> ExitCode {
    let config = Config::parse_args();

    let logger = match AsyncLog::start(&config.log_file) {
        Ok(logger) => logger,
        Err(e) => {
            eprintln!("webreactord: failed to open log file {:?}: {e}", config.log_file);
            return ExitCode::FAILURE;
        }
    };
    if AsyncLog::install(logger.clone(), log::LevelFilter::Info).is_err() {
        eprintln!("webreactord: a logger is already installed");
        return ExitCode::FAILURE;
    }

    match run(&config) {
        Ok(()) => {
            log::info!("webreactord stopped");
            logger.shutdown();
            ExitCode::SUCCESS
        }
        Err(e) => {
            logger.fatal(&format!("startup failed: {e}"));
        }
    }
}

fn run(config: &Config) -> std::io::Result<()> {
    let doc_root = Arc::new(config.doc_root.clone());
    let cache = Arc::new(ResourceCache::new(config.cache_bytes));
    let metrics = Arc::new(Metrics::new());

    let loop_config = EventLoopConfig {
        doc_root,
        cache,
        metrics,
        idle_timeout: Duration::from_millis(config.idle_timeout_ms),
        max_line_len: webreactor::http::DEFAULT_MAX_LINE_LEN,
    };

    log::info!(
        "starting webreactord on {} with {} worker loop(s), doc root {:?}",
        config.listen_addr(),
        config.workers,
        config.doc_root,
    );

    let pool = LoopPool::spawn(config.workers, loop_config)?;
    let listener = server::bind(config.listen_addr(), 2048)?;
    let mut server = Server::new(listener, pool)?;

    let stopper = server.stopper();
    let mut signals = Signals::new([SIGINT, SIGTERM])?;
    std::thread::Builder::new()
        .name("webreactor-signals".to_string())
        .spawn(move || {
            if let Some(sig) = signals.forever().next() {
                log::info!("received signal {sig}, shutting down");
                stopper.stop();
            }
        })?;

    server.run()?;
    server.shutdown_workers();

    Ok(())
}

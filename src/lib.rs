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

//! A multi-reactor, static-file HTTP/1.1 server.
//!
//! One acceptor thread owns the listening socket and hands every accepted connection off,
//! round-robin, to a fixed pool of worker threads. Each worker runs its own single-threaded
//! reactor ([`reactor::EventLoop`]) driving an edge-triggered `mio::Poll`; a connection is
//! mutated only by the worker loop that owns it.

pub mod buffer;
pub mod cache;
pub mod config;
pub mod connection;
pub mod error;
pub mod http;
pub mod log;
pub mod metrics;
pub mod mime;
pub mod net;
pub mod output_chain;
pub mod reactor;
pub mod server;
pub mod timer;

pub use error::Error;

//! Per-socket state machine: buffered reads, request framing, and response writes.

use std::{
    io::{self, ErrorKind, IoSlice, Read, Write},
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::Arc,
};

use mio::{event::Source, Interest, Registry, Token};

use crate::buffer::Buffer;
use crate::cache::ResourceCache;
use crate::http::response::Response;
use crate::http::{self, status::Status, ParseOutcome, Request, Version};
use crate::metrics::Metrics;
use crate::mime::content_type_for_path;
use crate::net::tcp_stream::TcpStream;
use crate::output_chain::{OutputChain, MAX_IO_VECTORS};

const INITIAL_READ_CAPACITY: usize = 4096;
const READ_CHUNK: usize = 16 * 1024;

/// Lifecycle state of a connection.
///
/// There is no handshake state here, unlike a TLS-capable connection: a socket handed to
/// [`Connection::new`] is already fully connected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Connected,
    Disconnecting,
    Disconnected,
}

/// One accepted socket, owned exclusively by the worker loop it was registered with.
///
/// All mutating methods assume the caller is running on that owning loop's thread; the
/// reactor enforces this by only ever calling them from within its own event dispatch or
/// from a task it posted to itself.
pub struct Connection<S>
where
    S: TcpStream + Read + Write + Source,
{
    token: Token,
    stream: S,
    peer: SocketAddr,
    state: State,
    in_buf: Buffer,
    out: OutputChain,
    wants_write: bool,
    doc_root: Arc<PathBuf>,
    cache: Arc<ResourceCache>,
    metrics: Arc<Metrics>,
    max_line_len: usize,
}

impl<S> Connection<S>
where
    S: TcpStream + Read + Write + Source,
{
    /// Wraps an accepted stream, registering it for readability.
    pub fn new(
        token: Token,
        mut stream: S,
        registry: &Registry,
        doc_root: Arc<PathBuf>,
        cache: Arc<ResourceCache>,
        metrics: Arc<Metrics>,
        max_line_len: usize,
    ) -> io::Result<Self> {
        let peer = stream.peer_addr().unwrap_or_else(|_| {
            SocketAddr::new(std::net::IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED), 0)
        });
        registry.register(&mut stream, token, Interest::READABLE)?;

        Ok(Self {
            token,
            stream,
            peer,
            state: State::Connected,
            in_buf: Buffer::new(INITIAL_READ_CAPACITY),
            out: OutputChain::new(),
            wants_write: false,
            doc_root,
            cache,
            metrics,
            max_line_len,
        })
    }

    /// This connection's reactor token.
    pub fn token(&self) -> Token {
        self.token
    }

    /// The remote peer's address, captured at accept time.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Whether the connection has fully shut down and can be removed from the loop.
    pub fn is_closed(&self) -> bool {
        self.state == State::Disconnected
    }

    /// Edge-triggered read: drains the socket until it would block, framing and handling as
    /// many pipelined requests as are available after each read.
    pub fn on_readable(&mut self) {
        loop {
            self.in_buf.reserve(READ_CHUNK);
            let slice = std::borrow::BorrowMut::borrow_mut(&mut self.in_buf);
            match self.stream.read(slice) {
                Ok(0) => {
                    self.begin_close();
                    break;
                }
                Ok(n) => {
                    self.in_buf.mark_written(n);
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(_) => {
                    self.begin_close();
                    break;
                }
            }
        }

        if self.state == State::Disconnecting || self.state == State::Disconnected {
            return;
        }

        // A framing error leaves `state` at `Disconnecting` with the error response already
        // queued; the write path closes the socket once that response has drained.
        let _ = self.drain_requests();
    }

    /// Frames and handles every complete request currently buffered.
    fn drain_requests(&mut self) -> Result<(), ()> {
        loop {
            let outcome = match http::parse_request(&self.in_buf, self.max_line_len) {
                Ok(outcome) => outcome,
                Err(_) => {
                    self.metrics.framing_error();
                    self.write_error(Version::Http11, Status::BadRequest, false);
                    self.state = State::Disconnecting;
                    return Err(());
                }
            };

            let request = match outcome {
                ParseOutcome::Incomplete => return Ok(()),
                ParseOutcome::Complete(request) => request,
            };

            let consumed = request.consumed;
            let close_after = request.wants_close();
            self.handle_request(request);
            self.in_buf.mark_read(consumed);
            self.metrics.request_handled();

            if close_after {
                self.state = State::Disconnecting;
                return Ok(());
            }
        }
    }

    fn handle_request(&mut self, request: Request<'_>) {
        let version = request.version;
        let keep_alive = !request.wants_close();

        // GET and POST are both served the mapped file; a POST body is never read, since
        // the framer only looks for the header terminator.
        let resolved = match resolve_path(&self.doc_root, request.target) {
            Some(path) => path,
            None => {
                self.write_error(version, Status::Forbidden, keep_alive);
                return;
            }
        };

        match self.cache.get(&resolved) {
            Some(resource) => {
                let content_type = content_type_for_path(&resolved);
                let response = Response::with_mapped_body(
                    version,
                    Status::Ok,
                    content_type,
                    keep_alive,
                    resource,
                );
                response.write_into(&mut self.out);
                self.wants_write = true;
            }
            None => self.write_error(version, Status::NotFound, keep_alive),
        }
    }

    fn write_error(&mut self, version: Version, status: Status, keep_alive: bool) {
        Response::error(version, status, keep_alive).write_into(&mut self.out);
        self.wants_write = true;
    }

    /// Attempts to drain the output chain to the socket, vectored where possible.
    pub fn on_writable(&mut self) {
        while !self.out.is_empty() {
            let slices = self.out.fill_io_vectors(MAX_IO_VECTORS);
            match write_vectored(&mut self.stream, &slices) {
                Ok(0) => break,
                Ok(n) => {
                    self.metrics.bytes_written(n as u64);
                    self.out.advance(n);
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(_) => {
                    self.begin_close();
                    return;
                }
            }
        }

        self.wants_write = !self.out.is_empty();

        if self.out.is_empty() && self.state == State::Disconnecting {
            self.begin_close();
        }
    }

    /// Whether the loop should currently poll this socket for writability.
    pub fn wants_write(&self) -> bool {
        self.wants_write
    }

    fn begin_close(&mut self) {
        self.state = State::Disconnected;
    }

    /// Updates the registered interest set to match pending output, per the reactor's
    /// edge-triggered re-registration discipline.
    pub fn reregister(&mut self, registry: &Registry) -> io::Result<()> {
        let interest = if self.wants_write {
            Interest::READABLE | Interest::WRITABLE
        } else {
            Interest::READABLE
        };
        registry.reregister(&mut self.stream, self.token, interest)
    }

    /// Removes this socket from the registry. Safe to call even if already deregistered by
    /// a prior error path; the underlying `Err` is surfaced to the caller either way.
    pub fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        registry.deregister(&mut self.stream)
    }
}

fn write_vectored<W: Write>(writer: &mut W, slices: &[IoSlice<'_>]) -> io::Result<usize> {
    if slices.is_empty() {
        return Ok(0);
    }
    writer.write_vectored(slices)
}

/// Resolves a request target against `doc_root`, rejecting any path that escapes it.
///
/// Directory targets resolve to `index.html` within that directory. Returns `None` for
/// targets containing a `..` component.
fn resolve_path(doc_root: &Path, target: &str) -> Option<PathBuf> {
    let path_only = target.split('?').next().unwrap_or(target);
    let trimmed = path_only.trim_start_matches('/');

    let mut resolved = doc_root.to_path_buf();
    for component in trimmed.split('/') {
        match component {
            "" | "." => continue,
            ".." => return None,
            other => resolved.push(other),
        }
    }

    if path_only.ends_with('/') || path_only.is_empty() || path_only == "/" {
        resolved.push("index.html");
    }

    Some(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_path_joins_doc_root() {
        let root = Path::new("/srv/www");
        assert_eq!(
            resolve_path(root, "/a/b.html"),
            Some(PathBuf::from("/srv/www/a/b.html"))
        );
    }

    #[test]
    fn resolve_path_rejects_traversal() {
        let root = Path::new("/srv/www");
        assert_eq!(resolve_path(root, "/../etc/passwd"), None);
        assert_eq!(resolve_path(root, "/a/../../etc/passwd"), None);
    }

    #[test]
    fn resolve_path_root_target_uses_index() {
        let root = Path::new("/srv/www");
        assert_eq!(
            resolve_path(root, "/"),
            Some(PathBuf::from("/srv/www/index.html"))
        );
    }

    #[test]
    fn resolve_path_strips_query_string() {
        let root = Path::new("/srv/www");
        assert_eq!(
            resolve_path(root, "/a.html?x=1"),
            Some(PathBuf::from("/srv/www/a.html"))
        );
    }
}

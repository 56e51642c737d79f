//! The acceptor: a single thread owning the listening socket, handing accepted connections
//! off to worker loops round-robin.

use std::io::{self, ErrorKind, Read, Write};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use mio::{event::Source, Events, Interest, Poll, Token, Waker};
use socket2::{Domain, Protocol, Socket, Type};

use crate::net::tcp_listener::TcpListener;
use crate::net::tcp_stream::TcpStream;
use crate::reactor::LoopPool;

const LISTEN_TOKEN: Token = Token(0);
const WAKE_TOKEN: Token = Token(1);

/// Binds a listening socket with `SO_REUSEADDR` and an explicit backlog set before the
/// socket is handed to `mio`, then wraps it for non-blocking, edge-triggered use.
pub fn bind(addr: SocketAddr, backlog: i32) -> io::Result<mio::net::TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog)?;
    mio::net::TcpListener::from_std(socket.into())
}

/// Stops a running [`Server`] from any thread.
#[derive(Clone)]
pub struct ServerStopper {
    running: Arc<AtomicBool>,
    waker: Arc<Waker>,
}

impl ServerStopper {
    /// Requests that the acceptor loop exit.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
        let _ = self.waker.wake();
    }
}

/// Owns the listening socket and the worker pool connections are handed off to.
pub struct Server<T, S>
where
    T: TcpListener<S> + Source,
    S: TcpStream + Read + Write + Source + Send + 'static,
{
    listener: T,
    poll: Poll,
    waker: Arc<Waker>,
    running: Arc<AtomicBool>,
    pool: LoopPool<S>,
}

impl<T, S> Server<T, S>
where
    T: TcpListener<S> + Source,
    S: TcpStream + Read + Write + Source + Send + 'static,
{
    /// Registers `listener` on a fresh poll instance and takes ownership of `pool`.
    pub fn new(mut listener: T, pool: LoopPool<S>) -> io::Result<Self> {
        let poll = Poll::new()?;
        poll.registry()
            .register(&mut listener, LISTEN_TOKEN, Interest::READABLE)?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKE_TOKEN)?);

        Ok(Self {
            listener,
            poll,
            waker,
            running: Arc::new(AtomicBool::new(true)),
            pool,
        })
    }

    /// A handle that can stop [`Server::run`] from another thread (a signal handler, say).
    pub fn stopper(&self) -> ServerStopper {
        ServerStopper {
            running: self.running.clone(),
            waker: self.waker.clone(),
        }
    }

    /// Accepts connections and hands each off to a worker loop, until stopped.
    pub fn run(&mut self) -> io::Result<()> {
        let mut events = Events::with_capacity(256);

        while self.running.load(Ordering::Acquire) {
            match self.poll.poll(&mut events, None) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }

            for event in events.iter() {
                if event.token() == LISTEN_TOKEN {
                    self.accept()?;
                }
            }
        }

        Ok(())
    }

    /// Shuts down every worker loop in the pool. Consumes `self` since the pool cannot be
    /// reused once its threads have exited.
    pub fn shutdown_workers(self) {
        self.pool.shutdown();
    }

    fn accept(&mut self) -> io::Result<()> {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    log::debug!("accepted connection from {peer}");
                    let handle = self.pool.next();
                    handle.post(move |event_loop| {
                        if let Err(e) = event_loop.add_connection(stream) {
                            log::warn!("failed to register accepted connection: {e}");
                        }
                    });
                }
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => return Ok(()),
                Err(e) => return Err(e),
            }
        }
    }
}

//! Accept loop over the server's TCP listening socket.

use std::fmt;
use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use std::thread;
use std::time::Duration;

use crate::log_sink::{LogSink, Verbosity};
use crate::manager::ConnectionManager;

use super::ListenerError;

const ACCEPT_BACKOFF: Duration = Duration::from_millis(25);

/// Why the accept loop stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcceptorExit {
    /// The acceptor was closed by its owner.
    Closed,
    /// An accept call failed; the loop does not restart itself.
    Failed {
        /// Kind of the accept error.
        kind: io::ErrorKind,
        /// Rendered accept error.
        message: String,
    },
}

impl fmt::Display for AcceptorExit {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => formatter.write_str("listener closed"),
            Self::Failed { message, .. } => write!(formatter, "accept failed: {message}"),
        }
    }
}

/// Socket the accept loop draws connections from.
///
/// Implemented for [`TcpListener`]; other implementations let callers
/// observe how the loop reacts to accept failures.
pub trait ConnectionSource: Send {
    /// Address the source accepts on.
    fn local_addr(&self) -> io::Result<SocketAddr>;

    /// Switches the source between blocking and non-blocking accepts.
    fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()>;

    /// Accepts the next pending connection.
    fn accept(&self) -> io::Result<(TcpStream, SocketAddr)>;
}

impl ConnectionSource for TcpListener {
    fn local_addr(&self) -> io::Result<SocketAddr> {
        Self::local_addr(self)
    }

    fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        Self::set_nonblocking(self, nonblocking)
    }

    fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        Self::accept(self)
    }
}

/// Opens the listening socket during startup.
pub trait SocketBinder: Send + Sync {
    /// Binds `host:port`.
    ///
    /// # Errors
    ///
    /// Returns a [`ListenerError`] when the socket cannot be opened.
    fn bind(&self, host: &str, port: u16) -> Result<Acceptor, ListenerError>;
}

/// Binder that opens a TCP listener with [`Acceptor::bind`].
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpSocketBinder;

impl SocketBinder for TcpSocketBinder {
    fn bind(&self, host: &str, port: u16) -> Result<Acceptor, ListenerError> {
        Acceptor::bind(host, port)
    }
}

/// Bound listening socket, owned exclusively by the accept loop once
/// started.
pub struct Acceptor {
    source: Box<dyn ConnectionSource>,
    local_addr: SocketAddr,
}

impl fmt::Debug for Acceptor {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Acceptor")
            .field("local_addr", &self.local_addr)
            .finish_non_exhaustive()
    }
}

impl Acceptor {
    /// Binds `host:port`. Port `0` binds an ephemeral port.
    ///
    /// # Errors
    ///
    /// Returns [`ListenerError::Bind`] when the port is unavailable, or a
    /// resolution error when `host` does not resolve.
    pub fn bind(host: &str, port: u16) -> Result<Self, ListenerError> {
        let addr = (host, port)
            .to_socket_addrs()
            .map_err(|source| ListenerError::Resolve {
                host: host.to_owned(),
                port,
                source,
            })?
            .next()
            .ok_or_else(|| ListenerError::ResolveEmpty {
                host: host.to_owned(),
                port,
            })?;
        let listener =
            TcpListener::bind(addr).map_err(|source| ListenerError::Bind { addr, source })?;
        Self::from_source(listener)
    }

    /// Wraps an already bound connection source.
    ///
    /// # Errors
    ///
    /// Returns [`ListenerError::LocalAddr`] when the source cannot report
    /// its address.
    pub fn from_source(source: impl ConnectionSource + 'static) -> Result<Self, ListenerError> {
        let local_addr = source
            .local_addr()
            .map_err(|source| ListenerError::LocalAddr { source })?;
        Ok(Self {
            source: Box::new(source),
            local_addr,
        })
    }

    /// Address the socket is bound to.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Starts the accept loop on its own thread.
    ///
    /// Every accepted stream is handed to `manager` without further work.
    /// `on_exit` runs on the acceptor thread once the loop has stopped and
    /// the socket has been dropped.
    ///
    /// # Errors
    ///
    /// Returns an error when the socket cannot be made non-blocking or the
    /// thread cannot be spawned; the socket is dropped in both cases.
    pub fn start<F>(
        self,
        manager: Arc<dyn ConnectionManager>,
        log: LogSink,
        on_exit: F,
    ) -> Result<AcceptorHandle, ListenerError>
    where
        F: FnOnce(&AcceptorExit) + Send + 'static,
    {
        self.source
            .set_nonblocking(true)
            .map_err(|source| ListenerError::NonBlocking { source })?;
        let closed = Arc::new(AtomicBool::new(false));
        let closed_flag = Arc::clone(&closed);
        let local_addr = self.local_addr;
        let thread = thread::Builder::new()
            .name(String::from("collabd-acceptor"))
            .spawn(move || {
                let exit = run_accept_loop(self, &closed_flag, manager.as_ref(), &log);
                on_exit(&exit);
                exit
            })
            .map_err(|source| ListenerError::Spawn { source })?;
        Ok(AcceptorHandle {
            closed,
            local_addr,
            thread: Some(thread),
        })
    }
}

/// Handle to the running accept loop.
#[derive(Debug)]
pub struct AcceptorHandle {
    closed: Arc<AtomicBool>,
    local_addr: SocketAddr,
    thread: Option<thread::JoinHandle<AcceptorExit>>,
}

impl AcceptorHandle {
    /// Address the loop accepts on.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Asks the loop to stop; the socket is dropped within one back-off.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Returns `true` once the loop has stopped.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().is_none_or(thread::JoinHandle::is_finished)
    }

    /// Waits for the loop to stop and reports why it did.
    ///
    /// # Errors
    ///
    /// Returns [`ListenerError::ThreadPanic`] when the loop panicked.
    pub fn join(mut self) -> Result<AcceptorExit, ListenerError> {
        match self.thread.take() {
            Some(thread) => thread.join().map_err(|_| ListenerError::ThreadPanic),
            None => Ok(AcceptorExit::Closed),
        }
    }
}

impl Drop for AcceptorHandle {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

fn run_accept_loop(
    acceptor: Acceptor,
    closed: &AtomicBool,
    manager: &dyn ConnectionManager,
    log: &LogSink,
) -> AcceptorExit {
    let Acceptor { source, local_addr } = acceptor;
    log.log_line(
        Verbosity::INFO,
        format_args!("accepting connections on {local_addr}"),
    );
    let exit = loop {
        if closed.load(Ordering::SeqCst) {
            break AcceptorExit::Closed;
        }
        match source.accept() {
            Ok((stream, peer)) => {
                if let Err(error) = stream.set_nonblocking(false) {
                    log.log_line(
                        Verbosity::WARN,
                        format_args!("dropping connection from {peer}: {error}"),
                    );
                    continue;
                }
                log.log_line(
                    Verbosity::DEBUG,
                    format_args!("accepted connection from {peer}"),
                );
                manager.intake(stream);
            }
            Err(error) if error.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_BACKOFF);
            }
            Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
            Err(error) => {
                log.log_line(
                    Verbosity::ERROR,
                    format_args!("accept failed on {local_addr}: {error}"),
                );
                break AcceptorExit::Failed {
                    kind: error.kind(),
                    message: error.to_string(),
                };
            }
        }
    };
    drop(source);
    log.log_line(
        Verbosity::INFO,
        format_args!("acceptor stopped ({exit}); no longer accepting connections"),
    );
    exit
}

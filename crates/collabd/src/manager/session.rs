//! Per-client sessions and the registry that tracks them.

use std::collections::BTreeMap;
use std::fmt;
use std::io::{self, Read};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use crate::log_sink::{LogSink, Verbosity};

/// Identifier assigned to each admitted client, unique per manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClientId(u64);

impl ClientId {
    /// Numeric value of the identifier.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "#{}", self.0)
    }
}

/// Serves one client connection until it ends.
///
/// Runs on a thread dedicated to the client. The registry may shut the
/// socket down underneath the handler during termination, so handlers must
/// treat read and write errors as the end of the session.
pub trait SessionHandler: Send + Sync {
    /// Serves `stream` on behalf of `client`.
    fn serve(&self, client: ClientId, stream: TcpStream);
}

/// Session handler that owns the stream until the peer disconnects.
///
/// Inbound bytes are discarded.
#[derive(Debug, Clone)]
pub struct HoldOpenSession {
    log: LogSink,
}

impl HoldOpenSession {
    /// Builds a handler logging through `log`.
    #[must_use]
    pub fn new(log: LogSink) -> Self {
        Self {
            log: log.component("session"),
        }
    }
}

impl SessionHandler for HoldOpenSession {
    fn serve(&self, client: ClientId, mut stream: TcpStream) {
        let mut buffer = [0_u8; 4096];
        let mut received = 0_usize;
        loop {
            match stream.read(&mut buffer) {
                Ok(0) => break,
                Ok(count) => received = received.saturating_add(count),
                Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
                Err(error) => {
                    self.log.log_line(
                        Verbosity::DEBUG,
                        format_args!("client {client} read failed: {error}"),
                    );
                    break;
                }
            }
        }
        self.log.log_line(
            Verbosity::DEBUG,
            format_args!("client {client} disconnected after {received} bytes"),
        );
    }
}

struct ClientSession {
    peer: Option<SocketAddr>,
    control: TcpStream,
    thread: JoinHandle<()>,
}

/// Live client sessions keyed by identifier.
pub(crate) struct ClientRegistry {
    next_id: AtomicU64,
    clients: Mutex<BTreeMap<ClientId, ClientSession>>,
    handler: Arc<dyn SessionHandler>,
    log: LogSink,
}

impl ClientRegistry {
    pub(crate) fn new(handler: Arc<dyn SessionHandler>, log: LogSink) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            clients: Mutex::new(BTreeMap::new()),
            handler,
            log,
        }
    }

    /// Starts a session for `stream` and returns its identifier.
    pub(crate) fn admit(&self, stream: TcpStream) -> Option<ClientId> {
        let id = ClientId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let peer = stream.peer_addr().ok();
        let control = match stream.try_clone() {
            Ok(control) => control,
            Err(error) => {
                self.log.log_line(
                    Verbosity::WARN,
                    format_args!("dropping client {id}: cannot share socket: {error}"),
                );
                return None;
            }
        };

        let handler = Arc::clone(&self.handler);
        let spawned = thread::Builder::new()
            .name(format!("collabd-client-{}", id.get()))
            .spawn(move || handler.serve(id, stream));
        let thread = match spawned {
            Ok(thread) => thread,
            Err(error) => {
                self.log.log_line(
                    Verbosity::WARN,
                    format_args!("dropping client {id}: cannot spawn session: {error}"),
                );
                let _closed = control.shutdown(Shutdown::Both);
                return None;
            }
        };

        match peer {
            Some(addr) => self.log.log_line(
                Verbosity::INFO,
                format_args!("client {id} connected from {addr}"),
            ),
            None => self
                .log
                .log_line(Verbosity::INFO, format_args!("client {id} connected")),
        }
        self.lock().insert(
            id,
            ClientSession {
                peer,
                control,
                thread,
            },
        );
        Some(id)
    }

    /// Number of sessions whose handler is still running.
    pub(crate) fn active(&self) -> usize {
        self.lock()
            .values()
            .filter(|session| !session.thread.is_finished())
            .count()
    }

    /// Joins and forgets sessions whose handler has returned.
    pub(crate) fn prune(&self) -> usize {
        let finished: Vec<(ClientId, ClientSession)> = {
            let mut clients = self.lock();
            let ids: Vec<ClientId> = clients
                .iter()
                .filter(|(_, session)| session.thread.is_finished())
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter()
                .filter_map(|id| clients.remove(&id).map(|session| (id, session)))
                .collect()
        };
        let pruned = finished.len();
        for (id, session) in finished {
            self.finish(id, session);
        }
        pruned
    }

    /// Shuts every client socket down and joins the session threads.
    pub(crate) fn close_all(&self) {
        let sessions = std::mem::take(&mut *self.lock());
        for session in sessions.values() {
            let _closed = session.control.shutdown(Shutdown::Both);
        }
        for (id, session) in sessions {
            self.finish(id, session);
        }
    }

    fn finish(&self, id: ClientId, session: ClientSession) {
        let peer = session
            .peer
            .map_or_else(|| String::from("unknown peer"), |addr| addr.to_string());
        if session.thread.join().is_err() {
            self.log.log_line(
                Verbosity::WARN,
                format_args!("session for client {id} ({peer}) panicked"),
            );
        } else {
            self.log.log_line(
                Verbosity::DEBUG,
                format_args!("client {id} ({peer}) released"),
            );
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<ClientId, ClientSession>> {
        self.clients.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

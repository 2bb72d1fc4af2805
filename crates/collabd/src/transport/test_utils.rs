//! Test helpers for the transport module.

use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
};
use std::thread;
use std::time::{Duration, Instant};

use crate::manager::{ConnectionManager, ManagerError, ManagerKind};

use super::{Acceptor, ConnectionSource, ListenerError, SocketBinder};

/// Manager double that counts intakes and keeps the streams open.
pub(crate) struct CountingManager {
    count: Arc<AtomicUsize>,
    streams: Mutex<Vec<TcpStream>>,
}

impl CountingManager {
    pub(crate) fn new() -> (Arc<AtomicUsize>, Arc<Self>) {
        let count = Arc::new(AtomicUsize::new(0));
        let manager = Arc::new(Self {
            count: Arc::clone(&count),
            streams: Mutex::new(Vec::new()),
        });
        (count, manager)
    }
}

impl ConnectionManager for CountingManager {
    fn kind(&self) -> ManagerKind {
        ManagerKind::Basic
    }

    fn start(&self) -> Result<(), ManagerError> {
        Ok(())
    }

    fn intake(&self, stream: TcpStream) {
        self.streams
            .lock()
            .expect("counting manager mutex poisoned")
            .push(stream);
        self.count.fetch_add(1, Ordering::SeqCst);
    }

    fn terminate(&self) {
        self.streams
            .lock()
            .expect("counting manager mutex poisoned")
            .clear();
    }

    fn active_connections(&self) -> usize {
        self.streams
            .lock()
            .expect("counting manager mutex poisoned")
            .len()
    }

    fn prune(&self) -> usize {
        0
    }
}

pub(crate) fn wait_for_count(count: &AtomicUsize, expected: usize) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if count.load(Ordering::SeqCst) >= expected {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    false
}

/// Loopback listener whose every accept fails with `kind`.
pub(crate) struct FailingSource {
    listener: TcpListener,
    kind: io::ErrorKind,
}

impl FailingSource {
    pub(crate) fn bind(kind: io::ErrorKind) -> Self {
        Self {
            listener: TcpListener::bind("127.0.0.1:0").expect("bind failing source"),
            kind,
        }
    }
}

impl ConnectionSource for FailingSource {
    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        self.listener.set_nonblocking(nonblocking)
    }

    fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        Err(io::Error::new(self.kind, "accept refused by test source"))
    }
}

/// Binder handing out [`FailingSource`]s that fail with the wrapped kind.
pub(crate) struct FailingBinder(pub(crate) io::ErrorKind);

impl SocketBinder for FailingBinder {
    fn bind(&self, _host: &str, _port: u16) -> Result<Acceptor, ListenerError> {
        Acceptor::from_source(FailingSource::bind(self.0))
    }
}

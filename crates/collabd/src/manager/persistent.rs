//! Storage-backed connection manager.

use std::net::TcpStream;
use std::sync::{Arc, Mutex, PoisonError};

use crate::log_sink::{LogSink, Verbosity};
use crate::storage::{DriverKind, StorageHandle};

use super::intake::IntakeQueue;
use super::session::SessionHandler;
use super::{ConnectionManager, ManagerError, ManagerKind};

/// Connection manager that owns the storage handle for its lifetime.
pub struct StorageConnectionManager {
    queue: IntakeQueue,
    storage: Mutex<Option<StorageHandle>>,
    backend: DriverKind,
    log: LogSink,
}

impl StorageConnectionManager {
    /// Builds a manager over an established storage connection.
    #[must_use]
    pub fn new(storage: StorageHandle, handler: Arc<dyn SessionHandler>, log: &LogSink) -> Self {
        let log = log.component("manager");
        Self {
            queue: IntakeQueue::new(ManagerKind::Storage, handler, log.clone()),
            backend: storage.backend(),
            storage: Mutex::new(Some(storage)),
            log,
        }
    }

    /// Backend the manager persists to.
    #[must_use]
    pub fn backend(&self) -> DriverKind {
        self.backend
    }
}

impl ConnectionManager for StorageConnectionManager {
    fn kind(&self) -> ManagerKind {
        ManagerKind::Storage
    }

    fn start(&self) -> Result<(), ManagerError> {
        {
            let storage = self.storage.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(Err(error)) = storage.as_ref().map(StorageHandle::ping) {
                self.log
                    .log(Verbosity::WARN, "storage did not answer at manager start: ");
                self.log.log_line(Verbosity::WARN, &error);
            }
        }
        self.queue.start()
    }

    fn intake(&self, stream: TcpStream) {
        self.queue.intake(stream);
    }

    fn terminate(&self) {
        if !self.queue.terminate() {
            return;
        }
        let storage = self
            .storage
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = storage {
            match handle.close() {
                Ok(()) => self.log.log_line(
                    Verbosity::INFO,
                    format_args!("closed {} storage connection", self.backend),
                ),
                Err(error) => self.log.log_error(Verbosity::WARN, &error),
            }
        }
    }

    fn active_connections(&self) -> usize {
        self.queue.active_connections()
    }

    fn prune(&self) -> usize {
        self.queue.prune()
    }
}

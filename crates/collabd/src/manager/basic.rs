//! In-memory connection manager.

use std::net::TcpStream;
use std::sync::Arc;

use crate::log_sink::LogSink;

use super::intake::IntakeQueue;
use super::session::SessionHandler;
use super::{ConnectionManager, ManagerError, ManagerKind};

/// Connection manager that keeps all client state for the process lifetime.
pub struct BasicConnectionManager {
    queue: IntakeQueue,
}

impl BasicConnectionManager {
    /// Builds a manager serving clients with `handler`.
    #[must_use]
    pub fn new(handler: Arc<dyn SessionHandler>, log: &LogSink) -> Self {
        Self {
            queue: IntakeQueue::new(ManagerKind::Basic, handler, log.component("manager")),
        }
    }
}

impl ConnectionManager for BasicConnectionManager {
    fn kind(&self) -> ManagerKind {
        ManagerKind::Basic
    }

    fn start(&self) -> Result<(), ManagerError> {
        self.queue.start()
    }

    fn intake(&self, stream: TcpStream) {
        self.queue.intake(stream);
    }

    fn terminate(&self) {
        self.queue.terminate();
    }

    fn active_connections(&self) -> usize {
        self.queue.active_connections()
    }

    fn prune(&self) -> usize {
        self.queue.prune()
    }
}

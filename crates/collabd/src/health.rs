//! Lifecycle event reporting.

use std::net::SocketAddr;
use std::sync::Arc;

use crate::bootstrap::StartupError;
use crate::log_sink::{Destination, LogSink, Verbosity};
use crate::manager::ManagerKind;
use crate::storage::StorageHandle;
use crate::transport::AcceptorExit;

/// Observer of the server's startup and shutdown steps.
pub trait LifecycleReporter: Send + Sync {
    /// Invoked before configuration loading begins.
    fn startup_starting(&self);

    /// Invoked once the listening socket is bound.
    fn listener_bound(&self, addr: SocketAddr);

    /// Invoked after the log sink switched to its configured destination.
    fn log_configured(&self, destination: &Destination);

    /// Invoked when the storage connector produced a handle.
    fn storage_ready(&self, storage: &StorageHandle);

    /// Invoked when storage was wanted but the connector failed.
    fn storage_unavailable(&self);

    /// Invoked once the manager variant is decided.
    fn manager_selected(&self, kind: ManagerKind);

    /// Invoked after the manager's background activity launched.
    fn manager_started(&self, kind: ManagerKind);

    /// Invoked after the helper's background activity launched.
    fn helper_started(&self);

    /// Invoked once the accept loop runs and startup is complete.
    fn startup_succeeded(&self, addr: SocketAddr);

    /// Invoked when startup fails.
    fn startup_failed(&self, error: &StartupError);

    /// Invoked when the accept loop stopped.
    fn acceptor_stopped(&self, exit: &AcceptorExit);

    /// Invoked after every shutdown step has been attempted.
    fn shutdown_complete(&self);
}

impl<T> LifecycleReporter for Arc<T>
where
    T: LifecycleReporter,
{
    fn startup_starting(&self) {
        (**self).startup_starting();
    }

    fn listener_bound(&self, addr: SocketAddr) {
        (**self).listener_bound(addr);
    }

    fn log_configured(&self, destination: &Destination) {
        (**self).log_configured(destination);
    }

    fn storage_ready(&self, storage: &StorageHandle) {
        (**self).storage_ready(storage);
    }

    fn storage_unavailable(&self) {
        (**self).storage_unavailable();
    }

    fn manager_selected(&self, kind: ManagerKind) {
        (**self).manager_selected(kind);
    }

    fn manager_started(&self, kind: ManagerKind) {
        (**self).manager_started(kind);
    }

    fn helper_started(&self) {
        (**self).helper_started();
    }

    fn startup_succeeded(&self, addr: SocketAddr) {
        (**self).startup_succeeded(addr);
    }

    fn startup_failed(&self, error: &StartupError) {
        (**self).startup_failed(error);
    }

    fn acceptor_stopped(&self, exit: &AcceptorExit) {
        (**self).acceptor_stopped(exit);
    }

    fn shutdown_complete(&self) {
        (**self).shutdown_complete();
    }
}

/// Default reporter that records lifecycle events through the log sink.
#[derive(Debug, Clone)]
pub struct StructuredLifecycleReporter {
    log: LogSink,
}

impl StructuredLifecycleReporter {
    /// Builds a reporter logging through `log`.
    #[must_use]
    pub fn new(log: &LogSink) -> Self {
        Self {
            log: log.component("lifecycle"),
        }
    }
}

impl LifecycleReporter for StructuredLifecycleReporter {
    fn startup_starting(&self) {
        self.log.log_line(Verbosity::DEBUG, "starting server");
    }

    fn listener_bound(&self, addr: SocketAddr) {
        self.log
            .log_line(Verbosity::DEBUG, format_args!("listening socket bound to {addr}"));
    }

    fn log_configured(&self, destination: &Destination) {
        self.log
            .log_line(Verbosity::DEBUG, format_args!("log destination: {destination}"));
    }

    fn storage_ready(&self, storage: &StorageHandle) {
        self.log.log_line(
            Verbosity::INFO,
            format_args!("storage ready at {}", storage.target()),
        );
    }

    fn storage_unavailable(&self) {
        self.log
            .log_line(Verbosity::WARN, "storage connection could not be established");
    }

    fn manager_selected(&self, kind: ManagerKind) {
        self.log
            .log_line(Verbosity::INFO, format_args!("selected {kind} connection manager"));
    }

    fn manager_started(&self, kind: ManagerKind) {
        self.log
            .log_line(Verbosity::DEBUG, format_args!("{kind} connection manager running"));
    }

    fn helper_started(&self) {
        self.log.log_line(Verbosity::DEBUG, "helper running");
    }

    fn startup_succeeded(&self, addr: SocketAddr) {
        self.log
            .log_line(Verbosity::INFO, format_args!("server started on {addr}"));
    }

    fn startup_failed(&self, error: &StartupError) {
        self.log.log_error(Verbosity::ERROR, error);
    }

    fn acceptor_stopped(&self, exit: &AcceptorExit) {
        let verbosity = match exit {
            AcceptorExit::Closed => Verbosity::INFO,
            AcceptorExit::Failed { .. } => Verbosity::ERROR,
        };
        self.log
            .log_line(verbosity, format_args!("acceptor stopped: {exit}"));
    }

    fn shutdown_complete(&self) {
        self.log.log_line(Verbosity::INFO, "server shutdown complete");
    }
}

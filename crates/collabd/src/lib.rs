//! Bootstrap and lifecycle controller of the collab server.
//!
//! The server loads a flat configuration document, opens its listening
//! socket, configures the log sink, optionally connects to a persistent
//! backing store, and selects one of two connection managers: a storage-backed
//! manager when the configured mode is `database` and the storage connection
//! succeeds, or an in-memory manager otherwise. The manager and its helper
//! are started before the accept loop begins, so no connection is ever handed
//! to a manager that is not running.
//!
//! Every component receives the configuration and the [`LogSink`] explicitly;
//! nothing reads ambient global state. Lifecycle reporting hooks observe each
//! step so operators can tell how far startup progressed when it fails.
//!
//! Shutdown is best effort: [`Server::terminate`] closes the listening
//! socket, then terminates the manager and the helper, swallowing any
//! failure along the way.

mod bootstrap;
mod health;
mod helper;
mod log_sink;
pub mod manager;
mod process;
pub mod storage;
mod transport;

pub use bootstrap::{
    ConfigLoader, DefaultConfigLoader, FileConfigLoader, LifecycleEvent, Server, ShutdownTrigger,
    StartupError, StartupPlan, StaticConfigLoader, start_with,
};
pub use health::{LifecycleReporter, StructuredLifecycleReporter};
pub use helper::{HelperError, HelperWorker, ManagerHelper, helper_interval};
pub use log_sink::{Destination, LogSettings, LogSink, Verbosity};
pub use process::{
    LaunchError, ShutdownError, ShutdownSignal, SystemShutdownSignal, run_server, run_server_with,
};
pub use transport::{
    Acceptor, AcceptorExit, AcceptorHandle, ConnectionSource, ListenerError, SocketBinder,
    TcpSocketBinder,
};

#[cfg(test)]
mod tests;

//! Error types for connection managers.

use std::io;

use thiserror::Error;

use super::ManagerKind;

/// Failures starting a connection manager's background activity.
#[derive(Debug, Error)]
pub enum ManagerError {
    /// `start` was called on a manager that already started or terminated.
    #[error("{kind} connection manager cannot start twice")]
    AlreadyStarted {
        /// Variant that rejected the call.
        kind: ManagerKind,
    },
    /// The intake thread could not be spawned.
    #[error("failed to spawn {kind} connection manager intake thread: {source}")]
    Spawn {
        /// Variant whose thread failed to spawn.
        kind: ManagerKind,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

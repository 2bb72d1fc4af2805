//! Connection managers and the factory that chooses between them.
//!
//! Exactly one manager runs per server. Its variant is decided once, at
//! startup, from the configured [`ServerMode`] and the outcome of the storage
//! connection attempt:
//!
//! | mode       | storage | manager           |
//! |------------|---------|-------------------|
//! | `database` | present | storage-backed    |
//! | `database` | absent  | basic (fallback)  |
//! | other      | any     | basic             |
//!
//! Callers depend only on the [`ConnectionManager`] contract.

mod basic;
mod errors;
mod intake;
mod persistent;
mod provider;
mod session;

use std::net::TcpStream;

use strum::Display;

use collab_config::{ConfigStore, DEFAULT_SERVER_MODE, keys};

use crate::log_sink::{LogSink, Verbosity};
use crate::storage::StorageHandle;

pub use basic::BasicConnectionManager;
pub use errors::ManagerError;
pub use persistent::StorageConnectionManager;
pub use provider::{DefaultManagerProvider, ManagerProvider};
pub use session::{ClientId, HoldOpenSession, SessionHandler};

const DATABASE_MODE: &str = "database";

/// Manager variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "lowercase")]
pub enum ManagerKind {
    /// In-memory manager.
    Basic,
    /// Storage-backed manager.
    Storage,
}

/// Contract every connection manager fulfils.
///
/// Managers are shared between the acceptor, the helper and the server, so
/// every operation takes `&self` and implementations synchronise internally.
#[cfg_attr(test, mockall::automock)]
pub trait ConnectionManager: Send + Sync {
    /// Variant of this manager.
    fn kind(&self) -> ManagerKind;

    /// Launches the manager's background activity.
    fn start(&self) -> Result<(), ManagerError>;

    /// Takes ownership of an accepted connection without blocking on it.
    fn intake(&self, stream: TcpStream);

    /// Disconnects all clients and stops background activity.
    fn terminate(&self);

    /// Number of clients currently being served.
    fn active_connections(&self) -> usize;

    /// Releases finished client sessions and returns how many were released.
    fn prune(&self) -> usize;
}

/// Operating mode read from `SERVER_MODE`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMode {
    /// Persist through the storage connector when it succeeds.
    Database,
    /// Keep all state in memory; holds the configured text.
    Basic(String),
}

impl ServerMode {
    /// Reads the mode; only the exact text `database` selects storage.
    #[must_use]
    pub fn from_config(config: &ConfigStore) -> Self {
        Self::from_text(config.get_string(keys::SERVER_MODE, DEFAULT_SERVER_MODE))
    }

    fn from_text(text: String) -> Self {
        if text == DATABASE_MODE {
            Self::Database
        } else {
            Self::Basic(text)
        }
    }

    /// Whether the lifecycle should attempt a storage connection.
    #[must_use]
    pub fn wants_storage(&self) -> bool {
        matches!(self, Self::Database)
    }
}

/// Outcome of the manager decision table.
#[derive(Debug)]
pub enum ManagerSelection {
    /// Run the in-memory manager.
    Basic,
    /// Run the storage-backed manager over this handle.
    Storage(StorageHandle),
}

impl ManagerSelection {
    /// Variant this selection builds.
    #[must_use]
    pub fn kind(&self) -> ManagerKind {
        match self {
            Self::Basic => ManagerKind::Basic,
            Self::Storage(_) => ManagerKind::Storage,
        }
    }
}

/// Applies the decision table to the mode and storage outcome.
///
/// The only side effect is the fallback notice when storage was wanted but
/// is absent. A handle passed alongside a basic mode is dropped.
#[must_use]
pub fn select_manager(
    mode: &ServerMode,
    storage: Option<StorageHandle>,
    log: &LogSink,
) -> ManagerSelection {
    match (mode, storage) {
        (ServerMode::Database, Some(handle)) => ManagerSelection::Storage(handle),
        (ServerMode::Database, None) => {
            log.log_line(
                Verbosity::WARN,
                "storage unavailable; falling back to basic mode without persistence",
            );
            ManagerSelection::Basic
        }
        (ServerMode::Basic(_), _) => ManagerSelection::Basic,
    }
}

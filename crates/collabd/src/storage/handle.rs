//! Established storage connections.

use std::fmt;

use sea_orm::{ConnectionTrait, DatabaseConnection, Statement};
use tokio::runtime::{Builder, Runtime};

use super::{DriverKind, StorageError};

/// Backend identity reported after connecting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendMetadata {
    /// Backend serving the connection.
    pub backend: DriverKind,
    /// Server version string as reported by the backend.
    pub version: String,
}

impl fmt::Display for BackendMetadata {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{} {}", self.backend, self.version)
    }
}

/// A usable connection to the persistent backing store.
///
/// The handle owns the runtime that drives the async driver; every call
/// blocks the calling thread until the driver answers.
pub struct StorageHandle {
    connection: DatabaseConnection,
    runtime: Runtime,
    backend: DriverKind,
    target: String,
    metadata: Option<BackendMetadata>,
}

impl fmt::Debug for StorageHandle {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("StorageHandle")
            .field("backend", &self.backend)
            .field("target", &self.target)
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

impl StorageHandle {
    pub(super) fn new(
        connection: DatabaseConnection,
        runtime: Runtime,
        backend: DriverKind,
        target: String,
    ) -> Self {
        Self {
            connection,
            runtime,
            backend,
            target,
            metadata: None,
        }
    }

    /// Builds a handle whose connection has already been dropped.
    ///
    /// Every query on it fails; lifecycle tests use it where only the
    /// presence of storage matters.
    #[cfg(test)]
    pub(crate) fn disconnected(backend: DriverKind) -> Result<Self, StorageError> {
        Ok(Self::new(
            DatabaseConnection::Disconnected,
            storage_runtime()?,
            backend,
            format!("{backend}://disconnected"),
        ))
    }

    /// Backend serving this handle.
    #[must_use]
    pub fn backend(&self) -> DriverKind {
        self.backend
    }

    /// Connection target with credentials masked.
    #[must_use]
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Backend metadata, when the post-connect query succeeded.
    #[must_use]
    pub fn metadata(&self) -> Option<&BackendMetadata> {
        self.metadata.as_ref()
    }

    /// Checks that the backend still answers.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Query`] when the backend is unreachable.
    pub fn ping(&self) -> Result<(), StorageError> {
        self.runtime
            .block_on(self.connection.ping())
            .map_err(|source| StorageError::Query { source })
    }

    /// Closes the connection pool and stops the driver runtime.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Query`] when the pool does not close cleanly.
    pub fn close(self) -> Result<(), StorageError> {
        let Self {
            connection,
            runtime,
            ..
        } = self;
        runtime
            .block_on(connection.close())
            .map_err(|source| StorageError::Query { source })
    }

    pub(super) fn query_metadata(&mut self) -> Result<&BackendMetadata, StorageError> {
        let sql = match self.backend {
            DriverKind::Sqlite => "SELECT sqlite_version() AS version",
            DriverKind::Postgres | DriverKind::MySql => "SELECT version() AS version",
        };
        let statement = Statement::from_string(self.connection.get_database_backend(), sql);
        let row = self
            .runtime
            .block_on(self.connection.query_one(statement))
            .map_err(|source| StorageError::Query { source })?;
        let version = match row {
            Some(row) => row
                .try_get::<String>("", "version")
                .map_err(|source| StorageError::Query { source })?,
            None => String::from("unknown"),
        };
        Ok(self.metadata.insert(BackendMetadata {
            backend: self.backend,
            version,
        }))
    }
}

/// Builds the single-worker runtime that drives the storage driver.
pub(super) fn storage_runtime() -> Result<Runtime, StorageError> {
    Builder::new_multi_thread()
        .worker_threads(1)
        .thread_name("collabd-storage")
        .enable_all()
        .build()
        .map_err(|source| StorageError::Runtime { source })
}

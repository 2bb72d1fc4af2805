//! Error types for storage connection attempts.

use std::io;

use sea_orm::DbErr;
use thiserror::Error;

/// Definitive failures of a storage connection attempt.
///
/// None of these are retried; each one downgrades the server to the
/// in-memory manager for this run.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The configured driver is unknown or not compiled in.
    #[error("storage driver {driver} is unavailable: {reason}")]
    DriverUnavailable {
        /// Configured driver name.
        driver: String,
        /// Why the driver cannot be used.
        reason: String,
    },
    /// The connection string could not be parsed.
    #[error("invalid storage connection string {target}: {source}")]
    InvalidTarget {
        /// Connection string with credentials removed.
        target: String,
        /// Underlying parse error.
        #[source]
        source: url::ParseError,
    },
    /// The connection string names a backend other than the driver's.
    #[error("storage driver {driver} cannot serve connection string {target}")]
    DriverMismatch {
        /// Resolved driver.
        driver: String,
        /// Connection string with credentials removed.
        target: String,
    },
    /// The async runtime driving the storage driver could not start.
    #[error("failed to start storage runtime: {source}")]
    Runtime {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The single direct connection attempt failed.
    #[error("failed to connect to {target}: {source}")]
    Unreachable {
        /// Connection string with credentials removed.
        target: String,
        /// Underlying driver error.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// Building the connection pool failed.
    #[error("failed to open connection pool for {target}: {source}")]
    Connect {
        /// Connection string with credentials removed.
        target: String,
        /// Underlying driver error.
        #[source]
        source: DbErr,
    },
    /// A query against an established connection failed.
    #[error("storage query failed: {source}")]
    Query {
        /// Underlying driver error.
        #[source]
        source: DbErr,
    },
}

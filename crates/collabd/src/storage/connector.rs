//! Connecting to the persistent backing store.

use std::error::Error;
use std::io;
use std::time::Duration;

#[cfg(any(feature = "postgres", feature = "mysql", feature = "sqlite"))]
use sea_orm::sqlx::Connection;
use sea_orm::{ConnectOptions, Database};

use crate::log_sink::{LogSink, Verbosity};

use super::handle::storage_runtime;
use super::{ConnectionTarget, DriverKind, StorageError, StorageHandle, StorageSettings};

const POOL_SIZE: u32 = 4;

/// Establishes storage connections for the lifecycle controller.
#[cfg_attr(test, mockall::automock)]
pub trait StorageConnector: Send + Sync {
    /// Attempts one connection with the supplied settings.
    ///
    /// Implementations never retry: the first failure is definitive for the
    /// current startup attempt.
    fn connect(
        &self,
        settings: &StorageSettings,
        log: &LogSink,
    ) -> Result<StorageHandle, StorageError>;
}

/// Connector backed by `sea-orm` and the compiled-in sqlx drivers.
#[derive(Debug, Default, Clone, Copy)]
pub struct SqlStorageConnector;

impl SqlStorageConnector {
    /// Builds a new connector.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl StorageConnector for SqlStorageConnector {
    fn connect(
        &self,
        settings: &StorageSettings,
        log: &LogSink,
    ) -> Result<StorageHandle, StorageError> {
        let driver = DriverKind::resolve(&settings.driver)?;
        log.log_line(
            Verbosity::DEBUG,
            format_args!("loaded storage driver {driver} for {}", settings.driver),
        );

        let target = ConnectionTarget::resolve(settings, driver)?;
        log.log_line(
            Verbosity::INFO,
            format_args!("connecting to {}", target.redacted()),
        );

        let mut options = ConnectOptions::new(target.url().to_owned());
        options
            .max_connections(POOL_SIZE)
            .min_connections(1)
            .sqlx_logging(false);
        if let Some(timeout) = settings.connect_timeout {
            options.connect_timeout(timeout).acquire_timeout(timeout);
        }

        let runtime = storage_runtime()?;
        runtime
            .block_on(open_single_connection(
                driver,
                target.url(),
                settings.connect_timeout,
            ))
            .map_err(|source| StorageError::Unreachable {
                target: target.redacted().to_owned(),
                source,
            })?;
        let connection =
            runtime
                .block_on(Database::connect(options))
                .map_err(|source| StorageError::Connect {
                    target: target.redacted().to_owned(),
                    source,
                })?;
        log.log_line(
            Verbosity::INFO,
            format_args!("connected to {}", target.redacted()),
        );

        let mut handle =
            StorageHandle::new(connection, runtime, driver, target.redacted().to_owned());
        match handle.query_metadata() {
            Ok(metadata) => log.log_line(
                Verbosity::INFO,
                format_args!("storage backend: {metadata}"),
            ),
            Err(error) => {
                log.log(Verbosity::WARN, "could not read storage backend metadata: ");
                log.log_line(Verbosity::WARN, &error);
            }
        }
        Ok(handle)
    }
}

/// Opens and closes one connection outside the pool.
///
/// A refused or unresolvable target fails here on the first attempt instead
/// of being retried until the pool's acquire timeout.
async fn open_single_connection(
    driver: DriverKind,
    url: &str,
    timeout: Option<Duration>,
) -> Result<(), Box<dyn Error + Send + Sync>> {
    let attempt = connect_once(driver, url);
    match timeout {
        Some(limit) => tokio::time::timeout(limit, attempt).await.map_err(|_| {
            io::Error::new(
                io::ErrorKind::TimedOut,
                format!("no answer within {}s", limit.as_secs()),
            )
        })?,
        None => attempt.await,
    }
}

async fn connect_once(
    driver: DriverKind,
    url: &str,
) -> Result<(), Box<dyn Error + Send + Sync>> {
    match driver {
        #[cfg(feature = "postgres")]
        DriverKind::Postgres => {
            sea_orm::sqlx::postgres::PgConnection::connect(url)
                .await?
                .close()
                .await?;
        }
        #[cfg(feature = "mysql")]
        DriverKind::MySql => {
            sea_orm::sqlx::mysql::MySqlConnection::connect(url)
                .await?
                .close()
                .await?;
        }
        #[cfg(feature = "sqlite")]
        DriverKind::Sqlite => {
            sea_orm::sqlx::sqlite::SqliteConnection::connect(url)
                .await?
                .close()
                .await?;
        }
        #[cfg(not(all(feature = "postgres", feature = "mysql", feature = "sqlite")))]
        other => {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                format!("storage driver {other} is not compiled in"),
            )
            .into());
        }
    }
    Ok(())
}

/// Attempts a storage connection and reduces every failure to `None`.
///
/// Failures are logged at error severity; the caller downgrades to the
/// in-memory manager.
pub fn connect_storage(
    connector: &dyn StorageConnector,
    settings: &StorageSettings,
    log: &LogSink,
) -> Option<StorageHandle> {
    match connector.connect(settings, log) {
        Ok(handle) => Some(handle),
        Err(error) => {
            log.log_error(Verbosity::ERROR, &error);
            if matches!(
                error,
                StorageError::Connect { .. } | StorageError::Unreachable { .. }
            ) {
                log.log_line(
                    Verbosity::ERROR,
                    "check permissions in your database configuration",
                );
            }
            None
        }
    }
}

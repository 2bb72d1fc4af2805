//! Storage driver resolution.

use std::str::FromStr;

use strum::Display;
use thiserror::Error;

use super::StorageError;

/// Storage backends the connector knows how to reach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "lowercase")]
pub enum DriverKind {
    /// PostgreSQL.
    Postgres,
    /// MySQL and MariaDB.
    MySql,
    /// SQLite.
    Sqlite,
}

/// Error returned when a driver name is not recognised.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown storage driver: {0}")]
pub struct DriverParseError(String);

impl DriverParseError {
    /// Returns the offending driver name.
    #[must_use]
    pub fn value(&self) -> &str {
        self.0.as_str()
    }
}

impl FromStr for DriverKind {
    type Err = DriverParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "org.postgresql.driver" | "postgres" | "postgresql" | "pgsql" => Ok(Self::Postgres),
            "com.mysql.jdbc.driver" | "com.mysql.cj.jdbc.driver" | "org.mariadb.jdbc.driver"
            | "mysql" | "mariadb" => Ok(Self::MySql),
            "org.sqlite.jdbc" | "sqlite" | "sqlite3" => Ok(Self::Sqlite),
            _ => Err(DriverParseError(value.to_owned())),
        }
    }
}

impl DriverKind {
    /// Maps a connection URL scheme to the driver that serves it.
    #[must_use]
    pub fn from_scheme(scheme: &str) -> Option<Self> {
        match scheme.to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Some(Self::Postgres),
            "mysql" | "mariadb" => Some(Self::MySql),
            "sqlite" => Some(Self::Sqlite),
            _ => None,
        }
    }

    /// Cargo feature that compiles this driver in.
    #[must_use]
    pub const fn feature(self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::MySql => "mysql",
            Self::Sqlite => "sqlite",
        }
    }

    /// Returns `true` when the driver was compiled into this binary.
    #[must_use]
    pub const fn is_compiled_in(self) -> bool {
        match self {
            Self::Postgres => cfg!(feature = "postgres"),
            Self::MySql => cfg!(feature = "mysql"),
            Self::Sqlite => cfg!(feature = "sqlite"),
        }
    }

    /// Resolves a configured driver name to a compiled-in driver.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::DriverUnavailable`] when the name is unknown
    /// or its driver is not compiled in.
    pub fn resolve(name: &str) -> Result<Self, StorageError> {
        let kind = name
            .parse::<Self>()
            .map_err(|error| StorageError::DriverUnavailable {
                driver: name.to_owned(),
                reason: error.to_string(),
            })?;
        if !kind.is_compiled_in() {
            return Err(StorageError::DriverUnavailable {
                driver: name.to_owned(),
                reason: format!("rebuild with the `{}` feature enabled", kind.feature()),
            });
        }
        Ok(kind)
    }
}

//! Configuration store shared by the collab server binaries.
//!
//! Configuration is a flat document of string keys mapped to primitive values.
//! It is loaded once at startup from a JSON (or TOML) file, or left empty so
//! every lookup falls back to its default. Lookups never fail: an absent key,
//! or a value that cannot be read as the requested type, resolves to the
//! caller-supplied default.
//!
//! The recognised keys and their defaults live in [`keys`] and [`defaults`].
//! Unrecognised keys are retained but otherwise ignored.

pub mod defaults;
pub mod keys;
mod logging;
mod store;

pub use defaults::{
    DEFAULT_DB_HOST, DEFAULT_DB_NAME, DEFAULT_DB_USER, DEFAULT_HELPER_INTERVAL_SECS,
    DEFAULT_JDBC_DRIVER, DEFAULT_JDBC_NAME, DEFAULT_LOG_VERBOSITY, DEFAULT_SERVER_HOST,
    DEFAULT_SERVER_MODE, DEFAULT_SERVER_PORT, DEFAULT_USE_SSL,
};
pub use logging::{LogFormat, LogFormatParseError};
pub use store::{ConfigLoadError, ConfigStore, ConfigValue};

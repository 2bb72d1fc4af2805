//! Names of the configuration keys recognised by the server.
//!
//! Keys are case-sensitive and keep the spelling used by existing
//! `server.conf` files, including the mixed-case `LogVerbosity`.

/// TCP port the listener binds to.
pub const SERVER_PORT: &str = "SERVER_PORT";
/// Address the listener binds to.
pub const SERVER_HOST: &str = "SERVER_HOST";
/// Operating mode: `database` or anything else for the in-memory manager.
pub const SERVER_MODE: &str = "SERVER_MODE";
/// Optional log file path; output is appended.
pub const LOG_FILE: &str = "LOG_FILE";
/// Verbosity threshold; a message is emitted when its verbosity is lower.
pub const LOG_VERBOSITY: &str = "LogVerbosity";
/// Output format of log lines (`compact` or `json`).
pub const LOG_FORMAT: &str = "LOG_FORMAT";
/// Storage driver name.
pub const JDBC_DRIVER: &str = "JDBC_DRIVER";
/// Full storage connection string.
pub const JDBC_URL: &str = "JDBC_URL";
/// Backend kind token used when the connection string is synthesised.
pub const JDBC_NAME: &str = "JDBC_NAME";
/// Storage user name.
pub const DB_USER: &str = "DB_USER";
/// Storage password.
pub const DB_PASS: &str = "DB_PASS";
/// Storage database name.
pub const DB_NAME: &str = "DB_NAME";
/// Storage host.
pub const DB_HOST: &str = "DB_HOST";
/// `yes` requests an encrypted storage connection.
pub const USE_SSL: &str = "USE_SSL";
/// Upper bound, in seconds, on the storage connection attempt.
pub const DB_CONNECT_TIMEOUT: &str = "DB_CONNECT_TIMEOUT";
/// Maintenance period, in seconds, of the manager helper.
pub const HELPER_INTERVAL: &str = "HELPER_INTERVAL";

//! Default values applied when a key is absent from the configuration.

/// Default TCP port of the listener.
pub const DEFAULT_SERVER_PORT: i64 = 5042;

/// Default bind address; all interfaces.
pub const DEFAULT_SERVER_HOST: &str = "0.0.0.0";

/// Default operating mode.
pub const DEFAULT_SERVER_MODE: &str = "database";

/// Default verbosity threshold: errors, warnings and informational lines.
pub const DEFAULT_LOG_VERBOSITY: i64 = 3;

/// Default storage driver (Postgres).
pub const DEFAULT_JDBC_DRIVER: &str = "org.postgresql.Driver";

/// Default backend kind token used to synthesise connection strings.
pub const DEFAULT_JDBC_NAME: &str = "postgresql";

/// Default storage user.
pub const DEFAULT_DB_USER: &str = "collabreate";

/// Default storage database name.
pub const DEFAULT_DB_NAME: &str = "collabreate";

/// Default storage host.
pub const DEFAULT_DB_HOST: &str = "127.0.0.1";

/// Default SSL flag.
pub const DEFAULT_USE_SSL: &str = "no";

/// Default maintenance period of the manager helper.
pub const DEFAULT_HELPER_INTERVAL_SECS: i64 = 60;

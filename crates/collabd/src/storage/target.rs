//! Connection settings and connection-string construction.

use std::time::Duration;

use url::Url;

use collab_config::{
    ConfigStore, DEFAULT_DB_HOST, DEFAULT_DB_NAME, DEFAULT_DB_USER, DEFAULT_JDBC_DRIVER,
    DEFAULT_JDBC_NAME, DEFAULT_USE_SSL, keys,
};

use super::{DriverKind, StorageError};

const JDBC_PREFIX: &str = "jdbc:";
const REDACTED: &str = "****";

/// Storage settings resolved from the configuration store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageSettings {
    /// Driver name, e.g. `org.postgresql.Driver`.
    pub driver: String,
    /// Full connection string; synthesised from the parts below when absent.
    pub url: Option<String>,
    /// User name.
    pub user: String,
    /// Password, if any.
    pub password: Option<String>,
    /// Database name.
    pub database: String,
    /// Host name.
    pub host: String,
    /// Whether an encrypted connection is requested.
    pub use_ssl: bool,
    /// Backend kind token, e.g. `postgresql`.
    pub kind: String,
    /// Optional bound on the connection attempt.
    pub connect_timeout: Option<Duration>,
}

impl StorageSettings {
    /// Resolves the storage keys of the configuration store.
    #[must_use]
    pub fn from_config(config: &ConfigStore) -> Self {
        Self {
            driver: config.get_string(keys::JDBC_DRIVER, DEFAULT_JDBC_DRIVER),
            url: config.get_optional_string(keys::JDBC_URL),
            user: config.get_string(keys::DB_USER, DEFAULT_DB_USER),
            password: config.get_optional_string(keys::DB_PASS),
            database: config.get_string(keys::DB_NAME, DEFAULT_DB_NAME),
            host: config.get_string(keys::DB_HOST, DEFAULT_DB_HOST),
            use_ssl: config
                .get_string(keys::USE_SSL, DEFAULT_USE_SSL)
                .trim()
                .eq_ignore_ascii_case("yes"),
            kind: config.get_string(keys::JDBC_NAME, DEFAULT_JDBC_NAME),
            connect_timeout: config
                .get_optional_int(keys::DB_CONNECT_TIMEOUT)
                .and_then(|seconds| u64::try_from(seconds).ok())
                .filter(|seconds| *seconds > 0)
                .map(Duration::from_secs),
        }
    }

    /// The configured connection string, or one synthesised from host,
    /// database name, backend kind and SSL flag.
    #[must_use]
    pub fn connection_string(&self) -> String {
        match &self.url {
            Some(url) => url
                .trim()
                .strip_prefix(JDBC_PREFIX)
                .unwrap_or_else(|| url.trim())
                .to_owned(),
            None => self.synthesise(),
        }
    }

    fn synthesise(&self) -> String {
        let host = self.host.trim();
        let database = self.database.trim();
        let kind = self.kind.trim().to_ascii_lowercase();
        match kind.as_str() {
            "postgresql" | "postgres" => format!(
                "postgres://{host}/{database}{}",
                ssl_query(self.use_ssl, "sslmode=require")
            ),
            "mysql" | "mariadb" => format!(
                "mysql://{host}/{database}{}",
                ssl_query(self.use_ssl, "ssl-mode=REQUIRED")
            ),
            "sqlite" => format!("sqlite:{database}?mode=rwc"),
            other => format!(
                "{other}://{host}/{database}{}",
                ssl_query(self.use_ssl, "ssl=true")
            ),
        }
    }
}

fn ssl_query(use_ssl: bool, query: &str) -> String {
    if use_ssl {
        format!("?{query}")
    } else {
        String::new()
    }
}

/// A connection string ready for the driver, plus a loggable form.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionTarget {
    url: String,
    redacted: String,
}

impl std::fmt::Debug for ConnectionTarget {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("ConnectionTarget")
            .field("url", &self.redacted)
            .finish()
    }
}

impl ConnectionTarget {
    /// Builds the target for `driver` from the settings.
    ///
    /// Credentials are injected into connection strings that have an
    /// authority component and no user of their own.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidTarget`] for unparsable strings and
    /// [`StorageError::DriverMismatch`] when the string's scheme belongs to a
    /// different driver.
    pub fn resolve(settings: &StorageSettings, driver: DriverKind) -> Result<Self, StorageError> {
        let raw = settings.connection_string();
        let mut url = Url::parse(&raw).map_err(|source| StorageError::InvalidTarget {
            target: redact_unparsed(&raw),
            source,
        })?;

        if DriverKind::from_scheme(url.scheme()) != Some(driver) {
            return Err(StorageError::DriverMismatch {
                driver: driver.to_string(),
                target: redact(&url),
            });
        }

        if url.has_host() && url.username().is_empty() {
            // Both setters only fail for URLs without an authority.
            if url.set_username(&settings.user).is_ok() {
                if let Some(password) = &settings.password {
                    let _ignored = url.set_password(Some(password));
                }
            }
            Ok(Self {
                redacted: redact(&url),
                url: url.into(),
            })
        } else {
            Ok(Self {
                redacted: redact(&url),
                url: raw,
            })
        }
    }

    /// Connection string including credentials.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Connection string with the password masked.
    #[must_use]
    pub fn redacted(&self) -> &str {
        &self.redacted
    }
}

fn redact(url: &Url) -> String {
    if url.password().is_none() {
        return url.to_string();
    }
    let mut masked = url.clone();
    match masked.set_password(Some(REDACTED)) {
        Ok(()) => masked.into(),
        Err(()) => format!("{}://{REDACTED}", url.scheme()),
    }
}

fn redact_unparsed(raw: &str) -> String {
    // Without a parse there is no reliable way to find the password.
    match raw.split_once("://") {
        Some((scheme, _)) => format!("{scheme}://{REDACTED}"),
        None => REDACTED.to_owned(),
    }
}

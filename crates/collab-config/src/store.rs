//! Immutable key/value configuration store.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// A single configuration value.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValue {
    /// Text value.
    String(String),
    /// Integer value.
    Int(i64),
    /// Floating point value; readable as a string only.
    Float(f64),
    /// Boolean value.
    Bool(bool),
    /// Arrays, nested objects and nulls. Typed lookups treat these as absent.
    Unsupported,
}

impl ConfigValue {
    /// Reads the value as text. Numbers and booleans are rendered.
    #[must_use]
    pub fn as_string(&self) -> Option<String> {
        match self {
            Self::String(value) => Some(value.clone()),
            Self::Int(value) => Some(value.to_string()),
            Self::Float(value) => Some(value.to_string()),
            Self::Bool(value) => Some(value.to_string()),
            Self::Unsupported => None,
        }
    }

    /// Reads the value as an integer. Numeric strings are parsed.
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(value) => Some(*value),
            Self::String(value) => value.trim().parse().ok(),
            Self::Float(_) | Self::Bool(_) | Self::Unsupported => None,
        }
    }

    /// Reads the value as a boolean. Accepts `yes`/`no`, `true`/`false`,
    /// and `1`/`0` in any case.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
            Self::Int(1) => Some(true),
            Self::Int(0) => Some(false),
            Self::String(value) => match value.trim().to_ascii_lowercase().as_str() {
                "yes" | "true" | "1" => Some(true),
                "no" | "false" | "0" => Some(false),
                _ => None,
            },
            Self::Int(_) | Self::Float(_) | Self::Unsupported => None,
        }
    }
}

impl From<&str> for ConfigValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<String> for ConfigValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<i64> for ConfigValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<bool> for ConfigValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<serde_json::Value> for ConfigValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::String(text) => Self::String(text),
            serde_json::Value::Bool(flag) => Self::Bool(flag),
            serde_json::Value::Number(number) => match number.as_i64() {
                Some(int) => Self::Int(int),
                None => number.as_f64().map_or(Self::Unsupported, Self::Float),
            },
            serde_json::Value::Null
            | serde_json::Value::Array(_)
            | serde_json::Value::Object(_) => Self::Unsupported,
        }
    }
}

impl From<toml::Value> for ConfigValue {
    fn from(value: toml::Value) -> Self {
        match value {
            toml::Value::String(text) => Self::String(text),
            toml::Value::Integer(int) => Self::Int(int),
            toml::Value::Float(float) => Self::Float(float),
            toml::Value::Boolean(flag) => Self::Bool(flag),
            toml::Value::Datetime(datetime) => Self::String(datetime.to_string()),
            toml::Value::Array(_) | toml::Value::Table(_) => Self::Unsupported,
        }
    }
}

/// Errors raised while loading a configuration document. All are fatal.
#[derive(Debug, Error)]
pub enum ConfigLoadError {
    /// The file could not be read.
    #[error("failed to load config file {}: {source}", path.display())]
    Read {
        /// Path of the configuration file.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The file content is not a valid document.
    #[error("failed to parse config file {}: {source}", path.display())]
    Parse {
        /// Path of the configuration file.
        path: PathBuf,
        /// Underlying parser error.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// The document's top level is not an object.
    #[error("config file {} must contain a top-level object", path.display())]
    NotAnObject {
        /// Path of the configuration file.
        path: PathBuf,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DocumentFormat {
    Json,
    Toml,
}

impl DocumentFormat {
    fn detect(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("toml") => Self::Toml,
            _ => Self::Json,
        }
    }
}

/// Immutable mapping of configuration keys to values.
///
/// The store is read-only once built and can be shared freely across threads.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigStore {
    entries: BTreeMap<String, ConfigValue>,
    source: Option<PathBuf>,
}

impl ConfigStore {
    /// Loads the store from a file.
    ///
    /// Files with a `.toml` extension are parsed as TOML; everything else is
    /// parsed as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigLoadError`] when the file is missing, unreadable,
    /// malformed, or not an object at the top level. No partial store is
    /// produced.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigLoadError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigLoadError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let entries = parse_document(&text, DocumentFormat::detect(path), path)?;
        Ok(Self {
            entries,
            source: Some(path.to_path_buf()),
        })
    }

    /// Path the store was loaded from, if any.
    #[must_use]
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Returns the raw value stored under `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&ConfigValue> {
        self.entries.get(key)
    }

    /// Returns `true` when `key` carries a readable value.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.get(key)
            .is_some_and(|value| !matches!(value, ConfigValue::Unsupported))
    }

    /// Looks up a string, falling back to `default`.
    #[must_use]
    pub fn get_string(&self, key: &str, default: &str) -> String {
        self.get_optional_string(key)
            .unwrap_or_else(|| default.to_owned())
    }

    /// Looks up a string for keys that have no default.
    #[must_use]
    pub fn get_optional_string(&self, key: &str) -> Option<String> {
        self.get(key).and_then(ConfigValue::as_string)
    }

    /// Looks up an integer, falling back to `default`.
    #[must_use]
    pub fn get_int(&self, key: &str, default: i64) -> i64 {
        self.get_optional_int(key).unwrap_or(default)
    }

    /// Looks up an integer for keys that have no default.
    #[must_use]
    pub fn get_optional_int(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(ConfigValue::as_int)
    }

    /// Looks up a boolean, falling back to `default`.
    #[must_use]
    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        self.get(key)
            .and_then(ConfigValue::as_bool)
            .unwrap_or(default)
    }
}

impl<K, V> FromIterator<(K, V)> for ConfigStore
where
    K: Into<String>,
    V: Into<ConfigValue>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
            source: None,
        }
    }
}

impl fmt::Display for ConfigStore {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            Some(path) => write!(formatter, "{}", path.display()),
            None => formatter.write_str("<defaults>"),
        }
    }
}

fn parse_document(
    text: &str,
    format: DocumentFormat,
    path: &Path,
) -> Result<BTreeMap<String, ConfigValue>, ConfigLoadError> {
    let parse_error = |source: Box<dyn std::error::Error + Send + Sync>| ConfigLoadError::Parse {
        path: path.to_path_buf(),
        source,
    };
    match format {
        DocumentFormat::Json => {
            let document: serde_json::Value =
                serde_json::from_str(text).map_err(|error| parse_error(Box::new(error)))?;
            let serde_json::Value::Object(object) = document else {
                return Err(ConfigLoadError::NotAnObject {
                    path: path.to_path_buf(),
                });
            };
            Ok(object
                .into_iter()
                .map(|(key, value)| (key, ConfigValue::from(value)))
                .collect())
        }
        DocumentFormat::Toml => {
            let table: toml::Table = text
                .parse()
                .map_err(|error: toml::de::Error| parse_error(Box::new(error)))?;
            Ok(table
                .into_iter()
                .map(|(key, value)| (key, ConfigValue::from(value)))
                .collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn absent_keys_resolve_to_defaults() {
        let store = ConfigStore::default();

        assert_eq!(store.get_int("SERVER_PORT", 5042), 5042);
        assert_eq!(store.get_string("SERVER_MODE", "database"), "database");
        assert!(store.get_optional_string("LOG_FILE").is_none());
        assert!(!store.get_bool("USE_SSL", false));
    }

    #[test]
    fn keys_are_case_sensitive() {
        let store: ConfigStore = [("LogVerbosity", 7_i64)].into_iter().collect();

        assert_eq!(store.get_int("LogVerbosity", 3), 7);
        assert_eq!(store.get_int("LOGVERBOSITY", 3), 3);
    }

    #[rstest]
    #[case(ConfigValue::Int(6000), Some(6000))]
    #[case(ConfigValue::from(" 6001 "), Some(6001))]
    #[case(ConfigValue::from("not-a-port"), None)]
    #[case(ConfigValue::Float(1.5), None)]
    #[case(ConfigValue::Unsupported, None)]
    fn integer_coercions(#[case] value: ConfigValue, #[case] expected: Option<i64>) {
        assert_eq!(value.as_int(), expected);
    }

    #[rstest]
    #[case(ConfigValue::from("yes"), Some(true))]
    #[case(ConfigValue::from("NO"), Some(false))]
    #[case(ConfigValue::Bool(true), Some(true))]
    #[case(ConfigValue::Int(0), Some(false))]
    #[case(ConfigValue::from("maybe"), None)]
    fn boolean_coercions(#[case] value: ConfigValue, #[case] expected: Option<bool>) {
        assert_eq!(value.as_bool(), expected);
    }

    #[test]
    fn unsupported_values_fall_back_to_defaults() {
        let store: ConfigStore = [("SERVER_PORT", ConfigValue::Unsupported)]
            .into_iter()
            .collect();

        assert!(!store.contains("SERVER_PORT"));
        assert_eq!(store.get_int("SERVER_PORT", 5042), 5042);
        assert_eq!(store.get_string("SERVER_PORT", "x"), "x");
    }

    #[test]
    fn json_numbers_become_integers_or_floats() {
        let value: serde_json::Value =
            serde_json::from_str(r#"{"a": 5, "b": 2.5, "c": null, "d": [1]}"#)
                .expect("valid json");
        let serde_json::Value::Object(object) = value else {
            panic!("expected object");
        };
        let converted: BTreeMap<_, _> = object
            .into_iter()
            .map(|(key, value)| (key, ConfigValue::from(value)))
            .collect();

        assert_eq!(converted.get("a"), Some(&ConfigValue::Int(5)));
        assert_eq!(converted.get("b"), Some(&ConfigValue::Float(2.5)));
        assert_eq!(converted.get("c"), Some(&ConfigValue::Unsupported));
        assert_eq!(converted.get("d"), Some(&ConfigValue::Unsupported));
    }

    #[test]
    fn display_names_the_source() {
        assert_eq!(ConfigStore::default().to_string(), "<defaults>");
    }
}

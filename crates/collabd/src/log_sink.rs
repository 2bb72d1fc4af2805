//! Leveled log sink with a single, swappable output destination.
//!
//! Each [`LogSink`] owns a `tracing` [`Dispatch`] built from a fmt subscriber
//! that writes either to an append-mode log file or to standard error. The
//! sink is passed explicitly to every component; nothing in the server logs
//! through ambient global state. The binary may additionally install the
//! active dispatch as the global default so third-party crates share the
//! destination.
//!
//! Filtering is numeric: a message at verbosity `v` is emitted iff
//! `v < threshold`. Lower values are more severe, so raising the threshold
//! reveals progressively less urgent messages. Events from other crates are
//! filtered by the tracing level matching the same threshold.

use std::cell::RefCell;
use std::error::Error;
use std::fmt;
use std::fs::OpenOptions;
use std::io::{self, IsTerminal};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use once_cell::sync::OnceCell;
use tracing::Dispatch;
use tracing::dispatcher::SetGlobalDefaultError;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::{self as subscriber, MakeWriter};

use collab_config::{ConfigStore, DEFAULT_LOG_VERBOSITY, LogFormat, keys};

const LOG_TARGET: &str = env!("CARGO_PKG_NAME");

static GLOBAL_GUARD: OnceCell<()> = OnceCell::new();

thread_local! {
    static PENDING: RefCell<Option<Fragment>> = const { RefCell::new(None) };
}

/// Severity rank of a log message. Lower is more severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Verbosity(u32);

impl Verbosity {
    /// Failures.
    pub const ERROR: Self = Self(0);
    /// Degraded but recoverable conditions.
    pub const WARN: Self = Self(1);
    /// Lifecycle milestones.
    pub const INFO: Self = Self(2);
    /// Diagnostic detail.
    pub const DEBUG: Self = Self(3);
    /// Fine-grained tracing.
    pub const TRACE: Self = Self(4);

    /// Builds a verbosity from its numeric rank.
    #[must_use]
    pub const fn new(rank: u32) -> Self {
        Self(rank)
    }

    /// Converts a configured value, clamping negatives to zero.
    #[must_use]
    pub fn from_config(value: i64) -> Self {
        Self(u32::try_from(value.max(0)).unwrap_or(u32::MAX))
    }

    /// Numeric rank.
    #[must_use]
    pub const fn rank(self) -> u32 {
        self.0
    }
}

impl Default for Verbosity {
    fn default() -> Self {
        Self::from_config(DEFAULT_LOG_VERBOSITY)
    }
}

impl fmt::Display for Verbosity {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

/// Log settings resolved from the configuration store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    /// Optional log file; output is appended.
    pub file: Option<PathBuf>,
    /// Emission threshold.
    pub threshold: Verbosity,
    /// Line format.
    pub format: LogFormat,
    unrecognised_format: Option<String>,
}

impl LogSettings {
    /// Resolves the `LOG_FILE`, `LogVerbosity` and `LOG_FORMAT` keys.
    #[must_use]
    pub fn from_config(config: &ConfigStore) -> Self {
        let raw_format = config.get_optional_string(keys::LOG_FORMAT);
        let parsed = raw_format
            .as_deref()
            .map(|text| text.trim().parse::<LogFormat>());
        let (format, unrecognised_format) = match parsed {
            Some(Ok(format)) => (format, None),
            Some(Err(_)) => (LogFormat::default(), raw_format),
            None => (LogFormat::default(), None),
        };
        Self {
            file: config.get_optional_string(keys::LOG_FILE).map(PathBuf::from),
            threshold: Verbosity::from_config(
                config.get_int(keys::LOG_VERBOSITY, DEFAULT_LOG_VERBOSITY),
            ),
            format,
            unrecognised_format,
        }
    }

    /// Settings that append to `path` at the given threshold.
    #[must_use]
    pub fn appending_to(path: impl Into<PathBuf>, threshold: Verbosity) -> Self {
        Self {
            file: Some(path.into()),
            threshold,
            ..Self::default()
        }
    }
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            file: None,
            threshold: Verbosity::default(),
            format: LogFormat::default(),
            unrecognised_format: None,
        }
    }
}

/// Where log lines are written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    /// The process's standard error stream.
    Stderr,
    /// An append-mode log file.
    File(PathBuf),
}

impl fmt::Display for Destination {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stderr => formatter.write_str("standard error"),
            Self::File(path) => write!(formatter, "{}", path.display()),
        }
    }
}

struct SinkState {
    dispatch: Dispatch,
    threshold: Verbosity,
    destination: Destination,
}

struct Shared {
    state: RwLock<SinkState>,
}

/// Partial line buffered by [`LogSink::log`] on the current thread.
struct Fragment {
    owner: LogSink,
    verbosity: Verbosity,
    text: String,
}

impl Fragment {
    fn belongs_to(&self, sink: &LogSink) -> bool {
        Arc::ptr_eq(&self.owner.shared, &sink.shared) && self.owner.component == sink.component
    }

    fn flush(self) {
        self.owner.emit(self.verbosity, &self.text);
    }
}

/// Cloneable handle to the server's log destination.
#[derive(Clone)]
pub struct LogSink {
    shared: Arc<Shared>,
    component: &'static str,
}

impl fmt::Debug for LogSink {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("LogSink")
            .field("component", &self.component)
            .field("threshold", &self.threshold())
            .field("destination", &self.destination())
            .finish()
    }
}

impl Default for LogSink {
    fn default() -> Self {
        Self::new()
    }
}

impl LogSink {
    /// Builds a sink on standard error with the default threshold.
    #[must_use]
    pub fn new() -> Self {
        Self::stderr(Verbosity::default())
    }

    /// Builds a sink on standard error with the given threshold.
    #[must_use]
    pub fn stderr(threshold: Verbosity) -> Self {
        let state = SinkState {
            dispatch: stderr_dispatch(LogFormat::default(), threshold),
            threshold,
            destination: Destination::Stderr,
        };
        Self {
            shared: Arc::new(Shared {
                state: RwLock::new(state),
            }),
            component: "server",
        }
    }

    /// Returns a clone that tags every line with `component`.
    #[must_use]
    pub fn component(&self, component: &'static str) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            component,
        }
    }

    /// Applies the configured destination and threshold.
    ///
    /// The previous destination is replaced atomically. When no file is
    /// configured, or the file cannot be opened for appending, output stays
    /// on standard error and the fallback is logged once.
    pub fn configure(&self, settings: &LogSettings) -> Destination {
        let (dispatch, destination, open_error) = match &settings.file {
            Some(path) => match open_append(path) {
                Ok(file) => (
                    build_dispatch(
                        Mutex::new(file),
                        settings.format,
                        false,
                        settings.threshold,
                    ),
                    Destination::File(path.clone()),
                    None,
                ),
                Err(error) => (
                    stderr_dispatch(settings.format, settings.threshold),
                    Destination::Stderr,
                    Some((path.clone(), error)),
                ),
            },
            None => (
                stderr_dispatch(settings.format, settings.threshold),
                Destination::Stderr,
                None,
            ),
        };

        {
            let mut state = self
                .shared
                .state
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            *state = SinkState {
                dispatch,
                threshold: settings.threshold,
                destination: destination.clone(),
            };
        }

        match (&destination, open_error) {
            (Destination::File(path), _) => {
                self.log_line(
                    Verbosity::INFO,
                    format_args!("logging started to {}", path.display()),
                );
            }
            (Destination::Stderr, Some((path, error))) => {
                self.log_line(
                    Verbosity::WARN,
                    format_args!(
                        "could not open log file {}: {error}; logging to standard error",
                        path.display()
                    ),
                );
            }
            (Destination::Stderr, None) => {
                self.log_line(
                    Verbosity::WARN,
                    "no log file configured; logging to standard error",
                );
            }
        }
        if let Some(format) = &settings.unrecognised_format {
            self.log_line(
                Verbosity::WARN,
                format_args!("unrecognised log format '{format}'; using compact"),
            );
        }
        self.log_line(
            Verbosity::INFO,
            format_args!("log verbosity set to {}", settings.threshold),
        );
        destination
    }

    /// Current emission threshold.
    #[must_use]
    pub fn threshold(&self) -> Verbosity {
        self.read_state(|state| state.threshold)
    }

    /// Active destination.
    #[must_use]
    pub fn destination(&self) -> Destination {
        self.read_state(|state| state.destination.clone())
    }

    /// Returns `true` when a message at `verbosity` would be emitted.
    #[must_use]
    pub fn enabled(&self, verbosity: Verbosity) -> bool {
        verbosity < self.threshold()
    }

    /// Buffers a fragment; the next [`LogSink::log_line`] from this sink and
    /// component on this thread completes and emits it.
    ///
    /// A fragment left behind by another sink or component is emitted on its
    /// own line first. Fragments still buffered when the thread exits are
    /// dropped with it.
    pub fn log(&self, verbosity: Verbosity, message: impl fmt::Display) {
        if !self.enabled(verbosity) {
            return;
        }
        let text = message.to_string();
        let orphan = PENDING.with(|cell| {
            let mut slot = cell.borrow_mut();
            let orphan = slot.take_if(|fragment| !fragment.belongs_to(self));
            let fragment = slot.get_or_insert_with(|| Fragment {
                owner: self.clone(),
                verbosity,
                text: String::new(),
            });
            fragment.verbosity = fragment.verbosity.min(verbosity);
            fragment.text.push_str(&text);
            orphan
        });
        if let Some(orphan) = orphan {
            orphan.flush();
        }
    }

    /// Emits one line, prefixed by this sink's fragment buffered on this
    /// thread.
    pub fn log_line(&self, verbosity: Verbosity, message: impl fmt::Display) {
        let fragment = self.take_pending();
        if self.enabled(verbosity) {
            match fragment {
                Some((rank, text)) => self.emit(rank.min(verbosity), &format!("{text}{message}")),
                None => self.emit(verbosity, &message.to_string()),
            }
        } else if let Some((rank, text)) = fragment {
            self.emit(rank, &text);
        }
    }

    /// Emits an error together with its chain of sources.
    pub fn log_error(&self, verbosity: Verbosity, error: &(dyn Error + 'static)) {
        if !self.enabled(verbosity) {
            return;
        }
        let mut line = error.to_string();
        let mut source = error.source();
        while let Some(cause) = source {
            let text = cause.to_string();
            // Wrappers often embed their source in their own message.
            if !line.contains(&text) {
                line.push_str("; caused by: ");
                line.push_str(&text);
            }
            source = cause.source();
        }
        self.emit(verbosity, &line);
    }

    /// Installs the active dispatch as the process-wide default.
    ///
    /// Only the first call installs anything; later calls are no-ops.
    ///
    /// # Errors
    ///
    /// Returns an error when another global subscriber was installed first.
    pub fn install_global(&self) -> Result<(), SetGlobalDefaultError> {
        let dispatch = self.read_state(|state| state.dispatch.clone());
        GLOBAL_GUARD
            .get_or_try_init(|| tracing::dispatcher::set_global_default(dispatch))
            .map(|_| ())
    }

    fn take_pending(&self) -> Option<(Verbosity, String)> {
        let fragment = PENDING.with(|cell| cell.borrow_mut().take())?;
        if fragment.belongs_to(self) {
            Some((fragment.verbosity, fragment.text))
        } else {
            fragment.flush();
            None
        }
    }

    fn read_state<T>(&self, read: impl FnOnce(&SinkState) -> T) -> T {
        let state = self
            .shared
            .state
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        read(&state)
    }

    fn emit(&self, verbosity: Verbosity, line: &str) {
        let dispatch = self.read_state(|state| state.dispatch.clone());
        let component = self.component;
        tracing::dispatcher::with_default(&dispatch, || match verbosity.rank() {
            0 => tracing::error!(target: LOG_TARGET, component, "{line}"),
            1 => tracing::warn!(target: LOG_TARGET, component, "{line}"),
            2 => tracing::info!(target: LOG_TARGET, component, "{line}"),
            3 => tracing::debug!(target: LOG_TARGET, component, "{line}"),
            _ => tracing::trace!(target: LOG_TARGET, component, "{line}"),
        });
    }
}

fn open_append(path: &Path) -> io::Result<std::fs::File> {
    OpenOptions::new().create(true).append(true).open(path)
}

fn stderr_dispatch(format: LogFormat, threshold: Verbosity) -> Dispatch {
    build_dispatch(io::stderr, format, io::stderr().is_terminal(), threshold)
}

/// Passes every server event through to the sink's own numeric check and
/// limits other crates to the tracing level the threshold admits.
fn event_filter(threshold: Verbosity) -> EnvFilter {
    let others = match threshold.rank() {
        0 => "off",
        1 => "error",
        2 => "warn",
        3 => "info",
        4 => "debug",
        _ => "trace",
    };
    EnvFilter::new(format!("{others},{LOG_TARGET}=trace"))
}

fn build_dispatch<W>(writer: W, format: LogFormat, ansi: bool, threshold: Verbosity) -> Dispatch
where
    W: for<'writer> MakeWriter<'writer> + Send + Sync + 'static,
{
    let builder = subscriber::Subscriber::builder()
        .with_writer(writer)
        .with_ansi(ansi)
        .with_target(false)
        .with_level(true)
        .with_env_filter(event_filter(threshold))
        // Operators correlate server activity by timestamp.
        .with_timer(subscriber::time::UtcTime::rfc_3339());
    match format {
        LogFormat::Json => Dispatch::new(builder.json().flatten_event(true).finish()),
        LogFormat::Compact => Dispatch::new(builder.compact().finish()),
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use rstest::{fixture, rstest};
    use tempfile::TempDir;

    use super::*;

    #[fixture]
    fn log_dir() -> TempDir {
        TempDir::new().expect("create temp dir")
    }

    fn file_sink(dir: &TempDir, threshold: u32) -> (LogSink, PathBuf) {
        let path = dir.path().join("server.log");
        let sink = LogSink::new();
        let settings = LogSettings {
            file: Some(path.clone()),
            threshold: Verbosity::new(threshold),
            ..LogSettings::default()
        };
        assert_eq!(sink.configure(&settings), Destination::File(path.clone()));
        (sink, path)
    }

    fn read_log(path: &Path) -> String {
        fs::read_to_string(path).expect("read log file")
    }

    #[rstest]
    #[case(0, true)]
    #[case(2, true)]
    #[case(3, false)]
    #[case(9, false)]
    fn emits_only_below_threshold(log_dir: TempDir, #[case] rank: u32, #[case] expected: bool) {
        let (sink, path) = file_sink(&log_dir, 3);
        let message = format!("message at verbosity {rank}");
        sink.log_line(Verbosity::new(rank), &message);

        assert_eq!(read_log(&path).contains(&message), expected, "rank {rank}");
    }

    #[rstest]
    fn threshold_zero_silences_everything(log_dir: TempDir) {
        let (sink, path) = file_sink(&log_dir, 0);
        sink.log_line(Verbosity::ERROR, "silenced failure");

        assert!(!read_log(&path).contains("silenced failure"));
    }

    #[rstest]
    fn fragments_are_completed_by_the_next_line(log_dir: TempDir) {
        let (sink, path) = file_sink(&log_dir, 5);
        sink.log(Verbosity::DEBUG, "driver: sqlite");
        sink.log_line(Verbosity::DEBUG, " v3.45");

        assert!(read_log(&path).contains("driver: sqlite v3.45"));
    }

    #[rstest]
    fn fragments_stay_with_their_component(log_dir: TempDir) {
        let (sink, path) = file_sink(&log_dir, 5);
        sink.component("storage")
            .log(Verbosity::WARN, "could not read metadata: ");
        sink.component("acceptor")
            .log_line(Verbosity::INFO, "listening on 127.0.0.1:5042");

        let content = read_log(&path);
        let merged = content
            .lines()
            .any(|line| line.contains("could not read metadata: listening on"));
        assert!(!merged, "{content}");
        assert!(content.contains("could not read metadata: "), "{content}");
        assert!(content.contains("listening on 127.0.0.1:5042"), "{content}");
    }

    #[rstest]
    fn fragments_from_exited_threads_are_not_carried_over(log_dir: TempDir) {
        let (sink, path) = file_sink(&log_dir, 5);
        let worker = sink.clone();
        std::thread::spawn(move || worker.log(Verbosity::INFO, "abandoned half line "))
            .join()
            .expect("worker thread");
        sink.log_line(Verbosity::INFO, "complete line");

        let content = read_log(&path);
        assert!(!content.contains("abandoned half line"), "{content}");
        assert!(content.contains("complete line"), "{content}");
    }

    #[rstest]
    #[case(2, false)]
    #[case(3, true)]
    fn other_crates_follow_the_threshold(
        log_dir: TempDir,
        #[case] threshold: u32,
        #[case] info_expected: bool,
    ) {
        let (sink, path) = file_sink(&log_dir, threshold);
        let dispatch = sink.read_state(|state| state.dispatch.clone());
        tracing::dispatcher::with_default(&dispatch, || {
            tracing::info!(target: "sqlx::query", "statement summary");
            tracing::warn!(target: "sqlx::query", "slow statement");
            tracing::debug!(target: "sqlx::pool", "acquired connection");
        });

        let content = read_log(&path);
        assert_eq!(content.contains("statement summary"), info_expected, "{content}");
        assert!(content.contains("slow statement"), "{content}");
        assert!(!content.contains("acquired connection"), "{content}");
    }

    #[derive(Debug, thiserror::Error)]
    #[error("could not open store: {source}")]
    struct Embedding {
        source: io::Error,
    }

    #[derive(Debug, thiserror::Error)]
    #[error("could not open store")]
    struct Opaque {
        source: io::Error,
    }

    #[rstest]
    fn embedded_sources_are_not_repeated(log_dir: TempDir) {
        let (sink, path) = file_sink(&log_dir, 3);
        let error = Embedding {
            source: io::Error::other("disk on fire"),
        };
        sink.log_error(Verbosity::ERROR, &error);

        let content = read_log(&path);
        assert_eq!(content.matches("disk on fire").count(), 1, "{content}");
        assert!(!content.contains("caused by"), "{content}");
    }

    #[rstest]
    fn opaque_errors_append_their_sources(log_dir: TempDir) {
        let (sink, path) = file_sink(&log_dir, 3);
        let error = Opaque {
            source: io::Error::other("disk on fire"),
        };
        sink.log_error(Verbosity::ERROR, &error);

        assert!(read_log(&path).contains("could not open store; caused by: disk on fire"));
    }

    #[rstest]
    fn errors_include_their_sources(log_dir: TempDir) {
        let (sink, path) = file_sink(&log_dir, 3);
        let outer = io::Error::other(io::Error::other("disk on fire"));
        sink.log_error(Verbosity::ERROR, &outer);

        assert!(read_log(&path).contains("disk on fire"));
    }

    #[rstest]
    fn file_output_is_appended(log_dir: TempDir) {
        let path = log_dir.path().join("server.log");
        fs::write(&path, "previous run\n").expect("seed log");
        let (sink, _) = file_sink(&log_dir, 3);
        sink.log_line(Verbosity::INFO, "current run");

        let content = read_log(&path);
        assert!(content.starts_with("previous run\n"));
        assert!(content.contains("current run"));
    }

    #[rstest]
    fn component_tags_are_written(log_dir: TempDir) {
        let (sink, path) = file_sink(&log_dir, 3);
        sink.component("acceptor").log_line(Verbosity::INFO, "tagged");

        let content = read_log(&path);
        assert!(content.contains("acceptor"), "{content}");
        assert!(content.contains("tagged"), "{content}");
    }

    #[rstest]
    fn unopenable_file_falls_back_to_stderr(log_dir: TempDir) {
        let sink = LogSink::new();
        let settings = LogSettings {
            file: Some(log_dir.path().join("missing-dir").join("server.log")),
            ..LogSettings::default()
        };

        assert_eq!(sink.configure(&settings), Destination::Stderr);
        assert_eq!(sink.destination(), Destination::Stderr);
    }

    #[test]
    fn no_file_uses_stderr() {
        let sink = LogSink::new();

        assert_eq!(sink.configure(&LogSettings::default()), Destination::Stderr);
        assert_eq!(sink.threshold(), Verbosity::new(3));
    }

    #[test]
    fn settings_read_configuration_keys() {
        let config: ConfigStore = [
            (keys::LOG_FILE, collab_config::ConfigValue::from("/tmp/x.log")),
            (keys::LOG_VERBOSITY, collab_config::ConfigValue::Int(-4)),
            (keys::LOG_FORMAT, collab_config::ConfigValue::from("yaml")),
        ]
        .into_iter()
        .collect();

        let settings = LogSettings::from_config(&config);

        assert_eq!(settings.file, Some(PathBuf::from("/tmp/x.log")));
        assert_eq!(settings.threshold, Verbosity::new(0));
        assert_eq!(settings.format, LogFormat::Compact);
        assert_eq!(settings.unrecognised_format.as_deref(), Some("yaml"));
    }
}

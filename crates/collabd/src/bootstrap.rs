//! Server startup ordering and coordinated shutdown.
//!
//! [`start_with`] runs the startup sequence in a fixed order: load
//! configuration, bind the listening socket, configure the log sink, attempt
//! storage, select the manager, start the manager, start the helper, and
//! finally start the accept loop on its own thread. A failure before the
//! socket is bound leaves no port open; a failure after it releases what
//! already started.

use std::net::SocketAddr;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use thiserror::Error;

use collab_config::{
    ConfigLoadError, ConfigStore, DEFAULT_SERVER_HOST, DEFAULT_SERVER_PORT, keys,
};

use crate::health::{LifecycleReporter, StructuredLifecycleReporter};
use crate::helper::{HelperError, HelperWorker};
use crate::log_sink::{LogSettings, LogSink, Verbosity};
use crate::manager::{
    ConnectionManager, DefaultManagerProvider, ManagerError, ManagerKind, ManagerProvider,
    ServerMode, select_manager,
};
use crate::storage::{SqlStorageConnector, StorageConnector, StorageSettings, connect_storage};
use crate::transport::{AcceptorExit, AcceptorHandle, ListenerError, SocketBinder, TcpSocketBinder};

/// Source of the server configuration.
pub trait ConfigLoader: Send + Sync {
    /// Loads the configuration store.
    fn load(&self) -> Result<ConfigStore, ConfigLoadError>;
}

/// Loader that reads a configuration file.
#[derive(Debug, Clone)]
pub struct FileConfigLoader {
    path: PathBuf,
}

impl FileConfigLoader {
    /// Builds a loader for `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path the loader reads.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConfigLoader for FileConfigLoader {
    fn load(&self) -> Result<ConfigStore, ConfigLoadError> {
        ConfigStore::load(&self.path)
    }
}

/// Loader used when no configuration file is given: every key defaults.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultConfigLoader;

impl ConfigLoader for DefaultConfigLoader {
    fn load(&self) -> Result<ConfigStore, ConfigLoadError> {
        Ok(ConfigStore::default())
    }
}

/// Loader that returns a pre-built store.
#[derive(Debug, Clone)]
pub struct StaticConfigLoader {
    config: ConfigStore,
}

impl StaticConfigLoader {
    /// Wraps `config`.
    #[must_use]
    pub fn new(config: ConfigStore) -> Self {
        Self { config }
    }
}

impl ConfigLoader for StaticConfigLoader {
    fn load(&self) -> Result<ConfigStore, ConfigLoadError> {
        Ok(self.config.clone())
    }
}

/// Fatal startup failures.
#[derive(Debug, Error)]
pub enum StartupError {
    /// Configuration failed to load.
    #[error("failed to load configuration: {source}")]
    Configuration {
        /// Underlying loader error.
        #[source]
        source: ConfigLoadError,
    },
    /// `SERVER_PORT` is not a TCP port number.
    #[error("configured server port {value} is outside 0..=65535")]
    InvalidPort {
        /// Configured value.
        value: i64,
    },
    /// The listening socket could not be opened.
    #[error("failed to open listening socket: {source}")]
    Bind {
        /// Underlying listener error.
        #[source]
        source: ListenerError,
    },
    /// The connection manager failed to start.
    #[error("failed to start connection manager: {source}")]
    ManagerStart {
        /// Underlying manager error.
        #[source]
        source: ManagerError,
    },
    /// The helper failed to start.
    #[error("failed to start helper: {source}")]
    HelperStart {
        /// Underlying helper error.
        #[source]
        source: HelperError,
    },
    /// The accept loop failed to start.
    #[error("failed to start acceptor: {source}")]
    Acceptor {
        /// Underlying listener error.
        #[source]
        source: ListenerError,
    },
}

/// Events delivered to the thread waiting on a running server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// Shutdown was requested, by a signal when one is given.
    ShutdownRequested {
        /// Signal number that triggered the request.
        signal: Option<i32>,
    },
    /// The accept loop stopped.
    AcceptorStopped(AcceptorExit),
}

impl LifecycleEvent {
    /// Returns `true` when the run ended because the accept loop failed.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::AcceptorStopped(AcceptorExit::Failed { .. }))
    }
}

/// Cloneable handle that asks a running server to shut down.
#[derive(Debug, Clone)]
pub struct ShutdownTrigger {
    events: Sender<LifecycleEvent>,
}

impl ShutdownTrigger {
    /// Delivers [`LifecycleEvent::ShutdownRequested`]; returns `false` when
    /// the server is gone.
    pub fn request(&self, signal: Option<i32>) -> bool {
        self.events
            .send(LifecycleEvent::ShutdownRequested { signal })
            .is_ok()
    }
}

/// Collaborators used by [`start_with`].
pub struct StartupPlan {
    loader: Box<dyn ConfigLoader>,
    binder: Box<dyn SocketBinder>,
    connector: Box<dyn StorageConnector>,
    provider: Box<dyn ManagerProvider>,
    reporter: Arc<dyn LifecycleReporter>,
    log: LogSink,
}

impl StartupPlan {
    /// Plan with the production connector, provider and reporter.
    #[must_use]
    pub fn new(loader: impl ConfigLoader + 'static, log: LogSink) -> Self {
        Self {
            loader: Box::new(loader),
            binder: Box::new(TcpSocketBinder),
            connector: Box::new(SqlStorageConnector::new()),
            provider: Box::new(DefaultManagerProvider::new()),
            reporter: Arc::new(StructuredLifecycleReporter::new(&log)),
            log,
        }
    }

    /// Log sink every component will log through.
    #[must_use]
    pub fn log(&self) -> &LogSink {
        &self.log
    }

    /// Replaces the binder that opens the listening socket.
    #[must_use]
    pub fn with_binder(mut self, binder: impl SocketBinder + 'static) -> Self {
        self.binder = Box::new(binder);
        self
    }

    /// Replaces the storage connector.
    #[must_use]
    pub fn with_connector(mut self, connector: impl StorageConnector + 'static) -> Self {
        self.connector = Box::new(connector);
        self
    }

    /// Replaces the manager provider.
    #[must_use]
    pub fn with_provider(mut self, provider: impl ManagerProvider + 'static) -> Self {
        self.provider = Box::new(provider);
        self
    }

    /// Replaces the lifecycle reporter.
    #[must_use]
    pub fn with_reporter(mut self, reporter: Arc<dyn LifecycleReporter>) -> Self {
        self.reporter = reporter;
        self
    }
}

/// A running server.
///
/// Dropping the server terminates it.
pub struct Server {
    config: ConfigStore,
    local_addr: SocketAddr,
    manager: Arc<dyn ConnectionManager>,
    helper: Box<dyn HelperWorker>,
    acceptor: Mutex<Option<AcceptorHandle>>,
    events: Mutex<Receiver<LifecycleEvent>>,
    trigger: ShutdownTrigger,
    reporter: Arc<dyn LifecycleReporter>,
    log: LogSink,
    terminated: AtomicBool,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Server")
            .field("local_addr", &self.local_addr)
            .field("manager", &self.manager.kind())
            .field("terminated", &self.is_terminated())
            .finish_non_exhaustive()
    }
}

impl Server {
    /// Configuration the server started with.
    #[must_use]
    pub fn config(&self) -> &ConfigStore {
        &self.config
    }

    /// Address the listening socket is bound to.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Variant of the running manager.
    #[must_use]
    pub fn manager_kind(&self) -> ManagerKind {
        self.manager.kind()
    }

    /// Clients currently served by the manager.
    #[must_use]
    pub fn active_connections(&self) -> usize {
        self.manager.active_connections()
    }

    /// Handle for requesting shutdown from another thread.
    #[must_use]
    pub fn shutdown_trigger(&self) -> ShutdownTrigger {
        self.trigger.clone()
    }

    /// Blocks until shutdown is requested or the accept loop stops.
    #[must_use]
    pub fn wait(&self) -> LifecycleEvent {
        self.lock_events()
            .recv()
            .unwrap_or(LifecycleEvent::ShutdownRequested { signal: None })
    }

    /// Like [`Server::wait`], giving up after `timeout`.
    #[must_use]
    pub fn wait_timeout(&self, timeout: Duration) -> Option<LifecycleEvent> {
        match self.lock_events().recv_timeout(timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => {
                Some(LifecycleEvent::ShutdownRequested { signal: None })
            }
        }
    }

    /// Returns `true` once [`Server::terminate`] has run.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    /// Closes the listening socket, then terminates the manager and the
    /// helper.
    ///
    /// Every step is attempted even when an earlier one panicked, and no
    /// failure reaches the caller. Only the first call does anything.
    pub fn terminate(&self) {
        if self.terminated.swap(true, Ordering::SeqCst) {
            return;
        }
        self.log.log_line(Verbosity::INFO, "shutting down");
        self.attempt("closing the listening socket", || self.close_acceptor());
        self.attempt("terminating the connection manager", || {
            self.manager.terminate();
        });
        self.attempt("terminating the helper", || self.helper.terminate());
        self.reporter.shutdown_complete();
    }

    fn close_acceptor(&self) {
        let handle = self
            .acceptor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.close();
            if let Err(error) = handle.join() {
                self.log.log_error(Verbosity::WARN, &error);
            }
        }
    }

    fn attempt(&self, step: &str, action: impl FnOnce()) {
        if catch_unwind(AssertUnwindSafe(action)).is_err() {
            self.log.log_line(
                Verbosity::WARN,
                format_args!("{step} panicked; continuing shutdown"),
            );
        }
    }

    fn lock_events(&self) -> std::sync::MutexGuard<'_, Receiver<LifecycleEvent>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.terminate();
    }
}

/// Starts the server with the supplied collaborators.
///
/// # Errors
///
/// Returns a [`StartupError`] for every fatal step. Storage failures are not
/// fatal: they downgrade the server to the basic manager.
pub fn start_with(plan: StartupPlan) -> Result<Server, StartupError> {
    let StartupPlan {
        loader,
        binder,
        connector,
        provider,
        reporter,
        log,
    } = plan;
    reporter.startup_starting();
    let fail = |error: StartupError| {
        reporter.startup_failed(&error);
        error
    };

    let config = loader
        .load()
        .map_err(|source| fail(StartupError::Configuration { source }))?;

    let host = config.get_string(keys::SERVER_HOST, DEFAULT_SERVER_HOST);
    let port = listen_port(&config).map_err(&fail)?;
    let acceptor = binder
        .bind(&host, port)
        .map_err(|source| fail(StartupError::Bind { source }))?;
    let local_addr = acceptor.local_addr();
    reporter.listener_bound(local_addr);

    let destination = log.configure(&LogSettings::from_config(&config));
    reporter.log_configured(&destination);

    let mode = ServerMode::from_config(&config);
    let storage = if mode.wants_storage() {
        let settings = StorageSettings::from_config(&config);
        let storage = connect_storage(connector.as_ref(), &settings, &log.component("storage"));
        match &storage {
            Some(handle) => reporter.storage_ready(handle),
            None => reporter.storage_unavailable(),
        }
        storage
    } else {
        if let ServerMode::Basic(text) = &mode {
            log.log_line(
                Verbosity::INFO,
                format_args!("server mode '{text}'; persistence disabled"),
            );
        }
        None
    };

    let selection = select_manager(&mode, storage, &log);
    let kind = selection.kind();
    reporter.manager_selected(kind);

    let manager = provider.manager(selection, &log);
    manager
        .start()
        .map_err(|source| fail(StartupError::ManagerStart { source }))?;
    reporter.manager_started(kind);

    let helper = provider.helper(Arc::clone(&manager), &config, &log);
    if let Err(source) = helper.start() {
        manager.terminate();
        return Err(fail(StartupError::HelperStart { source }));
    }
    reporter.helper_started();

    let (events, receiver) = mpsc::channel();
    let exit_events = events.clone();
    let exit_reporter = Arc::clone(&reporter);
    let started = acceptor.start(
        Arc::clone(&manager),
        log.component("acceptor"),
        move |exit| {
            exit_reporter.acceptor_stopped(exit);
            let _delivered = exit_events.send(LifecycleEvent::AcceptorStopped(exit.clone()));
        },
    );
    let handle = match started {
        Ok(handle) => handle,
        Err(source) => {
            manager.terminate();
            helper.terminate();
            return Err(fail(StartupError::Acceptor { source }));
        }
    };
    reporter.startup_succeeded(local_addr);

    Ok(Server {
        config,
        local_addr,
        manager,
        helper,
        acceptor: Mutex::new(Some(handle)),
        events: Mutex::new(receiver),
        trigger: ShutdownTrigger { events },
        reporter,
        log,
        terminated: AtomicBool::new(false),
    })
}

fn listen_port(config: &ConfigStore) -> Result<u16, StartupError> {
    let value = config.get_int(keys::SERVER_PORT, DEFAULT_SERVER_PORT);
    u16::try_from(value).map_err(|_| StartupError::InvalidPort { value })
}

//! Test doubles shared by the lifecycle suites.

use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use collab_config::{ConfigStore, ConfigValue, keys};

use crate::bootstrap::{StartupError, StartupPlan, StaticConfigLoader};
use crate::health::LifecycleReporter;
use crate::helper::{HelperWorker, MockHelperWorker};
use crate::log_sink::{Destination, LogSink, Verbosity};
use crate::manager::{
    ConnectionManager, ManagerError, ManagerKind, ManagerProvider, ManagerSelection,
    MockConnectionManager,
};
use crate::process::ShutdownSignal;
use crate::storage::{DriverKind, MockStorageConnector, StorageError, StorageHandle};
use crate::transport::AcceptorExit;

/// Lifecycle steps observed by [`RecordingReporter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    StartupStarting,
    ListenerBound,
    LogConfigured,
    StorageReady,
    StorageUnavailable,
    ManagerSelected(ManagerKind),
    ManagerStarted(ManagerKind),
    HelperStarted,
    StartupSucceeded,
    StartupFailed(String),
    AcceptorStopped(AcceptorExit),
    ShutdownComplete,
}

/// Records lifecycle steps for assertions.
#[derive(Debug, Default)]
pub struct RecordingReporter {
    steps: Mutex<Vec<Step>>,
}

impl RecordingReporter {
    /// Captures a copy of the recorded steps.
    #[must_use]
    pub fn steps(&self) -> Vec<Step> {
        self.steps
            .lock()
            .expect("reporter mutex poisoned")
            .clone()
    }

    fn record(&self, step: Step) {
        self.steps
            .lock()
            .expect("reporter mutex poisoned")
            .push(step);
    }
}

impl LifecycleReporter for RecordingReporter {
    fn startup_starting(&self) {
        self.record(Step::StartupStarting);
    }

    fn listener_bound(&self, _addr: SocketAddr) {
        self.record(Step::ListenerBound);
    }

    fn log_configured(&self, _destination: &Destination) {
        self.record(Step::LogConfigured);
    }

    fn storage_ready(&self, _storage: &StorageHandle) {
        self.record(Step::StorageReady);
    }

    fn storage_unavailable(&self) {
        self.record(Step::StorageUnavailable);
    }

    fn manager_selected(&self, kind: ManagerKind) {
        self.record(Step::ManagerSelected(kind));
    }

    fn manager_started(&self, kind: ManagerKind) {
        self.record(Step::ManagerStarted(kind));
    }

    fn helper_started(&self) {
        self.record(Step::HelperStarted);
    }

    fn startup_succeeded(&self, _addr: SocketAddr) {
        self.record(Step::StartupSucceeded);
    }

    fn startup_failed(&self, error: &StartupError) {
        self.record(Step::StartupFailed(error.to_string()));
    }

    fn acceptor_stopped(&self, exit: &AcceptorExit) {
        self.record(Step::AcceptorStopped(exit.clone()));
    }

    fn shutdown_complete(&self) {
        self.record(Step::ShutdownComplete);
    }
}

/// Ordered record of collaborator calls across threads.
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    calls: Arc<Mutex<Vec<&'static str>>>,
}

impl CallLog {
    pub fn push(&self, call: &'static str) {
        self.calls.lock().expect("call log mutex poisoned").push(call);
    }

    #[must_use]
    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().expect("call log mutex poisoned").clone()
    }

    #[must_use]
    pub fn count(&self, call: &str) -> usize {
        self.calls().iter().filter(|entry| **entry == call).count()
    }
}

/// Manager mock that starts cleanly, terminates exactly once and records
/// both calls plus every intake.
#[must_use]
pub fn recording_manager(calls: &CallLog) -> MockConnectionManager {
    let mut manager = MockConnectionManager::new();
    manager.expect_kind().return_const(ManagerKind::Basic);
    manager.expect_active_connections().return_const(0_usize);
    manager.expect_prune().return_const(0_usize);
    let started = calls.clone();
    manager.expect_start().once().returning(move || {
        started.push("manager.start");
        Ok(())
    });
    let intake = calls.clone();
    manager.expect_intake().returning(move |_stream| {
        intake.push("manager.intake");
    });
    let terminated = calls.clone();
    manager.expect_terminate().times(1).returning(move || {
        terminated.push("manager.terminate");
    });
    manager
}

/// Helper mock that starts cleanly and terminates exactly once.
#[must_use]
pub fn recording_helper(calls: &CallLog) -> MockHelperWorker {
    let mut helper = MockHelperWorker::new();
    let started = calls.clone();
    helper.expect_start().once().returning(move || {
        started.push("helper.start");
        Ok(())
    });
    let terminated = calls.clone();
    helper.expect_terminate().times(1).returning(move || {
        terminated.push("helper.terminate");
    });
    helper
}

/// Provider handing out pre-built doubles and recording the selection.
pub struct ScriptedProvider {
    manager: Mutex<Option<Arc<dyn ConnectionManager>>>,
    helper: Mutex<Option<Box<dyn HelperWorker>>>,
    selections: Arc<Mutex<Vec<ManagerKind>>>,
}

impl ScriptedProvider {
    #[must_use]
    pub fn new(
        manager: impl ConnectionManager + 'static,
        helper: impl HelperWorker + 'static,
    ) -> Self {
        Self {
            manager: Mutex::new(Some(Arc::new(manager))),
            helper: Mutex::new(Some(Box::new(helper))),
            selections: Arc::default(),
        }
    }

    /// Shared view of the selections the provider received.
    #[must_use]
    pub fn selections(&self) -> Arc<Mutex<Vec<ManagerKind>>> {
        Arc::clone(&self.selections)
    }
}

impl ManagerProvider for ScriptedProvider {
    fn manager(&self, selection: ManagerSelection, _log: &LogSink) -> Arc<dyn ConnectionManager> {
        self.selections
            .lock()
            .expect("selections mutex poisoned")
            .push(selection.kind());
        self.manager
            .lock()
            .expect("provider mutex poisoned")
            .take()
            .expect("manager requested once")
    }

    fn helper(
        &self,
        _manager: Arc<dyn ConnectionManager>,
        _config: &ConfigStore,
        _log: &LogSink,
    ) -> Box<dyn HelperWorker> {
        self.helper
            .lock()
            .expect("provider mutex poisoned")
            .take()
            .expect("helper requested once")
    }
}

/// Manager whose termination panics.
pub struct PanickingManager;

impl ConnectionManager for PanickingManager {
    fn kind(&self) -> ManagerKind {
        ManagerKind::Basic
    }

    fn start(&self) -> Result<(), ManagerError> {
        Ok(())
    }

    fn intake(&self, _stream: TcpStream) {}

    fn terminate(&self) {
        panic!("manager failed to terminate");
    }

    fn active_connections(&self) -> usize {
        0
    }

    fn prune(&self) -> usize {
        0
    }
}

/// Connector expecting exactly one call that fails to connect.
#[must_use]
pub fn failing_connector() -> MockStorageConnector {
    let mut connector = MockStorageConnector::new();
    connector.expect_connect().once().returning(|_, _| {
        Err(StorageError::Connect {
            target: String::from("postgres://collabreate@unreachable.invalid/collabreate"),
            source: sea_orm::DbErr::Custom(String::from("host unreachable")),
        })
    });
    connector
}

/// Connector expecting exactly one call that succeeds.
#[must_use]
pub fn succeeding_connector() -> MockStorageConnector {
    let mut connector = MockStorageConnector::new();
    connector
        .expect_connect()
        .once()
        .returning(|_, _| StorageHandle::disconnected(DriverKind::Postgres));
    connector
}

/// Connector that must never be called.
#[must_use]
pub fn unused_connector() -> MockStorageConnector {
    let mut connector = MockStorageConnector::new();
    connector.expect_connect().never();
    connector
}

/// Configuration listening on an ephemeral loopback port.
#[must_use]
pub fn loopback_config(extra: &[(&str, ConfigValue)]) -> ConfigStore {
    [
        (keys::SERVER_HOST, ConfigValue::from("127.0.0.1")),
        (keys::SERVER_PORT, ConfigValue::Int(0)),
    ]
    .into_iter()
    .chain(extra.iter().cloned())
    .collect()
}

/// Plan over `config` with quiet logging and the supplied doubles.
#[must_use]
pub fn plan(
    config: ConfigStore,
    connector: MockStorageConnector,
    provider: ScriptedProvider,
    reporter: Arc<RecordingReporter>,
) -> StartupPlan {
    StartupPlan::new(
        StaticConfigLoader::new(config),
        LogSink::stderr(Verbosity::ERROR),
    )
    .with_connector(connector)
    .with_provider(provider)
    .with_reporter(reporter)
}

/// Port currently held by the returned listener.
#[must_use]
pub fn held_port() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind holder");
    let port = listener.local_addr().expect("holder addr").port();
    (listener, port)
}

/// Polls `condition` for up to two seconds.
pub fn eventually(condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    false
}

/// Shutdown signal that never arrives within a test's lifetime.
pub struct SilentSignal;

impl ShutdownSignal for SilentSignal {
    fn wait(&mut self) -> Option<i32> {
        thread::sleep(Duration::from_secs(3600));
        None
    }
}

//! Periodic maintenance coupled to the active connection manager.

use std::io;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use thiserror::Error;

use collab_config::{ConfigStore, DEFAULT_HELPER_INTERVAL_SECS, keys};

use crate::log_sink::{LogSink, Verbosity};
use crate::manager::ConnectionManager;

/// Contract of the auxiliary worker started alongside the manager.
#[cfg_attr(test, mockall::automock)]
pub trait HelperWorker: Send + Sync {
    /// Launches the worker's background activity.
    fn start(&self) -> Result<(), HelperError>;

    /// Stops the background activity and waits for it to finish.
    fn terminate(&self);
}

/// Failures starting the helper.
#[derive(Debug, Error)]
pub enum HelperError {
    /// `start` was called twice, or after `terminate`.
    #[error("helper cannot start twice")]
    AlreadyStarted,
    /// The maintenance thread could not be spawned.
    #[error("failed to spawn helper thread: {source}")]
    Spawn {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

/// Maintenance interval read from `HELPER_INTERVAL`, in whole seconds.
///
/// Non-positive values fall back to the default.
#[must_use]
pub fn helper_interval(config: &ConfigStore) -> Duration {
    let seconds = config.get_int(keys::HELPER_INTERVAL, DEFAULT_HELPER_INTERVAL_SECS);
    u64::try_from(seconds)
        .ok()
        .filter(|seconds| *seconds > 0)
        .map_or(
            Duration::from_secs(DEFAULT_HELPER_INTERVAL_SECS.unsigned_abs()),
            Duration::from_secs,
        )
}

enum Phase {
    Idle,
    Running {
        stop: Sender<()>,
        worker: JoinHandle<()>,
    },
    Terminated,
}

/// Helper that prunes finished sessions and reports the client count.
pub struct ManagerHelper {
    manager: Arc<dyn ConnectionManager>,
    interval: Duration,
    phase: Mutex<Phase>,
    log: LogSink,
}

impl ManagerHelper {
    /// Builds a helper ticking every `interval`.
    #[must_use]
    pub fn new(manager: Arc<dyn ConnectionManager>, interval: Duration, log: &LogSink) -> Self {
        Self {
            manager,
            interval,
            phase: Mutex::new(Phase::Idle),
            log: log.component("helper"),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Phase> {
        self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl HelperWorker for ManagerHelper {
    fn start(&self) -> Result<(), HelperError> {
        let mut phase = self.lock();
        if !matches!(*phase, Phase::Idle) {
            return Err(HelperError::AlreadyStarted);
        }

        let (stop, stopped) = mpsc::channel::<()>();
        let manager = Arc::clone(&self.manager);
        let interval = self.interval;
        let log = self.log.clone();
        let worker = thread::Builder::new()
            .name(String::from("collabd-helper"))
            .spawn(move || {
                // Any message, or the sender going away, ends the loop.
                while let Err(RecvTimeoutError::Timeout) = stopped.recv_timeout(interval) {
                    let pruned = manager.prune();
                    log.log_line(
                        Verbosity::DEBUG,
                        format_args!(
                            "{} active connections, {pruned} released",
                            manager.active_connections()
                        ),
                    );
                }
            })
            .map_err(|source| HelperError::Spawn { source })?;
        *phase = Phase::Running { stop, worker };
        drop(phase);

        self.log.log_line(
            Verbosity::INFO,
            format_args!("helper started; maintenance every {}s", interval.as_secs()),
        );
        Ok(())
    }

    fn terminate(&self) {
        let previous = std::mem::replace(&mut *self.lock(), Phase::Terminated);
        let Phase::Running { stop, worker } = previous else {
            return;
        };
        drop(stop);
        if worker.join().is_err() {
            self.log
                .log_line(Verbosity::WARN, "helper thread panicked during maintenance");
        }
        self.log.log_line(Verbosity::INFO, "helper terminated");
    }
}

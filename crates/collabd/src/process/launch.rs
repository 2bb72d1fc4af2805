//! Supervises server launch and runtime orchestration.

use std::path::PathBuf;

use crate::bootstrap::{
    DefaultConfigLoader, FileConfigLoader, LifecycleEvent, StartupPlan, start_with,
};
use crate::log_sink::{LogSink, Verbosity};

use super::errors::LaunchError;
use super::shutdown::{ShutdownSignal, SystemShutdownSignal, watch};

/// Runs the server with the production collaborators until shutdown.
///
/// Without a configuration path every key takes its default.
///
/// # Errors
///
/// Returns [`LaunchError`] when signal handlers cannot be installed or
/// startup fails.
pub fn run_server(config: Option<PathBuf>, log: LogSink) -> Result<LifecycleEvent, LaunchError> {
    let shutdown = SystemShutdownSignal::install()?;
    let plan = match config {
        Some(path) => StartupPlan::new(FileConfigLoader::new(path), log),
        None => StartupPlan::new(DefaultConfigLoader, log),
    };
    run_server_with(plan, shutdown)
}

/// Runs the server with injected collaborators until `shutdown` fires or
/// the accept loop stops, then terminates it.
///
/// # Errors
///
/// Returns [`LaunchError`] when startup fails or the signal watcher cannot
/// be spawned.
pub fn run_server_with<S>(plan: StartupPlan, shutdown: S) -> Result<LifecycleEvent, LaunchError>
where
    S: ShutdownSignal + 'static,
{
    let log = plan.log().clone();
    let server = start_with(plan)?;
    if let Err(error) = log.install_global() {
        log.log_line(
            Verbosity::DEBUG,
            format_args!("keeping the existing global subscriber: {error}"),
        );
    }
    let _watcher = watch(shutdown, server.shutdown_trigger())?;

    let event = server.wait();
    match &event {
        LifecycleEvent::ShutdownRequested {
            signal: Some(signal),
        } => log.log_line(
            Verbosity::INFO,
            format_args!("received signal {signal}; shutting down"),
        ),
        LifecycleEvent::ShutdownRequested { signal: None } => {
            log.log_line(Verbosity::INFO, "shutdown requested");
        }
        LifecycleEvent::AcceptorStopped(exit) => log.log_line(
            Verbosity::WARN,
            format_args!("acceptor stopped on its own ({exit}); shutting down"),
        ),
    }
    server.terminate();
    Ok(event)
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Duration;

    use rstest::rstest;
    use tempfile::TempDir;

    use collab_config::{ConfigStore, ConfigValue, keys};

    use super::*;
    use crate::bootstrap::{StartupError, StaticConfigLoader};

    struct DelayedSignal {
        delay: Duration,
        signal: Option<i32>,
    }

    impl ShutdownSignal for DelayedSignal {
        fn wait(&mut self) -> Option<i32> {
            thread::sleep(self.delay);
            self.signal
        }
    }

    fn basic_config() -> ConfigStore {
        [
            (keys::SERVER_HOST, ConfigValue::from("127.0.0.1")),
            (keys::SERVER_PORT, ConfigValue::Int(0)),
            (keys::SERVER_MODE, ConfigValue::from("basic")),
        ]
        .into_iter()
        .collect()
    }

    #[rstest]
    #[case(Some(15))]
    #[case(None)]
    fn signal_ends_the_run(#[case] signal: Option<i32>) {
        let plan = StartupPlan::new(
            StaticConfigLoader::new(basic_config()),
            LogSink::stderr(Verbosity::ERROR),
        );
        let shutdown = DelayedSignal {
            delay: Duration::from_millis(50),
            signal,
        };

        let event = run_server_with(plan, shutdown).expect("run server");

        assert_eq!(event, LifecycleEvent::ShutdownRequested { signal });
    }

    #[test]
    fn startup_failures_surface_before_waiting() {
        let dir = TempDir::new().expect("temp dir");
        let plan = StartupPlan::new(
            FileConfigLoader::new(dir.path().join("missing.conf")),
            LogSink::stderr(Verbosity::ERROR),
        );
        let shutdown = DelayedSignal {
            delay: Duration::from_secs(3600),
            signal: None,
        };

        let error = run_server_with(plan, shutdown).expect_err("missing config");

        assert!(matches!(
            error,
            LaunchError::Startup(StartupError::Configuration { .. })
        ));
    }
}

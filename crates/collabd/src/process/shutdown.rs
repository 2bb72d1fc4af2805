//! Termination signals.

use std::io;
use std::thread::{self, JoinHandle};

use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGQUIT, SIGTERM};
use signal_hook::iterator::Signals;
use thiserror::Error;

use crate::bootstrap::ShutdownTrigger;

/// Abstraction over shutdown notification mechanisms.
pub trait ShutdownSignal: Send {
    /// Blocks until shutdown should proceed; returns the signal number when
    /// one is known.
    fn wait(&mut self) -> Option<i32>;
}

/// Errors reported by shutdown signal listeners.
#[derive(Debug, Error)]
pub enum ShutdownError {
    /// Installing signal handlers failed.
    #[error("failed to install signal handlers: {source}")]
    Install {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The watcher thread could not be spawned.
    #[error("failed to spawn signal watcher: {source}")]
    Spawn {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

/// Shutdown listener for SIGTERM, SIGINT, SIGQUIT and SIGHUP.
///
/// Handlers are installed on construction so signals arriving before the
/// first [`ShutdownSignal::wait`] are not lost.
pub struct SystemShutdownSignal {
    signals: Signals,
}

impl std::fmt::Debug for SystemShutdownSignal {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.debug_struct("SystemShutdownSignal").finish()
    }
}

impl SystemShutdownSignal {
    /// Installs the signal handlers.
    ///
    /// # Errors
    ///
    /// Returns [`ShutdownError::Install`] when registration fails.
    pub fn install() -> Result<Self, ShutdownError> {
        let signals = Signals::new([SIGTERM, SIGINT, SIGQUIT, SIGHUP])
            .map_err(|source| ShutdownError::Install { source })?;
        Ok(Self { signals })
    }
}

impl ShutdownSignal for SystemShutdownSignal {
    fn wait(&mut self) -> Option<i32> {
        self.signals.forever().next()
    }
}

/// Forwards the first signal to `trigger` from a dedicated thread.
pub(crate) fn watch<S>(
    mut signal: S,
    trigger: ShutdownTrigger,
) -> Result<JoinHandle<()>, ShutdownError>
where
    S: ShutdownSignal + 'static,
{
    thread::Builder::new()
        .name(String::from("collabd-signals"))
        .spawn(move || {
            let received = signal.wait();
            let _delivered = trigger.request(received);
        })
        .map_err(|source| ShutdownError::Spawn { source })
}

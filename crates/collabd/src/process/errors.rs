//! Defines the error surface of the server launch.

use thiserror::Error;

use crate::bootstrap::StartupError;

use super::shutdown::ShutdownError;

/// Errors surfaced while launching or supervising the server process.
#[derive(Debug, Error)]
pub enum LaunchError {
    /// Startup failed before the server began accepting connections.
    #[error(transparent)]
    Startup(#[from] StartupError),
    /// Signal handlers could not be installed.
    #[error(transparent)]
    Shutdown(#[from] ShutdownError),
}

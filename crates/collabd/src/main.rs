use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use collabd::{LaunchError, LogSink, Verbosity, run_server};

/// Collaboration server daemon.
#[derive(Debug, Parser)]
#[command(name = "collabd", version, about)]
struct Cli {
    /// Configuration file; every key takes its default when omitted.
    config: Option<PathBuf>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let log = LogSink::new();
    match run_server(cli.config, log.clone()) {
        Ok(event) if event.is_failure() => ExitCode::FAILURE,
        Ok(_) => ExitCode::SUCCESS,
        // Already reported by the lifecycle reporter.
        Err(LaunchError::Startup(_)) => ExitCode::FAILURE,
        Err(error) => {
            log.log_error(Verbosity::ERROR, &error);
            ExitCode::FAILURE
        }
    }
}

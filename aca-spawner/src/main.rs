// External crates
use clap::Parser;
use std::process::ExitCode;
use tracing::error;

// Internal imports
use aca_logging::LogSettings;
use aca_spawner::cli::{self, Args};

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Keep the guard alive so buffered file output is flushed on exit
    let _log_guard = match aca_logging::init(&LogSettings::from_env()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            None
        }
    };

    match cli::run(args).await {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

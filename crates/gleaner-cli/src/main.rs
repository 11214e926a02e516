//! Gleaner CLI - Main entry point

use clap::Parser;
use gleaner_cli::Cli;
use gleaner_common::{init_logging, LogConfig};
use std::process;
use tracing::error;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Environment overrides the defaults, flags override the environment.
    let mut log_config = LogConfig::from_env().unwrap_or_default();
    if let Some(level) = cli.log_level {
        log_config = log_config.with_level(level);
    }
    if let Some(ref output) = cli.log_output {
        log_config = log_config.with_output(output.clone());
    }
    if let Some(format) = cli.log_format {
        log_config = log_config.with_format(format);
    }

    // The guard must outlive the run or buffered file output is dropped.
    let _guard = match init_logging(&log_config) {
        Ok(guard) => guard,
        Err(err) => {
            eprintln!("Warning: logging setup failed: {}", err);
            None
        },
    };

    if let Err(err) = gleaner_cli::execute(&cli).await {
        error!(error = %err, "Run failed");
        eprintln!("Error: {:#}", err);
        process::exit(1);
    }
}

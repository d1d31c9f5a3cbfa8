//! Pulse application binary - composition root.
//!
//! 1. Parse arguments and load configuration from TOML
//! 2. Initialize tracing
//! 3. Open the SQLite store and resolve the sampling context
//! 4. Run the requested command on the blocking pool

mod cli;
mod commands;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use pulse_core::config::PulseConfig;
use pulse_storage::{run_blocking, Database, StoreContext};

use crate::cli::{CliArgs, Command};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    // Config.
    let config_file = args.resolve_config_path();
    let config_exists = config_file.exists();
    let mut config = if config_exists {
        PulseConfig::load(&config_file)?
    } else {
        PulseConfig::default()
    };
    if let Some(dir) = args.resolve_data_dir() {
        config.general.data_dir = dir;
    }
    if let Some(level) = args.resolve_log_level() {
        config.general.log_level = level;
    }

    // Tracing. RUST_LOG wins over the configured level; logs go to stderr so
    // stdout stays machine-readable.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.general.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    tracing::debug!(
        path = %config_file.display(),
        found = config_exists,
        "Configuration resolved"
    );

    if args.command == Command::Init && !config_exists {
        config.save(&config_file)?;
    }

    // Storage.
    let db_path = config.database_path();
    let busy_timeout = Duration::from_millis(config.storage.busy_timeout_ms);
    let db = {
        let db_path = db_path.clone();
        run_blocking(move || Database::open_with_timeout(&db_path, busy_timeout)).await
    };
    let db = match db {
        Ok(db) => Arc::new(db),
        Err(e) => {
            tracing::error!(path = %db_path.display(), error = %e, "Failed to open database");
            return Err(e.into());
        }
    };

    let sampling = config.sampling.clone();
    let command = args.command;
    let result = run_blocking(move || {
        let ctx = StoreContext::bootstrap(&db, &sampling)?;
        tracing::debug!(?ctx, "Store context ready");
        let mut stdout = std::io::stdout().lock();
        commands::execute(command, &db, &ctx, &sampling, &mut stdout)
    })
    .await;

    if let Err(e) = result {
        tracing::debug!(error = %e, "Command failed");
        eprintln!("error: {e}");
        std::process::exit(1);
    }
    Ok(())
}

//! Media acquisition and lifecycle orchestrator
//!
//! Drives requested movies and shows through Requested → Indexed → Scraped
//! → Downloaded → Symlinked → Completed, with a persisted schedule for
//! time-driven work and a chunked disk cache behind the VFS read path.

mod cache;
mod cli;
mod config;
mod db;
mod error;
mod events;
mod media;
mod program;
mod scheduler;
mod services;
mod state_machine;

use std::time::Duration;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::Command;
use crate::config::Config;
use crate::db::Database;
use crate::program::Program;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let command = match cli::parse_args() {
        Ok(command) => command,
        Err(message) => {
            eprintln!("{message}");
            eprintln!("{}", cli::USAGE);
            std::process::exit(2);
        }
    };

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            // Configuration failures are the one fatal startup path.
            eprintln!("configuration error: {e}");
            std::process::exit(1);
        }
    };
    std::fs::create_dir_all(&config.data_dir)?;

    // Console output plus an append-mode file the CLI can upload later.
    let log_path = config.log_file();
    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "curator=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(std::sync::Arc::new(log_file)),
        )
        .init();

    tracing::info!("Connecting to database");
    let db = Database::connect_with_retry(&config.database_url, Duration::from_secs(30)).await?;
    db.migrate().await?;
    tracing::info!("Database connected, migrations applied");

    if command != Command::Start {
        let code = cli::execute(command, &config, &db).await?;
        std::process::exit(code);
    }

    let program = match Program::new(config, db).await {
        Ok(program) => program,
        Err(e) => {
            tracing::error!(error = %e, "Unrecoverable initialization failure");
            std::process::exit(1);
        }
    };
    program.start().await?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");
    program.stop().await;

    Ok(())
}

//! # Datamart Sync Entry Point
//!
//! Loads configuration, wires the remote store client and database pool
//! together, and runs one sync-and-derive pass.

use clap::Parser;
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

use datamart::config::{AppConfig, ConfigLoader};
use datamart::db;
use datamart::executor::QueryExecutor;
use datamart::pipeline::SyncPipeline;
use datamart::remote::DiskClient;
use datamart::telemetry;

#[derive(Debug, Parser)]
#[command(name = "datamart", about = "Sync remote CSV extracts and derive analytic tables")]
struct Cli {
    /// Exit without waiting for operator acknowledgement.
    #[arg(long)]
    non_interactive: bool,

    /// Directory holding the layered .env files (defaults to the working
    /// directory).
    #[arg(long)]
    env_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let loader = match &cli.env_dir {
        Some(dir) => ConfigLoader::with_base_dir(dir.clone()),
        None => ConfigLoader::new(),
    };
    let config = match loader.load() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("configuration error: {err}");
            return ExitCode::FAILURE;
        }
    };

    telemetry::init_tracing(&config);
    info!(profile = %config.profile, "configuration loaded");
    if let Ok(redacted) = config.redacted_json() {
        info!("configuration: {redacted}");
    }

    let succeeded = run(&config).await;

    if !cli.non_interactive {
        print!("Press Enter to exit...");
        let _ = std::io::stdout().flush();
        let mut line = String::new();
        let _ = std::io::stdin().lock().read_line(&mut line);
    }

    if succeeded {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

async fn run(config: &AppConfig) -> bool {
    let token = config.remote_token.clone().unwrap_or_default();
    let store = match DiskClient::new(&config.remote_base_url, token) {
        Ok(store) => store,
        Err(err) => {
            error!(error = %err, "could not construct remote store client");
            return false;
        }
    };

    let pool = match db::init_pool(config).await {
        Ok(pool) => pool,
        Err(err) => {
            error!(error = %err, "could not connect to the database");
            return false;
        }
    };
    let executor = QueryExecutor::new(Arc::new(pool), config.query_retry.clone());

    match SyncPipeline::new(&store, &executor, config).run().await {
        Ok(report) => {
            info!(
                files_downloaded = report.files_downloaded,
                orders_loaded = report.orders_loaded,
                events_loaded = report.events_loaded,
                failed_stages = ?report.failed_stages,
                "run finished"
            );
            true
        }
        Err(err) => {
            error!(error = %err, "run aborted");
            false
        }
    }
}

//! Loam CLI - offline-first sync for notes, people and tasks
//!
//! Edits land in the local cache immediately; `loam sync` reconciles them
//! with the server.

mod cli;
mod commands;
mod config;
mod error;
mod keyring_cipher;


use clap::Parser;
use loam_core::models::Collection;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands};
use crate::commands::{
    run_completions, run_connect, run_profile, run_records, run_resolve, run_status, run_sync,
    run_sync_conflicts, run_watch, Engine,
};
use crate::config::CliConfig;
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    let directive = "loam=info"
        .parse()
        .map_err(|error| CliError::Config(format!("invalid log directive: {error}")))?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(directive))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Commands::Completions { shell, output } = &cli.command {
        return run_completions(*shell, output.as_deref());
    }

    let mut config = CliConfig::load().map_err(CliError::Config)?;
    let db_path = config
        .resolve_db_path(cli.db_path)
        .map_err(CliError::Config)?;
    let engine = Engine::open(&db_path, &config).await?;
    let profile = cli.profile.as_deref();

    match cli.command {
        Commands::Profile { command } => run_profile(command, &engine, &mut config).await,
        Commands::Connect(args) => run_connect(args, &engine, &mut config, profile).await,
        Commands::Status { check, json } => {
            run_status(&engine, &config, profile, check, json).await
        }
        Commands::Sync { json } => run_sync(&engine, &config, profile, json).await,
        Commands::Conflicts { json } => run_sync_conflicts(&engine, json).await,
        Commands::Resolve { id, strategy, data } => {
            run_resolve(&engine, &config, profile, &id, strategy, data.as_deref()).await
        }
        Commands::Note { command } => run_records(Collection::Notes, command, &engine).await,
        Commands::Person { command } => run_records(Collection::People, command, &engine).await,
        Commands::Task { command } => run_records(Collection::Tasks, command, &engine).await,
        Commands::Watch { interval } => run_watch(&engine, &config, profile, interval).await,
        Commands::Completions { .. } => Ok(()),
    }
}

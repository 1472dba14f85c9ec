use std::time::Duration;

use loam_core::models::{ConnectionProfile, SyncCheckpoint};
use loam_core::session::SessionStatus;
use loam_core::sync::{ConflictResolution, ResolutionStrategy, SyncOverview, SyncResult};
use serde::Serialize;
use serde_json::Value;

use crate::cli::StrategyArg;
use crate::config::CliConfig;
use crate::error::CliError;

use super::common::{
    conflict_to_list_item, format_conflict_lines, format_sync_timestamp, print_json, Engine,
};

#[derive(Debug, Serialize)]
struct StatusReport {
    profile: Option<ConnectionProfile>,
    session: Option<SessionStatus>,
    sync: SyncOverview,
    checkpoints: Vec<SyncCheckpoint>,
}

pub async fn run_sync(
    engine: &Engine,
    config: &CliConfig,
    profile: Option<&str>,
    as_json: bool,
) -> Result<(), CliError> {
    engine.connect(config, profile).await?;
    let outcome = engine.sync.sync_all().await;
    engine.session.disconnect().await;
    let result = outcome?;

    if as_json {
        print_json(&result)?;
    } else {
        print_result(&result);
    }

    if result.success {
        Ok(())
    } else {
        Err(CliError::SyncFailed(result.failed))
    }
}

pub async fn run_sync_conflicts(engine: &Engine, as_json: bool) -> Result<(), CliError> {
    let conflicts = engine.sync.get_conflicts().await?;

    if as_json {
        let items = conflicts.iter().map(conflict_to_list_item).collect::<Vec<_>>();
        return print_json(&items);
    }

    if conflicts.is_empty() {
        println!("No sync conflicts recorded.");
        return Ok(());
    }

    for line in format_conflict_lines(&conflicts) {
        println!("{line}");
    }
    Ok(())
}

pub async fn run_resolve(
    engine: &Engine,
    config: &CliConfig,
    profile: Option<&str>,
    conflict_id: &str,
    strategy: StrategyArg,
    data: Option<&str>,
) -> Result<(), CliError> {
    let strategy = ResolutionStrategy::from(strategy);
    let merged_data = data
        .map(serde_json::from_str::<Value>)
        .transpose()
        .map_err(|error| CliError::InvalidFields(error.to_string()))?;
    let resolution = ConflictResolution {
        strategy,
        merged_data,
    };

    // keep_remote only rewrites the cache; the other strategies push.
    let needs_server = strategy != ResolutionStrategy::KeepRemote;
    if needs_server {
        engine.connect(config, profile).await?;
    }
    let outcome = engine.sync.resolve_conflict(conflict_id, resolution).await;
    if needs_server {
        engine.session.disconnect().await;
    }
    outcome?;

    println!("Resolved conflict {conflict_id} with {strategy}");
    Ok(())
}

pub async fn run_status(
    engine: &Engine,
    config: &CliConfig,
    profile: Option<&str>,
    check: bool,
    as_json: bool,
) -> Result<(), CliError> {
    let selected = match engine.resolve_profile(config, profile).await {
        Ok(selected) => Some(selected),
        Err(CliError::NoProfile) => None,
        Err(error) => return Err(error),
    };

    let session = if check && selected.is_some() {
        if let Err(error) = engine.connect(config, profile).await {
            tracing::debug!("Connection check failed: {error}");
        }
        let status = engine.session.status();
        engine.session.disconnect().await;
        Some(status)
    } else {
        None
    };

    let report = StatusReport {
        profile: selected,
        session,
        sync: engine.sync.get_sync_status().await?,
        checkpoints: engine.db.list_checkpoints().await?,
    };

    if as_json {
        return print_json(&report);
    }

    match &report.profile {
        Some(profile) => println!(
            "Profile:     {} ({}@{})",
            profile.display_name, profile.username, profile.host_url
        ),
        None => println!("Profile:     none"),
    }
    if let Some(session) = &report.session {
        match &session.error {
            Some(error) => println!("Connection:  {} ({error})", session.state),
            None => println!("Connection:  {}", session.state),
        }
    }
    println!("Pending:     {}", report.sync.pending_mutations);
    println!("Conflicts:   {}", report.sync.conflicts.len());
    for checkpoint in &report.checkpoints {
        println!(
            "Last pull:   {:<7} {}",
            checkpoint.collection.as_str(),
            format_sync_timestamp(checkpoint.last_synced_at)
        );
    }
    Ok(())
}

/// Stay connected and let auto-sync run until interrupted.
pub async fn run_watch(
    engine: &Engine,
    config: &CliConfig,
    profile: Option<&str>,
    interval_secs: Option<u64>,
) -> Result<(), CliError> {
    if let Some(secs) = interval_secs {
        engine
            .sync
            .set_auto_sync_interval(Duration::from_secs(secs))?;
    }
    engine.sync.set_auto_sync_enabled(true);

    let connected = engine.connect(config, profile).await?;
    println!(
        "Watching {} (every {}s). Press Ctrl-C to stop.",
        connected.host_url,
        engine.sync.get_sync_status().await?.auto_sync_interval_secs
    );

    match engine.sync.sync_all().await {
        Ok(result) => print_result(&result),
        Err(error) => eprintln!("Initial sync failed: {error}"),
    }
    engine.sync.start_auto_sync();

    tokio::signal::ctrl_c().await?;
    engine.sync.set_auto_sync_enabled(false);
    engine.session.disconnect().await;
    println!("Stopped.");
    Ok(())
}

fn print_result(result: &SyncResult) {
    println!(
        "Sync completed: {} synced, {} failed, {} conflicts",
        result.synced, result.failed, result.conflicts
    );
    for error in &result.errors {
        println!("  {error}");
    }
}

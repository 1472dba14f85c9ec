use loam_core::models::{ConnectionProfile, ProfileConfig};

use crate::cli::ConnectArgs;
use crate::config::CliConfig;
use crate::error::CliError;

use super::common::Engine;

/// Connect once, persisting the profile and credential, then hang up.
pub async fn run_connect(
    args: ConnectArgs,
    engine: &Engine,
    config: &mut CliConfig,
    profile: Option<&str>,
) -> Result<(), CliError> {
    let connected = connect_with_args(args, engine, config, profile).await?;

    config.active_profile = Some(connected.id.clone());
    config.save().map_err(CliError::Config)?;

    let api_version = connected
        .negotiated_api_version
        .as_deref()
        .unwrap_or("unknown");
    println!(
        "Connected to {} as {} (profile {}, server {api_version})",
        connected.host_url, connected.username, connected.id
    );
    engine.session.disconnect().await;
    Ok(())
}

async fn connect_with_args(
    args: ConnectArgs,
    engine: &Engine,
    config: &CliConfig,
    profile: Option<&str>,
) -> Result<ConnectionProfile, CliError> {
    let Some(host_url) = args.host else {
        let saved = engine.resolve_profile(config, profile).await?;
        return Ok(engine
            .session
            .connect_with_profile(&saved.id, args.password)
            .await?);
    };

    let username = match args.username {
        Some(username) => username,
        None => match profile {
            Some(id) => engine.resolve_profile(config, Some(id)).await?.username,
            None => {
                return Err(CliError::Config(
                    "--username is required with --host".to_string(),
                ))
            }
        },
    };

    let password = args.password.unwrap_or_default();
    Ok(engine
        .session
        .connect(ProfileConfig {
            id: profile.map(str::to_string),
            display_name: args.name,
            host_url,
            port: args.port,
            username,
            password,
            is_default: args.make_default,
        })
        .await?)
}

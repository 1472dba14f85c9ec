use loam_core::models::ProfileConfig;
use loam_core::session::SessionError;

use crate::cli::ProfileCommands;
use crate::config::CliConfig;
use crate::error::CliError;

use super::common::{format_profile_lines, print_json, Engine};

pub async fn run_profile(
    command: ProfileCommands,
    engine: &Engine,
    config: &mut CliConfig,
) -> Result<(), CliError> {
    match command {
        ProfileCommands::Save {
            id,
            name,
            host,
            port,
            username,
            make_default,
        } => {
            let existing = match id.as_deref() {
                Some(id) => engine.db.get_profile(id).await?,
                None => None,
            };
            let mut profile = ProfileConfig {
                id,
                display_name: name,
                host_url: host,
                port,
                username,
                password: String::new(),
                is_default: make_default,
            }
            .to_profile();
            if let Some(existing) = existing {
                profile.last_used_at = existing.last_used_at;
                profile.negotiated_api_version = existing.negotiated_api_version;
                profile.is_default |= existing.is_default;
            }
            engine.session.save_profile(&profile).await?;
            println!("Saved profile {} ({})", profile.id, profile.display_name);
        }
        ProfileCommands::List { json } => {
            let profiles = engine.session.load_profiles().await?;
            if json {
                print_json(&profiles)?;
            } else if profiles.is_empty() {
                println!("No profiles saved.");
            } else {
                let active = config.resolve_profile(None);
                for line in format_profile_lines(&profiles, active.as_deref()) {
                    println!("{line}");
                }
            }
        }
        ProfileCommands::Delete { id } => {
            engine.session.delete_profile(&id).await?;
            if config.active_profile.as_deref() == Some(id.as_str()) {
                config.active_profile = None;
                config.save().map_err(CliError::Config)?;
            }
            println!("Deleted profile {id}");
        }
        ProfileCommands::Default { id } => {
            let Some(mut profile) = engine.db.get_profile(&id).await? else {
                return Err(CliError::Session(SessionError::ProfileNotFound(id)));
            };
            profile.is_default = true;
            engine.session.save_profile(&profile).await?;
            println!("Default profile set to {}", profile.id);
        }
    }
    Ok(())
}

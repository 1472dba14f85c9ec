use std::fs;
use std::path::{Path, PathBuf};

use loam_core::config::SyncSettings;
use loam_core::util::normalize_text_option;
use serde::{Deserialize, Serialize};

const CONFIG_FILE_NAME: &str = "cli-config.json";
const DB_FILE_NAME: &str = "loam.db";

pub const DB_PATH_ENV: &str = "LOAM_DB_PATH";
pub const PROFILE_ENV: &str = "LOAM_PROFILE";

/// Settings persisted between CLI invocations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CliConfig {
    #[serde(default = "default_config_version")]
    pub version: u32,
    #[serde(default)]
    pub db_path: Option<String>,
    /// Profile used by the last successful `connect`
    #[serde(default)]
    pub active_profile: Option<String>,
    #[serde(default)]
    pub sync: SyncSettings,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            version: default_config_version(),
            db_path: None,
            active_profile: None,
            sync: SyncSettings::default(),
        }
    }
}

impl CliConfig {
    pub fn load() -> Result<Self, String> {
        let path = default_config_path()?;
        Self::load_from_path(&path)
    }

    pub fn load_from_path(path: &Path) -> Result<Self, String> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = fs::read_to_string(path)
            .map_err(|error| format!("Failed to read {}: {error}", path.display()))?;
        let mut config: Self = serde_json::from_str(&raw)
            .map_err(|error| format!("Failed to parse {}: {error}", path.display()))?;
        config.normalize();
        config.sync.validate()?;
        Ok(config)
    }

    pub fn save(&self) -> Result<PathBuf, String> {
        let path = default_config_path()?;
        self.save_to_path(&path)?;
        Ok(path)
    }

    pub fn save_to_path(&self, path: &Path) -> Result<(), String> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|error| format!("Failed to create {}: {error}", parent.display()))?;
        }

        let mut normalized = self.clone();
        normalized.normalize();
        let raw = serde_json::to_string_pretty(&normalized)
            .map_err(|error| format!("Failed to serialize CLI config: {error}"))?;
        fs::write(path, raw).map_err(|error| format!("Failed to write {}: {error}", path.display()))
    }

    /// Profile to use: `--profile`, then `LOAM_PROFILE`, then the last used one.
    pub fn resolve_profile(&self, explicit: Option<&str>) -> Option<String> {
        self.resolve_profile_with(explicit, std::env::var(PROFILE_ENV).ok())
    }

    fn resolve_profile_with(&self, explicit: Option<&str>, env_value: Option<String>) -> Option<String> {
        normalize_text_option(explicit.map(str::to_string))
            .or_else(|| normalize_text_option(env_value))
            .or_else(|| self.active_profile.clone())
    }

    /// Database path: `--db-path`, then `LOAM_DB_PATH`, then the config, then the data dir.
    pub fn resolve_db_path(&self, cli_db_path: Option<PathBuf>) -> Result<PathBuf, String> {
        self.resolve_db_path_with(cli_db_path, std::env::var(DB_PATH_ENV).ok())
    }

    fn resolve_db_path_with(
        &self,
        cli_db_path: Option<PathBuf>,
        env_value: Option<String>,
    ) -> Result<PathBuf, String> {
        if let Some(path) = cli_db_path {
            return Ok(path);
        }
        if let Some(path) = normalize_text_option(env_value).or_else(|| self.db_path.clone()) {
            return Ok(PathBuf::from(path));
        }
        dirs::data_dir()
            .map(|dir| dir.join("loam").join(DB_FILE_NAME))
            .ok_or_else(|| "Failed to resolve data directory".to_string())
    }

    fn normalize(&mut self) {
        if self.version == 0 {
            self.version = default_config_version();
        }
        self.db_path = normalize_text_option(self.db_path.take());
        self.active_profile = normalize_text_option(self.active_profile.take());
    }
}

pub fn default_config_path() -> Result<PathBuf, String> {
    dirs::config_dir()
        .map(|dir| dir.join("loam").join(CONFIG_FILE_NAME))
        .ok_or_else(|| "Failed to resolve CLI config directory".to_string())
}

const fn default_config_version() -> u32 {
    1
}

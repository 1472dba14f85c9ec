//! Engine configuration.
//!
//! `SyncSettings` carries every tunable the session manager and sync
//! coordinator read: request timeouts, the mutation retry budget, auto-sync
//! cadence, token refresh lead time, and reconnection backoff bounds. It is
//! serializable so front-ends can persist it alongside their own config.

use std::time::Duration;

use serde::{Deserialize, Serialize};

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_AUTO_SYNC_INTERVAL_SECS: u64 = 5 * 60;
const DEFAULT_TOKEN_REFRESH_LEAD_SECS: u64 = 5 * 60;
const DEFAULT_RECONNECT_INITIAL_DELAY_MS: u64 = 1_000;
const DEFAULT_RECONNECT_MAX_DELAY_MS: u64 = 30_000;
const DEFAULT_RECONNECT_MAX_ATTEMPTS: u32 = 5;

/// Tunables for the sync engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SyncSettings {
    pub request_timeout_secs: u64,
    pub max_retries: u32,
    pub auto_sync_enabled: bool,
    pub auto_sync_interval_secs: u64,
    pub token_refresh_lead_secs: u64,
    pub reconnect_initial_delay_ms: u64,
    pub reconnect_max_delay_ms: u64,
    pub reconnect_max_attempts: u32,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            max_retries: DEFAULT_MAX_RETRIES,
            auto_sync_enabled: true,
            auto_sync_interval_secs: DEFAULT_AUTO_SYNC_INTERVAL_SECS,
            token_refresh_lead_secs: DEFAULT_TOKEN_REFRESH_LEAD_SECS,
            reconnect_initial_delay_ms: DEFAULT_RECONNECT_INITIAL_DELAY_MS,
            reconnect_max_delay_ms: DEFAULT_RECONNECT_MAX_DELAY_MS,
            reconnect_max_attempts: DEFAULT_RECONNECT_MAX_ATTEMPTS,
        }
    }
}

impl SyncSettings {
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub const fn auto_sync_interval(&self) -> Duration {
        Duration::from_secs(self.auto_sync_interval_secs)
    }

    pub const fn token_refresh_lead(&self) -> Duration {
        Duration::from_secs(self.token_refresh_lead_secs)
    }

    pub const fn reconnect_initial_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_initial_delay_ms)
    }

    pub const fn reconnect_max_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_max_delay_ms)
    }

    /// Check the settings for values the engine cannot run with.
    pub fn validate(&self) -> Result<(), String> {
        if self.request_timeout_secs == 0 {
            return Err("request_timeout_secs must be greater than zero".to_string());
        }
        if self.max_retries == 0 {
            return Err("max_retries must be greater than zero".to_string());
        }
        if self.auto_sync_interval_secs == 0 {
            return Err("auto_sync_interval_secs must be greater than zero".to_string());
        }
        if self.reconnect_initial_delay_ms == 0 {
            return Err("reconnect_initial_delay_ms must be greater than zero".to_string());
        }
        if self.reconnect_max_delay_ms < self.reconnect_initial_delay_ms {
            return Err(
                "reconnect_max_delay_ms must not be smaller than reconnect_initial_delay_ms"
                    .to_string(),
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_policy() {
        let settings = SyncSettings::default();
        assert_eq!(settings.request_timeout(), Duration::from_secs(10));
        assert_eq!(settings.max_retries, 3);
        assert_eq!(settings.auto_sync_interval(), Duration::from_secs(300));
        assert_eq!(settings.reconnect_initial_delay(), Duration::from_secs(1));
        assert_eq!(settings.reconnect_max_delay(), Duration::from_secs(30));
        assert_eq!(settings.reconnect_max_attempts, 5);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let parsed: SyncSettings =
            serde_json::from_str(r#"{ "auto_sync_interval_secs": 60 }"#).unwrap();
        assert_eq!(parsed.auto_sync_interval(), Duration::from_secs(60));
        assert_eq!(parsed.max_retries, 3);
    }

    #[test]
    fn validate_rejects_zero_interval() {
        let settings = SyncSettings {
            auto_sync_interval_secs: 0,
            ..SyncSettings::default()
        };
        assert!(settings.validate().unwrap_err().contains("auto_sync_interval"));
    }
}

//! Connection profile model

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A saved server connection. Credentials are stored separately.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionProfile {
    pub id: String,
    pub display_name: String,
    /// Server URL including scheme (e.g. `https://sync.example.com`)
    pub host_url: String,
    pub port: Option<u16>,
    pub username: String,
    pub is_default: bool,
    /// Last successful connect (Unix ms)
    pub last_used_at: Option<i64>,
    /// Server version reported by the last health probe
    pub negotiated_api_version: Option<String>,
}

impl ConnectionProfile {
    /// Base URL for API calls, with the port applied when one is set.
    pub fn base_url(&self) -> Result<String, String> {
        let mut url = url::Url::parse(self.host_url.trim())
            .map_err(|error| format!("invalid host URL '{}': {error}", self.host_url))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(format!(
                "host URL '{}' must use http:// or https://",
                self.host_url
            ));
        }
        if let Some(port) = self.port {
            url.set_port(Some(port))
                .map_err(|()| format!("host URL '{}' cannot carry a port", self.host_url))?;
        }
        Ok(url.as_str().trim_end_matches('/').to_string())
    }
}

/// Caller-supplied connection details for `connect`.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ProfileConfig {
    /// Existing profile to update; a new id is generated when absent
    pub id: Option<String>,
    pub display_name: Option<String>,
    pub host_url: String,
    pub port: Option<u16>,
    pub username: String,
    pub password: String,
    pub is_default: bool,
}

impl ProfileConfig {
    /// Build the profile this config describes (without touching storage).
    pub fn to_profile(&self) -> ConnectionProfile {
        let host_url = self.host_url.trim().trim_end_matches('/').to_string();
        let display_name = crate::util::normalize_text_option(self.display_name.clone())
            .unwrap_or_else(|| format!("{}@{}", self.username.trim(), host_url));
        ConnectionProfile {
            id: crate::util::normalize_text_option(self.id.clone())
                .unwrap_or_else(|| Uuid::now_v7().to_string()),
            display_name,
            host_url,
            port: self.port,
            username: self.username.trim().to_string(),
            is_default: self.is_default,
            last_used_at: None,
            negotiated_api_version: None,
        }
    }
}

impl std::fmt::Debug for ProfileConfig {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("ProfileConfig")
            .field("id", &self.id)
            .field("display_name", &self.display_name)
            .field("host_url", &self.host_url)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("is_default", &self.is_default)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(host_url: &str, port: Option<u16>) -> ConnectionProfile {
        ProfileConfig {
            host_url: host_url.to_string(),
            port,
            username: "ada".to_string(),
            ..ProfileConfig::default()
        }
        .to_profile()
    }

    #[test]
    fn base_url_applies_port() {
        let profile = profile("https://sync.example.com/", Some(8443));
        assert_eq!(profile.base_url().unwrap(), "https://sync.example.com:8443");
    }

    #[test]
    fn base_url_keeps_path_prefix() {
        let profile = profile("http://localhost/api", None);
        assert_eq!(profile.base_url().unwrap(), "http://localhost/api");
    }

    #[test]
    fn base_url_rejects_non_http_scheme() {
        assert!(profile("ftp://example.com", None).base_url().is_err());
        assert!(profile("example.com", None).base_url().is_err());
    }

    #[test]
    fn display_name_defaults_to_user_at_host() {
        let profile = profile("https://sync.example.com", None);
        assert_eq!(profile.display_name, "ada@https://sync.example.com");
    }

    #[test]
    fn config_debug_redacts_password() {
        let config = ProfileConfig {
            password: "hunter2".to_string(),
            ..ProfileConfig::default()
        };
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("[REDACTED]"));
    }
}

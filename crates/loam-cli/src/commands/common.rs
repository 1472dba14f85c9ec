use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use loam_core::models::{Collection, ConnectionProfile, SyncConflict, SyncRecord};
use loam_core::scheduler::{Scheduler, TokioScheduler};
use loam_core::services::DatabaseService;
use loam_core::session::{SessionError, SessionManager};
use loam_core::sync::SyncCoordinator;
use loam_core::transport::HttpTransport;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::config::CliConfig;
use crate::error::CliError;
use crate::keyring_cipher::KeyringCipher;

/// Open store, session and coordinator for one CLI invocation.
pub struct Engine {
    pub db: DatabaseService,
    pub session: SessionManager<HttpTransport>,
    pub sync: SyncCoordinator<HttpTransport>,
}

impl Engine {
    pub async fn open(db_path: &Path, config: &CliConfig) -> Result<Self, CliError> {
        config.sync.validate().map_err(CliError::Config)?;
        let db = DatabaseService::open_path(db_path).await?;
        let transport = HttpTransport::new(config.sync.request_timeout())?;
        let scheduler: Arc<dyn Scheduler> = Arc::new(TokioScheduler);
        let session = SessionManager::new(
            transport,
            db.clone(),
            Arc::new(KeyringCipher::new()),
            Arc::clone(&scheduler),
            config.sync.clone(),
        );
        let sync = SyncCoordinator::new(session.clone(), db.clone(), scheduler).await?;
        Ok(Self { db, session, sync })
    }

    /// The profile a command should use, falling back to the stored default.
    pub async fn resolve_profile(
        &self,
        config: &CliConfig,
        explicit: Option<&str>,
    ) -> Result<ConnectionProfile, CliError> {
        if let Some(id) = config.resolve_profile(explicit) {
            return self
                .db
                .get_profile(&id)
                .await?
                .ok_or_else(|| CliError::Session(SessionError::ProfileNotFound(id.clone())));
        }
        self.session
            .get_default_profile()
            .await?
            .ok_or(CliError::NoProfile)
    }

    /// Connect with the resolved profile's stored credential.
    pub async fn connect(
        &self,
        config: &CliConfig,
        explicit: Option<&str>,
    ) -> Result<ConnectionProfile, CliError> {
        let profile = self.resolve_profile(config, explicit).await?;
        let password = std::env::var("LOAM_PASSWORD").ok();
        Ok(self
            .session
            .connect_with_profile(&profile.id, password)
            .await?)
    }

    /// Look a record up by full local id, or by a unique id prefix.
    pub async fn resolve_record(
        &self,
        collection: Collection,
        query: &str,
    ) -> Result<SyncRecord, CliError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(CliError::RecordNotFound(query.to_string()));
        }
        if let Some(record) = self.sync.get_cached(collection, query).await? {
            return Ok(record);
        }

        let mut matches = self
            .sync
            .list_cached(collection)
            .await?
            .into_iter()
            .filter(|record| record.local_id.starts_with(query))
            .collect::<Vec<_>>();

        match matches.len() {
            0 => Err(CliError::RecordNotFound(query.to_string())),
            1 => Ok(matches.remove(0)),
            _ => {
                let options = matches
                    .iter()
                    .take(3)
                    .map(|record| short_id(&record.local_id))
                    .collect::<Vec<_>>()
                    .join(", ");
                Err(CliError::AmbiguousRecordId(format!(
                    "ID prefix '{query}' is ambiguous; matches: {options}"
                )))
            }
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RecordListItem {
    pub id: String,
    pub remote_id: Option<String>,
    pub status: String,
    pub preview: String,
    pub last_modified: i64,
    pub relative_time: String,
    pub fields: Value,
}

#[derive(Debug, Serialize)]
pub struct ConflictListItem {
    pub id: String,
    pub record_id: String,
    pub entity_type: String,
    pub reason: String,
    pub detected_at: i64,
    pub detected_at_iso: String,
    pub local_data: Value,
    pub remote_data: Value,
}

pub fn record_to_list_item(record: &SyncRecord) -> RecordListItem {
    RecordListItem {
        id: record.local_id.clone(),
        remote_id: record.remote_id.clone(),
        status: record.sync_status.to_string(),
        preview: record_preview(&record.payload, 80),
        last_modified: record.last_modified_locally,
        relative_time: format_relative_time(
            record.last_modified_locally,
            Utc::now().timestamp_millis(),
        ),
        fields: record.payload.clone(),
    }
}

pub fn conflict_to_list_item(conflict: &SyncConflict) -> ConflictListItem {
    ConflictListItem {
        id: conflict.id.clone(),
        record_id: conflict.record_id.clone(),
        entity_type: conflict.entity_type.entity_type().to_string(),
        reason: conflict.reason.to_string(),
        detected_at: conflict.detected_at,
        detected_at_iso: format_sync_timestamp(conflict.detected_at),
        local_data: conflict.local_data.clone(),
        remote_data: conflict.remote_data.clone(),
    }
}

pub fn format_record_lines(records: &[SyncRecord]) -> Vec<String> {
    let now_ms = Utc::now().timestamp_millis();
    records
        .iter()
        .map(|record| {
            let id = short_id(&record.local_id);
            let preview = record_preview(&record.payload, 40);
            let relative_time = format_relative_time(record.last_modified_locally, now_ms);
            format!(
                "{id:<13}  {preview:<40}  {relative_time:<10}  {}",
                record.sync_status
            )
        })
        .collect()
}

pub fn format_conflict_lines(conflicts: &[SyncConflict]) -> Vec<String> {
    conflicts
        .iter()
        .map(|conflict| {
            format!(
                "{}  {}  {}={}  {}",
                format_sync_timestamp(conflict.detected_at),
                conflict.id,
                conflict.entity_type.entity_type(),
                short_id(&conflict.record_id),
                conflict.reason
            )
        })
        .collect()
}

pub fn format_profile_lines(profiles: &[ConnectionProfile], active: Option<&str>) -> Vec<String> {
    profiles
        .iter()
        .map(|profile| {
            let marker = if active == Some(profile.id.as_str()) { "*" } else { " " };
            let default = if profile.is_default { "  (default)" } else { "" };
            let last_used = profile
                .last_used_at
                .map_or_else(|| "never".to_string(), format_sync_timestamp);
            format!(
                "{marker} {}  {}  {}@{}  last used {last_used}{default}",
                profile.id, profile.display_name, profile.username, profile.host_url
            )
        })
        .collect()
}

/// First non-empty text field of a payload, collapsed and truncated.
pub fn record_preview(payload: &Value, max_chars: usize) -> String {
    const PREFERRED_KEYS: [&str; 4] = ["title", "name", "content", "body"];

    let text = payload.as_object().and_then(|fields| {
        PREFERRED_KEYS
            .iter()
            .filter_map(|key| fields.get(*key))
            .chain(fields.values())
            .find_map(|value| value.as_str().filter(|text| !text.trim().is_empty()))
    });
    let collapsed = text.map_or_else(
        || payload.to_string(),
        |text| text.split_whitespace().collect::<Vec<_>>().join(" "),
    );

    if collapsed.chars().count() <= max_chars {
        collapsed
    } else {
        let take_len = max_chars.saturating_sub(3);
        let mut truncated = collapsed.chars().take(take_len).collect::<String>();
        truncated.push_str("...");
        truncated
    }
}

/// Build a payload from `key=value` arguments or a single JSON object.
///
/// Values that parse as JSON (numbers, booleans, arrays) keep their type;
/// anything else is stored as a string.
pub fn parse_fields(args: &[String]) -> Result<Value, CliError> {
    if let [single] = args {
        let trimmed = single.trim();
        if trimmed.starts_with('{') {
            let value: Value = serde_json::from_str(trimmed)
                .map_err(|error| CliError::InvalidFields(error.to_string()))?;
            return if value.is_object() {
                Ok(value)
            } else {
                Err(CliError::InvalidFields("expected a JSON object".to_string()))
            };
        }
    }

    let mut fields = Map::new();
    for arg in args {
        let Some((key, raw)) = arg.split_once('=') else {
            return Err(CliError::InvalidFields(format!(
                "'{arg}' is not a key=value pair"
            )));
        };
        let key = key.trim();
        if key.is_empty() {
            return Err(CliError::InvalidFields(format!("'{arg}' has an empty key")));
        }
        let value = match serde_json::from_str::<Value>(raw) {
            Ok(value) if !value.is_string() => value,
            _ => Value::String(raw.to_string()),
        };
        fields.insert(key.to_string(), value);
    }

    if fields.is_empty() {
        return Err(CliError::InvalidFields("no fields given".to_string()));
    }
    Ok(Value::Object(fields))
}

pub fn short_id(id: &str) -> String {
    id.chars().take(13).collect()
}

pub fn format_sync_timestamp(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |date_time| date_time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else {
        format!("{}w ago", diff / week)
    }
}

pub fn print_json<T: Serialize>(value: &T) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

//! Database migrations

use crate::error::Result;
use libsql::Connection;

/// Current schema version
const CURRENT_VERSION: i32 = 4;

/// Run all pending migrations
pub async fn run(conn: &Connection) -> Result<()> {
    let version = get_version(conn).await?;

    if version < 1 {
        apply(conn, 1, &v1_statements()).await?;
    }
    if version < 2 {
        apply(conn, 2, V2_STATEMENTS).await?;
    }
    if version < 3 {
        apply(conn, 3, V3_STATEMENTS).await?;
    }
    if version < 4 {
        apply(conn, 4, V4_STATEMENTS).await?;
    }

    Ok(())
}

/// Get the current schema version
async fn get_version(conn: &Connection) -> Result<i32> {
    // Check if schema_version table exists
    let mut rows = conn
        .query(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
            (),
        )
        .await?;

    let exists: bool = if let Some(row) = rows.next().await? {
        row.get::<i32>(0)? != 0
    } else {
        false
    };

    if !exists {
        return Ok(0);
    }

    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM schema_version", ())
        .await?;

    let version: i32 = if let Some(row) = rows.next().await? {
        row.get(0)?
    } else {
        0
    };

    Ok(version)
}

/// Apply one schema version inside a transaction
async fn apply(conn: &Connection, version: i32, statements: &[&str]) -> Result<()> {
    // libsql doesn't have execute_batch, so we run each statement separately
    conn.execute("BEGIN TRANSACTION", ()).await?;

    for stmt in statements {
        if let Err(e) = conn.execute(stmt, ()).await {
            conn.execute("ROLLBACK", ()).await.ok();
            return Err(e.into());
        }
    }

    if let Err(e) = conn
        .execute("INSERT INTO schema_version (version) VALUES (?)", [version])
        .await
    {
        conn.execute("ROLLBACK", ()).await.ok();
        return Err(e.into());
    }

    if let Err(e) = conn.execute("COMMIT", ()).await {
        conn.execute("ROLLBACK", ()).await.ok();
        return Err(e.into());
    }

    tracing::info!("Migrated database to version {version} (latest {CURRENT_VERSION})");
    Ok(())
}

/// Version 1: cached entity tables, mutation queue, checkpoints
fn v1_statements() -> Vec<&'static str> {
    let mut statements = vec!["CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        )"];
    statements.extend(RECORD_TABLES);
    statements.extend([
        "CREATE TABLE IF NOT EXISTS mutation_queue (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            operation TEXT NOT NULL,
            collection TEXT NOT NULL,
            record_id TEXT NOT NULL,
            payload TEXT,
            retry_count INTEGER NOT NULL DEFAULT 0,
            last_error TEXT,
            enqueued_at INTEGER NOT NULL
        )",
        "CREATE INDEX IF NOT EXISTS idx_mutation_queue_record ON mutation_queue(collection, record_id)",
        "CREATE TABLE IF NOT EXISTS sync_checkpoints (
            collection TEXT PRIMARY KEY,
            last_synced_at INTEGER NOT NULL,
            sync_token TEXT
        )",
    ]);
    statements
}

const RECORD_TABLES: [&str; 9] = [
    "CREATE TABLE IF NOT EXISTS notes (
        local_id TEXT PRIMARY KEY,
        remote_id TEXT UNIQUE,
        sync_status TEXT NOT NULL,
        last_modified_locally INTEGER NOT NULL,
        remote_updated_at INTEGER,
        payload TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_notes_status ON notes(sync_status)",
    "CREATE INDEX IF NOT EXISTS idx_notes_modified ON notes(last_modified_locally DESC)",
    "CREATE TABLE IF NOT EXISTS people (
        local_id TEXT PRIMARY KEY,
        remote_id TEXT UNIQUE,
        sync_status TEXT NOT NULL,
        last_modified_locally INTEGER NOT NULL,
        remote_updated_at INTEGER,
        payload TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_people_status ON people(sync_status)",
    "CREATE INDEX IF NOT EXISTS idx_people_modified ON people(last_modified_locally DESC)",
    "CREATE TABLE IF NOT EXISTS tasks (
        local_id TEXT PRIMARY KEY,
        remote_id TEXT UNIQUE,
        sync_status TEXT NOT NULL,
        last_modified_locally INTEGER NOT NULL,
        remote_updated_at INTEGER,
        payload TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(sync_status)",
    "CREATE INDEX IF NOT EXISTS idx_tasks_modified ON tasks(last_modified_locally DESC)",
];

/// Version 2: connection profiles and encrypted credentials
const V2_STATEMENTS: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS connection_profiles (
        id TEXT PRIMARY KEY,
        position INTEGER NOT NULL,
        display_name TEXT NOT NULL,
        host_url TEXT NOT NULL,
        port INTEGER,
        username TEXT NOT NULL,
        is_default INTEGER NOT NULL DEFAULT 0,
        last_used_at INTEGER,
        negotiated_api_version TEXT
    )",
    "CREATE INDEX IF NOT EXISTS idx_connection_profiles_position ON connection_profiles(position)",
    "CREATE TABLE IF NOT EXISTS stored_credentials (
        profile_id TEXT PRIMARY KEY REFERENCES connection_profiles(id) ON DELETE CASCADE,
        blob BLOB NOT NULL,
        updated_at INTEGER NOT NULL
    )",
];

/// Version 3: persisted conflict set
const V3_STATEMENTS: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS sync_conflicts (
        id TEXT PRIMARY KEY,
        record_id TEXT NOT NULL,
        entity_type TEXT NOT NULL,
        local_data TEXT NOT NULL,
        remote_data TEXT NOT NULL,
        remote_id TEXT,
        remote_updated_at INTEGER,
        reason TEXT NOT NULL,
        detected_at INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_sync_conflicts_detected_at ON sync_conflicts(detected_at DESC)",
];

/// Version 4: conflicts keyed per collection
const V4_STATEMENTS: &[&str] = &[
    "UPDATE sync_conflicts SET id = entity_type || ':' || record_id",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_sync_conflicts_record ON sync_conflicts(entity_type, record_id)",
];

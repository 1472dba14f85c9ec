//! Connection profile and stored credential repository

use crate::error::Result;
use crate::models::ConnectionProfile;
use libsql::Connection;

const PROFILE_COLUMNS: &str =
    "id, display_name, host_url, port, username, is_default, last_used_at, negotiated_api_version";

/// Trait for profile and credential storage operations (async)
#[allow(async_fn_in_trait)]
pub trait ProfileRepository {
    /// Every saved profile in the order it was first saved
    async fn list(&self) -> Result<Vec<ConnectionProfile>>;

    /// Get a profile by id
    async fn get(&self, id: &str) -> Result<Option<ConnectionProfile>>;

    /// Insert or update a profile.
    ///
    /// Saving a profile with `is_default` set clears the flag on every other
    /// profile in the same transaction.
    async fn save(&self, profile: &ConnectionProfile) -> Result<()>;

    /// Delete a profile and its stored credential
    async fn delete(&self, id: &str) -> Result<bool>;

    /// The profile flagged as default, if any
    async fn get_default(&self) -> Result<Option<ConnectionProfile>>;

    /// Store an encrypted credential blob for a profile
    async fn save_credential(&self, profile_id: &str, blob: &[u8]) -> Result<()>;

    /// Load a profile's encrypted credential blob
    async fn load_credential(&self, profile_id: &str) -> Result<Option<Vec<u8>>>;

    /// Remove a profile's credential blob
    async fn delete_credential(&self, profile_id: &str) -> Result<bool>;
}

/// libSQL implementation of `ProfileRepository`
pub struct LibSqlProfileRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlProfileRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_profile(row: &libsql::Row) -> Result<ConnectionProfile> {
        let port: Option<i64> = row.get(3)?;
        Ok(ConnectionProfile {
            id: row.get(0)?,
            display_name: row.get(1)?,
            host_url: row.get(2)?,
            port: port.and_then(|port| u16::try_from(port).ok()),
            username: row.get(4)?,
            is_default: row.get::<i32>(5)? != 0,
            last_used_at: row.get(6)?,
            negotiated_api_version: row.get(7)?,
        })
    }

    async fn query_profiles(
        &self,
        sql: &str,
        params: impl libsql::params::IntoParams,
    ) -> Result<Vec<ConnectionProfile>> {
        let mut rows = self.conn.query(sql, params).await?;
        let mut profiles = Vec::new();
        while let Some(row) = rows.next().await? {
            profiles.push(Self::parse_profile(&row)?);
        }
        Ok(profiles)
    }

    async fn write_profile(&self, profile: &ConnectionProfile) -> Result<()> {
        if profile.is_default {
            self.conn
                .execute(
                    "UPDATE connection_profiles SET is_default = 0 WHERE id != ?",
                    [profile.id.as_str()],
                )
                .await?;
        }

        let updated = self
            .conn
            .execute(
                "UPDATE connection_profiles
                 SET display_name = ?, host_url = ?, port = ?, username = ?, is_default = ?,
                     last_used_at = ?, negotiated_api_version = ?
                 WHERE id = ?",
                libsql::params![
                    profile.display_name.clone(),
                    profile.host_url.clone(),
                    profile.port.map(i64::from),
                    profile.username.clone(),
                    i32::from(profile.is_default),
                    profile.last_used_at,
                    profile.negotiated_api_version.clone(),
                    profile.id.clone(),
                ],
            )
            .await?;

        if updated == 0 {
            self.conn
                .execute(
                    &format!(
                        "INSERT INTO connection_profiles (position, {PROFILE_COLUMNS})
                         VALUES ((SELECT COALESCE(MAX(position), 0) + 1 FROM connection_profiles), ?, ?, ?, ?, ?, ?, ?, ?)"
                    ),
                    libsql::params![
                        profile.id.clone(),
                        profile.display_name.clone(),
                        profile.host_url.clone(),
                        profile.port.map(i64::from),
                        profile.username.clone(),
                        i32::from(profile.is_default),
                        profile.last_used_at,
                        profile.negotiated_api_version.clone(),
                    ],
                )
                .await?;
        }

        Ok(())
    }
}

impl ProfileRepository for LibSqlProfileRepository<'_> {
    async fn list(&self) -> Result<Vec<ConnectionProfile>> {
        self.query_profiles(
            &format!("SELECT {PROFILE_COLUMNS} FROM connection_profiles ORDER BY position ASC"),
            (),
        )
        .await
    }

    async fn get(&self, id: &str) -> Result<Option<ConnectionProfile>> {
        Ok(self
            .query_profiles(
                &format!("SELECT {PROFILE_COLUMNS} FROM connection_profiles WHERE id = ?"),
                [id],
            )
            .await?
            .into_iter()
            .next())
    }

    async fn save(&self, profile: &ConnectionProfile) -> Result<()> {
        self.conn.execute("BEGIN TRANSACTION", ()).await?;

        if let Err(e) = self.write_profile(profile).await {
            self.conn.execute("ROLLBACK", ()).await.ok();
            return Err(e);
        }

        if let Err(e) = self.conn.execute("COMMIT", ()).await {
            self.conn.execute("ROLLBACK", ()).await.ok();
            return Err(e.into());
        }

        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        self.conn
            .execute("DELETE FROM stored_credentials WHERE profile_id = ?", [id])
            .await?;
        let removed = self
            .conn
            .execute("DELETE FROM connection_profiles WHERE id = ?", [id])
            .await?;
        Ok(removed > 0)
    }

    async fn get_default(&self) -> Result<Option<ConnectionProfile>> {
        Ok(self
            .query_profiles(
                &format!(
                    "SELECT {PROFILE_COLUMNS} FROM connection_profiles
                     WHERE is_default = 1 ORDER BY position ASC LIMIT 1"
                ),
                (),
            )
            .await?
            .into_iter()
            .next())
    }

    async fn save_credential(&self, profile_id: &str, blob: &[u8]) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO stored_credentials (profile_id, blob, updated_at) VALUES (?, ?, ?)",
                libsql::params![profile_id, blob.to_vec(), crate::util::now_millis()],
            )
            .await?;
        Ok(())
    }

    async fn load_credential(&self, profile_id: &str) -> Result<Option<Vec<u8>>> {
        let mut rows = self
            .conn
            .query(
                "SELECT blob FROM stored_credentials WHERE profile_id = ?",
                [profile_id],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(row.get::<Vec<u8>>(0)?)),
            None => Ok(None),
        }
    }

    async fn delete_credential(&self, profile_id: &str) -> Result<bool> {
        let removed = self
            .conn
            .execute(
                "DELETE FROM stored_credentials WHERE profile_id = ?",
                [profile_id],
            )
            .await?;
        Ok(removed > 0)
    }
}

//! Credential blobs the WhatsApp library persists per paired device.

use super::models::{now_rfc3339, DeviceCredentials};
use super::DbPool;
use crate::error::Result;

#[derive(Clone)]
pub struct DeviceStore {
    db: DbPool,
}

impl DeviceStore {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    pub async fn get(&self, session_id: &str) -> Result<Option<DeviceCredentials>> {
        let device = sqlx::query_as::<_, DeviceCredentials>(
            "SELECT * FROM device_credentials WHERE session_id = ?",
        )
        .bind(session_id)
        .fetch_optional(&self.db)
        .await?;

        Ok(device)
    }

    pub async fn exists(&self, session_id: &str) -> Result<bool> {
        let found: Option<(String,)> =
            sqlx::query_as("SELECT session_id FROM device_credentials WHERE session_id = ?")
                .bind(session_id)
                .fetch_optional(&self.db)
                .await?;
        Ok(found.is_some())
    }

    pub async fn save(&self, session_id: &str, jid: Option<&str>, credentials: &[u8]) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO device_credentials (session_id, jid, credentials, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(session_id) DO UPDATE SET
                jid = excluded.jid,
                credentials = excluded.credentials,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(session_id)
        .bind(jid)
        .bind(credentials)
        .bind(now_rfc3339())
        .execute(&self.db)
        .await?;

        Ok(())
    }

    /// Returns true when a credential row was removed
    pub async fn delete(&self, session_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM device_credentials WHERE session_id = ?")
            .bind(session_id)
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

//! Durable session records.

use sqlx::{QueryBuilder, Sqlite};

use super::models::{now_rfc3339, Session, SessionStatus};
use super::DbPool;
use crate::error::{GatewayError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
enum FieldChange {
    Keep,
    Set(String),
    Clear,
}

/// Atomic status transition applied by [`SessionStore::update_status`].
///
/// Moving into `connected` always clears the stored QR code. Moving into any
/// status other than `error` clears the connection error unless one is set
/// explicitly.
#[derive(Debug, Clone)]
pub struct StatusUpdate {
    status: SessionStatus,
    device_jid: FieldChange,
    connection_error: FieldChange,
    connected_at: Option<String>,
    last_seen: Option<String>,
    clear_qr: bool,
}

impl StatusUpdate {
    pub fn new(status: SessionStatus) -> Self {
        Self {
            status,
            device_jid: FieldChange::Keep,
            connection_error: FieldChange::Keep,
            connected_at: None,
            last_seen: None,
            clear_qr: status == SessionStatus::Connected,
        }
    }

    pub fn device_jid(mut self, jid: impl Into<String>) -> Self {
        self.device_jid = FieldChange::Set(jid.into());
        self
    }

    pub fn clear_device_jid(mut self) -> Self {
        self.device_jid = FieldChange::Clear;
        self
    }

    pub fn error(mut self, message: impl Into<String>) -> Self {
        self.connection_error = FieldChange::Set(message.into());
        self
    }

    pub fn connected_at(mut self, at: impl Into<String>) -> Self {
        self.connected_at = Some(at.into());
        self
    }

    pub fn last_seen(mut self, at: impl Into<String>) -> Self {
        self.last_seen = Some(at.into());
        self
    }

    pub fn clear_qr(mut self) -> Self {
        self.clear_qr = true;
        self
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }
}

#[derive(Clone)]
pub struct SessionStore {
    db: DbPool,
}

impl SessionStore {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    pub fn pool(&self) -> &DbPool {
        &self.db
    }

    pub async fn create(&self, session: &Session) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sessions (
                id, name, status, device_jid, connection_error, qr_code, qr_code_expires_at,
                proxy_config, created_at, updated_at, connected_at, last_seen
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&session.id)
        .bind(&session.name)
        .bind(&session.status)
        .bind(&session.device_jid)
        .bind(&session.connection_error)
        .bind(&session.qr_code)
        .bind(&session.qr_code_expires_at)
        .bind(&session.proxy_config)
        .bind(&session.created_at)
        .bind(&session.updated_at)
        .bind(&session.connected_at)
        .bind(&session.last_seen)
        .execute(&self.db)
        .await
        .map_err(|e| match GatewayError::from(e) {
            GatewayError::AlreadyExists(_) => {
                GatewayError::AlreadyExists(format!("session {}", session.id))
            }
            other => other,
        })?;

        Ok(())
    }

    pub async fn get_by_id(&self, id: &str) -> Result<Session> {
        sqlx::query_as::<_, Session>("SELECT * FROM sessions WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.db)
            .await?
            .ok_or_else(|| GatewayError::session_not_found(id))
    }

    /// Page of sessions, newest first
    pub async fn list(&self, limit: i64, offset: i64) -> Result<Vec<Session>> {
        let sessions = sqlx::query_as::<_, Session>(
            "SELECT * FROM sessions ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?",
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.db)
        .await?;

        Ok(sessions)
    }

    pub async fn list_all(&self) -> Result<Vec<Session>> {
        let sessions =
            sqlx::query_as::<_, Session>("SELECT * FROM sessions ORDER BY created_at ASC")
                .fetch_all(&self.db)
                .await?;

        Ok(sessions)
    }

    pub async fn count(&self) -> Result<i64> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM sessions")
            .fetch_one(&self.db)
            .await?;
        Ok(count.0)
    }

    /// Apply a status transition and return the updated row
    pub async fn update_status(&self, id: &str, update: StatusUpdate) -> Result<Session> {
        let mut query: QueryBuilder<Sqlite> = QueryBuilder::new("UPDATE sessions SET status = ");
        query.push_bind(update.status.to_string());
        query.push(", updated_at = ").push_bind(now_rfc3339());

        match update.device_jid {
            FieldChange::Keep => {}
            FieldChange::Set(jid) => {
                query.push(", device_jid = ").push_bind(jid);
            }
            FieldChange::Clear => {
                query.push(", device_jid = NULL");
            }
        }

        match update.connection_error {
            FieldChange::Set(message) => {
                query.push(", connection_error = ").push_bind(message);
            }
            FieldChange::Clear => {
                query.push(", connection_error = NULL");
            }
            FieldChange::Keep if update.status != SessionStatus::Error => {
                query.push(", connection_error = NULL");
            }
            FieldChange::Keep => {}
        }

        if let Some(at) = update.connected_at {
            query.push(", connected_at = ").push_bind(at);
        }
        if let Some(at) = update.last_seen {
            query.push(", last_seen = ").push_bind(at);
        }
        if update.clear_qr {
            query.push(", qr_code = NULL, qr_code_expires_at = NULL");
        }

        query.push(" WHERE id = ").push_bind(id.to_string());
        query.push(" RETURNING *");

        query
            .build_query_as::<Session>()
            .fetch_optional(&self.db)
            .await?
            .ok_or_else(|| GatewayError::session_not_found(id))
    }

    /// Store a new pairing code.
    ///
    /// Only applies while the session is `connecting` or `qr_code`; returns
    /// false (and changes nothing) otherwise.
    pub async fn update_qr(&self, id: &str, qr_code: &str, expires_at: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE sessions
            SET status = 'qr_code', qr_code = ?, qr_code_expires_at = ?, connection_error = NULL, updated_at = ?
            WHERE id = ? AND status IN ('connecting', 'qr_code')
            "#,
        )
        .bind(qr_code)
        .bind(expires_at)
        .bind(now_rfc3339())
        .bind(id)
        .execute(&self.db)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Remove the session together with its device credentials.
    ///
    /// Deleting a missing session is not an error.
    pub async fn delete(&self, id: &str) -> Result<()> {
        let mut tx = self.db.begin().await?;

        sqlx::query("DELETE FROM device_credentials WHERE session_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM webhooks WHERE session_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM sessions WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }
}

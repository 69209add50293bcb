//! Webhook persistence, one row per session.

use super::models::Webhook;
use super::DbPool;
use crate::error::{GatewayError, Result};

#[derive(Clone)]
pub struct WebhookStore {
    db: DbPool,
}

impl WebhookStore {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    pub async fn create(&self, webhook: &Webhook) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO webhooks (id, session_id, url, secret, events, enabled, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&webhook.id)
        .bind(&webhook.session_id)
        .bind(&webhook.url)
        .bind(&webhook.secret)
        .bind(&webhook.events)
        .bind(webhook.enabled)
        .bind(&webhook.created_at)
        .bind(&webhook.updated_at)
        .execute(&self.db)
        .await
        .map_err(|e| match GatewayError::from(e) {
            GatewayError::AlreadyExists(_) => {
                GatewayError::AlreadyExists(format!("webhook for session {}", webhook.session_id))
            }
            other => other,
        })?;

        Ok(())
    }

    pub async fn get_by_id(&self, id: &str) -> Result<Webhook> {
        sqlx::query_as::<_, Webhook>("SELECT * FROM webhooks WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.db)
            .await?
            .ok_or_else(|| GatewayError::NotFound(format!("webhook {}", id)))
    }

    pub async fn get_by_session_id(&self, session_id: &str) -> Result<Option<Webhook>> {
        let webhook = sqlx::query_as::<_, Webhook>("SELECT * FROM webhooks WHERE session_id = ?")
            .bind(session_id)
            .fetch_optional(&self.db)
            .await?;

        Ok(webhook)
    }

    pub async fn update(&self, webhook: &Webhook) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE webhooks
            SET url = ?, secret = ?, events = ?, enabled = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&webhook.url)
        .bind(&webhook.secret)
        .bind(&webhook.events)
        .bind(webhook.enabled)
        .bind(&webhook.updated_at)
        .bind(&webhook.id)
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(GatewayError::NotFound(format!("webhook {}", webhook.id)));
        }
        Ok(())
    }

    pub async fn delete(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM webhooks WHERE id = ?")
            .bind(id)
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn delete_by_session_id(&self, session_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM webhooks WHERE session_id = ?")
            .bind(session_id)
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn list(&self) -> Result<Vec<Webhook>> {
        let webhooks =
            sqlx::query_as::<_, Webhook>("SELECT * FROM webhooks ORDER BY created_at DESC")
                .fetch_all(&self.db)
                .await?;
        Ok(webhooks)
    }
}

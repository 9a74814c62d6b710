//! PostgreSQL implementation of the record store

use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;
use volley_common::types::{CampaignId, ReceiverId, SenderId, TemplateId};
use volley_common::{Error, Result};

use crate::models::{
    Campaign, CampaignStatus, LogEntry, Receiver, ReceiverStatus, SenderAccount, Template,
};
use crate::store::{NewCampaign, NewLogEntry, NewReceiver, NewSender, NewTemplate, RecordStore};

/// PostgreSQL-backed record store
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Create a new store over an existing pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn db_err(e: sqlx::Error) -> Error {
    Error::Database(e.to_string())
}

#[async_trait]
impl RecordStore for PgStore {
    async fn create_campaign(&self, input: NewCampaign) -> Result<Campaign> {
        sqlx::query_as::<_, Campaign>(
            r#"
            INSERT INTO campaigns (id, name, status)
            VALUES ($1, $2, 'draft')
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&input.name)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)
    }

    async fn campaign(&self, id: CampaignId) -> Result<Option<Campaign>> {
        sqlx::query_as::<_, Campaign>("SELECT * FROM campaigns WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)
    }

    async fn list_campaigns(&self) -> Result<Vec<Campaign>> {
        sqlx::query_as::<_, Campaign>("SELECT * FROM campaigns ORDER BY created_at DESC")
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)
    }

    async fn mark_campaign_started(
        &self,
        id: CampaignId,
        template_id: TemplateId,
    ) -> Result<Option<Campaign>> {
        sqlx::query_as::<_, Campaign>(
            r#"
            UPDATE campaigns SET
                status = 'running',
                template_id = $2,
                started_at = NOW()
            WHERE id = $1 AND status NOT IN ('running', 'paused')
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(template_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)
    }

    async fn transition_campaign(
        &self,
        id: CampaignId,
        from: CampaignStatus,
        to: CampaignStatus,
    ) -> Result<Option<Campaign>> {
        let completed_at = if to.is_terminal() {
            Some(Utc::now())
        } else {
            None
        };

        sqlx::query_as::<_, Campaign>(
            r#"
            UPDATE campaigns SET
                status = $3,
                completed_at = COALESCE($4, completed_at)
            WHERE id = $1 AND status = $2
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(from.to_string())
        .bind(to.to_string())
        .bind(completed_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)
    }

    async fn record_send_result(&self, id: CampaignId, sent: bool) -> Result<()> {
        let query = if sent {
            "UPDATE campaigns SET emails_sent = emails_sent + 1 WHERE id = $1"
        } else {
            "UPDATE campaigns SET emails_failed = emails_failed + 1 WHERE id = $1"
        };

        sqlx::query(query)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn reconcile_interrupted_campaigns(&self) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE campaigns SET
                status = 'stopped',
                completed_at = NOW()
            WHERE status IN ('running', 'paused')
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(result.rows_affected())
    }

    async fn add_receiver(&self, input: NewReceiver) -> Result<Receiver> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let receiver = sqlx::query_as::<_, Receiver>(
            r#"
            INSERT INTO receivers (id, campaign_id, address, status)
            VALUES ($1, $2, $3, 'pending')
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(input.campaign_id)
        .bind(&input.address)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_err)?;

        sqlx::query("UPDATE campaigns SET total_emails = total_emails + 1 WHERE id = $1")
            .bind(input.campaign_id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        Ok(receiver)
    }

    async fn pending_receivers(&self, campaign_id: CampaignId) -> Result<Vec<Receiver>> {
        sqlx::query_as::<_, Receiver>(
            r#"
            SELECT * FROM receivers
            WHERE campaign_id = $1 AND status = 'pending'
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(campaign_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)
    }

    async fn receiver(&self, id: ReceiverId) -> Result<Option<Receiver>> {
        sqlx::query_as::<_, Receiver>("SELECT * FROM receivers WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)
    }

    async fn mark_receiver_sent(&self, id: ReceiverId) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE receivers SET status = $2, sent_at = NOW()
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(id)
        .bind(ReceiverStatus::Sent.to_string())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn mark_receiver_failed(&self, id: ReceiverId) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE receivers SET status = $2
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(id)
        .bind(ReceiverStatus::Failed.to_string())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn create_sender(&self, input: NewSender) -> Result<SenderAccount> {
        sqlx::query_as::<_, SenderAccount>(
            r#"
            INSERT INTO sender_accounts (id, address, password_encrypted, sent_count, sending_limit)
            VALUES ($1, $2, $3, 0, $4)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&input.address)
        .bind(&input.password_encrypted)
        .bind(input.sending_limit)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)
    }

    async fn sender_count(&self) -> Result<i64> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM sender_accounts")
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(count.0)
    }

    async fn eligible_senders(&self) -> Result<Vec<SenderAccount>> {
        sqlx::query_as::<_, SenderAccount>(
            "SELECT * FROM sender_accounts WHERE sent_count < sending_limit",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)
    }

    async fn consume_sender_quota(&self, id: SenderId) -> Result<bool> {
        // Single conditional update; concurrent campaigns cannot both take
        // the last slot.
        let result = sqlx::query(
            r#"
            UPDATE sender_accounts SET sent_count = sent_count + 1
            WHERE id = $1 AND sent_count < sending_limit
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(result.rows_affected() > 0)
    }

    async fn release_sender_quota(&self, id: SenderId) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE sender_accounts SET sent_count = sent_count - 1
            WHERE id = $1 AND sent_count > 0
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn create_template(&self, input: NewTemplate) -> Result<Template> {
        sqlx::query_as::<_, Template>(
            r#"
            INSERT INTO templates (id, name, subject, html_body, plain_body, is_active)
            VALUES ($1, $2, $3, $4, $5, FALSE)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&input.name)
        .bind(&input.subject)
        .bind(&input.html_body)
        .bind(&input.plain_body)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)
    }

    async fn template(&self, id: TemplateId) -> Result<Option<Template>> {
        sqlx::query_as::<_, Template>("SELECT * FROM templates WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)
    }

    async fn active_template(&self) -> Result<Option<Template>> {
        sqlx::query_as::<_, Template>("SELECT * FROM templates WHERE is_active = TRUE LIMIT 1")
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)
    }

    async fn activate_template(&self, id: TemplateId) -> Result<bool> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        sqlx::query("UPDATE templates SET is_active = FALSE WHERE is_active = TRUE")
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        let result = sqlx::query("UPDATE templates SET is_active = TRUE WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn append_log(&self, entry: NewLogEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO log_entries
                (id, level, message, sender_address, receiver_address, status, error_reason)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(entry.level.to_string())
        .bind(&entry.message)
        .bind(&entry.sender_address)
        .bind(&entry.receiver_address)
        .bind(&entry.status)
        .bind(&entry.error_reason)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn logs(&self, limit: i64) -> Result<Vec<LogEntry>> {
        // Postgres rejects a negative LIMIT; the in-memory store treats it
        // as zero, so match that here.
        sqlx::query_as::<_, LogEntry>(
            "SELECT * FROM log_entries ORDER BY timestamp DESC LIMIT $1",
        )
        .bind(limit.max(0))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)
    }

    async fn clear_logs(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM log_entries")
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected())
    }
}

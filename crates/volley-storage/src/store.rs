//! The `RecordStore` trait - the transactional seam between the campaign
//! dispatcher and its persistence backend.

use async_trait::async_trait;
use volley_common::types::{CampaignId, ReceiverId, SenderId, TemplateId};
use volley_common::Result;

use crate::models::{
    Campaign, CampaignStatus, LogEntry, LogLevel, Receiver, SenderAccount, Template,
};

/// Input for creating a campaign
#[derive(Debug, Clone)]
pub struct NewCampaign {
    pub name: String,
}

/// Input for creating a receiver
#[derive(Debug, Clone)]
pub struct NewReceiver {
    pub campaign_id: CampaignId,
    pub address: String,
}

/// Input for creating a sender account
#[derive(Debug, Clone)]
pub struct NewSender {
    pub address: String,
    /// Credential codec envelope, already encrypted by the caller
    pub password_encrypted: String,
    pub sending_limit: i32,
}

/// Input for creating a message template
#[derive(Debug, Clone)]
pub struct NewTemplate {
    pub name: String,
    pub subject: String,
    pub html_body: String,
    pub plain_body: Option<String>,
}

/// Input for appending a log entry
#[derive(Debug, Clone)]
pub struct NewLogEntry {
    pub level: LogLevel,
    pub message: String,
    pub sender_address: Option<String>,
    pub receiver_address: Option<String>,
    pub status: Option<String>,
    pub error_reason: Option<String>,
}

impl NewLogEntry {
    /// An INFO entry with just a message
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            level: LogLevel::Info,
            message: message.into(),
            sender_address: None,
            receiver_address: None,
            status: None,
            error_reason: None,
        }
    }

    /// An ERROR entry with just a message
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: LogLevel::Error,
            message: message.into(),
            sender_address: None,
            receiver_address: None,
            status: None,
            error_reason: None,
        }
    }

    pub fn with_sender(mut self, address: impl Into<String>) -> Self {
        self.sender_address = Some(address.into());
        self
    }

    pub fn with_receiver(mut self, address: impl Into<String>) -> Self {
        self.receiver_address = Some(address.into());
        self
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    pub fn with_error_reason(mut self, reason: impl Into<String>) -> Self {
        self.error_reason = Some(reason.into());
        self
    }
}

/// Transactional record store consumed by the dispatcher.
///
/// All mutations are single atomic statements against the backend; in
/// particular `consume_sender_quota` must be a conditional increment so two
/// concurrent campaigns cannot take a sender past its limit.
#[async_trait]
pub trait RecordStore: Send + Sync {
    // Campaigns

    async fn create_campaign(&self, input: NewCampaign) -> Result<Campaign>;

    async fn campaign(&self, id: CampaignId) -> Result<Option<Campaign>>;

    async fn list_campaigns(&self) -> Result<Vec<Campaign>>;

    /// Transition to running: sets `started_at` and binds the template.
    /// Conditional on the campaign not already being active, so two
    /// concurrent starts cannot both mark it; returns `None` for a
    /// missing or already running/paused campaign.
    async fn mark_campaign_started(
        &self,
        id: CampaignId,
        template_id: TemplateId,
    ) -> Result<Option<Campaign>>;

    /// Conditionally transition campaign status in a single atomic
    /// statement. Returns the updated campaign only when it was in `from`
    /// state; terminal target states also set `completed_at`.
    async fn transition_campaign(
        &self,
        id: CampaignId,
        from: CampaignStatus,
        to: CampaignStatus,
    ) -> Result<Option<Campaign>>;

    /// Record one delivery outcome on the campaign counters.
    async fn record_send_result(&self, id: CampaignId, sent: bool) -> Result<()>;

    /// Startup reconciliation: any campaign left in running or paused state
    /// has no live runner after a restart and is force-stopped. Returns the
    /// number of campaigns reconciled.
    async fn reconcile_interrupted_campaigns(&self) -> Result<u64>;

    // Receivers

    /// Create a receiver and bump the owning campaign's `total_emails`.
    async fn add_receiver(&self, input: NewReceiver) -> Result<Receiver>;

    /// Pending receivers of a campaign in stable creation order.
    async fn pending_receivers(&self, campaign_id: CampaignId) -> Result<Vec<Receiver>>;

    async fn receiver(&self, id: ReceiverId) -> Result<Option<Receiver>>;

    async fn mark_receiver_sent(&self, id: ReceiverId) -> Result<()>;

    async fn mark_receiver_failed(&self, id: ReceiverId) -> Result<()>;

    // Sender accounts

    async fn create_sender(&self, input: NewSender) -> Result<SenderAccount>;

    async fn sender_count(&self) -> Result<i64>;

    /// Accounts with remaining quota (`sent_count < sending_limit`).
    async fn eligible_senders(&self) -> Result<Vec<SenderAccount>>;

    /// Atomically claim one quota slot. Returns false when the account is
    /// already at its limit (lost race or exhausted).
    async fn consume_sender_quota(&self, id: SenderId) -> Result<bool>;

    /// Return a claimed slot after a failed delivery attempt.
    async fn release_sender_quota(&self, id: SenderId) -> Result<()>;

    // Templates

    async fn create_template(&self, input: NewTemplate) -> Result<Template>;

    async fn template(&self, id: TemplateId) -> Result<Option<Template>>;

    async fn active_template(&self) -> Result<Option<Template>>;

    /// Make exactly this template active, clearing every other active flag.
    async fn activate_template(&self, id: TemplateId) -> Result<bool>;

    // Audit log

    async fn append_log(&self, entry: NewLogEntry) -> Result<()>;

    /// Most recent entries first, capped at `limit`.
    async fn logs(&self, limit: i64) -> Result<Vec<LogEntry>>;

    /// Bulk clear; the only way log entries are ever removed.
    async fn clear_logs(&self) -> Result<u64>;
}

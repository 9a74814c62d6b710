//! Record store models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use volley_common::types::{CampaignId, LogEntryId, ReceiverId, SenderId, TemplateId};

/// Campaign model
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Campaign {
    pub id: CampaignId,
    pub name: String,
    pub status: String,
    pub template_id: Option<TemplateId>,
    pub total_emails: i32,
    pub emails_sent: i32,
    pub emails_failed: i32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Campaign {
    /// Receivers not yet resolved to sent or failed
    pub fn emails_pending(&self) -> i32 {
        self.total_emails - self.emails_sent - self.emails_failed
    }

    /// Fraction of the campaign delivered, 0..=100
    pub fn progress_percent(&self) -> f64 {
        if self.total_emails == 0 {
            return 0.0;
        }
        self.emails_sent as f64 / self.total_emails as f64 * 100.0
    }
}

/// Campaign status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Draft,
    Running,
    Paused,
    Stopped,
    Completed,
}

impl CampaignStatus {
    /// Terminal states set `completed_at`
    pub fn is_terminal(&self) -> bool {
        matches!(self, CampaignStatus::Stopped | CampaignStatus::Completed)
    }
}

impl std::fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CampaignStatus::Draft => write!(f, "draft"),
            CampaignStatus::Running => write!(f, "running"),
            CampaignStatus::Paused => write!(f, "paused"),
            CampaignStatus::Stopped => write!(f, "stopped"),
            CampaignStatus::Completed => write!(f, "completed"),
        }
    }
}

impl std::str::FromStr for CampaignStatus {
    type Err = volley_common::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(CampaignStatus::Draft),
            "running" => Ok(CampaignStatus::Running),
            "paused" => Ok(CampaignStatus::Paused),
            "stopped" => Ok(CampaignStatus::Stopped),
            "completed" => Ok(CampaignStatus::Completed),
            other => Err(volley_common::Error::Validation(format!(
                "Unknown campaign status: {}",
                other
            ))),
        }
    }
}

/// Sender account model
///
/// `password_encrypted` holds the credential codec envelope; plaintext is
/// recovered only at transmission time.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct SenderAccount {
    pub id: SenderId,
    pub address: String,
    #[serde(skip_serializing)]
    pub password_encrypted: String,
    pub sent_count: i32,
    pub sending_limit: i32,
    pub created_at: DateTime<Utc>,
}

impl SenderAccount {
    /// Whether this account may be chosen for another send
    pub fn has_quota(&self) -> bool {
        self.sent_count < self.sending_limit
    }
}

/// Receiver model
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Receiver {
    pub id: ReceiverId,
    pub campaign_id: CampaignId,
    pub address: String,
    pub status: String,
    pub sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Receiver status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiverStatus {
    Pending,
    Sent,
    Failed,
}

impl std::fmt::Display for ReceiverStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReceiverStatus::Pending => write!(f, "pending"),
            ReceiverStatus::Sent => write!(f, "sent"),
            ReceiverStatus::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for ReceiverStatus {
    type Err = volley_common::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ReceiverStatus::Pending),
            "sent" => Ok(ReceiverStatus::Sent),
            "failed" => Ok(ReceiverStatus::Failed),
            other => Err(volley_common::Error::Validation(format!(
                "Unknown receiver status: {}",
                other
            ))),
        }
    }
}

/// Message template model
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Template {
    pub id: TemplateId,
    pub name: String,
    pub subject: String,
    pub html_body: String,
    pub plain_body: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// Append-only audit log entry
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: LogEntryId,
    pub timestamp: DateTime<Utc>,
    pub level: String,
    pub message: String,
    pub sender_address: Option<String>,
    pub receiver_address: Option<String>,
    pub status: Option<String>,
    pub error_reason: Option<String>,
}

/// Log severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    Info,
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

/// Pure projection of a campaign's delivery progress
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignProgress {
    pub status: String,
    pub total_emails: i32,
    pub emails_sent: i32,
    pub emails_failed: i32,
    pub emails_pending: i32,
    pub progress_percent: f64,
}

impl From<&Campaign> for CampaignProgress {
    fn from(c: &Campaign) -> Self {
        Self {
            status: c.status.clone(),
            total_emails: c.total_emails,
            emails_sent: c.emails_sent,
            emails_failed: c.emails_failed,
            emails_pending: c.emails_pending(),
            progress_percent: c.progress_percent(),
        }
    }
}

//! Common types for Volley

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for campaigns
pub type CampaignId = Uuid;

/// Unique identifier for sender accounts
pub type SenderId = Uuid;

/// Unique identifier for receivers
pub type ReceiverId = Uuid;

/// Unique identifier for message templates
pub type TemplateId = Uuid;

/// Unique identifier for log entries
pub type LogEntryId = Uuid;

/// Timestamp wrapper
pub type Timestamp = DateTime<Utc>;

/// Email address
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EmailAddress {
    pub local: String,
    pub domain: String,
}

impl EmailAddress {
    /// Create a new email address
    pub fn new(local: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            local: local.into(),
            domain: domain.into(),
        }
    }

    /// Parse an email address from a string
    pub fn parse(s: &str) -> Option<Self> {
        let parts: Vec<&str> = s.splitn(2, '@').collect();
        if parts.len() == 2 && !parts[0].is_empty() && !parts[1].is_empty() {
            Some(Self::new(parts[0], parts[1]))
        } else {
            None
        }
    }
}

impl std::fmt::Display for EmailAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.local, self.domain)
    }
}

impl std::str::FromStr for EmailAddress {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| crate::Error::Validation("Invalid email address".to_string()))
    }
}

/// Notable campaign state transitions, emitted for logging and notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "event", content = "campaign")]
pub enum LifecycleEvent {
    Started { name: String },
    Paused { name: String },
    Resumed { name: String },
    Stopped { name: String },
    Completed { name: String },
}

impl LifecycleEvent {
    /// The campaign name this event refers to
    pub fn campaign_name(&self) -> &str {
        match self {
            LifecycleEvent::Started { name }
            | LifecycleEvent::Paused { name }
            | LifecycleEvent::Resumed { name }
            | LifecycleEvent::Stopped { name }
            | LifecycleEvent::Completed { name } => name,
        }
    }

    /// Short status tag used in log entries
    pub fn status_tag(&self) -> &'static str {
        match self {
            LifecycleEvent::Started { .. } => "started",
            LifecycleEvent::Paused { .. } => "paused",
            LifecycleEvent::Resumed { .. } => "resumed",
            LifecycleEvent::Stopped { .. } => "stopped",
            LifecycleEvent::Completed { .. } => "completed",
        }
    }
}

impl std::fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LifecycleEvent::Started { name } => write!(f, "Campaign \"{}\" started", name),
            LifecycleEvent::Paused { name } => write!(f, "Campaign \"{}\" paused", name),
            LifecycleEvent::Resumed { name } => write!(f, "Campaign \"{}\" resumed", name),
            LifecycleEvent::Stopped { name } => write!(f, "Campaign \"{}\" stopped", name),
            LifecycleEvent::Completed { name } => write!(f, "Campaign \"{}\" completed", name),
        }
    }
}

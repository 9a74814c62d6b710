//! In-memory implementation of the record store
//!
//! Backs the dispatcher tests and embedded deployments. All mutations take
//! the single write lock, which gives the same atomicity guarantees the
//! SQL statements give in the PostgreSQL store.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;
use volley_common::types::{CampaignId, ReceiverId, SenderId, TemplateId};
use volley_common::Result;

use crate::models::{
    Campaign, CampaignStatus, LogEntry, Receiver, ReceiverStatus, SenderAccount, Template,
};
use crate::store::{NewCampaign, NewLogEntry, NewReceiver, NewSender, NewTemplate, RecordStore};

#[derive(Default)]
struct Inner {
    campaigns: HashMap<CampaignId, Campaign>,
    // Receivers keep insertion order so pending_receivers is stable.
    receivers: Vec<Receiver>,
    senders: HashMap<SenderId, SenderAccount>,
    templates: HashMap<TemplateId, Template>,
    logs: Vec<LogEntry>,
}

/// In-memory record store
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn create_campaign(&self, input: NewCampaign) -> Result<Campaign> {
        let campaign = Campaign {
            id: Uuid::new_v4(),
            name: input.name,
            status: CampaignStatus::Draft.to_string(),
            template_id: None,
            total_emails: 0,
            emails_sent: 0,
            emails_failed: 0,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        };

        let mut inner = self.inner.write().await;
        inner.campaigns.insert(campaign.id, campaign.clone());
        Ok(campaign)
    }

    async fn campaign(&self, id: CampaignId) -> Result<Option<Campaign>> {
        let inner = self.inner.read().await;
        Ok(inner.campaigns.get(&id).cloned())
    }

    async fn list_campaigns(&self) -> Result<Vec<Campaign>> {
        let inner = self.inner.read().await;
        let mut campaigns: Vec<Campaign> = inner.campaigns.values().cloned().collect();
        campaigns.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(campaigns)
    }

    async fn mark_campaign_started(
        &self,
        id: CampaignId,
        template_id: TemplateId,
    ) -> Result<Option<Campaign>> {
        let mut inner = self.inner.write().await;
        match inner.campaigns.get_mut(&id) {
            Some(c)
                if c.status != CampaignStatus::Running.to_string()
                    && c.status != CampaignStatus::Paused.to_string() =>
            {
                c.status = CampaignStatus::Running.to_string();
                c.template_id = Some(template_id);
                c.started_at = Some(Utc::now());
                Ok(Some(c.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn transition_campaign(
        &self,
        id: CampaignId,
        from: CampaignStatus,
        to: CampaignStatus,
    ) -> Result<Option<Campaign>> {
        let mut inner = self.inner.write().await;
        match inner.campaigns.get_mut(&id) {
            Some(c) if c.status == from.to_string() => {
                c.status = to.to_string();
                if to.is_terminal() {
                    c.completed_at = Some(Utc::now());
                }
                Ok(Some(c.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn record_send_result(&self, id: CampaignId, sent: bool) -> Result<()> {
        let mut inner = self.inner.write().await;
        if let Some(c) = inner.campaigns.get_mut(&id) {
            if sent {
                c.emails_sent += 1;
            } else {
                c.emails_failed += 1;
            }
        }
        Ok(())
    }

    async fn reconcile_interrupted_campaigns(&self) -> Result<u64> {
        let mut inner = self.inner.write().await;
        let mut reconciled = 0;
        for c in inner.campaigns.values_mut() {
            if c.status == CampaignStatus::Running.to_string()
                || c.status == CampaignStatus::Paused.to_string()
            {
                c.status = CampaignStatus::Stopped.to_string();
                c.completed_at = Some(Utc::now());
                reconciled += 1;
            }
        }
        Ok(reconciled)
    }

    async fn add_receiver(&self, input: NewReceiver) -> Result<Receiver> {
        let receiver = Receiver {
            id: Uuid::new_v4(),
            campaign_id: input.campaign_id,
            address: input.address,
            status: ReceiverStatus::Pending.to_string(),
            sent_at: None,
            created_at: Utc::now(),
        };

        let mut inner = self.inner.write().await;
        inner.receivers.push(receiver.clone());
        if let Some(c) = inner.campaigns.get_mut(&input.campaign_id) {
            c.total_emails += 1;
        }
        Ok(receiver)
    }

    async fn pending_receivers(&self, campaign_id: CampaignId) -> Result<Vec<Receiver>> {
        let inner = self.inner.read().await;
        Ok(inner
            .receivers
            .iter()
            .filter(|r| {
                r.campaign_id == campaign_id && r.status == ReceiverStatus::Pending.to_string()
            })
            .cloned()
            .collect())
    }

    async fn receiver(&self, id: ReceiverId) -> Result<Option<Receiver>> {
        let inner = self.inner.read().await;
        Ok(inner.receivers.iter().find(|r| r.id == id).cloned())
    }

    async fn mark_receiver_sent(&self, id: ReceiverId) -> Result<()> {
        let mut inner = self.inner.write().await;
        if let Some(r) = inner.receivers.iter_mut().find(|r| r.id == id) {
            if r.status == ReceiverStatus::Pending.to_string() {
                r.status = ReceiverStatus::Sent.to_string();
                r.sent_at = Some(Utc::now());
            }
        }
        Ok(())
    }

    async fn mark_receiver_failed(&self, id: ReceiverId) -> Result<()> {
        let mut inner = self.inner.write().await;
        if let Some(r) = inner.receivers.iter_mut().find(|r| r.id == id) {
            if r.status == ReceiverStatus::Pending.to_string() {
                r.status = ReceiverStatus::Failed.to_string();
            }
        }
        Ok(())
    }

    async fn create_sender(&self, input: NewSender) -> Result<SenderAccount> {
        let sender = SenderAccount {
            id: Uuid::new_v4(),
            address: input.address,
            password_encrypted: input.password_encrypted,
            sent_count: 0,
            sending_limit: input.sending_limit,
            created_at: Utc::now(),
        };

        let mut inner = self.inner.write().await;
        inner.senders.insert(sender.id, sender.clone());
        Ok(sender)
    }

    async fn sender_count(&self) -> Result<i64> {
        let inner = self.inner.read().await;
        Ok(inner.senders.len() as i64)
    }

    async fn eligible_senders(&self) -> Result<Vec<SenderAccount>> {
        let inner = self.inner.read().await;
        let mut senders: Vec<SenderAccount> = inner
            .senders
            .values()
            .filter(|s| s.has_quota())
            .cloned()
            .collect();
        senders.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(senders)
    }

    async fn consume_sender_quota(&self, id: SenderId) -> Result<bool> {
        let mut inner = self.inner.write().await;
        match inner.senders.get_mut(&id) {
            Some(s) if s.has_quota() => {
                s.sent_count += 1;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release_sender_quota(&self, id: SenderId) -> Result<()> {
        let mut inner = self.inner.write().await;
        if let Some(s) = inner.senders.get_mut(&id) {
            if s.sent_count > 0 {
                s.sent_count -= 1;
            }
        }
        Ok(())
    }

    async fn create_template(&self, input: NewTemplate) -> Result<Template> {
        let template = Template {
            id: Uuid::new_v4(),
            name: input.name,
            subject: input.subject,
            html_body: input.html_body,
            plain_body: input.plain_body,
            is_active: false,
            created_at: Utc::now(),
        };

        let mut inner = self.inner.write().await;
        inner.templates.insert(template.id, template.clone());
        Ok(template)
    }

    async fn template(&self, id: TemplateId) -> Result<Option<Template>> {
        let inner = self.inner.read().await;
        Ok(inner.templates.get(&id).cloned())
    }

    async fn active_template(&self) -> Result<Option<Template>> {
        let inner = self.inner.read().await;
        Ok(inner.templates.values().find(|t| t.is_active).cloned())
    }

    async fn activate_template(&self, id: TemplateId) -> Result<bool> {
        let mut inner = self.inner.write().await;
        if !inner.templates.contains_key(&id) {
            return Ok(false);
        }
        for t in inner.templates.values_mut() {
            t.is_active = t.id == id;
        }
        Ok(true)
    }

    async fn append_log(&self, entry: NewLogEntry) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.logs.push(LogEntry {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            level: entry.level.to_string(),
            message: entry.message,
            sender_address: entry.sender_address,
            receiver_address: entry.receiver_address,
            status: entry.status,
            error_reason: entry.error_reason,
        });
        Ok(())
    }

    async fn logs(&self, limit: i64) -> Result<Vec<LogEntry>> {
        let inner = self.inner.read().await;
        Ok(inner
            .logs
            .iter()
            .rev()
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn clear_logs(&self) -> Result<u64> {
        let mut inner = self.inner.write().await;
        let cleared = inner.logs.len() as u64;
        inner.logs.clear();
        Ok(cleared)
    }
}

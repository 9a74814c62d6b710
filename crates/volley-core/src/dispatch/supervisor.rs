//! Campaign supervisor - process-wide ownership of running campaigns
//!
//! The supervisor is the single entry point for campaign control. It keeps
//! one registry entry per live runner task; pause, resume and stop are
//! flag flips plus a conditional status transition, so a control operation
//! racing a completing runner always resolves to exactly one final state.

use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{info, warn};
use volley_common::config::DispatchConfig;
use volley_common::types::{CampaignId, LifecycleEvent};
use volley_storage::models::{Campaign, CampaignProgress, CampaignStatus};
use volley_storage::store::{NewLogEntry, RecordStore};

use super::allocator::SenderAllocator;
use super::delivery::{DeliveryExecutor, Mailer};
use super::retry::{RetryController, RetryPolicy};
use super::runner::{CampaignRunner, DispatchPacing, RunControl};
use crate::credentials::CredentialCodec;
use crate::notify::Notifier;

/// Why a control operation was refused
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("Campaign not found")]
    NotFound,

    #[error("No active template is configured")]
    NoActiveTemplate,

    #[error("Campaign has no receivers")]
    NoReceivers,

    #[error("No sender accounts are configured")]
    NoSenders,

    #[error("Campaign is already active")]
    AlreadyActive,

    #[error(transparent)]
    Store(#[from] volley_common::Error),
}

/// Result of a pause/resume/stop request
#[derive(Debug)]
pub enum ControlOutcome {
    /// The transition happened; here is the updated campaign.
    Applied(Campaign),
    /// The campaign was not in the required state. Not an error: the
    /// caller raced another control operation or the runner's own exit.
    Ignored,
}

struct CampaignHandle {
    control: Arc<RunControl>,
}

/// Owns the runner tasks and mediates every campaign control operation
pub struct CampaignSupervisor {
    store: Arc<dyn RecordStore>,
    mailer: Arc<dyn Mailer>,
    notifier: Arc<dyn Notifier>,
    codec: CredentialCodec,
    config: DispatchConfig,
    registry: Arc<RwLock<HashMap<CampaignId, CampaignHandle>>>,
}

impl CampaignSupervisor {
    pub fn new(
        store: Arc<dyn RecordStore>,
        mailer: Arc<dyn Mailer>,
        notifier: Arc<dyn Notifier>,
        codec: CredentialCodec,
        config: DispatchConfig,
    ) -> Self {
        Self {
            store,
            mailer,
            notifier,
            codec,
            config,
            registry: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Start a campaign: validate preconditions, transition it to running,
    /// and spawn its runner task.
    pub async fn start(&self, id: CampaignId) -> Result<Campaign, ControlError> {
        let campaign = self
            .store
            .campaign(id)
            .await?
            .ok_or(ControlError::NotFound)?;

        if self.registry.read().await.contains_key(&id) {
            return Err(ControlError::AlreadyActive);
        }
        let status: CampaignStatus = campaign.status.parse().unwrap_or(CampaignStatus::Draft);
        if matches!(status, CampaignStatus::Running | CampaignStatus::Paused) {
            return Err(ControlError::AlreadyActive);
        }

        let template = self
            .store
            .active_template()
            .await?
            .ok_or(ControlError::NoActiveTemplate)?;

        if campaign.total_emails == 0 {
            return Err(ControlError::NoReceivers);
        }
        if self.store.sender_count().await? == 0 {
            return Err(ControlError::NoSenders);
        }

        // Conditional in the store: a concurrent start that got here first
        // leaves the campaign running and this update matches nothing.
        let campaign = self
            .store
            .mark_campaign_started(id, template.id)
            .await?
            .ok_or(ControlError::AlreadyActive)?;

        info!(campaign = %campaign.name, template = %template.name, "Campaign started");
        self.emit(LifecycleEvent::Started {
            name: campaign.name.clone(),
        })
        .await;

        let control = Arc::new(RunControl::new());
        let runner = CampaignRunner::new(
            id,
            self.store.clone(),
            RetryController::new(
                self.store.clone(),
                SenderAllocator::new(self.store.clone()),
                DeliveryExecutor::new(self.mailer.clone(), self.codec.clone()),
                RetryPolicy::from(&self.config),
            ),
            self.notifier.clone(),
            DispatchPacing::from(&self.config),
            control.clone(),
        );

        // Insert before spawning so the runner's own deregistration, which
        // takes this lock, cannot run first.
        let mut registry = self.registry.write().await;
        if registry.contains_key(&id) {
            return Err(ControlError::AlreadyActive);
        }
        registry.insert(
            id,
            CampaignHandle {
                control: control.clone(),
            },
        );
        let task_registry = self.registry.clone();
        tokio::spawn(async move {
            runner.run().await;
            task_registry.write().await.remove(&id);
        });

        Ok(campaign)
    }

    /// Pause a running campaign between receivers.
    pub async fn pause(&self, id: CampaignId) -> Result<ControlOutcome, ControlError> {
        self.store
            .campaign(id)
            .await?
            .ok_or(ControlError::NotFound)?;

        let Some(campaign) = self
            .store
            .transition_campaign(id, CampaignStatus::Running, CampaignStatus::Paused)
            .await?
        else {
            return Ok(ControlOutcome::Ignored);
        };

        if let Some(handle) = self.registry.read().await.get(&id) {
            handle.control.pause();
        }

        info!(campaign = %campaign.name, "Campaign paused");
        self.emit(LifecycleEvent::Paused {
            name: campaign.name.clone(),
        })
        .await;

        Ok(ControlOutcome::Applied(campaign))
    }

    /// Resume a paused campaign.
    pub async fn resume(&self, id: CampaignId) -> Result<ControlOutcome, ControlError> {
        self.store
            .campaign(id)
            .await?
            .ok_or(ControlError::NotFound)?;

        let Some(campaign) = self
            .store
            .transition_campaign(id, CampaignStatus::Paused, CampaignStatus::Running)
            .await?
        else {
            return Ok(ControlOutcome::Ignored);
        };

        if let Some(handle) = self.registry.read().await.get(&id) {
            handle.control.resume();
        }

        info!(campaign = %campaign.name, "Campaign resumed");
        self.emit(LifecycleEvent::Resumed {
            name: campaign.name.clone(),
        })
        .await;

        Ok(ControlOutcome::Applied(campaign))
    }

    /// Stop a running or paused campaign. Terminal: stopped campaigns are
    /// never resumed, though a later start may re-dispatch what is still
    /// pending.
    pub async fn stop(&self, id: CampaignId) -> Result<ControlOutcome, ControlError> {
        self.store
            .campaign(id)
            .await?
            .ok_or(ControlError::NotFound)?;

        let mut transitioned = self
            .store
            .transition_campaign(id, CampaignStatus::Running, CampaignStatus::Stopped)
            .await?;
        if transitioned.is_none() {
            transitioned = self
                .store
                .transition_campaign(id, CampaignStatus::Paused, CampaignStatus::Stopped)
                .await?;
        }
        let Some(campaign) = transitioned else {
            return Ok(ControlOutcome::Ignored);
        };

        if let Some(handle) = self.registry.read().await.get(&id) {
            handle.control.stop();
        }

        info!(campaign = %campaign.name, "Campaign stopped");
        self.emit(LifecycleEvent::Stopped {
            name: campaign.name.clone(),
        })
        .await;

        Ok(ControlOutcome::Applied(campaign))
    }

    /// Pure progress snapshot; reads the store, touches no runner state.
    pub async fn status(&self, id: CampaignId) -> Result<CampaignProgress, ControlError> {
        let campaign = self
            .store
            .campaign(id)
            .await?
            .ok_or(ControlError::NotFound)?;
        Ok(CampaignProgress::from(&campaign))
    }

    /// Whether a runner task is currently registered for this campaign
    pub async fn is_active(&self, id: CampaignId) -> bool {
        self.registry.read().await.contains_key(&id)
    }

    /// Audit log plus best-effort external notification
    async fn emit(&self, event: LifecycleEvent) {
        let entry = NewLogEntry::info(format!("{}.", event)).with_status(event.status_tag());
        if let Err(e) = self.store.append_log(entry).await {
            warn!(error = %e, "Failed to append log entry");
        }
        if let Err(e) = self.notifier.notify(&event).await {
            warn!(error = %e, "Lifecycle notification failed");
        }
    }
}

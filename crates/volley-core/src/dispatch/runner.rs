//! Campaign runner - the per-campaign control loop
//!
//! One runner task per running campaign. Receivers are processed strictly
//! in creation order, one at a time; pause and stop take effect at the
//! poll points between receivers, never mid-delivery.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info, warn};
use volley_common::config::DispatchConfig;
use volley_common::types::{CampaignId, LifecycleEvent};
use volley_storage::models::{Campaign, CampaignStatus, Receiver, ReceiverStatus, Template};
use volley_storage::store::{NewLogEntry, RecordStore};

use super::retry::{RetryController, SendOutcome};
use crate::notify::Notifier;

/// Shared pause/stop flags for one running campaign.
///
/// Owned by the supervisor's registry; the runner only ever polls them.
#[derive(Debug, Default)]
pub struct RunControl {
    paused: AtomicBool,
    stopped: AtomicBool,
}

impl RunControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    /// Stop also clears the pause flag so a paused loop wakes and observes
    /// the stop.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.paused.store(false, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

/// Loop pacing
#[derive(Debug, Clone)]
pub struct DispatchPacing {
    /// Fixed delay between receivers (transport throttle)
    pub send_delay: Duration,
    /// Poll interval while paused
    pub pause_poll: Duration,
}

impl Default for DispatchPacing {
    fn default() -> Self {
        Self {
            send_delay: Duration::from_secs(1),
            pause_poll: Duration::from_secs(1),
        }
    }
}

impl From<&DispatchConfig> for DispatchPacing {
    fn from(config: &DispatchConfig) -> Self {
        Self {
            send_delay: Duration::from_secs(config.send_delay_secs),
            pause_poll: Duration::from_secs(config.pause_poll_secs),
        }
    }
}

/// Drives one campaign from running to completed or stopped
pub struct CampaignRunner {
    campaign_id: CampaignId,
    store: Arc<dyn RecordStore>,
    retry: RetryController,
    notifier: Arc<dyn Notifier>,
    pacing: DispatchPacing,
    control: Arc<RunControl>,
}

impl CampaignRunner {
    pub fn new(
        campaign_id: CampaignId,
        store: Arc<dyn RecordStore>,
        retry: RetryController,
        notifier: Arc<dyn Notifier>,
        pacing: DispatchPacing,
        control: Arc<RunControl>,
    ) -> Self {
        Self {
            campaign_id,
            store,
            retry,
            notifier,
            pacing,
            control,
        }
    }

    /// Run the campaign to its final state
    pub async fn run(self) {
        let pending = match self.store.pending_receivers(self.campaign_id).await {
            Ok(pending) => pending,
            Err(e) => {
                error!(campaign = %self.campaign_id, error = %e, "Failed to load pending receivers");
                return;
            }
        };

        info!(
            campaign = %self.campaign_id,
            pending = pending.len(),
            "Campaign dispatch loop started"
        );

        'receivers: for receiver in pending {
            if self.control.is_stopped() {
                break;
            }

            while self.control.is_paused() {
                if self.control.is_stopped() {
                    break 'receivers;
                }
                sleep(self.pacing.pause_poll).await;
            }
            // stop() clears the pause flag, so re-check after waking.
            if self.control.is_stopped() {
                break;
            }

            self.process_receiver(&receiver).await;

            sleep(self.pacing.send_delay).await;
        }

        if !self.control.is_stopped() {
            self.finish().await;
        } else {
            // The stop operation has already finalized campaign status.
            info!(campaign = %self.campaign_id, "Campaign dispatch loop stopped");
        }
    }

    /// Handle one receiver: re-check its state, run the retry sequence,
    /// and commit the outcome to the store.
    async fn process_receiver(&self, receiver: &Receiver) {
        // Re-read the record; it may have been resolved by an earlier run
        // or deleted concurrently.
        let current = match self.store.receiver(receiver.id).await {
            Ok(Some(r)) => r,
            Ok(None) => {
                self.abandon_receiver(receiver, "Receiver record vanished mid-run")
                    .await;
                return;
            }
            Err(e) => {
                error!(receiver = %receiver.address, error = %e, "Failed to re-read receiver");
                return;
            }
        };

        // Idempotence against re-entry: never re-send a resolved receiver.
        if current.status == ReceiverStatus::Sent.to_string() {
            return;
        }

        let Some(template) = self.load_template().await else {
            self.abandon_receiver(receiver, "Campaign or template vanished mid-run")
                .await;
            return;
        };

        match self.retry.send_with_retry(&current, &template, None).await {
            Ok(SendOutcome::Success(_sender)) => {
                self.commit(receiver, true).await;
            }
            Ok(SendOutcome::Exhausted(reason)) => {
                warn!(receiver = %receiver.address, %reason, "Delivery exhausted");
                self.commit(receiver, false).await;
            }
            Err(e) => {
                // Store failure mid-send: abort this receiver's commit and
                // move on.
                error!(receiver = %receiver.address, error = %e, "Store error during delivery");
                self.commit(receiver, false).await;
            }
        }
    }

    /// Resolve the campaign's bound template, if both still exist
    async fn load_template(&self) -> Option<Template> {
        let campaign = self.store.campaign(self.campaign_id).await.ok()??;
        let template_id = campaign.template_id?;
        self.store.template(template_id).await.ok()?
    }

    /// Mark the receiver and bump the campaign counters
    async fn commit(&self, receiver: &Receiver, sent: bool) {
        let mark = if sent {
            self.store.mark_receiver_sent(receiver.id).await
        } else {
            self.store.mark_receiver_failed(receiver.id).await
        };
        if let Err(e) = mark {
            error!(receiver = %receiver.address, error = %e, "Failed to mark receiver");
            return;
        }

        if let Err(e) = self.store.record_send_result(self.campaign_id, sent).await {
            error!(campaign = %self.campaign_id, error = %e, "Failed to update campaign counters");
        }
    }

    /// A receiver that cannot be processed counts as failed
    async fn abandon_receiver(&self, receiver: &Receiver, reason: &str) {
        error!(receiver = %receiver.address, reason, "Abandoning receiver");
        let entry = NewLogEntry::error(format!(
            "{}. Receiver: {}, Campaign: {}",
            reason, receiver.address, self.campaign_id
        ))
        .with_receiver(&receiver.address)
        .with_status("failure");

        if let Err(e) = self.store.append_log(entry).await {
            error!(error = %e, "Failed to append log entry");
        }
        self.commit(receiver, false).await;
    }

    /// Transition the campaign to completed.
    ///
    /// A pause can land while the last delivery is in flight; the loop
    /// never observes the flag and the work is done, so completion takes
    /// precedence over the pause. A stop still wins: its target state is
    /// `Stopped`, which neither transition here matches.
    async fn complete_campaign(&self) -> volley_common::Result<Option<Campaign>> {
        if let Some(campaign) = self
            .store
            .transition_campaign(
                self.campaign_id,
                CampaignStatus::Running,
                CampaignStatus::Completed,
            )
            .await?
        {
            return Ok(Some(campaign));
        }
        self.store
            .transition_campaign(
                self.campaign_id,
                CampaignStatus::Paused,
                CampaignStatus::Completed,
            )
            .await
    }

    /// Natural loop exit: transition to completed and emit the lifecycle
    /// event
    async fn finish(&self) {
        let campaign = match self.complete_campaign().await {
            Ok(Some(campaign)) => campaign,
            Ok(None) => {
                // A stop owns the final state.
                warn!(campaign = %self.campaign_id, "Campaign was not active at loop exit");
                return;
            }
            Err(e) => {
                error!(campaign = %self.campaign_id, error = %e, "Failed to complete campaign");
                return;
            }
        };

        info!(campaign = %campaign.name, "Campaign completed");

        let entry = NewLogEntry::info(format!("Campaign \"{}\" completed.", campaign.name))
            .with_status("completed");
        if let Err(e) = self.store.append_log(entry).await {
            error!(error = %e, "Failed to append log entry");
        }

        let event = LifecycleEvent::Completed {
            name: campaign.name.clone(),
        };
        if let Err(e) = self.notifier.notify(&event).await {
            warn!(error = %e, "Lifecycle notification failed");
        }
    }
}

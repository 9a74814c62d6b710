//! Retry controller - bounded backoff around the delivery executor
//!
//! Transient transport errors are retried with a freshly drawn sender;
//! running out of sender capacity is terminal for the receiver and is not
//! retried. All waits happen on the calling campaign's own task.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};
use volley_common::config::DispatchConfig;
use volley_common::Result;
use volley_storage::models::{Receiver, SenderAccount, Template};
use volley_storage::store::{NewLogEntry, RecordStore};

use super::allocator::{AllocError, SenderAllocator};
use super::delivery::{DeliveryExecutor, DeliveryOutcome};

/// Retry ceiling and backoff shape
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total delivery attempts (1 initial + retries)
    pub max_attempts: u32,
    /// Attempt n sleeps `backoff_base * (n + 1)` before retrying
    pub backoff_base: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            backoff_base: Duration::from_secs(5),
        }
    }
}

impl From<&DispatchConfig> for RetryPolicy {
    fn from(config: &DispatchConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            backoff_base: Duration::from_secs(config.backoff_base_secs),
        }
    }
}

/// Outcome of the full retry sequence for one receiver
#[derive(Debug, Clone)]
pub enum SendOutcome {
    /// Delivered; carries the account that carried the message
    Success(SenderAccount),
    /// All attempts failed or no capacity remained; carries the last reason
    Exhausted(String),
}

/// Wraps the delivery executor with the recovery policy
pub struct RetryController {
    store: Arc<dyn RecordStore>,
    allocator: SenderAllocator,
    executor: DeliveryExecutor,
    policy: RetryPolicy,
}

impl RetryController {
    pub fn new(
        store: Arc<dyn RecordStore>,
        allocator: SenderAllocator,
        executor: DeliveryExecutor,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            store,
            allocator,
            executor,
            policy,
        }
    }

    /// Deliver to one receiver, retrying transport failures with backoff.
    ///
    /// Attempt 0 uses `preferred` when it still has quota; every retry
    /// draws a fresh sender, which may repeat the failed one unless it has
    /// gone over its limit in the meantime.
    pub async fn send_with_retry(
        &self,
        receiver: &Receiver,
        template: &Template,
        preferred: Option<&SenderAccount>,
    ) -> Result<SendOutcome> {
        for attempt in 0..self.policy.max_attempts {
            let sender = match self.acquire_sender(attempt, preferred).await {
                Ok(sender) => sender,
                Err(AllocError::NotAvailable) => {
                    // Structural failure: no capacity exists, so waiting
                    // cannot help.
                    let reason = AllocError::NotAvailable.to_string();
                    self.store
                        .append_log(
                            NewLogEntry::error(&reason)
                                .with_receiver(&receiver.address)
                                .with_status("failure"),
                        )
                        .await?;
                    return Ok(SendOutcome::Exhausted(reason));
                }
                Err(AllocError::Store(e)) => return Err(e),
            };

            match self.executor.deliver(receiver, template, &sender).await {
                DeliveryOutcome::Delivered => {
                    // The mail is on the wire; a failed audit write must
                    // not turn a delivered receiver into a failed one.
                    let entry = NewLogEntry::info(format!(
                        "Email sent to {} from {}",
                        receiver.address, sender.address
                    ))
                    .with_sender(&sender.address)
                    .with_receiver(&receiver.address)
                    .with_status("success");
                    if let Err(e) = self.store.append_log(entry).await {
                        warn!(
                            receiver = %receiver.address,
                            error = %e,
                            "Failed to record delivery in audit log"
                        );
                    }
                    return Ok(SendOutcome::Success(sender));
                }
                DeliveryOutcome::TransportError(reason) => {
                    self.allocator.release(sender.id).await.map_err(store_err)?;
                    warn!(
                        receiver = %receiver.address,
                        sender = %sender.address,
                        attempt,
                        %reason,
                        "Delivery attempt failed"
                    );
                    self.store
                        .append_log(
                            NewLogEntry::error(format!(
                                "Failed to send email to {} from {}: {}",
                                receiver.address, sender.address, reason
                            ))
                            .with_sender(&sender.address)
                            .with_receiver(&receiver.address)
                            .with_status("failure")
                            .with_error_reason(&reason),
                        )
                        .await?;

                    if attempt + 1 == self.policy.max_attempts {
                        return Ok(SendOutcome::Exhausted(reason));
                    }

                    let backoff = self.policy.backoff_base * (attempt + 1);
                    debug!(receiver = %receiver.address, ?backoff, "Backing off before retry");
                    sleep(backoff).await;
                }
            }
        }

        // max_attempts >= 1 always returns inside the loop
        Ok(SendOutcome::Exhausted("No delivery attempts made".to_string()))
    }

    async fn acquire_sender(
        &self,
        attempt: u32,
        preferred: Option<&SenderAccount>,
    ) -> std::result::Result<SenderAccount, AllocError> {
        if attempt == 0 {
            if let Some(preferred) = preferred {
                if self
                    .store
                    .consume_sender_quota(preferred.id)
                    .await
                    .map_err(AllocError::Store)?
                {
                    return Ok(preferred.clone());
                }
            }
        }
        self.allocator.allocate(&HashSet::new()).await
    }
}

fn store_err(e: AllocError) -> volley_common::Error {
    match e {
        AllocError::Store(e) => e,
        AllocError::NotAvailable => volley_common::Error::Internal(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicU32, Ordering};
    use uuid::Uuid;
    use volley_storage::store::{NewCampaign, NewReceiver, NewSender, NewTemplate};
    use volley_storage::MemoryStore;

    use crate::credentials::CredentialCodec;
    use crate::dispatch::delivery::{Mailer, OutboundEmail};

    /// Fails the first `failures` sends, then succeeds
    struct FlakyMailer {
        failures: u32,
        attempts: AtomicU32,
    }

    impl FlakyMailer {
        fn new(failures: u32) -> Self {
            Self {
                failures,
                attempts: AtomicU32::new(0),
            }
        }

        fn attempts(&self) -> u32 {
            self.attempts.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Mailer for FlakyMailer {
        async fn send(&self, _email: &OutboundEmail) -> anyhow::Result<()> {
            let n = self.attempts.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                anyhow::bail!("421 service not available")
            }
            Ok(())
        }
    }

    fn codec() -> CredentialCodec {
        use base64::{engine::general_purpose::STANDARD, Engine};
        CredentialCodec::new(&STANDARD.encode([3u8; 32])).unwrap()
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 4,
            backoff_base: Duration::from_millis(1),
        }
    }

    struct Fixture {
        store: Arc<MemoryStore>,
        receiver: Receiver,
        template: Template,
    }

    async fn fixture(sender_limit: i32) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let campaign = store
            .create_campaign(NewCampaign {
                name: "test".to_string(),
            })
            .await
            .unwrap();
        let receiver = store
            .add_receiver(NewReceiver {
                campaign_id: campaign.id,
                address: "jane@example.com".to_string(),
            })
            .await
            .unwrap();
        let template = store
            .create_template(NewTemplate {
                name: "t".to_string(),
                subject: "Hi".to_string(),
                html_body: "<p>Hi {name}</p>".to_string(),
                plain_body: None,
            })
            .await
            .unwrap();
        if sender_limit > 0 {
            store
                .create_sender(NewSender {
                    address: "out@example.com".to_string(),
                    password_encrypted: codec().encode("pw").unwrap(),
                    sending_limit: sender_limit,
                })
                .await
                .unwrap();
        }
        Fixture {
            store,
            receiver,
            template,
        }
    }

    fn controller(store: Arc<MemoryStore>, mailer: Arc<dyn Mailer>) -> RetryController {
        let store: Arc<dyn RecordStore> = store;
        RetryController::new(
            store.clone(),
            SenderAllocator::new(store.clone()),
            DeliveryExecutor::new(mailer, codec()),
            fast_policy(),
        )
    }

    #[tokio::test]
    async fn test_always_failing_transport_makes_exactly_max_attempts() {
        let fx = fixture(100).await;
        let mailer = Arc::new(FlakyMailer::new(u32::MAX));
        let retry = controller(fx.store.clone(), mailer.clone());

        let outcome = retry
            .send_with_retry(&fx.receiver, &fx.template, None)
            .await
            .unwrap();

        assert!(matches!(outcome, SendOutcome::Exhausted(_)));
        assert_eq!(mailer.attempts(), 4);

        // Every failed attempt released its quota slot.
        let senders = fx.store.eligible_senders().await.unwrap();
        assert_eq!(senders[0].sent_count, 0);
    }

    #[tokio::test]
    async fn test_success_on_attempt_k_stops_there() {
        let fx = fixture(100).await;
        let mailer = Arc::new(FlakyMailer::new(2));
        let retry = controller(fx.store.clone(), mailer.clone());

        let outcome = retry
            .send_with_retry(&fx.receiver, &fx.template, None)
            .await
            .unwrap();

        assert!(matches!(outcome, SendOutcome::Success(_)));
        assert_eq!(mailer.attempts(), 3);

        // Two failures released, one success kept its slot.
        let senders = fx.store.eligible_senders().await.unwrap();
        assert_eq!(senders[0].sent_count, 1);
    }

    #[tokio::test]
    async fn test_no_capacity_is_immediately_exhausted() {
        let fx = fixture(0).await;
        let mailer = Arc::new(FlakyMailer::new(0));
        let retry = controller(fx.store.clone(), mailer.clone());

        let outcome = retry
            .send_with_retry(&fx.receiver, &fx.template, None)
            .await
            .unwrap();

        assert!(matches!(outcome, SendOutcome::Exhausted(_)));
        assert_eq!(mailer.attempts(), 0);
    }

    #[tokio::test]
    async fn test_preferred_sender_used_on_first_attempt() {
        let fx = fixture(0).await;
        let preferred = fx
            .store
            .create_sender(NewSender {
                address: "preferred@example.com".to_string(),
                password_encrypted: codec().encode("pw").unwrap(),
                sending_limit: 10,
            })
            .await
            .unwrap();

        let mailer = Arc::new(FlakyMailer::new(0));
        let retry = controller(fx.store.clone(), mailer.clone());

        let outcome = retry
            .send_with_retry(&fx.receiver, &fx.template, Some(&preferred))
            .await
            .unwrap();

        match outcome {
            SendOutcome::Success(sender) => assert_eq!(sender.id, preferred.id),
            other => panic!("expected success, got {:?}", other),
        }
        assert_eq!(mailer.attempts(), 1);
    }

    #[tokio::test]
    async fn test_exhausted_preferred_falls_back_to_allocator() {
        let fx = fixture(10).await;
        let spent = SenderAccount {
            id: Uuid::new_v4(),
            address: "spent@example.com".to_string(),
            password_encrypted: codec().encode("pw").unwrap(),
            sent_count: 5,
            sending_limit: 5,
            created_at: Utc::now(),
        };

        let mailer = Arc::new(FlakyMailer::new(0));
        let retry = controller(fx.store.clone(), mailer.clone());

        let outcome = retry
            .send_with_retry(&fx.receiver, &fx.template, Some(&spent))
            .await
            .unwrap();

        match outcome {
            SendOutcome::Success(sender) => assert_eq!(sender.address, "out@example.com"),
            other => panic!("expected success, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_outcomes_are_logged() {
        let fx = fixture(100).await;
        let mailer = Arc::new(FlakyMailer::new(1));
        let retry = controller(fx.store.clone(), mailer.clone());

        retry
            .send_with_retry(&fx.receiver, &fx.template, None)
            .await
            .unwrap();

        let logs = fx.store.logs(10).await.unwrap();
        assert_eq!(logs.len(), 2);
        // Most recent first: the success entry, then the failure.
        assert_eq!(logs[0].level, "INFO");
        assert_eq!(logs[0].status.as_deref(), Some("success"));
        assert_eq!(logs[1].level, "ERROR");
        assert!(logs[1].error_reason.as_deref().unwrap().contains("421"));
    }

    /// Delegates everything except `append_log`, which always fails
    struct NoAuditStore {
        inner: Arc<MemoryStore>,
    }

    #[async_trait]
    impl RecordStore for NoAuditStore {
        async fn create_campaign(
            &self,
            input: volley_storage::store::NewCampaign,
        ) -> volley_common::Result<volley_storage::models::Campaign> {
            self.inner.create_campaign(input).await
        }

        async fn campaign(
            &self,
            id: volley_common::types::CampaignId,
        ) -> volley_common::Result<Option<volley_storage::models::Campaign>> {
            self.inner.campaign(id).await
        }

        async fn list_campaigns(
            &self,
        ) -> volley_common::Result<Vec<volley_storage::models::Campaign>> {
            self.inner.list_campaigns().await
        }

        async fn mark_campaign_started(
            &self,
            id: volley_common::types::CampaignId,
            template_id: volley_common::types::TemplateId,
        ) -> volley_common::Result<Option<volley_storage::models::Campaign>> {
            self.inner.mark_campaign_started(id, template_id).await
        }

        async fn transition_campaign(
            &self,
            id: volley_common::types::CampaignId,
            from: volley_storage::models::CampaignStatus,
            to: volley_storage::models::CampaignStatus,
        ) -> volley_common::Result<Option<volley_storage::models::Campaign>> {
            self.inner.transition_campaign(id, from, to).await
        }

        async fn record_send_result(
            &self,
            id: volley_common::types::CampaignId,
            sent: bool,
        ) -> volley_common::Result<()> {
            self.inner.record_send_result(id, sent).await
        }

        async fn reconcile_interrupted_campaigns(&self) -> volley_common::Result<u64> {
            self.inner.reconcile_interrupted_campaigns().await
        }

        async fn add_receiver(
            &self,
            input: volley_storage::store::NewReceiver,
        ) -> volley_common::Result<Receiver> {
            self.inner.add_receiver(input).await
        }

        async fn pending_receivers(
            &self,
            campaign_id: volley_common::types::CampaignId,
        ) -> volley_common::Result<Vec<Receiver>> {
            self.inner.pending_receivers(campaign_id).await
        }

        async fn receiver(
            &self,
            id: volley_common::types::ReceiverId,
        ) -> volley_common::Result<Option<Receiver>> {
            self.inner.receiver(id).await
        }

        async fn mark_receiver_sent(
            &self,
            id: volley_common::types::ReceiverId,
        ) -> volley_common::Result<()> {
            self.inner.mark_receiver_sent(id).await
        }

        async fn mark_receiver_failed(
            &self,
            id: volley_common::types::ReceiverId,
        ) -> volley_common::Result<()> {
            self.inner.mark_receiver_failed(id).await
        }

        async fn create_sender(
            &self,
            input: volley_storage::store::NewSender,
        ) -> volley_common::Result<SenderAccount> {
            self.inner.create_sender(input).await
        }

        async fn sender_count(&self) -> volley_common::Result<i64> {
            self.inner.sender_count().await
        }

        async fn eligible_senders(&self) -> volley_common::Result<Vec<SenderAccount>> {
            self.inner.eligible_senders().await
        }

        async fn consume_sender_quota(
            &self,
            id: volley_common::types::SenderId,
        ) -> volley_common::Result<bool> {
            self.inner.consume_sender_quota(id).await
        }

        async fn release_sender_quota(
            &self,
            id: volley_common::types::SenderId,
        ) -> volley_common::Result<()> {
            self.inner.release_sender_quota(id).await
        }

        async fn create_template(
            &self,
            input: volley_storage::store::NewTemplate,
        ) -> volley_common::Result<Template> {
            self.inner.create_template(input).await
        }

        async fn template(
            &self,
            id: volley_common::types::TemplateId,
        ) -> volley_common::Result<Option<Template>> {
            self.inner.template(id).await
        }

        async fn active_template(&self) -> volley_common::Result<Option<Template>> {
            self.inner.active_template().await
        }

        async fn activate_template(
            &self,
            id: volley_common::types::TemplateId,
        ) -> volley_common::Result<bool> {
            self.inner.activate_template(id).await
        }

        async fn append_log(&self, _entry: NewLogEntry) -> volley_common::Result<()> {
            Err(volley_common::Error::Database(
                "log table unavailable".to_string(),
            ))
        }

        async fn logs(
            &self,
            limit: i64,
        ) -> volley_common::Result<Vec<volley_storage::models::LogEntry>> {
            self.inner.logs(limit).await
        }

        async fn clear_logs(&self) -> volley_common::Result<u64> {
            self.inner.clear_logs().await
        }
    }

    #[tokio::test]
    async fn test_delivery_succeeds_even_when_audit_write_fails() {
        let fx = fixture(100).await;
        let store: Arc<dyn RecordStore> = Arc::new(NoAuditStore {
            inner: fx.store.clone(),
        });
        let mailer = Arc::new(FlakyMailer::new(0));
        let retry = RetryController::new(
            store.clone(),
            SenderAllocator::new(store.clone()),
            DeliveryExecutor::new(mailer.clone(), codec()),
            fast_policy(),
        );

        let outcome = retry
            .send_with_retry(&fx.receiver, &fx.template, None)
            .await
            .unwrap();

        // The mail went out; the unrecordable audit entry must not demote
        // the outcome, or a later re-start would re-send the receiver.
        assert!(matches!(outcome, SendOutcome::Success(_)));
        assert_eq!(mailer.attempts(), 1);
        let senders = fx.store.eligible_senders().await.unwrap();
        assert_eq!(senders[0].sent_count, 1);
    }
}

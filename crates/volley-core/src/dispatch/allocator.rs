//! Sender allocator - picks an account for an attempt, enforcing quota
//!
//! Selection is uniformly random across accounts with remaining quota,
//! which spreads load without round-robin bookkeeping. The chosen slot is
//! claimed through the store's conditional increment, so a draw that loses
//! a race against a concurrent campaign is simply retried.

use rand::seq::SliceRandom;
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;
use volley_common::types::SenderId;
use volley_storage::models::SenderAccount;
use volley_storage::store::RecordStore;

/// Allocation errors
#[derive(Error, Debug)]
pub enum AllocError {
    /// No account under quota remains; terminal for the current receiver
    #[error("No sender accounts with remaining sending limits")]
    NotAvailable,

    #[error(transparent)]
    Store(#[from] volley_common::Error),
}

/// Picks an eligible sender account and claims one quota slot on it
pub struct SenderAllocator {
    store: Arc<dyn RecordStore>,
}

impl SenderAllocator {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    /// Allocate a sender, excluding the given account ids.
    ///
    /// On success one quota slot on the returned account has been consumed;
    /// the caller must release it if the delivery attempt fails.
    pub async fn allocate(
        &self,
        excluding: &HashSet<SenderId>,
    ) -> Result<SenderAccount, AllocError> {
        // Accounts that lose the claim race are ruled out locally and the
        // draw repeats over the rest.
        let mut ruled_out: HashSet<SenderId> = excluding.clone();

        loop {
            let candidates: Vec<SenderAccount> = self
                .store
                .eligible_senders()
                .await?
                .into_iter()
                .filter(|s| !ruled_out.contains(&s.id))
                .collect();

            let Some(choice) = candidates.choose(&mut rand::thread_rng()).cloned() else {
                return Err(AllocError::NotAvailable);
            };

            if self.store.consume_sender_quota(choice.id).await? {
                debug!(sender = %choice.address, "Allocated sender account");
                return Ok(choice);
            }

            debug!(sender = %choice.address, "Sender hit its limit concurrently, redrawing");
            ruled_out.insert(choice.id);
        }
    }

    /// Return a previously claimed slot after a failed attempt
    pub async fn release(&self, id: SenderId) -> Result<(), AllocError> {
        self.store.release_sender_quota(id).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use volley_storage::store::NewSender;
    use volley_storage::MemoryStore;

    async fn seed_sender(store: &MemoryStore, address: &str, limit: i32) -> SenderAccount {
        store
            .create_sender(NewSender {
                address: address.to_string(),
                password_encrypted: "sealed".to_string(),
                sending_limit: limit,
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_allocate_claims_quota() {
        let store = Arc::new(MemoryStore::new());
        let sender = seed_sender(&store, "a@example.com", 3).await;

        let allocator = SenderAllocator::new(store.clone());
        let chosen = allocator.allocate(&HashSet::new()).await.unwrap();
        assert_eq!(chosen.id, sender.id);

        let remaining = store.eligible_senders().await.unwrap();
        assert_eq!(remaining[0].sent_count, 1);
    }

    #[tokio::test]
    async fn test_never_selects_exhausted_sender() {
        let store = Arc::new(MemoryStore::new());
        let spent = seed_sender(&store, "spent@example.com", 1).await;
        let fresh = seed_sender(&store, "fresh@example.com", 10).await;
        store.consume_sender_quota(spent.id).await.unwrap();

        let allocator = SenderAllocator::new(store.clone());
        for _ in 0..10 {
            let chosen = allocator.allocate(&HashSet::new()).await.unwrap();
            assert_eq!(chosen.id, fresh.id);
            allocator.release(chosen.id).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_not_available_when_everything_excluded() {
        let store = Arc::new(MemoryStore::new());
        let only = seed_sender(&store, "only@example.com", 5).await;

        let allocator = SenderAllocator::new(store.clone());
        let excluding: HashSet<SenderId> = [only.id].into_iter().collect();
        assert!(matches!(
            allocator.allocate(&excluding).await,
            Err(AllocError::NotAvailable)
        ));
    }

    #[tokio::test]
    async fn test_not_available_when_no_quota_left() {
        let store = Arc::new(MemoryStore::new());
        let sender = seed_sender(&store, "a@example.com", 2).await;
        store.consume_sender_quota(sender.id).await.unwrap();
        store.consume_sender_quota(sender.id).await.unwrap();

        let allocator = SenderAllocator::new(store.clone());
        assert!(matches!(
            allocator.allocate(&HashSet::new()).await,
            Err(AllocError::NotAvailable)
        ));
    }

    #[tokio::test]
    async fn test_concurrent_allocations_respect_limit() {
        let store = Arc::new(MemoryStore::new());
        seed_sender(&store, "a@example.com", 5).await;

        let allocator = Arc::new(SenderAllocator::new(store.clone()));
        let mut handles = Vec::new();
        for _ in 0..10 {
            let allocator = allocator.clone();
            handles.push(tokio::spawn(async move {
                allocator.allocate(&HashSet::new()).await.is_ok()
            }));
        }

        let mut granted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                granted += 1;
            }
        }
        assert_eq!(granted, 5);
    }
}

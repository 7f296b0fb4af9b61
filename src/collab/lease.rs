use crate::collab::WorkerId;
use crate::store::{CoordinationStore, lease_key};
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;

/// Per-message exclusivity between the owners of a slot.
///
/// Leases are never released. They expire `ttl` after being taken.
pub struct LeaseCoordinator<S> {
    store: Arc<S>,
}

impl<S: CoordinationStore> LeaseCoordinator<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Returns `true` iff this call created the lease. A single conditional set, never
    /// read-then-write.
    pub async fn try_acquire(
        &self,
        key: &str,
        worker_id: &WorkerId,
        ttl: Duration,
    ) -> Result<bool> {
        self.store
            .set_if_absent(&lease_key(key), worker_id.as_str(), ttl)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;

    const TTL: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn test_first_claim_wins() -> Result<()> {
        let store = Arc::new(MemoryStore::new());
        let leases = LeaseCoordinator::new(store.clone());

        assert!(leases.try_acquire("m1", &WorkerId::from("W1"), TTL).await?);
        assert!(!leases.try_acquire("m1", &WorkerId::from("W2"), TTL).await?);
        // Not reentrant either
        assert!(!leases.try_acquire("m1", &WorkerId::from("W1"), TTL).await?);

        assert_eq!(store.value(&lease_key("m1")).as_deref(), Some("W1"));

        Ok(())
    }

    #[tokio::test]
    async fn test_concurrent_claims_have_one_winner() -> Result<()> {
        let store = Arc::new(MemoryStore::new());
        let leases = Arc::new(LeaseCoordinator::new(store));

        let attempts = ["W1", "W2", "W3"].map(|worker| {
            let leases = leases.clone();
            tokio::spawn(async move {
                leases
                    .try_acquire("m1", &WorkerId::from(worker), TTL)
                    .await
            })
        });

        let mut winners = 0;
        for attempt in attempts {
            if attempt.await?? {
                winners += 1;
            }
        }

        assert_eq!(winners, 1);

        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_lease_is_reclaimed_by_expiry() -> Result<()> {
        let store = Arc::new(MemoryStore::new());
        let leases = LeaseCoordinator::new(store);
        let ttl = Duration::from_secs(5);

        assert!(leases.try_acquire("m1", &WorkerId::from("W1"), ttl).await?);

        tokio::time::advance(Duration::from_secs(4)).await;
        assert!(!leases.try_acquire("m1", &WorkerId::from("W2"), ttl).await?);

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(leases.try_acquire("m1", &WorkerId::from("W2"), ttl).await?);

        Ok(())
    }

    #[tokio::test]
    async fn test_keys_are_independent() -> Result<()> {
        let store = Arc::new(MemoryStore::new());
        let leases = LeaseCoordinator::new(store);

        assert!(leases.try_acquire("m1", &WorkerId::from("W1"), TTL).await?);
        assert!(leases.try_acquire("m2", &WorkerId::from("W2"), TTL).await?);

        Ok(())
    }

    #[tokio::test]
    async fn test_store_failure_is_an_error() {
        let store = Arc::new(MemoryStore::new());
        let leases = LeaseCoordinator::new(store.clone());
        store.set_unavailable(true);

        assert!(leases.try_acquire("m1", &WorkerId::from("W1"), TTL).await.is_err());
    }
}

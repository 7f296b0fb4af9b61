use crate::collab::heartbeat::HeartbeatManager;
use crate::collab::{LiveSet, WorkerId};
use crate::store::{CoordinationStore, ROSTER_KEY, heartbeat_key};
use anyhow::{Result, anyhow};
use futures::{StreamExt, stream};
use itertools::Itertools;
use log::{error, info, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::watch::{self, Receiver, Sender};
use tokio::time::{self, Instant};

/// Freshness checks issued concurrently during one reconciliation
const FRESHNESS_CHECK_CONCURRENCY: usize = 16;

/// Tracks which workers are alive and publishes the live set whenever it changes.
pub struct MembershipTracker<S> {
    worker_id: WorkerId,
    store: Arc<S>,
    heartbeat: Arc<HeartbeatManager<S>>,
    interval: Duration,
    initial_delay: Duration,
    announced: AtomicBool,
}

impl<S: CoordinationStore> MembershipTracker<S> {
    /// `initial_delay` should be at least one full heartbeat TTL, otherwise a fleet that
    /// starts together evicts members whose first heartbeat has not landed yet.
    pub fn new(
        worker_id: WorkerId,
        store: Arc<S>,
        heartbeat: Arc<HeartbeatManager<S>>,
        interval: Duration,
        initial_delay: Duration,
    ) -> Self {
        Self {
            worker_id,
            store,
            heartbeat,
            interval,
            initial_delay,
            announced: AtomicBool::new(false),
        }
    }

    /// Joins the roster. Only the first call has an effect.
    pub async fn announce(&self) -> Result<()> {
        if self.announced.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        // A peer must never see us in the roster without a fresh heartbeat
        let result = async {
            self.heartbeat.send_heartbeat().await?;
            self.store
                .list_push(ROSTER_KEY, self.worker_id.as_str())
                .await
        }
        .await;

        if let Err(e) = result {
            self.announced.store(false, Ordering::SeqCst);
            return Err(e);
        }

        info!("{} - Registered", self.worker_id);

        Ok(())
    }

    /// Leaves the roster and drops the heartbeat. Safe to call more than once.
    pub async fn withdraw(&self) -> Result<()> {
        self.announced.store(false, Ordering::SeqCst);

        self.store
            .list_remove(ROSTER_KEY, self.worker_id.as_str())
            .await?;
        self.heartbeat.clear().await?;

        info!("{} - Deregistered", self.worker_id);

        Ok(())
    }

    /// [`Self::withdraw`] that gives up after `limit`.
    pub async fn withdraw_within(&self, limit: Duration) -> Result<()> {
        time::timeout(limit, self.withdraw())
            .await
            .map_err(|_| anyhow!("timed out leaving the roster after {limit:?}"))?
    }

    /// Roster entries whose heartbeat is gone.
    ///
    /// Each entry is checked on its own; an entry whose check fails is kept until a later
    /// round can tell.
    async fn find_dead(&self, roster: &[String]) -> Vec<WorkerId> {
        let checks: Vec<_> = roster
            .iter()
            .unique()
            .map(|worker_id| {
                let store = self.store.clone();
                let worker_id = WorkerId::from(worker_id.as_str());
                let key = heartbeat_key(&worker_id);

                async move {
                    let alive = store.exists(&key).await;
                    (worker_id, alive)
                }
            })
            .collect();

        let results: Vec<_> = stream::iter(checks)
            .buffer_unordered(FRESHNESS_CHECK_CONCURRENCY)
            .collect()
            .await;

        results
            .into_iter()
            .filter_map(|(worker_id, alive)| match alive {
                Ok(true) => None,
                Ok(false) => Some(worker_id),
                Err(e) => {
                    warn!("freshness check for {worker_id} failed: {e}");
                    None
                }
            })
            .collect()
    }

    /// Puts this worker back on the roster if it was evicted while still running.
    async fn rejoin_if_evicted(&self) -> Result<()> {
        if !self.announced.load(Ordering::SeqCst) {
            return Ok(());
        }

        let roster = self.store.list_range(ROSTER_KEY).await?;
        if roster.iter().any(|id| id == self.worker_id.as_str()) {
            return Ok(());
        }

        self.heartbeat.send_heartbeat().await?;
        self.store
            .list_push(ROSTER_KEY, self.worker_id.as_str())
            .await?;

        warn!("{} - Missing from {ROSTER_KEY}, registered again", self.worker_id);

        Ok(())
    }

    /// Reads the roster and publishes it if it differs from the last published live set.
    async fn publish_roster(&self, tx: &Sender<LiveSet>) -> Result<bool> {
        let live_set: LiveSet = self
            .store
            .list_range(ROSTER_KEY)
            .await?
            .into_iter()
            .map(WorkerId::from)
            .collect();

        let changed = tx.send_if_modified(|current| {
            if *current == live_set {
                return false;
            }

            info!(
                "Detected live set change: old=[{}], new=[{}]",
                current.iter().join(", "),
                live_set.iter().join(", ")
            );
            *current = live_set;
            true
        });

        Ok(changed)
    }

    /// Evicts workers whose heartbeat expired, then publishes the resulting live set.
    pub async fn reconcile(&self, tx: &Sender<LiveSet>) -> Result<bool> {
        let roster = self.store.list_range(ROSTER_KEY).await?;

        for worker_id in self.find_dead(&roster).await {
            match self.store.list_remove(ROSTER_KEY, worker_id.as_str()).await {
                Ok(()) => info!("Removed inactive worker {worker_id} from {ROSTER_KEY}"),
                Err(e) => error!("failed to remove inactive worker {worker_id}: {e}"),
            }
        }

        self.rejoin_if_evicted().await?;

        self.publish_roster(tx).await
    }

    pub fn start(self: Arc<Self>) -> (impl FnOnce(), Receiver<LiveSet>) {
        let (tx, rx) = watch::channel(LiveSet::new());

        let task = tokio::spawn(async move {
            // Adopt the current roster right away; eviction waits for the first full TTL
            if let Err(e) = self.publish_roster(&tx).await {
                error!("error reading roster: {e}");
            }

            let mut ticker = time::interval_at(Instant::now() + self.initial_delay, self.interval);

            loop {
                ticker.tick().await;

                if let Err(e) = self.reconcile(&tx).await {
                    error!("error reconciling roster: {e}");
                }
            }
        });

        let close_function = move || {
            task.abort();
            info!("MembershipTracker stopped");
        };

        info!("MembershipTracker started");

        (close_function, rx)
    }
}

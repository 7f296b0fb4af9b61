use crate::collab::WorkerId;
use crate::store::{CoordinationStore, heartbeat_key};
use anyhow::Result;
use chrono::Utc;
use log::{debug, error, info};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

async fn send_heartbeat<S: CoordinationStore>(
    store: &S,
    worker_id: &WorkerId,
    ttl: Duration,
) -> Result<()> {
    let timestamp = Utc::now().to_rfc3339();

    store
        .set_with_ttl(&heartbeat_key(worker_id), &timestamp, ttl)
        .await?;

    debug!("Heartbeat for {worker_id} updated at {timestamp} with TTL {ttl:?}");

    Ok(())
}

/// Keeps this worker's heartbeat key alive.
///
/// The key expires `ttl` after the last refresh; its absence is how peers learn that this
/// worker died.
pub struct HeartbeatManager<S> {
    worker_id: WorkerId,
    store: Arc<S>,
    interval: Duration,
    ttl: Duration,
    task_handle: Mutex<Option<JoinHandle<()>>>,
}

impl<S: CoordinationStore> HeartbeatManager<S> {
    pub fn new(worker_id: WorkerId, store: Arc<S>, interval: Duration, ttl: Duration) -> Self {
        Self {
            worker_id,
            store,
            interval,
            ttl,
            task_handle: Mutex::new(None),
        }
    }

    pub async fn send_heartbeat(&self) -> Result<()> {
        send_heartbeat(self.store.as_ref(), &self.worker_id, self.ttl).await
    }

    /// Deletes the heartbeat key so peers can evict this worker right away.
    pub async fn clear(&self) -> Result<()> {
        self.store.delete(&heartbeat_key(&self.worker_id)).await
    }

    pub async fn start(&self) {
        let mut handle = self.task_handle.lock().await;

        if handle.is_some() {
            return;
        }

        let worker_id = self.worker_id.clone();
        let store = self.store.clone();
        let interval = self.interval;
        let ttl = self.ttl;

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;

                let result = send_heartbeat(store.as_ref(), &worker_id, ttl).await;

                if let Err(e) = result {
                    error!("failed to send heartbeat: {e}");
                }
            }
        });

        *handle = Some(task);

        info!("HeartbeatManager started")
    }

    pub async fn stop(&self) {
        let mut handle = self.task_handle.lock().await;

        if let Some(task) = handle.take() {
            task.abort();
            info!("HeartbeatManager stopped")
        }
    }
}

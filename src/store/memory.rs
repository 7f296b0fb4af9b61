//! In-process coordination store used by tests.
//!
//! Keys expire on tokio's clock, so tests running with a paused clock can move time
//! forward deterministically.

use crate::error::ConsumerError;
use crate::metrics::MetricsSink;
use crate::store::CoordinationStore;
use anyhow::Result;
use futures::StreamExt;
use futures::stream::BoxStream;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tokio_stream::wrappers::BroadcastStream;

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self) -> bool {
        self.expires_at.is_none_or(|at| Instant::now() < at)
    }
}

#[derive(Default)]
struct State {
    values: HashMap<String, Entry>,
    lists: HashMap<String, Vec<String>>,
    streams: HashMap<String, Vec<Vec<(String, String)>>>,
    series: HashMap<String, Vec<(String, String)>>,
    samples: HashMap<String, Vec<(i64, f64)>>,
    writes: usize,
}

pub struct MemoryStore {
    state: Mutex<State>,
    published: broadcast::Sender<Vec<u8>>,
    unavailable: AtomicBool,
    stalled: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (published, _) = broadcast::channel(1024);

        Self {
            state: Mutex::new(State::default()),
            published,
            unavailable: AtomicBool::new(false),
            stalled: AtomicBool::new(false),
        }
    }

    /// Makes every following call fail with `StoreUnavailable` until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Makes every following call hang until reset, like a store that stopped answering.
    pub fn set_stalled(&self, stalled: bool) {
        self.stalled.store(stalled, Ordering::SeqCst);
    }

    pub fn publish(&self, payload: impl Into<Vec<u8>>) {
        let _ = self.published.send(payload.into());
    }

    pub fn value(&self, key: &str) -> Option<String> {
        let state = self.state.lock().unwrap();

        state
            .values
            .get(key)
            .filter(|entry| entry.is_live())
            .map(|entry| entry.value.clone())
    }

    pub fn list(&self, key: &str) -> Vec<String> {
        let state = self.state.lock().unwrap();

        state.lists.get(key).cloned().unwrap_or_default()
    }

    pub fn stream(&self, key: &str) -> Vec<Vec<(String, String)>> {
        let state = self.state.lock().unwrap();

        state.streams.get(key).cloned().unwrap_or_default()
    }

    pub fn series_labels(&self, key: &str) -> Option<Vec<(String, String)>> {
        let state = self.state.lock().unwrap();

        state.series.get(key).cloned()
    }

    pub fn samples(&self, key: &str) -> Vec<(i64, f64)> {
        let state = self.state.lock().unwrap();

        state.samples.get(key).cloned().unwrap_or_default()
    }

    /// Number of successful mutating calls so far.
    pub fn write_count(&self) -> usize {
        self.state.lock().unwrap().writes
    }

    async fn check_available(&self) -> Result<()> {
        if self.stalled.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }

        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ConsumerError::StoreUnavailable("simulated outage".to_string()).into());
        }

        Ok(())
    }
}

impl CoordinationStore for MemoryStore {
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        self.check_available().await?;
        let mut state = self.state.lock().unwrap();

        if state.values.get(key).is_some_and(|entry| entry.is_live()) {
            return Ok(false);
        }

        state.values.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        state.writes += 1;

        Ok(true)
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        self.check_available().await?;
        let mut state = self.state.lock().unwrap();

        state.values.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        state.writes += 1;

        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.check_available().await?;
        let state = self.state.lock().unwrap();

        Ok(state.values.get(key).is_some_and(|entry| entry.is_live()))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.check_available().await?;
        let mut state = self.state.lock().unwrap();

        state.values.remove(key);
        state.writes += 1;

        Ok(())
    }

    async fn list_range(&self, key: &str) -> Result<Vec<String>> {
        self.check_available().await?;

        Ok(self.list(key))
    }

    async fn list_push(&self, key: &str, value: &str) -> Result<()> {
        self.check_available().await?;
        let mut state = self.state.lock().unwrap();

        // Mirrors LPUSH: newest entry first
        state
            .lists
            .entry(key.to_string())
            .or_default()
            .insert(0, value.to_string());
        state.writes += 1;

        Ok(())
    }

    async fn list_remove(&self, key: &str, value: &str) -> Result<()> {
        self.check_available().await?;
        let mut state = self.state.lock().unwrap();

        if let Some(list) = state.lists.get_mut(key) {
            list.retain(|v| v != value);
        }
        state.writes += 1;

        Ok(())
    }

    async fn append(&self, stream: &str, fields: &[(&str, String)]) -> Result<String> {
        self.check_available().await?;
        let mut state = self.state.lock().unwrap();

        let entries = state.streams.entry(stream.to_string()).or_default();
        entries.push(
            fields
                .iter()
                .map(|(field, value)| (field.to_string(), value.clone()))
                .collect(),
        );
        let id = format!("{}-0", entries.len());
        state.writes += 1;

        Ok(id)
    }

    async fn subscribe(&self, _channel: &str) -> Result<BoxStream<'static, Vec<u8>>> {
        self.check_available().await?;

        let payloads = BroadcastStream::new(self.published.subscribe())
            .filter_map(|payload| async move { payload.ok() });

        Ok(payloads.boxed())
    }
}

impl MetricsSink for MemoryStore {
    async fn create_series(&self, key: &str, labels: &[(&str, &str)]) -> Result<()> {
        self.check_available().await?;
        let mut state = self.state.lock().unwrap();

        if state.series.contains_key(key) {
            anyhow::bail!("ERR TSDB: key already exists");
        }

        state.series.insert(
            key.to_string(),
            labels
                .iter()
                .map(|(name, value)| (name.to_string(), value.to_string()))
                .collect(),
        );

        Ok(())
    }

    async fn add_sample(&self, key: &str, timestamp_millis: i64, value: f64) -> Result<()> {
        self.check_available().await?;
        let mut state = self.state.lock().unwrap();

        state
            .samples
            .entry(key.to_string())
            .or_default()
            .push((timestamp_millis, value));

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_values_expire() -> Result<()> {
        let store = MemoryStore::new();

        store
            .set_with_ttl("k", "v", Duration::from_millis(100))
            .await?;
        assert!(store.exists("k").await?);

        tokio::time::advance(Duration::from_millis(101)).await;
        assert!(!store.exists("k").await?);

        // An expired key can be claimed again
        assert!(
            store
                .set_if_absent("k", "w", Duration::from_millis(100))
                .await?
        );

        Ok(())
    }

    #[tokio::test]
    async fn test_list_remove_drops_every_occurrence() -> Result<()> {
        let store = MemoryStore::new();

        store.list_push("roster", "W1").await?;
        store.list_push("roster", "W2").await?;
        store.list_push("roster", "W1").await?;

        store.list_remove("roster", "W1").await?;
        assert_eq!(store.list("roster"), vec!["W2".to_string()]);

        // Missing value is fine
        store.list_remove("roster", "W1").await?;

        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_store_never_answers() {
        let store = MemoryStore::new();
        store.set_stalled(true);

        let call = tokio::time::timeout(Duration::from_secs(5), store.exists("k")).await;
        assert!(call.is_err());
    }

    #[tokio::test]
    async fn test_outage_fails_calls() {
        let store = MemoryStore::new();
        store.set_unavailable(true);

        let err = store.list_range("roster").await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConsumerError>(),
            Some(ConsumerError::StoreUnavailable(_))
        ));
    }
}

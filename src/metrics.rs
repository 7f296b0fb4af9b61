//! Message outcome counters and their periodic export.

use crate::collab::WorkerId;
use anyhow::Result;
use chrono::Utc;
use log::{debug, error, info};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time;

/// Destination for exported samples (a time-series store in production).
pub trait MetricsSink: Send + Sync + 'static {
    fn create_series(
        &self,
        key: &str,
        labels: &[(&str, &str)],
    ) -> impl Future<Output = Result<()>> + Send;

    fn add_sample(
        &self,
        key: &str,
        timestamp_millis: i64,
        value: f64,
    ) -> impl Future<Output = Result<()>> + Send;
}

/// Counts since the last report plus running totals.
#[derive(Debug, Default)]
pub struct Metrics {
    processed: AtomicU64,
    failed: AtomicU64,
    skipped: AtomicU64,
    processed_total: AtomicU64,
    failed_total: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub processed: u64,
    pub failed: u64,
    pub skipped: u64,
    pub processed_total: u64,
    pub failed_total: u64,
}

impl Metrics {
    pub fn record_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        self.processed_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        self.failed_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    /// Current values without resetting anything.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            processed: self.processed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            processed_total: self.processed_total.load(Ordering::Relaxed),
            failed_total: self.failed_total.load(Ordering::Relaxed),
        }
    }

    /// Resets the window counters and returns what they held. Totals are untouched.
    pub fn take_window(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            processed: self.processed.swap(0, Ordering::Relaxed),
            failed: self.failed.swap(0, Ordering::Relaxed),
            skipped: self.skipped.swap(0, Ordering::Relaxed),
            processed_total: self.processed_total.load(Ordering::Relaxed),
            failed_total: self.failed_total.load(Ordering::Relaxed),
        }
    }
}

pub struct MetricsReporter<M> {
    worker_id: WorkerId,
    metrics: Arc<Metrics>,
    sink: Arc<M>,
    period: Duration,
}

impl<M: MetricsSink> MetricsReporter<M> {
    pub fn new(
        worker_id: WorkerId,
        metrics: Arc<Metrics>,
        sink: Arc<M>,
        period: Duration,
    ) -> Self {
        Self {
            worker_id,
            metrics,
            sink,
            period,
        }
    }

    fn processed_key(&self) -> String {
        format!("metrics:messages:processed:{}", self.worker_id)
    }

    fn failed_key(&self) -> String {
        format!("metrics:messages:failed:{}", self.worker_id)
    }

    /// Creates the labelled total series. Existing series are fine.
    pub async fn create_series(&self) {
        let worker_id = self.worker_id.to_string();
        let series = [
            (self.processed_key(), "messages:processed:count"),
            (self.failed_key(), "messages:failed:count"),
        ];

        for (key, metric) in series {
            let key = format!("{key}:count");
            let labels = [
                ("consumer", worker_id.as_str()),
                ("app", "redis"),
                ("metric", metric),
            ];

            if let Err(e) = self.sink.create_series(&key, &labels).await {
                debug!("time series {key} not created: {e}");
            }
        }
    }

    pub async fn report(&self) -> Result<MetricsSnapshot> {
        let snapshot = self.metrics.take_window();

        info!(
            "Messages processed: {}, failed: {}, skipped: {}",
            snapshot.processed, snapshot.failed, snapshot.skipped
        );

        let now = Utc::now().timestamp_millis();
        let processed_key = self.processed_key();
        let failed_key = self.failed_key();
        let processed_count = format!("{processed_key}:count");
        let processed_rate = format!("{processed_key}:rate");
        let failed_count = format!("{failed_key}:count");
        let failed_rate = format!("{failed_key}:rate");

        futures::try_join!(
            self.sink
                .add_sample(&processed_count, now, snapshot.processed_total as f64),
            self.sink.add_sample(&processed_rate, now, snapshot.processed as f64),
            self.sink
                .add_sample(&failed_count, now, snapshot.failed_total as f64),
            self.sink.add_sample(&failed_rate, now, snapshot.failed as f64),
        )?;

        Ok(snapshot)
    }

    pub fn start(self) -> impl FnOnce() {
        let task = tokio::spawn(async move {
            let mut ticker = time::interval(self.period);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                ticker.tick().await;

                if let Err(e) = self.report().await {
                    error!("failed to report metrics: {e}");
                }
            }
        });

        let close_function = move || {
            task.abort();
            info!("MetricsReporter stopped");
        };

        info!("MetricsReporter started");

        close_function
    }
}

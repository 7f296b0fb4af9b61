use crate::eager_env;
use anyhow::{Result, ensure};
use std::time::Duration;

/// Plain configuration values handed to every component constructor.
#[derive(Debug, Clone)]
pub struct Settings {
    pub redis_url: String,
    pub messages_channel: String,
    pub total_slots: usize,
    pub replica_count: usize,
    pub heartbeat_interval: Duration,
    pub allowed_missed_heartbeats: u32,
    pub lease_ttl: Duration,
    pub metrics_report_period: Duration,
    pub store_timeout: Duration,
    pub max_in_flight_messages: usize,
    pub max_processing_delay: Duration,
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        Self {
            redis_url: eager_env::REDIS_URL.clone(),
            messages_channel: eager_env::MESSAGES_CHANNEL.clone(),
            total_slots: *eager_env::TOTAL_SLOTS,
            replica_count: *eager_env::REPLICA_COUNT,
            heartbeat_interval: Duration::from_millis(*eager_env::HEARTBEAT_INTERVAL_MILLIS),
            allowed_missed_heartbeats: *eager_env::ALLOWED_MISSED_HEARTBEATS,
            lease_ttl: Duration::from_secs(*eager_env::LEASE_TTL_SECONDS),
            metrics_report_period: Duration::from_secs(*eager_env::METRICS_REPORT_PERIOD_SECONDS),
            store_timeout: Duration::from_millis(*eager_env::STORE_TIMEOUT_MILLIS),
            max_in_flight_messages: *eager_env::MAX_IN_FLIGHT_MESSAGES,
            max_processing_delay: Duration::from_millis(*eager_env::MAX_PROCESSING_DELAY_MILLIS),
        }
        .validate()
    }

    fn validate(self) -> Result<Self> {
        ensure!(self.total_slots > 0, "TOTAL_SLOTS must be positive");
        ensure!(self.replica_count > 0, "REPLICA_COUNT must be positive");
        ensure!(
            !self.heartbeat_interval.is_zero(),
            "HEARTBEAT_INTERVAL_MILLIS must be positive"
        );
        ensure!(
            self.allowed_missed_heartbeats > 0,
            "ALLOWED_MISSED_HEARTBEATS must be positive"
        );
        ensure!(!self.lease_ttl.is_zero(), "LEASE_TTL_SECONDS must be positive");
        ensure!(
            !self.metrics_report_period.is_zero(),
            "METRICS_REPORT_PERIOD_SECONDS must be positive"
        );
        ensure!(
            !self.store_timeout.is_zero(),
            "STORE_TIMEOUT_MILLIS must be positive"
        );
        ensure!(
            self.max_in_flight_messages > 0,
            "MAX_IN_FLIGHT_MESSAGES must be positive"
        );

        Ok(self)
    }

    /// How long a heartbeat stays visible without being refreshed.
    ///
    /// This is also the initial delay before the first roster reconciliation, so a freshly
    /// started fleet never evicts members whose first heartbeat has not landed yet.
    pub fn heartbeat_ttl(&self) -> Duration {
        self.heartbeat_interval * self.allowed_missed_heartbeats
    }
}

impl Settings {
    #[cfg(test)]
    pub fn example() -> Self {
        Self {
            redis_url: "redis://127.0.0.1:6379".to_string(),
            messages_channel: "messages:published".to_string(),
            total_slots: 4,
            replica_count: 2,
            heartbeat_interval: Duration::from_millis(100),
            allowed_missed_heartbeats: 3,
            lease_ttl: Duration::from_secs(60),
            metrics_report_period: Duration::from_secs(5),
            store_timeout: Duration::from_secs(1),
            max_in_flight_messages: 8,
            max_processing_delay: Duration::ZERO,
        }
    }
}

//! Access to the shared coordination store.
//!
//! Every piece of cross-worker coordination goes through this trait: conditional set for
//! leases, set-with-ttl for heartbeats, list add/remove for the roster, pub/sub for ingress
//! and an append-only stream for results. Nothing else is shared between workers.

#[cfg(test)]
pub mod memory;
pub mod redis_store;

use crate::collab::WorkerId;
use anyhow::Result;
use futures::stream::BoxStream;
use std::time::Duration;

pub const ROSTER_KEY: &str = "consumer:ids";
pub const RESULTS_STREAM: &str = "messages:processed";

const HEARTBEAT_PREFIX: &str = "heartbeat:consumer:";
const LEASE_PREFIX: &str = "lock:";

pub fn heartbeat_key(worker_id: &WorkerId) -> String {
    format!("{HEARTBEAT_PREFIX}{worker_id}")
}

pub fn lease_key(message_key: &str) -> String {
    format!("{LEASE_PREFIX}{message_key}")
}

pub trait CoordinationStore: Send + Sync + 'static {
    /// Atomically creates `key` unless it already exists. Returns `true` iff this call
    /// created it.
    fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> impl Future<Output = Result<bool>> + Send;

    fn set_with_ttl(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> impl Future<Output = Result<()>> + Send;

    fn exists(&self, key: &str) -> impl Future<Output = Result<bool>> + Send;

    fn delete(&self, key: &str) -> impl Future<Output = Result<()>> + Send;

    /// Full contents of a list, in store order.
    fn list_range(&self, key: &str) -> impl Future<Output = Result<Vec<String>>> + Send;

    fn list_push(&self, key: &str, value: &str) -> impl Future<Output = Result<()>> + Send;

    /// Removes every occurrence of `value`. Removing a missing value is not an error.
    fn list_remove(&self, key: &str, value: &str) -> impl Future<Output = Result<()>> + Send;

    /// Appends one entry to an append-only stream and returns the entry id.
    fn append(
        &self,
        stream: &str,
        fields: &[(&str, String)],
    ) -> impl Future<Output = Result<String>> + Send;

    /// Raw payloads published on `channel` from now on.
    fn subscribe(
        &self,
        channel: &str,
    ) -> impl Future<Output = Result<BoxStream<'static, Vec<u8>>>> + Send;
}

use crate::error::ConsumerError;
use crate::metrics::MetricsSink;
use crate::store::CoordinationStore;
use anyhow::{Context, Result, anyhow};
use futures::StreamExt;
use futures::stream::BoxStream;
use log::info;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, RedisResult};
use std::time::Duration;

/// Redis-backed coordination store.
///
/// Commands share one multiplexed [`ConnectionManager`] (which reconnects on its own);
/// every subscription gets a dedicated pub/sub connection.
pub struct RedisStore {
    client: Client,
    connection: ConnectionManager,
    timeout: Duration,
}

fn ttl_millis(ttl: Duration) -> u64 {
    // PX rejects 0
    (ttl.as_millis() as u64).max(1)
}

impl RedisStore {
    /// Connects and pings the server. Any failure here is fatal for the caller.
    pub async fn connect(url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::open(url).context("invalid redis url")?;

        let connection = tokio::time::timeout(timeout, ConnectionManager::new(client.clone()))
            .await
            .map_err(|_| anyhow!("timed out connecting to redis after {timeout:?}"))??;

        let store = Self {
            client,
            connection,
            timeout,
        };

        let mut conn = store.connection.clone();
        let pong: String = store
            .bounded("PING", redis::cmd("PING").query_async(&mut conn))
            .await?;
        info!("Connected to coordination store ({pong})");

        Ok(store)
    }

    /// Applies the store timeout to one call and classifies its failure.
    async fn bounded<T>(
        &self,
        operation: &str,
        call: impl Future<Output = RedisResult<T>>,
    ) -> Result<T> {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(ConsumerError::StoreUnavailable(format!("{operation}: {e}")).into()),
            Err(_) => Err(ConsumerError::StoreUnavailable(format!(
                "{operation}: timed out after {:?}",
                self.timeout
            ))
            .into()),
        }
    }
}

impl CoordinationStore for RedisStore {
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.connection.clone();
        let mut cmd = redis::cmd("SET");
        cmd.arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(ttl));

        // Nil reply when the key is already held
        let reply: Option<String> = self.bounded("SET NX", cmd.query_async(&mut conn)).await?;

        Ok(reply.is_some())
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.connection.clone();

        self.bounded("PSETEX", conn.pset_ex(key, value, ttl_millis(ttl)))
            .await
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.connection.clone();

        self.bounded("EXISTS", conn.exists(key)).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.connection.clone();

        self.bounded("DEL", conn.del(key)).await
    }

    async fn list_range(&self, key: &str) -> Result<Vec<String>> {
        let mut conn = self.connection.clone();

        self.bounded("LRANGE", conn.lrange(key, 0, -1)).await
    }

    async fn list_push(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = self.connection.clone();

        self.bounded("LPUSH", conn.lpush(key, value)).await
    }

    async fn list_remove(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = self.connection.clone();

        // Count 0 removes every occurrence
        self.bounded("LREM", conn.lrem(key, 0, value)).await
    }

    async fn append(&self, stream: &str, fields: &[(&str, String)]) -> Result<String> {
        let mut conn = self.connection.clone();

        self.bounded("XADD", conn.xadd(stream, "*", fields)).await
    }

    async fn subscribe(&self, channel: &str) -> Result<BoxStream<'static, Vec<u8>>> {
        let mut pubsub = self
            .bounded("SUBSCRIBE", self.client.get_async_pubsub())
            .await?;
        self.bounded("SUBSCRIBE", pubsub.subscribe(channel)).await?;

        info!("Subscribed to channel '{channel}'");

        let payloads = pubsub
            .into_on_message()
            .map(|msg| msg.get_payload_bytes().to_vec());

        Ok(payloads.boxed())
    }
}

impl MetricsSink for RedisStore {
    async fn create_series(&self, key: &str, labels: &[(&str, &str)]) -> Result<()> {
        let mut conn = self.connection.clone();
        let mut cmd = redis::cmd("TS.CREATE");
        cmd.arg(key).arg("LABELS");
        for (name, value) in labels {
            cmd.arg(*name).arg(*value);
        }

        let _: String = self.bounded("TS.CREATE", cmd.query_async(&mut conn)).await?;

        Ok(())
    }

    async fn add_sample(&self, key: &str, timestamp_millis: i64, value: f64) -> Result<()> {
        let mut conn = self.connection.clone();
        let mut cmd = redis::cmd("TS.ADD");
        cmd.arg(key).arg(timestamp_millis).arg(value);

        let _: i64 = self.bounded("TS.ADD", cmd.query_async(&mut conn)).await?;

        Ok(())
    }
}

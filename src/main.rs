mod collab;
mod eager_env;
mod error;
mod metrics;
mod settings;
mod store;
mod utils;
mod worker;

use crate::{
    collab::{
        WorkerId, heartbeat::HeartbeatManager, membership::MembershipTracker,
        slot_manager::SlotManager,
    },
    eager_env::check_env,
    metrics::{Metrics, MetricsReporter},
    settings::Settings,
    store::{CoordinationStore, redis_store::RedisStore},
    worker::{Worker, handler::StampingHandler},
};
use anyhow::{Context, Result};
use log::{error, info};
use std::sync::Arc;
use tokio::signal::unix::{SignalKind, signal};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    env_logger::builder()
        .format_timestamp(Some(env_logger::TimestampPrecision::Millis))
        .init();
    check_env();

    let settings = Settings::from_env()?;
    let worker_id = WorkerId::generate();
    info!("Starting consumer {worker_id}");

    let store = RedisStore::connect(&settings.redis_url, settings.store_timeout)
        .await
        .context("failed to connect to Redis")?;
    let store = Arc::new(store);

    let heartbeat = Arc::new(HeartbeatManager::new(
        worker_id.clone(),
        store.clone(),
        settings.heartbeat_interval,
        settings.heartbeat_ttl(),
    ));

    let tracker = Arc::new(MembershipTracker::new(
        worker_id.clone(),
        store.clone(),
        heartbeat.clone(),
        settings.heartbeat_interval,
        settings.heartbeat_ttl(),
    ));

    let metrics = Arc::new(Metrics::default());
    let reporter = MetricsReporter::new(
        worker_id.clone(),
        metrics.clone(),
        store.clone(),
        settings.metrics_report_period,
    );
    reporter.create_series().await;

    // Subscribe before joining the roster so no message addressed to us is missed
    let payloads = store
        .subscribe(&settings.messages_channel)
        .await
        .context("failed to subscribe to the messages channel")?;

    tracker.announce().await.context("failed to join the roster")?;
    heartbeat.start().await;

    let (stop_tracker, live_sets) = tracker.clone().start();
    let slot_manager = SlotManager::new(
        worker_id.clone(),
        settings.total_slots,
        settings.replica_count,
    );
    let (stop_slot_manager, slot_tables) = slot_manager.start(live_sets);

    let worker = Worker::new(
        worker_id.clone(),
        store.clone(),
        Arc::new(StampingHandler::new(settings.max_processing_delay)),
        slot_tables,
        metrics,
        &settings,
    );
    let stop_worker = Arc::new(worker).start(payloads);
    let stop_reporter = reporter.start();

    shutdown_signal()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("Shutting down {worker_id}");

    stop_worker();
    stop_reporter();
    stop_tracker();
    stop_slot_manager();
    heartbeat.stop().await;

    match tracker.withdraw_within(settings.store_timeout * 2).await {
        Ok(()) => info!("{worker_id} left the roster"),
        Err(e) => error!("failed to leave the roster: {e}"),
    }

    Ok(())
}

/// Resolves on Ctrl-C or SIGTERM.
async fn shutdown_signal() -> Result<()> {
    let mut terminate = signal(SignalKind::terminate())?;

    tokio::select! {
        result = tokio::signal::ctrl_c() => result?,
        _ = terminate.recv() => info!("Received SIGTERM"),
    }

    Ok(())
}

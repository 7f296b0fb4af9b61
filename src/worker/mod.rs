pub mod handler;
pub mod message;

use crate::collab::lease::LeaseCoordinator;
use crate::collab::slots::SlotTable;
use crate::collab::WorkerId;
use crate::error::ConsumerError;
use crate::metrics::Metrics;
use crate::settings::Settings;
use crate::store::{CoordinationStore, RESULTS_STREAM};
use anyhow::Result;
use futures::StreamExt;
use futures::stream::BoxStream;
use handler::MessageHandler;
use log::{debug, error, info, trace, warn};
use message::Message;
use std::sync::Arc;
use std::time::Duration;
use strum::Display;
use tokio::sync::watch::Receiver;
use tokio::time;

const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(1);

/// Where a single message ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum Outcome {
    DecodeFailed,
    NotOwner,
    LeaseLost,
    LeaseWon,
    Failed,
}

pub struct Worker<S, H> {
    worker_id: WorkerId,
    store: Arc<S>,
    leases: LeaseCoordinator<S>,
    handler: Arc<H>,
    slots: Receiver<Arc<SlotTable>>,
    metrics: Arc<Metrics>,
    lease_ttl: Duration,
    channel: String,
    max_in_flight: usize,
}

impl<S: CoordinationStore, H: MessageHandler> Worker<S, H> {
    pub fn new(
        worker_id: WorkerId,
        store: Arc<S>,
        handler: Arc<H>,
        slots: Receiver<Arc<SlotTable>>,
        metrics: Arc<Metrics>,
        settings: &Settings,
    ) -> Self {
        Self {
            worker_id,
            leases: LeaseCoordinator::new(store.clone()),
            store,
            handler,
            slots,
            metrics,
            lease_ttl: settings.lease_ttl,
            channel: settings.messages_channel.clone(),
            max_in_flight: settings.max_in_flight_messages,
        }
    }

    /// Runs one payload through the pipeline and counts the result.
    pub async fn on_message(&self, payload: &[u8]) -> Outcome {
        let outcome = self.process(payload).await;

        match outcome {
            Outcome::LeaseWon => self.metrics.record_processed(),
            Outcome::NotOwner | Outcome::LeaseLost => self.metrics.record_skipped(),
            Outcome::DecodeFailed | Outcome::Failed => self.metrics.record_failed(),
        }

        outcome
    }

    async fn process(&self, payload: &[u8]) -> Outcome {
        let message = match Message::decode(payload) {
            Ok(message) => message,
            Err(e) => {
                warn!("{} - Dropping message: {e}", self.worker_id);
                return Outcome::DecodeFailed;
            }
        };

        // Snapshot, so a concurrent rebuild can't change the answer halfway through
        let table = self.slots.borrow().clone();
        if !table.is_owner(&message.message_id, &self.worker_id) {
            trace!("{} - Not an owner of {}", self.worker_id, message.message_id);
            return Outcome::NotOwner;
        }

        match self
            .leases
            .try_acquire(&message.message_id, &self.worker_id, self.lease_ttl)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                debug!(
                    "{} - Lease on {} held elsewhere",
                    self.worker_id, message.message_id
                );
                return Outcome::LeaseLost;
            }
            Err(e) => {
                error!(
                    "{} - Failed to acquire lease on {}: {e}",
                    self.worker_id, message.message_id
                );
                return Outcome::Failed;
            }
        }

        let message_id = message.message_id.clone();
        match self.complete(message).await {
            Ok(entry_id) => {
                debug!("{} - Processed {message_id} as {entry_id}", self.worker_id);
                Outcome::LeaseWon
            }
            Err(e) => {
                error!("{} - Failed to process {message_id}: {e}", self.worker_id);
                Outcome::Failed
            }
        }
    }

    /// Runs the handler and appends its output to the result stream.
    async fn complete(&self, message: Message) -> Result<String> {
        let handler = self.handler.clone();
        let worker_id = self.worker_id.clone();

        let result =
            tokio::task::spawn_blocking(move || handler.process(message, &worker_id)).await;

        let processed = match result {
            Ok(Ok(processed)) => processed,
            Ok(Err(e)) => return Err(ConsumerError::HandlerFailure(e.to_string()).into()),
            // Panicked
            Err(e) => return Err(ConsumerError::HandlerFailure(e.to_string()).into()),
        };

        self.store.append(RESULTS_STREAM, &processed.to_fields()).await
    }

    /// Consumes `payloads`, then keeps resubscribing whenever the subscription ends.
    pub fn start(self: Arc<Self>, payloads: BoxStream<'static, Vec<u8>>) -> impl FnOnce() {
        let task = tokio::spawn(async move {
            let mut payloads = Some(payloads);

            loop {
                let subscription = match payloads.take() {
                    Some(payloads) => Ok(payloads),
                    None => self.store.subscribe(&self.channel).await,
                };

                match subscription {
                    Ok(payloads) => {
                        let worker = &self;
                        payloads
                            .for_each_concurrent(self.max_in_flight, |payload| async move {
                                worker.on_message(&payload).await;
                            })
                            .await;

                        warn!(
                            "{} - Subscription to {} ended",
                            self.worker_id, self.channel
                        );
                    }
                    Err(e) => {
                        error!(
                            "{} - Failed to subscribe to {}: {e}",
                            self.worker_id, self.channel
                        );
                    }
                }

                time::sleep(RESUBSCRIBE_DELAY).await;
            }
        });

        let close_function = move || {
            task.abort();
            info!("Worker stopped");
        };

        info!("Worker started");

        close_function
    }
}

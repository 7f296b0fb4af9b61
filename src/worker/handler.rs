use crate::collab::WorkerId;
use crate::worker::message::Message;
use anyhow::Result;
use log::trace;
use rand::{Rng, rng};
use std::time::Duration;
use uuid::Uuid;

/// Business logic applied to a message once this worker holds its lease.
///
/// Runs on the blocking pool, so implementations may block.
pub trait MessageHandler: Send + Sync + 'static {
    fn process(&self, message: Message, worker_id: &WorkerId) -> Result<Message>;
}

/// Stamps the message with the worker that processed it after a random amount of work.
pub struct StampingHandler {
    max_delay: Duration,
}

impl StampingHandler {
    pub fn new(max_delay: Duration) -> Self {
        Self { max_delay }
    }
}

impl MessageHandler for StampingHandler {
    fn process(&self, mut message: Message, worker_id: &WorkerId) -> Result<Message> {
        let max_millis = self.max_delay.as_millis() as u64;
        if max_millis > 0 {
            let delay = Duration::from_millis(rng().random_range(0..max_millis));
            trace!("{worker_id} - Simulating {delay:?} of work");
            std::thread::sleep(delay);
        }

        message.processed_by = Some(worker_id.to_string());
        message.random_property = Some(Uuid::new_v4().to_string());

        Ok(message)
    }
}

use crate::collab::slots::SlotTable;
use crate::collab::{LiveSet, WorkerId};
use itertools::Itertools;
use log::{debug, info};
use std::sync::Arc;
use tokio::sync::watch::{self, Receiver, Sender};

/// Owns the current [`SlotTable`] and rebuilds it whenever the live set changes.
///
/// Readers get the table through a watch channel, so they always see a complete table.
pub struct SlotManager {
    worker_id: WorkerId,
    total_slots: usize,
    replica_count: usize,
}

impl SlotManager {
    pub fn new(worker_id: WorkerId, total_slots: usize, replica_count: usize) -> Self {
        Self {
            worker_id,
            total_slots,
            replica_count,
        }
    }

    fn rebuild(&self, live_set: &LiveSet, tx: &Sender<Arc<SlotTable>>) -> bool {
        if tx.borrow().live_set() == live_set {
            return false;
        }

        let table = SlotTable::build(live_set, self.total_slots, self.replica_count);

        info!(
            "Rebuilt slot table for {} live workers: [{}]; {} owns slots {:?}",
            live_set.len(),
            live_set.iter().join(", "),
            self.worker_id,
            table.slots_of(&self.worker_id)
        );
        debug!("Slot table: {table}");

        tx.send_replace(Arc::new(table));

        true
    }

    pub fn start(
        self,
        mut live_updates: Receiver<LiveSet>,
    ) -> (impl FnOnce(), Receiver<Arc<SlotTable>>) {
        let (tx, rx) = watch::channel(Arc::new(SlotTable::empty(self.total_slots)));

        // Whatever is already published must not wait for the next change
        let current = live_updates.borrow_and_update().clone();
        self.rebuild(&current, &tx);

        let task = tokio::spawn(async move {
            while live_updates.changed().await.is_ok() {
                let live_set = live_updates.borrow_and_update().clone();
                self.rebuild(&live_set, &tx);
            }

            info!("Live set updates closed");
        });

        let close_function = move || {
            task.abort();
            info!("SlotManager stopped");
        };

        info!("SlotManager started");

        (close_function, rx)
    }
}

use crate::collab::{LiveSet, WorkerId};
use crate::error::ConsumerError;
use itertools::Itertools;
use std::collections::BTreeSet;
use std::fmt::Display;

/// Slot → owners assignment derived from one live set.
///
/// A table is never patched; a new live set produces a new table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotTable {
    live_set: LiveSet,
    slots: Vec<BTreeSet<WorkerId>>,
}

/// Stable string hash: the 31-polynomial over UTF-16 code units in wrapping 32-bit
/// arithmetic. It has to match across workers and restarts, so no seeded hashers.
fn key_hash(key: &str) -> i32 {
    key.encode_utf16()
        .fold(0i32, |hash, unit| hash.wrapping_mul(31).wrapping_add(unit as i32))
}

/// Slot responsible for `key`. `total_slots` must be non-zero.
pub fn slot_of(key: &str, total_slots: usize) -> usize {
    // unsigned_abs keeps i32::MIN in range
    key_hash(key).unsigned_abs() as usize % total_slots
}

impl SlotTable {
    /// Assigns owners to every slot.
    //
    // Slots are visited in order and each takes the next `replica_count` workers from a
    // circular walk over the sorted live set. The walk continues where the previous slot
    // stopped, which spreads slots evenly. When `replica_count` exceeds the live set size
    // the walk wraps within a slot and duplicates collapse.
    pub fn build(live_set: &LiveSet, total_slots: usize, replica_count: usize) -> Self {
        // Cycling an empty set yields nothing, so every slot stays empty
        let mut cursor = live_set.iter().cycle();

        let slots: Vec<BTreeSet<WorkerId>> = (0..total_slots)
            .map(|_| cursor.by_ref().take(replica_count).cloned().collect())
            .collect();

        Self {
            live_set: live_set.clone(),
            slots,
        }
    }

    pub fn empty(total_slots: usize) -> Self {
        Self::build(&LiveSet::new(), total_slots, 0)
    }

    pub fn live_set(&self) -> &LiveSet {
        &self.live_set
    }

    pub fn total_slots(&self) -> usize {
        self.slots.len()
    }

    pub fn owners(&self, slot: usize) -> Option<&BTreeSet<WorkerId>> {
        self.slots.get(slot)
    }

    pub fn owners_of(&self, key: &str) -> Result<&BTreeSet<WorkerId>, ConsumerError> {
        if self.slots.is_empty() {
            return Err(ConsumerError::NoOwnersAssigned { slot: 0 });
        }

        let slot = slot_of(key, self.slots.len());

        match self.slots.get(slot) {
            Some(owners) if !owners.is_empty() => Ok(owners),
            _ => Err(ConsumerError::NoOwnersAssigned { slot }),
        }
    }

    pub fn is_owner(&self, key: &str, worker_id: &WorkerId) -> bool {
        self.owners_of(key)
            .is_ok_and(|owners| owners.contains(worker_id))
    }

    /// Slots `worker_id` is one of the owners of.
    pub fn slots_of(&self, worker_id: &WorkerId) -> Vec<usize> {
        self.slots
            .iter()
            .positions(|owners| owners.contains(worker_id))
            .collect()
    }
}

impl Display for SlotTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let slots = self
            .slots
            .iter()
            .enumerate()
            .map(|(slot, owners)| format!("{slot}=[{}]", owners.iter().join(",")));

        write!(f, "{}", slots.format(" "))
    }
}

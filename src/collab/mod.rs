//! Coordination between workers consuming the same feed.
//!
//! Every worker keeps a heartbeat key alive and is listed in a shared roster. Workers
//! periodically prune roster entries whose heartbeat has expired and derive the live set
//! from what remains.
//!
//! The key-space is split into a fixed number of slots. Each slot is assigned `replica_count`
//! owners by walking the sorted live set circularly, so every worker that observes the same
//! live set computes the same assignment without talking to anyone.
//!
//! Owners of a slot race for a short-lived lease on each message key; the winner processes
//! the message. Leases are never released and simply expire.

pub mod heartbeat;
pub mod lease;
pub mod membership;
pub mod slot_manager;
pub mod slots;

use std::collections::BTreeSet;
use std::fmt::Display;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WorkerId(String);

/// Workers currently believed alive. The ordering is part of the slot assignment.
pub type LiveSet = BTreeSet<WorkerId>;

impl WorkerId {
    pub fn generate() -> Self {
        Self(format!("Consumer-{}", Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for WorkerId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for WorkerId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

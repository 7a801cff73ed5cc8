//! Process-shared connection ownership table.
//!
//! # Responsibilities
//! - Record which worker accepted each connection
//! - Answer ownership lookups from any process
//! - Enumerate the connections of a crashed worker
//!
//! # Design Decisions
//! - One `AtomicU64` per connection id holding `worker_id + 1`; 0 means absent
//! - Every operation touches exactly one slot, so each is atomic per key
//! - Fixed capacity; ids beyond it are reported, never dropped

use std::io;
use std::sync::atomic::Ordering;

use thiserror::Error;

use crate::net::connection::{ConnectionId, WorkerId};
use crate::net::shm::SharedSlots;

/// Default number of slots.
pub const DEFAULT_CAPACITY: usize = 65_536;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TableError {
    #[error("connection {id} exceeds table capacity {capacity}")]
    OutOfRange { id: ConnectionId, capacity: usize },
}

/// Mapping from connection id to owning worker id, visible to every process
/// forked after its creation.
#[derive(Debug)]
pub struct ConnectionTable {
    slots: SharedSlots,
}

impl ConnectionTable {
    pub fn new(capacity: usize) -> io::Result<Self> {
        Ok(Self {
            slots: SharedSlots::new(capacity)?,
        })
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn slot(&self, id: ConnectionId) -> Result<&std::sync::atomic::AtomicU64, TableError> {
        self.slots
            .slots()
            .get(id.as_u64() as usize)
            .ok_or(TableError::OutOfRange {
                id,
                capacity: self.capacity(),
            })
    }

    /// Record `worker` as the owner of `id`, replacing any previous owner.
    pub fn set(&self, id: ConnectionId, worker: WorkerId) -> Result<(), TableError> {
        self.slot(id)?.store(encode(worker), Ordering::Release);
        Ok(())
    }

    /// Current owner of `id`.
    pub fn get(&self, id: ConnectionId) -> Option<WorkerId> {
        self.slot(id)
            .ok()
            .and_then(|slot| decode(slot.load(Ordering::Acquire)))
    }

    /// Forget `id`. Returns the previous owner, if any.
    pub fn delete(&self, id: ConnectionId) -> Option<WorkerId> {
        self.slot(id)
            .ok()
            .and_then(|slot| decode(slot.swap(0, Ordering::AcqRel)))
    }

    /// Forget `id` only while it is still owned by `worker`.
    pub fn delete_if(&self, id: ConnectionId, worker: WorkerId) -> bool {
        self.slot(id).is_ok_and(|slot| {
            slot.compare_exchange(encode(worker), 0, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        })
    }

    /// Snapshot of every live entry. Each slot is read atomically; entries
    /// may change between slots.
    pub fn scan(&self) -> Vec<(ConnectionId, WorkerId)> {
        self.slots
            .slots()
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| {
                decode(slot.load(Ordering::Acquire)).map(|w| (ConnectionId::new(i as u64), w))
            })
            .collect()
    }

    /// Connections currently owned by `worker`.
    pub fn owned_by(&self, worker: WorkerId) -> Vec<ConnectionId> {
        self.scan()
            .into_iter()
            .filter(|(_, w)| *w == worker)
            .map(|(id, _)| id)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.slots
            .slots()
            .iter()
            .filter(|s| s.load(Ordering::Relaxed) != 0)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn encode(worker: WorkerId) -> u64 {
    u64::from(worker) + 1
}

fn decode(raw: u64) -> Option<WorkerId> {
    raw.checked_sub(1).map(|w| w as WorkerId)
}

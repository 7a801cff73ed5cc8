//! Connection identity.
//!
//! # Responsibilities
//! - Name connections with small, reusable ids (like file descriptors)
//! - Hand out ids from a pool shared by every event worker
//! - Return ids to the pool once the connection is gone
//!
//! # Design Decisions
//! - Ids are indexes into the shared connection table, so the table never
//!   hashes or probes
//! - Allocation is a CAS on a shared flag; no locks cross process boundaries

use std::io;
use std::sync::atomic::Ordering;

use crate::net::shm::SharedSlots;

/// Identifier of an event or task worker process.
pub type WorkerId = u32;

/// Runtime-assigned identifier of an open connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl From<u64> for ConnectionId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Process-shared pool of connection ids.
///
/// Slot 0 holds a rotating cursor, slot `i + 1` is 1 while id `i` is in use.
#[derive(Debug)]
pub struct IdAllocator {
    region: SharedSlots,
    capacity: usize,
}

impl IdAllocator {
    pub fn new(capacity: usize) -> io::Result<Self> {
        Ok(Self {
            region: SharedSlots::new(capacity + 1)?,
            capacity,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Claim a free id, or `None` when every id is in use.
    pub fn allocate(&self) -> Option<ConnectionId> {
        let slots = self.region.slots();
        let start = slots[0].fetch_add(1, Ordering::Relaxed) as usize;
        for offset in 0..self.capacity {
            let index = (start + offset) % self.capacity;
            if slots[index + 1]
                .compare_exchange(0, 1, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                return Some(ConnectionId(index as u64));
            }
        }
        None
    }

    /// Return an id to the pool. Releasing a free id is a no-op.
    pub fn release(&self, id: ConnectionId) {
        if let Some(slot) = self.region.slots().get(id.0 as usize + 1) {
            slot.store(0, Ordering::Release);
        }
    }

    /// Number of ids currently claimed.
    pub fn in_use(&self) -> usize {
        self.region.slots()[1..]
            .iter()
            .filter(|s| s.load(Ordering::Acquire) != 0)
            .count()
    }
}

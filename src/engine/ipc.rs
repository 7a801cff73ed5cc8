//! Task transport between event workers and task workers.
//!
//! # Responsibilities
//! - Create the shared task queue and one reply channel per event worker
//! - Encode descriptors and replies as JSON datagrams
//!
//! # Design Decisions
//! - Unix datagram socketpairs made by the manager before forking; every
//!   datagram is delivered to exactly one reader
//! - Event workers send without blocking; a full queue is reported, not waited on
//! - Reply channels are keyed by event worker id and survive respawns

use std::io;
use std::os::unix::net::UnixDatagram;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::engine::RuntimeError;
use crate::net::WorkerId;
use crate::task::{ErrorDescriptor, TaskDescriptor, TaskOutcome};

/// Largest datagram we send.
pub const MAX_DATAGRAM: usize = 64 * 1024;

/// Outcome travelling back to the submitting event worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskReply {
    pub id: u64,
    pub outcome: TaskOutcome,
}

/// Both ends of one datagram channel.
#[derive(Debug)]
pub struct Channel {
    pub tx: UnixDatagram,
    pub rx: UnixDatagram,
}

impl Channel {
    pub fn new() -> io::Result<Self> {
        let (tx, rx) = UnixDatagram::pair()?;
        Ok(Self { tx, rx })
    }
}

/// Every socket the task pool needs, created once in the manager.
#[derive(Debug)]
pub struct TaskChannels {
    pub queue: Channel,
    pub replies: Vec<Channel>,
}

impl TaskChannels {
    pub fn new(event_workers: usize) -> io::Result<Self> {
        let queue = Channel::new()?;
        queue.tx.set_nonblocking(true)?;
        let replies = (0..event_workers)
            .map(|_| Channel::new())
            .collect::<io::Result<Vec<_>>>()?;
        Ok(Self { queue, replies })
    }

    pub fn reply_rx(&self, worker: WorkerId) -> Option<&UnixDatagram> {
        self.replies.get(worker as usize).map(|c| &c.rx)
    }

    pub fn reply_tx(&self, worker: WorkerId) -> Option<&UnixDatagram> {
        self.replies.get(worker as usize).map(|c| &c.tx)
    }
}

pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, RuntimeError> {
    let bytes = serde_json::to_vec(value)?;
    if bytes.len() > MAX_DATAGRAM {
        return Err(RuntimeError::Oversize(bytes.len()));
    }
    Ok(bytes)
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> serde_json::Result<T> {
    serde_json::from_slice(bytes)
}

/// Queue a descriptor without blocking.
pub fn send_descriptor(queue: &UnixDatagram, descriptor: &TaskDescriptor) -> Result<(), RuntimeError> {
    let bytes = encode(descriptor)?;
    match queue.send(&bytes) {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => Err(RuntimeError::QueueFull),
        Err(e) => Err(e.into()),
    }
}

/// Send a reply. An outcome too large for one datagram is replaced by an
/// error outcome so the submitter still hears back.
pub fn send_reply(channel: &UnixDatagram, reply: &TaskReply) -> Result<(), RuntimeError> {
    let bytes = match encode(reply) {
        Ok(bytes) => bytes,
        Err(RuntimeError::Oversize(len)) => encode(&TaskReply {
            id: reply.id,
            outcome: TaskOutcome::failure(ErrorDescriptor {
                message: format!("task result of {} bytes exceeds the IPC limit", len),
                code: 0,
                file: file!().to_string(),
                line: line!(),
            }),
        })?,
        Err(e) => return Err(e),
    };
    channel.send(&bytes)?;
    Ok(())
}

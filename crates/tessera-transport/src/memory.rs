//! In-process transport fabric
//!
//! Every endpoint attached to a bus observes every frame sent by every
//! other endpoint; an endpoint never hears itself. This mirrors the
//! broadcast medium the runtime expects while keeping multi-node tests in
//! one process.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::sync::Mutex;
use tracing::warn;

use tessera_core::{Error, Result};
use tessera_wire::Frame;

use crate::Transport;

const DEFAULT_BUS_CAPACITY: usize = 256;

/// Shared in-process frame fabric
pub struct MemoryBus {
    sender: broadcast::Sender<(u64, Frame)>,
    next_endpoint: AtomicU64,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BUS_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        MemoryBus {
            sender,
            next_endpoint: AtomicU64::new(0),
        }
    }

    /// Attach a new endpoint to the bus
    pub fn endpoint(&self) -> MemoryTransport {
        MemoryTransport {
            id: self.next_endpoint.fetch_add(1, Ordering::Relaxed),
            sender: self.sender.clone(),
            receiver: Mutex::new(self.sender.subscribe()),
        }
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        MemoryBus::new()
    }
}

/// One endpoint on a `MemoryBus`
pub struct MemoryTransport {
    id: u64,
    sender: broadcast::Sender<(u64, Frame)>,
    receiver: Mutex<broadcast::Receiver<(u64, Frame)>>,
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&self, frame: &Frame) -> Result<()> {
        // Serialize-and-parse keeps the wire contract honest even in-process
        let bytes = frame.serialize()?;
        let frame = Frame::parse(&bytes)?;
        // No listeners is not a fault on a broadcast medium
        let _ = self.sender.send((self.id, frame));
        Ok(())
    }

    async fn recv(&self) -> Result<Frame> {
        let mut receiver = self.receiver.lock().await;
        loop {
            match receiver.recv().await {
                Ok((origin, frame)) => {
                    if origin != self.id {
                        return Ok(frame);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "memory bus receiver lagged, frames lost");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(Error::TransportUnavailable("memory bus closed".into()));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::{NodeId, Priority, SubjectId, TransferId};

    fn probe_frame(payload: Vec<u8>) -> Frame {
        Frame::message(
            SubjectId::new(42),
            Priority::Nominal,
            NodeId::new(1),
            TransferId::new(0),
            payload,
        )
    }

    #[tokio::test]
    async fn test_endpoints_see_each_other() {
        let bus = MemoryBus::new();
        let a = bus.endpoint();
        let b = bus.endpoint();

        a.send(&probe_frame(vec![7])).await.unwrap();
        let frame = b.recv().await.unwrap();
        assert_eq!(frame.payload, vec![7]);
    }

    #[tokio::test]
    async fn test_endpoint_does_not_hear_itself() {
        let bus = MemoryBus::new();
        let a = bus.endpoint();
        let b = bus.endpoint();

        a.send(&probe_frame(vec![1])).await.unwrap();
        b.send(&probe_frame(vec![2])).await.unwrap();

        // The first frame `a` observes is b's, not its own
        let frame = a.recv().await.unwrap();
        assert_eq!(frame.payload, vec![2]);
    }

    #[tokio::test]
    async fn test_fanout_to_many_endpoints() {
        let bus = MemoryBus::new();
        let sender = bus.endpoint();
        let receivers = [bus.endpoint(), bus.endpoint(), bus.endpoint()];

        sender.send(&probe_frame(vec![9])).await.unwrap();
        for receiver in &receivers {
            assert_eq!(receiver.recv().await.unwrap().payload, vec![9]);
        }
    }
}

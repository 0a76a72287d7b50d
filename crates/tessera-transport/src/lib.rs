//! Tessera Transport Layer
//!
//! The runtime consumes transport services through one object-safe trait:
//! send a frame, receive the next frame. Two implementations ship here:
//! - `UdpTransport` - datagrams to a broadcast/multicast group address
//! - `MemoryBus` / `MemoryTransport` - in-process fabric for tests and
//!   single-process multi-node arrangements

pub mod memory;
pub mod udp;

use async_trait::async_trait;

use tessera_core::Result;
use tessera_wire::Frame;

pub use memory::*;
pub use udp::*;

/// One attachment to the network fabric.
///
/// `send` resolves once the frame has been accepted for transmission;
/// there is no delivery acknowledgment. `recv` yields the next inbound
/// frame, surfacing parse faults as decode errors for the caller to absorb
/// and count.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, frame: &Frame) -> Result<()>;

    async fn recv(&self) -> Result<Frame>;
}

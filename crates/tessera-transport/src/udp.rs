//! UDP transport implementation

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::UdpSocket;

use tessera_core::{Error, Result};
use tessera_wire::{Frame, MAX_FRAME_SIZE};

use crate::Transport;

/// UDP transport: every frame goes to one group address
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
    local_addr: SocketAddr,
    group: SocketAddr,
}

impl UdpTransport {
    /// Bind to a local address and aim at a broadcast/multicast group
    pub async fn bind(addr: SocketAddr, group: SocketAddr) -> Result<Self> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|e| Error::TransportUnavailable(e.to_string()))?;
        socket
            .set_broadcast(true)
            .map_err(|e| Error::TransportUnavailable(e.to_string()))?;

        let local_addr = socket
            .local_addr()
            .map_err(|e| Error::TransportUnavailable(e.to_string()))?;

        Ok(UdpTransport {
            socket: Arc::new(socket),
            local_addr,
            group,
        })
    }

    /// Get local address
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

#[async_trait]
impl Transport for UdpTransport {
    async fn send(&self, frame: &Frame) -> Result<()> {
        let bytes = frame.serialize()?;
        self.socket
            .send_to(&bytes, self.group)
            .await
            .map_err(|e| Error::TransportUnavailable(e.to_string()))?;
        Ok(())
    }

    async fn recv(&self) -> Result<Frame> {
        let mut buf = vec![0u8; MAX_FRAME_SIZE];
        let (len, _addr) = self
            .socket
            .recv_from(&mut buf)
            .await
            .map_err(|e| Error::TransportUnavailable(e.to_string()))?;

        let frame = Frame::parse(&buf[..len])?;
        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::{NodeId, Priority, SubjectId, TransferId};

    #[tokio::test]
    async fn test_udp_transport_bind() {
        let group: SocketAddr = "127.0.0.1:9".parse().unwrap();
        let transport = UdpTransport::bind("127.0.0.1:0".parse().unwrap(), group)
            .await
            .unwrap();

        assert_ne!(transport.local_addr().port(), 0);
    }

    #[tokio::test]
    async fn test_udp_frame_delivery() {
        let receiver = UdpTransport::bind(
            "127.0.0.1:0".parse().unwrap(),
            "127.0.0.1:9".parse().unwrap(),
        )
        .await
        .unwrap();
        let sender = UdpTransport::bind(
            "127.0.0.1:0".parse().unwrap(),
            receiver.local_addr(),
        )
        .await
        .unwrap();

        let frame = Frame::message(
            SubjectId::new(100),
            Priority::Nominal,
            NodeId::new(1),
            TransferId::new(5),
            vec![1, 2, 3],
        );
        sender.send(&frame).await.unwrap();

        let received = receiver.recv().await.unwrap();
        assert_eq!(received, frame);
    }
}

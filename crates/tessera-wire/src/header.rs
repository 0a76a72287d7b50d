//! Fixed header for Tessera wire frames
//!
//! Fixed header is 16 bytes:
//! - Byte 0: Version (4 bits) + Frame kind (4 bits)
//! - Byte 1: Priority
//! - Bytes 2-3: Port identifier (LE) - subject or service space per kind
//! - Bytes 4-5: Source node (LE, 0xFFFF = anonymous)
//! - Bytes 6-7: Destination node (LE, 0xFFFF = broadcast)
//! - Bytes 8-15: Transfer identifier (LE)

use bytes::{Buf, BufMut};
use tessera_core::{DecodeError, NodeId, Priority, TransferId};

/// Fixed header size in bytes
pub const FRAME_HEADER_SIZE: usize = 16;

/// Current wire protocol version
pub const WIRE_VERSION: u8 = 0;

/// What kind of transfer a frame carries
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameKind {
    /// Broadcast publication on a subject
    Message = 0,
    /// Addressed service request
    Request = 1,
    /// Addressed service response
    Response = 2,
}

impl FrameKind {
    pub fn from_nibble(n: u8) -> Option<Self> {
        match n {
            0 => Some(FrameKind::Message),
            1 => Some(FrameKind::Request),
            2 => Some(FrameKind::Response),
            _ => None,
        }
    }

    #[inline]
    pub fn to_nibble(self) -> u8 {
        self as u8
    }
}

/// Fixed header structure
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameHeader {
    /// Wire protocol version (4 bits)
    pub version: u8,
    /// Transfer kind
    pub kind: FrameKind,
    /// Transfer priority
    pub priority: Priority,
    /// Subject or service identifier, per kind
    pub port: u16,
    /// Originating node
    pub source: NodeId,
    /// Destination node; UNSET means broadcast
    pub destination: NodeId,
    /// Transfer identifier for ordering and correlation
    pub transfer: TransferId,
}

impl FrameHeader {
    pub fn new(kind: FrameKind, port: u16, source: NodeId) -> Self {
        FrameHeader {
            version: WIRE_VERSION,
            kind,
            priority: Priority::default(),
            port,
            source,
            destination: NodeId::UNSET,
            transfer: TransferId::default(),
        }
    }

    /// Parse a header from the front of `buf`
    pub fn parse(buf: &mut impl Buf) -> Result<Self, DecodeError> {
        if buf.remaining() < FRAME_HEADER_SIZE {
            return Err(DecodeError::Truncated {
                expected: FRAME_HEADER_SIZE,
                available: buf.remaining(),
            });
        }

        let first = buf.get_u8();
        let version = first >> 4;
        if version != WIRE_VERSION {
            return Err(DecodeError::InvalidDiscriminant {
                what: "wire version",
                value: version as u64,
            });
        }
        let kind = FrameKind::from_nibble(first & 0x0F).ok_or(DecodeError::InvalidDiscriminant {
            what: "frame kind",
            value: (first & 0x0F) as u64,
        })?;

        let priority_byte = buf.get_u8();
        let priority =
            Priority::from_byte(priority_byte).ok_or(DecodeError::InvalidDiscriminant {
                what: "priority",
                value: priority_byte as u64,
            })?;

        let port = buf.get_u16_le();
        let source = NodeId::new(buf.get_u16_le());
        let destination = NodeId::new(buf.get_u16_le());
        let transfer = TransferId::new(buf.get_u64_le());

        Ok(FrameHeader {
            version,
            kind,
            priority,
            port,
            source,
            destination,
            transfer,
        })
    }

    /// Append the serialized header to `buf`
    pub fn write(&self, buf: &mut impl BufMut) {
        buf.put_u8((self.version << 4) | self.kind.to_nibble());
        buf.put_u8(self.priority.to_byte());
        buf.put_u16_le(self.port);
        buf.put_u16_le(self.source.0);
        buf.put_u16_le(self.destination.0);
        buf.put_u64_le(self.transfer.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_roundtrip() {
        let header = FrameHeader {
            version: WIRE_VERSION,
            kind: FrameKind::Request,
            priority: Priority::Fast,
            port: 385,
            source: NodeId::new(42),
            destination: NodeId::new(7),
            transfer: TransferId::new(0xDEAD_BEEF),
        };

        let mut buf = Vec::new();
        header.write(&mut buf);
        assert_eq!(buf.len(), FRAME_HEADER_SIZE);

        let parsed = FrameHeader::parse(&mut buf.as_slice()).unwrap();
        assert_eq!(parsed, header);
    }

    #[test]
    fn test_header_too_short() {
        let buf = [0u8; 8];
        assert!(matches!(
            FrameHeader::parse(&mut &buf[..]),
            Err(DecodeError::Truncated { .. })
        ));
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let mut buf = Vec::new();
        FrameHeader::new(FrameKind::Message, 1, NodeId::new(1)).write(&mut buf);
        buf[0] = (WIRE_VERSION << 4) | 0x0F;
        assert!(matches!(
            FrameHeader::parse(&mut buf.as_slice()),
            Err(DecodeError::InvalidDiscriminant { what: "frame kind", .. })
        ));
    }

    #[test]
    fn test_wrong_version_rejected() {
        let mut buf = Vec::new();
        FrameHeader::new(FrameKind::Message, 1, NodeId::new(1)).write(&mut buf);
        buf[0] = (3 << 4) | FrameKind::Message.to_nibble();
        assert!(matches!(
            FrameHeader::parse(&mut buf.as_slice()),
            Err(DecodeError::InvalidDiscriminant { what: "wire version", .. })
        ));
    }
}

//! Complete wire frame: fixed header + serialized payload

use bytes::BufMut;
use tessera_core::{DecodeError, NodeId, Priority, ServiceId, SubjectId, TransferId};

use crate::{FrameHeader, FrameKind, FRAME_HEADER_SIZE};

/// Maximum frame size (MTU-friendly)
pub const MAX_FRAME_SIZE: usize = 1400;

/// Maximum payload a single frame can carry
pub const MAX_PAYLOAD_SIZE: usize = MAX_FRAME_SIZE - FRAME_HEADER_SIZE;

/// One transport frame
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    pub header: FrameHeader,
    pub payload: Vec<u8>,
}

impl Frame {
    /// Build a broadcast message frame for a subject
    pub fn message(
        subject: SubjectId,
        priority: Priority,
        source: NodeId,
        transfer: TransferId,
        payload: Vec<u8>,
    ) -> Self {
        let mut header = FrameHeader::new(FrameKind::Message, subject.0, source);
        header.priority = priority;
        header.transfer = transfer;
        Frame { header, payload }
    }

    /// Build an addressed request frame for a service
    pub fn request(
        service: ServiceId,
        priority: Priority,
        source: NodeId,
        destination: NodeId,
        transfer: TransferId,
        payload: Vec<u8>,
    ) -> Self {
        let mut header = FrameHeader::new(FrameKind::Request, service.0, source);
        header.priority = priority;
        header.destination = destination;
        header.transfer = transfer;
        Frame { header, payload }
    }

    /// Build a response frame correlated to a request
    pub fn response(request: &FrameHeader, source: NodeId, payload: Vec<u8>) -> Self {
        let mut header = FrameHeader::new(FrameKind::Response, request.port, source);
        header.priority = request.priority;
        header.destination = request.source;
        header.transfer = request.transfer;
        Frame { header, payload }
    }

    /// Subject this frame was published on, when it is a message frame
    pub fn subject(&self) -> Option<SubjectId> {
        matches!(self.header.kind, FrameKind::Message).then(|| SubjectId::new(self.header.port))
    }

    /// Service this frame addresses, when it is a request or response
    pub fn service(&self) -> Option<ServiceId> {
        matches!(self.header.kind, FrameKind::Request | FrameKind::Response)
            .then(|| ServiceId::new(self.header.port))
    }

    /// Parse a frame from a received datagram
    pub fn parse(buf: &[u8]) -> Result<Self, DecodeError> {
        if buf.len() > MAX_FRAME_SIZE {
            return Err(DecodeError::OverExtent {
                len: buf.len(),
                extent: MAX_FRAME_SIZE,
            });
        }
        let mut cursor = buf;
        let header = FrameHeader::parse(&mut cursor)?;
        Ok(Frame {
            header,
            payload: cursor.to_vec(),
        })
    }

    /// Serialize the frame into a datagram
    pub fn serialize(&self) -> Result<Vec<u8>, DecodeError> {
        if self.payload.len() > MAX_PAYLOAD_SIZE {
            return Err(DecodeError::OverExtent {
                len: self.payload.len(),
                extent: MAX_PAYLOAD_SIZE,
            });
        }
        let mut buf = Vec::with_capacity(FRAME_HEADER_SIZE + self.payload.len());
        self.header.write(&mut buf);
        buf.put_slice(&self.payload);
        Ok(buf)
    }

    /// Total serialized size
    pub fn size(&self) -> usize {
        FRAME_HEADER_SIZE + self.payload.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_roundtrip() {
        let frame = Frame::message(
            SubjectId::new(7509),
            Priority::Nominal,
            NodeId::new(3),
            TransferId::new(17),
            vec![1, 2, 3, 4, 5],
        );

        let bytes = frame.serialize().unwrap();
        let parsed = Frame::parse(&bytes).unwrap();
        assert_eq!(parsed, frame);
        assert_eq!(parsed.subject(), Some(SubjectId::new(7509)));
        assert_eq!(parsed.service(), None);
    }

    #[test]
    fn test_response_correlates_to_request() {
        let request = Frame::request(
            ServiceId::new(430),
            Priority::High,
            NodeId::new(8),
            NodeId::new(9),
            TransferId::new(99),
            vec![],
        );

        let response = Frame::response(&request.header, NodeId::new(9), vec![0xAB]);
        assert_eq!(response.header.kind, FrameKind::Response);
        assert_eq!(response.header.destination, NodeId::new(8));
        assert_eq!(response.header.transfer, TransferId::new(99));
        assert_eq!(response.header.priority, Priority::High);
        assert_eq!(response.service(), Some(ServiceId::new(430)));
    }

    #[test]
    fn test_oversize_payload_rejected() {
        let frame = Frame::message(
            SubjectId::new(1),
            Priority::Nominal,
            NodeId::new(1),
            TransferId::new(0),
            vec![0u8; MAX_PAYLOAD_SIZE + 1],
        );
        assert!(frame.serialize().is_err());
    }

    #[test]
    fn test_empty_payload_is_valid() {
        let frame = Frame::request(
            ServiceId::new(430),
            Priority::Nominal,
            NodeId::new(1),
            NodeId::new(2),
            TransferId::new(0),
            vec![],
        );
        let bytes = frame.serialize().unwrap();
        assert_eq!(bytes.len(), FRAME_HEADER_SIZE);
        assert_eq!(Frame::parse(&bytes).unwrap(), frame);
    }
}

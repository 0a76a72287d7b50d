//! Error taxonomy for the Tessera runtime

use std::time::Duration;

use thiserror::Error;

/// Top-level Tessera errors
#[derive(Error, Debug)]
pub enum Error {
    // Codec errors
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("invalid type descriptor: {0}")]
    InvalidDescriptor(String),

    // Register errors
    #[error("register {0} is immutable")]
    ImmutableRegister(String),

    #[error("register {name}: cannot assign {offered} where {expected} is required")]
    TypeMismatch {
        name: String,
        expected: &'static str,
        offered: &'static str,
    },

    #[error("register {0} does not exist")]
    MissingRegister(String),

    // Port errors
    #[error("port {0} is disabled by configuration")]
    PortDisabled(String),

    #[error("identifier {id} is outside the {space} space")]
    InvalidPortId { id: u16, space: &'static str },

    #[error("anonymous nodes cannot {0}")]
    Anonymous(&'static str),

    // RPC errors
    #[error("no response within {0:?}")]
    Timeout(Duration),

    #[error("call cancelled: node is closing")]
    Cancelled,

    // Lifecycle errors
    #[error("node is closed")]
    NodeClosed,

    #[error("node is not started")]
    NotStarted,

    // Transport errors
    #[error("transport unavailable: {0}")]
    TransportUnavailable(String),
}

/// Faults raised while decoding an inbound serialized value.
///
/// These are absorbed-and-counted on subscription paths and surfaced
/// synchronously everywhere else.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("truncated input: {available} bytes where {expected} are required")]
    Truncated { expected: usize, available: usize },

    #[error("input of {len} bytes exceeds the {extent}-byte extent")]
    OverExtent { len: usize, extent: usize },

    #[error("length prefix {length} exceeds the {remaining} remaining bytes")]
    IllFormedLengthPrefix { length: usize, remaining: usize },

    #[error("invalid discriminant {value} for {what}")]
    InvalidDiscriminant { what: &'static str, value: u64 },
}

/// Result type for Tessera operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_error_converts() {
        let err: Error = DecodeError::OverExtent { len: 10, extent: 8 }.into();
        assert!(matches!(err, Error::Decode(_)));
    }

    #[test]
    fn test_error_messages_name_the_register() {
        let err = Error::ImmutableRegister("motor.gain".into());
        assert!(err.to_string().contains("motor.gain"));
    }
}

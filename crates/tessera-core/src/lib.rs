//! Tessera Core - Fundamental types and primitives
//!
//! This crate defines the types shared by every layer of the Tessera stack:
//! - Identifiers (NodeId, SubjectId, ServiceId, TransferId)
//! - Transfer priority levels
//! - Node status enums (Health, Mode)
//! - The error taxonomy

pub mod error;
pub mod id;
pub mod status;

pub use error::*;
pub use id::*;
pub use status::*;

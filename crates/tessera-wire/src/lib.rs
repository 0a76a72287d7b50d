//! Tessera Wire - Serialization contract and wire frames
//!
//! This crate provides:
//! - Type descriptors (bit-length bounds, extent, sealed/delimited status)
//! - The bit-level cursor pair (`BitWriter` / `BitReader`)
//! - The `Message` and `Service` codec traits
//! - The transport frame (header + payload)
//!
//! Serialization is little-endian at the bit level: fields pack LSB-first
//! in declaration order, and non-sealed nested values carry a byte-length
//! prefix so decoders built against other schema versions can skip what
//! they do not recognize.

pub mod cursor;
pub mod descriptor;
pub mod frame;
pub mod header;
pub mod message;

pub use cursor::*;
pub use descriptor::*;
pub use frame::*;
pub use header::*;
pub use message::*;

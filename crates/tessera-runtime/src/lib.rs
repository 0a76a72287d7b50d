//! Tessera Runtime - Node orchestration
//!
//! This crate ties the stack together:
//! - `Node`: identity, lifecycle, frame dispatch, and the heartbeat task
//! - Ports: typed publishers and subscribers over subject identifiers
//! - RPC: request/response correlation over service identifiers
//! - Standard services: info, register access/list, and command execution
//!
//! The scheduling model is cooperative: the dispatch loop, the heartbeat,
//! and each server loop are independent tokio tasks that suspend only at
//! transport, timer, and queue boundaries, and terminate cooperatively
//! when the node closes.

pub mod node;
pub mod port;
pub mod rpc;
pub mod standard;

pub use node::*;
pub use port::*;
pub use rpc::*;
pub use standard::*;

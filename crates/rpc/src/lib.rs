//! Generic async RPC server message pump and protocol framework.
//!
//! This crate provides protocol-agnostic primitives for serving async RPC calls:
//! * `MainLoop`: A tokio-driven message pump that runs request handlers concurrently
//! * `Protocol`: Trait for defining wire formats and message semantics
//! * `Inbound`: Classification of messages read off the wire

#![warn(missing_docs)]

pub mod mainloop;
pub mod protocol;

pub use mainloop::MainLoop;
pub use protocol::{Inbound, Protocol};

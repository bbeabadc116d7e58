//! Shared wire types for the keyhost import protocol.
//!
//! This crate defines the messages exchanged between a host process and the
//! import server over a Unix domain socket or stdio. Frames are postcard
//! encoded behind a little-endian `u32` length prefix.

#![warn(missing_docs)]

pub mod protocol;
pub mod types;

pub use protocol::{DEFAULT_MAX_FRAME_LEN, ImportProtocol};
pub use types::*;

//! Plugin-side API for keyhost imports.
//!
//! An import is configured once from a string-keyed [`Map`] and then answers
//! batched [`GetReq`]s. Disposal is an optional capability exposed through
//! [`Import::closer`].
//!
//! Values cross the RPC boundary as [`keyhost_proto::WireValue`]; the
//! [`encoding`] module converts between that form and the native [`Value`].

#![warn(missing_docs)]

pub mod encoding;
pub mod error;
pub mod import;
pub mod value;

pub use error::{Error, Result};
pub use import::{Closer, GetKey, GetReq, GetResult, Import, ImportFactory};
pub use value::{Map, Value};

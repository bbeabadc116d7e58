//! Server-side adapter hosting import instances behind an RPC boundary.
//!
//! # Purpose
//!
//! - Create import instances from a configuration value, answer batched lookups spanning many instances, and tear instances down.
//! - Own the mapping from [`InstanceId`] to live instances for the lifetime of the process.
//! - Exclude the import's own lookup logic and any enforcement of execution deadlines; deadlines are passed through untouched.
//!
//! # Mental model
//!
//! - A host process talks to one server over a socket or stdio and drives any number of independently configured instances.
//! - Configure builds a fresh instance from the factory, configures it, and only then registers it under a newly allocated id.
//! - Get splits one wire call into per-instance groups, resolves every group before touching any import, queries each import once per group, and flattens the results.
//! - Close removes the id first and disposes the instance afterwards; it never fails.
//! - The registry lock guards only the map mutation. Import calls run outside it and may overlap for the same instance.
//!
//! # Key types
//!
//! | Type | Meaning | Constraints | Constructed / mutated in |
//! |---|---|---|---|
//! | [`InstanceRegistry`] | Live instances keyed by id | MUST only contain configured instances; ids MUST never be reused | `InstanceRegistry::register`, `InstanceRegistry::remove` |
//! | [`ImportServer`] | Lifecycle and batch dispatch | MUST resolve every group before querying any import | `ImportServer::configure`, `ImportServer::get`, `ImportServer::close` |
//! | [`ImportService`] | Tower service mapping wire requests onto [`ImportServer`] | MUST surface failures as call-level errors only | `ImportService::call` |
//! | [`ServerError`] | Call failure taxonomy | MUST map onto one wire [`ErrorCode`](keyhost_proto::ErrorCode) | `ServerError::to_response` |
//! | [`ServerConfig`] | Socket and framing settings | MUST keep frame limit within `u32` | `ServerConfig::load` |
//!
//! # Invariants
//!
//! 1. Instance ids MUST be strictly increasing in allocation order and never reused after close.
//!    - Enforced in: `InstanceRegistry::register`
//!    - Tested by: `registry::tests::ids_increase_and_are_not_reused`, `server::tests::concurrency::concurrent_configures_allocate_distinct_ids`
//!    - Failure symptom: a host holding a stale id after close silently queries an unrelated instance.
//!
//! 2. The registry MUST NOT hold an instance whose configuration failed or never ran.
//!    - Enforced in: `ImportServer::configure`
//!    - Tested by: `server::tests::lifecycle::undecodable_config_registers_nothing`, `server::tests::lifecycle::rejected_config_registers_nothing`
//!    - Failure symptom: lookups reach half-initialized imports and fail with confusing plugin errors.
//!
//! 3. A get addressing any unknown instance MUST fail as a whole without querying any import.
//!    - Enforced in: `ImportServer::get`
//!    - Tested by: `server::tests::batch::one_unknown_instance_fails_whole_batch`
//!    - Failure symptom: callers receive partial result sets and treat missing keys as undefined.
//!
//! 4. Each import MUST be queried exactly once per get call with its whole group, in request order.
//!    - Enforced in: `ImportServer::get`
//!    - Tested by: `server::tests::batch::each_instance_queried_once_per_call`
//!    - Failure symptom: per-call backend overhead multiplies with the number of keys.
//!
//! 5. Close MUST succeed for unknown and already closed ids and MUST dispose an instance at most once.
//!    - Enforced in: `ImportServer::close`
//!    - Tested by: `server::tests::lifecycle::close_is_idempotent`, `server::tests::lifecycle::close_swallows_disposal_errors`
//!    - Failure symptom: transport retries of close surface spurious errors or double-free backend resources.
//!
//! 6. The registry lock MUST NOT be held across an import call.
//!    - Enforced in: `InstanceRegistry::lookup`, `ImportServer::get`
//!    - Tested by: `server::tests::concurrency::slow_get_does_not_block_configure`
//!    - Failure symptom: one slow import stalls every configure and close on the server.

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod ipc;
pub mod registry;
pub mod server;
pub mod service;

pub use config::{ConfigError, ServerConfig};
pub use error::{Result, ServerError};
pub use keyhost_proto::InstanceId;
pub use registry::InstanceRegistry;
pub use server::ImportServer;
pub use service::ImportService;

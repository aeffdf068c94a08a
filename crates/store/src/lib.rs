//! In-process storage backend for the scheduling engine.
//!
//! This crate provides:
//! - `MemoryStore`, implementing every repository contract in `tally-core`
//!   with conditional writes and dedup-key coalescing under one lock
//! - JSON snapshot persistence so the worker binary can keep state between
//!   invocations
//! - `StoreLock`, an advisory file lock serializing worker processes that
//!   share one snapshot

pub mod lock;
pub mod memory;
pub mod snapshot;

pub use lock::StoreLock;
pub use memory::MemoryStore;
pub use snapshot::{StoreState, StoredConfirmation};

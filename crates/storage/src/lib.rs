//! blueprint-storage: persistence for blueprint runtime data.
//!
//! Defines the [`BlueprintStorage`] trait with snapshot (transaction)
//! semantics, the row types it stores, an in-process backend
//! ([`MemoryStorage`]) and a backend-agnostic conformance suite.

pub mod conformance;
mod error;
mod memory;
mod record;
mod traits;

pub use error::StorageError;
pub use memory::{MemorySnapshot, MemoryStorage, DEFAULT_LOCK_TIMEOUT};
pub use record::{
    ActionLogRecord, EscalationLogRecord, LogStatus, RecordKey, RecordStateRecord,
    SlaInstanceRecord, SlaStatus, TransitionHistoryRecord,
};
pub use traits::BlueprintStorage;

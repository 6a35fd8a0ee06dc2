use blueprint_core::{BlueprintId, EscalationId, RecordId};
use uuid::Uuid;

/// All errors that can be returned by a BlueprintStorage implementation.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Optimistic concurrency conflict: the record's version moved on since
    /// it was read.
    #[error(
        "concurrent conflict on record {blueprint_id}/{record_id}: expected version {expected_version}"
    )]
    ConcurrentConflict {
        blueprint_id: BlueprintId,
        record_id: RecordId,
        expected_version: i64,
    },

    #[error("record state not found: {blueprint_id}/{record_id}")]
    RecordNotFound {
        blueprint_id: BlueprintId,
        record_id: RecordId,
    },

    #[error("record already initialized: {blueprint_id}/{record_id}")]
    AlreadyInitialized {
        blueprint_id: BlueprintId,
        record_id: RecordId,
    },

    /// The per-record lock could not be acquired in time.
    #[error("timed out waiting for lock on record {blueprint_id}/{record_id}")]
    LockTimeout {
        blueprint_id: BlueprintId,
        record_id: RecordId,
    },

    #[error("sla instance not found: {id}")]
    SlaInstanceNotFound { id: Uuid },

    /// A record may have at most one active SLA instance.
    #[error("record {blueprint_id}/{record_id} already has an active sla instance {existing}")]
    ActiveSlaExists {
        blueprint_id: BlueprintId,
        record_id: RecordId,
        existing: Uuid,
    },

    /// An escalation fires at most once per SLA instance.
    #[error("escalation {escalation_id} already logged for sla instance {sla_instance_id}")]
    DuplicateEscalationLog {
        sla_instance_id: Uuid,
        escalation_id: EscalationId,
    },

    /// A backend-specific storage error (connection, serialization, poisoned lock, ...).
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StorageError {
    /// Conflicts and lock timeouts are transient; a caller may retry.
    pub fn is_contention(&self) -> bool {
        matches!(
            self,
            StorageError::ConcurrentConflict { .. } | StorageError::LockTimeout { .. }
        )
    }
}

use async_trait::async_trait;
use blueprint_core::{BlueprintId, StateId};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::StorageError;
use crate::record::{
    ActionLogRecord, EscalationLogRecord, RecordKey, RecordStateRecord, SlaInstanceRecord,
    SlaStatus, TransitionHistoryRecord,
};

/// The storage trait for blueprint runtime data.
///
/// A `BlueprintStorage` implementation provides transactional storage for
/// record states, transition history, SLA instances and the action and
/// escalation logs.
///
/// ## Snapshot Semantics
///
/// All mutating operations (except [`append_action_log`]) take
/// `&mut Self::Snapshot`, a type representing an in-progress transaction:
///
/// 1. `begin_snapshot()` starts a transaction
/// 2. call mutating methods with `&mut snapshot`
/// 3. `commit_snapshot(snapshot)` makes them visible,
///    OR `abort_snapshot(snapshot)` discards them
///
/// A `Snapshot` dropped without committing MUST be rolled back.
///
/// ## Record locks
///
/// Every write, and every `*_for_update` read, takes an exclusive lock on the
/// owning record (`SELECT ... FOR UPDATE` semantics) that is held until the
/// snapshot ends. Waiting longer than the backend's lock timeout returns
/// `Err(StorageError::LockTimeout)`.
///
/// ## OCC Conflict Detection
///
/// `update_record_state` is conditional on `version = expected_version`;
/// a mismatch returns `Err(StorageError::ConcurrentConflict)`.
///
/// [`append_action_log`]: BlueprintStorage::append_action_log
#[async_trait]
pub trait BlueprintStorage: Send + Sync + 'static {
    /// The snapshot (transaction) type used by this storage backend.
    type Snapshot: Send;

    // ── Snapshot lifecycle ────────────────────────────────────────────────────

    async fn begin_snapshot(&self) -> Result<Self::Snapshot, StorageError>;

    async fn commit_snapshot(&self, snapshot: Self::Snapshot) -> Result<(), StorageError>;

    async fn abort_snapshot(&self, snapshot: Self::Snapshot) -> Result<(), StorageError>;

    // ── Record state (within snapshot) ───────────────────────────────────────

    /// Insert the first state row for a record. `record.version` is stored as given.
    ///
    /// Returns `Err(StorageError::AlreadyInitialized)` if a row already exists.
    async fn initialize_record_state(
        &self,
        snapshot: &mut Self::Snapshot,
        record: RecordStateRecord,
    ) -> Result<(), StorageError>;

    /// Lock a record and read its state.
    ///
    /// The lock is taken even when no row exists, so a caller can safely
    /// initialize after `Err(StorageError::RecordNotFound)`.
    async fn get_record_state_for_update(
        &self,
        snapshot: &mut Self::Snapshot,
        key: RecordKey,
    ) -> Result<RecordStateRecord, StorageError>;

    /// Move a record to `new_state` if its version is still `expected_version`.
    ///
    /// Returns the new version number on success.
    async fn update_record_state(
        &self,
        snapshot: &mut Self::Snapshot,
        key: RecordKey,
        expected_version: i64,
        new_state: StateId,
        entered_at: OffsetDateTime,
    ) -> Result<i64, StorageError>;

    /// Delete a record's state row.
    async fn remove_record_state(
        &self,
        snapshot: &mut Self::Snapshot,
        key: RecordKey,
    ) -> Result<(), StorageError>;

    async fn insert_transition_history(
        &self,
        snapshot: &mut Self::Snapshot,
        record: TransitionHistoryRecord,
    ) -> Result<(), StorageError>;

    // ── SLA instances (within snapshot) ──────────────────────────────────────

    /// Start an SLA clock.
    ///
    /// Returns `Err(StorageError::ActiveSlaExists)` if the record already has
    /// an active instance.
    async fn open_sla_instance(
        &self,
        snapshot: &mut Self::Snapshot,
        record: SlaInstanceRecord,
    ) -> Result<(), StorageError>;

    /// Lock a record and read its active SLA instance, if any.
    async fn get_active_sla_instance_for_update(
        &self,
        snapshot: &mut Self::Snapshot,
        key: RecordKey,
    ) -> Result<Option<SlaInstanceRecord>, StorageError>;

    /// Lock the record owning an SLA instance and read the instance.
    ///
    /// Returns `Err(StorageError::SlaInstanceNotFound)` if no such instance exists.
    async fn get_sla_instance_for_update(
        &self,
        snapshot: &mut Self::Snapshot,
        id: Uuid,
    ) -> Result<SlaInstanceRecord, StorageError>;

    /// Stop an SLA clock with a final status. Returns the updated instance.
    async fn close_sla_instance(
        &self,
        snapshot: &mut Self::Snapshot,
        id: Uuid,
        status: SlaStatus,
        closed_at: OffsetDateTime,
    ) -> Result<SlaInstanceRecord, StorageError>;

    /// Stamp the breach time on a still-active instance. Stamping an
    /// instance that already has `breached_at` keeps the first stamp.
    async fn mark_sla_breached(
        &self,
        snapshot: &mut Self::Snapshot,
        id: Uuid,
        breached_at: OffsetDateTime,
    ) -> Result<SlaInstanceRecord, StorageError>;

    /// Record a fired escalation.
    ///
    /// Returns `Err(StorageError::DuplicateEscalationLog)` if this escalation
    /// was already logged for the instance.
    async fn insert_escalation_log(
        &self,
        snapshot: &mut Self::Snapshot,
        record: EscalationLogRecord,
    ) -> Result<(), StorageError>;

    // ── Outside snapshot ─────────────────────────────────────────────────────

    /// Append an action outcome. Actions run after the transition commits,
    /// so their logs are written on their own.
    async fn append_action_log(&self, record: ActionLogRecord) -> Result<(), StorageError>;

    // ── Query operations (committed data, no locks) ──────────────────────────

    async fn get_record_state(&self, key: RecordKey) -> Result<RecordStateRecord, StorageError>;

    /// All record states under a blueprint, optionally filtered by state.
    async fn list_record_states(
        &self,
        blueprint_id: BlueprintId,
        state_filter: Option<StateId>,
    ) -> Result<Vec<RecordStateRecord>, StorageError>;

    /// Every SLA instance still in status `Active`, across all blueprints.
    async fn list_active_sla_instances(&self) -> Result<Vec<SlaInstanceRecord>, StorageError>;

    /// All SLA instances of one record, oldest first.
    async fn list_sla_instances(
        &self,
        key: RecordKey,
    ) -> Result<Vec<SlaInstanceRecord>, StorageError>;

    async fn get_sla_instance(&self, id: Uuid) -> Result<SlaInstanceRecord, StorageError>;

    /// Transition history of one record, newest first.
    async fn list_transition_history(
        &self,
        key: RecordKey,
    ) -> Result<Vec<TransitionHistoryRecord>, StorageError>;

    /// Action logs written for one transition history entry, in append order.
    async fn list_action_logs(
        &self,
        history_id: Uuid,
    ) -> Result<Vec<ActionLogRecord>, StorageError>;

    /// Escalation logs of one SLA instance, in insertion order.
    async fn list_escalation_logs(
        &self,
        sla_instance_id: Uuid,
    ) -> Result<Vec<EscalationLogRecord>, StorageError>;
}

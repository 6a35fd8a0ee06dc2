//! In-process `BlueprintStorage` backend.
//!
//! Committed rows live in plain tables behind a `std::sync::Mutex` that is
//! never held across an await. Each snapshot keeps its writes in a private
//! overlay plus the owned guards of every record it has locked; commit
//! applies the overlay, dropping the snapshot discards it.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use blueprint_core::{BlueprintId, StateId};
use time::OffsetDateTime;
use tokio::sync::{Mutex as RecordLock, OwnedMutexGuard};
use uuid::Uuid;

use crate::error::StorageError;
use crate::record::{
    ActionLogRecord, EscalationLogRecord, RecordKey, RecordStateRecord, SlaInstanceRecord,
    SlaStatus, TransitionHistoryRecord,
};
use crate::traits::BlueprintStorage;

/// Lock wait used by [`MemoryStorage::new`].
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_millis(2000);

/// Thread-safe in-memory storage. Cloning shares the same tables.
#[derive(Clone)]
pub struct MemoryStorage {
    shared: Arc<Shared>,
}

struct Shared {
    tables: Mutex<Tables>,
    locks: Mutex<HashMap<RecordKey, Arc<RecordLock<()>>>>,
    lock_timeout: Duration,
}

#[derive(Default)]
struct Tables {
    record_states: BTreeMap<RecordKey, RecordStateRecord>,
    sla_instances: Vec<SlaInstanceRecord>,
    history: Vec<TransitionHistoryRecord>,
    action_logs: Vec<ActionLogRecord>,
    escalation_logs: Vec<EscalationLogRecord>,
}

/// Uncommitted writes plus the record locks held by one transaction.
pub struct MemorySnapshot {
    guards: BTreeMap<RecordKey, OwnedMutexGuard<()>>,
    /// `None` marks a removed row.
    record_states: BTreeMap<RecordKey, Option<RecordStateRecord>>,
    sla_instances: Vec<SlaInstanceRecord>,
    history: Vec<TransitionHistoryRecord>,
    escalation_logs: Vec<EscalationLogRecord>,
}

impl MemorySnapshot {
    fn upsert_sla(&mut self, instance: SlaInstanceRecord) {
        match self.sla_instances.iter_mut().find(|i| i.id == instance.id) {
            Some(slot) => *slot = instance,
            None => self.sla_instances.push(instance),
        }
    }

    /// Number of records this snapshot currently holds locks on.
    pub fn locked_records(&self) -> usize {
        self.guards.len()
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::with_lock_timeout(DEFAULT_LOCK_TIMEOUT)
    }

    pub fn with_lock_timeout(lock_timeout: Duration) -> Self {
        MemoryStorage {
            shared: Arc::new(Shared {
                tables: Mutex::new(Tables::default()),
                locks: Mutex::new(HashMap::new()),
                lock_timeout,
            }),
        }
    }

    fn tables(&self) -> Result<MutexGuard<'_, Tables>, StorageError> {
        self.shared
            .tables
            .lock()
            .map_err(|_| StorageError::Backend("storage tables mutex poisoned".to_string()))
    }

    fn record_lock(&self, key: RecordKey) -> Result<Arc<RecordLock<()>>, StorageError> {
        let mut locks = self
            .shared
            .locks
            .lock()
            .map_err(|_| StorageError::Backend("record lock table poisoned".to_string()))?;
        Ok(locks
            .entry(key)
            .or_insert_with(|| Arc::new(RecordLock::new(())))
            .clone())
    }

    /// Drop a finished snapshot's guards, then forget every record lock that
    /// nobody holds or waits on.
    fn release(&self, guards: BTreeMap<RecordKey, OwnedMutexGuard<()>>) -> Result<(), StorageError> {
        drop(guards);
        let mut locks = self
            .shared
            .locks
            .lock()
            .map_err(|_| StorageError::Backend("record lock table poisoned".to_string()))?;
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        Ok(())
    }

    #[cfg(test)]
    fn lock_table_len(&self) -> usize {
        self.shared.locks.lock().map(|l| l.len()).unwrap_or_default()
    }

    /// Take the record lock for the rest of the snapshot. Re-entrant within
    /// one snapshot.
    async fn lock(&self, snapshot: &mut MemorySnapshot, key: RecordKey) -> Result<(), StorageError> {
        if snapshot.guards.contains_key(&key) {
            return Ok(());
        }
        let lock = self.record_lock(key)?;
        let guard = tokio::time::timeout(self.shared.lock_timeout, lock.lock_owned())
            .await
            .map_err(|_| StorageError::LockTimeout {
                blueprint_id: key.blueprint_id,
                record_id: key.record_id,
            })?;
        snapshot.guards.insert(key, guard);
        Ok(())
    }

    fn visible_state(
        snapshot: &MemorySnapshot,
        tables: &Tables,
        key: RecordKey,
    ) -> Option<RecordStateRecord> {
        match snapshot.record_states.get(&key) {
            Some(pending) => pending.clone(),
            None => tables.record_states.get(&key).cloned(),
        }
    }

    fn visible_sla(
        snapshot: &MemorySnapshot,
        tables: &Tables,
        id: Uuid,
    ) -> Option<SlaInstanceRecord> {
        snapshot
            .sla_instances
            .iter()
            .find(|i| i.id == id)
            .or_else(|| tables.sla_instances.iter().find(|i| i.id == id))
            .cloned()
    }

    fn visible_active_sla(
        snapshot: &MemorySnapshot,
        tables: &Tables,
        key: RecordKey,
    ) -> Option<SlaInstanceRecord> {
        let pending = snapshot
            .sla_instances
            .iter()
            .find(|i| i.key() == key && i.is_active());
        if let Some(found) = pending {
            return Some(found.clone());
        }
        tables
            .sla_instances
            .iter()
            .filter(|i| !snapshot.sla_instances.iter().any(|p| p.id == i.id))
            .find(|i| i.key() == key && i.is_active())
            .cloned()
    }

    /// Locate the owning record of an SLA instance, lock it, then read the
    /// instance again under the lock.
    async fn lock_sla(
        &self,
        snapshot: &mut MemorySnapshot,
        id: Uuid,
    ) -> Result<SlaInstanceRecord, StorageError> {
        let key = {
            let tables = self.tables()?;
            Self::visible_sla(snapshot, &tables, id)
                .map(|i| i.key())
                .ok_or(StorageError::SlaInstanceNotFound { id })?
        };
        self.lock(snapshot, key).await?;
        let tables = self.tables()?;
        Self::visible_sla(snapshot, &tables, id).ok_or(StorageError::SlaInstanceNotFound { id })
    }
}

#[async_trait]
impl BlueprintStorage for MemoryStorage {
    type Snapshot = MemorySnapshot;

    async fn begin_snapshot(&self) -> Result<MemorySnapshot, StorageError> {
        Ok(MemorySnapshot {
            guards: BTreeMap::new(),
            record_states: BTreeMap::new(),
            sla_instances: Vec::new(),
            history: Vec::new(),
            escalation_logs: Vec::new(),
        })
    }

    async fn commit_snapshot(&self, snapshot: MemorySnapshot) -> Result<(), StorageError> {
        let MemorySnapshot {
            guards,
            record_states,
            sla_instances,
            history,
            escalation_logs,
        } = snapshot;
        {
            let mut tables = self.tables()?;
            for (key, row) in record_states {
                match row {
                    Some(row) => {
                        tables.record_states.insert(key, row);
                    }
                    None => {
                        tables.record_states.remove(&key);
                    }
                }
            }
            for instance in sla_instances {
                match tables.sla_instances.iter_mut().find(|i| i.id == instance.id) {
                    Some(slot) => *slot = instance,
                    None => tables.sla_instances.push(instance),
                }
            }
            tables.history.extend(history);
            tables.escalation_logs.extend(escalation_logs);
        }
        self.release(guards)
    }

    async fn abort_snapshot(&self, snapshot: MemorySnapshot) -> Result<(), StorageError> {
        self.release(snapshot.guards)
    }

    async fn initialize_record_state(
        &self,
        snapshot: &mut MemorySnapshot,
        record: RecordStateRecord,
    ) -> Result<(), StorageError> {
        let key = record.key();
        self.lock(snapshot, key).await?;
        let tables = self.tables()?;
        if Self::visible_state(snapshot, &tables, key).is_some() {
            return Err(StorageError::AlreadyInitialized {
                blueprint_id: key.blueprint_id,
                record_id: key.record_id,
            });
        }
        snapshot.record_states.insert(key, Some(record));
        Ok(())
    }

    async fn get_record_state_for_update(
        &self,
        snapshot: &mut MemorySnapshot,
        key: RecordKey,
    ) -> Result<RecordStateRecord, StorageError> {
        self.lock(snapshot, key).await?;
        let tables = self.tables()?;
        Self::visible_state(snapshot, &tables, key).ok_or(StorageError::RecordNotFound {
            blueprint_id: key.blueprint_id,
            record_id: key.record_id,
        })
    }

    async fn update_record_state(
        &self,
        snapshot: &mut MemorySnapshot,
        key: RecordKey,
        expected_version: i64,
        new_state: StateId,
        entered_at: OffsetDateTime,
    ) -> Result<i64, StorageError> {
        self.lock(snapshot, key).await?;
        let tables = self.tables()?;
        let current =
            Self::visible_state(snapshot, &tables, key).ok_or(StorageError::RecordNotFound {
                blueprint_id: key.blueprint_id,
                record_id: key.record_id,
            })?;
        if current.version != expected_version {
            return Err(StorageError::ConcurrentConflict {
                blueprint_id: key.blueprint_id,
                record_id: key.record_id,
                expected_version,
            });
        }
        let new_version = current.version + 1;
        snapshot.record_states.insert(
            key,
            Some(RecordStateRecord {
                current_state_id: new_state,
                state_entered_at: entered_at,
                version: new_version,
                updated_at: entered_at,
                ..current
            }),
        );
        Ok(new_version)
    }

    async fn remove_record_state(
        &self,
        snapshot: &mut MemorySnapshot,
        key: RecordKey,
    ) -> Result<(), StorageError> {
        self.lock(snapshot, key).await?;
        let tables = self.tables()?;
        if Self::visible_state(snapshot, &tables, key).is_none() {
            return Err(StorageError::RecordNotFound {
                blueprint_id: key.blueprint_id,
                record_id: key.record_id,
            });
        }
        snapshot.record_states.insert(key, None);
        Ok(())
    }

    async fn insert_transition_history(
        &self,
        snapshot: &mut MemorySnapshot,
        record: TransitionHistoryRecord,
    ) -> Result<(), StorageError> {
        let key = RecordKey::new(record.blueprint_id, record.record_id);
        self.lock(snapshot, key).await?;
        snapshot.history.push(record);
        Ok(())
    }

    async fn open_sla_instance(
        &self,
        snapshot: &mut MemorySnapshot,
        record: SlaInstanceRecord,
    ) -> Result<(), StorageError> {
        let key = record.key();
        self.lock(snapshot, key).await?;
        let tables = self.tables()?;
        if let Some(existing) = Self::visible_active_sla(snapshot, &tables, key) {
            return Err(StorageError::ActiveSlaExists {
                blueprint_id: key.blueprint_id,
                record_id: key.record_id,
                existing: existing.id,
            });
        }
        drop(tables);
        snapshot.upsert_sla(record);
        Ok(())
    }

    async fn get_active_sla_instance_for_update(
        &self,
        snapshot: &mut MemorySnapshot,
        key: RecordKey,
    ) -> Result<Option<SlaInstanceRecord>, StorageError> {
        self.lock(snapshot, key).await?;
        let tables = self.tables()?;
        Ok(Self::visible_active_sla(snapshot, &tables, key))
    }

    async fn get_sla_instance_for_update(
        &self,
        snapshot: &mut MemorySnapshot,
        id: Uuid,
    ) -> Result<SlaInstanceRecord, StorageError> {
        self.lock_sla(snapshot, id).await
    }

    async fn close_sla_instance(
        &self,
        snapshot: &mut MemorySnapshot,
        id: Uuid,
        status: SlaStatus,
        closed_at: OffsetDateTime,
    ) -> Result<SlaInstanceRecord, StorageError> {
        let mut instance = self.lock_sla(snapshot, id).await?;
        if instance.closed_at.is_some() {
            return Ok(instance);
        }
        instance.status = status;
        instance.closed_at = Some(closed_at);
        snapshot.upsert_sla(instance.clone());
        Ok(instance)
    }

    async fn mark_sla_breached(
        &self,
        snapshot: &mut MemorySnapshot,
        id: Uuid,
        breached_at: OffsetDateTime,
    ) -> Result<SlaInstanceRecord, StorageError> {
        let mut instance = self.lock_sla(snapshot, id).await?;
        if instance.breached_at.is_none() {
            instance.breached_at = Some(breached_at);
            snapshot.upsert_sla(instance.clone());
        }
        Ok(instance)
    }

    async fn insert_escalation_log(
        &self,
        snapshot: &mut MemorySnapshot,
        record: EscalationLogRecord,
    ) -> Result<(), StorageError> {
        self.lock_sla(snapshot, record.sla_instance_id).await?;
        let tables = self.tables()?;
        let duplicate = tables
            .escalation_logs
            .iter()
            .chain(snapshot.escalation_logs.iter())
            .any(|l| {
                l.sla_instance_id == record.sla_instance_id
                    && l.escalation_id == record.escalation_id
            });
        if duplicate {
            return Err(StorageError::DuplicateEscalationLog {
                sla_instance_id: record.sla_instance_id,
                escalation_id: record.escalation_id,
            });
        }
        drop(tables);
        snapshot.escalation_logs.push(record);
        Ok(())
    }

    async fn append_action_log(&self, record: ActionLogRecord) -> Result<(), StorageError> {
        self.tables()?.action_logs.push(record);
        Ok(())
    }

    async fn get_record_state(&self, key: RecordKey) -> Result<RecordStateRecord, StorageError> {
        self.tables()?
            .record_states
            .get(&key)
            .cloned()
            .ok_or(StorageError::RecordNotFound {
                blueprint_id: key.blueprint_id,
                record_id: key.record_id,
            })
    }

    async fn list_record_states(
        &self,
        blueprint_id: BlueprintId,
        state_filter: Option<StateId>,
    ) -> Result<Vec<RecordStateRecord>, StorageError> {
        Ok(self
            .tables()?
            .record_states
            .values()
            .filter(|r| r.blueprint_id == blueprint_id)
            .filter(|r| state_filter.map_or(true, |s| r.current_state_id == s))
            .cloned()
            .collect())
    }

    async fn list_active_sla_instances(&self) -> Result<Vec<SlaInstanceRecord>, StorageError> {
        Ok(self
            .tables()?
            .sla_instances
            .iter()
            .filter(|i| i.is_active())
            .cloned()
            .collect())
    }

    async fn list_sla_instances(
        &self,
        key: RecordKey,
    ) -> Result<Vec<SlaInstanceRecord>, StorageError> {
        Ok(self
            .tables()?
            .sla_instances
            .iter()
            .filter(|i| i.key() == key)
            .cloned()
            .collect())
    }

    async fn get_sla_instance(&self, id: Uuid) -> Result<SlaInstanceRecord, StorageError> {
        self.tables()?
            .sla_instances
            .iter()
            .find(|i| i.id == id)
            .cloned()
            .ok_or(StorageError::SlaInstanceNotFound { id })
    }

    async fn list_transition_history(
        &self,
        key: RecordKey,
    ) -> Result<Vec<TransitionHistoryRecord>, StorageError> {
        Ok(self
            .tables()?
            .history
            .iter()
            .rev()
            .filter(|h| RecordKey::new(h.blueprint_id, h.record_id) == key)
            .cloned()
            .collect())
    }

    async fn list_action_logs(
        &self,
        history_id: Uuid,
    ) -> Result<Vec<ActionLogRecord>, StorageError> {
        Ok(self
            .tables()?
            .action_logs
            .iter()
            .filter(|l| l.history_id == history_id)
            .cloned()
            .collect())
    }

    async fn list_escalation_logs(
        &self,
        sla_instance_id: Uuid,
    ) -> Result<Vec<EscalationLogRecord>, StorageError> {
        Ok(self
            .tables()?
            .escalation_logs
            .iter()
            .filter(|l| l.sla_instance_id == sla_instance_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blueprint_core::RecordId;
    use time::macros::datetime;

    fn key() -> RecordKey {
        RecordKey::new(BlueprintId(1), RecordId(42))
    }

    fn state_row() -> RecordStateRecord {
        let at = datetime!(2025-03-03 09:00 UTC);
        RecordStateRecord {
            blueprint_id: BlueprintId(1),
            record_id: RecordId(42),
            current_state_id: StateId(1),
            state_entered_at: at,
            version: 0,
            updated_at: at,
        }
    }

    #[tokio::test]
    async fn second_locker_times_out() {
        let storage = MemoryStorage::with_lock_timeout(Duration::from_millis(50));
        let mut holder = storage.begin_snapshot().await.unwrap();
        storage
            .initialize_record_state(&mut holder, state_row())
            .await
            .unwrap();

        let mut waiter = storage.begin_snapshot().await.unwrap();
        let err = storage
            .get_record_state_for_update(&mut waiter, key())
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::LockTimeout { .. }));

        storage.commit_snapshot(holder).await.unwrap();
        let row = storage
            .get_record_state_for_update(&mut waiter, key())
            .await
            .unwrap();
        assert_eq!(row.version, 0);
    }

    #[tokio::test]
    async fn lock_is_reentrant_within_a_snapshot() {
        let storage = MemoryStorage::with_lock_timeout(Duration::from_millis(50));
        let mut snap = storage.begin_snapshot().await.unwrap();
        storage
            .initialize_record_state(&mut snap, state_row())
            .await
            .unwrap();
        storage
            .get_record_state_for_update(&mut snap, key())
            .await
            .unwrap();
        storage
            .update_record_state(&mut snap, key(), 0, StateId(2), datetime!(2025-03-03 10:00 UTC))
            .await
            .unwrap();
        assert_eq!(snap.locked_records(), 1);
        storage.commit_snapshot(snap).await.unwrap();
        assert_eq!(storage.get_record_state(key()).await.unwrap().version, 1);
    }

    #[tokio::test]
    async fn dropped_snapshot_releases_lock_and_discards_writes() {
        let storage = MemoryStorage::with_lock_timeout(Duration::from_millis(50));
        {
            let mut snap = storage.begin_snapshot().await.unwrap();
            storage
                .initialize_record_state(&mut snap, state_row())
                .await
                .unwrap();
        }
        assert!(matches!(
            storage.get_record_state(key()).await,
            Err(StorageError::RecordNotFound { .. })
        ));
        let mut snap = storage.begin_snapshot().await.unwrap();
        storage
            .initialize_record_state(&mut snap, state_row())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn finished_snapshots_leave_no_idle_locks_behind() {
        let storage = MemoryStorage::with_lock_timeout(Duration::from_millis(50));
        for record in 1..=3 {
            let mut snap = storage.begin_snapshot().await.unwrap();
            let row = RecordStateRecord {
                record_id: RecordId(record),
                ..state_row()
            };
            storage.initialize_record_state(&mut snap, row).await.unwrap();
            storage.commit_snapshot(snap).await.unwrap();
        }
        assert_eq!(storage.lock_table_len(), 0);

        let mut holder = storage.begin_snapshot().await.unwrap();
        storage
            .get_record_state_for_update(&mut holder, RecordKey::new(BlueprintId(1), RecordId(1)))
            .await
            .unwrap();
        let mut other = storage.begin_snapshot().await.unwrap();
        storage
            .remove_record_state(&mut other, RecordKey::new(BlueprintId(1), RecordId(2)))
            .await
            .unwrap();
        storage.commit_snapshot(other).await.unwrap();
        assert_eq!(storage.lock_table_len(), 1);

        storage.abort_snapshot(holder).await.unwrap();
        assert_eq!(storage.lock_table_len(), 0);
    }
}

//! The transition engine: record placement, eligibility and atomic
//! transitions.
//!
//! Every state change runs inside one storage snapshot holding the record's
//! lock: read the current state, re-check the guard and requirements, close
//! the outgoing SLA, move the record, write history, open the incoming SLA,
//! commit. Actions run after the commit and cannot undo it.

use std::sync::Arc;

use blueprint_core::{
    snapshot_to_json, ActorId, BlueprintDefinition, BlueprintId, DefinitionError, FieldSnapshot,
    RecordId, RequirementsData, StateId, Transition, TransitionId,
};
use blueprint_storage::{
    ActionLogRecord, BlueprintStorage, RecordKey, RecordStateRecord, SlaInstanceRecord, SlaStatus,
    StorageError, TransitionHistoryRecord,
};
use serde::Serialize;
use time::OffsetDateTime;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::action::{ActionContext, ActionExecutor, ActionResult};
use crate::calendar::BusinessCalendar;
use crate::clock::Clock;
use crate::condition;
use crate::config::SchedulerConfig;
use crate::error::EngineError;
use crate::registry::BlueprintRegistry;
use crate::requirement;
use crate::scheduler::EscalationScheduler;
use crate::sla::{SlaStatusView, SlaTracker};

// ──────────────────────────────────────────────
// Results
// ──────────────────────────────────────────────

/// A transition offered to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransitionSummary {
    pub id: TransitionId,
    pub name: String,
    pub button_label: Option<String>,
    pub from_state: StateId,
    pub to_state: StateId,
    pub to_state_name: String,
    pub display_order: i32,
    /// The actor must submit [`RequirementsData`] to take this transition.
    pub has_requirements: bool,
}

impl TransitionSummary {
    pub fn new(def: &BlueprintDefinition, transition: &Transition) -> Self {
        TransitionSummary {
            id: transition.id,
            name: transition.name.clone(),
            button_label: transition.button_label.clone(),
            from_state: transition.from_state,
            to_state: transition.to_state,
            to_state_name: def.state_name(transition.to_state),
            display_order: transition.display_order,
            has_requirements: transition.required().next().is_some(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutedAction {
    pub action_id: blueprint_core::ActionId,
    #[serde(flatten)]
    pub result: ActionResult,
}

/// The committed transition plus the outcome of each of its actions.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransitionOutcome {
    pub new_state: StateId,
    pub history_entry_id: Uuid,
    pub action_results: Vec<ExecutedAction>,
}

impl TransitionOutcome {
    /// Actions that did not take effect. The transition itself stands.
    pub fn failed_actions(&self) -> impl Iterator<Item = &ExecutedAction> {
        self.action_results.iter().filter(|a| !a.result.is_success())
    }
}

/// One caller's transition attempt.
struct Request<'a> {
    transition_id: TransitionId,
    fields: &'a FieldSnapshot,
    data: &'a RequirementsData,
    actor: ActorId,
}

/// What the locked part of a transition wrote.
struct Committed {
    history: TransitionHistoryRecord,
    closed_sla: Option<SlaInstanceRecord>,
    opened_sla: Option<SlaInstanceRecord>,
}

// ──────────────────────────────────────────────
// TransitionEngine
// ──────────────────────────────────────────────

pub struct TransitionEngine<S: BlueprintStorage> {
    storage: Arc<S>,
    registry: BlueprintRegistry,
    executor: Arc<ActionExecutor>,
    tracker: SlaTracker,
}

impl<S: BlueprintStorage> TransitionEngine<S> {
    pub fn new(
        storage: Arc<S>,
        executor: Arc<ActionExecutor>,
        calendar: BusinessCalendar,
        clock: Arc<dyn Clock>,
    ) -> Self {
        TransitionEngine {
            storage,
            registry: BlueprintRegistry::new(),
            executor,
            tracker: SlaTracker::new(calendar, clock),
        }
    }

    pub fn storage(&self) -> &Arc<S> {
        &self.storage
    }

    pub fn registry(&self) -> &BlueprintRegistry {
        &self.registry
    }

    pub fn tracker(&self) -> &SlaTracker {
        &self.tracker
    }

    /// An escalation scheduler over the same storage, definitions, executor
    /// and clock.
    pub fn scheduler(&self, config: &SchedulerConfig) -> EscalationScheduler<S> {
        EscalationScheduler::new(
            Arc::clone(&self.storage),
            self.registry.clone(),
            Arc::clone(&self.executor),
            self.tracker.clone(),
            config,
        )
    }

    // ── Definitions ──────────────────────────────────────────────────

    pub fn activate(
        &self,
        definition: BlueprintDefinition,
    ) -> Result<Arc<BlueprintDefinition>, EngineError> {
        let def = self.registry.activate(definition)?;
        info!(blueprint_id = %def.id, name = %def.name, states = def.states.len(), "blueprint activated");
        Ok(def)
    }

    pub fn deactivate(&self, blueprint_id: BlueprintId) -> bool {
        let removed = self.registry.deactivate(blueprint_id).is_some();
        if removed {
            info!(%blueprint_id, "blueprint deactivated");
        }
        removed
    }

    pub fn definition(&self, blueprint_id: BlueprintId) -> Option<Arc<BlueprintDefinition>> {
        self.registry.get(blueprint_id)
    }

    // ── Record placement ─────────────────────────────────────────────

    /// Place a record in the blueprint. A record already placed is left
    /// where it is.
    pub async fn initialize_record(
        &self,
        blueprint_id: BlueprintId,
        record_id: RecordId,
        field_value: Option<&str>,
    ) -> Result<RecordStateRecord, EngineError> {
        let def = self.registry.require(blueprint_id)?;
        let key = RecordKey::new(blueprint_id, record_id);
        let mut snap = self.storage.begin_snapshot().await?;
        let placed = match self.storage.get_record_state_for_update(&mut snap, key).await {
            Ok(existing) => Ok(existing),
            Err(StorageError::RecordNotFound { .. }) => {
                let now = self.tracker.now();
                match placement(&def, field_value) {
                    Ok(state_id) => self.place_locked(&mut snap, &def, key, state_id, now).await,
                    Err(e) => Err(e),
                }
            }
            Err(e) => Err(e.into()),
        };
        self.finish(snap, placed).await
    }

    /// Import a record that is already part-way through the blueprint: it
    /// is placed in `state_id` as of `entered_at`, and that state's SLA
    /// clock starts at `entered_at`.
    ///
    /// Fails with [`StorageError::AlreadyInitialized`] if the record is
    /// already placed.
    pub async fn restore_record(
        &self,
        blueprint_id: BlueprintId,
        record_id: RecordId,
        state_id: StateId,
        entered_at: OffsetDateTime,
    ) -> Result<RecordStateRecord, EngineError> {
        let def = self.registry.require(blueprint_id)?;
        if def.state(state_id).is_none() {
            return Err(EngineError::UnknownState {
                blueprint_id,
                record_id,
                state_id,
            });
        }
        let key = RecordKey::new(blueprint_id, record_id);
        let mut snap = self.storage.begin_snapshot().await?;
        let placed = self
            .place_locked(&mut snap, &def, key, state_id, entered_at)
            .await;
        self.finish(snap, placed).await
    }

    /// Insert the first state row and open its SLA. Caller holds the lock.
    async fn place_locked(
        &self,
        snap: &mut S::Snapshot,
        def: &BlueprintDefinition,
        key: RecordKey,
        state_id: StateId,
        entered_at: OffsetDateTime,
    ) -> Result<RecordStateRecord, EngineError> {
        let row = RecordStateRecord {
            blueprint_id: key.blueprint_id,
            record_id: key.record_id,
            current_state_id: state_id,
            state_entered_at: entered_at,
            version: 0,
            updated_at: entered_at,
        };
        self.storage
            .initialize_record_state(snap, row.clone())
            .await?;
        let opened = self
            .open_sla_locked(snap, def, key, state_id, entered_at)
            .await?;
        info!(
            record = %key,
            state = %def.state_name(state_id),
            sla = opened.is_some(),
            "record entered blueprint"
        );
        Ok(row)
    }

    async fn open_sla_locked(
        &self,
        snap: &mut S::Snapshot,
        def: &BlueprintDefinition,
        key: RecordKey,
        state_id: StateId,
        now: OffsetDateTime,
    ) -> Result<Option<SlaInstanceRecord>, EngineError> {
        let Some(state) = def.state(state_id) else {
            return Ok(None);
        };
        if state.is_terminal {
            return Ok(None);
        }
        let Some(sla) = def.active_sla(state_id) else {
            return Ok(None);
        };
        let instance = self.tracker.open(key, state_id, sla, now)?;
        self.storage
            .open_sla_instance(snap, instance.clone())
            .await?;
        debug!(record = %key, sla = %sla.name, due_at = %instance.due_at, "sla opened");
        Ok(Some(instance))
    }

    /// Commit on success, abort on failure.
    async fn finish<T>(
        &self,
        snap: S::Snapshot,
        result: Result<T, EngineError>,
    ) -> Result<T, EngineError> {
        match result {
            Ok(value) => {
                self.storage.commit_snapshot(snap).await?;
                Ok(value)
            }
            Err(e) => {
                if let Err(abort) = self.storage.abort_snapshot(snap).await {
                    warn!(error = %abort, "snapshot abort failed");
                }
                Err(e)
            }
        }
    }

    fn governing_value(def: &BlueprintDefinition, fields: &FieldSnapshot) -> Option<String> {
        let field = def.governing_field.as_deref()?;
        fields.get(field)?.as_text()
    }

    /// The record's current state, placing it first if it has none.
    async fn current_state(
        &self,
        def: &BlueprintDefinition,
        key: RecordKey,
        fields: &FieldSnapshot,
    ) -> Result<StateId, EngineError> {
        match self.storage.get_record_state(key).await {
            Ok(row) => Ok(row.current_state_id),
            Err(StorageError::RecordNotFound { .. }) => {
                let value = Self::governing_value(def, fields);
                let row = self
                    .initialize_record(key.blueprint_id, key.record_id, value.as_deref())
                    .await?;
                Ok(row.current_state_id)
            }
            Err(e) => Err(e.into()),
        }
    }

    // ── Eligibility ──────────────────────────────────────────────────

    /// Transitions out of the record's current state whose guards hold for
    /// `fields`, in display order. Empty in a terminal state.
    pub async fn list_eligible(
        &self,
        blueprint_id: BlueprintId,
        record_id: RecordId,
        fields: &FieldSnapshot,
    ) -> Result<Vec<TransitionSummary>, EngineError> {
        let def = self.registry.require(blueprint_id)?;
        let key = RecordKey::new(blueprint_id, record_id);
        let current = self.current_state(&def, key, fields).await?;
        if def.state(current).is_none() {
            return Err(EngineError::UnknownState {
                blueprint_id,
                record_id,
                state_id: current,
            });
        }
        Ok(def
            .outgoing(current)
            .into_iter()
            .filter(|t| condition::evaluate(&t.conditions, fields))
            .map(|t| TransitionSummary::new(&def, t))
            .collect())
    }

    // ── Execution ────────────────────────────────────────────────────

    /// Move a record along `transition_id`.
    ///
    /// The guard is evaluated again under the record lock. On contention the
    /// attempt is repeated once against fresh state before giving up with
    /// [`EngineError::ConcurrentModification`].
    pub async fn execute(
        &self,
        blueprint_id: BlueprintId,
        record_id: RecordId,
        transition_id: TransitionId,
        fields: &FieldSnapshot,
        actor: ActorId,
    ) -> Result<TransitionOutcome, EngineError> {
        self.execute_with_requirements(
            blueprint_id,
            record_id,
            transition_id,
            fields,
            actor,
            &RequirementsData::default(),
        )
        .await
    }

    /// [`execute`](Self::execute) with the notes, attachments, checklist
    /// answers and field values the transition's requirements ask for.
    /// Fails with [`EngineError::RequirementsNotMet`] when a required one is
    /// missing; `data` is stored with the history entry and exposed to the
    /// transition's actions as `requirements_data`.
    pub async fn execute_with_requirements(
        &self,
        blueprint_id: BlueprintId,
        record_id: RecordId,
        transition_id: TransitionId,
        fields: &FieldSnapshot,
        actor: ActorId,
        data: &RequirementsData,
    ) -> Result<TransitionOutcome, EngineError> {
        let def = self.registry.require(blueprint_id)?;
        let key = RecordKey::new(blueprint_id, record_id);
        let request = Request {
            transition_id,
            fields,
            data,
            actor,
        };

        let committed = match self.attempt(&def, key, &request).await {
            Err(e) if is_contention(&e) => {
                debug!(record = %key, error = %e, "transition contended, retrying");
                match self.attempt(&def, key, &request).await {
                    Err(e) if is_contention(&e) => {
                        warn!(record = %key, %transition_id, "transition lost a concurrent race");
                        return Err(EngineError::ConcurrentModification {
                            blueprint_id,
                            record_id,
                        });
                    }
                    other => other?,
                }
            }
            other => other?,
        };

        let history = &committed.history;
        info!(
            record = %key,
            %transition_id,
            from = %def.state_name(history.from_state_id),
            to = %def.state_name(history.to_state_id),
            actor = %actor,
            closed_sla = ?committed.closed_sla.as_ref().map(|s| s.status.as_str()),
            opened_sla = committed.opened_sla.is_some(),
            "transition committed"
        );

        let action_results = match def.transition(transition_id) {
            Some(transition) => {
                self.run_actions(&def, key, transition, history, &request)
                    .await
            }
            None => Vec::new(),
        };

        Ok(TransitionOutcome {
            new_state: history.to_state_id,
            history_entry_id: history.id,
            action_results,
        })
    }

    async fn attempt(
        &self,
        def: &BlueprintDefinition,
        key: RecordKey,
        request: &Request<'_>,
    ) -> Result<Committed, EngineError> {
        let mut snap = self.storage.begin_snapshot().await?;
        let result = self.transition_locked(&mut snap, def, key, request).await;
        self.finish(snap, result).await
    }

    async fn transition_locked(
        &self,
        snap: &mut S::Snapshot,
        def: &BlueprintDefinition,
        key: RecordKey,
        request: &Request<'_>,
    ) -> Result<Committed, EngineError> {
        let Request {
            transition_id,
            fields,
            data,
            actor,
        } = *request;
        let now = self.tracker.now();
        let record = match self.storage.get_record_state_for_update(snap, key).await {
            Ok(row) => row,
            Err(StorageError::RecordNotFound { .. }) => {
                let value = Self::governing_value(def, fields);
                let state_id = placement(def, value.as_deref())?;
                self.place_locked(snap, def, key, state_id, now).await?
            }
            Err(e) => return Err(e.into()),
        };
        let current = record.current_state_id;
        if def.state(current).is_none() {
            return Err(EngineError::UnknownState {
                blueprint_id: key.blueprint_id,
                record_id: key.record_id,
                state_id: current,
            });
        }

        let invalid = |reason: String| EngineError::InvalidTransition {
            record_id: key.record_id,
            transition_id,
            current_state: current,
            reason,
        };
        let transition = def
            .transition(transition_id)
            .ok_or_else(|| invalid("no such transition".to_string()))?;
        if !transition.is_active {
            return Err(invalid("transition is inactive".to_string()));
        }
        if transition.from_state != current {
            return Err(invalid(format!(
                "transition leaves '{}' but the record is in '{}'",
                def.state_name(transition.from_state),
                def.state_name(current)
            )));
        }
        if !condition::evaluate(&transition.conditions, fields) {
            let failed = condition::failed_conditions(&transition.conditions, fields);
            info!(record = %key, %transition_id, failed = ?failed, "transition conditions not met");
            return Err(EngineError::ConditionNotMet {
                transition_id,
                failed,
            });
        }
        let missing = requirement::unmet_requirements(&transition.requirements, fields, data);
        if !missing.is_empty() {
            info!(record = %key, %transition_id, missing = ?missing, "transition requirements not met");
            return Err(EngineError::RequirementsNotMet {
                transition_id,
                missing,
            });
        }

        let closed_sla = match self
            .storage
            .get_active_sla_instance_for_update(snap, key)
            .await?
        {
            Some(instance) => {
                let status = self.tracker.close_status(&instance, now);
                Some(
                    self.storage
                        .close_sla_instance(snap, instance.id, status, now)
                        .await?,
                )
            }
            None => None,
        };

        self.storage
            .update_record_state(snap, key, record.version, transition.to_state, now)
            .await?;

        let history = TransitionHistoryRecord {
            id: Uuid::new_v4(),
            blueprint_id: key.blueprint_id,
            record_id: key.record_id,
            transition_id,
            from_state_id: current,
            to_state_id: transition.to_state,
            executed_by: actor,
            executed_at: now,
            field_snapshot: snapshot_to_json(fields),
            requirements_data: if data.is_empty() {
                serde_json::Value::Null
            } else {
                data.to_json()
            },
        };
        self.storage
            .insert_transition_history(snap, history.clone())
            .await?;

        let opened_sla = self
            .open_sla_locked(snap, def, key, transition.to_state, now)
            .await?;

        Ok(Committed {
            history,
            closed_sla,
            opened_sla,
        })
    }

    /// Run every active action in order and log each outcome. One failure
    /// does not stop the rest.
    async fn run_actions(
        &self,
        def: &BlueprintDefinition,
        key: RecordKey,
        transition: &Transition,
        history: &TransitionHistoryRecord,
        request: &Request<'_>,
    ) -> Vec<ExecutedAction> {
        let ctx = ActionContext::for_transition(
            def,
            key.record_id,
            transition,
            request.actor,
            history.executed_at,
            request.fields,
        )
        .with_requirements(request.data);
        let mut results = Vec::new();
        for action in transition.active_actions() {
            let result = self.executor.execute(action.kind, &action.config, &ctx).await;
            if let Some(error) = &result.error {
                warn!(record = %key, action_id = %action.id, kind = %action.kind, %error, "action failed");
            }
            let log = ActionLogRecord {
                id: Uuid::new_v4(),
                history_id: history.id,
                blueprint_id: key.blueprint_id,
                record_id: key.record_id,
                action_id: action.id,
                action_type: action.kind,
                status: result.status,
                result: result.result.clone(),
                error: result.error_message(),
                executed_at: self.tracker.now(),
            };
            if let Err(e) = self.storage.append_action_log(log).await {
                tracing::error!(record = %key, action_id = %action.id, error = %e, "action log write failed");
            }
            results.push(ExecutedAction {
                action_id: action.id,
                result,
            });
        }
        results
    }

    // ── Queries ──────────────────────────────────────────────────────

    /// The record's active SLA, if it has one.
    pub async fn sla_status(
        &self,
        blueprint_id: BlueprintId,
        record_id: RecordId,
    ) -> Result<Option<SlaStatusView>, EngineError> {
        let def = self.registry.require(blueprint_id)?;
        let key = RecordKey::new(blueprint_id, record_id);
        let record = match self.storage.get_record_state(key).await {
            Ok(row) => row,
            Err(StorageError::RecordNotFound { .. }) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let instances = self.storage.list_sla_instances(key).await?;
        let Some(instance) = instances.iter().find(|i| i.is_active()) else {
            return Ok(None);
        };
        let Some((_, sla)) = def.sla(instance.sla_id) else {
            return Ok(None);
        };
        let view = self.tracker.status_view(
            instance,
            sla,
            record.state_entered_at,
            self.tracker.now(),
        )?;
        Ok(Some(view))
    }

    /// Newest first.
    pub async fn transition_history(
        &self,
        blueprint_id: BlueprintId,
        record_id: RecordId,
    ) -> Result<Vec<TransitionHistoryRecord>, EngineError> {
        Ok(self
            .storage
            .list_transition_history(RecordKey::new(blueprint_id, record_id))
            .await?)
    }

    pub async fn action_logs(
        &self,
        history_entry_id: Uuid,
    ) -> Result<Vec<ActionLogRecord>, EngineError> {
        Ok(self.storage.list_action_logs(history_entry_id).await?)
    }

    /// Take a deleted record out of the blueprint: its active SLA is
    /// cancelled and its state row removed. Returns false if the record was
    /// never placed.
    pub async fn remove_record(
        &self,
        blueprint_id: BlueprintId,
        record_id: RecordId,
    ) -> Result<bool, EngineError> {
        let key = RecordKey::new(blueprint_id, record_id);
        let mut snap = self.storage.begin_snapshot().await?;
        let result = self.remove_locked(&mut snap, key).await;
        let removed = self.finish(snap, result).await?;
        if removed {
            info!(record = %key, "record removed from blueprint");
        }
        Ok(removed)
    }

    async fn remove_locked(
        &self,
        snap: &mut S::Snapshot,
        key: RecordKey,
    ) -> Result<bool, EngineError> {
        match self.storage.get_record_state_for_update(snap, key).await {
            Ok(_) => {}
            Err(StorageError::RecordNotFound { .. }) => return Ok(false),
            Err(e) => return Err(e.into()),
        }
        if let Some(instance) = self
            .storage
            .get_active_sla_instance_for_update(snap, key)
            .await?
        {
            self.storage
                .close_sla_instance(snap, instance.id, SlaStatus::Cancelled, self.tracker.now())
                .await?;
        }
        self.storage.remove_record_state(snap, key).await?;
        Ok(true)
    }
}

/// Where a new record starts: the state mirroring its governing field
/// value, else the initial state.
fn placement(def: &BlueprintDefinition, field_value: Option<&str>) -> Result<StateId, EngineError> {
    field_value
        .and_then(|v| def.state_by_field_value(v))
        .or_else(|| def.initial_state())
        .map(|s| s.id)
        .ok_or_else(|| DefinitionError::NoInitialState.into())
}

fn is_contention(e: &EngineError) -> bool {
    matches!(e, EngineError::Storage(s) if s.is_contention())
}

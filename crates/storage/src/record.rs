use std::fmt;

use blueprint_core::{
    ActionId, ActionKind, ActorId, BlueprintId, EscalationId, RecordId, SlaId, StateId,
    TransitionId,
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// Addresses one business record under one blueprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordKey {
    pub blueprint_id: BlueprintId,
    pub record_id: RecordId,
}

impl RecordKey {
    pub fn new(blueprint_id: BlueprintId, record_id: RecordId) -> Self {
        RecordKey {
            blueprint_id,
            record_id,
        }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.blueprint_id, self.record_id)
    }
}

/// Where a record currently sits in its blueprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordStateRecord {
    pub blueprint_id: BlueprintId,
    pub record_id: RecordId,
    pub current_state_id: StateId,
    #[serde(with = "time::serde::rfc3339")]
    pub state_entered_at: OffsetDateTime,
    /// Bumped on every state change; used for optimistic concurrency.
    pub version: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl RecordStateRecord {
    pub fn key(&self) -> RecordKey {
        RecordKey::new(self.blueprint_id, self.record_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlaStatus {
    Active,
    Met,
    Breached,
    Cancelled,
}

impl SlaStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SlaStatus::Active => "active",
            SlaStatus::Met => "met",
            SlaStatus::Breached => "breached",
            SlaStatus::Cancelled => "cancelled",
        }
    }
}

/// One running (or finished) SLA clock for a record in a state.
///
/// An instance stays `Active` until the record leaves the state, even after
/// its deadline passes; the breach is stamped in `breached_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlaInstanceRecord {
    pub id: Uuid,
    pub sla_id: SlaId,
    pub blueprint_id: BlueprintId,
    pub record_id: RecordId,
    pub state_id: StateId,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub due_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub breached_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub closed_at: Option<OffsetDateTime>,
    pub status: SlaStatus,
}

impl SlaInstanceRecord {
    pub fn key(&self) -> RecordKey {
        RecordKey::new(self.blueprint_id, self.record_id)
    }

    pub fn is_active(&self) -> bool {
        self.status == SlaStatus::Active
    }
}

/// Append-only audit of one executed transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionHistoryRecord {
    pub id: Uuid,
    pub blueprint_id: BlueprintId,
    pub record_id: RecordId,
    pub transition_id: TransitionId,
    pub from_state_id: StateId,
    pub to_state_id: StateId,
    pub executed_by: ActorId,
    #[serde(with = "time::serde::rfc3339")]
    pub executed_at: OffsetDateTime,
    /// Field values the guard was evaluated against.
    pub field_snapshot: serde_json::Value,
    /// Notes, attachments and checklist answers submitted with the
    /// transition. `Null` when none were submitted.
    #[serde(default)]
    pub requirements_data: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogStatus {
    Success,
    Failed,
}

/// Outcome of one transition action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionLogRecord {
    pub id: Uuid,
    pub history_id: Uuid,
    pub blueprint_id: BlueprintId,
    pub record_id: RecordId,
    pub action_id: ActionId,
    pub action_type: ActionKind,
    pub status: LogStatus,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub executed_at: OffsetDateTime,
}

/// Outcome of one fired escalation. At most one row exists per
/// `(sla_instance_id, escalation_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationLogRecord {
    pub id: Uuid,
    pub sla_instance_id: Uuid,
    pub escalation_id: EscalationId,
    pub action_type: ActionKind,
    pub status: LogStatus,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub fired_at: OffsetDateTime,
}

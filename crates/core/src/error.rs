use crate::ids::{EscalationId, RequirementId, SlaId, StateId, TransitionId};

/// Everything that can be wrong with a blueprint definition document.
///
/// These are configuration errors: they are raised when a definition is
/// parsed or activated, never while a record is being moved.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DefinitionError {
    /// The document does not have the expected shape.
    #[error("malformed definition document: {message}")]
    Document { message: String },

    #[error("transition {transition_id}: unknown condition operator '{operator}'")]
    UnknownOperator {
        transition_id: TransitionId,
        operator: String,
    },

    /// `owner` names the transition action or escalation carrying the type.
    #[error("{owner}: unknown action type '{action_type}'")]
    UnknownActionType { owner: String, action_type: String },

    #[error("transition {transition_id} requirement {requirement_id}: unknown requirement type '{requirement_type}'")]
    UnknownRequirementType {
        transition_id: TransitionId,
        requirement_id: RequirementId,
        requirement_type: String,
    },

    #[error("transition {transition_id} requirement {requirement_id}: {message}")]
    InvalidRequirement {
        transition_id: TransitionId,
        requirement_id: RequirementId,
        message: String,
    },

    #[error("escalation {escalation_id}: unknown trigger type '{trigger_type}'")]
    UnknownTriggerType {
        escalation_id: EscalationId,
        trigger_type: String,
    },

    #[error("blueprint has no initial state")]
    NoInitialState,

    #[error("blueprint has more than one initial state: {state_ids:?}")]
    MultipleInitialStates { state_ids: Vec<StateId> },

    #[error("blueprint has no terminal state")]
    NoTerminalState,

    #[error("duplicate {kind} id {id}")]
    DuplicateId { kind: &'static str, id: i64 },

    #[error("transition {transition_id} references state {state_id} which is not part of this blueprint")]
    UnknownStateReference {
        transition_id: TransitionId,
        state_id: StateId,
    },

    #[error("terminal state {state_id} has outgoing transition {transition_id}")]
    TerminalStateHasOutgoing {
        state_id: StateId,
        transition_id: TransitionId,
    },

    #[error("sla {sla_id}: {message}")]
    InvalidSla { sla_id: SlaId, message: String },

    #[error("escalation {escalation_id}: approaching threshold {value} must be within 1..=100")]
    InvalidThreshold {
        escalation_id: EscalationId,
        value: i64,
    },

    /// An active blueprint may only grow; states and transition endpoints
    /// already in use cannot be removed or rewired.
    #[error("non-additive change to an active blueprint: {message}")]
    NonAdditiveChange { message: String },

    #[error("invalid field value{}: {message}", field_suffix(.field))]
    InvalidFieldValue {
        field: Option<String>,
        message: String,
    },

    /// Every error found by a validation run.
    #[error("{} definition error(s): {}", .0.len(), join_errors(.0))]
    Invalid(Vec<DefinitionError>),
}

impl DefinitionError {
    /// Flatten into a list; `Invalid` yields its members.
    pub fn into_list(self) -> Vec<DefinitionError> {
        match self {
            DefinitionError::Invalid(errors) => errors,
            other => vec![other],
        }
    }
}

fn field_suffix(field: &Option<String>) -> String {
    field
        .as_ref()
        .map(|f| format!(" for '{}'", f))
        .unwrap_or_default()
}

fn join_errors(errors: &[DefinitionError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

use blueprint_core::{BlueprintId, DefinitionError, RecordId, StateId, TransitionId};
use blueprint_storage::StorageError;
use time::{Duration, OffsetDateTime, Time};

/// Business-calendar misuse or misconfiguration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CalendarError {
    #[error("business window {start}..{end} is empty")]
    EmptyWindow { start: Time, end: Time },

    #[error("interval end {end} is before its start {start}")]
    EndBeforeStart {
        start: OffsetDateTime,
        end: OffsetDateTime,
    },

    #[error("duration must not be negative, got {0}")]
    NegativeDuration(Duration),

    #[error("invalid time of day '{value}', expected HH:MM")]
    InvalidTimeOfDay { value: String },

    #[error("date arithmetic left the supported range")]
    OutOfRange,
}

/// Errors surfaced by [`crate::TransitionEngine`] operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("blueprint {blueprint_id} is not active")]
    UnknownBlueprint { blueprint_id: BlueprintId },

    /// The transition does not leave the record's current state, is inactive,
    /// or does not exist.
    #[error("transition {transition_id} is not available for record {record_id} in state {current_state}: {reason}")]
    InvalidTransition {
        record_id: RecordId,
        transition_id: TransitionId,
        current_state: StateId,
        reason: String,
    },

    /// Every condition group evaluated false at execution time.
    #[error("transition {transition_id} conditions not met: {}", .failed.join("; "))]
    ConditionNotMet {
        transition_id: TransitionId,
        failed: Vec<String>,
    },

    /// The guard holds but required notes, attachments, checklist items or
    /// fields were not supplied.
    #[error("transition {transition_id} requirements not met: {}", .missing.join("; "))]
    RequirementsNotMet {
        transition_id: TransitionId,
        missing: Vec<String>,
    },

    /// Lost a race for the record twice in a row. Safe to retry.
    #[error("record {blueprint_id}/{record_id} was modified concurrently, retry")]
    ConcurrentModification {
        blueprint_id: BlueprintId,
        record_id: RecordId,
    },

    #[error("record {record_id} is in state {state_id}, which blueprint {blueprint_id} does not define")]
    UnknownState {
        blueprint_id: BlueprintId,
        record_id: RecordId,
        state_id: StateId,
    },

    #[error(transparent)]
    Definition(#[from] DefinitionError),

    #[error("sla calendar error: {0}")]
    SlaCalendar(#[from] CalendarError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl EngineError {
    /// Transient errors a caller may retry unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::ConcurrentModification { .. })
    }
}

/// Engine configuration could not be loaded or is invalid.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("cannot parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),

    #[error(transparent)]
    Calendar(#[from] CalendarError),
}

//! blueprint-core: the blueprint definition model.
//!
//! A blueprint is a state machine attached to a business record: states,
//! guarded transitions with side-effect actions, and per-state SLAs with
//! escalation rules. This crate owns the typed model, the JSON definition
//! document format and activation-time validation. It does no I/O.
//!
//! # Public API
//!
//! - [`parse_definition()`] / [`parse_definition_str()`] -- document to model
//! - [`validate()`] -- graph invariants, reporting every violation
//! - [`check_additive()`] -- re-activation guard for a live blueprint
//! - [`FieldValue`] / [`FieldSnapshot`] -- record field values
//! - [`RequirementsData`] -- what an actor submits with a transition

pub mod definition;
pub mod document;
pub mod error;
pub mod ids;
pub mod submission;
pub mod validate;
pub mod value;

// ── Convenience re-exports: key types ────────────────────────────────

pub use definition::{
    ActionKind, BlueprintDefinition, EscalationTrigger, Operator, RequirementKind, SlaDefinition,
    SlaEscalation, State, Transition, TransitionAction, TransitionCondition,
    TransitionRequirement,
};
pub use error::DefinitionError;
pub use ids::{
    ActionId, ActorId, BlueprintId, EscalationId, RecordId, RequirementId, SlaId, StateId,
    TransitionId,
};
pub use submission::{Attachment, RequirementsData};
pub use value::{snapshot_from_json, snapshot_to_json, FieldSnapshot, FieldValue};

// ── Convenience re-exports: entry points ─────────────────────────────

pub use document::{parse_definition, parse_definition_str};
pub use validate::{check_additive, validate};

/// Parse and validate in one step.
pub fn load_definition(doc: &serde_json::Value) -> Result<BlueprintDefinition, DefinitionError> {
    let def = parse_definition(doc)?;
    validate(&def)?;
    Ok(def)
}

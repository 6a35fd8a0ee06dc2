//! Definition documents.
//!
//! A blueprint arrives as a JSON document. Parsing happens in two stages:
//! serde reads the document into raw structs with free-form string tags,
//! then [`parse_definition`] converts those into the typed model, rejecting
//! unknown operators, action types and trigger types. Conversion errors are
//! collected so one pass reports every bad tag in the document.

use serde::Deserialize;

use crate::definition::{
    ActionKind, BlueprintDefinition, EscalationTrigger, Operator, RequirementKind, SlaDefinition,
    SlaEscalation, State, Transition, TransitionAction, TransitionCondition,
    TransitionRequirement,
};
use crate::error::DefinitionError;
use crate::ids::{
    ActionId, BlueprintId, EscalationId, RequirementId, SlaId, StateId, TransitionId,
};

/// Group assigned to conditions that do not name one.
pub const DEFAULT_CONDITION_GROUP: &str = "default";

/// Threshold used by an approaching trigger without an explicit value.
pub const DEFAULT_APPROACHING_PERCENT: u32 = 80;

#[derive(Debug, Deserialize)]
struct RawBlueprint {
    id: i64,
    name: String,
    #[serde(default)]
    field: Option<String>,
    #[serde(default)]
    states: Vec<RawState>,
    #[serde(default)]
    transitions: Vec<RawTransition>,
}

#[derive(Debug, Deserialize)]
struct RawState {
    id: i64,
    name: String,
    #[serde(default)]
    field_option_value: Option<String>,
    #[serde(default)]
    is_initial: bool,
    #[serde(default)]
    is_terminal: bool,
    #[serde(default)]
    sla: Option<RawSla>,
}

#[derive(Debug, Deserialize)]
struct RawTransition {
    id: i64,
    #[serde(default)]
    name: String,
    from_state_id: i64,
    to_state_id: i64,
    #[serde(default)]
    display_order: i32,
    #[serde(default = "default_true")]
    is_active: bool,
    #[serde(default)]
    button_label: Option<String>,
    #[serde(default)]
    conditions: Vec<RawCondition>,
    #[serde(default)]
    actions: Vec<RawAction>,
    #[serde(default)]
    requirements: Vec<RawRequirement>,
}

#[derive(Debug, Deserialize)]
struct RawRequirement {
    id: i64,
    #[serde(rename = "type")]
    requirement_type: String,
    #[serde(default, alias = "field_id")]
    field: Option<String>,
    #[serde(default)]
    label: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default = "default_true")]
    is_required: bool,
    #[serde(default)]
    config: serde_json::Value,
    #[serde(default)]
    display_order: i32,
}

#[derive(Debug, Deserialize)]
struct RawCondition {
    field: String,
    operator: String,
    #[serde(default)]
    value: serde_json::Value,
    #[serde(default)]
    group_label: Option<String>,
    #[serde(default)]
    display_order: i32,
}

#[derive(Debug, Deserialize)]
struct RawAction {
    id: i64,
    #[serde(rename = "type")]
    action_type: String,
    #[serde(default)]
    config: serde_json::Value,
    #[serde(default)]
    display_order: i32,
    #[serde(default = "default_true")]
    is_active: bool,
}

#[derive(Debug, Deserialize)]
struct RawSla {
    id: i64,
    #[serde(default)]
    name: String,
    duration_hours: i64,
    #[serde(default)]
    business_hours_only: bool,
    #[serde(default)]
    exclude_weekends: bool,
    #[serde(default = "default_true")]
    is_active: bool,
    #[serde(default)]
    escalations: Vec<RawEscalation>,
}

#[derive(Debug, Deserialize)]
struct RawEscalation {
    id: i64,
    trigger_type: String,
    #[serde(default)]
    trigger_value: Option<i64>,
    action_type: String,
    #[serde(default)]
    config: serde_json::Value,
    #[serde(default)]
    display_order: i32,
}

fn default_true() -> bool {
    true
}

/// Parse a definition from a JSON string.
pub fn parse_definition_str(src: &str) -> Result<BlueprintDefinition, DefinitionError> {
    let doc: serde_json::Value =
        serde_json::from_str(src).map_err(|e| DefinitionError::Document {
            message: e.to_string(),
        })?;
    parse_definition(&doc)
}

/// Convert a JSON document into a typed [`BlueprintDefinition`].
///
/// Only the document's shape and tags are checked here; graph rules are
/// left to [`crate::validate::validate`].
pub fn parse_definition(doc: &serde_json::Value) -> Result<BlueprintDefinition, DefinitionError> {
    let raw: RawBlueprint =
        serde_json::from_value(doc.clone()).map_err(|e| DefinitionError::Document {
            message: e.to_string(),
        })?;

    let mut errors = Vec::new();

    let states: Vec<State> = raw
        .states
        .into_iter()
        .map(|s| convert_state(s, &mut errors))
        .collect();
    let transitions: Vec<Transition> = raw
        .transitions
        .into_iter()
        .map(|t| convert_transition(t, &mut errors))
        .collect();

    if !errors.is_empty() {
        return Err(DefinitionError::Invalid(errors));
    }

    let def = BlueprintDefinition::new(BlueprintId(raw.id), raw.name, states, transitions);
    Ok(match raw.field.filter(|f| !f.trim().is_empty()) {
        Some(field) => def.with_governing_field(field),
        None => def,
    })
}

fn convert_state(raw: RawState, errors: &mut Vec<DefinitionError>) -> State {
    State {
        id: StateId(raw.id),
        name: raw.name,
        field_option_value: raw.field_option_value,
        is_initial: raw.is_initial,
        is_terminal: raw.is_terminal,
        sla: raw.sla.map(|sla| convert_sla(sla, errors)),
    }
}

fn convert_sla(raw: RawSla, errors: &mut Vec<DefinitionError>) -> SlaDefinition {
    let sla_id = SlaId(raw.id);
    let duration_hours = match u32::try_from(raw.duration_hours) {
        Ok(h) => h,
        Err(_) => {
            errors.push(DefinitionError::InvalidSla {
                sla_id,
                message: format!(
                    "duration_hours must be a positive number of hours, got {}",
                    raw.duration_hours
                ),
            });
            0
        }
    };

    let mut escalations: Vec<SlaEscalation> = raw
        .escalations
        .into_iter()
        .filter_map(|e| convert_escalation(e, errors))
        .collect();
    escalations.sort_by_key(|e| (e.display_order, e.id));

    SlaDefinition {
        id: sla_id,
        name: raw.name,
        duration_hours,
        business_hours_only: raw.business_hours_only,
        exclude_weekends: raw.exclude_weekends,
        is_active: raw.is_active,
        escalations,
    }
}

fn convert_escalation(
    raw: RawEscalation,
    errors: &mut Vec<DefinitionError>,
) -> Option<SlaEscalation> {
    let escalation_id = EscalationId(raw.id);

    let trigger = match raw.trigger_type.trim() {
        "approaching" => {
            let value = raw
                .trigger_value
                .unwrap_or(i64::from(DEFAULT_APPROACHING_PERCENT));
            match u32::try_from(value) {
                Ok(threshold_percent) => Some(EscalationTrigger::Approaching { threshold_percent }),
                Err(_) => {
                    errors.push(DefinitionError::InvalidThreshold {
                        escalation_id,
                        value,
                    });
                    None
                }
            }
        }
        "breached" => Some(EscalationTrigger::Breached),
        other => {
            errors.push(DefinitionError::UnknownTriggerType {
                escalation_id,
                trigger_type: other.to_string(),
            });
            None
        }
    };

    let action = ActionKind::parse(&raw.action_type);
    if action.is_none() {
        errors.push(DefinitionError::UnknownActionType {
            owner: format!("escalation {}", escalation_id),
            action_type: raw.action_type.clone(),
        });
    }

    Some(SlaEscalation {
        id: escalation_id,
        trigger: trigger?,
        action: action?,
        config: raw.config,
        display_order: raw.display_order,
    })
}

fn convert_transition(raw: RawTransition, errors: &mut Vec<DefinitionError>) -> Transition {
    let transition_id = TransitionId(raw.id);

    let mut conditions: Vec<TransitionCondition> = raw
        .conditions
        .into_iter()
        .filter_map(|c| match Operator::parse(&c.operator) {
            Some(operator) => Some(TransitionCondition {
                field: c.field,
                operator,
                value: c.value,
                group_label: c
                    .group_label
                    .filter(|g| !g.trim().is_empty())
                    .unwrap_or_else(|| DEFAULT_CONDITION_GROUP.to_string()),
                display_order: c.display_order,
            }),
            None => {
                errors.push(DefinitionError::UnknownOperator {
                    transition_id,
                    operator: c.operator,
                });
                None
            }
        })
        .collect();
    conditions.sort_by_key(|c| c.display_order);

    let mut actions: Vec<TransitionAction> = raw
        .actions
        .into_iter()
        .filter_map(|a| match ActionKind::parse(&a.action_type) {
            Some(kind) => Some(TransitionAction {
                id: ActionId(a.id),
                kind,
                config: a.config,
                display_order: a.display_order,
                is_active: a.is_active,
            }),
            None => {
                errors.push(DefinitionError::UnknownActionType {
                    owner: format!("transition {} action {}", transition_id, a.id),
                    action_type: a.action_type,
                });
                None
            }
        })
        .collect();
    actions.sort_by_key(|a| (a.display_order, a.id));

    let mut requirements: Vec<TransitionRequirement> = raw
        .requirements
        .into_iter()
        .filter_map(|r| convert_requirement(transition_id, r, errors))
        .collect();
    requirements.sort_by_key(|r| (r.display_order, r.id));

    Transition {
        id: transition_id,
        name: raw.name,
        from_state: StateId(raw.from_state_id),
        to_state: StateId(raw.to_state_id),
        display_order: raw.display_order,
        is_active: raw.is_active,
        button_label: raw.button_label,
        conditions,
        actions,
        requirements,
    }
}

fn convert_requirement(
    transition_id: TransitionId,
    raw: RawRequirement,
    errors: &mut Vec<DefinitionError>,
) -> Option<TransitionRequirement> {
    let requirement_id = RequirementId(raw.id);
    let Some(kind) = RequirementKind::parse(&raw.requirement_type) else {
        errors.push(DefinitionError::UnknownRequirementType {
            transition_id,
            requirement_id,
            requirement_type: raw.requirement_type,
        });
        return None;
    };
    Some(TransitionRequirement {
        id: requirement_id,
        kind,
        field: raw.field.filter(|f| !f.trim().is_empty()),
        label: raw.label,
        description: raw.description,
        is_required: raw.is_required,
        config: raw.config,
        display_order: raw.display_order,
    })
}

//! Activation-time structural checks on a parsed blueprint.
//!
//! Unlike document parsing, which stops at the first malformed document,
//! validation walks the whole graph and reports every problem it finds.

use std::collections::BTreeSet;

use crate::definition::{
    BlueprintDefinition, EscalationTrigger, RequirementKind, SlaDefinition, Transition,
};
use crate::error::DefinitionError;

/// Check graph invariants. Returns `DefinitionError::Invalid` carrying every
/// violation when any are found.
pub fn validate(def: &BlueprintDefinition) -> Result<(), DefinitionError> {
    let mut errors = Vec::new();

    validate_ids(def, &mut errors);
    validate_initial_and_terminal(def, &mut errors);
    validate_transitions(def, &mut errors);
    for state in &def.states {
        if let Some(sla) = &state.sla {
            validate_sla(sla, &mut errors);
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(DefinitionError::Invalid(errors))
    }
}

fn validate_ids(def: &BlueprintDefinition, errors: &mut Vec<DefinitionError>) {
    let mut seen = BTreeSet::new();
    for s in &def.states {
        if !seen.insert(s.id) {
            errors.push(DefinitionError::DuplicateId {
                kind: "state",
                id: s.id.0,
            });
        }
    }

    let mut seen = BTreeSet::new();
    let mut seen_actions = BTreeSet::new();
    let mut seen_requirements = BTreeSet::new();
    for t in &def.transitions {
        if !seen.insert(t.id) {
            errors.push(DefinitionError::DuplicateId {
                kind: "transition",
                id: t.id.0,
            });
        }
        for a in &t.actions {
            if !seen_actions.insert(a.id) {
                errors.push(DefinitionError::DuplicateId {
                    kind: "action",
                    id: a.id.0,
                });
            }
        }
        for r in &t.requirements {
            if !seen_requirements.insert(r.id) {
                errors.push(DefinitionError::DuplicateId {
                    kind: "requirement",
                    id: r.id.0,
                });
            }
        }
    }

    let mut seen_slas = BTreeSet::new();
    let mut seen_escalations = BTreeSet::new();
    for sla in def.states.iter().filter_map(|s| s.sla.as_ref()) {
        if !seen_slas.insert(sla.id) {
            errors.push(DefinitionError::DuplicateId {
                kind: "sla",
                id: sla.id.0,
            });
        }
        for e in &sla.escalations {
            if !seen_escalations.insert(e.id) {
                errors.push(DefinitionError::DuplicateId {
                    kind: "escalation",
                    id: e.id.0,
                });
            }
        }
    }
}

fn validate_initial_and_terminal(def: &BlueprintDefinition, errors: &mut Vec<DefinitionError>) {
    let initial: Vec<_> = def
        .states
        .iter()
        .filter(|s| s.is_initial)
        .map(|s| s.id)
        .collect();
    match initial.len() {
        0 => errors.push(DefinitionError::NoInitialState),
        1 => {}
        _ => errors.push(DefinitionError::MultipleInitialStates { state_ids: initial }),
    }

    if !def.states.iter().any(|s| s.is_terminal) {
        errors.push(DefinitionError::NoTerminalState);
    }
}

fn validate_transitions(def: &BlueprintDefinition, errors: &mut Vec<DefinitionError>) {
    for t in &def.transitions {
        for endpoint in [t.from_state, t.to_state] {
            if def.state(endpoint).is_none() {
                errors.push(DefinitionError::UnknownStateReference {
                    transition_id: t.id,
                    state_id: endpoint,
                });
            }
        }
        if let Some(from) = def.state(t.from_state) {
            if from.is_terminal {
                errors.push(DefinitionError::TerminalStateHasOutgoing {
                    state_id: from.id,
                    transition_id: t.id,
                });
            }
        }
        validate_requirements(t, errors);
    }
}

fn validate_requirements(t: &Transition, errors: &mut Vec<DefinitionError>) {
    for r in &t.requirements {
        let message = match r.kind {
            RequirementKind::MandatoryField if r.field.is_none() => {
                Some("mandatory_field requires a field".to_string())
            }
            RequirementKind::Checklist
                if !r.config["items"].as_array().is_some_and(|items| !items.is_empty()) =>
            {
                Some("checklist requires a non-empty config.items list".to_string())
            }
            RequirementKind::Attachment
                if !r.config["min_count"].is_null()
                    && !r.config["min_count"].as_u64().is_some_and(|n| n > 0) =>
            {
                Some(format!(
                    "attachment min_count must be a positive integer, got {}",
                    r.config["min_count"]
                ))
            }
            _ => None,
        };
        if let Some(message) = message {
            errors.push(DefinitionError::InvalidRequirement {
                transition_id: t.id,
                requirement_id: r.id,
                message,
            });
        }
    }
}

fn validate_sla(sla: &SlaDefinition, errors: &mut Vec<DefinitionError>) {
    if sla.duration_hours == 0 {
        errors.push(DefinitionError::InvalidSla {
            sla_id: sla.id,
            message: "duration_hours must be greater than zero".to_string(),
        });
    }
    for e in &sla.escalations {
        if let EscalationTrigger::Approaching { threshold_percent } = e.trigger {
            if !(1..=100).contains(&threshold_percent) {
                errors.push(DefinitionError::InvalidThreshold {
                    escalation_id: e.id,
                    value: i64::from(threshold_percent),
                });
            }
        }
    }
}

/// Check that `next` only extends `previous`: every existing state is kept
/// and every existing transition keeps its endpoints. Transitions may be
/// deactivated but not removed, since history rows refer to them.
pub fn check_additive(
    previous: &BlueprintDefinition,
    next: &BlueprintDefinition,
) -> Result<(), DefinitionError> {
    for s in &previous.states {
        if next.state(s.id).is_none() {
            return Err(DefinitionError::NonAdditiveChange {
                message: format!("state {} ('{}') was removed", s.id, s.name),
            });
        }
    }
    for t in &previous.transitions {
        match next.transition(t.id) {
            None => {
                return Err(DefinitionError::NonAdditiveChange {
                    message: format!("transition {} was removed", t.id),
                })
            }
            Some(n) if n.from_state != t.from_state || n.to_state != t.to_state => {
                return Err(DefinitionError::NonAdditiveChange {
                    message: format!(
                        "transition {} was rewired from {}->{} to {}->{}",
                        t.id, t.from_state, t.to_state, n.from_state, n.to_state
                    ),
                })
            }
            Some(_) => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::parse_definition;
    use serde_json::json;

    #[test]
    fn valid_definition_passes() {
        let def = parse_definition(&json!({
            "id": 1, "name": "Deals",
            "states": [
                {"id": 1, "name": "Draft", "is_initial": true,
                 "sla": {"id": 1, "duration_hours": 8,
                         "escalations": [{"id": 1, "trigger_type": "approaching", "trigger_value": 50, "action_type": "notify_user"}]}},
                {"id": 2, "name": "Won", "is_terminal": true}
            ],
            "transitions": [{"id": 1, "from_state_id": 1, "to_state_id": 2}]
        }))
        .unwrap();
        assert!(validate(&def).is_ok());
    }

    #[test]
    fn collects_every_violation() {
        let def = parse_definition(&json!({
            "id": 1, "name": "Broken",
            "states": [
                {"id": 1, "name": "A", "is_initial": true},
                {"id": 2, "name": "B", "is_initial": true, "is_terminal": true,
                 "sla": {"id": 3, "duration_hours": 0,
                         "escalations": [{"id": 4, "trigger_type": "approaching", "trigger_value": 150, "action_type": "send_email"}]}}
            ],
            "transitions": [
                {"id": 1, "from_state_id": 1, "to_state_id": 9},
                {"id": 2, "from_state_id": 2, "to_state_id": 1},
                {"id": 2, "from_state_id": 1, "to_state_id": 2}
            ]
        }))
        .unwrap();

        let errors = validate(&def).unwrap_err().into_list();
        assert!(errors
            .iter()
            .any(|e| matches!(e, DefinitionError::MultipleInitialStates { .. })));
        assert!(errors
            .iter()
            .any(|e| matches!(e, DefinitionError::UnknownStateReference { .. })));
        assert!(errors
            .iter()
            .any(|e| matches!(e, DefinitionError::TerminalStateHasOutgoing { .. })));
        assert!(errors
            .iter()
            .any(|e| matches!(e, DefinitionError::DuplicateId { kind: "transition", id: 2 })));
        assert!(errors
            .iter()
            .any(|e| matches!(e, DefinitionError::InvalidSla { .. })));
        assert!(errors
            .iter()
            .any(|e| matches!(e, DefinitionError::InvalidThreshold { value: 150, .. })));
    }

    #[test]
    fn malformed_requirements_reported() {
        let def = parse_definition(&json!({
            "id": 1, "name": "Deals",
            "states": [
                {"id": 1, "name": "Draft", "is_initial": true},
                {"id": 2, "name": "Won", "is_terminal": true}
            ],
            "transitions": [{
                "id": 1, "from_state_id": 1, "to_state_id": 2,
                "requirements": [
                    {"id": 1, "type": "mandatory_field"},
                    {"id": 2, "type": "checklist", "config": {"items": []}},
                    {"id": 3, "type": "attachment", "config": {"min_count": 0}},
                    {"id": 3, "type": "note"}
                ]
            }]
        }))
        .unwrap();

        let errors = validate(&def).unwrap_err().into_list();
        let invalid: Vec<i64> = errors
            .iter()
            .filter_map(|e| match e {
                DefinitionError::InvalidRequirement { requirement_id, .. } => {
                    Some(requirement_id.0)
                }
                _ => None,
            })
            .collect();
        assert_eq!(invalid, vec![1, 2, 3]);
        assert!(errors
            .iter()
            .any(|e| matches!(e, DefinitionError::DuplicateId { kind: "requirement", id: 3 })));
    }

    #[test]
    fn missing_initial_and_terminal() {
        let def = parse_definition(&json!({
            "id": 1, "name": "Empty",
            "states": [{"id": 1, "name": "A"}]
        }))
        .unwrap();
        let errors = validate(&def).unwrap_err().into_list();
        assert_eq!(
            errors,
            vec![DefinitionError::NoInitialState, DefinitionError::NoTerminalState]
        );
    }

    #[test]
    fn additive_changes() {
        let v1 = parse_definition(&json!({
            "id": 1, "name": "Deals",
            "states": [
                {"id": 1, "name": "Draft", "is_initial": true},
                {"id": 2, "name": "Won", "is_terminal": true}
            ],
            "transitions": [{"id": 1, "from_state_id": 1, "to_state_id": 2}]
        }))
        .unwrap();
        let grown = parse_definition(&json!({
            "id": 1, "name": "Deals",
            "states": [
                {"id": 1, "name": "Draft", "is_initial": true},
                {"id": 2, "name": "Won", "is_terminal": true},
                {"id": 3, "name": "Lost", "is_terminal": true}
            ],
            "transitions": [
                {"id": 1, "from_state_id": 1, "to_state_id": 2, "is_active": false},
                {"id": 2, "from_state_id": 1, "to_state_id": 3}
            ]
        }))
        .unwrap();
        assert!(check_additive(&v1, &grown).is_ok());

        let rewired = parse_definition(&json!({
            "id": 1, "name": "Deals",
            "states": [
                {"id": 1, "name": "Draft", "is_initial": true},
                {"id": 2, "name": "Won", "is_terminal": true}
            ],
            "transitions": [{"id": 1, "from_state_id": 2, "to_state_id": 1}]
        }))
        .unwrap();
        assert!(matches!(
            check_additive(&v1, &rewired),
            Err(DefinitionError::NonAdditiveChange { .. })
        ));
    }
}

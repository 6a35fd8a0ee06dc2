//! Transition requirement checks.
//!
//! Requirements are checked after the guard and under the same record lock.
//! Only requirements marked `is_required` block a transition. For a
//! mandatory field, a value submitted with the transition takes precedence
//! over the record snapshot.

use blueprint_core::{
    FieldSnapshot, FieldValue, RequirementKind, RequirementsData, TransitionRequirement,
};
use serde_json::Value;

/// Attachments required when a requirement does not set `min_count`.
pub const DEFAULT_MIN_ATTACHMENTS: u64 = 1;

/// Descriptions of the required requirements `data` and `fields` leave
/// unmet, in display order. Empty when the transition may proceed.
pub fn unmet_requirements(
    requirements: &[TransitionRequirement],
    fields: &FieldSnapshot,
    data: &RequirementsData,
) -> Vec<String> {
    requirements
        .iter()
        .filter(|r| r.is_required)
        .filter_map(|r| unmet(r, fields, data))
        .collect()
}

pub fn is_satisfied(
    requirement: &TransitionRequirement,
    fields: &FieldSnapshot,
    data: &RequirementsData,
) -> bool {
    unmet(requirement, fields, data).is_none()
}

fn unmet(r: &TransitionRequirement, fields: &FieldSnapshot, data: &RequirementsData) -> Option<String> {
    let name = r.display_name();
    match r.kind {
        RequirementKind::MandatoryField => {
            let Some(field) = r.field.as_deref() else {
                return Some(format!("{}: no field configured", name));
            };
            let filled = match data.fields.get(field) {
                Some(v) => FieldValue::from_json(v).is_ok_and(|v| !v.is_empty()),
                None => fields.get(field).is_some_and(|v| !v.is_empty()),
            };
            (!filled).then(|| format!("{}: field '{}' is empty", name, field))
        }
        RequirementKind::Attachment => {
            let min = r.config["min_count"]
                .as_u64()
                .unwrap_or(DEFAULT_MIN_ATTACHMENTS);
            let given = data
                .attachments
                .iter()
                .filter(|a| !a.name.trim().is_empty())
                .count() as u64;
            (given < min).then(|| format!("{}: {} attachment(s) required, {} given", name, min, given))
        }
        RequirementKind::Note => {
            let filled = data.note.as_deref().is_some_and(|n| !n.trim().is_empty());
            (!filled).then(|| format!("{}: a note is required", name))
        }
        RequirementKind::Checklist => {
            let unchecked: Vec<String> = checklist_items(&r.config)
                .into_iter()
                .filter(|item| !data.checklist.get(item).copied().unwrap_or(false))
                .collect();
            (!unchecked.is_empty())
                .then(|| format!("{}: unchecked items {}", name, unchecked.join(", ")))
        }
    }
}

/// Item ids from `config.items`: plain strings or objects with an `id`.
fn checklist_items(config: &Value) -> Vec<String> {
    let Some(items) = config["items"].as_array() else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| match item {
            Value::String(id) => Some(id.clone()),
            Value::Object(obj) => match obj.get("id") {
                Some(Value::String(id)) => Some(id.clone()),
                Some(Value::Number(id)) => Some(id.to_string()),
                _ => None,
            },
            _ => None,
        })
        .collect()
}

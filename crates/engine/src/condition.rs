//! Transition guard evaluation.
//!
//! Conditions are grouped by `group_label`. A group holds when all of its
//! conditions hold; the guard holds when any group does (disjunctive normal
//! form). Evaluation never fails: a comparison that cannot be made, such as
//! a numeric operator against text that is not a number, is simply false.

use std::cmp::Ordering;

use blueprint_core::{FieldSnapshot, FieldValue, Operator, TransitionCondition};

/// Does the guard hold for `fields`? An empty condition list always does.
pub fn evaluate(conditions: &[TransitionCondition], fields: &FieldSnapshot) -> bool {
    if conditions.is_empty() {
        return true;
    }
    groups(conditions)
        .iter()
        .any(|group| group.iter().all(|c| evaluate_condition(c, fields)))
}

/// Human-readable descriptions of the conditions that evaluated false.
pub fn failed_conditions(
    conditions: &[TransitionCondition],
    fields: &FieldSnapshot,
) -> Vec<String> {
    conditions
        .iter()
        .filter(|c| !evaluate_condition(c, fields))
        .map(describe)
        .collect()
}

/// Partition into groups, keeping first-seen group order and the condition
/// order within each group.
fn groups(conditions: &[TransitionCondition]) -> Vec<Vec<&TransitionCondition>> {
    let mut labels: Vec<&str> = Vec::new();
    let mut out: Vec<Vec<&TransitionCondition>> = Vec::new();
    for c in conditions {
        match labels.iter().position(|l| *l == c.group_label) {
            Some(i) => out[i].push(c),
            None => {
                labels.push(&c.group_label);
                out.push(vec![c]);
            }
        }
    }
    out
}

fn describe(c: &TransitionCondition) -> String {
    if c.value.is_null() {
        format!("{} {} (group {})", c.field, c.operator.as_str(), c.group_label)
    } else {
        format!(
            "{} {} {} (group {})",
            c.field,
            c.operator.as_str(),
            c.value,
            c.group_label
        )
    }
}

pub fn evaluate_condition(condition: &TransitionCondition, fields: &FieldSnapshot) -> bool {
    let Some(actual) = fields.get(&condition.field) else {
        return condition.operator == Operator::IsEmpty;
    };
    let expected = FieldValue::from_json(&condition.value).unwrap_or(FieldValue::Null);

    match condition.operator {
        Operator::IsEmpty => actual.is_empty(),
        Operator::IsNotEmpty => !actual.is_empty(),
        Operator::Eq => values_equal(actual, &expected),
        Operator::Ne => !values_equal(actual, &expected),
        Operator::Gt => compare_numeric(actual, &expected) == Some(Ordering::Greater),
        Operator::Gte => matches!(
            compare_numeric(actual, &expected),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        Operator::Lt => compare_numeric(actual, &expected) == Some(Ordering::Less),
        Operator::Lte => matches!(
            compare_numeric(actual, &expected),
            Some(Ordering::Less | Ordering::Equal)
        ),
        Operator::Contains => contains(actual, &expected).unwrap_or(false),
        Operator::NotContains => contains(actual, &expected).map_or(false, |hit| !hit),
        Operator::StartsWith => {
            text_pair(actual, &expected).map_or(false, |(a, e)| a.starts_with(&e))
        }
        Operator::EndsWith => text_pair(actual, &expected).map_or(false, |(a, e)| a.ends_with(&e)),
        Operator::In => member_of(actual, &expected),
        Operator::NotIn => !member_of(actual, &expected),
    }
}

fn compare_numeric(actual: &FieldValue, expected: &FieldValue) -> Option<Ordering> {
    Some(actual.as_decimal()?.cmp(&expected.as_decimal()?))
}

/// Numeric when both sides are numbers, exact text otherwise.
fn values_equal(actual: &FieldValue, expected: &FieldValue) -> bool {
    if let (Some(a), Some(e)) = (actual.as_decimal(), expected.as_decimal()) {
        return a == e;
    }
    match (actual.as_text(), expected.as_text()) {
        (Some(a), Some(e)) => a == e,
        (None, None) => actual == expected,
        _ => false,
    }
}

/// Lower-cased text forms of both sides, if both have one.
fn text_pair(actual: &FieldValue, expected: &FieldValue) -> Option<(String, String)> {
    Some((
        actual.as_text()?.to_lowercase(),
        expected.as_text()?.to_lowercase(),
    ))
}

/// Membership for lists, case-insensitive substring for text. `None` when
/// the comparison cannot be made.
fn contains(actual: &FieldValue, expected: &FieldValue) -> Option<bool> {
    match actual {
        FieldValue::List(items) => Some(items.iter().any(|item| values_equal(item, expected))),
        _ => text_pair(actual, expected).map(|(a, e)| a.contains(&e)),
    }
}

/// `expected` is a JSON array or a comma-delimited string.
fn member_of(actual: &FieldValue, expected: &FieldValue) -> bool {
    let candidates: Vec<FieldValue> = match expected {
        FieldValue::List(items) => items.clone(),
        FieldValue::Text(s) => s
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(|part| FieldValue::Text(part.to_string()))
            .collect(),
        FieldValue::Null => Vec::new(),
        other => vec![other.clone()],
    };
    candidates.iter().any(|c| values_equal(actual, c))
}

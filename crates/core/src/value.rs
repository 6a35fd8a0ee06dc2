//! Record field values as seen by the engine.

use std::collections::BTreeMap;
use std::str::FromStr;

use rust_decimal::Decimal;

use crate::error::DefinitionError;

// ──────────────────────────────────────────────
// Runtime values
// ──────────────────────────────────────────────

/// A typed field value from a record snapshot.
/// Numbers use `rust_decimal::Decimal` -- never `f64`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Int(i64),
    Decimal(Decimal),
    Text(String),
    List(Vec<FieldValue>),
}

/// Field name -> current value for one record.
pub type FieldSnapshot = BTreeMap<String, FieldValue>;

impl FieldValue {
    /// Returns a human-readable type name for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            FieldValue::Null => "Null",
            FieldValue::Bool(_) => "Bool",
            FieldValue::Int(_) => "Int",
            FieldValue::Decimal(_) => "Decimal",
            FieldValue::Text(_) => "Text",
            FieldValue::List(_) => "List",
        }
    }

    /// Null, whitespace-only text and empty lists are empty.
    pub fn is_empty(&self) -> bool {
        match self {
            FieldValue::Null => true,
            FieldValue::Text(s) => s.trim().is_empty(),
            FieldValue::List(items) => items.is_empty(),
            _ => false,
        }
    }

    /// Numeric coercion: ints and decimals directly, text when it parses as
    /// a number. Everything else is not a number.
    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            FieldValue::Int(i) => Some(Decimal::from(*i)),
            FieldValue::Decimal(d) => Some(*d),
            FieldValue::Text(s) => {
                let trimmed = s.trim();
                Decimal::from_str(trimmed)
                    .or_else(|_| Decimal::from_scientific(trimmed))
                    .ok()
            }
            _ => None,
        }
    }

    /// String coercion used by the text operators. Lists and null have no
    /// text form.
    pub fn as_text(&self) -> Option<String> {
        match self {
            FieldValue::Bool(b) => Some(b.to_string()),
            FieldValue::Int(i) => Some(i.to_string()),
            FieldValue::Decimal(d) => Some(d.normalize().to_string()),
            FieldValue::Text(s) => Some(s.clone()),
            FieldValue::Null | FieldValue::List(_) => None,
        }
    }

    /// Convert a JSON value into a field value.
    ///
    /// Integers become `Int`, other numbers `Decimal`, arrays `List`.
    /// Nested objects are not valid field values.
    pub fn from_json(v: &serde_json::Value) -> Result<FieldValue, DefinitionError> {
        match v {
            serde_json::Value::Null => Ok(FieldValue::Null),
            serde_json::Value::Bool(b) => Ok(FieldValue::Bool(*b)),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    return Ok(FieldValue::Int(i));
                }
                let raw = n.to_string();
                Decimal::from_str(&raw)
                    .or_else(|_| Decimal::from_scientific(&raw))
                    .map(FieldValue::Decimal)
                    .map_err(|e| DefinitionError::InvalidFieldValue {
                        field: None,
                        message: format!("number '{}' is not representable: {}", raw, e),
                    })
            }
            serde_json::Value::String(s) => Ok(FieldValue::Text(s.clone())),
            serde_json::Value::Array(items) => items
                .iter()
                .map(FieldValue::from_json)
                .collect::<Result<Vec<_>, _>>()
                .map(FieldValue::List),
            serde_json::Value::Object(_) => Err(DefinitionError::InvalidFieldValue {
                field: None,
                message: "objects are not valid field values".to_string(),
            }),
        }
    }

    /// Render back to JSON (history rows store the snapshot as a document).
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            FieldValue::Null => serde_json::Value::Null,
            FieldValue::Bool(b) => serde_json::Value::Bool(*b),
            FieldValue::Int(i) => serde_json::json!(i),
            FieldValue::Decimal(d) => serde_json::Value::String(d.to_string()),
            FieldValue::Text(s) => serde_json::Value::String(s.clone()),
            FieldValue::List(items) => {
                serde_json::Value::Array(items.iter().map(FieldValue::to_json).collect())
            }
        }
    }
}

/// Build a snapshot from a JSON object of `field -> value`.
pub fn snapshot_from_json(v: &serde_json::Value) -> Result<FieldSnapshot, DefinitionError> {
    let obj = v
        .as_object()
        .ok_or_else(|| DefinitionError::InvalidFieldValue {
            field: None,
            message: "field snapshot must be a JSON object".to_string(),
        })?;
    let mut snapshot = FieldSnapshot::new();
    for (field, raw) in obj {
        let value = FieldValue::from_json(raw).map_err(|e| match e {
            DefinitionError::InvalidFieldValue { message, .. } => {
                DefinitionError::InvalidFieldValue {
                    field: Some(field.clone()),
                    message,
                }
            }
            other => other,
        })?;
        snapshot.insert(field.clone(), value);
    }
    Ok(snapshot)
}

/// Render a snapshot as a JSON object.
pub fn snapshot_to_json(snapshot: &FieldSnapshot) -> serde_json::Value {
    serde_json::Value::Object(
        snapshot
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect(),
    )
}

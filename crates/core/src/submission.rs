//! Data an actor submits alongside a transition to satisfy its
//! requirements. Stored verbatim with the history entry.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RequirementsData {
    /// Values for mandatory fields, taking precedence over the record
    /// snapshot.
    pub fields: serde_json::Map<String, serde_json::Value>,
    pub attachments: Vec<Attachment>,
    pub note: Option<String>,
    /// Checklist item id -> checked.
    pub checklist: BTreeMap<String, bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub path: Option<String>,
}

impl RequirementsData {
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
            && self.attachments.is_empty()
            && self.note.is_none()
            && self.checklist.is_empty()
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

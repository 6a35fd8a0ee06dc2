//! Typed blueprint definitions.
//!
//! A blueprint is a flat set of states and transitions. Transitions refer to
//! states by [`StateId`]; lookups go through an index built once at
//! construction, so the graph never holds references into itself.

use std::collections::BTreeMap;
use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::ids::{
    ActionId, BlueprintId, EscalationId, RequirementId, SlaId, StateId, TransitionId,
};

// ──────────────────────────────────────────────
// Conditions
// ──────────────────────────────────────────────

/// Comparison operators available to transition conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    Contains,
    NotContains,
    StartsWith,
    EndsWith,
    IsEmpty,
    IsNotEmpty,
    In,
    NotIn,
}

impl Operator {
    /// Parse an operator name. Accepts the canonical names plus the long
    /// and symbolic aliases used by older condition rows.
    pub fn parse(raw: &str) -> Option<Operator> {
        let op = match raw.trim() {
            "eq" | "equals" | "==" => Operator::Eq,
            "ne" | "neq" | "not_equals" | "!=" => Operator::Ne,
            "gt" | "greater_than" | ">" => Operator::Gt,
            "gte" | "greater_than_or_equals" | ">=" => Operator::Gte,
            "lt" | "less_than" | "<" => Operator::Lt,
            "lte" | "less_than_or_equals" | "<=" => Operator::Lte,
            "contains" => Operator::Contains,
            "not_contains" => Operator::NotContains,
            "starts_with" => Operator::StartsWith,
            "ends_with" => Operator::EndsWith,
            "is_empty" => Operator::IsEmpty,
            "is_not_empty" => Operator::IsNotEmpty,
            "in" => Operator::In,
            "not_in" => Operator::NotIn,
            _ => return None,
        };
        Some(op)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Eq => "eq",
            Operator::Ne => "ne",
            Operator::Gt => "gt",
            Operator::Gte => "gte",
            Operator::Lt => "lt",
            Operator::Lte => "lte",
            Operator::Contains => "contains",
            Operator::NotContains => "not_contains",
            Operator::StartsWith => "starts_with",
            Operator::EndsWith => "ends_with",
            Operator::IsEmpty => "is_empty",
            Operator::IsNotEmpty => "is_not_empty",
            Operator::In => "in",
            Operator::NotIn => "not_in",
        }
    }
}

/// One guard predicate. Conditions sharing a `group_label` are ANDed;
/// distinct groups are ORed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransitionCondition {
    pub field: String,
    pub operator: Operator,
    /// Comparison operand; `Null` for the emptiness operators.
    pub value: serde_json::Value,
    pub group_label: String,
    pub display_order: i32,
}

// ──────────────────────────────────────────────
// Actions
// ──────────────────────────────────────────────

/// The closed set of side effects a transition or escalation can trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    SendEmail,
    UpdateField,
    CreateTask,
    NotifyUser,
}

impl ActionKind {
    pub const ALL: [ActionKind; 4] = [
        ActionKind::SendEmail,
        ActionKind::UpdateField,
        ActionKind::CreateTask,
        ActionKind::NotifyUser,
    ];

    pub fn parse(raw: &str) -> Option<ActionKind> {
        ActionKind::ALL.into_iter().find(|k| k.as_str() == raw.trim())
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::SendEmail => "send_email",
            ActionKind::UpdateField => "update_field",
            ActionKind::CreateTask => "create_task",
            ActionKind::NotifyUser => "notify_user",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransitionAction {
    pub id: ActionId,
    pub kind: ActionKind,
    pub config: serde_json::Value,
    pub display_order: i32,
    pub is_active: bool,
}

// ──────────────────────────────────────────────
// Requirements
// ──────────────────────────────────────────────

/// What the actor must supply before a transition may commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequirementKind {
    /// A record field that must hold a non-empty value.
    MandatoryField,
    Attachment,
    Note,
    /// Every item listed in `config.items` must be checked.
    Checklist,
}

impl RequirementKind {
    pub const ALL: [RequirementKind; 4] = [
        RequirementKind::MandatoryField,
        RequirementKind::Attachment,
        RequirementKind::Note,
        RequirementKind::Checklist,
    ];

    pub fn parse(raw: &str) -> Option<RequirementKind> {
        RequirementKind::ALL
            .into_iter()
            .find(|k| k.as_str() == raw.trim())
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RequirementKind::MandatoryField => "mandatory_field",
            RequirementKind::Attachment => "attachment",
            RequirementKind::Note => "note",
            RequirementKind::Checklist => "checklist",
        }
    }
}

impl fmt::Display for RequirementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransitionRequirement {
    pub id: RequirementId,
    pub kind: RequirementKind,
    /// Field checked by a mandatory-field requirement.
    pub field: Option<String>,
    pub label: String,
    pub description: Option<String>,
    /// Optional requirements are shown to the actor but never enforced.
    pub is_required: bool,
    pub config: serde_json::Value,
    pub display_order: i32,
}

impl TransitionRequirement {
    /// Label if set, else the field name, else the kind.
    pub fn display_name(&self) -> &str {
        if !self.label.trim().is_empty() {
            &self.label
        } else {
            self.field.as_deref().unwrap_or(self.kind.as_str())
        }
    }
}

// ──────────────────────────────────────────────
// SLA
// ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EscalationTrigger {
    /// Fires once the elapsed share of the SLA reaches `threshold_percent`.
    Approaching { threshold_percent: u32 },
    /// Fires once the deadline has passed.
    Breached,
}

impl EscalationTrigger {
    /// Elapsed fraction (1 = 100%) at which this trigger fires.
    pub fn threshold(&self) -> Decimal {
        match self {
            EscalationTrigger::Approaching { threshold_percent } => {
                Decimal::from(*threshold_percent) / Decimal::ONE_HUNDRED
            }
            EscalationTrigger::Breached => Decimal::ONE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SlaEscalation {
    pub id: EscalationId,
    pub trigger: EscalationTrigger,
    pub action: ActionKind,
    pub config: serde_json::Value,
    pub display_order: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SlaDefinition {
    pub id: SlaId,
    pub name: String,
    pub duration_hours: u32,
    pub business_hours_only: bool,
    pub exclude_weekends: bool,
    pub is_active: bool,
    /// Ordered by `display_order`, then id.
    pub escalations: Vec<SlaEscalation>,
}

impl SlaDefinition {
    pub fn duration_secs(&self) -> i64 {
        i64::from(self.duration_hours) * 3600
    }
}

// ──────────────────────────────────────────────
// States and transitions
// ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct State {
    pub id: StateId,
    pub name: String,
    /// Value of the governing record field that corresponds to this state.
    pub field_option_value: Option<String>,
    pub is_initial: bool,
    pub is_terminal: bool,
    pub sla: Option<SlaDefinition>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transition {
    pub id: TransitionId,
    pub name: String,
    pub from_state: StateId,
    pub to_state: StateId,
    pub display_order: i32,
    pub is_active: bool,
    pub button_label: Option<String>,
    /// Ordered by `display_order`.
    pub conditions: Vec<TransitionCondition>,
    /// Ordered by `display_order`.
    pub actions: Vec<TransitionAction>,
    /// Ordered by `display_order`, then id.
    pub requirements: Vec<TransitionRequirement>,
}

impl Transition {
    /// Active actions in execution order.
    pub fn active_actions(&self) -> impl Iterator<Item = &TransitionAction> {
        self.actions.iter().filter(|a| a.is_active)
    }

    /// Requirements that block the transition until met.
    pub fn required(&self) -> impl Iterator<Item = &TransitionRequirement> {
        self.requirements.iter().filter(|r| r.is_required)
    }
}

// ──────────────────────────────────────────────
// Blueprint
// ──────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq)]
struct DefinitionIndex {
    states: BTreeMap<StateId, usize>,
    transitions: BTreeMap<TransitionId, usize>,
}

/// A complete blueprint: states, transitions, SLAs and escalations.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BlueprintDefinition {
    pub id: BlueprintId,
    pub name: String,
    /// Record field whose value mirrors the current state, if any.
    pub governing_field: Option<String>,
    pub states: Vec<State>,
    pub transitions: Vec<Transition>,
    #[serde(skip)]
    index: DefinitionIndex,
}

impl BlueprintDefinition {
    /// Build a definition and its lookup index. When IDs repeat the first
    /// occurrence is indexed; [`crate::validate`] reports the duplicates.
    pub fn new(
        id: BlueprintId,
        name: impl Into<String>,
        states: Vec<State>,
        transitions: Vec<Transition>,
    ) -> Self {
        let mut index = DefinitionIndex::default();
        for (pos, s) in states.iter().enumerate() {
            index.states.entry(s.id).or_insert(pos);
        }
        for (pos, t) in transitions.iter().enumerate() {
            index.transitions.entry(t.id).or_insert(pos);
        }
        BlueprintDefinition {
            id,
            name: name.into(),
            governing_field: None,
            states,
            transitions,
            index,
        }
    }

    pub fn with_governing_field(mut self, field: impl Into<String>) -> Self {
        self.governing_field = Some(field.into());
        self
    }

    pub fn state(&self, id: StateId) -> Option<&State> {
        self.index.states.get(&id).map(|&pos| &self.states[pos])
    }

    pub fn transition(&self, id: TransitionId) -> Option<&Transition> {
        self.index
            .transitions
            .get(&id)
            .map(|&pos| &self.transitions[pos])
    }

    pub fn initial_state(&self) -> Option<&State> {
        self.states.iter().find(|s| s.is_initial)
    }

    /// The state whose `field_option_value` equals `value`.
    pub fn state_by_field_value(&self, value: &str) -> Option<&State> {
        self.states
            .iter()
            .find(|s| s.field_option_value.as_deref() == Some(value))
    }

    /// Active transitions leaving `state`, by ascending display order
    /// (ties broken by transition id).
    pub fn outgoing(&self, state: StateId) -> Vec<&Transition> {
        let mut out: Vec<&Transition> = self
            .transitions
            .iter()
            .filter(|t| t.is_active && t.from_state == state)
            .collect();
        out.sort_by_key(|t| (t.display_order, t.id));
        out
    }

    /// The active SLA attached to `state`, if any.
    pub fn active_sla(&self, state: StateId) -> Option<&SlaDefinition> {
        self.state(state)
            .and_then(|s| s.sla.as_ref())
            .filter(|sla| sla.is_active)
    }

    /// Find an SLA definition by id anywhere in the blueprint.
    pub fn sla(&self, id: SlaId) -> Option<(&State, &SlaDefinition)> {
        self.states.iter().find_map(|s| match &s.sla {
            Some(sla) if sla.id == id => Some((s, sla)),
            _ => None,
        })
    }

    pub fn state_name(&self, id: StateId) -> String {
        self.state(id)
            .map(|s| s.name.clone())
            .unwrap_or_else(|| format!("state {}", id))
    }
}

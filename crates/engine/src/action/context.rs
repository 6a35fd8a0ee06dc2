use blueprint_core::{
    snapshot_to_json, ActorId, BlueprintDefinition, BlueprintId, FieldSnapshot, RecordId,
    RequirementsData, SlaDefinition, Transition,
};
use rust_decimal::Decimal;
use serde_json::{json, Map, Value};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

/// SLA facts available to escalation actions.
#[derive(Debug, Clone, PartialEq)]
pub struct SlaContext {
    pub name: String,
    pub due_at: OffsetDateTime,
    /// 0-100+, two decimal places.
    pub percent_elapsed: Decimal,
}

/// What an action knows about the event that triggered it.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionContext {
    pub blueprint_id: BlueprintId,
    pub blueprint_name: String,
    pub record_id: RecordId,
    pub actor_id: Option<ActorId>,
    pub transition_name: Option<String>,
    pub from_state: Option<String>,
    /// Name of the state the record is in once the event has happened.
    pub state: String,
    pub timestamp: OffsetDateTime,
    pub fields: FieldSnapshot,
    /// Submitted with the transition; empty for escalations.
    pub requirements: RequirementsData,
    pub sla: Option<SlaContext>,
}

impl ActionContext {
    pub fn for_transition(
        def: &BlueprintDefinition,
        record_id: RecordId,
        transition: &Transition,
        actor: ActorId,
        at: OffsetDateTime,
        fields: &FieldSnapshot,
    ) -> Self {
        ActionContext {
            blueprint_id: def.id,
            blueprint_name: def.name.clone(),
            record_id,
            actor_id: Some(actor),
            transition_name: Some(transition.name.clone()),
            from_state: Some(def.state_name(transition.from_state)),
            state: def.state_name(transition.to_state),
            timestamp: at,
            fields: fields.clone(),
            requirements: RequirementsData::default(),
            sla: None,
        }
    }

    pub fn with_requirements(mut self, data: &RequirementsData) -> Self {
        self.requirements = data.clone();
        self
    }

    /// Escalations have no actor and no field snapshot.
    pub fn for_escalation(
        def: &BlueprintDefinition,
        record_id: RecordId,
        state_name: String,
        sla: &SlaDefinition,
        due_at: OffsetDateTime,
        percent_elapsed: Decimal,
        at: OffsetDateTime,
    ) -> Self {
        ActionContext {
            blueprint_id: def.id,
            blueprint_name: def.name.clone(),
            record_id,
            actor_id: None,
            transition_name: None,
            from_state: None,
            state: state_name,
            timestamp: at,
            fields: FieldSnapshot::new(),
            requirements: RequirementsData::default(),
            sla: Some(SlaContext {
                name: sla.name.clone(),
                due_at,
                percent_elapsed,
            }),
        }
    }

    /// The document `{{placeholders}}` are resolved against.
    pub fn to_document(&self) -> Value {
        let mut doc = Map::new();
        doc.insert("blueprint_id".into(), json!(self.blueprint_id.0));
        doc.insert("blueprint_name".into(), json!(self.blueprint_name));
        doc.insert("record_id".into(), json!(self.record_id.0));
        doc.insert(
            "executed_by".into(),
            self.actor_id.map_or(Value::Null, |a| json!(a.0)),
        );
        doc.insert("executed_at".into(), json!(rfc3339(self.timestamp)));
        doc.insert(
            "transition_name".into(),
            self.transition_name.clone().map_or(Value::Null, Value::String),
        );
        doc.insert(
            "from_state".into(),
            self.from_state.clone().map_or(Value::Null, Value::String),
        );
        doc.insert("to_state".into(), json!(self.state));
        doc.insert("state".into(), json!(self.state));
        doc.insert("fields".into(), snapshot_to_json(&self.fields));
        doc.insert("requirements_data".into(), self.requirements.to_json());
        if let Some(sla) = &self.sla {
            doc.insert(
                "sla".into(),
                json!({
                    "name": sla.name,
                    "due_at": rfc3339(sla.due_at),
                    "percent_elapsed": sla.percent_elapsed.to_string(),
                }),
            );
        }
        Value::Object(doc)
    }
}

fn rfc3339(at: OffsetDateTime) -> String {
    at.format(&Rfc3339).unwrap_or_else(|_| at.to_string())
}

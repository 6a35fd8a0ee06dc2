//! Built-in handlers, one per [`ActionKind`].

use async_trait::async_trait;
use blueprint_core::{ActionKind, ActorId};
use serde_json::Value;
use time::Duration;

use super::{ActionContext, ActionDispatcher, ActionError, ActionHandler, DispatchRequest};

const DEFAULT_TASK_SUBJECT: &str = "Follow-up task";
const DEFAULT_TASK_DUE_IN_DAYS: i64 = 1;
const DEFAULT_TASK_PRIORITY: &str = "medium";
const DEFAULT_NOTIFICATION_TITLE: &str = "Notification";

// ── Config access ────────────────────────────────────────────────────

fn invalid(kind: ActionKind, message: impl Into<String>) -> ActionError {
    ActionError::InvalidConfig {
        kind,
        message: message.into(),
    }
}

fn text(config: &Value, key: &str) -> Option<String> {
    match config.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn text_or(config: &Value, key: &str, default: &str) -> String {
    text(config, key)
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

/// A string, a comma-separated string or an array of strings.
fn text_list(config: &Value, key: &str) -> Vec<String> {
    let items: Vec<String> = match config.get(key) {
        Some(Value::String(s)) => s.split(',').map(str::to_string).collect(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| match v {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    };
    items
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn actor_id(v: &Value) -> Option<ActorId> {
    match v {
        Value::Number(n) => n.as_i64().map(ActorId),
        Value::String(s) => s.trim().parse().ok().map(ActorId),
        _ => None,
    }
}

/// Actor IDs from a scalar or an array. Anything unparseable is an error.
fn actor_ids(kind: ActionKind, config: &Value, key: &str) -> Result<Vec<ActorId>, ActionError> {
    let raw: Vec<&Value> = match config.get(key) {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Array(items)) => items.iter().collect(),
        Some(other) => vec![other],
    };
    raw.into_iter()
        .map(|v| {
            actor_id(v).ok_or_else(|| invalid(kind, format!("'{}' is not a user id: {}", key, v)))
        })
        .collect()
}

async fn send(
    kind: ActionKind,
    dispatcher: &dyn ActionDispatcher,
    request: DispatchRequest,
) -> Result<Value, ActionError> {
    dispatcher
        .dispatch(request)
        .await
        .map_err(|message| ActionError::Dispatch { kind, message })
}

// ── Handlers ─────────────────────────────────────────────────────────

/// `to` (required), `subject`, `body`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SendEmailHandler;

#[async_trait]
impl ActionHandler for SendEmailHandler {
    fn kind(&self) -> ActionKind {
        ActionKind::SendEmail
    }

    async fn handle(
        &self,
        config: &Value,
        _ctx: &ActionContext,
        dispatcher: &dyn ActionDispatcher,
    ) -> Result<Value, ActionError> {
        let to = text_list(config, "to");
        if to.is_empty() {
            return Err(invalid(self.kind(), "missing recipient 'to'"));
        }
        let request = DispatchRequest::SendEmail {
            to,
            subject: text(config, "subject").unwrap_or_default(),
            body: text(config, "body").unwrap_or_default(),
        };
        send(self.kind(), dispatcher, request).await
    }
}

/// `field` or `field_api_name` (required), `value`.
#[derive(Debug, Clone, Copy, Default)]
pub struct UpdateFieldHandler;

#[async_trait]
impl ActionHandler for UpdateFieldHandler {
    fn kind(&self) -> ActionKind {
        ActionKind::UpdateField
    }

    async fn handle(
        &self,
        config: &Value,
        ctx: &ActionContext,
        dispatcher: &dyn ActionDispatcher,
    ) -> Result<Value, ActionError> {
        let field = text(config, "field")
            .or_else(|| text(config, "field_api_name"))
            .filter(|f| !f.trim().is_empty())
            .ok_or_else(|| invalid(self.kind(), "missing 'field'"))?;
        let request = DispatchRequest::UpdateField {
            record_id: ctx.record_id,
            field,
            value: config.get("value").cloned().unwrap_or(Value::Null),
        };
        send(self.kind(), dispatcher, request).await
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CreateTaskHandler;

#[async_trait]
impl ActionHandler for CreateTaskHandler {
    fn kind(&self) -> ActionKind {
        ActionKind::CreateTask
    }

    async fn handle(
        &self,
        config: &Value,
        ctx: &ActionContext,
        dispatcher: &dyn ActionDispatcher,
    ) -> Result<Value, ActionError> {
        let due_in_days = match config.get("due_in_days") {
            None | Some(Value::Null) => DEFAULT_TASK_DUE_IN_DAYS,
            Some(v) => v
                .as_i64()
                .or_else(|| v.as_str().and_then(|s| s.trim().parse().ok()))
                .filter(|d| (0..=i64::from(i32::MAX)).contains(d))
                .ok_or_else(|| {
                    invalid(
                        self.kind(),
                        format!("'due_in_days' must be a non-negative integer, got {}", v),
                    )
                })?,
        };
        let due_at = ctx
            .timestamp
            .checked_add(Duration::days(due_in_days))
            .ok_or_else(|| invalid(self.kind(), "'due_in_days' is out of range"))?;
        let assigned_to = match config.get("assigned_to") {
            None | Some(Value::Null) => ctx.actor_id,
            Some(v) => Some(actor_id(v).ok_or_else(|| {
                invalid(self.kind(), format!("'assigned_to' is not a user id: {}", v))
            })?),
        };
        let request = DispatchRequest::CreateTask {
            record_id: ctx.record_id,
            subject: text_or(config, "subject", DEFAULT_TASK_SUBJECT),
            description: text(config, "description").unwrap_or_default(),
            due_at,
            assigned_to,
            priority: text_or(config, "priority", DEFAULT_TASK_PRIORITY),
        };
        send(self.kind(), dispatcher, request).await
    }
}

/// Recipients default to the acting user; with neither the action fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct NotifyUserHandler;

#[async_trait]
impl ActionHandler for NotifyUserHandler {
    fn kind(&self) -> ActionKind {
        ActionKind::NotifyUser
    }

    async fn handle(
        &self,
        config: &Value,
        ctx: &ActionContext,
        dispatcher: &dyn ActionDispatcher,
    ) -> Result<Value, ActionError> {
        let mut user_ids = actor_ids(self.kind(), config, "user_ids")?;
        if user_ids.is_empty() {
            user_ids.extend(ctx.actor_id);
        }
        if user_ids.is_empty() {
            return Err(invalid(self.kind(), "no users specified"));
        }
        let request = DispatchRequest::NotifyUser {
            user_ids,
            title: text_or(config, "title", DEFAULT_NOTIFICATION_TITLE),
            message: text(config, "message").unwrap_or_default(),
        };
        send(self.kind(), dispatcher, request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::RecordingDispatcher;
    use blueprint_core::{BlueprintId, FieldSnapshot, RecordId, RequirementsData};
    use serde_json::json;
    use time::macros::datetime;

    fn ctx(actor: Option<i64>) -> ActionContext {
        ActionContext {
            blueprint_id: BlueprintId(1),
            blueprint_name: "Deals".to_string(),
            record_id: RecordId(9),
            actor_id: actor.map(ActorId),
            transition_name: None,
            from_state: None,
            state: "Review".to_string(),
            timestamp: datetime!(2025-01-06 09:00 UTC),
            fields: FieldSnapshot::new(),
            requirements: RequirementsData::default(),
            sla: None,
        }
    }

    #[tokio::test]
    async fn send_email_requires_recipient() {
        let d = RecordingDispatcher::new();
        let err = SendEmailHandler
            .handle(&json!({"subject": "x"}), &ctx(Some(1)), &d)
            .await
            .unwrap_err();
        assert!(matches!(err, ActionError::InvalidConfig { kind: ActionKind::SendEmail, .. }));
        assert!(d.requests().is_empty());
    }

    #[tokio::test]
    async fn send_email_splits_recipients() {
        let d = RecordingDispatcher::new();
        SendEmailHandler
            .handle(&json!({"to": "a@x.io, b@x.io"}), &ctx(None), &d)
            .await
            .unwrap();
        assert_eq!(
            d.requests(),
            vec![DispatchRequest::SendEmail {
                to: vec!["a@x.io".to_string(), "b@x.io".to_string()],
                subject: String::new(),
                body: String::new(),
            }]
        );
    }

    #[tokio::test]
    async fn update_field_accepts_api_name() {
        let d = RecordingDispatcher::new();
        UpdateFieldHandler
            .handle(&json!({"field_api_name": "stage", "value": "Won"}), &ctx(None), &d)
            .await
            .unwrap();
        assert_eq!(
            d.requests(),
            vec![DispatchRequest::UpdateField {
                record_id: RecordId(9),
                field: "stage".to_string(),
                value: json!("Won"),
            }]
        );

        let err = UpdateFieldHandler
            .handle(&json!({"value": 1}), &ctx(None), &d)
            .await
            .unwrap_err();
        assert!(matches!(err, ActionError::InvalidConfig { .. }));
    }

    #[tokio::test]
    async fn create_task_defaults() {
        let d = RecordingDispatcher::new();
        CreateTaskHandler
            .handle(&json!({}), &ctx(Some(7)), &d)
            .await
            .unwrap();
        assert_eq!(
            d.requests(),
            vec![DispatchRequest::CreateTask {
                record_id: RecordId(9),
                subject: "Follow-up task".to_string(),
                description: String::new(),
                due_at: datetime!(2025-01-07 09:00 UTC),
                assigned_to: Some(ActorId(7)),
                priority: "medium".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn create_task_rejects_bad_due_in_days() {
        let d = RecordingDispatcher::new();
        let err = CreateTaskHandler
            .handle(&json!({"due_in_days": "soon"}), &ctx(Some(7)), &d)
            .await
            .unwrap_err();
        assert!(matches!(err, ActionError::InvalidConfig { .. }));
    }

    #[tokio::test]
    async fn notify_user_falls_back_to_actor() {
        let d = RecordingDispatcher::new();
        NotifyUserHandler
            .handle(&json!({"message": "moved"}), &ctx(Some(3)), &d)
            .await
            .unwrap();
        NotifyUserHandler
            .handle(&json!({"user_ids": [4, "5"], "title": "Heads up"}), &ctx(Some(3)), &d)
            .await
            .unwrap();
        assert_eq!(
            d.requests(),
            vec![
                DispatchRequest::NotifyUser {
                    user_ids: vec![ActorId(3)],
                    title: "Notification".to_string(),
                    message: "moved".to_string(),
                },
                DispatchRequest::NotifyUser {
                    user_ids: vec![ActorId(4), ActorId(5)],
                    title: "Heads up".to_string(),
                    message: String::new(),
                },
            ]
        );
    }

    #[tokio::test]
    async fn notify_user_without_anyone_fails() {
        let d = RecordingDispatcher::new();
        let err = NotifyUserHandler
            .handle(&json!({"message": "x"}), &ctx(None), &d)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ActionError::InvalidConfig {
                kind: ActionKind::NotifyUser,
                message: "no users specified".to_string()
            }
        );
    }
}

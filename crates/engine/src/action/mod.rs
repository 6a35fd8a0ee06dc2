//! Action execution for transitions and escalations.
//!
//! Three layers:
//! - [`ActionHandler`] -- validates one kind's config and builds a typed
//!   [`DispatchRequest`]
//! - [`ActionDispatcher`] -- the external collaborator that delivers the
//!   side effect (mail transport, task service, record writer)
//! - [`ActionExecutor`] -- binds each [`ActionKind`] to its handler and turns
//!   every attempt into an [`ActionResult`], success or failure
//!
//! The executor never returns an error: failures are data, so the caller can
//! log them and move on to the next action.

mod context;
mod dispatcher;
mod handlers;
mod template;

pub use context::{ActionContext, SlaContext};
pub use dispatcher::{ActionDispatcher, DispatchRequest, LoggingDispatcher, RecordingDispatcher};
pub use handlers::{CreateTaskHandler, NotifyUserHandler, SendEmailHandler, UpdateFieldHandler};
pub use template::{render, render_str};

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use blueprint_core::ActionKind;
use blueprint_storage::LogStatus;
use serde::Serialize;

// ──────────────────────────────────────────────
// ActionError
// ──────────────────────────────────────────────

/// Why an action did not take effect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionError {
    /// A required config key is missing or has the wrong shape.
    InvalidConfig { kind: ActionKind, message: String },
    /// The dispatcher refused or failed to deliver the request.
    Dispatch { kind: ActionKind, message: String },
    /// No handler is bound to this kind.
    UnknownActionType { kind: ActionKind },
    /// The dispatcher did not answer within the allotted time.
    Timeout { kind: ActionKind, after: std::time::Duration },
}

impl fmt::Display for ActionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionError::InvalidConfig { kind, message } => {
                write!(f, "invalid {} config: {}", kind, message)
            }
            ActionError::Dispatch { kind, message } => {
                write!(f, "{} dispatch failed: {}", kind, message)
            }
            ActionError::UnknownActionType { kind } => {
                write!(f, "no handler registered for action type '{}'", kind)
            }
            ActionError::Timeout { kind, after } => {
                write!(f, "{} timed out after {}ms", kind, after.as_millis())
            }
        }
    }
}

impl std::error::Error for ActionError {}

// ──────────────────────────────────────────────
// ActionResult
// ──────────────────────────────────────────────

/// Outcome of one action attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionResult {
    pub kind: ActionKind,
    pub status: LogStatus,
    /// Dispatcher receipt on success.
    pub result: Option<serde_json::Value>,
    #[serde(serialize_with = "serialize_error")]
    pub error: Option<ActionError>,
}

fn serialize_error<S: serde::Serializer>(
    error: &Option<ActionError>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match error {
        Some(e) => serializer.serialize_some(&e.to_string()),
        None => serializer.serialize_none(),
    }
}

impl ActionResult {
    fn success(kind: ActionKind, receipt: serde_json::Value) -> Self {
        ActionResult {
            kind,
            status: LogStatus::Success,
            result: Some(receipt),
            error: None,
        }
    }

    pub(crate) fn failed(kind: ActionKind, error: ActionError) -> Self {
        ActionResult {
            kind,
            status: LogStatus::Failed,
            result: None,
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == LogStatus::Success
    }

    pub fn error_message(&self) -> Option<String> {
        self.error.as_ref().map(ToString::to_string)
    }
}

// ──────────────────────────────────────────────
// ActionHandler trait
// ──────────────────────────────────────────────

/// Interprets the config of one action kind.
///
/// `config` arrives with its `{{placeholders}}` already rendered against
/// `ctx`. A handler returns the dispatcher's receipt.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    fn kind(&self) -> ActionKind;

    async fn handle(
        &self,
        config: &serde_json::Value,
        ctx: &ActionContext,
        dispatcher: &dyn ActionDispatcher,
    ) -> Result<serde_json::Value, ActionError>;
}

// ──────────────────────────────────────────────
// ActionExecutor
// ──────────────────────────────────────────────

pub struct ActionExecutor {
    handlers: HashMap<ActionKind, Box<dyn ActionHandler>>,
    dispatcher: Arc<dyn ActionDispatcher>,
}

impl ActionExecutor {
    /// An executor with a handler bound to every [`ActionKind`].
    pub fn new(dispatcher: Arc<dyn ActionDispatcher>) -> Self {
        Self::with_handlers(
            dispatcher,
            vec![
                Box::new(SendEmailHandler),
                Box::new(UpdateFieldHandler),
                Box::new(CreateTaskHandler),
                Box::new(NotifyUserHandler),
            ],
        )
    }

    /// An executor with only the given handlers. Kinds left unbound fail
    /// with [`ActionError::UnknownActionType`].
    pub fn with_handlers(
        dispatcher: Arc<dyn ActionDispatcher>,
        handlers: Vec<Box<dyn ActionHandler>>,
    ) -> Self {
        let handlers = handlers.into_iter().map(|h| (h.kind(), h)).collect();
        ActionExecutor {
            handlers,
            dispatcher,
        }
    }

    pub async fn execute(
        &self,
        kind: ActionKind,
        config: &serde_json::Value,
        ctx: &ActionContext,
    ) -> ActionResult {
        let Some(handler) = self.handlers.get(&kind) else {
            return ActionResult::failed(kind, ActionError::UnknownActionType { kind });
        };
        let config = render(config, &ctx.to_document());
        match handler.handle(&config, ctx, self.dispatcher.as_ref()).await {
            Ok(receipt) => ActionResult::success(kind, receipt),
            Err(e) => ActionResult::failed(kind, e),
        }
    }
}

impl fmt::Debug for ActionExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<_> = self.handlers.keys().collect();
        kinds.sort();
        f.debug_struct("ActionExecutor")
            .field("handlers", &kinds)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blueprint_core::{snapshot_from_json, ActorId, BlueprintId, RecordId, RequirementsData};
    use serde_json::json;
    use time::macros::datetime;

    fn ctx() -> ActionContext {
        ActionContext {
            blueprint_id: BlueprintId(1),
            blueprint_name: "Deals".to_string(),
            record_id: RecordId(42),
            actor_id: Some(ActorId(7)),
            transition_name: Some("Submit".to_string()),
            from_state: Some("Draft".to_string()),
            state: "Review".to_string(),
            timestamp: datetime!(2025-01-06 09:00 UTC),
            fields: snapshot_from_json(&json!({"amount": 1500, "owner": "jane@example.com"}))
                .unwrap(),
            requirements: RequirementsData::default(),
            sla: None,
        }
    }

    #[tokio::test]
    async fn renders_config_before_dispatch() {
        let dispatcher = Arc::new(RecordingDispatcher::new());
        let executor = ActionExecutor::new(dispatcher.clone());
        let result = executor
            .execute(
                ActionKind::SendEmail,
                &json!({
                    "to": "{{fields.owner}}",
                    "subject": "Deal {{record_id}} moved to {{to_state}}",
                    "body": "Amount {{fields.amount}}, unknown {{nope}}"
                }),
                &ctx(),
            )
            .await;
        assert!(result.is_success(), "{:?}", result.error);
        assert_eq!(
            dispatcher.requests(),
            vec![DispatchRequest::SendEmail {
                to: vec!["jane@example.com".to_string()],
                subject: "Deal 42 moved to Review".to_string(),
                body: "Amount 1500, unknown {{nope}}".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn unbound_kind_is_classified() {
        let dispatcher = Arc::new(RecordingDispatcher::new());
        let executor = ActionExecutor::with_handlers(dispatcher.clone(), vec![Box::new(SendEmailHandler)]);
        let result = executor
            .execute(ActionKind::CreateTask, &json!({}), &ctx())
            .await;
        assert_eq!(result.status, LogStatus::Failed);
        assert_eq!(
            result.error,
            Some(ActionError::UnknownActionType {
                kind: ActionKind::CreateTask
            })
        );
        assert!(dispatcher.requests().is_empty());
    }

    #[tokio::test]
    async fn dispatcher_failure_is_a_failed_result() {
        let dispatcher = Arc::new(RecordingDispatcher::failing_on(&[ActionKind::NotifyUser]));
        let executor = ActionExecutor::new(dispatcher.clone());
        let result = executor
            .execute(ActionKind::NotifyUser, &json!({"message": "hi"}), &ctx())
            .await;
        assert!(!result.is_success());
        assert!(matches!(result.error, Some(ActionError::Dispatch { .. })));
        assert!(result.result.is_none());
    }

    #[test]
    fn result_serializes_error_as_text() {
        let result = ActionResult::failed(
            ActionKind::SendEmail,
            ActionError::InvalidConfig {
                kind: ActionKind::SendEmail,
                message: "missing 'to'".to_string(),
            },
        );
        let v = serde_json::to_value(&result).unwrap();
        assert_eq!(v["status"], "failed");
        assert_eq!(v["error"], "invalid send_email config: missing 'to'");
    }

    #[test]
    fn timeout_reports_the_bound() {
        let error = ActionError::Timeout {
            kind: ActionKind::NotifyUser,
            after: std::time::Duration::from_millis(250),
        };
        assert_eq!(error.to_string(), "notify_user timed out after 250ms");
    }

    #[tokio::test]
    async fn submitted_note_is_available_to_templates() {
        let dispatcher = Arc::new(RecordingDispatcher::new());
        let executor = ActionExecutor::new(dispatcher.clone());
        let ctx = ctx().with_requirements(&RequirementsData::default().with_note("signed on site"));
        let result = executor
            .execute(
                ActionKind::SendEmail,
                &json!({
                    "to": "{{fields.owner}}",
                    "subject": "Deal {{record_id}}",
                    "body": "Note: {{requirements_data.note}}"
                }),
                &ctx,
            )
            .await;
        assert!(result.is_success(), "{:?}", result.error);
        assert_eq!(
            dispatcher.requests(),
            vec![DispatchRequest::SendEmail {
                to: vec!["jane@example.com".to_string()],
                subject: "Deal 42".to_string(),
                body: "Note: signed on site".to_string(),
            }]
        );
    }
}

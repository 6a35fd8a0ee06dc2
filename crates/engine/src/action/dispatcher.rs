use std::sync::Mutex;

use async_trait::async_trait;
use blueprint_core::{ActionKind, ActorId, RecordId};
use serde::Serialize;
use time::OffsetDateTime;

/// A validated side effect, ready for delivery.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DispatchRequest {
    SendEmail {
        to: Vec<String>,
        subject: String,
        body: String,
    },
    UpdateField {
        record_id: RecordId,
        field: String,
        value: serde_json::Value,
    },
    CreateTask {
        record_id: RecordId,
        subject: String,
        description: String,
        #[serde(with = "time::serde::rfc3339")]
        due_at: OffsetDateTime,
        assigned_to: Option<ActorId>,
        priority: String,
    },
    NotifyUser {
        user_ids: Vec<ActorId>,
        title: String,
        message: String,
    },
}

impl DispatchRequest {
    pub fn kind(&self) -> ActionKind {
        match self {
            DispatchRequest::SendEmail { .. } => ActionKind::SendEmail,
            DispatchRequest::UpdateField { .. } => ActionKind::UpdateField,
            DispatchRequest::CreateTask { .. } => ActionKind::CreateTask,
            DispatchRequest::NotifyUser { .. } => ActionKind::NotifyUser,
        }
    }
}

/// Delivers side effects on behalf of the engine.
///
/// Fire-and-acknowledge: `Ok` carries a receipt stored with the action log,
/// `Err` a message describing why delivery was refused. Retries, if any, are
/// the dispatcher's own business.
#[async_trait]
pub trait ActionDispatcher: Send + Sync {
    async fn dispatch(&self, request: DispatchRequest) -> Result<serde_json::Value, String>;
}

/// Emits each request as a `tracing` event and acknowledges it.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingDispatcher;

#[async_trait]
impl ActionDispatcher for LoggingDispatcher {
    async fn dispatch(&self, request: DispatchRequest) -> Result<serde_json::Value, String> {
        let payload = serde_json::to_value(&request).map_err(|e| e.to_string())?;
        tracing::info!(kind = %request.kind(), %payload, "action dispatched");
        Ok(serde_json::json!({ "dispatched": request.kind().as_str() }))
    }
}

/// Keeps every request in memory. Requests of the kinds passed to
/// [`RecordingDispatcher::failing_on`] are recorded and then refused.
#[derive(Debug, Default)]
pub struct RecordingDispatcher {
    requests: Mutex<Vec<DispatchRequest>>,
    fail_on: Vec<ActionKind>,
}

impl RecordingDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on(kinds: &[ActionKind]) -> Self {
        RecordingDispatcher {
            requests: Mutex::new(Vec::new()),
            fail_on: kinds.to_vec(),
        }
    }

    pub fn requests(&self) -> Vec<DispatchRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn count(&self, kind: ActionKind) -> usize {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|r| r.kind() == kind)
            .count()
    }
}

#[async_trait]
impl ActionDispatcher for RecordingDispatcher {
    async fn dispatch(&self, request: DispatchRequest) -> Result<serde_json::Value, String> {
        let kind = request.kind();
        let seq = {
            let mut requests = self.requests.lock().unwrap_or_else(|e| e.into_inner());
            requests.push(request);
            requests.len()
        };
        if self.fail_on.contains(&kind) {
            return Err(format!("{} delivery refused", kind));
        }
        Ok(serde_json::json!({ "sequence": seq }))
    }
}

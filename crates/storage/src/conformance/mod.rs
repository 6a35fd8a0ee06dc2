//! Conformance test suite for `BlueprintStorage` implementations.
//!
//! A backend-agnostic suite that any `BlueprintStorage` implementation can
//! run to verify correctness. The suite covers:
//!
//! - **Initialization**: record creation, duplicate detection, removal
//! - **Snapshot isolation**: uncommitted writes invisible, aborts discarded
//! - **Version validation / OCC**: stale versions rejected
//! - **SLA instances**: one active instance per record, close and breach stamps
//! - **Escalation logs**: at most one row per (instance, escalation)
//! - **Concurrency**: racing writers on one record, record locks held to commit
//!
//! # Usage
//!
//! Backend crates call [`run_conformance_suite`] with a factory function that
//! creates a fresh, empty storage instance for each test:
//!
//! ```ignore
//! use blueprint_storage::conformance::run_conformance_suite;
//!
//! #[tokio::test]
//! async fn postgres_conformance() {
//!     let report = run_conformance_suite(|| async {
//!         create_test_postgres_storage().await
//!     }).await;
//!     assert!(report.failed == 0, "{report}");
//! }
//! ```

mod concurrent;
mod escalation;
mod init;
mod sla;
mod snapshot;
mod version;

use std::fmt;
use std::future::Future;

use blueprint_core::{
    ActionKind, ActorId, BlueprintId, EscalationId, RecordId, SlaId, StateId, TransitionId,
};
use time::macros::datetime;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::record::{
    EscalationLogRecord, LogStatus, RecordKey, RecordStateRecord, SlaInstanceRecord, SlaStatus,
    TransitionHistoryRecord,
};
use crate::BlueprintStorage;

/// Result of a single conformance test.
#[derive(Debug, Clone)]
pub struct TestResult {
    /// Test category (e.g. "init", "snapshot", "sla").
    pub category: String,
    /// Test name (e.g. "initialize_creates_record_at_version_0").
    pub name: String,
    pub passed: bool,
    /// Error message if the test failed.
    pub message: Option<String>,
}

impl TestResult {
    fn pass(category: &str, name: &str) -> Self {
        Self {
            category: category.to_string(),
            name: name.to_string(),
            passed: true,
            message: None,
        }
    }

    fn fail(category: &str, name: &str, msg: String) -> Self {
        Self {
            category: category.to_string(),
            name: name.to_string(),
            passed: false,
            message: Some(msg),
        }
    }

    fn from_result(category: &str, name: &str, result: Result<(), String>) -> Self {
        match result {
            Ok(()) => Self::pass(category, name),
            Err(msg) => Self::fail(category, name, msg),
        }
    }
}

/// Aggregated report from a full conformance suite run.
#[derive(Debug, Clone)]
pub struct ConformanceReport {
    pub results: Vec<TestResult>,
    pub passed: usize,
    pub failed: usize,
    pub total: usize,
}

impl fmt::Display for ConformanceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Conformance: {}/{} passed ({} failed)",
            self.passed, self.total, self.failed
        )?;
        for r in &self.results {
            if !r.passed {
                writeln!(
                    f,
                    "  FAIL [{}/{}]: {}",
                    r.category,
                    r.name,
                    r.message.as_deref().unwrap_or("(no message)")
                )?;
            }
        }
        Ok(())
    }
}

/// Run the full conformance suite against a storage backend.
///
/// The `factory` function is called once per test to create a fresh, empty
/// storage instance, ensuring test isolation.
pub async fn run_conformance_suite<S, F, Fut>(factory: F) -> ConformanceReport
where
    S: BlueprintStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.extend(init::run_init_tests(&factory).await);
    results.extend(snapshot::run_snapshot_tests(&factory).await);
    results.extend(version::run_version_tests(&factory).await);
    results.extend(sla::run_sla_tests(&factory).await);
    results.extend(escalation::run_escalation_tests(&factory).await);
    results.extend(concurrent::run_concurrent_tests(&factory).await);

    let passed = results.iter().filter(|r| r.passed).count();
    let total = results.len();

    ConformanceReport {
        results,
        passed,
        failed: total - passed,
        total,
    }
}

// ── Helpers: record constructors with sensible defaults ──────────────────────

const T0: OffsetDateTime = datetime!(2025-01-06 09:00 UTC);

fn key(record_id: i64) -> RecordKey {
    RecordKey::new(BlueprintId(1), RecordId(record_id))
}

fn make_state_row(record_id: i64, state: i64) -> RecordStateRecord {
    RecordStateRecord {
        blueprint_id: BlueprintId(1),
        record_id: RecordId(record_id),
        current_state_id: StateId(state),
        state_entered_at: T0,
        version: 0,
        updated_at: T0,
    }
}

fn make_sla_instance(record_id: i64, state: i64) -> SlaInstanceRecord {
    SlaInstanceRecord {
        id: Uuid::new_v4(),
        sla_id: SlaId(1),
        blueprint_id: BlueprintId(1),
        record_id: RecordId(record_id),
        state_id: StateId(state),
        started_at: T0,
        due_at: T0 + Duration::hours(24),
        breached_at: None,
        closed_at: None,
        status: SlaStatus::Active,
    }
}

fn make_history(record_id: i64, from: i64, to: i64) -> TransitionHistoryRecord {
    TransitionHistoryRecord {
        id: Uuid::new_v4(),
        blueprint_id: BlueprintId(1),
        record_id: RecordId(record_id),
        transition_id: TransitionId(10),
        from_state_id: StateId(from),
        to_state_id: StateId(to),
        executed_by: ActorId(7),
        executed_at: T0 + Duration::hours(1),
        field_snapshot: serde_json::json!({"amount": 1500}),
        requirements_data: serde_json::json!({"note": "approved by phone"}),
    }
}

fn make_escalation_log(sla_instance_id: Uuid, escalation_id: i64) -> EscalationLogRecord {
    EscalationLogRecord {
        id: Uuid::new_v4(),
        sla_instance_id,
        escalation_id: EscalationId(escalation_id),
        action_type: ActionKind::NotifyUser,
        status: LogStatus::Success,
        result: Some(serde_json::json!({"notified": true})),
        error: None,
        fired_at: T0 + Duration::hours(20),
    }
}

/// Initialize `record_id` in state `state` and commit.
async fn seed_record<S: BlueprintStorage>(
    storage: &S,
    record_id: i64,
    state: i64,
) -> Result<(), String> {
    let mut snap = storage
        .begin_snapshot()
        .await
        .map_err(|e| format!("begin: {e}"))?;
    storage
        .initialize_record_state(&mut snap, make_state_row(record_id, state))
        .await
        .map_err(|e| format!("init: {e}"))?;
    storage
        .commit_snapshot(snap)
        .await
        .map_err(|e| format!("commit init: {e}"))
}

/// Open an SLA instance for `record_id` and commit. Returns the instance.
async fn seed_sla<S: BlueprintStorage>(
    storage: &S,
    record_id: i64,
    state: i64,
) -> Result<SlaInstanceRecord, String> {
    let instance = make_sla_instance(record_id, state);
    let mut snap = storage
        .begin_snapshot()
        .await
        .map_err(|e| format!("begin: {e}"))?;
    storage
        .open_sla_instance(&mut snap, instance.clone())
        .await
        .map_err(|e| format!("open sla: {e}"))?;
    storage
        .commit_snapshot(snap)
        .await
        .map_err(|e| format!("commit sla: {e}"))?;
    Ok(instance)
}

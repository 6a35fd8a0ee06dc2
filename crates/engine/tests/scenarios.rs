//! End-to-end behaviour of the engine and scheduler over the in-memory backend.

use std::sync::Arc;

use blueprint_core::{
    parse_definition, snapshot_from_json, ActionKind, ActorId, BlueprintDefinition, BlueprintId,
    DefinitionError, FieldSnapshot, RecordId, RequirementsData, StateId, TransitionId,
};
use blueprint_engine::config::SchedulerConfig;
use async_trait::async_trait;
use blueprint_engine::{
    ActionDispatcher, ActionExecutor, BusinessCalendar, DispatchRequest, EngineError, ManualClock,
    RecordingDispatcher, TransitionEngine,
};
use blueprint_storage::{BlueprintStorage, LogStatus, MemoryStorage, RecordKey, SlaStatus, StorageError};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use time::macros::datetime;
use time::{Duration, OffsetDateTime};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// Monday morning.
const T0: OffsetDateTime = datetime!(2025-01-06 09:00 UTC);

const DEALS: BlueprintId = BlueprintId(1);
const DRAFT: StateId = StateId(1);
const REVIEW: StateId = StateId(2);
const APPROVED: StateId = StateId(3);
const SUBMIT: TransitionId = TransitionId(10);
const APPROVE: TransitionId = TransitionId(11);
const ACTOR: ActorId = ActorId(7);

fn deals_document() -> Value {
    json!({
        "id": 1,
        "name": "Deal approval",
        "field": "stage",
        "states": [
            {"id": 1, "name": "Draft", "is_initial": true, "field_option_value": "draft"},
            {
                "id": 2, "name": "Review", "field_option_value": "review",
                "sla": {
                    "id": 20, "name": "Review within a day", "duration_hours": 24,
                    "escalations": [
                        {"id": 200, "trigger_type": "approaching", "trigger_value": 80,
                         "action_type": "notify_user", "display_order": 1,
                         "config": {"user_ids": [99], "title": "SLA at {{sla.percent_elapsed}}%"}},
                        {"id": 201, "trigger_type": "breached",
                         "action_type": "notify_user", "display_order": 2,
                         "config": {"user_ids": [99], "title": "SLA breached"}}
                    ]
                }
            },
            {"id": 3, "name": "Approved", "is_terminal": true, "field_option_value": "approved"}
        ],
        "transitions": [
            {
                "id": 10, "name": "Submit", "from_state_id": 1, "to_state_id": 2,
                "display_order": 1,
                "conditions": [{"field": "amount", "operator": "gt", "value": 1000}],
                "actions": [
                    {"id": 1000, "type": "send_email", "display_order": 1,
                     "config": {"to": "{{fields.owner}}", "subject": "{{transition_name}}: deal {{record_id}}"}},
                    {"id": 1001, "type": "create_task", "display_order": 2,
                     "config": {"subject": "Review deal {{record_id}}"}}
                ]
            },
            {"id": 11, "name": "Approve", "from_state_id": 2, "to_state_id": 3, "display_order": 1}
        ]
    })
}

fn deals() -> BlueprintDefinition {
    parse_definition(&deals_document()).unwrap()
}

fn fields(v: Value) -> FieldSnapshot {
    snapshot_from_json(&v).unwrap()
}

fn big_deal() -> FieldSnapshot {
    fields(json!({"amount": 1500, "owner": "jane@example.com"}))
}

struct Harness {
    engine: Arc<TransitionEngine<MemoryStorage>>,
    storage: Arc<MemoryStorage>,
    clock: Arc<ManualClock>,
    dispatcher: Arc<RecordingDispatcher>,
}

fn harness_with(dispatcher: RecordingDispatcher) -> Harness {
    harness_over(deals(), dispatcher)
}

fn harness_over(def: BlueprintDefinition, dispatcher: RecordingDispatcher) -> Harness {
    let storage = Arc::new(MemoryStorage::new());
    let clock = Arc::new(ManualClock::new(T0));
    let dispatcher = Arc::new(dispatcher);
    let executor = Arc::new(ActionExecutor::new(dispatcher.clone()));
    let engine = TransitionEngine::new(
        storage.clone(),
        executor,
        BusinessCalendar::default(),
        clock.clone(),
    );
    engine.activate(def).unwrap();
    Harness {
        engine: Arc::new(engine),
        storage,
        clock,
        dispatcher,
    }
}

fn harness() -> Harness {
    harness_with(RecordingDispatcher::new())
}

fn key(record: i64) -> RecordKey {
    RecordKey::new(DEALS, RecordId(record))
}

// ──────────────────────────────────────────────
// Scenario A: guarded transition
// ──────────────────────────────────────────────

#[tokio::test]
async fn small_deal_has_no_eligible_transition() {
    let h = harness();
    let eligible = h
        .engine
        .list_eligible(DEALS, RecordId(1), &fields(json!({"amount": 500})))
        .await
        .unwrap();
    assert!(eligible.is_empty());

    let err = h
        .engine
        .execute(DEALS, RecordId(1), SUBMIT, &fields(json!({"amount": 500})), ACTOR)
        .await
        .unwrap_err();
    match err {
        EngineError::ConditionNotMet { transition_id, failed } => {
            assert_eq!(transition_id, SUBMIT);
            assert_eq!(failed.len(), 1);
        }
        other => panic!("expected ConditionNotMet, got {other:?}"),
    }
    let state = h.storage.get_record_state(key(1)).await.unwrap();
    assert_eq!(state.current_state_id, DRAFT);
    assert!(h.engine.transition_history(DEALS, RecordId(1)).await.unwrap().is_empty());
}

#[tokio::test]
async fn big_deal_moves_to_review_with_history_and_actions() {
    let h = harness();
    let eligible = h
        .engine
        .list_eligible(DEALS, RecordId(2), &big_deal())
        .await
        .unwrap();
    assert_eq!(eligible.len(), 1);
    assert_eq!(eligible[0].id, SUBMIT);
    assert_eq!(eligible[0].to_state_name, "Review");

    let outcome = h
        .engine
        .execute(DEALS, RecordId(2), SUBMIT, &big_deal(), ACTOR)
        .await
        .unwrap();
    assert_eq!(outcome.new_state, REVIEW);
    assert_eq!(outcome.action_results.len(), 2);
    assert_eq!(outcome.failed_actions().count(), 0);

    let state = h.storage.get_record_state(key(2)).await.unwrap();
    assert_eq!(state.current_state_id, REVIEW);
    assert_eq!(state.state_entered_at, T0);

    let history = h.engine.transition_history(DEALS, RecordId(2)).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].id, outcome.history_entry_id);
    assert_eq!(history[0].from_state_id, DRAFT);
    assert_eq!(history[0].to_state_id, REVIEW);
    assert_eq!(history[0].executed_by, ACTOR);
    assert_eq!(history[0].field_snapshot["amount"], json!(1500));

    let requests = h.dispatcher.requests();
    assert_eq!(
        requests[0],
        DispatchRequest::SendEmail {
            to: vec!["jane@example.com".to_string()],
            subject: "Submit: deal 2".to_string(),
            body: String::new(),
        }
    );
    assert!(matches!(
        &requests[1],
        DispatchRequest::CreateTask { subject, assigned_to: Some(ACTOR), .. } if subject == "Review deal 2"
    ));

    let logs = h.engine.action_logs(outcome.history_entry_id).await.unwrap();
    assert_eq!(logs.len(), 2);
    assert!(logs.iter().all(|l| l.status == LogStatus::Success));
}

#[tokio::test]
async fn failed_action_does_not_roll_back_transition() {
    let h = harness_with(RecordingDispatcher::failing_on(&[ActionKind::CreateTask]));
    let outcome = h
        .engine
        .execute(DEALS, RecordId(3), SUBMIT, &big_deal(), ACTOR)
        .await
        .unwrap();
    assert_eq!(outcome.new_state, REVIEW);
    let failed: Vec<_> = outcome.failed_actions().collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].result.kind, ActionKind::CreateTask);

    let logs = h.engine.action_logs(outcome.history_entry_id).await.unwrap();
    assert_eq!(logs.len(), 2);
    assert_eq!(logs[0].status, LogStatus::Success);
    assert_eq!(logs[1].status, LogStatus::Failed);
    assert!(logs[1].error.as_deref().unwrap_or_default().contains("refused"));

    let state = h.storage.get_record_state(key(3)).await.unwrap();
    assert_eq!(state.current_state_id, REVIEW);
}

#[tokio::test]
async fn transition_from_wrong_state_is_invalid() {
    let h = harness();
    let err = h
        .engine
        .execute(DEALS, RecordId(4), APPROVE, &big_deal(), ACTOR)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::InvalidTransition { current_state: DRAFT, .. }
    ));

    let err = h
        .engine
        .execute(DEALS, RecordId(4), TransitionId(999), &big_deal(), ACTOR)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidTransition { .. }));

    let err = h
        .engine
        .execute(BlueprintId(77), RecordId(4), SUBMIT, &big_deal(), ACTOR)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::UnknownBlueprint { .. }));
}

#[tokio::test]
async fn terminal_state_offers_nothing() {
    let h = harness();
    h.engine
        .execute(DEALS, RecordId(5), SUBMIT, &big_deal(), ACTOR)
        .await
        .unwrap();
    h.engine
        .execute(DEALS, RecordId(5), APPROVE, &big_deal(), ACTOR)
        .await
        .unwrap();
    let eligible = h
        .engine
        .list_eligible(DEALS, RecordId(5), &big_deal())
        .await
        .unwrap();
    assert!(eligible.is_empty());
    assert!(h.engine.sla_status(DEALS, RecordId(5)).await.unwrap().is_none());
}

// ──────────────────────────────────────────────
// Scenario B: SLA escalations fire once each
// ──────────────────────────────────────────────

#[tokio::test]
async fn escalations_fire_once_per_threshold() {
    let h = harness();
    h.engine
        .execute(DEALS, RecordId(1), SUBMIT, &big_deal(), ACTOR)
        .await
        .unwrap();
    let scheduler = h.engine.scheduler(&SchedulerConfig::default());
    let cancel = CancellationToken::new();

    let instance = h.storage.list_sla_instances(key(1)).await.unwrap().remove(0);
    assert_eq!(instance.due_at, T0 + Duration::hours(24));

    h.clock.advance(Duration::hours(20));
    let report = scheduler.sweep_once(&cancel).await.unwrap();
    assert_eq!(report.checked, 1);
    assert_eq!(report.escalations_fired, 1);
    assert_eq!(report.breaches_marked, 0);
    let logs = h.storage.list_escalation_logs(instance.id).await.unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].escalation_id.0, 200);
    assert_eq!(
        h.dispatcher.requests().last(),
        Some(&DispatchRequest::NotifyUser {
            user_ids: vec![ActorId(99)],
            title: "SLA at 83.33%".to_string(),
            message: String::new(),
        })
    );

    h.clock.advance(Duration::hours(1));
    let report = scheduler.sweep_once(&cancel).await.unwrap();
    assert_eq!(report.escalations_fired, 0);
    assert_eq!(h.storage.list_escalation_logs(instance.id).await.unwrap().len(), 1);

    h.clock.advance(Duration::hours(4));
    let report = scheduler.sweep_once(&cancel).await.unwrap();
    assert_eq!(report.escalations_fired, 1);
    assert_eq!(report.breaches_marked, 1);
    let logs = h.storage.list_escalation_logs(instance.id).await.unwrap();
    assert_eq!(logs.len(), 2);
    assert_eq!(logs[1].escalation_id.0, 201);

    let report = scheduler.sweep_once(&cancel).await.unwrap();
    assert_eq!(report.escalations_fired, 0);
    assert_eq!(report.breaches_marked, 0);
    assert_eq!(h.dispatcher.count(ActionKind::NotifyUser), 2);

    // Breach is recorded but the instance stays open until the record moves.
    let instance = h.storage.get_sla_instance(instance.id).await.unwrap();
    assert_eq!(instance.status, SlaStatus::Active);
    assert_eq!(instance.breached_at, Some(T0 + Duration::hours(25)));
}

#[tokio::test]
async fn late_first_sweep_fires_every_crossed_threshold_in_order() {
    let h = harness();
    h.engine
        .execute(DEALS, RecordId(1), SUBMIT, &big_deal(), ACTOR)
        .await
        .unwrap();
    h.clock.advance(Duration::hours(30));
    let report = h
        .engine
        .scheduler(&SchedulerConfig::default())
        .sweep_once(&CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.escalations_fired, 2);
    let instance = h.storage.list_sla_instances(key(1)).await.unwrap().remove(0);
    let order: Vec<i64> = h
        .storage
        .list_escalation_logs(instance.id)
        .await
        .unwrap()
        .iter()
        .map(|l| l.escalation_id.0)
        .collect();
    assert_eq!(order, vec![200, 201]);
}

#[tokio::test]
async fn failed_escalation_is_logged_and_not_retried() {
    let h = harness_with(RecordingDispatcher::failing_on(&[ActionKind::NotifyUser]));
    h.engine
        .execute(DEALS, RecordId(1), SUBMIT, &big_deal(), ACTOR)
        .await
        .unwrap();
    let scheduler = h.engine.scheduler(&SchedulerConfig::default());
    let cancel = CancellationToken::new();

    h.clock.advance(Duration::hours(20));
    let report = scheduler.sweep_once(&cancel).await.unwrap();
    assert_eq!(report.escalations_fired, 1);
    assert_eq!(report.escalations_failed, 1);

    let report = scheduler.sweep_once(&cancel).await.unwrap();
    assert_eq!(report.escalations_fired, 0);

    let instance = h.storage.list_sla_instances(key(1)).await.unwrap().remove(0);
    let logs = h.storage.list_escalation_logs(instance.id).await.unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].status, LogStatus::Failed);
    assert!(logs[0].error.is_some());
}

/// Acknowledges everything except notifications, which never answer.
struct StalledNotifications {
    stalled: Notify,
}

#[async_trait]
impl ActionDispatcher for StalledNotifications {
    async fn dispatch(&self, request: DispatchRequest) -> Result<Value, String> {
        if request.kind() == ActionKind::NotifyUser {
            self.stalled.notify_one();
            std::future::pending::<()>().await;
        }
        Ok(json!({"delivered": true}))
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stalled_escalation_times_out_and_releases_the_record() {
    let storage = Arc::new(MemoryStorage::with_lock_timeout(
        std::time::Duration::from_millis(200),
    ));
    let clock = Arc::new(ManualClock::new(T0));
    let dispatcher = Arc::new(StalledNotifications {
        stalled: Notify::new(),
    });
    let engine = TransitionEngine::new(
        storage.clone(),
        Arc::new(ActionExecutor::new(dispatcher.clone())),
        BusinessCalendar::default(),
        clock.clone(),
    );
    engine.activate(deals()).unwrap();
    let engine = Arc::new(engine);
    engine
        .execute(DEALS, RecordId(1), SUBMIT, &big_deal(), ACTOR)
        .await
        .unwrap();
    clock.advance(Duration::hours(20));

    let scheduler = engine.scheduler(&SchedulerConfig {
        action_timeout_ms: 100,
        ..SchedulerConfig::default()
    });
    let sweep = tokio::spawn(async move { scheduler.sweep_once(&CancellationToken::new()).await });

    // The sweep holds the record while the notification hangs.
    dispatcher.stalled.notified().await;
    let approved = engine
        .execute(DEALS, RecordId(1), APPROVE, &big_deal(), ACTOR)
        .await
        .unwrap();
    assert_eq!(approved.new_state, APPROVED);

    let report = tokio::time::timeout(std::time::Duration::from_secs(3), sweep)
        .await
        .expect("sweep did not finish")
        .unwrap()
        .unwrap();
    assert_eq!(report.escalations_fired, 1);
    assert_eq!(report.escalations_failed, 1);

    let instance = storage.list_sla_instances(key(1)).await.unwrap().remove(0);
    let logs = storage.list_escalation_logs(instance.id).await.unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].escalation_id.0, 200);
    assert_eq!(logs[0].status, LogStatus::Failed);
    assert!(logs[0].error.as_deref().unwrap().contains("timed out after 100ms"));
}

#[tokio::test]
async fn sla_status_reports_progress() {
    let h = harness();
    assert!(h.engine.sla_status(DEALS, RecordId(1)).await.unwrap().is_none());
    h.engine
        .execute(DEALS, RecordId(1), SUBMIT, &big_deal(), ACTOR)
        .await
        .unwrap();

    h.clock.advance(Duration::hours(20));
    let status = h.engine.sla_status(DEALS, RecordId(1)).await.unwrap().unwrap();
    assert_eq!(status.state_id, REVIEW);
    assert_eq!(status.entered_at, T0);
    assert_eq!(status.deadline, T0 + Duration::hours(24));
    assert_eq!(status.percent_elapsed, Decimal::new(8333, 2));
    assert_eq!(status.status, SlaStatus::Active);
    assert_eq!(status.remaining, Duration::hours(4));
    assert!(status.is_approaching);
    assert!(!status.is_breached);

    h.clock.advance(Duration::hours(6));
    let status = h.engine.sla_status(DEALS, RecordId(1)).await.unwrap().unwrap();
    assert!(status.is_breached);
    assert!(!status.is_approaching);
}

#[tokio::test]
async fn leaving_a_state_closes_its_sla() {
    let h = harness();
    h.engine
        .execute(DEALS, RecordId(1), SUBMIT, &big_deal(), ACTOR)
        .await
        .unwrap();
    h.engine
        .execute(DEALS, RecordId(2), SUBMIT, &big_deal(), ACTOR)
        .await
        .unwrap();

    h.clock.advance(Duration::hours(2));
    h.engine
        .execute(DEALS, RecordId(1), APPROVE, &big_deal(), ACTOR)
        .await
        .unwrap();
    let met = h.storage.list_sla_instances(key(1)).await.unwrap();
    assert_eq!(met.len(), 1);
    assert_eq!(met[0].status, SlaStatus::Met);
    assert_eq!(met[0].closed_at, Some(T0 + Duration::hours(2)));

    h.clock.advance(Duration::hours(30));
    h.engine
        .execute(DEALS, RecordId(2), APPROVE, &big_deal(), ACTOR)
        .await
        .unwrap();
    let late = h.storage.list_sla_instances(key(2)).await.unwrap();
    assert_eq!(late[0].status, SlaStatus::Breached);
    assert!(h.storage.list_active_sla_instances().await.unwrap().is_empty());
}

#[tokio::test]
async fn leaving_at_the_deadline_is_a_breach() {
    let h = harness();
    h.engine
        .execute(DEALS, RecordId(1), SUBMIT, &big_deal(), ACTOR)
        .await
        .unwrap();
    h.clock.advance(Duration::hours(24));
    let view = h.engine.sla_status(DEALS, RecordId(1)).await.unwrap().unwrap();
    assert!(view.is_breached);

    h.engine
        .execute(DEALS, RecordId(1), APPROVE, &big_deal(), ACTOR)
        .await
        .unwrap();
    let closed = h.storage.list_sla_instances(key(1)).await.unwrap();
    assert_eq!(closed[0].status, SlaStatus::Breached);
    assert_eq!(closed[0].closed_at, Some(T0 + Duration::hours(24)));
}

// ──────────────────────────────────────────────
// Scenario C: concurrent executes on one record
// ──────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_executes_commit_once() {
    let h = harness();
    h.engine
        .initialize_record(DEALS, RecordId(1), None)
        .await
        .unwrap();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let engine = h.engine.clone();
        handles.push(tokio::spawn(async move {
            engine
                .execute(DEALS, RecordId(1), SUBMIT, &big_deal(), ACTOR)
                .await
        }));
    }

    let mut committed = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(outcome) => {
                assert_eq!(outcome.new_state, REVIEW);
                committed += 1;
            }
            Err(EngineError::InvalidTransition { current_state, .. }) => {
                assert_eq!(current_state, REVIEW);
            }
            Err(EngineError::ConcurrentModification { .. }) => {}
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }
    assert_eq!(committed, 1);
    assert_eq!(
        h.engine.transition_history(DEALS, RecordId(1)).await.unwrap().len(),
        1
    );
    let active: Vec<_> = h
        .storage
        .list_sla_instances(key(1))
        .await
        .unwrap()
        .into_iter()
        .filter(|i| i.is_active())
        .collect();
    assert_eq!(active.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn sweep_and_transition_race_keeps_one_log_per_escalation() {
    let h = harness();
    for record in 1..=6 {
        h.engine
            .execute(DEALS, RecordId(record), SUBMIT, &big_deal(), ACTOR)
            .await
            .unwrap();
    }
    h.clock.advance(Duration::hours(20));

    let scheduler = Arc::new(h.engine.scheduler(&SchedulerConfig {
        max_concurrency: 3,
        ..SchedulerConfig::default()
    }));
    let sweeps: Vec<_> = (0..3)
        .map(|_| {
            let scheduler = scheduler.clone();
            tokio::spawn(async move { scheduler.sweep_once(&CancellationToken::new()).await })
        })
        .collect();
    let engine = h.engine.clone();
    let approve = tokio::spawn(async move {
        engine
            .execute(DEALS, RecordId(1), APPROVE, &big_deal(), ACTOR)
            .await
    });

    let mut fired = 0;
    for sweep in sweeps {
        fired += sweep.await.unwrap().unwrap().escalations_fired;
    }
    approve.await.unwrap().unwrap();

    let mut logged = 0;
    for record in 1..=6 {
        for instance in h.storage.list_sla_instances(key(record)).await.unwrap() {
            let logs = h.storage.list_escalation_logs(instance.id).await.unwrap();
            assert!(logs.len() <= 1, "escalation logged twice for record {record}");
            logged += logs.len();
        }
    }
    assert_eq!(fired, logged);
    assert!(logged >= 5);
}

// ──────────────────────────────────────────────
// Scenario D: condition groups
// ──────────────────────────────────────────────

#[tokio::test]
async fn condition_groups_combine_as_or_of_ands() {
    let h = harness();
    let doc = json!({
        "id": 2,
        "name": "Routing",
        "states": [
            {"id": 1, "name": "New", "is_initial": true},
            {"id": 2, "name": "Priority", "is_terminal": true}
        ],
        "transitions": [{
            "id": 10, "name": "Escalate", "from_state_id": 1, "to_state_id": 2,
            "conditions": [
                {"field": "region", "operator": "eq", "value": "US", "group_label": "A"},
                {"field": "tier", "operator": "eq", "value": "gold", "group_label": "A"},
                {"field": "override", "operator": "is_not_empty", "group_label": "B"}
            ]
        }]
    });
    h.engine.activate(parse_definition(&doc).unwrap()).unwrap();
    let routing = BlueprintId(2);

    let cases = [
        (1, json!({"region": "US", "tier": "gold"}), true),
        (2, json!({"override": "yes"}), true),
        (3, json!({"region": "EU", "tier": "gold"}), false),
    ];
    for (record, snapshot, expected) in cases {
        let eligible = h
            .engine
            .list_eligible(routing, RecordId(record), &fields(snapshot.clone()))
            .await
            .unwrap();
        assert_eq!(!eligible.is_empty(), expected, "record {record}: {snapshot}");

        let result = h
            .engine
            .execute(routing, RecordId(record), TransitionId(10), &fields(snapshot), ACTOR)
            .await;
        assert_eq!(result.is_ok(), expected);
    }
}

// ──────────────────────────────────────────────
// Record placement and lifecycle
// ──────────────────────────────────────────────

#[tokio::test]
async fn governing_field_places_new_records() {
    let h = harness();
    let eligible = h
        .engine
        .list_eligible(DEALS, RecordId(8), &fields(json!({"stage": "review"})))
        .await
        .unwrap();
    assert_eq!(eligible.len(), 1);
    assert_eq!(eligible[0].id, APPROVE);

    let state = h.storage.get_record_state(key(8)).await.unwrap();
    assert_eq!(state.current_state_id, REVIEW);
    assert!(h.engine.sla_status(DEALS, RecordId(8)).await.unwrap().is_some());

    // Unknown values fall back to the initial state.
    let placed = h
        .engine
        .initialize_record(DEALS, RecordId(9), Some("archived"))
        .await
        .unwrap();
    assert_eq!(placed.current_state_id, DRAFT);
}

#[tokio::test]
async fn initialize_is_idempotent() {
    let h = harness();
    let first = h
        .engine
        .initialize_record(DEALS, RecordId(1), Some("review"))
        .await
        .unwrap();
    h.clock.advance(Duration::hours(1));
    let second = h
        .engine
        .initialize_record(DEALS, RecordId(1), Some("draft"))
        .await
        .unwrap();
    assert_eq!(first, second);
    assert_eq!(h.storage.list_sla_instances(key(1)).await.unwrap().len(), 1);
}

#[tokio::test]
async fn removing_a_record_cancels_its_sla() {
    let h = harness();
    h.engine
        .execute(DEALS, RecordId(1), SUBMIT, &big_deal(), ACTOR)
        .await
        .unwrap();
    assert!(h.engine.remove_record(DEALS, RecordId(1)).await.unwrap());

    let instances = h.storage.list_sla_instances(key(1)).await.unwrap();
    assert_eq!(instances[0].status, SlaStatus::Cancelled);
    assert!(matches!(
        h.storage.get_record_state(key(1)).await,
        Err(StorageError::RecordNotFound { .. })
    ));
    assert!(!h.engine.remove_record(DEALS, RecordId(1)).await.unwrap());
}

#[tokio::test]
async fn restored_record_keeps_its_entry_time() {
    let h = harness();
    let entered = T0 - Duration::hours(23);
    let row = h
        .engine
        .restore_record(DEALS, RecordId(1), REVIEW, entered)
        .await
        .unwrap();
    assert_eq!(row.state_entered_at, entered);

    let status = h.engine.sla_status(DEALS, RecordId(1)).await.unwrap().unwrap();
    assert_eq!(status.deadline, entered + Duration::hours(24));
    assert!(status.is_approaching);

    let err = h
        .engine
        .restore_record(DEALS, RecordId(1), DRAFT, T0)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Storage(StorageError::AlreadyInitialized { .. })
    ));
    let err = h
        .engine
        .restore_record(DEALS, RecordId(2), StateId(42), T0)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::UnknownState { .. }));
}

// ──────────────────────────────────────────────
// Activation
// ──────────────────────────────────────────────

#[tokio::test]
async fn reactivation_must_be_additive() {
    let h = harness();

    let mut doc = deals_document();
    doc["transitions"][1]["from_state_id"] = json!(1);
    let err = h.engine.activate(parse_definition(&doc).unwrap()).unwrap_err();
    assert!(matches!(
        err,
        EngineError::Definition(DefinitionError::NonAdditiveChange { .. })
    ));

    let mut doc = deals_document();
    doc["states"]
        .as_array_mut()
        .unwrap()
        .push(json!({"id": 4, "name": "Rejected", "is_terminal": true}));
    doc["transitions"].as_array_mut().unwrap().push(json!(
        {"id": 12, "name": "Reject", "from_state_id": 2, "to_state_id": 4}
    ));
    let def = h.engine.activate(parse_definition(&doc).unwrap()).unwrap();
    assert_eq!(def.states.len(), 4);
}

#[tokio::test]
async fn invalid_definition_is_rejected_at_activation() {
    let h = harness();
    let mut doc = deals_document();
    doc["id"] = json!(5);
    doc["states"][0]["is_initial"] = json!(false);
    let err = h.engine.activate(parse_definition(&doc).unwrap()).unwrap_err();
    assert!(matches!(err, EngineError::Definition(_)));
    assert!(h.engine.definition(BlueprintId(5)).is_none());
}

// ──────────────────────────────────────────────
// Scheduler lifecycle
// ──────────────────────────────────────────────

#[tokio::test]
async fn cancelled_sweep_stops_before_next_record() {
    let h = harness();
    h.engine
        .execute(DEALS, RecordId(1), SUBMIT, &big_deal(), ACTOR)
        .await
        .unwrap();
    h.clock.advance(Duration::hours(20));
    let cancel = CancellationToken::new();
    cancel.cancel();
    let report = h
        .engine
        .scheduler(&SchedulerConfig::default())
        .sweep_once(&cancel)
        .await
        .unwrap();
    assert!(report.cancelled);
    assert_eq!(report.checked, 0);
    assert_eq!(report.escalations_fired, 0);
}

#[tokio::test]
async fn run_loop_exits_on_cancel() {
    let h = harness();
    let scheduler = h.engine.scheduler(&SchedulerConfig::default());
    let cancel = CancellationToken::new();
    let stop = cancel.clone();
    let handle = tokio::spawn(async move { scheduler.run(cancel).await });
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    stop.cancel();
    tokio::time::timeout(std::time::Duration::from_secs(5), handle)
        .await
        .expect("scheduler did not stop")
        .unwrap();
}

// ──────────────────────────────────────────────
// Scenario E: transition requirements
// ──────────────────────────────────────────────

/// Approval asks for a reason and a completed checklist, and tells the
/// owner what was written.
fn deals_with_approval_requirements() -> BlueprintDefinition {
    let mut doc = deals_document();
    doc["transitions"][1]["requirements"] = json!([
        {"id": 1, "type": "note", "label": "Reason", "display_order": 1},
        {"id": 2, "type": "checklist", "label": "Sign-off", "display_order": 2,
         "config": {"items": ["credit_check", {"id": "legal", "label": "Legal review"}]}},
        {"id": 3, "type": "attachment", "label": "Contract", "is_required": false, "display_order": 3}
    ]);
    doc["transitions"][1]["actions"] = json!([
        {"id": 1100, "type": "notify_user", "display_order": 1,
         "config": {"user_ids": [99], "title": "Deal approved", "message": "{{requirements_data.note}}"}}
    ]);
    parse_definition(&doc).unwrap()
}

fn signed_off(note: &str) -> RequirementsData {
    let mut data = RequirementsData::default().with_note(note);
    data.checklist.insert("credit_check".to_string(), true);
    data.checklist.insert("legal".to_string(), true);
    data
}

#[tokio::test]
async fn missing_requirements_block_the_transition() {
    let h = harness_over(deals_with_approval_requirements(), RecordingDispatcher::new());
    h.engine
        .execute(DEALS, RecordId(1), SUBMIT, &big_deal(), ACTOR)
        .await
        .unwrap();

    let eligible = h
        .engine
        .list_eligible(DEALS, RecordId(1), &big_deal())
        .await
        .unwrap();
    assert_eq!(eligible.len(), 1);
    assert!(eligible[0].has_requirements);

    let mut partial = RequirementsData::default().with_note("  ");
    partial.checklist.insert("credit_check".to_string(), true);
    let err = h
        .engine
        .execute_with_requirements(DEALS, RecordId(1), APPROVE, &big_deal(), ACTOR, &partial)
        .await
        .unwrap_err();
    match err {
        EngineError::RequirementsNotMet {
            transition_id,
            missing,
        } => {
            assert_eq!(transition_id, APPROVE);
            assert_eq!(
                missing,
                vec![
                    "Reason: a note is required".to_string(),
                    "Sign-off: unchecked items legal".to_string(),
                ]
            );
        }
        other => panic!("expected RequirementsNotMet, got {other:?}"),
    }

    let state = h.storage.get_record_state(key(1)).await.unwrap();
    assert_eq!(state.current_state_id, REVIEW);
    assert_eq!(h.engine.transition_history(DEALS, RecordId(1)).await.unwrap().len(), 1);
    assert_eq!(h.storage.list_active_sla_instances().await.unwrap().len(), 1);
    assert_eq!(h.dispatcher.count(ActionKind::NotifyUser), 0);
}

#[tokio::test]
async fn submitted_requirements_are_kept_with_history_and_actions() {
    let h = harness_over(deals_with_approval_requirements(), RecordingDispatcher::new());
    h.engine
        .execute(DEALS, RecordId(1), SUBMIT, &big_deal(), ACTOR)
        .await
        .unwrap();

    let outcome = h
        .engine
        .execute_with_requirements(
            DEALS,
            RecordId(1),
            APPROVE,
            &big_deal(),
            ACTOR,
            &signed_off("Board approved on Friday"),
        )
        .await
        .unwrap();
    assert_eq!(outcome.new_state, APPROVED);
    assert_eq!(outcome.failed_actions().count(), 0);

    let history = h.engine.transition_history(DEALS, RecordId(1)).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].transition_id, APPROVE);
    assert_eq!(history[0].requirements_data["note"], "Board approved on Friday");
    assert_eq!(history[0].requirements_data["checklist"]["legal"], true);
    assert!(history[1].requirements_data.is_null());

    assert!(h.dispatcher.requests().contains(&DispatchRequest::NotifyUser {
        user_ids: vec![ActorId(99)],
        title: "Deal approved".to_string(),
        message: "Board approved on Friday".to_string(),
    }));
}

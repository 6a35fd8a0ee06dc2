//! Escalation log conformance tests.

use std::future::Future;

use super::{make_escalation_log, seed_record, seed_sla, TestResult};
use crate::{BlueprintStorage, StorageError};

pub(super) async fn run_escalation_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: BlueprintStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "escalation",
            "duplicate_log_rejected_across_snapshots",
            duplicate_log_rejected_across_snapshots(factory).await,
        ),
        TestResult::from_result(
            "escalation",
            "duplicate_log_rejected_within_snapshot",
            duplicate_log_rejected_within_snapshot(factory).await,
        ),
        TestResult::from_result(
            "escalation",
            "distinct_escalations_both_logged",
            distinct_escalations_both_logged(factory).await,
        ),
    ]
}

async fn duplicate_log_rejected_across_snapshots<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: BlueprintStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_record(&s, 1, 1).await?;
    let instance = seed_sla(&s, 1, 1).await?;

    let mut snap = s.begin_snapshot().await.map_err(|e| format!("begin: {e}"))?;
    s.insert_escalation_log(&mut snap, make_escalation_log(instance.id, 5))
        .await
        .map_err(|e| format!("first insert: {e}"))?;
    s.commit_snapshot(snap)
        .await
        .map_err(|e| format!("commit: {e}"))?;

    let mut snap = s.begin_snapshot().await.map_err(|e| format!("begin: {e}"))?;
    let result = s
        .insert_escalation_log(&mut snap, make_escalation_log(instance.id, 5))
        .await;
    let _ = s.abort_snapshot(snap).await;
    match result {
        Err(StorageError::DuplicateEscalationLog { .. }) => {}
        other => return Err(format!("expected DuplicateEscalationLog, got {:?}", other)),
    }

    let logs = s
        .list_escalation_logs(instance.id)
        .await
        .map_err(|e| format!("list: {e}"))?;
    if logs.len() != 1 {
        return Err(format!("expected 1 log row, got {}", logs.len()));
    }
    Ok(())
}

async fn duplicate_log_rejected_within_snapshot<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: BlueprintStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_record(&s, 1, 1).await?;
    let instance = seed_sla(&s, 1, 1).await?;

    let mut snap = s.begin_snapshot().await.map_err(|e| format!("begin: {e}"))?;
    s.insert_escalation_log(&mut snap, make_escalation_log(instance.id, 5))
        .await
        .map_err(|e| format!("first insert: {e}"))?;
    let result = s
        .insert_escalation_log(&mut snap, make_escalation_log(instance.id, 5))
        .await;
    let _ = s.abort_snapshot(snap).await;
    match result {
        Err(StorageError::DuplicateEscalationLog { .. }) => Ok(()),
        other => Err(format!("expected DuplicateEscalationLog, got {:?}", other)),
    }
}

async fn distinct_escalations_both_logged<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: BlueprintStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_record(&s, 1, 1).await?;
    let instance = seed_sla(&s, 1, 1).await?;

    let mut snap = s.begin_snapshot().await.map_err(|e| format!("begin: {e}"))?;
    for escalation in [5, 6] {
        s.insert_escalation_log(&mut snap, make_escalation_log(instance.id, escalation))
            .await
            .map_err(|e| format!("insert {escalation}: {e}"))?;
    }
    s.commit_snapshot(snap)
        .await
        .map_err(|e| format!("commit: {e}"))?;

    let logs = s
        .list_escalation_logs(instance.id)
        .await
        .map_err(|e| format!("list: {e}"))?;
    let ids: Vec<i64> = logs.iter().map(|l| l.escalation_id.0).collect();
    if ids != vec![5, 6] {
        return Err(format!("expected escalations [5, 6], got {:?}", ids));
    }
    Ok(())
}

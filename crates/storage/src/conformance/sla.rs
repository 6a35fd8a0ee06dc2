//! SLA instance conformance tests.

use std::future::Future;

use uuid::Uuid;

use super::{key, make_sla_instance, seed_record, seed_sla, TestResult, T0};
use crate::{BlueprintStorage, SlaStatus, StorageError};

pub(super) async fn run_sla_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: BlueprintStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "sla",
            "one_active_instance_per_record",
            one_active_instance_per_record(factory).await,
        ),
        TestResult::from_result(
            "sla",
            "close_then_reopen",
            close_then_reopen(factory).await,
        ),
        TestResult::from_result(
            "sla",
            "breach_stamp_keeps_instance_active",
            breach_stamp_keeps_instance_active(factory).await,
        ),
        TestResult::from_result(
            "sla",
            "missing_instance_not_found",
            missing_instance_not_found(factory).await,
        ),
    ]
}

async fn one_active_instance_per_record<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: BlueprintStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_record(&s, 1, 1).await?;
    let first = seed_sla(&s, 1, 1).await?;

    let mut snap = s.begin_snapshot().await.map_err(|e| format!("begin: {e}"))?;
    let result = s.open_sla_instance(&mut snap, make_sla_instance(1, 1)).await;
    let _ = s.abort_snapshot(snap).await;
    match result {
        Err(StorageError::ActiveSlaExists { existing, .. }) if existing == first.id => {}
        other => return Err(format!("expected ActiveSlaExists, got {:?}", other)),
    }

    let active = s
        .list_active_sla_instances()
        .await
        .map_err(|e| format!("list: {e}"))?;
    if active.len() != 1 {
        return Err(format!("expected 1 active instance, got {}", active.len()));
    }
    Ok(())
}

async fn close_then_reopen<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: BlueprintStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_record(&s, 1, 1).await?;
    let first = seed_sla(&s, 1, 1).await?;

    let mut snap = s.begin_snapshot().await.map_err(|e| format!("begin: {e}"))?;
    let active = s
        .get_active_sla_instance_for_update(&mut snap, key(1))
        .await
        .map_err(|e| format!("get active: {e}"))?
        .ok_or_else(|| "no active instance".to_string())?;
    let closed = s
        .close_sla_instance(&mut snap, active.id, SlaStatus::Met, T0)
        .await
        .map_err(|e| format!("close: {e}"))?;
    if closed.status != SlaStatus::Met || closed.closed_at != Some(T0) {
        return Err(format!("close returned {:?}", closed));
    }
    let second = make_sla_instance(1, 2);
    s.open_sla_instance(&mut snap, second.clone())
        .await
        .map_err(|e| format!("reopen in same snapshot: {e}"))?;
    s.commit_snapshot(snap)
        .await
        .map_err(|e| format!("commit: {e}"))?;

    let all = s
        .list_sla_instances(key(1))
        .await
        .map_err(|e| format!("list: {e}"))?;
    if all.len() != 2 {
        return Err(format!("expected 2 instances, got {}", all.len()));
    }
    let old = all
        .iter()
        .find(|i| i.id == first.id)
        .ok_or_else(|| "first instance missing".to_string())?;
    if old.status != SlaStatus::Met {
        return Err(format!("first instance status {:?}", old.status));
    }
    let active = s
        .list_active_sla_instances()
        .await
        .map_err(|e| format!("list active: {e}"))?;
    if active.len() != 1 || active[0].id != second.id {
        return Err(format!("expected only the new instance active, got {:?}", active));
    }
    Ok(())
}

async fn breach_stamp_keeps_instance_active<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: BlueprintStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_record(&s, 1, 1).await?;
    let instance = seed_sla(&s, 1, 1).await?;
    let first_stamp = T0 + time::Duration::hours(25);

    let mut snap = s.begin_snapshot().await.map_err(|e| format!("begin: {e}"))?;
    s.mark_sla_breached(&mut snap, instance.id, first_stamp)
        .await
        .map_err(|e| format!("mark: {e}"))?;
    let again = s
        .mark_sla_breached(&mut snap, instance.id, first_stamp + time::Duration::hours(1))
        .await
        .map_err(|e| format!("mark again: {e}"))?;
    s.commit_snapshot(snap)
        .await
        .map_err(|e| format!("commit: {e}"))?;

    if again.breached_at != Some(first_stamp) {
        return Err(format!("second stamp overwrote first: {:?}", again.breached_at));
    }
    let active = s
        .list_active_sla_instances()
        .await
        .map_err(|e| format!("list: {e}"))?;
    match active.as_slice() {
        [only] if only.id == instance.id && only.breached_at == Some(first_stamp) => Ok(()),
        other => Err(format!("expected breached instance still active, got {:?}", other)),
    }
}

async fn missing_instance_not_found<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: BlueprintStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let mut snap = s.begin_snapshot().await.map_err(|e| format!("begin: {e}"))?;
    let result = s.get_sla_instance_for_update(&mut snap, Uuid::new_v4()).await;
    let _ = s.abort_snapshot(snap).await;
    match result {
        Err(StorageError::SlaInstanceNotFound { .. }) => Ok(()),
        other => Err(format!("expected SlaInstanceNotFound, got {:?}", other)),
    }
}

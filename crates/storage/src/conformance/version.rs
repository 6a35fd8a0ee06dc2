//! Version validation (OCC) conformance tests.

use std::future::Future;

use blueprint_core::StateId;

use super::{key, seed_record, TestResult, T0};
use crate::{BlueprintStorage, StorageError};

pub(super) async fn run_version_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: BlueprintStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "version",
            "stale_version_conflicts",
            stale_version_conflicts(factory).await,
        ),
        TestResult::from_result(
            "version",
            "sequential_updates_increment_version",
            sequential_updates_increment_version(factory).await,
        ),
        TestResult::from_result(
            "version",
            "update_sets_state_entered_at",
            update_sets_state_entered_at(factory).await,
        ),
    ]
}

async fn stale_version_conflicts<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: BlueprintStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_record(&s, 1, 1).await?;

    let mut snap = s.begin_snapshot().await.map_err(|e| format!("begin: {e}"))?;
    s.update_record_state(&mut snap, key(1), 0, StateId(2), T0)
        .await
        .map_err(|e| format!("first update: {e}"))?;
    s.commit_snapshot(snap)
        .await
        .map_err(|e| format!("commit: {e}"))?;

    let mut snap = s.begin_snapshot().await.map_err(|e| format!("begin: {e}"))?;
    let result = s
        .update_record_state(&mut snap, key(1), 0, StateId(3), T0)
        .await;
    let _ = s.abort_snapshot(snap).await;
    match result {
        Err(StorageError::ConcurrentConflict {
            expected_version: 0,
            ..
        }) => Ok(()),
        other => Err(format!("expected ConcurrentConflict, got {:?}", other)),
    }
}

async fn sequential_updates_increment_version<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: BlueprintStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_record(&s, 1, 1).await?;
    for (expected, state) in [(0i64, 2i64), (1, 3), (2, 1)] {
        let mut snap = s.begin_snapshot().await.map_err(|e| format!("begin: {e}"))?;
        let v = s
            .update_record_state(&mut snap, key(1), expected, StateId(state), T0)
            .await
            .map_err(|e| format!("update from v{expected}: {e}"))?;
        s.commit_snapshot(snap)
            .await
            .map_err(|e| format!("commit: {e}"))?;
        if v != expected + 1 {
            return Err(format!("expected version {}, got {v}", expected + 1));
        }
    }
    Ok(())
}

async fn update_sets_state_entered_at<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: BlueprintStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_record(&s, 1, 1).await?;
    let entered = T0 + time::Duration::hours(5);
    let mut snap = s.begin_snapshot().await.map_err(|e| format!("begin: {e}"))?;
    s.update_record_state(&mut snap, key(1), 0, StateId(2), entered)
        .await
        .map_err(|e| format!("update: {e}"))?;
    s.commit_snapshot(snap)
        .await
        .map_err(|e| format!("commit: {e}"))?;
    let row = s
        .get_record_state(key(1))
        .await
        .map_err(|e| format!("get: {e}"))?;
    if row.state_entered_at != entered {
        return Err(format!(
            "expected state_entered_at {entered}, got {}",
            row.state_entered_at
        ));
    }
    Ok(())
}

//! Snapshot isolation conformance tests.
//!
//! Verifies that uncommitted writes are invisible outside a snapshot,
//! committed writes are visible, and aborted writes are discarded.

use std::future::Future;

use blueprint_core::StateId;

use super::{key, make_history, make_state_row, seed_record, TestResult, T0};
use crate::{BlueprintStorage, StorageError};

pub(super) async fn run_snapshot_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: BlueprintStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "snapshot",
            "uncommitted_record_invisible",
            uncommitted_record_invisible(factory).await,
        ),
        TestResult::from_result(
            "snapshot",
            "uncommitted_update_invisible",
            uncommitted_update_invisible(factory).await,
        ),
        TestResult::from_result(
            "snapshot",
            "abort_discards_all_writes",
            abort_discards_all_writes(factory).await,
        ),
        TestResult::from_result(
            "snapshot",
            "commit_applies_state_and_history_together",
            commit_applies_state_and_history_together(factory).await,
        ),
        TestResult::from_result(
            "snapshot",
            "snapshot_reads_its_own_writes",
            snapshot_reads_its_own_writes(factory).await,
        ),
    ]
}

async fn uncommitted_record_invisible<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: BlueprintStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let mut snap = s.begin_snapshot().await.map_err(|e| format!("begin: {e}"))?;
    s.initialize_record_state(&mut snap, make_state_row(1, 1))
        .await
        .map_err(|e| format!("init: {e}"))?;
    let seen = s.get_record_state(key(1)).await;
    let _ = s.abort_snapshot(snap).await;
    match seen {
        Err(StorageError::RecordNotFound { .. }) => Ok(()),
        other => Err(format!("uncommitted record was visible: {:?}", other)),
    }
}

async fn uncommitted_update_invisible<S, F, Fut>(factory: &F) -> Result<(), String>
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
        .map_err(|e| format!("update: {e}"))?;
    let seen = s
        .get_record_state(key(1))
        .await
        .map_err(|e| format!("get: {e}"))?;
    let _ = s.abort_snapshot(snap).await;
    if seen.current_state_id != StateId(1) || seen.version != 0 {
        return Err(format!(
            "uncommitted update visible: state {} version {}",
            seen.current_state_id, seen.version
        ));
    }
    Ok(())
}

async fn abort_discards_all_writes<S, F, Fut>(factory: &F) -> Result<(), String>
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
        .map_err(|e| format!("update: {e}"))?;
    s.insert_transition_history(&mut snap, make_history(1, 1, 2))
        .await
        .map_err(|e| format!("history: {e}"))?;
    s.abort_snapshot(snap)
        .await
        .map_err(|e| format!("abort: {e}"))?;

    let row = s
        .get_record_state(key(1))
        .await
        .map_err(|e| format!("get: {e}"))?;
    if row.version != 0 {
        return Err(format!("abort left version {}", row.version));
    }
    let history = s
        .list_transition_history(key(1))
        .await
        .map_err(|e| format!("history list: {e}"))?;
    if !history.is_empty() {
        return Err(format!("abort left {} history rows", history.len()));
    }
    Ok(())
}

async fn commit_applies_state_and_history_together<S, F, Fut>(
    factory: &F,
) -> Result<(), String>
where
    S: BlueprintStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_record(&s, 1, 1).await?;
    let mut snap = s.begin_snapshot().await.map_err(|e| format!("begin: {e}"))?;
    let version = s
        .update_record_state(&mut snap, key(1), 0, StateId(2), T0)
        .await
        .map_err(|e| format!("update: {e}"))?;
    let entry = make_history(1, 1, 2);
    s.insert_transition_history(&mut snap, entry.clone())
        .await
        .map_err(|e| format!("history: {e}"))?;
    s.commit_snapshot(snap)
        .await
        .map_err(|e| format!("commit: {e}"))?;

    if version != 1 {
        return Err(format!("expected new version 1, got {version}"));
    }
    let row = s
        .get_record_state(key(1))
        .await
        .map_err(|e| format!("get: {e}"))?;
    if row.current_state_id != StateId(2) || row.version != 1 {
        return Err(format!(
            "expected state 2 at version 1, got state {} at version {}",
            row.current_state_id, row.version
        ));
    }
    let history = s
        .list_transition_history(key(1))
        .await
        .map_err(|e| format!("history list: {e}"))?;
    if history != vec![entry] {
        return Err(format!("unexpected history: {:?}", history));
    }
    Ok(())
}

async fn snapshot_reads_its_own_writes<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: BlueprintStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let mut snap = s.begin_snapshot().await.map_err(|e| format!("begin: {e}"))?;
    s.initialize_record_state(&mut snap, make_state_row(1, 1))
        .await
        .map_err(|e| format!("init: {e}"))?;
    s.update_record_state(&mut snap, key(1), 0, StateId(3), T0)
        .await
        .map_err(|e| format!("update: {e}"))?;
    let row = s
        .get_record_state_for_update(&mut snap, key(1))
        .await
        .map_err(|e| format!("get for update: {e}"))?;
    s.commit_snapshot(snap)
        .await
        .map_err(|e| format!("commit: {e}"))?;
    if row.current_state_id != StateId(3) || row.version != 1 {
        return Err(format!(
            "snapshot did not see its own update: state {} version {}",
            row.current_state_id, row.version
        ));
    }
    Ok(())
}

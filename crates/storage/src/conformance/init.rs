//! Record initialization and removal conformance tests.

use std::future::Future;

use blueprint_core::{BlueprintId, StateId};

use super::{key, make_state_row, seed_record, TestResult};
use crate::{BlueprintStorage, StorageError};

pub(super) async fn run_init_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: BlueprintStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "init",
            "initialize_creates_record_at_version_0",
            initialize_creates_record_at_version_0(factory).await,
        ),
        TestResult::from_result(
            "init",
            "initialize_duplicate_rejected",
            initialize_duplicate_rejected(factory).await,
        ),
        TestResult::from_result(
            "init",
            "get_missing_record_not_found",
            get_missing_record_not_found(factory).await,
        ),
        TestResult::from_result(
            "init",
            "list_filters_by_blueprint_and_state",
            list_filters_by_blueprint_and_state(factory).await,
        ),
        TestResult::from_result(
            "init",
            "remove_record_state",
            remove_record_state(factory).await,
        ),
    ]
}

async fn initialize_creates_record_at_version_0<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: BlueprintStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_record(&s, 1, 1).await?;
    let row = s
        .get_record_state(key(1))
        .await
        .map_err(|e| format!("get: {e}"))?;
    if row.version != 0 {
        return Err(format!("expected version 0, got {}", row.version));
    }
    if row.current_state_id != StateId(1) {
        return Err(format!("expected state 1, got {}", row.current_state_id));
    }
    Ok(())
}

async fn initialize_duplicate_rejected<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: BlueprintStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_record(&s, 1, 1).await?;
    let mut snap = s.begin_snapshot().await.map_err(|e| format!("begin: {e}"))?;
    let result = s
        .initialize_record_state(&mut snap, make_state_row(1, 2))
        .await;
    let _ = s.abort_snapshot(snap).await;
    match result {
        Err(StorageError::AlreadyInitialized { .. }) => Ok(()),
        other => Err(format!("expected AlreadyInitialized, got {:?}", other)),
    }
}

async fn get_missing_record_not_found<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: BlueprintStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    match s.get_record_state(key(404)).await {
        Err(StorageError::RecordNotFound { record_id, .. }) if record_id.0 == 404 => {}
        other => return Err(format!("expected RecordNotFound, got {:?}", other)),
    }
    let mut snap = s.begin_snapshot().await.map_err(|e| format!("begin: {e}"))?;
    let result = s.get_record_state_for_update(&mut snap, key(404)).await;
    let _ = s.abort_snapshot(snap).await;
    match result {
        Err(StorageError::RecordNotFound { .. }) => Ok(()),
        other => Err(format!("expected RecordNotFound for update, got {:?}", other)),
    }
}

async fn list_filters_by_blueprint_and_state<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: BlueprintStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_record(&s, 1, 1).await?;
    seed_record(&s, 2, 1).await?;
    seed_record(&s, 3, 2).await?;

    let all = s
        .list_record_states(BlueprintId(1), None)
        .await
        .map_err(|e| format!("list: {e}"))?;
    if all.len() != 3 {
        return Err(format!("expected 3 records, got {}", all.len()));
    }
    let in_two = s
        .list_record_states(BlueprintId(1), Some(StateId(2)))
        .await
        .map_err(|e| format!("list filtered: {e}"))?;
    if in_two.len() != 1 || in_two[0].record_id.0 != 3 {
        return Err(format!("expected only record 3 in state 2, got {:?}", in_two));
    }
    let other = s
        .list_record_states(BlueprintId(2), None)
        .await
        .map_err(|e| format!("list other blueprint: {e}"))?;
    if !other.is_empty() {
        return Err(format!("expected no records for blueprint 2, got {}", other.len()));
    }
    Ok(())
}

async fn remove_record_state<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: BlueprintStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_record(&s, 1, 1).await?;
    let mut snap = s.begin_snapshot().await.map_err(|e| format!("begin: {e}"))?;
    s.remove_record_state(&mut snap, key(1))
        .await
        .map_err(|e| format!("remove: {e}"))?;
    s.commit_snapshot(snap)
        .await
        .map_err(|e| format!("commit: {e}"))?;
    match s.get_record_state(key(1)).await {
        Err(StorageError::RecordNotFound { .. }) => {}
        other => return Err(format!("expected RecordNotFound after remove, got {:?}", other)),
    }

    let mut snap = s.begin_snapshot().await.map_err(|e| format!("begin: {e}"))?;
    let again = s.remove_record_state(&mut snap, key(1)).await;
    let _ = s.abort_snapshot(snap).await;
    match again {
        Err(StorageError::RecordNotFound { .. }) => Ok(()),
        other => Err(format!("expected RecordNotFound on second remove, got {:?}", other)),
    }
}

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use blueprint_core::StateId;

use tokio::task::JoinHandle;

use super::{key, seed_record, TestResult, T0};
use crate::{BlueprintStorage, StorageError};

/// Number of concurrent tasks to spawn in each test.
const N: usize = 10;

pub(super) async fn run_concurrent_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: BlueprintStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "concurrent",
            "concurrent_updates_exactly_one_wins",
            concurrent_updates_exactly_one_wins(factory).await,
        ),
        TestResult::from_result(
            "concurrent",
            "concurrent_initialize_exactly_one_wins",
            concurrent_initialize_exactly_one_wins(factory).await,
        ),
        TestResult::from_result(
            "concurrent",
            "concurrent_updates_different_records_all_succeed",
            concurrent_updates_different_records_all_succeed(factory).await,
        ),
        TestResult::from_result(
            "concurrent",
            "record_lock_held_until_commit",
            record_lock_held_until_commit(factory).await,
        ),
    ]
}

/// Join racing tasks that each report whether they committed, and require
/// exactly one to have done so.
async fn expect_one_winner(
    handles: Vec<JoinHandle<Result<bool, StorageError>>>,
) -> Result<(), String> {
    let mut outcomes = Vec::with_capacity(handles.len());
    for handle in handles {
        let outcome = handle.await.map_err(|e| format!("task panic: {e}"))?;
        outcomes.push(outcome.map_err(|e| format!("storage error: {e}"))?);
    }
    match outcomes.iter().filter(|won| **won).count() {
        1 => Ok(()),
        n => Err(format!("{n} of {} racers committed, expected exactly one", outcomes.len())),
    }
}

// ── Concurrent update: exactly one wins ─────────────────────────────────────

/// N tasks each try to move the same record from version 0. Exactly one
/// commit succeeds; the rest see a conflict, either when updating or when
/// committing, depending on where the backend detects it.
async fn concurrent_updates_exactly_one_wins<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: BlueprintStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = Arc::new(factory().await);
    seed_record(storage.as_ref(), 1, 1).await?;

    let mut handles = Vec::new();
    for i in 0..N {
        let s = storage.clone();
        handles.push(tokio::spawn(async move {
            let mut snap = s.begin_snapshot().await?;
            let result = s
                .update_record_state(&mut snap, key(1), 0, StateId(2 + i as i64), T0)
                .await;
            match result {
                Ok(_) => match s.commit_snapshot(snap).await {
                    Ok(()) => Ok(true),
                    Err(StorageError::ConcurrentConflict { .. }) => Ok(false),
                    Err(e) => Err(e),
                },
                Err(e) if e.is_contention() => {
                    s.abort_snapshot(snap).await?;
                    Ok(false)
                }
                Err(e) => {
                    let _ = s.abort_snapshot(snap).await;
                    Err(e)
                }
            }
        }));
    }

    expect_one_winner(handles).await?;

    let row = storage
        .get_record_state(key(1))
        .await
        .map_err(|e| format!("get: {e}"))?;
    if row.version != 1 {
        return Err(format!("expected final version 1, got {}", row.version));
    }
    Ok(())
}

// ── Concurrent initialization: exactly one wins ─────────────────────────────

async fn concurrent_initialize_exactly_one_wins<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: BlueprintStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = Arc::new(factory().await);

    let mut handles = Vec::new();
    for _ in 0..N {
        let s = storage.clone();
        handles.push(tokio::spawn(async move {
            let mut snap = s.begin_snapshot().await?;
            match s
                .initialize_record_state(&mut snap, super::make_state_row(1, 1))
                .await
            {
                Ok(()) => {
                    s.commit_snapshot(snap).await?;
                    Ok(true)
                }
                Err(StorageError::AlreadyInitialized { .. }) => {
                    s.abort_snapshot(snap).await?;
                    Ok(false)
                }
                Err(e) => {
                    let _ = s.abort_snapshot(snap).await;
                    Err(e)
                }
            }
        }));
    }

    expect_one_winner(handles).await?;
    Ok(())
}

// ── Concurrent updates to different records: all succeed ────────────────────

async fn concurrent_updates_different_records_all_succeed<S, F, Fut>(
    factory: &F,
) -> Result<(), String>
where
    S: BlueprintStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = Arc::new(factory().await);
    for i in 0..N {
        seed_record(storage.as_ref(), i as i64, 1).await?;
    }

    let mut handles = Vec::new();
    for i in 0..N {
        let s = storage.clone();
        handles.push(tokio::spawn(async move {
            let mut snap = s.begin_snapshot().await?;
            s.update_record_state(&mut snap, key(i as i64), 0, StateId(2), T0)
                .await?;
            s.commit_snapshot(snap).await?;
            Ok::<(), StorageError>(())
        }));
    }
    for (i, handle) in handles.into_iter().enumerate() {
        handle
            .await
            .map_err(|e| format!("task {i} panic: {e}"))?
            .map_err(|e| format!("task {i} failed: {e}"))?;
    }

    for i in 0..N {
        let row = storage
            .get_record_state(key(i as i64))
            .await
            .map_err(|e| format!("get record {i}: {e}"))?;
        if row.current_state_id != StateId(2) || row.version != 1 {
            return Err(format!(
                "record {i}: expected state 2 at version 1, got {} at {}",
                row.current_state_id, row.version
            ));
        }
    }
    Ok(())
}

// ── Record lock: a second reader-for-update waits for the first commit ──────

/// A locked read blocks a second locked read of the same record until the
/// first snapshot commits; the second then sees the committed version.
async fn record_lock_held_until_commit<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: BlueprintStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = Arc::new(factory().await);
    seed_record(storage.as_ref(), 1, 1).await?;

    let mut holder = storage
        .begin_snapshot()
        .await
        .map_err(|e| format!("begin: {e}"))?;
    storage
        .get_record_state_for_update(&mut holder, key(1))
        .await
        .map_err(|e| format!("lock: {e}"))?;

    let s = storage.clone();
    let waiter = tokio::spawn(async move {
        let mut snap = s.begin_snapshot().await?;
        let row = s.get_record_state_for_update(&mut snap, key(1)).await?;
        s.abort_snapshot(snap).await?;
        Ok::<i64, StorageError>(row.version)
    });

    tokio::time::sleep(Duration::from_millis(20)).await;
    storage
        .update_record_state(&mut holder, key(1), 0, StateId(2), T0)
        .await
        .map_err(|e| format!("update: {e}"))?;
    storage
        .commit_snapshot(holder)
        .await
        .map_err(|e| format!("commit: {e}"))?;

    let seen = waiter
        .await
        .map_err(|e| format!("task panic: {e}"))?
        .map_err(|e| format!("waiter: {e}"))?;
    if seen != 1 {
        return Err(format!("waiter read version {seen} instead of the committed 1"));
    }
    Ok(())
}

//! Periodic escalation sweep over active SLA instances.
//!
//! Each record is handled in its own storage snapshot holding the record
//! lock, so a sweep never interleaves with a transition on the same record.
//! Distinct records run in parallel, bounded by `max_concurrency`.
//! Cancellation is observed between records, never inside one. Each
//! escalation dispatch is bounded by `action_timeout_ms` so a stalled
//! dispatcher cannot pin the record lock.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use blueprint_core::EscalationId;
use blueprint_storage::{BlueprintStorage, EscalationLogRecord, RecordKey, StorageError};
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::action::{ActionContext, ActionError, ActionExecutor, ActionResult};
use crate::config::SchedulerConfig;
use crate::error::EngineError;
use crate::registry::BlueprintRegistry;
use crate::sla::{as_percent, SlaTracker};

/// Counters from one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Active instances examined.
    pub checked: usize,
    pub escalations_fired: usize,
    /// Fired escalations whose action failed. Included in `escalations_fired`.
    pub escalations_failed: usize,
    pub breaches_marked: usize,
    /// Records skipped because a transition held or changed them.
    pub conflicts: usize,
    /// Instances skipped because of any other error.
    pub errors: usize,
    /// The sweep stopped early because shutdown was requested.
    pub cancelled: bool,
}

impl SweepReport {
    fn merge(&mut self, other: SweepReport) {
        self.checked += other.checked;
        self.escalations_fired += other.escalations_fired;
        self.escalations_failed += other.escalations_failed;
        self.breaches_marked += other.breaches_marked;
        self.conflicts += other.conflicts;
        self.errors += other.errors;
        self.cancelled |= other.cancelled;
    }
}

impl fmt::Display for SweepReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "checked {}, fired {} ({} failed), breaches {}, conflicts {}, errors {}",
            self.checked,
            self.escalations_fired,
            self.escalations_failed,
            self.breaches_marked,
            self.conflicts,
            self.errors
        )?;
        if self.cancelled {
            write!(f, ", cancelled")?;
        }
        Ok(())
    }
}

pub struct EscalationScheduler<S: BlueprintStorage> {
    worker: Arc<Worker<S>>,
    poll_interval: Duration,
    max_concurrency: usize,
}

impl<S: BlueprintStorage> EscalationScheduler<S> {
    pub fn new(
        storage: Arc<S>,
        registry: BlueprintRegistry,
        executor: Arc<ActionExecutor>,
        tracker: SlaTracker,
        config: &SchedulerConfig,
    ) -> Self {
        EscalationScheduler {
            worker: Arc::new(Worker {
                storage,
                registry,
                executor,
                tracker,
                action_timeout: config.action_timeout().max(Duration::from_millis(1)),
            }),
            poll_interval: Duration::from_secs(config.poll_interval_secs.max(1)),
            max_concurrency: config.max_concurrency.max(1),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// One pass over every active SLA instance.
    pub async fn sweep_once(&self, cancel: &CancellationToken) -> Result<SweepReport, EngineError> {
        let instances = self.worker.storage.list_active_sla_instances().await?;
        let mut by_record: BTreeMap<RecordKey, Vec<Uuid>> = BTreeMap::new();
        for instance in &instances {
            by_record.entry(instance.key()).or_default().push(instance.id);
        }

        let sem = Arc::new(Semaphore::new(self.max_concurrency));
        let mut join_set: JoinSet<SweepReport> = JoinSet::new();
        let mut report = SweepReport::default();

        for (key, ids) in by_record {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                permit = Arc::clone(&sem).acquire_owned() => permit.ok(),
            };
            let Some(permit) = permit else {
                report.cancelled = true;
                break;
            };
            let worker = Arc::clone(&self.worker);
            join_set.spawn(async move {
                let _permit = permit;
                worker.sweep_record(key, ids).await
            });
        }

        while let Some(res) = join_set.join_next().await {
            match res {
                Ok(partial) => report.merge(partial),
                Err(e) => {
                    error!(error = %e, "sweep worker panicked");
                    report.errors += 1;
                }
            }
        }

        if report.escalations_failed > 0 {
            warn!(%report, "sweep finished with failed escalations");
        } else {
            debug!(%report, "sweep finished");
        }
        Ok(report)
    }

    /// Sweep every poll interval until `cancel` fires. Missed ticks are
    /// skipped rather than replayed.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        info!(poll_interval_secs = self.poll_interval.as_secs(), "escalation scheduler started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }
            match self.sweep_once(&cancel).await {
                Ok(report) => {
                    info!(
                        checked = report.checked,
                        fired = report.escalations_fired,
                        failed = report.escalations_failed,
                        breaches = report.breaches_marked,
                        conflicts = report.conflicts,
                        "sweep complete"
                    );
                    if report.cancelled {
                        break;
                    }
                }
                Err(e) => error!(error = %e, "sweep failed"),
            }
        }
        info!("escalation scheduler stopped");
    }
}

// ──────────────────────────────────────────────
// Worker
// ──────────────────────────────────────────────

struct Worker<S: BlueprintStorage> {
    storage: Arc<S>,
    registry: BlueprintRegistry,
    executor: Arc<ActionExecutor>,
    tracker: SlaTracker,
    action_timeout: Duration,
}

impl<S: BlueprintStorage> Worker<S> {
    async fn sweep_record(&self, key: RecordKey, ids: Vec<Uuid>) -> SweepReport {
        let mut report = SweepReport::default();
        for id in ids {
            match self.sweep_instance_with_retry(id).await {
                Ok(partial) => report.merge(partial),
                Err(e) if is_contention(&e) => {
                    debug!(record = %key, sla_instance = %id, error = %e, "sla instance busy, skipped");
                    report.conflicts += 1;
                }
                Err(e) => {
                    warn!(record = %key, sla_instance = %id, error = %e, "sla instance sweep failed");
                    report.errors += 1;
                }
            }
        }
        report
    }

    async fn sweep_instance_with_retry(&self, id: Uuid) -> Result<SweepReport, EngineError> {
        match self.sweep_instance(id).await {
            Err(e) if is_contention(&e) => self.sweep_instance(id).await,
            other => other,
        }
    }

    async fn sweep_instance(&self, id: Uuid) -> Result<SweepReport, EngineError> {
        let mut snap = self.storage.begin_snapshot().await?;
        match self.escalate_locked(&mut snap, id).await {
            Ok(report) => {
                self.storage.commit_snapshot(snap).await?;
                Ok(report)
            }
            Err(e) => {
                if let Err(abort) = self.storage.abort_snapshot(snap).await {
                    warn!(error = %abort, "snapshot abort failed");
                }
                Err(e)
            }
        }
    }

    async fn escalate_locked(
        &self,
        snap: &mut S::Snapshot,
        id: Uuid,
    ) -> Result<SweepReport, EngineError> {
        let mut report = SweepReport::default();
        let instance = match self.storage.get_sla_instance_for_update(snap, id).await {
            Ok(instance) => instance,
            // Removed together with its record since the listing.
            Err(StorageError::SlaInstanceNotFound { .. }) => return Ok(report),
            Err(e) => return Err(e.into()),
        };
        if !instance.is_active() {
            return Ok(report);
        }
        let Some(def) = self.registry.get(instance.blueprint_id) else {
            debug!(blueprint_id = %instance.blueprint_id, "blueprint not active, sla instance skipped");
            return Ok(report);
        };
        let Some((state, sla)) = def.sla(instance.sla_id) else {
            return Ok(report);
        };
        report.checked = 1;

        let now = self.tracker.now();
        let progress = self.tracker.progress(&instance, sla, now)?;

        if progress >= Decimal::ONE && instance.breached_at.is_none() {
            self.storage.mark_sla_breached(snap, id, now).await?;
            report.breaches_marked += 1;
            info!(
                record = %instance.key(),
                sla = %sla.name,
                due_at = %instance.due_at,
                "sla breached"
            );
        }

        let logged: HashSet<EscalationId> = self
            .storage
            .list_escalation_logs(id)
            .await?
            .into_iter()
            .map(|log| log.escalation_id)
            .collect();

        for escalation in &sla.escalations {
            if logged.contains(&escalation.id) || progress < escalation.trigger.threshold() {
                continue;
            }
            let ctx = ActionContext::for_escalation(
                &def,
                instance.record_id,
                state.name.clone(),
                sla,
                instance.due_at,
                as_percent(progress),
                now,
            );
            let dispatch = self
                .executor
                .execute(escalation.action, &escalation.config, &ctx);
            let result = match tokio::time::timeout(self.action_timeout, dispatch).await {
                Ok(result) => result,
                Err(_) => ActionResult::failed(
                    escalation.action,
                    ActionError::Timeout {
                        kind: escalation.action,
                        after: self.action_timeout,
                    },
                ),
            };
            let log = EscalationLogRecord {
                id: Uuid::new_v4(),
                sla_instance_id: id,
                escalation_id: escalation.id,
                action_type: escalation.action,
                status: result.status,
                result: result.result.clone(),
                error: result.error_message(),
                fired_at: now,
            };
            self.storage.insert_escalation_log(snap, log).await?;
            report.escalations_fired += 1;
            match &result.error {
                Some(error) => {
                    report.escalations_failed += 1;
                    warn!(
                        record = %instance.key(),
                        escalation_id = %escalation.id,
                        kind = %escalation.action,
                        %error,
                        "escalation action failed"
                    );
                }
                None => info!(
                    record = %instance.key(),
                    escalation_id = %escalation.id,
                    kind = %escalation.action,
                    percent_elapsed = %as_percent(progress),
                    "escalation fired"
                ),
            }
        }
        Ok(report)
    }
}

fn is_contention(e: &EngineError) -> bool {
    matches!(e, EngineError::Storage(s) if s.is_contention())
}

//! Escalation sweeps over records imported from a JSON file.
//!
//! Records live in an in-memory store for the duration of the command, so
//! these commands are for rehearsing a blueprint's escalation rules against
//! a snapshot of real records, not for running production state.

use std::path::Path;
use std::process;
use std::sync::Arc;

use blueprint_core::{RecordId, StateId};
use blueprint_engine::{
    ActionExecutor, Clock, EngineConfig, LoggingDispatcher, ManualClock, SweepReport,
    SystemClock, TransitionEngine,
};
use blueprint_storage::{BlueprintStorage, EscalationLogRecord, MemoryStorage, RecordKey};
use serde::Deserialize;
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::commands::{load_config, load_definition, parse_instant, print_json, read_json};
use crate::{report_error, OutputFormat};

#[derive(Debug, Deserialize)]
struct ImportedRecord {
    record_id: RecordId,
    state_id: StateId,
    #[serde(with = "time::serde::rfc3339")]
    entered_at: OffsetDateTime,
}

pub(crate) async fn cmd_sweep(
    definition_path: &Path,
    records_path: &Path,
    at: Option<&str>,
    config_path: Option<&Path>,
    output: OutputFormat,
    quiet: bool,
) {
    let at = match at {
        Some(raw) => parse_instant(raw, "--at", output, quiet),
        None => OffsetDateTime::now_utc(),
    };
    let config = load_config(config_path, output, quiet);
    let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(at));
    let (engine, keys) = seed(
        definition_path,
        records_path,
        &config,
        clock,
        output,
        quiet,
    )
    .await;

    let scheduler = engine.scheduler(&config.scheduler);
    let report = match scheduler.sweep_once(&CancellationToken::new()).await {
        Ok(report) => report,
        Err(e) => {
            report_error(&format!("error: sweep failed: {}", e), output, quiet);
            process::exit(1);
        }
    };

    let fired = match fired_escalations(engine.storage().as_ref(), &keys).await {
        Ok(fired) => fired,
        Err(e) => {
            report_error(&format!("error: {}", e), output, quiet);
            process::exit(1);
        }
    };

    print_report(&report, &fired, output, quiet);
}

pub(crate) async fn cmd_watch(
    definition_path: &Path,
    records_path: &Path,
    config_path: Option<&Path>,
    output: OutputFormat,
    quiet: bool,
) {
    let config = load_config(config_path, output, quiet);
    let (engine, keys) = seed(
        definition_path,
        records_path,
        &config,
        Arc::new(SystemClock),
        output,
        quiet,
    )
    .await;
    info!(records = keys.len(), "records imported");

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => trigger.cancel(),
            Err(e) => warn!(error = %e, "cannot listen for ctrl-c"),
        }
    });

    engine.scheduler(&config.scheduler).run(cancel).await;

    match fired_escalations(engine.storage().as_ref(), &keys).await {
        Ok(fired) => {
            let report = SweepReport {
                escalations_fired: fired.len(),
                escalations_failed: fired.iter().filter(|(_, log)| log.error.is_some()).count(),
                ..SweepReport::default()
            };
            print_report(&report, &fired, output, quiet);
        }
        Err(e) => {
            report_error(&format!("error: {}", e), output, quiet);
            process::exit(1);
        }
    }
}

/// Build an engine over a fresh in-memory store holding the imported records.
async fn seed(
    definition_path: &Path,
    records_path: &Path,
    config: &EngineConfig,
    clock: Arc<dyn Clock>,
    output: OutputFormat,
    quiet: bool,
) -> (TransitionEngine<MemoryStorage>, Vec<RecordKey>) {
    let def = load_definition(definition_path, output, quiet);
    let records: Vec<ImportedRecord> =
        match serde_json::from_value(read_json(records_path, "records", output, quiet)) {
            Ok(records) => records,
            Err(e) => {
                let msg = format!("error: invalid records in {}: {}", records_path.display(), e);
                report_error(&msg, output, quiet);
                process::exit(1);
            }
        };
    let calendar = match config.calendar() {
        Ok(calendar) => calendar,
        Err(e) => {
            report_error(&format!("error: {}", e), output, quiet);
            process::exit(1);
        }
    };

    let storage = Arc::new(MemoryStorage::with_lock_timeout(config.lock_timeout()));
    let executor = Arc::new(ActionExecutor::new(Arc::new(LoggingDispatcher)));
    let engine = TransitionEngine::new(storage, executor, calendar, clock);
    let blueprint_id = def.id;
    if let Err(e) = engine.activate(def) {
        report_error(&format!("error: {}", e), output, quiet);
        process::exit(1);
    }

    let mut keys = Vec::with_capacity(records.len());
    for record in records {
        if let Err(e) = engine
            .restore_record(blueprint_id, record.record_id, record.state_id, record.entered_at)
            .await
        {
            let msg = format!("error: record {}: {}", record.record_id, e);
            report_error(&msg, output, quiet);
            process::exit(1);
        }
        keys.push(RecordKey::new(blueprint_id, record.record_id));
    }
    (engine, keys)
}

async fn fired_escalations<S: BlueprintStorage>(
    storage: &S,
    keys: &[RecordKey],
) -> Result<Vec<(RecordKey, EscalationLogRecord)>, blueprint_storage::StorageError> {
    let mut fired = Vec::new();
    for key in keys {
        for instance in storage.list_sla_instances(*key).await? {
            for log in storage.list_escalation_logs(instance.id).await? {
                fired.push((*key, log));
            }
        }
    }
    Ok(fired)
}

fn print_report(
    report: &SweepReport,
    fired: &[(RecordKey, EscalationLogRecord)],
    output: OutputFormat,
    quiet: bool,
) {
    match output {
        OutputFormat::Json => {
            let escalations: Vec<serde_json::Value> = fired
                .iter()
                .map(|(key, log)| {
                    serde_json::json!({
                        "record_id": key.record_id,
                        "escalation_id": log.escalation_id,
                        "action_type": log.action_type,
                        "status": log.status,
                        "error": log.error,
                    })
                })
                .collect();
            print_json(&serde_json::json!({
                "report": report,
                "escalations": escalations,
            }));
        }
        OutputFormat::Text => {
            if !quiet {
                println!("{}", report);
            }
            for (key, log) in fired {
                match &log.error {
                    Some(error) => println!(
                        "record {}: escalation {} ({}) failed: {}",
                        key.record_id, log.escalation_id, log.action_type, error
                    ),
                    None => println!(
                        "record {}: escalation {} ({}) fired",
                        key.record_id, log.escalation_id, log.action_type
                    ),
                }
            }
        }
    }
}

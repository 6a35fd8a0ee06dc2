use std::path::Path;
use std::process;
use std::sync::Arc;

use blueprint_core::{RecordId, SlaDefinition, StateId};
use blueprint_engine::{ManualClock, SlaStatusView, SlaTracker};
use blueprint_storage::RecordKey;
use time::OffsetDateTime;

use crate::commands::{format_instant, load_config, load_definition, parse_instant, print_json};
use crate::{report_error, OutputFormat};

pub(crate) struct DeadlineOptions<'a> {
    pub definition: &'a Path,
    pub state: i64,
    pub entered_at: &'a str,
    pub at: Option<&'a str>,
    pub config: Option<&'a Path>,
}

pub(crate) fn cmd_deadline(opts: DeadlineOptions<'_>, output: OutputFormat, quiet: bool) {
    let def = load_definition(opts.definition, output, quiet);
    let config = load_config(opts.config, output, quiet);
    let entered_at = parse_instant(opts.entered_at, "--entered-at", output, quiet);
    let at = opts.at.map(|raw| parse_instant(raw, "--at", output, quiet));

    let state = StateId(opts.state);
    let Some(state_def) = def.state(state) else {
        let msg = format!("error: blueprint {} has no state {}", def.id, state);
        report_error(&msg, output, quiet);
        process::exit(1);
    };
    let sla = match def.active_sla(state) {
        Some(sla) if !state_def.is_terminal => sla,
        _ => {
            match output {
                OutputFormat::Json => print_json(&serde_json::json!({ "sla": null })),
                OutputFormat::Text => {
                    if !quiet {
                        println!("state {} has no active SLA", state_def.name);
                    }
                }
            }
            return;
        }
    };

    let calendar = match config.calendar() {
        Ok(calendar) => calendar,
        Err(e) => {
            report_error(&format!("error: {}", e), output, quiet);
            process::exit(1);
        }
    };
    let tracker = SlaTracker::new(
        calendar,
        Arc::new(ManualClock::new(at.unwrap_or(entered_at))),
    );

    let key = RecordKey::new(def.id, RecordId(0));
    let view = tracker.open(key, state, sla, entered_at).and_then(|instance| match at {
        Some(at) => tracker
            .status_view(&instance, sla, entered_at, at)
            .map(|view| (instance.due_at, Some(view))),
        None => Ok((instance.due_at, None)),
    });
    let (deadline, view) = match view {
        Ok(v) => v,
        Err(e) => {
            report_error(&format!("error: {}", e), output, quiet);
            process::exit(1);
        }
    };

    match output {
        OutputFormat::Json => print_json(&deadline_json(sla, deadline, at, view.as_ref())),
        OutputFormat::Text => {
            println!("sla: {} ({}h, {})", sla.name, sla.duration_hours, counting(sla));
            println!("deadline: {}", format_instant(deadline));
            if let Some(view) = &view {
                println!("elapsed: {}%", view.percent_elapsed);
                println!("remaining: {}s", view.remaining.whole_seconds());
                println!("status: {}", progress_label(view));
            }
        }
    }
}

fn counting(sla: &SlaDefinition) -> &'static str {
    match (sla.business_hours_only, sla.exclude_weekends) {
        (false, false) => "wall clock",
        (false, true) => "weekdays",
        (true, false) => "business hours",
        (true, true) => "business hours, weekdays",
    }
}

fn progress_label(view: &SlaStatusView) -> &'static str {
    if view.is_breached {
        "breached"
    } else if view.is_approaching {
        "approaching"
    } else {
        "on track"
    }
}

fn deadline_json(
    sla: &SlaDefinition,
    deadline: OffsetDateTime,
    at: Option<OffsetDateTime>,
    view: Option<&SlaStatusView>,
) -> serde_json::Value {
    let mut out = serde_json::json!({
        "sla": {
            "id": sla.id,
            "name": sla.name,
            "duration_hours": sla.duration_hours,
            "business_hours_only": sla.business_hours_only,
            "exclude_weekends": sla.exclude_weekends,
        },
        "deadline": format_instant(deadline),
    });
    if let (Some(at), Some(view)) = (at, view) {
        out["at"] = serde_json::json!(format_instant(at));
        out["percent_elapsed"] = serde_json::json!(view.percent_elapsed.to_string());
        out["remaining_secs"] = serde_json::json!(view.remaining.whole_seconds());
        out["status"] = serde_json::json!(progress_label(view));
    }
    out
}

use std::path::Path;
use std::process;

use blueprint_core::{snapshot_from_json, FieldSnapshot, StateId};
use blueprint_engine::{condition, TransitionSummary};

use crate::commands::{load_definition, print_json, read_json};
use crate::{report_error, OutputFormat};

/// Offline eligibility: no record state is stored, the caller names it.
pub(crate) fn cmd_eligible(
    definition_path: &Path,
    state: i64,
    fields_path: Option<&Path>,
    output: OutputFormat,
    quiet: bool,
) {
    let def = load_definition(definition_path, output, quiet);
    let state = StateId(state);
    if def.state(state).is_none() {
        let msg = format!("error: blueprint {} has no state {}", def.id, state);
        report_error(&msg, output, quiet);
        process::exit(1);
    }

    let fields = match fields_path {
        Some(path) => match snapshot_from_json(&read_json(path, "fields", output, quiet)) {
            Ok(fields) => fields,
            Err(e) => {
                report_error(&format!("error: {}: {}", path.display(), e), output, quiet);
                process::exit(1);
            }
        },
        None => FieldSnapshot::new(),
    };

    let eligible: Vec<TransitionSummary> = def
        .outgoing(state)
        .into_iter()
        .filter(|t| condition::evaluate(&t.conditions, &fields))
        .map(|t| TransitionSummary::new(&def, t))
        .collect();

    match output {
        OutputFormat::Json => print_json(&serde_json::json!(eligible)),
        OutputFormat::Text => {
            if eligible.is_empty() {
                if !quiet {
                    println!("no eligible transitions from {}", def.state_name(state));
                }
                return;
            }
            for t in &eligible {
                let label = t.button_label.as_deref().unwrap_or(&t.name);
                println!("{}\t{}\t-> {}", t.id, label, t.to_state_name);
            }
        }
    }
}

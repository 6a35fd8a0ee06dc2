use std::path::Path;
use std::process;

use crate::commands::{print_json, try_load_definition};
use crate::OutputFormat;

pub(crate) fn cmd_validate(definition_path: &Path, output: OutputFormat, quiet: bool) {
    match try_load_definition(definition_path, output, quiet) {
        Ok(def) => {
            if quiet {
                return;
            }
            match output {
                OutputFormat::Text => println!(
                    "valid: {} ({} states, {} transitions)",
                    def.name,
                    def.states.len(),
                    def.transitions.len()
                ),
                OutputFormat::Json => print_json(&serde_json::json!({
                    "valid": true,
                    "blueprint_id": def.id,
                    "name": def.name,
                    "states": def.states.len(),
                    "transitions": def.transitions.len(),
                })),
            }
        }
        Err(errors) => {
            let errors: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
            match output {
                OutputFormat::Text => {
                    if !quiet {
                        eprintln!("invalid definition");
                        for err in &errors {
                            eprintln!("  - {}", err);
                        }
                    }
                }
                OutputFormat::Json => print_json(&serde_json::json!({
                    "valid": false,
                    "errors": errors,
                })),
            }
            process::exit(1);
        }
    }
}

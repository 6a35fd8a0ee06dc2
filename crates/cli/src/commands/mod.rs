pub(crate) mod config;
pub(crate) mod deadline;
pub(crate) mod eligible;
pub(crate) mod sweep;
pub(crate) mod validate;

use std::path::Path;
use std::process;

use blueprint_core::{BlueprintDefinition, DefinitionError};
use blueprint_engine::EngineConfig;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::{report_error, OutputFormat};

/// Read and parse a JSON file, exiting on failure.
pub(crate) fn read_json(path: &Path, what: &str, output: OutputFormat, quiet: bool) -> serde_json::Value {
    let src = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) => {
            let msg = format!("error reading {} '{}': {}", what, path.display(), e);
            report_error(&msg, output, quiet);
            process::exit(1);
        }
    };
    match serde_json::from_str(&src) {
        Ok(v) => v,
        Err(e) => {
            let msg = format!("error: invalid JSON in {}: {}", path.display(), e);
            report_error(&msg, output, quiet);
            process::exit(1);
        }
    }
}

/// Parse and validate a definition document.
pub(crate) fn try_load_definition(
    path: &Path,
    output: OutputFormat,
    quiet: bool,
) -> Result<BlueprintDefinition, Vec<DefinitionError>> {
    let doc = read_json(path, "definition", output, quiet);
    blueprint_core::load_definition(&doc).map_err(DefinitionError::into_list)
}

/// Like [`try_load_definition`], exiting with the error list on failure.
pub(crate) fn load_definition(path: &Path, output: OutputFormat, quiet: bool) -> BlueprintDefinition {
    match try_load_definition(path, output, quiet) {
        Ok(def) => def,
        Err(errors) => {
            let listed: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
            let msg = format!("error: invalid definition {}: {}", path.display(), listed.join("; "));
            report_error(&msg, output, quiet);
            process::exit(1);
        }
    }
}

pub(crate) fn load_config(path: Option<&Path>, output: OutputFormat, quiet: bool) -> EngineConfig {
    let Some(path) = path else {
        return EngineConfig::default();
    };
    match EngineConfig::load(path) {
        Ok(config) => config,
        Err(e) => {
            report_error(&format!("error: {}", e), output, quiet);
            process::exit(1);
        }
    }
}

pub(crate) fn parse_instant(raw: &str, flag: &str, output: OutputFormat, quiet: bool) -> OffsetDateTime {
    match OffsetDateTime::parse(raw, &Rfc3339) {
        Ok(at) => at,
        Err(e) => {
            let msg = format!("error: {} '{}' is not an RFC 3339 timestamp: {}", flag, raw, e);
            report_error(&msg, output, quiet);
            process::exit(1);
        }
    }
}

pub(crate) fn format_instant(at: OffsetDateTime) -> String {
    at.format(&Rfc3339).unwrap_or_else(|_| at.to_string())
}

pub(crate) fn print_json(value: &serde_json::Value) {
    println!(
        "{}",
        serde_json::to_string_pretty(value).unwrap_or_else(|e| format!("serialization error: {}", e))
    );
}

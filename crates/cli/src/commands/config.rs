use std::path::Path;
use std::process;

use crate::commands::{load_config, print_json};
use crate::{report_error, OutputFormat};

/// Print the configuration the engine would run with, defaults filled in.
pub(crate) fn cmd_config(path: Option<&Path>, output: OutputFormat, quiet: bool) {
    let config = load_config(path, output, quiet);
    match output {
        OutputFormat::Json => match serde_json::to_value(&config) {
            Ok(v) => print_json(&v),
            Err(e) => {
                report_error(&format!("error: {}", e), output, quiet);
                process::exit(1);
            }
        },
        OutputFormat::Text => match toml::to_string_pretty(&config) {
            Ok(s) => print!("{}", s),
            Err(e) => {
                report_error(&format!("error: {}", e), output, quiet);
                process::exit(1);
            }
        },
    }
}

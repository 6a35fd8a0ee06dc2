mod commands;

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Output format for CLI responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum OutputFormat {
    Text,
    Json,
}

/// Blueprint workflow engine tooling.
#[derive(Parser)]
#[command(name = "blueprint", version, about = "Blueprint workflow engine tooling")]
struct Cli {
    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text", value_enum)]
    output: OutputFormat,

    /// Suppress non-essential output
    #[arg(long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check a blueprint definition document and report every problem found
    Validate {
        /// Path to the blueprint definition JSON
        definition: PathBuf,
    },

    /// List the transitions a record could take from a state
    Eligible {
        /// Path to the blueprint definition JSON
        definition: PathBuf,
        /// Current state ID of the record
        #[arg(long)]
        state: i64,
        /// Path to a JSON object of record field values
        #[arg(long)]
        fields: Option<PathBuf>,
    },

    /// Compute the SLA deadline for a record entering a state
    Deadline {
        /// Path to the blueprint definition JSON
        definition: PathBuf,
        /// State the record entered
        #[arg(long)]
        state: i64,
        /// When the record entered the state (RFC 3339)
        #[arg(long)]
        entered_at: String,
        /// Also report progress as of this instant (RFC 3339)
        #[arg(long)]
        at: Option<String>,
        /// Engine configuration TOML (business hours)
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Print the effective engine configuration
    Config {
        /// Engine configuration TOML; defaults apply when omitted
        path: Option<PathBuf>,
    },

    /// Run one escalation sweep over a set of records
    Sweep {
        /// Path to the blueprint definition JSON
        definition: PathBuf,
        /// Path to a JSON array of {record_id, state_id, entered_at}
        #[arg(long)]
        records: PathBuf,
        /// Instant to sweep at (RFC 3339); defaults to now
        #[arg(long)]
        at: Option<String>,
        /// Engine configuration TOML
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Run the escalation scheduler over a set of records until interrupted
    Watch {
        /// Path to the blueprint definition JSON
        definition: PathBuf,
        /// Path to a JSON array of {record_id, state_id, entered_at}
        #[arg(long)]
        records: PathBuf,
        /// Engine configuration TOML
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.quiet);

    match cli.command {
        Commands::Validate { definition } => {
            commands::validate::cmd_validate(&definition, cli.output, cli.quiet);
        }
        Commands::Eligible {
            definition,
            state,
            fields,
        } => {
            commands::eligible::cmd_eligible(
                &definition,
                state,
                fields.as_deref(),
                cli.output,
                cli.quiet,
            );
        }
        Commands::Deadline {
            definition,
            state,
            entered_at,
            at,
            config,
        } => {
            commands::deadline::cmd_deadline(
                commands::deadline::DeadlineOptions {
                    definition: &definition,
                    state,
                    entered_at: &entered_at,
                    at: at.as_deref(),
                    config: config.as_deref(),
                },
                cli.output,
                cli.quiet,
            );
        }
        Commands::Config { path } => {
            commands::config::cmd_config(path.as_deref(), cli.output, cli.quiet);
        }
        Commands::Sweep {
            definition,
            records,
            at,
            config,
        } => {
            let rt = runtime(cli.output, cli.quiet);
            rt.block_on(commands::sweep::cmd_sweep(
                &definition,
                &records,
                at.as_deref(),
                config.as_deref(),
                cli.output,
                cli.quiet,
            ));
        }
        Commands::Watch {
            definition,
            records,
            config,
        } => {
            let rt = runtime(cli.output, cli.quiet);
            rt.block_on(commands::sweep::cmd_watch(
                &definition,
                &records,
                config.as_deref(),
                cli.output,
                cli.quiet,
            ));
        }
    }
}

/// Diagnostics go to stderr so stdout stays machine-readable.
fn init_tracing(quiet: bool) {
    let default = if quiet { "error" } else { "warn" };
    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .init();
}

fn runtime(output: OutputFormat, quiet: bool) -> tokio::runtime::Runtime {
    match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            report_error(&format!("error: failed to start runtime: {}", e), output, quiet);
            process::exit(1);
        }
    }
}

pub(crate) fn report_error(msg: &str, output: OutputFormat, quiet: bool) {
    if quiet {
        return;
    }
    match output {
        OutputFormat::Text => eprintln!("{}", msg),
        OutputFormat::Json => {
            eprintln!("{}", serde_json::json!({ "error": msg }));
        }
    }
}

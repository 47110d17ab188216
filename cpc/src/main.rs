// Standard library
use std::process::ExitCode;

// External crates
use clap::Parser;
use tracing::{debug, info_span, Instrument};

// Internal imports
use cpc_core::{cpc_error, cpc_error_hint, CorrelationId, CpcError, ShutdownSignal};
use cpc_logging::LogSettings;

// Local modules
mod cli;
mod commands;

use cli::Args;
use commands::execute_command;

/// Exit code for failures that did not come from a typed cpc error.
const EXIT_UNEXPECTED: u8 = 1;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Held until exit so the file writer flushes.
    let _log_guard = cpc_logging::init_with(LogSettings::from_env().with_debug(args.debug));

    let shutdown = ShutdownSignal::new();
    let _ctrl_c = shutdown.listen_for_ctrl_c();

    let request_id = CorrelationId::new();
    let span = info_span!("request", request_id = %request_id, command = ?args.command);
    debug!("Starting cpc command");

    match execute_command(args, shutdown).instrument(span).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => report(&err),
    }
}

/// Print `err` and map it onto the process exit code of its category.
fn report(err: &anyhow::Error) -> ExitCode {
    match err.downcast_ref::<CpcError>() {
        Some(cpc_err) => {
            cpc_error!("{cpc_err}");
            if let CpcError::RetriesExhausted { history, .. } = cpc_err {
                for attempt in history {
                    eprintln!("   └─ attempt {}: {}", attempt.attempt, attempt.message);
                }
            }
            if let Some(hint) = cpc_err.hint() {
                cpc_error_hint!("{hint}");
            }
            u8::try_from(cpc_err.exit_code())
                .map(ExitCode::from)
                .unwrap_or(ExitCode::FAILURE)
        }
        None => {
            cpc_error!("{err:#}");
            ExitCode::from(EXIT_UNEXPECTED)
        }
    }
}

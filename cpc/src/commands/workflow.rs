//! Workflow commands: bootstrap, resume, rollback, status and list.

use anyhow::Result;
use cpc_checkpoint::{StepState, WorkflowRecord};
use cpc_core::{
    cpc_error_hint, cpc_info, cpc_println, cpc_progress, cpc_success, cpc_warning, CpcError,
};
use cpc_orchestrator::{WorkflowReport, WorkflowRequest};
use cpc_registry::Role;

use super::App;
use crate::cli::WorkflowSubcommand;

pub async fn handle_bootstrap(
    app: &App,
    workspace: Option<&str>,
    control_planes: u32,
    workers: u32,
    force: bool,
) -> Result<()> {
    let name = app.workspace(workspace)?;
    if control_planes == 0 {
        anyhow::bail!(CpcError::input("A cluster needs at least one control-plane node"));
    }
    for (role, count) in [(Role::ControlPlane, control_planes), (Role::Worker, workers)] {
        let issued = app.manager.ensure_nodes(&name, role, count)?;
        if !issued.is_empty() {
            cpc_info!("Issued {} {role} ordinal(s): {issued:?}", issued.len());
        }
    }
    run_workflow(app, WorkflowRequest::bootstrap(&name).force(force)).await
}

/// Run `request` and report where it ended.
pub async fn run_workflow(app: &App, request: WorkflowRequest) -> Result<()> {
    cpc_progress!("Running {} on '{}'", request.kind, request.workspace);
    let report = app.orchestrator.run(request).await?;
    finish(app, report)
}

pub async fn handle_workflow_command(app: &App, command: WorkflowSubcommand) -> Result<()> {
    match command {
        WorkflowSubcommand::Resume { id } => {
            cpc_progress!("Resuming workflow {id}");
            let report = app.orchestrator.resume(&id).await?;
            finish(app, report)
        }
        WorkflowSubcommand::Rollback { id } => {
            let report = app.orchestrator.rollback(&id).await?;
            if app.json {
                app.print_json(&report)?;
            } else {
                for step in &report.rolled_back {
                    cpc_success!("Rolled back {step}");
                }
                for step in &report.skipped {
                    cpc_info!("Left {step} in place (no compensation)");
                }
                for (step, error) in &report.failed {
                    cpc_warning!("Could not roll back {step}: {}", error.message);
                }
            }
            if report.failed.is_empty() {
                Ok(())
            } else {
                Err(CpcError::execution(format!(
                    "Rollback of {id} failed for {} step(s)",
                    report.failed.len()
                ))
                .into())
            }
        }
        WorkflowSubcommand::Status { id } => {
            let record = app.orchestrator.status(&id)?;
            if app.json {
                return app.print_json(&record);
            }
            print_record(&record);
            Ok(())
        }
        WorkflowSubcommand::List { workspace } => {
            let records = app.orchestrator.list(workspace.as_deref())?;
            if app.json {
                return app.print_json(&records);
            }
            if records.is_empty() {
                cpc_info!("No workflows recorded");
                return Ok(());
            }
            cpc_println!("{:<52} {:<14} {:<12} {}", "ID", "WORKSPACE", "STATUS", "UPDATED");
            for record in &records {
                cpc_println!(
                    "{:<52} {:<14} {:<12} {}",
                    record.id,
                    record.workspace,
                    record.status().to_string(),
                    record.updated_at.format("%Y-%m-%d %H:%M:%S")
                );
            }
            Ok(())
        }
    }
}

fn finish(app: &App, mut report: WorkflowReport) -> Result<()> {
    if app.json {
        app.print_json(&report)?;
    } else {
        print_record(&report.record);
        for warning in &report.warnings {
            cpc_warning!("{warning}");
        }
    }

    match report.failure.take() {
        None => {
            cpc_success!("Workflow {} succeeded", report.record.id);
            Ok(())
        }
        Some(err) => {
            let id = &report.record.id;
            cpc_error_hint!("Fix the cause, then run `cpc workflow resume {id}` or `cpc workflow rollback {id}`");
            Err(err.into())
        }
    }
}

fn print_record(record: &WorkflowRecord) {
    cpc_println!(
        "Workflow {} ({} on '{}'): {}",
        record.id,
        record.operation,
        record.workspace,
        record.status()
    );
    for step in &record.steps {
        let marker = match step.state {
            StepState::Succeeded => "✓",
            StepState::Failed => "✗",
            StepState::Running => "▶",
            StepState::RolledBack => "↺",
            StepState::Pending => "·",
        };
        cpc_println!(
            "  {marker} {:<20} {:<11} attempts={} {}",
            step.name,
            step.state.as_str(),
            step.attempt_count,
            step.invocation
        );
        if let Some(error) = &step.last_error {
            cpc_println!("      └─ {}", error.message);
        }
    }
}

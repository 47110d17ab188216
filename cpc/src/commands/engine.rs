//! Single engine calls outside a workflow. Each call is still recorded in
//! the ledger as a one-step workflow.

use anyhow::Result;
use cpc_checkpoint::Invocation;
use cpc_core::{cpc_println, OperationKind};
use cpc_gateway::EngineOutput;

use super::App;

pub async fn handle_tofu(app: &App, action: &str, workspace: Option<&str>) -> Result<()> {
    let name = app.workspace(workspace)?;
    run(app, &name, Invocation::new(OperationKind::Provision, action)).await
}

pub async fn handle_playbook(
    app: &App,
    playbook: &str,
    workspace: Option<&str>,
    limit: Option<String>,
    extra_vars: Vec<(String, String)>,
) -> Result<()> {
    let name = app.workspace(workspace)?;
    let mut invocation = Invocation::new(OperationKind::Configure, playbook);
    if let Some(limit) = limit {
        invocation = invocation.target(limit);
    }
    for (key, value) in extra_vars {
        invocation = invocation.param(key, value);
    }
    run(app, &name, invocation).await
}

pub async fn handle_exec(
    app: &App,
    node: &str,
    command: &[String],
    workspace: Option<&str>,
) -> Result<()> {
    let name = app.workspace(workspace)?;
    let invocation = Invocation::new(OperationKind::RemoteExec, command.join(" ")).target(node);
    run(app, &name, invocation).await
}

async fn run(app: &App, workspace: &str, invocation: Invocation) -> Result<()> {
    app.gateway.registry().resolve(workspace)?;
    let output = app.gateway.run(workspace, invocation).await?;
    print_output(&output);
    Ok(())
}

fn print_output(output: &EngineOutput) {
    if !output.stdout.is_empty() {
        cpc_println!("{}", output.stdout.trim_end());
    }
    if !output.stderr.is_empty() {
        eprintln!("{}", output.stderr.trim_end());
    }
}

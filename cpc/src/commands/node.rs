//! Node commands. Adding, removing and upgrading run workflows.

use anyhow::Result;
use cpc_core::{cpc_info, cpc_println};
use cpc_orchestrator::WorkflowRequest;
use cpc_registry::{NodeAddress, Role};

use super::{workflow, App};
use crate::cli::NodeSubcommand;

/// Extra var carrying the Kubernetes version for upgrades.
const VERSION_PARAM: &str = "target_k8s_version";

pub async fn handle_node_command(app: &App, command: NodeSubcommand) -> Result<()> {
    match command {
        NodeSubcommand::Add { role, workspace } => {
            let role: Role = role.parse()?;
            let name = app.workspace(workspace.as_deref())?;
            workflow::run_workflow(app, WorkflowRequest::add_node(&name, role)).await
        }
        NodeSubcommand::Remove { node, workspace } => {
            let name = app.workspace(workspace.as_deref())?;
            workflow::run_workflow(app, WorkflowRequest::remove_node(&name, &node)).await
        }
        NodeSubcommand::Upgrade {
            node,
            workspace,
            version,
        } => {
            let name = app.workspace(workspace.as_deref())?;
            let mut request = WorkflowRequest::upgrade_node(&name, &node);
            if let Some(version) = version {
                request = request.param(VERSION_PARAM, version);
            }
            workflow::run_workflow(app, request).await
        }
        NodeSubcommand::List { workspace } => {
            let name = app.workspace(workspace.as_deref())?;
            let nodes = app.manager.nodes(&name)?;
            if app.json {
                return app.print_json(&nodes);
            }
            if nodes.is_empty() {
                cpc_info!("Workspace '{name}' has no active nodes");
            } else {
                print_nodes(&nodes);
            }
            Ok(())
        }
    }
}

pub fn print_nodes(nodes: &[NodeAddress]) {
    cpc_println!("  {:<12} {:<15} {:<8} {}", "HOSTNAME", "ROLE", "ORDINAL", "IP");
    for node in nodes {
        cpc_println!(
            "  {:<12} {:<15} {:<8} {}",
            node.hostname,
            node.role.as_str(),
            node.ordinal,
            node.ip
        );
    }
}

// Command handlers for cpc

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use cpc_config::GlobalConfig;
use cpc_core::ShutdownSignal;
use cpc_gateway::OperationGateway;
use cpc_orchestrator::{WorkflowOrchestrator, WorkspaceManager};
use serde::Serialize;
use tracing::debug;

use crate::cli::{Args, Command};

pub mod config;
pub mod engine;
pub mod node;
pub mod workflow;
pub mod workspace;

/// Everything a command handler needs, built once per invocation.
pub struct App {
    pub config: GlobalConfig,
    pub config_path: Option<PathBuf>,
    pub state_dir: PathBuf,
    pub gateway: Arc<OperationGateway>,
    pub manager: WorkspaceManager,
    pub orchestrator: WorkflowOrchestrator,
    pub json: bool,
}

impl App {
    pub fn load(args: &Args, shutdown: ShutdownSignal) -> Result<Self> {
        let config = cpc_config::loader::load(args.config.as_deref())?;
        let state_dir = config.state_dir()?;
        debug!("Using state directory {}", state_dir.display());

        let gateway = Arc::new(OperationGateway::from_config(
            &config,
            state_dir.clone(),
            shutdown,
        ));
        Ok(Self {
            manager: WorkspaceManager::new(Arc::clone(&gateway)),
            orchestrator: WorkflowOrchestrator::new(Arc::clone(&gateway)),
            gateway,
            config,
            config_path: args.config.clone(),
            state_dir,
            json: args.json,
        })
    }

    /// `explicit`, else the active workspace.
    pub fn workspace(&self, explicit: Option<&str>) -> Result<String> {
        Ok(self.manager.target(explicit)?)
    }

    pub fn print_json<T: Serialize>(&self, value: &T) -> Result<()> {
        cpc_core::cpc_println!("{}", serde_json::to_string_pretty(value)?);
        Ok(())
    }
}

/// Main command dispatcher
pub async fn execute_command(args: Args, shutdown: ShutdownSignal) -> Result<()> {
    let app = App::load(&args, shutdown)?;

    match args.command {
        Command::Workspace { command } => {
            debug!("Handling workspace command");
            workspace::handle_workspace_command(&app, command).await
        }
        Command::Ctx { name } => workspace::handle_ctx(&app, name.as_deref()),
        Command::Node { command } => {
            debug!("Handling node command");
            node::handle_node_command(&app, command).await
        }
        Command::Bootstrap {
            workspace,
            control_planes,
            workers,
            force,
        } => {
            workflow::handle_bootstrap(&app, workspace.as_deref(), control_planes, workers, force)
                .await
        }
        Command::Workflow { command } => {
            debug!("Handling workflow command");
            workflow::handle_workflow_command(&app, command).await
        }
        Command::Inventory { workspace } => {
            let name = app.workspace(workspace.as_deref())?;
            app.print_json(&app.manager.inventory(&name)?)
        }
        Command::Tofu { action, workspace } => {
            engine::handle_tofu(&app, &action, workspace.as_deref()).await
        }
        Command::Playbook {
            playbook,
            workspace,
            limit,
            extra_vars,
        } => {
            engine::handle_playbook(&app, &playbook, workspace.as_deref(), limit, extra_vars).await
        }
        Command::Exec {
            node,
            command,
            workspace,
        } => engine::handle_exec(&app, &node, &command, workspace.as_deref()).await,
        Command::Config { command } => config::handle_config_command(&app, command),
    }
}

//! Workspace lifecycle outside of workflows.

use std::sync::Arc;

use cpc_core::{CpcError, Result};
use cpc_gateway::inventory;
use cpc_registry::{resolve_active, workspace_block, NodeAddress, Role, Workspace};
use serde::Serialize;
use serde_json::Value;
use tracing::info;

use cpc_gateway::OperationGateway;

/// A workspace with everything derived from it.
#[derive(Debug, Clone, Serialize)]
pub struct WorkspaceDetails {
    #[serde(flatten)]
    pub workspace: Workspace,
    pub block: String,
    pub addresses: Vec<NodeAddress>,
    pub active: bool,
    pub protected: bool,
}

#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    gateway: Arc<OperationGateway>,
}

impl WorkspaceManager {
    pub fn new(gateway: Arc<OperationGateway>) -> Self {
        Self { gateway }
    }

    pub fn create(&self, name: &str, letter: Option<char>) -> Result<Workspace> {
        self.gateway.registry().allocate(name, letter)
    }

    pub fn clone_from(&self, template: &str, name: &str, letter: Option<char>) -> Result<Workspace> {
        self.gateway.registry().clone_from(template, name, letter)
    }

    /// Delete `name`, refusing while a workflow runs for it. Live resources
    /// block the delete unless `force` tears them down first.
    pub async fn delete(&self, name: &str, force: bool) -> Result<Workspace> {
        let _claim = self.gateway.ledger().claim_workspace(name)?;
        self.gateway
            .registry()
            .release(name, self.gateway.as_ref(), force)
            .await
    }

    pub fn list(&self) -> Result<Vec<WorkspaceDetails>> {
        let current = self.current()?;
        self.gateway
            .registry()
            .list()?
            .into_iter()
            .map(|ws| self.details(ws, current.as_deref()))
            .collect()
    }

    pub fn show(&self, name: &str) -> Result<WorkspaceDetails> {
        let workspace = self.gateway.registry().resolve(name)?;
        let current = self.current()?;
        self.details(workspace, current.as_deref())
    }

    fn details(&self, workspace: Workspace, current: Option<&str>) -> Result<WorkspaceDetails> {
        let registry = self.gateway.registry();
        let network = registry.network();
        Ok(WorkspaceDetails {
            block: workspace_block(&workspace, network)?.to_string(),
            addresses: resolve_active(&workspace, network)?,
            active: current == Some(workspace.name.as_str()),
            protected: registry.is_protected(&workspace.name),
            workspace,
        })
    }

    /// The active workspace from the context file.
    pub fn current(&self) -> Result<Option<String>> {
        self.gateway.registry().context().get()
    }

    pub fn switch(&self, name: &str) -> Result<Workspace> {
        let workspace = self.gateway.registry().resolve(name)?;
        self.gateway.registry().context().set(&workspace.name)?;
        info!(workspace = %workspace.name, "Switched active workspace");
        Ok(workspace)
    }

    /// `explicit`, else the active workspace.
    pub fn target(&self, explicit: Option<&str>) -> Result<String> {
        match explicit {
            Some(name) => Ok(name.to_string()),
            None => self.current()?.ok_or_else(|| {
                CpcError::input(
                    "No workspace selected; pass --workspace or run `cpc ctx <name>`",
                )
            }),
        }
    }

    pub fn set_overlay(&self, name: &str, key: &str, value: Option<&str>) -> Result<Workspace> {
        self.gateway.registry().set_overlay(name, key, value)
    }

    /// Issue ordinals until `role` has at least `count` active nodes.
    pub fn ensure_nodes(&self, name: &str, role: Role, count: u32) -> Result<Vec<u32>> {
        let registry = self.gateway.registry();
        let active = registry.resolve(name)?.ordinals(role).active.len() as u32;
        let issued = (active..count)
            .map(|_| registry.issue_node(name, role))
            .collect::<Result<Vec<u32>>>()?;
        if !issued.is_empty() {
            info!(workspace = name, %role, ?issued, "Issued node ordinals");
        }
        Ok(issued)
    }

    pub fn nodes(&self, name: &str) -> Result<Vec<NodeAddress>> {
        let registry = self.gateway.registry();
        resolve_active(&registry.resolve(name)?, registry.network())
    }

    /// Ansible inventory for `name`.
    pub fn inventory(&self, name: &str) -> Result<Value> {
        let workspace = self.gateway.registry().resolve(name)?;
        let nodes = resolve_active(&workspace, self.gateway.registry().network())?;
        Ok(inventory::build(&workspace, &nodes))
    }

    /// Rewrite the registry log as a snapshot. Returns line counts before and after.
    pub fn compact(&self) -> Result<(usize, usize)> {
        self.gateway.registry().compact()
    }
}

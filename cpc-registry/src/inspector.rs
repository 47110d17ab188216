use async_trait::async_trait;
use cpc_core::Result;

use crate::workspace::Workspace;

/// Asks the external engines what still exists for a workspace.
///
/// The registry never tracks resources itself; the infrastructure engine's
/// state is the source of truth.
#[async_trait]
pub trait ResourceInspector: Send + Sync {
    /// Names of resources that currently exist for `workspace`.
    async fn live_resources(&self, workspace: &Workspace) -> Result<Vec<String>>;

    /// Destroy every resource belonging to `workspace`.
    async fn teardown(&self, workspace: &Workspace) -> Result<()>;
}

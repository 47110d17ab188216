use std::path::PathBuf;

use async_trait::async_trait;
use cpc_checkpoint::Invocation;
use cpc_config::EngineSettings;
use cpc_core::{CpcError, OperationKind, Result};
use cpc_exec::ProcessSpec;
use cpc_registry::{Role, Workspace};
use tracing::debug;

use super::sanitize_key;
use crate::engine::{Engine, EngineCall, EngineRequest, ProcessCall};
use crate::summary::SUMMARY_OUTPUT;

/// Subcommands callers may request.
pub const TOFU_ACTIONS: [&str; 3] = ["plan", "apply", "destroy"];

/// Reads the cluster summary; used internally for inspection.
pub const OUTPUT_ACTION: &str = "output";

/// OpenTofu provisioning engine.
///
/// The target workspace reaches the child through `TF_WORKSPACE` and every
/// parameter through `TF_VAR_*`; nothing in the infrastructure directory is
/// rewritten. Node IPs are never passed: the module derives them from the
/// same block layout.
#[derive(Debug, Clone)]
pub struct TofuEngine {
    binary: String,
    infra_dir: PathBuf,
}

impl TofuEngine {
    pub fn new(binary: impl Into<String>, infra_dir: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            infra_dir: infra_dir.into(),
        }
    }

    pub fn from_settings(settings: &EngineSettings) -> Self {
        Self::new(settings.tofu_binary.clone(), settings.infra_dir.clone())
    }

    fn base(&self) -> ProcessSpec {
        ProcessSpec::new(&self.binary)
            .arg(format!("-chdir={}", self.infra_dir.display()))
            .env("TF_IN_AUTOMATION", "1")
            .env("TF_INPUT", "0")
    }

    fn with_variables(&self, mut spec: ProcessSpec, request: &EngineRequest<'_>) -> ProcessSpec {
        let workspace = request.workspace;
        spec = spec
            .env("TF_WORKSPACE", &workspace.name)
            .env("TF_VAR_workspace_index", workspace.index.to_string())
            .env("TF_VAR_release_letter", workspace.release_letter.to_string())
            .env("TF_VAR_control_plane_ordinals", ordinals(workspace, Role::ControlPlane))
            .env("TF_VAR_worker_ordinals", ordinals(workspace, Role::Worker));

        for (key, value) in &workspace.overlay {
            spec = spec.env(format!("TF_VAR_{}", sanitize_key(key)), value);
        }
        for (key, value) in &request.invocation.parameters {
            spec = spec.env(format!("TF_VAR_{}", sanitize_key(key)), value);
        }
        for (key, value) in request.secrets.iter() {
            spec = spec.env(format!("TF_VAR_{}", sanitize_key(key)), value);
        }
        spec
    }

    /// Commands to run before `action`, without the workspace override.
    fn preparation(&self, action: &str, workspace: &Workspace) -> Vec<ProcessSpec> {
        let mut steps = Vec::new();
        if !matches!(action, "plan" | "apply") {
            return steps;
        }
        if !self.infra_dir.join(".terraform").exists() {
            steps.push(self.base().args(["init", "-input=false"]));
        }
        steps.push(self.base().args([
            "workspace",
            "select",
            "-or-create=true",
            workspace.name.as_str(),
        ]));
        steps
    }
}

/// JSON list of active ordinals, the form a `list(number)` variable takes.
fn ordinals(workspace: &Workspace, role: Role) -> String {
    let active: Vec<String> = workspace
        .ordinals(role)
        .active
        .iter()
        .map(u32::to_string)
        .collect();
    format!("[{}]", active.join(","))
}

#[async_trait]
impl Engine for TofuEngine {
    fn kind(&self) -> OperationKind {
        OperationKind::Provision
    }

    fn name(&self) -> &'static str {
        "tofu"
    }

    fn required_tools(&self) -> Vec<(String, String)> {
        vec![(
            self.binary.clone(),
            "Install OpenTofu: https://opentofu.org/docs/intro/install/".to_string(),
        )]
    }

    fn validate(&self, invocation: &Invocation) -> Result<()> {
        let action = invocation.action.as_str();
        if TOFU_ACTIONS.contains(&action) || action == OUTPUT_ACTION {
            Ok(())
        } else {
            Err(CpcError::input(format!(
                "Unsupported tofu subcommand '{action}' (expected one of: {})",
                TOFU_ACTIONS.join(", ")
            )))
        }
    }

    async fn start(&self, request: &EngineRequest<'_>) -> Result<Box<dyn EngineCall>> {
        self.validate(request.invocation)?;
        if !self.infra_dir.is_dir() {
            return Err(CpcError::config_with_hint(
                format!(
                    "Infrastructure directory not found: {}",
                    self.infra_dir.display()
                ),
                "Set engines.infra_dir in config.yaml",
            ));
        }

        let action = request.invocation.action.as_str();
        let main = match action {
            OUTPUT_ACTION => self.base().args(["output", "-json", SUMMARY_OUTPUT]),
            "plan" => self.base().args(["plan", "-input=false"]),
            _ => self.base().args([action, "-input=false", "-auto-approve"]),
        };
        let main = self.with_variables(main, request);

        let mut chain = self.preparation(action, request.workspace);
        chain.push(main);
        debug!(
            workspace = %request.workspace.name,
            commands = chain.len(),
            "Starting tofu {action}"
        );
        Ok(Box::new(ProcessCall::chain(chain)))
    }
}

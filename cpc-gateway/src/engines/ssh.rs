use std::path::PathBuf;

use async_trait::async_trait;
use cpc_checkpoint::Invocation;
use cpc_config::EngineSettings;
use cpc_core::{CpcError, OperationKind, Result};
use cpc_exec::ProcessSpec;
use tracing::debug;

use crate::engine::{Engine, EngineCall, EngineRequest, ProcessCall};

/// Remote command engine. The action is the shell command to run on the
/// target node.
#[derive(Debug, Clone)]
pub struct SshEngine {
    binary: String,
    user: String,
    private_key: Option<PathBuf>,
}

impl SshEngine {
    pub fn new(binary: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            user: user.into(),
            private_key: None,
        }
    }

    pub fn from_settings(settings: &EngineSettings) -> Self {
        Self {
            binary: settings.ssh_binary.clone(),
            user: settings.ssh_user.clone(),
            private_key: settings.ssh_key.clone(),
        }
    }

    fn command(&self, request: &EngineRequest<'_>) -> Result<ProcessSpec> {
        let target = request
            .invocation
            .target
            .as_deref()
            .ok_or_else(|| CpcError::input("Remote commands need a target node"))?;
        let node = request.node(target)?;

        let mut spec = ProcessSpec::new(&self.binary).args([
            "-o",
            "BatchMode=yes",
            "-o",
            "StrictHostKeyChecking=accept-new",
            "-o",
            "ConnectTimeout=10",
        ]);
        if let Some(key) = &self.private_key {
            spec = spec.arg("-i").arg(key.display().to_string());
        }
        Ok(spec
            .arg(format!("{}@{}", self.user, node.ip))
            .arg("--")
            .arg(&request.invocation.action))
    }
}

#[async_trait]
impl Engine for SshEngine {
    fn kind(&self) -> OperationKind {
        OperationKind::RemoteExec
    }

    fn name(&self) -> &'static str {
        "ssh"
    }

    fn required_tools(&self) -> Vec<(String, String)> {
        vec![(
            self.binary.clone(),
            "Install an OpenSSH client".to_string(),
        )]
    }

    fn validate(&self, invocation: &Invocation) -> Result<()> {
        if invocation.target.is_none() {
            return Err(CpcError::input("Remote commands need a target node"));
        }
        if invocation.action.trim().is_empty() {
            return Err(CpcError::input("Remote command is empty"));
        }
        Ok(())
    }

    async fn start(&self, request: &EngineRequest<'_>) -> Result<Box<dyn EngineCall>> {
        self.validate(request.invocation)?;
        let spec = self.command(request)?;
        debug!(command = %spec.display(), "Starting remote command");
        Ok(Box::new(ProcessCall::new(spec)))
    }
}

//! Engine capability trait and the process-backed call it usually returns.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use cpc_checkpoint::Invocation;
use cpc_core::{CorrelationId, CpcError, OperationKind, Result};
use cpc_exec::{Cancellable, ChildProcess, ProcessOutput, ProcessSpec};
use cpc_registry::{NodeAddress, Workspace};
use tracing::debug;

use crate::secrets::Secrets;

/// What every engine call produces.
pub type EngineOutput = ProcessOutput;

/// Everything an engine may use to build one call.
#[derive(Debug, Clone, Copy)]
pub struct EngineRequest<'a> {
    pub workspace: &'a Workspace,
    pub invocation: &'a Invocation,
    /// Active nodes of the workspace with their computed addresses
    pub nodes: &'a [NodeAddress],
    pub secrets: &'a Secrets,
    /// Per-invocation directory for generated files, removed afterwards
    pub scratch: &'a Path,
    pub correlation_id: &'a CorrelationId,
}

impl EngineRequest<'_> {
    /// Look up a node by hostname among the workspace's active nodes.
    pub fn node(&self, hostname: &str) -> Result<&NodeAddress> {
        self.nodes
            .iter()
            .find(|n| n.hostname == hostname)
            .ok_or_else(|| {
                CpcError::input(format!(
                    "Node '{hostname}' is not active in workspace '{}'",
                    self.workspace.name
                ))
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallStatus {
    Running,
    Exited(Option<i32>),
    Cancelled,
}

/// A started engine call: wait for it, cancel it, or ask how it is doing.
pub trait EngineCall: Cancellable<Output = EngineOutput> {
    fn status(&self) -> CallStatus;
}

/// One external engine. Registered in an [`EngineSet`] under its kind.
#[async_trait]
pub trait Engine: Send + Sync {
    fn kind(&self) -> OperationKind;

    fn name(&self) -> &'static str;

    /// Binaries that must be on PATH, with an install hint for each.
    fn required_tools(&self) -> Vec<(String, String)> {
        Vec::new()
    }

    /// Reject invocations this engine cannot run. Called before any attempt.
    fn validate(&self, _invocation: &Invocation) -> Result<()> {
        Ok(())
    }

    async fn start(&self, request: &EngineRequest<'_>) -> Result<Box<dyn EngineCall>>;
}

/// Engines keyed by operation kind.
#[derive(Clone, Default)]
pub struct EngineSet {
    engines: HashMap<OperationKind, Arc<dyn Engine>>,
}

impl fmt::Debug for EngineSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self
            .engines
            .iter()
            .map(|(kind, engine)| (kind.as_str(), engine.name()))
            .collect();
        names.sort();
        f.debug_struct("EngineSet").field("engines", &names).finish()
    }
}

impl EngineSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `engine`, replacing any engine of the same kind.
    pub fn with(mut self, engine: Arc<dyn Engine>) -> Self {
        self.engines.insert(engine.kind(), engine);
        self
    }

    pub fn get(&self, kind: OperationKind) -> Result<Arc<dyn Engine>> {
        self.engines.get(&kind).cloned().ok_or_else(|| {
            CpcError::config(format!("No engine registered for {kind} operations"))
        })
    }

    pub fn kinds(&self) -> Vec<OperationKind> {
        OperationKind::ALL
            .iter()
            .copied()
            .filter(|k| self.engines.contains_key(k))
            .collect()
    }
}

/// Runs a short chain of processes as one call.
///
/// Every process but the last is preparatory; if one fails its output is
/// returned and the rest are skipped.
#[derive(Debug)]
pub struct ProcessCall {
    pending: VecDeque<ProcessSpec>,
    current: Option<ChildProcess>,
    status: CallStatus,
}

impl ProcessCall {
    pub fn new(spec: ProcessSpec) -> Self {
        Self::chain(vec![spec])
    }

    pub fn chain(specs: Vec<ProcessSpec>) -> Self {
        Self {
            pending: specs.into(),
            current: None,
            status: CallStatus::Running,
        }
    }

    fn finish(&mut self, output: ProcessOutput) -> ProcessOutput {
        if self.status == CallStatus::Running {
            self.status = CallStatus::Exited(output.exit_code);
        }
        output
    }
}

#[async_trait]
impl Cancellable for ProcessCall {
    type Output = EngineOutput;

    async fn wait(&mut self) -> Result<EngineOutput> {
        loop {
            if self.current.is_none() {
                let spec = match self.pending.pop_front() {
                    Some(spec) => spec,
                    // Cancelled between two processes.
                    None if self.status == CallStatus::Cancelled => {
                        return Ok(ProcessOutput {
                            exit_code: None,
                            stdout: String::new(),
                            stderr: String::new(),
                        })
                    }
                    None => return Err(CpcError::execution("Engine call has nothing to run")),
                };
                self.current = Some(spec.spawn()?);
            }
            let output = match self.current.as_mut() {
                Some(child) => child.wait().await?,
                None => continue,
            };
            if self.pending.is_empty() || !output.success() || self.status == CallStatus::Cancelled
            {
                return Ok(self.finish(output));
            }
            debug!("Preparatory command finished, starting next");
            self.current = None;
        }
    }

    async fn cancel(&mut self) -> Result<()> {
        self.pending.clear();
        if matches!(self.status, CallStatus::Running) {
            self.status = CallStatus::Cancelled;
        }
        match self.current.as_mut() {
            Some(child) => child.cancel().await,
            None => Ok(()),
        }
    }
}

impl EngineCall for ProcessCall {
    fn status(&self) -> CallStatus {
        self.status
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_chain_stops_at_failed_preparation() {
        let mut call = ProcessCall::chain(vec![
            ProcessSpec::new("sh").args(["-c", "echo prep >&2; exit 2"]),
            ProcessSpec::new("sh").args(["-c", "echo main"]),
        ]);
        let output = call.wait().await.unwrap();
        assert_eq!(output.exit_code, Some(2));
        assert_eq!(output.stdout, "");
        assert_eq!(call.status(), CallStatus::Exited(Some(2)));
    }

    #[tokio::test]
    async fn test_chain_runs_to_last() {
        let mut call = ProcessCall::chain(vec![
            ProcessSpec::new("true"),
            ProcessSpec::new("sh").args(["-c", "echo main"]),
        ]);
        let output = call.wait().await.unwrap();
        assert!(output.success());
        assert_eq!(output.stdout, "main");
    }

    #[tokio::test]
    async fn test_cancel_marks_status() {
        let mut call = ProcessCall::new(ProcessSpec::new("sleep").arg("30"));
        // Spawn before cancelling so there is something to kill.
        let started = tokio::time::timeout(std::time::Duration::from_millis(50), call.wait()).await;
        assert!(started.is_err());
        call.cancel().await.unwrap();
        let output = call.wait().await.unwrap();
        assert_eq!(output.exit_code, None);
        assert_eq!(call.status(), CallStatus::Cancelled);
    }

    #[test]
    fn test_missing_engine_is_config_error() {
        let err = EngineSet::new()
            .get(OperationKind::Provision)
            .err()
            .expect("expected missing engine error");
        assert_eq!(err.category(), cpc_core::ErrorCategory::Config);
    }
}

//! Scriptable engine for tests.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use cpc_checkpoint::Invocation;
use cpc_core::{CpcError, OperationKind, Result};
use cpc_exec::Cancellable;

use crate::engine::{CallStatus, Engine, EngineCall, EngineOutput, EngineRequest};

/// What the next call for an action does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockBehavior {
    Succeed(String),
    Fail { exit_code: i32, stderr: String },
    /// Never finishes until cancelled.
    Hang,
    /// Fail to start with a Config error.
    Reject(String),
}

impl MockBehavior {
    pub fn fail(exit_code: i32, stderr: impl Into<String>) -> Self {
        MockBehavior::Fail {
            exit_code,
            stderr: stderr.into(),
        }
    }
}

/// A call seen by the mock.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub invocation: Invocation,
    pub workspace: String,
    pub hosts: Vec<String>,
    pub scratch: PathBuf,
    pub secret_keys: Vec<String>,
}

#[derive(Debug, Default)]
struct MockState {
    scripts: HashMap<String, VecDeque<MockBehavior>>,
    calls: Vec<RecordedCall>,
}

/// Engine whose calls follow a per-action script. Unscripted calls succeed
/// with empty output.
#[derive(Debug, Clone)]
pub struct MockEngine {
    kind: OperationKind,
    state: Arc<Mutex<MockState>>,
}

impl MockEngine {
    pub fn new(kind: OperationKind) -> Self {
        Self {
            kind,
            state: Arc::new(Mutex::new(MockState::default())),
        }
    }

    /// Queue `behavior` for the next call of `action`.
    pub fn on(&self, action: &str, behavior: MockBehavior) -> &Self {
        if let Ok(mut state) = self.state.lock() {
            state
                .scripts
                .entry(action.to_string())
                .or_default()
                .push_back(behavior);
        }
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.state
            .lock()
            .map(|s| s.calls.clone())
            .unwrap_or_default()
    }

    /// Actions in call order.
    pub fn actions(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .map(|c| c.invocation.action)
            .collect()
    }

    pub fn call_count(&self, action: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.invocation.action == action)
            .count()
    }
}

#[async_trait]
impl Engine for MockEngine {
    fn kind(&self) -> OperationKind {
        self.kind
    }

    fn name(&self) -> &'static str {
        "mock"
    }

    async fn start(&self, request: &EngineRequest<'_>) -> Result<Box<dyn EngineCall>> {
        let behavior = {
            let mut state = self
                .state
                .lock()
                .map_err(|_| CpcError::execution("mock engine state poisoned"))?;
            state.calls.push(RecordedCall {
                invocation: request.invocation.clone(),
                workspace: request.workspace.name.clone(),
                hosts: request.nodes.iter().map(|n| n.hostname.clone()).collect(),
                scratch: request.scratch.to_path_buf(),
                secret_keys: request.secrets.keys().map(str::to_string).collect(),
            });
            state
                .scripts
                .get_mut(&request.invocation.action)
                .and_then(VecDeque::pop_front)
                .unwrap_or_else(|| MockBehavior::Succeed(String::new()))
        };

        if let MockBehavior::Reject(message) = &behavior {
            return Err(CpcError::config(message.clone()));
        }
        Ok(Box::new(MockCall {
            behavior,
            status: CallStatus::Running,
        }))
    }
}

struct MockCall {
    behavior: MockBehavior,
    status: CallStatus,
}

#[async_trait]
impl Cancellable for MockCall {
    type Output = EngineOutput;

    async fn wait(&mut self) -> Result<EngineOutput> {
        let output = match (&self.behavior, self.status) {
            (_, CallStatus::Cancelled) => EngineOutput {
                exit_code: None,
                stdout: String::new(),
                stderr: "killed".to_string(),
            },
            (MockBehavior::Hang, _) => std::future::pending().await,
            (MockBehavior::Succeed(stdout), _) => EngineOutput {
                exit_code: Some(0),
                stdout: stdout.clone(),
                stderr: String::new(),
            },
            (MockBehavior::Fail { exit_code, stderr }, _) => EngineOutput {
                exit_code: Some(*exit_code),
                stdout: String::new(),
                stderr: stderr.clone(),
            },
            (MockBehavior::Reject(message), _) => return Err(CpcError::config(message.clone())),
        };
        if self.status == CallStatus::Running {
            self.status = CallStatus::Exited(output.exit_code);
        }
        Ok(output)
    }

    async fn cancel(&mut self) -> Result<()> {
        if self.status == CallStatus::Running {
            self.status = CallStatus::Cancelled;
        }
        Ok(())
    }
}

impl EngineCall for MockCall {
    fn status(&self) -> CallStatus {
        self.status
    }
}

//! Fixed step lists for each workflow.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use cpc_checkpoint::{Invocation, StepPlan, StepRecord};
use cpc_core::{CpcError, OperationKind, Result};
use cpc_registry::{NodeAddress, Role};
use serde::{Deserialize, Serialize};

/// Extra var naming the node a node workflow acts on.
pub const NODE_PARAM: &str = "node_name";

/// Step that provisions without the removed node. The node is retired in
/// the registry right before it runs.
pub const DEPROVISION_STEP: &str = "deprovision-node";

const INSTALL_PLAYBOOK: &str = "install_kubernetes_cluster.yml";
const INIT_PLAYBOOK: &str = "initialize_kubernetes_cluster_with_dns.yml";
const PREPARE_PLAYBOOK: &str = "pb_prepare_node.yml";
const JOIN_PLAYBOOK: &str = "pb_add_nodes.yml";
const DRAIN_PLAYBOOK: &str = "pb_drain_node.yml";
const RESET_PLAYBOOK: &str = "pb_reset_node.yml";
const UPGRADE_PLAYBOOK: &str = "pb_upgrade_node.yml";
const UNCORDON_PLAYBOOK: &str = "pb_uncordon_node.yml";
const VALIDATE_COMMAND: &str = "kubectl get nodes -o wide";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WorkflowKind {
    Bootstrap,
    AddNode,
    RemoveNode,
    UpgradeNode,
}

impl WorkflowKind {
    pub const ALL: [WorkflowKind; 4] = [
        WorkflowKind::Bootstrap,
        WorkflowKind::AddNode,
        WorkflowKind::RemoveNode,
        WorkflowKind::UpgradeNode,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            WorkflowKind::Bootstrap => "bootstrap",
            WorkflowKind::AddNode => "add-node",
            WorkflowKind::RemoveNode => "remove-node",
            WorkflowKind::UpgradeNode => "upgrade-node",
        }
    }

    /// Operation kinds the workflow's steps use.
    pub fn operation_kinds(self) -> &'static [OperationKind] {
        match self {
            WorkflowKind::Bootstrap => &OperationKind::ALL,
            WorkflowKind::AddNode | WorkflowKind::RemoveNode => {
                &[OperationKind::Provision, OperationKind::Configure]
            }
            WorkflowKind::UpgradeNode => &[OperationKind::Configure],
        }
    }
}

impl fmt::Display for WorkflowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkflowKind {
    type Err = CpcError;

    fn from_str(s: &str) -> Result<Self> {
        WorkflowKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| {
                let known: Vec<&str> = WorkflowKind::ALL.iter().map(|k| k.as_str()).collect();
                CpcError::input(format!(
                    "Unknown workflow '{s}' (expected one of: {})",
                    known.join(", ")
                ))
            })
    }
}

/// Which node a node workflow acts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeSelector {
    /// Issue the next ordinal for this role
    New(Role),
    /// An active node, by hostname
    Existing(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowRequest {
    pub kind: WorkflowKind,
    pub workspace: String,
    pub node: Option<NodeSelector>,
    /// Passed to every configuration step as extra vars
    pub parameters: BTreeMap<String, String>,
    /// Skip the completed-bootstrap guard
    pub force: bool,
}

impl WorkflowRequest {
    fn new(kind: WorkflowKind, workspace: &str, node: Option<NodeSelector>) -> Self {
        Self {
            kind,
            workspace: workspace.to_string(),
            node,
            parameters: BTreeMap::new(),
            force: false,
        }
    }

    pub fn bootstrap(workspace: &str) -> Self {
        Self::new(WorkflowKind::Bootstrap, workspace, None)
    }

    pub fn add_node(workspace: &str, role: Role) -> Self {
        Self::new(WorkflowKind::AddNode, workspace, Some(NodeSelector::New(role)))
    }

    pub fn remove_node(workspace: &str, hostname: &str) -> Self {
        Self::new(
            WorkflowKind::RemoveNode,
            workspace,
            Some(NodeSelector::Existing(hostname.to_string())),
        )
    }

    pub fn upgrade_node(workspace: &str, hostname: &str) -> Self {
        Self::new(
            WorkflowKind::UpgradeNode,
            workspace,
            Some(NodeSelector::Existing(hostname.to_string())),
        )
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }
}

fn playbook(name: &str, parameters: &BTreeMap<String, String>) -> Invocation {
    let mut invocation = Invocation::new(OperationKind::Configure, name);
    invocation.parameters = parameters.clone();
    invocation
}

fn apply() -> Invocation {
    Invocation::new(OperationKind::Provision, "apply")
}

/// Steps for `kind`.
///
/// `nodes` are the workspace's active nodes; `target` is the node a node
/// workflow acts on, already issued for add-node.
pub fn plan(
    kind: WorkflowKind,
    nodes: &[NodeAddress],
    target: Option<&NodeAddress>,
    parameters: &BTreeMap<String, String>,
) -> Result<Vec<StepPlan>> {
    if kind == WorkflowKind::Bootstrap {
        let first_cp = nodes
            .iter()
            .find(|n| n.role == Role::ControlPlane)
            .ok_or_else(|| {
                CpcError::input("Bootstrap needs at least one control plane node")
            })?;
        return Ok(vec![
            StepPlan::new("provision-nodes", apply())
                .compensate_with(Invocation::new(OperationKind::Provision, "destroy")),
            StepPlan::new("install-base", playbook(INSTALL_PLAYBOOK, parameters)),
            StepPlan::new(
                "init-control-plane",
                playbook(INIT_PLAYBOOK, parameters).target("control_plane"),
            ),
            StepPlan::new(
                "join-workers",
                playbook(JOIN_PLAYBOOK, parameters).target("workers"),
            ),
            StepPlan::new(
                "validate",
                Invocation::new(OperationKind::RemoteExec, VALIDATE_COMMAND)
                    .target(first_cp.hostname.clone()),
            ),
        ]);
    }

    let node = target
        .ok_or_else(|| CpcError::input(format!("Workflow {kind} needs a target node")))?;
    let host = node.hostname.as_str();
    if kind == WorkflowKind::AddNode
        && node.role == Role::Worker
        && !nodes.iter().any(|n| n.role == Role::ControlPlane)
    {
        return Err(CpcError::input(format!(
            "Cannot add worker {host}: the workspace has no control plane node to join"
        )));
    }
    let on_node = |name: &str| playbook(name, parameters).target(host).param(NODE_PARAM, host);
    // Drain and uncordon run kubectl from the control plane.
    let about_node = |name: &str| playbook(name, parameters).param(NODE_PARAM, host);

    let steps = match kind {
        WorkflowKind::AddNode => vec![
            StepPlan::new("provision-node", apply()),
            StepPlan::new("prepare-node", on_node(PREPARE_PLAYBOOK)),
            StepPlan::new("join-node", on_node(JOIN_PLAYBOOK)),
        ],
        WorkflowKind::RemoveNode => vec![
            StepPlan::new("drain-node", about_node(DRAIN_PLAYBOOK)),
            StepPlan::new("reset-node", on_node(RESET_PLAYBOOK)),
            StepPlan::new(DEPROVISION_STEP, apply().param(NODE_PARAM, host)),
        ],
        WorkflowKind::UpgradeNode => vec![
            StepPlan::new("drain-node", about_node(DRAIN_PLAYBOOK)),
            StepPlan::new("upgrade-node", on_node(UPGRADE_PLAYBOOK)),
            StepPlan::new("uncordon-node", about_node(UNCORDON_PLAYBOOK)),
        ],
        WorkflowKind::Bootstrap => Vec::new(),
    };
    Ok(steps)
}

/// Hostname to retire before `step` runs, if any.
pub fn node_to_retire(step: &StepRecord) -> Option<&str> {
    (step.name == DEPROVISION_STEP)
        .then(|| step.invocation.parameters.get(NODE_PARAM))
        .flatten()
        .map(String::as_str)
}

/// Operation kinds a list of steps will use.
pub fn kinds_of<'a>(steps: impl IntoIterator<Item = &'a Invocation>) -> Vec<OperationKind> {
    let mut kinds: Vec<OperationKind> = steps.into_iter().map(|i| i.kind).collect();
    kinds.sort();
    kinds.dedup();
    kinds
}

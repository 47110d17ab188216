//! The provisioning engine's `cluster_summary` output.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use cpc_core::{CpcError, Result};
use cpc_registry::NodeAddress;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const SUMMARY_OUTPUT: &str = "cluster_summary";

/// One provisioned VM as reported by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryNode {
    #[serde(rename = "IP")]
    pub ip: String,
    pub hostname: String,
    #[serde(rename = "VM_ID", default, skip_serializing_if = "Option::is_none")]
    pub vm_id: Option<Value>,
}

/// Provisioned nodes keyed by the engine's resource name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClusterSummary {
    pub nodes: BTreeMap<String, SummaryNode>,
}

impl ClusterSummary {
    /// Parse `output -json` stdout.
    ///
    /// Null or an empty map means nothing is provisioned and fails with an
    /// Execution error.
    pub fn parse(stdout: &str) -> Result<Self> {
        Self::parse_optional(stdout)?.ok_or_else(no_summary)
    }

    /// Like [`parse`](Self::parse), but an absent summary is `None`.
    ///
    /// Accepts the bare value, `{"value": ...}`, or the full outputs document
    /// `{"cluster_summary": {"value": ...}}`.
    pub fn parse_optional(stdout: &str) -> Result<Option<Self>> {
        let trimmed = stdout.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }
        let mut value: Value = serde_json::from_str(trimmed)?;
        if let Some(inner) = value.get(SUMMARY_OUTPUT).cloned() {
            value = inner;
        }
        if let Some(inner) = value.get("value").cloned() {
            value = inner;
        }
        if value.is_null() {
            return Ok(None);
        }
        let summary: ClusterSummary = serde_json::from_value(value)?;
        Ok((!summary.nodes.is_empty()).then_some(summary))
    }

    pub fn by_hostname(&self, hostname: &str) -> Option<&SummaryNode> {
        self.nodes.values().find(|n| n.hostname == hostname)
    }

    pub fn hostnames(&self) -> Vec<String> {
        let mut names: Vec<String> = self.nodes.values().map(|n| n.hostname.clone()).collect();
        names.sort();
        names
    }
}

fn no_summary() -> CpcError {
    CpcError::execution("No cluster summary available")
}

/// Compare predicted addresses against what the engine reports.
///
/// Returns one warning per disagreement: a predicted node missing from the
/// summary, an IP that differs, or a reported node that was not predicted.
pub fn reconcile(predicted: &[NodeAddress], summary: &ClusterSummary) -> Vec<String> {
    let mut warnings = Vec::new();

    for node in predicted {
        match summary.by_hostname(&node.hostname) {
            None => warnings.push(format!(
                "{} ({}) is not in the cluster summary",
                node.hostname, node.ip
            )),
            Some(reported) => {
                if reported.ip.parse::<Ipv4Addr>().ok() != Some(node.ip) {
                    warnings.push(format!(
                        "{} was predicted at {} but reported at {}",
                        node.hostname, node.ip, reported.ip
                    ));
                }
            }
        }
    }

    for reported in summary.nodes.values() {
        if !predicted.iter().any(|n| n.hostname == reported.hostname) {
            warnings.push(format!(
                "{} ({}) is provisioned but not registered",
                reported.hostname, reported.ip
            ));
        }
    }

    warnings
}

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::address::Role;

/// A registered workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workspace {
    pub name: String,
    /// Stable for the workspace lifetime; selects the IP block
    pub index: u32,
    pub release_letter: char,
    /// Copied from the network settings at creation time
    pub ip_block_size: u32,
    /// Per-workspace parameters handed to the infrastructure engine
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub overlay: BTreeMap<String, String>,
    #[serde(default)]
    pub nodes: NodeSet,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloned_from: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Workspace {
    pub fn ordinals(&self, role: Role) -> &RoleOrdinals {
        self.nodes.for_role(role)
    }

    pub fn overlay_value(&self, key: &str) -> Option<&str> {
        self.overlay.get(key).map(String::as_str)
    }

    /// Active nodes in role order, then ordinal order.
    pub fn active_nodes(&self) -> Vec<(Role, u32)> {
        Role::ALL
            .iter()
            .flat_map(|&role| {
                self.nodes
                    .for_role(role)
                    .active
                    .iter()
                    .map(move |&ordinal| (role, ordinal))
            })
            .collect()
    }
}

/// Node ordinals issued in a workspace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSet {
    #[serde(default)]
    pub control_plane: RoleOrdinals,
    #[serde(default)]
    pub workers: RoleOrdinals,
}

impl NodeSet {
    pub fn for_role(&self, role: Role) -> &RoleOrdinals {
        match role {
            Role::ControlPlane => &self.control_plane,
            Role::Worker => &self.workers,
        }
    }

    pub fn for_role_mut(&mut self, role: Role) -> &mut RoleOrdinals {
        match role {
            Role::ControlPlane => &mut self.control_plane,
            Role::Worker => &mut self.workers,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.control_plane.active.is_empty() && self.workers.active.is_empty()
    }
}

/// Ordinals for one role. `next` only moves forward, so a retired ordinal is
/// never handed out again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleOrdinals {
    pub active: BTreeSet<u32>,
    pub next: u32,
}

impl Default for RoleOrdinals {
    fn default() -> Self {
        Self {
            active: BTreeSet::new(),
            next: 1,
        }
    }
}

impl RoleOrdinals {
    pub(crate) fn issue(&mut self, ordinal: u32) {
        self.active.insert(ordinal);
        self.next = self.next.max(ordinal + 1);
    }

    pub(crate) fn retire(&mut self, ordinal: u32) -> bool {
        self.active.remove(&ordinal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordinals_are_monotonic() {
        let mut ordinals = RoleOrdinals::default();
        ordinals.issue(1);
        ordinals.issue(2);
        assert!(ordinals.retire(1));
        assert_eq!(ordinals.next, 3);
        assert_eq!(ordinals.active.iter().copied().collect::<Vec<_>>(), vec![2]);
        assert!(!ordinals.retire(1));
    }
}

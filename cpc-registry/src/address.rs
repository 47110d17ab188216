//! Node address resolver.
//!
//! Addresses and hostnames are derived from the workspace index, the role and
//! the ordinal. Nothing here touches the filesystem or the network.

use std::fmt;
use std::net::Ipv4Addr;

use cpc_config::{IpRange, NetworkSettings};
use cpc_core::{CpcError, Result};
use serde::{Deserialize, Serialize};

use crate::workspace::Workspace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    ControlPlane,
    Worker,
}

impl Role {
    pub const ALL: [Role; 2] = [Role::ControlPlane, Role::Worker];

    /// Hostname prefix.
    pub fn prefix(self) -> char {
        match self {
            Role::ControlPlane => 'c',
            Role::Worker => 'w',
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::ControlPlane => "control-plane",
            Role::Worker => "worker",
        }
    }

    /// Number of ordinals available to this role in one block.
    pub fn slots(self, network: &NetworkSettings) -> u32 {
        match self {
            Role::ControlPlane => network.control_plane_slots,
            Role::Worker => network.worker_slots,
        }
    }

    fn base_offset(self, network: &NetworkSettings) -> u32 {
        match self {
            Role::ControlPlane => 0,
            Role::Worker => network.control_plane_slots,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = CpcError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "control-plane" | "control_plane" | "controlplane" | "cp" => Ok(Role::ControlPlane),
            "worker" | "w" => Ok(Role::Worker),
            other => Err(CpcError::input(format!(
                "Unknown node role '{other}' (expected control-plane or worker)"
            ))),
        }
    }
}

/// Derived identity of one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeAddress {
    pub role: Role,
    pub ordinal: u32,
    pub ip: Ipv4Addr,
    pub hostname: String,
}

/// Address block owned by a workspace.
pub fn workspace_block(workspace: &Workspace, network: &NetworkSettings) -> Result<IpRange> {
    block_at(workspace.index, workspace.ip_block_size, network)
}

/// Block of `block_size` addresses at `index`.
pub fn block_at(index: u32, block_size: u32, network: &NetworkSettings) -> Result<IpRange> {
    let start = offset_addr(network.base_ip, u64::from(index) * u64::from(block_size))?;
    let end = offset_addr(start, u64::from(block_size.saturating_sub(1)))?;
    IpRange::new(start, end)
}

/// Compute the address and hostname of `role`/`ordinal` in `workspace`.
pub fn resolve(
    workspace: &Workspace,
    role: Role,
    ordinal: u32,
    network: &NetworkSettings,
) -> Result<NodeAddress> {
    network.validate_block_size(workspace.ip_block_size)?;

    let slots = role.slots(network);
    if ordinal == 0 || ordinal > slots {
        return Err(CpcError::input(format!(
            "{role} ordinal {ordinal} is outside 1..={slots} for workspace '{}'",
            workspace.name
        )));
    }

    let start = block_start(workspace, network)?;
    let offset = role.base_offset(network) + (ordinal - 1);
    let ip = offset_addr(start, u64::from(offset))?;

    let hostname = format!(
        "{}{}{}{}",
        role.prefix(),
        workspace.release_letter,
        ordinal,
        network.domain_suffix
    );

    Ok(NodeAddress {
        role,
        ordinal,
        ip,
        hostname,
    })
}

/// Resolve every active node of `workspace`, control plane first.
pub fn resolve_active(workspace: &Workspace, network: &NetworkSettings) -> Result<Vec<NodeAddress>> {
    workspace
        .active_nodes()
        .into_iter()
        .map(|(role, ordinal)| resolve(workspace, role, ordinal, network))
        .collect()
}

/// Fail with a Config error when `node` falls inside a reserved range.
pub fn check_reserved(node: &NodeAddress, network: &NetworkSettings) -> Result<()> {
    match network.reserved_range_for(node.ip) {
        Some((name, range)) => Err(CpcError::config_with_hint(
            format!(
                "Address {} for {} falls inside reserved range '{name}' ({range})",
                node.ip, node.hostname
            ),
            "Move network.base_ip or the reserved range so workspace blocks do not overlap it",
        )),
        None => Ok(()),
    }
}

fn block_start(workspace: &Workspace, network: &NetworkSettings) -> Result<Ipv4Addr> {
    offset_addr(
        network.base_ip,
        u64::from(workspace.index) * u64::from(workspace.ip_block_size),
    )
}

fn offset_addr(base: Ipv4Addr, offset: u64) -> Result<Ipv4Addr> {
    let value = u64::from(u32::from(base)) + offset;
    u32::try_from(value).map(Ipv4Addr::from).map_err(|_| {
        CpcError::config(format!(
            "Address overflow: {base} + {offset} exceeds the IPv4 space"
        ))
    })
}

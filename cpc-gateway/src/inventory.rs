//! Dynamic Ansible inventory built from computed node addresses.

use cpc_registry::{NodeAddress, Role, Workspace};
use serde_json::{json, Map, Value};

pub const CONTROL_PLANE_GROUP: &str = "control_plane";
pub const WORKERS_GROUP: &str = "workers";

/// Whether `name` is one of the inventory's groups rather than a host.
pub fn is_group(name: &str) -> bool {
    matches!(name, CONTROL_PLANE_GROUP | WORKERS_GROUP | "all")
}

fn group(role: Role) -> &'static str {
    match role {
        Role::ControlPlane => CONTROL_PLANE_GROUP,
        Role::Worker => WORKERS_GROUP,
    }
}

/// Inventory in Ansible's JSON script format.
///
/// Hosts are keyed by hostname; `ansible_host` carries the computed IP so
/// no DNS is needed.
pub fn build(workspace: &Workspace, nodes: &[NodeAddress]) -> Value {
    let mut hostvars = Map::new();
    let mut groups: [(Role, Vec<String>); 2] = [
        (Role::ControlPlane, Vec::new()),
        (Role::Worker, Vec::new()),
    ];

    for node in nodes {
        hostvars.insert(
            node.hostname.clone(),
            json!({
                "ansible_host": node.ip.to_string(),
                "node_role": node.role.as_str(),
                "node_ordinal": node.ordinal,
            }),
        );
        if let Some((_, hosts)) = groups.iter_mut().find(|(role, _)| *role == node.role) {
            hosts.push(node.hostname.clone());
        }
    }

    let mut inventory = Map::new();
    for (role, hosts) in groups {
        inventory.insert(group(role).to_string(), json!({ "hosts": hosts }));
    }
    inventory.insert(
        "all".to_string(),
        json!({
            "children": [CONTROL_PLANE_GROUP, WORKERS_GROUP],
            "vars": {
                "cluster_workspace": workspace.name,
                "release_letter": workspace.release_letter.to_string(),
            },
        }),
    );
    inventory.insert("_meta".to_string(), json!({ "hostvars": hostvars }));
    Value::Object(inventory)
}

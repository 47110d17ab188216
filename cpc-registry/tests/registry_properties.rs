use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::thread;

use async_trait::async_trait;
use cpc_config::GlobalConfig;
use cpc_core::Result;
use cpc_registry::{
    resolve, workspace_block, ResourceInspector, Role, Workspace, WorkspaceRegistry,
};
use tempfile::TempDir;

struct NothingLive;

#[async_trait]
impl ResourceInspector for NothingLive {
    async fn live_resources(&self, _workspace: &Workspace) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    async fn teardown(&self, _workspace: &Workspace) -> Result<()> {
        Ok(())
    }
}

#[test]
fn concurrent_allocations_get_distinct_indices() {
    let temp = TempDir::new().unwrap();
    let state_dir = temp.path().to_path_buf();
    let config = Arc::new(GlobalConfig::default());

    let handles: Vec<_> = (0..12)
        .map(|i| {
            let state_dir = state_dir.clone();
            let config = Arc::clone(&config);
            thread::spawn(move || {
                // Separate registry values share nothing but the files on disk.
                let registry = WorkspaceRegistry::with_state_dir(state_dir, &config);
                registry.allocate(&format!("ws-{i}"), None).map(|ws| ws.index)
            })
        })
        .collect();

    let indices: Vec<u32> = handles
        .into_iter()
        .map(|h| h.join().expect("thread panicked").expect("allocate failed"))
        .collect();
    let unique: HashSet<u32> = indices.iter().copied().collect();
    assert_eq!(unique.len(), 12, "duplicate index in {indices:?}");
    assert_eq!(unique, (0..12).collect::<HashSet<u32>>());
}

#[test]
fn ubuntu_at_index_one_resolves_expected_addresses() {
    let temp = TempDir::new().unwrap();
    let config = GlobalConfig::default();
    let registry = WorkspaceRegistry::with_state_dir(temp.path().to_path_buf(), &config);

    registry.allocate("bootstrap", None).unwrap();
    let ubuntu = registry.allocate("ubuntu", None).unwrap();
    assert_eq!(ubuntu.index, 1);

    let cp1 = resolve(&ubuntu, Role::ControlPlane, 1, &config.network).unwrap();
    let w1 = resolve(&ubuntu, Role::Worker, 1, &config.network).unwrap();
    let w2 = resolve(&ubuntu, Role::Worker, 2, &config.network).unwrap();
    assert_eq!(cp1.ip, Ipv4Addr::new(10, 10, 10, 110));
    assert_eq!(w1.ip, Ipv4Addr::new(10, 10, 10, 115));
    assert_eq!(w2.ip, Ipv4Addr::new(10, 10, 10, 116));
}

#[tokio::test]
async fn clone_then_delete_leaves_template_and_free_set_unchanged() {
    let temp = TempDir::new().unwrap();
    let config = GlobalConfig::default();
    let registry = WorkspaceRegistry::with_state_dir(temp.path().to_path_buf(), &config);

    registry.allocate("debian", None).unwrap();
    registry.allocate("scratch", None).unwrap();
    registry.allocate("ubuntu", None).unwrap();
    registry
        .set_overlay("ubuntu", "template_vm_id", Some("9420"))
        .unwrap();
    registry
        .release("scratch", &NothingLive, false)
        .await
        .unwrap();

    let ubuntu_before = serde_json::to_vec(&registry.resolve("ubuntu").unwrap()).unwrap();
    let free_before = registry.free_indices().unwrap();

    let test = registry.clone_from("ubuntu", "test", Some('t')).unwrap();
    assert_eq!(test.index, 1);
    assert_eq!(test.overlay_value("template_vm_id"), Some("9420"));
    registry.release("test", &NothingLive, false).await.unwrap();

    let ubuntu_after = serde_json::to_vec(&registry.resolve("ubuntu").unwrap()).unwrap();
    assert_eq!(ubuntu_before, ubuntu_after);
    assert_eq!(registry.free_indices().unwrap(), free_before);
}

#[test]
fn registry_survives_reopen() {
    let temp = TempDir::new().unwrap();
    let config = GlobalConfig::default();
    {
        let registry = WorkspaceRegistry::with_state_dir(temp.path().to_path_buf(), &config);
        registry.allocate("alpha", Some('q')).unwrap();
        registry.issue_node("alpha", Role::ControlPlane).unwrap();
    }
    let reopened = WorkspaceRegistry::with_state_dir(temp.path().to_path_buf(), &config);
    let alpha = reopened.resolve("alpha").unwrap();
    assert_eq!(alpha.release_letter, 'q');
    assert_eq!(alpha.active_nodes(), vec![(Role::ControlPlane, 1)]);
}

fn with_block_size(size: u32) -> GlobalConfig {
    let mut config = GlobalConfig::default();
    config.network.ip_block_size = size;
    config
}

fn assert_blocks_disjoint(registry: &WorkspaceRegistry) {
    let network = registry.network();
    let live = registry.list().unwrap();
    for (i, a) in live.iter().enumerate() {
        for b in &live[i + 1..] {
            let (block_a, block_b) = (
                workspace_block(a, network).unwrap(),
                workspace_block(b, network).unwrap(),
            );
            assert!(
                !block_a.overlaps_with(&block_b),
                "{} ({block_a}) overlaps {} ({block_b})",
                a.name,
                b.name
            );
        }
    }
}

#[tokio::test]
async fn larger_block_size_skips_freed_index_that_would_overlap() {
    let temp = TempDir::new().unwrap();
    let registry = WorkspaceRegistry::with_state_dir(temp.path().to_path_buf(), &with_block_size(10));
    for name in ["alpha", "beta", "gamma"] {
        registry.allocate(name, None).unwrap();
    }
    registry.release("beta", &NothingLive, false).await.unwrap();

    let resized = WorkspaceRegistry::with_state_dir(temp.path().to_path_buf(), &with_block_size(20));
    let delta = resized.allocate("delta", None).unwrap();
    // Index 1 at size 20 would cover .120-.139, which gamma already holds.
    assert_eq!(delta.index, 2);
    assert_eq!(delta.ip_block_size, 20);

    let gamma = resized.resolve("gamma").unwrap();
    let network = resized.network();
    let gamma_cp1 = resolve(&gamma, Role::ControlPlane, 1, network).unwrap();
    let delta_cp1 = resolve(&delta, Role::ControlPlane, 1, network).unwrap();
    assert_eq!(gamma_cp1.ip, Ipv4Addr::new(10, 10, 10, 120));
    assert_eq!(delta_cp1.ip, Ipv4Addr::new(10, 10, 10, 140));
    assert_blocks_disjoint(&resized);
}

#[test]
fn smaller_block_size_packs_after_larger_blocks() {
    let temp = TempDir::new().unwrap();
    let large = WorkspaceRegistry::with_state_dir(temp.path().to_path_buf(), &with_block_size(20));
    large.allocate("alpha", None).unwrap();

    let small = WorkspaceRegistry::with_state_dir(temp.path().to_path_buf(), &with_block_size(10));
    let beta = small.allocate("beta", None).unwrap();
    let gamma = small.allocate("gamma", None).unwrap();
    // alpha holds .100-.119, so indices 0 and 1 at size 10 are taken.
    assert_eq!(beta.index, 2);
    assert_eq!(gamma.index, 3);
    assert_blocks_disjoint(&small);
}

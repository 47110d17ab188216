//! Workspace registry for cpc.
//!
//! A workspace is one independently addressable cluster deployment. The
//! registry maps each workspace name to a stable index, which in turn selects
//! the workspace's IPv4 block. State is an append-only JSON-lines log under
//! the state directory, replayed into an in-memory index while an advisory
//! file lock is held.

pub mod address;
pub mod context;
pub mod events;
pub mod inspector;
pub mod name;
pub mod registry;
pub mod workspace;

mod lock;

pub use address::{
    block_at, check_reserved, resolve, resolve_active, workspace_block, NodeAddress, Role,
};
pub use context::ContextFile;
pub use inspector::ResourceInspector;
pub use registry::WorkspaceRegistry;
pub use workspace::{NodeSet, RoleOrdinals, Workspace};

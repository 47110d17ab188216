//! Global configuration for cpc.
//!
//! The configuration lives in `~/.config/cpc/config.yaml` (or `CPC_CONFIG`)
//! and holds everything that applies across workspaces: the network plan
//! used for address allocation, per-kind timeouts and retry policies, and the
//! locations of the external engines.

pub mod global_config;
pub mod loader;
pub mod network;

#[cfg(test)]
mod global_config_tests;

pub use global_config::{
    EngineSettings, GlobalConfig, NetworkSettings, PathSettings, RetrySettings, RetryTable,
    SecretsSettings, TimeoutSettings,
};
pub use network::IpRange;

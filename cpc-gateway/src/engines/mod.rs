//! Engines for the three operation kinds.

mod ansible;
mod ssh;
mod tofu;

use std::sync::Arc;

use cpc_config::GlobalConfig;

pub use ansible::AnsibleEngine;
pub use ssh::SshEngine;
pub use tofu::{TofuEngine, OUTPUT_ACTION, TOFU_ACTIONS};

use crate::engine::EngineSet;

/// The production engine set for `config`.
pub fn from_config(config: &GlobalConfig) -> EngineSet {
    EngineSet::new()
        .with(Arc::new(TofuEngine::from_settings(&config.engines)))
        .with(Arc::new(AnsibleEngine::from_settings(&config.engines)))
        .with(Arc::new(SshEngine::from_settings(&config.engines)))
}

/// Child environment name for a key: non-alphanumerics become `_`.
pub(crate) fn sanitize_key(key: &str) -> String {
    key.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

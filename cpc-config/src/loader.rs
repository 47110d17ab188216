//! Locating and parsing `config.yaml`.
//!
//! Resolution order:
//!
//! 1. An explicit path (the CLI `--config` flag). It must exist.
//! 2. `CPC_CONFIG`, then `~/.config/cpc/config.yaml`. A missing file here
//!    means "use defaults".
//!
//! The loaded configuration is validated before it is returned.

use std::fs;
use std::path::Path;

use cpc_core::{user_paths, CpcError, Result};
use tracing::debug;

use crate::global_config::GlobalConfig;

/// Load the global configuration.
pub fn load(explicit: Option<&Path>) -> Result<GlobalConfig> {
    if let Some(path) = explicit {
        if !path.exists() {
            return Err(CpcError::config_with_hint(
                format!("Configuration file not found: {}", path.display()),
                "Check the path passed to --config",
            ));
        }
        return load_file(path);
    }

    let default_path = user_paths::global_config_path()?;
    if default_path.exists() {
        load_file(&default_path)
    } else {
        debug!(
            "No config at {}, using built-in defaults",
            default_path.display()
        );
        let config = GlobalConfig::default();
        config.validate()?;
        Ok(config)
    }
}

/// Parse and validate a configuration file.
pub fn load_file(path: &Path) -> Result<GlobalConfig> {
    debug!("Loading config from: {}", path.display());
    let content = fs::read_to_string(path)?;
    parse(&content).map_err(|err| match err {
        CpcError::Config { message, hint } => CpcError::Config {
            message: format!("{}: {message}", path.display()),
            hint,
        },
        other => other,
    })
}

/// Parse configuration text. Empty input yields the defaults.
pub fn parse(content: &str) -> Result<GlobalConfig> {
    let config: GlobalConfig = if content.trim().is_empty() {
        GlobalConfig::default()
    } else {
        serde_yaml_ng::from_str(content).map_err(|err| {
            CpcError::config_with_hint(
                format!("Invalid configuration: {err}"),
                "See `cpc config show` output for the expected layout",
            )
        })?
    };
    config.validate()?;
    Ok(config)
}

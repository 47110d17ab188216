//! Per-user locations for cpc configuration and state.

use std::env;
use std::path::PathBuf;

use crate::error::{CpcError, Result};

/// `~/.config/cpc`
pub fn config_dir() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|dir| dir.join("cpc"))
        .ok_or_else(|| CpcError::config("Could not determine the user configuration directory"))
}

/// Default global configuration file, overridable through `CPC_CONFIG`.
pub fn global_config_path() -> Result<PathBuf> {
    if let Ok(path) = env::var("CPC_CONFIG") {
        return Ok(PathBuf::from(path));
    }
    Ok(config_dir()?.join("config.yaml"))
}

/// State directory holding the registry log, workflow ledger and context file.
///
/// `CPC_STATE_DIR` wins over the platform data directory.
pub fn state_dir() -> Result<PathBuf> {
    if let Ok(dir) = env::var("CPC_STATE_DIR") {
        return Ok(PathBuf::from(dir));
    }
    dirs::data_local_dir()
        .map(|dir| dir.join("cpc"))
        .ok_or_else(|| CpcError::config("Could not determine the user data directory"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_state_dir_env_override() {
        let temp = tempfile::tempdir().expect("tempdir");
        env::set_var("CPC_STATE_DIR", temp.path());
        let dir = state_dir().expect("state dir");
        env::remove_var("CPC_STATE_DIR");
        assert_eq!(dir, temp.path());
    }

    #[test]
    #[serial]
    fn test_global_config_env_override() {
        env::set_var("CPC_CONFIG", "/tmp/cpc-test-config.yaml");
        let path = global_config_path().expect("config path");
        env::remove_var("CPC_CONFIG");
        assert_eq!(path, PathBuf::from("/tmp/cpc-test-config.yaml"));
    }
}

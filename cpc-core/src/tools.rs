//! Checks for the external binaries cpc shells out to.

use std::path::PathBuf;

use tracing::debug;
use which::which;

use crate::error::{CpcError, Result};

/// Resolve a required tool, failing with a Config error carrying `install_hint`.
pub fn require_tool(tool_name: &str, install_hint: &str) -> Result<PathBuf> {
    match which(tool_name) {
        Ok(path) => {
            debug!(tool = tool_name, path = %path.display(), "Found required tool");
            Ok(path)
        }
        Err(_) => Err(CpcError::config_with_hint(
            format!("Required command '{tool_name}' not found"),
            install_hint,
        )),
    }
}

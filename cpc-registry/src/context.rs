//! The active workspace context (`cpc ctx`).

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use cpc_core::Result;
use tracing::debug;

const CONTEXT_FILE: &str = "current_workspace";

#[derive(Debug, Clone)]
pub struct ContextFile {
    path: PathBuf,
}

impl ContextFile {
    pub fn in_state_dir(state_dir: &Path) -> Self {
        Self {
            path: state_dir.join(CONTEXT_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Name of the active workspace, if one is set.
    pub fn get(&self) -> Result<Option<String>> {
        match fs::read_to_string(&self.path) {
            Ok(content) => {
                let name = content.trim();
                Ok((!name.is_empty()).then(|| name.to_string()))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn set(&self, name: &str) -> Result<()> {
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir)?;
        let mut temp = tempfile::Builder::new()
            .prefix(".ctx-")
            .suffix(".tmp")
            .tempfile_in(dir)?;
        writeln!(temp, "{name}")?;
        temp.persist(&self.path).map_err(|e| e.error)?;
        debug!(workspace = name, "Switched active workspace");
        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

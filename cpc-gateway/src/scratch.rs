//! Per-invocation scratch directories.

use std::fs;
use std::path::{Path, PathBuf};

use cpc_core::Result;
use serde::Serialize;
use tempfile::TempDir;

/// Temporary directory for files one engine call generates. Removed when
/// dropped, whether the call succeeded or not.
#[derive(Debug)]
pub struct Scratch {
    dir: TempDir,
}

impl Scratch {
    pub fn new(label: &str) -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix(&format!("cpc-{label}-"))
            .tempdir()?;
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn write_json<T: Serialize + ?Sized>(dir: &Path, name: &str, value: &T) -> Result<PathBuf> {
        let path = dir.join(name);
        fs::write(&path, serde_json::to_vec_pretty(value)?)?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_removed_on_drop() {
        let scratch = Scratch::new("test").unwrap();
        let path = scratch.path().to_path_buf();
        let file = Scratch::write_json(&path, "inventory.json", &serde_json::json!({"a": 1})).unwrap();
        assert!(file.exists());
        drop(scratch);
        assert!(!path.exists());
    }
}

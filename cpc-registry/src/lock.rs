//! Advisory lock on the registry lock file.

use std::fs::{self, File, OpenOptions};
use std::path::Path;
use std::time::{Duration, Instant};

use cpc_core::{CpcError, Result};
use fs2::FileExt;

const RETRY_DELAY: Duration = Duration::from_millis(10);
const LOCK_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LockMode {
    Shared,
    Exclusive,
}

/// Open `path` and lock it, polling until `LOCK_TIMEOUT`.
///
/// The lock is released when the returned file is unlocked or dropped.
pub(crate) fn acquire(path: &Path, mode: LockMode) -> Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .read(true)
        .write(true)
        .open(path)?;

    let start = Instant::now();
    let mut attempts = 0u32;
    loop {
        let result = match mode {
            LockMode::Shared => FileExt::try_lock_shared(&file),
            LockMode::Exclusive => FileExt::try_lock_exclusive(&file),
        };
        match result {
            Ok(()) => return Ok(file),
            Err(e) => {
                attempts += 1;
                if start.elapsed() > LOCK_TIMEOUT {
                    return Err(CpcError::Lock {
                        path: path.to_path_buf(),
                        message: format!("timed out after {attempts} attempts: {e}"),
                    });
                }
                std::thread::sleep(RETRY_DELAY);
            }
        }
    }
}

pub(crate) fn release(file: &File) {
    let _ = FileExt::unlock(file);
}

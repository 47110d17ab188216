//! Registry log format.
//!
//! One JSON object per line. Replaying the lines in order rebuilds the
//! registry index; a trailing line without a newline is a torn write and is
//! ignored.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use chrono::{DateTime, Utc};
use cpc_config::{IpRange, NetworkSettings};
use cpc_core::{CpcError, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::address::{block_at, workspace_block, Role};
use crate::workspace::Workspace;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RegistryEvent {
    Allocated { workspace: Workspace },
    Released { name: String },
    NodeIssued { name: String, role: Role, ordinal: u32 },
    NodeRetired { name: String, role: Role, ordinal: u32 },
    OverlaySet {
        name: String,
        key: String,
        value: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: RegistryEvent,
}

impl LogEntry {
    pub fn now(event: RegistryEvent) -> Self {
        Self {
            at: Utc::now(),
            event,
        }
    }

    pub(crate) fn to_line(&self) -> Result<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

/// Live workspaces keyed by name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegistryIndex {
    workspaces: BTreeMap<String, Workspace>,
}

impl RegistryIndex {
    pub fn get(&self, name: &str) -> Option<&Workspace> {
        self.workspaces.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.workspaces.contains_key(name)
    }

    pub fn workspaces(&self) -> impl Iterator<Item = &Workspace> {
        self.workspaces.values()
    }

    pub fn len(&self) -> usize {
        self.workspaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workspaces.is_empty()
    }

    /// Smallest index whose block of `block_size` addresses overlaps no live
    /// block. Live workspaces keep the block size they were created with.
    pub fn first_free_index(&self, block_size: u32, network: &NetworkSettings) -> Result<u32> {
        let taken = self
            .workspaces
            .values()
            .map(|ws| workspace_block(ws, network))
            .collect::<Result<Vec<IpRange>>>()?;
        for index in 0..=u32::MAX {
            let candidate = block_at(index, block_size, network)?;
            if !taken.iter().any(|block| block.overlaps_with(&candidate)) {
                return Ok(index);
            }
        }
        Err(CpcError::config("No free address block left"))
    }

    pub fn letter_holder(&self, letter: char, except: &str) -> Option<&str> {
        self.workspaces
            .values()
            .find(|ws| ws.release_letter == letter && ws.name != except)
            .map(|ws| ws.name.as_str())
    }

    /// Apply one event. Events naming an unknown workspace are skipped.
    pub fn apply(&mut self, event: &RegistryEvent) {
        match event {
            RegistryEvent::Allocated { workspace } => {
                self.workspaces
                    .insert(workspace.name.clone(), workspace.clone());
            }
            RegistryEvent::Released { name } => {
                self.workspaces.remove(name);
            }
            RegistryEvent::NodeIssued {
                name,
                role,
                ordinal,
            } => match self.workspaces.get_mut(name) {
                Some(ws) => ws.nodes.for_role_mut(*role).issue(*ordinal),
                None => warn!(workspace = %name, "Skipping node event for unknown workspace"),
            },
            RegistryEvent::NodeRetired {
                name,
                role,
                ordinal,
            } => match self.workspaces.get_mut(name) {
                Some(ws) => {
                    ws.nodes.for_role_mut(*role).retire(*ordinal);
                }
                None => warn!(workspace = %name, "Skipping node event for unknown workspace"),
            },
            RegistryEvent::OverlaySet { name, key, value } => match self.workspaces.get_mut(name) {
                Some(ws) => match value {
                    Some(value) => {
                        ws.overlay.insert(key.clone(), value.clone());
                    }
                    None => {
                        ws.overlay.remove(key);
                    }
                },
                None => warn!(workspace = %name, "Skipping overlay event for unknown workspace"),
            },
        }
    }
}

/// Result of replaying the log file.
#[derive(Debug, Default)]
pub struct Replay {
    pub index: RegistryIndex,
    /// Byte length of the well-formed prefix
    pub valid_len: u64,
    /// Whether a torn trailing line follows the valid prefix
    pub torn: bool,
    pub entries: usize,
}

pub fn replay(path: &Path) -> Result<Replay> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Replay::default()),
        Err(e) => return Err(e.into()),
    };
    replay_str(&content, path)
}

pub(crate) fn replay_str(content: &str, path: &Path) -> Result<Replay> {
    let mut replay = Replay::default();
    let mut offset = 0usize;

    for (line_no, line) in content.split_inclusive('\n').enumerate() {
        let complete = line.ends_with('\n');
        let trimmed = line.trim();
        if trimmed.is_empty() {
            offset += line.len();
            continue;
        }

        if !complete {
            warn!(
                "Ignoring torn trailing entry in {} (line {})",
                path.display(),
                line_no + 1
            );
            replay.torn = true;
            break;
        }

        let entry: LogEntry = serde_json::from_str(trimmed).map_err(|e| {
            CpcError::Serialization(format!(
                "Corrupt registry log {} at line {}: {e}",
                path.display(),
                line_no + 1
            ))
        })?;
        replay.index.apply(&entry.event);
        replay.entries += 1;
        offset += line.len();
    }

    replay.valid_len = offset as u64;
    Ok(replay)
}

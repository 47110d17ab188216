//! Workspace registry backed by an append-only log.
//!
//! Every mutation takes the exclusive registry lock, replays the log into a
//! fresh index, computes its events against that index, appends them with a
//! single write and fsyncs before releasing the lock. Readers take a shared
//! lock and replay. Because allocation decisions are made on the index read
//! under the same lock that guards the append, concurrent allocations from
//! several processes can never hand out the same index.

use std::collections::BTreeSet;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use cpc_config::{GlobalConfig, NetworkSettings};
use cpc_core::{CpcError, Result};
use tracing::{debug, info, warn};

use crate::address::Role;
use crate::context::ContextFile;
use crate::events::{self, LogEntry, RegistryEvent, RegistryIndex};
use crate::inspector::ResourceInspector;
use crate::lock::{self, LockMode};
use crate::name::{derive_release_letter, normalize_release_letter, validate_workspace_name};
use crate::workspace::{NodeSet, Workspace};

const LOG_FILE: &str = "registry.log";
const LOCK_FILE: &str = ".registry.lock";

#[derive(Debug, Clone)]
pub struct WorkspaceRegistry {
    state_dir: PathBuf,
    log_path: PathBuf,
    lock_path: PathBuf,
    network: NetworkSettings,
    base_workspaces: Vec<String>,
    context: ContextFile,
}

impl WorkspaceRegistry {
    /// Registry stored in the configured state directory.
    pub fn new(config: &GlobalConfig) -> Result<Self> {
        Ok(Self::with_state_dir(config.state_dir()?, config))
    }

    pub fn with_state_dir(state_dir: PathBuf, config: &GlobalConfig) -> Self {
        let log_path = state_dir.join(LOG_FILE);
        let lock_path = state_dir.join(LOCK_FILE);
        let context = ContextFile::in_state_dir(&state_dir);
        Self {
            state_dir,
            log_path,
            lock_path,
            network: config.network.clone(),
            base_workspaces: config.base_workspaces.clone(),
            context,
        }
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    pub fn network(&self) -> &NetworkSettings {
        &self.network
    }

    pub fn context(&self) -> &ContextFile {
        &self.context
    }

    pub fn is_protected(&self, name: &str) -> bool {
        self.base_workspaces.iter().any(|base| base == name)
    }

    /// Register a fresh workspace at the smallest free index.
    pub fn allocate(&self, name: &str, requested_letter: Option<char>) -> Result<Workspace> {
        self.create(name, requested_letter, None)
    }

    /// Register `name` as a copy of `template`'s overlay. The template is
    /// left untouched.
    pub fn clone_from(
        &self,
        template: &str,
        name: &str,
        requested_letter: Option<char>,
    ) -> Result<Workspace> {
        self.create(name, requested_letter, Some(template))
    }

    fn create(
        &self,
        name: &str,
        requested_letter: Option<char>,
        template: Option<&str>,
    ) -> Result<Workspace> {
        validate_workspace_name(name)?;
        self.network.validate_block_size(self.network.ip_block_size)?;
        let release_letter = match requested_letter {
            Some(letter) => normalize_release_letter(letter)?,
            None => derive_release_letter(name)?,
        };

        let workspace = self.atomic_update(|index| {
            if index.contains(name) {
                return Err(CpcError::NameConflict(name.to_string()));
            }
            let overlay = match template {
                Some(template) => index
                    .get(template)
                    .ok_or_else(|| CpcError::not_found("Workspace", template))?
                    .overlay
                    .clone(),
                None => Default::default(),
            };
            if let Some(holder) = index.letter_holder(release_letter, name) {
                warn!(
                    workspace = name,
                    "Release letter '{release_letter}' is already used by '{holder}'; hostnames will repeat across workspaces"
                );
            }

            let block_size = self.network.ip_block_size;
            let workspace = Workspace {
                name: name.to_string(),
                index: index.first_free_index(block_size, &self.network)?,
                release_letter,
                ip_block_size: block_size,
                overlay,
                nodes: NodeSet::default(),
                cloned_from: template.map(str::to_string),
                created_at: Utc::now(),
            };
            let event = RegistryEvent::Allocated {
                workspace: workspace.clone(),
            };
            Ok((workspace, vec![event]))
        })?;

        info!(
            workspace = %workspace.name,
            index = workspace.index,
            letter = %workspace.release_letter,
            "Allocated workspace"
        );
        Ok(workspace)
    }

    pub fn resolve(&self, name: &str) -> Result<Workspace> {
        self.read_index()?
            .get(name)
            .cloned()
            .ok_or_else(|| CpcError::not_found("Workspace", name))
    }

    /// Live workspaces ordered by index.
    pub fn list(&self) -> Result<Vec<Workspace>> {
        let mut workspaces: Vec<Workspace> = self.read_index()?.workspaces().cloned().collect();
        workspaces.sort_by_key(|ws| ws.index);
        Ok(workspaces)
    }

    /// Indices not held by a live workspace, below the highest live index.
    pub fn free_indices(&self) -> Result<BTreeSet<u32>> {
        let used: BTreeSet<u32> = self.read_index()?.workspaces().map(|ws| ws.index).collect();
        let max = used.iter().next_back().copied().unwrap_or(0);
        Ok((0..max).filter(|i| !used.contains(i)).collect())
    }

    /// Remove a workspace and free its index.
    ///
    /// Base workspaces are refused. When the inspector reports live
    /// resources the call fails unless `force` is set, in which case the
    /// resources are torn down before the index is released.
    pub async fn release(
        &self,
        name: &str,
        inspector: &dyn ResourceInspector,
        force: bool,
    ) -> Result<Workspace> {
        if self.is_protected(name) {
            return Err(CpcError::Protected(name.to_string()));
        }
        let workspace = self.resolve(name)?;

        // Not under the registry lock: engine calls can take minutes.
        let live = match inspector.live_resources(&workspace).await {
            Ok(live) => live,
            Err(e) if force => {
                warn!(workspace = name, "Could not inspect resources, tearing down anyway: {e}");
                vec![format!("unknown resources ({e})")]
            }
            Err(e) => return Err(e),
        };
        if !live.is_empty() {
            if !force {
                return Err(CpcError::HasLiveResources {
                    workspace: name.to_string(),
                    resources: live,
                });
            }
            warn!(
                workspace = name,
                resources = live.len(),
                "Force delete: tearing down live resources"
            );
            inspector.teardown(&workspace).await?;
        }

        let released = self.atomic_update(|index| {
            let current = index
                .get(name)
                .cloned()
                .ok_or_else(|| CpcError::not_found("Workspace", name))?;
            let event = RegistryEvent::Released {
                name: name.to_string(),
            };
            Ok((current, vec![event]))
        })?;

        if self.context.get()?.as_deref() == Some(name) {
            self.context.clear()?;
            info!(workspace = name, "Cleared active context for deleted workspace");
        }
        info!(workspace = name, index = released.index, "Released workspace");
        Ok(released)
    }

    /// Hand out the next ordinal for `role`. Retired ordinals are never
    /// reissued.
    pub fn issue_node(&self, name: &str, role: Role) -> Result<u32> {
        let slots = role.slots(&self.network);
        let ordinal = self.atomic_update(|index| {
            let workspace = index
                .get(name)
                .ok_or_else(|| CpcError::not_found("Workspace", name))?;
            let ordinal = workspace.ordinals(role).next;
            if ordinal > slots {
                return Err(CpcError::input(format!(
                    "Workspace '{name}' has no {role} ordinals left ({slots} slots, retired ordinals are not reused)"
                )));
            }
            let event = RegistryEvent::NodeIssued {
                name: name.to_string(),
                role,
                ordinal,
            };
            Ok((ordinal, vec![event]))
        })?;
        debug!(workspace = name, %role, ordinal, "Issued node ordinal");
        Ok(ordinal)
    }

    pub fn retire_node(&self, name: &str, role: Role, ordinal: u32) -> Result<()> {
        self.atomic_update(|index| {
            let workspace = index
                .get(name)
                .ok_or_else(|| CpcError::not_found("Workspace", name))?;
            if !workspace.ordinals(role).active.contains(&ordinal) {
                return Err(CpcError::not_found(
                    "Node",
                    format!("{name}/{role}/{ordinal}"),
                ));
            }
            let event = RegistryEvent::NodeRetired {
                name: name.to_string(),
                role,
                ordinal,
            };
            Ok(((), vec![event]))
        })?;
        debug!(workspace = name, %role, ordinal, "Retired node ordinal");
        Ok(())
    }

    /// Set (or with `None`, remove) one overlay key.
    pub fn set_overlay(&self, name: &str, key: &str, value: Option<&str>) -> Result<Workspace> {
        if key.trim().is_empty() {
            return Err(CpcError::input("Overlay key cannot be empty"));
        }
        self.atomic_update(|index| {
            let mut workspace = index
                .get(name)
                .cloned()
                .ok_or_else(|| CpcError::not_found("Workspace", name))?;
            match value {
                Some(value) => {
                    workspace.overlay.insert(key.to_string(), value.to_string());
                }
                None => {
                    workspace.overlay.remove(key);
                }
            }
            let event = RegistryEvent::OverlaySet {
                name: name.to_string(),
                key: key.to_string(),
                value: value.map(str::to_string),
            };
            Ok((workspace, vec![event]))
        })
    }

    /// Rewrite the log as one `allocated` entry per live workspace.
    ///
    /// Returns the number of entries before and after.
    pub fn compact(&self) -> Result<(usize, usize)> {
        let lock_file = lock::acquire(&self.lock_path, LockMode::Exclusive)?;
        let _guard = scopeguard::guard((), |_| lock::release(&lock_file));

        let replay = events::replay(&self.log_path)?;
        let mut workspaces: Vec<&Workspace> = replay.index.workspaces().collect();
        workspaces.sort_by_key(|ws| ws.index);

        let mut content = String::new();
        for workspace in &workspaces {
            let entry = LogEntry::now(RegistryEvent::Allocated {
                workspace: (*workspace).clone(),
            });
            content.push_str(&entry.to_line()?);
        }

        let mut temp = tempfile::Builder::new()
            .prefix(".registry-")
            .suffix(".tmp")
            .tempfile_in(&self.state_dir)?;
        temp.write_all(content.as_bytes())?;
        temp.as_file().sync_all()?;
        temp.persist(&self.log_path).map_err(|e| e.error)?;

        info!(
            before = replay.entries,
            after = workspaces.len(),
            "Compacted registry log"
        );
        Ok((replay.entries, workspaces.len()))
    }

    fn read_index(&self) -> Result<RegistryIndex> {
        let lock_file = lock::acquire(&self.lock_path, LockMode::Shared)?;
        let _guard = scopeguard::guard((), |_| lock::release(&lock_file));
        Ok(events::replay(&self.log_path)?.index)
    }

    /// Read-compute-append under the exclusive lock.
    ///
    /// `update_fn` sees the index as of the last durable entry and returns the
    /// events to append. Nothing is written when it fails.
    fn atomic_update<T, F>(&self, update_fn: F) -> Result<T>
    where
        F: FnOnce(&RegistryIndex) -> Result<(T, Vec<RegistryEvent>)>,
    {
        let lock_file = lock::acquire(&self.lock_path, LockMode::Exclusive)?;
        let _guard = scopeguard::guard((), |_| lock::release(&lock_file));

        let replay = events::replay(&self.log_path)?;
        let (value, new_events) = update_fn(&replay.index)?;
        if new_events.is_empty() {
            return Ok(value);
        }

        let mut content = String::new();
        for event in new_events {
            content.push_str(&LogEntry::now(event).to_line()?);
        }

        let mut log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)?;
        if replay.torn {
            warn!(
                "Truncating torn entry at byte {} of {}",
                replay.valid_len,
                self.log_path.display()
            );
            log.set_len(replay.valid_len)?;
        }
        log.write_all(content.as_bytes())?;
        log.sync_data()?;
        Ok(value)
    }
}

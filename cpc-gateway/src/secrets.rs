//! Secret material for engine calls.
//!
//! Secrets are decrypted into memory once per workflow and handed to child
//! processes through their environment. They are never serialized.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use cpc_config::SecretsSettings;
use cpc_core::{CpcError, Result};
use duct::cmd;
use serde_json::Value;
use tracing::{debug, info};

/// Decrypted key/value secrets. `Debug` shows key names only.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Secrets {
    values: BTreeMap<String, String>,
}

impl fmt::Debug for Secrets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keys: Vec<&str> = self.values.keys().map(String::as_str).collect();
        f.debug_struct("Secrets")
            .field("keys", &keys)
            .field("values", &"<redacted>")
            .finish()
    }
}

impl Secrets {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_map(values: BTreeMap<String, String>) -> Self {
        Self { values }
    }

    /// Flatten a decrypted JSON document. Nested keys are joined with `_`.
    pub fn from_json(document: &Value) -> Result<Self> {
        let Value::Object(map) = document else {
            return Err(CpcError::config(
                "Decrypted secrets must be a mapping of names to values",
            ));
        };
        let mut values = BTreeMap::new();
        for (key, value) in map {
            flatten(key, value, &mut values);
        }
        Ok(Self { values })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

fn flatten(prefix: &str, value: &Value, out: &mut BTreeMap<String, String>) {
    match value {
        Value::Object(map) => {
            for (key, nested) in map {
                flatten(&format!("{prefix}_{key}"), nested, out);
            }
        }
        Value::String(s) => {
            out.insert(prefix.to_string(), s.clone());
        }
        Value::Null => {}
        other => {
            out.insert(prefix.to_string(), other.to_string());
        }
    }
}

/// Source of decrypted secrets.
pub trait SecretsProvider: Send + Sync {
    fn load(&self) -> Result<Secrets>;
}

/// For setups without a secrets file.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSecrets;

impl SecretsProvider for NoSecrets {
    fn load(&self) -> Result<Secrets> {
        Ok(Secrets::empty())
    }
}

/// Decrypts a SOPS file with the `sops` binary.
#[derive(Debug, Clone)]
pub struct SopsSecrets {
    binary: String,
    file: PathBuf,
}

impl SopsSecrets {
    pub fn new(binary: impl Into<String>, file: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            file: file.into(),
        }
    }

    /// `None` when no secrets file is configured.
    pub fn from_settings(settings: &SecretsSettings) -> Option<Self> {
        settings
            .file
            .as_ref()
            .map(|file| Self::new(settings.sops_binary.clone(), file.clone()))
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }
}

impl SecretsProvider for SopsSecrets {
    fn load(&self) -> Result<Secrets> {
        if !self.file.exists() {
            return Err(CpcError::config_with_hint(
                format!("Secrets file not found: {}", self.file.display()),
                "Set secrets.file in config.yaml or create the encrypted file",
            ));
        }
        debug!(file = %self.file.display(), "Decrypting secrets");

        let output = cmd!(
            &self.binary,
            "-d",
            "--output-type",
            "json",
            &self.file
        )
        .stdout_capture()
        .stderr_capture()
        .unchecked()
        .run()
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => CpcError::config_with_hint(
                format!("Required command '{}' not found", self.binary),
                "Install sops to decrypt the secrets file",
            ),
            _ => CpcError::execution(format!("Failed to run {}: {e}", self.binary)),
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CpcError::config_with_hint(
                format!(
                    "Failed to decrypt {}: {}",
                    self.file.display(),
                    stderr.trim()
                ),
                "Check that your SOPS key is available (SOPS_AGE_KEY_FILE or GPG agent)",
            ));
        }

        let document: Value = serde_json::from_slice(&output.stdout)?;
        let secrets = Secrets::from_json(&document)?;
        info!(count = secrets.len(), "Loaded secrets");
        Ok(secrets)
    }
}

//! Error model shared by every cpc crate.
//!
//! `CpcError` is the typed error returned by library code. Every variant maps
//! onto one of four [`ErrorCategory`] values, which decide retry behaviour and
//! the process exit code. [`ErrorRecord`] is the serializable snapshot written
//! to the checkpoint ledger and to structured logs.

use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Coarse error classification driving retry and exit-code decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    /// Bad or missing settings. Never retried.
    Config,
    /// Bad caller arguments. Never retried.
    Input,
    /// External engine failure. Retryable.
    Execution,
    /// Deadline exceeded or cancelled. Retryable with a lower cap.
    Timeout,
}

impl ErrorCategory {
    /// Process exit code for a command that failed with this category.
    ///
    /// Values follow sysexits(3): EX_CONFIG, EX_USAGE, EX_SOFTWARE, EX_TEMPFAIL.
    pub fn exit_code(self) -> i32 {
        match self {
            ErrorCategory::Config => 78,
            ErrorCategory::Input => 64,
            ErrorCategory::Execution => 70,
            ErrorCategory::Timeout => 75,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCategory::Config => "config",
            ErrorCategory::Input => "input",
            ErrorCategory::Execution => "execution",
            ErrorCategory::Timeout => "timeout",
        }
    }
}

impl Display for ErrorCategory {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Display for Severity {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// Identifier threading one request through retry, timeout, checkpoint and
/// orchestrator logs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for CorrelationId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for CorrelationId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// One failed attempt recorded by the retry engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptFailure {
    pub attempt: u32,
    pub category: ErrorCategory,
    pub message: String,
    /// Backoff slept after this attempt, if another attempt followed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_ms: Option<u64>,
}

#[derive(Error, Debug)]
pub enum CpcError {
    #[error("Configuration error: {message}")]
    Config {
        message: String,
        hint: Option<String>,
    },

    #[error("Invalid input: {0}")]
    Input(String),

    #[error("Workspace '{0}' already exists")]
    NameConflict(String),

    #[error("{kind} '{name}' not found")]
    NotFound { kind: &'static str, name: String },

    #[error("Workspace '{workspace}' still has live resources: {}", .resources.join(", "))]
    HasLiveResources {
        workspace: String,
        resources: Vec<String>,
    },

    #[error("Workspace '{0}' is a protected base workspace")]
    Protected(String),

    #[error("Invalid step transition: {0}")]
    InvalidTransition(String),

    #[error("Command failed: {message}")]
    Execution {
        message: String,
        exit_code: Option<i32>,
        context: BTreeMap<String, String>,
    },

    #[error("Operation '{operation}' timed out after {}s", .after.as_secs())]
    Timeout { operation: String, after: Duration },

    #[error("Operation '{operation}' cancelled: {reason}")]
    Cancelled { operation: String, reason: String },

    #[error("Retries exhausted after {attempts} attempt(s): {last}")]
    RetriesExhausted {
        attempts: u32,
        last: Box<CpcError>,
        history: Vec<AttemptFailure>,
    },

    #[error("Failed to lock {}: {message}", .path.display())]
    Lock { path: PathBuf, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl CpcError {
    pub fn config(message: impl Into<String>) -> Self {
        CpcError::Config {
            message: message.into(),
            hint: None,
        }
    }

    pub fn config_with_hint(message: impl Into<String>, hint: impl Into<String>) -> Self {
        CpcError::Config {
            message: message.into(),
            hint: Some(hint.into()),
        }
    }

    pub fn input(message: impl Into<String>) -> Self {
        CpcError::Input(message.into())
    }

    pub fn execution(message: impl Into<String>) -> Self {
        CpcError::Execution {
            message: message.into(),
            exit_code: None,
            context: BTreeMap::new(),
        }
    }

    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        CpcError::NotFound {
            kind,
            name: name.into(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            CpcError::Config { .. } | CpcError::Serialization(_) => ErrorCategory::Config,
            CpcError::Input(_)
            | CpcError::NameConflict(_)
            | CpcError::NotFound { .. }
            | CpcError::HasLiveResources { .. }
            | CpcError::Protected(_)
            | CpcError::InvalidTransition(_) => ErrorCategory::Input,
            CpcError::Execution { .. } | CpcError::Lock { .. } | CpcError::Io(_) => {
                ErrorCategory::Execution
            }
            CpcError::Timeout { .. } | CpcError::Cancelled { .. } => ErrorCategory::Timeout,
            CpcError::RetriesExhausted { last, .. } => last.category(),
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            CpcError::Protected(_) | CpcError::NameConflict(_) => Severity::Low,
            CpcError::Input(_)
            | CpcError::NotFound { .. }
            | CpcError::InvalidTransition(_)
            | CpcError::Cancelled { .. } => Severity::Medium,
            CpcError::Config { .. }
            | CpcError::HasLiveResources { .. }
            | CpcError::Execution { .. }
            | CpcError::Timeout { .. }
            | CpcError::Lock { .. }
            | CpcError::Io(_) => Severity::High,
            CpcError::RetriesExhausted { .. } | CpcError::Serialization(_) => Severity::Critical,
        }
    }

    /// Remediation hint shown under the error message, when one exists.
    pub fn hint(&self) -> Option<String> {
        match self {
            CpcError::Config { hint, .. } => hint.clone(),
            CpcError::HasLiveResources { workspace, .. } => Some(format!(
                "Destroy the nodes first, or run: cpc workspace delete {workspace} --force"
            )),
            CpcError::Protected(_) => {
                Some("Base workspaces are templates; clone them instead of deleting".into())
            }
            CpcError::Lock { .. } => {
                Some("Another cpc process may be holding the lock; retry shortly".into())
            }
            CpcError::Timeout { .. } => {
                Some("Raise the matching value under `timeouts:` in config.yaml".into())
            }
            CpcError::RetriesExhausted { last, .. } => last.hint(),
            _ => None,
        }
    }

    /// Whether the error came from a shutdown request rather than a deadline.
    pub fn is_cancellation(&self) -> bool {
        match self {
            CpcError::Cancelled { .. } => true,
            CpcError::RetriesExhausted { last, .. } => last.is_cancellation(),
            _ => false,
        }
    }

    pub fn exit_code(&self) -> i32 {
        self.category().exit_code()
    }
}

impl From<serde_json::Error> for CpcError {
    fn from(err: serde_json::Error) -> Self {
        CpcError::Serialization(err.to_string())
    }
}

impl From<serde_yaml_ng::Error> for CpcError {
    fn from(err: serde_yaml_ng::Error) -> Self {
        CpcError::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CpcError>;

/// Serializable snapshot of an error, as persisted in the checkpoint ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub category: ErrorCategory,
    pub severity: Severity,
    pub correlation_id: CorrelationId,
    pub message: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub context: BTreeMap<String, String>,
}

impl ErrorRecord {
    pub fn from_error(err: &CpcError, correlation_id: &CorrelationId) -> Self {
        let mut context = BTreeMap::new();
        match err {
            CpcError::Execution {
                exit_code,
                context: extra,
                ..
            } => {
                if let Some(code) = exit_code {
                    context.insert("exit_code".to_string(), code.to_string());
                }
                context.extend(extra.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
            CpcError::Timeout { operation, after } => {
                context.insert("operation".to_string(), operation.clone());
                context.insert("timeout_secs".to_string(), after.as_secs().to_string());
            }
            CpcError::Cancelled { operation, reason } => {
                context.insert("operation".to_string(), operation.clone());
                context.insert("cancel_reason".to_string(), reason.clone());
            }
            CpcError::RetriesExhausted {
                attempts, history, ..
            } => {
                context.insert("retries".to_string(), "exhausted".to_string());
                context.insert("attempts".to_string(), attempts.to_string());
                for failure in history {
                    context.insert(
                        format!("attempt_{}", failure.attempt),
                        format!("{}: {}", failure.category, failure.message),
                    );
                }
            }
            _ => {}
        }
        if let Some(hint) = err.hint() {
            context.insert("hint".to_string(), hint);
        }

        Self {
            category: err.category(),
            severity: err.severity(),
            correlation_id: correlation_id.clone(),
            message: err.to_string(),
            context,
        }
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

impl Display for ErrorRecord {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}/{}] {} (correlation_id={})",
            self.category, self.severity, self.message, self.correlation_id
        )
    }
}

use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};

/// Class of external call. Selects the engine, the default timeout and the
/// retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Declarative-infrastructure apply/destroy/plan.
    Provision,
    /// Configuration-automation playbook run.
    Configure,
    /// Command over the remote shell.
    RemoteExec,
}

impl OperationKind {
    pub const ALL: [OperationKind; 3] = [
        OperationKind::Provision,
        OperationKind::Configure,
        OperationKind::RemoteExec,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            OperationKind::Provision => "provision",
            OperationKind::Configure => "configure",
            OperationKind::RemoteExec => "remote_exec",
        }
    }
}

impl Display for OperationKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

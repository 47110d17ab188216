// CLI argument parsing and definitions

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Clone, Parser)]
#[command(name = "cpc")]
#[command(about = "Cluster provisioning control: workspaces, node addresses and resumable workflows")]
#[command(version)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Path to a custom config.yaml
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Print machine-readable JSON instead of tables
    #[arg(long, global = true)]
    pub json: bool,

    /// Enable debug output
    #[arg(short, long, global = true)]
    pub debug: bool,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Create, clone, inspect and delete workspaces
    #[command(alias = "ws")]
    Workspace {
        #[command(subcommand)]
        command: WorkspaceSubcommand,
    },

    /// Show or switch the active workspace
    Ctx {
        /// Workspace to make active (omit to show the current one)
        name: Option<String>,
    },

    /// Add, remove, upgrade and list cluster nodes
    Node {
        #[command(subcommand)]
        command: NodeSubcommand,
    },

    /// Provision and initialize a cluster for a workspace
    Bootstrap {
        /// Workspace (defaults to the active one)
        #[arg(short, long)]
        workspace: Option<String>,

        /// Control-plane nodes to have before provisioning
        #[arg(long, default_value_t = 1)]
        control_planes: u32,

        /// Worker nodes to have before provisioning
        #[arg(long, default_value_t = 2)]
        workers: u32,

        /// Run even if a previous bootstrap succeeded
        #[arg(long)]
        force: bool,
    },

    /// Inspect, resume and roll back workflows
    #[command(alias = "wf")]
    Workflow {
        #[command(subcommand)]
        command: WorkflowSubcommand,
    },

    /// Print the Ansible inventory for a workspace
    Inventory {
        #[arg(short, long)]
        workspace: Option<String>,
    },

    /// Run an infrastructure subcommand (plan, apply, destroy)
    Tofu {
        /// Subcommand to run
        action: String,

        #[arg(short, long)]
        workspace: Option<String>,
    },

    /// Run a playbook against a workspace
    Playbook {
        /// Playbook file name under the playbooks directory
        playbook: String,

        #[arg(short, long)]
        workspace: Option<String>,

        /// Restrict the run to one node or group
        #[arg(long)]
        limit: Option<String>,

        /// Extra variables as key=value
        #[arg(short = 'e', long = "extra-var", value_parser = parse_key_value)]
        extra_vars: Vec<(String, String)>,
    },

    /// Run a command on a node over ssh
    Exec {
        /// Node hostname, e.g. cu1
        node: String,

        /// Command line to run
        #[arg(required = true, trailing_var_arg = true)]
        command: Vec<String>,

        #[arg(short, long)]
        workspace: Option<String>,
    },

    /// Inspect the global configuration
    Config {
        #[command(subcommand)]
        command: ConfigSubcommand,
    },
}

#[derive(Debug, Clone, Subcommand)]
pub enum WorkspaceSubcommand {
    /// Create an empty workspace
    Create {
        name: String,
        /// Release letter used in hostnames (defaults to the first letter)
        #[arg(long)]
        letter: Option<char>,
    },
    /// Create a workspace from a template, copying its overlay
    Clone {
        template: String,
        name: String,
        #[arg(long)]
        letter: Option<char>,
    },
    /// Delete a workspace and free its index
    Delete {
        name: String,
        /// Destroy live resources first
        #[arg(long)]
        force: bool,
    },
    /// List workspaces
    List,
    /// Show one workspace with its node addresses
    Show { name: Option<String> },
    /// Set or unset an overlay value
    Set {
        key: String,
        value: Option<String>,
        #[arg(short, long)]
        workspace: Option<String>,
        /// Remove the key
        #[arg(long, conflicts_with = "value")]
        unset: bool,
    },
    /// Rewrite the registry log as a snapshot
    Compact,
}

#[derive(Debug, Clone, Subcommand)]
pub enum NodeSubcommand {
    /// Provision and join a new node
    Add {
        /// control-plane or worker
        #[arg(long, default_value = "worker")]
        role: String,
        #[arg(short, long)]
        workspace: Option<String>,
    },
    /// Drain, reset and deprovision a node
    Remove {
        node: String,
        #[arg(short, long)]
        workspace: Option<String>,
    },
    /// Drain, upgrade and uncordon a node
    Upgrade {
        node: String,
        #[arg(short, long)]
        workspace: Option<String>,
        /// Target Kubernetes version, passed to the playbook
        #[arg(long)]
        version: Option<String>,
    },
    /// List active nodes with their addresses
    List {
        #[arg(short, long)]
        workspace: Option<String>,
    },
}

#[derive(Debug, Clone, Subcommand)]
pub enum WorkflowSubcommand {
    /// Re-run the pending and failed steps of a workflow
    Resume { id: String },
    /// Undo the completed steps of a workflow
    Rollback { id: String },
    /// Show a workflow's steps
    Status { id: String },
    /// List workflows
    List {
        #[arg(short, long)]
        workspace: Option<String>,
    },
}

#[derive(Debug, Clone, Subcommand)]
pub enum ConfigSubcommand {
    /// Print the configuration; sections left at their defaults are omitted
    Show,
    /// Print the configuration and state locations
    Paths,
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .filter(|(key, _)| !key.is_empty())
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .ok_or_else(|| format!("expected key=value, got '{raw}'"))
}

//! CLI integration tests. Every run gets its own state directory and config
//! file, so no external engine is ever invoked.

use std::fs;
use std::path::PathBuf;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

struct CliTestFixture {
    temp_dir: TempDir,
}

impl CliTestFixture {
    fn new() -> Self {
        Self {
            temp_dir: TempDir::new().unwrap(),
        }
    }

    fn with_config(content: &str) -> Self {
        let fixture = Self::new();
        fs::write(fixture.config_path(), content).unwrap();
        fixture
    }

    fn config_path(&self) -> PathBuf {
        self.temp_dir.path().join("config.yaml")
    }

    fn cpc(&self) -> Command {
        let mut cmd = Command::cargo_bin("cpc").unwrap();
        cmd.env("HOME", self.temp_dir.path())
            .env("CPC_CONFIG", self.config_path())
            .env("CPC_STATE_DIR", self.temp_dir.path().join("state"))
            .env("CPC_LOG_LEVEL", "warn")
            .env_remove("RUST_LOG")
            .env_remove("CPC_LOG_OUTPUT");
        cmd
    }

    fn run_ok(&self, args: &[&str]) -> String {
        let output = self.cpc().args(args).assert().success().get_output().clone();
        String::from_utf8(output.stdout).unwrap()
    }
}

#[test]
fn test_create_and_list_workspaces() {
    let fixture = CliTestFixture::new();
    fixture.run_ok(&["workspace", "create", "infra"]);
    fixture
        .cpc()
        .args(["ws", "create", "ubuntu"])
        .assert()
        .success()
        .stderr(predicate::str::contains("Created workspace 'ubuntu' (index 1"));

    let listed = fixture.run_ok(&["--json", "workspace", "list"]);
    let workspaces: serde_json::Value = serde_json::from_str(&listed).unwrap();
    let names: Vec<&str> = workspaces
        .as_array()
        .unwrap()
        .iter()
        .map(|w| w["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["infra", "ubuntu"]);
    assert_eq!(workspaces[1]["block"], "10.10.10.110-10.10.10.119");
}

#[test]
fn test_invalid_and_duplicate_names_exit_with_usage_code() {
    let fixture = CliTestFixture::new();
    fixture
        .cpc()
        .args(["workspace", "create", "bad_name"])
        .assert()
        .code(64);

    fixture.run_ok(&["workspace", "create", "ubuntu"]);
    fixture
        .cpc()
        .args(["workspace", "create", "ubuntu"])
        .assert()
        .code(64)
        .stderr(predicate::str::contains("already exists"));
}

#[test]
fn test_context_switching() {
    let fixture = CliTestFixture::new();
    fixture
        .cpc()
        .arg("ctx")
        .assert()
        .success()
        .stderr(predicate::str::contains("No active workspace"));

    fixture.run_ok(&["workspace", "create", "ubuntu"]);
    fixture.run_ok(&["ctx", "ubuntu"]);
    assert_eq!(fixture.run_ok(&["ctx"]).trim(), "ubuntu");

    fixture
        .cpc()
        .args(["ctx", "missing"])
        .assert()
        .code(64);
}

#[test]
fn test_commands_without_workspace_need_a_context() {
    let fixture = CliTestFixture::new();
    fixture
        .cpc()
        .args(["node", "list"])
        .assert()
        .code(64)
        .stderr(predicate::str::contains("No workspace selected"));
}

#[test]
fn test_base_workspace_cannot_be_deleted() {
    let fixture = CliTestFixture::new();
    fixture.run_ok(&["workspace", "create", "ubuntu"]);
    fixture
        .cpc()
        .args(["workspace", "delete", "ubuntu"])
        .assert()
        .code(64)
        .stderr(predicate::str::contains("protected"));
}

#[test]
fn test_clone_then_delete_restores_registry() {
    let fixture = CliTestFixture::new();
    fixture.run_ok(&["workspace", "create", "ubuntu"]);
    fixture.run_ok(&["workspace", "set", "-w", "ubuntu", "k8s_version", "1.31"]);
    fixture.run_ok(&["workspace", "clone", "ubuntu", "test", "--letter", "t"]);

    let shown = fixture.run_ok(&["--json", "workspace", "show", "test"]);
    let test: serde_json::Value = serde_json::from_str(&shown).unwrap();
    assert_eq!(test["release_letter"], "t");
    assert_eq!(test["overlay"]["k8s_version"], "1.31");
    assert_eq!(test["cloned_from"], "ubuntu");

    fixture.run_ok(&["workspace", "delete", "test"]);
    let listed = fixture.run_ok(&["--json", "workspace", "list"]);
    assert!(!listed.contains("\"test\""));
}

#[test]
fn test_unsupported_tofu_subcommand() {
    let fixture = CliTestFixture::new();
    fixture.run_ok(&["workspace", "create", "ubuntu"]);
    fixture
        .cpc()
        .args(["tofu", "init", "-w", "ubuntu"])
        .assert()
        .code(64)
        .stderr(predicate::str::contains("Unsupported tofu subcommand"));
}

#[test]
fn test_bootstrap_reports_missing_engine_as_config_error() {
    let fixture = CliTestFixture::with_config(
        "engines:\n  tofu_binary: /nonexistent/cpc-test-tofu\nsecrets:\n  file: null\n",
    );
    fixture.run_ok(&["workspace", "create", "infra"]);
    fixture.run_ok(&["workspace", "create", "ubuntu"]);
    fixture
        .cpc()
        .args(["bootstrap", "-w", "ubuntu", "--workers", "2"])
        .assert()
        .code(78)
        .stderr(predicate::str::contains("/nonexistent/cpc-test-tofu"));

    // Nodes were issued before the engine check failed.
    let nodes = fixture.run_ok(&["--json", "node", "list", "-w", "ubuntu"]);
    let nodes: serde_json::Value = serde_json::from_str(&nodes).unwrap();
    let hosts: Vec<(&str, &str)> = nodes
        .as_array()
        .unwrap()
        .iter()
        .map(|n| (n["hostname"].as_str().unwrap(), n["ip"].as_str().unwrap()))
        .collect();
    assert_eq!(
        hosts,
        vec![
            ("cu1", "10.10.10.110"),
            ("wu1", "10.10.10.115"),
            ("wu2", "10.10.10.116")
        ]
    );
}

#[test]
fn test_inventory_groups_nodes() {
    let fixture = CliTestFixture::with_config(
        "engines:\n  tofu_binary: /nonexistent/cpc-test-tofu\nsecrets:\n  file: null\n",
    );
    fixture.run_ok(&["workspace", "create", "ubuntu"]);
    let _ = fixture.cpc().args(["bootstrap", "-w", "ubuntu"]).output();

    let inventory = fixture.run_ok(&["inventory", "-w", "ubuntu"]);
    let inventory: serde_json::Value = serde_json::from_str(&inventory).unwrap();
    assert_eq!(inventory["control_plane"]["hosts"][0], "cu1");
    assert_eq!(inventory["_meta"]["hostvars"]["wu2"]["node_role"], "worker");
}

#[test]
fn test_invalid_config_exits_with_config_code() {
    let fixture = CliTestFixture::with_config("network: [");
    fixture
        .cpc()
        .args(["workspace", "list"])
        .assert()
        .code(78)
        .stderr(predicate::str::contains("Invalid configuration"));
}

#[test]
fn test_unknown_workflow_status() {
    let fixture = CliTestFixture::new();
    fixture
        .cpc()
        .args(["workflow", "status", "bootstrap-nope"])
        .assert()
        .code(64)
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn test_empty_workflow_list() {
    let fixture = CliTestFixture::new();
    fixture.run_ok(&["--json", "workflow", "list"]);
    assert_eq!(fixture.run_ok(&["--json", "workflow", "list"]).trim(), "[]");
}

//! CLI tests. The binary registers no runtime adapters, so only preview,
//! dry runs and the failure path of a real apply are reachable here.

use assert_cmd::Command;
use predicates::prelude::*;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const SPEC: &str = r#"
resources:
  - id: "v1:Namespace:shop"
    type: Kubernetes
    attributes:
      metadata:
        name: shop
  - id: "v1:ConfigMap:shop:settings"
    type: Kubernetes
    dependsOn: ["v1:Namespace:shop"]
    attributes:
      data:
        mode: live
"#;

fn write_spec(dir: &Path) -> PathBuf {
    let path = dir.join("spec.yaml");
    std::fs::write(&path, SPEC).unwrap();
    path
}

/// Builds a `strata` Command with an isolated database.
fn strata_cmd(work_dir: &Path) -> Command {
    let mut cmd = assert_cmd::cargo_bin_cmd!("strata");
    cmd.arg("--db")
        .arg(work_dir.join("strata.db"))
        .arg("--project")
        .arg("shop")
        .env("NO_COLOR", "1");
    cmd
}

#[test]
fn test_preview_lists_creates_in_dependency_order() {
    let work = TempDir::new().unwrap();
    let spec = write_spec(work.path());

    strata_cmd(work.path())
        .arg("preview")
        .arg(&spec)
        .assert()
        .success()
        .stdout(
            predicate::str::contains("v1:Namespace:shop")
                .and(predicate::str::contains("v1:ConfigMap:shop:settings"))
                .and(predicate::str::contains("Plan: 2 to create, 0 to update, 0 to delete, 0 unchanged.")),
        );
}

#[test]
fn test_preview_json_output() {
    let work = TempDir::new().unwrap();
    let spec = write_spec(work.path());

    let output = strata_cmd(work.path())
        .arg("preview")
        .arg(&spec)
        .arg("--output")
        .arg("json")
        .output()
        .unwrap();
    assert!(output.status.success());

    let order: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(order["stepKeys"][0], "v1:Namespace:shop");
    assert_eq!(order["stepKeys"][1], "v1:ConfigMap:shop:settings");
}

#[test]
fn test_preview_rejects_unknown_format() {
    let work = TempDir::new().unwrap();
    let spec = write_spec(work.path());

    strata_cmd(work.path())
        .arg("preview")
        .arg(&spec)
        .arg("--output")
        .arg("xml")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown output format"));
}

#[test]
fn test_dry_run_apply_records_nothing() {
    let work = TempDir::new().unwrap();
    let spec = write_spec(work.path());

    strata_cmd(work.path())
        .arg("apply")
        .arg(&spec)
        .arg("--dry-run")
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "Apply complete! Resources: 2 created, 0 updated, 0 deleted.",
        ));

    strata_cmd(work.path())
        .args(["release", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No release found"));
}

#[test]
fn test_apply_without_runtimes_fails_release() {
    let work = TempDir::new().unwrap();
    let spec = write_spec(work.path());

    strata_cmd(work.path())
        .arg("apply")
        .arg(&spec)
        .arg("--no-watch")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Apply failed"));

    strata_cmd(work.path())
        .args(["release", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("failed"));

    strata_cmd(work.path())
        .args(["release", "unlock"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No running release"));
}

#[test]
fn test_destroy_with_empty_history_is_a_no_op() {
    let work = TempDir::new().unwrap();

    strata_cmd(work.path())
        .arg("destroy")
        .assert()
        .success()
        .stdout(predicate::str::contains("Nothing to do"));
}

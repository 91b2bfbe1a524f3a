use cmi5_lrs::core::broker::{self, BrokerEvent};
use cmi5_lrs::core::config::CONFIG_FILE_NAME;
use cmi5_lrs::{LrsConfig, Store};
use regex::Regex;
use serde_json::Value;
use std::fs;
use std::path::Path;
use std::process::{Command, Output};
use tempfile::tempdir;

const MANIFEST: &str = r#"{
  "id": "https://example.com/cli-course",
  "title": "CLI course",
  "contentBaseUrl": "https://cdn.example.com/cli/",
  "blocks": [
    {
      "id": "https://example.com/cli-course/block",
      "title": "Only block",
      "activities": [
        {
          "id": "https://example.com/cli-course/au",
          "title": "Only unit",
          "launchUrl": "au/index.html",
          "moveOn": "Completed"
        }
      ]
    }
  ]
}"#;

const REG: &str = "6a0b7c1e-3f44-4c1d-9b0e-2d9a1c5e7f10";

fn exec(root: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_cmi5-lrs"))
        .arg("--root")
        .arg(root)
        .args(["--format", "json"])
        .args(args)
        .env("RUST_LOG", "off")
        .output()
        .expect("failed to execute cmi5-lrs")
}

fn run_json(root: &Path, args: &[&str]) -> Value {
    let output = exec(root, args);
    assert!(
        output.status.success(),
        "cmi5-lrs {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).expect("json envelope")
}

#[test]
fn init_seeds_config_and_database() {
    let tmp = tempdir().expect("tempdir");
    let root = tmp.path().join("store");

    let envelope = run_json(&root, &["init"]);
    assert_eq!(envelope["cmd"], "init");
    assert_eq!(envelope["status"], "ok");
    assert_eq!(envelope["config_written"], true);
    assert!(root.join(CONFIG_FILE_NAME).is_file());
    assert!(root.join("lrs.db").is_file());

    let again = run_json(&root, &["init"]);
    assert_eq!(again["config_written"], false);

    let store = Store::open(&root).expect("open store");
    let defaults = LrsConfig::default();
    assert_eq!(store.config.endpoint, defaults.endpoint);
    assert_eq!(store.config.database_file, defaults.database_file);
}

#[test]
fn register_launch_submit_and_read_progress() {
    let tmp = tempdir().expect("tempdir");
    let root = tmp.path().join("store");
    let manifest_path = tmp.path().join("course.json");
    fs::write(&manifest_path, MANIFEST).expect("write manifest");

    let registered = run_json(
        &root,
        &["package", "register", "--file", manifest_path.to_str().expect("utf8 path")],
    );
    let package_id = registered["package_id"].as_str().expect("package id").to_string();
    assert!(Regex::new(r"^P_[0-9A-Z]{26}$").expect("regex").is_match(&package_id));

    let located = run_json(&root, &["package", "locate", "https://example.com/cli-course/au"]);
    assert_eq!(located["locations"][0]["package_id"], package_id.as_str());
    assert_eq!(located["locations"][0]["block_id"], "https://example.com/cli-course/block");

    let launch = run_json(
        &root,
        &[
            "launch",
            &package_id,
            "https://example.com/cli-course/au",
            "--mbox",
            "cli@example.com",
            "--registration",
            REG,
            "--param",
            "locale=fr-FR",
        ],
    );
    assert_eq!(launch["registration"], REG);
    let url = launch["launchUrl"].as_str().expect("launch url");
    assert!(url.starts_with("https://cdn.example.com/cli/au/index.html?endpoint="));
    assert!(url.ends_with("&locale=fr-FR"));

    let statement = serde_json::json!({
        "id": "0f8fad5b-d9cb-469f-a165-70867728950e",
        "actor": { "objectType": "Agent", "mbox": "mailto:cli@example.com" },
        "verb": { "id": "http://adlnet.gov/expapi/verbs/completed", "display": { "en-US": "completed" } },
        "object": { "objectType": "Activity", "id": "https://example.com/cli-course/au" },
        "result": { "completion": true, "duration": "PT2M" },
        "context": { "registration": REG }
    });
    let statement_path = tmp.path().join("completed.json");
    fs::write(&statement_path, statement.to_string()).expect("write statement");
    let statement_arg = statement_path.to_str().expect("utf8 path");

    let submitted = run_json(&root, &["statement", "submit", "--file", statement_arg]);
    assert_eq!(submitted["results"][0]["outcome"], "stored");
    let resubmitted = run_json(&root, &["statement", "submit", "--file", statement_arg]);
    assert_eq!(resubmitted["results"][0]["outcome"], "duplicate");
    assert_eq!(
        submitted["results"][0]["receipt"],
        resubmitted["results"][0]["receipt"]
    );

    let progress = run_json(
        &root,
        &["progress", &package_id, "--mbox", "cli@example.com", "--registration", REG],
    );
    assert_eq!(progress["completedActivities"], 1);
    assert_eq!(progress["totalActivities"], 1);
    assert_eq!(progress["overallVerdict"], "Satisfied");

    let store = Store::open(&root).expect("open store");
    let events: Vec<BrokerEvent> = broker::read_audit_log(&store).expect("audit log");
    assert!(events.iter().any(|ev| ev.op == "packages.register" && ev.status == "success"));
    assert!(events.iter().any(|ev| ev.op == "statements.append" && ev.status == "success"));
}

#[test]
fn errors_are_reported_in_a_json_envelope() {
    let tmp = tempdir().expect("tempdir");
    let root = tmp.path().join("store");

    let output = exec(&root, &["package", "show", "P_MISSING"]);
    assert!(!output.status.success());
    let envelope: Value = serde_json::from_slice(&output.stdout).expect("json envelope");
    assert_eq!(envelope["status"], "error");
    assert_eq!(envelope["kind"], "not_found");

    let output = exec(
        &root,
        &["launch", "P_MISSING", "https://example.com/au", "--mbox", "a@example.com", "--param", "actor=x"],
    );
    assert!(!output.status.success());
}

#[test]
fn schema_lists_every_component() {
    let tmp = tempdir().expect("tempdir");
    let envelope = run_json(tmp.path(), &["schema"]);
    let names: Vec<&str> = envelope["components"]
        .as_array()
        .expect("components")
        .iter()
        .filter_map(|c| c["name"].as_str())
        .collect();
    for expected in ["broker", "actors", "manifest", "statements", "state", "session", "progress", "api"] {
        assert!(names.contains(&expected), "schema missing component {}", expected);
    }
}

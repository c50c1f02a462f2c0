// CLI integration tests: one process per call, body on stdin, response on stdout.
use std::io::Write;
use std::path::Path;
use std::process::{Command, Output, Stdio};

use serde_json::{Value, json};

fn cmd(dir: &Path) -> Command {
    let exe = env!("CARGO_BIN_EXE_lifecall");
    let mut command = Command::new(exe);
    command
        .arg("--dir")
        .arg(dir)
        .env_remove("LIFECALL_MODE")
        .env_remove("LIFECALL_DIR")
        .env("RUST_LOG", "info");
    command
}

fn call(dir: &Path, extra: &[&str], service: &str, body: &str) -> Output {
    let mut child = cmd(dir)
        .args(extra)
        .args(["call", service])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn");
    child
        .stdin
        .take()
        .expect("stdin")
        .write_all(body.as_bytes())
        .expect("write body");
    child.wait_with_output().expect("wait")
}

fn response(output: &Output) -> Value {
    let text = String::from_utf8_lossy(&output.stdout);
    let mut lines = text.lines();
    let line = lines.next().expect("json line");
    assert!(lines.next().is_none(), "exactly one response line: {text}");
    serde_json::from_str(line).expect("valid json")
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[test]
fn echo_success_writes_err_zero_and_access_log() {
    let temp = tempfile::tempdir().expect("tempdir");
    let output = call(temp.path(), &[], "echo", r#"{"msg":"hello"}"#);
    assert!(output.status.success());
    assert_eq!(response(&output), json!({"msg": "hello", "Err": 0}));
    assert!(stderr(&output).contains("(sec)"), "{}", stderr(&output));
}

#[test]
fn quiet_echo_skips_access_log() {
    let temp = tempfile::tempdir().expect("tempdir");
    let output = call(temp.path(), &[], "echo", r#"{"msg":"x","quiet":true}"#);
    assert!(output.status.success());
    assert_eq!(response(&output)["Err"], 0);
    assert!(!stderr(&output).contains("(sec)"));
}

#[test]
fn missing_or_malformed_input_is_invalid() {
    let temp = tempfile::tempdir().expect("tempdir");
    for body in ["", "{broken", "[1,2]", r#"{"msg":null}"#] {
        let output = call(temp.path(), &[], "echo", body);
        assert!(output.status.success(), "body {body:?}");
        assert_eq!(response(&output), json!({"Err": 1}), "body {body:?}");
    }
}

#[test]
fn counter_persists_across_processes() {
    let temp = tempfile::tempdir().expect("tempdir");
    let first = call(temp.path(), &[], "counter", r#"{"id":42}"#);
    assert_eq!(response(&first), json!({"id": 42, "count": 1, "Err": 0}));
    let second = call(temp.path(), &[], "counter", r#"{"id":42,"step":2}"#);
    assert_eq!(response(&second), json!({"id": 42, "count": 3, "Err": 0}));
    assert!(temp.path().join("counter.json").exists());
    assert!(temp.path().join("locks").join("counter-42.lock").exists());
}

#[test]
fn counter_business_failure_is_err_three_and_rolls_back() {
    let temp = tempfile::tempdir().expect("tempdir");
    let failed = call(temp.path(), &[], "counter", r#"{"id":1,"fail":true}"#);
    assert!(failed.status.success());
    assert_eq!(response(&failed), json!({"Err": 3}));

    let next = call(temp.path(), &[], "counter", r#"{"id":1}"#);
    assert_eq!(response(&next), json!({"id": 1, "count": 1, "Err": 0}));
}

#[test]
fn counter_crash_is_err_hundred() {
    let temp = tempfile::tempdir().expect("tempdir");
    let output = call(temp.path(), &[], "counter", r#"{"id":3,"crash":true}"#);
    assert!(output.status.success());
    assert_eq!(response(&output), json!({"Err": 100}));
    assert!(stderr(&output).contains("counter crashed"), "{}", stderr(&output));
}

#[test]
fn local_mode_dumps_failure_context() {
    let temp = tempfile::tempdir().expect("tempdir");
    let mut command = cmd(temp.path());
    command.env("RUST_LOG", "debug");
    let mut child = command
        .args(["--mode", "local", "call", "counter"])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn");
    child
        .stdin
        .take()
        .expect("stdin")
        .write_all(br#"{"id":4,"fail":true}"#)
        .expect("write body");
    let output = child.wait_with_output().expect("wait");
    assert_eq!(response(&output), json!({"Err": 3}));
    assert!(stderr(&output).contains("failure dump"), "{}", stderr(&output));
}

#[test]
fn unknown_service_is_fatal() {
    let temp = tempfile::tempdir().expect("tempdir");
    let output = call(temp.path(), &[], "nope", r#"{"msg":"x"}"#);
    assert_eq!(output.status.code(), Some(1));
    assert_eq!(response(&output), json!({"Err": 100}));
}

#[test]
fn input_file_is_read() {
    let temp = tempfile::tempdir().expect("tempdir");
    let body = temp.path().join("req.json");
    std::fs::write(&body, r#"{"msg":"from file"}"#).expect("write");
    let output = cmd(temp.path())
        .args(["call", "echo", "--input", body.to_str().expect("utf8")])
        .stdin(Stdio::null())
        .output()
        .expect("call");
    assert!(output.status.success());
    assert_eq!(response(&output), json!({"msg": "from file", "Err": 0}));
}

#[test]
fn bad_mode_env_is_usage_error() {
    let temp = tempfile::tempdir().expect("tempdir");
    let output = cmd(temp.path())
        .env("LIFECALL_MODE", "bogus")
        .args(["call", "echo"])
        .stdin(Stdio::null())
        .output()
        .expect("call");
    assert_eq!(output.status.code(), Some(2));
    assert!(output.stdout.is_empty());
    let err: Value = serde_json::from_slice(&output.stderr).expect("json error");
    assert_eq!(err["error"]["message"], "unknown deployment mode");
}

#[test]
fn unknown_subcommand_is_usage_error() {
    let temp = tempfile::tempdir().expect("tempdir");
    let output = cmd(temp.path()).arg("frobnicate").output().expect("run");
    assert_eq!(output.status.code(), Some(2));
    let err: Value = serde_json::from_slice(&output.stderr).expect("json error");
    assert_eq!(err["error"]["hint"], "Try `lifecall --help`.");
}

#[test]
fn services_lists_demo_services() {
    let temp = tempfile::tempdir().expect("tempdir");
    let output = cmd(temp.path())
        .args(["services", "--json"])
        .output()
        .expect("services");
    assert!(output.status.success());
    let listed: Value = serde_json::from_slice(&output.stdout).expect("json");
    let names: Vec<&str> = listed["services"]
        .as_array()
        .expect("array")
        .iter()
        .filter_map(|entry| entry["name"].as_str())
        .collect();
    assert_eq!(names, ["counter", "echo"]);
}

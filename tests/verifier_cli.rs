mod common;

use std::path::Path;
use std::process::{Command, Output};

use common::{entry, provenance, read_entries, replace, rezip, sample_report};
use evidence_integrity::package::{export_package, REPORT_FILE};

fn run(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_verify_evidence_package"))
        .args(args)
        .env("RUST_LOG", "off")
        .output()
        .unwrap()
}

fn write_package(dir: &Path, name: &str, bytes: &[u8]) -> String {
    let path = dir.join(name);
    std::fs::write(&path, bytes).unwrap();
    path.to_str().unwrap().to_string()
}

#[test]
fn intact_package_exits_zero() {
    let dir = tempfile::tempdir().unwrap();
    let bytes = export_package(&sample_report(), &provenance()).unwrap();
    let path = write_package(dir.path(), "evidence-rep-2024-06.zip", &bytes);

    let text = run(&[&path]);
    assert_eq!(text.status.code(), Some(0));
    let stdout = String::from_utf8(text.stdout).unwrap();
    assert!(stdout.contains("RESULT: PASS (exit code 0)"), "{stdout}");

    let json = run(&[&path, "--json"]);
    assert_eq!(json.status.code(), Some(0));
    let report: serde_json::Value = serde_json::from_slice(&json.stdout).unwrap();
    assert_eq!(report["verdict"], "PASS");
    assert_eq!(report["exit_code"], 0);
    assert_eq!(report["report_id"], "rep-2024-06");
    assert_eq!(report["archive"], path.as_str());
}

#[test]
fn tampered_package_exits_one() {
    let dir = tempfile::tempdir().unwrap();
    let bytes = export_package(&sample_report(), &provenance()).unwrap();
    let mut entries = read_entries(&bytes);
    let mut report = entry(&entries, REPORT_FILE).to_vec();
    let last = report.len() - 2;
    report[last] ^= 0x01;
    replace(&mut entries, REPORT_FILE, report);
    let path = write_package(dir.path(), "tampered.zip", &rezip(&entries));

    let output = run(&["--json", &path]);
    assert_eq!(output.status.code(), Some(1));
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["verdict"], "FAIL");
    assert_eq!(report["checks"][1]["status"], "fail");
    assert_eq!(report["checks"][1]["findings"][0]["file"], REPORT_FILE);
}

#[test]
fn unreadable_input_exits_two() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_package(dir.path(), "notes.zip", b"plain text, not an archive");

    let output = run(&[&path, "--json"]);
    assert_eq!(output.status.code(), Some(2));
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["verdict"], "ERROR");
    assert_eq!(report["checks"][5]["status"], "skipped");

    let missing = dir.path().join("absent.zip");
    assert_eq!(run(&[missing.to_str().unwrap()]).status.code(), Some(2));
}

#[test]
fn usage_errors_and_version() {
    // clap 参数错误同样以 2 退出
    assert_eq!(run(&[]).status.code(), Some(2));
    assert_eq!(run(&["a.zip", "--bogus"]).status.code(), Some(2));

    let version = run(&["--version"]);
    assert_eq!(version.status.code(), Some(0));
    assert!(String::from_utf8(version.stdout)
        .unwrap()
        .contains(env!("CARGO_PKG_VERSION")));
}

use std::fs;

use tempfile::tempdir;

#[test]
fn demo_then_inspect_as_json() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("demo.stasis");

    assert_cmd::cargo::cargo_bin_cmd!("stasis")
        .args(["demo", path.to_str().unwrap()])
        .assert()
        .success();
    assert!(fs::metadata(&path).unwrap().len() > 20);

    let output = assert_cmd::cargo::cargo_bin_cmd!("stasis")
        .args(["inspect", "--json", path.to_str().unwrap()])
        .output()
        .unwrap();
    assert!(output.status.success());
    let summary: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(summary["roots"], 1);
    assert_eq!(summary["tables"], 3);
    assert_eq!(summary["inline_code"], 0);
}

#[test]
fn demo_refuses_to_overwrite_without_force() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("demo.stasis");
    fs::write(&path, b"keep me").unwrap();

    assert_cmd::cargo::cargo_bin_cmd!("stasis")
        .args(["demo", path.to_str().unwrap()])
        .assert()
        .failure();
    assert_eq!(fs::read(&path).unwrap(), b"keep me");

    assert_cmd::cargo::cargo_bin_cmd!("stasis")
        .args(["demo", "--force", "--inline-code", path.to_str().unwrap()])
        .assert()
        .success();

    let output = assert_cmd::cargo::cargo_bin_cmd!("stasis")
        .args(["dump", path.to_str().unwrap()])
        .output()
        .unwrap();
    assert!(output.status.success());
    let text = String::from_utf8(output.stdout).unwrap();
    assert!(text.starts_with("stream v1 flags=0x00000001 roots=1"));
    assert!(text.contains("closure code=<inline"));
    assert!(text.trim_end().ends_with("end of stream"));
}

#[test]
fn inspect_rejects_garbage() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("garbage.bin");
    fs::write(&path, b"definitely not a persisted graph").unwrap();

    assert_cmd::cargo::cargo_bin_cmd!("stasis")
        .args(["inspect", path.to_str().unwrap()])
        .assert()
        .failure();
}

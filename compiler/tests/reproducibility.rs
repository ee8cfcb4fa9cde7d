// Reproducibility tests for hermetic builds.
//
// These tests verify that the compiler produces byte-identical outputs
// for identical inputs, and that the CLI reports failures with stable
// exit codes.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

fn wgslc_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_wgslc"))
}

fn fixture() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/saxpy.json")
}

fn run(args: &[&str]) -> Output {
    Command::new(wgslc_binary())
        .args(args)
        .output()
        .expect("failed to run wgslc")
}

fn run_ok(args: &[&str]) -> String {
    let output = run(args);
    assert!(
        output.status.success(),
        "wgslc failed with args {:?}\nstderr: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8(output.stdout).expect("non-UTF8 output")
}

/// Compiling the same module twice produces byte-identical WGSL.
#[test]
fn same_module_identical_wgsl() {
    let path = fixture();
    let path = path.to_str().unwrap();
    let first = run_ok(&["--emit", "wgsl", path]);
    let second = run_ok(&["--emit", "wgsl", path]);
    assert_eq!(first, second, "WGSL output should be byte-identical across runs");
    assert!(first.starts_with("// saxpy_t00\n"), "{}", first);
    assert!(first.contains("\n// reduce_t00\n"), "{}", first);
}

#[test]
fn same_module_identical_attributes() {
    let path = fixture();
    let path = path.to_str().unwrap();
    let first = run_ok(&["--emit", "attribs", path]);
    let second = run_ok(&["--emit", "attribs", path]);
    assert_eq!(first, second);
    let parsed: serde_json::Value = serde_json::from_str(&first).unwrap();
    assert_eq!(parsed.as_array().unwrap().len(), 3);
}

/// Build info is stable across runs and carries the crate version.
#[test]
fn build_info_is_stable() {
    let path = fixture();
    let path = path.to_str().unwrap();
    let first = run_ok(&["--emit", "build-info", path]);
    let second = run_ok(&["--emit", "build-info", path]);
    assert_eq!(first, second);

    let info: serde_json::Value = serde_json::from_str(&first).unwrap();
    assert_eq!(info["compiler_version"], env!("CARGO_PKG_VERSION"));
    assert_eq!(info["source_hash"].as_str().unwrap().len(), 64);
    assert_eq!(info["module_fingerprint"].as_str().unwrap().len(), 64);
}

/// Dumping twice into fresh directories yields identical files.
#[test]
fn aot_dump_is_deterministic() {
    let path = fixture();
    let path = path.to_str().unwrap();
    let a = tempfile::tempdir().unwrap();
    let b = tempfile::tempdir().unwrap();
    run_ok(&["--emit", "aot", path, "-o", a.path().to_str().unwrap()]);
    run_ok(&["--emit", "aot", path, "-o", b.path().to_str().unwrap()]);
    for file in ["metadata.json", "saxpy_t00.wgsl", "reduce_t00.wgsl", "double_t00.wgsl"] {
        let left = std::fs::read(a.path().join(file)).unwrap();
        let right = std::fs::read(b.path().join(file)).unwrap();
        assert_eq!(left, right, "{} differs between dumps", file);
    }
}

#[test]
fn block_dim_flag_changes_only_default_block() {
    let path = fixture();
    let path = path.to_str().unwrap();
    let out = run_ok(&["--emit", "wgsl", "--block-dim", "32", path]);
    assert!(out.contains("@workgroup_size(128, 1, 1)"), "{}", out);
    assert!(!out.contains("@workgroup_size(32, 1, 1)"), "{}", out);
}

// ── Failure exits ───────────────────────────────────────────────────────────

#[test]
fn missing_input_exits_with_io_status() {
    let output = run(&["/nonexistent/module.json"]);
    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.starts_with("wgslc: error:"), "{}", stderr);
}

#[test]
fn malformed_module_reports_json_code() {
    let dir = tempfile::tempdir().unwrap();
    let bad = dir.path().join("bad.json");
    std::fs::write(&bad, "{\"kernels\": [").unwrap();
    let output = run(&[bad.to_str().unwrap()]);
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("error[E0401]"), "{}", stderr);
}

#[test]
fn unsupported_statement_reports_task() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("print.json");
    std::fs::write(
        &src,
        r#"{"kernels": [{"name": "p", "stmts": [
            {"ty": "i32", "kind": {"stmt": "const", "value": 1}},
            {"kind": {"stmt": "print", "contents": [0]}}
        ], "tasks": [{"kind": "serial", "body": [0, 1]}]}]}"#,
    )
    .unwrap();
    let output = run(&[src.to_str().unwrap()]);
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("error[E0100]: unsupported statement `print` in task p_t00"),
        "{}",
        stderr
    );
    assert!(output.stdout.is_empty());
}

#[test]
fn aot_without_output_dir_is_rejected() {
    let path = fixture();
    let output = run(&["--emit", "aot", path.to_str().unwrap()]);
    assert_eq!(output.status.code(), Some(2));
}

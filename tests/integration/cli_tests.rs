//! Integration tests for the command line interface

use std::process::Command;

use serde_json::Value;

use crate::common::TestContext;

fn cli() -> Command {
    Command::new(env!("CARGO_BIN_EXE_rust-relschema"))
}

#[test]
fn test_derive_prints_manifest_to_stdout() {
    let ctx = TestContext::with_fixture("ed_org");
    let output = cli()
        .arg("derive")
        .arg("--schema")
        .arg(&ctx.schema_dir)
        .args(["--dialect", "pgsql"])
        .output()
        .expect("Failed to run CLI");

    assert!(
        output.status.success(),
        "CLI failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let manifest: Value = serde_json::from_slice(&output.stdout).expect("stdout should be JSON");
    assert_eq!(manifest["dialect"], "Pgsql");
}

#[test]
fn test_derive_writes_output_file() {
    let ctx = TestContext::with_fixture("ed_org");
    let path = ctx.output_path("mssql.json");
    let output = cli()
        .arg("derive")
        .arg("--schema")
        .arg(&ctx.schema_dir)
        .args(["--dialect", "sqlserver", "--output"])
        .arg(&path)
        .output()
        .expect("Failed to run CLI");

    assert!(output.status.success());
    assert!(output.stdout.is_empty());
    let manifest: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(manifest["dialect"], "Mssql");
}

#[test]
fn test_unknown_dialect_is_rejected() {
    let ctx = TestContext::with_fixture("ed_org");
    let output = cli()
        .arg("derive")
        .arg("--schema")
        .arg(&ctx.schema_dir)
        .args(["--dialect", "oracle"])
        .output()
        .expect("Failed to run CLI");

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("unknown dialect 'oracle'"));
}

#[test]
fn test_derivation_failure_exits_non_zero() {
    let ctx = TestContext::with_documents(&[serde_json::json!({ "projectSchema": {} })]);
    let output = cli()
        .arg("derive")
        .arg("--schema")
        .arg(&ctx.schema_dir)
        .args(["--dialect", "pgsql"])
        .output()
        .expect("Failed to run CLI");

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Error"));
}

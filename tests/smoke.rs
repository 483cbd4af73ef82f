//! Smoke tests -- verify the binary runs and its subcommands behave.

use assert_cmd::Command;
use predicates::prelude::*;

fn hilbench() -> Command {
    let mut cmd = Command::cargo_bin("hilbench").unwrap();
    cmd.env_remove("HILBENCH_CONFIG").env_remove("RUST_LOG");
    cmd
}

fn write_config(contents: &str) -> tempfile::NamedTempFile {
    let file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    std::fs::write(file.path(), contents).unwrap();
    file
}

#[test]
fn test_cli_help() {
    hilbench()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicates::str::contains("Hardware-in-the-loop validation campaigns"));
}

#[test]
fn test_cli_version() {
    hilbench()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicates::str::contains("hilbench"));
}

#[test]
fn test_run_subcommand_exists() {
    hilbench().args(["run", "--help"]).assert().success();
}

#[test]
fn test_topology_analog() {
    hilbench()
        .args(["topology", "--cvt", "int", "--raw", "int"])
        .assert()
        .success()
        .stdout(predicates::str::contains("NET-IO_1_Min_S0s0n64_Rt3_IN__ctrl0_in1"))
        .stdout(predicates::str::contains("metaflags=0x48"))
        .stdout(predicates::str::contains(
            "name=out2,type=OUT,messageid=1,protocol=tcp,messagelength=18",
        ));
}

#[test]
fn test_topology_string() {
    hilbench()
        .args(["topology", "--kind", "string", "--protocol", "udp"])
        .assert()
        .success()
        .stdout(predicates::str::contains("In.point09"))
        .stdout(predicates::str::contains("NET-IO_1_Min_S16s0n64_Rt8_IN__ctrl0_in1"))
        .stdout(predicates::str::contains("protocol=udp,messagelength=30"))
        .stdout(predicates::str::contains("RTDB/string_val/NET-IO.msgs.1"));
}

#[test]
fn test_topology_rejects_unknown_type() {
    hilbench()
        .args(["topology", "--cvt", "quad"])
        .assert()
        .failure()
        .stderr(predicates::str::contains("quad"));
}

#[test]
fn test_config_prints_effective_toml() {
    let file = write_config("[platform]\nhost = \"hil-rack-2\"\n");
    hilbench()
        .arg("--config")
        .arg(file.path())
        .arg("config")
        .assert()
        .success()
        .stdout(predicates::str::contains("[platform]"))
        .stdout(predicates::str::contains("hil-rack-2"))
        .stdout(predicates::str::contains("Hardware-Tests"));
}

#[test]
fn test_missing_config_is_fatal() {
    hilbench()
        .args(["--config", "/nonexistent/hilbench.toml", "config"])
        .assert()
        .code(1);
}

#[test]
fn test_malformed_env_config_is_reported() {
    let file = write_config("[signal\ntolerance = 0.5\n");
    hilbench()
        .env("HILBENCH_CONFIG", file.path())
        .arg("config")
        .assert()
        .success()
        .stdout(predicates::str::contains("Hardware-Tests"))
        .stderr(predicates::str::contains("config file could not be loaded"))
        .stderr(predicates::str::contains("failed to parse config file"));
}

#[test]
fn test_run_constants_passes() {
    hilbench()
        .args(["run", "--fast", "--category", "constants"])
        .assert()
        .success()
        .stdout(predicates::str::contains("constants"))
        .stdout(predicates::str::contains("27 check(s), 0 failed"));
}

#[test]
fn test_run_json_report() {
    let output = hilbench()
        .args(["run", "--fast", "--category", "strings", "--json"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["categories"][0]["name"], "strings");
    assert_eq!(report["categories"][0]["checks"], 50);
    assert_eq!(report["categories"][0]["failures"], 0);
}

#[test]
fn test_run_with_failures_exits_2() {
    let file = write_config("[strings]\ncandidates = [\"abcd\"]\n");
    hilbench()
        .arg("--config")
        .arg(file.path())
        .args(["run", "--fast", "--category", "strings"])
        .assert()
        .code(2)
        .stdout(predicates::str::contains("failure budget exhausted"))
        .stderr(predicate::str::contains("6 validation failure(s)"));
}

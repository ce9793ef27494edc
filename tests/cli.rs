use std::process::Command;

use insta_cmd::{assert_cmd_snapshot, get_cargo_bin};

fn stele() -> Command {
    Command::new(get_cargo_bin("stele"))
}

#[test]
fn prints_usage_without_arguments() {
    assert_cmd_snapshot!(stele(), @r"
    success: false
    exit_code: 1
    ----- stdout -----

    ----- stderr -----
    Error: expected four arguments (usage: stele <pid> <addr> <length> <prot>)
    ");
}

#[test]
fn rejects_a_non_numeric_pid() {
    let mut cmd = stele();
    cmd.args(["four", "0x1000", "4096", "PROT_READ"]);
    assert_cmd_snapshot!(cmd, @r"
    success: false
    exit_code: 1
    ----- stdout -----

    ----- stderr -----
    Error: invalid pid 'four'
    ");
}

#[test]
fn rejects_a_malformed_address() {
    let mut cmd = stele();
    cmd.args(["1", "0xnope", "4096", "PROT_READ"]);
    assert_cmd_snapshot!(cmd, @r"
    success: false
    exit_code: 1
    ----- stdout -----

    ----- stderr -----
    Error: invalid address '0xnope'
    ");
}

#[test]
fn refuses_a_pid_that_cannot_exist() {
    // pid_max caps real pids well below this value.
    let mut cmd = stele();
    cmd.args(["999999999", "0x1000", "4096", "PROT_READ"]);
    assert_cmd_snapshot!(cmd, @r"
    success: false
    exit_code: 1
    ----- stdout -----

    ----- stderr -----
    Error: failed to attach to pid 999999999: ESRCH: No such process
    ");
}

#[test]
fn rejects_extra_arguments() {
    let assert = assert_cmd::Command::cargo_bin("stele")
        .unwrap()
        .args(["1", "0x1000", "4096", "PROT_READ", "surplus"])
        .assert()
        .failure()
        .code(1);
    let output = assert.get_output();
    assert!(
        String::from_utf8_lossy(&output.stderr).contains("expected four arguments"),
        "unexpected stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
}

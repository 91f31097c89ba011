//! Integration tests for core CLI contract behavior.

use {predicates::prelude::*, std::fs, tempfile::tempdir};

fn cli_cmd() -> assert_cmd::Command {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("cortexflash");
    // Keep the developer's own settings out of the tests
    cmd.env_remove("CORTEXFLASH_PORT")
        .env_remove("CORTEXFLASH_BAUD")
        .env_remove("RUST_LOG");
    cmd
}

#[test]
fn help_exits_zero_and_writes_stdout_only() {
    let mut cmd = cli_cmd();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("cortexflash"))
        .stderr(predicate::str::is_empty());
}

#[test]
fn version_exits_zero_and_writes_stdout_only() {
    let mut cmd = cli_cmd();
    cmd.arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("cortexflash"))
        .stderr(predicate::str::is_empty());
}

#[test]
fn help_lists_every_command() {
    let mut cmd = cli_cmd();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("flash"))
        .stdout(predicate::str::contains("fs"))
        .stdout(predicate::str::contains("list-ports"))
        .stdout(predicate::str::contains("Usage"));
}

#[test]
fn fs_help_lists_put_and_pull() {
    let mut cmd = cli_cmd();
    cmd.args(["fs", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("put"))
        .stdout(predicate::str::contains("pull"));
}

#[test]
fn list_ports_json_is_an_array_with_clean_stderr() {
    let dir = tempdir().expect("tempdir should be created");
    let mut cmd = cli_cmd();
    let output = cmd
        .current_dir(dir.path())
        .args(["list-ports", "--json"])
        .assert()
        .success()
        .get_output()
        .clone();

    let stdout = String::from_utf8(output.stdout).expect("stdout should be utf-8");
    let stderr = String::from_utf8(output.stderr).expect("stderr should be utf-8");

    let parsed: serde_json::Value =
        serde_json::from_str(&stdout).expect("list-ports --json should print JSON");
    assert!(parsed.is_array(), "list-ports --json should return an array");
    assert!(
        stderr.is_empty(),
        "JSON output should not have stderr: got {stderr}"
    );
}

#[test]
fn invalid_config_warns_but_continues() {
    let dir = tempdir().expect("tempdir should be created");
    fs::write(
        dir.path()
            .join("cortexflash.toml"),
        "invalid toml [[[",
    )
    .expect("write invalid config");

    let mut cmd = cli_cmd();
    let output = cmd
        .current_dir(dir.path())
        .arg("list-ports")
        .output()
        .expect("command should execute");
    assert!(
        output
            .status
            .success(),
        "command should succeed despite config warning"
    );
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("TOML"), "should warn about invalid TOML");
}

// ============================================================================
// Exit Code Tests
// ============================================================================

#[test]
fn exit_code_two_for_unknown_command() {
    let mut cmd = cli_cmd();
    cmd.arg("falsh")
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("flash").or(predicate::str::contains("did you mean")));
}

#[test]
fn exit_code_two_for_missing_required_arg() {
    let mut cmd = cli_cmd();
    cmd.arg("flash")
        .assert()
        .failure()
        .code(2)
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("FILE"));
}

#[test]
fn flash_missing_file_is_usage_error_before_port_selection() {
    let dir = tempdir().expect("tempdir should be created");
    let missing = dir
        .path()
        .join("output.bin");

    let mut cmd = cli_cmd();
    cmd.arg("--non-interactive")
        .arg("flash")
        .arg(&missing)
        .assert()
        .failure()
        .code(2)
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn fs_put_missing_file_is_usage_error() {
    let dir = tempdir().expect("tempdir should be created");
    let missing = dir
        .path()
        .join("LOG.TXT");

    let mut cmd = cli_cmd();
    cmd.args(["--non-interactive", "fs", "put"])
        .arg(&missing)
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn fs_pull_into_a_file_is_usage_error() {
    let dir = tempdir().expect("tempdir should be created");
    let file = dir
        .path()
        .join("taken");
    fs::write(&file, b"x").expect("write file");

    let mut cmd = cli_cmd();
    cmd.args(["--non-interactive", "fs", "pull"])
        .arg(&file)
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("Not a directory"));
}

#[test]
fn flash_on_missing_port_fails_with_hint() {
    let dir = tempdir().expect("tempdir should be created");
    let image = dir
        .path()
        .join("output.bin");
    fs::write(&image, [0u8; 64]).expect("write dummy image");

    let mut cmd = cli_cmd();
    let output = cmd
        .current_dir(dir.path())
        .args(["-p", "INVALID_PORT_NAME_XYZ", "flash"])
        .arg(&image)
        .output()
        .expect("command should execute");

    assert!(
        !output
            .status
            .success(),
        "flashing through a missing port should not succeed"
    );
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Error"), "should report an error: {stderr}");
    assert!(stderr.contains("hint"), "should print remediation: {stderr}");
}

#[test]
fn non_interactive_environment_variable_works() {
    let mut cmd = cli_cmd();
    cmd.env("CORTEXFLASH_NON_INTERACTIVE", "true")
        .arg("--version")
        .assert()
        .success();
}

#[test]
fn colors_disabled_when_not_tty() {
    let mut cmd = cli_cmd();
    let output = cmd
        .arg("--help")
        .assert()
        .success()
        .get_output()
        .clone();

    let stdout = String::from_utf8(output.stdout).expect("stdout should be utf-8");
    assert!(
        !stdout.contains("\x1b["),
        "Colors should be disabled in non-TTY mode"
    );
}

// ============================================================================
// Manifest Tests
// ============================================================================

#[test]
fn library_dependency_uses_default_features() {
    let manifest: toml::Table =
        toml::from_str(include_str!("../Cargo.toml")).expect("manifest should parse");
    let library = &manifest["dependencies"]["cortexflash"];
    assert!(
        library
            .get("features")
            .is_none(),
        "the CLI has no use for optional library features: {library}"
    );
}

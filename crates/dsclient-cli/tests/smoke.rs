use std::process::{Command, Output};

fn run_cli(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_dsclient-cli"))
        .args(args)
        .env_remove("RUST_LOG")
        .env_remove("DSCLIENT_GENERATION")
        .env_remove("DSCLIENT_COOKIE")
        .env_remove("DSCLIENT_PLACE_ID")
        .env_remove("DSCLIENT_UNIVERSE_ID")
        .output()
        .expect("cli should run")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).to_string()
}

#[test]
fn set_with_mock_backend_expected_version_printed() {
    let output = run_cli(&[
        "--backend",
        "mock",
        "--store",
        "players",
        "set",
        "user/1",
        r#"{"coins":5}"#,
        "--user-id",
        "42",
    ]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert!(
        stdout(&output).starts_with("version: v"),
        "stdout: {}",
        stdout(&output)
    );
}

#[test]
fn get_missing_key_expected_none_and_success() {
    let output = run_cli(&["--backend", "mock", "--store", "players", "get", "nobody"]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert_eq!(stdout(&output).trim(), "value: <none>");
}

#[test]
fn increment_ordered_store_on_v1_expected_new_value() {
    let output = run_cli(&[
        "--backend",
        "mock",
        "--generation",
        "v1",
        "--store",
        "points",
        "--ordered",
        "increment",
        "alice",
        "-3",
    ]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert!(
        stdout(&output).lines().any(|line| line == "value: -3"),
        "stdout: {}",
        stdout(&output)
    );
}

#[test]
fn legacy_store_set_expected_no_version() {
    let output = run_cli(&["--backend", "mock", "set", "motd", r#""hello""#]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert_eq!(stdout(&output).trim(), "version: <none>");
}

#[test]
fn empty_key_expected_error_exit_code() {
    let output = run_cli(&["--backend", "mock", "--store", "players", "get", ""]);
    assert_eq!(output.status.code(), Some(1));
    assert!(
        stderr(&output).contains("error: key name can't be empty"),
        "stderr: {}",
        stderr(&output)
    );
}

#[test]
fn invalid_json_value_expected_error_exit_code() {
    let output = run_cli(&[
        "--backend", "mock", "--store", "players", "set", "user/1", "{not json",
    ]);
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("value is not valid JSON"));
}

#[test]
fn sorted_without_ordered_flag_expected_error() {
    let output = run_cli(&["--backend", "mock", "--store", "points", "sorted"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("sorted listings need --ordered"));
}

#[test]
fn sorted_empty_ordered_store_expected_no_entries() {
    let output = run_cli(&[
        "--backend",
        "mock",
        "--store",
        "points",
        "--ordered",
        "sorted",
        "--descending",
    ]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert!(stdout(&output).trim().is_empty());
}

#[test]
fn http_backend_without_session_expected_missing_cookie_error() {
    let output = run_cli(&["--store", "players", "get", "user/1"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(
        stderr(&output).contains("DSCLIENT_COOKIE is not set"),
        "stderr: {}",
        stderr(&output)
    );
}

#[test]
fn unknown_generation_expected_clap_rejection() {
    let output = run_cli(&["--backend", "mock", "--generation", "v3", "get", "a"]);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("invalid value 'v3'"));
}

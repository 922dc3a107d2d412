mod common;

use assert_cmd::Command;
use common::MockServlet;
use predicates::prelude::*;

fn listings_cmd() -> Command {
    let mut cmd = Command::cargo_bin("listings-tui").expect("binary built");
    cmd.env_remove("LISTINGS_LOG");
    cmd
}

#[test]
fn prints_version() {
    listings_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn prints_help() {
    listings_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("listings-tui"))
        .stdout(predicate::str::contains("--version"))
        .stdout(predicate::str::contains("--demo"));
}

#[test]
fn config_flag_requires_a_path() {
    listings_cmd()
        .arg("--config")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("--config needs a path"));
}

#[test]
fn whoami_reports_login_state() {
    let servlet = MockServlet::start(|_| {
        (
            200,
            r#"{"userIsLoggedIn": "false", "loginLink": "/_ah/login?continue=%2F"}"#.to_string(),
        )
    });
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("config.yaml");
    std::fs::write(&config, format!("server:\n  base_url: {}\n", servlet.base_url)).unwrap();

    listings_cmd()
        .arg("--config")
        .arg(&config)
        .arg("--whoami")
        .env_remove("LISTINGS_SERVER__BASE_URL")
        .assert()
        .success()
        .stdout(predicate::str::contains("Not logged in"))
        .stdout(predicate::str::contains("Login: http://127.0.0.1"));

    assert_eq!(servlet.next_request().path(), "/authentication");
}

#[test]
fn whoami_fails_on_servlet_error() {
    let servlet = MockServlet::start(|_| (500, "down".to_string()));
    listings_cmd()
        .arg("--whoami")
        .env("LISTINGS_SERVER__BASE_URL", &servlet.base_url)
        .assert()
        .failure()
        .stderr(predicate::str::contains("500"));
}

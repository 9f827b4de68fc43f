//! End-to-end auth commands against a mock GoTrue server.

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use serde_json::{Value, json};
use tempfile::{TempDir, tempdir};
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const ANON_KEY: &str = "test-anon-key";

fn can_bind_localhost() -> bool {
    std::net::TcpListener::bind("127.0.0.1:0").is_ok()
}

fn user_json() -> Value {
    json!({
        "id": "u1",
        "email": "ann@x.com",
        "user_metadata": {"full_name": "Ann"},
        "app_metadata": {"provider": "email"},
        "email_confirmed_at": "2024-05-01T10:00:00Z",
        "created_at": "2024-05-01T09:00:00Z",
        "updated_at": "2024-05-01T09:00:00Z"
    })
}

fn session_json() -> Value {
    json!({
        "access_token": "access-token-0123456789",
        "token_type": "bearer",
        "expires_in": 3600,
        "refresh_token": "refresh-token",
        "user": user_json()
    })
}

fn authsync(home: &TempDir, server_uri: &str) -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("authsync");
    cmd.env("AUTHSYNC_HOME", home.path())
        .env("AUTHSYNC_PROVIDER_URL", server_uri)
        .env("AUTHSYNC_ANON_KEY", ANON_KEY)
        .env("AUTHSYNC_NO_BROWSER", "1")
        .env_remove("AUTHSYNC_PASSWORD");
    cmd
}

async fn mount_user(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/auth/v1/user"))
        .respond_with(ResponseTemplate::new(200).set_body_json(user_json()))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_signin_status_signout() {
    if !can_bind_localhost() {
        eprintln!("Skipping: cannot bind localhost TCP port in this environment.");
        return;
    }
    let home = tempdir().unwrap();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/v1/token"))
        .and(query_param("grant_type", "password"))
        .and(header("apikey", ANON_KEY))
        .and(body_partial_json(json!({"email": "ann@x.com"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(session_json()))
        .expect(1)
        .mount(&server)
        .await;
    mount_user(&server).await;
    Mock::given(method("POST"))
        .and(path("/auth/v1/logout"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    authsync(&home, &server.uri())
        .args(["signin", "--email", "ann@x.com", "--password", "Abc123!!"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Signed in as Ann <ann@x.com>"));

    // A new process restores the stored session.
    authsync(&home, &server.uri())
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("Status: authenticated"))
        .stdout(predicate::str::contains("Email verified: yes"))
        .stdout(predicate::str::contains("access-token-0123456789").not());

    authsync(&home, &server.uri())
        .arg("signout")
        .assert()
        .success()
        .stdout(predicate::str::contains("Signed out"));

    authsync(&home, &server.uri())
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("Status: unauthenticated"));
}

#[tokio::test]
async fn test_status_json() {
    if !can_bind_localhost() {
        eprintln!("Skipping: cannot bind localhost TCP port in this environment.");
        return;
    }
    let home = tempdir().unwrap();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/v1/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(session_json()))
        .mount(&server)
        .await;
    mount_user(&server).await;

    authsync(&home, &server.uri())
        .args(["signin", "--email", "ann@x.com", "--password", "Abc123!!"])
        .assert()
        .success();

    let output = authsync(&home, &server.uri())
        .args(["status", "--json"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let value: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(value["status"], "authenticated");
    assert_eq!(value["user"]["email"], "ann@x.com");
    assert_eq!(value["user"]["provider"], "email");
    assert!(value["expires_at"].is_i64());
}

#[tokio::test]
async fn test_signin_rejected_reports_provider_message() {
    if !can_bind_localhost() {
        eprintln!("Skipping: cannot bind localhost TCP port in this environment.");
        return;
    }
    let home = tempdir().unwrap();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/v1/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_grant",
            "error_description": "Invalid login credentials"
        })))
        .mount(&server)
        .await;

    authsync(&home, &server.uri())
        .args(["signin", "--email", "ann@x.com", "--password", "wrong-pass"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid login credentials"));
}

/// Malformed email fails before any request is made.
#[tokio::test]
async fn test_magic_link_invalid_email_sends_nothing() {
    if !can_bind_localhost() {
        eprintln!("Skipping: cannot bind localhost TCP port in this environment.");
        return;
    }
    let home = tempdir().unwrap();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    authsync(&home, &server.uri())
        .args(["magic-link", "--email", "ann@"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Please enter a valid email"));
}

#[tokio::test]
async fn test_magic_link_sent() {
    if !can_bind_localhost() {
        eprintln!("Skipping: cannot bind localhost TCP port in this environment.");
        return;
    }
    let home = tempdir().unwrap();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/v1/otp"))
        .and(query_param("redirect_to", "authsync://auth/callback"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;

    authsync(&home, &server.uri())
        .args(["magic-link", "--email", "ann@x.com"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Check your email for the magic link!"));
}

#[test]
fn test_signup_password_mismatch_fails_locally() {
    let home = tempdir().unwrap();

    authsync(&home, "http://127.0.0.1:9")
        .args([
            "signup",
            "--name",
            "Ann",
            "--email",
            "ann@x.com",
            "--password",
            "Abc123!!",
            "--confirm-password",
            "Abc123!?",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Passwords do not match"));
}

#[tokio::test]
async fn test_signup_pending_confirmation() {
    if !can_bind_localhost() {
        eprintln!("Skipping: cannot bind localhost TCP port in this environment.");
        return;
    }
    let home = tempdir().unwrap();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/v1/signup"))
        .and(body_partial_json(json!({"data": {"full_name": "Ann"}})))
        .respond_with(ResponseTemplate::new(200).set_body_json(user_json()))
        .expect(1)
        .mount(&server)
        .await;

    authsync(&home, &server.uri())
        .args([
            "signup",
            "--name",
            "Ann",
            "--email",
            "ann@x.com",
            "--password",
            "Abc123!!",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("confirmation email to ann@x.com"));

    authsync(&home, &server.uri())
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("Status: unauthenticated"));
}

#[tokio::test]
async fn test_complete_redirect_with_error_fragment() {
    if !can_bind_localhost() {
        eprintln!("Skipping: cannot bind localhost TCP port in this environment.");
        return;
    }
    let home = tempdir().unwrap();
    let server = MockServer::start().await;

    authsync(&home, &server.uri())
        .args([
            "complete-redirect",
            "authsync://auth/callback#error=access_denied&error_description=Email+link+is+invalid+or+has+expired",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Email link is invalid or has expired"));
}

#[tokio::test]
async fn test_profile_requires_sign_in() {
    if !can_bind_localhost() {
        eprintln!("Skipping: cannot bind localhost TCP port in this environment.");
        return;
    }
    let home = tempdir().unwrap();
    let server = MockServer::start().await;

    authsync(&home, &server.uri())
        .args(["profile", "--name", "Annie"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Not signed in"));
}

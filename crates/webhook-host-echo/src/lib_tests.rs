//! Tests for CLI parsing, configuration overrides and wiring.

use super::*;
use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use serial_test::serial;
use tower::ServiceExt;
use webhook_host::{EventKind, HostState};

fn cli(args: &[&str]) -> Cli {
    let mut argv = vec!["webhook-host-echo"];
    argv.extend_from_slice(args);
    Cli::try_parse_from(argv).expect("arguments should parse")
}

#[test]
fn test_cli_parsing() {
    let cli = cli(&[
        "--port",
        "9443",
        "--webhook-path",
        "bot",
        "--verify-token",
        "abc",
    ]);

    assert_eq!(cli.port, Some(9443));
    assert_eq!(cli.webhook_path.as_deref(), Some("bot"));
    assert_eq!(cli.verify_token.as_deref(), Some("abc"));
}

#[test]
fn test_cli_rejects_invalid_port() {
    let result = Cli::try_parse_from(["webhook-host-echo", "--port", "70000"]);
    assert!(result.is_err());
}

/// Verify that command line flags override the layered configuration.
#[test]
#[serial]
fn test_cli_overrides_configuration() {
    let config = build_config(&cli(&["--port", "9090", "--webhook-path", "/bot/updates"]))
        .expect("configuration should build");

    assert_eq!(config.server.port, 9090);
    assert_eq!(config.webhook.webhook_route(), "/bot/updates");
}

/// Verify that a flag can repair a value that is invalid in the environment.
#[test]
#[serial]
fn test_cli_port_overrides_invalid_environment_port() {
    std::env::set_var("WEBHOOK_HOST__SERVER__PORT", "0");
    let result = build_config(&cli(&["--port", "9000"]));
    std::env::remove_var("WEBHOOK_HOST__SERVER__PORT");

    let config = result.expect("override should make the configuration valid");
    assert_eq!(config.server.port, 9000);
}

#[test]
#[serial]
fn test_zero_port_is_rejected() {
    let result = build_config(&cli(&["--port", "0"]));
    assert!(matches!(result, Err(EchoError::Configuration(_))));
}

#[test]
fn test_exit_codes() {
    let config_error = EchoError::Configuration(ConfigError::Missing {
        key: "server.port".to_string(),
    });
    let server_error = EchoError::Server(ServerError::AlreadyStarted);

    assert_eq!(config_error.exit_code(), 1);
    assert_eq!(server_error.exit_code(), 2);
}

#[test]
fn test_registry_without_token_has_no_get_subscriber() {
    let registry = build_registry(&cli(&[]));

    assert!(registry.is_empty(EventKind::GetReceived));
    assert_eq!(registry.len(EventKind::PostReceived), 1);
}

/// Verify the full verification handshake through the host router.
#[tokio::test]
async fn test_verification_handshake_through_router() {
    let registry = build_registry(&cli(&["--verify-token", "t0k"]));
    let state = HostState::new(
        HostConfig::default(),
        registry,
        "127.0.0.1:8080".parse().unwrap(),
    );
    let app = webhook_host::build_router(state);

    let ok = app
        .clone()
        .oneshot(
            Request::get("/webhook?hub.verify_token=t0k&hub.challenge=xyz")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(ok.status(), StatusCode::OK);
    let body = axum::body::to_bytes(ok.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&body[..], b"xyz");

    let denied = app
        .oneshot(
            Request::get("/webhook?hub.verify_token=nope&hub.challenge=xyz")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(denied.status(), StatusCode::FORBIDDEN);
}

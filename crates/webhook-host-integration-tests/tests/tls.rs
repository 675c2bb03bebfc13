//! Integration tests for TLS hosts

mod common;

use common::{
    echo_subscriber, http_client, self_signed_bundle, start_host, test_config, tls_config,
    ENCRYPTED_BUNDLE, ENCRYPTED_PASSPHRASE,
};
use reqwest::StatusCode;
use webhook_host::{ServerError, SubscriberRegistry, TlsConfig, WebhookServer};

/// Verify that a TLS host serves the status probe and echoes POSTs
#[tokio::test]
async fn test_https_round_trip() {
    // Arrange
    let bundle = self_signed_bundle();
    let registry = SubscriberRegistry::new();
    registry.on_post(echo_subscriber());
    let host = start_host(tls_config(&bundle), registry).await;
    let client = http_client();

    // Act
    let status = client.get(host.url("/status")).send().await.unwrap();
    let echoed = client
        .post(host.url("/webhook"))
        .body("secure ping")
        .send()
        .await
        .unwrap();

    // Assert
    assert!(host.base_url.starts_with("https://"));
    assert_eq!(status.status(), StatusCode::OK);
    assert_eq!(
        status.text().await.unwrap(),
        "<p>Webhook status: OK</p>IP: 127.0.0.1"
    );
    assert_eq!(echoed.text().await.unwrap(), "secure ping");

    host.stop().await;
}

/// Verify that an encrypted key is unlocked with the configured passphrase
#[tokio::test]
async fn test_encrypted_bundle_serves_https() {
    // Arrange
    let mut config = test_config();
    config.tls = Some(TlsConfig::new(
        ENCRYPTED_BUNDLE,
        Some(ENCRYPTED_PASSPHRASE.to_string()),
    ));
    let host = start_host(config, SubscriberRegistry::new()).await;

    // Act
    let response = http_client().get(host.url("/status")).send().await.unwrap();

    // Assert
    assert_eq!(response.status(), StatusCode::OK);

    host.stop().await;
}

#[tokio::test]
async fn test_wrong_passphrase_fails_construction() {
    let mut config = test_config();
    config.tls = Some(TlsConfig::new(ENCRYPTED_BUNDLE, Some("wrong".to_string())));

    let result = WebhookServer::bind(config, SubscriberRegistry::new()).await;

    assert!(matches!(result, Err(ServerError::Tls(_))));
}

/// Verify that plaintext HTTP is refused on a TLS port while HTTPS keeps working
#[tokio::test]
async fn test_plaintext_rejected_on_tls_port() {
    // Arrange
    let bundle = self_signed_bundle();
    let host = start_host(tls_config(&bundle), SubscriberRegistry::new()).await;
    let plain_url = format!("http://{}/status", host.addr());

    // Act
    let plaintext = http_client().get(plain_url).send().await;
    let secure = http_client().get(host.url("/status")).send().await;

    // Assert
    assert!(plaintext.is_err());
    assert_eq!(secure.unwrap().status(), StatusCode::OK);

    host.stop().await;
}

/// Verify that a TLS handshake against a plaintext host fails
#[tokio::test]
async fn test_https_rejected_on_plain_port() {
    // Arrange
    let host = start_host(test_config(), SubscriberRegistry::new()).await;
    let https_url = format!("https://{}/status", host.addr());

    // Act
    let result = http_client().get(https_url).send().await;

    // Assert
    assert!(result.is_err());

    host.stop().await;
}

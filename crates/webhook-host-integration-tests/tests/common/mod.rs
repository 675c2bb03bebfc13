//! Common utilities for webhook host integration tests
//!
//! This module provides:
//! - Host start/stop helpers on ephemeral ports
//! - Self-signed certificate bundles for TLS hosts
//! - An HTTP client that trusts the test certificates
//! - A raw socket helper for requests reqwest cannot express

use std::io::Write;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use webhook_host::{
    subscriber_fn, HostConfig, SubscriberRegistry, TlsConfig, WebhookServer, WebhookSubscriber,
};

/// Passphrase-protected bundle shipped with the host crate's test data.
#[allow(dead_code)]
pub const ENCRYPTED_BUNDLE: &str = concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/../webhook-host/testdata/encrypted-bundle.pem"
);

#[allow(dead_code)]
pub const ENCRYPTED_PASSPHRASE: &str = "hunter2";

// ============================================================================
// Host helpers
// ============================================================================

/// Running host plus the URL prefix for reaching it
pub struct TestHost {
    pub server: WebhookServer,
    pub base_url: String,
}

impl TestHost {
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    #[allow(dead_code)]
    pub fn addr(&self) -> SocketAddr {
        self.server.local_addr()
    }

    /// Request shutdown and wait for the accept loop to stop.
    pub async fn stop(self) {
        self.server.shutdown();
        tokio::time::timeout(Duration::from_secs(10), self.server.wait_for_shutdown())
            .await
            .expect("host should stop in time")
            .expect("host should stop cleanly");
    }
}

pub fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .expect("ephemeral bind should succeed")
        .local_addr()
        .expect("listener has an address")
        .port()
}

/// Loopback configuration on a free port with OS signal handling disabled.
pub fn test_config() -> HostConfig {
    let mut config = HostConfig::default();
    config.server.host = "127.0.0.1".to_string();
    config.server.port = free_port();
    config.server.handle_os_signals = false;
    config.server.shutdown_timeout_seconds = 5;
    config
}

/// Bind and start a host.
pub async fn start_host(config: HostConfig, registry: SubscriberRegistry) -> TestHost {
    let scheme = if config.is_tls() { "https" } else { "http" };
    let mut server = WebhookServer::bind(config, registry)
        .await
        .expect("host should bind");
    server.start_receiving().expect("host should start");

    let base_url = format!("{}://{}", scheme, server.local_addr());
    TestHost { server, base_url }
}

// ============================================================================
// TLS fixtures
// ============================================================================

/// Write a fresh self-signed certificate and key as one PEM bundle.
#[allow(dead_code)]
pub fn self_signed_bundle() -> tempfile::NamedTempFile {
    let certified = rcgen::generate_simple_self_signed(vec![
        "localhost".to_string(),
        "127.0.0.1".to_string(),
    ])
    .expect("certificate generation should succeed");

    let mut file = tempfile::Builder::new()
        .suffix(".pem")
        .tempfile()
        .expect("temp file should be created");
    write!(
        file,
        "{}{}",
        certified.cert.pem(),
        certified.key_pair.serialize_pem()
    )
    .expect("bundle should be written");
    file
}

/// Configuration for a TLS host using `bundle`.
#[allow(dead_code)]
pub fn tls_config(bundle: &tempfile::NamedTempFile) -> HostConfig {
    let mut config = test_config();
    config.tls = Some(TlsConfig::new(bundle.path(), None));
    config
}

// ============================================================================
// Clients and subscribers
// ============================================================================

/// Client that accepts the self-signed test certificates.
pub fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .danger_accept_invalid_certs(true)
        .timeout(Duration::from_secs(10))
        .build()
        .expect("client should build")
}

/// Echo subscriber: writes the decoded body back with the request content type.
pub fn echo_subscriber() -> Arc<dyn WebhookSubscriber> {
    subscriber_fn("echo", |event| {
        if let Some(content_type) = event.request().content_type() {
            event.response().set_content_type(content_type)?;
        }
        event.response().write(event.body().unwrap_or_default());
        Ok(())
    })
}

/// Subscriber that records every correlation id it sees.
#[allow(dead_code)]
pub fn id_recorder(ids: Arc<Mutex<Vec<u64>>>) -> Arc<dyn WebhookSubscriber> {
    subscriber_fn("id-recorder", move |event| {
        ids.lock().unwrap().push(event.correlation_id().value());
        Ok(())
    })
}

/// Send raw bytes and read the response until the server closes.
#[allow(dead_code)]
pub async fn send_raw(addr: SocketAddr, request: &[u8]) -> String {
    let mut stream = TcpStream::connect(addr)
        .await
        .expect("connect should succeed");
    stream
        .write_all(request)
        .await
        .expect("write should succeed");

    let mut response = Vec::new();
    tokio::time::timeout(Duration::from_secs(10), stream.read_to_end(&mut response))
        .await
        .expect("response should arrive in time")
        .expect("read should succeed");
    String::from_utf8_lossy(&response).into_owned()
}

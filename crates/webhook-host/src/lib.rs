//! # Webhook Host
//!
//! Embeddable HTTP/HTTPS receiver for bot platform webhooks.
//!
//! The host listens on a single port and exposes three routes: a status probe
//! and a webhook path accepting both GET (verification handshakes) and POST
//! (event deliveries). Each accepted webhook request gets a correlation id and
//! an event envelope, which is passed in order to every subscriber registered
//! for that method. Subscribers build the HTTP response through the envelope.
//!
//! ## Architecture
//!
//! - [`config`]: layered configuration (defaults, files, environment)
//! - [`server`]: router, request handlers and lifecycle
//! - [`subscriber`]: subscriber trait, registry and the dispatch fault boundary
//! - [`envelope`]: per-request event, request snapshot and response handle
//! - [`tls`]: PEM bundle loading and the TLS listener
//! - [`logging`]: tracing subscriber setup
//!
//! ## Usage
//!
//! ```rust,no_run
//! use webhook_host::{subscriber_fn, HostConfig, SubscriberRegistry, WebhookServer};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = HostConfig::load(None)?;
//! webhook_host::init_logging(&config.logging)?;
//!
//! let registry = SubscriberRegistry::new();
//! registry.on_get(subscriber_fn("challenge", |event| {
//!     if let Some(challenge) = event.request().query_param("hub.challenge") {
//!         event.response().write(challenge);
//!     }
//!     Ok(())
//! }));
//!
//! let mut server = WebhookServer::bind(config, registry).await?;
//! server.start_receiving()?;
//! server.wait_for_shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod correlation;
pub mod envelope;
pub mod errors;
pub mod logging;
pub mod server;
pub mod subscriber;
pub mod tls;

pub use config::{
    FailurePolicy, HostConfig, LoggingConfig, ServerConfig, TlsConfig, WebhookConfig,
};
pub use correlation::{CorrelationId, CorrelationIdGenerator};
pub use envelope::{EventKind, RequestInfo, ResponseHandle, WebhookEvent};
pub use errors::{
    ConfigError, DispatchError, RequestError, ServerError, SubscriberError, TlsError,
};
pub use logging::init_logging;
pub use server::{build_router, HostState, ServerState, ShutdownHandle, WebhookServer};
pub use subscriber::{
    dispatch, subscriber_fn, DispatchReport, SubscriberRegistry, SubscriptionId,
    WebhookSubscriber,
};

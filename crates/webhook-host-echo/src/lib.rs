//! # Webhook Host Echo
//!
//! Demonstration bot for the webhook host. It answers platform verification
//! handshakes on GET and echoes every POST body back to the sender.
//!
//! Configuration is layered the same way as the host itself (defaults,
//! `config/webhook-host.*`, `--config`, `WEBHOOK_HOST__*`), with the command
//! line flags applied last.

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use webhook_host::{
    logging::TryInitError, ConfigError, HostConfig, ServerError, SubscriberRegistry,
    WebhookServer,
};

pub mod subscribers;

use subscribers::{EchoSubscriber, VerifyTokenSubscriber};

// ============================================================================
// CLI Structure
// ============================================================================

/// Echo bot running on the webhook host
#[derive(Debug, Parser)]
#[command(name = "webhook-host-echo")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Echo bot that replies to webhook POSTs with their own body")]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "WEBHOOK_HOST_CONFIG")]
    pub config: Option<PathBuf>,

    /// Port to listen on, overriding the configuration
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Webhook path, overriding the configuration
    #[arg(long)]
    pub webhook_path: Option<String>,

    /// Token expected in `hub.verify_token` on GET verification requests
    #[arg(long, env = "WEBHOOK_HOST_VERIFY_TOKEN", hide_env_values = true)]
    pub verify_token: Option<String>,
}

/// Errors that stop the echo bot
#[derive(Debug, thiserror::Error)]
pub enum EchoError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("Server error: {0}")]
    Server(#[from] ServerError),

    #[error("Logging setup failed: {0}")]
    Logging(#[from] TryInitError),
}

impl EchoError {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Configuration(_) => 1,
            Self::Server(_) => 2,
            Self::Logging(_) => 3,
        }
    }
}

/// Load layered configuration and apply command line overrides.
pub fn build_config(cli: &Cli) -> Result<HostConfig, EchoError> {
    let mut config = HostConfig::load_unvalidated(cli.config.as_deref())?;

    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(path) = &cli.webhook_path {
        config.webhook.webhook_path = path.clone();
    }

    config.validate()?;
    Ok(config)
}

/// Subscribers for the echo bot.
///
/// The verification responder is only registered when a token is configured;
/// without one, GET requests get the host's default empty `200`.
pub fn build_registry(cli: &Cli) -> SubscriberRegistry {
    let registry = SubscriberRegistry::new();

    if let Some(token) = &cli.verify_token {
        registry.on_get(Arc::new(VerifyTokenSubscriber::new(token.clone())));
    }
    registry.on_post(Arc::new(EchoSubscriber));

    registry
}

/// Run the bot until shutdown.
pub async fn run(cli: Cli) -> Result<(), EchoError> {
    let config = build_config(&cli)?;
    webhook_host::init_logging(&config.logging)?;

    info!("Starting the bot");
    let registry = build_registry(&cli);

    let mut server = WebhookServer::bind(config, registry).await?;
    server.start_receiving()?;
    info!(
        addr = %server.local_addr(),
        tls = server.is_tls(),
        "Echo bot receiving"
    );

    server.wait_for_shutdown().await?;
    info!("Echo bot stopped");
    Ok(())
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;

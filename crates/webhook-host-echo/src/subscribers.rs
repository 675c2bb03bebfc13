//! Subscribers used by the echo bot.

use async_trait::async_trait;
use axum::http::StatusCode;
use tracing::{debug, info, warn};
use webhook_host::{SubscriberError, WebhookEvent, WebhookSubscriber};

const TEXT_PLAIN: &str = "text/plain; charset=utf-8";

/// Answers subscription handshakes of the form
/// `GET <webhook>?hub.verify_token=<token>&hub.challenge=<challenge>`.
///
/// A matching token echoes the challenge; anything else gets `403`.
#[derive(Clone)]
pub struct VerifyTokenSubscriber {
    token: String,
}

impl VerifyTokenSubscriber {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl std::fmt::Debug for VerifyTokenSubscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VerifyTokenSubscriber")
            .field("token", &"<REDACTED>")
            .finish()
    }
}

#[async_trait]
impl WebhookSubscriber for VerifyTokenSubscriber {
    async fn on_event(&self, event: &WebhookEvent) -> Result<(), SubscriberError> {
        let request = event.request();
        let response = event.response();

        match (
            request.query_param("hub.verify_token"),
            request.query_param("hub.challenge"),
        ) {
            (Some(token), Some(challenge)) if token == self.token => {
                response.set_content_type(TEXT_PLAIN)?;
                response.write(challenge);
                info!(correlation_id = %event.correlation_id(), "Verification challenge accepted");
            }
            _ => {
                response.set_status(StatusCode::FORBIDDEN);
                warn!(
                    correlation_id = %event.correlation_id(),
                    remote_addr = ?request.remote_addr(),
                    "Rejected verification request"
                );
            }
        }

        Ok(())
    }

    fn name(&self) -> &str {
        "verify-token"
    }
}

/// Writes the decoded POST body back with the request's content type.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoSubscriber;

#[async_trait]
impl WebhookSubscriber for EchoSubscriber {
    async fn on_event(&self, event: &WebhookEvent) -> Result<(), SubscriberError> {
        let body = event.body().unwrap_or_default();
        let content_type = event.request().content_type().unwrap_or(TEXT_PLAIN);

        info!(
            correlation_id = %event.correlation_id(),
            remote_addr = ?event.request().remote_addr(),
            body_size = body.len(),
            "Echoing message"
        );
        debug!(correlation_id = %event.correlation_id(), text = body);

        let response = event.response();
        response.set_content_type(content_type)?;
        response.write(body);
        Ok(())
    }

    fn name(&self) -> &str {
        "echo"
    }
}

#[cfg(test)]
#[path = "subscribers_tests.rs"]
mod tests;

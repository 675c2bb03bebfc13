//! HTTP host: routing, request handlers and lifecycle.
//!
//! # Routes
//!
//! | Method | Path | Behaviour |
//! |--------|------|-----------|
//! | GET  | `status_path`  | Liveness probe, `text/html`, independent of subscribers |
//! | GET  | `webhook_path` | Publishes a [`EventKind::GetReceived`] event |
//! | POST | `webhook_path` | Reads the body, publishes a [`EventKind::PostReceived`] event |
//!
//! Anything else falls through to axum's `404`/`405` handling.
//!
//! # Lifecycle
//!
//! ```text
//! bind() ──► Bound ──start_receiving()──► Running ──shutdown()──► Stopping ──► Stopped
//!                                            └──────── serve error ─────────► Failed
//! ```
//!
//! [`WebhookServer::bind`] does all fallible setup (validation, TLS material,
//! socket bind). [`WebhookServer::start_receiving`] spawns the accept loop
//! and returns at once. [`WebhookServer::wait_for_shutdown`] (or
//! [`ShutdownHandle::wait_for_shutdown`]) blocks until the host has stopped.

use axum::{
    body::{Body, Bytes},
    extract::{ConnectInfo, DefaultBodyLimit, FromRequest, Request, State},
    http::{
        header::{CONTENT_LENGTH, CONTENT_TYPE},
        request::Parts,
        Extensions, HeaderMap, StatusCode,
    },
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use std::future::{Future, IntoFuture};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, info_span, warn, Instrument, Span};

use crate::config::HostConfig;
use crate::correlation::{CorrelationId, CorrelationIdGenerator};
use crate::envelope::{EventKind, RequestInfo, ResponseHandle, WebhookEvent};
use crate::errors::{RequestError, ServerError};
use crate::subscriber::{spawn_dispatch, SubscriberRegistry};
use crate::tls::{load_server_config, TlsListener, HANDSHAKE_TIMEOUT};

// ============================================================================
// Shared request state
// ============================================================================

/// State shared by every request handler
#[derive(Clone)]
pub struct HostState {
    config: Arc<HostConfig>,
    subscribers: SubscriberRegistry,
    correlation: Arc<CorrelationIdGenerator>,
    span: Span,
}

impl HostState {
    /// Create handler state; `addr` scopes the host's log span.
    pub fn new(config: HostConfig, subscribers: SubscriberRegistry, addr: SocketAddr) -> Self {
        Self {
            config: Arc::new(config),
            subscribers,
            correlation: Arc::new(CorrelationIdGenerator::new()),
            span: info_span!("webhook_host", addr = %addr),
        }
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    pub fn subscribers(&self) -> &SubscriberRegistry {
        &self.subscribers
    }

    /// The id the next accepted webhook request will receive.
    pub fn next_correlation_id(&self) -> CorrelationId {
        self.correlation.peek()
    }

    fn request_span(&self, correlation_id: CorrelationId, kind: EventKind) -> Span {
        info_span!(
            parent: &self.span,
            "webhook_request",
            correlation_id = %correlation_id,
            kind = %kind
        )
    }

    /// Dispatch an event to the subscribers of its kind and turn the response
    /// handle into the HTTP response.
    async fn publish(&self, event: WebhookEvent) -> Response {
        let response = event.response().clone();
        let subscribers = self.subscribers.snapshot(event.kind());
        debug!(subscribers = subscribers.len(), "Dispatching event");

        let report = spawn_dispatch(
            subscribers,
            Arc::new(event),
            self.config.webhook.failure_policy,
            Span::current(),
        )
        .await;

        let response = response.take_response();
        info!(
            status = %response.status(),
            invoked = report.invoked,
            failures = report.failures.len(),
            "Webhook request completed"
        );
        response
    }
}

/// Build the router for the status and webhook routes.
pub fn build_router(state: HostState) -> Router {
    let webhook_route = state.config.webhook.webhook_route();
    let status_route = state.config.webhook.status_route();
    let body_limit = DefaultBodyLimit::max(state.config.server.max_body_size);

    Router::new()
        .route(&status_route, get(handle_status))
        .route(&webhook_route, get(handle_get).post(handle_post))
        .layer(body_limit)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ============================================================================
// Handlers
// ============================================================================

async fn handle_status(State(state): State<HostState>, request: Request) -> Response {
    let ip = remote_addr(request.extensions())
        .map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string());
    debug!(parent: &state.span, remote_addr = %ip, "Status probe");

    let page = format!("<p>Webhook status: OK</p>IP: {}", ip);
    Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, "text/html; charset=utf-8")
        .body(Body::from(page))
        .unwrap_or_else(|e| {
            error!(parent: &state.span, error = %e, "Failed to build status page");
            StatusCode::OK.into_response()
        })
}

async fn handle_get(State(state): State<HostState>, request: Request) -> Response {
    let (parts, _body) = request.into_parts();
    let correlation_id = state.correlation.next_id();
    let span = state.request_span(correlation_id, EventKind::GetReceived);

    async move {
        let info = request_info(&parts);
        info!(
            remote_addr = ?info.remote_addr(),
            uri = %info.uri(),
            "Received webhook GET"
        );

        let event = WebhookEvent::get(correlation_id, info, ResponseHandle::new());
        state.publish(event).await
    }
    .instrument(span)
    .await
}

async fn handle_post(State(state): State<HostState>, request: Request) -> Response {
    let max_size = state.config.server.max_body_size;

    match declared_length(request.headers()) {
        None if state.config.webhook.require_content_length => {
            return RequestError::LengthRequired.into_response();
        }
        Some(size) if size > max_size as u64 => {
            return RequestError::PayloadTooLarge { size, max_size }.into_response();
        }
        _ => {}
    }

    let correlation_id = state.correlation.next_id();
    let span = state.request_span(correlation_id, EventKind::PostReceived);

    async move {
        let (parts, body) = request.into_parts();
        let info = request_info(&parts);

        let body = match read_body(parts, body, max_size).await {
            Ok(body) => body,
            Err(e) => return e.into_response(),
        };

        info!(
            remote_addr = ?info.remote_addr(),
            content_type = info.content_type().unwrap_or("-"),
            body_size = body.len(),
            "Received webhook POST"
        );

        let event = WebhookEvent::post(correlation_id, info, ResponseHandle::new(), body);
        state.publish(event).await
    }
    .instrument(span)
    .await
}

/// Buffer the whole body. The limit comes from the router's
/// [`DefaultBodyLimit`] layer and also applies to chunked bodies.
async fn read_body(parts: Parts, body: Body, max_size: usize) -> Result<Bytes, RequestError> {
    Bytes::from_request(Request::from_parts(parts, body), &())
        .await
        .map_err(|rejection| {
            if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
                RequestError::BodyTooLarge { max_size }
            } else {
                RequestError::BodyRead {
                    message: rejection.body_text(),
                }
            }
        })
}

fn request_info(parts: &Parts) -> RequestInfo {
    RequestInfo::from_parts(parts, remote_addr(&parts.extensions))
}

fn remote_addr(extensions: &Extensions) -> Option<SocketAddr> {
    extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr)
}

fn declared_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

// ============================================================================
// Lifecycle
// ============================================================================

/// Observable lifecycle state of a [`WebhookServer`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerState {
    /// Listener bound, not yet accepting
    Bound,
    /// Accepting connections
    Running,
    /// Shutdown requested, draining in-flight requests
    Stopping,
    /// Accept loop has stopped
    Stopped,
    /// Accept loop ended with an error
    Failed { message: String },
}

impl ServerState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped | Self::Failed { .. })
    }
}

/// Clonable handle for stopping a server and observing its state.
#[derive(Clone)]
pub struct ShutdownHandle {
    trigger: Arc<watch::Sender<bool>>,
    state: watch::Receiver<ServerState>,
}

impl ShutdownHandle {
    /// Request a graceful stop. Idempotent.
    pub fn shutdown(&self) {
        self.trigger.send_replace(true);
    }

    pub fn is_shutdown_requested(&self) -> bool {
        *self.trigger.borrow()
    }

    pub fn state(&self) -> ServerState {
        self.state.borrow().clone()
    }

    /// Wait until the server has started and then stopped.
    ///
    /// Returns `ServerFailed` when the accept loop ended with an error or the
    /// server was dropped without ever running.
    pub async fn wait_for_shutdown(&self) -> Result<(), ServerError> {
        let mut state = self.state.clone();
        let terminal = match state.wait_for(ServerState::is_terminal).await {
            Ok(terminal) => terminal.clone(),
            Err(_) => {
                return Err(ServerError::ServerFailed {
                    message: "server was dropped before it stopped".to_string(),
                })
            }
        };

        match terminal {
            ServerState::Failed { message } => Err(ServerError::ServerFailed { message }),
            _ => Ok(()),
        }
    }

    async fn requested(&self) {
        let mut trigger = self.trigger.subscribe();
        // The sender lives in `self`, so this only returns once triggered.
        let _ = trigger.wait_for(|requested| *requested).await;
    }
}

impl std::fmt::Debug for ShutdownHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownHandle")
            .field("shutdown_requested", &self.is_shutdown_requested())
            .field("state", &self.state())
            .finish()
    }
}

/// Webhook host bound to a listening socket.
///
/// ```rust,no_run
/// use webhook_host::{subscriber_fn, HostConfig, SubscriberRegistry, WebhookServer};
///
/// # async fn run() -> Result<(), webhook_host::ServerError> {
/// let registry = SubscriberRegistry::new();
/// registry.on_post(subscriber_fn("log", |event| {
///     println!("{}: {:?}", event.correlation_id(), event.body());
///     Ok(())
/// }));
///
/// let mut server = WebhookServer::bind(HostConfig::default(), registry).await?;
/// server.start_receiving()?;
/// server.wait_for_shutdown().await
/// # }
/// ```
pub struct WebhookServer {
    state: HostState,
    listener: Option<TcpListener>,
    tls: Option<Arc<rustls::ServerConfig>>,
    local_addr: SocketAddr,
    status: Arc<watch::Sender<ServerState>>,
    handle: ShutdownHandle,
}

impl WebhookServer {
    /// Validate the configuration, load TLS material and bind the listener.
    ///
    /// The returned server is bound but does not accept connections until
    /// [`start_receiving`](Self::start_receiving) is called.
    pub async fn bind(
        config: HostConfig,
        subscribers: SubscriberRegistry,
    ) -> Result<Self, ServerError> {
        config.validate()?;

        let tls = config.tls.as_ref().map(load_server_config).transpose()?;

        let address = config.server.bind_address();
        let bind_failed = |e: std::io::Error| ServerError::BindFailed {
            address: address.clone(),
            message: e.to_string(),
        };
        let listener = TcpListener::bind(&address).await.map_err(bind_failed)?;
        let local_addr = listener.local_addr().map_err(bind_failed)?;

        let state = HostState::new(config, subscribers, local_addr);
        let (status, state_rx) = watch::channel(ServerState::Bound);
        let (trigger, _) = watch::channel(false);

        info!(
            parent: &state.span,
            tls = tls.is_some(),
            webhook_path = %state.config.webhook.webhook_route(),
            status_path = %state.config.webhook.status_route(),
            "Webhook host bound"
        );

        Ok(Self {
            state,
            listener: Some(listener),
            tls,
            local_addr,
            status: Arc::new(status),
            handle: ShutdownHandle {
                trigger: Arc::new(trigger),
                state: state_rx,
            },
        })
    }

    /// Start accepting connections in the background and return immediately.
    ///
    /// Must be called from within a Tokio runtime. A second call fails with
    /// [`ServerError::AlreadyStarted`].
    pub fn start_receiving(&mut self) -> Result<(), ServerError> {
        let listener = self.listener.take().ok_or(ServerError::AlreadyStarted)?;

        let app = build_router(self.state.clone())
            .into_make_service_with_connect_info::<SocketAddr>();
        let signal = shutdown_signal(
            self.handle.clone(),
            self.state.config.server.handle_os_signals,
        );
        let drain_timeout = Duration::from_secs(self.state.config.server.shutdown_timeout_seconds);
        let span = self.state.span.clone();

        match self.tls.clone() {
            Some(tls) => {
                let listener = TlsListener::spawn(listener, tls, HANDSHAKE_TIMEOUT).map_err(|e| {
                    let message = e.to_string();
                    self.status.send_replace(ServerState::Failed {
                        message: message.clone(),
                    });
                    ServerError::ServerFailed { message }
                })?;
                // No-op tap: lets axum's `Connected` impl supply `SocketAddr`.
                let listener = axum::serve::ListenerExt::tap_io(listener, |_| {});
                let serve = axum::serve(listener, app).with_graceful_shutdown(signal);
                tokio::spawn(
                    run_until_stopped(
                        serve.into_future(),
                        self.handle.clone(),
                        self.status.clone(),
                        drain_timeout,
                    )
                    .instrument(span),
                );
            }
            None => {
                let serve = axum::serve(listener, app).with_graceful_shutdown(signal);
                tokio::spawn(
                    run_until_stopped(
                        serve.into_future(),
                        self.handle.clone(),
                        self.status.clone(),
                        drain_timeout,
                    )
                    .instrument(span),
                );
            }
        }

        Ok(())
    }

    /// Wait until the host has stopped accepting.
    ///
    /// Fails with [`ServerError::NotStarted`] if
    /// [`start_receiving`](Self::start_receiving) was never called.
    pub async fn wait_for_shutdown(&self) -> Result<(), ServerError> {
        if self.listener.is_some() {
            return Err(ServerError::NotStarted);
        }
        self.handle.wait_for_shutdown().await
    }

    /// Request a graceful stop.
    pub fn shutdown(&self) {
        self.handle.shutdown();
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.handle.clone()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn config(&self) -> &HostConfig {
        self.state.config()
    }

    /// Registry shared with the request handlers; subscribing here takes
    /// effect for the next request.
    pub fn subscribers(&self) -> &SubscriberRegistry {
        self.state.subscribers()
    }

    pub fn state(&self) -> ServerState {
        self.handle.state()
    }

    pub fn is_tls(&self) -> bool {
        self.tls.is_some()
    }
}

impl std::fmt::Debug for WebhookServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookServer")
            .field("local_addr", &self.local_addr)
            .field("tls", &self.is_tls())
            .field("state", &self.state())
            .finish()
    }
}

/// Drive the serve future, publishing lifecycle transitions.
///
/// Once shutdown is requested, in-flight requests get `drain_timeout` to
/// finish before the serve future is dropped.
async fn run_until_stopped<F>(
    serve: F,
    handle: ShutdownHandle,
    status: Arc<watch::Sender<ServerState>>,
    drain_timeout: Duration,
) where
    F: Future<Output = std::io::Result<()>> + Send,
{
    status.send_replace(ServerState::Running);
    info!("Webhook host receiving");

    let drain_deadline = async {
        handle.requested().await;
        status.send_replace(ServerState::Stopping);
        info!(
            timeout_seconds = drain_timeout.as_secs(),
            "Draining in-flight requests"
        );
        tokio::time::sleep(drain_timeout).await;
    };

    let outcome = tokio::select! {
        result = serve => result.map_err(|e| e.to_string()),
        _ = drain_deadline => {
            warn!("Shutdown timeout elapsed with requests still in flight");
            Ok(())
        }
    };

    match outcome {
        Ok(()) => {
            info!("Webhook host stopped");
            status.send_replace(ServerState::Stopped);
        }
        Err(message) => {
            error!(error = %message, "Webhook host failed");
            status.send_replace(ServerState::Failed { message });
        }
    }
}

/// Resolves when the handle is triggered or, if enabled, on Ctrl+C/SIGTERM.
async fn shutdown_signal(handle: ShutdownHandle, handle_os_signals: bool) {
    let os_signal = async {
        if handle_os_signals {
            wait_for_os_signal().await;
        } else {
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        _ = handle.requested() => info!("Shutdown requested"),
        _ = os_signal => {}
    }

    // Starts the drain deadline for OS-initiated shutdowns as well.
    handle.shutdown();
}

async fn wait_for_os_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT (Ctrl+C), initiating graceful shutdown"),
        _ = terminate => info!("Received SIGTERM, initiating graceful shutdown"),
    }
}

#[cfg(test)]
#[path = "server_tests.rs"]
mod tests;

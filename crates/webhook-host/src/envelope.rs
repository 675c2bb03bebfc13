//! Per-request event envelope handed to subscribers.
//!
//! A [`WebhookEvent`] is built for every accepted GET or POST on the webhook
//! path. It carries a snapshot of the inbound request, the raw and decoded
//! body (POST only) and a [`ResponseHandle`] that subscribers write to. Once
//! dispatch completes the envelope is dropped and the handle's accumulated
//! state becomes the HTTP response.

use axum::{
    body::Body,
    http::{
        header::CONTENT_TYPE, request::Parts, HeaderMap, HeaderName, HeaderValue, Method,
        StatusCode, Uri,
    },
    response::Response,
};
use bytes::{Bytes, BytesMut};
use serde::de::DeserializeOwned;
use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::correlation::CorrelationId;

/// Event stream a request is published on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    GetReceived,
    PostReceived,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GetReceived => "get_received",
            Self::PostReceived => "post_received",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Request snapshot
// ============================================================================

/// Inbound request data visible to subscribers
#[derive(Debug, Clone)]
pub struct RequestInfo {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    remote_addr: Option<SocketAddr>,
    query: Vec<(String, String)>,
}

impl RequestInfo {
    pub fn new(
        method: Method,
        uri: Uri,
        headers: HeaderMap,
        remote_addr: Option<SocketAddr>,
    ) -> Self {
        let query = uri
            .query()
            .map(|q| {
                url::form_urlencoded::parse(q.as_bytes())
                    .into_owned()
                    .collect()
            })
            .unwrap_or_default();

        Self {
            method,
            uri,
            headers,
            remote_addr,
            query,
        }
    }

    pub fn from_parts(parts: &Parts, remote_addr: Option<SocketAddr>) -> Self {
        Self::new(
            parts.method.clone(),
            parts.uri.clone(),
            parts.headers.clone(),
            remote_addr,
        )
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn path(&self) -> &str {
        self.uri.path()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Header value as text; `None` when absent or not visible ASCII.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header(CONTENT_TYPE.as_str())
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    /// Decoded query string pairs in their original order.
    pub fn query_pairs(&self) -> &[(String, String)] {
        &self.query
    }

    /// First query value for `name`.
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

// ============================================================================
// Response handle
// ============================================================================

#[derive(Debug)]
struct ResponseState {
    status: StatusCode,
    headers: HeaderMap,
    body: BytesMut,
    written: bool,
}

impl Default for ResponseState {
    fn default() -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: BytesMut::new(),
            written: false,
        }
    }
}

/// Writable outbound response shared by all subscribers of one request.
///
/// Starts as an empty `200 OK`. Each setter marks the response as written.
/// Locks are held only for the duration of a single call.
#[derive(Debug, Clone, Default)]
pub struct ResponseHandle {
    state: Arc<Mutex<ResponseState>>,
}

impl ResponseHandle {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ResponseState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_status(&self, status: StatusCode) {
        let mut state = self.lock();
        state.status = status;
        state.written = true;
    }

    pub fn status(&self) -> StatusCode {
        self.lock().status
    }

    /// Insert a header, replacing any previous value for the same name.
    pub fn insert_header(&self, name: HeaderName, value: HeaderValue) {
        let mut state = self.lock();
        state.headers.insert(name, value);
        state.written = true;
    }

    /// Insert a header from text, validating name and value.
    pub fn set_header(&self, name: &str, value: &str) -> Result<(), axum::http::Error> {
        let name = HeaderName::try_from(name)?;
        let value = HeaderValue::try_from(value)?;
        self.insert_header(name, value);
        Ok(())
    }

    pub fn set_content_type(&self, content_type: &str) -> Result<(), axum::http::Error> {
        let value = HeaderValue::try_from(content_type)?;
        self.insert_header(CONTENT_TYPE, value);
        Ok(())
    }

    pub fn header(&self, name: &str) -> Option<HeaderValue> {
        self.lock().headers.get(name).cloned()
    }

    /// Append bytes to the body.
    pub fn write(&self, data: impl AsRef<[u8]>) {
        let mut state = self.lock();
        state.body.extend_from_slice(data.as_ref());
        state.written = true;
    }

    /// Replace the body.
    pub fn set_body(&self, data: impl Into<Bytes>) {
        let data = data.into();
        let mut state = self.lock();
        state.body.clear();
        state.body.extend_from_slice(&data);
        state.written = true;
    }

    /// Copy of the body written so far.
    pub fn body(&self) -> Bytes {
        Bytes::copy_from_slice(&self.lock().body)
    }

    /// Whether any subscriber has touched the response.
    pub fn is_written(&self) -> bool {
        self.lock().written
    }

    /// Move the accumulated state out as an HTTP response, leaving the handle
    /// reset to an empty `200 OK`.
    pub(crate) fn take_response(&self) -> Response {
        let state = std::mem::take(&mut *self.lock());

        let mut response = Response::new(Body::from(state.body.freeze()));
        *response.status_mut() = state.status;
        *response.headers_mut() = state.headers;
        response
    }
}

// ============================================================================
// Event envelope
// ============================================================================

/// Envelope for one accepted webhook request
#[derive(Debug)]
pub struct WebhookEvent {
    correlation_id: CorrelationId,
    kind: EventKind,
    request: RequestInfo,
    response: ResponseHandle,
    body_raw: Option<Bytes>,
    body: Option<String>,
}

impl WebhookEvent {
    /// Envelope for a GET request; no body fields are populated.
    pub fn get(
        correlation_id: CorrelationId,
        request: RequestInfo,
        response: ResponseHandle,
    ) -> Self {
        Self {
            correlation_id,
            kind: EventKind::GetReceived,
            request,
            response,
            body_raw: None,
            body: None,
        }
    }

    /// Envelope for a POST request with the full body.
    ///
    /// The text form is decoded leniently: invalid UTF-8 sequences become
    /// U+FFFD instead of failing the request.
    pub fn post(
        correlation_id: CorrelationId,
        request: RequestInfo,
        response: ResponseHandle,
        body_raw: Bytes,
    ) -> Self {
        let body = decode_body(&body_raw);
        Self {
            correlation_id,
            kind: EventKind::PostReceived,
            request,
            response,
            body_raw: Some(body_raw),
            body: Some(body),
        }
    }

    pub fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn request(&self) -> &RequestInfo {
        &self.request
    }

    pub fn response(&self) -> &ResponseHandle {
        &self.response
    }

    /// Raw body bytes (POST only).
    pub fn body_raw(&self) -> Option<&Bytes> {
        self.body_raw.as_ref()
    }

    /// Body decoded as UTF-8 text (POST only).
    pub fn body(&self) -> Option<&str> {
        self.body.as_deref()
    }

    /// Deserialize the raw body as JSON.
    pub fn body_json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(self.body_raw.as_deref().unwrap_or_default())
    }
}

/// Lenient UTF-8 decode used for POST bodies.
pub fn decode_body(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).into_owned()
}

#[cfg(test)]
#[path = "envelope_tests.rs"]
mod tests;

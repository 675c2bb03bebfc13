//! Subscriber registration and dispatch.
//!
//! Applications implement [`WebhookSubscriber`] (or wrap a closure with
//! [`subscriber_fn`]) and register it for [`EventKind::GetReceived`] or
//! [`EventKind::PostReceived`] on a [`SubscriberRegistry`]. For every accepted
//! request the host takes a snapshot of the matching list and calls each
//! subscriber in registration order with the same [`WebhookEvent`].
//!
//! # Registration
//!
//! Each list is copy-on-write: `subscribe`/`unsubscribe` build a new list and
//! swap it in under a short write lock. Dispatch clones the current snapshot
//! and never holds the lock while a subscriber runs, so registering at
//! runtime is safe while requests are in flight.
//!
//! # Failure boundary
//!
//! Subscriber errors and panics are caught, logged once with the request's
//! correlation id and recorded in the [`DispatchReport`]. With
//! [`FailurePolicy::Abort`] the remaining subscribers for that request are
//! skipped; with [`FailurePolicy::Continue`] they still run.
//!
//! ```rust
//! use std::sync::Arc;
//! use webhook_host::{subscriber_fn, SubscriberRegistry};
//!
//! let registry = SubscriberRegistry::new();
//! registry.on_post(subscriber_fn("echo", |event| {
//!     event.response().write(event.body().unwrap_or_default());
//!     Ok(())
//! }));
//! assert_eq!(registry.len(webhook_host::EventKind::PostReceived), 1);
//! ```

use async_trait::async_trait;
use futures::FutureExt;
use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, error, Instrument, Span};

use crate::config::FailurePolicy;
use crate::envelope::{EventKind, WebhookEvent};
use crate::errors::{DispatchError, SubscriberError};

/// Application callback for webhook events.
///
/// The same envelope instance is passed to every subscriber of a request;
/// subscribers write the HTTP response through
/// [`WebhookEvent::response`]. Subscribers of different requests may run
/// concurrently, so any shared state needs its own synchronization.
#[async_trait]
pub trait WebhookSubscriber: Send + Sync {
    /// Handle one event.
    async fn on_event(&self, event: &WebhookEvent) -> Result<(), SubscriberError>;

    /// Name used in log lines.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// Subscriber backed by a synchronous closure
pub struct FnSubscriber<F> {
    name: String,
    callback: F,
}

#[async_trait]
impl<F> WebhookSubscriber for FnSubscriber<F>
where
    F: Fn(&WebhookEvent) -> Result<(), SubscriberError> + Send + Sync,
{
    async fn on_event(&self, event: &WebhookEvent) -> Result<(), SubscriberError> {
        (self.callback)(event)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Wrap a closure as a subscriber.
pub fn subscriber_fn<F>(name: impl Into<String>, callback: F) -> Arc<dyn WebhookSubscriber>
where
    F: Fn(&WebhookEvent) -> Result<(), SubscriberError> + Send + Sync + 'static,
{
    Arc::new(FnSubscriber {
        name: name.into(),
        callback,
    })
}

// ============================================================================
// Registry
// ============================================================================

/// Handle returned by [`SubscriberRegistry::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One registered subscriber
#[derive(Clone)]
pub struct Registration {
    id: SubscriptionId,
    subscriber: Arc<dyn WebhookSubscriber>,
}

impl Registration {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn subscriber(&self) -> &Arc<dyn WebhookSubscriber> {
        &self.subscriber
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("id", &self.id)
            .field("subscriber", &self.subscriber.name())
            .finish()
    }
}

type Snapshot = Arc<Vec<Registration>>;

#[derive(Default)]
struct RegistryInner {
    get: RwLock<Snapshot>,
    post: RwLock<Snapshot>,
    last_id: AtomicU64,
}

/// Ordered subscriber lists for the GET and POST event streams.
///
/// Cloning the registry yields another handle to the same lists.
#[derive(Clone, Default)]
pub struct SubscriberRegistry {
    inner: Arc<RegistryInner>,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, kind: EventKind) -> &RwLock<Snapshot> {
        match kind {
            EventKind::GetReceived => &self.inner.get,
            EventKind::PostReceived => &self.inner.post,
        }
    }

    /// Append a subscriber to the list for `kind`.
    pub fn subscribe(
        &self,
        kind: EventKind,
        subscriber: Arc<dyn WebhookSubscriber>,
    ) -> SubscriptionId {
        let id = SubscriptionId(self.inner.last_id.fetch_add(1, Ordering::Relaxed) + 1);
        let name = subscriber.name().to_string();

        let mut slot = self.slot(kind).write().unwrap_or_else(PoisonError::into_inner);
        let mut next = Vec::with_capacity(slot.len() + 1);
        next.extend(slot.iter().cloned());
        next.push(Registration { id, subscriber });
        *slot = Arc::new(next);
        drop(slot);

        debug!(subscription_id = %id, kind = %kind, subscriber = %name, "Subscriber registered");
        id
    }

    pub fn on_get(&self, subscriber: Arc<dyn WebhookSubscriber>) -> SubscriptionId {
        self.subscribe(EventKind::GetReceived, subscriber)
    }

    pub fn on_post(&self, subscriber: Arc<dyn WebhookSubscriber>) -> SubscriptionId {
        self.subscribe(EventKind::PostReceived, subscriber)
    }

    /// Remove a subscription. Returns `false` if the id is unknown.
    ///
    /// Requests already dispatching keep the snapshot they started with.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        for kind in [EventKind::GetReceived, EventKind::PostReceived] {
            let mut slot = self.slot(kind).write().unwrap_or_else(PoisonError::into_inner);
            if slot.iter().any(|r| r.id == id) {
                let next: Vec<Registration> =
                    slot.iter().filter(|r| r.id != id).cloned().collect();
                *slot = Arc::new(next);
                drop(slot);

                debug!(subscription_id = %id, kind = %kind, "Subscriber removed");
                return true;
            }
        }
        false
    }

    /// Current subscriber list for `kind`, in registration order.
    pub fn snapshot(&self, kind: EventKind) -> Arc<Vec<Registration>> {
        self.slot(kind)
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self, kind: EventKind) -> usize {
        self.snapshot(kind).len()
    }

    pub fn is_empty(&self, kind: EventKind) -> bool {
        self.len(kind) == 0
    }
}

impl fmt::Debug for SubscriberRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriberRegistry")
            .field("get", &self.len(EventKind::GetReceived))
            .field("post", &self.len(EventKind::PostReceived))
            .finish()
    }
}

// ============================================================================
// Dispatch
// ============================================================================

/// Outcome of dispatching one event
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Subscribers that were called
    pub invoked: usize,

    /// Subscribers that returned `Ok`
    pub succeeded: usize,

    /// Failures in invocation order, each logged once
    pub failures: Vec<DispatchError>,

    /// Remaining subscribers were skipped after a failure
    pub aborted: bool,
}

impl DispatchReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Call each subscriber in order inside a fault boundary.
pub async fn dispatch(
    subscribers: &[Registration],
    event: &WebhookEvent,
    policy: FailurePolicy,
) -> DispatchReport {
    let mut report = DispatchReport::default();

    for (index, registration) in subscribers.iter().enumerate() {
        let subscriber = registration.subscriber();
        report.invoked += 1;

        let outcome = AssertUnwindSafe(subscriber.on_event(event))
            .catch_unwind()
            .await;

        let failure = match outcome {
            Ok(Ok(())) => {
                report.succeeded += 1;
                continue;
            }
            Ok(Err(e)) => DispatchError::SubscriberFailed {
                index,
                subscriber: subscriber.name().to_string(),
                message: e.to_string(),
            },
            Err(panic) => DispatchError::SubscriberPanicked {
                index,
                subscriber: subscriber.name().to_string(),
                message: panic_message(panic.as_ref()),
            },
        };

        error!(
            correlation_id = %event.correlation_id(),
            kind = %event.kind(),
            error = %failure,
            "Subscriber invocation failed"
        );
        report.failures.push(failure);

        if policy == FailurePolicy::Abort {
            report.aborted = index + 1 < subscribers.len();
            break;
        }
    }

    report
}

/// Run [`dispatch`] on its own task and wait for it.
///
/// Subscribers never execute on the connection task that accepted the
/// request; the caller still awaits completion so the request lifetime covers
/// every subscriber.
pub async fn spawn_dispatch(
    subscribers: Arc<Vec<Registration>>,
    event: Arc<WebhookEvent>,
    policy: FailurePolicy,
    span: Span,
) -> DispatchReport {
    let correlation_id = event.correlation_id();
    let task = tokio::spawn(
        async move { dispatch(&subscribers, &event, policy).await }.instrument(span),
    );

    match task.await {
        Ok(report) => report,
        Err(e) => {
            error!(correlation_id = %correlation_id, error = %e, "Dispatch task did not complete");
            DispatchReport {
                failures: vec![DispatchError::Cancelled {
                    message: e.to_string(),
                }],
                ..Default::default()
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
#[path = "subscriber_tests.rs"]
mod tests;

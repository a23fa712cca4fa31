//! C11 — Auxiliary notifiers.
//!
//! Deliberately thin: the source material this bridge was distilled from
//! showed two divergent, incompatible webhook payload shapes for booking
//! and CRM notifications, and guessing between them was rejected rather
//! than baked into the wire format. What's implemented is the minimum any
//! concrete notifier needs — a trait, a schema-agnostic envelope, and an
//! HTTP implementation using `reqwest` — with the actual payload contract
//! left to whoever wires a `Notifier` into their deployment.

use crate::id::CallId;
use async_trait::async_trait;
use serde::Serialize;
use tracing::warn;

/// Which lifecycle moment triggered a notification.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifierEventKind {
    Ringing,
    Answered,
    Ended,
}

/// The minimal, schema-agnostic envelope posted to a notifier. No
/// booking/CRM-specific fields are modeled here — see the module doc.
#[derive(Clone, Debug, Serialize)]
pub struct NotifierEvent {
    pub call_id: String,
    pub event_kind: NotifierEventKind,
    /// Milliseconds since the Unix epoch, stamped by the caller — this
    /// module never reads the clock itself so it stays deterministically
    /// testable.
    pub occurred_at_ms: u64,
}

impl NotifierEvent {
    pub fn new(call_id: &CallId, event_kind: NotifierEventKind, occurred_at_ms: u64) -> Self {
        Self { call_id: call_id.as_str().to_string(), event_kind, occurred_at_ms }
    }
}

/// A fire-and-forget sink for call-lifecycle events. Failures are the
/// implementation's concern to log, never the caller's to handle — C9's
/// call sites never propagate a notifier error into call teardown.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: NotifierEvent);
}

/// Posts the envelope as JSON to a fixed URL. Failures are logged and
/// swallowed; a down notification endpoint never affects call handling.
pub struct HttpNotifier {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpNotifier {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self { client: reqwest::Client::new(), endpoint: endpoint.into() }
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn notify(&self, event: NotifierEvent) {
        let result = self.client.post(&self.endpoint).json(&event).send().await;
        if let Err(e) = result {
            warn!(error = %e, endpoint = %self.endpoint, "notifier POST failed");
        }
    }
}

/// A no-op notifier for deployments (and tests) that don't wire one in.
pub struct NullNotifier;

#[async_trait]
impl Notifier for NullNotifier {
    async fn notify(&self, _event: NotifierEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingNotifier(Arc<AtomicUsize>);

    #[async_trait]
    impl Notifier for CountingNotifier {
        async fn notify(&self, _event: NotifierEvent) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn notifier_trait_object_can_be_invoked_dynamically() {
        let count = Arc::new(AtomicUsize::new(0));
        let notifier: Box<dyn Notifier> = Box::new(CountingNotifier(count.clone()));

        let call_id = CallId::generate();
        notifier.notify(NotifierEvent::new(&call_id, NotifierEventKind::Ringing, 0)).await;
        notifier.notify(NotifierEvent::new(&call_id, NotifierEventKind::Answered, 10)).await;

        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn null_notifier_is_a_harmless_no_op() {
        let call_id = CallId::generate();
        NullNotifier.notify(NotifierEvent::new(&call_id, NotifierEventKind::Ended, 0)).await;
    }
}

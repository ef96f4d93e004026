// Request observation
// Listeners see every dispatched request; they never affect its outcome

pub mod stats;

pub use stats::{RequestStats, RouteStats};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// One completed (or failed) HTTP exchange
#[derive(Debug, Clone)]
pub struct RequestEvent {
    pub request_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub method: String,
    /// Route template before context substitution, e.g. `/v2/spaces/{space_guid}/apps`
    pub route: String,
    /// Path actually requested
    pub path: String,
    /// `None` when no response was received
    pub status: Option<u16>,
    pub latency: Duration,
    /// Failure description for transport errors and non-2xx responses
    pub error: Option<String>,
}

impl RequestEvent {
    pub fn is_success(&self) -> bool {
        matches!(self.status, Some(200..=299))
    }
}

/// Receives request events. Called on the requesting thread.
pub trait RequestListener: Send + Sync {
    fn on_request(&self, event: &RequestEvent);
}

impl<F> RequestListener for F
where
    F: Fn(&RequestEvent) + Send + Sync,
{
    fn on_request(&self, event: &RequestEvent) {
        self(event)
    }
}

/// Handle returned by [`ListenerRegistry::register`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Registered listeners, notified in registration order
#[derive(Default)]
pub struct ListenerRegistry {
    listeners: RwLock<Vec<(ListenerId, Arc<dyn RequestListener>)>>,
    next_id: AtomicU64,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, listener: Arc<dyn RequestListener>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().push((id, listener));
        id
    }

    /// Returns false when the id was not registered
    pub fn unregister(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.read().is_empty()
    }

    /// Deliver to every listener. A panicking listener is logged and skipped.
    pub fn notify(&self, event: &RequestEvent) {
        // Snapshot so listeners may (un)register without deadlocking
        let listeners: Vec<Arc<dyn RequestListener>> = self
            .listeners
            .read()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();

        for listener in listeners {
            let delivered = catch_unwind(AssertUnwindSafe(|| listener.on_request(event)));
            if delivered.is_err() {
                tracing::warn!(
                    request_id = %event.request_id,
                    "Request listener panicked; event dropped for this listener"
                );
            }
        }
    }
}

/// Reports request events through `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingListener;

impl RequestListener for TracingListener {
    fn on_request(&self, event: &RequestEvent) {
        let latency_ms = event.latency.as_millis() as u64;
        match (&event.status, &event.error) {
            (Some(status), None) => tracing::info!(
                request_id = %event.request_id,
                method = %event.method,
                path = %event.path,
                status = status,
                latency_ms = latency_ms,
                "REST request"
            ),
            (status, error) => tracing::warn!(
                request_id = %event.request_id,
                method = %event.method,
                path = %event.path,
                status = ?status,
                latency_ms = latency_ms,
                error = error.as_deref().unwrap_or(""),
                "REST request failed"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn event(status: Option<u16>) -> RequestEvent {
        RequestEvent {
            request_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            method: "GET".to_string(),
            route: "/v2/info".to_string(),
            path: "/v2/info".to_string(),
            status,
            latency: Duration::from_millis(12),
            error: None,
        }
    }

    #[test]
    fn test_register_and_unregister() {
        let registry = ListenerRegistry::new();
        let count = Arc::new(AtomicUsize::new(0));

        let counter = count.clone();
        let id = registry.register(Arc::new(move |_: &RequestEvent| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(registry.len(), 1);

        registry.notify(&event(Some(200)));
        assert_eq!(count.load(Ordering::SeqCst), 1);

        assert!(registry.unregister(id));
        assert!(!registry.unregister(id));
        assert!(registry.is_empty());

        registry.notify(&event(Some(200)));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_panicking_listener_is_isolated() {
        let registry = ListenerRegistry::new();
        let count = Arc::new(AtomicUsize::new(0));

        registry.register(Arc::new(|_: &RequestEvent| panic!("listener bug")));
        let counter = count.clone();
        registry.register(Arc::new(move |_: &RequestEvent| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        registry.notify(&event(Some(500)));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_listener_ids_are_unique() {
        let registry = ListenerRegistry::new();
        let a = registry.register(Arc::new(TracingListener));
        let b = registry.register(Arc::new(TracingListener));
        assert_ne!(a, b);
    }

    #[test]
    fn test_event_success() {
        assert!(event(Some(204)).is_success());
        assert!(!event(Some(404)).is_success());
        assert!(!event(None).is_success());
    }
}

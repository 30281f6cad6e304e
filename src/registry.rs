//! Named-event subscription registry
//!
//! Consumers register handlers per event name and get back a [`Subscription`]
//! disposer. Handlers for one name run in registration order; removing one
//! registration never touches the others.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use serde_json::Value;

/// Event handler. Runs on the connection task, so it must return quickly.
pub type Handler = Arc<dyn Fn(&Value) + Send + Sync>;

struct Registration {
    id: u64,
    handler: Handler,
}

#[derive(Default)]
struct Inner {
    handlers: RwLock<HashMap<String, Vec<Registration>>>,
    next_id: AtomicU64,
}

impl Inner {
    fn remove(&self, event: &str, id: u64) -> bool {
        let mut handlers = self.handlers.write();
        let Some(list) = handlers.get_mut(event) else {
            return false;
        };
        let before = list.len();
        list.retain(|r| r.id != id);
        let removed = list.len() != before;
        if list.is_empty() {
            handlers.remove(event);
        }
        removed
    }
}

/// Registry of handlers keyed by event name. Cloning shares the registry.
#[derive(Clone, Default)]
pub struct EventRegistry {
    inner: Arc<Inner>,
}

impl EventRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `event`
    pub fn on<F>(&self, event: impl Into<String>, handler: F) -> Subscription
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let event = event.into();
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .handlers
            .write()
            .entry(event.clone())
            .or_default()
            .push(Registration {
                id,
                handler: Arc::new(handler),
            });

        Subscription {
            registry: Arc::downgrade(&self.inner),
            event,
            id,
        }
    }

    /// Deliver `payload` to every handler of `event`, returning how many ran.
    ///
    /// The handler list is snapshotted before calling out, so handlers may
    /// subscribe or unsubscribe freely while being invoked.
    pub fn dispatch(&self, event: &str, payload: &Value) -> usize {
        let snapshot: Vec<Handler> = match self.inner.handlers.read().get(event) {
            Some(list) => list.iter().map(|r| r.handler.clone()).collect(),
            None => return 0,
        };

        for handler in &snapshot {
            if catch_unwind(AssertUnwindSafe(|| handler(payload))).is_err() {
                tracing::error!(event, "event handler panicked");
            }
        }
        snapshot.len()
    }

    /// Number of handlers registered for `event`
    pub fn handler_count(&self, event: &str) -> usize {
        self.inner
            .handlers
            .read()
            .get(event)
            .map_or(0, Vec::len)
    }

    /// Event names with at least one handler
    pub fn event_names(&self) -> Vec<String> {
        self.inner.handlers.read().keys().cloned().collect()
    }

    /// Drop every registration
    pub fn clear(&self) {
        self.inner.handlers.write().clear();
    }
}

impl std::fmt::Debug for EventRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let handlers = self.inner.handlers.read();
        f.debug_map()
            .entries(handlers.iter().map(|(k, v)| (k, v.len())))
            .finish()
    }
}

/// Disposer for one registration. Dropping it unsubscribes.
#[must_use = "dropping a Subscription removes its handler immediately"]
pub struct Subscription {
    registry: Weak<Inner>,
    event: String,
    id: u64,
}

impl Subscription {
    pub fn event(&self) -> &str {
        &self.event
    }

    /// Whether the handler is still registered
    pub fn is_active(&self) -> bool {
        self.registry.upgrade().is_some_and(|inner| {
            inner
                .handlers
                .read()
                .get(&self.event)
                .is_some_and(|list| list.iter().any(|r| r.id == self.id))
        })
    }

    /// Remove the handler now
    pub fn unsubscribe(self) {
        // Drop does the work
    }

    fn detach(&mut self) {
        if let Some(inner) = self.registry.upgrade() {
            inner.remove(&self.event, self.id);
        }
        self.registry = Weak::new();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.detach();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("event", &self.event)
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;

    fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&str) -> Handler) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let log_clone = log.clone();
        let make = move |tag: &str| -> Handler {
            let log = log_clone.clone();
            let tag = tag.to_string();
            Arc::new(move |_: &Value| log.lock().push(tag.clone()))
        };
        (log, make)
    }

    #[test]
    fn test_handlers_fire_in_registration_order() {
        let registry = EventRegistry::new();
        let (log, make) = recorder();
        let first = make("first");
        let second = make("second");
        let _a = registry.on("update:content", move |v| first(v));
        let _b = registry.on("update:content", move |v| second(v));

        let ran = registry.dispatch("update:content", &json!({}));
        assert_eq!(ran, 2);
        assert_eq!(*log.lock(), vec!["first", "second"]);
    }

    #[test]
    fn test_unsubscribe_isolation() {
        let registry = EventRegistry::new();
        let (log, make) = recorder();
        let h = make("h");
        let other = make("other");
        let sub_h = registry.on("new:content", move |v| h(v));
        let _sub_other = registry.on("new:content", move |v| other(v));

        registry.dispatch("new:content", &Value::Null);
        sub_h.unsubscribe();
        registry.dispatch("new:content", &Value::Null);

        assert_eq!(*log.lock(), vec!["h", "other", "other"]);
        assert_eq!(registry.handler_count("new:content"), 1);
    }

    #[test]
    fn test_drop_unsubscribes() {
        let registry = EventRegistry::new();
        {
            let sub = registry.on("delete:content", |_| {});
            assert!(sub.is_active());
            assert_eq!(registry.handler_count("delete:content"), 1);
        }
        assert_eq!(registry.handler_count("delete:content"), 0);
        assert!(registry.event_names().is_empty());
    }

    #[test]
    fn test_unsubscribe_during_delivery() {
        let registry = EventRegistry::new();
        let count = Arc::new(AtomicU64::new(0));
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));

        let slot_clone = slot.clone();
        let _remover = registry.on("update:content", move |_| {
            slot_clone.lock().take();
        });
        let count_clone = count.clone();
        *slot.lock() = Some(registry.on("update:content", move |_| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        }));

        // In-flight delivery may still reach the removed handler
        registry.dispatch("update:content", &Value::Null);
        let after_first = count.load(Ordering::SeqCst);
        assert!(after_first <= 1);

        registry.dispatch("update:content", &Value::Null);
        assert_eq!(count.load(Ordering::SeqCst), after_first);
    }

    #[test]
    fn test_panicking_handler_does_not_block_others() {
        let registry = EventRegistry::new();
        let count = Arc::new(AtomicU64::new(0));
        let _bad = registry.on("new:content", |_| panic!("boom"));
        let count_clone = count.clone();
        let _good = registry.on("new:content", move |_| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(registry.dispatch("new:content", &Value::Null), 2);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_subscription_outlives_registry() {
        let registry = EventRegistry::new();
        let sub = registry.on("new:content", |_| {});
        drop(registry);
        assert!(!sub.is_active());
        drop(sub);
    }
}

//! Listener registry and dispatch for decoded push envelopes.
//!
//! The router fans each envelope out to the listeners registered for its
//! kind, then to the wildcard listeners, in registration order. A failing
//! listener is isolated: its error (or panic) is logged and the remaining
//! listeners still run.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crate::envelope::{EventKind, PushEnvelope};

/// Error a listener may surface; never propagated past the router.
pub type ListenerError = Box<dyn std::error::Error + Send + Sync>;

type Listener = Arc<dyn Fn(&PushEnvelope) -> Result<(), ListenerError> + Send + Sync>;

/// Key under which a listener is registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum SubscriptionKey {
    Kind(EventKind),
    Any,
}

struct Registration {
    id: u64,
    listener: Listener,
}

#[derive(Default)]
struct RouterInner {
    registry: Mutex<HashMap<SubscriptionKey, Vec<Registration>>>,
    next_id: AtomicU64,
}

/// Fan-out registry for push envelopes.
///
/// Cheap to clone; clones share the same registry. Registration is
/// append-only under the registry lock, and dispatch iterates a snapshot,
/// so unsubscribing mid-dispatch neither skips nor duplicates delivery for
/// the envelope in flight.
#[derive(Clone, Default)]
pub struct EventRouter {
    inner: Arc<RouterInner>,
}

impl EventRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener for one event kind. The returned handle removes
    /// exactly this registration.
    pub fn subscribe<F>(&self, kind: EventKind, listener: F) -> SubscriptionHandle
    where
        F: Fn(&PushEnvelope) -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        self.register(SubscriptionKey::Kind(kind), Arc::new(listener))
    }

    /// Register a listener for every event kind. Wildcard listeners run
    /// after the kind-specific ones.
    pub fn subscribe_all<F>(&self, listener: F) -> SubscriptionHandle
    where
        F: Fn(&PushEnvelope) -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        self.register(SubscriptionKey::Any, Arc::new(listener))
    }

    fn register(&self, key: SubscriptionKey, listener: Listener) -> SubscriptionHandle {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let mut registry = self.inner.registry.lock().unwrap();
        registry
            .entry(key)
            .or_default()
            .push(Registration { id, listener });
        SubscriptionHandle {
            router: Arc::downgrade(&self.inner),
            key,
            id,
        }
    }

    /// Deliver one envelope: kind-specific listeners first, wildcard
    /// listeners second, registration order within each group.
    pub fn dispatch(&self, envelope: &PushEnvelope) {
        let kind = envelope.kind();
        let snapshot: Vec<Listener> = {
            let registry = self.inner.registry.lock().unwrap();
            let typed = registry.get(&SubscriptionKey::Kind(kind));
            let wildcard = registry.get(&SubscriptionKey::Any);
            typed
                .into_iter()
                .chain(wildcard)
                .flatten()
                .map(|registration| Arc::clone(&registration.listener))
                .collect()
        };

        for listener in snapshot {
            match catch_unwind(AssertUnwindSafe(|| listener(envelope))) {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    log::error!("listener failed while handling {kind:?} event: {err}");
                }
                Err(_) => {
                    log::error!("listener panicked while handling {kind:?} event");
                }
            }
        }
    }

    /// Total live registrations, wildcard included.
    pub fn listener_count(&self) -> usize {
        let registry = self.inner.registry.lock().unwrap();
        registry.values().map(Vec::len).sum()
    }
}

/// Handle to one registration on an [`EventRouter`].
pub struct SubscriptionHandle {
    router: Weak<RouterInner>,
    key: SubscriptionKey,
    id: u64,
}

impl SubscriptionHandle {
    /// Remove the registration this handle was issued for. Removes exactly
    /// one entry: a listener registered twice stays registered once.
    pub fn unsubscribe(self) {
        let Some(inner) = self.router.upgrade() else {
            return;
        };
        let mut registry = inner.registry.lock().unwrap();
        if let Some(list) = registry.get_mut(&self.key) {
            if let Some(position) = list.iter().position(|r| r.id == self.id) {
                list.remove(position);
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{AlertLevel, EventPayload, SystemAlert};
    use chrono::Utc;

    fn alert_envelope(level: AlertLevel) -> PushEnvelope {
        PushEnvelope {
            payload: EventPayload::SystemAlert(SystemAlert {
                level,
                title: "t".to_string(),
                message: "m".to_string(),
                action: None,
            }),
            timestamp: Utc::now(),
            message_id: "m-1".to_string(),
        }
    }

    /// Listener that appends `label` to a shared log.
    fn recording(log: &Arc<Mutex<Vec<&'static str>>>, label: &'static str) -> impl Fn(&PushEnvelope) -> Result<(), ListenerError> {
        let log = Arc::clone(log);
        move |_| {
            log.lock().unwrap().push(label);
            Ok(())
        }
    }

    mod dispatch {
        use super::*;

        #[test]
        fn kind_listeners_before_wildcard_in_registration_order() {
            let router = EventRouter::new();
            let log = Arc::new(Mutex::new(Vec::new()));

            router.subscribe_all(recording(&log, "any-1"));
            router.subscribe(EventKind::SystemAlert, recording(&log, "alert-1"));
            router.subscribe(EventKind::SystemAlert, recording(&log, "alert-2"));
            router.subscribe_all(recording(&log, "any-2"));

            router.dispatch(&alert_envelope(AlertLevel::Info));

            assert_eq!(
                *log.lock().unwrap(),
                vec!["alert-1", "alert-2", "any-1", "any-2"]
            );
        }

        #[test]
        fn other_kinds_only_reach_wildcard() {
            let router = EventRouter::new();
            let log = Arc::new(Mutex::new(Vec::new()));

            router.subscribe(EventKind::NewVideo, recording(&log, "video"));
            router.subscribe_all(recording(&log, "any"));

            router.dispatch(&alert_envelope(AlertLevel::Info));

            assert_eq!(*log.lock().unwrap(), vec!["any"]);
        }

        #[test]
        fn failing_listener_does_not_block_the_rest() {
            let router = EventRouter::new();
            let log = Arc::new(Mutex::new(Vec::new()));

            router.subscribe(EventKind::SystemAlert, |_| Err("boom".into()));
            router.subscribe(EventKind::SystemAlert, recording(&log, "after-err"));
            router.subscribe_all(recording(&log, "wildcard"));

            router.dispatch(&alert_envelope(AlertLevel::Error));

            assert_eq!(*log.lock().unwrap(), vec!["after-err", "wildcard"]);
        }

        #[test]
        fn panicking_listener_does_not_block_the_rest() {
            let router = EventRouter::new();
            let log = Arc::new(Mutex::new(Vec::new()));

            router.subscribe(EventKind::SystemAlert, |_| panic!("listener bug"));
            router.subscribe(EventKind::SystemAlert, recording(&log, "survivor"));

            router.dispatch(&alert_envelope(AlertLevel::Error));

            assert_eq!(*log.lock().unwrap(), vec!["survivor"]);
        }

        #[test]
        fn unsubscribe_during_dispatch_still_delivers_current_envelope() {
            let router = EventRouter::new();
            let log = Arc::new(Mutex::new(Vec::new()));

            // First listener removes the second mid-dispatch; the second
            // must still see the envelope being dispatched, but not the
            // next one.
            let victim: Arc<Mutex<Option<SubscriptionHandle>>> = Arc::new(Mutex::new(None));
            let victim_slot = Arc::clone(&victim);
            router.subscribe(EventKind::SystemAlert, move |_| {
                if let Some(handle) = victim_slot.lock().unwrap().take() {
                    handle.unsubscribe();
                }
                Ok(())
            });
            let handle = router.subscribe(EventKind::SystemAlert, recording(&log, "victim"));
            *victim.lock().unwrap() = Some(handle);

            router.dispatch(&alert_envelope(AlertLevel::Info));
            assert_eq!(*log.lock().unwrap(), vec!["victim"]);

            router.dispatch(&alert_envelope(AlertLevel::Info));
            assert_eq!(*log.lock().unwrap(), vec!["victim"]);
        }
    }

    mod subscriptions {
        use super::*;

        #[test]
        fn unsubscribe_removes_exactly_one_registration() {
            let router = EventRouter::new();
            let log = Arc::new(Mutex::new(Vec::new()));

            let first = router.subscribe(EventKind::NewVideo, recording(&log, "dup"));
            let _second = router.subscribe(EventKind::NewVideo, recording(&log, "dup"));
            assert_eq!(router.listener_count(), 2);

            first.unsubscribe();
            assert_eq!(router.listener_count(), 1);

            let envelope = PushEnvelope {
                payload: EventPayload::NewVideo(crate::envelope::NewVideo {
                    video_id: "v".to_string(),
                    video_title: "t".to_string(),
                    channel_id: "c".to_string(),
                    channel_name: "n".to_string(),
                    thumbnail_url: "u".to_string(),
                    published_at: Utc::now(),
                    auto_download_triggered: false,
                }),
                timestamp: Utc::now(),
                message_id: "m".to_string(),
            };
            router.dispatch(&envelope);
            assert_eq!(*log.lock().unwrap(), vec!["dup"]);
        }

        #[test]
        fn unsubscribe_after_router_dropped_is_harmless() {
            let router = EventRouter::new();
            let handle = router.subscribe(EventKind::NewVideo, |_| Ok(()));
            drop(router);
            handle.unsubscribe();
        }

        #[test]
        fn clones_share_the_registry() {
            let router = EventRouter::new();
            let clone = router.clone();
            let log = Arc::new(Mutex::new(Vec::new()));

            clone.subscribe(EventKind::SystemAlert, recording(&log, "via-clone"));
            router.dispatch(&alert_envelope(AlertLevel::Info));

            assert_eq!(*log.lock().unwrap(), vec!["via-clone"]);
            assert_eq!(router.listener_count(), 1);
        }
    }
}

//! Observable entitlement state.

use parking_lot::Mutex;
use std::sync::Arc;
use tandem_types::Entitlement;
use tokio::sync::watch;

/// Receives entitlement changes. Wired by the embedding application.
pub trait EntitlementListener: Send + Sync {
    fn on_entitlement_changed(&self, entitlement: &Entitlement);
}

impl<F> EntitlementListener for F
where
    F: Fn(&Entitlement) + Send + Sync,
{
    fn on_entitlement_changed(&self, entitlement: &Entitlement) {
        self(entitlement)
    }
}

/// The current entitlement of the session's account.
///
/// Only the validator writes it. Readers see the most recent completed write.
pub struct EntitlementState {
    tx: watch::Sender<Option<Entitlement>>,
    listeners: Mutex<Vec<Arc<dyn EntitlementListener>>>,
}

impl Default for EntitlementState {
    fn default() -> Self {
        Self::new()
    }
}

impl EntitlementState {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self {
            tx,
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// The latest entitlement, if one has been derived.
    pub fn current(&self) -> Option<Entitlement> {
        self.tx.borrow().clone()
    }

    /// Whether premium features are unlocked.
    pub fn is_subscribed(&self) -> bool {
        self.tx
            .borrow()
            .as_ref()
            .is_some_and(|e| e.is_subscribed)
    }

    /// A receiver woken on every change.
    pub fn subscribe(&self) -> watch::Receiver<Option<Entitlement>> {
        self.tx.subscribe()
    }

    /// Registers a listener called on every change.
    pub fn add_listener(&self, listener: Arc<dyn EntitlementListener>) {
        self.listeners.lock().push(listener);
    }

    /// Stores a freshly derived entitlement. Returns true if the decision
    /// changed. An identical decision only refreshes the timestamp and wakes
    /// nobody.
    pub(crate) fn set(&self, entitlement: Entitlement) -> bool {
        let changed = self.tx.send_if_modified(|slot| match slot {
            Some(prev) if prev.same_decision(&entitlement) => {
                prev.last_validated_at = entitlement.last_validated_at;
                false
            }
            _ => {
                *slot = Some(entitlement.clone());
                true
            }
        });

        if changed {
            let listeners = self.listeners.lock().clone();
            for listener in listeners {
                listener.on_entitlement_changed(&entitlement);
            }
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tandem_types::{AccountId, EntitlementSource};

    fn ent(subscribed: bool, source: EntitlementSource) -> Entitlement {
        Entitlement::new(AccountId::new("u1"), subscribed, source, None)
    }

    #[test]
    fn listeners_fire_only_on_change() {
        let state = EntitlementState::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        state.add_listener(Arc::new(move |_: &Entitlement| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        assert!(state.set(ent(true, EntitlementSource::Device)));
        assert!(!state.set(ent(true, EntitlementSource::Device)));
        assert!(state.set(ent(true, EntitlementSource::Server)));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert!(state.is_subscribed());
    }

    #[test]
    fn watch_sees_latest_value() {
        let state = EntitlementState::new();
        let mut rx = state.subscribe();
        assert!(rx.borrow().is_none());

        state.set(ent(false, EntitlementSource::Server));
        assert!(rx.has_changed().unwrap());
        assert!(!rx.borrow_and_update().as_ref().unwrap().is_subscribed);
    }
}

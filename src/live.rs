//! Change notification for projection readers.
//!
//! Listeners are told which scope a committed mutation touched; they run
//! after the transaction has committed and the store lock is released, so a
//! reader never observes a partially applied batch.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};

use tracing::warn;

use crate::error::Result;
use crate::store::Store;

pub type Listener = Arc<dyn Fn(&str) + Send + Sync>;

type Registry = RwLock<BTreeMap<u64, (String, Listener)>>;

#[derive(Default)]
pub(crate) struct ChangeFeed {
    listeners: Arc<Registry>,
    next_id: AtomicU64,
}

impl ChangeFeed {
    pub(crate) fn subscribe(&self, scope: &str, listener: Listener) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut listeners) = self.listeners.write() {
            listeners.insert(id, (scope.to_string(), listener));
        }
        Subscription {
            id,
            registry: Arc::downgrade(&self.listeners),
        }
    }

    pub(crate) fn notify(&self, scope: &str) {
        // Snapshot first so listeners may subscribe or unsubscribe re-entrantly.
        let targets: Vec<Listener> = match self.listeners.read() {
            Ok(listeners) => listeners
                .values()
                .filter(|(s, _)| s == scope)
                .map(|(_, l)| l.clone())
                .collect(),
            Err(_) => return,
        };
        for listener in targets {
            listener(scope);
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.listeners.read().map(|l| l.len()).unwrap_or(0)
    }
}

/// Handle returned by a subscription; dropping it unsubscribes.
pub struct Subscription {
    id: u64,
    registry: Weak<Registry>,
}

impl Subscription {
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            if let Ok(mut listeners) = registry.write() {
                listeners.remove(&self.id);
            }
        }
    }
}

/// Runs `query` now and after every commit touching `scope`, handing each
/// snapshot to `callback`.
pub fn watch<T, Q, C>(store: &Arc<Store>, scope: &str, query: Q, callback: C) -> Subscription
where
    Q: Fn(&Store) -> Result<T> + Send + Sync + 'static,
    C: Fn(T) + Send + Sync + 'static,
{
    let emit = {
        let store: Weak<Store> = Arc::downgrade(store);
        move |scope: &str| {
            let Some(store) = store.upgrade() else {
                return;
            };
            match query(&store) {
                Ok(snapshot) => callback(snapshot),
                Err(e) => warn!(scope, "live query failed: {}", e),
            }
        }
    };
    emit(scope);
    store.subscribe(scope, Arc::new(emit))
}

//! Observers of operation events.
//!
//! Two ordered sets are kept: priority listeners and normal listeners. A fan-out iterates over
//! a snapshot of the sets current when the event fired, so listeners may add or remove
//! listeners (themselves included) from inside a callback.

use crate::domain::EventInfo;
use crate::error::OperationError;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::error;

/// Receives operation notifications. All methods default to doing nothing.
pub trait OperationListener: Send + Sync {
    fn about_to_start(&self, _info: &EventInfo) {}

    fn succeeded(&self, _info: &EventInfo) {}

    fn failed(&self, _info: &EventInfo, _cause: &OperationError) {}
}

type ListenerSet = Arc<Vec<Arc<dyn OperationListener>>>;

#[derive(Default)]
pub struct ListenerRegistry {
    priority: RwLock<ListenerSet>,
    normal: RwLock<ListenerSet>,
}

impl std::fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("priority", &snapshot(&self.priority).len())
            .field("normal", &snapshot(&self.normal).len())
            .finish()
    }
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Priority listeners hear every event before any normal listener.
    pub fn add_priority_listener(&self, listener: Arc<dyn OperationListener>) {
        insert(&self.priority, listener);
    }

    pub fn add_listener(&self, listener: Arc<dyn OperationListener>) {
        insert(&self.normal, listener);
    }

    /// Removes the listener from whichever set holds it.
    pub fn remove_listener(&self, listener: &Arc<dyn OperationListener>) {
        remove(&self.priority, listener);
        remove(&self.normal, listener);
    }

    pub fn clear(&self) {
        replace(&self.priority, Arc::new(Vec::new()));
        replace(&self.normal, Arc::new(Vec::new()));
    }

    pub fn len(&self) -> usize {
        snapshot(&self.priority).len() + snapshot(&self.normal).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn fire_about_to_start(&self, info: &EventInfo) {
        self.fan_out("about_to_start", |l| l.about_to_start(info));
    }

    pub fn fire_succeeded(&self, info: &EventInfo) {
        self.fan_out("succeeded", |l| l.succeeded(info));
    }

    pub fn fire_failed(&self, info: &EventInfo, cause: &OperationError) {
        self.fan_out("failed", |l| l.failed(info, cause));
    }

    fn fan_out<F>(&self, what: &str, notify: F)
    where
        F: Fn(&dyn OperationListener),
    {
        let priority = snapshot(&self.priority);
        let normal = snapshot(&self.normal);

        for listener in priority.iter().chain(normal.iter()) {
            // one misbehaving listener must not starve the rest
            let result = panic::catch_unwind(AssertUnwindSafe(|| notify(listener.as_ref())));
            if let Err(payload) = result {
                error!(
                    "Listener panicked during {}: {}",
                    what,
                    OperationError::from_panic(payload.as_ref())
                );
            }
        }
    }
}

fn snapshot(set: &RwLock<ListenerSet>) -> ListenerSet {
    Arc::clone(&set.read().unwrap_or_else(PoisonError::into_inner))
}

fn replace(set: &RwLock<ListenerSet>, listeners: ListenerSet) {
    *set.write().unwrap_or_else(PoisonError::into_inner) = listeners;
}

fn same_listener(a: &Arc<dyn OperationListener>, b: &Arc<dyn OperationListener>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

fn insert(set: &RwLock<ListenerSet>, listener: Arc<dyn OperationListener>) {
    let mut guard = set.write().unwrap_or_else(PoisonError::into_inner);
    if guard.iter().any(|l| same_listener(l, &listener)) {
        return;
    }
    let mut next = Vec::with_capacity(guard.len() + 1);
    next.extend(guard.iter().cloned());
    next.push(listener);
    *guard = Arc::new(next);
}

fn remove(set: &RwLock<ListenerSet>, listener: &Arc<dyn OperationListener>) {
    let mut guard = set.write().unwrap_or_else(PoisonError::into_inner);
    if !guard.iter().any(|l| same_listener(l, listener)) {
        return;
    }
    let next: Vec<_> = guard
        .iter()
        .filter(|l| !same_listener(l, listener))
        .cloned()
        .collect();
    *guard = Arc::new(next);
}

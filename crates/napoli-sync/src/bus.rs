use napoli_core::push::PushEvent;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tracing::{error, trace};

type Listener = Arc<dyn Fn(&PushEvent) + Send + Sync>;

/// Fan-out of decoded push events to every registered listener.
///
/// Dispatch is synchronous and in registration order. The listener list is
/// snapshotted before each dispatch, so a callback may subscribe or
/// unsubscribe without deadlocking; the change applies from the next event.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

#[derive(Default)]
struct BusInner {
    next_id: AtomicU64,
    listeners: Mutex<Vec<(u64, Listener)>>,
}

impl BusInner {
    fn listeners(&self) -> MutexGuard<'_, Vec<(u64, Listener)>> {
        // a panicking listener never runs under this lock, recover anyway
        self.listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn remove(&self, id: u64) -> bool {
        let mut listeners = self.listeners();
        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        listeners.len() != before
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&PushEvent) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.listeners().push((id, Arc::new(callback)));
        Subscription {
            id,
            bus: Arc::downgrade(&self.inner),
            active: true,
        }
    }

    /// Delivers `event` to every current listener; returns how many ran to
    /// completion. A panicking listener is logged and skipped.
    pub fn publish(&self, event: &PushEvent) -> usize {
        let snapshot: Vec<(u64, Listener)> = self.inner.listeners().clone();
        let mut delivered = 0;
        for (id, listener) in snapshot {
            match catch_unwind(AssertUnwindSafe(|| listener(event))) {
                Ok(()) => delivered += 1,
                Err(payload) => {
                    error!(
                        event = "bus_listener_panic",
                        listener = id,
                        kind = %event.kind,
                        reason = panic_reason(payload.as_ref()),
                    );
                }
            }
        }
        trace!(event = "bus_dispatch", kind = %event.kind, delivered);
        delivered
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners().len()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

fn panic_reason(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(text) = payload.downcast_ref::<&'static str>() {
        text
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.as_str()
    } else {
        "non-string panic payload"
    }
}

/// Handle for one registered listener. Dropping it deregisters the listener.
#[derive(Debug)]
#[must_use = "dropping a Subscription unsubscribes its listener"]
pub struct Subscription {
    id: u64,
    bus: Weak<BusInner>,
    active: bool,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Removes exactly this listener. Returns false when it was already gone.
    pub fn unsubscribe(mut self) -> bool {
        self.detach()
    }

    fn detach(&mut self) -> bool {
        if !self.active {
            return false;
        }
        self.active = false;
        match self.bus.upgrade() {
            Some(bus) => bus.remove(self.id),
            None => false,
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.detach();
    }
}

//! Live fan-out of newly ingested points.
//!
//! Subscribers see every `(container_id, point)` pushed after they subscribe.
//! There is no backlog replay. A subscriber that panics is logged and skipped;
//! it never affects ingestion or the other subscribers.
//!
//! Listeners are called synchronously on the pushing thread and must not
//! block. A subscriber that needs to do real work should use
//! [`SubscriptionBus::subscribe_channel`], which hands points off through a
//! bounded mailbox and drops them when the mailbox is full.

use std::collections::BTreeMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

use crate::point::MetricPoint;

/// A subscriber callback.
pub type Listener = Arc<dyn Fn(&str, &MetricPoint) + Send + Sync>;

/// Registry of live listeners.
#[derive(Default)]
pub struct SubscriptionBus {
    listeners: Mutex<BTreeMap<u64, Listener>>,
    next_id: AtomicU64,
    /// Held for the whole fan-out of one point so that a subscriber sees one
    /// container's points in push order.
    dispatch: Mutex<()>,
}

impl std::fmt::Debug for SubscriptionBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionBus")
            .field("subscribers", &self.subscriber_count())
            .finish_non_exhaustive()
    }
}

impl SubscriptionBus {
    /// Creates an empty bus.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registers a listener.
    ///
    /// The listener stays registered until the returned [`Subscription`] is
    /// unsubscribed or dropped.
    pub fn subscribe<F>(self: &Arc<Self>, listener: F) -> Subscription
    where
        F: Fn(&str, &MetricPoint) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.listeners).insert(id, Arc::new(listener));
        debug!(subscription = id, "subscriber added");

        Subscription {
            id,
            bus: Arc::downgrade(self),
        }
    }

    /// Registers a bounded mailbox instead of a callback.
    ///
    /// When the mailbox is full, new points for this subscriber are dropped
    /// and a warning is logged; ingestion never waits on the receiver.
    pub fn subscribe_channel(
        self: &Arc<Self>,
        capacity: usize,
    ) -> (Subscription, mpsc::Receiver<(String, MetricPoint)>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));

        let subscription = self.subscribe(move |container_id, point| {
            match tx.try_send((container_id.to_string(), *point)) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    warn!(container_id, "subscriber mailbox full, dropping point");
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(container_id, "subscriber mailbox closed");
                }
            }
        });

        (subscription, rx)
    }

    /// Number of registered listeners.
    pub fn subscriber_count(&self) -> usize {
        lock(&self.listeners).len()
    }

    /// Starts a fan-out. Points published through the returned guard reach
    /// every listener registered at this moment.
    pub(crate) fn begin_dispatch(&self) -> Dispatch<'_> {
        let guard = lock(&self.dispatch);
        let listeners = lock(&self.listeners).values().cloned().collect();
        Dispatch {
            _guard: guard,
            listeners,
        }
    }

    /// Publishes one point to every listener.
    pub fn publish(&self, container_id: &str, point: &MetricPoint) {
        self.begin_dispatch().publish(container_id, point);
    }

    fn remove(&self, id: u64) {
        if lock(&self.listeners).remove(&id).is_some() {
            debug!(subscription = id, "subscriber removed");
        }
    }
}

/// An in-progress fan-out holding a snapshot of the listener list.
pub(crate) struct Dispatch<'a> {
    _guard: MutexGuard<'a, ()>,
    listeners: Vec<Listener>,
}

impl Dispatch<'_> {
    /// Calls every listener, isolating panics.
    pub(crate) fn publish(self, container_id: &str, point: &MetricPoint) {
        for listener in &self.listeners {
            let outcome = catch_unwind(AssertUnwindSafe(|| listener(container_id, point)));
            if outcome.is_err() {
                warn!(container_id, "subscriber panicked while handling a point");
            }
        }
    }
}

/// Handle to a registered listener. Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes immediately"]
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    bus: Weak<SubscriptionBus>,
}

impl Subscription {
    /// Removes this listener. Other listeners are unaffected.
    pub fn unsubscribe(self) {
        // Removal happens in Drop.
    }

    /// Identifier of this subscription, unique per bus.
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.remove(self.id);
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_no_replay_for_late_subscriber() {
        let bus = SubscriptionBus::new();
        bus.publish("a", &MetricPoint::empty(1));

        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let _sub = bus.subscribe(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(seen.load(Ordering::SeqCst), 0);
        bus.publish("a", &MetricPoint::empty(2));
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unsubscribe_leaves_others() {
        let bus = SubscriptionBus::new();
        let a = Arc::new(AtomicUsize::new(0));
        let b = Arc::new(AtomicUsize::new(0));

        let (ca, cb) = (a.clone(), b.clone());
        let sub_a = bus.subscribe(move |_, _| {
            ca.fetch_add(1, Ordering::SeqCst);
        });
        let _sub_b = bus.subscribe(move |_, _| {
            cb.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish("x", &MetricPoint::empty(1));
        sub_a.unsubscribe();
        bus.publish("x", &MetricPoint::empty(2));

        assert_eq!(a.load(Ordering::SeqCst), 1);
        assert_eq!(b.load(Ordering::SeqCst), 2);
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[test]
    fn test_panicking_listener_is_isolated() {
        let bus = SubscriptionBus::new();
        let _bad = bus.subscribe(|_, _| panic!("listener bug"));

        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let _good = bus.subscribe(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish("x", &MetricPoint::empty(1));
        bus.publish("x", &MetricPoint::empty(2));
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_channel_drops_when_full() {
        let bus = SubscriptionBus::new();
        let (_sub, mut rx) = bus.subscribe_channel(2);

        for ts in 0..5 {
            bus.publish("c", &MetricPoint::empty(ts));
        }

        let mut received = Vec::new();
        while let Ok((id, point)) = rx.try_recv() {
            assert_eq!(id, "c");
            received.push(point.timestamp);
        }
        assert_eq!(received, vec![0, 1]);
    }

    #[test]
    fn test_listener_may_unsubscribe_during_dispatch() {
        let bus = SubscriptionBus::new();
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));

        let inner = slot.clone();
        let sub = bus.subscribe(move |_, _| {
            inner.lock().unwrap().take();
        });
        *slot.lock().unwrap() = Some(sub);

        bus.publish("x", &MetricPoint::empty(1));
        assert_eq!(bus.subscriber_count(), 0);
    }
}

//! The event bus seam the bridge subscribes through.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, trace};

use crate::error::BridgeError;
use crate::event::{Event, EventBase, EventId, ANY_ID};

/// Callback a bus invokes, on whatever thread posted the event.
pub type EventSink = Arc<dyn Fn(&Event) + Send + Sync>;

/// Identifies one subscription on a bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub#{}", self.0)
    }
}

/// A publish/subscribe event source.
///
/// Sinks may be called from any thread and must not block.
pub trait EventBus: Send + Sync {
    /// Deliver events matching `base` and `id` to `sink`. [`EventBase::ANY`]
    /// and [`ANY_ID`] act as wildcards; an ANY base requires an ANY id.
    fn subscribe(
        &self,
        base: EventBase,
        id: EventId,
        sink: EventSink,
    ) -> Result<SubscriptionId, BridgeError>;

    fn unsubscribe(&self, subscription: SubscriptionId) -> Result<(), BridgeError>;
}

/// Blanket implementation so `Arc<dyn EventBus>` can be used directly.
impl<T: EventBus + ?Sized> EventBus for Arc<T> {
    fn subscribe(
        &self,
        base: EventBase,
        id: EventId,
        sink: EventSink,
    ) -> Result<SubscriptionId, BridgeError> {
        (**self).subscribe(base, id, sink)
    }

    fn unsubscribe(&self, subscription: SubscriptionId) -> Result<(), BridgeError> {
        (**self).unsubscribe(subscription)
    }
}

struct Subscription {
    id: SubscriptionId,
    base: EventBase,
    event_id: EventId,
    sink: EventSink,
}

impl Subscription {
    fn matches(&self, base: EventBase, id: EventId) -> bool {
        (self.base.is_any() || self.base == base) && (self.event_id == ANY_ID || self.event_id == id)
    }
}

/// In-process bus. `post` runs matching sinks synchronously on the caller's
/// thread.
pub struct LocalEventBus {
    next_id: AtomicU64,
    subscriptions: Mutex<Vec<Subscription>>,
}

impl Default for LocalEventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalEventBus {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            subscriptions: Mutex::new(Vec::new()),
        }
    }

    /// Post an event and return how many sinks received it.
    pub fn post(
        &self,
        base: EventBase,
        id: EventId,
        data: impl Into<Arc<[u8]>>,
    ) -> Result<usize, BridgeError> {
        if base.is_any() || id == ANY_ID {
            return Err(BridgeError::InvalidArgument(
                "events must be posted with a concrete base and id".into(),
            ));
        }
        let event = Event::new(base, id, data);

        // Sinks run without the lock held so they may (un)subscribe.
        let sinks: Vec<EventSink> = self
            .lock()?
            .iter()
            .filter(|s| s.matches(base, id))
            .map(|s| Arc::clone(&s.sink))
            .collect();

        trace!(%base, id, sinks = sinks.len(), "event posted");
        for sink in &sinks {
            sink(&event);
        }
        Ok(sinks.len())
    }

    pub fn subscription_count(&self) -> Result<usize, BridgeError> {
        Ok(self.lock()?.len())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Vec<Subscription>>, BridgeError> {
        self.subscriptions
            .lock()
            .map_err(|_| BridgeError::LockPoisoned("event bus"))
    }
}

impl EventBus for LocalEventBus {
    fn subscribe(
        &self,
        base: EventBase,
        id: EventId,
        sink: EventSink,
    ) -> Result<SubscriptionId, BridgeError> {
        if base.is_any() && id != ANY_ID {
            return Err(BridgeError::InvalidArgument(format!(
                "event id {id} needs a concrete base"
            )));
        }
        let sub = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock()?.push(Subscription {
            id: sub,
            base,
            event_id: id,
            sink,
        });
        debug!(%sub, %base, id, "subscribed");
        Ok(sub)
    }

    fn unsubscribe(&self, subscription: SubscriptionId) -> Result<(), BridgeError> {
        let mut subs = self.lock()?;
        let pos = subs
            .iter()
            .position(|s| s.id == subscription)
            .ok_or_else(|| BridgeError::Bus(format!("unknown subscription {subscription}")))?;
        subs.remove(pos);
        debug!(sub = %subscription, "unsubscribed");
        Ok(())
    }
}

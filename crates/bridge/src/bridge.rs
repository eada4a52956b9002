//! Registers plain handlers on an [`EventBus`] and runs them on the
//! mainloop's owner thread.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use mainloop::{BridgeLink, MainloopHandle, Priority};
use tracing::{debug, info, warn};

use crate::bus::{EventBus, EventSink, SubscriptionId};
use crate::error::BridgeError;
use crate::event::{Event, EventBase, EventId, ANY_ID};

/// Handler invoked on the owner thread with its registration argument.
pub type EventHandler<A> = fn(&A, &Event);

/// Registrations are keyed by `(base, id, handler)`, like the platform bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct HandlerKey {
    base: EventBase,
    id: EventId,
    handler: usize,
}

struct Registration {
    key: HandlerKey,
    name: String,
    link: BridgeLink,
    subscription: SubscriptionId,
}

/// Adapter that turns bus callbacks into prioritized mainloop tasks.
///
/// Bus threads never run handler code: each matching event becomes a
/// one-time dispatch queued on the owner thread. Unregistering closes the
/// registration first, so any dispatch that has not started by the time
/// unregister returns is dropped.
pub struct EventBridge<B: EventBus> {
    handle: MainloopHandle,
    bus: B,
    registrations: Mutex<Vec<Registration>>,
    dropped_events: Arc<AtomicU64>,
}

impl<B: EventBus> EventBridge<B> {
    pub fn new(handle: MainloopHandle, bus: B) -> Self {
        Self {
            handle,
            bus,
            registrations: Mutex::new(Vec::new()),
            dropped_events: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn handle(&self) -> &MainloopHandle {
        &self.handle
    }

    pub fn registration_count(&self) -> Result<usize, BridgeError> {
        Ok(self.lock()?.len())
    }

    /// Events the bus delivered that never made it into the mainloop queue
    /// (registration closed, or table or queue full).
    pub fn dropped_events(&self) -> u64 {
        self.dropped_events.load(Ordering::Relaxed)
    }

    /// Run `handler(arg, event)` on the owner thread for every event matching
    /// `base` and `id`.
    ///
    /// The registration holds one task table slot until unregistered, and
    /// each queued delivery holds another until it runs. Registering the
    /// same `(base, id, handler)` again replaces the earlier registration;
    /// if the earlier one cannot be removed it is kept and the error returned.
    pub fn esp_event_handler_register<A>(
        &self,
        name: &str,
        base: EventBase,
        id: EventId,
        handler: EventHandler<A>,
        arg: Arc<A>,
        priority: Priority,
    ) -> Result<(), BridgeError>
    where
        A: Send + Sync + 'static,
    {
        if base.is_any() && id != ANY_ID {
            return Err(BridgeError::InvalidArgument(format!(
                "handler '{name}': event id {id} needs a concrete base"
            )));
        }
        let key = HandlerKey {
            base,
            id,
            handler: handler as usize,
        };

        let mut registrations = self.lock()?;
        if let Some(pos) = registrations.iter().position(|r| r.key == key) {
            warn!(handler = %name, replaced = %registrations[pos].name, %base, id, "handler registered twice, replacing");
            self.teardown(&mut registrations, pos)?;
        }

        // Subscribe before taking a table slot: a failed subscribe then
        // leaves nothing behind in the mainloop.
        let slot = Arc::new(OnceLock::new());
        let sink = dispatch_sink(
            self.handle.clone(),
            Arc::clone(&slot),
            Arc::clone(&self.dropped_events),
            name,
            priority,
            handler,
            arg,
        );
        let subscription = self.bus.subscribe(base, id, sink)?;
        let link = match self.handle.register_bridge(name, priority) {
            Ok(link) => link,
            Err(e) => {
                if let Err(unsub) = self.bus.unsubscribe(subscription) {
                    warn!(handler = %name, %subscription, "stale subscription left on bus: {}", unsub);
                }
                return Err(e.into());
            }
        };
        let _ = slot.set(link.clone());

        info!(handler = %name, %base, id, priority, task = %link.id(), "event handler registered");
        registrations.push(Registration {
            key,
            name: name.to_string(),
            link,
            subscription,
        });
        Ok(())
    }

    /// Remove the registration with exactly this `(base, id, handler)`.
    /// Unknown keys are ignored.
    ///
    /// If the mainloop cannot take the removal (its queue is full) nothing
    /// changes and the error is returned, so the call can be retried.
    pub fn esp_event_handler_unregister<A>(
        &self,
        base: EventBase,
        id: EventId,
        handler: EventHandler<A>,
    ) -> Result<(), BridgeError> {
        let key = HandlerKey {
            base,
            id,
            handler: handler as usize,
        };
        let mut registrations = self.lock()?;
        let Some(pos) = registrations.iter().position(|r| r.key == key) else {
            debug!(%base, id, "unregister matched no handler");
            return Ok(());
        };
        let registration = self.teardown(&mut registrations, pos)?;
        info!(handler = %registration.name, %base, id, "event handler unregistered");
        Ok(())
    }

    /// Queue removal of the table record, then leave the bus.
    ///
    /// The registration is only forgotten once the mainloop accepted the
    /// removal; until then it stays in `registrations` untouched.
    fn teardown(
        &self,
        registrations: &mut Vec<Registration>,
        pos: usize,
    ) -> Result<Registration, BridgeError> {
        self.handle.unregister_bridge(&registrations[pos].link)?;
        let registration = registrations.remove(pos);
        self.bus.unsubscribe(registration.subscription)?;
        Ok(registration)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Vec<Registration>>, BridgeError> {
        self.registrations
            .lock()
            .map_err(|_| BridgeError::LockPoisoned("bridge registrations"))
    }
}

/// Best-effort teardown. Unregister explicitly to see and retry failures.
impl<B: EventBus> Drop for EventBridge<B> {
    fn drop(&mut self) {
        let registrations = match self.registrations.get_mut() {
            Ok(regs) => std::mem::take(regs),
            Err(poisoned) => std::mem::take(poisoned.into_inner()),
        };
        for registration in registrations {
            if let Err(e) = self.handle.unregister_bridge(&registration.link) {
                warn!(handler = %registration.name, task = %registration.link.id(), "bridge record left in mainloop table: {}", e);
            }
            if let Err(e) = self.bus.unsubscribe(registration.subscription) {
                debug!(handler = %registration.name, "unsubscribe on drop failed: {}", e);
            }
        }
    }
}

/// Bus-side sink: wraps each event in a one-time dispatch for the owner
/// thread. Never blocks; an event that cannot be queued is dropped and
/// counted.
fn dispatch_sink<A>(
    handle: MainloopHandle,
    slot: Arc<OnceLock<BridgeLink>>,
    dropped: Arc<AtomicU64>,
    name: &str,
    priority: Priority,
    handler: EventHandler<A>,
    arg: Arc<A>,
) -> EventSink
where
    A: Send + Sync + 'static,
{
    let name = name.to_string();
    Arc::new(move |event: &Event| {
        let Some(link) = slot.get() else {
            dropped.fetch_add(1, Ordering::Relaxed);
            debug!(handler = %name, base = %event.base, id = event.id, "event before registration completed");
            return;
        };
        let arg = Arc::clone(&arg);
        let delivered = event.clone();
        let result = handle.dispatch_bridged(link, &name, priority, move || {
            handler(&arg, &delivered);
            Ok(())
        });
        if let Err(e) = result {
            dropped.fetch_add(1, Ordering::Relaxed);
            warn!(handler = %name, base = %event.base, id = event.id, "event dropped: {}", e);
        }
    })
}

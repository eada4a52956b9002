//! Event bus bridge for the mainloop.
//!
//! An [`EventBridge`] subscribes handlers on an [`EventBus`] and redirects
//! every delivery to the mainloop's owner thread as a prioritized one-time
//! task, so bus threads never call handler code directly.
//!
//! ```no_run
//! use std::sync::Arc;
//! use mainloop::Mainloop;
//! use mainloop_bridge::{Event, EventBase, EventBridge, LocalEventBus};
//!
//! const WIFI: EventBase = EventBase::new("WIFI_EVENT");
//!
//! fn on_wifi(count: &std::sync::atomic::AtomicUsize, _event: &Event) {
//!     count.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
//! }
//!
//! let mut ml = Mainloop::create("main", 8, 1000)?;
//! let bus = Arc::new(LocalEventBus::new());
//! let bridge = EventBridge::new(ml.handle(), Arc::clone(&bus));
//! bridge.esp_event_handler_register("wifi", WIFI, 1, on_wifi, Arc::new(Default::default()), 2)?;
//! bus.post(WIFI, 1, vec![0u8])?;
//! ml.run(true)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod bridge;
pub mod bus;
pub mod error;
pub mod event;

pub use bridge::{EventBridge, EventHandler};
pub use bus::{EventBus, EventSink, LocalEventBus, SubscriptionId};
pub use error::BridgeError;
pub use event::{Event, EventBase, EventId, ANY_ID};

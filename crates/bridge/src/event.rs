//! Event identity and payload as seen by subscribers.

use std::fmt;
use std::sync::Arc;

/// Family of related events, e.g. `"WIFI_EVENT"`.
///
/// Bases compare by name, so two `EventBase::new("WIFI_EVENT")` values built
/// in different places are the same base.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventBase(Option<&'static str>);

impl EventBase {
    /// Wildcard base. Only valid when subscribing, together with [`ANY_ID`].
    pub const ANY: EventBase = EventBase(None);

    pub const fn new(name: &'static str) -> Self {
        Self(Some(name))
    }

    pub fn is_any(&self) -> bool {
        self.0.is_none()
    }

    pub fn name(&self) -> &'static str {
        self.0.unwrap_or("ANY")
    }
}

impl fmt::Display for EventBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Event number within a base.
pub type EventId = i32;

/// Wildcard event id.
pub const ANY_ID: EventId = -1;

/// One posted event. Cheap to clone; the payload is shared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub base: EventBase,
    pub id: EventId,
    pub data: Arc<[u8]>,
}

impl Event {
    pub fn new(base: EventBase, id: EventId, data: impl Into<Arc<[u8]>>) -> Self {
        Self {
            base,
            id,
            data: data.into(),
        }
    }
}

//! Demo tasks and the demo event producer driven by the runner.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::Result;
use mainloop::{LoopState, MainloopHandle, TaskId, TaskResult};
use mainloop_bridge::{Event, EventBase, EventBridge, EventId, LocalEventBus, ANY_ID};
use tracing::{info, warn};

use crate::config::{DemoKind, TaskSpec};

pub const DEMO_EVENT: EventBase = EventBase::new("DEMO_EVENT");

/// Distinct event ids the producer cycles through.
const DEMO_EVENT_IDS: EventId = 4;

/// Context shared by every demo task callback.
#[derive(Debug)]
pub struct Ticker {
    pub name: String,
    pub ticks: AtomicU64,
}

impl Ticker {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            ticks: AtomicU64::new(0),
        })
    }

    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }
}

fn tick(ticker: &Ticker) -> TaskResult {
    let n = ticker.ticks.fetch_add(1, Ordering::Relaxed) + 1;
    info!(task = %ticker.name, tick = n, "tick");
    Ok(())
}

fn on_demo_event(ticker: &Ticker, event: &Event) {
    let n = ticker.ticks.fetch_add(1, Ordering::Relaxed) + 1;
    let seq = event
        .data
        .get(..8)
        .and_then(|b| b.try_into().ok())
        .map(u64::from_le_bytes);
    info!(handler = %ticker.name, id = event.id, ?seq, received = n, "event handled");
}

/// Register one `[[tasks]]` entry.
pub fn register_task(handle: &MainloopHandle, spec: &TaskSpec) -> Result<(TaskId, Arc<Ticker>)> {
    let ticker = Ticker::new(&spec.name);
    let ctx = Arc::clone(&ticker);
    let id = match spec.kind {
        DemoKind::Periodic => {
            handle.add_periodic_task(&spec.name, tick, ctx, spec.priority, spec.period_ms, spec.delay_ms)?
        }
        DemoKind::OneShot => handle.add_one_shot_task(&spec.name, tick, ctx, spec.priority, spec.delay_ms)?,
        DemoKind::Idle => handle.add_idle_task(&spec.name, tick, spec.priority, ctx)?,
    };
    info!(task = %spec.name, kind = ?spec.kind, %id, "demo task registered");
    Ok((id, ticker))
}

/// Register the demo event handler on `bridge`.
pub fn register_event_handler(bridge: &EventBridge<Arc<LocalEventBus>>) -> Result<Arc<Ticker>> {
    let ticker = Ticker::new("demo-events");
    bridge.esp_event_handler_register(
        "demo-events",
        DEMO_EVENT,
        ANY_ID,
        on_demo_event,
        Arc::clone(&ticker),
        5,
    )?;
    Ok(ticker)
}

/// Post a numbered demo event every `interval` until the loop stops.
pub fn spawn_producer(
    bus: Arc<LocalEventBus>,
    handle: MainloopHandle,
    interval: Duration,
) -> Result<JoinHandle<u64>> {
    let join = thread::Builder::new()
        .name("event-producer".into())
        .spawn(move || {
            let mut seq: u64 = 0;
            while handle.state() != LoopState::Stopped {
                let id = (seq % DEMO_EVENT_IDS as u64) as EventId;
                if let Err(e) = bus.post(DEMO_EVENT, id, seq.to_le_bytes().to_vec()) {
                    warn!("demo event post failed: {}", e);
                }
                seq += 1;
                thread::sleep(interval);
            }
            seq
        })?;
    Ok(join)
}

//! Single-threaded cooperative task scheduler.
//!
//! One owner thread drains a priority-ordered table of periodic, one-shot,
//! idle and immediate tasks. Any other thread submits structural changes
//! through a [`MainloopHandle`]; those changes travel through a bounded
//! queue and are applied by the owner at safepoints, so the task table is
//! never shared.
//!
//! ```no_run
//! use std::sync::atomic::{AtomicU32, Ordering};
//! use std::sync::Arc;
//!
//! use mainloop::{Mainloop, TaskResult};
//!
//! fn blink(count: &AtomicU32) -> TaskResult {
//!     count.fetch_add(1, Ordering::Relaxed);
//!     Ok(())
//! }
//!
//! let mut ml = Mainloop::create("main", 8, 1000)?;
//! let handle = ml.handle();
//! handle.add_periodic_task("blink", blink, Arc::new(AtomicU32::new(0)), 1, 500, 0)?;
//!
//! let stopper = handle.clone();
//! std::thread::spawn(move || {
//!     std::thread::sleep(std::time::Duration::from_secs(2));
//!     let _ = stopper.stop();
//! });
//! ml.run(true)?;
//! # Ok::<(), mainloop::MainloopError>(())
//! ```

pub mod config;
pub mod error;
pub mod handle;
pub mod mainloop;
mod queue;
pub mod stats;
pub mod table;
pub mod task;
pub mod timing;

pub use config::MainloopConfig;
pub use error::{MainloopError, Resource, TaskError, TaskResult};
pub use handle::{LoopState, MainloopHandle};
pub use mainloop::Mainloop;
pub use stats::{MainloopStats, TaskStats};
pub use table::TaskTable;
pub use task::{BridgeLink, Callback, Priority, TaskFn, TaskId, TaskKind, TaskRecord, TaskSelector, Timing};
pub use timing::{Clock, ManualClock, Millis, MonotonicClock};

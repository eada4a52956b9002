//! Cross-thread inbox between producers and the owner thread.
//!
//! Producers never touch the task table. They reserve a table slot on the
//! shared [`SlotLedger`], then `try_send` a [`Request`] into a bounded
//! channel that only the owner thread reads.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TryRecvError, TrySendError};
use std::time::Duration;

use crate::error::MainloopError;
use crate::task::{TaskKind, TaskRecord, TaskSelector};

/// Structural change submitted from any thread.
#[derive(Debug)]
pub(crate) enum Request {
    Add(TaskRecord),
    /// `kind: None` matches any kind.
    Remove {
        kind: Option<TaskKind>,
        selector: TaskSelector,
    },
    /// Wake-up after a lifecycle transition; the state itself is atomic.
    Start,
    Stop,
}

/// Create a bounded request channel.
pub(crate) fn channel(capacity: usize) -> (Producer, Consumer) {
    let (tx, rx) = mpsc::sync_channel(capacity);
    (Producer { tx, capacity }, Consumer { rx })
}

/// Sending half, cloned into every handle.
#[derive(Debug, Clone)]
pub(crate) struct Producer {
    tx: SyncSender<Request>,
    capacity: usize,
}

impl Producer {
    /// Enqueue without blocking.
    pub(crate) fn submit(&self, request: Request) -> Result<(), MainloopError> {
        self.tx.try_send(request).map_err(|e| match e {
            TrySendError::Full(_) => MainloopError::queue_full(self.capacity),
            TrySendError::Disconnected(_) => {
                MainloopError::InvalidState("mainloop has been dropped".into())
            }
        })
    }

    /// Enqueue a wake-up. A full queue already guarantees the owner wakes.
    pub(crate) fn wake(&self, request: Request) -> Result<(), MainloopError> {
        match self.submit(request) {
            Err(MainloopError::CapacityExceeded { .. }) => Ok(()),
            other => other,
        }
    }
}

/// Receiving half, owned by the mainloop.
#[derive(Debug)]
pub(crate) struct Consumer {
    rx: Receiver<Request>,
}

impl Consumer {
    pub(crate) fn try_next(&self) -> Option<Request> {
        match self.rx.try_recv() {
            Ok(request) => Some(request),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Block until a request arrives or `timeout` elapses (`None` waits
    /// indefinitely). This is the loop's only suspension point.
    pub(crate) fn wait(&self, timeout: Option<Duration>) -> Option<Request> {
        match timeout {
            Some(timeout) => match self.rx.recv_timeout(timeout) {
                Ok(request) => Some(request),
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
            },
            None => self.rx.recv().ok(),
        }
    }
}

/// Table-capacity accounting visible to every thread.
///
/// A slot is reserved before an Add is enqueued and released by the owner
/// when the record leaves the table, so `CapacityExceeded` is reported to
/// the submitter synchronously.
#[derive(Debug)]
pub(crate) struct SlotLedger {
    capacity: usize,
    occupied: AtomicUsize,
}

impl SlotLedger {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity,
            occupied: AtomicUsize::new(0),
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    pub(crate) fn occupied(&self) -> usize {
        self.occupied.load(Ordering::Acquire)
    }

    pub(crate) fn try_reserve(&self) -> Result<(), MainloopError> {
        self.occupied
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.capacity).then_some(n + 1)
            })
            .map(|_| ())
            .map_err(|_| MainloopError::table_full(self.capacity))
    }

    pub(crate) fn release(&self, slots: usize) {
        if slots == 0 {
            return;
        }
        let _ = self
            .occupied
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                Some(n.saturating_sub(slots))
            });
    }
}

//! Cancellable one-shot timers
//!
//! [`schedule`] runs an action once on a tokio task after a delay. The
//! action never runs more than once and never runs after [`TimerHandle::cancel`]
//! returns. [`TimerSlot`] wraps this for an owner that must hold at most one
//! pending timer: starting a new one cancels the old one, and every firing is
//! tagged with a generation so a firing that was already queued when the
//! timer got replaced is recognised as stale and dropped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Handle to a scheduled action
#[derive(Debug)]
pub struct TimerHandle {
    done: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl TimerHandle {
    /// Stops the timer. Returns true if the action had not run yet.
    /// Cancelling a timer that already fired does nothing.
    pub fn cancel(&self) -> bool {
        let was_pending = !self.done.swap(true, Ordering::AcqRel);
        self.task.abort();
        was_pending
    }
}

/// Runs `action` once after `delay` unless cancelled first.
///
/// Must be called from within a tokio runtime.
pub fn schedule<F>(delay: Duration, action: F) -> TimerHandle
where
    F: FnOnce() + Send + 'static,
{
    let done = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&done);
    let deadline = tokio::time::Instant::now() + delay;

    let task = tokio::spawn(async move {
        tokio::time::sleep_until(deadline).await;
        // Whoever flips the flag first wins: either we run, or cancel did.
        if !flag.swap(true, Ordering::AcqRel) {
            action();
        }
    });

    TimerHandle { done, task }
}

/// A timer firing as delivered to the owner of a [`TimerSlot`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerFired<K> {
    pub generation: u64,
    pub kind: K,
}

/// Single-owner slot holding at most one pending timer
///
/// Firings are not run on the timer task; they are sent as [`TimerFired`]
/// messages into the owner's event queue, and the owner hands them back to
/// [`TimerSlot::accept`] to find out whether they still count.
pub struct TimerSlot<K> {
    sink: mpsc::UnboundedSender<TimerFired<K>>,
    handle: Option<TimerHandle>,
    generation: u64,
    pending: Option<K>,
}

impl<K: Copy + Send + 'static> TimerSlot<K> {
    pub fn new(sink: mpsc::UnboundedSender<TimerFired<K>>) -> Self {
        Self {
            sink,
            handle: None,
            generation: 0,
            pending: None,
        }
    }

    /// Starts a timer of the given kind, replacing any pending one.
    pub fn start(&mut self, delay: Duration, kind: K) {
        self.cancel();
        self.generation += 1;

        let generation = self.generation;
        let sink = self.sink.clone();
        self.handle = Some(schedule(delay, move || {
            // The owner may be gone during shutdown.
            let _ = sink.send(TimerFired { generation, kind });
        }));
        self.pending = Some(kind);
    }

    /// Cancels the pending timer, returning its kind if there was one.
    pub fn cancel(&mut self) -> Option<K> {
        if let Some(handle) = self.handle.take() {
            handle.cancel();
        }
        self.pending.take()
    }

    pub fn pending(&self) -> Option<K> {
        self.pending
    }

    /// Claims a firing. Returns its kind if it belongs to the timer that is
    /// currently pending, or `None` for a stale firing.
    pub fn accept(&mut self, fired: TimerFired<K>) -> Option<K> {
        if fired.generation != self.generation {
            return None;
        }
        self.handle = None;
        self.pending.take()
    }
}

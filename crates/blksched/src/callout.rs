//! Timer/callout facility used for anticipation.
//!
//! The scheduler never owns threads of its own; timed callbacks come from
//! the environment through the [`Callout`] trait. A callout holds at most
//! one armed callback. `drain` must block until any in-flight callback has
//! returned, which is what makes gateway teardown free of use-after-free:
//! after `drain` returns, no callout code can touch the gateway again.
//!
//! [`TickCallout`] is the production implementation, driven by a dedicated
//! worker thread with a configurable tick length. [`ManualCallout`] is the
//! deterministic test implementation; it fires only when the test says so.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::debug;

/// Callback type armed on a callout.
pub type CalloutFn = Box<dyn FnOnce() + Send>;

/// One-shot, re-armable timed callback.
pub trait Callout: Send + Sync {
    /// Arms the callout to fire after `ticks` ticks, replacing any
    /// previously armed callback.
    fn arm(&self, ticks: u32, callback: CalloutFn);

    /// Disarms a pending callback. Returns true if one was pending; false
    /// if nothing was armed or the callback already started running.
    fn cancel(&self) -> bool;

    /// Disarms any pending callback and blocks until an in-flight callback
    /// has returned.
    fn drain(&self);
}

#[derive(Default)]
struct TickSlot {
    pending: Option<(Instant, CalloutFn)>,
    firing: bool,
    shutdown: bool,
}

/// Thread-driven callout with a fixed tick length.
///
/// The default tick is 2.5 ms, matching a 400 Hz tick clock.
pub struct TickCallout {
    tick: Duration,
    slot: Arc<(Mutex<TickSlot>, Condvar)>,
    worker: Option<JoinHandle<()>>,
}

impl TickCallout {
    /// Default tick length (400 Hz).
    pub const DEFAULT_TICK: Duration = Duration::from_micros(2500);

    /// Creates a callout with the given tick length and starts its worker.
    pub fn new(tick: Duration) -> Self {
        let slot: Arc<(Mutex<TickSlot>, Condvar)> = Arc::new(Default::default());
        let worker_slot = Arc::clone(&slot);
        let worker = thread::spawn(move || Self::worker_loop(&worker_slot));
        debug!(tick_us = tick.as_micros() as u64, "starting tick callout");
        Self {
            tick,
            slot,
            worker: Some(worker),
        }
    }

    fn worker_loop(slot: &(Mutex<TickSlot>, Condvar)) {
        let (lock, cvar) = slot;
        loop {
            let callback = {
                let mut guard = lock.lock();
                loop {
                    if guard.shutdown {
                        return;
                    }
                    match guard.pending.as_ref().map(|(deadline, _)| *deadline) {
                        Some(deadline) if Instant::now() >= deadline => break,
                        Some(deadline) => {
                            cvar.wait_until(&mut guard, deadline);
                        }
                        None => cvar.wait(&mut guard),
                    }
                }
                match guard.pending.take() {
                    Some((_, callback)) => {
                        guard.firing = true;
                        callback
                    }
                    None => continue,
                }
            };
            // Run outside the slot lock; the callback takes scheduler locks.
            callback();
            let mut guard = lock.lock();
            guard.firing = false;
            cvar.notify_all();
        }
    }
}

impl Default for TickCallout {
    fn default() -> Self {
        Self::new(Self::DEFAULT_TICK)
    }
}

impl Callout for TickCallout {
    fn arm(&self, ticks: u32, callback: CalloutFn) {
        let (lock, cvar) = &*self.slot;
        let deadline = Instant::now() + self.tick * ticks;
        let mut guard = lock.lock();
        guard.pending = Some((deadline, callback));
        cvar.notify_all();
    }

    fn cancel(&self) -> bool {
        let (lock, _) = &*self.slot;
        lock.lock().pending.take().is_some()
    }

    fn drain(&self) {
        let (lock, cvar) = &*self.slot;
        let mut guard = lock.lock();
        guard.pending = None;
        while guard.firing {
            cvar.wait(&mut guard);
        }
    }
}

impl Drop for TickCallout {
    fn drop(&mut self) {
        {
            let (lock, cvar) = &*self.slot;
            let mut guard = lock.lock();
            guard.shutdown = true;
            guard.pending = None;
            cvar.notify_all();
        }
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

/// Deterministic callout for tests: armed callbacks run only when the test
/// calls [`ManualCallout::fire`], on the caller's thread.
#[derive(Default)]
pub struct ManualCallout {
    slot: Mutex<Option<(u32, CalloutFn)>>,
}

impl ManualCallout {
    /// Creates an unarmed callout.
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs the armed callback, if any. Returns true if one ran.
    pub fn fire(&self) -> bool {
        let callback = self.slot.lock().take();
        match callback {
            Some((_, callback)) => {
                callback();
                true
            }
            None => false,
        }
    }

    /// Returns true if a callback is armed.
    pub fn pending(&self) -> bool {
        self.slot.lock().is_some()
    }

    /// Tick count the pending callback was armed with, if any.
    pub fn armed_ticks(&self) -> Option<u32> {
        self.slot.lock().as_ref().map(|(ticks, _)| *ticks)
    }
}

impl Callout for ManualCallout {
    fn arm(&self, ticks: u32, callback: CalloutFn) {
        *self.slot.lock() = Some((ticks, callback));
    }

    fn cancel(&self) -> bool {
        self.slot.lock().take().is_some()
    }

    fn drain(&self) {
        self.slot.lock().take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_manual_fire_runs_callback() {
        let callout = ManualCallout::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = Arc::clone(&count);
        callout.arm(2, Box::new(move || {
            count2.fetch_add(1, Ordering::SeqCst);
        }));
        assert!(callout.pending());
        assert_eq!(callout.armed_ticks(), Some(2));
        assert!(callout.fire());
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!callout.pending());
        assert!(!callout.fire());
    }

    #[test]
    fn test_manual_cancel_prevents_fire() {
        let callout = ManualCallout::new();
        callout.arm(1, Box::new(|| panic!("cancelled callback ran")));
        assert!(callout.cancel());
        assert!(!callout.fire());
        assert!(!callout.cancel());
    }

    #[test]
    fn test_manual_rearm_replaces_callback() {
        let callout = ManualCallout::new();
        let count = Arc::new(AtomicUsize::new(0));
        callout.arm(1, Box::new(|| panic!("replaced callback ran")));
        let count2 = Arc::clone(&count);
        callout.arm(3, Box::new(move || {
            count2.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(callout.armed_ticks(), Some(3));
        assert!(callout.fire());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_tick_callout_fires() {
        let callout = TickCallout::new(Duration::from_millis(1));
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = Arc::clone(&count);
        callout.arm(2, Box::new(move || {
            count2.fetch_add(1, Ordering::SeqCst);
        }));
        let deadline = Instant::now() + Duration::from_secs(2);
        while count.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_tick_callout_cancel() {
        let callout = TickCallout::new(Duration::from_millis(5));
        callout.arm(1000, Box::new(|| panic!("cancelled callback ran")));
        assert!(callout.cancel());
        thread::sleep(Duration::from_millis(20));
    }

    #[test]
    fn test_tick_callout_drain_blocks_out_callback() {
        let callout = TickCallout::new(Duration::from_millis(1));
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = Arc::clone(&count);
        callout.arm(1, Box::new(move || {
            thread::sleep(Duration::from_millis(10));
            count2.fetch_add(1, Ordering::SeqCst);
        }));
        thread::sleep(Duration::from_millis(3));
        callout.drain();
        // After drain the callback either completed or never started; it can
        // no longer be mid-flight.
        let settled = count.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(count.load(Ordering::SeqCst), settled);
    }
}

//! Shared wake-up signal between module threads and the control loop.
//!
//! One binary flag guarded by a mutex + condvar. Any module thread (or the
//! startup path) may raise it; the control loop consumes and clears it. A
//! signal raised while a cycle is running is kept and produces exactly one
//! more wake-up; concurrent signals coalesce.

use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

/// The update event owned by the control loop.
#[derive(Debug, Default)]
pub struct UpdateEvent {
    flag: Mutex<bool>,
    cond: Condvar,
}

impl UpdateEvent {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Raise the signal. Idempotent and non-blocking.
    pub fn signal(&self) {
        let mut flag = self.flag.lock().unwrap();
        *flag = true;
        self.cond.notify_one();
    }

    /// Block up to `timeout` for the signal. Returns true if it fired, in
    /// which case the flag is cleared before returning so a signal raised
    /// during the caller's processing is preserved for the next wait.
    pub fn wait_and_clear(&self, timeout: Duration) -> bool {
        let flag = self.flag.lock().unwrap();
        let (mut flag, _timed_out) = self
            .cond
            .wait_timeout_while(flag, timeout, |fired| !*fired)
            .unwrap();
        if *flag {
            *flag = false;
            true
        } else {
            false
        }
    }

    /// A cloneable handle modules use to request a recompute. Module threads
    /// hold only this, never loop-internal data.
    pub fn handle(self: &Arc<Self>) -> UpdateHandle {
        UpdateHandle {
            event: Arc::clone(self),
        }
    }
}

/// Signaling handle given to module background threads.
#[derive(Debug, Clone)]
pub struct UpdateHandle {
    event: Arc<UpdateEvent>,
}

impl UpdateHandle {
    pub fn signal(&self) {
        self.event.signal();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    const SHORT: Duration = Duration::from_millis(10);

    #[test]
    fn signal_before_wait_fires_and_clears() {
        let event = UpdateEvent::new();
        event.signal();
        assert!(event.wait_and_clear(SHORT));
        // Cleared: the next wait times out.
        assert!(!event.wait_and_clear(SHORT));
    }

    #[test]
    fn wait_times_out_without_signal() {
        let event = UpdateEvent::new();
        assert!(!event.wait_and_clear(SHORT));
    }

    #[test]
    fn concurrent_signals_coalesce() {
        let event = UpdateEvent::new();
        event.signal();
        event.signal();
        event.signal();
        assert!(event.wait_and_clear(SHORT));
        assert!(!event.wait_and_clear(SHORT));
    }

    #[test]
    fn signal_during_processing_guarantees_another_cycle() {
        let event = UpdateEvent::new();
        event.signal();
        assert!(event.wait_and_clear(SHORT));
        // "Processing" happens here; a module signals mid-cycle.
        event.signal();
        assert!(event.wait_and_clear(SHORT));
        assert!(!event.wait_and_clear(SHORT));
    }

    #[test]
    fn signal_from_another_thread_wakes_waiter() {
        let event = UpdateEvent::new();
        let handle = event.handle();
        let t = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            handle.signal();
        });
        assert!(event.wait_and_clear(Duration::from_secs(2)));
        t.join().unwrap();
    }
}

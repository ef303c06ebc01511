//! Per-camera ready events

use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

/// One-shot handshake between a process worker and the detection worker.
/// The detector sets it after writing the result slot; the process worker's
/// bounded wait consumes it.
#[derive(Clone, Default)]
pub struct ReadyEvent {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl ReadyEvent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        let (flag, condvar) = &*self.inner;
        *flag.lock().unwrap() = true;
        condvar.notify_all();
    }

    pub fn clear(&self) {
        let (flag, _) = &*self.inner;
        *flag.lock().unwrap() = false;
    }

    /// Waits up to `timeout` for the event, consuming it when set.
    /// Returns false on timeout.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (flag, condvar) = &*self.inner;
        let mut set = flag.lock().unwrap();
        let deadline = std::time::Instant::now() + timeout;
        while !*set {
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            if remaining.is_zero() {
                return false;
            }
            let (guard, result) = condvar.wait_timeout(set, remaining).unwrap();
            set = guard;
            if result.timed_out() && !*set {
                return false;
            }
        }
        *set = false;
        true
    }
}

use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Gate allowing one replay burst per wait window.
///
/// A fresh throttle is open. `try_acquire` closes the window as it passes
/// a caller through; `reset` re-opens it, which is how a successful push
/// lets the very next notify drain immediately.
pub(crate) struct NotifyThrottle {
    wait: Duration,
    last_burst: Mutex<Option<Instant>>,
}

impl NotifyThrottle {
    pub fn new(wait: Duration) -> Self {
        Self { wait, last_burst: Mutex::new(None) }
    }

    /// True when a burst may start now. Records the burst time.
    pub fn try_acquire(&self) -> bool {
        let Ok(mut last) = self.last_burst.lock() else {
            return false;
        };
        match *last {
            Some(at) if at.elapsed() < self.wait => false,
            _ => {
                *last = Some(Instant::now());
                true
            }
        }
    }

    /// Re-open the window.
    pub fn reset(&self) {
        if let Ok(mut last) = self.last_burst.lock() {
            *last = None;
        }
    }
}

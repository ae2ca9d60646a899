use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::clock::Clock;

/// Refuses a new submission until `window` has passed since the last accepted one.
pub struct CooldownLimiter {
    window: Duration,
    clock: Arc<dyn Clock>,
    last_accepted: Mutex<Option<DateTime<Utc>>>,
}

impl CooldownLimiter {
    pub fn new(window: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            window,
            clock,
            last_accepted: Mutex::new(None),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Accept and record now, or return how long is left.
    pub fn try_acquire(&self) -> Result<(), Duration> {
        let now = self.clock.now();
        let mut last = self.last_accepted.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(at) = *last {
            let elapsed = (now - at).to_std().unwrap_or(Duration::ZERO);
            if elapsed < self.window {
                return Err(self.window - elapsed);
            }
        }

        *last = Some(now);
        Ok(())
    }

    /// Forget the last acceptance.
    pub fn reset(&self) {
        *self.last_accepted.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }
}

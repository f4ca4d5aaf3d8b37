#[cfg(test)]
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

/// Monotonic millisecond source used to time invocations.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> f64;
}

/// Milliseconds elapsed since the clock was created.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_ms(&self) -> f64 {
        self.origin.elapsed().as_secs_f64() * 1000.0
    }
}

/// Hand-driven clock. Clones share the same time.
#[cfg(test)]
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<Mutex<f64>>,
}

#[cfg(test)]
impl ManualClock {
    pub fn at(ms: f64) -> Self {
        Self {
            now: Arc::new(Mutex::new(ms)),
        }
    }

    pub fn set(&self, ms: f64) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = ms;
    }

    pub fn advance(&self, ms: f64) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) += ms;
    }
}

#[cfg(test)]
impl Clock for ManualClock {
    fn now_ms(&self) -> f64 {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// Single-flight guard for state-mutating entry points.
// Acquired at the top of a call, released on drop (every exit path, errors included).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("re-entrant call into {0}")]
pub struct Reentered(pub &'static str);

/// Runtime backstop behind the borrow checker: entry points take `&mut self`,
/// so no public path re-enters an engine today.
#[derive(Debug, Default)]
pub struct FlightLock {
    busy: Arc<AtomicBool>,
}

impl FlightLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the lock for `resource`; fails if a call already holds it.
    pub fn enter(&self, resource: &'static str) -> Result<FlightGuard, Reentered> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| Reentered(resource))?;
        Ok(FlightGuard {
            busy: Arc::clone(&self.busy),
        })
    }

    pub fn is_held(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

// A cloned engine gets its own, unheld lock.
impl Clone for FlightLock {
    fn clone(&self) -> Self {
        Self::new()
    }
}

#[must_use = "dropping the guard releases the lock immediately"]
#[derive(Debug)]
pub struct FlightGuard {
    busy: Arc<AtomicBool>,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}

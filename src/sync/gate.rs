//! Single-writer gate around backing-store commits

use std::sync::{Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::error::{RepositoryError, Result};

/// Serializes commit and rollback of the shared working copy.
///
/// Unlike a bare `Mutex<()>`, acquisition can be bounded by a timeout.
#[derive(Debug)]
pub struct CommitGate {
    busy: Mutex<bool>,
    released: Condvar,
    timeout: Option<Duration>,
}

/// Held while a commit or rollback is in progress
#[derive(Debug)]
pub struct GateGuard<'a> {
    gate: &'a CommitGate,
}

impl CommitGate {
    /// `None` waits indefinitely
    pub fn new(timeout: Option<Duration>) -> Self {
        Self {
            busy: Mutex::new(false),
            released: Condvar::new(),
            timeout,
        }
    }

    pub fn acquire(&self) -> Result<GateGuard<'_>> {
        let started = Instant::now();
        let mut busy = self.busy.lock().unwrap_or_else(PoisonError::into_inner);

        match self.timeout {
            None => {
                while *busy {
                    busy = self
                        .released
                        .wait(busy)
                        .unwrap_or_else(PoisonError::into_inner);
                }
            }
            Some(timeout) => {
                let (guard, _) = self
                    .released
                    .wait_timeout_while(busy, timeout, |busy| *busy)
                    .unwrap_or_else(PoisonError::into_inner);
                busy = guard;
                if *busy {
                    return Err(RepositoryError::CommitTimeout {
                        waited_ms: started.elapsed().as_millis() as u64,
                    });
                }
            }
        }

        *busy = true;
        Ok(GateGuard { gate: self })
    }
}

impl Default for CommitGate {
    fn default() -> Self {
        Self::new(None)
    }
}

impl Drop for GateGuard<'_> {
    fn drop(&mut self) {
        let mut busy = self.gate.busy.lock().unwrap_or_else(PoisonError::into_inner);
        *busy = false;
        drop(busy);
        self.gate.released.notify_one();
    }
}

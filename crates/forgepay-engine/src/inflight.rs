//! Per-milestone in-flight tracking.
//!
//! Two completions of the same milestone must not interleave: the second
//! would read contract state the first is about to change.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
pub(crate) struct InFlight {
    active: Mutex<HashSet<String>>,
}

impl InFlight {
    fn active(&self) -> MutexGuard<'_, HashSet<String>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `key`, or `None` if it is already registered.
    pub(crate) fn try_acquire(&self, key: &str) -> Option<InFlightGuard<'_>> {
        if !self.active().insert(key.to_string()) {
            return None;
        }
        Some(InFlightGuard {
            owner: self,
            key: key.to_string(),
        })
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.active().len()
    }
}

/// Releases its key when dropped, on success, error, or cancellation alike.
#[derive(Debug)]
pub(crate) struct InFlightGuard<'a> {
    owner: &'a InFlight,
    key: String,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.owner.active().remove(&self.key);
    }
}

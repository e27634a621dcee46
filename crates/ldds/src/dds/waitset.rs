// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ldds contributors

//! WaitSet: block until at least one attached condition triggers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::condition::{Condition, WaitSignal};
use super::{Error, Result};
use crate::core::time::Deadline;

struct Entry {
    condition: Arc<dyn Condition>,
}

fn next_waitset_signal_id() -> u64 {
    static NEXT: AtomicU64 = AtomicU64::new(1);
    NEXT.fetch_add(1, Ordering::Relaxed)
}

/// Blocking multiplexer over conditions.
pub struct WaitSet {
    entries: Mutex<Vec<Entry>>,
    /// One shared signal wakes the single waiter whichever condition
    /// fires; its id is unique per waitset for detach bookkeeping.
    wake: Arc<WaitSignal>,
}

impl WaitSet {
    #[must_use]
    pub fn new() -> WaitSet {
        WaitSet {
            entries: Mutex::new(Vec::new()),
            wake: Arc::new(WaitSignal::new(next_waitset_signal_id())),
        }
    }

    /// Attach a condition. Re-attaching the same condition is an error.
    pub fn attach_condition(&self, condition: Arc<dyn Condition>) -> Result<()> {
        let mut entries = self.entries.lock();
        if entries
            .iter()
            .any(|e| e.condition.condition_id() == condition.condition_id())
        {
            return Err(Error::PreconditionNotMet(
                "condition already attached to this waitset".into(),
            ));
        }
        condition.add_signal(Arc::clone(&self.wake));
        entries.push(Entry { condition });
        Ok(())
    }

    /// Detach a condition.
    pub fn detach_condition(&self, condition: &Arc<dyn Condition>) -> Result<()> {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|e| {
            if e.condition.condition_id() == condition.condition_id() {
                e.condition.remove_signal(self.wake.id());
                false
            } else {
                true
            }
        });
        if entries.len() == before {
            return Err(Error::PreconditionNotMet(
                "condition is not attached to this waitset".into(),
            ));
        }
        Ok(())
    }

    /// Currently attached conditions.
    #[must_use]
    pub fn conditions(&self) -> Vec<Arc<dyn Condition>> {
        self.entries
            .lock()
            .iter()
            .map(|e| Arc::clone(&e.condition))
            .collect()
    }

    /// Block until at least one attached condition has a true trigger,
    /// returning the triggered conditions. [`Error::Timeout`] when the
    /// deadline expires first.
    pub fn wait(&self, deadline: Deadline) -> Result<Vec<Arc<dyn Condition>>> {
        let start = Instant::now();
        loop {
            let triggered = self.collect_triggered();
            if !triggered.is_empty() {
                return Ok(triggered);
            }
            let budget = match deadline.remaining_from(start) {
                None => Duration::from_secs(3600),
                Some(d) if d.is_zero() => return Err(Error::Timeout),
                Some(d) => d,
            };
            self.wake.wait_for(budget);
        }
    }

    fn collect_triggered(&self) -> Vec<Arc<dyn Condition>> {
        self.entries
            .lock()
            .iter()
            .filter(|e| e.condition.trigger_value())
            .map(|e| Arc::clone(&e.condition))
            .collect()
    }
}

impl Default for WaitSet {
    fn default() -> Self {
        WaitSet::new()
    }
}

impl Drop for WaitSet {
    fn drop(&mut self) {
        let entries = self.entries.lock();
        for e in entries.iter() {
            e.condition.remove_signal(self.wake.id());
        }
    }
}

// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ldds contributors

//! Conditions: boolean predicates that wake WaitSets.
//!
//! A [`GuardCondition`]'s trigger is under application control; a
//! [`StatusCondition`] reflects an entity's communication statuses.
//! Conditions wake attached wait-sets through registered signals.

use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Condvar, Mutex};

/// Wake-up channel from a condition to one wait-set.
pub struct WaitSignal {
    id: u64,
    fired: Mutex<bool>,
    cond: Condvar,
}

impl WaitSignal {
    pub(crate) fn new(id: u64) -> WaitSignal {
        WaitSignal {
            id,
            fired: Mutex::new(false),
            cond: Condvar::new(),
        }
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn signal(&self) {
        *self.fired.lock() = true;
        self.cond.notify_all();
    }

    /// Wait until signalled or the timeout elapses; clears the flag.
    pub(crate) fn wait_for(&self, timeout: std::time::Duration) -> bool {
        let mut fired = self.fired.lock();
        if !*fired {
            self.cond.wait_for(&mut fired, timeout);
        }
        std::mem::take(&mut fired)
    }
}

/// Base interface for everything attachable to a WaitSet.
pub trait Condition: Send + Sync {
    /// Current trigger value.
    fn trigger_value(&self) -> bool;

    /// Stable identity for attach/detach bookkeeping.
    fn condition_id(&self) -> u64;

    /// Register a wait-set signal to wake when the trigger flips true.
    fn add_signal(&self, signal: Arc<WaitSignal>);

    /// Remove a previously registered signal.
    fn remove_signal(&self, signal_id: u64);

    /// Downcast support.
    fn as_any(&self) -> &dyn Any;
}

fn next_condition_id() -> u64 {
    static NEXT: AtomicU64 = AtomicU64::new(1);
    NEXT.fetch_add(1, Ordering::Relaxed)
}

struct SignalHook {
    id: u64,
    signal: Weak<WaitSignal>,
}

fn notify_hooks(hooks: &Mutex<Vec<SignalHook>>) {
    let mut hooks = hooks.lock();
    hooks.retain(|h| {
        if let Some(s) = h.signal.upgrade() {
            s.signal();
            true
        } else {
            false
        }
    });
}

/// Manually-triggered condition.
pub struct GuardCondition {
    id: u64,
    trigger: AtomicBool,
    hooks: Mutex<Vec<SignalHook>>,
}

impl GuardCondition {
    #[must_use]
    pub fn new() -> GuardCondition {
        GuardCondition {
            id: next_condition_id(),
            trigger: AtomicBool::new(false),
            hooks: Mutex::new(Vec::new()),
        }
    }

    /// Set the trigger; `true` wakes every attached wait-set.
    pub fn set_trigger_value(&self, value: bool) {
        self.trigger.store(value, Ordering::Release);
        if value {
            notify_hooks(&self.hooks);
        }
    }
}

impl Default for GuardCondition {
    fn default() -> Self {
        GuardCondition::new()
    }
}

impl Condition for GuardCondition {
    fn trigger_value(&self) -> bool {
        self.trigger.load(Ordering::Acquire)
    }

    fn condition_id(&self) -> u64 {
        self.id
    }

    fn add_signal(&self, signal: Arc<WaitSignal>) {
        {
            let mut hooks = self.hooks.lock();
            hooks.retain(|h| h.signal.upgrade().is_some());
            hooks.push(SignalHook {
                id: signal.id(),
                signal: Arc::downgrade(&signal),
            });
        }
        if self.trigger_value() {
            signal.signal();
        }
    }

    fn remove_signal(&self, signal_id: u64) {
        self.hooks.lock().retain(|h| h.id != signal_id);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Communication status bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusMask(u32);

impl StatusMask {
    pub const NONE: StatusMask = StatusMask(0);
    pub const ALL: StatusMask = StatusMask(u32::MAX);
    pub const DATA_AVAILABLE: StatusMask = StatusMask(1 << 0);
    pub const SAMPLE_LOST: StatusMask = StatusMask(1 << 1);
    pub const SAMPLE_REJECTED: StatusMask = StatusMask(1 << 2);
    pub const LIVELINESS_CHANGED: StatusMask = StatusMask(1 << 3);
    pub const REQUESTED_DEADLINE_MISSED: StatusMask = StatusMask(1 << 4);
    pub const REQUESTED_INCOMPATIBLE_QOS: StatusMask = StatusMask(1 << 5);
    pub const SUBSCRIPTION_MATCHED: StatusMask = StatusMask(1 << 6);
    pub const OFFERED_INCOMPATIBLE_QOS: StatusMask = StatusMask(1 << 9);
    pub const PUBLICATION_MATCHED: StatusMask = StatusMask(1 << 10);

    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    #[must_use]
    pub const fn contains(self, other: StatusMask) -> bool {
        (self.0 & other.0) == other.0
    }
}

impl std::ops::BitOr for StatusMask {
    type Output = StatusMask;
    fn bitor(self, rhs: StatusMask) -> StatusMask {
        StatusMask(self.0 | rhs.0)
    }
}

impl std::ops::BitAnd for StatusMask {
    type Output = StatusMask;
    fn bitand(self, rhs: StatusMask) -> StatusMask {
        StatusMask(self.0 & rhs.0)
    }
}

/// Entity-owned condition reflecting communication statuses.
pub struct StatusCondition {
    id: u64,
    enabled: Mutex<StatusMask>,
    active: Mutex<StatusMask>,
    hooks: Mutex<Vec<SignalHook>>,
}

impl StatusCondition {
    #[must_use]
    pub fn new() -> StatusCondition {
        StatusCondition {
            id: next_condition_id(),
            enabled: Mutex::new(StatusMask::ALL),
            active: Mutex::new(StatusMask::NONE),
            hooks: Mutex::new(Vec::new()),
        }
    }

    pub fn set_enabled_statuses(&self, mask: StatusMask) {
        *self.enabled.lock() = mask;
        if self.trigger_value() {
            notify_hooks(&self.hooks);
        }
    }

    #[must_use]
    pub fn enabled_statuses(&self) -> StatusMask {
        *self.enabled.lock()
    }

    pub(crate) fn set_active(&self, mask: StatusMask) {
        let enabled = *self.enabled.lock();
        *self.active.lock() = mask;
        if (enabled & mask).bits() != 0 {
            notify_hooks(&self.hooks);
        }
    }

    pub(crate) fn add_active(&self, mask: StatusMask) {
        let current = *self.active.lock();
        self.set_active(current | mask);
    }

    pub(crate) fn clear_active(&self, mask: StatusMask) {
        let current = *self.active.lock();
        *self.active.lock() = StatusMask(current.bits() & !mask.bits());
    }

    #[must_use]
    pub fn active_statuses(&self) -> StatusMask {
        *self.active.lock()
    }
}

impl Default for StatusCondition {
    fn default() -> Self {
        StatusCondition::new()
    }
}

impl Condition for StatusCondition {
    fn trigger_value(&self) -> bool {
        (*self.enabled.lock() & *self.active.lock()).bits() != 0
    }

    fn condition_id(&self) -> u64 {
        self.id
    }

    fn add_signal(&self, signal: Arc<WaitSignal>) {
        {
            let mut hooks = self.hooks.lock();
            hooks.retain(|h| h.signal.upgrade().is_some());
            hooks.push(SignalHook {
                id: signal.id(),
                signal: Arc::downgrade(&signal),
            });
        }
        if self.trigger_value() {
            signal.signal();
        }
    }

    fn remove_signal(&self, signal_id: u64) {
        self.hooks.lock().retain(|h| h.id != signal_id);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_condition_trigger() {
        let g = GuardCondition::new();
        assert!(!g.trigger_value());
        g.set_trigger_value(true);
        assert!(g.trigger_value());
        g.set_trigger_value(false);
        assert!(!g.trigger_value());
    }

    #[test]
    fn test_condition_ids_unique() {
        let a = GuardCondition::new();
        let b = GuardCondition::new();
        let c = StatusCondition::new();
        assert_ne!(a.condition_id(), b.condition_id());
        assert_ne!(b.condition_id(), c.condition_id());
    }

    #[test]
    fn test_status_condition_requires_enabled_bit() {
        let s = StatusCondition::new();
        s.set_enabled_statuses(StatusMask::SUBSCRIPTION_MATCHED);
        s.set_active(StatusMask::DATA_AVAILABLE);
        assert!(!s.trigger_value());
        s.set_active(StatusMask::SUBSCRIPTION_MATCHED);
        assert!(s.trigger_value());
    }

    #[test]
    fn test_signal_fired_on_attach_if_already_triggered() {
        let g = GuardCondition::new();
        g.set_trigger_value(true);
        let sig = Arc::new(WaitSignal::new(1));
        g.add_signal(Arc::clone(&sig));
        assert!(sig.wait_for(std::time::Duration::from_millis(10)));
    }

    #[test]
    fn test_mask_ops() {
        let m = StatusMask::DATA_AVAILABLE | StatusMask::SAMPLE_LOST;
        assert!(m.contains(StatusMask::DATA_AVAILABLE));
        assert!(!m.contains(StatusMask::SUBSCRIPTION_MATCHED));
    }
}

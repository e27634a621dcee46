// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ldds contributors

//! Timed-event scheduler: one thread draining a fibonacci heap of
//! deadlines, driving deadline timers, liveliness leases, and retransmit
//! backoff.
//!
//! A handler may reschedule itself by returning the next firing time.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::core::fibheap::{FibHeap, FibNode};

/// Handler outcome: fire once or come back later.
pub enum EventDisposition {
    Done,
    Reschedule(Instant),
}

type EventFn = Box<dyn FnMut(Instant) -> EventDisposition + Send + 'static>;

/// Stable identifier of a scheduled event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct EventId(u64);

struct TevState {
    heap: FibHeap<u64>,
    nodes: HashMap<u64, FibNode>,
    handlers: HashMap<u64, EventFn>,
    next_id: u64,
    stop: bool,
}

struct TevShared {
    epoch: Instant,
    state: Mutex<TevState>,
    cond: Condvar,
}

impl TevShared {
    fn key_of(&self, at: Instant) -> i64 {
        at.saturating_duration_since(self.epoch).as_nanos() as i64
    }
}

/// The scheduler handle; dropping it stops the thread.
pub struct TimedEvents {
    shared: Arc<TevShared>,
    thread: Option<JoinHandle<()>>,
}

impl TimedEvents {
    pub fn new() -> std::io::Result<TimedEvents> {
        let shared = Arc::new(TevShared {
            epoch: Instant::now(),
            state: Mutex::new(TevState {
                heap: FibHeap::new(),
                nodes: HashMap::new(),
                handlers: HashMap::new(),
                next_id: 1,
                stop: false,
            }),
            cond: Condvar::new(),
        });
        let ts = Arc::clone(&shared);
        let thread = std::thread::Builder::new()
            .name("tev".to_string())
            .spawn(move || tev_thread(&ts))?;
        Ok(TimedEvents {
            shared,
            thread: Some(thread),
        })
    }

    /// Schedule `handler` to run at `at`.
    pub fn schedule(
        &self,
        at: Instant,
        handler: impl FnMut(Instant) -> EventDisposition + Send + 'static,
    ) -> EventId {
        let key = self.shared.key_of(at);
        let mut state = self.shared.state.lock();
        let id = state.next_id;
        state.next_id += 1;
        let node = state.heap.insert(key, id);
        state.nodes.insert(id, node);
        state.handlers.insert(id, Box::new(handler));
        drop(state);
        self.shared.cond.notify_one();
        EventId(id)
    }

    /// Cancel a scheduled event; false if it already fired (and did not
    /// reschedule) or was cancelled before.
    pub fn cancel(&self, id: EventId) -> bool {
        let mut state = self.shared.state.lock();
        let Some(node) = state.nodes.remove(&id.0) else {
            return false;
        };
        state.heap.delete(node);
        state.handlers.remove(&id.0);
        true
    }
}

impl Drop for TimedEvents {
    fn drop(&mut self) {
        {
            let mut state = self.shared.state.lock();
            state.stop = true;
        }
        self.shared.cond.notify_all();
        if let Some(t) = self.thread.take() {
            let _ = t.join();
        }
    }
}

fn tev_thread(shared: &TevShared) {
    let mut state = shared.state.lock();
    loop {
        if state.stop {
            return;
        }
        let now_key = shared.key_of(Instant::now());
        match state.heap.min_key() {
            None => shared.cond.wait(&mut state),
            Some(k) if k > now_key => {
                let delay = Duration::from_nanos((k - now_key) as u64);
                shared.cond.wait_for(&mut state, delay);
            }
            Some(_) => {
                let (_, id) = state.heap.extract_min().expect("min present");
                state.nodes.remove(&id);
                let Some(mut handler) = state.handlers.remove(&id) else {
                    continue;
                };
                // run outside the lock so handlers may call back in
                drop(state);
                let disposition = handler(Instant::now());
                state = shared.state.lock();
                if let EventDisposition::Reschedule(at) = disposition {
                    if !state.stop {
                        let key = shared.key_of(at);
                        let node = state.heap.insert(key, id);
                        state.nodes.insert(id, node);
                        state.handlers.insert(id, handler);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_fires_once() {
        let tev = TimedEvents::new().unwrap();
        let fired = Arc::new(AtomicUsize::new(0));
        let f = Arc::clone(&fired);
        tev.schedule(Instant::now() + Duration::from_millis(30), move |_| {
            f.fetch_add(1, Ordering::SeqCst);
            EventDisposition::Done
        });
        std::thread::sleep(Duration::from_millis(200));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_fires_in_deadline_order() {
        let tev = TimedEvents::new().unwrap();
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let now = Instant::now();
        for (label, delay_ms) in [("late", 80u64), ("early", 20), ("mid", 50)] {
            let o = Arc::clone(&order);
            tev.schedule(now + Duration::from_millis(delay_ms), move |_| {
                o.lock().push(label);
                EventDisposition::Done
            });
        }
        std::thread::sleep(Duration::from_millis(300));
        assert_eq!(*order.lock(), vec!["early", "mid", "late"]);
    }

    #[test]
    fn test_cancel_prevents_firing() {
        let tev = TimedEvents::new().unwrap();
        let fired = Arc::new(AtomicUsize::new(0));
        let f = Arc::clone(&fired);
        let id = tev.schedule(Instant::now() + Duration::from_millis(100), move |_| {
            f.fetch_add(1, Ordering::SeqCst);
            EventDisposition::Done
        });
        assert!(tev.cancel(id));
        assert!(!tev.cancel(id));
        std::thread::sleep(Duration::from_millis(200));
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_rescheduling_handler_repeats() {
        let tev = TimedEvents::new().unwrap();
        let fired = Arc::new(AtomicUsize::new(0));
        let f = Arc::clone(&fired);
        tev.schedule(Instant::now() + Duration::from_millis(10), move |now| {
            let n = f.fetch_add(1, Ordering::SeqCst) + 1;
            if n < 3 {
                EventDisposition::Reschedule(now + Duration::from_millis(10))
            } else {
                EventDisposition::Done
            }
        });
        std::thread::sleep(Duration::from_millis(400));
        assert_eq!(fired.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_past_deadline_fires_immediately() {
        let tev = TimedEvents::new().unwrap();
        let fired = Arc::new(AtomicUsize::new(0));
        let f = Arc::clone(&fired);
        tev.schedule(Instant::now() - Duration::from_millis(10), move |_| {
            f.fetch_add(1, Ordering::SeqCst);
            EventDisposition::Done
        });
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}

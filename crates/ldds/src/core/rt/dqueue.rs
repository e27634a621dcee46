// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ldds contributors

//! Delivery queue: hands reassembled sample chains to reader handlers on a
//! dedicated background thread.
//!
//! Single producer (the receive thread), single consumer (the queue's own
//! worker). Besides sample chains the queue carries typed bubbles: STOP
//! shuts the worker down, CALLBACK runs a closure in delivery order, and
//! RDGUID directs the following `count` samples to one specific reader
//! (out-of-sync match catch-up).
//!
//! The capacity is advisory: producers may consult [`Dqueue::is_full`]
//! before enqueuing low-value data, and that check is deliberately racy.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::{Condvar, Mutex};

use crate::core::guid::Guid;
use crate::rx::{fragchain_unref, RData, SampleChain, SampleInfo};

/// Handler invoked for every data sample; `rdguid` is set while an RDGUID
/// bubble is directing delivery to a single reader.
pub type DqueueHandler =
    Box<dyn Fn(&SampleInfo, &[RData], Option<&Guid>) + Send + 'static>;

enum Bubble {
    Stop,
    Callback(Box<dyn FnOnce() + Send + 'static>),
    RdGuid { guid: Guid, count: u32 },
}

enum QElem {
    Sample {
        info: Option<Box<SampleInfo>>,
        fragchain: Vec<RData>,
    },
    Bubble(Bubble),
}

struct DqState {
    queue: std::collections::VecDeque<QElem>,
}

struct DqShared {
    name: String,
    max_samples: u32,
    nof_samples: AtomicU32,
    state: Mutex<DqState>,
    cond: Condvar,
}

/// The delivery queue handle owned by the receive side.
pub struct Dqueue {
    shared: Arc<DqShared>,
    worker: Option<JoinHandle<()>>,
}

impl Dqueue {
    /// Create the queue and start its worker thread (`dq.<name>`).
    pub fn new(name: &str, max_samples: u32, handler: DqueueHandler) -> std::io::Result<Dqueue> {
        let shared = Arc::new(DqShared {
            name: name.to_string(),
            max_samples,
            nof_samples: AtomicU32::new(0),
            state: Mutex::new(DqState {
                queue: std::collections::VecDeque::new(),
            }),
            cond: Condvar::new(),
        });
        let worker_shared = Arc::clone(&shared);
        let worker = std::thread::Builder::new()
            .name(format!("dq.{name}"))
            .spawn(move || dqueue_thread(&worker_shared, handler))?;
        Ok(Dqueue {
            shared,
            worker: Some(worker),
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Enqueue a chain of `count` deliverable samples.
    pub fn enqueue(&self, chain: SampleChain, count: u32) {
        debug_assert!(count > 0 && !chain.is_empty());
        self.shared.nof_samples.fetch_add(count, Ordering::Relaxed);
        let mut state = self.shared.state.lock();
        let was_empty = state.queue.is_empty();
        for e in chain {
            state.queue.push_back(QElem::Sample {
                info: e.info,
                fragchain: e.fragchain,
            });
        }
        drop(state);
        if was_empty {
            self.shared.cond.notify_all();
        }
    }

    /// Enqueue a chain whose `count` samples must all go to one reader.
    pub fn enqueue1(&self, rdguid: Guid, chain: SampleChain, count: u32) {
        debug_assert!(count > 0 && !chain.is_empty());
        self.shared
            .nof_samples
            .fetch_add(1 + count, Ordering::Relaxed);
        let mut state = self.shared.state.lock();
        let was_empty = state.queue.is_empty();
        state.queue.push_back(QElem::Bubble(Bubble::RdGuid {
            guid: rdguid,
            count,
        }));
        for e in chain {
            state.queue.push_back(QElem::Sample {
                info: e.info,
                fragchain: e.fragchain,
            });
        }
        drop(state);
        if was_empty {
            self.shared.cond.notify_all();
        }
    }

    /// Run a closure on the delivery thread, ordered with the samples
    /// enqueued around it.
    pub fn enqueue_callback(&self, cb: impl FnOnce() + Send + 'static) {
        self.enqueue_bubble(Bubble::Callback(Box::new(cb)));
    }

    /// Advisory fullness check. Reads a single relaxed counter: producers
    /// that see a stale value either queue one sample too many or drop one
    /// that would have fit, both of which the protocol tolerates.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.shared.nof_samples.load(Ordering::Relaxed) >= self.shared.max_samples
    }

    /// If the queue is currently full, block until the worker drained it.
    pub fn wait_until_empty_if_full(&self) {
        if self.shared.nof_samples.load(Ordering::Relaxed) >= self.shared.max_samples {
            let mut state = self.shared.state.lock();
            while self.shared.nof_samples.load(Ordering::Relaxed) > 0 {
                // timed wait: the worker's drained notification is sent
                // without the lock and may race the check above
                self.shared
                    .cond
                    .wait_for(&mut state, std::time::Duration::from_millis(10));
            }
        }
    }

    fn enqueue_bubble(&self, b: Bubble) {
        self.shared.nof_samples.fetch_add(1, Ordering::Relaxed);
        let mut state = self.shared.state.lock();
        let was_empty = state.queue.is_empty();
        state.queue.push_back(QElem::Bubble(b));
        drop(state);
        if was_empty {
            self.shared.cond.notify_all();
        }
    }
}

impl Drop for Dqueue {
    fn drop(&mut self) {
        self.enqueue_bubble(Bubble::Stop);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn dqueue_thread(shared: &DqShared, handler: DqueueHandler) {
    let mut rdguid: Option<Guid> = None;
    let mut rdguid_count = 0u32;
    let mut keepgoing = true;

    while keepgoing {
        let mut batch = {
            let mut state = shared.state.lock();
            while state.queue.is_empty() {
                shared.cond.wait(&mut state);
            }
            std::mem::take(&mut state.queue)
        };

        for elem in batch.drain(..) {
            if shared.nof_samples.fetch_sub(1, Ordering::Relaxed) == 1 {
                shared.cond.notify_all();
            }
            match elem {
                QElem::Sample { info, fragchain } => {
                    if let Some(info) = info {
                        handler(&info, &fragchain, rdguid.as_ref());
                    }
                    fragchain_unref(&fragchain);
                    if rdguid_count > 0 {
                        rdguid_count -= 1;
                        if rdguid_count == 0 {
                            rdguid = None;
                        }
                    }
                }
                QElem::Bubble(Bubble::Stop) => {
                    // drain what is already queued, then exit
                    keepgoing = false;
                }
                QElem::Bubble(Bubble::Callback(cb)) => cb(),
                QElem::Bubble(Bubble::RdGuid { guid, count }) => {
                    rdguid = Some(guid);
                    rdguid_count = count;
                }
            }
        }
    }
    log::debug!("[dqueue] {} worker exiting", shared.name);
}

// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ldds contributors

//! Garbage-collect thread: deferred teardown of entities that may still be
//! referenced by in-flight receive-path work.
//!
//! Entity deletion enqueues a closure here instead of freeing inline, so
//! the deleting thread never blocks on the receive path and destructors
//! run strictly in enqueue order.

use std::thread::JoinHandle;

use crossbeam::channel::{unbounded, Sender};

enum GcItem {
    Run(Box<dyn FnOnce() + Send + 'static>),
    Stop,
}

/// Handle to the gc thread; dropping it drains outstanding work first.
pub struct GcThread {
    tx: Sender<GcItem>,
    thread: Option<JoinHandle<()>>,
}

impl GcThread {
    pub fn new() -> std::io::Result<GcThread> {
        let (tx, rx) = unbounded::<GcItem>();
        let thread = std::thread::Builder::new()
            .name("gc".to_string())
            .spawn(move || {
                while let Ok(item) = rx.recv() {
                    match item {
                        GcItem::Run(f) => f(),
                        GcItem::Stop => break,
                    }
                }
                log::debug!("[gc] thread exiting");
            })?;
        Ok(GcThread {
            tx,
            thread: Some(thread),
        })
    }

    /// Defer `f` to the gc thread.
    pub fn defer(&self, f: impl FnOnce() + Send + 'static) {
        if let Err(e) = self.tx.send(GcItem::Run(Box::new(f))) {
            log::debug!("[gc] thread gone, running inline");
            if let GcItem::Run(f) = e.0 {
                f();
            }
        }
    }
}

impl Drop for GcThread {
    fn drop(&mut self) {
        let _ = self.tx.send(GcItem::Stop);
        if let Some(t) = self.thread.take() {
            let _ = t.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_deferred_work_runs_in_order() {
        let gc = GcThread::new().unwrap();
        let log = Arc::new(parking_lot::Mutex::new(Vec::new()));
        for i in 0..5 {
            let l = Arc::clone(&log);
            gc.defer(move || l.lock().push(i));
        }
        drop(gc); // drains before join
        assert_eq!(*log.lock(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_drop_waits_for_outstanding_work() {
        let gc = GcThread::new().unwrap();
        let done = Arc::new(AtomicUsize::new(0));
        let d = Arc::clone(&done);
        gc.defer(move || {
            std::thread::sleep(std::time::Duration::from_millis(50));
            d.store(1, Ordering::SeqCst);
        });
        drop(gc);
        assert_eq!(done.load(Ordering::SeqCst), 1);
    }
}

// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ldds contributors

//! Receive buffer pool: arena-allocated packet storage with biased
//! reference counts.
//!
//! A pool is owned by one receive thread; only that thread allocates, any
//! thread may release. Storage is carved sequentially out of large `RBuf`
//! arenas; when the current arena cannot satisfy a request a fresh one is
//! minted and the old one lives on until its last chunk is released.
//!
//! An `RMsg` covers one packet's worth of bytes. Its refcount starts at
//! [`UNCOMMITTED_BIAS`]; during synchronous processing the receive thread
//! adds [`RDATA_BIAS`] per rdata it stores or forwards. `commit` subtracts
//! the uncommitted bias; zero means nobody kept a reference and the storage
//! is released immediately (the common case for uninteresting packets).
//! Asynchronous consumers later subtract `RDATA_BIAS - adjust` once per
//! fragment, so any number of reorder admins is settled with a single
//! atomic subtract per rdata.
//!
//! Contract: all `alloc`/`append` calls happen on the owning thread before
//! `commit`; after `commit` the byte contents are immutable and the
//! refcount is authoritative.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::dds::{Error, Result};

/// Bias held by an rmsg between `new` and `commit`.
pub const UNCOMMITTED_BIAS: u32 = 1 << 31;
/// Bias added per rdata stored or forwarded during synchronous processing.
pub const RDATA_BIAS: u32 = 1 << 20;

const ALIGN: u32 = 8;

fn align8(x: u32) -> u32 {
    (x + (ALIGN - 1)) & !(ALIGN - 1)
}

fn thread_token() -> u64 {
    use std::hash::{Hash, Hasher};
    let mut h = std::collections::hash_map::DefaultHasher::new();
    std::thread::current().id().hash(&mut h);
    h.finish() | 1
}

// ---------------------------------------------------------------------------
// RBuf
// ---------------------------------------------------------------------------

/// One arena. Single writer (the owning receive thread, into disjoint
/// fresh ranges), many readers of committed ranges.
pub(crate) struct RBuf {
    storage: Box<[UnsafeCell<u8>]>,
    capacity: u32,
    /// Chunks carved out and not yet released.
    live_chunks: AtomicU32,
}

// Disjoint-range single-writer/immutable-after-commit discipline; see the
// module contract.
unsafe impl Send for RBuf {}
unsafe impl Sync for RBuf {}

impl RBuf {
    fn new(capacity: u32) -> Arc<RBuf> {
        let mut v = Vec::with_capacity(capacity as usize);
        v.resize_with(capacity as usize, || UnsafeCell::new(0));
        Arc::new(RBuf {
            storage: v.into_boxed_slice(),
            capacity,
            live_chunks: AtomicU32::new(0),
        })
    }

    /// Copy `bytes` into the arena at `off`.
    ///
    /// Caller guarantees the range is inside one carved chunk that has not
    /// been committed yet, so no reader can observe it concurrently.
    fn write(&self, off: u32, bytes: &[u8]) {
        debug_assert!(off as usize + bytes.len() <= self.capacity as usize);
        unsafe {
            let dst = self.storage[off as usize].get();
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), dst, bytes.len());
        }
    }

    /// View a committed range.
    fn slice(&self, off: u32, len: u32) -> &[u8] {
        debug_assert!(off + len <= self.capacity);
        unsafe {
            std::slice::from_raw_parts(self.storage[off as usize].get(), len as usize)
        }
    }
}

// ---------------------------------------------------------------------------
// RBufPool
// ---------------------------------------------------------------------------

struct PoolShared {
    rbuf_size: u32,
    max_rmsg_size: u32,
    owner: AtomicU64,
    current: Mutex<CurrentRBuf>,
}

struct CurrentRBuf {
    rbuf: Arc<RBuf>,
    freeptr: u32,
}

/// Per-receive-thread allocation front-end.
pub struct RBufPool {
    shared: Arc<PoolShared>,
}

impl RBufPool {
    /// Create a pool with the given arena size and maximum rmsg size.
    pub fn new(rbuf_size: u32, max_rmsg_size: u32) -> Result<RBufPool> {
        if max_rmsg_size == 0 || rbuf_size < max_rmsg_size {
            return Err(Error::BadParameter(
                "rbuf size must be at least the maximum rmsg size".into(),
            ));
        }
        Ok(RBufPool {
            shared: Arc::new(PoolShared {
                rbuf_size,
                max_rmsg_size,
                owner: AtomicU64::new(0),
                current: Mutex::new(CurrentRBuf {
                    rbuf: RBuf::new(rbuf_size),
                    freeptr: 0,
                }),
            }),
        })
    }

    /// Bind the pool to the calling thread. Only this thread may allocate
    /// from now on (checked in debug builds).
    pub fn set_owner(&self) {
        self.shared.owner.store(thread_token(), Ordering::Relaxed);
    }

    /// Reserve storage for one packet and return the fresh rmsg, refcount
    /// biased as uncommitted.
    pub fn rmsg_new(&self) -> RMsg {
        let chunk = self.shared.carve(self.shared.max_rmsg_size);
        RMsg {
            inner: Arc::new(RMsgInner {
                pool: Arc::clone(&self.shared),
                refcount: AtomicU32::new(UNCOMMITTED_BIAS),
                released: AtomicBool::new(false),
                chunks: UnsafeCell::new(vec![chunk]),
            }),
        }
    }

    #[cfg(test)]
    fn live_chunks_in_current(&self) -> u32 {
        self.shared.current.lock().rbuf.live_chunks.load(Ordering::Relaxed)
    }
}

impl PoolShared {
    fn assert_owner(&self) {
        debug_assert!({
            let o = self.owner.load(Ordering::Relaxed);
            o == 0 || o == thread_token()
        });
    }

    fn carve(&self, size: u32) -> Chunk {
        self.assert_owner();
        let size = align8(size);
        let mut cur = self.current.lock();
        if cur.freeptr + size > cur.rbuf.capacity {
            if cur.rbuf.live_chunks.load(Ordering::Acquire) == 0 {
                // all chunks of this arena were released: rewind and reuse
                cur.freeptr = 0;
            } else {
                let cap = self.rbuf_size.max(size);
                cur.rbuf = RBuf::new(cap);
                cur.freeptr = 0;
            }
        }
        let base = cur.freeptr;
        cur.freeptr += size;
        cur.rbuf.live_chunks.fetch_add(1, Ordering::AcqRel);
        Chunk {
            rbuf: Arc::clone(&cur.rbuf),
            base,
            cap: size,
            used: 0,
            start_global: 0, // fixed up by the caller for overflow chunks
        }
    }
}

// ---------------------------------------------------------------------------
// RMsg
// ---------------------------------------------------------------------------

struct Chunk {
    rbuf: Arc<RBuf>,
    base: u32,
    cap: u32,
    used: u32,
    /// Offset of this chunk's first byte in the rmsg's logical byte space.
    start_global: u32,
}

struct RMsgInner {
    pool: Arc<PoolShared>,
    refcount: AtomicU32,
    released: AtomicBool,
    /// Mutated only by the owning thread before commit; immutable after.
    chunks: UnsafeCell<Vec<Chunk>>,
}

// Same discipline as RBuf: pre-commit access is confined to the owning
// thread, post-commit access is read-only.
unsafe impl Send for RMsgInner {}
unsafe impl Sync for RMsgInner {}

impl RMsgInner {
    fn release_storage(&self) {
        let was = self.released.swap(true, Ordering::AcqRel);
        debug_assert!(!was, "rmsg storage released twice");
        let chunks = unsafe { &*self.chunks.get() };
        for c in chunks {
            c.rbuf.live_chunks.fetch_sub(1, Ordering::AcqRel);
        }
    }
}

impl Drop for RMsgInner {
    fn drop(&mut self) {
        // an rmsg abandoned without ever being committed still returns its
        // chunks to the arena accounting
        if !self.released.load(Ordering::Acquire) {
            self.release_storage();
        }
    }
}

/// Handle to one packet's storage. Cheap to clone.
#[derive(Clone)]
pub struct RMsg {
    inner: Arc<RMsgInner>,
}

impl RMsg {
    /// Copy bytes into the rmsg, growing with an overflow chunk from the
    /// same pool when the current chunk is exhausted. Returns the logical
    /// offset of the copied bytes. Owner thread, pre-commit only.
    pub fn append(&self, bytes: &[u8]) -> Result<u32> {
        debug_assert!(
            self.inner.refcount.load(Ordering::Relaxed) >= UNCOMMITTED_BIAS,
            "append on a committed rmsg"
        );
        if bytes.len() > u32::MAX as usize / 2 {
            return Err(Error::OutOfResources("rmsg append too large".into()));
        }
        let need = bytes.len() as u32;
        let chunks = unsafe { &mut *self.inner.chunks.get() };
        let last = chunks.last_mut().expect("rmsg always has a chunk");
        if last.used + need <= last.cap {
            let off = last.start_global + last.used;
            last.rbuf.write(last.base + last.used, bytes);
            last.used += need;
            return Ok(off);
        }
        let start_global = align8(last.start_global + last.used);
        let want = need.max(self.inner.pool.max_rmsg_size);
        let mut chunk = self.inner.pool.carve(want);
        chunk.start_global = start_global;
        chunk.rbuf.write(chunk.base, bytes);
        chunk.used = need;
        chunks.push(chunk);
        Ok(start_global)
    }

    /// View a range of the rmsg's logical byte space. The range must lie
    /// within a single appended region.
    #[must_use]
    pub fn bytes(&self, off: u32, len: u32) -> &[u8] {
        let chunks = unsafe { &*self.inner.chunks.get() };
        for c in chunks {
            if off >= c.start_global && off + len <= c.start_global + c.used {
                return c.rbuf.slice(c.base + (off - c.start_global), len);
            }
        }
        panic!("rmsg byte range [{off}, {}) not in any chunk", off + len);
    }

    /// Subtract the uncommitted bias. If nothing retained a reference the
    /// storage goes back to the arena immediately.
    pub fn commit(&self) {
        let old = self.inner.refcount.fetch_sub(UNCOMMITTED_BIAS, Ordering::AcqRel);
        debug_assert!(old >= UNCOMMITTED_BIAS);
        if old == UNCOMMITTED_BIAS {
            self.inner.release_storage();
        }
    }

    /// Add the per-rdata bias. Called while storing or forwarding an rdata
    /// during synchronous processing (pre-commit).
    pub fn add_bias(&self) {
        debug_assert!(self.inner.refcount.load(Ordering::Relaxed) >= UNCOMMITTED_BIAS);
        self.inner.refcount.fetch_add(RDATA_BIAS, Ordering::AcqRel);
    }

    /// Subtract the bias, adjusted for the number of admins that accepted
    /// the rdata. A single atomic settles any number of acceptances.
    pub fn rmbias_and_adjust(&self, adjust: u32) {
        debug_assert!(adjust < RDATA_BIAS);
        let sub = RDATA_BIAS - adjust;
        let old = self.inner.refcount.fetch_sub(sub, Ordering::AcqRel);
        debug_assert!(old >= sub);
        if old == sub {
            self.inner.release_storage();
        }
    }

    /// Drop one retained reference.
    pub fn unref(&self) {
        let old = self.inner.refcount.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(old >= 1);
        if old == 1 {
            self.inner.release_storage();
        }
    }

    #[must_use]
    pub fn refcount(&self) -> u32 {
        self.inner.refcount.load(Ordering::Acquire)
    }
}

// ---------------------------------------------------------------------------
// RData
// ---------------------------------------------------------------------------

/// Descriptor of one submessage's payload inside an rmsg.
///
/// `min`/`maxp1` are byte offsets within the *sample* (fragment coverage);
/// `submsg_off`/`payload_off` locate the submessage and its payload in the
/// rmsg's byte space. Never outlives its rmsg: the handle keeps storage
/// accounting alive.
#[derive(Clone)]
pub struct RData {
    rmsg: RMsg,
    pub min: u32,
    pub maxp1: u32,
    pub submsg_off: u32,
    pub payload_off: u32,
}

impl RData {
    #[must_use]
    pub fn new(rmsg: &RMsg, min: u32, maxp1: u32, submsg_off: u32, payload_off: u32) -> RData {
        RData {
            rmsg: rmsg.clone(),
            min,
            maxp1,
            submsg_off,
            payload_off,
        }
    }

    /// Synthetic zero-length rdata used to carry gap intervals. Comes with
    /// the rdata bias already applied, like any stored rdata.
    #[must_use]
    pub fn new_gap(rmsg: &RMsg) -> RData {
        let d = RData::new(rmsg, 0, 0, 0, 0);
        d.rmsg.add_bias();
        d
    }

    #[must_use]
    pub fn rmsg(&self) -> &RMsg {
        &self.rmsg
    }

    /// Payload bytes covered by this fragment.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        self.rmsg.bytes(self.payload_off, self.maxp1 - self.min)
    }

    #[must_use]
    pub fn is_gap(&self) -> bool {
        self.min == 0 && self.maxp1 == 0
    }
}

/// Apply the deferred refcount change for every rdata in a fragment chain:
/// `adjust` acceptances minus the initial bias, exactly once per fragment.
pub fn fragchain_adjust_refcount(chain: &[RData], adjust: u32) {
    for rdata in chain {
        rdata.rmsg.rmbias_and_adjust(adjust);
    }
}

/// Drop one retained reference per rdata in the chain (delivery done).
pub fn fragchain_unref(chain: &[RData]) {
    for rdata in chain {
        rdata.rmsg.unref();
    }
}

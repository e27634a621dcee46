// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ldds contributors

//! Per-proxy-writer sample reordering.
//!
//! Out-of-order samples are tracked as non-overlapping, non-consecutive
//! intervals of sequence numbers, each holding the chain of samples it
//! covers. `next_seq` is the next sequence number due for delivery; storing
//! anything at or below it is a bug, so stale arrivals are rejected before
//! they can touch the tree.
//!
//! The caller owns the refcount settlement: `refcount_adjust` counts how
//! many admins accepted the sample, and exactly once at the end of
//! processing the caller applies `adjust - BIAS` to every rdata in the
//! fragment chain (see [`crate::rx::rbufpool`]).

use std::collections::{BTreeMap, VecDeque};
use std::ops::Bound;

use super::rbufpool::{fragchain_unref, RData};
use super::{NackMap, RSample, SampleChain, SampleChainElem};

/// Delivery discipline of a reorder admin.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReorderMode {
    /// Hold samples until contiguous from `next_seq`.
    Normal,
    /// Deliver on arrival if the sequence number moves forward, jumping
    /// `next_seq` past any holes.
    MonotonicallyIncreasing,
    /// Deliver every non-duplicate sample.
    AlwaysDeliver,
}

/// Outcome of inserting a sample or gap.
pub enum ReorderOutcome {
    /// The chain is ready for the delivery queue; `count` samples.
    Deliver { chain: SampleChain, count: u32 },
    /// Stored (or the gap taught us something).
    Accept,
    /// Discarded: duplicate, cap hit, or delivery queue backlog.
    Reject,
    /// Sequence number below `next_seq`.
    TooOld,
}

struct Interval {
    maxp1: u64,
    elems: VecDeque<SampleChainElem>,
}

impl Interval {
    fn n_samples(&self) -> u32 {
        self.elems.len() as u32
    }
}

/// Reorder admin for one proxy writer (or one out-of-sync reader match).
pub struct Reorder {
    /// Keyed by interval minimum sequence number.
    intervals: BTreeMap<u64, Interval>,
    next_seq: u64,
    mode: ReorderMode,
    max_samples: u32,
    n_samples: u32,
}

impl Reorder {
    #[must_use]
    pub fn new(mode: ReorderMode, max_samples: u32) -> Reorder {
        Reorder {
            intervals: BTreeMap::new(),
            next_seq: 1,
            mode,
            max_samples,
            n_samples: 0,
        }
    }

    #[must_use]
    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    #[must_use]
    pub fn n_samples(&self) -> u32 {
        self.n_samples
    }

    /// Whether a sample with `seq` would add information.
    #[must_use]
    pub fn wantsample(&self, seq: u64) -> bool {
        if seq < self.next_seq {
            return false;
        }
        match self.intervals.range(..=seq).next_back() {
            None => true,
            Some((_, iv)) => iv.maxp1 <= seq,
        }
    }

    /// Insert a completed sample.
    ///
    /// On success `refcount_adjust` is incremented; on reject it is left
    /// untouched. The caller applies the batched refcount change to the
    /// fragment chain exactly once after all admins have seen the sample.
    pub fn insert(
        &mut self,
        sample: RSample,
        refcount_adjust: &mut u32,
        delivery_queue_full: bool,
    ) -> ReorderOutcome {
        let seq = sample.info.seq;
        log::trace!(
            "[reorder] insert seq {} expecting {} mode {:?}",
            seq,
            self.next_seq,
            self.mode
        );
        debug_assert!(self.n_samples <= self.max_samples);

        let deliverable = seq == self.next_seq
            || (seq > self.next_seq && self.mode == ReorderMode::MonotonicallyIncreasing)
            || self.mode == ReorderMode::AlwaysDeliver;

        if deliverable {
            // delivering appends to the delivery queue; when that queue is
            // backed up the sample is rejected instead, because a
            // deliverable sample must never sit in the tree
            if delivery_queue_full {
                return ReorderOutcome::Reject;
            }
            let mut chain: SampleChain = vec![SampleChainElem {
                info: Some(Box::new(sample.info)),
                fragchain: sample.fragchain,
            }];
            let mut maxp1 = seq + 1;
            let mut count = 1u32;
            // the first stored interval may now be contiguous with us
            if let Some((&min_key, _)) = self.intervals.iter().next() {
                if min_key == maxp1 {
                    let iv = self.intervals.remove(&min_key).expect("present");
                    maxp1 = iv.maxp1;
                    count += iv.n_samples();
                    self.n_samples -= iv.n_samples();
                    chain.extend(iv.elems);
                }
            }
            self.next_seq = maxp1;
            *refcount_adjust += 1;
            return ReorderOutcome::Deliver { chain, count };
        }

        if seq < self.next_seq {
            return ReorderOutcome::TooOld;
        }

        let elem = SampleChainElem {
            info: Some(Box::new(sample.info)),
            fragchain: sample.fragchain,
        };

        if self.intervals.is_empty() {
            if self.max_samples == 0 {
                return ReorderOutcome::Reject;
            }
            self.store_interval(seq, seq + 1, elem);
            self.n_samples = 1;
            *refcount_adjust += 1;
            return ReorderOutcome::Accept;
        }

        let (&max_min, max_iv) = self.intervals.iter().next_back().expect("non-empty");
        let max_maxp1 = max_iv.maxp1;

        if seq == max_maxp1 {
            // grow the last interval
            if delivery_queue_full {
                return ReorderOutcome::Reject;
            }
            if self.n_samples >= self.max_samples {
                return ReorderOutcome::Reject;
            }
            let iv = self.intervals.get_mut(&max_min).expect("present");
            iv.elems.push_back(elem);
            iv.maxp1 += 1;
            self.n_samples += 1;
            *refcount_adjust += 1;
            return ReorderOutcome::Accept;
        }

        if seq > max_maxp1 {
            // new interval at the end
            if delivery_queue_full {
                return ReorderOutcome::Reject;
            }
            if self.n_samples >= self.max_samples {
                return ReorderOutcome::Reject;
            }
            self.store_interval(seq, seq + 1, elem);
            self.n_samples += 1;
            *refcount_adjust += 1;
            return ReorderOutcome::Accept;
        }

        // hard case: somewhere in the middle
        if delivery_queue_full {
            return ReorderOutcome::Reject;
        }

        let predeq = self
            .intervals
            .range(..=seq)
            .next_back()
            .map(|(&k, iv)| (k, iv.maxp1));
        if let Some((pk, pmaxp1)) = predeq {
            if seq >= pk && seq < pmaxp1 {
                // contained in predeq: duplicate
                return ReorderOutcome::Reject;
            }
        }

        let has_immsucc = self.intervals.contains_key(&(seq + 1));
        match predeq {
            Some((pk, pmaxp1)) if pmaxp1 == seq => {
                // grow predeq at its end, and maybe absorb immsucc
                let iv = self.intervals.get_mut(&pk).expect("present");
                iv.elems.push_back(elem);
                iv.maxp1 += 1;
                if has_immsucc {
                    let succ = self.intervals.remove(&(seq + 1)).expect("present");
                    let iv = self.intervals.get_mut(&pk).expect("present");
                    iv.elems.extend(succ.elems);
                    iv.maxp1 = succ.maxp1;
                }
            }
            _ if has_immsucc => {
                // no touching predecessor: grow immsucc at its head, which
                // changes its key but not its neighbours
                let mut succ = self.intervals.remove(&(seq + 1)).expect("present");
                succ.elems.push_front(elem);
                self.intervals.insert(
                    seq,
                    Interval {
                        maxp1: succ.maxp1,
                        elems: succ.elems,
                    },
                );
            }
            _ => {
                self.store_interval(seq, seq + 1, elem);
            }
        }

        // bound memory after the fact: the new sample can no longer be the
        // last one, so deleting the tail is safe
        if self.n_samples < self.max_samples {
            self.n_samples += 1;
        } else {
            self.delete_last_sample();
        }
        *refcount_adjust += 1;
        ReorderOutcome::Accept
    }

    /// Process a gap announcement for `[min, maxp1)`.
    ///
    /// `gap_rdata` is a synthetic zero-length rdata; it is stored (and
    /// `refcount_adjust` incremented) only when a gap interval is actually
    /// kept in the tree.
    pub fn gap(
        &mut self,
        gap_rdata: &RData,
        min: u64,
        maxp1: u64,
        refcount_adjust: &mut u32,
    ) -> ReorderOutcome {
        log::trace!(
            "[reorder] gap [{}, {}) expecting {}",
            min,
            maxp1,
            self.next_seq
        );
        if maxp1 <= self.next_seq {
            return ReorderOutcome::TooOld;
        }
        if self.mode != ReorderMode::Normal {
            return ReorderOutcome::Reject;
        }

        match self.coalesce_intervals_touching(min, maxp1) {
            None => {
                if min <= self.next_seq {
                    self.next_seq = maxp1;
                    return ReorderOutcome::Accept;
                }
                let at_end = self
                    .intervals
                    .iter()
                    .next_back()
                    .map_or(true, |(_, iv)| min > iv.maxp1);
                if self.n_samples == self.max_samples && at_end {
                    return ReorderOutcome::Reject;
                }
                self.store_interval(
                    min,
                    maxp1,
                    SampleChainElem {
                        info: None,
                        fragchain: vec![gap_rdata.clone()],
                    },
                );
                if self.n_samples < self.max_samples {
                    self.n_samples += 1;
                } else {
                    self.delete_last_sample();
                }
                *refcount_adjust += 1;
                ReorderOutcome::Accept
            }
            Some((key, valuable)) => {
                let deliverable = key <= self.next_seq;
                if deliverable {
                    let iv = self.intervals.remove(&key).expect("present");
                    self.next_seq = iv.maxp1;
                    self.n_samples -= iv.n_samples();
                    let count = iv.n_samples();
                    return ReorderOutcome::Deliver {
                        chain: iv.elems.into_iter().collect(),
                        count,
                    };
                }
                if valuable {
                    ReorderOutcome::Accept
                } else {
                    ReorderOutcome::Reject
                }
            }
        }
    }

    /// Bitmap of sequence numbers missing between `base` and the stored
    /// intervals, capped at `maxbits`. With `notail` the bitmap stops after
    /// the last stored interval instead of padding trailing ones.
    #[must_use]
    pub fn nackmap(&self, base: u64, maxseq: u64, maxbits: u32, notail: bool) -> NackMap {
        let mut maxbits = maxbits.min(NackMap::MAX_BITS);
        // no point requesting more than we are willing to store
        if maxbits > self.max_samples {
            maxbits = self.max_samples;
        }
        let mut base = base;
        if base > self.next_seq {
            log::debug!(
                "[reorder] nackmap base {} beyond next_seq {}",
                base,
                self.next_seq
            );
            base = self.next_seq;
        }
        let mut maxseq = maxseq;
        if maxseq + 1 < base {
            log::debug!("[reorder] nackmap maxseq {} below base {}", maxseq, base);
            maxseq = base - 1;
        }

        let numbits = (maxseq + 1 - base).min(u64::from(maxbits)) as u32;
        let mut map = NackMap::new(base, numbits);

        let mut i = base;
        for (&iv_min, iv) in &self.intervals {
            if i >= base + u64::from(numbits) {
                break;
            }
            debug_assert!(iv_min > base);
            while i < base + u64::from(numbits) && i < iv_min {
                map.set((i - base) as u32);
                i += 1;
            }
            i = i.max(iv.maxp1);
        }
        if notail && i < base + u64::from(numbits) {
            map.truncate((i - base) as u32);
        } else {
            while i < base + u64::from(numbits) {
                map.set((i - base) as u32);
                i += 1;
            }
        }
        map
    }

    fn store_interval(&mut self, min: u64, maxp1: u64, elem: SampleChainElem) {
        let mut elems = VecDeque::new();
        elems.push_back(elem);
        let prev = self.intervals.insert(min, Interval { maxp1, elems });
        debug_assert!(prev.is_none(), "interval key collision at {min}");
    }

    /// Merge every interval overlapping or adjacent to `[min, maxp1)` into
    /// one, growing it to cover the range. Returns the merged interval's
    /// key and whether anything new was learned.
    fn coalesce_intervals_touching(&mut self, min: u64, maxp1: u64) -> Option<(u64, bool)> {
        let mut valuable = false;

        // first interval [m, n) with n >= min and m <= maxp1
        let start_key = match self.intervals.range(..=min).next_back() {
            Some((&k, iv)) if iv.maxp1 >= min => Some(k),
            other => {
                let next = match other {
                    Some((&k, _)) => self
                        .intervals
                        .range((Bound::Excluded(k), Bound::Unbounded))
                        .next(),
                    None => self.intervals.iter().next(),
                };
                match next {
                    Some((&k, _)) if k <= maxp1 => Some(k),
                    _ => None,
                }
            }
        }?;

        // absorb successors with m' <= maxp1
        loop {
            let succ_key = match self
                .intervals
                .range((Bound::Excluded(start_key), Bound::Unbounded))
                .next()
            {
                Some((&k, _)) if k <= maxp1 => k,
                _ => break,
            };
            let succ = self.intervals.remove(&succ_key).expect("present");
            let node = self.intervals.get_mut(&start_key).expect("present");
            node.maxp1 = succ.maxp1;
            node.elems.extend(succ.elems);
            valuable = true;
        }

        // grow to cover [min, maxp1)
        if min < start_key {
            let iv = self.intervals.remove(&start_key).expect("present");
            self.intervals.insert(min, iv);
            valuable = true;
            let iv = self.intervals.get_mut(&min).expect("present");
            if maxp1 > iv.maxp1 {
                iv.maxp1 = maxp1;
            }
            return Some((min, true));
        }
        let iv = self.intervals.get_mut(&start_key).expect("present");
        if maxp1 > iv.maxp1 {
            iv.maxp1 = maxp1;
            valuable = true;
        }
        Some((start_key, valuable))
    }

    /// Drop the last sample of the highest interval to bound memory.
    fn delete_last_sample(&mut self) {
        let (&last_key, last) = self
            .intervals
            .iter_mut()
            .next_back()
            .expect("called with at least one interval");
        if last.elems.len() == 1 {
            let iv = self.intervals.remove(&last_key).expect("present");
            for e in iv.elems {
                fragchain_unref(&e.fragchain);
            }
        } else {
            let victim = last.elems.pop_back().expect("len > 1");
            last.maxp1 -= 1;
            fragchain_unref(&victim.fragchain);
        }
    }
}

impl Drop for Reorder {
    fn drop(&mut self) {
        let intervals = std::mem::take(&mut self.intervals);
        for (_, iv) in intervals {
            for e in iv.elems {
                fragchain_unref(&e.fragchain);
            }
        }
    }
}

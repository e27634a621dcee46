// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ldds contributors

//! Per-proxy-writer fragment reassembly.
//!
//! State is an ordered map of in-flight samples keyed by sequence number;
//! each sample holds an ordered map of received byte intervals keyed by
//! their start offset. Intervals are non-overlapping and non-adjacent;
//! greedy coalescing on insert means a sample is complete exactly when the
//! map collapses to a single interval covering `[0, size)`.
//!
//! A sentinel interval `[0,0)` is kept while the fragment carrying offset 0
//! has not arrived, so an interval starting at 0 always exists and the
//! predecessor lookup cannot fail.

use std::collections::BTreeMap;
use std::ops::Bound;

use super::rbufpool::{fragchain_adjust_refcount, RData};
use super::{NackMap, RSample, SampleInfo};

/// Policy when the in-flight sample cap would be exceeded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DefragDropMode {
    /// Discard the newcomer if it has the highest sequence number.
    DropLatest,
    /// Evict the lowest sequence number unless the newcomer is older.
    DropOldest,
}

struct Interval {
    maxp1: u32,
    /// Fragment chain in arrival order; may contain duplicates. Empty for
    /// the sentinel.
    frags: Vec<RData>,
}

struct Sample {
    info: SampleInfo,
    /// Keyed by interval start offset.
    intervals: BTreeMap<u32, Interval>,
}

impl Sample {
    fn new(rdata: RData, info: &SampleInfo) -> Sample {
        let mut intervals = BTreeMap::new();
        if rdata.min > 0 {
            intervals.insert(
                0,
                Interval {
                    maxp1: 0,
                    frags: Vec::new(),
                },
            );
        }
        rdata.rmsg().add_bias();
        intervals.insert(
            rdata.min,
            Interval {
                maxp1: rdata.maxp1,
                frags: vec![rdata],
            },
        );
        Sample {
            info: info.clone(),
            intervals,
        }
    }

    fn is_complete(&self) -> bool {
        if self.intervals.len() != 1 {
            return false;
        }
        let (&min, iv) = self.intervals.iter().next().expect("len checked");
        min == 0 && iv.maxp1 >= self.info.size
    }

    /// Merge successors into the interval at `key` while they touch it.
    fn merge_with_succ(&mut self, key: u32) {
        loop {
            let node_maxp1 = self.intervals[&key].maxp1;
            let succ_key = match self
                .intervals
                .range((Bound::Excluded(key), Bound::Unbounded))
                .next()
            {
                Some((&k, _)) if k <= node_maxp1 => k,
                _ => return,
            };
            let succ = self.intervals.remove(&succ_key).expect("present");
            let node = self.intervals.get_mut(&key).expect("present");
            // keep even a fully contained successor's fragments: the chain
            // owns the refcounts that keep their rmsgs alive
            node.frags.extend(succ.frags);
            node.maxp1 = node.maxp1.max(succ.maxp1);
        }
    }

    /// Record one fragment. Returns true when the sample became complete.
    fn add_fragment(&mut self, rdata: RData, info: &SampleInfo) -> bool {
        let min = rdata.min;
        let maxp1 = rdata.maxp1;
        debug_assert!(min < maxp1);
        debug_assert_eq!(self.info.seq, info.seq);

        let (&pred_key, pred) = self
            .intervals
            .range_mut(..=min)
            .next_back()
            .expect("sentinel guarantees a predecessor");

        if pred.maxp1 >= maxp1 {
            // wholly contained: duplicate, drop without storing
            log::trace!("[defrag] seq {} frag [{},{}) duplicate", info.seq, min, maxp1);
            return false;
        }

        if min <= pred.maxp1 {
            // extends the predecessor at its tail
            rdata.rmsg().add_bias();
            if pred.frags.is_empty() {
                // sentinel: this fragment contributes offset 0, its sample
                // info becomes authoritative
                self.info = info.clone();
            }
            pred.frags.push(rdata);
            pred.maxp1 = maxp1;
            self.merge_with_succ(pred_key);
            return self.is_complete();
        }

        let succ_key = self
            .intervals
            .range((Bound::Excluded(pred_key), Bound::Unbounded))
            .next()
            .map(|(&k, _)| k);
        if let Some(sk) = succ_key {
            if sk <= maxp1 {
                // extends the successor at its head; the key changes but
                // ordering relative to neighbours does not
                rdata.rmsg().add_bias();
                let succ = self.intervals.remove(&sk).expect("present");
                let grew_tail = maxp1 > succ.maxp1;
                let mut frags = Vec::with_capacity(succ.frags.len() + 1);
                frags.push(rdata);
                frags.extend(succ.frags);
                self.intervals.insert(
                    min,
                    Interval {
                        maxp1: succ.maxp1.max(maxp1),
                        frags,
                    },
                );
                if grew_tail {
                    self.merge_with_succ(min);
                }
                debug_assert!(!self.is_complete());
                return false;
            }
        }

        // extends neither neighbour: new interval
        rdata.rmsg().add_bias();
        self.intervals.insert(
            min,
            Interval {
                maxp1,
                frags: vec![rdata],
            },
        );
        false
    }

    fn release(self) {
        for (_, iv) in self.intervals {
            fragchain_adjust_refcount(&iv.frags, 0);
        }
    }
}

/// Fragment reassembler for one proxy writer.
pub struct Defrag {
    samples: BTreeMap<u64, Sample>,
    drop_mode: DefragDropMode,
    max_samples: u32,
}

impl Defrag {
    #[must_use]
    pub fn new(drop_mode: DefragDropMode, max_samples: u32) -> Defrag {
        Defrag {
            samples: BTreeMap::new(),
            drop_mode,
            max_samples: max_samples.max(1),
        }
    }

    /// Number of samples currently being reassembled.
    #[must_use]
    pub fn n_samples(&self) -> usize {
        self.samples.len()
    }

    /// Record an rdata. Returns the completed sample when this fragment
    /// finished one (or was not actually a fragment).
    ///
    /// On return the rdata is either stored with its rmsg bias taken,
    /// returned inside a complete chain (bias taken per fragment), or
    /// dropped without touching the refcount.
    pub fn defrag_rsample(&mut self, rdata: RData, info: &SampleInfo) -> Option<RSample> {
        debug_assert!(rdata.min <= rdata.maxp1 && rdata.maxp1 <= info.size);

        if rdata.min == 0 && rdata.maxp1 == info.size {
            // not a fragment: complete by construction
            rdata.rmsg().add_bias();
            return Some(RSample {
                info: info.clone(),
                fragchain: vec![rdata],
            });
        }

        let seq = info.seq;
        let max_seq = self.samples.keys().next_back().copied();

        let complete = if max_seq == Some(seq) {
            self.samples
                .get_mut(&seq)
                .expect("max key present")
                .add_fragment(rdata, info)
        } else if let Some(sample) = self.samples.get_mut(&seq) {
            sample.add_fragment(rdata, info)
        } else if !self.limit_samples(seq) {
            log::trace!("[defrag] seq {} discarded by drop mode", seq);
            return None;
        } else {
            self.samples.insert(seq, Sample::new(rdata, info));
            false
        };

        if complete {
            let sample = self.samples.remove(&seq).expect("completed sample present");
            let (_, iv) = sample.intervals.into_iter().next().expect("single interval");
            return Some(RSample {
                info: sample.info,
                fragchain: iv.frags,
            });
        }
        None
    }

    /// Drop all in-flight samples with `seq` in `[min, maxp1)`. Used on
    /// Heartbeats (with `min = 1`) and Gaps.
    pub fn notegap(&mut self, min: u64, maxp1: u64) {
        let doomed: Vec<u64> = self.samples.range(min..maxp1).map(|(&s, _)| s).collect();
        for seq in doomed {
            if let Some(sample) = self.samples.remove(&seq) {
                sample.release();
            }
        }
    }

    /// Missing-fragment bitmap for `seq`.
    ///
    /// `maxfragnum` is the highest fragment number the peer advertised
    /// (0-based), `None` when the caller knows nothing. Returns `None` when
    /// neither side knows anything about the sample.
    #[must_use]
    pub fn nackmap(&self, seq: u64, maxfragnum: Option<u32>, maxbits: u32) -> Option<NackMap> {
        let maxbits = maxbits.min(NackMap::MAX_BITS);
        let Some(sample) = self.samples.get(&seq) else {
            let maxfragnum = maxfragnum?;
            // nothing recorded here, but the peer advertises fragments
            // [0, maxfragnum]: request them all
            let numbits = (maxfragnum + 1).min(maxbits);
            return Some(NackMap::all_ones(0, numbits));
        };

        let fragsz = sample.info.fragsize.max(1);
        let nfrags = sample.info.size.div_ceil(fragsz);
        let maxfragnum = maxfragnum.unwrap_or(u32::MAX).min(nfrags.saturating_sub(1));

        let first = sample.intervals.values().next().expect("interval at 0");
        let (&last_min, last) = sample.intervals.iter().next_back().expect("non-empty");
        let base = first.maxp1 / fragsz;
        let map_end = if last.maxp1 < (maxfragnum + 1) * fragsz && last.maxp1 < sample.info.size {
            maxfragnum
        } else if last_min > 0 {
            (last_min - 1) / fragsz
        } else {
            0
        };

        let numbits = if map_end < base {
            0
        } else {
            (map_end - base + 1).min(maxbits)
        };
        let mut map = NackMap::new(u64::from(base), numbits);

        let mut i = base;
        for (&iv_min, iv) in sample.intervals.iter().skip(1) {
            if i >= base + numbits {
                break;
            }
            // iv_min is the next available byte: the first fragment we do
            // not need; request everything before it
            let mut bound = iv_min / fragsz;
            if iv_min % fragsz != 0 {
                bound += 1;
            }
            while i < base + numbits && i < bound {
                map.set(i - base);
                i += 1;
            }
            i = i.max(iv.maxp1 / fragsz);
        }
        while i < base + numbits {
            map.set(i - base);
            i += 1;
        }
        Some(map)
    }

    /// Evict per drop mode; false means the newcomer itself is discarded.
    fn limit_samples(&mut self, seq: u64) -> bool {
        if (self.samples.len() as u32) < self.max_samples {
            return true;
        }
        let victim = match self.drop_mode {
            DefragDropMode::DropLatest => {
                let max_seq = *self.samples.keys().next_back().expect("non-empty");
                if seq > max_seq {
                    return false;
                }
                max_seq
            }
            DefragDropMode::DropOldest => {
                let min_seq = *self.samples.keys().next().expect("non-empty");
                if seq < min_seq {
                    return false;
                }
                min_seq
            }
        };
        log::trace!("[defrag] cap reached, evicting seq {}", victim);
        if let Some(sample) = self.samples.remove(&victim) {
            sample.release();
        }
        true
    }
}

impl Drop for Defrag {
    fn drop(&mut self) {
        let samples = std::mem::take(&mut self.samples);
        for (_, sample) in samples {
            sample.release();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::guid::Guid;
    use crate::core::time::WallTime;
    use crate::rx::rbufpool::{RBufPool, RMsg, RDATA_BIAS};
    use crate::rx::{fragchain_unref, reassemble_payload, StatusInfo};

    fn info(seq: u64, size: u32, fragsize: u32) -> SampleInfo {
        SampleInfo {
            writer: Guid::UNKNOWN,
            seq,
            size,
            fragsize,
            source_timestamp: WallTime(0),
            statusinfo: StatusInfo::default(),
            keyhash: None,
        }
    }

    fn pool() -> RBufPool {
        RBufPool::new(64 * 1024, 4096).unwrap()
    }

    /// The receive-thread order: allocate, process, then commit.
    fn push(
        d: &mut Defrag,
        p: &RBufPool,
        payload: &[u8],
        min: u32,
        si: &SampleInfo,
    ) -> (Option<RSample>, RMsg) {
        let m = p.rmsg_new();
        let off = m.append(payload).unwrap();
        let rd = RData::new(&m, min, min + payload.len() as u32, 0, off);
        let out = d.defrag_rsample(rd, si);
        m.commit();
        (out, m)
    }

    #[test]
    fn test_unfragmented_sample_passes_through() {
        let p = pool();
        let mut d = Defrag::new(DefragDropMode::DropLatest, 4);
        let (out, _m) = push(&mut d, &p, b"whole sample", 0, &info(1, 12, 12));
        let out = out.unwrap();
        assert_eq!(out.fragchain.len(), 1);
        assert_eq!(reassemble_payload(&out.info, &out.fragchain), b"whole sample");
        fragchain_adjust_refcount(&out.fragchain, 0);
    }

    #[test]
    fn test_two_fragments_in_order() {
        let p = pool();
        let mut d = Defrag::new(DefragDropMode::DropLatest, 4);
        let si = info(1, 8, 4);
        assert!(push(&mut d, &p, b"abcd", 0, &si).0.is_none());
        let (out, _m) = push(&mut d, &p, b"efgh", 4, &si);
        let out = out.unwrap();
        assert_eq!(reassemble_payload(&out.info, &out.fragchain), b"abcdefgh");
        assert_eq!(d.n_samples(), 0);
        fragchain_adjust_refcount(&out.fragchain, 0);
    }

    #[test]
    fn test_out_of_order_with_hole() {
        let p = pool();
        let mut d = Defrag::new(DefragDropMode::DropLatest, 4);
        let si = info(7, 12, 4);
        assert!(push(&mut d, &p, b"ijkl", 8, &si).0.is_none());
        assert!(push(&mut d, &p, b"abcd", 0, &si).0.is_none());
        let (out, _m) = push(&mut d, &p, b"efgh", 4, &si);
        let out = out.unwrap();
        assert_eq!(reassemble_payload(&out.info, &out.fragchain), b"abcdefghijkl");
        fragchain_adjust_refcount(&out.fragchain, 0);
    }

    #[test]
    fn test_duplicate_fragment_dropped() {
        let p = pool();
        let mut d = Defrag::new(DefragDropMode::DropLatest, 4);
        let si = info(1, 8, 4);
        assert!(push(&mut d, &p, b"abcd", 0, &si).0.is_none());
        let (out, dup_msg) = push(&mut d, &p, b"abcd", 0, &si);
        assert!(out.is_none());
        // duplicate was not stored: its storage settled at commit
        assert_eq!(dup_msg.refcount(), 0);
        let (out, _m) = push(&mut d, &p, b"efgh", 4, &si);
        fragchain_adjust_refcount(&out.unwrap().fragchain, 0);
    }

    #[test]
    fn test_overlapping_fragment_extends() {
        let p = pool();
        let mut d = Defrag::new(DefragDropMode::DropLatest, 4);
        let si = info(1, 10, 5);
        assert!(push(&mut d, &p, b"abcde", 0, &si).0.is_none());
        // overlaps [3,5) and adds [5,10)
        let (out, _m) = push(&mut d, &p, b"XYfghij", 3, &si);
        let out = out.unwrap();
        assert_eq!(reassemble_payload(&out.info, &out.fragchain), b"abcXYfghij");
        fragchain_adjust_refcount(&out.fragchain, 0);
    }

    #[test]
    fn test_fragment_bridging_two_intervals() {
        let p = pool();
        let mut d = Defrag::new(DefragDropMode::DropLatest, 4);
        let si = info(1, 12, 4);
        assert!(push(&mut d, &p, b"abcd", 0, &si).0.is_none());
        assert!(push(&mut d, &p, b"ijkl", 8, &si).0.is_none());
        // bridges the hole and touches both neighbours
        let (out, _m) = push(&mut d, &p, b"efgh", 4, &si);
        let out = out.unwrap();
        assert_eq!(reassemble_payload(&out.info, &out.fragchain), b"abcdefghijkl");
        fragchain_adjust_refcount(&out.fragchain, 0);
    }

    #[test]
    fn test_drop_latest_discards_newest() {
        let p = pool();
        let mut d = Defrag::new(DefragDropMode::DropLatest, 2);
        assert!(push(&mut d, &p, b"abcd", 0, &info(1, 8, 4)).0.is_none());
        assert!(push(&mut d, &p, b"abcd", 0, &info(2, 8, 4)).0.is_none());
        // newcomer has the highest seq: discarded, cap holds
        assert!(push(&mut d, &p, b"abcd", 0, &info(3, 8, 4)).0.is_none());
        assert_eq!(d.n_samples(), 2);
        // an older seq evicts the current max instead
        assert!(push(&mut d, &p, b"abcd", 0, &info(0, 8, 4)).0.is_none());
        assert_eq!(d.n_samples(), 2);
        assert!(d.nackmap(2, None, 16).is_none()); // max was evicted
        assert!(d.nackmap(1, None, 16).is_some());
        assert!(d.nackmap(0, None, 16).is_some());
    }

    #[test]
    fn test_drop_oldest_evicts_lowest() {
        let p = pool();
        let mut d = Defrag::new(DefragDropMode::DropOldest, 2);
        for seq in [5u64, 6] {
            assert!(push(&mut d, &p, b"abcd", 0, &info(seq, 8, 4)).0.is_none());
        }
        assert!(push(&mut d, &p, b"abcd", 0, &info(7, 8, 4)).0.is_none());
        assert_eq!(d.n_samples(), 2);
        assert!(d.nackmap(5, None, 16).is_none()); // evicted
                                                   // a newcomer older than everything is itself discarded
        assert!(push(&mut d, &p, b"abcd", 0, &info(1, 8, 4)).0.is_none());
        assert!(d.nackmap(1, None, 16).is_none());
    }

    #[test]
    fn test_notegap_drops_range() {
        let p = pool();
        let mut d = Defrag::new(DefragDropMode::DropLatest, 8);
        for seq in 1..=4u64 {
            assert!(push(&mut d, &p, b"abcd", 0, &info(seq, 8, 4)).0.is_none());
        }
        d.notegap(2, 4);
        assert_eq!(d.n_samples(), 2);
        assert!(d.nackmap(1, None, 16).is_some());
        assert!(d.nackmap(2, None, 16).is_none());
        assert!(d.nackmap(3, None, 16).is_none());
        assert!(d.nackmap(4, None, 16).is_some());
    }

    #[test]
    fn test_notegap_settles_storage() {
        let p = pool();
        let mut d = Defrag::new(DefragDropMode::DropLatest, 8);
        let si = info(1, 8, 4);
        let (_, m) = push(&mut d, &p, b"abcd", 0, &si);
        assert_eq!(m.refcount(), RDATA_BIAS);
        d.notegap(1, 2);
        assert_eq!(m.refcount(), 0, "dropped fragments release their bias");
    }

    #[test]
    fn test_nackmap_unknown_sample_all_ones() {
        let d = Defrag::new(DefragDropMode::DropLatest, 4);
        assert!(d.nackmap(9, None, 16).is_none());
        let m = d.nackmap(9, Some(7), 16).unwrap();
        assert_eq!(m.base, 0);
        assert_eq!(m.numbits, 8);
        assert_eq!(m.count(), 8);
    }

    #[test]
    fn test_nackmap_missing_middle_and_tail() {
        let p = pool();
        let mut d = Defrag::new(DefragDropMode::DropLatest, 4);
        // 6 fragments of 4 bytes; have 0 and 3, missing 1, 2, 4, 5
        let si = info(1, 24, 4);
        assert!(push(&mut d, &p, b"aaaa", 0, &si).0.is_none());
        assert!(push(&mut d, &p, b"dddd", 12, &si).0.is_none());
        let m = d.nackmap(1, Some(5), 16).unwrap();
        assert_eq!(m.base, 1);
        assert_eq!(m.numbits, 5);
        assert!(m.is_set(0)); // frag 1
        assert!(m.is_set(1)); // frag 2
        assert!(!m.is_set(2)); // frag 3 present
        assert!(m.is_set(3)); // frag 4
        assert!(m.is_set(4)); // frag 5
    }

    #[test]
    fn test_nackmap_missing_first_fragment() {
        let p = pool();
        let mut d = Defrag::new(DefragDropMode::DropLatest, 4);
        let si = info(1, 16, 4);
        assert!(push(&mut d, &p, b"cccc", 8, &si).0.is_none());
        let m = d.nackmap(1, Some(3), 16).unwrap();
        assert_eq!(m.base, 0);
        assert!(m.is_set(0));
        assert!(m.is_set(1));
        assert!(!m.is_set(2));
        assert!(m.is_set(3));
    }

    #[test]
    fn test_completion_refcount_settles_to_zero() {
        let p = pool();
        let mut d = Defrag::new(DefragDropMode::DropLatest, 4);
        let si = info(1, 8, 4);
        let (out, m1) = push(&mut d, &p, b"abcd", 0, &si);
        assert!(out.is_none());
        assert_eq!(m1.refcount(), RDATA_BIAS);
        let (out, m2) = push(&mut d, &p, b"efgh", 4, &si);
        let out = out.unwrap();
        // accepted by one reorder admin, then delivered and unreffed
        fragchain_adjust_refcount(&out.fragchain, 1);
        assert_eq!(m1.refcount(), 1);
        assert_eq!(m2.refcount(), 1);
        fragchain_unref(&out.fragchain);
        assert_eq!(m1.refcount(), 0);
        assert_eq!(m2.refcount(), 0);
    }
}

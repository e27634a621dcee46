// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ldds contributors

//! Proxy endpoints: local bookkeeping for discovered remote endpoints.
//!
//! A [`ProxyWriter`] carries the receive-path state for one remote
//! writer: its defragmenter and its primary reorder admin. Incoming
//! Data/DataFrag submessages flow through both and deliverable chains go
//! to the delivery queue; Heartbeats and Gaps prune the defragmenter and
//! advance the reorder admin. A [`ProxyReader`] only tracks what was last
//! acknowledged.

use crate::core::guid::Guid;
use crate::core::rt::Dqueue;
use crate::rx::defrag::{Defrag, DefragDropMode};
use crate::rx::reorder::{Reorder, ReorderMode, ReorderOutcome};
use crate::rx::{fragchain_adjust_refcount, NackMap, RData, SampleInfo};

/// Local shadow of a discovered remote writer.
pub struct ProxyWriter {
    pub guid: Guid,
    reliable: bool,
    defrag: Defrag,
    reorder: Reorder,
    /// Highest sequence number the writer advertised.
    last_known_seq: u64,
}

impl ProxyWriter {
    #[must_use]
    pub fn new(guid: Guid, reliable: bool, max_defrag_samples: u32, max_reorder_samples: u32) -> ProxyWriter {
        let (drop_mode, mode) = if reliable {
            (DefragDropMode::DropOldest, ReorderMode::Normal)
        } else {
            (DefragDropMode::DropLatest, ReorderMode::MonotonicallyIncreasing)
        };
        ProxyWriter {
            guid,
            reliable,
            defrag: Defrag::new(drop_mode, max_defrag_samples),
            reorder: Reorder::new(mode, max_reorder_samples),
            last_known_seq: 0,
        }
    }

    #[must_use]
    pub fn is_reliable(&self) -> bool {
        self.reliable
    }

    #[must_use]
    pub fn next_seq(&self) -> u64 {
        self.reorder.next_seq()
    }

    #[must_use]
    pub fn last_known_seq(&self) -> u64 {
        self.last_known_seq
    }

    /// Handle one Data/DataFrag submessage: defragment, reorder, and
    /// enqueue whatever became deliverable. The rdata's refcount is
    /// settled here, exactly once.
    pub fn handle_data(&mut self, rdata: RData, info: &SampleInfo, dqueue: &Dqueue) {
        self.last_known_seq = self.last_known_seq.max(info.seq);
        let Some(sample) = self.defrag.defrag_rsample(rdata, info) else {
            return;
        };
        let fragchain: Vec<RData> = sample.fragchain.clone();
        let mut adjust = 0;
        match self.reorder.insert(sample, &mut adjust, dqueue.is_full()) {
            ReorderOutcome::Deliver { chain, count } => {
                fragchain_adjust_refcount(&fragchain, adjust);
                dqueue.enqueue(chain, count);
            }
            ReorderOutcome::Accept => {
                fragchain_adjust_refcount(&fragchain, adjust);
            }
            ReorderOutcome::Reject | ReorderOutcome::TooOld => {
                debug_assert_eq!(adjust, 0);
                fragchain_adjust_refcount(&fragchain, 0);
            }
        }
    }

    /// Handle a Gap announcement for `[min, maxp1)`.
    pub fn handle_gap(&mut self, gap_rdata: &RData, min: u64, maxp1: u64, dqueue: &Dqueue) {
        self.last_known_seq = self.last_known_seq.max(maxp1.saturating_sub(1));
        self.defrag.notegap(min, maxp1);
        let mut adjust = 0;
        match self.reorder.gap(gap_rdata, min, maxp1, &mut adjust) {
            ReorderOutcome::Deliver { chain, count } => {
                gap_rdata.rmsg().rmbias_and_adjust(adjust);
                dqueue.enqueue(chain, count);
            }
            _ => {
                gap_rdata.rmsg().rmbias_and_adjust(adjust);
            }
        }
    }

    /// Handle a Heartbeat advertising `[first, last]` as available.
    /// Everything below `first` will never be (re)sent: prune and advance
    /// like a gap over `[1, first)`.
    pub fn handle_heartbeat(
        &mut self,
        gap_rdata: &RData,
        first: u64,
        last: u64,
        dqueue: &Dqueue,
    ) {
        self.last_known_seq = self.last_known_seq.max(last);
        if first > 1 {
            self.handle_gap(gap_rdata, 1, first, dqueue);
        } else {
            gap_rdata.rmsg().rmbias_and_adjust(0);
        }
    }

    /// AckNack bitmap for the reliability protocol.
    #[must_use]
    pub fn acknack_map(&self, maxbits: u32) -> NackMap {
        self.reorder
            .nackmap(self.reorder.next_seq(), self.last_known_seq, maxbits, false)
    }

    /// NackFrag bitmap for one partially received sample.
    #[must_use]
    pub fn nackfrag_map(&self, seq: u64, maxfragnum: Option<u32>, maxbits: u32) -> Option<NackMap> {
        self.defrag.nackmap(seq, maxfragnum, maxbits)
    }

    /// Whether a sample with this sequence number is still interesting.
    #[must_use]
    pub fn wantsample(&self, seq: u64) -> bool {
        self.reorder.wantsample(seq)
    }
}

/// Local shadow of a discovered remote reader: reliability state for the
/// send side.
pub struct ProxyReader {
    pub guid: Guid,
    /// Sequence number of the last sample the reader acknowledged.
    acked_seq: u64,
    /// Last AckNack count, to drop reordered duplicates.
    last_acknack_count: Option<u32>,
}

impl ProxyReader {
    #[must_use]
    pub fn new(guid: Guid) -> ProxyReader {
        ProxyReader {
            guid,
            acked_seq: 0,
            last_acknack_count: None,
        }
    }

    #[must_use]
    pub fn acked_seq(&self) -> u64 {
        self.acked_seq
    }

    /// Process an AckNack: returns the sequence numbers to retransmit, or
    /// `None` when the message is an out-of-date duplicate.
    pub fn handle_acknack(&mut self, count: u32, map: &NackMap) -> Option<Vec<u64>> {
        if let Some(last) = self.last_acknack_count {
            if count <= last {
                return None;
            }
        }
        self.last_acknack_count = Some(count);
        self.acked_seq = self.acked_seq.max(map.base.saturating_sub(1));
        let mut missing = Vec::new();
        for bit in 0..map.numbits {
            if map.is_set(bit) {
                missing.push(map.base + u64::from(bit));
            }
        }
        Some(missing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::guid::EntityId;
    use crate::core::time::WallTime;
    use crate::rx::rbufpool::{RBufPool, RMsg};
    use crate::rx::StatusInfo;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    fn pool() -> RBufPool {
        RBufPool::new(64 * 1024, 4096).unwrap()
    }

    fn info(seq: u64, size: u32, fragsize: u32) -> SampleInfo {
        SampleInfo {
            writer: Guid::new([1; 12], EntityId::user_writer(1)),
            seq,
            size,
            fragsize,
            source_timestamp: WallTime(0),
            statusinfo: StatusInfo::default(),
            keyhash: None,
        }
    }

    /// Receive-thread order: allocate, process, commit.
    fn push(
        pw: &mut ProxyWriter,
        p: &RBufPool,
        q: &Dqueue,
        payload: &[u8],
        min: u32,
        si: &SampleInfo,
    ) -> RMsg {
        let m = p.rmsg_new();
        let off = m.append(payload).unwrap();
        let rd = RData::new(&m, min, min + payload.len() as u32, 0, off);
        pw.handle_data(rd, si, q);
        m.commit();
        m
    }

    fn gap_rdata(pool: &RBufPool) -> RData {
        let m = pool.rmsg_new();
        let d = RData::new_gap(&m);
        m.commit();
        d
    }

    fn collecting_dqueue(name: &str) -> (Dqueue, Arc<Mutex<Vec<u64>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        let q = Dqueue::new(
            name,
            1000,
            Box::new(move |info, _frags, _rd| {
                s.lock().unwrap().push(info.seq);
            }),
        )
        .unwrap();
        (q, seen)
    }

    #[test]
    fn test_flow_in_order_samples_reach_handler() {
        let p = pool();
        let (q, seen) = collecting_dqueue("flow");
        let mut pw = ProxyWriter::new(Guid::UNKNOWN, true, 16, 64);
        for seq in 1..=3 {
            push(&mut pw, &p, &q, b"data", 0, &info(seq, 4, 4));
        }
        drop(q);
        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_flow_fragments_reassembled_then_delivered() {
        let p = pool();
        let (q, seen) = collecting_dqueue("frag");
        let mut pw = ProxyWriter::new(Guid::UNKNOWN, true, 16, 64);
        let si = info(1, 8, 4);
        push(&mut pw, &p, &q, b"efgh", 4, &si);
        push(&mut pw, &p, &q, b"abcd", 0, &si);
        drop(q);
        assert_eq!(*seen.lock().unwrap(), vec![1]);
    }

    #[test]
    fn test_flow_out_of_order_held_until_contiguous() {
        let p = pool();
        let (q, seen) = collecting_dqueue("ooo");
        let mut pw = ProxyWriter::new(Guid::UNKNOWN, true, 16, 64);
        push(&mut pw, &p, &q, b"data", 0, &info(2, 4, 4));
        push(&mut pw, &p, &q, b"data", 0, &info(3, 4, 4));
        std::thread::sleep(std::time::Duration::from_millis(20));
        assert!(seen.lock().unwrap().is_empty());
        push(&mut pw, &p, &q, b"data", 0, &info(1, 4, 4));
        drop(q);
        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_gap_advances_past_lost_samples() {
        let p = pool();
        let (q, seen) = collecting_dqueue("gap");
        let mut pw = ProxyWriter::new(Guid::UNKNOWN, true, 16, 64);
        push(&mut pw, &p, &q, b"data", 0, &info(3, 4, 4));
        // writer says 1 and 2 are gone
        pw.handle_gap(&gap_rdata(&p), 1, 3, &q);
        drop(q);
        assert_eq!(*seen.lock().unwrap(), vec![3]);
    }

    #[test]
    fn test_heartbeat_prunes_defrag_and_advances() {
        let p = pool();
        let (q, seen) = collecting_dqueue("hb");
        let mut pw = ProxyWriter::new(Guid::UNKNOWN, true, 16, 64);
        // half a sample at seq 1 that will never complete
        push(&mut pw, &p, &q, b"abcd", 0, &info(1, 8, 4));
        // heartbeat: first available is 2
        pw.handle_heartbeat(&gap_rdata(&p), 2, 5, &q);
        assert_eq!(pw.next_seq(), 2);
        assert_eq!(pw.last_known_seq(), 5);
        // the pruned fragment no longer yields a nackfrag map
        assert!(pw.nackfrag_map(1, None, 16).is_none());
        push(&mut pw, &p, &q, b"data", 0, &info(2, 4, 4));
        drop(q);
        assert_eq!(*seen.lock().unwrap(), vec![2]);
    }

    #[test]
    fn test_acknack_map_reports_holes() {
        let p = pool();
        let (q, _seen) = collecting_dqueue("ack");
        let mut pw = ProxyWriter::new(Guid::UNKNOWN, true, 16, 64);
        push(&mut pw, &p, &q, b"data", 0, &info(1, 4, 4));
        push(&mut pw, &p, &q, b"data", 0, &info(4, 4, 4));
        let map = pw.acknack_map(16);
        assert_eq!(map.base, 2);
        assert!(map.is_set(0)); // 2 missing
        assert!(map.is_set(1)); // 3 missing
        assert!(!map.is_set(2)); // 4 buffered
    }

    #[test]
    fn test_best_effort_forward_jumps() {
        let p = pool();
        let (q, seen) = collecting_dqueue("be");
        let mut pw = ProxyWriter::new(Guid::UNKNOWN, false, 16, 64);
        push(&mut pw, &p, &q, b"data", 0, &info(5, 4, 4));
        push(&mut pw, &p, &q, b"data", 0, &info(3, 4, 4)); // stale
        push(&mut pw, &p, &q, b"data", 0, &info(7, 4, 4));
        drop(q);
        assert_eq!(*seen.lock().unwrap(), vec![5, 7]);
    }

    #[test]
    fn test_storage_settles_after_flow() {
        let p = pool();
        let counted = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counted);
        let q = Dqueue::new(
            "settle",
            1000,
            Box::new(move |_i, _f, _r| {
                c.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .unwrap();
        let mut pw = ProxyWriter::new(Guid::UNKNOWN, true, 16, 64);
        let msgs: Vec<RMsg> = (1..=5u64)
            .map(|seq| push(&mut pw, &p, &q, b"data", 0, &info(seq, 4, 4)))
            .collect();
        drop(q); // drain
        assert_eq!(counted.load(Ordering::SeqCst), 5);
        for m in msgs {
            assert_eq!(m.refcount(), 0, "rmsg storage fully released");
        }
    }

    #[test]
    fn test_proxy_reader_acknack() {
        let mut pr = ProxyReader::new(Guid::UNKNOWN);
        let mut map = NackMap::new(3, 4);
        map.set(0);
        map.set(2);
        let missing = pr.handle_acknack(1, &map).unwrap();
        assert_eq!(missing, vec![3, 5]);
        assert_eq!(pr.acked_seq(), 2);
        // duplicate count: ignored
        assert!(pr.handle_acknack(1, &map).is_none());
        assert!(pr.handle_acknack(2, &map).is_some());
    }
}

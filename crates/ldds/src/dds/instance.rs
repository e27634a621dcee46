// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ldds contributors

//! Instance handles and the RTPS key hash.
//!
//! An instance is the equivalence class of samples under the topic key.
//! Handles are computed from (key class, serialized key bytes) and are
//! stable for the lifetime of the domain: equal keys across compatible
//! topics share a handle. The wire-level key hash is MD5 of the
//! serialized key (or the key itself, zero-padded, when it fits in 16
//! bytes) — hash collisions therefore must not collapse instances, which
//! is why identity is the key bytes, not the hash.

use std::collections::HashMap;

use md5::{Digest, Md5};
use parking_lot::Mutex;

/// Opaque instance identifier. `NIL` never identifies an instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceHandle(u64);

impl InstanceHandle {
    pub const NIL: InstanceHandle = InstanceHandle(0);

    #[must_use]
    pub fn is_nil(self) -> bool {
        self.0 == 0
    }

    #[must_use]
    pub fn raw(self) -> u64 {
        self.0
    }
}

/// RTPS key hash: identity zero-padded for short keys of bounded types,
/// MD5 otherwise.
#[must_use]
pub fn compute_keyhash(serialized_key: &[u8], bounded: bool) -> [u8; 16] {
    let mut out = [0u8; 16];
    if bounded && serialized_key.len() <= 16 {
        out[..serialized_key.len()].copy_from_slice(serialized_key);
    } else {
        let mut md5 = Md5::new();
        md5.update(serialized_key);
        out.copy_from_slice(&md5.finalize());
    }
    out
}

/// Domain-wide map from (key class, key bytes) to stable handles.
pub struct InstanceHandleTable {
    state: Mutex<TableState>,
}

struct TableState {
    next: u64,
    handles: HashMap<(String, Vec<u8>), InstanceHandle>,
}

impl InstanceHandleTable {
    #[must_use]
    pub fn new() -> InstanceHandleTable {
        InstanceHandleTable {
            state: Mutex::new(TableState {
                next: 1,
                handles: HashMap::new(),
            }),
        }
    }

    /// Handle for the instance with the given key, allocating on first
    /// sight.
    pub fn lookup_or_assign(&self, key_class: &str, serialized_key: &[u8]) -> InstanceHandle {
        let mut st = self.state.lock();
        if let Some(&h) = st
            .handles
            .get(&(key_class.to_string(), serialized_key.to_vec()))
        {
            return h;
        }
        let h = InstanceHandle(st.next);
        st.next += 1;
        st.handles
            .insert((key_class.to_string(), serialized_key.to_vec()), h);
        h
    }

    /// Handle for a known instance, without allocating.
    #[must_use]
    pub fn lookup(&self, key_class: &str, serialized_key: &[u8]) -> Option<InstanceHandle> {
        self.state
            .lock()
            .handles
            .get(&(key_class.to_string(), serialized_key.to_vec()))
            .copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().handles.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InstanceHandleTable {
    fn default() -> Self {
        InstanceHandleTable::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // the classic MD5 collision pair: two distinct 128-byte blocks with
    // identical digests
    const COLLISION_A: [u8; 128] = [
        0xd1, 0x31, 0xdd, 0x02, 0xc5, 0xe6, 0xee, 0xc4, 0x69, 0x3d, 0x9a, 0x06, 0x98, 0xaf, 0xf9,
        0x5c, 0x2f, 0xca, 0xb5, 0x87, 0x12, 0x46, 0x7e, 0xab, 0x40, 0x04, 0x58, 0x3e, 0xb8, 0xfb,
        0x7f, 0x89, 0x55, 0xad, 0x34, 0x06, 0x09, 0xf4, 0xb3, 0x02, 0x83, 0xe4, 0x88, 0x83, 0x25,
        0x71, 0x41, 0x5a, 0x08, 0x51, 0x25, 0xe8, 0xf7, 0xcd, 0xc9, 0x9f, 0xd9, 0x1d, 0xbd, 0xf2,
        0x80, 0x37, 0x3c, 0x5b, 0xd8, 0x82, 0x3e, 0x31, 0x56, 0x34, 0x8f, 0x5b, 0xae, 0x6d, 0xac,
        0xd4, 0x36, 0xc9, 0x19, 0xc6, 0xdd, 0x53, 0xe2, 0x34, 0x87, 0xda, 0x03, 0xfd, 0x02, 0x39,
        0x63, 0x06, 0xd2, 0x48, 0xcd, 0xa0, 0xe9, 0x9f, 0x33, 0x42, 0x0f, 0x57, 0x7e, 0xe8, 0xce,
        0x54, 0xb6, 0x70, 0x80, 0x28, 0x0d, 0x1e, 0xc6, 0x98, 0x21, 0xbc, 0xb6, 0xa8, 0x83, 0x93,
        0x96, 0xf9, 0x65, 0x2b, 0x6f, 0xf7, 0x2a, 0x70,
    ];
    const COLLISION_B: [u8; 128] = [
        0xd1, 0x31, 0xdd, 0x02, 0xc5, 0xe6, 0xee, 0xc4, 0x69, 0x3d, 0x9a, 0x06, 0x98, 0xaf, 0xf9,
        0x5c, 0x2f, 0xca, 0xb5, 0x07, 0x12, 0x46, 0x7e, 0xab, 0x40, 0x04, 0x58, 0x3e, 0xb8, 0xfb,
        0x7f, 0x89, 0x55, 0xad, 0x34, 0x06, 0x09, 0xf4, 0xb3, 0x02, 0x83, 0xe4, 0x88, 0x83, 0x25,
        0xf1, 0x41, 0x5a, 0x08, 0x51, 0x25, 0xe8, 0xf7, 0xcd, 0xc9, 0x9f, 0xd9, 0x1d, 0xbd, 0x72,
        0x80, 0x37, 0x3c, 0x5b, 0xd8, 0x82, 0x3e, 0x31, 0x56, 0x34, 0x8f, 0x5b, 0xae, 0x6d, 0xac,
        0xd4, 0x36, 0xc9, 0x19, 0xc6, 0xdd, 0x53, 0xe2, 0xb4, 0x87, 0xda, 0x03, 0xfd, 0x02, 0x39,
        0x63, 0x06, 0xd2, 0x48, 0xcd, 0xa0, 0xe9, 0x9f, 0x33, 0x42, 0x0f, 0x57, 0x7e, 0xe8, 0xce,
        0x54, 0xb6, 0x70, 0x80, 0xa8, 0x0d, 0x1e, 0xc6, 0x98, 0x21, 0xbc, 0xb6, 0xa8, 0x83, 0x93,
        0x96, 0xf9, 0x65, 0x2b, 0x6f, 0xf7, 0x2a, 0x70,
    ];

    #[test]
    fn test_short_key_is_identity_padded() {
        let kh = compute_keyhash(&[1, 2, 3, 4], true);
        assert_eq!(&kh[..4], &[1, 2, 3, 4]);
        assert_eq!(&kh[4..], &[0; 12]);
    }

    #[test]
    fn test_long_key_uses_md5() {
        let key = [0x41u8; 32];
        let kh = compute_keyhash(&key, true);
        let mut md5 = Md5::new();
        md5.update(key);
        let digest: [u8; 16] = md5.finalize().into();
        assert_eq!(kh, digest);
    }

    #[test]
    fn test_md5_collision_blocks_share_keyhash() {
        let a = compute_keyhash(&COLLISION_A, true);
        let b = compute_keyhash(&COLLISION_B, true);
        assert_eq!(a, b, "the collision pair hashes identically");
        assert_eq!(
            a,
            [
                0x79, 0x05, 0x40, 0x25, 0x25, 0x5f, 0xb1, 0xa2, 0x6e, 0x4b, 0xc4, 0x22, 0xae,
                0xf5, 0x4e, 0xb4
            ]
        );
    }

    #[test]
    fn test_collision_blocks_get_distinct_handles() {
        let t = InstanceHandleTable::new();
        let ha = t.lookup_or_assign("KeyedBlob", &COLLISION_A);
        let hb = t.lookup_or_assign("KeyedBlob", &COLLISION_B);
        // identical key hash, different key bytes: distinct instances
        assert_ne!(ha, hb);
    }

    #[test]
    fn test_same_key_same_handle_across_calls() {
        let t = InstanceHandleTable::new();
        let h1 = t.lookup_or_assign("A", &[1, 2]);
        let h2 = t.lookup_or_assign("A", &[1, 2]);
        assert_eq!(h1, h2);
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn test_same_key_class_shares_handles_across_topics() {
        // two topics of the same key class observe the same handle
        let t = InstanceHandleTable::new();
        let h_t1 = t.lookup_or_assign("KeyTypeA", &[9, 9]);
        let h_t2 = t.lookup_or_assign("KeyTypeA", &[9, 9]);
        assert_eq!(h_t1, h_t2);
        // a different key class does not
        let h_other = t.lookup_or_assign("KeyTypeB", &[9, 9]);
        assert_ne!(h_t1, h_other);
    }

    #[test]
    fn test_lookup_without_assign() {
        let t = InstanceHandleTable::new();
        assert!(t.lookup("A", &[5]).is_none());
        let h = t.lookup_or_assign("A", &[5]);
        assert_eq!(t.lookup("A", &[5]), Some(h));
    }
}

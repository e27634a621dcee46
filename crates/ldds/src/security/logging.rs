// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ldds contributors

//! Throttled logging for receive-path security drops.
//!
//! Asynchronous decode failures cannot propagate to a caller; the sample
//! is dropped and the failure logged at most once per (peer, kind) so a
//! hostile or misconfigured peer cannot flood the log.

use std::collections::HashSet;

use parking_lot::Mutex;

use crate::core::guid::GuidPrefix;
use crate::security::error::{SecErrorKind, SecurityError};

/// Once-per-(peer, kind) drop logger.
#[derive(Default)]
pub struct SecurityDropLog {
    seen: Mutex<HashSet<(GuidPrefix, SecErrorKind)>>,
}

impl SecurityDropLog {
    #[must_use]
    pub fn new() -> SecurityDropLog {
        SecurityDropLog::default()
    }

    /// Record a dropped sample from `peer`. Emits one log line the first
    /// time this (peer, kind) pair is seen; returns whether it logged.
    pub fn note_drop(&self, peer: GuidPrefix, err: &SecurityError) -> bool {
        let fresh = self.seen.lock().insert((peer, err.kind));
        if fresh {
            // the message carries only the failure class, never key bytes
            log::debug!("[security] dropping traffic from {:?}: {}", peer, err);
        }
        fresh
    }

    /// Forget a peer (e.g. after rematching with fresh tokens).
    pub fn forget_peer(&self, peer: GuidPrefix) {
        self.seen.lock().retain(|(p, _)| *p != peer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logs_once_per_peer_and_kind() {
        let l = SecurityDropLog::new();
        let peer = [1u8; 12];
        let err = SecurityError::cipher("tag mismatch");
        assert!(l.note_drop(peer, &err));
        assert!(!l.note_drop(peer, &err));
        // different kind from the same peer logs again
        let other = SecurityError::invalid_receiver_sign("missing mac");
        assert!(l.note_drop(peer, &other));
        // different peer, same kind logs again
        assert!(l.note_drop([2u8; 12], &err));
    }

    #[test]
    fn test_forget_peer_resets() {
        let l = SecurityDropLog::new();
        let peer = [3u8; 12];
        let err = SecurityError::cipher("x");
        assert!(l.note_drop(peer, &err));
        l.forget_peer(peer);
        assert!(l.note_drop(peer, &err));
    }
}

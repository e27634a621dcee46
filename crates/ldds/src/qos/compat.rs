// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ldds contributors

//! Request/offered QoS compatibility.
//!
//! A writer (offered) matches a reader (requested) when every matching
//! policy the reader requests is satisfied by what the writer offers. The
//! relation is deliberately asymmetric: a RELIABLE writer serves a
//! BEST_EFFORT reader, never the other way around.

use super::policy::*;
use super::{PolicyId, Qos};

/// Policies that caused a match to fail, writer vs reader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncompatibleQos {
    pub policies: Vec<PolicyId>,
}

impl IncompatibleQos {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}

/// Check an offered (writer-side) QoS against a requested (reader-side)
/// one. Absent policies fall back to the entity defaults before matching.
pub fn check_compatibility(offered: &Qos, requested: &Qos) -> Result<(), IncompatibleQos> {
    let mut bad = Vec::new();

    let off_durability = offered.durability.unwrap_or_default();
    let req_durability = requested.durability.unwrap_or_default();
    if off_durability.kind < req_durability.kind {
        bad.push(PolicyId::Durability);
    }

    let off_rel = offered.reliability.unwrap_or_default();
    let req_rel = requested.reliability.unwrap_or_default();
    if off_rel.kind < req_rel.kind {
        bad.push(PolicyId::Reliability);
    }

    let off_deadline = offered.deadline.unwrap_or_default();
    let req_deadline = requested.deadline.unwrap_or_default();
    if off_deadline.period > req_deadline.period {
        bad.push(PolicyId::Deadline);
    }

    let off_live = offered.liveliness.unwrap_or_default();
    let req_live = requested.liveliness.unwrap_or_default();
    if off_live.kind < req_live.kind || off_live.lease_duration > req_live.lease_duration {
        bad.push(PolicyId::Liveliness);
    }

    let off_own = offered.ownership.unwrap_or_default();
    let req_own = requested.ownership.unwrap_or_default();
    if off_own.kind != req_own.kind {
        bad.push(PolicyId::Ownership);
    }

    let off_order = offered.destination_order.unwrap_or_default();
    let req_order = requested.destination_order.unwrap_or_default();
    if off_order.kind < req_order.kind {
        bad.push(PolicyId::DestinationOrder);
    }

    if bad.is_empty() {
        Ok(())
    } else {
        Err(IncompatibleQos { policies: bad })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::time::DdsDuration;

    fn offered(kind: ReliabilityKind) -> Qos {
        let mut q = Qos::new();
        q.reliability = Some(Reliability {
            kind,
            max_blocking_time: DdsDuration::from_millis(100),
        });
        q
    }

    #[test]
    fn test_reliable_writer_serves_best_effort_reader() {
        let w = offered(ReliabilityKind::Reliable);
        let r = offered(ReliabilityKind::BestEffort);
        assert!(check_compatibility(&w, &r).is_ok());
    }

    #[test]
    fn test_best_effort_writer_rejected_by_reliable_reader() {
        let w = offered(ReliabilityKind::BestEffort);
        let r = offered(ReliabilityKind::Reliable);
        let err = check_compatibility(&w, &r).unwrap_err();
        assert_eq!(err.policies, vec![PolicyId::Reliability]);
    }

    #[test]
    fn test_matching_is_antisymmetric() {
        let strong = offered(ReliabilityKind::Reliable);
        let weak = offered(ReliabilityKind::BestEffort);
        assert!(check_compatibility(&strong, &weak).is_ok());
        assert!(check_compatibility(&weak, &strong).is_err());
    }

    #[test]
    fn test_durability_ordering() {
        let mut w = Qos::new();
        w.durability = Some(Durability {
            kind: DurabilityKind::TransientLocal,
        });
        let mut r = Qos::new();
        r.durability = Some(Durability {
            kind: DurabilityKind::Volatile,
        });
        assert!(check_compatibility(&w, &r).is_ok());
        assert!(check_compatibility(&r, &w).is_err());
    }

    #[test]
    fn test_deadline_tighter_offer_matches() {
        let mut w = Qos::new();
        w.deadline = Some(Deadline {
            period: DdsDuration::from_millis(100),
        });
        let mut r = Qos::new();
        r.deadline = Some(Deadline {
            period: DdsDuration::from_millis(500),
        });
        assert!(check_compatibility(&w, &r).is_ok());
        assert!(check_compatibility(&r, &w).is_err());
    }

    #[test]
    fn test_ownership_must_agree() {
        let mut w = Qos::new();
        w.ownership = Some(Ownership {
            kind: OwnershipKind::Exclusive,
        });
        let r = Qos::new(); // defaults to shared
        let err = check_compatibility(&w, &r).unwrap_err();
        assert_eq!(err.policies, vec![PolicyId::Ownership]);
    }

    #[test]
    fn test_multiple_incompatibilities_all_reported() {
        let mut w = Qos::new();
        w.reliability = Some(Reliability {
            kind: ReliabilityKind::BestEffort,
            max_blocking_time: DdsDuration::ZERO,
        });
        w.destination_order = Some(DestinationOrder {
            kind: DestinationOrderKind::ByReceptionTimestamp,
        });
        let mut r = Qos::new();
        r.reliability = Some(Reliability {
            kind: ReliabilityKind::Reliable,
            max_blocking_time: DdsDuration::ZERO,
        });
        r.destination_order = Some(DestinationOrder {
            kind: DestinationOrderKind::BySourceTimestamp,
        });
        let err = check_compatibility(&w, &r).unwrap_err();
        assert!(err.policies.contains(&PolicyId::Reliability));
        assert!(err.policies.contains(&PolicyId::DestinationOrder));
    }

    #[test]
    fn test_liveliness_lease_and_kind() {
        let mut w = Qos::new();
        w.liveliness = Some(Liveliness {
            kind: LivelinessKind::ManualByTopic,
            lease_duration: DdsDuration::from_secs(1),
        });
        let mut r = Qos::new();
        r.liveliness = Some(Liveliness {
            kind: LivelinessKind::Automatic,
            lease_duration: DdsDuration::from_secs(10),
        });
        assert!(check_compatibility(&w, &r).is_ok());
        assert!(check_compatibility(&r, &w).is_err());
    }
}

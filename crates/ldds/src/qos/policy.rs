// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ldds contributors

//! The closed set of QoS policy payloads.
//!
//! Each policy is a plain value type; presence is tracked by the sparse
//! [`crate::qos::Qos`] container, not here.

use crate::core::time::DdsDuration;

/// Marker for "no limit" in resource-limit style counters.
pub const LENGTH_UNLIMITED: u32 = u32::MAX;

// ---------------------------------------------------------------------------
// matching policies
// ---------------------------------------------------------------------------

/// Durability kinds, ordered weakest to strongest.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum DurabilityKind {
    #[default]
    Volatile,
    TransientLocal,
    Transient,
    Persistent,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Durability {
    pub kind: DurabilityKind,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum ReliabilityKind {
    #[default]
    BestEffort,
    Reliable,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Reliability {
    pub kind: ReliabilityKind,
    /// Upper bound on how long a reliable write may block on a full
    /// history before failing with a resource-limits error.
    pub max_blocking_time: DdsDuration,
}

impl Default for Reliability {
    fn default() -> Self {
        Reliability {
            kind: ReliabilityKind::BestEffort,
            max_blocking_time: DdsDuration::from_millis(100),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Deadline {
    pub period: DdsDuration,
}

impl Default for Deadline {
    fn default() -> Self {
        Deadline {
            period: DdsDuration::INFINITY,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LatencyBudget {
    pub duration: DdsDuration,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum LivelinessKind {
    #[default]
    Automatic,
    ManualByParticipant,
    ManualByTopic,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Liveliness {
    pub kind: LivelinessKind,
    pub lease_duration: DdsDuration,
}

impl Default for Liveliness {
    fn default() -> Self {
        Liveliness {
            kind: LivelinessKind::Automatic,
            lease_duration: DdsDuration::INFINITY,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OwnershipKind {
    #[default]
    Shared,
    Exclusive,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Ownership {
    pub kind: OwnershipKind,
}

/// Writer-only tiebreaker for exclusive ownership.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OwnershipStrength {
    pub value: i32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum DestinationOrderKind {
    #[default]
    ByReceptionTimestamp,
    BySourceTimestamp,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DestinationOrder {
    pub kind: DestinationOrderKind,
}

// ---------------------------------------------------------------------------
// history and resources
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HistoryKind {
    KeepLast { depth: u32 },
    KeepAll,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct History {
    pub kind: HistoryKind,
}

impl Default for History {
    fn default() -> Self {
        History {
            kind: HistoryKind::KeepLast { depth: 1 },
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResourceLimits {
    pub max_samples: u32,
    pub max_instances: u32,
    pub max_samples_per_instance: u32,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        ResourceLimits {
            max_samples: LENGTH_UNLIMITED,
            max_instances: LENGTH_UNLIMITED,
            max_samples_per_instance: LENGTH_UNLIMITED,
        }
    }
}

/// History kept on behalf of late joiners by a durability service.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DurabilityService {
    pub service_cleanup_delay: DdsDuration,
    pub history: History,
    pub resource_limits: ResourceLimits,
}

impl Default for DurabilityService {
    fn default() -> Self {
        DurabilityService {
            service_cleanup_delay: DdsDuration::ZERO,
            history: History::default(),
            resource_limits: ResourceLimits::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// presentation and grouping
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum PresentationAccessScope {
    #[default]
    Instance,
    Topic,
    Group,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Presentation {
    pub access_scope: PresentationAccessScope,
    pub coherent_access: bool,
    pub ordered_access: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Partition {
    pub names: Vec<String>,
}

// ---------------------------------------------------------------------------
// timing
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TimeBasedFilter {
    pub minimum_separation: DdsDuration,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Lifespan {
    pub duration: DdsDuration,
}

impl Default for Lifespan {
    fn default() -> Self {
        Lifespan {
            duration: DdsDuration::INFINITY,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TransportPriority {
    pub value: i32,
}

// ---------------------------------------------------------------------------
// lifecycle
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WriterDataLifecycle {
    pub autodispose_unregistered_instances: bool,
}

impl Default for WriterDataLifecycle {
    fn default() -> Self {
        WriterDataLifecycle {
            autodispose_unregistered_instances: true,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReaderDataLifecycle {
    pub autopurge_nowriter_samples_delay: DdsDuration,
    pub autopurge_disposed_samples_delay: DdsDuration,
}

impl Default for ReaderDataLifecycle {
    fn default() -> Self {
        ReaderDataLifecycle {
            autopurge_nowriter_samples_delay: DdsDuration::INFINITY,
            autopurge_disposed_samples_delay: DdsDuration::INFINITY,
        }
    }
}

// ---------------------------------------------------------------------------
// opaque data and naming
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UserData {
    pub value: Vec<u8>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TopicData {
    pub value: Vec<u8>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GroupData {
    pub value: Vec<u8>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EntityName {
    pub name: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Property {
    pub name: String,
    pub value: String,
    pub propagate: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BinaryProperty {
    pub name: String,
    pub value: Vec<u8>,
    pub propagate: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PropertyList {
    pub properties: Vec<Property>,
    pub binary_properties: Vec<BinaryProperty>,
}

// ---------------------------------------------------------------------------
// local matching control and type negotiation
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum IgnoreLocalKind {
    #[default]
    None,
    Participant,
    Process,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IgnoreLocal {
    pub kind: IgnoreLocalKind,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TypeConsistencyKind {
    DisallowTypeCoercion,
    #[default]
    AllowTypeCoercion,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TypeConsistency {
    pub kind: TypeConsistencyKind,
    pub ignore_sequence_bounds: bool,
    pub ignore_string_bounds: bool,
    pub ignore_member_names: bool,
    pub prevent_type_widening: bool,
}

impl Default for TypeConsistency {
    fn default() -> Self {
        TypeConsistency {
            kind: TypeConsistencyKind::AllowTypeCoercion,
            ignore_sequence_bounds: true,
            ignore_string_bounds: true,
            ignore_member_names: false,
            prevent_type_widening: false,
        }
    }
}

/// XCDR representation identifiers, in preference order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DataRepresentation {
    pub ids: Vec<i16>,
}

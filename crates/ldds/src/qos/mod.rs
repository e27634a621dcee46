// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ldds contributors

//! Quality-of-Service model.
//!
//! A [`Qos`] is an opaque container of sparsely-present policies: every
//! policy slot is an `Option`, and set operations respect presence.
//! Equality and deltas compare only policies present in both operands;
//! merge copies a policy from `src` only where `dst` has none.
//!
//! Validation is a pure function over the container; request/offered
//! compatibility lives in [`compat`].

pub mod compat;
pub mod policy;
#[cfg(feature = "qos-loaders")]
pub mod provider;

pub use compat::{check_compatibility, IncompatibleQos};
pub use policy::*;

use crate::core::time::DdsDuration;
use crate::dds::{Error, Result};

/// Which entity a QoS set is being applied to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Participant,
    Topic,
    Publisher,
    Subscriber,
    Writer,
    Reader,
}

/// Identifies one policy slot, e.g. in delta and incompatibility reports.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PolicyId {
    Durability,
    History,
    ResourceLimits,
    Reliability,
    Deadline,
    LatencyBudget,
    Liveliness,
    Ownership,
    OwnershipStrength,
    DestinationOrder,
    Presentation,
    Partition,
    TimeBasedFilter,
    Lifespan,
    DurabilityService,
    TransportPriority,
    UserData,
    TopicData,
    GroupData,
    WriterDataLifecycle,
    ReaderDataLifecycle,
    IgnoreLocal,
    TypeConsistency,
    DataRepresentation,
    EntityName,
    Property,
}

/// Sparse policy container.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Qos {
    pub durability: Option<Durability>,
    pub history: Option<History>,
    pub resource_limits: Option<ResourceLimits>,
    pub reliability: Option<Reliability>,
    pub deadline: Option<Deadline>,
    pub latency_budget: Option<LatencyBudget>,
    pub liveliness: Option<Liveliness>,
    pub ownership: Option<Ownership>,
    pub ownership_strength: Option<OwnershipStrength>,
    pub destination_order: Option<DestinationOrder>,
    pub presentation: Option<Presentation>,
    pub partition: Option<Partition>,
    pub time_based_filter: Option<TimeBasedFilter>,
    pub lifespan: Option<Lifespan>,
    pub durability_service: Option<DurabilityService>,
    pub transport_priority: Option<TransportPriority>,
    pub user_data: Option<UserData>,
    pub topic_data: Option<TopicData>,
    pub group_data: Option<GroupData>,
    pub writer_data_lifecycle: Option<WriterDataLifecycle>,
    pub reader_data_lifecycle: Option<ReaderDataLifecycle>,
    pub ignore_local: Option<IgnoreLocal>,
    pub type_consistency: Option<TypeConsistency>,
    pub data_representation: Option<DataRepresentation>,
    pub entity_name: Option<EntityName>,
    pub property: Option<PropertyList>,
}

/// Apply `$body` to every (field, PolicyId) pair of [`Qos`].
macro_rules! for_each_policy {
    ($m:ident) => {
        $m!(durability, Durability);
        $m!(history, History);
        $m!(resource_limits, ResourceLimits);
        $m!(reliability, Reliability);
        $m!(deadline, Deadline);
        $m!(latency_budget, LatencyBudget);
        $m!(liveliness, Liveliness);
        $m!(ownership, Ownership);
        $m!(ownership_strength, OwnershipStrength);
        $m!(destination_order, DestinationOrder);
        $m!(presentation, Presentation);
        $m!(partition, Partition);
        $m!(time_based_filter, TimeBasedFilter);
        $m!(lifespan, Lifespan);
        $m!(durability_service, DurabilityService);
        $m!(transport_priority, TransportPriority);
        $m!(user_data, UserData);
        $m!(topic_data, TopicData);
        $m!(group_data, GroupData);
        $m!(writer_data_lifecycle, WriterDataLifecycle);
        $m!(reader_data_lifecycle, ReaderDataLifecycle);
        $m!(ignore_local, IgnoreLocal);
        $m!(type_consistency, TypeConsistency);
        $m!(data_representation, DataRepresentation);
        $m!(entity_name, EntityName);
        $m!(property, Property);
    };
}

impl Qos {
    /// Empty container: no policy present.
    #[must_use]
    pub fn new() -> Qos {
        Qos::default()
    }

    /// Policies present in this container.
    #[must_use]
    pub fn present(&self) -> Vec<PolicyId> {
        let mut out = Vec::new();
        macro_rules! collect {
            ($field:ident, $id:ident) => {
                if self.$field.is_some() {
                    out.push(PolicyId::$id);
                }
            };
        }
        for_each_policy!(collect);
        out
    }

    #[must_use]
    pub fn is_present(&self, id: PolicyId) -> bool {
        macro_rules! check {
            ($field:ident, $id:ident) => {
                if id == PolicyId::$id {
                    return self.$field.is_some();
                }
            };
        }
        for_each_policy!(check);
        false
    }

    /// Copy each policy from `src` into `self` iff `self` does not already
    /// carry that policy.
    pub fn merge(&mut self, src: &Qos) {
        macro_rules! merge_one {
            ($field:ident, $id:ident) => {
                if self.$field.is_none() {
                    self.$field = src.$field.clone();
                }
            };
        }
        for_each_policy!(merge_one);
    }

    /// Equality over the policies present in both operands only.
    #[must_use]
    pub fn eq_in_common(&self, other: &Qos) -> bool {
        macro_rules! cmp {
            ($field:ident, $id:ident) => {
                if let (Some(a), Some(b)) = (&self.$field, &other.$field) {
                    if a != b {
                        return false;
                    }
                }
            };
        }
        for_each_policy!(cmp);
        true
    }

    /// Policies present in both operands with differing values.
    #[must_use]
    pub fn delta(&self, other: &Qos) -> Vec<PolicyId> {
        let mut out = Vec::new();
        macro_rules! diff {
            ($field:ident, $id:ident) => {
                if let (Some(a), Some(b)) = (&self.$field, &other.$field) {
                    if a != b {
                        out.push(PolicyId::$id);
                    }
                }
            };
        }
        for_each_policy!(diff);
        out
    }

    /// Validate every present policy and the pairwise constraints.
    pub fn validate(&self) -> Result<()> {
        if let Some(h) = &self.history {
            if let HistoryKind::KeepLast { depth } = h.kind {
                if depth == 0 {
                    return Err(Error::InvalidQos("history keep_last depth must be >= 1".into()));
                }
            }
        }
        if let Some(rl) = &self.resource_limits {
            validate_resource_limits(rl)?;
        }
        if let Some(r) = &self.reliability {
            if r.max_blocking_time.nanos() < 0 {
                return Err(Error::InvalidQos(
                    "reliability max_blocking_time must be >= 0".into(),
                ));
            }
        }
        if let Some(d) = &self.deadline {
            if d.period.nanos() < 0 {
                return Err(Error::InvalidQos("deadline period must be >= 0".into()));
            }
        }
        if let Some(l) = &self.latency_budget {
            if l.duration.nanos() < 0 {
                return Err(Error::InvalidQos("latency_budget must be >= 0".into()));
            }
        }
        if let Some(l) = &self.liveliness {
            if l.lease_duration.nanos() <= 0 {
                return Err(Error::InvalidQos(
                    "liveliness lease_duration must be > 0".into(),
                ));
            }
        }
        if let Some(t) = &self.time_based_filter {
            if t.minimum_separation.nanos() < 0 || t.minimum_separation.is_infinite() {
                return Err(Error::InvalidQos(
                    "time_based_filter minimum_separation must be finite and >= 0".into(),
                ));
            }
        }
        if let Some(l) = &self.lifespan {
            if l.duration.nanos() <= 0 {
                return Err(Error::InvalidQos("lifespan must be > 0".into()));
            }
        }
        if let Some(ds) = &self.durability_service {
            if ds.service_cleanup_delay.nanos() < 0 {
                return Err(Error::InvalidQos(
                    "durability_service cleanup delay must be >= 0".into(),
                ));
            }
            if let HistoryKind::KeepLast { depth: 0 } = ds.history.kind {
                return Err(Error::InvalidQos(
                    "durability_service history depth must be >= 1".into(),
                ));
            }
            validate_resource_limits(&ds.resource_limits)?;
        }

        // pairwise constraints
        if let (Some(h), Some(rl)) = (&self.history, &self.resource_limits) {
            if let HistoryKind::KeepLast { depth } = h.kind {
                if rl.max_samples_per_instance != LENGTH_UNLIMITED
                    && depth > rl.max_samples_per_instance
                {
                    return Err(Error::InvalidQos(
                        "history depth must be <= max_samples_per_instance".into(),
                    ));
                }
            }
        }
        if let (Some(t), Some(d)) = (&self.time_based_filter, &self.deadline) {
            if t.minimum_separation > d.period {
                return Err(Error::InvalidQos(
                    "time_based_filter minimum_separation must be <= deadline period".into(),
                ));
            }
        }
        Ok(())
    }

    /// Default policy table for a topic.
    #[must_use]
    pub fn default_for_topic() -> Qos {
        Qos {
            durability: Some(Durability::default()),
            history: Some(History::default()),
            resource_limits: Some(ResourceLimits::default()),
            reliability: Some(Reliability::default()),
            deadline: Some(Deadline::default()),
            latency_budget: Some(LatencyBudget::default()),
            liveliness: Some(Liveliness::default()),
            ownership: Some(Ownership::default()),
            destination_order: Some(DestinationOrder::default()),
            lifespan: Some(Lifespan::default()),
            durability_service: Some(DurabilityService::default()),
            transport_priority: Some(TransportPriority::default()),
            topic_data: Some(TopicData::default()),
            data_representation: Some(DataRepresentation::default()),
            ..Qos::default()
        }
    }

    /// Default policy table for a data writer.
    #[must_use]
    pub fn default_for_writer() -> Qos {
        Qos {
            durability: Some(Durability::default()),
            history: Some(History::default()),
            resource_limits: Some(ResourceLimits::default()),
            reliability: Some(Reliability {
                kind: ReliabilityKind::Reliable,
                max_blocking_time: DdsDuration::from_millis(100),
            }),
            deadline: Some(Deadline::default()),
            latency_budget: Some(LatencyBudget::default()),
            liveliness: Some(Liveliness::default()),
            ownership: Some(Ownership::default()),
            ownership_strength: Some(OwnershipStrength::default()),
            destination_order: Some(DestinationOrder::default()),
            lifespan: Some(Lifespan::default()),
            durability_service: Some(DurabilityService::default()),
            transport_priority: Some(TransportPriority::default()),
            user_data: Some(UserData::default()),
            writer_data_lifecycle: Some(WriterDataLifecycle::default()),
            ignore_local: Some(IgnoreLocal::default()),
            type_consistency: Some(TypeConsistency::default()),
            data_representation: Some(DataRepresentation::default()),
            ..Qos::default()
        }
    }

    /// Default policy table for a data reader.
    #[must_use]
    pub fn default_for_reader() -> Qos {
        Qos {
            durability: Some(Durability::default()),
            history: Some(History::default()),
            resource_limits: Some(ResourceLimits::default()),
            reliability: Some(Reliability::default()),
            deadline: Some(Deadline::default()),
            latency_budget: Some(LatencyBudget::default()),
            liveliness: Some(Liveliness::default()),
            ownership: Some(Ownership::default()),
            destination_order: Some(DestinationOrder::default()),
            time_based_filter: Some(TimeBasedFilter::default()),
            user_data: Some(UserData::default()),
            reader_data_lifecycle: Some(ReaderDataLifecycle::default()),
            ignore_local: Some(IgnoreLocal::default()),
            type_consistency: Some(TypeConsistency::default()),
            data_representation: Some(DataRepresentation::default()),
            ..Qos::default()
        }
    }

    /// Default policy table for a publisher or subscriber.
    #[must_use]
    pub fn default_for_pubsub() -> Qos {
        Qos {
            presentation: Some(Presentation::default()),
            partition: Some(Partition::default()),
            group_data: Some(GroupData::default()),
            ..Qos::default()
        }
    }

    /// Default policy table for a participant.
    #[must_use]
    pub fn default_for_participant() -> Qos {
        Qos {
            user_data: Some(UserData::default()),
            entity_name: Some(EntityName::default()),
            property: Some(PropertyList::default()),
            ..Qos::default()
        }
    }

    /// Default table for an entity kind.
    #[must_use]
    pub fn default_for(kind: EntityKind) -> Qos {
        match kind {
            EntityKind::Participant => Qos::default_for_participant(),
            EntityKind::Topic => Qos::default_for_topic(),
            EntityKind::Publisher | EntityKind::Subscriber => Qos::default_for_pubsub(),
            EntityKind::Writer => Qos::default_for_writer(),
            EntityKind::Reader => Qos::default_for_reader(),
        }
    }
}

fn validate_resource_limits(rl: &ResourceLimits) -> Result<()> {
    if rl.max_samples == 0 || rl.max_instances == 0 || rl.max_samples_per_instance == 0 {
        return Err(Error::InvalidQos("resource limits must be >= 1".into()));
    }
    if rl.max_samples != LENGTH_UNLIMITED
        && rl.max_samples_per_instance != LENGTH_UNLIMITED
        && rl.max_samples_per_instance > rl.max_samples
    {
        return Err(Error::InvalidQos(
            "max_samples_per_instance must be <= max_samples".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_qos_has_no_policies() {
        let q = Qos::new();
        assert!(q.present().is_empty());
        assert!(!q.is_present(PolicyId::Reliability));
    }

    #[test]
    fn test_equal_reflexive_and_copy() {
        let q = Qos::default_for_writer();
        assert!(q.eq_in_common(&q));
        let copy = q.clone();
        assert!(copy.eq_in_common(&q));
        assert_eq!(copy, q);
    }

    #[test]
    fn test_delta_self_is_empty() {
        let q = Qos::default_for_reader();
        assert!(q.delta(&q).is_empty());
    }

    #[test]
    fn test_merge_self_is_noop() {
        let q = Qos::default_for_topic();
        let mut merged = q.clone();
        merged.merge(&q);
        assert_eq!(merged, q);
    }

    #[test]
    fn test_merge_fills_only_absent() {
        let mut dst = Qos::new();
        dst.reliability = Some(Reliability {
            kind: ReliabilityKind::Reliable,
            max_blocking_time: DdsDuration::from_secs(1),
        });
        let src = Qos::default_for_reader();
        dst.merge(&src);
        // present policy kept
        assert_eq!(dst.reliability.unwrap().kind, ReliabilityKind::Reliable);
        // absent policy filled from src
        assert_eq!(dst.history, src.history);
    }

    #[test]
    fn test_equality_ignores_one_sided_policies() {
        let mut a = Qos::new();
        let mut b = Qos::new();
        a.history = Some(History::default());
        b.reliability = Some(Reliability::default());
        // no overlap: equal in common
        assert!(a.eq_in_common(&b));
        b.history = Some(History {
            kind: HistoryKind::KeepAll,
        });
        assert!(!a.eq_in_common(&b));
    }

    #[test]
    fn test_delta_reports_differing_policy() {
        let mut a = Qos::default_for_writer();
        let b = Qos::default_for_writer();
        a.transport_priority = Some(TransportPriority { value: 3 });
        let delta = a.delta(&b);
        assert_eq!(delta, vec![PolicyId::TransportPriority]);
    }

    #[test]
    fn test_validate_rejects_zero_depth() {
        let mut q = Qos::new();
        q.history = Some(History {
            kind: HistoryKind::KeepLast { depth: 0 },
        });
        assert!(q.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_resource_limits() {
        let mut q = Qos::new();
        q.resource_limits = Some(ResourceLimits {
            max_samples: 10,
            max_instances: 1,
            max_samples_per_instance: 20,
        });
        assert!(q.validate().is_err());
    }

    #[test]
    fn test_validate_depth_within_per_instance_limit() {
        let mut q = Qos::new();
        q.history = Some(History {
            kind: HistoryKind::KeepLast { depth: 50 },
        });
        q.resource_limits = Some(ResourceLimits {
            max_samples: 100,
            max_instances: 1,
            max_samples_per_instance: 10,
        });
        assert!(q.validate().is_err());
    }

    #[test]
    fn test_validate_time_based_filter_vs_deadline() {
        let mut q = Qos::new();
        q.time_based_filter = Some(TimeBasedFilter {
            minimum_separation: DdsDuration::from_secs(2),
        });
        q.deadline = Some(Deadline {
            period: DdsDuration::from_secs(1),
        });
        assert!(q.validate().is_err());
        q.deadline = Some(Deadline {
            period: DdsDuration::from_secs(5),
        });
        assert!(q.validate().is_ok());
    }

    #[test]
    fn test_default_tables_validate() {
        for kind in [
            EntityKind::Participant,
            EntityKind::Topic,
            EntityKind::Publisher,
            EntityKind::Subscriber,
            EntityKind::Writer,
            EntityKind::Reader,
        ] {
            assert!(Qos::default_for(kind).validate().is_ok(), "{kind:?}");
        }
    }

    #[test]
    fn test_writer_default_is_reliable() {
        let q = Qos::default_for_writer();
        assert_eq!(q.reliability.unwrap().kind, ReliabilityKind::Reliable);
        let q = Qos::default_for_reader();
        assert_eq!(q.reliability.unwrap().kind, ReliabilityKind::BestEffort);
    }
}

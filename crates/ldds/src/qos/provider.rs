// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ldds contributors

//! XML-backed QoS provider.
//!
//! Loads a system-definition document of the shape
//!
//! ```text
//! dds > qos_library[@name]* > qos_profile[@name]* >
//!   { domain_participant_qos | publisher_qos | subscriber_qos |
//!     topic_qos | datareader_qos | datawriter_qos }[@name]*
//! ```
//!
//! and answers `get_qos(kind, "library::profile::entity")` lookups with
//! internally-owned policy sets that live as long as the provider. An
//! optional scope key filters what gets loaded; `*` is a full-segment
//! wildcard. A scope matching nothing yields an empty provider, not an
//! error.

use std::collections::HashMap;
use std::path::Path;

use base64::Engine as _;
use roxmltree::{Document, Node};

use crate::core::time::DdsDuration;
use crate::dds::{Error, Result};
use crate::qos::policy::*;
use crate::qos::Qos;

/// Textual spelling of an infinite duration's seconds field.
pub const DURATION_INFINITY_SEC: &str = "DURATION_INFINITY_SEC";
/// Textual spelling of an infinite duration's nanoseconds field.
pub const DURATION_INFINITY_NSEC: &str = "DURATION_INFINITY_NSEC";

/// Entity-qos flavour selected at lookup time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum QosKind {
    Participant,
    Publisher,
    Subscriber,
    Topic,
    Reader,
    Writer,
}

impl QosKind {
    fn element_name(self) -> &'static str {
        match self {
            QosKind::Participant => "domain_participant_qos",
            QosKind::Publisher => "publisher_qos",
            QosKind::Subscriber => "subscriber_qos",
            QosKind::Topic => "topic_qos",
            QosKind::Reader => "datareader_qos",
            QosKind::Writer => "datawriter_qos",
        }
    }

    fn from_element(name: &str) -> Option<QosKind> {
        match name {
            "domain_participant_qos" => Some(QosKind::Participant),
            "publisher_qos" => Some(QosKind::Publisher),
            "subscriber_qos" => Some(QosKind::Subscriber),
            "topic_qos" => Some(QosKind::Topic),
            "datareader_qos" => Some(QosKind::Reader),
            "datawriter_qos" => Some(QosKind::Writer),
            _ => None,
        }
    }
}

/// Compiled scope pattern: up to three segments, `*` matches any value.
struct Scope {
    library: String,
    profile: String,
    entity: String,
}

impl Scope {
    fn parse(key: Option<&str>) -> Scope {
        let mut parts = key.unwrap_or("*").split("::");
        let library = parts.next().filter(|s| !s.is_empty()).unwrap_or("*");
        let profile = parts.next().filter(|s| !s.is_empty()).unwrap_or("*");
        let entity = parts.next().filter(|s| !s.is_empty()).unwrap_or("*");
        Scope {
            library: library.to_string(),
            profile: profile.to_string(),
            entity: entity.to_string(),
        }
    }

    fn seg_matches(pattern: &str, value: &str) -> bool {
        pattern == "*" || pattern == value
    }

    fn matches(&self, library: &str, profile: &str, entity: &str) -> bool {
        Scope::seg_matches(&self.library, library)
            && Scope::seg_matches(&self.profile, profile)
            && Scope::seg_matches(&self.entity, entity)
    }
}

/// Immutable library/profile/entity → policy-set lookup.
///
/// Construction parses and validates eagerly; afterwards concurrent reads
/// are safe without locking.
pub struct QosProvider {
    entries: HashMap<(QosKind, String), Qos>,
}

impl QosProvider {
    /// Load from document text.
    pub fn from_str(doc: &str) -> Result<QosProvider> {
        Self::load(doc, None)
    }

    /// Load from document text, keeping only entries matching `scope`
    /// (`library::profile::entity`, `*` wildcards allowed per segment).
    pub fn from_str_scoped(doc: &str, scope: &str) -> Result<QosProvider> {
        Self::load(doc, Some(scope))
    }

    /// Load from a file path.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<QosProvider> {
        let text = std::fs::read_to_string(path).map_err(Error::IoError)?;
        Self::load(&text, None)
    }

    /// Load from a file path with a scope key.
    pub fn from_file_scoped<P: AsRef<Path>>(path: P, scope: &str) -> Result<QosProvider> {
        let text = std::fs::read_to_string(path).map_err(Error::IoError)?;
        Self::load(&text, Some(scope))
    }

    /// Number of stored policy sets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over the stored `(kind, full name)` pairs.
    pub fn names(&self) -> impl Iterator<Item = (QosKind, &str)> {
        self.entries.iter().map(|((k, name), _)| (*k, name.as_str()))
    }

    /// Look up the policy set for `kind` under the concrete key
    /// `library::profile` (anonymous entity) or `library::profile::entity`.
    /// Wildcards are not allowed here.
    pub fn get_qos(&self, kind: QosKind, key: &str) -> Result<&Qos> {
        if key.contains('*') {
            return Err(Error::BadParameter(
                "get_qos requires a concrete key, not a pattern".into(),
            ));
        }
        self.entries
            .get(&(kind, key.to_string()))
            .ok_or_else(|| Error::BadParameter(format!("no {kind:?} qos under '{key}'")))
    }

    fn load(text: &str, scope: Option<&str>) -> Result<QosProvider> {
        let doc = Document::parse(text)
            .map_err(|e| Error::BadParameter(format!("system definition is not valid XML: {e}")))?;
        let root = doc.root_element();
        if root.tag_name().name() != "dds" {
            return Err(Error::BadParameter(format!(
                "system definition root must be <dds>, found <{}>",
                root.tag_name().name()
            )));
        }
        let scope = Scope::parse(scope);
        let mut entries = HashMap::new();

        let mut lib_names: Vec<String> = Vec::new();
        for lib in root.children().filter(|n| n.is_element()) {
            if lib.tag_name().name() != "qos_library" {
                continue;
            }
            let lib_name = lib.attribute("name").unwrap_or("").to_string();
            if lib_names.contains(&lib_name) {
                return Err(Error::BadParameter(if lib_name.is_empty() {
                    "more than one anonymous qos_library".into()
                } else {
                    format!("duplicate qos_library '{lib_name}'")
                }));
            }
            lib_names.push(lib_name.clone());

            let mut profile_names: Vec<String> = Vec::new();
            for profile in lib.children().filter(|n| n.is_element()) {
                if profile.tag_name().name() != "qos_profile" {
                    continue;
                }
                let profile_name = profile.attribute("name").unwrap_or("").to_string();
                if profile_names.contains(&profile_name) {
                    return Err(Error::BadParameter(if profile_name.is_empty() {
                        format!("more than one anonymous qos_profile in '{lib_name}'")
                    } else {
                        format!("duplicate qos_profile '{lib_name}::{profile_name}'")
                    }));
                }
                profile_names.push(profile_name.clone());

                let mut entity_names: Vec<(QosKind, String)> = Vec::new();
                for entity in profile.children().filter(|n| n.is_element()) {
                    let Some(kind) = QosKind::from_element(entity.tag_name().name()) else {
                        continue;
                    };
                    let entity_name = entity.attribute("name").unwrap_or("").to_string();
                    let id = (kind, entity_name.clone());
                    if entity_names.contains(&id) {
                        return Err(Error::BadParameter(format!(
                            "duplicate {} '{}' in '{}::{}'",
                            entity.tag_name().name(),
                            entity_name,
                            lib_name,
                            profile_name
                        )));
                    }
                    entity_names.push(id);

                    if !scope.matches(&lib_name, &profile_name, &entity_name) {
                        continue;
                    }

                    let qos = parse_entity_qos(&entity)?;
                    let full_name = if entity_name.is_empty() {
                        format!("{lib_name}::{profile_name}")
                    } else {
                        format!("{lib_name}::{profile_name}::{entity_name}")
                    };
                    entries.insert((kind, full_name), qos);
                }
            }
        }
        Ok(QosProvider { entries })
    }
}

fn child<'a, 'input>(node: &Node<'a, 'input>, name: &str) -> Option<Node<'a, 'input>> {
    node.children()
        .find(|n| n.is_element() && n.tag_name().name() == name)
}

fn child_text<'a>(node: &Node<'a, '_>, name: &str) -> Option<&'a str> {
    child(node, name).and_then(|n| n.text()).map(str::trim)
}

fn parse_i64(text: &str, what: &str) -> Result<i64> {
    text.trim()
        .parse()
        .map_err(|_| Error::BadParameter(format!("{what}: expected an integer, got '{text}'")))
}

fn parse_bool(text: &str, what: &str) -> Result<bool> {
    match text.trim() {
        "true" | "TRUE" | "1" => Ok(true),
        "false" | "FALSE" | "0" => Ok(false),
        other => Err(Error::BadParameter(format!(
            "{what}: expected true/false, got '{other}'"
        ))),
    }
}

fn parse_limit(text: &str, what: &str) -> Result<u32> {
    let t = text.trim();
    if t == "LENGTH_UNLIMITED" || t == "-1" {
        return Ok(LENGTH_UNLIMITED);
    }
    let v = parse_i64(t, what)?;
    if v < 1 || v > i64::from(i32::MAX) {
        return Err(Error::BadParameter(format!("{what}: out of range '{t}'")));
    }
    Ok(v as u32)
}

/// Parse a `<sec>/<nanosec>` duration element; either child may be the
/// textual infinity constant.
fn parse_duration(node: &Node<'_, '_>, what: &str) -> Result<DdsDuration> {
    let sec = child_text(node, "sec");
    let nsec = child_text(node, "nanosec");
    if sec == Some(DURATION_INFINITY_SEC) || nsec == Some(DURATION_INFINITY_NSEC) {
        return Ok(DdsDuration::INFINITY);
    }
    let sec = match sec {
        Some(t) => parse_i64(t, what)?,
        None => 0,
    };
    let nanos = match nsec {
        Some(t) => {
            let v = parse_i64(t, what)?;
            if !(0..1_000_000_000).contains(&v) {
                return Err(Error::BadParameter(format!(
                    "{what}: nanosec out of range '{v}'"
                )));
            }
            v as u32
        }
        None => 0,
    };
    Ok(DdsDuration::from_sec_nanos(sec, nanos))
}

fn parse_duration_child(node: &Node<'_, '_>, name: &str, what: &str) -> Result<DdsDuration> {
    match child(node, name) {
        Some(n) => parse_duration(&n, what),
        None => Err(Error::BadParameter(format!("{what}: missing <{name}>"))),
    }
}

fn parse_base64(node: &Node<'_, '_>, what: &str) -> Result<Vec<u8>> {
    let Some(text) = child_text(node, "value") else {
        return Ok(Vec::new());
    };
    base64::engine::general_purpose::STANDARD
        .decode(text)
        .map_err(|e| Error::BadParameter(format!("{what}: invalid base64 value: {e}")))
}

fn parse_history_kind(text: &str) -> Result<HistoryKind> {
    match text {
        "KEEP_LAST_HISTORY_QOS" => Ok(HistoryKind::KeepLast { depth: 1 }),
        "KEEP_ALL_HISTORY_QOS" => Ok(HistoryKind::KeepAll),
        other => Err(Error::BadParameter(format!(
            "unknown history kind '{other}'"
        ))),
    }
}

fn parse_entity_qos(entity: &Node<'_, '_>) -> Result<Qos> {
    let mut qos = Qos::new();

    for policy in entity.children().filter(|n| n.is_element()) {
        let name = policy.tag_name().name();
        match name {
            "durability" => {
                let kind = match child_text(&policy, "kind").unwrap_or_default() {
                    "VOLATILE_DURABILITY_QOS" => DurabilityKind::Volatile,
                    "TRANSIENT_LOCAL_DURABILITY_QOS" => DurabilityKind::TransientLocal,
                    "TRANSIENT_DURABILITY_QOS" => DurabilityKind::Transient,
                    "PERSISTENT_DURABILITY_QOS" => DurabilityKind::Persistent,
                    other => {
                        return Err(Error::BadParameter(format!(
                            "unknown durability kind '{other}'"
                        )))
                    }
                };
                qos.durability = Some(Durability { kind });
            }
            "history" => {
                let mut kind =
                    parse_history_kind(child_text(&policy, "kind").unwrap_or("KEEP_LAST_HISTORY_QOS"))?;
                if let HistoryKind::KeepLast { ref mut depth } = kind {
                    if let Some(d) = child_text(&policy, "depth") {
                        let v = parse_i64(d, "history depth")?;
                        if v < 1 || v > i64::from(i32::MAX) {
                            return Err(Error::BadParameter(format!(
                                "history depth out of range '{v}'"
                            )));
                        }
                        *depth = v as u32;
                    }
                }
                qos.history = Some(History { kind });
            }
            "resource_limits" => {
                let mut rl = ResourceLimits::default();
                if let Some(t) = child_text(&policy, "max_samples") {
                    rl.max_samples = parse_limit(t, "max_samples")?;
                }
                if let Some(t) = child_text(&policy, "max_instances") {
                    rl.max_instances = parse_limit(t, "max_instances")?;
                }
                if let Some(t) = child_text(&policy, "max_samples_per_instance") {
                    rl.max_samples_per_instance = parse_limit(t, "max_samples_per_instance")?;
                }
                qos.resource_limits = Some(rl);
            }
            "reliability" => {
                let kind = match child_text(&policy, "kind").unwrap_or("BEST_EFFORT_RELIABILITY_QOS")
                {
                    "BEST_EFFORT_RELIABILITY_QOS" => ReliabilityKind::BestEffort,
                    "RELIABLE_RELIABILITY_QOS" => ReliabilityKind::Reliable,
                    other => {
                        return Err(Error::BadParameter(format!(
                            "unknown reliability kind '{other}'"
                        )))
                    }
                };
                let max_blocking_time = match child(&policy, "max_blocking_time") {
                    Some(n) => parse_duration(&n, "reliability max_blocking_time")?,
                    None => Reliability::default().max_blocking_time,
                };
                qos.reliability = Some(Reliability {
                    kind,
                    max_blocking_time,
                });
            }
            "deadline" => {
                qos.deadline = Some(Deadline {
                    period: parse_duration_child(&policy, "period", "deadline")?,
                });
            }
            "latency_budget" => {
                qos.latency_budget = Some(LatencyBudget {
                    duration: parse_duration_child(&policy, "duration", "latency_budget")?,
                });
            }
            "liveliness" => {
                let kind = match child_text(&policy, "kind").unwrap_or("AUTOMATIC_LIVELINESS_QOS") {
                    "AUTOMATIC_LIVELINESS_QOS" => LivelinessKind::Automatic,
                    "MANUAL_BY_PARTICIPANT_LIVELINESS_QOS" => LivelinessKind::ManualByParticipant,
                    "MANUAL_BY_TOPIC_LIVELINESS_QOS" => LivelinessKind::ManualByTopic,
                    other => {
                        return Err(Error::BadParameter(format!(
                            "unknown liveliness kind '{other}'"
                        )))
                    }
                };
                let lease_duration = match child(&policy, "lease_duration") {
                    Some(n) => parse_duration(&n, "liveliness lease_duration")?,
                    None => DdsDuration::INFINITY,
                };
                qos.liveliness = Some(Liveliness {
                    kind,
                    lease_duration,
                });
            }
            "ownership" => {
                let kind = match child_text(&policy, "kind").unwrap_or("SHARED_OWNERSHIP_QOS") {
                    "SHARED_OWNERSHIP_QOS" => OwnershipKind::Shared,
                    "EXCLUSIVE_OWNERSHIP_QOS" => OwnershipKind::Exclusive,
                    other => {
                        return Err(Error::BadParameter(format!(
                            "unknown ownership kind '{other}'"
                        )))
                    }
                };
                qos.ownership = Some(Ownership { kind });
            }
            "ownership_strength" => {
                let v = parse_i64(
                    child_text(&policy, "value").unwrap_or("0"),
                    "ownership_strength",
                )?;
                qos.ownership_strength = Some(OwnershipStrength { value: v as i32 });
            }
            "destination_order" => {
                let kind = match child_text(&policy, "kind")
                    .unwrap_or("BY_RECEPTION_TIMESTAMP_DESTINATIONORDER_QOS")
                {
                    "BY_RECEPTION_TIMESTAMP_DESTINATIONORDER_QOS" => {
                        DestinationOrderKind::ByReceptionTimestamp
                    }
                    "BY_SOURCE_TIMESTAMP_DESTINATIONORDER_QOS" => {
                        DestinationOrderKind::BySourceTimestamp
                    }
                    other => {
                        return Err(Error::BadParameter(format!(
                            "unknown destination_order kind '{other}'"
                        )))
                    }
                };
                qos.destination_order = Some(DestinationOrder { kind });
            }
            "presentation" => {
                let access_scope = match child_text(&policy, "access_scope")
                    .unwrap_or("INSTANCE_PRESENTATION_QOS")
                {
                    "INSTANCE_PRESENTATION_QOS" => PresentationAccessScope::Instance,
                    "TOPIC_PRESENTATION_QOS" => PresentationAccessScope::Topic,
                    "GROUP_PRESENTATION_QOS" => PresentationAccessScope::Group,
                    other => {
                        return Err(Error::BadParameter(format!(
                            "unknown presentation access_scope '{other}'"
                        )))
                    }
                };
                let coherent_access = match child_text(&policy, "coherent_access") {
                    Some(t) => parse_bool(t, "presentation coherent_access")?,
                    None => false,
                };
                let ordered_access = match child_text(&policy, "ordered_access") {
                    Some(t) => parse_bool(t, "presentation ordered_access")?,
                    None => false,
                };
                qos.presentation = Some(Presentation {
                    access_scope,
                    coherent_access,
                    ordered_access,
                });
            }
            "partition" => {
                let mut names = Vec::new();
                if let Some(name_node) = child(&policy, "name") {
                    for el in name_node
                        .children()
                        .filter(|n| n.is_element() && n.tag_name().name() == "element")
                    {
                        names.push(el.text().unwrap_or("").trim().to_string());
                    }
                }
                qos.partition = Some(Partition { names });
            }
            "time_based_filter" => {
                qos.time_based_filter = Some(TimeBasedFilter {
                    minimum_separation: parse_duration_child(
                        &policy,
                        "minimum_separation",
                        "time_based_filter",
                    )?,
                });
            }
            "lifespan" => {
                qos.lifespan = Some(Lifespan {
                    duration: parse_duration_child(&policy, "duration", "lifespan")?,
                });
            }
            "durability_service" => {
                let mut ds = DurabilityService::default();
                if let Some(n) = child(&policy, "service_cleanup_delay") {
                    ds.service_cleanup_delay =
                        parse_duration(&n, "durability_service cleanup delay")?;
                }
                if let Some(t) = child_text(&policy, "history_kind") {
                    ds.history.kind = parse_history_kind(t)?;
                }
                if let Some(t) = child_text(&policy, "history_depth") {
                    let v = parse_i64(t, "durability_service history_depth")?;
                    if let HistoryKind::KeepLast { ref mut depth } = ds.history.kind {
                        *depth = v.max(1) as u32;
                    }
                }
                if let Some(t) = child_text(&policy, "max_samples") {
                    ds.resource_limits.max_samples = parse_limit(t, "max_samples")?;
                }
                if let Some(t) = child_text(&policy, "max_instances") {
                    ds.resource_limits.max_instances = parse_limit(t, "max_instances")?;
                }
                if let Some(t) = child_text(&policy, "max_samples_per_instance") {
                    ds.resource_limits.max_samples_per_instance =
                        parse_limit(t, "max_samples_per_instance")?;
                }
                qos.durability_service = Some(ds);
            }
            "transport_priority" => {
                let v = parse_i64(
                    child_text(&policy, "value").unwrap_or("0"),
                    "transport_priority",
                )?;
                qos.transport_priority = Some(TransportPriority { value: v as i32 });
            }
            "user_data" => {
                qos.user_data = Some(UserData {
                    value: parse_base64(&policy, "user_data")?,
                });
            }
            "topic_data" => {
                qos.topic_data = Some(TopicData {
                    value: parse_base64(&policy, "topic_data")?,
                });
            }
            "group_data" => {
                qos.group_data = Some(GroupData {
                    value: parse_base64(&policy, "group_data")?,
                });
            }
            "writer_data_lifecycle" => {
                let v = match child_text(&policy, "autodispose_unregistered_instances") {
                    Some(t) => parse_bool(t, "writer_data_lifecycle")?,
                    None => true,
                };
                qos.writer_data_lifecycle = Some(WriterDataLifecycle {
                    autodispose_unregistered_instances: v,
                });
            }
            "reader_data_lifecycle" => {
                let mut rdl = ReaderDataLifecycle::default();
                if let Some(n) = child(&policy, "autopurge_nowriter_samples_delay") {
                    rdl.autopurge_nowriter_samples_delay =
                        parse_duration(&n, "reader_data_lifecycle")?;
                }
                if let Some(n) = child(&policy, "autopurge_disposed_samples_delay") {
                    rdl.autopurge_disposed_samples_delay =
                        parse_duration(&n, "reader_data_lifecycle")?;
                }
                qos.reader_data_lifecycle = Some(rdl);
            }
            "entity_name" => {
                qos.entity_name = Some(EntityName {
                    name: child_text(&policy, "name").unwrap_or("").to_string(),
                });
            }
            // tolerated but not part of the policy model (entity_factory
            // and vendor extensions)
            _ => {
                log::debug!("[qos-provider] ignoring element <{name}>");
            }
        }
    }
    qos.validate()?;
    Ok(qos)
}

// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ldds contributors

//! Runtime and participants.
//!
//! The [`Runtime`] owns all process-wide state: the domain registry, the
//! garbage-collect thread, and the timed-event scheduler. There are no
//! globals; dropping the runtime tears everything down. A
//! [`Participant`] is the root of one DDS node in one domain and owns its
//! topics and endpoints; deleting it cascades to the children and wakes
//! anything blocked on them.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::instance::InstanceHandleTable;
use super::reader::{DataReader, ReaderInner};
use super::topic::{Topic, TypeDescriptor};
use super::writer::{DataWriter, WriterInner};
use super::{Error, Result};
use crate::core::guid::{EntityId, Guid, GuidPrefix};
use crate::core::rt::{GcThread, TimedEvents};
use crate::qos::{EntityKind, Qos};

/// Shared state of one domain: instance handles and the reader registry
/// used for matching.
pub(crate) struct DomainState {
    pub handles: Arc<InstanceHandleTable>,
    pub readers: Arc<Mutex<Vec<Weak<ReaderInner>>>>,
}

impl DomainState {
    fn new() -> DomainState {
        DomainState {
            handles: Arc::new(InstanceHandleTable::new()),
            readers: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

struct RuntimeInner {
    domains: Mutex<HashMap<u32, Arc<DomainState>>>,
    gc: GcThread,
    #[allow(dead_code)]
    timed_events: TimedEvents,
    prefix_seed: AtomicU32,
}

/// Owner of all process-wide middleware state.
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

impl Runtime {
    /// Start the runtime threads.
    pub fn new() -> Result<Runtime> {
        Ok(Runtime {
            inner: Arc::new(RuntimeInner {
                domains: Mutex::new(HashMap::new()),
                gc: GcThread::new()?,
                timed_events: TimedEvents::new()?,
                prefix_seed: AtomicU32::new(1),
            }),
        })
    }

    /// Create a participant in `domain_id`.
    pub fn create_participant(&self, domain_id: u32, qos: Option<Qos>) -> Result<Participant> {
        if domain_id > 232 {
            return Err(Error::BadParameter(format!(
                "domain id {domain_id} out of range (0-232)"
            )));
        }
        let mut qos = qos.unwrap_or_default();
        qos.merge(&Qos::default_for(EntityKind::Participant));
        qos.validate()?;

        let domain = {
            let mut domains = self.inner.domains.lock();
            Arc::clone(
                domains
                    .entry(domain_id)
                    .or_insert_with(|| Arc::new(DomainState::new())),
            )
        };

        let n = self.inner.prefix_seed.fetch_add(1, Ordering::Relaxed);
        let mut prefix: GuidPrefix = [0; 12];
        prefix[..4].copy_from_slice(&domain_id.to_be_bytes());
        prefix[4..8].copy_from_slice(&n.to_be_bytes());
        prefix[8..].copy_from_slice(&std::process::id().to_be_bytes()[..4]);

        Ok(Participant {
            inner: Arc::new(ParticipantInner {
                runtime: Arc::downgrade(&self.inner),
                domain,
                domain_id,
                guid_prefix: prefix,
                qos,
                deleted: AtomicBool::new(false),
                entity_seed: AtomicU32::new(1),
                topics: Mutex::new(HashMap::new()),
                readers: Mutex::new(Vec::new()),
                writers: Mutex::new(Vec::new()),
            }),
        })
    }
}

struct ParticipantInner {
    runtime: Weak<RuntimeInner>,
    domain: Arc<DomainState>,
    domain_id: u32,
    guid_prefix: GuidPrefix,
    qos: Qos,
    deleted: AtomicBool,
    entity_seed: AtomicU32,
    topics: Mutex<HashMap<String, Topic>>,
    readers: Mutex<Vec<Arc<ReaderInner>>>,
    writers: Mutex<Vec<Arc<WriterInner>>>,
}

/// Root of a local DDS node in one domain.
#[derive(Clone)]
pub struct Participant {
    inner: Arc<ParticipantInner>,
}

impl Participant {
    #[must_use]
    pub fn domain_id(&self) -> u32 {
        self.inner.domain_id
    }

    #[must_use]
    pub fn guid_prefix(&self) -> GuidPrefix {
        self.inner.guid_prefix
    }

    #[must_use]
    pub fn qos(&self) -> &Qos {
        &self.inner.qos
    }

    fn check_alive(&self) -> Result<()> {
        if self.inner.deleted.load(Ordering::Acquire) {
            Err(Error::AlreadyDeleted("participant".into()))
        } else {
            Ok(())
        }
    }

    /// Create (or find, if identical) a topic.
    pub fn create_topic(
        &self,
        name: &str,
        type_desc: TypeDescriptor,
        qos: Option<Qos>,
    ) -> Result<Topic> {
        self.check_alive()?;
        if name.is_empty() {
            return Err(Error::BadParameter("topic name must not be empty".into()));
        }
        let mut qos = qos.unwrap_or_default();
        qos.merge(&Qos::default_for(EntityKind::Topic));
        qos.validate()?;

        let mut topics = self.inner.topics.lock();
        if let Some(existing) = topics.get(name) {
            if existing.type_descriptor() != &type_desc {
                return Err(Error::PreconditionNotMet(format!(
                    "topic '{name}' exists with a different type"
                )));
            }
            return Ok(existing.clone());
        }
        let topic = Topic::new(name, type_desc, qos, self.inner.guid_prefix);
        topics.insert(name.to_string(), topic.clone());
        Ok(topic)
    }

    fn check_owns(&self, topic: &Topic) -> Result<()> {
        if topic.inner.owner != self.inner.guid_prefix {
            return Err(Error::IllegalOperation(format!(
                "topic '{}' belongs to another participant",
                topic.name()
            )));
        }
        Ok(())
    }

    /// Create a publisher grouping entity.
    pub fn create_publisher(&self, qos: Option<Qos>) -> Result<Publisher> {
        self.check_alive()?;
        let mut qos = qos.unwrap_or_default();
        qos.merge(&Qos::default_for(EntityKind::Publisher));
        qos.validate()?;
        Ok(Publisher {
            participant: self.clone(),
            qos,
        })
    }

    /// Create a subscriber grouping entity.
    pub fn create_subscriber(&self, qos: Option<Qos>) -> Result<Subscriber> {
        self.check_alive()?;
        let mut qos = qos.unwrap_or_default();
        qos.merge(&Qos::default_for(EntityKind::Subscriber));
        qos.validate()?;
        Ok(Subscriber {
            participant: self.clone(),
            qos,
        })
    }

    /// Create a writer directly under the participant.
    pub fn create_writer(&self, topic: &Topic, qos: Option<Qos>) -> Result<DataWriter> {
        self.create_writer_in(topic, qos, &[])
    }

    /// Create a reader directly under the participant.
    pub fn create_reader(&self, topic: &Topic, qos: Option<Qos>) -> Result<DataReader> {
        self.create_reader_in(topic, qos, &[])
    }

    fn create_writer_in(
        &self,
        topic: &Topic,
        qos: Option<Qos>,
        partitions: &[String],
    ) -> Result<DataWriter> {
        self.check_alive()?;
        self.check_owns(topic)?;
        let mut qos = qos.unwrap_or_default();
        qos.merge(topic.qos());
        qos.merge(&Qos::default_for(EntityKind::Writer));
        qos.validate()?;

        let n = self.inner.entity_seed.fetch_add(1, Ordering::Relaxed);
        let guid = Guid::new(self.inner.guid_prefix, EntityId::user_writer(n));
        let td = topic.type_descriptor();
        let inner = Arc::new(WriterInner::new(
            guid,
            topic.name(),
            &td.type_name,
            &td.key_class,
            td.bounded_key,
            qos,
            partitions.to_vec(),
            Arc::clone(&self.inner.domain.handles),
            Arc::clone(&self.inner.domain.readers),
        ));
        self.inner.writers.lock().push(Arc::clone(&inner));
        Ok(DataWriter { inner })
    }

    fn create_reader_in(
        &self,
        topic: &Topic,
        qos: Option<Qos>,
        partitions: &[String],
    ) -> Result<DataReader> {
        self.check_alive()?;
        self.check_owns(topic)?;
        let mut qos = qos.unwrap_or_default();
        qos.merge(topic.qos());
        qos.merge(&Qos::default_for(EntityKind::Reader));
        qos.validate()?;

        let n = self.inner.entity_seed.fetch_add(1, Ordering::Relaxed);
        let guid = Guid::new(self.inner.guid_prefix, EntityId::user_reader(n));
        let td = topic.type_descriptor();
        let key_class = if td.key_class.is_empty() {
            &td.type_name
        } else {
            &td.key_class
        };
        let inner = Arc::new(ReaderInner::new(
            guid,
            topic.name(),
            &td.type_name,
            key_class,
            qos,
            partitions.to_vec(),
        ));
        self.inner.readers.lock().push(Arc::clone(&inner));
        self.inner
            .domain
            .readers
            .lock()
            .push(Arc::downgrade(&inner));
        Ok(DataReader { inner })
    }

    /// Delete the participant: children become unusable, blocked calls
    /// wake with `AlreadyDeleted`, storage is reclaimed on the gc thread.
    pub fn delete(&self) {
        if self.inner.deleted.swap(true, Ordering::AcqRel) {
            return;
        }
        for w in self.inner.writers.lock().iter() {
            w.deleted.store(true, Ordering::Release);
        }
        let readers: Vec<Arc<ReaderInner>> = self.inner.readers.lock().drain(..).collect();
        for r in &readers {
            r.deleted.store(true, Ordering::Release);
            // wake any waitset blocked on this reader
            r.status
                .set_active(super::condition::StatusMask::ALL);
        }
        // registry entries for these readers die with the Arcs below
        if let Some(rt) = self.inner.runtime.upgrade() {
            rt.gc.defer(move || drop(readers));
        }
        log::debug!(
            "[participant] domain {} prefix {:?} deleted",
            self.inner.domain_id,
            self.inner.guid_prefix
        );
    }
}

/// Publisher: groups writers and carries partition/presentation QoS.
pub struct Publisher {
    participant: Participant,
    qos: Qos,
}

impl Publisher {
    pub fn create_writer(&self, topic: &Topic, qos: Option<Qos>) -> Result<DataWriter> {
        let partitions = self
            .qos
            .partition
            .as_ref()
            .map(|p| p.names.clone())
            .unwrap_or_default();
        self.participant.create_writer_in(topic, qos, &partitions)
    }

    #[must_use]
    pub fn qos(&self) -> &Qos {
        &self.qos
    }
}

/// Subscriber: groups readers and carries partition/presentation QoS.
pub struct Subscriber {
    participant: Participant,
    qos: Qos,
}

impl Subscriber {
    pub fn create_reader(&self, topic: &Topic, qos: Option<Qos>) -> Result<DataReader> {
        let partitions = self
            .qos
            .partition
            .as_ref()
            .map(|p| p.names.clone())
            .unwrap_or_default();
        self.participant.create_reader_in(topic, qos, &partitions)
    }

    #[must_use]
    pub fn qos(&self) -> &Qos {
        &self.qos
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::time::{DdsDuration, Deadline};
    use crate::dds::condition::StatusMask;
    use crate::dds::WaitSet;
    use crate::qos::{Partition, Reliability, ReliabilityKind};

    fn runtime() -> Runtime {
        Runtime::new().unwrap()
    }

    fn keyed_topic(p: &Participant, name: &str) -> Topic {
        p.create_topic(name, TypeDescriptor::keyed("TypeA", "KeyA"), None)
            .unwrap()
    }

    #[test]
    fn test_create_participant_and_topic() {
        let rt = runtime();
        let p = rt.create_participant(0, None).unwrap();
        assert_eq!(p.domain_id(), 0);
        let t = keyed_topic(&p, "t");
        assert_eq!(t.name(), "t");
        // same name same type: found
        assert!(p
            .create_topic("t", TypeDescriptor::keyed("TypeA", "KeyA"), None)
            .is_ok());
        // same name different type: refused
        assert!(p
            .create_topic("t", TypeDescriptor::unkeyed("Other"), None)
            .is_err());
    }

    #[test]
    fn test_bad_domain_id() {
        let rt = runtime();
        assert!(rt.create_participant(233, None).is_err());
    }

    #[test]
    fn test_foreign_topic_is_illegal() {
        let rt = runtime();
        let p1 = rt.create_participant(0, None).unwrap();
        let p2 = rt.create_participant(0, None).unwrap();
        let t = keyed_topic(&p1, "t");
        assert!(matches!(
            p2.create_writer(&t, None),
            Err(Error::IllegalOperation(_))
        ));
        assert!(matches!(
            p2.create_reader(&t, None),
            Err(Error::IllegalOperation(_))
        ));
    }

    #[test]
    fn test_write_read_roundtrip() {
        let rt = runtime();
        let p = rt.create_participant(1, None).unwrap();
        let t = keyed_topic(&p, "sensor");
        let reader = p.create_reader(&t, None).unwrap();
        let writer = p.create_writer(&t, None).unwrap();

        let h = writer.write(b"k1", b"hello").unwrap();
        assert!(!h.is_nil());
        let samples = reader.take(10).unwrap();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].data, b"hello");
        assert_eq!(samples[0].instance_handle, h);
        assert_eq!(samples[0].seq, 1);
        assert!(samples[0].valid);
    }

    #[test]
    fn test_instance_handle_reuse_across_topics() {
        // two topics of the same key type: reading on one yields a handle
        // that take_instance on the other resolves
        let rt = runtime();
        let p = rt.create_participant(1, None).unwrap();
        let t1 = keyed_topic(&p, "t1");
        let t2 = keyed_topic(&p, "t2");
        let r1 = p.create_reader(&t1, None).unwrap();
        let r2 = p.create_reader(&t2, None).unwrap();
        let w1 = p.create_writer(&t1, None).unwrap();
        let w2 = p.create_writer(&t2, None).unwrap();

        w1.write(&[1], &[1, 1]).unwrap(); // k=1, v=1 on t1
        w2.write(&[1], &[1, 2]).unwrap(); // k=1, v=2 on t2

        let h = r1.take(1).unwrap()[0].instance_handle;
        let from_t2 = r2.take_instance(h, 10).unwrap();
        assert_eq!(from_t2.len(), 1);
        assert_eq!(from_t2[0].data, vec![1, 2]);
    }

    #[test]
    fn test_incompatible_qos_not_delivered() {
        let rt = runtime();
        let p = rt.create_participant(1, None).unwrap();
        let t = keyed_topic(&p, "t");
        let mut reader_qos = Qos::new();
        reader_qos.reliability = Some(Reliability {
            kind: ReliabilityKind::Reliable,
            max_blocking_time: DdsDuration::from_millis(100),
        });
        let reader = p.create_reader(&t, Some(reader_qos)).unwrap();
        let mut writer_qos = Qos::new();
        writer_qos.reliability = Some(Reliability {
            kind: ReliabilityKind::BestEffort,
            max_blocking_time: DdsDuration::ZERO,
        });
        let writer = p.create_writer(&t, Some(writer_qos)).unwrap();

        writer.write(b"k", b"dropped").unwrap();
        assert!(reader.take(10).unwrap().is_empty());
    }

    #[test]
    fn test_partition_scoping() {
        let rt = runtime();
        let p = rt.create_participant(1, None).unwrap();
        let t = keyed_topic(&p, "t");

        let mut pub_qos = Qos::new();
        pub_qos.partition = Some(Partition {
            names: vec!["sensors".into()],
        });
        let publisher = p.create_publisher(Some(pub_qos)).unwrap();
        let writer = publisher.create_writer(&t, None).unwrap();

        let mut sub_qos = Qos::new();
        sub_qos.partition = Some(Partition {
            names: vec!["sensors".into(), "extra".into()],
        });
        let subscriber = p.create_subscriber(Some(sub_qos)).unwrap();
        let matching = subscriber.create_reader(&t, None).unwrap();
        let default_part = p.create_reader(&t, None).unwrap();

        writer.write(b"k", b"scoped").unwrap();
        assert_eq!(matching.take(10).unwrap().len(), 1);
        assert!(default_part.take(10).unwrap().is_empty());
    }

    #[test]
    fn test_keep_last_depth_per_instance() {
        let rt = runtime();
        let p = rt.create_participant(1, None).unwrap();
        let t = keyed_topic(&p, "t");
        let mut qos = Qos::new();
        qos.history = Some(crate::qos::History {
            kind: crate::qos::HistoryKind::KeepLast { depth: 2 },
        });
        let reader = p.create_reader(&t, Some(qos)).unwrap();
        let writer = p.create_writer(&t, None).unwrap();

        for v in 0..5u8 {
            writer.write(b"k", &[v]).unwrap();
        }
        writer.write(b"other", &[99]).unwrap();
        let samples = reader.take(10).unwrap();
        // instance "k" keeps its last two, "other" keeps its one
        let k_vals: Vec<u8> = samples
            .iter()
            .filter(|s| s.key == b"k")
            .map(|s| s.data[0])
            .collect();
        assert_eq!(k_vals, vec![3, 4]);
        assert_eq!(samples.iter().filter(|s| s.key == b"other").count(), 1);
    }

    #[test]
    fn test_cross_participant_delivery() {
        let rt = runtime();
        let p1 = rt.create_participant(2, None).unwrap();
        let p2 = rt.create_participant(2, None).unwrap();
        let t1 = keyed_topic(&p1, "shared");
        let t2 = keyed_topic(&p2, "shared");
        let reader = p2.create_reader(&t2, None).unwrap();
        let writer = p1.create_writer(&t1, None).unwrap();
        writer.write(b"k", b"cross").unwrap();
        assert_eq!(reader.take(10).unwrap().len(), 1);
    }

    #[test]
    fn test_different_domains_isolated() {
        let rt = runtime();
        let p1 = rt.create_participant(3, None).unwrap();
        let p2 = rt.create_participant(4, None).unwrap();
        let t1 = keyed_topic(&p1, "shared");
        let t2 = keyed_topic(&p2, "shared");
        let reader = p2.create_reader(&t2, None).unwrap();
        let writer = p1.create_writer(&t1, None).unwrap();
        writer.write(b"k", b"never").unwrap();
        assert!(reader.take(10).unwrap().is_empty());
    }

    #[test]
    fn test_delete_cascades_and_unblocks() {
        let rt = runtime();
        let p = rt.create_participant(1, None).unwrap();
        let t = keyed_topic(&p, "t");
        let reader = p.create_reader(&t, None).unwrap();
        let writer = p.create_writer(&t, None).unwrap();

        let r2 = reader.clone();
        let blocker = std::thread::spawn(move || {
            r2.take_blocking(1, Deadline::Elapsed(DdsDuration::from_secs(5)))
        });
        std::thread::sleep(std::time::Duration::from_millis(100));
        p.delete();

        // the blocked take wakes and reports deletion
        let res = blocker.join().unwrap();
        assert!(matches!(res, Err(Error::AlreadyDeleted(_))));
        assert!(matches!(
            writer.write(b"k", b"x"),
            Err(Error::AlreadyDeleted(_))
        ));
        assert!(matches!(reader.take(1), Err(Error::AlreadyDeleted(_))));
        assert!(matches!(
            p.create_topic("t2", TypeDescriptor::unkeyed("X"), None),
            Err(Error::AlreadyDeleted(_))
        ));
    }

    #[test]
    fn test_data_available_wakes_waitset() {
        let rt = runtime();
        let p = rt.create_participant(1, None).unwrap();
        let t = keyed_topic(&p, "t");
        let reader = p.create_reader(&t, None).unwrap();
        let writer = p.create_writer(&t, None).unwrap();

        let ws = WaitSet::new();
        let cond = reader.status_condition();
        cond.set_enabled_statuses(StatusMask::DATA_AVAILABLE);
        ws.attach_condition(cond).unwrap();

        let wt = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(50));
            writer.write(b"k", b"wake").unwrap();
        });
        let out = ws
            .wait(Deadline::Elapsed(DdsDuration::from_millis(2000)))
            .unwrap();
        wt.join().unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(reader.take(1).unwrap()[0].data, b"wake");
    }
}

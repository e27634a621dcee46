// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ldds contributors

//! DataWriter: typed publication endpoint.
//!
//! Samples flow to every matched local reader: same topic and type,
//! compatible request/offered QoS, intersecting partitions. Each sample
//! gets the writer's next sequence number and the instance handle derived
//! from its serialized key.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::instance::{compute_keyhash, InstanceHandle, InstanceHandleTable};
use super::reader::{ReadSample, ReaderInner, SampleState};
use super::{Error, Result};
use crate::core::guid::Guid;
use crate::core::time::WallTime;
use crate::qos::{check_compatibility, Qos};

pub(crate) struct WriterInner {
    pub guid: Guid,
    pub topic_name: String,
    pub type_name: String,
    pub key_class: String,
    pub bounded_key: bool,
    pub qos: Qos,
    pub partitions: Vec<String>,
    pub deleted: AtomicBool,
    next_seq: AtomicU64,
    handles: Arc<InstanceHandleTable>,
    readers: Arc<Mutex<Vec<Weak<ReaderInner>>>>,
}

impl WriterInner {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        guid: Guid,
        topic_name: &str,
        type_name: &str,
        key_class: &str,
        bounded_key: bool,
        qos: Qos,
        partitions: Vec<String>,
        handles: Arc<InstanceHandleTable>,
        readers: Arc<Mutex<Vec<Weak<ReaderInner>>>>,
    ) -> WriterInner {
        WriterInner {
            guid,
            topic_name: topic_name.to_string(),
            type_name: type_name.to_string(),
            key_class: key_class.to_string(),
            bounded_key,
            qos,
            partitions,
            deleted: AtomicBool::new(false),
            next_seq: AtomicU64::new(1),
            handles,
            readers,
        }
    }
}

fn partitions_intersect(a: &[String], b: &[String]) -> bool {
    match (a.is_empty(), b.is_empty()) {
        (true, true) => true,
        (true, false) | (false, true) => false,
        (false, false) => a.iter().any(|p| b.contains(p)),
    }
}

/// Typed publication endpoint.
#[derive(Clone)]
pub struct DataWriter {
    pub(crate) inner: Arc<WriterInner>,
}

impl DataWriter {
    #[must_use]
    pub fn guid(&self) -> Guid {
        self.inner.guid
    }

    #[must_use]
    pub fn topic_name(&self) -> &str {
        &self.inner.topic_name
    }

    #[must_use]
    pub fn qos(&self) -> &Qos {
        &self.inner.qos
    }

    /// Publish one sample. Returns the instance handle for the key.
    pub fn write(&self, serialized_key: &[u8], payload: &[u8]) -> Result<InstanceHandle> {
        self.write_sample(serialized_key, payload, true)
    }

    /// Dispose the instance identified by the key.
    pub fn dispose(&self, serialized_key: &[u8]) -> Result<InstanceHandle> {
        self.write_sample(serialized_key, &[], false)
    }

    fn write_sample(
        &self,
        serialized_key: &[u8],
        payload: &[u8],
        valid: bool,
    ) -> Result<InstanceHandle> {
        let w = &self.inner;
        if w.deleted.load(Ordering::Acquire) {
            return Err(Error::AlreadyDeleted("data writer".into()));
        }
        let key_class = if w.key_class.is_empty() {
            &w.type_name
        } else {
            &w.key_class
        };
        let handle = w.handles.lookup_or_assign(key_class, serialized_key);
        let keyhash = compute_keyhash(serialized_key, w.bounded_key);
        let seq = w.next_seq.fetch_add(1, Ordering::Relaxed);
        let sample = ReadSample {
            data: payload.to_vec(),
            key: serialized_key.to_vec(),
            instance_handle: handle,
            keyhash,
            seq,
            source_timestamp: WallTime::now(),
            writer: w.guid,
            valid,
            state: SampleState::NotRead,
        };

        let readers = w.readers.lock();
        for weak in readers.iter() {
            let Some(reader) = weak.upgrade() else {
                continue;
            };
            if reader.deleted.load(Ordering::Acquire) {
                continue;
            }
            if reader.topic_name != w.topic_name || reader.type_name != w.type_name {
                continue;
            }
            if !partitions_intersect(&w.partitions, &reader.partitions) {
                continue;
            }
            if let Err(bad) = check_compatibility(&w.qos, &reader.qos) {
                log::debug!(
                    "[writer] {:?} incompatible with reader {:?}: {:?}",
                    w.guid,
                    reader.guid,
                    bad.policies
                );
                continue;
            }
            reader.deliver(sample.clone());
        }
        Ok(handle)
    }

    /// Sequence number the next write will use.
    #[must_use]
    pub fn next_seq(&self) -> u64 {
        self.inner.next_seq.load(Ordering::Relaxed)
    }
}

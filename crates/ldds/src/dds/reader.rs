// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ldds contributors

//! DataReader: typed subscription endpoint with a bounded sample cache.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use super::condition::{StatusCondition, StatusMask};
use super::instance::InstanceHandle;
use super::{Error, Result};
use crate::core::guid::Guid;
use crate::core::time::{Deadline, WallTime};
use crate::qos::{HistoryKind, Qos, LENGTH_UNLIMITED};

/// Read state of a cached sample.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SampleState {
    NotRead,
    Read,
}

/// One sample as seen by the application.
#[derive(Clone, Debug)]
pub struct ReadSample {
    pub data: Vec<u8>,
    pub key: Vec<u8>,
    pub instance_handle: InstanceHandle,
    pub keyhash: [u8; 16],
    pub seq: u64,
    pub source_timestamp: WallTime,
    pub writer: Guid,
    /// False for dispose/unregister markers without data.
    pub valid: bool,
    pub state: SampleState,
}

pub(crate) struct ReaderInner {
    pub guid: Guid,
    pub topic_name: String,
    pub type_name: String,
    pub key_class: String,
    pub qos: Qos,
    pub partitions: Vec<String>,
    pub status: Arc<StatusCondition>,
    pub deleted: AtomicBool,
    cache: Mutex<VecDeque<ReadSample>>,
}

impl ReaderInner {
    pub(crate) fn new(
        guid: Guid,
        topic_name: &str,
        type_name: &str,
        key_class: &str,
        qos: Qos,
        partitions: Vec<String>,
    ) -> ReaderInner {
        ReaderInner {
            guid,
            topic_name: topic_name.to_string(),
            type_name: type_name.to_string(),
            key_class: key_class.to_string(),
            qos,
            partitions,
            status: Arc::new(StatusCondition::new()),
            deleted: AtomicBool::new(false),
            cache: Mutex::new(VecDeque::new()),
        }
    }

    /// Accept one sample into the cache, honouring history depth per
    /// instance and the total resource limit.
    pub(crate) fn deliver(&self, sample: ReadSample) {
        if self.deleted.load(Ordering::Acquire) {
            return;
        }
        let mut cache = self.cache.lock();

        let max_samples = self
            .qos
            .resource_limits
            .map_or(LENGTH_UNLIMITED, |rl| rl.max_samples);
        if max_samples != LENGTH_UNLIMITED && cache.len() as u32 >= max_samples {
            log::debug!("[reader] {:?} sample rejected, cache full", self.guid);
            self.status.add_active(StatusMask::SAMPLE_REJECTED);
            return;
        }

        if let Some(h) = self.qos.history {
            if let HistoryKind::KeepLast { depth } = h.kind {
                let in_instance = cache
                    .iter()
                    .filter(|s| s.instance_handle == sample.instance_handle)
                    .count() as u32;
                if in_instance >= depth {
                    // drop the oldest sample of this instance
                    if let Some(pos) = cache
                        .iter()
                        .position(|s| s.instance_handle == sample.instance_handle)
                    {
                        cache.remove(pos);
                    }
                }
            }
        }

        cache.push_back(sample);
        drop(cache);
        self.status.add_active(StatusMask::DATA_AVAILABLE);
    }

    fn check_alive(&self) -> Result<()> {
        if self.deleted.load(Ordering::Acquire) {
            Err(Error::AlreadyDeleted("data reader".into()))
        } else {
            Ok(())
        }
    }
}

/// Typed subscription endpoint.
#[derive(Clone)]
pub struct DataReader {
    pub(crate) inner: Arc<ReaderInner>,
}

impl DataReader {
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

    /// The reader's status condition, for wait-set attachment.
    #[must_use]
    pub fn status_condition(&self) -> Arc<StatusCondition> {
        Arc::clone(&self.inner.status)
    }

    /// Remove and return up to `max` samples.
    pub fn take(&self, max: usize) -> Result<Vec<ReadSample>> {
        self.inner.check_alive()?;
        let mut cache = self.inner.cache.lock();
        let n = max.min(cache.len());
        let out: Vec<ReadSample> = cache.drain(..n).collect();
        if cache.is_empty() {
            self.inner.status.clear_active(StatusMask::DATA_AVAILABLE);
        }
        Ok(out)
    }

    /// Return up to `max` samples without removing them, marking them
    /// read.
    pub fn read(&self, max: usize) -> Result<Vec<ReadSample>> {
        self.inner.check_alive()?;
        let mut cache = self.inner.cache.lock();
        let mut out = Vec::new();
        for s in cache.iter_mut().take(max) {
            out.push(s.clone());
            s.state = SampleState::Read;
        }
        Ok(out)
    }

    /// Remove and return up to `max` samples of one instance.
    pub fn take_instance(&self, handle: InstanceHandle, max: usize) -> Result<Vec<ReadSample>> {
        self.inner.check_alive()?;
        if handle.is_nil() {
            return Err(Error::BadParameter("nil instance handle".into()));
        }
        let mut cache = self.inner.cache.lock();
        let mut out = Vec::new();
        let mut i = 0;
        while i < cache.len() && out.len() < max {
            if cache[i].instance_handle == handle {
                out.push(cache.remove(i).expect("index in range"));
            } else {
                i += 1;
            }
        }
        if cache.is_empty() {
            self.inner.status.clear_active(StatusMask::DATA_AVAILABLE);
        }
        Ok(out)
    }

    /// Block until at least one sample is available, then take.
    pub fn take_blocking(&self, max: usize, deadline: Deadline) -> Result<Vec<ReadSample>> {
        let waitset = super::waitset::WaitSet::new();
        let cond = self.status_condition();
        cond.set_enabled_statuses(StatusMask::DATA_AVAILABLE);
        waitset.attach_condition(cond)?;
        let start = Instant::now();
        // pin an elapsed deadline to this call's start so retries share
        // one budget
        let deadline = match deadline {
            Deadline::Elapsed(d) => match d.to_std() {
                Some(total) => Deadline::Monotonic(start + total),
                None => Deadline::Never,
            },
            other => other,
        };
        loop {
            self.inner.check_alive()?;
            let got = self.take(max)?;
            if !got.is_empty() {
                return Ok(got);
            }
            match deadline.remaining_from(start) {
                Some(d) if d.is_zero() => return Err(Error::Timeout),
                _ => {}
            }
            match waitset.wait(deadline) {
                Ok(_) => continue,
                Err(Error::Timeout) => return Err(Error::Timeout),
                Err(e) => return Err(e),
            }
        }
    }

    /// Number of cached samples.
    #[must_use]
    pub fn cached(&self) -> usize {
        self.inner.cache.lock().len()
    }
}

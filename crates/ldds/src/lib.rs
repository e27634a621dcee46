// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ldds contributors

//! # ldds
//!
//! Secure DDS (Data Distribution Service) middleware core in pure Rust:
//! a publish/subscribe model over the RTPS wire protocol with the builtin
//! AES-GCM-GMAC cryptographic plugin.
//!
//! The crate is organized around three subsystems:
//!
//! - **Receive path** ([`rx`]): refcounted receive-buffer pools, fragment
//!   defragmentation, and per-writer sample reordering with bounded
//!   memory.
//! - **Security** ([`security`]): per-endpoint key material, session-key
//!   derivation, and the AES-GCM/GMAC transform over payloads,
//!   submessages, and whole RTPS messages.
//! - **QoS** ([`qos`]): the closed policy set with merge/delta/validation
//!   semantics, request/offered matching, and the XML-backed QoS
//!   provider.
//!
//! A shared runtime substrate ([`core::rt`]) provides the socket
//! wait-set, delivery queues, the timed-event scheduler, and the
//! garbage-collect thread. The [`dds`] module carries the entity model:
//! participants, topics, readers, writers, conditions, and wait-sets.
//!
//! ## Quick start
//!
//! ```no_run
//! use ldds::{Runtime, TypeDescriptor};
//!
//! # fn main() -> ldds::Result<()> {
//! let runtime = Runtime::new()?;
//! let participant = runtime.create_participant(0, None)?;
//! let topic = participant.create_topic(
//!     "sensors",
//!     TypeDescriptor::keyed("SensorReading", "SensorKey"),
//!     None,
//! )?;
//! let writer = participant.create_writer(&topic, None)?;
//! let reader = participant.create_reader(&topic, None)?;
//! writer.write(b"sensor-1", b"reading bytes")?;
//! for sample in reader.take(16)? {
//!     println!("seq {} on {:?}", sample.seq, sample.instance_handle);
//! }
//! # Ok(())
//! # }
//! ```

pub mod core;
pub mod dds;
pub mod discovery;
pub mod protocol;
pub mod qos;
pub mod rx;
pub mod security;

pub use dds::{
    Condition, DataReader, DataWriter, Error, GuardCondition, InstanceHandle, Participant,
    Publisher, ReadSample, Result, Runtime, StatusCondition, StatusMask, Subscriber, Topic,
    TypeDescriptor, WaitSet,
};

pub use crate::core::time::{DdsDuration, Deadline, WallTime};

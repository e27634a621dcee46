// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ldds contributors

//! Runtime substrate: the threads and queues shared by every participant.
//!
//! - [`waitset`]: readiness multiplexing over transport connections
//! - [`dqueue`]: background delivery of reassembled sample chains
//! - [`events`]: timed-event scheduling
//! - [`gc`]: deferred entity teardown

pub mod dqueue;
pub mod events;
pub mod gc;
pub mod waitset;

pub use dqueue::{Dqueue, DqueueHandler};
pub use events::{EventDisposition, EventId, TimedEvents};
pub use gc::GcThread;
pub use waitset::{udp_connection, Connection, SockWaitset, SockWaitsetHandle, WaitsetEvents};

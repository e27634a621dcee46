// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ldds contributors

//! Time representation for QoS policies and blocking calls.
//!
//! DDS durations are 64-bit nanosecond counts with a reserved infinity
//! value. Blocking APIs accept a deadline in one of three clocks (wall,
//! monotonic, elapsed-from-now) because the clocks can diverge and callers
//! know which one their contract is expressed in.

use std::time::{Duration as StdDuration, Instant, SystemTime, UNIX_EPOCH};

/// A span of time in nanoseconds, with a reserved infinity.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DdsDuration(i64);

impl DdsDuration {
    /// The infinite duration (never expires).
    pub const INFINITY: DdsDuration = DdsDuration(i64::MAX);
    /// Zero-length duration.
    pub const ZERO: DdsDuration = DdsDuration(0);

    /// Construct from a nanosecond count. Negative values are invalid in
    /// QoS contexts and rejected by the policy validators, not here.
    #[must_use]
    pub const fn from_nanos(ns: i64) -> Self {
        DdsDuration(ns)
    }

    #[must_use]
    pub const fn from_secs(s: i64) -> Self {
        DdsDuration(s * 1_000_000_000)
    }

    #[must_use]
    pub const fn from_millis(ms: i64) -> Self {
        DdsDuration(ms * 1_000_000)
    }

    /// Construct from split seconds/nanoseconds as used by the XML provider
    /// and the wire representation. Saturates to infinity on overflow.
    #[must_use]
    pub fn from_sec_nanos(sec: i64, nanos: u32) -> Self {
        match sec
            .checked_mul(1_000_000_000)
            .and_then(|n| n.checked_add(i64::from(nanos)))
        {
            Some(ns) => DdsDuration(ns),
            None => DdsDuration::INFINITY,
        }
    }

    #[must_use]
    pub const fn nanos(self) -> i64 {
        self.0
    }

    #[must_use]
    pub const fn is_infinite(self) -> bool {
        self.0 == i64::MAX
    }

    /// Convert to a std duration; `None` for infinity or negative values.
    #[must_use]
    pub fn to_std(self) -> Option<StdDuration> {
        if self.is_infinite() || self.0 < 0 {
            None
        } else {
            Some(StdDuration::from_nanos(self.0 as u64))
        }
    }
}

/// A point in time on the source-timestamp clock (nanoseconds since the
/// Unix epoch). Used for `destination_order = BY_SOURCE` comparisons.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WallTime(pub i64);

impl WallTime {
    #[must_use]
    pub fn now() -> Self {
        let d = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(StdDuration::ZERO);
        WallTime(d.as_nanos() as i64)
    }
}

/// Deadline for a blocking call.
///
/// Three variants because the clocks diverge: an absolute wall-clock time,
/// an absolute monotonic instant, or a span measured from the moment the
/// blocking call starts.
#[derive(Clone, Copy, Debug)]
pub enum Deadline {
    /// Absolute wall-clock time.
    Wall(WallTime),
    /// Absolute monotonic instant.
    Monotonic(Instant),
    /// Relative to the start of the call.
    Elapsed(DdsDuration),
    /// Never expires.
    Never,
}

impl Deadline {
    /// Remaining wait budget as seen from `now`; `None` means unbounded.
    ///
    /// An already-expired deadline yields a zero budget, so callers always
    /// get one non-blocking attempt before reporting `Timeout`.
    #[must_use]
    pub fn remaining_from(&self, start: Instant) -> Option<StdDuration> {
        match *self {
            Deadline::Never => None,
            Deadline::Elapsed(d) => match d.to_std() {
                None => None,
                Some(total) => Some(total.saturating_sub(start.elapsed())),
            },
            Deadline::Monotonic(at) => Some(at.saturating_duration_since(Instant::now())),
            Deadline::Wall(at) => {
                let now = WallTime::now();
                if at.0 <= now.0 {
                    Some(StdDuration::ZERO)
                } else {
                    Some(StdDuration::from_nanos((at.0 - now.0) as u64))
                }
            }
        }
    }
}

impl From<DdsDuration> for Deadline {
    fn from(d: DdsDuration) -> Self {
        if d.is_infinite() {
            Deadline::Never
        } else {
            Deadline::Elapsed(d)
        }
    }
}

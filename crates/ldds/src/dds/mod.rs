// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ldds contributors

//! # DDS API
//!
//! Entity model for the middleware: a [`Participant`] owns topics,
//! publishers, subscribers, and through them typed writers and readers.
//! Conditions and wait-sets provide the blocking notification surface.
//!
//! ```text
//! Participant
//! +-- Publisher
//! |   +-- DataWriter  ------> Topic
//! +-- Subscriber
//!     +-- DataReader  <------ Topic
//! ```

mod condition;
mod instance;
mod participant;
mod reader;
mod topic;
mod waitset;
mod writer;

pub use condition::{Condition, GuardCondition, StatusCondition, StatusMask};
pub use instance::{InstanceHandle, InstanceHandleTable};
pub use participant::{Participant, Publisher, Runtime, Subscriber};
pub use reader::{DataReader, ReadSample, SampleState};
pub use topic::{Topic, TypeDescriptor};
pub use waitset::WaitSet;
pub use writer::DataWriter;

use crate::security::SecurityError;

/// Errors surfaced by the middleware core.
///
/// Every failure carries a kind, a DDS return code, and a formatted
/// message. Security failures never include key material in the message.
#[derive(Debug)]
pub enum Error {
    /// API contract violated by the caller.
    BadParameter(String),
    /// Operation of a valid type in the wrong state.
    PreconditionNotMet(String),
    /// Handle refers to a destroyed entity.
    AlreadyDeleted(String),
    /// Parent/child mismatch.
    IllegalOperation(String),
    /// Memory, sample, or receiver cap exceeded.
    OutOfResources(String),
    /// Deadline expired.
    Timeout,
    /// Lookup target absent.
    NotFound(String),
    /// QoS policy or combination rejected by validation.
    InvalidQos(String),
    /// Underlying socket or file I/O failure.
    IoError(std::io::Error),
    /// DDS-Security failure (cipher, token, receiver sign, access).
    Security(SecurityError),
}

impl Error {
    /// DDS return code for this error.
    #[must_use]
    pub fn code(&self) -> i32 {
        match self {
            Error::BadParameter(_) | Error::InvalidQos(_) => 3,
            Error::PreconditionNotMet(_) => 4,
            Error::OutOfResources(_) => 5,
            Error::AlreadyDeleted(_) => 9,
            Error::Timeout => 10,
            Error::IllegalOperation(_) => 12,
            Error::NotFound(_) => 11,
            Error::IoError(_) => 1,
            Error::Security(_) => 13,
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::BadParameter(msg) => write!(f, "Bad parameter: {}", msg),
            Error::PreconditionNotMet(msg) => write!(f, "Precondition not met: {}", msg),
            Error::AlreadyDeleted(msg) => write!(f, "Already deleted: {}", msg),
            Error::IllegalOperation(msg) => write!(f, "Illegal operation: {}", msg),
            Error::OutOfResources(msg) => write!(f, "Out of resources: {}", msg),
            Error::Timeout => write!(f, "Timeout"),
            Error::NotFound(msg) => write!(f, "Not found: {}", msg),
            Error::InvalidQos(msg) => write!(f, "Invalid QoS: {}", msg),
            Error::IoError(e) => write!(f, "I/O error: {}", e),
            Error::Security(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::IoError(e) => Some(e),
            Error::Security(e) => Some(e),
            _ => None,
        }
    }
}

impl From<SecurityError> for Error {
    fn from(e: SecurityError) -> Self {
        Error::Security(e)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::IoError(e)
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_match_dds_retcodes() {
        assert_eq!(Error::BadParameter(String::new()).code(), 3);
        assert_eq!(Error::PreconditionNotMet(String::new()).code(), 4);
        assert_eq!(Error::OutOfResources(String::new()).code(), 5);
        assert_eq!(Error::AlreadyDeleted(String::new()).code(), 9);
        assert_eq!(Error::Timeout.code(), 10);
        assert_eq!(Error::IllegalOperation(String::new()).code(), 12);
    }

    #[test]
    fn test_display_contains_kind() {
        let e = Error::NotFound("topic 'x'".into());
        assert!(e.to_string().contains("Not found"));
    }
}

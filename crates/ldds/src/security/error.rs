// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ldds contributors

//! Security error type: (kind, numeric code, formatted message).
//!
//! Message strings are templated with the failure class only; key bytes
//! and derived material never appear in them.

use std::fmt;

/// Failure classes surfaced by the security plugins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SecErrorKind {
    /// AES/GMAC primitive failed.
    CipherError,
    /// Token or key-material argument malformed.
    InvalidCryptoArgument,
    /// Token could not be parsed.
    InvalidCryptoToken,
    /// Receiver-specific mac missing or mismatched.
    InvalidReceiverSign,
    /// Access-control denial.
    NotAllowedBySecurity,
    /// Handle or key lookup failed.
    NotFound,
}

impl SecErrorKind {
    fn label(self) -> &'static str {
        match self {
            SecErrorKind::CipherError => "cipher error",
            SecErrorKind::InvalidCryptoArgument => "invalid crypto argument",
            SecErrorKind::InvalidCryptoToken => "invalid crypto token",
            SecErrorKind::InvalidReceiverSign => "invalid receiver signature",
            SecErrorKind::NotAllowedBySecurity => "not allowed by security",
            SecErrorKind::NotFound => "not found",
        }
    }
}

/// A security failure.
#[derive(Debug, Clone)]
pub struct SecurityError {
    pub kind: SecErrorKind,
    pub code: u32,
    pub message: String,
}

impl SecurityError {
    #[must_use]
    pub fn new(kind: SecErrorKind, message: impl Into<String>) -> SecurityError {
        SecurityError {
            kind,
            code: kind as u32 + 1,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn cipher(message: impl Into<String>) -> SecurityError {
        SecurityError::new(SecErrorKind::CipherError, message)
    }

    #[must_use]
    pub fn invalid_argument(message: impl Into<String>) -> SecurityError {
        SecurityError::new(SecErrorKind::InvalidCryptoArgument, message)
    }

    #[must_use]
    pub fn invalid_token(message: impl Into<String>) -> SecurityError {
        SecurityError::new(SecErrorKind::InvalidCryptoToken, message)
    }

    #[must_use]
    pub fn invalid_receiver_sign(message: impl Into<String>) -> SecurityError {
        SecurityError::new(SecErrorKind::InvalidReceiverSign, message)
    }

    #[must_use]
    pub fn not_found(message: impl Into<String>) -> SecurityError {
        SecurityError::new(SecErrorKind::NotFound, message)
    }
}

impl fmt::Display for SecurityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Security: {}: {}", self.kind.label(), self.message)
    }
}

impl std::error::Error for SecurityError {}

/// Result alias for security operations.
pub type SecResult<T> = std::result::Result<T, SecurityError>;

// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ldds contributors

//! DDS-Security: the cryptographic plugin and its shared types.
//!
//! Authentication and access control are external collaborators; only
//! their handles and tokens appear here. The cryptographic plugin
//! ([`crypto`]) is fully implemented: key material store, submessage and
//! message transforms, and key exchange tokens.

pub mod crypto;
pub mod error;
pub mod logging;
pub mod types;

pub use crypto::{CryptoTransform, KeyStore};
pub use logging::SecurityDropLog;
pub use error::{SecErrorKind, SecResult, SecurityError};
pub use types::{
    BasicProtectionKind, CryptoHandle, CryptoToken, ProtectionKind, SecureSubmsgCategory,
    TokenBinaryProperty, TransformKind, CRYPTO_TOKEN_CLASS_ID, CRYPTO_TOKEN_KEYMAT_NAME,
};

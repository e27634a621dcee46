// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ldds contributors

//! Shared security types: handles, protection kinds, transformation kinds,
//! and the token data holders exchanged between peers.

use crate::security::error::{SecResult, SecurityError};

/// Opaque handle into the key material store. Zero is never a valid
/// handle.
pub type CryptoHandle = u64;

/// Token class id for the builtin AES-GCM-GMAC cryptographic plugin.
pub const CRYPTO_TOKEN_CLASS_ID: &str = "DDS:Crypto:AES-GCM-GMAC";
/// Binary property carrying serialized key material inside a token.
pub const CRYPTO_TOKEN_KEYMAT_NAME: &str = "dds.cryp.keymat";

/// Symmetric transformation applied to protected data.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TransformKind {
    None,
    Aes128Gmac,
    Aes128Gcm,
    Aes256Gmac,
    Aes256Gcm,
}

impl TransformKind {
    /// Wire value (DDS-Security transformation kind, last octet).
    #[must_use]
    pub fn to_wire(self) -> u32 {
        match self {
            TransformKind::None => 0,
            TransformKind::Aes128Gmac => 1,
            TransformKind::Aes128Gcm => 2,
            TransformKind::Aes256Gmac => 3,
            TransformKind::Aes256Gcm => 4,
        }
    }

    pub fn from_wire(v: u32) -> SecResult<TransformKind> {
        match v {
            0 => Ok(TransformKind::None),
            1 => Ok(TransformKind::Aes128Gmac),
            2 => Ok(TransformKind::Aes128Gcm),
            3 => Ok(TransformKind::Aes256Gmac),
            4 => Ok(TransformKind::Aes256Gcm),
            other => Err(SecurityError::invalid_argument(format!(
                "unknown transformation kind {other}"
            ))),
        }
    }

    /// Symmetric key size in bytes; zero for NONE.
    #[must_use]
    pub fn key_bytes(self) -> usize {
        match self {
            TransformKind::None => 0,
            TransformKind::Aes128Gmac | TransformKind::Aes128Gcm => 16,
            TransformKind::Aes256Gmac | TransformKind::Aes256Gcm => 32,
        }
    }

    /// Whether the body is encrypted (GCM) rather than only authenticated
    /// (GMAC).
    #[must_use]
    pub fn is_encrypting(self) -> bool {
        matches!(self, TransformKind::Aes128Gcm | TransformKind::Aes256Gcm)
    }

    #[must_use]
    pub fn is_authenticating(self) -> bool {
        matches!(self, TransformKind::Aes128Gmac | TransformKind::Aes256Gmac)
    }
}

/// Protection applied to an endpoint or participant, from access control.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ProtectionKind {
    #[default]
    None,
    Sign,
    Encrypt,
    SignWithOriginAuthentication,
    EncryptWithOriginAuthentication,
}

impl ProtectionKind {
    #[must_use]
    pub fn has_origin_authentication(self) -> bool {
        matches!(
            self,
            ProtectionKind::SignWithOriginAuthentication
                | ProtectionKind::EncryptWithOriginAuthentication
        )
    }

    #[must_use]
    pub fn expects_encryption(self) -> bool {
        matches!(
            self,
            ProtectionKind::Encrypt | ProtectionKind::EncryptWithOriginAuthentication
        )
    }

    #[must_use]
    pub fn expects_authentication_only(self) -> bool {
        matches!(
            self,
            ProtectionKind::Sign | ProtectionKind::SignWithOriginAuthentication
        )
    }

    /// The transformation for this protection at the given strength.
    #[must_use]
    pub fn transformation(self, use_256: bool) -> TransformKind {
        match self {
            ProtectionKind::None => TransformKind::None,
            ProtectionKind::Sign | ProtectionKind::SignWithOriginAuthentication => {
                if use_256 {
                    TransformKind::Aes256Gmac
                } else {
                    TransformKind::Aes128Gmac
                }
            }
            ProtectionKind::Encrypt | ProtectionKind::EncryptWithOriginAuthentication => {
                if use_256 {
                    TransformKind::Aes256Gcm
                } else {
                    TransformKind::Aes128Gcm
                }
            }
        }
    }
}

/// Payload protection is a reduced set without origin authentication.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BasicProtectionKind {
    #[default]
    None,
    Sign,
    Encrypt,
}

impl BasicProtectionKind {
    #[must_use]
    pub fn transformation(self, use_256: bool) -> TransformKind {
        match self {
            BasicProtectionKind::None => TransformKind::None,
            BasicProtectionKind::Sign => ProtectionKind::Sign.transformation(use_256),
            BasicProtectionKind::Encrypt => ProtectionKind::Encrypt.transformation(use_256),
        }
    }
}

/// One binary property of a token.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenBinaryProperty {
    pub name: String,
    pub value: Vec<u8>,
}

/// A security token: class id plus binary properties, as produced by the
/// key exchange and consumed from discovery.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CryptoToken {
    pub class_id: String,
    pub binary_properties: Vec<TokenBinaryProperty>,
}

impl CryptoToken {
    /// The `dds.cryp.keymat` payload of an AES-GCM-GMAC token.
    pub fn keymat(&self) -> SecResult<&[u8]> {
        if self.class_id != CRYPTO_TOKEN_CLASS_ID {
            return Err(SecurityError::invalid_token(format!(
                "unexpected token class '{}'",
                self.class_id
            )));
        }
        self.binary_properties
            .iter()
            .find(|p| p.name == CRYPTO_TOKEN_KEYMAT_NAME)
            .map(|p| p.value.as_slice())
            .ok_or_else(|| {
                SecurityError::invalid_token(format!(
                    "token lacks the {CRYPTO_TOKEN_KEYMAT_NAME} property"
                ))
            })
    }
}

/// What a secure submessage turned out to protect, as determined by
/// prefix inspection alone.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SecureSubmsgCategory {
    /// Writer-originated (Data, DataFrag, Heartbeat, Gap).
    DatawriterSubmessage,
    /// Reader-originated (AckNack, NackFrag).
    DatareaderSubmessage,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transform_kind_wire_roundtrip() {
        for k in [
            TransformKind::None,
            TransformKind::Aes128Gmac,
            TransformKind::Aes128Gcm,
            TransformKind::Aes256Gmac,
            TransformKind::Aes256Gcm,
        ] {
            assert_eq!(TransformKind::from_wire(k.to_wire()).unwrap(), k);
        }
        assert!(TransformKind::from_wire(9).is_err());
    }

    #[test]
    fn test_key_sizes() {
        assert_eq!(TransformKind::Aes128Gcm.key_bytes(), 16);
        assert_eq!(TransformKind::Aes256Gmac.key_bytes(), 32);
        assert_eq!(TransformKind::None.key_bytes(), 0);
    }

    #[test]
    fn test_protection_kind_predicates() {
        assert!(ProtectionKind::EncryptWithOriginAuthentication.has_origin_authentication());
        assert!(!ProtectionKind::Encrypt.has_origin_authentication());
        assert!(ProtectionKind::Encrypt.expects_encryption());
        assert!(ProtectionKind::Sign.expects_authentication_only());
    }

    #[test]
    fn test_token_keymat_lookup() {
        let tok = CryptoToken {
            class_id: CRYPTO_TOKEN_CLASS_ID.to_string(),
            binary_properties: vec![TokenBinaryProperty {
                name: CRYPTO_TOKEN_KEYMAT_NAME.to_string(),
                value: vec![1, 2, 3],
            }],
        };
        assert_eq!(tok.keymat().unwrap(), &[1, 2, 3]);

        let bad = CryptoToken {
            class_id: "DDS:Crypto:Other".to_string(),
            binary_properties: vec![],
        };
        assert!(bad.keymat().is_err());
    }
}

// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ldds contributors

//! Key exchange: serializing master key material into
//! `DDS:Crypto:AES-GCM-GMAC` tokens and installing peer tokens.
//!
//! Wire layout of the `dds.cryp.keymat` binary property (big-endian):
//!
//! ```text
//! transformation_kind(4) | salt_len(4) | salt
//!   | sender_key_id(4) | key_len(4) | key
//!   | receiver_specific_key_id(4) | recv_key_len(4) [ | recv_key ]
//! ```
//!
//! The receiver-specific key is present exactly when its id is nonzero.

use crate::core::ser::{TaintedReader, TrustedWriter};
use crate::security::crypto::keys::{KeyStore, MasterKeyMaterial};
use crate::security::error::{SecResult, SecurityError};
use crate::security::types::{
    CryptoHandle, CryptoToken, TokenBinaryProperty, TransformKind, CRYPTO_TOKEN_CLASS_ID,
    CRYPTO_TOKEN_KEYMAT_NAME,
};

/// Serialize master key material into the keymat wire form.
#[must_use]
pub fn serialize_key_material(m: &MasterKeyMaterial) -> Vec<u8> {
    let mut w = TrustedWriter::with_capacity(24 + m.master_salt.len() + 2 * m.master_sender_key.len());
    w.put_u32_be(m.transformation_kind.to_wire());
    w.put_u32_be(m.master_salt.len() as u32);
    w.put_bytes(&m.master_salt);
    w.put_u32_be(m.sender_key_id);
    w.put_u32_be(m.master_sender_key.len() as u32);
    w.put_bytes(&m.master_sender_key);
    w.put_u32_be(m.receiver_specific_key_id);
    if m.receiver_specific_key_id != 0 {
        w.put_u32_be(m.master_receiver_specific_key.len() as u32);
        w.put_bytes(&m.master_receiver_specific_key);
    } else {
        w.put_u32_be(0);
    }
    w.into_vec()
}

/// Parse and validate a keymat wire form.
pub fn deserialize_key_material(bytes: &[u8]) -> SecResult<MasterKeyMaterial> {
    let mut r = TaintedReader::new(bytes);
    let err = |e| SecurityError::invalid_token(format!("key material truncated: {e}"));

    let kind = TransformKind::from_wire(r.read_u32_be().map_err(err)?)
        .map_err(|e| SecurityError::invalid_token(e.message))?;
    if kind == TransformKind::None {
        return Err(SecurityError::invalid_token(
            "key material with transformation kind NONE",
        ));
    }
    let key_bytes = kind.key_bytes();

    let salt_len = r.read_u32_be().map_err(err)? as usize;
    if salt_len != key_bytes {
        return Err(SecurityError::invalid_token(format!(
            "salt length {salt_len} does not match transformation kind"
        )));
    }
    let master_salt = r.read_bytes(salt_len).map_err(err)?.to_vec();

    let sender_key_id = r.read_u32_be().map_err(err)?;
    let key_len = r.read_u32_be().map_err(err)? as usize;
    if key_len != key_bytes {
        return Err(SecurityError::invalid_token(format!(
            "sender key length {key_len} does not match transformation kind"
        )));
    }
    let master_sender_key = r.read_bytes(key_len).map_err(err)?.to_vec();
    if master_sender_key.iter().all(|&b| b == 0) {
        return Err(SecurityError::invalid_token("sender key is all zeroes"));
    }

    let receiver_specific_key_id = r.read_u32_be().map_err(err)?;
    let recv_len = r.read_u32_be().map_err(err)? as usize;
    let master_receiver_specific_key = if receiver_specific_key_id != 0 {
        if recv_len != key_bytes {
            return Err(SecurityError::invalid_token(format!(
                "receiver-specific key length {recv_len} does not match transformation kind"
            )));
        }
        let k = r.read_bytes(recv_len).map_err(err)?.to_vec();
        if k.iter().all(|&b| b == 0) {
            return Err(SecurityError::invalid_token(
                "receiver-specific key is all zeroes",
            ));
        }
        k
    } else {
        if recv_len != 0 {
            return Err(SecurityError::invalid_token(
                "receiver-specific key without a key id",
            ));
        }
        Vec::new()
    };

    if !r.is_empty() {
        return Err(SecurityError::invalid_token(format!(
            "{} trailing bytes after key material",
            r.remaining()
        )));
    }

    Ok(MasterKeyMaterial {
        transformation_kind: kind,
        master_salt,
        sender_key_id,
        master_sender_key,
        receiver_specific_key_id,
        master_receiver_specific_key,
    })
}

fn token_from_material(m: &MasterKeyMaterial) -> CryptoToken {
    CryptoToken {
        class_id: CRYPTO_TOKEN_CLASS_ID.to_string(),
        binary_properties: vec![TokenBinaryProperty {
            name: CRYPTO_TOKEN_KEYMAT_NAME.to_string(),
            value: serialize_key_material(m),
        }],
    }
}

fn materials_from_tokens(tokens: &[CryptoToken]) -> SecResult<Vec<MasterKeyMaterial>> {
    tokens
        .iter()
        .map(|t| deserialize_key_material(t.keymat()?))
        .collect()
}

/// Tokens carrying our RTPS-level key material for `remote_participant`.
/// Empty when the participant is unprotected.
pub fn create_local_participant_tokens(
    store: &KeyStore,
    remote_participant: CryptoHandle,
) -> SecResult<Vec<CryptoToken>> {
    Ok(store
        .local_p2p_material(remote_participant)?
        .map(|m| vec![token_from_material(&m)])
        .unwrap_or_default())
}

/// Install a peer participant's tokens.
pub fn set_remote_participant_tokens(
    store: &KeyStore,
    remote_participant: CryptoHandle,
    tokens: &[CryptoToken],
) -> SecResult<()> {
    let mut materials = materials_from_tokens(tokens)?;
    let Some(material) = materials.pop() else {
        // an unprotected peer legitimately sends no tokens
        return Ok(());
    };
    if !materials.is_empty() {
        return Err(SecurityError::invalid_token(
            "participant tokens must carry exactly one key material",
        ));
    }
    store.install_remote_participant_material(remote_participant, material)
}

/// Tokens carrying our writer's key material for `remote_reader`: one for
/// submessage protection and, when the kinds differ, one for payload
/// protection.
pub fn create_local_writer_tokens(
    store: &KeyStore,
    remote_reader: CryptoHandle,
) -> SecResult<Vec<CryptoToken>> {
    Ok(store
        .writer_materials_for_reader(remote_reader)?
        .iter()
        .map(|m| token_from_material(m))
        .collect())
}

/// Install a peer writer's tokens on our matched remote-writer handle.
pub fn set_remote_writer_tokens(
    store: &KeyStore,
    remote_writer: CryptoHandle,
    tokens: &[CryptoToken],
) -> SecResult<()> {
    let materials = materials_from_tokens(tokens)?;
    if materials.is_empty() {
        return Ok(());
    }
    store.install_remote_writer_materials(remote_writer, materials)
}

/// The single token carrying our reader's key material. Empty when the
/// reader is unprotected.
pub fn create_local_reader_tokens(
    store: &KeyStore,
    local_reader: CryptoHandle,
) -> SecResult<Vec<CryptoToken>> {
    Ok(store
        .reader_material(local_reader)?
        .map(|m| vec![token_from_material(&m)])
        .unwrap_or_default())
}

/// Install a peer reader's tokens on our matched remote-reader handle.
pub fn set_remote_reader_tokens(
    store: &KeyStore,
    remote_reader: CryptoHandle,
    tokens: &[CryptoToken],
) -> SecResult<()> {
    let mut materials = materials_from_tokens(tokens)?;
    let Some(material) = materials.pop() else {
        return Ok(());
    };
    if !materials.is_empty() {
        return Err(SecurityError::invalid_token(
            "reader tokens must carry exactly one key material",
        ));
    }
    store.install_remote_reader_material(remote_reader, material)
}

// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ldds contributors

//! Cryptographic transform: AES-GCM/GMAC protection of serialized
//! payloads, RTPS submessages, and whole RTPS messages.
//!
//! Encoding wraps the plaintext in SEC_PREFIX / SEC_BODY / SEC_POSTFIX
//! framing (SRTPS_* at message level); GCM kinds encrypt the body, GMAC
//! kinds leave it in the clear and only authenticate. The GCM tag over the
//! body is the common mac; receiver-specific macs are GMAC tags over the
//! common mac under per-receiver derived keys, appended one pair at a
//! time so callers can iterate over large receiver sets incrementally.
//!
//! Decoding is parsing-first: the input is untrusted, every length is
//! bounds-checked before use, and key material is only consulted after
//! the framing has been validated. Tag comparisons are constant-time.

use std::sync::Arc;

use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_128_GCM, AES_256_GCM};
use ring::constant_time;

use crate::core::ser::{TaintedReader, TrustedWriter};
use crate::protocol::submsg::{
    InfoSrc, RtpsHeader, SubmessageHeader, RTPS_HEADER_SIZE, SMID_INFO_SRC, SMID_SEC_BODY,
    SMID_SEC_POSTFIX, SMID_SEC_PREFIX, SMID_SRTPS_POSTFIX, SMID_SRTPS_PREFIX,
};
use crate::security::crypto::keys::{
    calculate_receiver_specific_key, calculate_session_key, EncodeKeys, KeyStore,
    MasterKeyMaterial, SessionKey, CRYPTO_HMAC_SIZE,
};
use crate::security::error::{SecErrorKind, SecResult, SecurityError};
use crate::security::types::{CryptoHandle, ProtectionKind, SecureSubmsgCategory, TransformKind};

/// Byte length of a secure prefix body.
const PREFIX_BODY_LEN: usize = 20;
/// Byte length of a postfix body with no receiver macs.
const POSTFIX_BASE_LEN: usize = CRYPTO_HMAC_SIZE + 4;
/// Byte length of one `(key_id, mac)` pair.
const RECEIVER_MAC_LEN: usize = 4 + CRYPTO_HMAC_SIZE;

// ---------------------------------------------------------------------------
// primitives
// ---------------------------------------------------------------------------

fn aead_key(kind: TransformKind, key: &SessionKey) -> SecResult<LessSafeKey> {
    let alg = match kind {
        TransformKind::Aes128Gcm | TransformKind::Aes128Gmac => &AES_128_GCM,
        TransformKind::Aes256Gcm | TransformKind::Aes256Gmac => &AES_256_GCM,
        TransformKind::None => {
            return Err(SecurityError::invalid_argument(
                "no cipher for transformation kind NONE",
            ))
        }
    };
    let unbound = UnboundKey::new(alg, key.as_slice())
        .map_err(|_| SecurityError::cipher("failed to initialize AES-GCM key"))?;
    Ok(LessSafeKey::new(unbound))
}

/// 96-bit IV: big-endian session id followed by the big-endian suffix.
fn make_nonce(session_id: u32, iv_suffix: u64) -> Nonce {
    let mut iv = [0u8; 12];
    iv[..4].copy_from_slice(&session_id.to_be_bytes());
    iv[4..].copy_from_slice(&iv_suffix.to_be_bytes());
    Nonce::assume_unique_for_key(iv)
}

fn gcm_encrypt(
    kind: TransformKind,
    key: &SessionKey,
    session_id: u32,
    iv_suffix: u64,
    plaintext: &[u8],
) -> SecResult<(Vec<u8>, [u8; CRYPTO_HMAC_SIZE])> {
    let k = aead_key(kind, key)?;
    let mut in_out = plaintext.to_vec();
    let tag = k
        .seal_in_place_separate_tag(make_nonce(session_id, iv_suffix), Aad::empty(), &mut in_out)
        .map_err(|_| SecurityError::cipher("AES-GCM encryption failed"))?;
    let mut mac = [0u8; CRYPTO_HMAC_SIZE];
    mac.copy_from_slice(tag.as_ref());
    Ok((in_out, mac))
}

/// GMAC: authentication tag over `data` without encrypting it.
fn gmac_compute(
    kind: TransformKind,
    key: &SessionKey,
    session_id: u32,
    iv_suffix: u64,
    data: &[u8],
) -> SecResult<[u8; CRYPTO_HMAC_SIZE]> {
    let k = aead_key(kind, key)?;
    let mut empty: [u8; 0] = [];
    let tag = k
        .seal_in_place_separate_tag(
            make_nonce(session_id, iv_suffix),
            Aad::from(data),
            &mut empty,
        )
        .map_err(|_| SecurityError::cipher("GMAC computation failed"))?;
    let mut mac = [0u8; CRYPTO_HMAC_SIZE];
    mac.copy_from_slice(tag.as_ref());
    Ok(mac)
}

fn gcm_decrypt(
    kind: TransformKind,
    key: &SessionKey,
    session_id: u32,
    iv_suffix: u64,
    ciphertext: &[u8],
    tag: &[u8; CRYPTO_HMAC_SIZE],
) -> SecResult<Vec<u8>> {
    let k = aead_key(kind, key)?;
    let mut in_out = Vec::with_capacity(ciphertext.len() + CRYPTO_HMAC_SIZE);
    in_out.extend_from_slice(ciphertext);
    in_out.extend_from_slice(tag);
    let plain_len = k
        .open_in_place(make_nonce(session_id, iv_suffix), Aad::empty(), &mut in_out)
        .map_err(|_| SecurityError::cipher("authentication tag mismatch"))?
        .len();
    in_out.truncate(plain_len);
    Ok(in_out)
}

fn gmac_verify(
    kind: TransformKind,
    key: &SessionKey,
    session_id: u32,
    iv_suffix: u64,
    data: &[u8],
    mac: &[u8; CRYPTO_HMAC_SIZE],
) -> SecResult<()> {
    let expect = gmac_compute(kind, key, session_id, iv_suffix, data)?;
    constant_time::verify_slices_are_equal(&expect, mac)
        .map_err(|_| SecurityError::cipher("authentication tag mismatch"))
}

// ---------------------------------------------------------------------------
// framing
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug)]
struct SecurePrefix {
    kind: TransformKind,
    transform_id: u32,
    session_id: u32,
    iv_suffix: u64,
}

impl SecurePrefix {
    fn write_body(&self, w: &mut TrustedWriter) {
        w.put_u32_be(self.kind.to_wire());
        w.put_u32_be(self.transform_id);
        w.put_u32_be(self.session_id);
        w.put_u64_be(self.iv_suffix);
    }

    fn read_body(r: &mut TaintedReader<'_>) -> SecResult<SecurePrefix> {
        let err = |e| SecurityError::invalid_argument(format!("secure prefix: {e}"));
        let kind = TransformKind::from_wire(r.read_u32_be().map_err(err)?)?;
        let transform_id = r.read_u32_be().map_err(err)?;
        let session_id = r.read_u32_be().map_err(err)?;
        let iv_suffix = r.read_u64_be().map_err(err)?;
        if kind == TransformKind::None || transform_id == 0 {
            return Err(SecurityError::invalid_argument(
                "secure prefix with null transformation",
            ));
        }
        Ok(SecurePrefix {
            kind,
            transform_id,
            session_id,
            iv_suffix,
        })
    }
}

#[derive(Clone, Debug)]
struct SecurePostfix {
    common_mac: [u8; CRYPTO_HMAC_SIZE],
    receiver_macs: Vec<(u32, [u8; CRYPTO_HMAC_SIZE])>,
}

impl SecurePostfix {
    fn body_len(n_receivers: usize) -> usize {
        POSTFIX_BASE_LEN + n_receivers * RECEIVER_MAC_LEN
    }

    fn write_body(&self, w: &mut TrustedWriter) {
        w.put_bytes(&self.common_mac);
        w.put_u32_be(self.receiver_macs.len() as u32);
        for (key_id, mac) in &self.receiver_macs {
            w.put_u32_be(*key_id);
            w.put_bytes(mac);
        }
    }

    fn read_body(r: &mut TaintedReader<'_>, body_len: usize) -> SecResult<SecurePostfix> {
        let err = |e| SecurityError::invalid_argument(format!("secure postfix: {e}"));
        let common_mac = r.read_array::<CRYPTO_HMAC_SIZE>().map_err(err)?;
        let n = r.read_u32_be().map_err(err)? as usize;
        if Self::body_len(n) != body_len {
            return Err(SecurityError::invalid_argument(format!(
                "postfix claims {n} receiver macs in a {body_len}-byte body"
            )));
        }
        let mut receiver_macs = Vec::with_capacity(n.min(64));
        for _ in 0..n {
            let key_id = r.read_u32_be().map_err(err)?;
            let mac = r.read_array::<CRYPTO_HMAC_SIZE>().map_err(err)?;
            receiver_macs.push((key_id, mac));
        }
        Ok(SecurePostfix {
            common_mac,
            receiver_macs,
        })
    }
}

enum SecureBody {
    /// SEC_BODY ciphertext.
    Encrypted(Vec<u8>),
    /// The protected submessages in the clear (GMAC kinds).
    Plain(Vec<u8>),
}

struct SplitSubmsg {
    prefix: SecurePrefix,
    body: SecureBody,
    postfix: SecurePostfix,
}

/// Split an encoded secure submessage (or SRTPS message tail) into its
/// three parts, with every read bounds-checked.
fn split_secure(input: &[u8], prefix_id: u8, postfix_id: u8) -> SecResult<SplitSubmsg> {
    let r = &mut TaintedReader::new(input);
    let h = SubmessageHeader::read(r)?;
    if h.id != prefix_id {
        return Err(SecurityError::invalid_argument(format!(
            "expected secure prefix submessage, found id {:#04x}",
            h.id
        )));
    }
    if usize::from(h.octets_to_next) != PREFIX_BODY_LEN {
        return Err(SecurityError::invalid_argument(format!(
            "secure prefix length {} is invalid",
            h.octets_to_next
        )));
    }
    let prefix = SecurePrefix::read_body(r)?;

    let mut encrypted: Option<Vec<u8>> = None;
    let mut plain: Vec<u8> = Vec::new();
    loop {
        let start = r.position();
        let h = SubmessageHeader::read(r)?;
        let body_len = usize::from(h.octets_to_next);
        if h.id == postfix_id {
            let postfix = SecurePostfix::read_body(r, body_len)?;
            if !r.is_empty() {
                return Err(SecurityError::invalid_argument(format!(
                    "{} trailing bytes after secure postfix",
                    r.remaining()
                )));
            }
            let body = match encrypted {
                Some(ct) if plain.is_empty() => SecureBody::Encrypted(ct),
                None if !plain.is_empty() => SecureBody::Plain(plain),
                _ => {
                    return Err(SecurityError::invalid_argument(
                        "secure submessage carries no protected body",
                    ))
                }
            };
            return Ok(SplitSubmsg {
                prefix,
                body,
                postfix,
            });
        } else if h.id == SMID_SEC_BODY {
            if encrypted.is_some() || !plain.is_empty() {
                return Err(SecurityError::invalid_argument(
                    "more than one protected body",
                ));
            }
            let body = r.read_bytes(body_len).map_err(|e| {
                SecurityError::invalid_argument(format!("secure body: {e}"))
            })?;
            let mut br = TaintedReader::new(body);
            let ct_len = br
                .read_u32_be()
                .map_err(|e| SecurityError::invalid_argument(format!("secure body: {e}")))?
                as usize;
            if ct_len > br.remaining() {
                return Err(SecurityError::invalid_argument(format!(
                    "ciphertext length {ct_len} exceeds the secure body"
                )));
            }
            encrypted = Some(br.read_bytes(ct_len).expect("checked").to_vec());
        } else {
            if encrypted.is_some() {
                return Err(SecurityError::invalid_argument(
                    "plaintext submessage after encrypted body",
                ));
            }
            // an authenticated-only submessage travels in the clear
            r.skip(body_len).expect("length checked by header read");
            plain.extend_from_slice(&input[start..r.position()]);
        }
    }
}

// ---------------------------------------------------------------------------
// transform
// ---------------------------------------------------------------------------

/// Classification of a secure submessage from its prefix alone.
#[derive(Clone, Copy, Debug)]
pub struct PreprocessResult {
    pub category: SecureSubmsgCategory,
    pub local_handle: CryptoHandle,
    pub remote_handle: CryptoHandle,
    pub kind: TransformKind,
}

/// Stateless en/decoder over a [`KeyStore`] (per-session IV counters live
/// in the store's session key material).
pub struct CryptoTransform {
    store: Arc<KeyStore>,
}

impl CryptoTransform {
    #[must_use]
    pub fn new(store: Arc<KeyStore>) -> CryptoTransform {
        CryptoTransform { store }
    }

    #[must_use]
    pub fn store(&self) -> &Arc<KeyStore> {
        &self.store
    }

    // -- payload ------------------------------------------------------------

    /// Encode a serialized payload from `writer`. The payload length must
    /// be a multiple of 4 (CDR padding). Without payload protection the
    /// output is a copy of the input.
    pub fn encode_serialized_payload(
        &self,
        writer: CryptoHandle,
        plaintext: &[u8],
    ) -> SecResult<Vec<u8>> {
        if plaintext.is_empty() || plaintext.len() % 4 != 0 {
            return Err(SecurityError::invalid_argument(
                "payload length must be a non-zero multiple of 4",
            ));
        }
        let Some(keys) = self.store.writer_payload_encode_keys(writer, plaintext.len())? else {
            return Ok(plaintext.to_vec());
        };

        let prefix = SecurePrefix {
            kind: keys.kind,
            transform_id: keys.transform_id,
            session_id: keys.session_id,
            iv_suffix: keys.iv_suffix,
        };
        let mut w = TrustedWriter::with_capacity(
            PREFIX_BODY_LEN + 4 + plaintext.len() + POSTFIX_BASE_LEN,
        );
        prefix.write_body(&mut w);

        let common_mac = if keys.kind.is_encrypting() {
            let (ct, mac) =
                gcm_encrypt(keys.kind, &keys.key, keys.session_id, keys.iv_suffix, plaintext)?;
            w.put_u32_be(ct.len() as u32);
            w.put_bytes(&ct);
            mac
        } else {
            let mac =
                gmac_compute(keys.kind, &keys.key, keys.session_id, keys.iv_suffix, plaintext)?;
            w.put_bytes(plaintext);
            mac
        };

        SecurePostfix {
            common_mac,
            receiver_macs: Vec::new(),
        }
        .write_body(&mut w);
        Ok(w.into_vec())
    }

    /// Decode a serialized payload received from `remote_writer`.
    pub fn decode_serialized_payload(
        &self,
        remote_writer: CryptoHandle,
        encoded: &[u8],
    ) -> SecResult<Vec<u8>> {
        let material = self.store.remote_writer_payload_material(remote_writer)?;
        let mut r = TaintedReader::new(encoded);
        let prefix = SecurePrefix::read_body(&mut r)?;
        check_kind(&prefix, &material)?;

        if encoded.len() < PREFIX_BODY_LEN + POSTFIX_BASE_LEN {
            return Err(SecurityError::invalid_argument("payload too short"));
        }
        let middle_len = encoded.len() - PREFIX_BODY_LEN - POSTFIX_BASE_LEN;
        let middle = r
            .read_bytes(middle_len)
            .map_err(|e| SecurityError::invalid_argument(format!("payload: {e}")))?;
        let common_mac = r
            .read_array::<CRYPTO_HMAC_SIZE>()
            .map_err(|e| SecurityError::invalid_argument(format!("payload footer: {e}")))?;
        let n_recv = r
            .read_u32_be()
            .map_err(|e| SecurityError::invalid_argument(format!("payload footer: {e}")))?;
        if n_recv != 0 {
            return Err(SecurityError::invalid_argument(
                "payload footer carries receiver macs",
            ));
        }

        let key = calculate_session_key(&material, prefix.session_id)?;
        if prefix.kind.is_encrypting() {
            let mut br = TaintedReader::new(middle);
            let ct_len = br
                .read_u32_be()
                .map_err(|e| SecurityError::invalid_argument(format!("payload body: {e}")))?
                as usize;
            if ct_len != br.remaining() {
                return Err(SecurityError::invalid_argument(format!(
                    "payload ciphertext length {ct_len} does not match body"
                )));
            }
            let ct = br.read_bytes(ct_len).expect("checked");
            gcm_decrypt(
                prefix.kind,
                &key,
                prefix.session_id,
                prefix.iv_suffix,
                ct,
                &common_mac,
            )
        } else {
            gmac_verify(
                prefix.kind,
                &key,
                prefix.session_id,
                prefix.iv_suffix,
                middle,
                &common_mac,
            )?;
            Ok(middle.to_vec())
        }
    }

    // -- submessages ---------------------------------------------------------

    /// Encode a datawriter submessage toward the given remote readers.
    /// Under origin authentication one `(key_id, mac)` pair is appended
    /// per receiver, in receiver order.
    pub fn encode_datawriter_submessage(
        &self,
        writer: CryptoHandle,
        receivers: &[CryptoHandle],
        plain_submsg: &[u8],
    ) -> SecResult<Vec<u8>> {
        let Some(keys) =
            self.store
                .writer_submsg_encode_keys(writer, receivers, plain_submsg.len())?
        else {
            return Ok(plain_submsg.to_vec());
        };
        encode_submessage(&keys, plain_submsg, SMID_SEC_PREFIX, SMID_SEC_POSTFIX)
    }

    /// Decode a datawriter submessage for `local_reader`.
    pub fn decode_datawriter_submessage(
        &self,
        local_reader: CryptoHandle,
        remote_writer: CryptoHandle,
        encoded: &[u8],
    ) -> SecResult<Vec<u8>> {
        let material = self.store.remote_writer_submsg_material(remote_writer)?;
        let expected = self.store.local_reader_protection(local_reader)?;
        decode_submessage(
            &material,
            expected,
            encoded,
            SMID_SEC_PREFIX,
            SMID_SEC_POSTFIX,
        )
    }

    /// Encode a datareader submessage (AckNack/NackFrag) from `reader`.
    pub fn encode_datareader_submessage(
        &self,
        reader: CryptoHandle,
        plain_submsg: &[u8],
    ) -> SecResult<Vec<u8>> {
        let Some(keys) = self.store.reader_submsg_encode_keys(reader, plain_submsg.len())? else {
            return Ok(plain_submsg.to_vec());
        };
        encode_submessage(&keys, plain_submsg, SMID_SEC_PREFIX, SMID_SEC_POSTFIX)
    }

    /// Decode a datareader submessage for `local_writer`.
    pub fn decode_datareader_submessage(
        &self,
        local_writer: CryptoHandle,
        remote_reader: CryptoHandle,
        encoded: &[u8],
    ) -> SecResult<Vec<u8>> {
        let material = self.store.remote_reader_material(remote_reader)?;
        let expected = self.store.local_writer_protection(local_writer)?;
        decode_submessage(
            &material,
            expected,
            encoded,
            SMID_SEC_PREFIX,
            SMID_SEC_POSTFIX,
        )
    }

    /// Inspect only the prefix of a secure submessage and classify it, so
    /// the caller can dispatch to the right decode variant.
    pub fn preprocess_secure_submsg(&self, encoded: &[u8]) -> SecResult<PreprocessResult> {
        let mut r = TaintedReader::new(encoded);
        let h = SubmessageHeader::read(&mut r)?;
        if h.id != SMID_SEC_PREFIX {
            return Err(SecurityError::invalid_argument(format!(
                "not a secure submessage (id {:#04x})",
                h.id
            )));
        }
        let prefix = SecurePrefix::read_body(&mut r)?;
        let lookup = self.store.lookup_remote_sender(prefix.transform_id)?;
        if lookup.material.transformation_kind != prefix.kind {
            return Err(SecurityError::invalid_argument(
                "prefix transformation kind contradicts installed key material",
            ));
        }
        Ok(PreprocessResult {
            category: lookup.category,
            local_handle: lookup.local_handle,
            remote_handle: lookup.remote_handle,
            kind: prefix.kind,
        })
    }

    // -- whole RTPS messages -------------------------------------------------

    /// Encode a whole RTPS message from `participant` toward the given
    /// remote participants. A synthetic INFO_SRC carrying the original
    /// header is protected along with the submessages.
    pub fn encode_rtps_message(
        &self,
        participant: CryptoHandle,
        receivers: &[CryptoHandle],
        message: &[u8],
    ) -> SecResult<Vec<u8>> {
        let Some(keys) = self.store.rtps_encode_keys(participant, receivers, message.len())?
        else {
            return Ok(message.to_vec());
        };

        let mut r = TaintedReader::new(message);
        let header = RtpsHeader::read(&mut r)?;
        let submessages = &message[RTPS_HEADER_SIZE..];

        // protected body: INFO_SRC followed by the original submessages
        let mut body = TrustedWriter::with_capacity(24 + submessages.len());
        InfoSrc::from_header(&header).write_submessage(&mut body);
        body.put_bytes(submessages);
        let plaintext = body.into_vec();

        let mut out = TrustedWriter::with_capacity(message.len() + 128);
        header.write(&mut out);
        let framed =
            encode_submessage(&keys, &plaintext, SMID_SRTPS_PREFIX, SMID_SRTPS_POSTFIX)?;
        out.put_bytes(&framed);
        Ok(out.into_vec())
    }

    /// Decode a whole RTPS message received from `remote_participant`,
    /// re-presenting it as sent by the original source.
    pub fn decode_rtps_message(
        &self,
        local_participant: CryptoHandle,
        remote_participant: CryptoHandle,
        encoded: &[u8],
    ) -> SecResult<Vec<u8>> {
        let material = self.store.remote_participant_material(remote_participant)?;
        let expected = self.store.local_participant_protection(local_participant)?;

        let mut r = TaintedReader::new(encoded);
        let _outer = RtpsHeader::read(&mut r)?;
        let plaintext = decode_split(
            &material,
            expected,
            split_secure(
                &encoded[RTPS_HEADER_SIZE..],
                SMID_SRTPS_PREFIX,
                SMID_SRTPS_POSTFIX,
            )?,
        )?;

        // strip the inner INFO_SRC and rebuild the original header from it
        let mut pr = TaintedReader::new(&plaintext);
        let h = SubmessageHeader::read(&mut pr)
            .map_err(|_| SecurityError::invalid_argument("protected body truncated"))?;
        if h.id != SMID_INFO_SRC || h.octets_to_next != InfoSrc::BODY_LEN {
            return Err(SecurityError::invalid_argument(
                "protected body does not start with INFO_SRC",
            ));
        }
        let info = InfoSrc::read_body(&mut pr)?;

        let mut out = TrustedWriter::with_capacity(RTPS_HEADER_SIZE + pr.remaining());
        info.to_header().write(&mut out);
        out.put_bytes(pr.read_bytes(pr.remaining()).expect("remaining"));
        Ok(out.into_vec())
    }
}

fn check_kind(prefix: &SecurePrefix, material: &MasterKeyMaterial) -> SecResult<()> {
    if prefix.kind != material.transformation_kind {
        return Err(SecurityError::invalid_argument(
            "transformation kind contradicts installed key material",
        ));
    }
    if prefix.transform_id != material.sender_key_id {
        return Err(SecurityError::invalid_argument(
            "transformation id contradicts installed key material",
        ));
    }
    Ok(())
}

/// Shared encode procedure for submessages and SRTPS bodies.
fn encode_submessage(
    keys: &EncodeKeys,
    plaintext: &[u8],
    prefix_id: u8,
    postfix_id: u8,
) -> SecResult<Vec<u8>> {
    if plaintext.is_empty() || plaintext.len() % 4 != 0 {
        return Err(SecurityError::invalid_argument(
            "protected submessage length must be a non-zero multiple of 4",
        ));
    }
    if plaintext.len() > usize::from(u16::MAX) - 64 {
        return Err(SecurityError::invalid_argument(
            "protected submessage exceeds the submessage length field",
        ));
    }
    let mut w = TrustedWriter::with_capacity(
        plaintext.len() + 2 * PREFIX_BODY_LEN + SecurePostfix::body_len(keys.receiver_keys.len()),
    );

    SubmessageHeader::write(&mut w, prefix_id, PREFIX_BODY_LEN as u16);
    SecurePrefix {
        kind: keys.kind,
        transform_id: keys.transform_id,
        session_id: keys.session_id,
        iv_suffix: keys.iv_suffix,
    }
    .write_body(&mut w);

    let common_mac = if keys.kind.is_encrypting() {
        let (ct, mac) =
            gcm_encrypt(keys.kind, &keys.key, keys.session_id, keys.iv_suffix, plaintext)?;
        let padded = (4 + ct.len() + 3) & !3;
        SubmessageHeader::write(&mut w, SMID_SEC_BODY, padded as u16);
        w.put_u32_be(ct.len() as u32);
        w.put_bytes(&ct);
        for _ in 0..padded - 4 - ct.len() {
            w.put_u8(0);
        }
        mac
    } else {
        let mac = gmac_compute(keys.kind, &keys.key, keys.session_id, keys.iv_suffix, plaintext)?;
        w.put_bytes(plaintext);
        mac
    };

    // postfix, with receiver macs appended one pair per iteration
    SubmessageHeader::write(
        &mut w,
        postfix_id,
        SecurePostfix::body_len(keys.receiver_keys.len()) as u16,
    );
    w.put_bytes(&common_mac);
    w.put_u32_be(keys.receiver_keys.len() as u32);
    for (key_id, receiver_key) in &keys.receiver_keys {
        let mac = gmac_compute(
            keys.kind,
            receiver_key,
            keys.session_id,
            keys.iv_suffix,
            &common_mac,
        )?;
        w.put_u32_be(*key_id);
        w.put_bytes(&mac);
    }
    Ok(w.into_vec())
}

/// Shared decode procedure: framing already split, keys not yet touched.
fn decode_split(
    material: &Arc<MasterKeyMaterial>,
    expected: ProtectionKind,
    split: SplitSubmsg,
) -> SecResult<Vec<u8>> {
    check_kind(&split.prefix, material)?;

    // a kind that contradicts the receiver's policy is refused before any
    // cryptography happens
    if expected.expects_encryption() && !split.prefix.kind.is_encrypting() {
        return Err(SecurityError::new(
            SecErrorKind::NotAllowedBySecurity,
            "policy requires encryption but the body is not encrypted",
        ));
    }
    if expected.expects_authentication_only() && split.prefix.kind.is_encrypting() {
        return Err(SecurityError::new(
            SecErrorKind::NotAllowedBySecurity,
            "policy requires sign-only protection but the body is encrypted",
        ));
    }

    // receiver-specific mac, when our installed material carries one
    if material.receiver_specific_key_id != 0 {
        let (_, mac) = split
            .postfix
            .receiver_macs
            .iter()
            .find(|(id, _)| *id == material.receiver_specific_key_id)
            .ok_or_else(|| {
                SecurityError::invalid_receiver_sign("no receiver-specific mac for this reader")
            })?;
        let key = calculate_receiver_specific_key(material, split.prefix.session_id)?;
        let expect = gmac_compute(
            split.prefix.kind,
            &key,
            split.prefix.session_id,
            split.prefix.iv_suffix,
            &split.postfix.common_mac,
        )?;
        constant_time::verify_slices_are_equal(&expect, mac).map_err(|_| {
            SecurityError::invalid_receiver_sign("receiver-specific mac mismatch")
        })?;
    }

    let key = calculate_session_key(material, split.prefix.session_id)?;
    match split.body {
        SecureBody::Encrypted(ct) => gcm_decrypt(
            split.prefix.kind,
            &key,
            split.prefix.session_id,
            split.prefix.iv_suffix,
            &ct,
            &split.postfix.common_mac,
        ),
        SecureBody::Plain(p) => {
            gmac_verify(
                split.prefix.kind,
                &key,
                split.prefix.session_id,
                split.prefix.iv_suffix,
                &p,
                &split.postfix.common_mac,
            )?;
            Ok(p)
        }
    }
}

fn decode_submessage(
    material: &Arc<MasterKeyMaterial>,
    expected: ProtectionKind,
    encoded: &[u8],
    prefix_id: u8,
    postfix_id: u8,
) -> SecResult<Vec<u8>> {
    let split = split_secure(encoded, prefix_id, postfix_id)?;
    decode_split(material, expected, split)
}

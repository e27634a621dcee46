// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ldds contributors

//! Key material store: master and session keys for every protected
//! participant and endpoint pair.
//!
//! Master key material is generated at registration (sender side) or
//! installed from key-exchange tokens (receiver side). Session keys are
//! derived on demand:
//!
//! ```text
//! session_key          = HMAC-SHA256(master_key, "SessionKey"         ‖ salt ‖ BE32(session_id))
//! receiver_session_key = HMAC-SHA256(master_recv_key, "SessionReceiverKey" ‖ salt ‖ BE32(session_id))
//! ```
//!
//! truncated to the transformation's key size. Sessions rotate when the
//! encrypted-block budget is spent: the session id increments, a new key
//! is derived, and the IV suffix restarts from a fresh random value.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use ring::hmac;
use ring::rand::{SecureRandom, SystemRandom};
use zeroize::Zeroize;

use crate::security::error::{SecResult, SecurityError};
use crate::security::types::{
    BasicProtectionKind, CryptoHandle, ProtectionKind, SecureSubmsgCategory, TransformKind,
};

/// Authentication tag length (bytes) for both common and receiver macs.
pub const CRYPTO_HMAC_SIZE: usize = 16;
/// AES block size; the unit of the session rekey budget.
pub const CRYPTO_CIPHER_BLOCK_SIZE: usize = 16;
/// Blocks a session key may encrypt before rotation.
pub const DEFAULT_MAX_BLOCKS_PER_SESSION: u64 = 1 << 20;

// ---------------------------------------------------------------------------
// master key material
// ---------------------------------------------------------------------------

/// Long-lived key material for one sender (plus, optionally, one
/// receiver-specific key for origin authentication).
#[derive(Clone)]
pub struct MasterKeyMaterial {
    pub transformation_kind: TransformKind,
    pub master_salt: Vec<u8>,
    pub sender_key_id: u32,
    pub master_sender_key: Vec<u8>,
    /// Zero when no receiver-specific key is attached.
    pub receiver_specific_key_id: u32,
    pub master_receiver_specific_key: Vec<u8>,
}

impl Drop for MasterKeyMaterial {
    fn drop(&mut self) {
        self.master_salt.zeroize();
        self.master_sender_key.zeroize();
        self.master_receiver_specific_key.zeroize();
    }
}

impl MasterKeyMaterial {
    /// Generate fresh random material for a sender.
    pub fn generate(kind: TransformKind, sender_key_id: u32) -> SecResult<MasterKeyMaterial> {
        let n = kind.key_bytes();
        Ok(MasterKeyMaterial {
            transformation_kind: kind,
            master_salt: random_bytes(n)?,
            sender_key_id,
            master_sender_key: random_bytes(n)?,
            receiver_specific_key_id: 0,
            master_receiver_specific_key: Vec::new(),
        })
    }

    /// Copy of this material with a fresh receiver-specific key attached.
    pub fn with_receiver_specific(&self, key_id: u32) -> SecResult<MasterKeyMaterial> {
        let mut out = self.clone();
        out.receiver_specific_key_id = key_id;
        out.master_receiver_specific_key = random_bytes(self.transformation_kind.key_bytes())?;
        Ok(out)
    }
}

fn random_bytes(n: usize) -> SecResult<Vec<u8>> {
    let mut out = vec![0u8; n];
    SystemRandom::new()
        .fill(&mut out)
        .map_err(|_| SecurityError::cipher("system randomness unavailable"))?;
    Ok(out)
}

fn random_u32() -> SecResult<u32> {
    let b = random_bytes(4)?;
    Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
}

fn random_u64() -> SecResult<u64> {
    let b = random_bytes(8)?;
    let mut a = [0u8; 8];
    a.copy_from_slice(&b);
    Ok(u64::from_be_bytes(a))
}

// ---------------------------------------------------------------------------
// session keys
// ---------------------------------------------------------------------------

/// A derived symmetric key; zeroized on drop.
#[derive(Clone)]
pub struct SessionKey {
    bytes: [u8; 32],
    len: usize,
}

impl SessionKey {
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes[..self.len]
    }
}

impl Drop for SessionKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

fn derive_key(
    prefix: &[u8],
    master_key: &[u8],
    master_salt: &[u8],
    session_id: u32,
    key_bytes: usize,
) -> SecResult<SessionKey> {
    if master_key.is_empty() || key_bytes == 0 {
        return Err(SecurityError::invalid_argument(
            "key derivation requires non-empty master key",
        ));
    }
    let mut data = Vec::with_capacity(prefix.len() + master_salt.len() + 4);
    data.extend_from_slice(prefix);
    data.extend_from_slice(master_salt);
    data.extend_from_slice(&session_id.to_be_bytes());
    let key = hmac::Key::new(hmac::HMAC_SHA256, master_key);
    let tag = hmac::sign(&key, &data);
    let mut bytes = [0u8; 32];
    bytes[..key_bytes].copy_from_slice(&tag.as_ref()[..key_bytes]);
    Ok(SessionKey {
        bytes,
        len: key_bytes,
    })
}

/// Sender session key for `session_id`.
pub fn calculate_session_key(
    material: &MasterKeyMaterial,
    session_id: u32,
) -> SecResult<SessionKey> {
    derive_key(
        b"SessionKey",
        &material.master_sender_key,
        &material.master_salt,
        session_id,
        material.transformation_kind.key_bytes(),
    )
}

/// Receiver-specific session key for `session_id`.
pub fn calculate_receiver_specific_key(
    material: &MasterKeyMaterial,
    session_id: u32,
) -> SecResult<SessionKey> {
    derive_key(
        b"SessionReceiverKey",
        &material.master_receiver_specific_key,
        &material.master_salt,
        session_id,
        material.transformation_kind.key_bytes(),
    )
}

/// Per-sender mutable session state: current id, derived key, IV suffix,
/// and the block budget that triggers rotation.
pub struct SessionKeyMaterial {
    master: Arc<MasterKeyMaterial>,
    session_id: u32,
    key: SessionKey,
    init_vector_suffix: u64,
    block_counter: u64,
    max_blocks: u64,
}

impl SessionKeyMaterial {
    pub fn new(master: Arc<MasterKeyMaterial>, max_blocks: u64) -> SecResult<SessionKeyMaterial> {
        let session_id = random_u32()?;
        let key = calculate_session_key(&master, session_id)?;
        Ok(SessionKeyMaterial {
            master,
            session_id,
            key,
            init_vector_suffix: random_u64()?,
            block_counter: 0,
            max_blocks,
        })
    }

    #[must_use]
    pub fn master(&self) -> &Arc<MasterKeyMaterial> {
        &self.master
    }

    #[must_use]
    pub fn session_id(&self) -> u32 {
        self.session_id
    }

    /// Account `payload_len` bytes; rotate the session first if the
    /// budget would be exceeded. Returns true when a rekey happened.
    pub fn update_for(&mut self, payload_len: usize) -> SecResult<bool> {
        let blocks = (payload_len.div_ceil(CRYPTO_CIPHER_BLOCK_SIZE)) as u64;
        if self.block_counter.saturating_add(blocks) <= self.max_blocks {
            self.block_counter += blocks;
            return Ok(false);
        }
        // session ids only move forward
        self.session_id = self.session_id.wrapping_add(1);
        self.key = calculate_session_key(&self.master, self.session_id)?;
        self.init_vector_suffix = random_u64()?;
        self.block_counter = blocks;
        log::debug!(
            "[crypto] rekey sender key id {} -> session {}",
            self.master.sender_key_id,
            self.session_id
        );
        Ok(true)
    }

    /// Advance and return the IV suffix; strictly increasing within one
    /// session.
    pub fn next_iv_suffix(&mut self) -> u64 {
        self.init_vector_suffix = self.init_vector_suffix.wrapping_add(1);
        self.init_vector_suffix
    }

    #[must_use]
    pub fn key(&self) -> &SessionKey {
        &self.key
    }
}

// ---------------------------------------------------------------------------
// store
// ---------------------------------------------------------------------------

/// Everything the transform needs to encode one protected unit.
pub struct EncodeKeys {
    pub kind: TransformKind,
    pub transform_id: u32,
    pub session_id: u32,
    pub iv_suffix: u64,
    pub key: SessionKey,
    /// `(key_id, derived receiver session key)` per receiver requiring
    /// origin authentication, in caller-supplied receiver order.
    pub receiver_keys: Vec<(u32, SessionKey)>,
}

/// Result of resolving a secure prefix's `transform_id` on the receive
/// side.
pub struct SenderLookup {
    pub category: SecureSubmsgCategory,
    pub local_handle: CryptoHandle,
    pub remote_handle: CryptoHandle,
    pub material: Arc<MasterKeyMaterial>,
    pub expected_protection: ProtectionKind,
}

struct LocalParticipant {
    protection: ProtectionKind,
    use_256: bool,
    /// RTPS-level sender material, shared across every matched peer.
    material: Option<Arc<MasterKeyMaterial>>,
    session: Option<Mutex<SessionKeyMaterial>>,
}

struct RemoteParticipant {
    local: CryptoHandle,
    /// The participant material specialized with this peer's
    /// receiver-specific key; what this peer's tokens will carry.
    local_p2p: Option<Arc<MasterKeyMaterial>>,
    /// What the peer sends us, installed from their tokens.
    remote_material: Mutex<Option<Arc<MasterKeyMaterial>>>,
}

struct LocalWriter {
    participant: CryptoHandle,
    submsg_protection: ProtectionKind,
    payload_protection: BasicProtectionKind,
    submsg_material: Option<Arc<MasterKeyMaterial>>,
    submsg_session: Option<Mutex<SessionKeyMaterial>>,
    payload_material: Option<Arc<MasterKeyMaterial>>,
    payload_session: Option<Mutex<SessionKeyMaterial>>,
}

struct LocalReader {
    participant: CryptoHandle,
    submsg_protection: ProtectionKind,
    submsg_material: Option<Arc<MasterKeyMaterial>>,
    submsg_session: Option<Mutex<SessionKeyMaterial>>,
}

struct RemoteReader {
    local_writer: CryptoHandle,
    /// Our writer's material specialized with this reader's
    /// receiver-specific key (origin authentication only).
    writer_material_for_reader: Option<Arc<MasterKeyMaterial>>,
    /// The peer reader's own sending material, from their tokens.
    remote_material: Mutex<Option<Arc<MasterKeyMaterial>>>,
}

struct RemoteWriter {
    local_reader: CryptoHandle,
    /// The peer writer's submessage material, from their tokens.
    remote_submsg_material: Mutex<Option<Arc<MasterKeyMaterial>>>,
    /// The peer writer's payload material (may equal the submessage one).
    remote_payload_material: Mutex<Option<Arc<MasterKeyMaterial>>>,
}

struct StoreState {
    next_handle: CryptoHandle,
    next_key_id: u32,
    participants: HashMap<CryptoHandle, LocalParticipant>,
    remote_participants: HashMap<CryptoHandle, RemoteParticipant>,
    writers: HashMap<CryptoHandle, LocalWriter>,
    readers: HashMap<CryptoHandle, LocalReader>,
    remote_readers: HashMap<CryptoHandle, RemoteReader>,
    remote_writers: HashMap<CryptoHandle, RemoteWriter>,
}

/// Per-participant key material registry.
pub struct KeyStore {
    state: RwLock<StoreState>,
    max_blocks: u64,
}

impl Default for KeyStore {
    fn default() -> Self {
        KeyStore::new()
    }
}

impl KeyStore {
    #[must_use]
    pub fn new() -> KeyStore {
        KeyStore::with_max_blocks(DEFAULT_MAX_BLOCKS_PER_SESSION)
    }

    /// Override the session rekey budget (test hooks, constrained links).
    #[must_use]
    pub fn with_max_blocks(max_blocks: u64) -> KeyStore {
        KeyStore {
            state: RwLock::new(StoreState {
                next_handle: 1,
                next_key_id: 1,
                participants: HashMap::new(),
                remote_participants: HashMap::new(),
                writers: HashMap::new(),
                readers: HashMap::new(),
                remote_readers: HashMap::new(),
                remote_writers: HashMap::new(),
            }),
            max_blocks,
        }
    }

    /// Register a local participant; its protection governs RTPS-message
    /// encoding toward every matched peer. `use_256` selects AES-256.
    pub fn register_local_participant(
        &self,
        protection: ProtectionKind,
        use_256: bool,
    ) -> SecResult<CryptoHandle> {
        let mut st = self.state.write();
        let kind = protection.transformation(use_256);
        let (material, session) = if kind == TransformKind::None {
            (None, None)
        } else {
            let id = st.alloc_key_id();
            let m = Arc::new(MasterKeyMaterial::generate(kind, id)?);
            let s = SessionKeyMaterial::new(Arc::clone(&m), self.max_blocks)?;
            (Some(m), Some(Mutex::new(s)))
        };
        let handle = st.alloc_handle();
        st.participants.insert(
            handle,
            LocalParticipant {
                protection,
                use_256,
                material,
                session,
            },
        );
        Ok(handle)
    }

    /// Register a matched remote participant and mint the local-to-remote
    /// P2P key material this peer's tokens will carry.
    pub fn register_matched_remote_participant(
        &self,
        local: CryptoHandle,
    ) -> SecResult<CryptoHandle> {
        let mut st = self.state.write();
        let lp = st
            .participants
            .get(&local)
            .ok_or_else(|| SecurityError::not_found(format!("local participant {local}")))?;
        let origin_auth = lp.protection.has_origin_authentication();
        let base = lp.material.clone();

        let local_p2p = match base {
            None => None,
            Some(base) if origin_auth => {
                let rk = st.alloc_key_id();
                Some(Arc::new(base.with_receiver_specific(rk)?))
            }
            Some(base) => Some(base),
        };

        let handle = st.alloc_handle();
        st.remote_participants.insert(
            handle,
            RemoteParticipant {
                local,
                local_p2p,
                remote_material: Mutex::new(None),
            },
        );
        Ok(handle)
    }

    /// Register a local writer under `participant`.
    pub fn register_local_writer(
        &self,
        participant: CryptoHandle,
        submsg_protection: ProtectionKind,
        payload_protection: BasicProtectionKind,
    ) -> SecResult<CryptoHandle> {
        let mut st = self.state.write();
        let use_256 = st
            .participants
            .get(&participant)
            .ok_or_else(|| SecurityError::not_found(format!("local participant {participant}")))?
            .use_256;

        let submsg_kind = submsg_protection.transformation(use_256);
        let (submsg_material, submsg_session) = if submsg_kind == TransformKind::None {
            (None, None)
        } else {
            let id = st.alloc_key_id();
            let m = Arc::new(MasterKeyMaterial::generate(submsg_kind, id)?);
            let s = SessionKeyMaterial::new(Arc::clone(&m), self.max_blocks)?;
            (Some(m), Some(Mutex::new(s)))
        };

        let payload_kind = payload_protection.transformation(use_256);
        let (payload_material, payload_session) = if payload_kind == TransformKind::None {
            (None, None)
        } else if payload_kind == submsg_kind {
            // one key serves both when the kinds agree
            let m = submsg_material.clone().expect("kind != NONE");
            let s = SessionKeyMaterial::new(Arc::clone(&m), self.max_blocks)?;
            (Some(m), Some(Mutex::new(s)))
        } else {
            let id = st.alloc_key_id();
            let m = Arc::new(MasterKeyMaterial::generate(payload_kind, id)?);
            let s = SessionKeyMaterial::new(Arc::clone(&m), self.max_blocks)?;
            (Some(m), Some(Mutex::new(s)))
        };

        let handle = st.alloc_handle();
        st.writers.insert(
            handle,
            LocalWriter {
                participant,
                submsg_protection,
                payload_protection,
                submsg_material,
                submsg_session,
                payload_material,
                payload_session,
            },
        );
        Ok(handle)
    }

    /// Register a local reader under `participant`.
    pub fn register_local_reader(
        &self,
        participant: CryptoHandle,
        submsg_protection: ProtectionKind,
    ) -> SecResult<CryptoHandle> {
        let mut st = self.state.write();
        let use_256 = st
            .participants
            .get(&participant)
            .ok_or_else(|| SecurityError::not_found(format!("local participant {participant}")))?
            .use_256;
        let kind = submsg_protection.transformation(use_256);
        let (material, session) = if kind == TransformKind::None {
            (None, None)
        } else {
            let id = st.alloc_key_id();
            let m = Arc::new(MasterKeyMaterial::generate(kind, id)?);
            let s = SessionKeyMaterial::new(Arc::clone(&m), self.max_blocks)?;
            (Some(m), Some(Mutex::new(s)))
        };
        let handle = st.alloc_handle();
        st.readers.insert(
            handle,
            LocalReader {
                participant,
                submsg_protection,
                submsg_material: material,
                submsg_session: session,
            },
        );
        Ok(handle)
    }

    /// Register a matched remote reader for `local_writer`. With origin
    /// authentication the writer's material is specialized with a fresh
    /// receiver-specific key for this reader.
    pub fn register_matched_remote_reader(
        &self,
        local_writer: CryptoHandle,
    ) -> SecResult<CryptoHandle> {
        let mut st = self.state.write();
        let writer = st
            .writers
            .get(&local_writer)
            .ok_or_else(|| SecurityError::not_found(format!("local writer {local_writer}")))?;
        let origin_auth = writer.submsg_protection.has_origin_authentication();
        let base = writer.submsg_material.clone();

        let material_for_reader = if origin_auth {
            let base = base.ok_or_else(|| {
                SecurityError::invalid_argument("origin authentication without key material")
            })?;
            let rk = st.alloc_key_id();
            Some(Arc::new(base.with_receiver_specific(rk)?))
        } else {
            base
        };

        let handle = st.alloc_handle();
        st.remote_readers.insert(
            handle,
            RemoteReader {
                local_writer,
                writer_material_for_reader: material_for_reader,
                remote_material: Mutex::new(None),
            },
        );
        Ok(handle)
    }

    /// Register a matched remote writer for `local_reader`.
    pub fn register_matched_remote_writer(
        &self,
        local_reader: CryptoHandle,
    ) -> SecResult<CryptoHandle> {
        let mut st = self.state.write();
        if !st.readers.contains_key(&local_reader) {
            return Err(SecurityError::not_found(format!(
                "local reader {local_reader}"
            )));
        }
        let handle = st.alloc_handle();
        st.remote_writers.insert(
            handle,
            RemoteWriter {
                local_reader,
                remote_submsg_material: Mutex::new(None),
                remote_payload_material: Mutex::new(None),
            },
        );
        Ok(handle)
    }

    // -- token plumbing (used by key_exchange) ------------------------------

    pub(crate) fn local_p2p_material(
        &self,
        remote_participant: CryptoHandle,
    ) -> SecResult<Option<Arc<MasterKeyMaterial>>> {
        let st = self.state.read();
        st.remote_participants
            .get(&remote_participant)
            .map(|rp| rp.local_p2p.clone())
            .ok_or_else(|| {
                SecurityError::not_found(format!("remote participant {remote_participant}"))
            })
    }

    pub(crate) fn writer_materials_for_reader(
        &self,
        remote_reader: CryptoHandle,
    ) -> SecResult<Vec<Arc<MasterKeyMaterial>>> {
        let st = self.state.read();
        let rr = st
            .remote_readers
            .get(&remote_reader)
            .ok_or_else(|| SecurityError::not_found(format!("remote reader {remote_reader}")))?;
        let writer = st
            .writers
            .get(&rr.local_writer)
            .ok_or_else(|| SecurityError::not_found("writer of remote reader".to_string()))?;
        let mut out = Vec::new();
        if let Some(m) = &rr.writer_material_for_reader {
            out.push(Arc::clone(m));
        }
        // a distinct payload key becomes a second token
        if let (Some(p), Some(s)) = (&writer.payload_material, &writer.submsg_material) {
            if p.sender_key_id != s.sender_key_id {
                out.push(Arc::clone(p));
            }
        } else if let Some(p) = &writer.payload_material {
            out.push(Arc::clone(p));
        }
        Ok(out)
    }

    pub(crate) fn reader_material(
        &self,
        local_reader: CryptoHandle,
    ) -> SecResult<Option<Arc<MasterKeyMaterial>>> {
        let st = self.state.read();
        st.readers
            .get(&local_reader)
            .map(|r| r.submsg_material.clone())
            .ok_or_else(|| SecurityError::not_found(format!("local reader {local_reader}")))
    }

    pub(crate) fn install_remote_participant_material(
        &self,
        remote_participant: CryptoHandle,
        material: MasterKeyMaterial,
    ) -> SecResult<()> {
        let st = self.state.read();
        let rp = st.remote_participants.get(&remote_participant).ok_or_else(|| {
            SecurityError::not_found(format!("remote participant {remote_participant}"))
        })?;
        *rp.remote_material.lock() = Some(Arc::new(material));
        Ok(())
    }

    pub(crate) fn install_remote_writer_materials(
        &self,
        remote_writer: CryptoHandle,
        materials: Vec<MasterKeyMaterial>,
    ) -> SecResult<()> {
        if materials.is_empty() || materials.len() > 2 {
            return Err(SecurityError::invalid_token(format!(
                "writer tokens must carry 1 or 2 key materials, got {}",
                materials.len()
            )));
        }
        let st = self.state.read();
        let rw = st
            .remote_writers
            .get(&remote_writer)
            .ok_or_else(|| SecurityError::not_found(format!("remote writer {remote_writer}")))?;
        let mut it = materials.into_iter();
        let first = Arc::new(it.next().expect("non-empty"));
        let second = it.next().map(Arc::new);
        *rw.remote_payload_material.lock() =
            Some(second.clone().unwrap_or_else(|| Arc::clone(&first)));
        *rw.remote_submsg_material.lock() = Some(first);
        Ok(())
    }

    pub(crate) fn install_remote_reader_material(
        &self,
        remote_reader: CryptoHandle,
        material: MasterKeyMaterial,
    ) -> SecResult<()> {
        let st = self.state.read();
        let rr = st
            .remote_readers
            .get(&remote_reader)
            .ok_or_else(|| SecurityError::not_found(format!("remote reader {remote_reader}")))?;
        *rr.remote_material.lock() = Some(Arc::new(material));
        Ok(())
    }

    // -- encode-side key access ---------------------------------------------

    /// Keys for encoding a serialized payload from `writer`. `None` when
    /// the payload is unprotected.
    pub fn writer_payload_encode_keys(
        &self,
        writer: CryptoHandle,
        payload_len: usize,
    ) -> SecResult<Option<EncodeKeys>> {
        let st = self.state.read();
        let w = st
            .writers
            .get(&writer)
            .ok_or_else(|| SecurityError::not_found(format!("local writer {writer}")))?;
        let (Some(material), Some(session)) = (&w.payload_material, &w.payload_session) else {
            return Ok(None);
        };
        let mut session = session.lock();
        session.update_for(payload_len)?;
        let iv_suffix = session.next_iv_suffix();
        Ok(Some(EncodeKeys {
            kind: material.transformation_kind,
            transform_id: material.sender_key_id,
            session_id: session.session_id(),
            iv_suffix,
            key: session.key().clone(),
            receiver_keys: Vec::new(),
        }))
    }

    /// Keys for encoding a datawriter submessage toward `receivers`
    /// (remote reader handles). Receiver-specific keys are derived only
    /// under origin authentication.
    pub fn writer_submsg_encode_keys(
        &self,
        writer: CryptoHandle,
        receivers: &[CryptoHandle],
        submsg_len: usize,
    ) -> SecResult<Option<EncodeKeys>> {
        let st = self.state.read();
        let w = st
            .writers
            .get(&writer)
            .ok_or_else(|| SecurityError::not_found(format!("local writer {writer}")))?;
        let (Some(_), Some(session)) = (&w.submsg_material, &w.submsg_session) else {
            return Ok(None);
        };
        let mut session = session.lock();
        session.update_for(submsg_len)?;
        let iv_suffix = session.next_iv_suffix();
        let session_id = session.session_id();
        let material = session.master();

        let mut receiver_keys = Vec::new();
        if w.submsg_protection.has_origin_authentication() {
            for &r in receivers {
                let rr = st
                    .remote_readers
                    .get(&r)
                    .ok_or_else(|| SecurityError::not_found(format!("remote reader {r}")))?;
                let m = rr.writer_material_for_reader.as_ref().ok_or_else(|| {
                    SecurityError::invalid_argument("remote reader lacks receiver-specific key")
                })?;
                receiver_keys.push((
                    m.receiver_specific_key_id,
                    calculate_receiver_specific_key(m, session_id)?,
                ));
            }
        }

        Ok(Some(EncodeKeys {
            kind: material.transformation_kind,
            transform_id: material.sender_key_id,
            session_id,
            iv_suffix,
            key: session.key().clone(),
            receiver_keys,
        }))
    }

    /// Keys for encoding a datareader submessage (AckNack/NackFrag) from
    /// `reader`. The reader-to-writer direction carries no
    /// receiver-specific macs.
    pub fn reader_submsg_encode_keys(
        &self,
        reader: CryptoHandle,
        submsg_len: usize,
    ) -> SecResult<Option<EncodeKeys>> {
        let st = self.state.read();
        let r = st
            .readers
            .get(&reader)
            .ok_or_else(|| SecurityError::not_found(format!("local reader {reader}")))?;
        let (Some(material), Some(session)) = (&r.submsg_material, &r.submsg_session) else {
            return Ok(None);
        };
        let mut session = session.lock();
        session.update_for(submsg_len)?;
        let iv_suffix = session.next_iv_suffix();
        Ok(Some(EncodeKeys {
            kind: material.transformation_kind,
            transform_id: material.sender_key_id,
            session_id: session.session_id(),
            iv_suffix,
            key: session.key().clone(),
            receiver_keys: Vec::new(),
        }))
    }

    /// Keys for encoding a whole RTPS message toward `receivers` (remote
    /// participant handles). The first receiver's session drives the
    /// transform; all receivers share the local P2P material.
    pub fn rtps_encode_keys(
        &self,
        local_participant: CryptoHandle,
        receivers: &[CryptoHandle],
        msg_len: usize,
    ) -> SecResult<Option<EncodeKeys>> {
        let st = self.state.read();
        let lp = st.participants.get(&local_participant).ok_or_else(|| {
            SecurityError::not_found(format!("local participant {local_participant}"))
        })?;
        let (Some(material), Some(session)) = (&lp.material, &lp.session) else {
            return Ok(None);
        };
        if receivers.is_empty() {
            return Err(SecurityError::invalid_argument(
                "rtps encoding requires at least one receiver",
            ));
        }
        let mut session = session.lock();
        session.update_for(msg_len)?;
        let iv_suffix = session.next_iv_suffix();
        let session_id = session.session_id();
        let key = session.key().clone();
        drop(session);

        let mut receiver_keys = Vec::new();
        if lp.protection.has_origin_authentication() {
            for &r in receivers {
                let rp = st
                    .remote_participants
                    .get(&r)
                    .ok_or_else(|| SecurityError::not_found(format!("remote participant {r}")))?;
                if rp.local != local_participant {
                    return Err(SecurityError::invalid_argument(
                        "receiver is not matched to this participant",
                    ));
                }
                let m = rp.local_p2p.as_ref().ok_or_else(|| {
                    SecurityError::invalid_argument("peer lacks receiver-specific key material")
                })?;
                receiver_keys.push((
                    m.receiver_specific_key_id,
                    calculate_receiver_specific_key(m, session_id)?,
                ));
            }
        }
        Ok(Some(EncodeKeys {
            kind: material.transformation_kind,
            transform_id: material.sender_key_id,
            session_id,
            iv_suffix,
            key,
            receiver_keys,
        }))
    }

    // -- decode-side key access ---------------------------------------------

    /// Resolve a secure submessage prefix's `transform_id` to the sending
    /// endpoint, for dispatching to the right decode variant.
    pub fn lookup_remote_sender(&self, transform_id: u32) -> SecResult<SenderLookup> {
        let st = self.state.read();
        for (&handle, rw) in &st.remote_writers {
            let m = rw.remote_submsg_material.lock();
            if let Some(m) = m.as_ref() {
                if m.sender_key_id == transform_id {
                    let expected = st
                        .readers
                        .get(&rw.local_reader)
                        .map(|r| r.submsg_protection)
                        .unwrap_or_default();
                    return Ok(SenderLookup {
                        category: SecureSubmsgCategory::DatawriterSubmessage,
                        local_handle: rw.local_reader,
                        remote_handle: handle,
                        material: Arc::clone(m),
                        expected_protection: expected,
                    });
                }
            }
        }
        for (&handle, rr) in &st.remote_readers {
            let m = rr.remote_material.lock();
            if let Some(m) = m.as_ref() {
                if m.sender_key_id == transform_id {
                    let expected = st
                        .writers
                        .get(&rr.local_writer)
                        .map(|w| w.submsg_protection)
                        .unwrap_or_default();
                    return Ok(SenderLookup {
                        category: SecureSubmsgCategory::DatareaderSubmessage,
                        local_handle: rr.local_writer,
                        remote_handle: handle,
                        material: Arc::clone(m),
                        expected_protection: expected,
                    });
                }
            }
        }
        Err(SecurityError::not_found(format!(
            "no remote endpoint with transform id {transform_id}"
        )))
    }

    /// The peer writer's submessage material, for submessage decoding.
    pub fn remote_writer_submsg_material(
        &self,
        remote_writer: CryptoHandle,
    ) -> SecResult<Arc<MasterKeyMaterial>> {
        let st = self.state.read();
        let rw = st
            .remote_writers
            .get(&remote_writer)
            .ok_or_else(|| SecurityError::not_found(format!("remote writer {remote_writer}")))?;
        let material = rw.remote_submsg_material.lock().clone();
        material.ok_or_else(|| SecurityError::not_found("remote writer submessage material".to_string()))
    }

    /// The peer reader's material, for AckNack/NackFrag decoding.
    pub fn remote_reader_material(
        &self,
        remote_reader: CryptoHandle,
    ) -> SecResult<Arc<MasterKeyMaterial>> {
        let st = self.state.read();
        let rr = st
            .remote_readers
            .get(&remote_reader)
            .ok_or_else(|| SecurityError::not_found(format!("remote reader {remote_reader}")))?;
        let material = rr.remote_material.lock().clone();
        material.ok_or_else(|| SecurityError::not_found("remote reader material".to_string()))
    }

    /// Protection configured on a local reader (decode policy check).
    pub fn local_reader_protection(&self, reader: CryptoHandle) -> SecResult<ProtectionKind> {
        let st = self.state.read();
        st.readers
            .get(&reader)
            .map(|r| r.submsg_protection)
            .ok_or_else(|| SecurityError::not_found(format!("local reader {reader}")))
    }

    /// Protection configured on a local writer (decode policy check).
    pub fn local_writer_protection(&self, writer: CryptoHandle) -> SecResult<ProtectionKind> {
        let st = self.state.read();
        st.writers
            .get(&writer)
            .map(|w| w.submsg_protection)
            .ok_or_else(|| SecurityError::not_found(format!("local writer {writer}")))
    }

    /// Protection configured on a local participant.
    pub fn local_participant_protection(
        &self,
        participant: CryptoHandle,
    ) -> SecResult<ProtectionKind> {
        let st = self.state.read();
        st.participants
            .get(&participant)
            .map(|p| p.protection)
            .ok_or_else(|| SecurityError::not_found(format!("local participant {participant}")))
    }

    /// The peer writer's payload material, for payload decoding.
    pub fn remote_writer_payload_material(
        &self,
        remote_writer: CryptoHandle,
    ) -> SecResult<Arc<MasterKeyMaterial>> {
        let st = self.state.read();
        let rw = st
            .remote_writers
            .get(&remote_writer)
            .ok_or_else(|| SecurityError::not_found(format!("remote writer {remote_writer}")))?;
        let material = rw.remote_payload_material.lock().clone();
        material.ok_or_else(|| SecurityError::not_found("remote writer payload material".to_string()))
    }

    /// The peer participant's RTPS material, for whole-message decoding.
    pub fn remote_participant_material(
        &self,
        remote_participant: CryptoHandle,
    ) -> SecResult<Arc<MasterKeyMaterial>> {
        let st = self.state.read();
        let rp = st.remote_participants.get(&remote_participant).ok_or_else(|| {
            SecurityError::not_found(format!("remote participant {remote_participant}"))
        })?;
        let material = rp.remote_material.lock().clone();
        material.ok_or_else(|| SecurityError::not_found("remote participant material".to_string()))
    }

    /// Find the remote participant whose installed material carries
    /// `transform_id` (SRTPS decode path).
    pub fn lookup_remote_participant_by_transform_id(
        &self,
        transform_id: u32,
    ) -> SecResult<(CryptoHandle, Arc<MasterKeyMaterial>)> {
        let st = self.state.read();
        for (&handle, rp) in &st.remote_participants {
            let m = rp.remote_material.lock();
            if let Some(m) = m.as_ref() {
                if m.sender_key_id == transform_id {
                    return Ok((handle, Arc::clone(m)));
                }
            }
        }
        Err(SecurityError::not_found(format!(
            "no remote participant with transform id {transform_id}"
        )))
    }
}

impl StoreState {
    fn alloc_handle(&mut self) -> CryptoHandle {
        let h = self.next_handle;
        self.next_handle += 1;
        h
    }

    fn alloc_key_id(&mut self) -> u32 {
        let id = self.next_key_id;
        self.next_key_id += 1;
        id
    }
}

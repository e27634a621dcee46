// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ldds contributors

//! Builtin AES-GCM-GMAC cryptographic plugin.
//!
//! Three pieces, mirroring the DDS-Security plugin split:
//!
//! - [`keys`]: master/session key material and the per-participant store
//! - [`transform`]: encode/decode of payloads, submessages, RTPS messages
//! - [`key_exchange`]: key material token serialization between peers

pub mod key_exchange;
pub mod keys;
pub mod transform;

pub use key_exchange::{
    create_local_participant_tokens, create_local_reader_tokens, create_local_writer_tokens,
    set_remote_participant_tokens, set_remote_reader_tokens, set_remote_writer_tokens,
};
pub use keys::{
    calculate_receiver_specific_key, calculate_session_key, KeyStore, MasterKeyMaterial,
    SessionKey, SessionKeyMaterial, CRYPTO_HMAC_SIZE, DEFAULT_MAX_BLOCKS_PER_SESSION,
};
pub use transform::{CryptoTransform, PreprocessResult};

// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ldds contributors

//! End-to-end secure transform scenarios across two participants'
//! key stores, with key material exchanged over real tokens.

use std::sync::Arc;

use ldds::security::crypto::{
    create_local_writer_tokens, set_remote_writer_tokens, CryptoTransform, KeyStore,
};
use ldds::security::{BasicProtectionKind, ProtectionKind, SecErrorKind, TransformKind};

const ALPHABET: &[u8; 28] = b"abcdefghijklmnopqrstuvwxyz01";

struct SecurePair {
    p1: CryptoTransform,
    p2: CryptoTransform,
    writer: u64,
    reader: u64,
    remote_readers: Vec<u64>,
    remote_writer: u64,
}

fn pair(protection: ProtectionKind, n_readers: usize) -> SecurePair {
    let s1 = Arc::new(KeyStore::new());
    let s2 = Arc::new(KeyStore::new());
    let part1 = s1
        .register_local_participant(ProtectionKind::None, true)
        .unwrap();
    let part2 = s2
        .register_local_participant(ProtectionKind::None, true)
        .unwrap();
    let writer = s1
        .register_local_writer(part1, protection, BasicProtectionKind::Encrypt)
        .unwrap();
    let reader = s2.register_local_reader(part2, protection).unwrap();
    let remote_writer = s2.register_matched_remote_writer(reader).unwrap();
    let mut remote_readers = Vec::new();
    for i in 0..n_readers {
        let rr = s1.register_matched_remote_reader(writer).unwrap();
        if i == 0 {
            let tokens = create_local_writer_tokens(&s1, rr).unwrap();
            set_remote_writer_tokens(&s2, remote_writer, &tokens).unwrap();
        }
        remote_readers.push(rr);
    }
    SecurePair {
        p1: CryptoTransform::new(s1),
        p2: CryptoTransform::new(s2),
        writer,
        reader,
        remote_readers,
        remote_writer,
    }
}

#[test]
fn gcm256_payload_roundtrip() {
    // a 256-bit key pair between P1 and P2; W encodes the alphabet, the
    // encoded form advertises AES256-GCM, carries a body of the payload
    // length, one common mac, and no receiver-specific macs; P2 recovers
    // the bytes exactly
    let p = pair(ProtectionKind::Encrypt, 1);
    let encoded = p.p1.encode_serialized_payload(p.writer, ALPHABET).unwrap();

    assert_eq!(
        u32::from_be_bytes(encoded[0..4].try_into().unwrap()),
        TransformKind::Aes256Gcm.to_wire()
    );
    // prefix(20) | length(4) | ciphertext | common mac(16) | count(4)
    assert_eq!(
        u32::from_be_bytes(encoded[20..24].try_into().unwrap()) as usize,
        ALPHABET.len()
    );
    assert_eq!(encoded.len(), 20 + 4 + ALPHABET.len() + 16 + 4);
    let n_recv = u32::from_be_bytes(encoded[encoded.len() - 4..].try_into().unwrap());
    assert_eq!(n_recv, 0);

    let decoded = p
        .p2
        .decode_serialized_payload(p.remote_writer, &encoded)
        .unwrap();
    assert_eq!(decoded, ALPHABET);
}

#[test]
fn origin_auth_three_receiver_macs() {
    // ENCRYPT_WITH_ORIGIN_AUTHENTICATION toward three readers: three
    // (key_id, mac) pairs follow the common mac, and the wired reader
    // verifies its own
    let p = pair(ProtectionKind::EncryptWithOriginAuthentication, 3);
    let mut submsg = vec![0x15u8, 0x00, 0x00, 0x1c]; // DATA header
    submsg.extend_from_slice(ALPHABET);

    let encoded = p
        .p1
        .encode_datawriter_submessage(p.writer, &p.remote_readers, &submsg)
        .unwrap();

    // count the receiver macs in the postfix: last 4 + n*20 bytes of the
    // postfix body follow the common mac
    let n = u32::from_be_bytes(
        encoded[encoded.len() - 3 * 20 - 4..encoded.len() - 3 * 20]
            .try_into()
            .unwrap(),
    );
    assert_eq!(n, 3);

    let decoded = p
        .p2
        .decode_datawriter_submessage(p.reader, p.remote_writer, &encoded)
        .unwrap();
    assert_eq!(decoded, submsg);
}

#[test]
fn tampering_any_section_fails_closed() {
    let p = pair(ProtectionKind::EncryptWithOriginAuthentication, 1);
    let mut submsg = vec![0x15u8, 0x00, 0x00, 0x1c];
    submsg.extend_from_slice(ALPHABET);
    let encoded = p
        .p1
        .encode_datawriter_submessage(p.writer, &p.remote_readers, &submsg)
        .unwrap();

    for at in 4..encoded.len() {
        let mut bad = encoded.clone();
        bad[at] ^= 0x01;
        match p
            .p2
            .decode_datawriter_submessage(p.reader, p.remote_writer, &bad)
        {
            Err(e) => assert!(
                matches!(
                    e.kind,
                    SecErrorKind::CipherError
                        | SecErrorKind::InvalidReceiverSign
                        | SecErrorKind::InvalidCryptoArgument
                        | SecErrorKind::NotFound
                        | SecErrorKind::NotAllowedBySecurity
                ),
                "byte {at}: unexpected error {e}"
            ),
            Ok(out) => panic!("tampered byte {at} still decoded to {} bytes", out.len()),
        }
    }
}

#[test]
fn wrong_reader_cannot_reuse_anothers_stream() {
    // a second receiver without installed key material cannot decode
    let p = pair(ProtectionKind::Encrypt, 1);
    let encoded = p.p1.encode_serialized_payload(p.writer, ALPHABET).unwrap();

    let other = Arc::new(KeyStore::new());
    let part = other
        .register_local_participant(ProtectionKind::None, true)
        .unwrap();
    let reader = other.register_local_reader(part, ProtectionKind::Encrypt).unwrap();
    let rw = other.register_matched_remote_writer(reader).unwrap();
    let eav = CryptoTransform::new(other);
    assert!(eav.decode_serialized_payload(rw, &encoded).is_err());
}

// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ldds contributors

//! RTPS 2.x submessage framing.
//!
//! Every submessage starts with `{ id: u8, flags: u8, octets_to_next: u16 }`
//! where flags bit 0 selects little-endian encoding for the length and the
//! submessage body. `octets_to_next` counts from the end of the header; a
//! value that is not a multiple of 4 is a framing error.

use crate::core::guid::{GuidPrefix, GUID_PREFIX_LEN};
use crate::core::ser::{TaintedReader, TrustedWriter};
use crate::security::error::{SecResult, SecurityError};

pub const SMID_PAD: u8 = 0x01;
pub const SMID_ACKNACK: u8 = 0x06;
pub const SMID_HEARTBEAT: u8 = 0x07;
pub const SMID_GAP: u8 = 0x08;
pub const SMID_INFO_TS: u8 = 0x09;
pub const SMID_INFO_SRC: u8 = 0x0c;
pub const SMID_INFO_DST: u8 = 0x0e;
pub const SMID_NACK_FRAG: u8 = 0x12;
pub const SMID_HEARTBEAT_FRAG: u8 = 0x13;
pub const SMID_DATA: u8 = 0x15;
pub const SMID_DATA_FRAG: u8 = 0x16;

pub const SMID_SEC_BODY: u8 = 0x30;
pub const SMID_SEC_PREFIX: u8 = 0x31;
pub const SMID_SEC_POSTFIX: u8 = 0x32;
pub const SMID_SRTPS_PREFIX: u8 = 0x33;
pub const SMID_SRTPS_POSTFIX: u8 = 0x34;

/// Flag bit 0: body and length are little-endian.
pub const FLAG_ENDIANNESS: u8 = 0x01;

/// Size of the fixed RTPS message header.
pub const RTPS_HEADER_SIZE: usize = 20;
/// Size of a submessage header.
pub const SUBMSG_HEADER_SIZE: usize = 4;

/// Parsed submessage header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubmessageHeader {
    pub id: u8,
    pub flags: u8,
    pub octets_to_next: u16,
}

impl SubmessageHeader {
    #[must_use]
    pub fn is_little_endian(&self) -> bool {
        self.flags & FLAG_ENDIANNESS != 0
    }

    /// Read a header and bounds-check the advertised length against the
    /// rest of the input.
    pub fn read(r: &mut TaintedReader<'_>) -> SecResult<SubmessageHeader> {
        let id = r
            .read_u8()
            .map_err(|e| SecurityError::invalid_argument(format!("submessage header: {e}")))?;
        let flags = r
            .read_u8()
            .map_err(|e| SecurityError::invalid_argument(format!("submessage header: {e}")))?;
        let octets_to_next = if flags & FLAG_ENDIANNESS != 0 {
            r.read_u16_le()
        } else {
            r.read_u16_be()
        }
        .map_err(|e| SecurityError::invalid_argument(format!("submessage header: {e}")))?;
        if octets_to_next % 4 != 0 {
            return Err(SecurityError::invalid_argument(format!(
                "submessage length {octets_to_next} is not a multiple of 4"
            )));
        }
        if usize::from(octets_to_next) > r.remaining() {
            return Err(SecurityError::invalid_argument(format!(
                "submessage length {octets_to_next} exceeds the remaining {} bytes",
                r.remaining()
            )));
        }
        Ok(SubmessageHeader {
            id,
            flags,
            octets_to_next,
        })
    }

    /// Write a big-endian header.
    pub fn write(w: &mut TrustedWriter, id: u8, octets_to_next: u16) {
        debug_assert!(octets_to_next % 4 == 0);
        w.put_u8(id);
        w.put_u8(0); // big-endian
        w.put_u16_be(octets_to_next);
    }
}

/// Parsed RTPS message header (`RTPS` magic, version, vendor, prefix).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RtpsHeader {
    pub version_major: u8,
    pub version_minor: u8,
    pub vendor_id: [u8; 2],
    pub guid_prefix: GuidPrefix,
}

impl RtpsHeader {
    pub fn read(r: &mut TaintedReader<'_>) -> SecResult<RtpsHeader> {
        let magic = r
            .read_array::<4>()
            .map_err(|e| SecurityError::invalid_argument(format!("rtps header: {e}")))?;
        if &magic != b"RTPS" {
            return Err(SecurityError::invalid_argument(
                "rtps header magic mismatch",
            ));
        }
        let version_major = r.read_u8().map_err(|_| short_header())?;
        let version_minor = r.read_u8().map_err(|_| short_header())?;
        let vendor_id = r.read_array::<2>().map_err(|_| short_header())?;
        let guid_prefix: GuidPrefix = r
            .read_array::<GUID_PREFIX_LEN>()
            .map_err(|_| short_header())?;
        Ok(RtpsHeader {
            version_major,
            version_minor,
            vendor_id,
            guid_prefix,
        })
    }

    pub fn write(&self, w: &mut TrustedWriter) {
        w.put_bytes(b"RTPS");
        w.put_u8(self.version_major);
        w.put_u8(self.version_minor);
        w.put_bytes(&self.vendor_id);
        w.put_bytes(&self.guid_prefix);
    }
}

fn short_header() -> SecurityError {
    SecurityError::invalid_argument("rtps header truncated")
}

/// Body of an INFO_SRC submessage: the original message's source.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InfoSrc {
    pub version_major: u8,
    pub version_minor: u8,
    pub vendor_id: [u8; 2],
    pub guid_prefix: GuidPrefix,
}

impl InfoSrc {
    /// Body length: unused(4) + version(2) + vendor(2) + prefix(12).
    pub const BODY_LEN: u16 = 20;

    #[must_use]
    pub fn from_header(h: &RtpsHeader) -> InfoSrc {
        InfoSrc {
            version_major: h.version_major,
            version_minor: h.version_minor,
            vendor_id: h.vendor_id,
            guid_prefix: h.guid_prefix,
        }
    }

    #[must_use]
    pub fn to_header(&self) -> RtpsHeader {
        RtpsHeader {
            version_major: self.version_major,
            version_minor: self.version_minor,
            vendor_id: self.vendor_id,
            guid_prefix: self.guid_prefix,
        }
    }

    /// Write the full submessage (header + body).
    pub fn write_submessage(&self, w: &mut TrustedWriter) {
        SubmessageHeader::write(w, SMID_INFO_SRC, Self::BODY_LEN);
        w.put_u32_be(0); // unused
        w.put_u8(self.version_major);
        w.put_u8(self.version_minor);
        w.put_bytes(&self.vendor_id);
        w.put_bytes(&self.guid_prefix);
    }

    /// Read the body (the header has already been consumed).
    pub fn read_body(r: &mut TaintedReader<'_>) -> SecResult<InfoSrc> {
        r.skip(4)
            .map_err(|e| SecurityError::invalid_argument(format!("info_src: {e}")))?;
        let version_major = r
            .read_u8()
            .map_err(|e| SecurityError::invalid_argument(format!("info_src: {e}")))?;
        let version_minor = r
            .read_u8()
            .map_err(|e| SecurityError::invalid_argument(format!("info_src: {e}")))?;
        let vendor_id = r
            .read_array::<2>()
            .map_err(|e| SecurityError::invalid_argument(format!("info_src: {e}")))?;
        let guid_prefix = r
            .read_array::<GUID_PREFIX_LEN>()
            .map_err(|e| SecurityError::invalid_argument(format!("info_src: {e}")))?;
        Ok(InfoSrc {
            version_major,
            version_minor,
            vendor_id,
            guid_prefix,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_submsg_header_roundtrip() {
        let mut w = TrustedWriter::new();
        SubmessageHeader::write(&mut w, SMID_SEC_PREFIX, 20);
        w.put_bytes(&[0u8; 20]);
        let v = w.into_vec();
        let mut r = TaintedReader::new(&v);
        let h = SubmessageHeader::read(&mut r).unwrap();
        assert_eq!(h.id, SMID_SEC_PREFIX);
        assert_eq!(h.octets_to_next, 20);
        assert!(!h.is_little_endian());
        assert_eq!(r.remaining(), 20);
    }

    #[test]
    fn test_submsg_header_rejects_unaligned_length() {
        let bytes = [SMID_DATA, 0x00, 0x00, 0x06];
        let mut r = TaintedReader::new(&bytes);
        assert!(SubmessageHeader::read(&mut r).is_err());
    }

    #[test]
    fn test_submsg_header_rejects_overlong_length() {
        let mut w = TrustedWriter::new();
        SubmessageHeader::write(&mut w, SMID_DATA, 64);
        let mut v = w.into_vec();
        v.extend_from_slice(&[0u8; 8]); // only 8 of 64 present
        let mut r = TaintedReader::new(&v);
        assert!(SubmessageHeader::read(&mut r).is_err());
    }

    #[test]
    fn test_little_endian_length() {
        let bytes = [SMID_DATA, FLAG_ENDIANNESS, 0x08, 0x00, 0, 0, 0, 0, 0, 0, 0, 0];
        let mut r = TaintedReader::new(&bytes);
        let h = SubmessageHeader::read(&mut r).unwrap();
        assert!(h.is_little_endian());
        assert_eq!(h.octets_to_next, 8);
    }

    #[test]
    fn test_rtps_header_roundtrip() {
        let h = RtpsHeader {
            version_major: 2,
            version_minor: 4,
            vendor_id: [0x01, 0x10],
            guid_prefix: [7; 12],
        };
        let mut w = TrustedWriter::new();
        h.write(&mut w);
        let v = w.into_vec();
        assert_eq!(v.len(), RTPS_HEADER_SIZE);
        let mut r = TaintedReader::new(&v);
        assert_eq!(RtpsHeader::read(&mut r).unwrap(), h);
    }

    #[test]
    fn test_rtps_header_bad_magic() {
        let mut r = TaintedReader::new(b"RTPX................");
        assert!(RtpsHeader::read(&mut r).is_err());
    }

    #[test]
    fn test_info_src_roundtrip() {
        let h = RtpsHeader {
            version_major: 2,
            version_minor: 1,
            vendor_id: [0xab, 0xcd],
            guid_prefix: [3; 12],
        };
        let info = InfoSrc::from_header(&h);
        let mut w = TrustedWriter::new();
        info.write_submessage(&mut w);
        let v = w.into_vec();
        assert_eq!(v.len(), SUBMSG_HEADER_SIZE + usize::from(InfoSrc::BODY_LEN));

        let mut r = TaintedReader::new(&v);
        let sh = SubmessageHeader::read(&mut r).unwrap();
        assert_eq!(sh.id, SMID_INFO_SRC);
        let parsed = InfoSrc::read_body(&mut r).unwrap();
        assert_eq!(parsed.to_header(), h);
    }
}

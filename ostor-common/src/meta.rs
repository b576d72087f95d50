//! # Stored-Value Metadata Header
//!
//! Purpose: Encode and decode the optional metadata record prefixed to a
//! stored value: total size, CRC32 checksum, expiry and attribute bits.
//!
//! ## Wire Form
//! A stored value that carries metadata begins with marker byte `0x01`
//! followed by a length byte `L`, then `L` bytes of record, then the tagged
//! value itself. The record is a sequence of `(field-id, width, big-endian
//! bytes)` entries with zero-valued fields omitted; the size field is always
//! present so a valid header is never shorter than marker + length + one
//! entry. `L` never exceeds 255 by construction.

use bytes::{Buf, BufMut};

/// Marker byte announcing a metadata header.
pub const META_MARKER: u8 = 0x01;

const FIELD_SIZE: u8 = 1;
const FIELD_SUM: u8 = 2;
const FIELD_EXPIRED: u8 = 3;
const FIELD_ATTRS: u8 = 4;

/// Metadata record stored ahead of a tagged value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KvMeta {
    /// Size of the stored payload in bytes.
    pub size: u64,
    /// CRC32 (IEEE) checksum of the stored payload.
    pub sum: u32,
    /// Expiry time as epoch milliseconds; 0 means no expiry.
    pub expired: u64,
    /// Attribute bits.
    pub attrs: u64,
}

impl KvMeta {
    /// Builds a metadata record for a payload of known size and checksum.
    pub fn new(size: u64, sum: u32) -> KvMeta {
        KvMeta {
            size,
            sum,
            ..KvMeta::default()
        }
    }

    /// Serializes the record body (the `L` bytes after the length byte).
    pub fn encode_record(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(16);
        put_field(&mut out, FIELD_SIZE, self.size);
        if self.sum != 0 {
            put_field(&mut out, FIELD_SUM, u64::from(self.sum));
        }
        if self.expired != 0 {
            put_field(&mut out, FIELD_EXPIRED, self.expired);
        }
        if self.attrs != 0 {
            put_field(&mut out, FIELD_ATTRS, self.attrs);
        }
        out
    }

    /// Parses a record body. Unknown field ids are skipped.
    pub fn decode_record(mut record: &[u8]) -> Option<KvMeta> {
        let mut meta = KvMeta::default();
        while record.remaining() >= 2 {
            let id = record.get_u8();
            let width = record.get_u8() as usize;
            if width == 0 || width > 8 || record.remaining() < width {
                return None;
            }
            let v = record.get_uint(width);
            match id {
                FIELD_SIZE => meta.size = v,
                FIELD_SUM => meta.sum = v as u32,
                FIELD_EXPIRED => meta.expired = v,
                FIELD_ATTRS => meta.attrs = v,
                _ => {}
            }
        }
        if record.has_remaining() {
            return None;
        }
        Some(meta)
    }

    /// Prefixes this record to an already-encoded value.
    pub fn wrap(&self, value: &[u8]) -> Vec<u8> {
        let record = self.encode_record();
        debug_assert!(record.len() <= u8::MAX as usize);
        let mut out = Vec::with_capacity(2 + record.len() + value.len());
        out.put_u8(META_MARKER);
        out.put_u8(record.len() as u8);
        out.extend_from_slice(&record);
        out.extend_from_slice(value);
        out
    }
}

/// Extracts the metadata record from stored bytes, if one is present.
///
/// Inputs shorter than 3 bytes (marker + length + minimum content) decode
/// to `None`, as do malformed records.
pub fn meta_of(data: &[u8]) -> Option<KvMeta> {
    if data.len() < 3 || data[0] != META_MARKER {
        return None;
    }
    let end = 2 + data[1] as usize;
    if end > data.len() {
        return None;
    }
    KvMeta::decode_record(&data[2..end])
}

/// Returns the tagged value stored after the metadata header.
///
/// Bytes without a well-formed header are returned whole: the absence of
/// the marker means the stored bytes are the bare tagged value.
pub fn value_of(data: &[u8]) -> &[u8] {
    if data.len() > 1 && data[0] == META_MARKER {
        let offset = 2 + data[1] as usize;
        if offset < data.len() {
            return &data[offset..];
        }
    }
    data
}

fn put_field(out: &mut Vec<u8>, id: u8, v: u64) {
    let width = width_of(v);
    out.put_u8(id);
    out.put_u8(width as u8);
    out.put_uint(v, width);
}

// Minimal big-endian width, at least one byte so zero still has a body.
fn width_of(v: u64) -> usize {
    let bits = 64 - v.leading_zeros() as usize;
    bits.div_ceil(8).max(1)
}

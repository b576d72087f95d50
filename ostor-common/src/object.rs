//! # Object-Entry Records
//!
//! Purpose: Records exchanged by the chunked object-transfer protocol: the
//! init request, the session metadata the server answers with, and the
//! per-block payload record. Records travel as JSON-tagged values inside
//! bulk strings; block payloads are base64 within the JSON document.
//!
//! ## Session Protocol
//! Init allocates (or resumes) an upload session identified by a serial
//! number and a commit key. The server advertises a block-size class and
//! the sorted set of block indices already durable; the client submits the
//! missing blocks with per-block CRC32 checksums. Completion is implicit
//! once every required block is accepted.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bytes::Bytes;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Session is still accepting blocks.
pub const OBJECT_ATTR_COMMITTING: u64 = 1 << 1;

/// Block-size class: 4 MiB blocks.
pub const OBJECT_ATTR_BLOCK_SIZE_4MB: u64 = 1 << 4;

/// Block length of the 4 MiB size class.
pub const OBJECT_BLOCK_SIZE_4MB: u64 = 4 << 20;

/// Init request for an object upload session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectEntryInit {
    /// Path key of the object.
    pub path: String,
    /// Total object size in bytes.
    pub size: u64,
}

impl ObjectEntryInit {
    pub fn new(path: impl Into<String>, size: u64) -> ObjectEntryInit {
        ObjectEntryInit {
            path: path.into(),
            size,
        }
    }

    /// An init is submittable only for a named, non-empty object.
    pub fn valid(&self) -> bool {
        !self.path.is_empty() && self.size > 0
    }
}

/// Session metadata returned by an init call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectEntryMeta {
    /// Path key of the object.
    #[serde(default)]
    pub path: String,
    /// Total object size in bytes.
    pub size: u64,
    /// Session serial number referenced by block operations.
    pub sn: u64,
    /// Attribute bits (`OBJECT_ATTR_*`).
    pub attrs: u64,
    /// Token correlating retried block writes with this session.
    #[serde(default)]
    pub commit_key: String,
    /// Block indices already durable server-side.
    #[serde(default)]
    pub blocks: Vec<u32>,
}

impl ObjectEntryMeta {
    /// Whether all bits of `attr` are set.
    pub fn attr_allow(&self, attr: u64) -> bool {
        self.attrs & attr == attr
    }

    /// Block length advertised by the session's size-class attribute.
    pub fn block_size(&self) -> Option<u64> {
        if self.attr_allow(OBJECT_ATTR_BLOCK_SIZE_4MB) {
            Some(OBJECT_BLOCK_SIZE_4MB)
        } else {
            None
        }
    }

    /// Sorted membership view of the durable-block bitmap.
    pub fn block_set(&self) -> BlockIndexSet {
        BlockIndexSet::from_indices(self.blocks.clone())
    }
}

/// One block of an object, submitted by put and returned by get.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectEntryBlock {
    /// Path key of the object.
    pub path: String,
    /// Total object size in bytes.
    #[serde(default)]
    pub size: u64,
    /// Block index, 0-based and contiguous.
    pub num: u32,
    /// Block payload; empty in get requests.
    #[serde(default, with = "base64_bytes")]
    pub data: Bytes,
    /// CRC32 (IEEE) checksum of `data`.
    #[serde(default)]
    pub sum: u64,
    /// Session serial number from the init reply.
    #[serde(default)]
    pub sn: u64,
    /// Commit key from the init reply.
    #[serde(default)]
    pub commit_key: String,
}

impl ObjectEntryBlock {
    pub fn new(
        path: impl Into<String>,
        size: u64,
        num: u32,
        data: impl Into<Bytes>,
        commit_key: impl Into<String>,
    ) -> ObjectEntryBlock {
        ObjectEntryBlock {
            path: path.into(),
            size,
            num,
            data: data.into(),
            sum: 0,
            sn: 0,
            commit_key: commit_key.into(),
        }
    }

    /// A block is submittable only with a path and a non-empty payload.
    pub fn valid(&self) -> bool {
        !self.path.is_empty() && !self.data.is_empty()
    }
}

/// CRC32 (IEEE) checksum of a block payload, widened to the record field.
pub fn block_checksum(data: &[u8]) -> u64 {
    u64::from(crc32fast::hash(data))
}

/// Number of blocks covering `total` bytes under `block_size`.
pub fn block_count(total: u64, block_size: u64) -> u32 {
    (total.div_ceil(block_size)) as u32
}

/// Length of block `num`: the final block carries the remainder, or a full
/// block when the total divides evenly.
pub fn block_len(total: u64, block_size: u64, num: u32) -> u64 {
    let count = block_count(total, block_size);
    if num + 1 == count && total % block_size != 0 {
        total % block_size
    } else {
        block_size
    }
}

/// Sorted set of block indices with binary-search membership.
///
/// Large objects can report many durable blocks; membership tests run per
/// candidate block during an upload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockIndexSet(Vec<u32>);

impl BlockIndexSet {
    /// Builds the set from indices in any order; duplicates collapse.
    pub fn from_indices(mut indices: Vec<u32>) -> BlockIndexSet {
        indices.sort_unstable();
        indices.dedup();
        BlockIndexSet(indices)
    }

    pub fn has(&self, num: u32) -> bool {
        self.0.binary_search(&num).is_ok()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

mod base64_bytes {
    use super::*;

    pub fn serialize<S: Serializer>(data: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let text = String::deserialize(deserializer)?;
        BASE64
            .decode(text.as_bytes())
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}

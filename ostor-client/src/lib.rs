//! # Ostor Sync Client
//!
//! Purpose: Provide a synchronous client for the ostor key-value/object
//! store over its RESP-compatible wire protocol, with a bounded connection
//! pool and resumable chunked object transfer.
//!
//! ## Design Principles
//! 1. **Bounded Pool**: A fixed set of persistent connections, leased one
//!    caller at a time and healed lazily after failures.
//! 2. **In-Band Statuses**: Command outcomes travel as reply statuses, not
//!    as a second error channel; retry policy stays with the caller.
//! 3. **Protocol Clarity**: Request framing and response parsing are
//!    explicit recursive descent over the wire grammar.
//! 4. **Minimal Allocation**: Connections reuse their line and write
//!    buffers across commands.

mod client;
mod pool;
mod reply;
mod resp;
mod transfer;

pub use client::{ClientError, ClientResult, Config, Connector, KvWriteOptions};
pub use reply::{Reply, ReplyEntry};
pub use resp::{Arg, Frame};
pub use transfer::ObjectReader;

pub use ostor_common::{
    block_checksum, block_count, block_len, meta_of, value_of, BlockIndexSet, KvMeta,
    ObjectEntryBlock, ObjectEntryInit, ObjectEntryMeta, Status, Value, OBJECT_ATTR_BLOCK_SIZE_4MB,
    OBJECT_ATTR_COMMITTING, OBJECT_BLOCK_SIZE_4MB,
};

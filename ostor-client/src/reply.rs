//! # Command Replies
//!
//! Purpose: Turn a parsed frame tree into the client-facing reply: a status
//! code, the raw payload, and any sub-replies, plus typed accessors over
//! the tagged value and metadata codecs.
//!
//! ## Status Classification
//! Classification is deliberately coarse: an empty capacity or an absent
//! payload is `NotFound`; a scalar payload or a complete item list is `Ok`;
//! anything else (truncated or malformed arrays included) is `Error`.
//! Callers depend on exactly this rule, so it is preserved as-is rather
//! than split into finer-grained causes.

use serde::de::DeserializeOwned;

use ostor_common::{meta_of, value_of, KvMeta, Status, Value};

use crate::client::{ClientError, ClientResult};
use crate::resp::Frame;

/// Decoded outcome of one command.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    status: Status,
    data: Vec<u8>,
    cap: i64,
    items: Vec<Reply>,
}

/// One key/value pair from a scan-style reply.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplyEntry<'a> {
    pub key: &'a [u8],
    pub value: &'a Reply,
}

impl Reply {
    /// Builds a locally-synthesized reply carrying a failure status.
    pub(crate) fn fault(status: Status, message: impl Into<String>) -> Reply {
        Reply {
            status,
            data: message.into().into_bytes(),
            cap: 0,
            items: Vec::new(),
        }
    }

    /// Builds an empty successful reply.
    pub(crate) fn ok() -> Reply {
        Reply {
            status: Status::Ok,
            data: Vec::new(),
            cap: 0,
            items: Vec::new(),
        }
    }

    /// Converts a parsed frame into a classified reply.
    pub(crate) fn from_frame(frame: Frame) -> Reply {
        match frame {
            Frame::Error(message) => Reply {
                status: Status::Error,
                data: message,
                cap: 0,
                items: Vec::new(),
            },
            Frame::Simple(text) => Reply::classified(text, 1, Vec::new()),
            Frame::Integer(digits) => {
                // Integers carry their decimal text as a raw-tagged value so
                // the scalar accessors apply uniformly.
                let mut data = Vec::with_capacity(digits.len() + 1);
                data.push(ostor_common::VALUE_NS_RAW);
                data.extend_from_slice(&digits);
                Reply::classified(data, 1, Vec::new())
            }
            Frame::Bulk(Some(data)) if !data.is_empty() => Reply::classified(data, 1, Vec::new()),
            Frame::Bulk(_) => Reply::classified(Vec::new(), 0, Vec::new()),
            Frame::Array { cap, items } => {
                let items = items.into_iter().map(Reply::from_frame).collect();
                Reply::classified(Vec::new(), cap, items)
            }
        }
    }

    fn classified(data: Vec<u8>, cap: i64, items: Vec<Reply>) -> Reply {
        let status = if cap == 0 || (data.is_empty() && items.is_empty()) {
            Status::NotFound
        } else if (cap == 1 && !data.is_empty()) || items.len() as i64 >= cap {
            Status::Ok
        } else {
            Status::Error
        };
        Reply {
            status,
            data,
            cap,
            items,
        }
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn is_ok(&self) -> bool {
        self.status == Status::Ok
    }

    pub fn not_found(&self) -> bool {
        self.status == Status::NotFound
    }

    /// Payload bytes with any metadata header skipped.
    pub fn bytes(&self) -> &[u8] {
        value_of(&self.data)
    }

    /// Metadata record prefixed to the payload, if present.
    pub fn meta(&self) -> Option<KvMeta> {
        meta_of(&self.data)
    }

    /// Payload decoded through the tagged-value codec.
    pub fn value(&self) -> Value {
        Value::decode(self.bytes())
    }

    /// Payload as text; lossy for non-UTF-8, and the error message for
    /// failed commands.
    pub fn string(&self) -> String {
        self.value().string()
    }

    pub fn i64(&self) -> i64 {
        self.value().i64()
    }

    pub fn u64(&self) -> u64 {
        self.value().u64()
    }

    pub fn f64(&self) -> f64 {
        self.value().f64()
    }

    pub fn bool(&self) -> bool {
        self.value().bool()
    }

    /// Deserializes a JSON-tagged payload into `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> ClientResult<T> {
        let bytes = self.bytes();
        if bytes.len() < 3 {
            return Err(ClientError::InvalidValue);
        }
        Ok(self.value().decode_json()?)
    }

    /// Sub-replies of an array response.
    pub fn list(&self) -> &[Reply] {
        &self.items
    }

    pub fn list_len(&self) -> usize {
        self.items.len()
    }

    /// Number of key/value pairs in a scan-style reply.
    pub fn kv_len(&self) -> usize {
        self.items.len() / 2
    }

    /// Pairs consecutive items as key/value entries.
    pub fn kv_list(&self) -> Vec<ReplyEntry<'_>> {
        self.items
            .chunks_exact(2)
            .map(|pair| ReplyEntry {
                key: &pair[0].data,
                value: &pair[1],
            })
            .collect()
    }
}

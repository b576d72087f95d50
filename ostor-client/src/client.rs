//! # Connector Facade
//!
//! Purpose: Expose a compact, blocking API over the pool and wire codec:
//! configuration with its clamp rules, one generic `cmd` entry point, and
//! the thin per-verb key-value wrappers.
//!
//! ## Design Principles
//! 1. **Facade Pattern**: `Connector` hides pooling and protocol details.
//! 2. **In-Band Outcomes**: Verb wrappers return a `Reply`; only
//!    construction and open-style calls use the error enum.
//! 3. **Explicit Lifetime**: The pool is an owned resource; `close`
//!    consumes the connector.

use std::net::ToSocketAddrs;
#[cfg(unix)]
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use ostor_common::{Status, Value};

use crate::pool::{ConnOptions, Endpoint, Pool};
use crate::reply::Reply;
use crate::resp::Arg;

/// Result type for fallible client calls.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors surfaced outside the in-band reply statuses.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Network or IO failure while establishing a connection.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Neither a usable socket path nor a resolvable host:port.
    #[error("invalid address: {0}")]
    InvalidAddress(String),
    /// The auth handshake was rejected during pool construction.
    #[error("auth failed")]
    NoAuth,
    /// A stored value is too short to carry a decodable document.
    #[error("invalid value format")]
    InvalidValue,
    /// A JSON document failed to (de)serialize.
    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),
    /// A command reply carried a failure status where a value was required.
    #[error("command failed ({status}): {message}")]
    Command { status: Status, message: String },
}

const TIMEOUT_MIN_SECS: u64 = 3;
const TIMEOUT_MAX_SECS: u64 = 600;
const MAX_CONN_LIMIT: usize = 10;

/// Client configuration.
///
/// Validation of generic option bags happens upstream; this record only
/// applies the protocol's clamp rules.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server hostname or IP. Leave blank if using unix sockets.
    pub host: String,
    /// Server port. Leave blank if using unix sockets.
    pub port: u16,
    /// Shared-secret token sent as the first command on every fresh dial.
    pub auth: String,
    /// Path of a UNIX socket file. Leave blank if using host and port.
    pub socket: String,
    /// Per-command timeout in seconds, clamped to [3, 600].
    pub timeout: u64,
    /// Number of pooled connections, clamped to [1, 10].
    #[serde(rename = "maxconn")]
    pub max_conn: usize,
}

impl Config {
    pub(crate) fn clamped_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout.clamp(TIMEOUT_MIN_SECS, TIMEOUT_MAX_SECS))
    }

    pub(crate) fn clamped_size(&self) -> usize {
        self.max_conn.clamp(1, MAX_CONN_LIMIT)
    }

    // A configured socket path wins over host:port.
    pub(crate) fn endpoint(&self) -> ClientResult<Endpoint> {
        #[cfg(unix)]
        if self.socket.len() > 2 {
            return Ok(Endpoint::Unix(PathBuf::from(&self.socket)));
        }
        let addr = format!("{}:{}", self.host, self.port);
        let resolvable = addr
            .to_socket_addrs()
            .map(|mut resolved| resolved.next().is_some())
            .unwrap_or(false);
        if resolvable {
            Ok(Endpoint::Tcp(addr))
        } else {
            Err(ClientError::InvalidAddress(addr))
        }
    }
}

/// Options for key-value writes.
#[derive(Debug, Clone, Copy, Default)]
pub struct KvWriteOptions {
    /// Time-to-live in milliseconds; 0 means no expiry.
    pub ttl: i64,
    /// Overwrite only if the stored value's CRC32 matches.
    pub prev_sum: Option<u32>,
}

/// Synchronous connector with a bounded connection pool.
///
/// Every command leases one connection, performs a single write-then-read
/// exchange under the configured deadline, and returns the connection.
pub struct Connector {
    pool: Pool,
}

impl Connector {
    /// Establishes the full connection set up front.
    pub fn open(config: Config) -> ClientResult<Connector> {
        let size = config.clamped_size();
        let opts = ConnOptions {
            endpoint: config.endpoint()?,
            timeout: config.clamped_timeout(),
            auth: config.auth.clone(),
        };
        Ok(Connector {
            pool: Pool::open(opts, size)?,
        })
    }

    /// Issues one command with explicit arguments.
    pub fn cmd(&self, verb: &str, args: &[Arg]) -> Reply {
        self.pool.dispatch(verb, args)
    }

    /// Drains the pool and closes every connection.
    pub fn close(self) {
        self.pool.close();
    }

    /// Creates a key only if it does not exist yet.
    pub fn kv_new(&self, key: &[u8], value: &Value, opts: Option<&KvWriteOptions>) -> Reply {
        let mut args = vec![Arg::from(key), Arg::from(value.encode()), Arg::from("NX")];
        push_write_options(&mut args, opts);
        self.cmd("kvnew", &args)
    }

    /// Writes a key unconditionally (subject to `opts` preconditions).
    pub fn kv_put(&self, key: &[u8], value: &Value, opts: Option<&KvWriteOptions>) -> Reply {
        let mut args = vec![Arg::from(key), Arg::from(value.encode())];
        push_write_options(&mut args, opts);
        self.cmd("kvput", &args)
    }

    pub fn kv_get(&self, key: &[u8]) -> Reply {
        self.cmd("kvget", &[Arg::from(key)])
    }

    pub fn kv_del(&self, keys: &[&[u8]]) -> Reply {
        let args: Vec<Arg> = keys.iter().map(|key| Arg::from(*key)).collect();
        self.cmd("kvdel", &args)
    }

    /// Adds `increment` to a numeric value, returning the new total.
    pub fn kv_incr(&self, key: &[u8], increment: i64) -> Reply {
        self.cmd("kvincr", &[Arg::from(key), Arg::Int(increment)])
    }

    /// Scans keys in `[offset, cutset)` up to `limit` entries.
    pub fn kv_scan(&self, offset: &[u8], cutset: &[u8], limit: i64) -> Reply {
        self.cmd(
            "kvscan",
            &[Arg::from(offset), Arg::from(cutset), Arg::Int(limit)],
        )
    }

    /// Scans keys in reverse order.
    pub fn kv_rev_scan(&self, offset: &[u8], cutset: &[u8], limit: i64) -> Reply {
        self.cmd(
            "kvrevscan",
            &[Arg::from(offset), Arg::from(cutset), Arg::Int(limit)],
        )
    }

    /// Fetches the metadata record of a key without its payload.
    pub fn kv_meta(&self, key: &[u8]) -> Reply {
        self.cmd("kvmeta", &[Arg::from(key)])
    }
}

fn push_write_options(args: &mut Vec<Arg>, opts: Option<&KvWriteOptions>) {
    let Some(opts) = opts else { return };
    if opts.ttl > 0 {
        args.push(Arg::from("PX"));
        args.push(Arg::Int(opts.ttl));
    }
    if let Some(sum) = opts.prev_sum {
        args.push(Arg::from("CS"));
        args.push(Arg::Uint(u64::from(sum)));
    }
}

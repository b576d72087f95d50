//! # Command Status Codes
//!
//! Purpose: One shared status vocabulary for every command reply, whether
//! the outcome was produced by the server or synthesized locally.

use std::fmt;

/// Outcome of one command exchange.
///
/// `BadArgument`, `NoAuth`, `NetError` and `Timeout` are synthesized on the
/// client side; the remaining codes are derived from the response frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Status {
    /// Command succeeded and carried a payload or a complete item list.
    Ok = 1,
    /// Command succeeded but the result is empty or absent.
    NotFound = 2,
    /// Explicit server error frame, or a truncated/ambiguous response.
    Error = 3,
    /// Local validation failed before any bytes reached the wire.
    BadArgument = 4,
    /// The auth handshake was rejected.
    NoAuth = 5,
    /// Dial, write or read failed for a reason other than a deadline.
    NetError = 6,
    /// The per-command deadline elapsed during write or read.
    Timeout = 7,
}

impl Status {
    /// Numeric wire/code form of the status.
    pub const fn as_u8(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Status::Ok => "ok",
            Status::NotFound => "not found",
            Status::Error => "error",
            Status::BadArgument => "bad argument",
            Status::NoAuth => "no auth",
            Status::NetError => "net error",
            Status::Timeout => "timeout",
        };
        f.write_str(name)
    }
}

//! # Wire Encoding and Parsing
//!
//! Purpose: Encode command/argument tuples into request frames and parse
//! response byte streams into a typed frame tree, without external
//! dependencies and with allocations kept under control.
//!
//! ## Design Principles
//! 1. **State-Free Parsing**: Responses are parsed top-down by recursive
//!    descent with minimal state.
//! 2. **Buffer Reuse**: The caller provides line and write buffers to avoid
//!    per-call allocations.
//! 3. **Binary-Safe**: Bulk strings are treated as raw bytes.
//! 4. **Fail Fast**: Invalid framing surfaces as a protocol error
//!    immediately; protocol errors are fatal for the response, never
//!    retried here.

use std::io::BufRead;

/// One command argument.
///
/// The sum is closed: every representable argument has a defined wire
/// rendering, so argument-type rejection cannot occur after encoding
/// starts.
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    /// Raw bytes, passed through verbatim.
    Bytes(Vec<u8>),
    /// Text, passed through verbatim.
    Str(String),
    /// Signed integer, rendered as minimal decimal text.
    Int(i64),
    /// Unsigned integer, rendered as minimal decimal text.
    Uint(u64),
    /// Float, rendered with the shortest round-trip decimal form.
    Float(f64),
    /// Boolean, rendered as "1" or "0".
    Bool(bool),
    /// Absent value, rendered as the empty string.
    Nil,
}

impl From<&[u8]> for Arg {
    fn from(v: &[u8]) -> Arg {
        Arg::Bytes(v.to_vec())
    }
}

impl From<Vec<u8>> for Arg {
    fn from(v: Vec<u8>) -> Arg {
        Arg::Bytes(v)
    }
}

impl From<&str> for Arg {
    fn from(v: &str) -> Arg {
        Arg::Str(v.to_string())
    }
}

impl From<String> for Arg {
    fn from(v: String) -> Arg {
        Arg::Str(v)
    }
}

impl From<i64> for Arg {
    fn from(v: i64) -> Arg {
        Arg::Int(v)
    }
}

impl From<u64> for Arg {
    fn from(v: u64) -> Arg {
        Arg::Uint(v)
    }
}

impl From<f64> for Arg {
    fn from(v: f64) -> Arg {
        Arg::Float(v)
    }
}

impl From<bool> for Arg {
    fn from(v: bool) -> Arg {
        Arg::Bool(v)
    }
}

/// One decoded response frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// `-...` error line.
    Error(Vec<u8>),
    /// `+...` simple string line.
    Simple(Vec<u8>),
    /// `:...` integer line, kept as decimal text.
    Integer(Vec<u8>),
    /// `$...` bulk string, `None` when the declared size is negative.
    Bulk(Option<Vec<u8>>),
    /// `*...` array with its declared capacity and collected items.
    Array { cap: i64, items: Vec<Frame> },
}

/// Parse-side failure: either the transport failed or the stream violated
/// the wire grammar.
#[derive(Debug)]
pub enum RespError {
    Io(std::io::Error),
    Protocol,
}

impl From<std::io::Error> for RespError {
    fn from(err: std::io::Error) -> RespError {
        RespError::Io(err)
    }
}

/// Encodes one command as an array of bulk strings into `out`.
pub fn encode_command(verb: &str, args: &[Arg], out: &mut Vec<u8>) {
    out.push(b'*');
    push_u64(out, (args.len() + 1) as u64);
    out.extend_from_slice(b"\r\n");
    push_bulk(out, verb.as_bytes());
    let mut scratch = Vec::new();
    for arg in args {
        match arg {
            Arg::Bytes(data) => push_bulk(out, data),
            Arg::Str(text) => push_bulk(out, text.as_bytes()),
            Arg::Int(v) => {
                scratch.clear();
                push_i64(&mut scratch, *v);
                push_bulk(out, &scratch);
            }
            Arg::Uint(v) => {
                scratch.clear();
                push_u64(&mut scratch, *v);
                push_bulk(out, &scratch);
            }
            Arg::Float(v) => {
                // Display for f64 is the shortest decimal that round-trips.
                scratch.clear();
                scratch.extend_from_slice(v.to_string().as_bytes());
                push_bulk(out, &scratch);
            }
            Arg::Bool(v) => push_bulk(out, if *v { b"1" } else { b"0" }),
            Arg::Nil => push_bulk(out, b""),
        }
    }
}

/// Reads one complete frame from the buffered reader.
///
/// Bulk bodies block until exactly the declared byte count is consumed;
/// short reads are looped, never surfaced as partial frames.
pub fn read_frame<R: BufRead>(reader: &mut R, line_buf: &mut Vec<u8>) -> Result<Frame, RespError> {
    read_line(reader, line_buf)?;
    match line_buf[0] {
        b'-' => Ok(Frame::Error(line_buf[1..].to_vec())),
        b'+' => Ok(Frame::Simple(line_buf[1..].to_vec())),
        b':' => Ok(Frame::Integer(line_buf[1..].to_vec())),
        b'$' => {
            let size = parse_i64(&line_buf[1..])?;
            read_bulk(reader, size, line_buf)
        }
        b'*' => {
            let cap = parse_i64(&line_buf[1..])?;
            read_array(reader, cap, line_buf)
        }
        _ => Err(RespError::Protocol),
    }
}

// Nested frames may only be bulk strings or arrays.
fn read_nested<R: BufRead>(reader: &mut R, line_buf: &mut Vec<u8>) -> Result<Frame, RespError> {
    read_line(reader, line_buf)?;
    match line_buf[0] {
        b'$' => {
            let size = parse_i64(&line_buf[1..])?;
            read_bulk(reader, size, line_buf)
        }
        b'*' => {
            let cap = parse_i64(&line_buf[1..])?;
            read_array(reader, cap, line_buf)
        }
        _ => Err(RespError::Protocol),
    }
}

fn read_bulk<R: BufRead>(
    reader: &mut R,
    size: i64,
    line_buf: &mut Vec<u8>,
) -> Result<Frame, RespError> {
    if size < -1 {
        return Err(RespError::Protocol);
    }
    if size < 0 {
        return Ok(Frame::Bulk(None));
    }
    let mut data = vec![0u8; size as usize];
    reader.read_exact(&mut data)?;

    let mut crlf = [0u8; 2];
    reader.read_exact(&mut crlf)?;
    if crlf != [b'\r', b'\n'] {
        return Err(RespError::Protocol);
    }

    line_buf.clear();
    Ok(Frame::Bulk(Some(data)))
}

fn read_array<R: BufRead>(
    reader: &mut R,
    cap: i64,
    line_buf: &mut Vec<u8>,
) -> Result<Frame, RespError> {
    if cap < -1 {
        return Err(RespError::Protocol);
    }
    if cap <= 0 {
        return Ok(Frame::Array {
            cap,
            items: Vec::new(),
        });
    }

    let mut items = Vec::with_capacity(cap as usize);
    for _ in 0..cap {
        items.push(read_nested(reader, line_buf)?);
    }
    Ok(Frame::Array { cap, items })
}

// Reads one CRLF-terminated line, enforcing the 4-byte minimum of the wire
// grammar, and leaves the stripped payload in `buf`.
fn read_line<R: BufRead>(reader: &mut R, buf: &mut Vec<u8>) -> Result<(), RespError> {
    buf.clear();
    let bytes = reader.read_until(b'\n', buf)?;
    if bytes == 0 {
        return Err(RespError::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "connection closed",
        )));
    }
    if buf.len() < 4 || buf[buf.len() - 2] != b'\r' {
        return Err(RespError::Protocol);
    }
    buf.truncate(buf.len() - 2);
    Ok(())
}

fn parse_i64(data: &[u8]) -> Result<i64, RespError> {
    if data.is_empty() {
        return Err(RespError::Protocol);
    }
    let mut negative = false;
    let mut idx = 0;
    if data[0] == b'-' {
        negative = true;
        idx = 1;
    }
    if idx == data.len() {
        return Err(RespError::Protocol);
    }

    let mut value: i64 = 0;
    while idx < data.len() {
        let b = data[idx];
        if !b.is_ascii_digit() {
            return Err(RespError::Protocol);
        }
        value = value.saturating_mul(10).saturating_add(i64::from(b - b'0'));
        idx += 1;
    }

    if negative {
        Ok(-value)
    } else {
        Ok(value)
    }
}

fn push_bulk(out: &mut Vec<u8>, data: &[u8]) {
    out.push(b'$');
    push_u64(out, data.len() as u64);
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(data);
    out.extend_from_slice(b"\r\n");
}

fn push_i64(out: &mut Vec<u8>, value: i64) {
    if value < 0 {
        out.push(b'-');
    }
    push_u64(out, value.unsigned_abs());
}

fn push_u64(out: &mut Vec<u8>, mut value: u64) {
    // Write digits into a small stack buffer to avoid heap allocations.
    let mut buf = [0u8; 20];
    let mut len = 0;
    if value == 0 {
        buf[0] = b'0';
        len = 1;
    } else {
        while value > 0 {
            buf[len] = b'0' + (value % 10) as u8;
            value /= 10;
            len += 1;
        }
    }
    for idx in (0..len).rev() {
        out.push(buf[idx]);
    }
}

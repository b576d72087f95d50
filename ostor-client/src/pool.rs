//! # Connection Pool
//!
//! Purpose: Own a fixed set of persistent connections and coordinate
//! concurrent callers through a blocking lease/return discipline.
//!
//! ## Design Principles
//! 1. **Fixed Set**: The pool size is decided at construction; no
//!    connection factory, no growth, no eviction.
//! 2. **Blocking Lease**: Callers beyond capacity wait, they never error;
//!    the per-command deadline starts only once a connection is held.
//! 3. **Lazy Healing**: A connection that failed is returned to the pool
//!    socketless and redialed (plus re-authenticated) on its next lease.
//! 4. **Exclusive Ownership**: A leased connection is owned by exactly one
//!    caller for the duration of one command.

use std::collections::VecDeque;
use std::fmt;
use std::io::{self, BufReader, Read, Write};
use std::net::TcpStream;
#[cfg(unix)]
use std::os::unix::net::UnixStream;
#[cfg(unix)]
use std::path::PathBuf;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use tracing::{debug, trace};

use ostor_common::Status;

use crate::client::{ClientError, ClientResult};
use crate::reply::Reply;
use crate::resp::{encode_command, read_frame, Arg, RespError};

// Matches the buffered-reader sizing used on fresh dials and redials.
const READ_BUF_SIZE: usize = 4096;

/// Transport target, selected by the configuration.
pub(crate) enum Endpoint {
    Tcp(String),
    #[cfg(unix)]
    Unix(PathBuf),
}

impl Endpoint {
    fn dial(&self, timeout: Duration) -> io::Result<Stream> {
        match self {
            Endpoint::Tcp(addr) => {
                let stream = TcpStream::connect(addr.as_str())?;
                // Disable Nagle to keep request latency low for small payloads.
                stream.set_nodelay(true)?;
                stream.set_read_timeout(Some(timeout))?;
                stream.set_write_timeout(Some(timeout))?;
                Ok(Stream::Tcp(stream))
            }
            #[cfg(unix)]
            Endpoint::Unix(path) => {
                let stream = UnixStream::connect(path)?;
                stream.set_read_timeout(Some(timeout))?;
                stream.set_write_timeout(Some(timeout))?;
                Ok(Stream::Unix(stream))
            }
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Tcp(addr) => write!(f, "tcp://{}", addr),
            #[cfg(unix)]
            Endpoint::Unix(path) => write!(f, "unix://{}", path.display()),
        }
    }
}

enum Stream {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(UnixStream),
}

impl Read for Stream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Stream::Tcp(s) => s.read(buf),
            #[cfg(unix)]
            Stream::Unix(s) => s.read(buf),
        }
    }
}

impl Write for Stream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Stream::Tcp(s) => s.write(buf),
            #[cfg(unix)]
            Stream::Unix(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Stream::Tcp(s) => s.flush(),
            #[cfg(unix)]
            Stream::Unix(s) => s.flush(),
        }
    }
}

/// Dial parameters shared by every connection in one pool.
pub(crate) struct ConnOptions {
    pub endpoint: Endpoint,
    pub timeout: Duration,
    pub auth: String,
}

/// One pooled connection with reusable buffers.
///
/// `io` is absent after a failure; the next lease redials before use.
pub(crate) struct PoolConn {
    opts: Arc<ConnOptions>,
    io: Option<BufReader<Stream>>,
    line_buf: Vec<u8>,
    write_buf: Vec<u8>,
}

impl PoolConn {
    fn connect(opts: Arc<ConnOptions>) -> ClientResult<PoolConn> {
        let stream = opts.endpoint.dial(opts.timeout)?;
        let mut conn = PoolConn {
            opts,
            io: Some(BufReader::with_capacity(READ_BUF_SIZE, stream)),
            line_buf: Vec::with_capacity(128),
            write_buf: Vec::with_capacity(256),
        };
        if !conn.opts.auth.is_empty() && !conn.send_auth().is_ok() {
            return Err(ClientError::NoAuth);
        }
        Ok(conn)
    }

    /// Executes one command: heal if needed, write the request, read and
    /// classify exactly one response.
    pub(crate) fn exec(&mut self, verb: &str, args: &[Arg]) -> Reply {
        if self.io.is_none() {
            if let Err(fault) = self.redial() {
                return fault;
            }
        }

        self.write_buf.clear();
        encode_command(verb, args, &mut self.write_buf);

        let reader = self.io.as_mut().expect("connection present");
        let stream = reader.get_mut();
        let sent = stream
            .write_all(&self.write_buf)
            .and_then(|()| stream.flush());
        if let Err(err) = sent {
            let status = io_status(&err);
            self.io = None;
            return Reply::fault(status, err.to_string());
        }

        match read_frame(reader, &mut self.line_buf) {
            Ok(frame) => Reply::from_frame(frame),
            Err(RespError::Io(err)) => {
                let status = io_status(&err);
                self.io = None;
                Reply::fault(status, err.to_string())
            }
            Err(RespError::Protocol) => {
                self.io = None;
                Reply::fault(Status::NetError, "parse error")
            }
        }
    }

    fn redial(&mut self) -> Result<(), Reply> {
        debug!(endpoint = %self.opts.endpoint, "redialing broken connection");
        let stream = self
            .opts
            .endpoint
            .dial(self.opts.timeout)
            .map_err(|err| Reply::fault(io_status(&err), err.to_string()))?;
        self.io = Some(BufReader::with_capacity(READ_BUF_SIZE, stream));
        if !self.opts.auth.is_empty() && !self.send_auth().is_ok() {
            self.io = None;
            return Err(Reply::fault(Status::NoAuth, "auth failed"));
        }
        Ok(())
    }

    fn send_auth(&mut self) -> Reply {
        let token = self.opts.auth.clone();
        self.exec("auth", &[Arg::from(token)])
    }
}

fn io_status(err: &io::Error) -> Status {
    // Socket deadlines surface as TimedOut or WouldBlock depending on the
    // platform; everything else is a plain network failure.
    match err.kind() {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => Status::Timeout,
        _ => Status::NetError,
    }
}

/// Bounded blocking pool over the fixed connection set.
pub(crate) struct Pool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    size: usize,
    idle: Mutex<VecDeque<PoolConn>>,
    available: Condvar,
}

impl Pool {
    /// Eagerly establishes (and authenticates) every connection.
    ///
    /// Connections already opened when a later dial or handshake fails are
    /// closed by drop.
    pub(crate) fn open(opts: ConnOptions, size: usize) -> ClientResult<Pool> {
        let opts = Arc::new(opts);
        let mut idle = VecDeque::with_capacity(size);
        for _ in 0..size {
            idle.push_back(PoolConn::connect(opts.clone())?);
        }
        debug!(endpoint = %opts.endpoint, size, "connection pool established");
        Ok(Pool {
            inner: Arc::new(PoolInner {
                size,
                idle: Mutex::new(idle),
                available: Condvar::new(),
            }),
        })
    }

    /// Leases a connection, runs one command, and returns the connection
    /// unconditionally; broken connections heal on their next lease.
    pub(crate) fn dispatch(&self, verb: &str, args: &[Arg]) -> Reply {
        trace!(verb, "dispatch");
        let mut conn = self.lease();
        let reply = conn.exec(verb, args);
        self.release(conn);
        reply
    }

    // Blocks without a deadline until a connection is free.
    fn lease(&self) -> PoolConn {
        let mut idle = self.inner.idle.lock().expect("pool mutex poisoned");
        loop {
            if let Some(conn) = idle.pop_front() {
                return conn;
            }
            idle = self
                .inner
                .available
                .wait(idle)
                .expect("pool mutex poisoned");
        }
    }

    fn release(&self, conn: PoolConn) {
        let mut idle = self.inner.idle.lock().expect("pool mutex poisoned");
        idle.push_back(conn);
        self.inner.available.notify_one();
    }

    /// Drains and closes every pooled connection, waiting for outstanding
    /// leases to return first.
    pub(crate) fn close(&self) {
        for _ in 0..self.inner.size {
            drop(self.lease());
        }
        debug!("connection pool closed");
    }
}

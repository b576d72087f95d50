//! # Chunked Object Transfer
//!
//! Purpose: Resumable multi-block upload and a seekable sequential-read
//! abstraction for large objects, built on the pool and wire codec.
//!
//! ## Session Flow
//! An init call allocates or resumes an upload session; the server answers
//! with the session serial number, the block-size class, attribute flags,
//! the commit key, and the set of blocks already durable. The client
//! submits only the missing blocks, each with its CRC32 checksum, and a
//! failed transfer may simply be re-invoked: the server's bitmap makes the
//! retry resume where the last attempt stopped. Completion is implicit
//! once every required block is accepted.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

use tracing::debug;

use ostor_common::{
    block_checksum, block_count, block_len, KvMeta, ObjectEntryBlock, ObjectEntryInit,
    ObjectEntryMeta, Status, Value, OBJECT_ATTR_COMMITTING,
};

use crate::client::{ClientError, ClientResult, Connector};
use crate::reply::Reply;
use crate::resp::Arg;

impl Connector {
    /// Opens (or resumes) an object upload session.
    pub fn fo_mp_init(&self, init: &ObjectEntryInit) -> Reply {
        if !init.valid() {
            return Reply::fault(Status::BadArgument, "invalid object init");
        }
        match Value::json(init) {
            Ok(value) => self.cmd("fompinit", &[Arg::from(value.encode())]),
            Err(err) => Reply::fault(Status::BadArgument, err.to_string()),
        }
    }

    /// Submits one checksummed block of an upload session.
    pub fn fo_mp_put(&self, block: &ObjectEntryBlock) -> Reply {
        if !block.valid() {
            return Reply::fault(Status::BadArgument, "invalid object block");
        }
        match Value::json(block) {
            Ok(value) => self.cmd("fompput", &[Arg::from(value.encode())]),
            Err(err) => Reply::fault(Status::BadArgument, err.to_string()),
        }
    }

    /// Fetches one block of a stored object.
    pub fn fo_mp_get(&self, block: &ObjectEntryBlock) -> Reply {
        match Value::json(block) {
            Ok(value) => self.cmd("fompget", &[Arg::from(value.encode())]),
            Err(err) => Reply::fault(Status::BadArgument, err.to_string()),
        }
    }

    /// Fetches an object's entry record by path key.
    pub fn fo_get(&self, path: &str) -> Reply {
        self.cmd("foget", &[Arg::from(fo_path_encode(path))])
    }

    /// Scans object entries in `[offset, cutset)` up to `limit`.
    pub fn fo_scan(&self, offset: &str, cutset: &str, limit: i64) -> Reply {
        self.cmd(
            "foscan",
            &[
                Arg::from(fo_path_encode(offset)),
                Arg::from(fo_path_encode(cutset)),
                Arg::Int(limit),
            ],
        )
    }

    /// Scans object entries in reverse order.
    pub fn fo_rev_scan(&self, offset: &str, cutset: &str, limit: i64) -> Reply {
        self.cmd(
            "forevscan",
            &[
                Arg::from(fo_path_encode(offset)),
                Arg::from(fo_path_encode(cutset)),
                Arg::Int(limit),
            ],
        )
    }

    /// Uploads `size` bytes from `src` as the object at `dst_path`.
    ///
    /// Blocks already durable server-side are skipped, so re-invoking after
    /// a failure resumes the same session. Re-running against an object
    /// that is already complete with the same size is a no-op success.
    pub fn fo_put<R: Read + Seek>(&self, src: &mut R, size: u64, dst_path: &str) -> Reply {
        if size < 1 {
            return Reply::fault(Status::BadArgument, "invalid object size");
        }
        let path = fo_path_clean(dst_path);

        let rs = self.fo_mp_init(&ObjectEntryInit::new(path.clone(), size));
        if !rs.is_ok() {
            return rs;
        }
        let meta: ObjectEntryMeta = match rs.decode() {
            Ok(meta) => meta,
            Err(err) => return Reply::fault(Status::BadArgument, err.to_string()),
        };
        if meta.size != size {
            return Reply::fault(Status::BadArgument, "object size mismatch");
        }
        if !meta.attr_allow(OBJECT_ATTR_COMMITTING) {
            // Already fully stored; nothing to submit.
            return Reply::ok();
        }
        let Some(block_size) = meta.block_size() else {
            return Reply::fault(Status::BadArgument, "unknown block size class");
        };

        let done = meta.block_set();
        let count = block_count(size, block_size);
        debug!(path = %path, size, count, resumed = done.len(), "object upload");

        let mut buf = vec![0u8; block_size as usize];
        for num in 0..count {
            if done.has(num) {
                continue;
            }
            let len = block_len(size, block_size, num) as usize;
            let fill = src
                .seek(SeekFrom::Start(u64::from(num) * block_size))
                .and_then(|_| src.read_exact(&mut buf[..len]));
            if let Err(err) = fill {
                return Reply::fault(Status::BadArgument, err.to_string());
            }

            let mut block =
                ObjectEntryBlock::new(path.clone(), size, num, buf[..len].to_vec(), &*meta.commit_key);
            block.sn = meta.sn;
            block.sum = block_checksum(&block.data);
            debug!(path = %path, num, len, "block put");
            let rs = self.fo_mp_put(&block);
            if !rs.is_ok() {
                return rs;
            }
        }

        Reply::ok()
    }

    /// Uploads a whole file as the object at `dst_path`.
    pub fn fo_file_put(&self, src_path: impl AsRef<Path>, dst_path: &str) -> Reply {
        let mut file = match File::open(src_path) {
            Ok(file) => file,
            Err(err) => return Reply::fault(Status::BadArgument, err.to_string()),
        };
        let size = match file.metadata() {
            Ok(stat) => stat.len(),
            Err(err) => return Reply::fault(Status::BadArgument, err.to_string()),
        };
        self.fo_put(&mut file, size, dst_path)
    }

    /// Opens a stored object for random-access reading.
    pub fn fo_file_open(&self, path: &str) -> ClientResult<ObjectReader<'_>> {
        let rs = self.fo_get(path);
        if !rs.is_ok() {
            return Err(ClientError::Command {
                status: rs.status(),
                message: rs.string(),
            });
        }
        let db_meta = rs.meta().ok_or(ClientError::InvalidValue)?;
        let meta: ObjectEntryMeta = rs.decode()?;
        Ok(ObjectReader {
            conn: self,
            db_meta,
            meta,
            path: fo_path_clean(path),
            offset: 0,
            cur_block: None,
        })
    }
}

/// Random-access reader over a stored object.
///
/// Holds a logical offset and caches the most recently fetched block;
/// sequential reads fetch each block exactly once.
pub struct ObjectReader<'a> {
    conn: &'a Connector,
    db_meta: KvMeta,
    meta: ObjectEntryMeta,
    path: String,
    offset: u64,
    cur_block: Option<ObjectEntryBlock>,
}

impl ObjectReader<'_> {
    /// Total object size in bytes.
    pub fn size(&self) -> u64 {
        self.meta.size
    }

    /// Session metadata of the stored object.
    pub fn entry_meta(&self) -> &ObjectEntryMeta {
        &self.meta
    }

    /// Store-level metadata record of the entry.
    pub fn kv_meta(&self) -> &KvMeta {
        &self.db_meta
    }

    fn fetch_block(&mut self, num: u32) -> io::Result<()> {
        debug!(path = %self.path, num, "block get");
        let mut request = ObjectEntryBlock::new(self.path.clone(), 0, num, Vec::<u8>::new(), "");
        request.sn = self.meta.sn;
        let rs = self.conn.fo_mp_get(&request);
        if !rs.is_ok() {
            return Err(io_inconsistent("block fetch failed"));
        }
        let block: ObjectEntryBlock = rs
            .decode()
            .map_err(|_| io_inconsistent("block decode failed"))?;
        if block.data.is_empty() {
            return Err(io_inconsistent("empty block payload"));
        }
        self.cur_block = Some(block);
        Ok(())
    }
}

impl Read for ObjectReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let block_size = self
            .meta
            .block_size()
            .ok_or_else(|| io_inconsistent("unknown block size class"))?;

        let mut done = 0;
        while done < buf.len() && self.offset < self.meta.size {
            let num = (self.offset / block_size) as u32;
            let block_off = (self.offset % block_size) as usize;

            if self.cur_block.as_ref().map(|b| b.num) != Some(num) {
                self.fetch_block(num)?;
            }
            let Some(block) = self.cur_block.as_ref() else {
                return Err(io_inconsistent("missing block payload"));
            };
            if block_off >= block.data.len() {
                return Err(io_inconsistent("offset beyond block payload"));
            }

            let n = (block.data.len() - block_off).min(buf.len() - done);
            buf[done..done + n].copy_from_slice(&block.data[block_off..block_off + n]);
            self.offset += n as u64;
            done += n;
        }
        Ok(done)
    }
}

impl Seek for ObjectReader<'_> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target: i128 = match pos {
            SeekFrom::Start(n) => i128::from(n),
            SeekFrom::Current(delta) => i128::from(self.offset) + i128::from(delta),
            SeekFrom::End(delta) => i128::from(self.meta.size) + i128::from(delta),
        };
        if target < 0 || target > i128::from(u64::MAX) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek out of range",
            ));
        }
        // Seeking past the end is allowed; reads there signal end-of-data.
        self.offset = target as u64;
        Ok(self.offset)
    }
}

fn io_inconsistent(message: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message)
}

/// Canonical form of an object path key: dot segments resolved, no
/// leading or trailing separators or dots.
pub fn fo_path_clean(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for seg in path.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            _ => parts.push(seg),
        }
    }
    parts.join("/").trim_matches('.').to_string()
}

fn fo_path_encode(path: &str) -> Vec<u8> {
    fo_path_clean(path).into_bytes()
}

#![allow(dead_code)]

//! Scripted in-process server for integration tests.
//!
//! Speaks just enough of the wire protocol to exercise the client: auth,
//! the kv verbs, and the chunked object-transfer session verbs, backed by
//! an in-memory store. Failure injection knobs cover the timeout, redial
//! and upload-resume scenarios.

use std::collections::{BTreeMap, HashMap};
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use ostor_client::{
    block_checksum, block_count, Config, Connector, KvMeta, ObjectEntryBlock, ObjectEntryInit,
    ObjectEntryMeta, Value, OBJECT_ATTR_BLOCK_SIZE_4MB, OBJECT_ATTR_COMMITTING,
    OBJECT_BLOCK_SIZE_4MB,
};

#[derive(Default)]
pub struct ServerOptions {
    /// Require this token via the auth verb before any other command.
    pub auth: Option<String>,
    /// Sleep this long before handling each non-auth command.
    pub delay: Duration,
    /// Read commands but never answer them (deadline tests).
    pub silent: bool,
    /// Close the connection after this many non-auth replies.
    pub close_after: Option<usize>,
    /// Advertise these attrs from fompinit instead of the defaults.
    pub init_attrs: Option<u64>,
    /// Serve fompget replies whose block payload is empty.
    pub empty_blocks: bool,
}

pub struct TestServer {
    host: String,
    port: u16,
    state: Arc<ServerState>,
}

struct ServerState {
    opts: ServerOptions,
    store: Mutex<Store>,
    /// Block index to reject exactly once on fompput.
    fail_block: Mutex<Option<u32>>,
    /// Verbs handled, in arrival order.
    log: Mutex<Vec<String>>,
    sn_counter: AtomicU64,
}

#[derive(Default)]
struct Store {
    kv: HashMap<Vec<u8>, StoredKv>,
    objects: HashMap<String, ObjectState>,
}

struct StoredKv {
    data: Vec<u8>,
    expired: u64,
}

struct ObjectState {
    size: u64,
    sn: u64,
    commit_key: String,
    blocks: BTreeMap<u32, Vec<u8>>,
}

impl ObjectState {
    fn complete(&self) -> bool {
        let count = block_count(self.size, OBJECT_BLOCK_SIZE_4MB) as usize;
        self.blocks.len() == count
            && self.blocks.values().map(|b| b.len() as u64).sum::<u64>() == self.size
    }

    fn meta(&self, path: &str, committing: bool, attrs_override: Option<u64>) -> ObjectEntryMeta {
        let mut attrs = OBJECT_ATTR_BLOCK_SIZE_4MB;
        if committing {
            attrs |= OBJECT_ATTR_COMMITTING;
        }
        ObjectEntryMeta {
            path: path.to_string(),
            size: self.size,
            sn: self.sn,
            attrs: attrs_override.unwrap_or(attrs),
            commit_key: if committing {
                self.commit_key.clone()
            } else {
                String::new()
            },
            blocks: self.blocks.keys().copied().collect(),
        }
    }
}

impl TestServer {
    pub fn start() -> TestServer {
        TestServer::start_with(ServerOptions::default())
    }

    pub fn start_with(opts: ServerOptions) -> TestServer {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");
        let state = Arc::new(ServerState {
            opts,
            store: Mutex::new(Store::default()),
            fail_block: Mutex::new(None),
            log: Mutex::new(Vec::new()),
            sn_counter: AtomicU64::new(1),
        });

        let accept_state = state.clone();
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { break };
                let conn_state = accept_state.clone();
                thread::spawn(move || serve_connection(stream, conn_state));
            }
        });

        TestServer {
            host: addr.ip().to_string(),
            port: addr.port(),
            state,
        }
    }

    /// Configuration pointing at this server.
    pub fn config(&self) -> Config {
        Config {
            host: self.host.clone(),
            port: self.port,
            auth: self
                .state
                .opts
                .auth
                .clone()
                .unwrap_or_default(),
            timeout: 3,
            max_conn: 2,
            ..Config::default()
        }
    }

    pub fn connect(&self) -> Connector {
        Connector::open(self.config()).expect("connect")
    }

    pub fn connect_with(&self, adjust: impl FnOnce(&mut Config)) -> Connector {
        let mut config = self.config();
        adjust(&mut config);
        Connector::open(config).expect("connect")
    }

    pub fn log(&self) -> Vec<String> {
        self.state.log.lock().unwrap().clone()
    }

    pub fn count_verb(&self, verb: &str) -> usize {
        self.log().iter().filter(|v| v.as_str() == verb).count()
    }

    /// Rejects the next fompput for this block index, once.
    pub fn fail_block_once(&self, num: u32) {
        *self.state.fail_block.lock().unwrap() = Some(num);
    }

    /// Block indices currently durable for an object.
    pub fn stored_blocks(&self, path: &str) -> Vec<u32> {
        let store = self.state.store.lock().unwrap();
        store
            .objects
            .get(path)
            .map(|object| object.blocks.keys().copied().collect())
            .unwrap_or_default()
    }
}

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock")
        .as_millis() as u64
}

fn serve_connection(stream: TcpStream, state: Arc<ServerState>) {
    let mut writer = stream.try_clone().expect("clone stream");
    let mut reader = BufReader::new(stream);
    let mut authed = state.opts.auth.is_none();
    let mut replied = 0usize;

    while let Ok(Some(args)) = read_command(&mut reader) {
        let verb = String::from_utf8_lossy(&args[0]).to_string();
        state.log.lock().unwrap().push(verb.clone());

        if verb == "auth" {
            let expect = state.opts.auth.as_deref().unwrap_or("");
            if args.len() == 2 && args[1] == expect.as_bytes() {
                authed = true;
                write_simple(&mut writer, "OK");
            } else {
                write_error(&mut writer, "ERR auth failed");
            }
            continue;
        }
        if !authed {
            write_error(&mut writer, "ERR noauth");
            continue;
        }
        if !state.opts.delay.is_zero() {
            thread::sleep(state.opts.delay);
        }
        if state.opts.silent {
            // Hold the reply past any client deadline, then hang up.
            thread::sleep(Duration::from_secs(10));
            return;
        }

        dispatch(&verb, &args, &state, &mut writer);

        replied += 1;
        if state.opts.close_after == Some(replied) {
            return;
        }
    }
}

fn dispatch(verb: &str, args: &[Vec<u8>], state: &ServerState, out: &mut TcpStream) {
    match verb {
        "kvput" => kv_put(args, state, out, false),
        "kvnew" => kv_put(args, state, out, true),
        "kvget" => kv_get(args, state, out),
        "kvmeta" => kv_meta(args, state, out),
        "kvdel" => kv_del(args, state, out),
        "kvincr" => kv_incr(args, state, out),
        "kvscan" => kv_scan(args, state, out, false),
        "kvrevscan" => kv_scan(args, state, out, true),
        "fompinit" => fo_mp_init(args, state, out),
        "fompput" => fo_mp_put(args, state, out),
        "fompget" => fo_mp_get(args, state, out),
        "foget" => fo_get(args, state, out),
        "foscan" => fo_scan(args, state, out, false),
        "forevscan" => fo_scan(args, state, out, true),
        _ => write_error(out, "ERR unknown command"),
    }
}

fn kv_put(args: &[Vec<u8>], state: &ServerState, out: &mut TcpStream, create_only: bool) {
    let key = args[1].clone();
    let data = args[2].clone();
    let mut ttl_ms = 0u64;
    let mut prev_sum: Option<u32> = None;

    let mut idx = 3;
    // kvnew carries a literal NX marker ahead of the options.
    if create_only && idx < args.len() && args[idx] == b"NX" {
        idx += 1;
    }
    while idx + 1 < args.len() {
        match args[idx].as_slice() {
            b"PX" => ttl_ms = text_u64(&args[idx + 1]),
            b"CS" => prev_sum = Some(text_u64(&args[idx + 1]) as u32),
            _ => {}
        }
        idx += 2;
    }

    let mut store = state.store.lock().unwrap();
    let existing = store.kv.get(&key);
    if create_only && existing.is_some() {
        write_error(out, "ERR key exists");
        return;
    }
    if let Some(required) = prev_sum {
        let current = existing.map(|kv| crc32fast_sum(&kv.data));
        if current != Some(required) {
            write_error(out, "ERR checksum precondition failed");
            return;
        }
    }
    let expired = if ttl_ms > 0 { now_ms() + ttl_ms } else { 0 };
    store.kv.insert(key, StoredKv { data, expired });
    write_simple(out, "OK");
}

fn kv_get(args: &[Vec<u8>], state: &ServerState, out: &mut TcpStream) {
    let store = state.store.lock().unwrap();
    match store.kv.get(&args[1]) {
        Some(kv) => {
            let mut meta = KvMeta::new(kv.data.len() as u64, crc32fast_sum(&kv.data));
            meta.expired = kv.expired;
            write_bulk(out, &meta.wrap(&kv.data));
        }
        None => write_nil(out),
    }
}

fn kv_meta(args: &[Vec<u8>], state: &ServerState, out: &mut TcpStream) {
    let store = state.store.lock().unwrap();
    match store.kv.get(&args[1]) {
        Some(kv) => {
            let mut meta = KvMeta::new(kv.data.len() as u64, crc32fast_sum(&kv.data));
            meta.expired = kv.expired;
            write_bulk(out, &meta.wrap(&[]));
        }
        None => write_nil(out),
    }
}

fn kv_del(args: &[Vec<u8>], state: &ServerState, out: &mut TcpStream) {
    let mut store = state.store.lock().unwrap();
    let mut removed = 0i64;
    for key in &args[1..] {
        if store.kv.remove(key).is_some() {
            removed += 1;
        }
    }
    write_integer(out, removed);
}

fn kv_incr(args: &[Vec<u8>], state: &ServerState, out: &mut TcpStream) {
    let mut store = state.store.lock().unwrap();
    let current = store
        .kv
        .get(&args[1])
        .map(|kv| Value::decode(&kv.data).i64())
        .unwrap_or(0);
    let next = current + text_i64(&args[2]);
    store.kv.insert(
        args[1].clone(),
        StoredKv {
            data: Value::from(next).encode(),
            expired: 0,
        },
    );
    write_integer(out, next);
}

fn kv_scan(args: &[Vec<u8>], state: &ServerState, out: &mut TcpStream, reverse: bool) {
    let offset = &args[1];
    let cutset = &args[2];
    let limit = text_u64(&args[3]) as usize;

    let store = state.store.lock().unwrap();
    let mut keys: Vec<&Vec<u8>> = store
        .kv
        .keys()
        .filter(|key| key.as_slice() >= offset.as_slice() && key.as_slice() <= cutset.as_slice())
        .collect();
    keys.sort();
    if reverse {
        keys.reverse();
    }
    keys.truncate(limit);

    write_array_header(out, (keys.len() * 2) as i64);
    for key in keys {
        let kv = &store.kv[key.as_slice()];
        write_bulk(out, key);
        write_bulk(out, &kv.data);
    }
}

fn fo_mp_init(args: &[Vec<u8>], state: &ServerState, out: &mut TcpStream) {
    let init: ObjectEntryInit = match Value::decode(&args[1]).decode_json() {
        Ok(init) => init,
        Err(_) => {
            write_error(out, "ERR bad init record");
            return;
        }
    };

    let mut store = state.store.lock().unwrap();
    if let Some(object) = store.objects.get(&init.path) {
        if object.size == init.size && object.complete() {
            let meta = object.meta(&init.path, false, None);
            write_bulk(out, &Value::json(&meta).expect("meta json").encode());
            return;
        }
    }
    let sn = state.sn_counter.fetch_add(1, Ordering::Relaxed);
    let object = store
        .objects
        .entry(init.path.clone())
        .or_insert_with(|| ObjectState {
            size: init.size,
            sn,
            commit_key: format!("ck-{sn}"),
            blocks: BTreeMap::new(),
        });
    object.size = init.size;
    let meta = object.meta(&init.path, true, state.opts.init_attrs);
    write_bulk(out, &Value::json(&meta).expect("meta json").encode());
}

fn fo_mp_put(args: &[Vec<u8>], state: &ServerState, out: &mut TcpStream) {
    let block: ObjectEntryBlock = match Value::decode(&args[1]).decode_json() {
        Ok(block) => block,
        Err(_) => {
            write_error(out, "ERR bad block record");
            return;
        }
    };

    let mut fail_block = state.fail_block.lock().unwrap();
    if *fail_block == Some(block.num) {
        fail_block.take();
        write_error(out, "ERR injected block failure");
        return;
    }
    drop(fail_block);

    let mut store = state.store.lock().unwrap();
    let Some(object) = store.objects.get_mut(&block.path) else {
        write_error(out, "ERR no session");
        return;
    };
    if block.commit_key != object.commit_key {
        write_error(out, "ERR commit key mismatch");
        return;
    }
    if block.num >= block_count(object.size, OBJECT_BLOCK_SIZE_4MB) {
        write_error(out, "ERR block out of range");
        return;
    }
    if block_checksum(&block.data) != block.sum {
        write_error(out, "ERR block checksum mismatch");
        return;
    }
    object.blocks.insert(block.num, block.data.to_vec());
    write_simple(out, "OK");
}

fn fo_mp_get(args: &[Vec<u8>], state: &ServerState, out: &mut TcpStream) {
    let request: ObjectEntryBlock = match Value::decode(&args[1]).decode_json() {
        Ok(request) => request,
        Err(_) => {
            write_error(out, "ERR bad block record");
            return;
        }
    };

    let store = state.store.lock().unwrap();
    let Some(object) = store.objects.get(&request.path) else {
        write_nil(out);
        return;
    };
    let Some(data) = object.blocks.get(&request.num) else {
        write_nil(out);
        return;
    };
    let data = if state.opts.empty_blocks {
        Vec::new()
    } else {
        data.clone()
    };
    let mut block = ObjectEntryBlock::new(request.path.clone(), object.size, request.num, data, "");
    block.sn = object.sn;
    block.sum = block_checksum(&block.data);
    write_bulk(out, &Value::json(&block).expect("block json").encode());
}

fn fo_get(args: &[Vec<u8>], state: &ServerState, out: &mut TcpStream) {
    let path = String::from_utf8_lossy(&args[1]).to_string();
    let store = state.store.lock().unwrap();
    match store.objects.get(&path) {
        Some(object) if object.complete() => {
            let value = Value::json(&object.meta(&path, false, None))
                .expect("meta json")
                .encode();
            let meta = KvMeta::new(object.size, crc32fast_sum(&value));
            write_bulk(out, &meta.wrap(&value));
        }
        _ => write_nil(out),
    }
}

fn fo_scan(args: &[Vec<u8>], state: &ServerState, out: &mut TcpStream, reverse: bool) {
    let offset = String::from_utf8_lossy(&args[1]).to_string();
    let cutset = String::from_utf8_lossy(&args[2]).to_string();
    let limit = text_u64(&args[3]) as usize;

    let store = state.store.lock().unwrap();
    let mut paths: Vec<&String> = store
        .objects
        .iter()
        .filter(|(path, object)| {
            object.complete() && path.as_str() >= offset.as_str() && path.as_str() <= cutset.as_str()
        })
        .map(|(path, _)| path)
        .collect();
    paths.sort();
    if reverse {
        paths.reverse();
    }
    paths.truncate(limit);

    write_array_header(out, (paths.len() * 2) as i64);
    for path in paths {
        let object = &store.objects[path.as_str()];
        write_bulk(out, path.as_bytes());
        write_bulk(
            out,
            &Value::json(&object.meta(path, false, None))
                .expect("meta json")
                .encode(),
        );
    }
}

fn crc32fast_sum(data: &[u8]) -> u32 {
    block_checksum(data) as u32
}

fn text_u64(data: &[u8]) -> u64 {
    std::str::from_utf8(data)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(0)
}

fn text_i64(data: &[u8]) -> i64 {
    std::str::from_utf8(data)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(0)
}

// Request reading, shared with every handler thread.

fn read_command(reader: &mut BufReader<TcpStream>) -> std::io::Result<Option<Vec<Vec<u8>>>> {
    let mut line = Vec::new();
    if read_line(reader, &mut line)?.is_none() {
        return Ok(None);
    }
    if line.first() != Some(&b'*') {
        return Err(invalid("expected array"));
    }
    let count = parse_usize(&line[1..])?;
    let mut args = Vec::with_capacity(count);
    for _ in 0..count {
        if read_line(reader, &mut line)?.is_none() {
            return Err(invalid("eof inside command"));
        }
        if line.first() != Some(&b'$') {
            return Err(invalid("expected bulk"));
        }
        let len = parse_usize(&line[1..])?;
        let mut data = vec![0u8; len];
        reader.read_exact(&mut data)?;
        let mut crlf = [0u8; 2];
        reader.read_exact(&mut crlf)?;
        if crlf != [b'\r', b'\n'] {
            return Err(invalid("missing crlf"));
        }
        args.push(data);
    }
    Ok(Some(args))
}

fn read_line(reader: &mut BufReader<TcpStream>, buf: &mut Vec<u8>) -> std::io::Result<Option<()>> {
    buf.clear();
    let bytes = reader.read_until(b'\n', buf)?;
    if bytes == 0 {
        return Ok(None);
    }
    if buf.len() < 2 || buf[buf.len() - 2] != b'\r' {
        return Err(invalid("invalid line"));
    }
    buf.truncate(buf.len() - 2);
    Ok(Some(()))
}

fn parse_usize(data: &[u8]) -> std::io::Result<usize> {
    std::str::from_utf8(data)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| invalid("bad length"))
}

fn invalid(message: &str) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, message.to_string())
}

// Response writing.

pub fn write_simple(stream: &mut TcpStream, text: &str) {
    let _ = stream.write_all(b"+");
    let _ = stream.write_all(text.as_bytes());
    let _ = stream.write_all(b"\r\n");
}

pub fn write_error(stream: &mut TcpStream, message: &str) {
    let _ = stream.write_all(b"-");
    let _ = stream.write_all(message.as_bytes());
    let _ = stream.write_all(b"\r\n");
}

pub fn write_integer(stream: &mut TcpStream, value: i64) {
    let _ = stream.write_all(b":");
    let _ = stream.write_all(value.to_string().as_bytes());
    let _ = stream.write_all(b"\r\n");
}

pub fn write_bulk(stream: &mut TcpStream, data: &[u8]) {
    let _ = stream.write_all(b"$");
    let _ = stream.write_all(data.len().to_string().as_bytes());
    let _ = stream.write_all(b"\r\n");
    let _ = stream.write_all(data);
    let _ = stream.write_all(b"\r\n");
}

pub fn write_nil(stream: &mut TcpStream) {
    let _ = stream.write_all(b"$-1\r\n");
}

pub fn write_array_header(stream: &mut TcpStream, count: i64) {
    let _ = stream.write_all(b"*");
    let _ = stream.write_all(count.to_string().as_bytes());
    let _ = stream.write_all(b"\r\n");
}

//! Thread-based fake memcache servers for integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use memc_client::{ClientConfig, MemcacheClient};
use memc_common::Endpoint;

/// One parsed request: the command line split on spaces, plus the data block
/// for storage commands.
pub struct Command {
    pub tokens: Vec<String>,
    pub data: Option<Vec<u8>>,
}

impl Command {
    pub fn verb(&self) -> &str {
        self.tokens.first().map(String::as_str).unwrap_or("")
    }
}

pub struct FakeServer {
    pub endpoint: Endpoint,
    accepted: Arc<AtomicUsize>,
}

impl FakeServer {
    /// Number of TCP connections accepted so far.
    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }
}

type Handler = fn(usize, usize, &Command, &mut TcpStream);

/// Spawns a server that calls `handler(conn_idx, cmd_idx, command, stream)`
/// for every request on every connection.
pub fn spawn_scripted(handler: Handler) -> FakeServer {
    spawn(move |conn_idx, stream| {
        let mut writer = stream.try_clone().expect("clone");
        let mut reader = BufReader::new(stream);
        let mut cmd_idx = 0;
        while let Some(command) = read_command(&mut reader) {
            handler(conn_idx, cmd_idx, &command, &mut writer);
            cmd_idx += 1;
        }
    })
}

/// Spawns a stateful in-memory memcache lookalike shared by all connections.
pub fn spawn_memcache() -> FakeServer {
    let store: Arc<Mutex<HashMap<Vec<u8>, (u32, Vec<u8>)>>> = Arc::default();
    spawn(move |_, stream| {
        let mut writer = stream.try_clone().expect("clone");
        let mut reader = BufReader::new(stream);
        while let Some(command) = read_command(&mut reader) {
            if command.verb() == "quit" {
                return;
            }
            let reply = respond(&store, &command);
            if writer.write_all(&reply).is_err() {
                return;
            }
        }
    })
}

fn spawn<F>(serve: F) -> FakeServer
where
    F: Fn(usize, TcpStream) + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr");
    let accepted = Arc::new(AtomicUsize::new(0));
    let serve = Arc::new(serve);

    let counter = Arc::clone(&accepted);
    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(stream) = stream else { return };
            let conn_idx = counter.fetch_add(1, Ordering::SeqCst);
            let serve = Arc::clone(&serve);
            thread::spawn(move || serve(conn_idx, stream));
        }
    });

    FakeServer {
        endpoint: Endpoint::new("127.0.0.1", addr.port()).expect("endpoint"),
        accepted,
    }
}

fn read_command(reader: &mut BufReader<TcpStream>) -> Option<Command> {
    let mut line = Vec::new();
    if reader.read_until(b'\n', &mut line).ok()? == 0 {
        return None;
    }
    assert!(line.ends_with(b"\r\n"), "request line must end in CRLF: {line:?}");
    line.truncate(line.len() - 2);
    let tokens: Vec<String> = String::from_utf8(line)
        .expect("utf8 request")
        .split(' ')
        .map(str::to_string)
        .collect();

    let data = match tokens[0].as_str() {
        "set" | "add" | "replace" => {
            let len: usize = tokens[4].parse().expect("length");
            let mut data = vec![0u8; len + 2];
            reader.read_exact(&mut data).ok()?;
            assert_eq!(&data[len..], b"\r\n");
            data.truncate(len);
            Some(data)
        }
        _ => None,
    };
    Some(Command { tokens, data })
}

fn respond(store: &Mutex<HashMap<Vec<u8>, (u32, Vec<u8>)>>, command: &Command) -> Vec<u8> {
    let mut store = store.lock().expect("store");
    let key = || command.tokens[1].as_bytes().to_vec();
    match command.verb() {
        "set" | "add" | "replace" => {
            let exists = store.contains_key(&key());
            let allowed = match command.verb() {
                "add" => !exists,
                "replace" => exists,
                _ => true,
            };
            if !allowed {
                return b"NOT_STORED\r\n".to_vec();
            }
            let flags: u32 = command.tokens[2].parse().expect("flags");
            let data = command.data.clone().unwrap_or_default();
            store.insert(key(), (flags, data));
            b"STORED\r\n".to_vec()
        }
        "get" => {
            let mut out = Vec::new();
            for name in &command.tokens[1..] {
                if let Some((flags, data)) = store.get(name.as_bytes()) {
                    out.extend_from_slice(format!("VALUE {} {} {}\r\n", name, flags, data.len()).as_bytes());
                    out.extend_from_slice(data);
                    out.extend_from_slice(b"\r\n");
                }
            }
            out.extend_from_slice(b"END\r\n");
            out
        }
        "incr" | "decr" => {
            let delta: u64 = command.tokens[2].parse().expect("delta");
            let Some((_, data)) = store.get_mut(&key()) else {
                return b"NOT_FOUND\r\n".to_vec();
            };
            let Some(current) = std::str::from_utf8(data).ok().and_then(|s| s.parse::<u64>().ok()) else {
                return b"CLIENT_ERROR cannot increment or decrement non-numeric value\r\n".to_vec();
            };
            let next = if command.verb() == "incr" {
                current.wrapping_add(delta)
            } else {
                current.saturating_sub(delta)
            };
            *data = next.to_string().into_bytes();
            format!("{}\r\n", next).into_bytes()
        }
        "delete" => match store.remove(&key()) {
            Some(_) => b"DELETED\r\n".to_vec(),
            None => b"NOT_FOUND\r\n".to_vec(),
        },
        "stats" => format!(
            "STAT pid 4242\r\nSTAT curr_items {}\r\nSTAT version fake/1.0\r\nEND\r\n",
            store.len()
        )
        .into_bytes(),
        "flush_all" => {
            store.clear();
            b"OK\r\n".to_vec()
        }
        "version" => b"VERSION 1.6.21-fake\r\n".to_vec(),
        _ => b"ERROR\r\n".to_vec(),
    }
}

pub fn write_reply(stream: &mut TcpStream, reply: &[u8]) {
    let _ = stream.write_all(reply);
    let _ = stream.flush();
}

/// Client for a single endpoint with short deadlines and a one-socket pool.
pub fn client_for(endpoint: &Endpoint) -> MemcacheClient {
    client_with(endpoint, |_| {})
}

pub fn client_with(endpoint: &Endpoint, tweak: impl FnOnce(&mut ClientConfig)) -> MemcacheClient {
    let mut config = ClientConfig {
        endpoints: vec![endpoint.clone()],
        max_idle: 1,
        max_total: 1,
        read_timeout: Some(Duration::from_secs(1)),
        write_timeout: Some(Duration::from_secs(1)),
        connect_timeout: Some(Duration::from_secs(1)),
        ..ClientConfig::default()
    };
    tweak(&mut config);
    MemcacheClient::with_config(config).expect("client")
}

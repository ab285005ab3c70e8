//! In-process fake memcached speaking the binary protocol.
//!
//! One thread per connection, a shared store behind a mutex, and a
//! `ManualClock` shared with the client under test so expirations are
//! deterministic.

#![allow(dead_code)]

use std::collections::HashMap;
use std::io::{BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use mc_client::{Clock, ClientConfig, KeyHashing, ManualClock};
use mc_common::{CounterExtras, Frame, Magic, Opcode, Packet, Status, StorageExtras, NO_CREATE_EXPIRATION};
use parking_lot::Mutex;

pub const START: i64 = 1_700_000_000;

#[derive(Debug, Clone)]
struct Entry {
    value: Vec<u8>,
    flags: [u8; 4],
    cas: u64,
    expire_at: Option<i64>,
}

#[derive(Debug, Default)]
struct Store {
    entries: HashMap<Vec<u8>, Entry>,
    next_cas: u64,
}

impl Store {
    fn live(&mut self, key: &[u8], now: i64) -> Option<&mut Entry> {
        let expired = matches!(
            self.entries.get(key),
            Some(Entry { expire_at: Some(at), .. }) if now >= *at
        );
        if expired {
            self.entries.remove(key);
        }
        self.entries.get_mut(key)
    }

    fn put(&mut self, key: &[u8], value: Vec<u8>, flags: [u8; 4], expiration: u32, now: i64) -> u64 {
        self.next_cas += 1;
        let expire_at = (expiration != 0).then(|| now + i64::from(expiration));
        self.entries.insert(
            key.to_vec(),
            Entry {
                value,
                flags,
                cas: self.next_cas,
                expire_at,
            },
        );
        self.next_cas
    }
}

pub struct FakeServer {
    pub addr: String,
    pub clock: ManualClock,
    accepted: Arc<AtomicUsize>,
    store: Arc<Mutex<Store>>,
}

impl FakeServer {
    pub fn start(clock: ManualClock) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr").to_string();
        let accepted = Arc::new(AtomicUsize::new(0));
        let store = Arc::new(Mutex::new(Store::default()));

        let counter = accepted.clone();
        let shared = store.clone();
        let server_clock = clock.clone();
        thread::spawn(move || {
            for stream in listener.incoming() {
                let stream = match stream {
                    Ok(stream) => stream,
                    Err(_) => break,
                };
                counter.fetch_add(1, Ordering::SeqCst);
                let store = shared.clone();
                let clock = server_clock.clone();
                thread::spawn(move || serve(stream, store, clock));
            }
        });

        FakeServer {
            addr,
            clock,
            accepted,
            store,
        }
    }

    /// Connections accepted so far.
    pub fn accepted(&self) -> usize {
        // Accepting runs on another thread.
        thread::sleep(Duration::from_millis(50));
        self.accepted.load(Ordering::SeqCst)
    }

    /// Raw stored value under a wire key, ignoring expiry.
    pub fn raw(&self, wire_key: &[u8]) -> Option<Vec<u8>> {
        self.store.lock().entries.get(wire_key).map(|entry| entry.value.clone())
    }

    pub fn contains(&self, wire_key: &[u8]) -> bool {
        let now = self.clock.unix();
        self.store.lock().live(wire_key, now).is_some()
    }
}

/// Identity-hashed config for a list of servers, so stored keys are readable.
pub fn config<S: AsRef<str>>(addrs: &[S]) -> ClientConfig {
    let mut config = ClientConfig::new(addrs.iter().map(|addr| addr.as_ref()));
    config.key_hashing = KeyHashing::Identity;
    config
}

fn serve(stream: TcpStream, store: Arc<Mutex<Store>>, clock: ManualClock) {
    let mut writer = match stream.try_clone() {
        Ok(writer) => writer,
        Err(_) => return,
    };
    let mut reader = BufReader::new(stream);
    let mut frame = Frame::new();
    let mut out = Vec::new();
    while frame.read_from(&mut reader, Magic::Request).is_ok() {
        out.clear();
        handle(&frame, &store, clock.unix(), &mut out);
        if !out.is_empty() && writer.write_all(&out).is_err() {
            return;
        }
    }
}

fn handle(frame: &Frame, store: &Mutex<Store>, now: i64, out: &mut Vec<u8>) {
    let opcode = match frame.opcode() {
        Some(opcode) => opcode,
        None => {
            reply_status(out, Opcode::Noop, Status::Other(0x0081), frame.opaque());
            return;
        }
    };
    let key = frame.key();
    let mut store = store.lock();

    match opcode {
        Opcode::Get | Opcode::GetKQ => match store.live(key, now) {
            Some(entry) => {
                let mut packet = Packet::response(opcode, Status::Ok)
                    .extras(&entry.flags)
                    .data(&entry.value)
                    .cas(entry.cas)
                    .opaque(frame.opaque());
                if opcode == Opcode::GetKQ {
                    packet = packet.key(key);
                }
                packet.encode(out).expect("encode");
            }
            None if opcode == Opcode::GetKQ => {}
            None => reply_status(out, opcode, Status::KeyNotFound, frame.opaque()),
        },
        Opcode::Set | Opcode::Add => {
            let extras = StorageExtras::decode(frame.extras()).expect("storage extras");
            let mut flags = [0u8; 4];
            flags.copy_from_slice(&frame.extras()[..4]);
            let existing = store.live(key, now).map(|entry| entry.cas);
            let status = match (opcode, existing, frame.cas()) {
                (Opcode::Add, Some(_), _) => Some(Status::KeyExists),
                (Opcode::Set, None, cas) if cas != 0 => Some(Status::KeyNotFound),
                (Opcode::Set, Some(current), cas) if cas != 0 && cas != current => {
                    Some(Status::KeyExists)
                }
                _ => None,
            };
            match status {
                Some(status) => reply_status(out, opcode, status, frame.opaque()),
                None => {
                    let cas = store.put(key, frame.data().to_vec(), flags, extras.expiration, now);
                    Packet::response(opcode, Status::Ok)
                        .cas(cas)
                        .opaque(frame.opaque())
                        .encode(out)
                        .expect("encode");
                }
            }
        }
        Opcode::Delete => {
            let found = store.live(key, now).is_some();
            if found {
                store.entries.remove(key);
                Packet::response(opcode, Status::Ok)
                    .opaque(frame.opaque())
                    .encode(out)
                    .expect("encode");
            } else {
                reply_status(out, opcode, Status::KeyNotFound, frame.opaque());
            }
        }
        Opcode::Increment | Opcode::Decrement => {
            let extras = CounterExtras::decode(frame.extras()).expect("counter extras");
            let next = match store.live(key, now) {
                Some(entry) => {
                    let current = std::str::from_utf8(&entry.value)
                        .ok()
                        .and_then(|text| text.parse::<u64>().ok());
                    match current {
                        Some(current) if opcode == Opcode::Increment => {
                            Ok(current.wrapping_add(extras.delta))
                        }
                        Some(current) => Ok(current.saturating_sub(extras.delta)),
                        None => Err(Status::NonNumericValue),
                    }
                }
                None if extras.expiration == NO_CREATE_EXPIRATION => Err(Status::KeyNotFound),
                None => {
                    store.put(key, extras.initial.to_string().into_bytes(), [0; 4], extras.expiration, now);
                    Ok(extras.initial)
                }
            };
            match next {
                Ok(value) => {
                    if let Some(entry) = store.live(key, now) {
                        entry.value = value.to_string().into_bytes();
                    }
                    store.next_cas += 1;
                    let cas = store.next_cas;
                    if let Some(entry) = store.live(key, now) {
                        entry.cas = cas;
                    }
                    Packet::response(opcode, Status::Ok)
                        .data(&value.to_be_bytes())
                        .cas(cas)
                        .opaque(frame.opaque())
                        .encode(out)
                        .expect("encode");
                }
                Err(status) => reply_status(out, opcode, status, frame.opaque()),
            }
        }
        Opcode::Noop => {
            Packet::response(opcode, Status::Ok)
                .opaque(frame.opaque())
                .encode(out)
                .expect("encode");
        }
        _ => reply_status(out, opcode, Status::Other(0x0081), frame.opaque()),
    }
}

fn reply_status(out: &mut Vec<u8>, opcode: Opcode, status: Status, opaque: u32) {
    let message = status.to_string();
    Packet::response(opcode, status)
        .data(message.as_bytes())
        .opaque(opaque)
        .encode(out)
        .expect("encode");
}

/// Server answering every request with 24 zero bytes.
pub fn spawn_garbage_server() -> (String, Arc<AtomicUsize>) {
    spawn_scripted(|mut stream| {
        let mut header = [0u8; 24];
        while stream.read_exact(&mut header).is_ok() {
            // Requests in these tests carry no body beyond what the header declares.
            let body = u32::from_be_bytes([header[8], header[9], header[10], header[11]]) as usize;
            let mut skip = vec![0u8; body];
            if stream.read_exact(&mut skip).is_err() || stream.write_all(&[0u8; 24]).is_err() {
                return;
            }
        }
    })
}

/// Server that reads requests and never answers.
pub fn spawn_silent_server() -> (String, Arc<AtomicUsize>) {
    spawn_scripted(|mut stream| {
        let mut sink = [0u8; 1024];
        while matches!(stream.read(&mut sink), Ok(n) if n > 0) {}
    })
}

fn spawn_scripted(script: fn(TcpStream)) -> (String, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr").to_string();
    let accepted = Arc::new(AtomicUsize::new(0));
    let counter = accepted.clone();
    thread::spawn(move || {
        for stream in listener.incoming() {
            match stream {
                Ok(stream) => {
                    counter.fetch_add(1, Ordering::SeqCst);
                    thread::spawn(move || script(stream));
                }
                Err(_) => break,
            }
        }
    });
    (addr, accepted)
}

/// An address with nothing listening on it.
pub fn dead_addr() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr").to_string();
    drop(listener);
    addr
}

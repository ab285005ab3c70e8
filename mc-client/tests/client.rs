mod support;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use mc_client::{
    Client, ClientConfig, ClientError, Context, IdentityHasher, Item, Json, KetamaSelector,
    ManualClock, ServerSelector, Text, WriteOptions,
};
use serde::{Deserialize, Serialize};
use support::{config, dead_addr, spawn_garbage_server, spawn_silent_server, FakeServer, START};

fn client_for(server: &FakeServer) -> Client {
    Client::builder(config(&[&server.addr]))
        .clock(Arc::new(server.clock.clone()))
        .build()
        .expect("client")
}

fn start() -> (FakeServer, Client) {
    let server = FakeServer::start(ManualClock::new(START));
    let client = client_for(&server);
    (server, client)
}

#[test]
fn set_then_get_returns_value_and_flags() {
    let (_server, client) = start();
    let ctx = Context::background();

    let mut item = Item::new("greeting", "hello").with_flags(42);
    client.set(&ctx, &mut item, &WriteOptions::new()).unwrap();
    assert_ne!(item.cas(), 0);

    let got = client.get(&ctx, "greeting").unwrap();
    assert_eq!(got.key, "greeting");
    assert_eq!(got.value, b"hello");
    assert_eq!(got.flags, 42);
    assert_eq!(got.cas(), item.cas());
}

#[test]
fn get_missing_is_cache_miss() {
    let (_server, client) = start();
    let err = client.get(&Context::background(), "absent").unwrap_err();
    assert!(matches!(err, ClientError::CacheMiss));
}

#[test]
fn add_respects_existing_keys() {
    let (_server, client) = start();
    let ctx = Context::background();

    client
        .add(&ctx, &mut Item::new("fresh", "one"), &WriteOptions::new())
        .unwrap();
    assert_eq!(client.get(&ctx, "fresh").unwrap().value, b"one");

    let err = client
        .add(&ctx, &mut Item::new("fresh", "two"), &WriteOptions::new())
        .unwrap_err();
    assert!(matches!(err, ClientError::AlreadyExists));
    assert_eq!(client.get(&ctx, "fresh").unwrap().value, b"one");
}

#[test]
fn compare_and_swap_detects_concurrent_write() {
    let (_server, client) = start();
    let ctx = Context::background();

    client
        .set(&ctx, &mut Item::new("doc", "v1"), &WriteOptions::new())
        .unwrap();

    let mut read = client.get(&ctx, "doc").unwrap();
    read.value = b"v2".to_vec();
    client.compare_and_swap(&ctx, &mut read, &WriteOptions::new()).unwrap();
    assert_eq!(client.get(&ctx, "doc").unwrap().value, b"v2");

    let mut stale = client.get(&ctx, "doc").unwrap();
    client
        .set(&ctx, &mut Item::new("doc", "other"), &WriteOptions::new())
        .unwrap();
    stale.value = b"v3".to_vec();
    let err = client
        .compare_and_swap(&ctx, &mut stale, &WriteOptions::new())
        .unwrap_err();
    assert!(matches!(err, ClientError::CasConflict));
    assert_eq!(client.get(&ctx, "doc").unwrap().value, b"other");
}

#[test]
fn delete_removes_item() {
    let (_server, client) = start();
    let ctx = Context::background();

    client
        .set(&ctx, &mut Item::new("gone", "x"), &WriteOptions::new())
        .unwrap();
    client.delete(&ctx, "gone").unwrap();
    assert!(matches!(client.get(&ctx, "gone"), Err(ClientError::CacheMiss)));
    assert!(matches!(client.delete(&ctx, "gone"), Err(ClientError::CacheMiss)));
}

#[test]
fn counters_with_and_without_initial() {
    let (_server, client) = start();
    let ctx = Context::background();

    let err = client
        .increment(&ctx, "hits", 1, &WriteOptions::new())
        .unwrap_err();
    assert!(matches!(err, ClientError::CacheMiss));

    let created = client
        .increment(&ctx, "hits", 1, &WriteOptions::new().initial(10))
        .unwrap();
    assert_eq!(created, 10);
    assert_eq!(client.increment(&ctx, "hits", 5, &WriteOptions::new()).unwrap(), 15);
    assert_eq!(client.decrement(&ctx, "hits", 3, &WriteOptions::new()).unwrap(), 12);
    assert_eq!(client.decrement(&ctx, "hits", 100, &WriteOptions::new()).unwrap(), 0);
}

#[test]
fn counter_on_text_value_is_bad_incr_decr() {
    let (_server, client) = start();
    let ctx = Context::background();

    client
        .set(&ctx, &mut Item::new("name", "ada"), &WriteOptions::new())
        .unwrap();
    let err = client
        .increment(&ctx, "name", 1, &WriteOptions::new())
        .unwrap_err();
    assert!(matches!(err, ClientError::BadIncrDecr));
}

#[test]
fn plain_expiration_is_enforced_by_server() {
    let (server, client) = start();
    let ctx = Context::background();

    client
        .set(&ctx, &mut Item::new("short", "x"), &WriteOptions::new().expiration(10, 0))
        .unwrap();
    server.clock.advance(9);
    assert!(client.get(&ctx, "short").is_ok());
    server.clock.advance(1);
    assert!(matches!(client.get(&ctx, "short"), Err(ClientError::CacheMiss)));
}

#[test]
fn codecs_round_trip_through_server() {
    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Session {
        user: u64,
        roles: Vec<String>,
    }

    let (_server, client) = start();
    let ctx = Context::background();

    let session = Session {
        user: 7,
        roles: vec!["admin".into()],
    };
    let mut item = Item::encode_with("session:7", &session, &Json).unwrap();
    client.set(&ctx, &mut item, &WriteOptions::new()).unwrap();
    let back: Session = client.get(&ctx, "session:7").unwrap().decode_with(&Json).unwrap();
    assert_eq!(back, session);

    let mut item = Item::encode_with("motd", &"hi there".to_string(), &Text).unwrap();
    client.set(&ctx, &mut item, &WriteOptions::new()).unwrap();
    let text: String = client.get(&ctx, "motd").unwrap().decode_with(&Text).unwrap();
    assert_eq!(text, "hi there");
}

#[test]
fn default_hashing_sends_digest_keys() {
    let server = FakeServer::start(ManualClock::new(START));
    let client = Client::builder(ClientConfig::new([server.addr.as_str()]))
        .clock(Arc::new(server.clock.clone()))
        .build()
        .unwrap();
    let ctx = Context::background();

    client
        .set(&ctx, &mut Item::new("user:1", "ada"), &WriteOptions::new())
        .unwrap();
    assert!(!server.contains(b"user:1"));
    let wire = mc_client::digest(b"user:1").to_be_bytes();
    assert_eq!(server.raw(&wire), Some(b"ada".to_vec()));
    assert_eq!(client.get(&ctx, "user:1").unwrap().value, b"ada");
}

/// Selector that records calls and delegates to a ring.
#[derive(Debug)]
struct CountingSelector {
    ring: KetamaSelector,
    calls: AtomicUsize,
}

impl ServerSelector for CountingSelector {
    fn select(&self, key: &str) -> Vec<Arc<str>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.ring.select(key)
    }
}

#[test]
fn malformed_keys_fail_before_any_io() {
    let server = FakeServer::start(ManualClock::new(START));
    let selector = Arc::new(CountingSelector {
        ring: KetamaSelector::new(&[server.addr.as_str()]).unwrap(),
        calls: AtomicUsize::new(0),
    });
    let client = Client::builder(config(&[&server.addr]))
        .selector(selector.clone())
        .key_hasher(Arc::new(IdentityHasher))
        .build()
        .unwrap();
    let ctx = Context::background();

    let long = "k".repeat(251);
    for key in ["", "has space", "tab\there", "del\u{7f}", "caf\u{e9}", long.as_str()] {
        assert!(matches!(client.get(&ctx, key), Err(ClientError::MalformedKey)));
        assert!(matches!(
            client.set(&ctx, &mut Item::new(key, "v"), &WriteOptions::new()),
            Err(ClientError::MalformedKey)
        ));
        assert!(matches!(
            client.increment(&ctx, key, 1, &WriteOptions::new()),
            Err(ClientError::MalformedKey)
        ));
        assert!(matches!(client.delete(&ctx, key), Err(ClientError::MalformedKey)));
        assert!(matches!(
            client.get_multi(&ctx, &["fine", key]),
            Err(ClientError::MalformedKey)
        ));
    }
    assert_eq!(selector.calls.load(Ordering::SeqCst), 0);
    assert_eq!(server.accepted(), 0);

    let longest = "k".repeat(250);
    assert!(matches!(client.get(&ctx, &longest), Err(ClientError::CacheMiss)));
}

#[test]
fn connection_is_reused_after_status_errors() {
    let (server, client) = start();
    let ctx = Context::background();

    for _ in 0..5 {
        assert!(matches!(client.get(&ctx, "absent"), Err(ClientError::CacheMiss)));
    }
    client
        .add(&ctx, &mut Item::new("k", "v"), &WriteOptions::new())
        .unwrap();
    assert!(client
        .add(&ctx, &mut Item::new("k", "v"), &WriteOptions::new())
        .is_err());
    assert_eq!(client.get(&ctx, "k").unwrap().value, b"v");
    assert_eq!(server.accepted(), 1);
}

#[test]
fn framing_errors_discard_the_connection() {
    let (addr, accepted) = spawn_garbage_server();
    let client = Client::new(config(&[&addr])).unwrap();
    let ctx = Context::background();

    for _ in 0..3 {
        let err = client.get(&ctx, "k").unwrap_err();
        assert!(matches!(err, ClientError::Protocol(_)), "{err:?}");
    }
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(accepted.load(Ordering::SeqCst), 3);
}

#[test]
fn deadline_bounds_a_stalled_round_trip() {
    let (addr, accepted) = spawn_silent_server();
    let client = Client::new(config(&[&addr])).unwrap();

    let ctx = Context::with_timeout(Duration::from_millis(100));
    let err = client.get(&ctx, "k").unwrap_err();
    assert!(err.is_timeout(), "{err:?}");

    // The timed-out stream is not trusted again.
    let ctx = Context::with_timeout(Duration::from_millis(100));
    assert!(client.get(&ctx, "k").unwrap_err().is_timeout());
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(accepted.load(Ordering::SeqCst), 2);
}

#[test]
fn deadline_does_not_leak_into_reused_connection() {
    let (server, client) = start();

    let ctx = Context::with_timeout(Duration::from_millis(200));
    client
        .set(&ctx, &mut Item::new("k", "v"), &WriteOptions::new())
        .unwrap();
    std::thread::sleep(Duration::from_millis(250));

    let got = client.get(&Context::background(), "k").unwrap();
    assert_eq!(got.value, b"v");
    assert_eq!(server.accepted(), 1);
}

#[test]
fn expired_or_cancelled_context_fails_at_entry() {
    let (server, client) = start();

    let expired = Context::with_deadline(std::time::Instant::now() - Duration::from_millis(1));
    assert!(matches!(
        client.get(&expired, "k"),
        Err(ClientError::DeadlineExceeded)
    ));

    let (ctx, cancel) = Context::background().with_cancel();
    cancel.cancel();
    assert!(matches!(client.get(&ctx, "k"), Err(ClientError::Cancelled)));
    assert!(matches!(
        client.get_multi(&ctx, &["k"]),
        Err(ClientError::Cancelled)
    ));
    assert_eq!(server.accepted(), 0);
}

#[test]
fn unreachable_servers_fail_over_then_report_no_servers() {
    let server = FakeServer::start(ManualClock::new(START));
    let dead = dead_addr();
    let client = Client::new(config(&[&dead, &server.addr])).unwrap();
    let ctx = Context::background();

    for i in 0..20 {
        let key = format!("key-{i}");
        client
            .set(&ctx, &mut Item::new(key.as_str(), "v"), &WriteOptions::new())
            .unwrap();
        assert_eq!(client.get(&ctx, &key).unwrap().value, b"v");
    }

    let only_dead = Client::new(config(&[&dead])).unwrap();
    assert!(matches!(only_dead.get(&ctx, "k"), Err(ClientError::NoServers)));
}

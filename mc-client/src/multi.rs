//! # Multi-Get Fan-Out
//!
//! Purpose: Fetch many keys with one pipelined round per server.
//!
//! ## Protocol
//! Keys are grouped by their primary server only; there is no failover in a
//! multi-get. Each group gets its own worker, which writes one `GetKQ` per
//! key plus a trailing `Noop` in a single write, then reads frames until the
//! `Noop` echo (the only response with an empty key). Misses produce no
//! frame at all.
//!
//! ## Failure Model
//! A failing worker ends only its own shard. The caller receives whatever
//! the other shards returned plus one `ShardFailure` per failed shard.

use std::collections::HashMap as StdHashMap;
use std::iter;
use std::sync::Arc;
use std::thread;

use crossbeam_channel::Sender;
use hashbrown::{HashMap, HashSet};
use mc_common::{is_valid_key, Opcode, Packet, ProtoError};
use tracing::{trace, warn};

use crate::context::Context;
use crate::error::{ClientError, ClientResult};
use crate::item::Item;
use crate::request::{Executor, Response};

/// Outcome of a multi-get.
#[derive(Debug, Default)]
pub struct MultiGet {
    /// Hits keyed by the caller's key.
    pub items: StdHashMap<String, Item>,
    /// Shards whose round failed; their keys are missing from `items`.
    pub failures: Vec<ShardFailure>,
}

/// A server whose part of a multi-get failed.
#[derive(Debug)]
pub struct ShardFailure {
    pub addr: Arc<str>,
    pub error: ClientError,
}

enum ShardEvent {
    Hit(String, Response),
    Failed(ShardFailure),
}

impl Executor {
    /// Fetches raw responses for `keys`, grouped by primary server.
    ///
    /// Fails as a whole only for a cancelled context, a malformed key, or a
    /// key with no candidate server. Those checks run before any I/O.
    pub(crate) fn fetch_multi(
        &self,
        ctx: &Context,
        keys: &[&str],
    ) -> ClientResult<(HashMap<String, Response>, Vec<ShardFailure>)> {
        ctx.check()?;
        if !keys.iter().all(|key| is_valid_key(key.as_bytes())) {
            return Err(ClientError::MalformedKey);
        }

        let mut shards: HashMap<Arc<str>, Vec<&str>> = HashMap::new();
        let mut seen: HashSet<&str> = HashSet::with_capacity(keys.len());
        for &key in keys {
            if !seen.insert(key) {
                continue;
            }
            let primary = self
                .selector
                .select(key)
                .into_iter()
                .next()
                .ok_or(ClientError::NoServers)?;
            shards.entry(primary).or_default().push(key);
        }

        let (tx, rx) = crossbeam_channel::unbounded();
        thread::scope(|scope| {
            for (addr, group) in &shards {
                let tx = tx.clone();
                scope.spawn(move || {
                    if let Err(error) = self.fetch_shard(ctx, addr, group, &tx) {
                        warn!(addr = %addr, keys = group.len(), error = %error, "multi-get shard failed");
                        let _ = tx.send(ShardEvent::Failed(ShardFailure {
                            addr: addr.clone(),
                            error,
                        }));
                    }
                });
            }
        });
        drop(tx);

        let mut hits = HashMap::new();
        let mut failures = Vec::new();
        for event in rx {
            match event {
                ShardEvent::Hit(key, response) => {
                    hits.insert(key, response);
                }
                ShardEvent::Failed(failure) => failures.push(failure),
            }
        }
        Ok((hits, failures))
    }

    fn fetch_shard(
        &self,
        ctx: &Context,
        addr: &Arc<str>,
        keys: &[&str],
        tx: &Sender<ShardEvent>,
    ) -> ClientResult<()> {
        let mut conn = self.pool.borrow(addr)?;
        conn.apply_deadline(ctx)?;

        let wire_keys: Vec<_> = keys.iter().map(|key| self.hasher.wire_key(key)).collect();
        let names: HashMap<&[u8], &str> = wire_keys
            .iter()
            .map(|wire| wire.as_ref())
            .zip(keys.iter().copied())
            .collect();

        let packets = wire_keys
            .iter()
            .map(|wire| Packet::request(Opcode::GetKQ).key(wire))
            .chain(iter::once(Packet::request(Opcode::Noop)));
        conn.send_batch(packets)?;

        loop {
            let frame = conn.recv()?;
            if frame.key().is_empty() {
                break;
            }
            let key = match names.get(frame.key()) {
                Some(key) => *key,
                None => {
                    conn.discard();
                    return Err(ProtoError::Malformed("multi-get response for unrequested key").into());
                }
            };
            let response = Response {
                extras: frame.extras().to_vec(),
                data: frame.data().to_vec(),
                cas: frame.cas(),
            };
            // The receiver outlives the scope, so a send cannot fail here.
            let _ = tx.send(ShardEvent::Hit(key.to_owned(), response));
        }
        trace!(addr = %addr, keys = keys.len(), "multi-get shard complete");
        Ok(())
    }
}

//! # Blocking Client API
//!
//! Purpose: Expose memcached operations over the binary protocol, sharded
//! across servers and pooled per address.
//!
//! ## Design Principles
//! 1. **Facade Pattern**: `Client` hides selection, pooling and framing.
//! 2. **Recipes over the Wire**: Namespaces, scaling expiration and
//!    min-uses gating are fixed request sequences against ordinary keys,
//!    with no server-side support needed.
//! 3. **Injected Capabilities**: Selector, key hasher and clock are traits
//!    supplied through `ClientBuilder`.
//! 4. **Cheap Clones**: A `Client` is an `Arc` handle shared across threads.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use hashbrown::HashMap as NsCache;
use mc_common::{is_valid_key, CounterExtras, Opcode, ProtoError, StorageExtras};
use tracing::{debug, trace};

use crate::clock::{Clock, SystemClock};
use crate::config::ClientConfig;
use crate::conn::SocketConfig;
use crate::context::Context;
use crate::envelope::{Envelope, Expiration, NamespaceRef, ENVELOPE_MARKER};
use crate::error::{ClientError, ClientResult};
use crate::hash::{namespace_key, KeyHasher};
use crate::item::Item;
use crate::multi::MultiGet;
use crate::options::WriteOptions;
use crate::pool::{ConnectionPool, PoolConfig};
use crate::request::{Executor, Request, Response};
use crate::selector::{KetamaSelector, ServerSelector};

/// Upper bound, in seconds, for the lifetime of a min-uses counter.
const MIN_USES_MAX_TTL: u32 = 1_800;

const SENTINEL_SUFFIX: &str = ":es";
const MIN_USES_SUFFIX: &str = ":muc";

/// Sharded, pooled memcached client.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    exec: Executor,
    clock: Arc<dyn Clock>,
}

/// Builder for a `Client` with custom capabilities.
pub struct ClientBuilder {
    config: ClientConfig,
    selector: Option<Arc<dyn ServerSelector>>,
    hasher: Option<Arc<dyn KeyHasher>>,
    clock: Option<Arc<dyn Clock>>,
}

impl ClientBuilder {
    /// Replaces the ketama ring built from `config.addrs`.
    pub fn selector(mut self, selector: Arc<dyn ServerSelector>) -> Self {
        self.selector = Some(selector);
        self
    }

    /// Replaces the hasher chosen by `config.key_hashing`.
    pub fn key_hasher(mut self, hasher: Arc<dyn KeyHasher>) -> Self {
        self.hasher = Some(hasher);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn build(self) -> ClientResult<Client> {
        let config = self.config;
        config.validate()?;

        let selector = match self.selector {
            Some(selector) => selector,
            None => Arc::new(KetamaSelector::new(&config.addrs)?),
        };
        let hasher = self.hasher.unwrap_or_else(|| config.key_hashing.hasher());
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));

        let addrs: Vec<Arc<str>> = config.addrs.iter().map(|addr| Arc::from(addr.as_str())).collect();
        let pool = ConnectionPool::new(
            &addrs,
            PoolConfig {
                socket: SocketConfig {
                    dial_timeout: config.dial_timeout,
                    read_timeout: config.read_timeout,
                    write_timeout: config.write_timeout,
                },
                max_idle: config.max_idle_per_addr,
                max_lifetime: config.conn_max_lifetime,
            },
        );

        Ok(Client {
            inner: Arc::new(ClientInner {
                exec: Executor {
                    pool,
                    selector,
                    hasher,
                },
                clock,
            }),
        })
    }
}

impl Client {
    /// Creates a client with the built-in selector, hasher and clock.
    pub fn new(config: ClientConfig) -> ClientResult<Self> {
        Client::builder(config).build()
    }

    pub fn builder(config: ClientConfig) -> ClientBuilder {
        ClientBuilder {
            config,
            selector: None,
            hasher: None,
            clock: None,
        }
    }

    /// Fetches one item.
    ///
    /// Enveloped values are unwrapped. The first reader past a scaled
    /// deadline gets `CacheMiss`; later readers inside the scale window get
    /// the old value. An item written under an older namespace version is
    /// deleted and reported as `CacheMiss`.
    pub fn get(&self, ctx: &Context, key: &str) -> ClientResult<Item> {
        let response = self.inner.exec.execute(ctx, Request::new(Opcode::Get, key))?;
        let (mut item, envelope) = split_response(key, response)?;
        let envelope = match envelope {
            Some(envelope) => envelope,
            None => return Ok(item),
        };

        if let Some(expiration) = envelope.expiration {
            if expiration.until < self.inner.clock.unix() {
                match self.claim_refresh(ctx, key, expiration.scale) {
                    Ok(()) => {
                        debug!(key, "scaled expiration passed, first reader refreshes");
                        return Err(ClientError::CacheMiss);
                    }
                    Err(ClientError::AlreadyExists) => {}
                    Err(err) => return Err(err),
                }
            }
        }

        if let Some(ns) = &envelope.namespace {
            let current = self.namespace_version(ctx, &ns.key, 0)?;
            if current != ns.version {
                self.invalidate(ctx, key, ns, current);
                return Err(ClientError::CacheMiss);
            }
        }

        item.value = envelope.data;
        Ok(item)
    }

    /// Fetches many items; missing, expired and invalidated keys are absent.
    ///
    /// A failing server only removes its own keys from the map. Use
    /// `get_multi_detailed` to see which servers failed.
    pub fn get_multi(&self, ctx: &Context, keys: &[&str]) -> ClientResult<HashMap<String, Item>> {
        Ok(self.get_multi_detailed(ctx, keys)?.items)
    }

    pub fn get_multi_detailed(&self, ctx: &Context, keys: &[&str]) -> ClientResult<MultiGet> {
        let (hits, failures) = self.inner.exec.fetch_multi(ctx, keys)?;

        let now = self.inner.clock.unix();
        let mut versions: NsCache<String, Option<u64>> = NsCache::new();
        let mut items = HashMap::with_capacity(hits.len());
        for (key, response) in hits {
            let (mut item, envelope) = match split_response(&key, response) {
                Ok(parts) => parts,
                Err(err) => {
                    debug!(key = %key, error = %err, "skipping undecodable multi-get item");
                    continue;
                }
            };
            if let Some(envelope) = envelope {
                if envelope.expiration.is_some_and(|exp| exp.until < now) {
                    continue;
                }
                if let Some(ns) = &envelope.namespace {
                    let current = *versions
                        .entry(ns.key.clone())
                        .or_insert_with(|| self.namespace_version(ctx, &ns.key, 0).ok());
                    // A failed version lookup keeps the item.
                    if let Some(current) = current {
                        if current != ns.version {
                            self.invalidate(ctx, &key, ns, current);
                            continue;
                        }
                    }
                }
                item.value = envelope.data;
            }
            items.insert(key, item);
        }

        Ok(MultiGet { items, failures })
    }

    /// Stores `item` unconditionally. On success `item` carries the new CAS token.
    pub fn set(&self, ctx: &Context, item: &mut Item, opts: &WriteOptions) -> ClientResult<()> {
        self.populate(ctx, Opcode::Set, item, 0, opts)
    }

    /// Stores `item` only if its key is absent; `AlreadyExists` otherwise.
    pub fn add(&self, ctx: &Context, item: &mut Item, opts: &WriteOptions) -> ClientResult<()> {
        self.populate(ctx, Opcode::Add, item, 0, opts)
    }

    /// Stores `item` only if it is unchanged since its CAS token was read.
    ///
    /// Returns `CasConflict` when another write got there first.
    pub fn compare_and_swap(
        &self,
        ctx: &Context,
        item: &mut Item,
        opts: &WriteOptions,
    ) -> ClientResult<()> {
        let cas = item.cas;
        match self.populate(ctx, Opcode::Set, item, cas, opts) {
            Err(ClientError::AlreadyExists) => Err(ClientError::CasConflict),
            other => other,
        }
    }

    /// Adds `delta` to a counter and returns the new value.
    ///
    /// Without `opts.initial` a missing counter reports `CacheMiss`; with it
    /// the counter is created holding the initial value.
    pub fn increment(
        &self,
        ctx: &Context,
        key: &str,
        delta: u64,
        opts: &WriteOptions,
    ) -> ClientResult<u64> {
        self.counter(ctx, Opcode::Increment, key, delta, opts.initial, opts.expiration)
    }

    /// Subtracts `delta` from a counter, stopping at zero.
    pub fn decrement(
        &self,
        ctx: &Context,
        key: &str,
        delta: u64,
        opts: &WriteOptions,
    ) -> ClientResult<u64> {
        self.counter(ctx, Opcode::Decrement, key, delta, opts.initial, opts.expiration)
    }

    pub fn delete(&self, ctx: &Context, key: &str) -> ClientResult<()> {
        self.inner.exec.execute(ctx, Request::new(Opcode::Delete, key))?;
        Ok(())
    }

    /// Invalidates every item written under namespace `ns`.
    ///
    /// Bumps the namespace version; the items themselves are dropped lazily
    /// by the next read that sees the old version.
    pub fn purge_namespace(&self, ctx: &Context, ns: &str) -> ClientResult<()> {
        let key = namespace_key(ns);
        let seed = self.seed().saturating_add(1);
        let version = self.counter(ctx, Opcode::Increment, &key, 1, Some(seed), 0)?;
        debug!(namespace = ns, version, "namespace purged");
        Ok(())
    }

    fn populate(
        &self,
        ctx: &Context,
        opcode: Opcode,
        item: &mut Item,
        cas: u64,
        opts: &WriteOptions,
    ) -> ClientResult<()> {
        // Derived keys must be valid too, checked before anything is written.
        let derived_ok = |suffix: &str| is_valid_key(derived_key(&item.key, suffix).as_bytes());
        if (opts.is_scaled() && !derived_ok(SENTINEL_SUFFIX))
            || (opts.min_uses > 0 && !derived_ok(MIN_USES_SUFFIX))
        {
            return Err(ClientError::MalformedKey);
        }

        if opts.min_uses > 0 {
            let ttl = match opts.expiration {
                0 => MIN_USES_MAX_TTL,
                exp => exp.min(MIN_USES_MAX_TTL),
            };
            let counter_key = derived_key(&item.key, MIN_USES_SUFFIX);
            let uses = self.counter(ctx, Opcode::Increment, &counter_key, 1, Some(1), ttl)?;
            if uses < u64::from(opts.min_uses) {
                trace!(key = %item.key, uses, min_uses = opts.min_uses, "write held back until min uses");
                return Ok(());
            }
        }

        let enveloped = opts.needs_envelope();
        let extras = StorageExtras {
            marker: if enveloped { ENVELOPE_MARKER } else { 0 },
            flags: item.flags,
            expiration: opts.wire_expiration(),
        }
        .encode();

        let payload = if enveloped {
            let expiration = opts.is_scaled().then(|| Expiration {
                scale: opts.scale,
                until: self.inner.clock.unix() + i64::from(opts.expiration),
            });
            let namespace = match &opts.namespace {
                Some(ns) => {
                    let key = namespace_key(ns);
                    let version = self.namespace_version(ctx, &key, 0)?;
                    Some(NamespaceRef { key, version })
                }
                None => None,
            };
            Some(
                Envelope {
                    expiration,
                    namespace,
                    data: item.value.clone(),
                }
                .encode()?,
            )
        } else {
            None
        };

        let request = Request::new(opcode, &item.key)
            .extras(&extras)
            .data(payload.as_deref().unwrap_or(&item.value))
            .cas(cas);
        let response = self.inner.exec.execute(ctx, request)?;
        item.cas = response.cas;
        Ok(())
    }

    fn counter(
        &self,
        ctx: &Context,
        opcode: Opcode,
        key: &str,
        delta: u64,
        initial: Option<u64>,
        expiration: u32,
    ) -> ClientResult<u64> {
        let extras = CounterExtras::new(delta, initial, expiration).encode();
        let response = self
            .inner
            .exec
            .execute(ctx, Request::new(opcode, key).extras(&extras))?;
        let value: [u8; 8] = response
            .data
            .get(..8)
            .and_then(|bytes| bytes.try_into().ok())
            .ok_or(ClientError::Protocol(ProtoError::Malformed("counter value is not 8 bytes")))?;
        Ok(u64::from_be_bytes(value))
    }

    /// Current version of a namespace counter, created from the clock if absent.
    fn namespace_version(&self, ctx: &Context, counter_key: &str, delta: u64) -> ClientResult<u64> {
        self.counter(ctx, Opcode::Increment, counter_key, delta, Some(self.seed()), 0)
    }

    /// Races other readers to refresh an item past its scaled deadline.
    ///
    /// `Ok` means this caller won and must treat the read as a miss.
    fn claim_refresh(&self, ctx: &Context, key: &str, scale: u32) -> ClientResult<()> {
        let mut sentinel = Item::new(derived_key(key, SENTINEL_SUFFIX), Vec::new());
        self.add(ctx, &mut sentinel, &WriteOptions::new().expiration(scale, 0))
    }

    /// Best-effort delete of an item from a purged namespace.
    fn invalidate(&self, ctx: &Context, key: &str, ns: &NamespaceRef, current: u64) {
        debug!(key, stored = ns.version, current, "namespace version changed, dropping item");
        if let Err(err) = self.delete(ctx, key) {
            trace!(key, error = %err, "delete of invalidated item failed");
        }
    }

    fn seed(&self) -> u64 {
        self.inner.clock.unix().max(0) as u64
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("exec", &self.inner.exec)
            .field("clock", &self.inner.clock)
            .finish()
    }
}

/// Splits a Get response into the item and, when marked, its envelope.
fn split_response(key: &str, response: Response) -> ClientResult<(Item, Option<Envelope>)> {
    let extras = StorageExtras::decode(&response.extras).unwrap_or_default();
    let envelope = if extras.marker == ENVELOPE_MARKER {
        Some(Envelope::decode(&response.data)?)
    } else {
        None
    };
    let item = Item {
        key: key.to_owned(),
        value: if envelope.is_some() { Vec::new() } else { response.data },
        flags: extras.flags,
        cas: response.cas,
    };
    Ok((item, envelope))
}

fn derived_key(key: &str, suffix: &str) -> String {
    let mut derived = String::with_capacity(key.len() + suffix.len());
    derived.push_str(key);
    derived.push_str(suffix);
    derived
}

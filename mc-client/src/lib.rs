//! # Memcached Binary-Protocol Client
//!
//! Purpose: Provide a blocking, sharded memcached client with per-address
//! connection pooling and cache-consistency recipes layered over the plain
//! binary protocol.
//!
//! ## Design Principles
//! 1. **Object Pool Pattern**: Reuse TCP connections per server address.
//! 2. **Consistent Hashing**: A ketama ring picks a failover-ordered list of
//!    servers per key.
//! 3. **Minimal Allocation**: Frames are encoded into and decoded from
//!    buffers owned by each connection.
//! 4. **Clean Streams Only**: Only connections whose stream sits on a frame
//!    boundary are pooled again.

mod client;
mod clock;
mod config;
mod conn;
mod context;
mod envelope;
mod error;
mod hash;
mod item;
mod multi;
mod options;
mod pool;
mod request;
mod selector;

pub use client::{Client, ClientBuilder};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    ClientConfig, DEFAULT_CONN_MAX_LIFETIME, DEFAULT_DIAL_TIMEOUT, DEFAULT_MAX_IDLE_PER_ADDR,
};
pub use context::{CancelHandle, Context};
pub use error::{ClientError, ClientResult};
pub use hash::{digest, IdentityHasher, KeyHasher, KeyHashing, XxHasher};
pub use item::{Item, Json, Raw, Text, ValueCodec};
pub use multi::{MultiGet, ShardFailure};
pub use options::WriteOptions;
pub use selector::{KetamaSelector, ServerSelector};

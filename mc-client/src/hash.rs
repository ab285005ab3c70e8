//! # Key Hashing
//!
//! Maps a caller key to the bytes sent on the wire, and derives stable
//! names for namespace version counters.
//!
//! Validation and server selection always see the caller key; only the
//! frame carries the hashed form.

use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use xxhash_rust::xxh64::xxh64;

/// Strategy turning a caller key into its wire key.
pub trait KeyHasher: Send + Sync + fmt::Debug {
    fn wire_key<'a>(&self, key: &'a str) -> Cow<'a, [u8]>;
}

/// Sends the key unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityHasher;

impl KeyHasher for IdentityHasher {
    fn wire_key<'a>(&self, key: &'a str) -> Cow<'a, [u8]> {
        Cow::Borrowed(key.as_bytes())
    }
}

/// Sends the 8-byte big-endian XXH64 digest of the key.
#[derive(Debug, Clone, Copy, Default)]
pub struct XxHasher;

impl KeyHasher for XxHasher {
    fn wire_key<'a>(&self, key: &'a str) -> Cow<'a, [u8]> {
        Cow::Owned(digest(key.as_bytes()).to_be_bytes().to_vec())
    }
}

/// Built-in hashers selectable from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyHashing {
    Identity,
    #[default]
    XxHash64,
}

impl KeyHashing {
    pub(crate) fn hasher(self) -> Arc<dyn KeyHasher> {
        match self {
            KeyHashing::Identity => Arc::new(IdentityHasher),
            KeyHashing::XxHash64 => Arc::new(XxHasher),
        }
    }
}

/// XXH64 with seed 0.
#[inline]
pub fn digest(bytes: &[u8]) -> u64 {
    xxh64(bytes, 0)
}

/// Key of the version counter for namespace `ns`: hex digest plus `:ns`.
pub(crate) fn namespace_key(ns: &str) -> String {
    format!("{:016x}:ns", digest(ns.as_bytes()))
}

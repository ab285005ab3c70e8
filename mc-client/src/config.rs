//! # Client Configuration
//!
//! Serializable settings for the pool, the sockets and the built-in key
//! hashing. Durations are written as milliseconds so a config file stays
//! readable:
//!
//! ```json
//! { "addrs": ["10.0.0.1:11211", "10.0.0.2:11211"], "dial_timeout_ms": 250 }
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ClientError, ClientResult};
use crate::hash::KeyHashing;

pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_millis(500);
pub const DEFAULT_CONN_MAX_LIFETIME: Duration = Duration::from_secs(30 * 60);
pub const DEFAULT_MAX_IDLE_PER_ADDR: usize = 10;

/// Configuration for the client and its pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Server addresses, e.g. "127.0.0.1:11211".
    pub addrs: Vec<String>,
    #[serde(rename = "dial_timeout_ms", with = "millis")]
    pub dial_timeout: Duration,
    /// Idle connections at least this old are closed instead of reused.
    #[serde(rename = "conn_max_lifetime_ms", with = "millis")]
    pub conn_max_lifetime: Duration,
    pub max_idle_per_addr: usize,
    /// Socket read timeout outside deadline-bounded calls.
    #[serde(rename = "read_timeout_ms", with = "opt_millis")]
    pub read_timeout: Option<Duration>,
    /// Socket write timeout outside deadline-bounded calls.
    #[serde(rename = "write_timeout_ms", with = "opt_millis")]
    pub write_timeout: Option<Duration>,
    pub key_hashing: KeyHashing,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            addrs: Vec::new(),
            dial_timeout: DEFAULT_DIAL_TIMEOUT,
            conn_max_lifetime: DEFAULT_CONN_MAX_LIFETIME,
            max_idle_per_addr: DEFAULT_MAX_IDLE_PER_ADDR,
            read_timeout: None,
            write_timeout: None,
            key_hashing: KeyHashing::default(),
        }
    }
}

impl ClientConfig {
    /// Default configuration for the given servers.
    pub fn new<I, S>(addrs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ClientConfig {
            addrs: addrs.into_iter().map(Into::into).collect(),
            ..ClientConfig::default()
        }
    }

    /// Parses a JSON document; missing fields take their defaults.
    pub fn from_json(text: &str) -> ClientResult<Self> {
        serde_json::from_str(text).map_err(|err| ClientError::InvalidConfig(err.to_string()))
    }

    pub(crate) fn validate(&self) -> ClientResult<()> {
        if self.dial_timeout.is_zero() {
            return Err(ClientError::InvalidConfig("dial timeout must be non-zero".into()));
        }
        if self.read_timeout.is_some_and(|t| t.is_zero())
            || self.write_timeout.is_some_and(|t| t.is_zero())
        {
            return Err(ClientError::InvalidConfig("socket timeouts must be non-zero".into()));
        }
        Ok(())
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

mod opt_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(value) => serializer.serialize_some(&(value.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(deserializer).map(|ms| ms.map(Duration::from_millis))
    }
}

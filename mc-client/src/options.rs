//! # Per-Call Options
//!
//! Options accepted by writes and counters. Each one turns on a cache
//! pattern layered over plain set/add:
//!
//! - `expiration(exp, scale)`: items go stale after `exp` seconds; with a
//!   non-zero `scale` the first reader past `exp` gets a miss while other
//!   readers keep the old value for `scale` more seconds.
//! - `namespace(ns)`: tags the item with the namespace's current version so
//!   `purge_namespace` invalidates it.
//! - `min_uses(n)`: the value only becomes visible on the n-th write.
//! - `initial(v)`: counters missing on the server are created with `v`.

/// Options for one write or counter call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteOptions {
    pub(crate) initial: Option<u64>,
    pub(crate) min_uses: u32,
    pub(crate) namespace: Option<String>,
    pub(crate) expiration: u32,
    pub(crate) scale: u32,
}

impl WriteOptions {
    pub fn new() -> Self {
        WriteOptions::default()
    }

    /// Counter calls only: create a missing counter with `value`.
    pub fn initial(mut self, value: u64) -> Self {
        self.initial = Some(value);
        self
    }

    /// Stores only on the `count`-th write of the key.
    ///
    /// The use counter lives under `<key>:muc`, so keys longer than 246
    /// bytes are rejected as malformed when this is set.
    pub fn min_uses(mut self, count: u32) -> Self {
        self.min_uses = count;
        self
    }

    pub fn namespace(mut self, ns: impl Into<String>) -> Self {
        let ns = ns.into();
        self.namespace = if ns.is_empty() { None } else { Some(ns) };
        self
    }

    /// Expiration in seconds plus the scaling window in seconds.
    ///
    /// A nonzero window needs the refresh sentinel `<key>:es`, so keys
    /// longer than 247 bytes are rejected as malformed in that case.
    pub fn expiration(mut self, seconds: u32, scale: u32) -> Self {
        self.expiration = seconds;
        self.scale = scale;
        self
    }

    /// Value of the expiration extras field: `exp + scale`, or 0 for no expiry.
    pub(crate) fn wire_expiration(&self) -> u32 {
        if self.expiration == 0 {
            0
        } else {
            self.expiration.saturating_add(self.scale)
        }
    }

    /// True when reads may race to refresh the item through a sentinel.
    pub(crate) fn is_scaled(&self) -> bool {
        self.expiration != 0 && self.scale != 0
    }

    /// True when the payload must be wrapped in an envelope.
    pub(crate) fn needs_envelope(&self) -> bool {
        self.is_scaled() || self.namespace.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_plain_write() {
        let opts = WriteOptions::new();
        assert_eq!(opts.wire_expiration(), 0);
        assert!(!opts.needs_envelope());
        assert_eq!(opts.initial, None);
    }

    #[test]
    fn scaled_expiration_extends_server_ttl() {
        let opts = WriteOptions::new().expiration(60, 30);
        assert_eq!(opts.wire_expiration(), 90);
        assert!(opts.needs_envelope());

        let plain = WriteOptions::new().expiration(60, 0);
        assert_eq!(plain.wire_expiration(), 60);
        assert!(!plain.needs_envelope());
    }

    #[test]
    fn scale_without_expiration_is_ignored() {
        let opts = WriteOptions::new().expiration(0, 30);
        assert_eq!(opts.wire_expiration(), 0);
        assert!(!opts.needs_envelope());
    }

    #[test]
    fn namespace_forces_envelope() {
        assert!(WriteOptions::new().namespace("users").needs_envelope());
        assert!(!WriteOptions::new().namespace("").needs_envelope());
    }
}

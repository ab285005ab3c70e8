//! # Server Selection
//!
//! Purpose: Map a key to an ordered list of candidate addresses.
//!
//! The default selector is a ketama ring (MD5 virtual nodes, 160 per server
//! at weight 1), so adding or removing one server remaps only about 1/N of
//! the keys. The candidate list walks the ring clockwise from the key's
//! point and keeps each server once, giving a deterministic failover order.

use std::fmt;
use std::sync::Arc;

use crate::error::{ClientError, ClientResult};

/// Virtual nodes per server at weight 1.
const POINTS_PER_SERVER: usize = 160;

/// Strategy returning failover-ordered candidate addresses for a key.
pub trait ServerSelector: Send + Sync + fmt::Debug {
    /// Candidates for `key`, primary first, without duplicates.
    fn select(&self, key: &str) -> Vec<Arc<str>>;
}

/// Immutable ketama consistent hash ring.
#[derive(Clone, Debug)]
pub struct KetamaSelector {
    /// Sorted (hash_point, server_index) pairs.
    points: Box<[(u32, u16)]>,
    servers: Box<[Arc<str>]>,
}

impl KetamaSelector {
    /// Builds a ring from server addresses with equal weight.
    ///
    /// # Errors
    /// `NoServers` when `addrs` is empty, `InvalidConfig` when an address
    /// is listed twice or there are more than 65535 of them.
    pub fn new<S: AsRef<str>>(addrs: &[S]) -> ClientResult<Self> {
        if addrs.is_empty() {
            return Err(ClientError::NoServers);
        }
        if addrs.len() > u16::MAX as usize {
            return Err(ClientError::InvalidConfig("too many servers".into()));
        }

        let mut servers: Vec<Arc<str>> = Vec::with_capacity(addrs.len());
        for addr in addrs {
            let addr = addr.as_ref();
            if servers.iter().any(|known| known.as_ref() == addr) {
                return Err(ClientError::InvalidConfig(format!(
                    "duplicate server address {addr}"
                )));
            }
            servers.push(Arc::from(addr));
        }

        let mut points = Vec::with_capacity(servers.len() * POINTS_PER_SERVER);
        for (idx, server) in servers.iter().enumerate() {
            // Each MD5 digest yields 4 hash points.
            for i in 0..POINTS_PER_SERVER / 4 {
                let digest = md5::compute(format!("{server}-{i}").as_bytes()).0;
                for chunk in digest.chunks_exact(4) {
                    let hash = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
                    points.push((hash, idx as u16));
                }
            }
        }
        points.sort_unstable();

        Ok(KetamaSelector {
            points: points.into_boxed_slice(),
            servers: servers.into_boxed_slice(),
        })
    }

    /// Number of servers on the ring.
    pub fn server_count(&self) -> usize {
        self.servers.len()
    }

    /// Index of the first ring point at or after the key's hash.
    fn start(&self, key: &[u8]) -> usize {
        let hash = key_hash(key);
        let idx = self.points.partition_point(|&(point, _)| point < hash);
        if idx == self.points.len() {
            0
        } else {
            idx
        }
    }
}

impl ServerSelector for KetamaSelector {
    fn select(&self, key: &str) -> Vec<Arc<str>> {
        let wanted = self.servers.len();
        if wanted == 1 {
            return vec![self.servers[0].clone()];
        }

        let mut seen = vec![false; wanted];
        let mut out = Vec::with_capacity(wanted);
        let start = self.start(key.as_bytes());
        for offset in 0..self.points.len() {
            let (_, server) = self.points[(start + offset) % self.points.len()];
            let server = server as usize;
            if !seen[server] {
                seen[server] = true;
                out.push(self.servers[server].clone());
                if out.len() == wanted {
                    break;
                }
            }
        }
        out
    }
}

/// First 4 bytes of the key's MD5, little-endian.
#[inline]
fn key_hash(key: &[u8]) -> u32 {
    let digest = md5::compute(key).0;
    u32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]])
}

#[cfg(test)]
mod tests {
    use super::*;

    const THREE: [&str; 3] = ["s0:11211", "s1:11211", "s2:11211"];

    #[test]
    fn empty_ring_is_rejected() {
        let empty: [&str; 0] = [];
        assert!(matches!(KetamaSelector::new(&empty), Err(ClientError::NoServers)));
    }

    #[test]
    fn duplicate_addresses_are_rejected() {
        let result = KetamaSelector::new(&["a:1", "a:1"]);
        assert!(matches!(result, Err(ClientError::InvalidConfig(_))));
    }

    #[test]
    fn single_server_always_selected() {
        let ring = KetamaSelector::new(&["only:11211"]).unwrap();
        assert_eq!(ring.select("a").len(), 1);
        assert_eq!(&*ring.select("anything")[0], "only:11211");
    }

    #[test]
    fn candidates_cover_every_server_once() {
        let ring = KetamaSelector::new(&THREE).unwrap();
        for i in 0..100 {
            let mut picked: Vec<String> = ring
                .select(&format!("key-{i}"))
                .iter()
                .map(|s| s.to_string())
                .collect();
            assert_eq!(picked.len(), 3);
            picked.sort();
            picked.dedup();
            assert_eq!(picked.len(), 3);
        }
    }

    #[test]
    fn deterministic_routing() {
        let a = KetamaSelector::new(&THREE).unwrap();
        let b = KetamaSelector::new(&THREE).unwrap();
        for i in 0..50 {
            let key = format!("key-{i}");
            assert_eq!(a.select(&key), b.select(&key));
        }
    }

    #[test]
    fn roughly_uniform_distribution() {
        let ring = KetamaSelector::new(&THREE).unwrap();
        let mut counts = [0u32; 3];
        for i in 0..10_000u32 {
            let primary = ring.select(&format!("key-{i}"))[0].clone();
            let idx = THREE.iter().position(|s| *s == &*primary).unwrap();
            counts[idx] += 1;
        }
        for (i, &count) in counts.iter().enumerate() {
            assert!(
                (2500..=4500).contains(&count),
                "server {i} got {count} keys: {counts:?}"
            );
        }
    }

    #[test]
    fn minimal_remapping_on_server_add() {
        let ring3 = KetamaSelector::new(&THREE).unwrap();
        let ring4 = KetamaSelector::new(&["s0:11211", "s1:11211", "s2:11211", "s3:11211"]).unwrap();

        let total = 10_000u32;
        let mut remapped = 0u32;
        for i in 0..total {
            let key = format!("key-{i}");
            if ring3.select(&key)[0] != ring4.select(&key)[0] {
                remapped += 1;
            }
        }
        let pct = remapped as f64 / total as f64;
        assert!(pct < 0.40, "remapped {:.1}% of keys", pct * 100.0);
    }
}

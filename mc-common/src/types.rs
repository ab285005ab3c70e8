//! # Key Rules and Extras Layouts
//!
//! Key validation plus the fixed extras layouts used by storage and counter
//! commands.
//!
//! ```text
//! Storage extras (8 bytes):
//! +--------+----------+-----------+---------------+
//! | marker | reserved | flags:2B  | expiration:4B |
//! +--------+----------+-----------+---------------+
//!
//! Counter extras (20 bytes):
//! +----------+------------+---------------+
//! | delta:8B | initial:8B | expiration:4B |
//! +----------+------------+---------------+
//! ```
//!
//! The storage layout treats the 32-bit protocol flags field as a marker byte
//! plus 16 caller-visible flag bits.

use bytes::{Buf, BufMut};

/// Maximum key length accepted by the server.
pub const MAX_KEY_LEN: usize = 250;

/// Extras length of Set/Add requests.
pub const STORAGE_EXTRAS_LEN: usize = 8;

/// Extras length of Increment/Decrement requests.
pub const COUNTER_EXTRAS_LEN: usize = 20;

/// Counter expiration telling the server not to create a missing key.
pub const NO_CREATE_EXPIRATION: u32 = 0xffff_ffff;

/// Returns true when `key` is 1..=250 bytes of printable ASCII without
/// spaces or control characters.
#[inline]
pub fn is_valid_key(key: &[u8]) -> bool {
    !key.is_empty() && key.len() <= MAX_KEY_LEN && key.iter().all(|&b| b > b' ' && b <= 0x7e)
}

/// Extras sent with Set/Add requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StorageExtras {
    pub marker: u8,
    pub flags: u16,
    pub expiration: u32,
}

impl StorageExtras {
    pub fn encode(&self) -> [u8; STORAGE_EXTRAS_LEN] {
        let mut out = [0u8; STORAGE_EXTRAS_LEN];
        let mut buf = &mut out[..];
        buf.put_u8(self.marker);
        buf.put_u8(0);
        buf.put_u16(self.flags);
        buf.put_u32(self.expiration);
        out
    }

    /// Reads marker and flags from response extras (4 bytes on Get) or
    /// request extras (8 bytes on Set). Returns `None` when fewer than four
    /// bytes are present.
    pub fn decode(extras: &[u8]) -> Option<Self> {
        if extras.len() < 4 {
            return None;
        }
        let mut buf = extras;
        let marker = buf.get_u8();
        buf.advance(1);
        let flags = buf.get_u16();
        let expiration = if buf.remaining() >= 4 { buf.get_u32() } else { 0 };
        Some(StorageExtras {
            marker,
            flags,
            expiration,
        })
    }
}

/// Extras sent with Increment/Decrement requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterExtras {
    pub delta: u64,
    pub initial: u64,
    pub expiration: u32,
}

impl CounterExtras {
    /// Builds counter extras. Without an initial value the expiration is the
    /// no-create sentinel so a missing key reports not-found.
    pub fn new(delta: u64, initial: Option<u64>, expiration: u32) -> Self {
        match initial {
            Some(initial) => CounterExtras {
                delta,
                initial,
                expiration,
            },
            None => CounterExtras {
                delta,
                initial: 0,
                expiration: NO_CREATE_EXPIRATION,
            },
        }
    }

    pub fn encode(&self) -> [u8; COUNTER_EXTRAS_LEN] {
        let mut out = [0u8; COUNTER_EXTRAS_LEN];
        let mut buf = &mut out[..];
        buf.put_u64(self.delta);
        buf.put_u64(self.initial);
        buf.put_u32(self.expiration);
        out
    }

    pub fn decode(extras: &[u8]) -> Option<Self> {
        if extras.len() < COUNTER_EXTRAS_LEN {
            return None;
        }
        let mut buf = extras;
        Some(CounterExtras {
            delta: buf.get_u64(),
            initial: buf.get_u64(),
            expiration: buf.get_u32(),
        })
    }
}

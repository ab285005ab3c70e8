//! # Protocol Constants and Header
//!
//! Purpose: Define the fixed 24-byte header of the memcached binary protocol
//! together with the opcodes and status codes the client speaks.
//!
//! ## Design Principles
//!
//! 1. **Big-Endian Everywhere**: Every multi-byte field is network order.
//! 2. **Raw Bytes Only**: The data type byte is always zero; anything else is rejected.
//! 3. **Status-as-Value**: Unknown status codes are preserved instead of dropped.
//!
//! ## Memory Layout Example
//!
//! ```text
//! Header (24 bytes total):
//! +--------+---------+-----------+-------------+------------+------------------+
//! | magic  | opcode  | key_len   | extras_len  | data_type  | vbucket / status |
//! +--------+---------+-----------+-------------+------------+------------------+
//! | 1B     | 1B      | 2B        | 1B          | 1B         | 2B               |
//! +--------+---------+-----------+-------------+------------+------------------+
//! | total_body_len:4B  | opaque:4B  | cas:8B                                   |
//! +--------------------+------------+------------------------------------------+
//!
//! Body (total_body_len bytes):
//! +------------+---------+----------+
//! | extras     | key     | data     |
//! +------------+---------+----------+
//! ```

use std::fmt;

use bytes::{Buf, BufMut};

/// Magic byte for request frames.
pub const REQUEST_MAGIC: u8 = 0x80;

/// Magic byte for response frames.
pub const RESPONSE_MAGIC: u8 = 0x81;

/// Fixed header size in bytes.
pub const HEADER_SIZE: usize = 24;

/// Largest body the decoder will buffer. Servers cap items at 1 MiB by
/// default; a larger declared length means a corrupt stream.
pub const MAX_BODY_LEN: usize = 64 * 1024 * 1024;

/// Data type byte for raw payloads (the only supported value).
pub const DATA_TYPE_RAW: u8 = 0x00;

/// Frame direction, identified by the leading magic byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Magic {
    Request,
    Response,
}

impl Magic {
    #[inline]
    pub const fn as_u8(self) -> u8 {
        match self {
            Magic::Request => REQUEST_MAGIC,
            Magic::Response => RESPONSE_MAGIC,
        }
    }

    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            REQUEST_MAGIC => Some(Magic::Request),
            RESPONSE_MAGIC => Some(Magic::Response),
            _ => None,
        }
    }
}

/// Command opcodes used by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    Get = 0x00,
    Set = 0x01,
    Add = 0x02,
    Delete = 0x04,
    Increment = 0x05,
    Decrement = 0x06,
    Noop = 0x0a,
    GetKQ = 0x0d,
}

impl Opcode {
    #[inline]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Converts a wire byte to an opcode, if the client knows it.
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(Opcode::Get),
            0x01 => Some(Opcode::Set),
            0x02 => Some(Opcode::Add),
            0x04 => Some(Opcode::Delete),
            0x05 => Some(Opcode::Increment),
            0x06 => Some(Opcode::Decrement),
            0x0a => Some(Opcode::Noop),
            0x0d => Some(Opcode::GetKQ),
            _ => None,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Opcode::Get => "get",
            Opcode::Set => "set",
            Opcode::Add => "add",
            Opcode::Delete => "delete",
            Opcode::Increment => "increment",
            Opcode::Decrement => "decrement",
            Opcode::Noop => "noop",
            Opcode::GetKQ => "get_kq",
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Response status codes.
///
/// Codes the protocol defines but the client never acts on are kept in
/// `Other` so callers can still report the raw value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Ok,
    KeyNotFound,
    KeyExists,
    ValueTooLarge,
    InvalidArguments,
    ItemNotStored,
    NonNumericValue,
    InternalError,
    Other(u16),
}

impl Status {
    pub const fn from_u16(value: u16) -> Self {
        match value {
            0x0000 => Status::Ok,
            0x0001 => Status::KeyNotFound,
            0x0002 => Status::KeyExists,
            0x0003 => Status::ValueTooLarge,
            0x0004 => Status::InvalidArguments,
            0x0005 => Status::ItemNotStored,
            0x0006 => Status::NonNumericValue,
            0x0084 => Status::InternalError,
            other => Status::Other(other),
        }
    }

    pub const fn as_u16(self) -> u16 {
        match self {
            Status::Ok => 0x0000,
            Status::KeyNotFound => 0x0001,
            Status::KeyExists => 0x0002,
            Status::ValueTooLarge => 0x0003,
            Status::InvalidArguments => 0x0004,
            Status::ItemNotStored => 0x0005,
            Status::NonNumericValue => 0x0006,
            Status::InternalError => 0x0084,
            Status::Other(code) => code,
        }
    }

    #[inline]
    pub const fn is_ok(self) -> bool {
        matches!(self, Status::Ok)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Ok => f.write_str("ok"),
            Status::KeyNotFound => f.write_str("key not found"),
            Status::KeyExists => f.write_str("key exists"),
            Status::ValueTooLarge => f.write_str("value too large"),
            Status::InvalidArguments => f.write_str("invalid arguments"),
            Status::ItemNotStored => f.write_str("item not stored"),
            Status::NonNumericValue => f.write_str("incr/decr on non-numeric value"),
            Status::InternalError => f.write_str("internal error"),
            Status::Other(code) => write!(f, "status={code:#06x}"),
        }
    }
}

/// Decoded fixed header.
///
/// `vbucket_or_status` is the vbucket id on requests and the status code on
/// responses; the header itself does not interpret it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Header {
    pub magic: u8,
    pub opcode: u8,
    pub key_len: u16,
    pub extras_len: u8,
    pub data_type: u8,
    pub vbucket_or_status: u16,
    pub total_body_len: u32,
    pub opaque: u32,
    pub cas: u64,
}

impl Header {
    /// Writes the 24 header bytes.
    pub fn put<B: BufMut>(&self, out: &mut B) {
        out.put_u8(self.magic);
        out.put_u8(self.opcode);
        out.put_u16(self.key_len);
        out.put_u8(self.extras_len);
        out.put_u8(self.data_type);
        out.put_u16(self.vbucket_or_status);
        out.put_u32(self.total_body_len);
        out.put_u32(self.opaque);
        out.put_u64(self.cas);
    }

    /// Parses the 24 header bytes; no field is validated here.
    pub fn parse(raw: &[u8; HEADER_SIZE]) -> Self {
        let mut buf = &raw[..];
        Header {
            magic: buf.get_u8(),
            opcode: buf.get_u8(),
            key_len: buf.get_u16(),
            extras_len: buf.get_u8(),
            data_type: buf.get_u8(),
            vbucket_or_status: buf.get_u16(),
            total_body_len: buf.get_u32(),
            opaque: buf.get_u32(),
            cas: buf.get_u64(),
        }
    }
}

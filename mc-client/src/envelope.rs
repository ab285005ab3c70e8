//! # Namespace Envelope
//!
//! Structured payload wrapping a caller value with scaling-expiration and
//! namespace metadata. Its presence is signalled by `ENVELOPE_MARKER` in the
//! first extras byte; without the marker the payload is the raw value.
//!
//! ```text
//! Envelope:
//! +-----------+----------------------------+---------------------------------+
//! | present:1B| expiration (bit0)          | namespace (bit1)                |
//! |           | scale:4B until:8B          | key_len:2B key version:8B       |
//! +-----------+----------------------------+---------------------------------+
//! | value_len:4B | value                                                     |
//! +--------------+-----------------------------------------------------------+
//! ```

use bytes::{Buf, BufMut};

use crate::error::{ClientError, ClientResult};

/// First extras byte of an enveloped payload.
pub(crate) const ENVELOPE_MARKER: u8 = 0x42;

const HAS_EXPIRATION: u8 = 0b01;
const HAS_NAMESPACE: u8 = 0b10;

/// Scaling-expiration record: stale after `until`, refreshed within `scale` seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Expiration {
    pub scale: u32,
    pub until: i64,
}

/// Namespace reference: version counter key and the version seen at write time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct NamespaceRef {
    pub key: String,
    pub version: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub(crate) struct Envelope {
    pub expiration: Option<Expiration>,
    pub namespace: Option<NamespaceRef>,
    pub data: Vec<u8>,
}

impl Envelope {
    pub fn encode(&self) -> ClientResult<Vec<u8>> {
        let data_len = u32::try_from(self.data.len()).map_err(|_| ClientError::ValueTooLarge)?;
        let mut out = Vec::with_capacity(self.data.len() + 32);

        let mut present = 0u8;
        if self.expiration.is_some() {
            present |= HAS_EXPIRATION;
        }
        if self.namespace.is_some() {
            present |= HAS_NAMESPACE;
        }
        out.put_u8(present);

        if let Some(expiration) = &self.expiration {
            out.put_u32(expiration.scale);
            out.put_i64(expiration.until);
        }
        if let Some(ns) = &self.namespace {
            let key_len = u16::try_from(ns.key.len())
                .map_err(|_| ClientError::MalformedEnvelope("namespace key too long"))?;
            out.put_u16(key_len);
            out.put_slice(ns.key.as_bytes());
            out.put_u64(ns.version);
        }
        out.put_u32(data_len);
        out.put_slice(&self.data);
        Ok(out)
    }

    pub fn decode(mut buf: &[u8]) -> ClientResult<Self> {
        if buf.remaining() < 1 {
            return Err(ClientError::MalformedEnvelope("empty envelope"));
        }
        let present = buf.get_u8();
        if present & !(HAS_EXPIRATION | HAS_NAMESPACE) != 0 {
            return Err(ClientError::MalformedEnvelope("unknown presence bits"));
        }

        let expiration = if present & HAS_EXPIRATION != 0 {
            if buf.remaining() < 12 {
                return Err(ClientError::MalformedEnvelope("truncated expiration"));
            }
            Some(Expiration {
                scale: buf.get_u32(),
                until: buf.get_i64(),
            })
        } else {
            None
        };

        let namespace = if present & HAS_NAMESPACE != 0 {
            if buf.remaining() < 2 {
                return Err(ClientError::MalformedEnvelope("truncated namespace"));
            }
            let key_len = buf.get_u16() as usize;
            if buf.remaining() < key_len + 8 {
                return Err(ClientError::MalformedEnvelope("truncated namespace"));
            }
            let key = String::from_utf8(buf[..key_len].to_vec())
                .map_err(|_| ClientError::MalformedEnvelope("namespace key is not utf-8"))?;
            buf.advance(key_len);
            Some(NamespaceRef {
                key,
                version: buf.get_u64(),
            })
        } else {
            None
        };

        if buf.remaining() < 4 {
            return Err(ClientError::MalformedEnvelope("missing value length"));
        }
        let data_len = buf.get_u32() as usize;
        if buf.remaining() != data_len {
            return Err(ClientError::MalformedEnvelope("value length mismatch"));
        }

        Ok(Envelope {
            expiration,
            namespace,
            data: buf.to_vec(),
        })
    }
}

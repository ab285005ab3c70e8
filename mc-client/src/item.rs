//! # Items and Value Codecs
//!
//! `Item` is the caller-facing record. The client only moves opaque bytes;
//! `ValueCodec` implementations turn typed values into those bytes.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{ClientError, ClientResult};

/// A cache item.
///
/// The CAS token is filled in by every successful read or write and consumed
/// by `compare_and_swap`. Zero means "no CAS check".
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Item {
    pub key: String,
    pub value: Vec<u8>,
    pub flags: u16,
    pub(crate) cas: u64,
}

impl Item {
    pub fn new(key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Item {
            key: key.into(),
            value: value.into(),
            flags: 0,
            cas: 0,
        }
    }

    pub fn with_flags(mut self, flags: u16) -> Self {
        self.flags = flags;
        self
    }

    /// Builds an item whose value is `value` encoded with `codec`.
    pub fn encode_with<T, C>(key: impl Into<String>, value: &T, codec: &C) -> ClientResult<Self>
    where
        C: ValueCodec<T>,
    {
        Ok(Item::new(key, codec.encode(value)?))
    }

    /// Decodes the value with `codec`.
    pub fn decode_with<T, C>(&self, codec: &C) -> ClientResult<T>
    where
        C: ValueCodec<T>,
    {
        codec.decode(&self.value)
    }

    /// CAS token observed by the last read or write of this item.
    #[inline]
    pub fn cas(&self) -> u64 {
        self.cas
    }
}

/// Converts between a caller type and the opaque bytes stored on the server.
pub trait ValueCodec<T> {
    fn encode(&self, value: &T) -> ClientResult<Vec<u8>>;
    fn decode(&self, bytes: &[u8]) -> ClientResult<T>;
}

/// Byte passthrough.
#[derive(Debug, Clone, Copy, Default)]
pub struct Raw;

impl ValueCodec<Vec<u8>> for Raw {
    fn encode(&self, value: &Vec<u8>) -> ClientResult<Vec<u8>> {
        Ok(value.clone())
    }

    fn decode(&self, bytes: &[u8]) -> ClientResult<Vec<u8>> {
        Ok(bytes.to_vec())
    }
}

/// UTF-8 text.
#[derive(Debug, Clone, Copy, Default)]
pub struct Text;

impl ValueCodec<String> for Text {
    fn encode(&self, value: &String) -> ClientResult<Vec<u8>> {
        Ok(value.as_bytes().to_vec())
    }

    fn decode(&self, bytes: &[u8]) -> ClientResult<String> {
        String::from_utf8(bytes.to_vec()).map_err(|err| ClientError::Codec(err.to_string()))
    }
}

/// Structured records through serde JSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct Json;

impl<T> ValueCodec<T> for Json
where
    T: Serialize + DeserializeOwned,
{
    fn encode(&self, value: &T) -> ClientResult<Vec<u8>> {
        serde_json::to_vec(value).map_err(|err| ClientError::Codec(err.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> ClientResult<T> {
        serde_json::from_slice(bytes).map_err(|err| ClientError::Codec(err.to_string()))
    }
}

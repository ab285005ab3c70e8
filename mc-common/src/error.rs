//! # Codec Errors
//!
//! Errors raised while encoding or decoding a single binary frame.
//!
//! A `Status` error is special: the response body has already been drained,
//! so the stream is still positioned on a frame boundary. Every other variant
//! leaves the stream in an unknown state.

use std::io;

use crate::protocol::Status;

/// Result alias for codec operations.
pub type ProtoResult<T> = Result<T, ProtoError>;

/// Errors surfaced by the frame codec.
#[derive(Debug, thiserror::Error)]
pub enum ProtoError {
    /// Leading magic byte did not match the expected direction.
    #[error("bad magic byte: {0:#04x}")]
    BadMagic(u8),

    /// Data type byte was not raw bytes.
    #[error("unsupported data type: {0:#04x}")]
    UnsupportedDataType(u8),

    /// Header lengths are inconsistent or a field overflows its wire width.
    #[error("malformed frame: {0}")]
    Malformed(&'static str),

    /// Response carried a non-OK status; the body was discarded.
    #[error("server status: {0}")]
    Status(Status),

    /// Transport failure while reading or writing.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl ProtoError {
    /// Returns true when the stream is still aligned on a frame boundary.
    #[inline]
    pub fn is_status(&self) -> bool {
        matches!(self, ProtoError::Status(_))
    }
}

//! # Client Errors
//!
//! One flat taxonomy for everything the client can report: local key
//! validation, server selection, typed server statuses, codec and transport
//! failures.

use std::io;

use mc_common::{ProtoError, Status};

/// Result type for the client.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors surfaced by the client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Key is empty, longer than 250 bytes, or contains bytes outside 0x21..=0x7e.
    #[error("memcache: key is too long or contains invalid characters")]
    MalformedKey,

    /// No address configured, or none of the candidates accepted a connection.
    #[error("memcache: no servers configured or available")]
    NoServers,

    #[error("memcache: cache miss")]
    CacheMiss,

    #[error("memcache: item already exists")]
    AlreadyExists,

    #[error("memcache: item not stored")]
    NotStored,

    /// The item changed since its CAS token was observed.
    #[error("memcache: compare-and-swap conflict")]
    CasConflict,

    #[error("memcache: incr or decr on non-numeric value")]
    BadIncrDecr,

    #[error("memcache: server error")]
    ServerError,

    #[error("memcache: invalid arguments")]
    InvalidArguments,

    #[error("memcache: value too large")]
    ValueTooLarge,

    #[error("memcache: status={0}")]
    UnknownStatus(u16),

    /// Framing failure: bad magic, unsupported data type, inconsistent lengths.
    #[error("memcache: protocol error: {0}")]
    Protocol(ProtoError),

    /// Dial, read, write or timeout failure.
    #[error("memcache: io error: {0}")]
    Io(#[from] io::Error),

    /// Stored payload carried the envelope marker but could not be decoded.
    #[error("memcache: malformed envelope: {0}")]
    MalformedEnvelope(&'static str),

    /// Value codec failed to encode or decode the caller's type.
    #[error("memcache: value codec: {0}")]
    Codec(String),

    #[error("memcache: operation cancelled")]
    Cancelled,

    #[error("memcache: deadline exceeded")]
    DeadlineExceeded,

    #[error("memcache: invalid config: {0}")]
    InvalidConfig(String),
}

impl ClientError {
    /// Returns true for transport timeouts, including deadline expiry at call entry.
    pub fn is_timeout(&self) -> bool {
        match self {
            ClientError::DeadlineExceeded => true,
            ClientError::Io(err) => matches!(
                err.kind(),
                io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
            ),
            _ => false,
        }
    }

    /// Returns true when the error came from a server status.
    ///
    /// The response body of a status error has been drained, so the stream
    /// that produced it is still on a frame boundary.
    pub fn is_status(&self) -> bool {
        matches!(
            self,
            ClientError::CacheMiss
                | ClientError::AlreadyExists
                | ClientError::NotStored
                | ClientError::CasConflict
                | ClientError::BadIncrDecr
                | ClientError::ServerError
                | ClientError::InvalidArguments
                | ClientError::ValueTooLarge
                | ClientError::UnknownStatus(_)
        )
    }
}

impl From<Status> for ClientError {
    fn from(status: Status) -> Self {
        match status {
            Status::KeyNotFound => ClientError::CacheMiss,
            Status::KeyExists => ClientError::AlreadyExists,
            Status::ItemNotStored => ClientError::NotStored,
            Status::NonNumericValue => ClientError::BadIncrDecr,
            Status::InternalError => ClientError::ServerError,
            Status::InvalidArguments => ClientError::InvalidArguments,
            Status::ValueTooLarge => ClientError::ValueTooLarge,
            other => ClientError::UnknownStatus(other.as_u16()),
        }
    }
}

impl From<ProtoError> for ClientError {
    fn from(err: ProtoError) -> Self {
        match err {
            ProtoError::Status(status) => status.into(),
            ProtoError::Io(err) => ClientError::Io(err),
            other => ClientError::Protocol(other),
        }
    }
}

/// Returns true when a connection that produced `result` may be pooled again.
pub(crate) fn keeps_stream<T>(result: &ClientResult<T>) -> bool {
    match result {
        Ok(_) => true,
        Err(err) => err.is_status(),
    }
}

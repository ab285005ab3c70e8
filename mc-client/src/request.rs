//! # Request Executor
//!
//! Purpose: Run one request/response round against the server that owns a
//! key.
//!
//! ## Flow
//! 1. Check the context and validate the key locally; a bad key never
//!    reaches the network.
//! 2. Ask the selector for candidates and borrow a connection from the
//!    first one that accepts a dial. Only dial failures move on to the
//!    next candidate; once a frame has been exchanged the result is final.
//! 3. Bound the round by the context deadline, send one frame, read one.
//! 4. The pooled connection releases itself on every exit path.

use std::sync::Arc;

use mc_common::{is_valid_key, Opcode, Packet};
use tracing::{debug, warn};

use crate::context::Context;
use crate::error::{ClientError, ClientResult};
use crate::hash::KeyHasher;
use crate::pool::{ConnectionPool, PooledConnection};
use crate::selector::ServerSelector;

/// One outgoing request. The key is the caller's key, before wire hashing.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Request<'a> {
    pub opcode: Opcode,
    pub key: &'a str,
    pub extras: &'a [u8],
    pub data: &'a [u8],
    pub cas: u64,
}

impl<'a> Request<'a> {
    pub fn new(opcode: Opcode, key: &'a str) -> Self {
        Request {
            opcode,
            key,
            extras: &[],
            data: &[],
            cas: 0,
        }
    }

    pub fn extras(mut self, extras: &'a [u8]) -> Self {
        self.extras = extras;
        self
    }

    pub fn data(mut self, data: &'a [u8]) -> Self {
        self.data = data;
        self
    }

    pub fn cas(mut self, cas: u64) -> Self {
        self.cas = cas;
        self
    }
}

/// Owned copy of a successful response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Response {
    pub extras: Vec<u8>,
    pub data: Vec<u8>,
    pub cas: u64,
}

/// Routes requests to servers and runs the wire round-trips.
pub(crate) struct Executor {
    pub(crate) pool: ConnectionPool,
    pub(crate) selector: Arc<dyn ServerSelector>,
    pub(crate) hasher: Arc<dyn KeyHasher>,
}

impl Executor {
    /// Executes a single request and returns the owned response.
    pub fn execute(&self, ctx: &Context, request: Request<'_>) -> ClientResult<Response> {
        ctx.check()?;
        if !is_valid_key(request.key.as_bytes()) {
            return Err(ClientError::MalformedKey);
        }

        let mut conn = self.connect(request.key)?;
        conn.apply_deadline(ctx)?;

        let wire_key = self.hasher.wire_key(request.key);
        let packet = Packet::request(request.opcode)
            .key(&wire_key)
            .extras(request.extras)
            .data(request.data)
            .cas(request.cas);
        let frame = conn.round_trip(packet)?;
        Ok(Response {
            extras: frame.extras().to_vec(),
            data: frame.data().to_vec(),
            cas: frame.cas(),
        })
    }

    /// Borrows a connection to the first reachable candidate for `key`.
    fn connect(&self, key: &str) -> ClientResult<PooledConnection> {
        let candidates = self.selector.select(key);
        let mut last_err = None;
        for addr in &candidates {
            match self.pool.borrow(addr) {
                Ok(conn) => return Ok(conn),
                Err(err) => {
                    debug!(addr = %addr, error = %err, "dial failed, trying next candidate");
                    last_err = Some(err);
                }
            }
        }
        if let Some(err) = last_err {
            warn!(candidates = candidates.len(), error = %err, "no candidate server reachable");
        }
        Err(ClientError::NoServers)
    }
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("selector", &self.selector)
            .field("hasher", &self.hasher)
            .finish()
    }
}

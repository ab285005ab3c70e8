//! # Connection Pool
//!
//! Purpose: Reuse TCP connections per server address to avoid a handshake
//! on every request.
//!
//! ## Design Principles
//! 1. **Object Pool Pattern**: One bounded idle queue per configured address.
//! 2. **No Global Lock**: Queues are independent bounded channels, safe for
//!    concurrent borrow/release from many threads.
//! 3. **RAII Release**: `PooledConnection` returns itself to the pool on drop,
//!    so every exit path of a call releases its connection.
//! 4. **Trust Only Clean Streams**: A connection goes back to the queue only
//!    after success or a server status error; transport and framing errors
//!    close it, since its stream may sit in the middle of a frame.

use std::iter;
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, TrySendError};
use hashbrown::HashMap;
use mc_common::{Frame, Packet};
use tracing::{trace, warn};

use crate::conn::{Connection, SocketConfig};
use crate::context::Context;
use crate::error::{keeps_stream, ClientResult};

/// Pool configuration.
#[derive(Debug, Clone)]
pub(crate) struct PoolConfig {
    pub socket: SocketConfig,
    /// Idle connections kept per address.
    pub max_idle: usize,
    /// Connections at least this old are closed instead of reused.
    pub max_lifetime: Duration,
}

struct IdleQueue {
    tx: Sender<Connection>,
    rx: Receiver<Connection>,
}

struct PoolInner {
    config: PoolConfig,
    idle: HashMap<Arc<str>, IdleQueue>,
}

/// Connection pool handle.
#[derive(Clone)]
pub(crate) struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    /// Creates a pool with one idle queue per address.
    ///
    /// Addresses outside this list can still be borrowed (a custom selector
    /// may return them) but their connections are never kept idle.
    pub fn new(addrs: &[Arc<str>], config: PoolConfig) -> Self {
        let mut idle = HashMap::with_capacity(addrs.len());
        for addr in addrs {
            let (tx, rx) = crossbeam_channel::bounded(config.max_idle);
            idle.insert(addr.clone(), IdleQueue { tx, rx });
        }
        ConnectionPool {
            inner: Arc::new(PoolInner { config, idle }),
        }
    }

    /// Takes an idle connection to `addr`, or dials a new one.
    pub fn borrow(&self, addr: &Arc<str>) -> ClientResult<PooledConnection> {
        if let Some(queue) = self.inner.idle.get(addr.as_ref()) {
            while let Ok(conn) = queue.rx.try_recv() {
                if conn.age() < self.inner.config.max_lifetime {
                    trace!(addr = %addr, "reusing idle connection");
                    return Ok(PooledConnection::new(self.inner.clone(), conn));
                }
                trace!(addr = %addr, "closing aged idle connection");
            }
        }

        let conn = Connection::open(addr.clone(), &self.inner.config.socket)?;
        Ok(PooledConnection::new(self.inner.clone(), conn))
    }

    /// Number of idle connections currently queued for `addr`.
    #[cfg(test)]
    pub fn idle_count(&self, addr: &str) -> usize {
        self.inner.idle.get(addr).map_or(0, |queue| queue.rx.len())
    }
}

impl PoolInner {
    fn release(&self, conn: Connection, reusable: bool) {
        if conn.age() >= self.config.max_lifetime {
            trace!(addr = %conn.addr(), "closing connection past max lifetime");
            return;
        }
        if !reusable {
            warn!(addr = %conn.addr(), "discarding connection after transport or framing error");
            return;
        }

        match self.idle.get(conn.addr().as_ref()) {
            Some(queue) => match queue.tx.try_send(conn) {
                Ok(()) => {}
                Err(TrySendError::Full(conn)) | Err(TrySendError::Disconnected(conn)) => {
                    trace!(addr = %conn.addr(), "idle queue full, closing connection");
                }
            },
            None => trace!(addr = %conn.addr(), "address not pooled, closing connection"),
        }
    }
}

/// RAII wrapper returning a connection to the pool on drop.
pub(crate) struct PooledConnection {
    pool: Arc<PoolInner>,
    conn: Option<Connection>,
    reusable: bool,
    deadline_applied: bool,
}

impl PooledConnection {
    fn new(pool: Arc<PoolInner>, conn: Connection) -> Self {
        PooledConnection {
            pool,
            conn: Some(conn),
            reusable: true,
            deadline_applied: false,
        }
    }

    fn conn_mut(&mut self) -> &mut Connection {
        self.conn.as_mut().expect("connection exists")
    }

    /// Maps the context deadline onto the socket timeouts for this borrow.
    ///
    /// The configured timeouts are restored when the connection is released.
    pub fn apply_deadline(&mut self, ctx: &Context) -> ClientResult<()> {
        let remaining = ctx.remaining()?;
        if let Some(timeout) = remaining {
            self.deadline_applied = true;
            let result = self.conn_mut().set_io_timeout(timeout);
            if result.is_err() {
                self.reusable = false;
            }
            result?;
        }
        Ok(())
    }

    /// Sends one request and reads exactly one response.
    pub fn round_trip(&mut self, packet: Packet<'_>) -> ClientResult<&Frame> {
        let conn = self.conn.as_mut().expect("connection exists");
        let result = match conn.send(iter::once(packet)) {
            Ok(()) => conn.recv(),
            Err(err) => Err(err),
        };
        if !keeps_stream(&result) {
            self.reusable = false;
        }
        result
    }

    /// Sends a pipelined batch in a single write.
    pub fn send_batch<'a, I>(&mut self, packets: I) -> ClientResult<()>
    where
        I: IntoIterator<Item = Packet<'a>>,
    {
        let result = self.conn_mut().send(packets);
        if result.is_err() {
            self.reusable = false;
        }
        result
    }

    /// Reads the next frame of a pipelined batch.
    ///
    /// Any error, status errors included, leaves unread responses of the
    /// batch on the stream, so the connection is not reused.
    pub fn recv(&mut self) -> ClientResult<&Frame> {
        let conn = self.conn.as_mut().expect("connection exists");
        let result = conn.recv();
        if result.is_err() {
            self.reusable = false;
        }
        result
    }

    /// Marks the stream as untrusted so it is closed on release.
    pub fn discard(&mut self) {
        self.reusable = false;
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let mut conn = match self.conn.take() {
            Some(conn) => conn,
            None => return,
        };
        conn.reset_buffers();

        if self.deadline_applied && conn.restore_timeouts(&self.pool.config.socket).is_err() {
            self.reusable = false;
        }
        self.pool.release(conn, self.reusable);
    }
}

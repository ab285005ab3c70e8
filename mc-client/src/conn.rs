//! # Connection
//!
//! One TCP stream bound to a server address, with the buffers reused for
//! every frame it carries.
//!
//! A connection is owned by exactly one holder at a time: the idle queue of
//! its pool, or the call currently using it.

use std::io::{BufReader, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::BytesMut;
use mc_common::{Frame, Magic, Packet};
use tracing::debug;

use crate::error::{ClientError, ClientResult};

/// Socket settings applied at dial time and restored after each call.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SocketConfig {
    pub dial_timeout: Duration,
    pub read_timeout: Option<Duration>,
    pub write_timeout: Option<Duration>,
}

/// Single TCP connection with reusable buffers.
pub struct Connection {
    addr: Arc<str>,
    // Buffered reader reduces syscalls while still allowing direct writes.
    reader: BufReader<TcpStream>,
    write_buf: BytesMut,
    frame: Frame,
    created_at: Instant,
}

impl Connection {
    /// Dials `addr`, trying each resolved socket address in turn.
    pub(crate) fn open(addr: Arc<str>, config: &SocketConfig) -> ClientResult<Self> {
        let resolved = addr.as_ref().to_socket_addrs()?;
        let mut last_err = None;
        for socket_addr in resolved {
            match TcpStream::connect_timeout(&socket_addr, config.dial_timeout) {
                Ok(stream) => {
                    stream.set_read_timeout(config.read_timeout)?;
                    stream.set_write_timeout(config.write_timeout)?;
                    // Disable Nagle to keep request latency low for small frames.
                    stream.set_nodelay(true)?;
                    debug!(addr = %addr, "dialed memcached connection");
                    return Ok(Connection {
                        addr,
                        reader: BufReader::new(stream),
                        write_buf: BytesMut::with_capacity(256),
                        frame: Frame::new(),
                        created_at: Instant::now(),
                    });
                }
                Err(err) => last_err = Some(err),
            }
        }
        Err(match last_err {
            Some(err) => ClientError::Io(err),
            None => ClientError::InvalidConfig(format!("address {addr} did not resolve")),
        })
    }

    #[inline]
    pub fn addr(&self) -> &Arc<str> {
        &self.addr
    }

    #[inline]
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Encodes `packets` into one write and flushes it.
    pub(crate) fn send<'a, I>(&mut self, packets: I) -> ClientResult<()>
    where
        I: IntoIterator<Item = Packet<'a>>,
    {
        self.write_buf.clear();
        for packet in packets {
            self.write_buf.reserve(packet.encoded_len());
            packet.encode(&mut self.write_buf)?;
        }
        let stream = self.reader.get_mut();
        stream.write_all(&self.write_buf)?;
        stream.flush()?;
        Ok(())
    }

    /// Reads one response frame into the reusable frame buffer.
    pub(crate) fn recv(&mut self) -> ClientResult<&Frame> {
        self.frame.read_from(&mut self.reader, Magic::Response)?;
        Ok(&self.frame)
    }

    /// Applies one timeout to both directions of the socket.
    pub(crate) fn set_io_timeout(&self, timeout: Duration) -> ClientResult<()> {
        let stream = self.reader.get_ref();
        stream.set_read_timeout(Some(timeout))?;
        stream.set_write_timeout(Some(timeout))?;
        Ok(())
    }

    /// Restores the configured socket timeouts.
    pub(crate) fn restore_timeouts(&self, config: &SocketConfig) -> ClientResult<()> {
        let stream = self.reader.get_ref();
        stream.set_read_timeout(config.read_timeout)?;
        stream.set_write_timeout(config.write_timeout)?;
        Ok(())
    }

    /// Drops references to the last payload while keeping allocations.
    pub(crate) fn reset_buffers(&mut self) {
        self.write_buf.clear();
        self.frame.reset();
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("addr", &self.addr)
            .field("age", &self.age())
            .finish()
    }
}

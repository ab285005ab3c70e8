//! # Frame Codec
//!
//! Purpose: Encode borrowed request/response packets and decode incoming
//! frames into a reusable owned buffer.
//!
//! ## Design Principles
//! 1. **Borrowed Encode**: `Packet` only borrows extras, key and data, so
//!    building a request never copies the caller's value.
//! 2. **Buffer Reuse**: `Frame` keeps its body allocation across decodes;
//!    slices returned by its accessors are valid until the next decode.
//! 3. **Status Drain**: A non-OK response is consumed completely before the
//!    error is returned, keeping the stream aligned for the next frame.

use std::io::{self, Read};

use bytes::BufMut;

use crate::error::{ProtoError, ProtoResult};
use crate::protocol::{Header, Magic, Opcode, Status, DATA_TYPE_RAW, HEADER_SIZE, MAX_BODY_LEN};

/// Borrowed view of a frame to be written.
#[derive(Debug, Clone, Copy)]
pub struct Packet<'a> {
    pub magic: Magic,
    pub opcode: Opcode,
    /// Only written for responses.
    pub status: Status,
    /// Only written for requests.
    pub vbucket: u16,
    pub opaque: u32,
    pub cas: u64,
    pub extras: &'a [u8],
    pub key: &'a [u8],
    pub data: &'a [u8],
}

impl<'a> Packet<'a> {
    /// Builds an empty request packet for `opcode`.
    pub const fn request(opcode: Opcode) -> Self {
        Packet {
            magic: Magic::Request,
            opcode,
            status: Status::Ok,
            vbucket: 0,
            opaque: 0,
            cas: 0,
            extras: &[],
            key: &[],
            data: &[],
        }
    }

    /// Builds an empty response packet for `opcode` with `status`.
    pub const fn response(opcode: Opcode, status: Status) -> Self {
        Packet {
            magic: Magic::Response,
            opcode,
            status,
            vbucket: 0,
            opaque: 0,
            cas: 0,
            extras: &[],
            key: &[],
            data: &[],
        }
    }

    pub fn key(mut self, key: &'a [u8]) -> Self {
        self.key = key;
        self
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

    pub fn opaque(mut self, opaque: u32) -> Self {
        self.opaque = opaque;
        self
    }

    /// Total encoded size, header included.
    #[inline]
    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE + self.extras.len() + self.key.len() + self.data.len()
    }

    /// Appends the encoded frame to `out` and returns the number of bytes written.
    ///
    /// # Errors
    /// Returns `ProtoError::Malformed` when extras, key or body exceed the
    /// width of their length fields. Nothing is written in that case.
    pub fn encode<B: BufMut>(&self, out: &mut B) -> ProtoResult<usize> {
        let extras_len = u8::try_from(self.extras.len())
            .map_err(|_| ProtoError::Malformed("extras longer than 255 bytes"))?;
        let key_len = u16::try_from(self.key.len())
            .map_err(|_| ProtoError::Malformed("key longer than 65535 bytes"))?;
        let total = self.extras.len() + self.key.len() + self.data.len();
        let total_body_len =
            u32::try_from(total).map_err(|_| ProtoError::Malformed("body longer than 4GiB"))?;

        let vbucket_or_status = match self.magic {
            Magic::Request => self.vbucket,
            Magic::Response => self.status.as_u16(),
        };
        let header = Header {
            magic: self.magic.as_u8(),
            opcode: self.opcode.as_u8(),
            key_len,
            extras_len,
            data_type: DATA_TYPE_RAW,
            vbucket_or_status,
            total_body_len,
            opaque: self.opaque,
            cas: self.cas,
        };
        header.put(out);
        out.put_slice(self.extras);
        out.put_slice(self.key);
        out.put_slice(self.data);
        Ok(HEADER_SIZE + total)
    }
}

/// Owned, reusable decoded frame.
#[derive(Debug, Clone, Default)]
pub struct Frame {
    header: Header,
    body: Vec<u8>,
}

impl Frame {
    pub fn new() -> Self {
        Frame::default()
    }

    /// Clears header and body, keeping the body allocation.
    pub fn reset(&mut self) {
        self.header = Header::default();
        self.body.clear();
    }

    /// Reads exactly one frame from `reader`.
    ///
    /// **Logic**:
    /// 1. Read the 24 header bytes.
    /// 2. Reject a magic byte other than `expect`, then a non-raw data type.
    /// 3. For responses with a non-OK status, drain the body and return
    ///    `ProtoError::Status`.
    /// 4. Reject a body over `MAX_BODY_LEN` or one too short for its extras
    ///    and key, then read it.
    pub fn read_from<R: Read>(&mut self, reader: &mut R, expect: Magic) -> ProtoResult<()> {
        self.reset();

        let mut raw = [0u8; HEADER_SIZE];
        reader.read_exact(&mut raw)?;
        let header = Header::parse(&raw);

        if header.magic != expect.as_u8() {
            return Err(ProtoError::BadMagic(header.magic));
        }
        if header.data_type != DATA_TYPE_RAW {
            return Err(ProtoError::UnsupportedDataType(header.data_type));
        }

        let total = header.total_body_len as usize;
        self.header = header;

        if expect == Magic::Response {
            let status = Status::from_u16(header.vbucket_or_status);
            if !status.is_ok() {
                let drained = io::copy(&mut reader.by_ref().take(total as u64), &mut io::sink())?;
                if drained as usize != total {
                    return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
                }
                return Err(ProtoError::Status(status));
            }
        }

        if total > MAX_BODY_LEN {
            return Err(ProtoError::Malformed("body length over limit"));
        }
        if header.extras_len as usize + header.key_len as usize > total {
            return Err(ProtoError::Malformed("extras and key exceed body length"));
        }

        self.body.resize(total, 0);
        reader.read_exact(&mut self.body)?;
        Ok(())
    }

    #[inline]
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Known opcode of the frame, or `None` for opcodes the client never sends.
    #[inline]
    pub fn opcode(&self) -> Option<Opcode> {
        Opcode::from_u8(self.header.opcode)
    }

    /// Status of a response frame. Always `Ok` after a successful response decode.
    #[inline]
    pub fn status(&self) -> Status {
        Status::from_u16(self.header.vbucket_or_status)
    }

    #[inline]
    pub fn cas(&self) -> u64 {
        self.header.cas
    }

    #[inline]
    pub fn opaque(&self) -> u32 {
        self.header.opaque
    }

    #[inline]
    pub fn extras(&self) -> &[u8] {
        &self.body[..self.extras_end()]
    }

    #[inline]
    pub fn key(&self) -> &[u8] {
        &self.body[self.extras_end()..self.key_end()]
    }

    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.body[self.key_end()..]
    }

    #[inline]
    fn extras_end(&self) -> usize {
        (self.header.extras_len as usize).min(self.body.len())
    }

    #[inline]
    fn key_end(&self) -> usize {
        (self.header.extras_len as usize + self.header.key_len as usize).min(self.body.len())
    }
}

//! Dubbo v2.x wire framing: the 16-byte big-endian header
//! `magic(u16) | flag(u8) | status(u8) | reqid(i64) | body_len(u32)`,
//! plus the frame presence / completeness tests the receive loop runs after
//! every read.

use crate::buffer::Buffer;
use crate::shared::{ErrorType, NetworkError, NetworkResult};
use byteorder::{BigEndian, ByteOrder};

pub const MAGIC: u16 = 0xdabb;
pub const HEADER_SIZE: usize = 16;
pub const MAX_BODY_SIZE: usize = 4 * 1024 * 1024;

pub const FLAG_REQUEST: u8 = 0x80;
pub const FLAG_TWOWAY: u8 = 0x40;
pub const FLAG_EVENT: u8 = 0x20;

pub const SERIALIZATION_MASK: u8 = 0x1f;
pub const HESSIAN2_SERIALIZATION_ID: u8 = 2;

pub const STATUS_OK: u8 = 20;

/// Human readable text for a response status byte.
pub fn status_desc(status: u8) -> &'static str {
    match status {
        20 => "OK",
        30 => "CLIENT TIMEOUT",
        31 => "SERVER TIMEOUT",
        40 => "BAD REQUEST",
        50 => "BAD RESPONSE",
        60 => "SERVICE NOT FOUND",
        70 => "SERVICE ERROR",
        80 => "SERVER ERROR",
        90 => "CLIENT ERROR",
        _ => "UNKNOWN",
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Header {
    pub flag: u8,
    pub status: u8,
    pub reqid: i64,
    pub body_len: usize,
}

impl Header {
    /// Header for an outgoing user call.
    pub fn for_request(reqid: i64, twoway: bool, event: bool, body_len: usize) -> Header {
        let mut flag = FLAG_REQUEST | HESSIAN2_SERIALIZATION_ID;
        if twoway {
            flag |= FLAG_TWOWAY;
        }
        if event {
            flag |= FLAG_EVENT;
        }

        Header {
            flag,
            status: 0,
            reqid,
            body_len,
        }
    }

    #[inline]
    pub fn serialization_id(&self) -> u8 {
        self.flag & SERIALIZATION_MASK
    }

    #[inline]
    pub fn is_request(&self) -> bool {
        self.flag & FLAG_REQUEST != 0
    }

    #[inline]
    pub fn is_event(&self) -> bool {
        self.flag & FLAG_EVENT != 0
    }

    /// Writes the header in front of an already encoded body. Fields go in
    /// reverse write order so the magic ends up first; the buffer must have
    /// been created with a 16-byte prepend reserve.
    pub fn prepend_to(&self, buf: &mut Buffer) {
        buf.prepend_u32(self.body_len as u32);
        buf.prepend_i64(self.reqid);
        buf.prepend_u8(self.status);
        buf.prepend_u8(self.flag);
        buf.prepend_u16(MAGIC);
    }

    /// Consumes a response header off the receive buffer. Rejects oversized
    /// bodies, non-Hessian2 serialization and inbound request packets.
    pub fn decode(buf: &mut Buffer) -> NetworkResult<Header> {
        if !is_frame(buf) {
            return Err(NetworkError::Fatal(ErrorType::BadMagic));
        }

        buf.read_u16(); // magic
        let flag = buf.read_u8();
        let status = buf.read_u8();
        let reqid = buf.read_i64();
        let body_len = buf.read_u32() as usize;

        let header = Header {
            flag,
            status,
            reqid,
            body_len,
        };

        if body_len > MAX_BODY_SIZE {
            return Err(NetworkError::Fatal(ErrorType::BadBodySize));
        }

        if header.serialization_id() != HESSIAN2_SERIALIZATION_ID {
            return Err(NetworkError::Fatal(ErrorType::UnsupportedSerialization));
        }

        if header.is_request() {
            return Err(NetworkError::Fatal(ErrorType::RequestPacket));
        }

        Ok(header)
    }
}

/// True when the readable region starts with a Dubbo frame header.
#[inline]
pub fn is_frame(buf: &Buffer) -> bool {
    buf.readable() >= HEADER_SIZE && buf.peek_u16() == MAGIC
}

/// Bytes still missing before the first frame is complete; zero means the
/// frame can be decoded. Fails on a non-frame or an invalid declared body
/// size.
pub fn remaining(buf: &Buffer) -> NetworkResult<usize> {
    if !is_frame(buf) {
        return Err(NetworkError::Fatal(ErrorType::BadMagic));
    }

    let body_len = BigEndian::read_u32(&buf.peek()[HEADER_SIZE - 4..HEADER_SIZE]) as usize;
    if body_len == 0 || body_len > MAX_BODY_SIZE {
        return Err(NetworkError::Fatal(ErrorType::BadBodySize));
    }

    Ok((HEADER_SIZE + body_len).saturating_sub(buf.readable()))
}

//! MySQL client/server packet framing.
//!
//! Reference: <https://dev.mysql.com/doc/dev/mysql-server/latest/page_protocol_basic_packets.html>

use bytes::{BufMut, Bytes, BytesMut};

pub mod codec;

pub use codec::MySqlCodec;

/// Packet header size: 3-byte little-endian length + 1-byte sequence id
pub const HEADER_LEN: usize = 4;

/// Maximum payload carried by a single packet (2^24 - 1)
pub const MAX_PAYLOAD_LEN: usize = 0xFF_FF_FF;

/// COM_QUIT command byte
pub const COM_QUIT: u8 = 0x01;

/// COM_QUERY command byte
pub const COM_QUERY: u8 = 0x03;

/// Command classification of a client frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Query,
    Quit,
    Other(u8),
}

impl Command {
    pub fn from_u8(value: u8) -> Self {
        match value {
            COM_QUERY => Self::Query,
            COM_QUIT => Self::Quit,
            other => Self::Other(other),
        }
    }
}

/// One MySQL packet. The payload is an independently owned buffer; moving
/// the frame into a sink or dropping it is the only way it is released.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub sequence_id: u8,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(sequence_id: u8, payload: impl Into<Bytes>) -> Self {
        Self {
            sequence_id,
            payload: payload.into(),
        }
    }

    /// Build a COM_QUERY frame carrying `sql`.
    pub fn query(sequence_id: u8, sql: &str) -> Self {
        let mut payload = BytesMut::with_capacity(1 + sql.len());
        payload.put_u8(COM_QUERY);
        payload.put_slice(sql.as_bytes());
        Self {
            sequence_id,
            payload: payload.freeze(),
        }
    }

    /// Command byte classification, or `None` for an empty payload.
    pub fn command(&self) -> Option<Command> {
        self.payload.first().copied().map(Command::from_u8)
    }

    pub fn is_query(&self) -> bool {
        self.command() == Some(Command::Query)
    }

    /// SQL text of a COM_QUERY frame. Non-UTF-8 statements are left opaque.
    pub fn query_text(&self) -> Option<&str> {
        if !self.is_query() {
            return None;
        }
        std::str::from_utf8(&self.payload[1..]).ok()
    }

    /// Size of the frame on the wire.
    pub fn wire_len(&self) -> usize {
        HEADER_LEN + self.payload.len()
    }
}

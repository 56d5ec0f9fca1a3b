use super::{Frame, HEADER_LEN, MAX_PAYLOAD_LEN};
use crate::error::CodecError;
use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Length-prefixed MySQL packet codec.
///
/// The decoder never consumes a header until the whole payload behind it is
/// buffered, so a partial packet is never emitted.
#[derive(Debug, Clone)]
pub struct MySqlCodec {
    max_frame_size: usize,
}

impl Default for MySqlCodec {
    fn default() -> Self {
        Self {
            max_frame_size: MAX_PAYLOAD_LEN,
        }
    }
}

impl MySqlCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject incoming frames whose payload is larger than `max` bytes.
    pub fn with_max_frame_size(max: usize) -> Self {
        Self {
            max_frame_size: max.min(MAX_PAYLOAD_LEN),
        }
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }
}

fn read_u24_le(buf: &[u8]) -> usize {
    buf[0] as usize | (buf[1] as usize) << 8 | (buf[2] as usize) << 16
}

impl Decoder for MySqlCodec {
    type Item = Frame;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        let payload_len = read_u24_le(&src[..3]);
        let sequence_id = src[3];

        if payload_len > self.max_frame_size {
            return Err(CodecError::FrameTooLarge {
                size: payload_len,
                max: self.max_frame_size,
            });
        }

        let total = HEADER_LEN + payload_len;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        src.advance(HEADER_LEN);
        let payload = src.split_to(payload_len).freeze();
        tracing::trace!(sequence_id, payload_len, "Decoded frame");

        Ok(Some(Frame {
            sequence_id,
            payload,
        }))
    }
}

impl Encoder<Frame> for MySqlCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let len = item.payload.len();
        if len > MAX_PAYLOAD_LEN {
            return Err(CodecError::PayloadTooLarge(len));
        }

        dst.reserve(HEADER_LEN + len);
        dst.put_uint_le(len as u64, 3);
        dst.put_u8(item.sequence_id);
        dst.put_slice(&item.payload);
        Ok(())
    }
}

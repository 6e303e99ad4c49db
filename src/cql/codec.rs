use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

use crate::cql::frame::Frame;
use crate::cql::header::Header;
use crate::error::{CodecError, FrameError};
use crate::serde::reader::FrameReader;

pub const DEFAULT_MAX_FRAME_SIZE: usize = 256 * 1024 * 1024;

/// Splits a byte stream into whole frames and writes frames back out.
#[derive(Debug, Clone)]
pub struct CqlFrameCodec {
    max_frame_size: usize,
}

impl CqlFrameCodec {
    pub fn new() -> Self {
        CqlFrameCodec::with_max_frame_size(DEFAULT_MAX_FRAME_SIZE)
    }

    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        CqlFrameCodec { max_frame_size }
    }
}

impl Default for CqlFrameCodec {
    fn default() -> Self {
        CqlFrameCodec::new()
    }
}

impl Encoder<Frame> for CqlFrameCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        trace!(
            stream_id = item.header.stream_id,
            opcode = %item.header.opcode,
            length = item.body.len(),
            "encoding frame"
        );

        if item.body.len() > self.max_frame_size {
            return Err(FrameError::BodyTooLarge {
                length: item.body.len(),
                max: self.max_frame_size,
            }
            .into());
        }

        dst.reserve(item.header.version.header_len() + item.body.len());
        item.encode(dst)?;

        Ok(())
    }
}

impl Decoder for CqlFrameCodec {
    type Item = Frame;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some(&version_byte) = src.first() else {
            return Ok(None);
        };

        let header_len = Header::len_for(version_byte)?;
        if src.len() < header_len {
            src.reserve(header_len - src.len());
            return Ok(None);
        }

        let header = Header::read(&mut FrameReader::new(src[..header_len].to_vec()))?;
        let body_len = header.body_length as usize;

        if body_len > self.max_frame_size {
            return Err(FrameError::BodyTooLarge {
                length: body_len,
                max: self.max_frame_size,
            }
            .into());
        }

        let frame_len = header_len + body_len;
        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        let mut frame = src.split_to(frame_len);
        let body = frame.split_off(header_len).freeze();

        trace!(
            stream_id = header.stream_id,
            opcode = %header.opcode,
            length = body_len,
            "decoded frame"
        );

        Ok(Some(Frame { header, body }))
    }
}

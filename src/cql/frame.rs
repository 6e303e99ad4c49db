use bytes::{Bytes, BytesMut};

use crate::cql::header::Header;
use crate::error::FrameError;
use crate::serde::reader::FrameReader;

/// One complete protocol message: header plus opaque body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub header: Header,
    pub body: Bytes,
}

impl Frame {
    pub fn stream_id(&self) -> i16 {
        self.header.stream_id
    }

    pub fn encode(&self, dst: &mut BytesMut) -> Result<(), FrameError> {
        self.header.write(dst)?;
        dst.extend_from_slice(&self.body);

        Ok(())
    }

    /// Wire image of the frame.
    pub fn to_bytes(&self) -> Result<Bytes, FrameError> {
        let mut buf = BytesMut::with_capacity(self.header.version.header_len() + self.body.len());
        self.encode(&mut buf)?;

        Ok(buf.freeze())
    }

    /// Parse exactly one frame from `src`; trailing bytes are an error.
    pub fn parse(src: impl Into<Bytes>) -> Result<Frame, FrameError> {
        let mut reader = FrameReader::new(src);
        let header = Header::read(&mut reader)?;
        let body = reader.take(header.body_length as usize)?;

        if !reader.is_empty() {
            return Err(FrameError::InvalidLength(header.body_length as i64));
        }

        Ok(Frame { header, body })
    }
}

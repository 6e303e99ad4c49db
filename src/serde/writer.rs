use bytes::{BufMut, Bytes, BytesMut};

use crate::cql::header::{Header, HeaderFlags, MessageDirection, ProtocolVersion};
use crate::cql::frame::Frame;
use crate::cql::operation::Opcode;
use crate::error::FrameError;
use crate::serde::reader::Value;

macro_rules! byte {
    ($bytes:expr,$value:expr) => {{
        $bytes.put_u8($value);
    }};
}

macro_rules! short {
    ($bytes:expr,$value:expr) => {{
        $bytes.put_u16($value);
    }};
}

macro_rules! tinyint {
    ($bytes:expr,$value:expr) => {{
        $bytes.put_i16($value);
    }};
}

macro_rules! int {
    ($bytes:expr,$value:expr) => {{
        $bytes.put_i32($value);
    }};
}

macro_rules! long {
    ($bytes:expr,$value:expr) => {{
        $bytes.put_i64($value);
    }};
}

pub(crate) use byte;
pub(crate) use int;
pub(crate) use tinyint;

// Length-prefixed forms. Callers check that the length fits the prefix first.

macro_rules! string {
    ($bytes:expr,$value:expr) => {{
        let value: &[u8] = $value.as_ref();
        $bytes.reserve(2 + value.len());
        $bytes.put_u16(value.len() as u16);
        $bytes.put_slice(value);
    }};
}

macro_rules! long_string {
    ($bytes:expr,$value:expr) => {{
        let value: &[u8] = $value.as_ref();
        $bytes.reserve(4 + value.len());
        $bytes.put_i32(value.len() as i32);
        $bytes.put_slice(value);
    }};
}

/// Append-only cursor producing one frame.
///
/// The body length is not known up front: [`FrameWriter::write_header`]
/// reserves the four length bytes and [`FrameWriter::finalize`] patches them
/// once the body is complete.
#[derive(Debug, Default)]
pub struct FrameWriter {
    buf: BytesMut,
    header: Option<Header>,
}

impl FrameWriter {
    pub fn new() -> Self {
        FrameWriter {
            buf: BytesMut::new(),
            header: None,
        }
    }

    pub fn write_header(
        &mut self,
        version: ProtocolVersion,
        flags: HeaderFlags,
        stream_id: i16,
        opcode: Opcode,
    ) -> Result<(), FrameError> {
        let header = Header::new(
            version,
            MessageDirection::Request,
            flags,
            stream_id,
            opcode,
            0,
        );
        header.write(&mut self.buf)?;
        self.header = Some(header);

        Ok(())
    }

    pub fn write_u8(&mut self, value: u8) {
        byte!(self.buf, value);
    }

    pub fn write_u16(&mut self, value: u16) {
        short!(self.buf, value);
    }

    pub fn write_i16(&mut self, value: i16) {
        tinyint!(self.buf, value);
    }

    pub fn write_i32(&mut self, value: i32) {
        int!(self.buf, value);
    }

    pub fn write_i64(&mut self, value: i64) {
        long!(self.buf, value);
    }

    /// `[string]`: u16 length followed by utf-8 bytes.
    pub fn write_string(&mut self, value: &str) -> Result<(), FrameError> {
        check_short_length("string", value.len())?;
        string!(self.buf, value);

        Ok(())
    }

    /// `[long string]`: i32 length followed by utf-8 bytes.
    pub fn write_long_string(&mut self, value: &str) -> Result<(), FrameError> {
        check_int_length("long string", value.len())?;
        long_string!(self.buf, value);

        Ok(())
    }

    /// `[short bytes]`: u16 length followed by raw bytes.
    pub fn write_short_bytes(&mut self, value: &[u8]) -> Result<(), FrameError> {
        check_short_length("short bytes", value.len())?;
        string!(self.buf, value);

        Ok(())
    }

    /// `[bytes]`: i32 length followed by raw bytes, `-1` for null.
    pub fn write_bytes(&mut self, value: Option<&[u8]>) -> Result<(), FrameError> {
        match value {
            Some(value) => {
                check_int_length("bytes", value.len())?;
                long_string!(self.buf, value);
            }
            None => int!(self.buf, -1),
        }

        Ok(())
    }

    pub fn write_value(&mut self, value: &Value) -> Result<(), FrameError> {
        match value {
            Value::Null => int!(self.buf, -1),
            Value::NotSet => int!(self.buf, -2),
            Value::Set(bytes) => self.write_bytes(Some(bytes.as_ref()))?,
        }

        Ok(())
    }

    pub fn write_string_list<S: AsRef<str>>(&mut self, values: &[S]) -> Result<(), FrameError> {
        check_short_length("string list", values.len())?;
        short!(self.buf, values.len() as u16);

        for value in values {
            self.write_string(value.as_ref())?;
        }

        Ok(())
    }

    pub fn write_string_map<'a, I>(&mut self, entries: I) -> Result<(), FrameError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
        I::IntoIter: ExactSizeIterator,
    {
        let entries = entries.into_iter();
        check_short_length("string map", entries.len())?;
        short!(self.buf, entries.len() as u16);

        for (key, value) in entries {
            self.write_string(key)?;
            self.write_string(value)?;
        }

        Ok(())
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Patch the body length and split the buffer into a [`Frame`].
    pub fn finalize(mut self) -> Result<Frame, FrameError> {
        let Some(mut header) = self.header else {
            return Err(FrameError::TruncatedFrame {
                needed: 8,
                remaining: self.buf.len(),
            });
        };

        let header_len = header.version.header_len();
        let body_len = self.buf.len() - header_len;
        check_int_length("frame body", body_len)?;

        let length_at = header_len - 4;
        self.buf[length_at..header_len].copy_from_slice(&(body_len as u32).to_be_bytes());
        header.body_length = body_len as u32;

        let body = self.buf.split_off(header_len).freeze();

        Ok(Frame { header, body })
    }

    /// The bytes written so far, for writers used without a header.
    pub fn into_bytes(self) -> Bytes {
        self.buf.freeze()
    }
}

fn check_short_length(what: &'static str, length: usize) -> Result<(), FrameError> {
    if length > u16::MAX as usize {
        Err(FrameError::Overflow { what, length })
    } else {
        Ok(())
    }
}

fn check_int_length(what: &'static str, length: usize) -> Result<(), FrameError> {
    if length > i32::MAX as usize {
        Err(FrameError::Overflow { what, length })
    } else {
        Ok(())
    }
}

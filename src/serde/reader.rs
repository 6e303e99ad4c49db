use std::collections::HashMap;

use bytes::{Buf, Bytes};
use uuid::Uuid;

use crate::error::FrameError;

/// A bound value as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Null,
    NotSet,
    Set(Bytes),
}

impl From<Bytes> for Value {
    fn from(bytes: Bytes) -> Self {
        Value::Set(bytes)
    }
}

impl From<&'static [u8]> for Value {
    fn from(bytes: &'static [u8]) -> Self {
        Value::Set(Bytes::from_static(bytes))
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

/// Read cursor over one frame body.
///
/// Every read checks the remaining length first and fails with
/// [`FrameError::TruncatedFrame`] instead of yielding short data.
#[derive(Debug, Clone)]
pub struct FrameReader {
    buf: Bytes,
}

impl FrameReader {
    pub fn new(buf: impl Into<Bytes>) -> Self {
        FrameReader { buf: buf.into() }
    }

    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn peek_u8(&self) -> Result<u8, FrameError> {
        self.ensure(1)?;
        Ok(self.buf[0])
    }

    pub fn read_u8(&mut self) -> Result<u8, FrameError> {
        self.ensure(1)?;
        Ok(self.buf.get_u8())
    }

    pub fn read_u16(&mut self) -> Result<u16, FrameError> {
        self.ensure(2)?;
        Ok(self.buf.get_u16())
    }

    pub fn read_i16(&mut self) -> Result<i16, FrameError> {
        self.ensure(2)?;
        Ok(self.buf.get_i16())
    }

    pub fn read_i32(&mut self) -> Result<i32, FrameError> {
        self.ensure(4)?;
        Ok(self.buf.get_i32())
    }

    pub fn read_u32(&mut self) -> Result<u32, FrameError> {
        self.ensure(4)?;
        Ok(self.buf.get_u32())
    }

    pub fn read_i64(&mut self) -> Result<i64, FrameError> {
        self.ensure(8)?;
        Ok(self.buf.get_i64())
    }

    pub fn read_string(&mut self) -> Result<String, FrameError> {
        let length = self.read_u16()? as usize;
        let bytes = self.take(length)?;
        into_string(bytes)
    }

    pub fn read_long_string(&mut self) -> Result<String, FrameError> {
        let length = self.read_length()?;
        let bytes = self.take(length)?;
        into_string(bytes)
    }

    pub fn read_short_bytes(&mut self) -> Result<Bytes, FrameError> {
        let length = self.read_u16()? as usize;
        self.take(length)
    }

    /// `[bytes]`; a negative length is null.
    pub fn read_bytes(&mut self) -> Result<Option<Bytes>, FrameError> {
        let length = self.read_i32()?;

        if length < 0 {
            Ok(None)
        } else {
            self.take(length as usize).map(Some)
        }
    }

    pub fn read_value(&mut self) -> Result<Value, FrameError> {
        let length = self.read_i32()?;

        match length {
            -1 => Ok(Value::Null),
            -2 => Ok(Value::NotSet),
            _ if length < -2 => Err(FrameError::InvalidLength(length as i64)),
            _ => self.take(length as usize).map(Value::Set),
        }
    }

    pub fn read_uuid(&mut self) -> Result<Uuid, FrameError> {
        let bytes = self.take(16)?;
        let mut raw = [0u8; 16];
        raw.copy_from_slice(&bytes);

        Ok(Uuid::from_bytes(raw))
    }

    pub fn read_string_list(&mut self) -> Result<Vec<String>, FrameError> {
        let length = self.read_u16()? as usize;
        (0..length).map(|_| self.read_string()).collect()
    }

    pub fn read_string_map(&mut self) -> Result<HashMap<String, String>, FrameError> {
        let length = self.read_u16()? as usize;
        let mut map = HashMap::with_capacity(length);

        for _ in 0..length {
            map.insert(self.read_string()?, self.read_string()?);
        }

        Ok(map)
    }

    pub fn read_string_multimap(&mut self) -> Result<HashMap<String, Vec<String>>, FrameError> {
        let length = self.read_u16()? as usize;
        let mut map = HashMap::with_capacity(length);

        for _ in 0..length {
            map.insert(self.read_string()?, self.read_string_list()?);
        }

        Ok(map)
    }

    pub fn read_bytes_map(&mut self) -> Result<HashMap<String, Option<Bytes>>, FrameError> {
        let length = self.read_u16()? as usize;
        let mut map = HashMap::with_capacity(length);

        for _ in 0..length {
            map.insert(self.read_string()?, self.read_bytes()?);
        }

        Ok(map)
    }

    /// Split off the next `length` bytes without copying.
    pub fn take(&mut self, length: usize) -> Result<Bytes, FrameError> {
        self.ensure(length)?;
        Ok(self.buf.split_to(length))
    }

    pub fn into_remaining(self) -> Bytes {
        self.buf
    }

    fn read_length(&mut self) -> Result<usize, FrameError> {
        let length = self.read_i32()?;

        if length < 0 {
            Err(FrameError::InvalidLength(length as i64))
        } else {
            Ok(length as usize)
        }
    }

    fn ensure(&self, needed: usize) -> Result<(), FrameError> {
        let remaining = self.buf.remaining();

        if remaining < needed {
            Err(FrameError::TruncatedFrame { needed, remaining })
        } else {
            Ok(())
        }
    }
}

fn into_string(bytes: Bytes) -> Result<String, FrameError> {
    String::from_utf8(bytes.to_vec()).map_err(|_| FrameError::InvalidUtf8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string() {
        let mut str = b"Farts".to_vec();
        let mut len = 5u16.to_be_bytes().to_vec();

        len.append(&mut str);

        let mut reader = FrameReader::new(len);

        assert_eq!(reader.read_string().unwrap(), String::from("Farts"));
        assert!(reader.is_empty());
    }

    #[test]
    fn test_numeric_reader() {
        let mut reader = FrameReader::new(12i32.to_be_bytes().to_vec());
        assert_eq!(12i32, reader.read_i32().unwrap());
        assert_eq!(0, reader.remaining());

        let mut reader = FrameReader::new(12i64.to_be_bytes().to_vec());
        assert_eq!(12i64, reader.read_i64().unwrap());
        assert_eq!(0, reader.remaining());

        let mut reader = FrameReader::new(12u16.to_be_bytes().to_vec());
        assert_eq!(12u16, reader.read_u16().unwrap());
        assert_eq!(0, reader.remaining());
    }

    #[test]
    fn short_reads_report_truncation() {
        let mut reader = FrameReader::new(vec![0x00, 0x01, 0x02]);

        assert_eq!(
            reader.read_i32(),
            Err(FrameError::TruncatedFrame {
                needed: 4,
                remaining: 3
            })
        );
        // a failed read leaves the cursor where it was
        assert_eq!(reader.remaining(), 3);
    }

    #[test]
    fn string_longer_than_buffer_is_truncated() {
        let mut reader = FrameReader::new(vec![0x00, 0x09, b'a', b'b']);

        assert_eq!(
            reader.read_string(),
            Err(FrameError::TruncatedFrame {
                needed: 9,
                remaining: 2
            })
        );
    }

    #[test]
    fn values_decode_null_unset_and_invalid() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&(-1i32).to_be_bytes());
        bytes.extend_from_slice(&(-2i32).to_be_bytes());
        bytes.extend_from_slice(&1i32.to_be_bytes());
        bytes.push(0xaa);
        bytes.extend_from_slice(&(-3i32).to_be_bytes());

        let mut reader = FrameReader::new(bytes);

        assert_eq!(reader.read_value().unwrap(), Value::Null);
        assert_eq!(reader.read_value().unwrap(), Value::NotSet);
        assert_eq!(
            reader.read_value().unwrap(),
            Value::Set(Bytes::from_static(&[0xaa]))
        );
        assert_eq!(reader.read_value(), Err(FrameError::InvalidLength(-3)));
    }

    #[test]
    fn invalid_utf8_is_rejected() {
        let mut reader = FrameReader::new(vec![0x00, 0x02, 0xff, 0xfe]);

        assert_eq!(reader.read_string(), Err(FrameError::InvalidUtf8));
    }

    #[test]
    fn negative_long_string_length_is_rejected() {
        let mut reader = FrameReader::new((-5i32).to_be_bytes().to_vec());

        assert_eq!(reader.read_long_string(), Err(FrameError::InvalidLength(-5)));
    }
}

use bitflags::bitflags;
use bytes::{BufMut, BytesMut};

use crate::cql::operation::Opcode;
use crate::error::FrameError;
use crate::serde::reader::FrameReader;
use crate::serde::writer::{byte, int, tinyint};

const PROTOCOL_VERSION_MASK: u8 = 0x7F;
const MESSAGE_DIRECTION_MASK: u8 = 0x80;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct HeaderFlags: u8 {
        const COMPRESSION = 0x01;
        const TRACING = 0x02;
        const CUSTOM_PAYLOAD = 0x04;
        const WARNING = 0x08;
        const USE_BETA = 0x10;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub version: ProtocolVersion,
    pub direction: MessageDirection,
    pub flags: HeaderFlags,
    pub stream_id: i16,
    pub opcode: Opcode,
    pub body_length: u32,
}

impl Header {
    pub fn new(
        version: ProtocolVersion,
        direction: MessageDirection,
        flags: HeaderFlags,
        stream_id: i16,
        opcode: Opcode,
        body_length: u32,
    ) -> Header {
        Header {
            version,
            direction,
            flags,
            stream_id,
            opcode,
            body_length,
        }
    }

    /// Size of the header that starts with `version_byte`, if the version is known.
    pub fn len_for(version_byte: u8) -> Result<usize, FrameError> {
        ProtocolVersion::from_u8(version_byte & PROTOCOL_VERSION_MASK).map(|v| v.header_len())
    }

    pub fn read(src: &mut FrameReader) -> Result<Header, FrameError> {
        let version_byte = src.read_u8()?;
        let version = ProtocolVersion::from_u8(version_byte & PROTOCOL_VERSION_MASK)?;
        let direction = match version_byte & MESSAGE_DIRECTION_MASK {
            0x00 => MessageDirection::Request,
            _ => MessageDirection::Response,
        };
        let flags = HeaderFlags::from_bits_retain(src.read_u8()?);
        let stream_id = if version.stream_id_width() == 1 {
            src.read_u8()? as i8 as i16
        } else {
            src.read_i16()?
        };
        let opcode = Opcode::try_from(src.read_u8()?)?;
        let body_length = src.read_u32()?;

        Ok(Header {
            version,
            direction,
            flags,
            stream_id,
            opcode,
            body_length,
        })
    }

    pub fn write(&self, buf: &mut BytesMut) -> Result<(), FrameError> {
        let version_byte = match self.direction {
            MessageDirection::Request => self.version.as_u8(),
            MessageDirection::Response => self.version.as_u8() | MESSAGE_DIRECTION_MASK,
        };

        buf.reserve(self.version.header_len());
        byte!(buf, version_byte);
        byte!(buf, self.flags.bits());

        if self.version.stream_id_width() == 1 {
            let stream_id =
                i8::try_from(self.stream_id).map_err(|_| FrameError::StreamIdOutOfRange {
                    stream_id: self.stream_id,
                    version: self.version.as_u8(),
                })?;
            byte!(buf, stream_id as u8);
        } else {
            tinyint!(buf, self.stream_id);
        }

        byte!(buf, self.opcode.as_u8());
        int!(buf, self.body_length as i32);

        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum ProtocolVersion {
    V1,
    V2,
    V3,
    #[default]
    V4,
    V5,
}

impl ProtocolVersion {
    pub fn from_u8(value: u8) -> Result<ProtocolVersion, FrameError> {
        match value {
            0x01 => Ok(ProtocolVersion::V1),
            0x02 => Ok(ProtocolVersion::V2),
            0x03 => Ok(ProtocolVersion::V3),
            0x04 => Ok(ProtocolVersion::V4),
            0x05 => Ok(ProtocolVersion::V5),
            _ => Err(FrameError::UnsupportedVersion(value)),
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            ProtocolVersion::V1 => 0x01,
            ProtocolVersion::V2 => 0x02,
            ProtocolVersion::V3 => 0x03,
            ProtocolVersion::V4 => 0x04,
            ProtocolVersion::V5 => 0x05,
        }
    }

    /// Versions before 3 carry a single signed byte of stream id.
    pub fn stream_id_width(&self) -> usize {
        match self {
            ProtocolVersion::V1 | ProtocolVersion::V2 => 1,
            _ => 2,
        }
    }

    pub fn header_len(&self) -> usize {
        1 + 1 + self.stream_id_width() + 1 + 4
    }

    /// Number of non-negative stream ids a connection can have in flight.
    pub fn max_stream_ids(&self) -> usize {
        match self.stream_id_width() {
            1 => i8::MAX as usize + 1,
            _ => i16::MAX as usize + 1,
        }
    }
}

impl std::fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{}", self.as_u8())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageDirection {
    Request,
    Response,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(ProtocolVersion::V2, 8, 128)]
    #[case(ProtocolVersion::V3, 9, 32768)]
    #[case(ProtocolVersion::V4, 9, 32768)]
    fn header_geometry_follows_version(
        #[case] version: ProtocolVersion,
        #[case] header_len: usize,
        #[case] max_streams: usize,
    ) {
        assert_eq!(version.header_len(), header_len);
        assert_eq!(version.max_stream_ids(), max_streams);
    }

    #[rstest]
    #[case(ProtocolVersion::V2, 0x7f)]
    #[case(ProtocolVersion::V2, -1)]
    #[case(ProtocolVersion::V4, 0x1234)]
    #[case(ProtocolVersion::V4, -1)]
    fn header_round_trips(#[case] version: ProtocolVersion, #[case] stream_id: i16) {
        let header = Header::new(
            version,
            MessageDirection::Response,
            HeaderFlags::TRACING | HeaderFlags::WARNING,
            stream_id,
            Opcode::Result,
            42,
        );
        let mut buf = BytesMut::new();
        header.write(&mut buf).unwrap();

        assert_eq!(buf.len(), version.header_len());
        assert_eq!(buf[0], version.as_u8() | 0x80);

        let decoded = Header::read(&mut FrameReader::new(buf.freeze())).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn wide_stream_id_does_not_fit_one_byte_versions() {
        let header = Header::new(
            ProtocolVersion::V2,
            MessageDirection::Request,
            HeaderFlags::empty(),
            300,
            Opcode::Options,
            0,
        );

        assert_eq!(
            header.write(&mut BytesMut::new()),
            Err(FrameError::StreamIdOutOfRange {
                stream_id: 300,
                version: 2
            })
        );
    }

    #[test]
    fn unknown_version_is_rejected() {
        let mut reader = FrameReader::new(vec![0x09, 0, 0, 0, 0, 0, 0, 0, 0]);

        assert_eq!(
            Header::read(&mut reader),
            Err(FrameError::UnsupportedVersion(0x09))
        );
    }
}

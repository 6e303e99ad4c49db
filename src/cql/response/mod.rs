//! Response envelopes.
//!
//! Only the parts every response shares are decoded here: the tracing id,
//! warnings and custom payload announced by the header flags. RESULT and
//! EVENT bodies are handed on as raw bytes.

pub mod error;
pub mod supported;

use std::collections::HashMap;

use bytes::Bytes;
use uuid::Uuid;

use crate::cql::frame::Frame;
use crate::cql::header::{Header, HeaderFlags, ProtocolVersion};
use crate::cql::operation::Opcode;
use crate::error::FrameError;
use crate::serde::reader::FrameReader;

pub use error::{ErrorCode, ServerError};
pub use supported::Supported;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub version: ProtocolVersion,
    pub stream_id: i16,
    pub opcode: Opcode,
    pub flags: HeaderFlags,
    pub tracing_id: Option<Uuid>,
    pub warnings: Vec<String>,
    pub custom_payload: Option<HashMap<String, Option<Bytes>>>,
    pub body: Bytes,
}

impl Response {
    pub fn from_frame(frame: Frame) -> Result<Response, FrameError> {
        Response::parse(frame.header, frame.body)
    }

    /// Strip the envelope announced by `header` off the front of `body`.
    pub fn parse(header: Header, body: Bytes) -> Result<Response, FrameError> {
        let mut src = FrameReader::new(body);

        let tracing_id = if header.flags.contains(HeaderFlags::TRACING) {
            Some(src.read_uuid()?)
        } else {
            None
        };
        let warnings = if header.flags.contains(HeaderFlags::WARNING) {
            src.read_string_list()?
        } else {
            Vec::new()
        };
        let custom_payload = if header.flags.contains(HeaderFlags::CUSTOM_PAYLOAD) {
            Some(src.read_bytes_map()?)
        } else {
            None
        };

        Ok(Response {
            version: header.version,
            stream_id: header.stream_id,
            opcode: header.opcode,
            flags: header.flags,
            tracing_id,
            warnings,
            custom_payload,
            body: src.into_remaining(),
        })
    }

    pub fn is_event(&self) -> bool {
        self.opcode == Opcode::Event
    }

    /// The server failure carried by an ERROR response, if this is one.
    pub fn server_error(&self) -> Option<Result<ServerError, FrameError>> {
        (self.opcode == Opcode::Error).then(|| error::decode(self.body.clone()))
    }
}

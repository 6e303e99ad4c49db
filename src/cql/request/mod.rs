//! Requests a client can send.
//!
//! Every variant owns the data it needs and encodes its body
//! deterministically; nothing here touches connection state. Stream ids and
//! header flags are supplied at serialization time by the caller.

pub mod batch;
pub mod execute;
pub mod prepare;
pub mod query;
pub mod register;
pub mod startup;

use crate::cql::frame::Frame;
use crate::cql::header::{HeaderFlags, ProtocolVersion};
use crate::cql::operation::Opcode;
use crate::error::FrameError;
use crate::serde::reader::FrameReader;
use crate::serde::writer::FrameWriter;

pub use batch::{Batch, BatchType, BatchableRequest};
pub use execute::Execute;
pub use prepare::Prepare;
pub use query::{Query, QueryOptions, Values};
pub use register::{EventType, Register};
pub use startup::Startup;

#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Startup(Startup),
    Options,
    Query(Query),
    Prepare(Prepare),
    Execute(Execute),
    Batch(Batch),
    Register(Register),
}

impl Request {
    pub fn opcode(&self) -> Opcode {
        match self {
            Request::Startup(_) => Opcode::Startup,
            Request::Options => Opcode::Options,
            Request::Query(_) => Opcode::Query,
            Request::Prepare(_) => Opcode::Prepare,
            Request::Execute(_) => Opcode::Execute,
            Request::Batch(_) => Opcode::Batch,
            Request::Register(_) => Opcode::Register,
        }
    }

    /// Encode the complete frame: header, body, and patched body length.
    ///
    /// A batch that asked for tracing also sets the header's tracing flag.
    pub fn serialize_as_frame(
        &self,
        version: ProtocolVersion,
        stream_id: i16,
        flags: HeaderFlags,
    ) -> Result<Frame, FrameError> {
        let flags = match self {
            Request::Batch(batch) if batch.is_tracing() => flags | HeaderFlags::TRACING,
            _ => flags,
        };

        let mut writer = FrameWriter::new();
        writer.write_header(version, flags, stream_id, self.opcode())?;
        self.encode_body(&mut writer)?;
        writer.finalize()
    }

    fn encode_body(&self, dst: &mut FrameWriter) -> Result<(), FrameError> {
        match self {
            Request::Startup(startup) => startup.encode(dst),
            Request::Options => Ok(()),
            Request::Query(query) => query.encode(dst),
            Request::Prepare(prepare) => prepare.encode(dst),
            Request::Execute(execute) => execute.encode(dst),
            Request::Batch(batch) => batch.encode(dst),
            Request::Register(register) => register.encode(dst),
        }
    }

    /// Decode a request body, as a server would.
    ///
    /// Batches come back as [`Request::Batch`] only when every entry is a
    /// plain query or prepared id, which the wire format guarantees.
    pub fn decode(opcode: Opcode, body: impl Into<bytes::Bytes>) -> Result<Request, FrameError> {
        let mut src = FrameReader::new(body);

        let request = match opcode {
            Opcode::Startup => Request::Startup(startup::decode(&mut src)?),
            Opcode::Options => Request::Options,
            Opcode::Query => Request::Query(query::decode(&mut src)?),
            Opcode::Prepare => Request::Prepare(prepare::decode(&mut src)?),
            Opcode::Execute => Request::Execute(execute::decode(&mut src)?),
            Opcode::Batch => Request::Batch(batch::decode(&mut src)?.into_batch()),
            Opcode::Register => Request::Register(register::decode(&mut src)?),
            other => return Err(FrameError::UnknownOpcode(other.as_u8())),
        };

        Ok(request)
    }
}

impl From<Query> for Request {
    fn from(query: Query) -> Self {
        Request::Query(query)
    }
}

impl From<Execute> for Request {
    fn from(execute: Execute) -> Self {
        Request::Execute(execute)
    }
}

impl From<Batch> for Request {
    fn from(batch: Batch) -> Self {
        Request::Batch(batch)
    }
}

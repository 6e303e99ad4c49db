use bytes::Bytes;

use crate::cql::request::query::QueryOptions;
use crate::error::FrameError;
use crate::serde::reader::FrameReader;
use crate::serde::writer::FrameWriter;

/// Execution of a statement the server already prepared, by its id.
#[derive(Debug, Clone, PartialEq)]
pub struct Execute {
    pub id: Bytes,
    pub query_options: QueryOptions,
}

impl Execute {
    pub fn new(id: impl Into<Bytes>, query_options: QueryOptions) -> Execute {
        Execute {
            id: id.into(),
            query_options,
        }
    }

    pub(crate) fn encode(&self, dst: &mut FrameWriter) -> Result<(), FrameError> {
        dst.write_short_bytes(&self.id)?;
        self.query_options.encode(dst)
    }
}

pub fn decode(src: &mut FrameReader) -> Result<Execute, FrameError> {
    let id = src.read_short_bytes()?;
    let query_options = QueryOptions::decode(src)?;

    Ok(Execute { id, query_options })
}

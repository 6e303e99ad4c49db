use crate::error::FrameError;
use crate::serde::reader::FrameReader;
use crate::serde::writer::FrameWriter;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prepare {
    pub query: String,
}

impl Prepare {
    pub fn new(query: impl Into<String>) -> Prepare {
        Prepare {
            query: query.into(),
        }
    }

    pub(crate) fn encode(&self, dst: &mut FrameWriter) -> Result<(), FrameError> {
        dst.write_long_string(&self.query)
    }
}

pub fn decode(src: &mut FrameReader) -> Result<Prepare, FrameError> {
    Ok(Prepare {
        query: src.read_long_string()?,
    })
}

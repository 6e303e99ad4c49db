use std::collections::HashMap;

use bytes::Bytes;

use crate::cql::PROTOCOL_VERSIONS_KEY;
use crate::error::FrameError;
use crate::serde::reader::FrameReader;

/// Options the server advertised in reply to OPTIONS.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Supported {
    pub options: HashMap<String, Vec<String>>,
}

impl Supported {
    pub fn get(&self, key: &str) -> &[String] {
        self.options.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Protocol versions as advertised, e.g. `4/v4` or `5/v5-beta`.
    pub fn protocol_versions(&self) -> &[String] {
        self.get(PROTOCOL_VERSIONS_KEY)
    }
}

pub fn decode(body: Bytes) -> Result<Supported, FrameError> {
    let options = FrameReader::new(body).read_string_multimap()?;

    Ok(Supported { options })
}

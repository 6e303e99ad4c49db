use indexmap::IndexMap;

use crate::cql::{CQL_VERSION_KEY, CQL_VERSION_VALUE};
use crate::error::FrameError;
use crate::serde::reader::FrameReader;
use crate::serde::writer::FrameWriter;

pub(crate) const COMPRESSION_KEY: &str = "COMPRESSION";

/// Connection options announced before any other request.
///
/// Options keep insertion order so the encoded body is deterministic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Startup {
    pub options: IndexMap<String, String>,
}

impl Startup {
    pub fn new() -> Startup {
        let mut options = IndexMap::new();
        options.insert(CQL_VERSION_KEY.to_string(), CQL_VERSION_VALUE.to_string());

        Startup { options }
    }

    pub fn option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    pub fn compression(self, algorithm: impl Into<String>) -> Self {
        self.option(COMPRESSION_KEY, algorithm)
    }

    pub(crate) fn encode(&self, dst: &mut FrameWriter) -> Result<(), FrameError> {
        dst.write_string_map(
            self.options
                .iter()
                .map(|(key, value)| (key.as_str(), value.as_str())),
        )
    }
}

impl Default for Startup {
    fn default() -> Self {
        Startup::new()
    }
}

pub fn decode(src: &mut FrameReader) -> Result<Startup, FrameError> {
    let length = src.read_u16()? as usize;
    let mut options = IndexMap::with_capacity(length);

    for _ in 0..length {
        options.insert(src.read_string()?, src.read_string()?);
    }

    Ok(Startup { options })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn startup_announces_cql_version_first() {
        let startup = Startup::new().option("DRIVER_NAME", "cqlmux");
        let mut writer = FrameWriter::new();
        startup.encode(&mut writer).unwrap();

        let decoded = decode(&mut FrameReader::new(writer.into_bytes())).unwrap();
        let keys: Vec<&str> = decoded.options.keys().map(String::as_str).collect();

        assert_eq!(keys, ["CQL_VERSION", "DRIVER_NAME"]);
        assert_eq!(decoded.options["CQL_VERSION"], "3.0.0");
    }
}

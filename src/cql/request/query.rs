use bitflags::bitflags;
use bytes::Bytes;
use indexmap::IndexMap;

use crate::cql::consistency::Consistency;
use crate::error::FrameError;
use crate::serde::reader::{FrameReader, Value};
use crate::serde::writer::FrameWriter;

/// A plain CQL statement sent as text.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub query: String,
    pub query_options: QueryOptions,
}

impl Query {
    pub fn new(query: impl Into<String>, consistency: Consistency) -> Query {
        Query {
            query: query.into(),
            query_options: QueryOptions::new(consistency),
        }
    }

    pub fn with_options(query: impl Into<String>, query_options: QueryOptions) -> Query {
        Query {
            query: query.into(),
            query_options,
        }
    }

    pub(crate) fn encode(&self, dst: &mut FrameWriter) -> Result<(), FrameError> {
        dst.write_long_string(&self.query)?;
        self.query_options.encode(dst)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct QueryOptions {
    pub consistency: Consistency,
    pub values: Option<Values>,
    pub skip_metadata: bool,
    pub page_size: Option<i32>,
    pub paging_state: Option<Bytes>,
    pub serial_consistency: Option<Consistency>,
    pub timestamp: Option<i64>,
}

impl QueryOptions {
    pub fn new(consistency: Consistency) -> QueryOptions {
        QueryOptions {
            consistency,
            ..QueryOptions::default()
        }
    }

    pub fn values(mut self, values: Values) -> Self {
        self.values = Some(values);
        self
    }

    pub fn skip_metadata(mut self, skip_metadata: bool) -> Self {
        self.skip_metadata = skip_metadata;
        self
    }

    pub fn page_size(mut self, page_size: i32) -> Self {
        self.page_size = Some(page_size);
        self
    }

    pub fn paging_state(mut self, paging_state: Bytes) -> Self {
        self.paging_state = Some(paging_state);
        self
    }

    pub fn serial_consistency(mut self, serial_consistency: Consistency) -> Self {
        self.serial_consistency = Some(serial_consistency);
        self
    }

    pub fn timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    fn flags(&self) -> QueryFlags {
        let mut flags = QueryFlags::empty();

        match &self.values {
            Some(Values::Named(_)) => flags |= QueryFlags::VALUES | QueryFlags::NAMES_FOR_VALUES,
            Some(Values::Unnamed(_)) => flags |= QueryFlags::VALUES,
            None => {}
        }
        flags.set(QueryFlags::SKIP_METADATA, self.skip_metadata);
        flags.set(QueryFlags::PAGE_SIZE, self.page_size.is_some());
        flags.set(QueryFlags::PAGING_STATE, self.paging_state.is_some());
        flags.set(
            QueryFlags::SERIAL_CONSISTENCY,
            self.serial_consistency.is_some(),
        );
        flags.set(QueryFlags::TIMESTAMPS, self.timestamp.is_some());

        flags
    }

    pub(crate) fn encode(&self, dst: &mut FrameWriter) -> Result<(), FrameError> {
        dst.write_u16(self.consistency.code());
        dst.write_u8(self.flags().bits());

        if let Some(values) = &self.values {
            values.encode(dst)?;
        }
        if let Some(page_size) = self.page_size {
            dst.write_i32(page_size);
        }
        if let Some(paging_state) = &self.paging_state {
            dst.write_bytes(Some(paging_state.as_ref()))?;
        }
        if let Some(serial_consistency) = self.serial_consistency {
            dst.write_u16(serial_consistency.code());
        }
        if let Some(timestamp) = self.timestamp {
            dst.write_i64(timestamp);
        }

        Ok(())
    }

    pub(crate) fn decode(src: &mut FrameReader) -> Result<QueryOptions, FrameError> {
        let consistency = Consistency::try_from(src.read_u16()?)?;
        let flags = QueryFlags::from_bits_truncate(src.read_u8()?);

        let values = if flags.contains(QueryFlags::VALUES) {
            let with_names = flags.contains(QueryFlags::NAMES_FOR_VALUES);
            Some(Values::decode(src, with_names)?)
        } else {
            None
        };
        let skip_metadata = flags.contains(QueryFlags::SKIP_METADATA);
        let page_size = if flags.contains(QueryFlags::PAGE_SIZE) {
            Some(src.read_i32()?)
        } else {
            None
        };
        let paging_state = if flags.contains(QueryFlags::PAGING_STATE) {
            src.read_bytes()?
        } else {
            None
        };
        let serial_consistency = if flags.contains(QueryFlags::SERIAL_CONSISTENCY) {
            Some(Consistency::try_from(src.read_u16()?)?)
        } else {
            None
        };
        let timestamp = if flags.contains(QueryFlags::TIMESTAMPS) {
            Some(src.read_i64()?)
        } else {
            None
        };

        Ok(QueryOptions {
            consistency,
            values,
            skip_metadata,
            page_size,
            paging_state,
            serial_consistency,
            timestamp,
        })
    }
}

/// Bound values, either positional or by bind-marker name.
#[derive(Debug, Clone, PartialEq)]
pub enum Values {
    Unnamed(Vec<Value>),
    Named(IndexMap<String, Value>),
}

impl Values {
    pub fn len(&self) -> usize {
        match self {
            Values::Unnamed(values) => values.len(),
            Values::Named(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn encode(&self, dst: &mut FrameWriter) -> Result<(), FrameError> {
        if self.len() > u16::MAX as usize {
            return Err(FrameError::Overflow {
                what: "value count",
                length: self.len(),
            });
        }
        dst.write_u16(self.len() as u16);

        match self {
            Values::Unnamed(values) => {
                for value in values {
                    dst.write_value(value)?;
                }
            }
            Values::Named(values) => {
                for (name, value) in values {
                    dst.write_string(name)?;
                    dst.write_value(value)?;
                }
            }
        }

        Ok(())
    }

    pub(crate) fn decode(src: &mut FrameReader, with_names: bool) -> Result<Values, FrameError> {
        let num_values = src.read_u16()? as usize;

        if with_names {
            let mut items = IndexMap::with_capacity(num_values);
            for _ in 0..num_values {
                items.insert(src.read_string()?, src.read_value()?);
            }
            Ok(Values::Named(items))
        } else {
            let items = (0..num_values)
                .map(|_| src.read_value())
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Values::Unnamed(items))
        }
    }
}

impl From<Vec<Value>> for Values {
    fn from(values: Vec<Value>) -> Self {
        Values::Unnamed(values)
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    struct QueryFlags: u8 {
        const VALUES = 0x01;
        const SKIP_METADATA = 0x02;
        const PAGE_SIZE = 0x04;
        const PAGING_STATE = 0x08;
        const SERIAL_CONSISTENCY = 0x10;
        const TIMESTAMPS = 0x20;
        const NAMES_FOR_VALUES = 0x40;
    }
}

pub fn decode(src: &mut FrameReader) -> Result<Query, FrameError> {
    let query = src.read_long_string()?;
    let query_options = QueryOptions::decode(src)?;

    Ok(Query {
        query,
        query_options,
    })
}

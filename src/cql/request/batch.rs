use bitflags::bitflags;
use bytes::Bytes;

use crate::cql::consistency::Consistency;
use crate::cql::request::execute::Execute;
use crate::cql::request::query::{Query, QueryOptions, Values};
use crate::cql::request::Request;
use crate::error::{BuildError, FrameError};
use crate::serde::reader::{FrameReader, Value};
use crate::serde::writer::FrameWriter;

const QUERY_KIND: u8 = 0;
const PREPARED_KIND: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BatchType {
    #[default]
    Logged,
    Unlogged,
    Counter,
}

impl BatchType {
    pub fn as_u8(&self) -> u8 {
        match self {
            BatchType::Logged => 0,
            BatchType::Unlogged => 1,
            BatchType::Counter => 2,
        }
    }
}

impl TryFrom<u8> for BatchType {
    type Error = FrameError;

    fn try_from(value: u8) -> Result<Self, FrameError> {
        match value {
            0 => Ok(BatchType::Logged),
            1 => Ok(BatchType::Unlogged),
            2 => Ok(BatchType::Counter),
            _ => Err(FrameError::UnknownBatchType(value)),
        }
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct BatchFlags: u8 {
        const TRACING = 0x02;
    }
}

/// The subset of requests that may appear inside a batch.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchableRequest {
    Query(Query),
    Execute(Execute),
}

impl BatchableRequest {
    fn values(&self) -> Option<&Values> {
        match self {
            BatchableRequest::Query(query) => query.query_options.values.as_ref(),
            BatchableRequest::Execute(execute) => execute.query_options.values.as_ref(),
        }
    }

    /// Writes `[kind]{statement-or-id}[n]{values}` with no frame header.
    ///
    /// Consistency and the other per-request options are not part of an
    /// entry; the batch carries its own.
    pub fn serialize_as_batch_entry(&self, dst: &mut FrameWriter) -> Result<(), FrameError> {
        match self {
            BatchableRequest::Query(query) => {
                dst.write_u8(QUERY_KIND);
                dst.write_long_string(&query.query)?;
            }
            BatchableRequest::Execute(execute) => {
                dst.write_u8(PREPARED_KIND);
                dst.write_short_bytes(&execute.id)?;
            }
        }

        match self.values() {
            Some(values) => values.encode(dst),
            None => {
                dst.write_u16(0);
                Ok(())
            }
        }
    }
}

impl From<Query> for BatchableRequest {
    fn from(query: Query) -> Self {
        BatchableRequest::Query(query)
    }
}

impl From<Execute> for BatchableRequest {
    fn from(execute: Execute) -> Self {
        BatchableRequest::Execute(execute)
    }
}

impl TryFrom<Request> for BatchableRequest {
    type Error = BuildError;

    fn try_from(request: Request) -> Result<Self, BuildError> {
        match request {
            Request::Query(query) => Ok(BatchableRequest::Query(query)),
            Request::Execute(execute) => Ok(BatchableRequest::Execute(execute)),
            other => Err(BuildError::InvalidBatchChild(other.opcode().name())),
        }
    }
}

/// Several write statements executed under one consistency level.
///
/// Children keep the order they were given in; the batch never reorders
/// or deduplicates them.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    batch_type: BatchType,
    children: Vec<BatchableRequest>,
    consistency: Consistency,
    tracing: bool,
}

impl Batch {
    pub fn new(
        batch_type: BatchType,
        children: impl IntoIterator<Item = BatchableRequest>,
        consistency: Consistency,
    ) -> Result<Batch, BuildError> {
        let children: Vec<BatchableRequest> = children.into_iter().collect();

        if children.len() > u16::MAX as usize {
            return Err(BuildError::TooManyBatchChildren(children.len()));
        }
        if children
            .iter()
            .any(|child| matches!(child.values(), Some(Values::Named(_))))
        {
            return Err(BuildError::NamedValuesInBatch);
        }

        Ok(Batch {
            batch_type,
            children,
            consistency,
            tracing: false,
        })
    }

    /// Build from arbitrary requests, rejecting anything outside the batchable subset.
    pub fn from_requests(
        batch_type: BatchType,
        requests: impl IntoIterator<Item = Request>,
        consistency: Consistency,
    ) -> Result<Batch, BuildError> {
        let children = requests
            .into_iter()
            .map(BatchableRequest::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        Batch::new(batch_type, children, consistency)
    }

    pub fn tracing(mut self, tracing: bool) -> Self {
        self.tracing = tracing;
        self
    }

    pub fn batch_type(&self) -> BatchType {
        self.batch_type
    }

    pub fn children(&self) -> &[BatchableRequest] {
        &self.children
    }

    pub fn consistency(&self) -> Consistency {
        self.consistency
    }

    pub fn is_tracing(&self) -> bool {
        self.tracing
    }

    pub fn flags(&self) -> BatchFlags {
        if self.tracing {
            BatchFlags::TRACING
        } else {
            BatchFlags::empty()
        }
    }

    pub(crate) fn encode(&self, dst: &mut FrameWriter) -> Result<(), FrameError> {
        dst.write_u8(self.batch_type.as_u8());
        dst.write_u8(self.flags().bits());
        dst.write_u16(self.children.len() as u16);

        for child in &self.children {
            child.serialize_as_batch_entry(dst)?;
        }

        dst.write_u16(self.consistency.code());

        Ok(())
    }
}

/// One child as it was read back from a batch body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchEntry {
    Query { query: String, values: Vec<Value> },
    Prepared { id: Bytes, values: Vec<Value> },
}

impl From<&BatchableRequest> for BatchEntry {
    fn from(child: &BatchableRequest) -> Self {
        let values = match child.values() {
            Some(Values::Unnamed(values)) => values.clone(),
            _ => Vec::new(),
        };

        match child {
            BatchableRequest::Query(query) => BatchEntry::Query {
                query: query.query.clone(),
                values,
            },
            BatchableRequest::Execute(execute) => BatchEntry::Prepared {
                id: execute.id.clone(),
                values,
            },
        }
    }
}

/// A batch body as it was read back from the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedBatch {
    pub batch_type: BatchType,
    pub flags: BatchFlags,
    pub entries: Vec<BatchEntry>,
    pub consistency: Consistency,
}

impl DecodedBatch {
    /// Rebuild a [`Batch`]. Children inherit the batch consistency since
    /// entries carry none of their own.
    pub fn into_batch(self) -> Batch {
        let consistency = self.consistency;
        let options = |values: Vec<Value>| {
            let options = QueryOptions::new(consistency);
            if values.is_empty() {
                options
            } else {
                options.values(Values::Unnamed(values))
            }
        };

        let children = self
            .entries
            .into_iter()
            .map(|entry| match entry {
                BatchEntry::Query { query, values } => {
                    BatchableRequest::Query(Query::with_options(query, options(values)))
                }
                BatchEntry::Prepared { id, values } => {
                    BatchableRequest::Execute(Execute::new(id, options(values)))
                }
            })
            .collect();

        Batch {
            batch_type: self.batch_type,
            children,
            consistency,
            tracing: self.flags.contains(BatchFlags::TRACING),
        }
    }
}

pub fn decode(src: &mut FrameReader) -> Result<DecodedBatch, FrameError> {
    let batch_type = BatchType::try_from(src.read_u8()?)?;
    let flags = BatchFlags::from_bits_retain(src.read_u8()?);
    let count = src.read_u16()? as usize;
    let mut entries = Vec::with_capacity(count);

    for _ in 0..count {
        let entry = match src.read_u8()? {
            QUERY_KIND => BatchEntry::Query {
                query: src.read_long_string()?,
                values: read_values(src)?,
            },
            PREPARED_KIND => BatchEntry::Prepared {
                id: src.read_short_bytes()?,
                values: read_values(src)?,
            },
            kind => return Err(FrameError::UnknownBatchEntryKind(kind)),
        };
        entries.push(entry);
    }

    let consistency = Consistency::try_from(src.read_u16()?)?;

    Ok(DecodedBatch {
        batch_type,
        flags,
        entries,
        consistency,
    })
}

fn read_values(src: &mut FrameReader) -> Result<Vec<Value>, FrameError> {
    match Values::decode(src, false)? {
        Values::Unnamed(values) => Ok(values),
        Values::Named(values) => Ok(values.into_values().collect()),
    }
}

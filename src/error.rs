use std::fmt;
use std::io;
use std::sync::Arc;

use thiserror::Error;

use crate::cql::response::error::ServerError;

/// Byte-level failures while reading or writing a single frame.
///
/// These never outlive the frame that produced them: a decode failure on one
/// response only fails the operation waiting on that stream id.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("truncated frame: needed {needed} bytes but only {remaining} remain")]
    TruncatedFrame { needed: usize, remaining: usize },
    #[error("invalid length {0}")]
    InvalidLength(i64),
    #[error("string is not valid utf-8")]
    InvalidUtf8,
    #[error("{what} of {length} does not fit the wire encoding")]
    Overflow { what: &'static str, length: usize },
    #[error("unsupported protocol version {0:#04x}")]
    UnsupportedVersion(u8),
    #[error("unknown opcode {0:#04x}")]
    UnknownOpcode(u8),
    #[error("unknown consistency code {0:#06x}")]
    UnknownConsistency(u16),
    #[error("unknown batch type {0}")]
    UnknownBatchType(u8),
    #[error("unknown batch entry kind {0}")]
    UnknownBatchEntryKind(u8),
    #[error("unknown event type `{0}`")]
    UnknownEventType(String),
    #[error("stream id {stream_id} is out of range for protocol {version}")]
    StreamIdOutOfRange { stream_id: i16, version: u8 },
    #[error("frame body of {length} bytes exceeds the limit of {max} bytes")]
    BodyTooLarge { length: usize, max: usize },
}

/// Misuse detected while building a request, before anything reaches the wire.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    #[error("{0} requests cannot be batch children")]
    InvalidBatchChild(&'static str),
    #[error("batch has {0} children but at most 65535 are allowed")]
    TooManyBatchChildren(usize),
    #[error("batch children cannot carry named values")]
    NamedValuesInBatch,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MuxError {
    #[error("all {capacity} stream ids are in use")]
    ExhaustedStreamIds { capacity: usize },
}

/// Failure cause delivered through a completion handle.
///
/// Cloneable so every observer of one handle sees the same cause. Wrapped
/// errors keep their `source()` chain.
#[derive(Debug, Clone, Error)]
pub enum RequestError {
    #[error("request was cancelled")]
    Cancelled,
    #[error("request timed out")]
    Timeout,
    #[error("connection closed")]
    ConnectionClosed,
    #[error(transparent)]
    Server(#[from] ServerError),
    #[error("malformed response: {0}")]
    Frame(#[from] FrameError),
    #[error("transport error: {0}")]
    Io(#[source] Arc<io::Error>),
    #[error(transparent)]
    Aggregate(#[from] AggregateError),
}

impl From<io::Error> for RequestError {
    fn from(error: io::Error) -> Self {
        RequestError::Io(Arc::new(error))
    }
}

impl PartialEq for RequestError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (RequestError::Cancelled, RequestError::Cancelled)
            | (RequestError::Timeout, RequestError::Timeout)
            | (RequestError::ConnectionClosed, RequestError::ConnectionClosed) => true,
            (RequestError::Server(a), RequestError::Server(b)) => a == b,
            (RequestError::Frame(a), RequestError::Frame(b)) => a == b,
            // io errors have no equality; the same error is the same allocation
            (RequestError::Io(a), RequestError::Io(b)) => Arc::ptr_eq(a, b),
            (RequestError::Aggregate(a), RequestError::Aggregate(b)) => a.causes == b.causes,
            _ => false,
        }
    }
}

/// More than one distinct failure cause for the same operation.
#[derive(Debug, Clone)]
pub struct AggregateError {
    causes: Vec<RequestError>,
}

impl AggregateError {
    pub fn new(causes: Vec<RequestError>) -> Self {
        AggregateError { causes }
    }

    pub fn causes(&self) -> &[RequestError] {
        &self.causes
    }

    pub fn into_causes(self) -> Vec<RequestError> {
        self.causes
    }
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} errors occurred", self.causes.len())?;

        for (i, cause) in self.causes.iter().enumerate() {
            let separator = if i == 0 { ": " } else { "; " };
            write!(f, "{separator}{cause}")?;
        }

        Ok(())
    }
}

impl std::error::Error for AggregateError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.causes
            .first()
            .map(|cause| cause as &(dyn std::error::Error + 'static))
    }
}

/// Errors surfaced by the frame codec.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("transport error: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Frame(#[from] FrameError),
}

impl From<CodecError> for RequestError {
    fn from(error: CodecError) -> Self {
        match error {
            CodecError::Io(error) => RequestError::from(error),
            CodecError::Frame(error) => RequestError::Frame(error),
        }
    }
}

/// Reported synchronously to a caller trying to send a request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    #[error(transparent)]
    Mux(#[from] MuxError),
    #[error("failed to encode request: {0}")]
    Encode(#[from] FrameError),
    #[error("connection is closed")]
    Closed,
}

/// Either side of a round trip: the send was refused or the response failed.
#[derive(Debug, Clone, Error)]
pub enum CallError {
    #[error(transparent)]
    Send(#[from] SendError),
    #[error(transparent)]
    Request(#[from] RequestError),
}

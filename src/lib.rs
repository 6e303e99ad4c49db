//! A client-side core for the Cassandra native protocol.
//!
//! Requests are encoded into frames by [`cql`], correlated with their
//! responses by stream id in [`mux`], and handed back to callers through the
//! completion handles in [`completion`]. [`client::Connection`] drives all of
//! it over any async byte stream.

pub mod client;
pub mod completion;
pub mod config;
pub mod cql;
pub mod error;
pub mod mux;
pub mod serde;

pub use client::{Connection, PendingRequest};
pub use completion::{CompletionHandle, Completer, Execution};
pub use config::ConnectionConfig;
pub use cql::request::Request;
pub use cql::response::Response;
pub use error::{CallError, RequestError, SendError};

use std::time::Duration;

use crate::cql::codec::DEFAULT_MAX_FRAME_SIZE;
use crate::cql::header::ProtocolVersion;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(12);
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_millis(100);
pub const DEFAULT_EVENT_CAPACITY: usize = 64;

/// Settings for a single [`Connection`](crate::client::Connection).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    pub protocol_version: ProtocolVersion,
    /// Caps the stream ids in flight below what the protocol version allows.
    pub max_streams: Option<usize>,
    /// `None` waits for a response forever.
    pub request_timeout: Option<Duration>,
    pub sweep_interval: Duration,
    pub max_frame_size: usize,
    pub event_capacity: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionConfig {
            protocol_version: ProtocolVersion::default(),
            max_streams: None,
            request_timeout: Some(DEFAULT_REQUEST_TIMEOUT),
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl ConnectionConfig {
    pub fn new() -> Self {
        ConnectionConfig::default()
    }

    pub fn protocol_version(mut self, version: ProtocolVersion) -> Self {
        self.protocol_version = version;
        self
    }

    pub fn max_streams(mut self, max_streams: usize) -> Self {
        self.max_streams = Some(max_streams);
        self
    }

    pub fn request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Stream ids the connection may hand out at once.
    pub fn stream_capacity(&self) -> usize {
        let addressable = self.protocol_version.max_stream_ids();
        self.max_streams
            .map_or(addressable, |max_streams| max_streams.min(addressable))
    }
}

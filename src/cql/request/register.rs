use crate::error::FrameError;
use crate::serde::reader::FrameReader;
use crate::serde::writer::FrameWriter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    TopologyChange,
    StatusChange,
    SchemaChange,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::TopologyChange => "TOPOLOGY_CHANGE",
            EventType::StatusChange => "STATUS_CHANGE",
            EventType::SchemaChange => "SCHEMA_CHANGE",
        }
    }
}

/// Subscription to server-pushed events; they arrive on stream id -1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Register {
    pub events: Vec<EventType>,
}

impl Register {
    pub fn new(events: impl IntoIterator<Item = EventType>) -> Register {
        Register {
            events: events.into_iter().collect(),
        }
    }

    pub(crate) fn encode(&self, dst: &mut FrameWriter) -> Result<(), FrameError> {
        let names: Vec<&str> = self.events.iter().map(EventType::as_str).collect();
        dst.write_string_list(&names)
    }
}

impl std::str::FromStr for EventType {
    type Err = FrameError;

    fn from_str(s: &str) -> Result<Self, FrameError> {
        match s {
            "TOPOLOGY_CHANGE" => Ok(EventType::TopologyChange),
            "STATUS_CHANGE" => Ok(EventType::StatusChange),
            "SCHEMA_CHANGE" => Ok(EventType::SchemaChange),
            _ => Err(FrameError::UnknownEventType(s.to_string())),
        }
    }
}

pub fn decode(src: &mut FrameReader) -> Result<Register, FrameError> {
    let events = src
        .read_string_list()?
        .iter()
        .map(|name| name.parse())
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Register { events })
}

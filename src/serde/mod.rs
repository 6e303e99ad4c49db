//! Big-endian primitives of the CQL wire format.

pub mod reader;
pub mod writer;

pub use reader::{FrameReader, Value};
pub use writer::FrameWriter;

//! Stream graphs built from the active components
//!
//! A topology is assembled with [`TopologyBuilder`] on the control thread and
//! is immutable afterwards. Worker threads walk it concurrently while routing
//! requests and samples.

mod graph;
mod stream;

pub use graph::{MessageGenerator, StreamSnapshot, Topology, TopologyBuilder, TopologySnapshot};
pub use stream::{Edge, EdgeParams, MediaStream, StreamId, StreamKind};

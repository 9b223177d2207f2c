use serde::Serialize;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use super::{Edge, EdgeParams, MediaStream, StreamId, StreamKind};
use crate::clock::PresentationClock;
use crate::error::MediaError;
use crate::media::MediaKind;

static NEXT_TOPOLOGY_ID: AtomicU64 = AtomicU64::new(1);

/// Hands out packet numbers for one topology, starting at 0.
#[derive(Debug, Default)]
pub struct MessageGenerator {
    next: AtomicI64,
}

impl MessageGenerator {
    pub fn next_packet_number(&self) -> i64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

struct StreamNode {
    kind: StreamKind,
    stream: Arc<dyn MediaStream>,
    inputs: Vec<Edge>,
    outputs: Vec<Edge>,
    /// Distinct upstream streams, in first-connection order
    upstream: Vec<StreamId>,
    last_requested: AtomicI64,
}

/// An immutable stream graph for one half of the pipeline.
pub struct Topology {
    id: u64,
    kind: MediaKind,
    clock: Arc<PresentationClock>,
    generator: MessageGenerator,
    nodes: Vec<StreamNode>,
    terminal: StreamId,
}

impl Topology {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    pub fn clock(&self) -> &Arc<PresentationClock> {
        &self.clock
    }

    pub fn next_packet_number(&self) -> i64 {
        self.generator.next_packet_number()
    }

    /// The sink stream that requests are issued to.
    pub fn terminal(&self) -> StreamId {
        self.terminal
    }

    pub fn stream(&self, id: StreamId) -> &Arc<dyn MediaStream> {
        &self.nodes[id.0].stream
    }

    pub fn stream_kind(&self, id: StreamId) -> StreamKind {
        self.nodes[id.0].kind
    }

    pub fn inputs(&self, id: StreamId) -> &[Edge] {
        &self.nodes[id.0].inputs
    }

    pub fn outputs(&self, id: StreamId) -> &[Edge] {
        &self.nodes[id.0].outputs
    }

    pub fn upstream(&self, id: StreamId) -> &[StreamId] {
        &self.nodes[id.0].upstream
    }

    pub fn stream_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.nodes.iter().map(|n| n.inputs.len()).sum()
    }

    pub fn streams_of_kind(&self, kind: StreamKind) -> Vec<StreamId> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.kind == kind)
            .map(|(i, _)| StreamId(i))
            .collect()
    }

    /// Record a request of `packet_number` for `id`; false if it was already requested.
    pub fn mark_requested(&self, id: StreamId, packet_number: i64) -> bool {
        self.nodes[id.0]
            .last_requested
            .fetch_max(packet_number, Ordering::AcqRel)
            < packet_number
    }

    pub fn snapshot(&self) -> TopologySnapshot {
        TopologySnapshot {
            id: self.id,
            kind: self.kind,
            streams: self
                .nodes
                .iter()
                .enumerate()
                .map(|(i, node)| StreamSnapshot {
                    id: StreamId(i),
                    kind: node.kind,
                    inputs: node.inputs.iter().map(|e| e.from).collect(),
                })
                .collect(),
        }
    }
}

impl std::fmt::Debug for Topology {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Topology")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("streams", &self.nodes.len())
            .finish()
    }
}

/// Serializable view of a topology.
#[derive(Debug, Clone, Serialize)]
pub struct TopologySnapshot {
    pub id: u64,
    pub kind: MediaKind,
    pub streams: Vec<StreamSnapshot>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StreamSnapshot {
    pub id: StreamId,
    pub kind: StreamKind,
    pub inputs: Vec<StreamId>,
}

struct BuilderNode {
    kind: StreamKind,
    stream: Arc<dyn MediaStream>,
    inputs: Vec<Edge>,
}

/// Collects streams and edges, then freezes them into a [`Topology`].
pub struct TopologyBuilder {
    kind: MediaKind,
    clock: Arc<PresentationClock>,
    nodes: Vec<BuilderNode>,
    terminal: Option<StreamId>,
}

impl TopologyBuilder {
    pub fn new(kind: MediaKind, clock: Arc<PresentationClock>) -> Self {
        Self {
            kind,
            clock,
            nodes: Vec::new(),
            terminal: None,
        }
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    /// Add a stream; `make` receives the id the stream will have.
    pub fn add_stream(
        &mut self,
        kind: StreamKind,
        make: impl FnOnce(StreamId) -> Arc<dyn MediaStream>,
    ) -> StreamId {
        let id = StreamId(self.nodes.len());
        let stream = make(id);
        self.nodes.push(BuilderNode {
            kind,
            stream,
            inputs: Vec::new(),
        });
        id
    }

    /// Connect `from` into the next input slot of `to`; returns the slot.
    pub fn connect(&mut self, to: StreamId, from: StreamId, params: EdgeParams) -> Result<usize, MediaError> {
        if to.0 >= self.nodes.len() || from.0 >= self.nodes.len() {
            return Err(MediaError::Invariant("connection refers to a stream outside the topology"));
        }
        if to == from {
            return Err(MediaError::Invariant("stream connected to itself"));
        }
        let node = &mut self.nodes[to.0];
        let slot = node.inputs.len();
        node.inputs.push(Edge {
            from,
            to,
            slot,
            params,
        });
        Ok(slot)
    }

    pub fn input_count(&self, id: StreamId) -> usize {
        self.nodes.get(id.0).map_or(0, |n| n.inputs.len())
    }

    pub fn set_terminal(&mut self, id: StreamId) {
        self.terminal = Some(id);
    }

    pub fn build(self) -> Result<Arc<Topology>, MediaError> {
        let terminal = self
            .terminal
            .ok_or(MediaError::Invariant("topology has no terminal stream"))?;

        if let Some(node) = self
            .nodes
            .iter()
            .find(|n| n.kind.requires_input() && n.inputs.is_empty())
        {
            tracing::error!("{:?} stream has no inputs", node.kind);
            return Err(MediaError::Invariant("topology has a dangling stream"));
        }

        let mut outputs: Vec<Vec<Edge>> = vec![Vec::new(); self.nodes.len()];
        for node in &self.nodes {
            for edge in &node.inputs {
                outputs[edge.from.0].push(edge.clone());
            }
        }

        let nodes = self
            .nodes
            .into_iter()
            .zip(outputs)
            .map(|(node, outputs)| {
                let mut upstream: Vec<StreamId> = Vec::new();
                for edge in &node.inputs {
                    if !upstream.contains(&edge.from) {
                        upstream.push(edge.from);
                    }
                }
                StreamNode {
                    kind: node.kind,
                    stream: node.stream,
                    inputs: node.inputs,
                    outputs,
                    upstream,
                    last_requested: AtomicI64::new(-1),
                }
            })
            .collect();

        Ok(Arc::new(Topology {
            id: NEXT_TOPOLOGY_ID.fetch_add(1, Ordering::Relaxed),
            kind: self.kind,
            clock: self.clock,
            generator: MessageGenerator::default(),
            nodes,
            terminal,
        }))
    }
}

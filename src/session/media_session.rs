use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

use super::{FailureState, RequestPacket, WorkQueue};
use crate::clock::MediaClock;
use crate::error::MediaError;
use crate::media::{FrameRate, FrameUnit, MediaKind, SampleArgs, TimeUnit};
use crate::topology::{StreamId, Topology};

const NO_TOPOLOGY: u64 = 0;

/// Routes requests upstream and samples downstream for one half of the pipeline.
///
/// Only the session's current topology may deliver samples; completions from
/// a topology that was switched out are discarded.
pub struct MediaSession {
    kind: MediaKind,
    time_source: Arc<MediaClock>,
    frame_rate: FrameRate,
    work_queue: WorkQueue,
    failure: Arc<FailureState>,
    current_topology: AtomicU64,
}

impl MediaSession {
    pub fn new(
        kind: MediaKind,
        time_source: Arc<MediaClock>,
        frame_rate: FrameRate,
        work_queue: WorkQueue,
        failure: Arc<FailureState>,
    ) -> Arc<Self> {
        Arc::new(Self {
            kind,
            time_source,
            frame_rate,
            work_queue,
            failure,
            current_topology: AtomicU64::new(NO_TOPOLOGY),
        })
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    pub fn time_source(&self) -> &Arc<MediaClock> {
        &self.time_source
    }

    pub fn frame_rate(&self) -> FrameRate {
        self.frame_rate
    }

    pub fn work_queue(&self) -> &WorkQueue {
        &self.work_queue
    }

    pub fn failure(&self) -> &Arc<FailureState> {
        &self.failure
    }

    /// Exclusive frame bound for a request made at `request_time`.
    pub fn frame_end(&self, request_time: TimeUnit) -> FrameUnit {
        self.frame_rate.to_frame_unit(request_time)
    }

    pub fn set_current_topology(&self, topology: Option<&Topology>) {
        let id = topology.map_or(NO_TOPOLOGY, Topology::id);
        self.current_topology.store(id, Ordering::Release);
    }

    pub fn is_current(&self, topology: &Topology) -> bool {
        self.current_topology.load(Ordering::Acquire) == topology.id()
    }

    /// Forward a request from `stream` to each distinct upstream stream, once per packet.
    pub fn request_sample(&self, stream: StreamId, rp: &RequestPacket) {
        let Some(topology) = rp.topology() else {
            trace!("Dropping {} request {}: topology released", self.kind, rp.packet_number);
            return;
        };

        for &input in topology.upstream(stream) {
            if !topology.mark_requested(input, rp.packet_number) {
                continue;
            }
            if let Err(e) = topology.stream(input).request_sample(rp) {
                self.fatal(e);
            }
        }
    }

    /// Deliver `sample` from `stream` to every downstream edge.
    pub fn give_sample(&self, stream: StreamId, sample: &SampleArgs, rp: &RequestPacket) {
        let Some(topology) = rp.topology() else {
            debug!("Discarding {} sample for packet {}: topology released", self.kind, rp.packet_number);
            return;
        };
        if !self.is_current(&topology) {
            debug!(
                "Discarding {} sample for packet {}: topology {} is no longer current",
                self.kind,
                rp.packet_number,
                topology.id()
            );
            return;
        }

        for edge in topology.outputs(stream) {
            if let Err(e) = topology.stream(edge.to).process_sample(sample, rp, edge) {
                self.fatal(e);
            }
        }
    }

    /// Report an unrecoverable stream error.
    pub fn fatal(&self, err: MediaError) {
        self.failure.report(&err);
    }
}

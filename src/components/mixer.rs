use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tracing::{trace, warn};

use crate::error::MediaError;
use crate::media::{FrameArgs, FrameCollection, FramePayload, FrameUnit, SampleArgs};
use crate::session::{MediaSession, RequestPacket, RequestQueue};
use crate::topology::{Edge, EdgeParams, MediaStream, StreamId};

/// Requests allowed to wait on slow inputs before the oldest is mixed with what it has.
const MAX_PENDING_PACKETS: usize = 32;

/// Mixer parameters shared between a control and its topology edges.
#[derive(Debug, Default)]
pub struct ParamCell<P>(RwLock<P>);

impl<P: Clone> ParamCell<P> {
    pub fn new(params: P) -> Arc<Self> {
        Arc::new(Self(RwLock::new(params)))
    }

    pub fn get(&self) -> P {
        self.0.read().clone()
    }

    pub fn set(&self, params: P) {
        *self.0.write() = params;
    }
}

/// One input window handed to a mix.
pub(crate) struct MixInput<B, P> {
    pub frames: FrameCollection<B>,
    pub params: P,
}

/// The media-specific half of a mixer.
pub(crate) trait MixKernel: Send + Sync + 'static {
    type Payload: FramePayload;
    type Params: Clone + Default + Send;

    fn name(&self) -> &'static str;
    fn session(&self) -> &Arc<MediaSession>;
    fn maximum_buffer_size(&self) -> FrameUnit;
    fn extract(sample: &SampleArgs) -> Option<&FrameArgs<Self::Payload>>;
    fn wrap(args: FrameArgs<Self::Payload>) -> SampleArgs;
    fn params(edge: &EdgeParams) -> Self::Params;

    /// Combine the input windows covering `[first, end)` into one output.
    fn mix(
        &self,
        inputs: &[MixInput<Self::Payload, Self::Params>],
        first: FrameUnit,
        end: FrameUnit,
    ) -> FrameArgs<Self::Payload>;
}

struct PendingMix<B> {
    rp: RequestPacket,
    frame_end: FrameUnit,
    arrived: Vec<Option<FrameArgs<B>>>,
    remaining: usize,
}

struct MixerState<B> {
    pending: Option<RequestQueue<PendingMix<B>>>,
    leftovers: Vec<FrameCollection<B>>,
    last_end: Option<FrameUnit>,
}

/// Mixer stream: waits for every input of a packet, then mixes packets in order.
pub(crate) struct MixerStream<K: MixKernel> {
    id: StreamId,
    kernel: Arc<K>,
    state: Mutex<MixerState<K::Payload>>,
}

impl<K: MixKernel> MixerStream<K> {
    pub fn new(id: StreamId, kernel: Arc<K>) -> Self {
        Self {
            id,
            kernel,
            state: Mutex::new(MixerState {
                pending: None,
                leftovers: Vec::new(),
                last_end: None,
            }),
        }
    }

    fn drain(&self, state: &mut MixerState<K::Payload>) {
        loop {
            let ready = state
                .pending
                .as_ref()
                .and_then(RequestQueue::get)
                .is_some_and(|p| p.remaining == 0);
            if !ready {
                return;
            }
            let Some(packet) = state.pending.as_mut().and_then(RequestQueue::pop) else {
                return;
            };
            let output = self.mix_packet(state, packet.frame_end, packet.arrived, &packet.rp);
            self.kernel
                .session()
                .give_sample(self.id, &K::wrap(output), &packet.rp);
        }
    }

    fn mix_packet(
        &self,
        state: &mut MixerState<K::Payload>,
        end: FrameUnit,
        arrived: Vec<Option<FrameArgs<K::Payload>>>,
        rp: &RequestPacket,
    ) -> FrameArgs<K::Payload> {
        let slots = arrived.len();
        if state.leftovers.len() < slots {
            state.leftovers.resize_with(slots, FrameCollection::new);
        }
        for (slot, args) in arrived.into_iter().enumerate() {
            if let Some(sample) = args.and_then(|a| a.sample) {
                state.leftovers[slot].append(&sample);
            }
        }

        let max_buffer = self.kernel.maximum_buffer_size();
        let first = match state.last_end {
            Some(last_end) => last_end,
            None => state
                .leftovers
                .iter()
                .filter(|l| l.is_valid())
                .map(FrameCollection::first)
                .min()
                .unwrap_or(end - 1)
                .min(end - 1),
        }
        .max(end - max_buffer);

        if end <= first {
            trace!("{} window for packet {} is empty", self.kernel.name(), rp.packet_number);
            return FrameArgs::empty(end);
        }

        let topology = rp.topology();
        let mut inputs = Vec::with_capacity(slots);
        for slot in 0..slots {
            let leftover = &mut state.leftovers[slot];
            let mut window = FrameCollection::new();
            leftover.move_frames_to(Some(&mut window), end);
            if window.move_frames_to(None, first) {
                trace!("{} dropped late frames on input {}", self.kernel.name(), slot);
            }
            if leftover.is_valid() {
                let horizon = leftover.end() - max_buffer;
                leftover.move_frames_to(None, horizon);
            }

            let params = topology
                .as_ref()
                .and_then(|t| t.inputs(self.id).get(slot))
                .map(|edge| K::params(&edge.params))
                .unwrap_or_default();
            inputs.push(MixInput {
                frames: window,
                params,
            });
        }

        state.last_end = Some(end);
        self.kernel.mix(&inputs, first, end)
    }
}

impl<K: MixKernel> MediaStream for MixerStream<K> {
    fn request_sample(&self, rp: &RequestPacket) -> Result<(), MediaError> {
        let Some(topology) = rp.topology() else {
            return Ok(());
        };
        let slots = topology.inputs(self.id).len();
        let frame_end = self.kernel.session().frame_end(rp.request_time);

        {
            let mut state = self.state.lock();
            let queue = state
                .pending
                .get_or_insert_with(|| RequestQueue::new(rp.packet_number));
            if rp.packet_number < queue.first_packet_number() {
                return Err(MediaError::stream(
                    self.kernel.name(),
                    format!("packet {} requested after it was mixed", rp.packet_number),
                ));
            }
            queue.push(
                rp.packet_number,
                PendingMix {
                    rp: rp.clone(),
                    frame_end,
                    arrived: vec![None; slots],
                    remaining: slots,
                },
            );

            if queue.len() > MAX_PENDING_PACKETS {
                let stalled = queue.first_packet_number();
                warn!(
                    "{} input stalled on packet {}; mixing with partial input",
                    self.kernel.name(),
                    stalled
                );
                if let Some(front) = queue.get_mut(stalled) {
                    front.remaining = 0;
                } else {
                    queue.skip();
                }
                self.drain(&mut state);
            }
        }

        self.kernel.session().request_sample(self.id, rp);
        Ok(())
    }

    fn process_sample(&self, sample: &SampleArgs, rp: &RequestPacket, edge: &Edge) -> Result<(), MediaError> {
        let args = K::extract(sample).ok_or_else(|| {
            MediaError::stream(self.kernel.name(), "received a sample of the wrong media type")
        })?;

        let mut state = self.state.lock();
        let Some(pending) = state
            .pending
            .as_mut()
            .and_then(|q| q.get_mut(rp.packet_number))
        else {
            trace!("{} ignoring sample for retired packet {}", self.kernel.name(), rp.packet_number);
            return Ok(());
        };

        let Some(slot) = pending.arrived.get_mut(edge.slot) else {
            return Err(MediaError::stream(
                self.kernel.name(),
                "sample arrived on an unknown input slot",
            ));
        };
        if slot.is_some() {
            warn!(
                "{} got a second sample on input {} for packet {}",
                self.kernel.name(),
                edge.slot,
                rp.packet_number
            );
            return Ok(());
        }
        *slot = Some(args.clone());
        pending.remaining -= 1;

        self.drain(&mut state);
        Ok(())
    }
}

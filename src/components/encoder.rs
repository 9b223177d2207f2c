use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

use super::{ComponentBase, ContextMutex, MediaComponent, PipelineHandle};
use crate::error::MediaError;
use crate::media::{EncodedArgs, EncodedPacket, FrameRate, MediaKind, SampleArgs};
use crate::session::{MediaSession, RequestPacket, RequestQueue};
use crate::topology::{Edge, MediaStream, StreamId, StreamKind, TopologyBuilder};

/// Turns raw samples into encoded packets, one request at a time, in packet order.
pub trait SampleEncoder: Send {
    fn encode(&mut self, sample: &SampleArgs, rate: FrameRate) -> Result<Vec<EncodedPacket>, MediaError>;
}

/// Emits one packet per frame, sized by the raw payload.
#[derive(Debug, Default)]
pub struct PassthroughEncoder {
    frames_encoded: u64,
    /// Frames between keyframes; 0 marks every frame a keyframe
    keyframe_interval: u64,
}

impl PassthroughEncoder {
    pub fn new(keyframe_interval: u64) -> Self {
        Self {
            frames_encoded: 0,
            keyframe_interval,
        }
    }

    fn next_is_keyframe(&mut self) -> bool {
        let keyframe = self.keyframe_interval == 0 || self.frames_encoded % self.keyframe_interval == 0;
        self.frames_encoded += 1;
        keyframe
    }
}

impl SampleEncoder for PassthroughEncoder {
    fn encode(&mut self, sample: &SampleArgs, rate: FrameRate) -> Result<Vec<EncodedPacket>, MediaError> {
        let mut packets = Vec::new();
        match sample {
            SampleArgs::Video(args) => {
                let Some(frames) = args.sample.as_ref() else {
                    return Ok(packets);
                };
                // Blank frames carry nothing to encode.
                for frame in frames.frames() {
                    let Some(payload) = frame.buffer.as_ref() else {
                        continue;
                    };
                    let keyframe = self.next_is_keyframe();
                    packets.push(EncodedPacket {
                        timestamp: rate.to_time_unit(frame.pos),
                        duration: rate.to_time_unit(frame.end()) - rate.to_time_unit(frame.pos),
                        keyframe,
                        size: payload.texture.byte_size(),
                    });
                }
            }
            SampleArgs::Audio(args) => {
                let Some(frames) = args.sample.as_ref() else {
                    return Ok(packets);
                };
                for frame in frames.frames() {
                    let size = frame
                        .buffer
                        .as_ref()
                        .map_or(0, |slice| std::mem::size_of_val(slice.data()));
                    packets.push(EncodedPacket {
                        timestamp: rate.to_time_unit(frame.pos),
                        duration: rate.to_time_unit(frame.end()) - rate.to_time_unit(frame.pos),
                        keyframe: true,
                        size,
                    });
                }
            }
            SampleArgs::Encoded(_) => {
                return Err(MediaError::stream("encoder", "input is already encoded"));
            }
        }
        Ok(packets)
    }
}

/// Encoder stage of the recording chain.
pub struct EncoderTransform {
    base: ComponentBase,
    kind: MediaKind,
    encoder: Mutex<Box<dyn SampleEncoder>>,
    context: ContextMutex,
    packets_out: AtomicU64,
}

impl MediaComponent for EncoderTransform {
    fn base(&self) -> &ComponentBase {
        &self.base
    }
}

impl EncoderTransform {
    pub fn new(
        session: Arc<MediaSession>,
        pipeline: PipelineHandle,
        encoder: Box<dyn SampleEncoder>,
        context: ContextMutex,
    ) -> Arc<Self> {
        let kind = session.kind();
        debug!("Created {} encoder", kind);
        Arc::new(Self {
            base: ComponentBase::new("encoder", session, pipeline),
            kind,
            encoder: Mutex::new(encoder),
            context,
            packets_out: AtomicU64::new(0),
        })
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    pub fn packets_out(&self) -> u64 {
        self.packets_out.load(Ordering::Relaxed)
    }

    pub fn create_stream(self: &Arc<Self>, builder: &mut TopologyBuilder) -> StreamId {
        let transform = self.clone();
        let kind = match self.kind {
            MediaKind::Video => StreamKind::VideoEncoder,
            MediaKind::Audio => StreamKind::AudioEncoder,
        };
        builder.add_stream(kind, move |id| {
            Arc::new(EncoderStream {
                id,
                transform,
                pending: Mutex::new(None),
            })
        })
    }

    fn encode(&self, sample: &SampleArgs) -> Result<EncodedArgs, MediaError> {
        let rate = self.session().frame_rate();
        let packets = {
            let _context = self.context.lock();
            self.encoder.lock().encode(sample, rate)?
        };
        self.packets_out
            .fetch_add(packets.len() as u64, Ordering::Relaxed);
        Ok(EncodedArgs { packets })
    }
}

struct EncoderStream {
    id: StreamId,
    transform: Arc<EncoderTransform>,
    pending: Mutex<Option<RequestQueue<(SampleArgs, RequestPacket)>>>,
}

impl MediaStream for EncoderStream {
    fn request_sample(&self, rp: &RequestPacket) -> Result<(), MediaError> {
        self.transform.session().request_sample(self.id, rp);
        Ok(())
    }

    fn process_sample(&self, sample: &SampleArgs, rp: &RequestPacket, _edge: &Edge) -> Result<(), MediaError> {
        let mut pending = self.pending.lock();
        let queue = pending.get_or_insert_with(|| RequestQueue::new(rp.packet_number));
        if rp.packet_number < queue.first_packet_number() {
            trace!("Encoder ignoring stale packet {}", rp.packet_number);
            return Ok(());
        }
        queue.push(rp.packet_number, (sample.clone(), rp.clone()));

        while let Some((sample, rp)) = queue.pop() {
            let encoded = self.transform.encode(&sample)?;
            self.transform
                .session()
                .give_sample(self.id, &SampleArgs::Encoded(encoded), &rp);
        }
        Ok(())
    }
}

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

use super::{ComponentBase, MediaComponent, PipelineHandle};
use crate::error::MediaError;
use crate::media::{
    AudioBlock, AudioFrames, AudioSlice, BufferPool, Frame, FrameArgs, FrameCollection, FrameUnit,
    SampleArgs,
};
use crate::session::{MediaSession, RequestPacket, RequestQueue};
use crate::topology::{MediaStream, StreamId, StreamKind, TopologyBuilder};

const TONE_HZ: f64 = 440.0;
const TONE_AMPLITUDE: f64 = 0.1;

/// Identifies one audio endpoint. `capture` is false for loopback of a render device.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AudioDevice {
    pub device_id: String,
    pub friendly_name: String,
    pub capture: bool,
}

impl AudioDevice {
    pub fn new(device_id: impl Into<String>, friendly_name: impl Into<String>, capture: bool) -> Self {
        Self {
            device_id: device_id.into(),
            friendly_name: friendly_name.into(),
            capture,
        }
    }

    /// Same endpoint, same direction.
    pub fn same_endpoint(&self, other: &AudioDevice) -> bool {
        self.device_id == other.device_id && self.capture == other.capture
    }
}

struct CaptureState {
    captured: AudioFrames,
    next_frame_position: Option<FrameUnit>,
    tone_counter: u64,
}

/// Captures one audio endpoint.
///
/// Capture devices produce a test tone; loopback devices produce silence.
pub struct AudioCaptureSource {
    base: ComponentBase,
    device: AudioDevice,
    channels: u32,
    broken: AtomicBool,
    pool: BufferPool<AudioBlock>,
    state: Mutex<CaptureState>,
}

impl MediaComponent for AudioCaptureSource {
    fn base(&self) -> &ComponentBase {
        &self.base
    }
}

impl AudioCaptureSource {
    pub fn new(
        session: Arc<MediaSession>,
        pipeline: PipelineHandle,
        device: AudioDevice,
        channels: u32,
    ) -> Result<Arc<Self>, MediaError> {
        if device.device_id.is_empty() {
            return Err(MediaError::DeviceLost("audio device has no id".into()));
        }
        info!(
            "Audio capture initialized for '{}' ({})",
            device.friendly_name,
            if device.capture { "capture" } else { "loopback" }
        );
        Ok(Arc::new(Self {
            base: ComponentBase::new("audio capture", session, pipeline),
            device,
            channels: channels.max(1),
            broken: AtomicBool::new(false),
            pool: BufferPool::new("audio capture"),
            state: Mutex::new(CaptureState {
                captured: FrameCollection::new(),
                next_frame_position: None,
                tone_counter: 0,
            }),
        }))
    }

    pub fn device(&self) -> &AudioDevice {
        &self.device
    }

    pub fn is_broken(&self) -> bool {
        self.broken.load(Ordering::Acquire)
    }

    /// The endpoint disappeared; serve empty samples and ask for a fresh instance.
    pub fn mark_broken(&self) {
        if !self.broken.swap(true, Ordering::AcqRel) {
            warn!("Audio device '{}' lost", self.device.friendly_name);
            self.base.request_reinitialization();
        }
    }

    pub fn create_stream(self: &Arc<Self>, builder: &mut TopologyBuilder) -> StreamId {
        let source = self.clone();
        builder.add_stream(StreamKind::AudioCapture, move |id| {
            Arc::new(AudioCaptureStream {
                inner: Arc::new(StreamInner {
                    id,
                    source,
                    requests: Mutex::new(None),
                    serving: Mutex::new(()),
                }),
            })
        })
    }

    /// Answer `rp`. A request from a topology that was switched away
    /// leaves the captured audio for the topology that replaced it.
    fn read_for(&self, rp: &RequestPacket) -> FrameArgs<AudioSlice> {
        let session = self.session();
        let frame_end = session.frame_end(rp.request_time);
        let current = rp
            .topology()
            .is_some_and(|topology| session.is_current(&topology));
        if !current {
            trace!("Audio request {} outlived its topology", rp.packet_number);
            return FrameArgs::empty(frame_end);
        }
        self.read(frame_end)
    }

    /// Everything captured before `frame_end`.
    fn read(&self, frame_end: FrameUnit) -> FrameArgs<AudioSlice> {
        if self.is_broken() {
            return FrameArgs::empty(frame_end);
        }

        let mut state = self.state.lock();
        let next_position = state.next_frame_position;
        match next_position {
            None => {
                // Nothing before the first request was captured.
                state.next_frame_position = Some(frame_end);
            }
            Some(next) if frame_end > next => {
                let limit = self.session().frame_rate().num / self.session().frame_rate().den;
                let start = next.max(frame_end - limit.max(1));
                if start > next {
                    debug!("Audio capture skipped {} frames", start - next);
                }
                let frame = self.synthesize(&mut state, start, frame_end);
                state.captured.add_consecutive_frames(frame);
                state.next_frame_position = Some(frame_end);
            }
            Some(_) => {}
        }

        let mut out = FrameCollection::new();
        state.captured.move_frames_to(Some(&mut out), frame_end);
        FrameArgs::with_frames(frame_end, out)
    }

    fn synthesize(&self, state: &mut CaptureState, start: FrameUnit, end: FrameUnit) -> Frame<AudioSlice> {
        let frames = (end - start) as usize;
        if !self.device.capture {
            return Frame::new(start, end - start, None);
        }

        let rate = self.session().frame_rate();
        let sample_rate = rate.num as f64 / rate.den as f64;
        let channels = self.channels as usize;

        let mut block = self.pool.acquire(AudioBlock::default);
        block.samples.clear();
        block.samples.reserve(frames * channels);
        for i in 0..frames as u64 {
            let t = (state.tone_counter + i) as f64 / sample_rate;
            let value = (TONE_AMPLITUDE * (2.0 * std::f64::consts::PI * TONE_HZ * t).sin()) as f32;
            block.samples.extend(std::iter::repeat(value).take(channels));
        }
        state.tone_counter += frames as u64;

        Frame::new(start, end - start, Some(AudioSlice::new(Arc::new(block), self.channels)))
    }
}

struct StreamInner {
    id: StreamId,
    source: Arc<AudioCaptureSource>,
    requests: Mutex<Option<RequestQueue<RequestPacket>>>,
    /// Held while answering so samples leave in packet order
    serving: Mutex<()>,
}

impl StreamInner {
    fn serve(&self) {
        let _serving = self.serving.lock();
        loop {
            let Some(rp) = self.requests.lock().as_mut().and_then(RequestQueue::pop) else {
                return;
            };
            let args = self.source.read_for(&rp);
            self.source
                .session()
                .give_sample(self.id, &SampleArgs::Audio(args), &rp);
        }
    }
}

/// Answers requests asynchronously on the work queue.
struct AudioCaptureStream {
    inner: Arc<StreamInner>,
}

impl MediaStream for AudioCaptureStream {
    fn request_sample(&self, rp: &RequestPacket) -> Result<(), MediaError> {
        {
            let mut requests = self.inner.requests.lock();
            let queue = requests.get_or_insert_with(|| RequestQueue::new(rp.packet_number));
            if rp.packet_number < queue.first_packet_number() {
                return Err(MediaError::stream("audio capture", "request below queue floor"));
            }
            queue.push(rp.packet_number, rp.clone());
        }

        let inner = self.inner.clone();
        self.inner
            .source
            .session()
            .work_queue()
            .dispatch(move || inner.serve());
        Ok(())
    }
}

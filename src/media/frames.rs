//! Frame collections and the sample arguments passed between streams

use std::sync::Arc;

use super::buffer::{AudioSlice, VideoPayload};
use super::time::{FrameUnit, TimeUnit};

const UNDEF_FIRST: FrameUnit = FrameUnit::MAX;
const UNDEF_END: FrameUnit = FrameUnit::MIN;

/// Payloads that can be cut at a frame offset.
pub trait FramePayload: Clone + Send + Sync + 'static {
    /// Split a payload spanning `dur` frames at `offset`, returning the parts
    /// before and after the cut.
    fn split(&self, offset: FrameUnit, dur: FrameUnit) -> (Self, Self);
}

/// A frame span `[pos, pos + dur)`; a missing buffer means silence or a blank image.
#[derive(Debug, Clone)]
pub struct Frame<B> {
    pub pos: FrameUnit,
    pub dur: FrameUnit,
    pub buffer: Option<B>,
}

impl<B> Frame<B> {
    pub fn new(pos: FrameUnit, dur: FrameUnit, buffer: Option<B>) -> Self {
        Self { pos, dur, buffer }
    }

    pub fn end(&self) -> FrameUnit {
        self.pos + self.dur
    }
}

/// An ordered set of frames with cached bounds.
///
/// `first` and `end` are defined only while the collection holds frames.
#[derive(Debug, Clone)]
pub struct FrameCollection<B> {
    frames: Vec<Frame<B>>,
    first: FrameUnit,
    end: FrameUnit,
}

impl<B> Default for FrameCollection<B> {
    fn default() -> Self {
        Self {
            frames: Vec::new(),
            first: UNDEF_FIRST,
            end: UNDEF_END,
        }
    }
}

impl<B: FramePayload> FrameCollection<B> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_frames(frames: impl IntoIterator<Item = Frame<B>>) -> Self {
        let mut collection = Self::new();
        for frame in frames {
            collection.add_consecutive_frames(frame);
        }
        collection
    }

    pub fn is_valid(&self) -> bool {
        !self.frames.is_empty()
    }

    pub fn first(&self) -> FrameUnit {
        debug_assert!(self.is_valid());
        self.first
    }

    pub fn end(&self) -> FrameUnit {
        debug_assert!(self.is_valid());
        self.end
    }

    pub fn frames(&self) -> &[Frame<B>] {
        &self.frames
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn clear(&mut self) {
        self.frames.clear();
        self.first = UNDEF_FIRST;
        self.end = UNDEF_END;
    }

    /// Append a frame. Zero-length frames are dropped.
    pub fn add_consecutive_frames(&mut self, frame: Frame<B>) {
        if frame.dur <= 0 {
            return;
        }
        self.first = self.first.min(frame.pos);
        self.end = self.end.max(frame.end());
        self.frames.push(frame);
    }

    /// Append every frame of `other`.
    pub fn append(&mut self, other: &FrameCollection<B>) {
        for frame in &other.frames {
            self.add_consecutive_frames(frame.clone());
        }
    }

    /// Move every frame span before `end` into `to`, or discard it when `to` is `None`.
    ///
    /// A frame straddling `end` is split; the part before `end` moves and the
    /// rest stays. Returns whether anything moved.
    pub fn move_frames_to(&mut self, mut to: Option<&mut FrameCollection<B>>, end: FrameUnit) -> bool {
        if !self.is_valid() || end <= self.first {
            return false;
        }

        let mut moved = false;
        let mut retained = Vec::with_capacity(self.frames.len());
        let mut first = UNDEF_FIRST;
        let mut last_end = UNDEF_END;

        for frame in self.frames.drain(..) {
            if frame.pos >= end {
                first = first.min(frame.pos);
                last_end = last_end.max(frame.end());
                retained.push(frame);
                continue;
            }

            moved = true;
            let frame_end = frame.end();
            let past = if frame_end <= end {
                frame
            } else {
                let offset = end - frame.pos;
                let (past_buffer, future_buffer) = match &frame.buffer {
                    Some(buffer) => {
                        let (past, future) = buffer.split(offset, frame.dur);
                        (Some(past), Some(future))
                    }
                    None => (None, None),
                };
                first = first.min(end);
                last_end = last_end.max(frame_end);
                retained.push(Frame::new(end, frame_end - end, future_buffer));
                Frame::new(frame.pos, offset, past_buffer)
            };

            if let Some(target) = to.as_mut() {
                target.add_consecutive_frames(past);
            }
        }

        self.frames = retained;
        self.first = first;
        self.end = last_end;
        moved
    }
}

pub type VideoFrame = Frame<VideoPayload>;
pub type AudioFrame = Frame<AudioSlice>;
pub type VideoFrames = FrameCollection<VideoPayload>;
pub type AudioFrames = FrameCollection<AudioSlice>;

/// Output of one stream for one request.
///
/// `frame_end` is the exclusive frame bound the request asked for. A `None`
/// sample means the stream had nothing up to that bound.
#[derive(Debug, Clone)]
pub struct FrameArgs<B> {
    pub frame_end: FrameUnit,
    pub sample: Option<Arc<FrameCollection<B>>>,
}

impl<B: FramePayload> FrameArgs<B> {
    pub fn empty(frame_end: FrameUnit) -> Self {
        Self {
            frame_end,
            sample: None,
        }
    }

    pub fn with_frames(frame_end: FrameUnit, frames: FrameCollection<B>) -> Self {
        Self {
            frame_end,
            sample: frames.is_valid().then(|| Arc::new(frames)),
        }
    }

    pub fn has_frames(&self) -> bool {
        self.sample.as_ref().is_some_and(|s| s.is_valid())
    }
}

/// One encoded access unit.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedPacket {
    pub timestamp: TimeUnit,
    pub duration: TimeUnit,
    pub keyframe: bool,
    pub size: usize,
}

/// Encoder output for one request.
#[derive(Debug, Clone, Default)]
pub struct EncodedArgs {
    pub packets: Vec<EncodedPacket>,
}

/// The sample handed from one stream to the next.
#[derive(Debug, Clone)]
pub enum SampleArgs {
    Video(FrameArgs<VideoPayload>),
    Audio(FrameArgs<AudioSlice>),
    Encoded(EncodedArgs),
}

impl SampleArgs {
    pub fn as_video(&self) -> Option<&FrameArgs<VideoPayload>> {
        match self {
            Self::Video(args) => Some(args),
            _ => None,
        }
    }

    pub fn as_audio(&self) -> Option<&FrameArgs<AudioSlice>> {
        match self {
            Self::Audio(args) => Some(args),
            _ => None,
        }
    }

    pub fn as_encoded(&self) -> Option<&EncodedArgs> {
        match self {
            Self::Encoded(args) => Some(args),
            _ => None,
        }
    }

    /// Whether the sample carries any media.
    pub fn has_frames(&self) -> bool {
        match self {
            Self::Video(args) => args.has_frames(),
            Self::Audio(args) => args.has_frames(),
            Self::Encoded(args) => !args.packets.is_empty(),
        }
    }
}

//! Media primitives: time units, frames, payload buffers and pools

mod buffer;
mod frames;
mod pool;
mod time;

pub use buffer::{AudioBlock, AudioSlice, Rect, Texture, VideoPayload};
pub use frames::{
    AudioFrame, AudioFrames, EncodedArgs, EncodedPacket, Frame, FrameArgs, FrameCollection,
    FramePayload, SampleArgs, VideoFrame, VideoFrames,
};
pub use pool::{BufferPool, Poolable, Pooled};
pub use time::{
    convert_to_frame_unit, convert_to_time_unit, FrameRate, FrameUnit, TimeUnit,
    SECOND_IN_TIME_UNIT,
};

/// Which half of the pipeline a stream or component belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Video,
    Audio,
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Video => write!(f, "video"),
            Self::Audio => write!(f, "audio"),
        }
    }
}

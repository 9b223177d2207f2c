use serde::Serialize;
use std::fmt;
use std::sync::Arc;

use crate::components::{AudioMixerParams, ParamCell, VideoMixerParams};
use crate::error::MediaError;
use crate::media::SampleArgs;
use crate::session::RequestPacket;

/// Index of a stream inside its topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct StreamId(pub usize);

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What a stream does, for diagnostics and topology inspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    VideoSink,
    AudioSink,
    VideoMixer,
    AudioMixer,
    VideoEncoder,
    AudioEncoder,
    VideoOutput,
    AudioOutput,
    DisplayCapture,
    Pointer,
    VidcapCapture,
    AudioCapture,
    EmptyVideo,
    EmptyAudio,
}

impl StreamKind {
    /// Whether the stream needs at least one input to be valid.
    pub fn requires_input(&self) -> bool {
        !matches!(
            self,
            Self::DisplayCapture
                | Self::Pointer
                | Self::VidcapCapture
                | Self::AudioCapture
                | Self::EmptyVideo
                | Self::EmptyAudio
        )
    }
}

/// Per-edge parameters, shared with the owning control so they can change live.
#[derive(Debug, Clone, Default)]
pub enum EdgeParams {
    #[default]
    None,
    Video(Arc<ParamCell<VideoMixerParams>>),
    Audio(Arc<ParamCell<AudioMixerParams>>),
}

/// A directed connection `from -> to`, landing in input slot `slot` of `to`.
#[derive(Debug, Clone)]
pub struct Edge {
    pub from: StreamId,
    pub to: StreamId,
    pub slot: usize,
    pub params: EdgeParams,
}

/// A node of a topology.
///
/// Every request a stream receives must be answered with exactly one
/// `give_sample` through its session, possibly carrying an empty sample.
pub trait MediaStream: Send + Sync {
    /// A downstream stream wants the sample for `rp`.
    fn request_sample(&self, rp: &RequestPacket) -> Result<(), MediaError>;

    /// An upstream stream delivered `sample` over `edge`.
    fn process_sample(
        &self,
        _sample: &SampleArgs,
        _rp: &RequestPacket,
        _edge: &Edge,
    ) -> Result<(), MediaError> {
        Err(MediaError::Invariant("sample delivered to a stream without inputs"))
    }
}

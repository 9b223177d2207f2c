//! Pipeline components and the streams they contribute to each topology
//!
//! A component outlives topology switches and may be shared by several
//! controls; a stream belongs to exactly one topology.

mod audiomixer;
mod encoder;
mod mixer;
mod output;
mod sink;
mod source_audio;
mod source_display;
mod source_empty;
mod source_vidcap;
mod videomixer;

pub use audiomixer::{AudioMixer, AudioMixerParams};
pub use encoder::{EncoderTransform, PassthroughEncoder, SampleEncoder};
pub use mixer::ParamCell;
pub use output::{IndexFileWriter, MemoryWriter, OutputSink, OutputWriter, WrittenPacket};
pub use sink::{AudioSink, SinkStats, SinkStatsSnapshot, VideoSink};
pub use source_audio::{AudioCaptureSource, AudioDevice};
pub use source_display::{DisplayCaptureSource, DisplayDevice};
pub use source_empty::EmptySource;
pub use source_vidcap::{VidcapCaptureSource, VidcapDevice, VidcapState};
pub use videomixer::{VideoMixer, VideoMixerParams};

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::debug;

use crate::session::MediaSession;

/// Whether an existing component may be handed to another control or kept across activations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceType {
    Shareable,
    NotShareable,
}

/// Lock guarding the shared rendering/encoding context.
pub type ContextMutex = Arc<Mutex<()>>;

/// Something that can queue a fresh activation pass.
pub trait Reactivate: Send + Sync {
    fn request_activation(&self);
}

/// Non-owning handle from a component back to its pipeline.
#[derive(Clone, Default)]
pub struct PipelineHandle(Option<Weak<dyn Reactivate>>);

impl PipelineHandle {
    pub fn new(target: Weak<dyn Reactivate>) -> Self {
        Self(Some(target))
    }

    pub fn detached() -> Self {
        Self(None)
    }

    pub fn request_activation(&self) {
        if let Some(target) = self.0.as_ref().and_then(Weak::upgrade) {
            target.request_activation();
        }
    }
}

impl std::fmt::Debug for PipelineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("PipelineHandle").field(&self.0.is_some()).finish()
    }
}

/// State every component carries.
pub struct ComponentBase {
    name: &'static str,
    session: Arc<MediaSession>,
    not_shareable: AtomicBool,
    pipeline: PipelineHandle,
}

impl ComponentBase {
    pub fn new(name: &'static str, session: Arc<MediaSession>, pipeline: PipelineHandle) -> Self {
        Self {
            name,
            session,
            not_shareable: AtomicBool::new(false),
            pipeline,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn session(&self) -> &Arc<MediaSession> {
        &self.session
    }

    pub fn instance_type(&self) -> InstanceType {
        if self.not_shareable.load(Ordering::Acquire) {
            InstanceType::NotShareable
        } else {
            InstanceType::Shareable
        }
    }

    /// Ask for a new activation while this instance stays usable.
    pub fn request_activation(&self) {
        self.pipeline.request_activation();
    }

    /// Mark this instance unusable and ask the pipeline to rebuild around a fresh one.
    pub fn request_reinitialization(&self) {
        if !self.not_shareable.swap(true, Ordering::AcqRel) {
            debug!("{} requested reinitialization", self.name);
            self.pipeline.request_activation();
        }
    }
}

/// Common surface of every component.
pub trait MediaComponent: Send + Sync + 'static {
    fn base(&self) -> &ComponentBase;

    fn session(&self) -> &Arc<MediaSession> {
        self.base().session()
    }

    fn instance_type(&self) -> InstanceType {
        self.base().instance_type()
    }

    fn request_reinitialization(&self) {
        self.base().request_reinitialization();
    }
}

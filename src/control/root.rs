//! The pipeline root control
//!
//! Holds the components that exist once per pipeline (sessions, mixers,
//! sinks and, while recording, the encoder/output chain) and turns the
//! active set into a pair of topologies.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::activation::{build_source_branch, ComponentEnv};
use super::backend::RecordingBackend;
use super::tree::{ControlId, ControlTree, ControlType};
use crate::clock::MediaClock;
use crate::components::{
    AudioDevice, AudioMixer, AudioSink, ContextMutex, DisplayDevice, EmptySource, EncoderTransform,
    InstanceType, MediaComponent, OutputSink, OutputWriter, PipelineHandle, VidcapDevice, VideoMixer,
    VideoSink,
};
use crate::config::PipelineConfig;
use crate::error::MediaError;
use crate::media::MediaKind;
use crate::session::{FailureState, MediaSession, WorkQueue};
use crate::topology::{EdgeParams, Topology, TopologyBuilder};

/// Borrowed pipeline state the root needs to create components.
pub(crate) struct RootEnv<'a> {
    pub config: &'a PipelineConfig,
    pub backend: &'a dyn RecordingBackend,
    pub pipeline: PipelineHandle,
    pub context: &'a ContextMutex,
    pub work_queue: &'a WorkQueue,
    pub failure: &'a Arc<FailureState>,
}

/// Encoders and outputs that exist only while recording.
#[derive(Clone)]
pub struct RecordingChain {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub writer: Arc<dyn OutputWriter>,
    pub video_encoder: Arc<EncoderTransform>,
    pub audio_encoder: Arc<EncoderTransform>,
    pub video_output: Arc<OutputSink>,
    pub audio_output: Arc<OutputSink>,
}

fn recording_error(err: MediaError) -> MediaError {
    match err {
        MediaError::Recording(_) => err,
        other => MediaError::Recording(other.to_string()),
    }
}

impl RecordingChain {
    pub(crate) fn create(components: &PipelineComponents, env: &RootEnv<'_>) -> Result<Self, MediaError> {
        let video_encoder = env
            .backend
            .create_video_encoder(&env.config.video)
            .map_err(recording_error)?;
        let audio_encoder = env
            .backend
            .create_audio_encoder(&env.config.audio)
            .map_err(recording_error)?;
        let writer = env
            .backend
            .create_writer(&env.config.output)
            .map_err(recording_error)?;

        let video = &components.video_session;
        let audio = &components.audio_session;
        let chain = Self {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            video_encoder: EncoderTransform::new(video.clone(), env.pipeline.clone(), video_encoder, env.context.clone()),
            audio_encoder: EncoderTransform::new(audio.clone(), env.pipeline.clone(), audio_encoder, env.context.clone()),
            video_output: OutputSink::new(video.clone(), env.pipeline.clone(), writer.clone()),
            audio_output: OutputSink::new(audio.clone(), env.pipeline.clone(), writer.clone()),
            writer,
        };
        info!("Recording {} prepared", chain.id);
        Ok(chain)
    }

    fn is_stale(&self) -> bool {
        [
            self.video_encoder.instance_type(),
            self.audio_encoder.instance_type(),
            self.video_output.instance_type(),
            self.audio_output.instance_type(),
        ]
        .contains(&InstanceType::NotShareable)
    }

    /// Flush and close the writer.
    pub(crate) fn finish(self) {
        match self.writer.finalize() {
            Ok(()) => info!(
                "Recording {} finished after {}s",
                self.id,
                (Utc::now() - self.started_at).num_seconds()
            ),
            Err(e) => warn!("Failed to finalize recording {}: {}", self.id, e),
        }
    }
}

/// Components owned by the pipeline itself.
#[derive(Clone)]
pub struct PipelineComponents {
    pub time_source: Arc<MediaClock>,
    pub video_session: Arc<MediaSession>,
    pub audio_session: Arc<MediaSession>,
    pub video_mixer: Arc<VideoMixer>,
    pub audio_mixer: Arc<AudioMixer>,
    pub video_sink: Arc<VideoSink>,
    pub audio_sink: Arc<AudioSink>,
    pub recording: Option<RecordingChain>,
}

impl PipelineComponents {
    fn create(env: &RootEnv<'_>) -> Self {
        let config = env.config;
        let time_source = Arc::new(MediaClock::new());
        let video_session = MediaSession::new(
            MediaKind::Video,
            time_source.clone(),
            config.frame_rate(),
            env.work_queue.clone(),
            env.failure.clone(),
        );
        let audio_session = MediaSession::new(
            MediaKind::Audio,
            time_source.clone(),
            config.sample_rate(),
            env.work_queue.clone(),
            env.failure.clone(),
        );
        info!(
            "Pipeline components created ({} fps, {} Hz, {}x{})",
            config.frame_rate(),
            config.audio.sample_rate,
            config.video.width_frame,
            config.video.height_frame
        );

        Self {
            video_mixer: Self::video_mixer(&video_session, env),
            audio_mixer: AudioMixer::new(audio_session.clone(), env.pipeline.clone(), config.audio.channels),
            video_sink: VideoSink::new(video_session.clone(), audio_session.clone(), env.pipeline.clone()),
            audio_sink: AudioSink::new(audio_session.clone(), env.pipeline.clone()),
            time_source,
            video_session,
            audio_session,
            recording: None,
        }
    }

    fn video_mixer(session: &Arc<MediaSession>, env: &RootEnv<'_>) -> Arc<VideoMixer> {
        VideoMixer::new(
            session.clone(),
            env.pipeline.clone(),
            env.config.video.width_frame,
            env.config.video.height_frame,
            env.context.clone(),
        )
    }

    /// Replace whichever pipeline-level component asked for reinitialization.
    fn refresh(&mut self, env: &RootEnv<'_>) {
        if self.video_mixer.instance_type() == InstanceType::NotShareable {
            debug!("Recreating video mixer");
            self.video_mixer = Self::video_mixer(&self.video_session, env);
        }
        if self.audio_mixer.instance_type() == InstanceType::NotShareable {
            debug!("Recreating audio mixer");
            self.audio_mixer = AudioMixer::new(self.audio_session.clone(), env.pipeline.clone(), env.config.audio.channels);
        }
        if self.video_sink.instance_type() == InstanceType::NotShareable
            || self.audio_sink.instance_type() == InstanceType::NotShareable
        {
            debug!("Recreating sinks");
            self.video_sink.stop();
            self.video_sink = VideoSink::new(self.video_session.clone(), self.audio_session.clone(), env.pipeline.clone());
            self.audio_sink = AudioSink::new(self.audio_session.clone(), env.pipeline.clone());
        }
    }

    pub(crate) fn component_env(&self, env: &RootEnv<'_>) -> ComponentEnv {
        ComponentEnv {
            video_session: self.video_session.clone(),
            audio_session: self.audio_session.clone(),
            pipeline: env.pipeline.clone(),
            context: env.context.clone(),
            audio_channels: env.config.audio.channels,
        }
    }

    /// Stop pulling and close any recording.
    pub(crate) fn shutdown(mut self) {
        self.video_sink.stop();
        if let Some(chain) = self.recording.take() {
            chain.finish();
        }
        info!("Pipeline components released");
    }
}

/// State of the pipeline root control.
pub struct RootControl {
    pub(crate) scene: ControlId,
    pub(crate) components: Option<PipelineComponents>,
    pub(crate) recording: bool,
    /// Chains replaced by the last activation, closed once the new topologies run
    pub(crate) retired: Vec<RecordingChain>,
    /// Set by `apply_config`; the next activation recreates every component
    pub(crate) restart_requested: bool,
}

impl RootControl {
    pub(crate) fn new(scene: ControlId) -> Self {
        Self {
            scene,
            components: None,
            recording: false,
            retired: Vec::new(),
            restart_requested: false,
        }
    }

    pub fn scene(&self) -> ControlId {
        self.scene
    }

    pub fn components(&self) -> Option<&PipelineComponents> {
        self.components.as_ref()
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    /// Make sure every pipeline-level component exists and is usable.
    pub(crate) fn activate_components(&mut self, env: &RootEnv<'_>) -> Result<ComponentEnv, MediaError> {
        if self.restart_requested {
            self.restart_requested = false;
            if let Some(old) = self.components.take() {
                info!("Restarting pipeline with new settings");
                old.shutdown();
            }
        }

        let components = self
            .components
            .get_or_insert_with(|| PipelineComponents::create(env));
        components.refresh(env);

        if self.recording {
            if components.recording.as_ref().map_or(true, RecordingChain::is_stale) {
                self.retired.extend(components.recording.take());
                components.recording = Some(RecordingChain::create(components, env)?);
            }
        } else {
            self.retired.extend(components.recording.take());
        }

        Ok(components.component_env(env))
    }

    pub(crate) fn deactivate_components(&mut self) {
        if let Some(components) = self.components.take() {
            components.shutdown();
        }
        for chain in self.retired.drain(..) {
            chain.finish();
        }
    }
}

/// Build a fresh video/audio topology pair from the active set.
pub(crate) fn build_topologies(tree: &mut ControlTree) -> Result<(Arc<Topology>, Arc<Topology>), MediaError> {
    let components = tree
        .root_control()?
        .components
        .clone()
        .ok_or(MediaError::Invariant("topology built without pipeline components"))?;

    let clock = components.video_sink.presentation_clock().clone();
    let mut video = TopologyBuilder::new(MediaKind::Video, clock.clone());
    let mut audio = TopologyBuilder::new(MediaKind::Audio, clock);

    let video_sink = components.video_sink.create_stream(&mut video);
    let audio_sink = components.audio_sink.create_stream(&mut audio);
    let video_mixer = components.video_mixer.create_stream(&mut video);
    let audio_mixer = components.audio_mixer.create_stream(&mut audio);

    tree.build_order.clear();
    for id in tree.active.clone() {
        match tree.node(id)?.kind.control_type() {
            ControlType::DisplayCapture => {
                build_source_branch::<DisplayDevice>(tree, id, &mut video, video_mixer)?
            }
            ControlType::VidcapCapture => {
                build_source_branch::<VidcapDevice>(tree, id, &mut video, video_mixer)?
            }
            ControlType::AudioCapture => {
                build_source_branch::<AudioDevice>(tree, id, &mut audio, audio_mixer)?
            }
            ControlType::Pipeline | ControlType::Scene => {}
        }
        tree.build_order.push(id);
    }

    // A mixer without inputs would never complete a request.
    if video.input_count(video_mixer) == 0 {
        let empty = EmptySource::new(components.video_session.clone()).create_stream(&mut video);
        video.connect(video_mixer, empty, EdgeParams::None)?;
    }
    if audio.input_count(audio_mixer) == 0 {
        let empty = EmptySource::new(components.audio_session.clone()).create_stream(&mut audio);
        audio.connect(audio_mixer, empty, EdgeParams::None)?;
    }

    match &components.recording {
        Some(chain) => {
            let encoder = chain.video_encoder.create_stream(&mut video);
            let output = chain.video_output.create_stream(&mut video);
            video.connect(encoder, video_mixer, EdgeParams::None)?;
            video.connect(output, encoder, EdgeParams::None)?;
            video.connect(video_sink, output, EdgeParams::None)?;

            let encoder = chain.audio_encoder.create_stream(&mut audio);
            let output = chain.audio_output.create_stream(&mut audio);
            audio.connect(encoder, audio_mixer, EdgeParams::None)?;
            audio.connect(output, encoder, EdgeParams::None)?;
            audio.connect(audio_sink, output, EdgeParams::None)?;
        }
        None => {
            video.connect(video_sink, video_mixer, EdgeParams::None)?;
            audio.connect(audio_sink, audio_mixer, EdgeParams::None)?;
        }
    }

    let video = video.build()?;
    let audio = audio.build()?;
    info!(
        "Built topologies: video {} streams/{} edges, audio {} streams/{} edges",
        video.stream_count(),
        video.edge_count(),
        audio.stream_count(),
        audio.edge_count()
    );
    Ok((video, audio))
}

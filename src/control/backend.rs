//! Factories for the recording chain
//!
//! Encoders and the container writer depend on what the host offers, so the
//! pipeline asks a [`RecordingBackend`] for them each time recording starts.

use chrono::Local;
use std::sync::Arc;

use crate::components::{
    IndexFileWriter, MemoryWriter, OutputWriter, PassthroughEncoder, SampleEncoder,
};
use crate::config::{AudioConfig, OutputConfig, VideoConfig};
use crate::error::MediaError;

pub trait RecordingBackend: Send + Sync {
    fn create_video_encoder(&self, config: &VideoConfig) -> Result<Box<dyn SampleEncoder>, MediaError>;

    fn create_audio_encoder(&self, config: &AudioConfig) -> Result<Box<dyn SampleEncoder>, MediaError>;

    fn create_writer(&self, config: &OutputConfig) -> Result<Arc<dyn OutputWriter>, MediaError>;
}

/// Passthrough encoders writing a packet index file into the output folder.
#[derive(Debug, Default)]
pub struct FileBackend;

impl RecordingBackend for FileBackend {
    fn create_video_encoder(&self, config: &VideoConfig) -> Result<Box<dyn SampleEncoder>, MediaError> {
        // One keyframe every two seconds.
        let interval = 2 * u64::from(config.fps_num) / u64::from(config.fps_den.max(1));
        Ok(Box::new(PassthroughEncoder::new(interval.max(1))))
    }

    fn create_audio_encoder(&self, _config: &AudioConfig) -> Result<Box<dyn SampleEncoder>, MediaError> {
        Ok(Box::new(PassthroughEncoder::default()))
    }

    fn create_writer(&self, config: &OutputConfig) -> Result<Arc<dyn OutputWriter>, MediaError> {
        let path = config.create_file_path(Local::now());
        let writer: Arc<dyn OutputWriter> = IndexFileWriter::create(&path, config.overwrite_old_file)?;
        Ok(writer)
    }
}

/// Passthrough encoders writing into one shared [`MemoryWriter`].
#[derive(Debug, Default)]
pub struct MemoryBackend {
    writer: Arc<MemoryWriter>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn writer(&self) -> &Arc<MemoryWriter> {
        &self.writer
    }
}

impl RecordingBackend for MemoryBackend {
    fn create_video_encoder(&self, _config: &VideoConfig) -> Result<Box<dyn SampleEncoder>, MediaError> {
        Ok(Box::new(PassthroughEncoder::default()))
    }

    fn create_audio_encoder(&self, _config: &AudioConfig) -> Result<Box<dyn SampleEncoder>, MediaError> {
        Ok(Box::new(PassthroughEncoder::default()))
    }

    fn create_writer(&self, _config: &OutputConfig) -> Result<Arc<dyn OutputWriter>, MediaError> {
        let writer: Arc<dyn OutputWriter> = self.writer.clone();
        Ok(writer)
    }
}

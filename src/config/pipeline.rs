//! Persisted pipeline settings
//!
//! On disk the settings are a little-endian magic number and version
//! followed by a MessagePack body with named fields. Versions may only
//! append fields, so every struct defaults the fields it does not find.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::ConfigError;
use crate::media::FrameRate;

pub const MAGIC_NUMBER: u32 = 0xE43A_F973;
/// Bump whenever a field is appended to any settings struct.
pub const LATEST_VERSION: u32 = 1;

const HEADER_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum H264Profile {
    Baseline,
    #[default]
    Main,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AacBitrate {
    Rate96,
    #[default]
    Rate128,
    Rate160,
    Rate192,
}

impl AacBitrate {
    pub fn kbps(&self) -> u32 {
        match self {
            Self::Rate96 => 96,
            Self::Rate128 => 128,
            Self::Rate160 => 160,
            Self::Rate192 => 192,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    pub fps_num: u32,
    pub fps_den: u32,

    /// Use the default adapter instead of `adapter`
    pub adapter_use_default: bool,
    pub adapter: u32,

    /// Prefer the hardware encoder, falling back to software
    pub encoder_use_default: bool,

    /// Canvas size
    pub width_frame: u32,
    pub height_frame: u32,

    /// Average bitrate in kbps
    pub bitrate: u32,
    pub quality_vs_speed: u32,
    pub h264_profile: H264Profile,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            fps_num: 60,
            fps_den: 1,
            adapter_use_default: true,
            adapter: 0,
            encoder_use_default: true,
            width_frame: 1920,
            height_frame: 1080,
            bitrate: 6000,
            quality_vs_speed: 100,
            h264_profile: H264Profile::Main,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// 44100 or 48000
    pub sample_rate: u32,
    /// 1, 2 or 6
    pub channels: u32,
    pub bitrate: AacBitrate,
    pub profile_level_indication: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            channels: 2,
            bitrate: AacBitrate::Rate128,
            profile_level_indication: 0x29,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub output_folder: PathBuf,
    pub output_filename: String,
    pub overwrite_old_file: bool,
    pub ingest_server: String,
    pub stream_key: String,
}

fn default_output_folder() -> PathBuf {
    directories::UserDirs::new()
        .and_then(|dirs| dirs.video_dir().map(Path::to_path_buf))
        .unwrap_or_else(|| std::env::temp_dir().join("streamcast"))
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            output_folder: default_output_folder(),
            output_filename: "test.mp4".to_string(),
            overwrite_old_file: false,
            ingest_server: String::new(),
            stream_key: String::new(),
        }
    }
}

impl OutputConfig {
    /// Where the next recording goes.
    ///
    /// Keeps the configured name when overwriting is allowed or nothing is in
    /// the way; otherwise the stem gets a timestamp suffix.
    pub fn create_file_path(&self, now: DateTime<Local>) -> PathBuf {
        let path = self.output_folder.join(&self.output_filename);
        if self.overwrite_old_file || !path.exists() {
            return path;
        }

        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "recording".to_string());
        let stamped = match path.extension() {
            Some(ext) => format!("{}_{}.{}", stem, now.format("%Y-%m-%d_%H-%M-%S"), ext.to_string_lossy()),
            None => format!("{}_{}", stem, now.format("%Y-%m-%d_%H-%M-%S")),
        };
        self.output_folder.join(stamped)
    }
}

/// Everything needed to (re)build the pipeline components.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub video: VideoConfig,
    pub audio: AudioConfig,
    pub output: OutputConfig,
}

impl PipelineConfig {
    pub fn frame_rate(&self) -> FrameRate {
        FrameRate::new(self.video.fps_num.into(), self.video.fps_den.into())
    }

    pub fn sample_rate(&self) -> FrameRate {
        FrameRate::sample_rate(self.audio.sample_rate.into())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.video.fps_num == 0 || self.video.fps_den == 0 {
            return Err(ConfigError::Invalid(format!(
                "frame rate {}/{} is not valid",
                self.video.fps_num, self.video.fps_den
            )));
        }
        if self.video.width_frame == 0 || self.video.height_frame == 0 {
            return Err(ConfigError::Invalid("canvas size must not be zero".into()));
        }
        if !matches!(self.audio.sample_rate, 44100 | 48000) {
            return Err(ConfigError::Invalid(format!(
                "sample rate {} is not supported",
                self.audio.sample_rate
            )));
        }
        if !matches!(self.audio.channels, 1 | 2 | 6) {
            return Err(ConfigError::Invalid(format!(
                "{} audio channels are not supported",
                self.audio.channels
            )));
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, ConfigError> {
        let mut bytes = Vec::with_capacity(256);
        bytes.extend_from_slice(&MAGIC_NUMBER.to_le_bytes());
        bytes.extend_from_slice(&LATEST_VERSION.to_le_bytes());
        bytes.extend(rmp_serde::to_vec_named(self)?);
        Ok(bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ConfigError> {
        if bytes.len() < HEADER_LEN {
            return Err(ConfigError::Truncated);
        }
        let (header, body) = bytes.split_at(HEADER_LEN);
        let magic = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        let version = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);

        if magic != MAGIC_NUMBER {
            return Err(ConfigError::BadMagic { found: magic });
        }
        if version > LATEST_VERSION {
            return Err(ConfigError::UnsupportedVersion {
                found: version,
                latest: LATEST_VERSION,
            });
        }
        debug!("Decoding pipeline settings version {}", version);

        let config: PipelineConfig = rmp_serde::from_slice(body)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let bytes = std::fs::read(path)?;
        Self::from_bytes(&bytes)
    }

    /// Load `path`, falling back to defaults when the file does not exist yet.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            info!("No pipeline settings at {:?}, using defaults", path);
            return Ok(Self::default());
        }
        Self::load(path)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_bytes()?)?;
        debug!("Pipeline settings saved to {:?}", path);
        Ok(())
    }
}

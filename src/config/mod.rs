//! Configuration management for streamcast
//!
//! The application config is TOML; the pipeline settings it points at are
//! the versioned binary format in [`pipeline`].

mod pipeline;

pub use pipeline::{
    AacBitrate, AudioConfig, H264Profile, OutputConfig, PipelineConfig, VideoConfig,
    LATEST_VERSION, MAGIC_NUMBER,
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::components::{AudioDevice, DisplayDevice, VidcapDevice};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Worker runtime and settings location
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// Recording configuration
    #[serde(default)]
    pub recording: RecordingConfig,

    /// Sources placed in the root scene at startup
    #[serde(default)]
    pub scene: SceneConfig,

    /// Path to config file (not serialized)
    #[serde(skip)]
    config_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Threads serving stream requests and timers
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,

    /// Binary pipeline settings; defaults to `pipeline.bin` beside this file
    #[serde(default)]
    pub settings_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecordingConfig {
    /// Overrides the output folder of the pipeline settings
    #[serde(default)]
    pub output_directory: Option<PathBuf>,

    /// Whether to start recording automatically on launch
    #[serde(default)]
    pub autostart_on_launch: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneConfig {
    #[serde(default = "default_sources")]
    pub sources: Vec<SourceEntry>,
}

/// One source of the startup scene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceEntry {
    Display {
        name: String,
        #[serde(default)]
        adapter: u32,
        #[serde(default)]
        output: u32,
        width: u32,
        height: u32,
    },
    Webcam {
        name: String,
        symbolic_link: String,
        width: u32,
        height: u32,
    },
    Audio {
        name: String,
        device_id: String,
        #[serde(default)]
        friendly_name: String,
        /// False records the loopback of a render device
        #[serde(default = "default_true")]
        capture: bool,
    },
}

impl SourceEntry {
    pub fn name(&self) -> &str {
        match self {
            Self::Display { name, .. } | Self::Webcam { name, .. } | Self::Audio { name, .. } => name,
        }
    }

    pub fn display_device(&self) -> Option<DisplayDevice> {
        match self {
            Self::Display {
                adapter,
                output,
                width,
                height,
                ..
            } => Some(DisplayDevice::new(*adapter, *output, *width, *height)),
            Self::Webcam { .. } | Self::Audio { .. } => None,
        }
    }

    pub fn vidcap_device(&self) -> Option<VidcapDevice> {
        match self {
            Self::Webcam {
                name,
                symbolic_link,
                width,
                height,
            } => Some(VidcapDevice::new(name.clone(), symbolic_link.clone(), *width, *height)),
            Self::Display { .. } | Self::Audio { .. } => None,
        }
    }

    pub fn audio_device(&self) -> Option<AudioDevice> {
        match self {
            Self::Audio {
                name,
                device_id,
                friendly_name,
                capture,
            } => {
                let friendly = if friendly_name.is_empty() { name } else { friendly_name };
                Some(AudioDevice::new(device_id.clone(), friendly.clone(), *capture))
            }
            Self::Display { .. } | Self::Webcam { .. } => None,
        }
    }
}

// Default value functions
fn default_worker_threads() -> usize {
    2
}

fn default_true() -> bool {
    true
}

fn default_sources() -> Vec<SourceEntry> {
    vec![
        SourceEntry::Display {
            name: "Display".to_string(),
            adapter: 0,
            output: 0,
            width: 1920,
            height: 1080,
        },
        SourceEntry::Audio {
            name: "Desktop audio".to_string(),
            device_id: "default-render".to_string(),
            friendly_name: String::new(),
            capture: false,
        },
    ]
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            worker_threads: default_worker_threads(),
            settings_file: None,
        }
    }
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            sources: default_sources(),
        }
    }
}

impl Config {
    /// Load configuration from default location or create default
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::default_config_path()?)
    }

    /// Load configuration from `config_path`, writing defaults there if it is missing
    pub fn load_from(config_path: &Path) -> Result<Self> {
        if config_path.exists() {
            let contents = std::fs::read_to_string(config_path)
                .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

            let mut config: Config = toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config file: {:?}", config_path))?;

            config.config_path = Some(config_path.to_path_buf());
            Ok(config)
        } else {
            let config = Config {
                config_path: Some(config_path.to_path_buf()),
                ..Config::default()
            };
            config.save()?;
            Ok(config)
        }
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        let config_path = self.config_path()?;

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(&config_path, contents)
            .with_context(|| format!("Failed to write config file: {:?}", config_path))?;

        Ok(())
    }

    /// Get the config file path
    pub fn config_path(&self) -> Result<PathBuf> {
        match &self.config_path {
            Some(path) => Ok(path.clone()),
            None => Self::default_config_path(),
        }
    }

    /// Where the binary pipeline settings live
    pub fn settings_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.runtime.settings_file {
            return Ok(path.clone());
        }
        let config_path = self.config_path()?;
        let dir = config_path
            .parent()
            .context("Config path has no parent directory")?;
        Ok(dir.join("pipeline.bin"))
    }

    /// Load the pipeline settings and apply the overrides held here
    pub fn load_pipeline_config(&self) -> Result<PipelineConfig> {
        let path = self.settings_path()?;
        let mut settings = PipelineConfig::load_or_default(&path)
            .with_context(|| format!("Failed to load pipeline settings: {:?}", path))?;
        if let Some(dir) = &self.recording.output_directory {
            settings.output.output_folder = dir.clone();
        }
        Ok(settings)
    }

    /// Get default config path
    fn default_config_path() -> Result<PathBuf> {
        let proj_dirs = directories::ProjectDirs::from("dev", "streamcast", "streamcast")
            .context("Failed to determine config directory")?;

        Ok(proj_dirs.config_dir().join("config.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_is_created_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let config = Config::load_from(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.runtime.worker_threads, 2);
        assert_eq!(config.scene.sources.len(), 2);
        assert_eq!(config.settings_path().unwrap(), dir.path().join("pipeline.bin"));
    }

    #[test]
    fn test_scene_sources_parse() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[runtime]
worker_threads = 4

[[scene.sources]]
kind = "display"
name = "Main"
output = 1
width = 1280
height = 720

[[scene.sources]]
kind = "webcam"
name = "Cam"
symbolic_link = "usb#cam_1"
width = 640
height = 480

[[scene.sources]]
kind = "audio"
name = "Mic"
device_id = "mic-0"
"#,
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.runtime.worker_threads, 4);
        assert!(!config.recording.autostart_on_launch);

        let sources = &config.scene.sources;
        assert_eq!(sources.len(), 3);
        assert_eq!(sources[0].display_device(), Some(DisplayDevice::new(0, 1, 1280, 720)));
        assert_eq!(
            sources[1].vidcap_device(),
            Some(VidcapDevice::new("Cam", "usb#cam_1", 640, 480))
        );
        assert!(sources[1].display_device().is_none());
        let mic = sources[2].audio_device().unwrap();
        assert_eq!(mic.device_id, "mic-0");
        assert_eq!(mic.friendly_name, "Mic");
        assert!(mic.capture);
    }

    #[test]
    fn test_output_directory_overrides_settings() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::load_from(&dir.path().join("config.toml")).unwrap();
        config.recording.output_directory = Some(dir.path().join("videos"));

        let settings = config.load_pipeline_config().unwrap();
        assert_eq!(settings.output.output_folder, dir.path().join("videos"));
    }

    #[test]
    fn test_save_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut config = Config::load_from(&path).unwrap();
        config.recording.autostart_on_launch = true;
        config.save().unwrap();

        let reloaded = Config::load_from(&path).unwrap();
        assert!(reloaded.recording.autostart_on_launch);
    }
}

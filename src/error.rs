//! Error types shared across the pipeline

use thiserror::Error;

/// Errors raised by the media pipeline, its components and the control tree.
#[derive(Debug, Error)]
pub enum MediaError {
    /// A control could not bind or create its component
    #[error("failed to activate control '{control}': {reason}")]
    Activation { control: String, reason: String },

    /// Recording components could not be created; the pipeline keeps previewing
    #[error("could not start recording: {0}")]
    Recording(String),

    /// A stream failed while serving a request or processing a sample
    #[error("stream {stream} failed: {reason}")]
    Stream { stream: String, reason: String },

    /// An internal invariant was violated
    #[error("invariant violated: {0}")]
    Invariant(&'static str),

    /// A capture device disappeared or reported an unrecoverable state
    #[error("device lost: {0}")]
    DeviceLost(String),

    /// The referenced control does not exist (or was removed)
    #[error("unknown control {0}")]
    UnknownControl(String),

    /// The control tree rejected the operation
    #[error("invalid control operation: {0}")]
    InvalidOperation(String),

    /// A presentation clock sink refused to start
    #[error("presentation clock start was rejected by a sink")]
    ClockStart,

    /// The worker runtime could not be started
    #[error("worker runtime: {0}")]
    Runtime(String),

    /// The control thread is gone or refused the job
    #[error("control thread unavailable: {0}")]
    ControlThread(String),

    /// Writing encoded output failed
    #[error("output error: {0}")]
    Output(#[from] std::io::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl MediaError {
    pub fn activation(control: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Activation {
            control: control.into(),
            reason: reason.to_string(),
        }
    }

    pub fn stream(stream: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Stream {
            stream: stream.into(),
            reason: reason.to_string(),
        }
    }
}

/// Errors from loading or saving the persisted pipeline settings.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("settings file i/o failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("settings file has bad magic number {found:#010x}")]
    BadMagic { found: u32 },

    #[error("settings file version {found} is newer than supported version {latest}")]
    UnsupportedVersion { found: u32, latest: u32 },

    #[error("settings file is truncated")]
    Truncated,

    #[error("failed to decode settings: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    #[error("failed to encode settings: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("invalid settings: {0}")]
    Invalid(String),
}

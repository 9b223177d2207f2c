//! streamcast
//!
//! A capture/record pipeline engine: display and audio capture sources are
//! composed by scenes, mixed on a shared media clock and either previewed
//! or encoded into a recording.

pub mod clock;
pub mod components;
pub mod config;
pub mod control;
pub mod crash;
pub mod error;
pub mod logging;
pub mod media;
pub mod session;
pub mod topology;

pub use config::{Config, PipelineConfig};
pub use control::{Pipeline, PipelineController, PipelineOptions};
pub use error::MediaError;
pub use session::FatalPolicy;

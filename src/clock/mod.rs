//! Time sources, the presentation clock and due-time callback scheduling

mod presentation;
mod scheduler;
mod time_source;

pub use presentation::{ClockSink, PresentationClock};
pub use scheduler::{CallbackScheduler, ScheduledSink};
pub use time_source::MediaClock;

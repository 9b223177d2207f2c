use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

use super::MediaClock;
use crate::media::TimeUnit;

/// Receives presentation clock state changes.
pub trait ClockSink: Send + Sync {
    /// Returns false to veto the start; the clock then stops every sink.
    fn on_clock_start(&self, time: TimeUnit) -> bool;
    fn on_clock_stop(&self, time: TimeUnit);
}

#[derive(Debug, Clone, Copy)]
struct ClockState {
    running: bool,
    /// Presentation time at `base_source_time` (or the frozen time when stopped)
    base_time: TimeUnit,
    base_source_time: TimeUnit,
}

/// Presentation clock derived from a [`MediaClock`].
///
/// Sinks are held weakly; a sink that is dropped simply stops receiving events.
pub struct PresentationClock {
    time_source: Arc<MediaClock>,
    state: Mutex<ClockState>,
    sinks: Mutex<Vec<Weak<dyn ClockSink>>>,
}

impl PresentationClock {
    pub fn new(time_source: Arc<MediaClock>) -> Self {
        Self {
            time_source,
            state: Mutex::new(ClockState {
                running: false,
                base_time: 0,
                base_source_time: 0,
            }),
            sinks: Mutex::new(Vec::new()),
        }
    }

    pub fn time_source(&self) -> &Arc<MediaClock> {
        &self.time_source
    }

    pub fn register_sink(&self, sink: &Arc<dyn ClockSink>) {
        let mut sinks = self.sinks.lock();
        sinks.retain(|s| s.strong_count() > 0);
        sinks.push(Arc::downgrade(sink));
    }

    pub fn clear_clock_sinks(&self) {
        self.sinks.lock().clear();
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }

    /// Current presentation time; frozen while the clock is stopped.
    pub fn current_time(&self) -> TimeUnit {
        let state = *self.state.lock();
        if state.running {
            state.base_time + (self.time_source.now() - state.base_source_time)
        } else {
            state.base_time
        }
    }

    pub fn set_current_time(&self, time: TimeUnit) {
        let mut state = self.state.lock();
        state.base_time = time;
        state.base_source_time = self.time_source.now();
    }

    /// Start at `time`. Either every sink accepts and the clock runs, or every
    /// sink is stopped again and the clock stays stopped.
    pub fn clock_start(&self, time: TimeUnit) -> bool {
        self.set_current_time(time);
        let sinks = self.live_sinks();

        let accepted = sinks.iter().all(|sink| sink.on_clock_start(time));
        if !accepted {
            warn!("Presentation clock start at {} was vetoed; rolling back", time);
            for sink in &sinks {
                sink.on_clock_stop(time);
            }
            self.state.lock().running = false;
            return false;
        }

        let mut state = self.state.lock();
        state.running = true;
        state.base_time = time;
        state.base_source_time = self.time_source.now();
        debug!("Presentation clock started at {}", time);
        true
    }

    pub fn clock_stop(&self) {
        let time = {
            let mut state = self.state.lock();
            if state.running {
                state.base_time += self.time_source.now() - state.base_source_time;
                state.running = false;
            }
            state.base_time
        };
        for sink in self.live_sinks() {
            sink.on_clock_stop(time);
        }
        debug!("Presentation clock stopped at {}", time);
    }

    fn live_sinks(&self) -> Vec<Arc<dyn ClockSink>> {
        self.sinks.lock().iter().filter_map(Weak::upgrade).collect()
    }
}

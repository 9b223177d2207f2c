use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::trace;

use super::PresentationClock;
use crate::media::{FrameRate, TimeUnit};
use crate::session::WorkQueue;

/// A sink that receives callbacks at due presentation times.
pub trait ScheduledSink: Send + Sync + 'static {
    fn scheduler(&self) -> &CallbackScheduler;

    /// The clock that due times are measured against; `None` cancels scheduling.
    fn clock(&self) -> Option<Arc<PresentationClock>>;

    /// Invoked on a worker without any scheduler lock held.
    fn scheduled_callback(self: Arc<Self>, due_time: TimeUnit);
}

struct SchedulerState {
    callbacks: BTreeSet<TimeUnit>,
    /// Due time of the armed timer, `TimeUnit::MAX` when nothing is armed
    scheduled_time: TimeUnit,
    timer: Option<JoinHandle<()>>,
    generation: u64,
}

/// Ordered set of due times with at most one armed timer, always for the earliest.
pub struct CallbackScheduler {
    work_queue: WorkQueue,
    state: Mutex<SchedulerState>,
    pull_rate: Mutex<Option<FrameRate>>,
}

impl CallbackScheduler {
    pub fn new(work_queue: WorkQueue) -> Self {
        Self {
            work_queue,
            state: Mutex::new(SchedulerState {
                callbacks: BTreeSet::new(),
                scheduled_time: TimeUnit::MAX,
                timer: None,
                generation: 0,
            }),
            pull_rate: Mutex::new(None),
        }
    }

    pub fn set_pull_rate(&self, rate: FrameRate) {
        *self.pull_rate.lock() = Some(rate);
    }

    pub fn pull_rate(&self) -> Option<FrameRate> {
        *self.pull_rate.lock()
    }

    /// Next grid time after `time` for the configured pull rate.
    pub fn next_due_time(&self, time: TimeUnit) -> Option<TimeUnit> {
        self.pull_rate().map(|rate| rate.next_grid_time(time))
    }

    pub fn pending(&self) -> usize {
        self.state.lock().callbacks.len()
    }

    /// Queue a callback for `due_time`.
    ///
    /// Returns false if `due_time` is not in the future; nothing is queued then.
    pub fn schedule_new_callback<S: ScheduledSink>(sink: &Arc<S>, due_time: TimeUnit) -> bool {
        let scheduler = sink.scheduler();
        let mut state = scheduler.state.lock();
        state.callbacks.insert(due_time);
        scheduler.schedule_callback(sink, &mut state, due_time)
    }

    /// Drop every queued callback and disarm the timer.
    pub fn clear_queue(&self) {
        let mut state = self.state.lock();
        state.callbacks.clear();
        state.scheduled_time = TimeUnit::MAX;
        state.generation += 1;
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
    }

    fn schedule_callback<S: ScheduledSink>(
        &self,
        sink: &Arc<S>,
        state: &mut SchedulerState,
        due_time: TimeUnit,
    ) -> bool {
        let Some(clock) = sink.clock() else {
            state.callbacks.clear();
            state.scheduled_time = TimeUnit::MAX;
            return false;
        };

        let now = clock.current_time();
        if due_time <= now {
            state.callbacks.remove(&due_time);
            return false;
        }

        if due_time < state.scheduled_time {
            state.scheduled_time = due_time;
            state.generation += 1;
            if let Some(timer) = state.timer.take() {
                timer.abort();
            }

            let generation = state.generation;
            let delay = Duration::from_nanos(((due_time - now) as u64).saturating_mul(100));
            let deadline = tokio::time::Instant::now() + delay;
            let weak = Arc::downgrade(sink);
            state.timer = Some(self.work_queue.spawn(async move {
                tokio::time::sleep_until(deadline).await;
                if let Some(sink) = weak.upgrade() {
                    Self::fire(sink, generation);
                }
            }));
        }
        true
    }

    fn fire<S: ScheduledSink>(sink: Arc<S>, generation: u64) {
        let due_time = {
            let scheduler = sink.scheduler();
            let mut state = scheduler.state.lock();
            if state.generation != generation {
                trace!("Superseded timer fired; ignoring");
                return;
            }
            state.timer = None;
            state.scheduled_time = TimeUnit::MAX;

            let Some(due_time) = state.callbacks.pop_first() else {
                return;
            };

            // Re-arm for the earliest remaining time, dropping ones already passed.
            while let Some(&next) = state.callbacks.first() {
                if scheduler.schedule_callback(&sink, &mut state, next) {
                    break;
                }
            }
            due_time
        };

        sink.scheduled_callback(due_time);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MediaClock;
    use parking_lot::Mutex as PlMutex;

    struct Recorder {
        scheduler: CallbackScheduler,
        clock: Arc<PresentationClock>,
        fired: PlMutex<Vec<TimeUnit>>,
        rearmed: PlMutex<Vec<bool>>,
        reschedule: bool,
    }

    impl ScheduledSink for Recorder {
        fn scheduler(&self) -> &CallbackScheduler {
            &self.scheduler
        }

        fn clock(&self) -> Option<Arc<PresentationClock>> {
            Some(self.clock.clone())
        }

        fn scheduled_callback(self: Arc<Self>, due_time: TimeUnit) {
            self.fired.lock().push(due_time);
            if self.reschedule && self.fired.lock().len() < 3 {
                // Re-entrant scheduling must not deadlock. The due time may
                // already be behind the clock, so re-arm from "now".
                let next = self.clock.current_time() + 50_000;
                let accepted = CallbackScheduler::schedule_new_callback(&self, next);
                self.rearmed.lock().push(accepted);
            }
        }
    }

    fn recorder(runtime: &tokio::runtime::Runtime, reschedule: bool) -> Arc<Recorder> {
        let clock = Arc::new(PresentationClock::new(Arc::new(MediaClock::new())));
        assert!(clock.clock_start(0));
        Arc::new(Recorder {
            scheduler: CallbackScheduler::new(WorkQueue::new(runtime.handle().clone())),
            clock,
            fired: PlMutex::new(Vec::new()),
            rearmed: PlMutex::new(Vec::new()),
            reschedule,
        })
    }

    fn runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap()
    }

    fn wait_for(rec: &Recorder, count: usize) {
        for _ in 0..200 {
            if rec.fired.lock().len() >= count {
                return;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_past_due_time_is_rejected() {
        let rt = runtime();
        let rec = recorder(&rt, false);
        rec.clock.set_current_time(1_000_000);
        assert!(!CallbackScheduler::schedule_new_callback(&rec, 500_000));
        assert_eq!(rec.scheduler.pending(), 0);
    }

    #[test]
    fn test_callbacks_fire_in_due_order() {
        let rt = runtime();
        let rec = recorder(&rt, false);
        let now = rec.clock.current_time();
        assert!(CallbackScheduler::schedule_new_callback(&rec, now + 300_000));
        assert!(CallbackScheduler::schedule_new_callback(&rec, now + 100_000));
        assert!(CallbackScheduler::schedule_new_callback(&rec, now + 200_000));

        wait_for(&rec, 3);
        assert_eq!(
            *rec.fired.lock(),
            vec![now + 100_000, now + 200_000, now + 300_000]
        );
    }

    #[test]
    fn test_callback_may_reschedule_itself() {
        let rt = runtime();
        let rec = recorder(&rt, true);
        let now = rec.clock.current_time();
        assert!(CallbackScheduler::schedule_new_callback(&rec, now + 10_000));
        wait_for(&rec, 3);
        assert_eq!(*rec.rearmed.lock(), vec![true, true]);

        let fired = rec.fired.lock().clone();
        assert_eq!(fired.len(), 3);
        assert!(fired.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_clear_queue_cancels_pending() {
        let rt = runtime();
        let rec = recorder(&rt, false);
        let now = rec.clock.current_time();
        assert!(CallbackScheduler::schedule_new_callback(&rec, now + 200_000));
        rec.scheduler.clear_queue();
        std::thread::sleep(Duration::from_millis(60));
        assert!(rec.fired.lock().is_empty());
    }
}

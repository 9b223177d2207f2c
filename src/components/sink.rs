use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info, trace};

use super::{ComponentBase, MediaComponent, PipelineHandle};
use crate::clock::{CallbackScheduler, ClockSink, PresentationClock, ScheduledSink};
use crate::error::MediaError;
use crate::media::{FrameRate, SampleArgs, TimeUnit};
use crate::session::{MediaSession, RequestPacket, RequestQueue};
use crate::topology::{Edge, MediaStream, StreamId, StreamKind, Topology, TopologyBuilder};

type TopologyPair = (Arc<Topology>, Arc<Topology>);

/// Counters kept by a terminal sink.
#[derive(Debug, Default)]
pub struct SinkStats {
    packets: AtomicU64,
    packets_with_frames: AtomicU64,
    last_frame_end: AtomicI64,
}

impl SinkStats {
    fn record(&self, sample: &SampleArgs) {
        self.packets.fetch_add(1, Ordering::Relaxed);
        if sample.has_frames() {
            self.packets_with_frames.fetch_add(1, Ordering::Relaxed);
        }
        let frame_end = match sample {
            SampleArgs::Video(args) => Some(args.frame_end),
            SampleArgs::Audio(args) => Some(args.frame_end),
            SampleArgs::Encoded(_) => None,
        };
        if let Some(frame_end) = frame_end {
            self.last_frame_end.fetch_max(frame_end, Ordering::Relaxed);
        }
    }

    /// Packets that completed the whole topology.
    pub fn packets(&self) -> u64 {
        self.packets.load(Ordering::Relaxed)
    }

    pub fn packets_with_frames(&self) -> u64 {
        self.packets_with_frames.load(Ordering::Relaxed)
    }

    pub fn last_frame_end(&self) -> i64 {
        self.last_frame_end.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> SinkStatsSnapshot {
        SinkStatsSnapshot {
            packets: self.packets(),
            packets_with_frames: self.packets_with_frames(),
            last_frame_end: self.last_frame_end(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct SinkStatsSnapshot {
    pub packets: u64,
    pub packets_with_frames: u64,
    pub last_frame_end: i64,
}

/// Terminal stream of a topology; consumes completed packets in order.
struct SinkStream {
    id: StreamId,
    session: Arc<MediaSession>,
    stats: Arc<SinkStats>,
    pending: Mutex<Option<RequestQueue<SampleArgs>>>,
}

impl SinkStream {
    fn create(builder: &mut TopologyBuilder, kind: StreamKind, session: &Arc<MediaSession>, stats: &Arc<SinkStats>) -> StreamId {
        let session = session.clone();
        let stats = stats.clone();
        let id = builder.add_stream(kind, move |id| {
            Arc::new(SinkStream {
                id,
                session,
                stats,
                pending: Mutex::new(None),
            })
        });
        builder.set_terminal(id);
        id
    }
}

impl MediaStream for SinkStream {
    fn request_sample(&self, rp: &RequestPacket) -> Result<(), MediaError> {
        self.session.request_sample(self.id, rp);
        Ok(())
    }

    fn process_sample(&self, sample: &SampleArgs, rp: &RequestPacket, _edge: &Edge) -> Result<(), MediaError> {
        let mut pending = self.pending.lock();
        let queue = pending.get_or_insert_with(|| RequestQueue::new(rp.packet_number));
        if rp.packet_number < queue.first_packet_number() {
            trace!("Sink ignoring stale packet {}", rp.packet_number);
            return Ok(());
        }
        queue.push(rp.packet_number, sample.clone());
        while let Some(sample) = queue.pop() {
            self.stats.record(&sample);
        }
        Ok(())
    }
}

/// Terminal component of the audio topology. Pulls are driven by [`VideoSink`].
pub struct AudioSink {
    base: ComponentBase,
    stats: Arc<SinkStats>,
}

impl MediaComponent for AudioSink {
    fn base(&self) -> &ComponentBase {
        &self.base
    }
}

impl AudioSink {
    pub fn new(session: Arc<MediaSession>, pipeline: PipelineHandle) -> Arc<Self> {
        Arc::new(Self {
            base: ComponentBase::new("audio sink", session, pipeline),
            stats: Arc::new(SinkStats::default()),
        })
    }

    pub fn stats(&self) -> &Arc<SinkStats> {
        &self.stats
    }

    pub fn create_stream(self: &Arc<Self>, builder: &mut TopologyBuilder) -> StreamId {
        SinkStream::create(builder, StreamKind::AudioSink, self.base.session(), &self.stats)
    }
}

/// Terminal component of the video topology and the pull driver of the pipeline.
///
/// On every video grid tick it issues one request into the current video
/// topology and one into the current audio topology. Both are read from the
/// same pair, which is replaced atomically on a switch.
pub struct VideoSink {
    base: ComponentBase,
    this: Weak<VideoSink>,
    audio_session: Arc<MediaSession>,
    clock: Arc<PresentationClock>,
    scheduler: CallbackScheduler,
    pair: Mutex<Option<TopologyPair>>,
    stats: Arc<SinkStats>,
    late_ticks: AtomicU64,
}

impl MediaComponent for VideoSink {
    fn base(&self) -> &ComponentBase {
        &self.base
    }
}

impl VideoSink {
    pub fn new(
        session: Arc<MediaSession>,
        audio_session: Arc<MediaSession>,
        pipeline: PipelineHandle,
    ) -> Arc<Self> {
        let clock = Arc::new(PresentationClock::new(session.time_source().clone()));
        let scheduler = CallbackScheduler::new(session.work_queue().clone());
        scheduler.set_pull_rate(session.frame_rate());

        let sink = Arc::new_cyclic(|this| Self {
            base: ComponentBase::new("video sink", session, pipeline),
            this: this.clone(),
            audio_session,
            clock,
            scheduler,
            pair: Mutex::new(None),
            stats: Arc::new(SinkStats::default()),
            late_ticks: AtomicU64::new(0),
        });
        let clock_sink: Arc<dyn ClockSink> = sink.clone();
        sink.clock.register_sink(&clock_sink);
        sink
    }

    pub fn presentation_clock(&self) -> &Arc<PresentationClock> {
        &self.clock
    }

    pub fn stats(&self) -> &Arc<SinkStats> {
        &self.stats
    }

    /// Ticks that were already past due when they were to be scheduled.
    pub fn late_ticks(&self) -> u64 {
        self.late_ticks.load(Ordering::Relaxed)
    }

    pub fn set_pull_rate(&self, rate: FrameRate) {
        self.scheduler.set_pull_rate(rate);
    }

    pub fn create_stream(self: &Arc<Self>, builder: &mut TopologyBuilder) -> StreamId {
        SinkStream::create(builder, StreamKind::VideoSink, self.base.session(), &self.stats)
    }

    pub fn is_started(&self) -> bool {
        self.pair.lock().is_some() && self.clock.is_running()
    }

    pub fn topologies(&self) -> Option<TopologyPair> {
        self.pair.lock().clone()
    }

    /// Install the first topology pair and start the presentation clock at `start_time`.
    pub fn start_topologies(&self, start_time: TimeUnit, video: Arc<Topology>, audio: Arc<Topology>) -> Result<(), MediaError> {
        self.install(video, audio);
        if !self.clock.clock_start(start_time) {
            self.uninstall();
            return Err(MediaError::ClockStart);
        }
        info!("Playback started at {}", start_time);
        Ok(())
    }

    /// Replace the running pair. Requests already in flight complete against the old pair
    /// and are discarded.
    pub fn switch_topologies(&self, video: Arc<Topology>, audio: Arc<Topology>) {
        let old = self.install(video, audio);
        drop(old);
        debug!("Switched topologies");
    }

    pub fn stop(&self) {
        self.uninstall();
        self.clock.clock_stop();
        info!("Playback stopped");
    }

    fn install(&self, video: Arc<Topology>, audio: Arc<Topology>) -> Option<TopologyPair> {
        let mut pair = self.pair.lock();
        self.base.session().set_current_topology(Some(&video));
        self.audio_session.set_current_topology(Some(&audio));
        pair.replace((video, audio))
    }

    fn uninstall(&self) -> Option<TopologyPair> {
        let mut pair = self.pair.lock();
        self.base.session().set_current_topology(None);
        self.audio_session.set_current_topology(None);
        pair.take()
    }

    fn pull(&self, pair: &TopologyPair, due_time: TimeUnit) {
        let (video, audio) = pair;
        for topology in [video, audio] {
            let rp = RequestPacket::new(topology, due_time);
            let terminal = topology.terminal();
            if let Err(e) = topology.stream(terminal).request_sample(&rp) {
                self.base.session().fatal(e);
            }
        }
    }
}

impl ClockSink for VideoSink {
    fn on_clock_start(&self, time: TimeUnit) -> bool {
        let (Some(this), Some(due)) = (self.this.upgrade(), self.scheduler.next_due_time(time)) else {
            return false;
        };
        CallbackScheduler::schedule_new_callback(&this, due)
    }

    fn on_clock_stop(&self, _time: TimeUnit) {
        self.scheduler.clear_queue();
    }
}

impl ScheduledSink for VideoSink {
    fn scheduler(&self) -> &CallbackScheduler {
        &self.scheduler
    }

    fn clock(&self) -> Option<Arc<PresentationClock>> {
        Some(self.clock.clone())
    }

    fn scheduled_callback(self: Arc<Self>, due_time: TimeUnit) {
        let Some(pair) = self.topologies() else {
            return;
        };
        self.pull(&pair, due_time);

        let Some(mut next) = self.scheduler.next_due_time(due_time) else {
            return;
        };
        while !CallbackScheduler::schedule_new_callback(&self, next) {
            if !self.clock.is_running() {
                return;
            }
            self.late_ticks.fetch_add(1, Ordering::Relaxed);
            let Some(after_now) = self.scheduler.next_due_time(self.clock.current_time()) else {
                return;
            };
            next = after_now;
        }
    }
}

//! End-to-end scenarios against a running pipeline.

use parking_lot::Mutex;
use std::sync::{Arc, OnceLock, Weak};
use std::time::{Duration, Instant};

use streamcast::components::{
    AudioDevice, DisplayDevice, OutputWriter, SampleEncoder, VidcapDevice, VidcapState, VideoMixerParams,
};
use streamcast::config::{AudioConfig, OutputConfig, PipelineConfig, VideoConfig};
use streamcast::control::{
    BindingInfo, ControlEvent, ControlId, GuiEventHandler, MemoryBackend, Pipeline,
    PipelineController, PipelineOptions, RecordingBackend, SelectionMode,
};
use streamcast::error::MediaError;
use streamcast::media::{MediaKind, Rect};
use streamcast::session::FatalPolicy;
use streamcast::topology::{StreamKind, Topology};

fn test_config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.video.fps_num = 10;
    config.video.fps_den = 1;
    config.video.width_frame = 64;
    config.video.height_frame = 36;
    config.audio.sample_rate = 48_000;
    config.output.output_folder = std::env::temp_dir().join("streamcast-tests");
    config
}

fn pipeline_with(backend: Arc<dyn RecordingBackend>) -> Pipeline {
    Pipeline::new(
        test_config(),
        PipelineOptions {
            fatal_policy: FatalPolicy::Record,
            worker_threads: 2,
            backend,
        },
    )
    .unwrap()
}

fn display() -> DisplayDevice {
    DisplayDevice::new(0, 0, 64, 36)
}

fn microphone() -> AudioDevice {
    AudioDevice::new("mic-1", "Microphone", true)
}

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    condition()
}

fn mixer_inputs(topology: &Topology, mixer: StreamKind) -> Vec<StreamKind> {
    let mixer = topology.streams_of_kind(mixer)[0];
    topology
        .inputs(mixer)
        .iter()
        .map(|edge| topology.stream_kind(edge.from))
        .collect()
}

/// Scene with one display and one microphone, activated.
fn running_scene(pipeline: &Pipeline) -> (ControlId, ControlId) {
    let scene = pipeline.root_scene();
    let screen = pipeline.add_display_capture(scene, "Screen", display()).unwrap().unwrap();
    let mic = pipeline.add_audio_capture(scene, "Mic", microphone()).unwrap().unwrap();
    pipeline.activate().unwrap();
    (screen, mic)
}

#[test]
fn test_preview_pulls_packets_through_both_topologies() {
    let pipeline = pipeline_with(Arc::new(MemoryBackend::new()));
    running_scene(&pipeline);

    let (video, audio) = pipeline.topologies().unwrap().unwrap();
    assert_eq!(
        mixer_inputs(&video, StreamKind::VideoMixer),
        vec![StreamKind::DisplayCapture, StreamKind::Pointer]
    );
    assert_eq!(
        mixer_inputs(&audio, StreamKind::AudioMixer),
        vec![StreamKind::AudioCapture]
    );

    let components = pipeline.components().unwrap().unwrap();
    assert!(wait_until(Duration::from_secs(5), || {
        components.video_sink.stats().packets() >= 3 && components.audio_sink.stats().packets() >= 1
    }));
    assert!(!pipeline.failure().has_failed());
}

#[test]
fn test_active_set_follows_tree_order() {
    let pipeline = pipeline_with(Arc::new(MemoryBackend::new()));
    let (screen, mic) = running_scene(&pipeline);

    let active = pipeline.active_controls().unwrap();
    assert_eq!(active.len(), 4);
    assert_eq!(active[1], pipeline.root_scene());
    assert_eq!(&active[2..], &[screen, mic]);
    assert_eq!(pipeline.build_order().unwrap(), active);
}

#[test]
fn test_recording_writes_and_finalizes() {
    let backend = Arc::new(MemoryBackend::new());
    let writer = backend.writer().clone();
    let pipeline = pipeline_with(backend);
    running_scene(&pipeline);

    pipeline.start_recording().unwrap();
    assert!(pipeline.is_recording().unwrap());
    assert!(matches!(
        pipeline.start_recording(),
        Err(MediaError::InvalidOperation(_))
    ));

    let (video, _) = pipeline.topologies().unwrap().unwrap();
    assert_eq!(video.streams_of_kind(StreamKind::VideoEncoder).len(), 1);
    assert_eq!(video.streams_of_kind(StreamKind::VideoOutput).len(), 1);

    assert!(wait_until(Duration::from_secs(5), || {
        writer.count(MediaKind::Video) > 0 && writer.count(MediaKind::Audio) > 0
    }));

    pipeline.stop_recording().unwrap();
    assert!(!pipeline.is_recording().unwrap());
    assert!(writer.is_finalized());

    let (video, _) = pipeline.topologies().unwrap().unwrap();
    assert!(video.streams_of_kind(StreamKind::VideoEncoder).is_empty());
    assert!(!pipeline.failure().has_failed());
}

struct BrokenDiskBackend;

impl RecordingBackend for BrokenDiskBackend {
    fn create_video_encoder(&self, config: &VideoConfig) -> Result<Box<dyn SampleEncoder>, MediaError> {
        MemoryBackend::new().create_video_encoder(config)
    }

    fn create_audio_encoder(&self, config: &AudioConfig) -> Result<Box<dyn SampleEncoder>, MediaError> {
        MemoryBackend::new().create_audio_encoder(config)
    }

    fn create_writer(&self, _config: &OutputConfig) -> Result<Arc<dyn OutputWriter>, MediaError> {
        Err(MediaError::Recording("disk full".into()))
    }
}

#[test]
fn test_failed_recording_keeps_preview_running() {
    let pipeline = pipeline_with(Arc::new(BrokenDiskBackend));
    running_scene(&pipeline);

    assert!(matches!(pipeline.start_recording(), Err(MediaError::Recording(_))));
    assert!(!pipeline.is_recording().unwrap());
    assert!(!pipeline.failure().has_failed());

    let components = pipeline.components().unwrap().unwrap();
    let before = components.video_sink.stats().packets();
    assert!(wait_until(Duration::from_secs(5), || {
        components.video_sink.stats().packets() > before
    }));
}

#[test]
fn test_disabling_audio_keeps_display_component() {
    let pipeline = pipeline_with(Arc::new(MemoryBackend::new()));
    let (screen, mic) = running_scene(&pipeline);
    let before = pipeline.display_component(screen).unwrap().unwrap();

    pipeline.disable(mic).unwrap();
    let after = pipeline.display_component(screen).unwrap().unwrap();
    assert!(Arc::ptr_eq(&before, &after));
    assert!(pipeline.audio_component(mic).unwrap().is_none());
    assert_eq!(pipeline.binding(mic).unwrap(), BindingInfo::Detached);

    let (_, audio) = pipeline.topologies().unwrap().unwrap();
    assert_eq!(mixer_inputs(&audio, StreamKind::AudioMixer), vec![StreamKind::EmptyAudio]);

    pipeline.enable(mic).unwrap();
    assert!(pipeline.audio_component(mic).unwrap().is_some());
}

#[test]
fn test_same_display_twice_is_shared() {
    let pipeline = pipeline_with(Arc::new(MemoryBackend::new()));
    let scene = pipeline.root_scene();
    let first = pipeline.add_display_capture(scene, "Left", display()).unwrap().unwrap();
    let second = pipeline.add_display_capture(scene, "Right", display()).unwrap().unwrap();
    pipeline.activate().unwrap();

    assert_eq!(pipeline.binding(first).unwrap(), BindingInfo::Owned);
    assert_eq!(pipeline.binding(second).unwrap(), BindingInfo::Reference { owner: first });
    let a = pipeline.display_component(first).unwrap().unwrap();
    let b = pipeline.display_component(second).unwrap().unwrap();
    assert!(Arc::ptr_eq(&a, &b));

    // Both controls connect the same capture and pointer streams.
    let (video, _) = pipeline.topologies().unwrap().unwrap();
    assert_eq!(video.streams_of_kind(StreamKind::DisplayCapture).len(), 1);
    assert_eq!(mixer_inputs(&video, StreamKind::VideoMixer).len(), 4);

    // The reference survives its owner going away.
    pipeline.disable(first).unwrap();
    let survivor = pipeline.display_component(second).unwrap().unwrap();
    assert!(Arc::ptr_eq(&a, &survivor));
    assert_eq!(pipeline.binding(second).unwrap(), BindingInfo::Owned);
}

#[test]
fn test_lost_display_is_recreated() {
    let pipeline = pipeline_with(Arc::new(MemoryBackend::new()));
    let (screen, _) = running_scene(&pipeline);
    let broken = pipeline.display_component(screen).unwrap().unwrap();

    broken.mark_broken();
    assert!(wait_until(Duration::from_secs(5), || {
        pipeline
            .display_component(screen)
            .unwrap()
            .is_some_and(|current| !Arc::ptr_eq(&current, &broken))
    }));
    let current = pipeline.display_component(screen).unwrap().unwrap();
    assert!(!current.is_broken());
    assert!(!pipeline.failure().has_failed());
}

#[test]
fn test_staged_params_apply_on_next_activation() {
    let pipeline = pipeline_with(Arc::new(MemoryBackend::new()));
    let (screen, _) = running_scene(&pipeline);
    let before = pipeline.display_component(screen).unwrap().unwrap();

    pipeline.set_display_params(screen, DisplayDevice::new(0, 1, 64, 36)).unwrap();
    let staged = pipeline.display_component(screen).unwrap().unwrap();
    assert!(Arc::ptr_eq(&before, &staged));

    pipeline.activate().unwrap();
    let after = pipeline.display_component(screen).unwrap().unwrap();
    assert!(!Arc::ptr_eq(&before, &after));
    assert_eq!(after.device().output_ordinal, 1);
}

#[test]
fn test_mixer_params_do_not_rebuild() {
    let pipeline = pipeline_with(Arc::new(MemoryBackend::new()));
    let (screen, _) = running_scene(&pipeline);
    let (video, _) = pipeline.topologies().unwrap().unwrap();

    let params = VideoMixerParams::placed(Rect::new(0.0, 0.0, 64.0, 36.0), Rect::new(0.0, 0.0, 32.0, 18.0));
    pipeline.set_video_mixer_params(screen, params).unwrap();

    let (current, _) = pipeline.topologies().unwrap().unwrap();
    assert_eq!(video.id(), current.id());
}

#[test]
fn test_switch_scene_moves_shared_display() {
    let pipeline = pipeline_with(Arc::new(MemoryBackend::new()));
    let root = pipeline.root_scene();
    let first = pipeline.add_scene(root, "First").unwrap().unwrap();
    let second = pipeline.add_scene(root, "Second").unwrap().unwrap();
    let a = pipeline.add_display_capture(first, "Screen", display()).unwrap().unwrap();
    let b = pipeline.add_display_capture(second, "Screen", display()).unwrap().unwrap();
    pipeline.disable(second).unwrap();

    pipeline.switch_scene(root, first).unwrap();
    let component = pipeline.display_component(a).unwrap().unwrap();
    assert!(pipeline.display_component(b).unwrap().is_none());

    pipeline.switch_scene(root, second).unwrap();
    let active = pipeline.active_controls().unwrap();
    assert!(active.contains(&b));
    assert!(!active.contains(&a));
    assert!(!active.contains(&first));

    let moved = pipeline.display_component(b).unwrap().unwrap();
    assert!(Arc::ptr_eq(&component, &moved));
    assert!(pipeline.display_component(a).unwrap().is_none());

    assert!(matches!(
        pipeline.switch_scene(first, second),
        Err(MediaError::InvalidOperation(_))
    ));
}

#[test]
fn test_remove_control_falls_back_to_empty_source() {
    let pipeline = pipeline_with(Arc::new(MemoryBackend::new()));
    let (screen, _) = running_scene(&pipeline);

    pipeline.remove_control(screen).unwrap();
    let (video, _) = pipeline.topologies().unwrap().unwrap();
    assert_eq!(mixer_inputs(&video, StreamKind::VideoMixer), vec![StreamKind::EmptyVideo]);
    assert!(matches!(
        pipeline.binding(screen),
        Err(MediaError::UnknownControl(_))
    ));
    assert!(matches!(
        pipeline.remove_control(pipeline.root_scene()),
        Err(MediaError::InvalidOperation(_))
    ));
}

#[test]
fn test_removed_control_leaves_nothing_behind() {
    let pipeline = pipeline_with(Arc::new(MemoryBackend::new()));
    let (screen, mic) = running_scene(&pipeline);

    let (old_video, old_audio) = pipeline.topologies().unwrap().unwrap();
    let old_video_id = old_video.id();
    let old_video: Weak<Topology> = Arc::downgrade(&old_video);
    let old_audio: Weak<Topology> = Arc::downgrade(&old_audio);
    let component = Arc::downgrade(&pipeline.display_component(screen).unwrap().unwrap());

    pipeline.remove_control(screen).unwrap();

    // In-flight pulls only hold weak references, so the old pair goes away
    // once the sink has switched.
    assert!(wait_until(Duration::from_secs(5), || {
        old_video.upgrade().is_none() && old_audio.upgrade().is_none()
    }));
    assert!(wait_until(Duration::from_secs(5), || component.upgrade().is_none()));

    let order = pipeline.build_order().unwrap();
    assert!(!order.contains(&screen));
    assert!(order.contains(&mic));

    let (video, audio) = pipeline.topologies().unwrap().unwrap();
    assert_ne!(video.id(), old_video_id);
    assert!(video.streams_of_kind(StreamKind::DisplayCapture).is_empty());
    assert!(video.streams_of_kind(StreamKind::Pointer).is_empty());
    assert_eq!(mixer_inputs(&audio, StreamKind::AudioMixer), vec![StreamKind::AudioCapture]);
    assert!(!pipeline.failure().has_failed());
}

#[test]
fn test_webcam_drops_out_while_unplugged() {
    let pipeline = pipeline_with(Arc::new(MemoryBackend::new()));
    let scene = pipeline.root_scene();
    pipeline.add_display_capture(scene, "Screen", display()).unwrap().unwrap();
    let device = VidcapDevice::new("Webcam", r"\\?\usb#cam_1", 32, 24);
    let cam = pipeline.add_vidcap_capture(scene, "Cam", device.clone()).unwrap().unwrap();
    let copy = pipeline
        .add_vidcap_capture(scene, "Cam copy", VidcapDevice::new("Webcam", r"\\?\USB#CAM_1", 32, 24))
        .unwrap()
        .unwrap();
    pipeline.activate().unwrap();

    assert_eq!(pipeline.video_mixer_params(cam).unwrap(), device.default_placement());
    assert_eq!(pipeline.binding(copy).unwrap(), BindingInfo::Reference { owner: cam });

    let (video, _) = pipeline.topologies().unwrap().unwrap();
    assert_eq!(video.streams_of_kind(StreamKind::VidcapCapture).len(), 1);
    assert_eq!(
        mixer_inputs(&video, StreamKind::VideoMixer),
        vec![
            StreamKind::DisplayCapture,
            StreamKind::Pointer,
            StreamKind::VidcapCapture,
            StreamKind::VidcapCapture,
        ]
    );

    let webcam = pipeline.vidcap_component(cam).unwrap().unwrap();
    webcam.device_removed();
    assert_eq!(webcam.state(), VidcapState::WaitingForDevice);
    assert!(wait_until(Duration::from_secs(5), || {
        let (video, _) = pipeline.topologies().unwrap().unwrap();
        video.streams_of_kind(StreamKind::VidcapCapture).is_empty()
    }));
    // Still the same component, only without a stream.
    let waiting = pipeline.vidcap_component(cam).unwrap().unwrap();
    assert!(Arc::ptr_eq(&webcam, &waiting));

    webcam.device_arrived();
    assert!(wait_until(Duration::from_secs(5), || {
        let (video, _) = pipeline.topologies().unwrap().unwrap();
        video.streams_of_kind(StreamKind::VidcapCapture).len() == 1
    }));
    assert!(!pipeline.failure().has_failed());
}

#[test]
fn test_duplicate_names_are_rejected() {
    let pipeline = pipeline_with(Arc::new(MemoryBackend::new()));
    let scene = pipeline.root_scene();
    assert!(pipeline.add_display_capture(scene, "Screen", display()).unwrap().is_some());
    assert!(pipeline.add_audio_capture(scene, "Screen", microphone()).unwrap().is_none());

    let mic = pipeline.add_audio_capture(scene, "Mic", microphone()).unwrap().unwrap();
    assert!(!pipeline.rename_control(mic, "Screen").unwrap());
    assert!(pipeline.rename_control(mic, "Headset").unwrap());
}

#[derive(Default)]
struct Recorder {
    pipeline: OnceLock<PipelineController>,
    events: Mutex<Vec<ControlEvent>>,
    selections_seen: Mutex<Vec<Vec<ControlId>>>,
}

impl GuiEventHandler for Recorder {
    fn on_activate(&self, id: ControlId, deactivated: bool) {
        self.events.lock().push(ControlEvent::Activated { id, deactivated });
        // Calling back into the pipeline from a handler must not deadlock.
        if let Some(pipeline) = self.pipeline.get() {
            if let Ok(selection) = pipeline.selected_controls() {
                self.selections_seen.lock().push(selection);
            }
        }
    }

    fn on_control_added(&self, id: ControlId, removed: bool, parent: ControlId) {
        self.events.lock().push(ControlEvent::ControlAdded { id, removed, parent });
    }

    fn on_control_selection_changed(&self, selection: &[ControlId]) {
        self.events.lock().push(ControlEvent::SelectionChanged {
            selection: selection.to_vec(),
        });
    }
}

#[test]
fn test_handlers_observe_events_and_may_reenter() {
    let pipeline = pipeline_with(Arc::new(MemoryBackend::new()));
    let recorder = Arc::new(Recorder::default());
    let _ = recorder.pipeline.set(pipeline.controller());
    let subscription = pipeline.subscribe(recorder.clone());

    let scene = pipeline.root_scene();
    let screen = pipeline.add_display_capture(scene, "Screen", display()).unwrap().unwrap();
    pipeline.set_selected_control(Some(screen), SelectionMode::Set).unwrap();
    pipeline.activate().unwrap();

    let events = recorder.events.lock().clone();
    assert_eq!(events[0], ControlEvent::ControlAdded { id: screen, removed: false, parent: scene });
    assert_eq!(events[1], ControlEvent::SelectionChanged { selection: vec![screen] });
    // Children report before their scene, the root last.
    let activated: Vec<_> = events[2..].to_vec();
    assert_eq!(activated[0], ControlEvent::Activated { id: screen, deactivated: false });
    assert_eq!(activated[1], ControlEvent::Activated { id: scene, deactivated: false });
    assert_eq!(activated.len(), 3);
    assert!(recorder.selections_seen.lock().iter().all(|s| s == &vec![screen]));
    assert_eq!(recorder.selections_seen.lock().len(), 3);

    assert!(pipeline.unsubscribe(subscription));
    pipeline.set_selected_control(None, SelectionMode::Clear).unwrap();
    assert_eq!(recorder.events.lock().len(), events.len());
    assert!(pipeline.selected_controls().unwrap().is_empty());
}

#[test]
fn test_shutdown_releases_components() {
    let pipeline = pipeline_with(Arc::new(MemoryBackend::new()));
    let (screen, _) = running_scene(&pipeline);

    pipeline.shutdown().unwrap();
    assert!(pipeline.components().unwrap().is_none());
    assert!(pipeline.display_component(screen).unwrap().is_none());
    assert!(pipeline.active_controls().unwrap().is_empty());
}

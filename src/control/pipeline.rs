//! The pipeline facade
//!
//! [`Pipeline`] owns the worker runtime, the control thread and the control
//! tree. Every operation is marshalled onto the control thread, runs with
//! the tree locked, and delivers its events after the lock is released.
//! Any error escaping an activation is fatal and goes to the
//! [`FailureState`] together with a snapshot of the tree.

use parking_lot::{Mutex, ReentrantMutex};
use serde::Serialize;
use std::cell::RefCell;
use std::ops::Deref;
use std::sync::{Arc, Weak};
use tracing::{debug, error, info, warn};

use super::activation::{activate_control, ActivationContext};
use super::backend::{FileBackend, RecordingBackend};
use super::events::{ControlEvent, GuiEventHandler, GuiEventProvider, SubscriptionId};
use super::root::{build_topologies, PipelineComponents, RecordingChain, RootEnv};
use super::thread::ControlThread;
use super::tree::{
    BindingInfo, ControlId, ControlKind, ControlTree, ControlType, SceneControl, SourceControl,
};
use crate::components::{
    AudioCaptureSource, AudioDevice, AudioMixerParams, ContextMutex, DisplayCaptureSource,
    DisplayDevice, PipelineHandle, Reactivate, SinkStatsSnapshot, VidcapCaptureSource,
    VidcapDevice, VideoMixerParams,
};
use crate::config::PipelineConfig;
use crate::crash::log_critical_operation;
use crate::error::MediaError;
use crate::session::{FailureState, FatalPolicy, WorkQueue};
use crate::topology::{Topology, TopologySnapshot};

pub struct PipelineOptions {
    pub fatal_policy: FatalPolicy,
    pub worker_threads: usize,
    pub backend: Arc<dyn RecordingBackend>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            fatal_policy: FatalPolicy::Abort,
            worker_threads: 2,
            backend: Arc::new(FileBackend),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionMode {
    /// Add to the current selection
    Add,
    /// Replace the current selection
    Set,
    /// Empty the selection; the id is ignored
    Clear,
}

#[derive(Debug, Clone, Serialize)]
pub struct ControlSnapshot {
    pub id: ControlId,
    pub name: String,
    pub parent: Option<ControlId>,
    pub control_type: ControlType,
    pub disabled: bool,
    #[serde(flatten)]
    pub binding: BindingInfo,
}

/// Serializable state of the whole pipeline, used for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineSnapshot {
    pub active: Vec<ControlId>,
    pub build_order: Vec<ControlId>,
    pub selection: Vec<ControlId>,
    pub recording: bool,
    pub failure: Option<String>,
    pub controls: Vec<ControlSnapshot>,
    pub video: Option<TopologySnapshot>,
    pub audio: Option<TopologySnapshot>,
    pub video_stats: Option<SinkStatsSnapshot>,
    pub audio_stats: Option<SinkStatsSnapshot>,
}

pub(crate) struct PipelineInner {
    this: Weak<PipelineInner>,
    tree: ReentrantMutex<RefCell<ControlTree>>,
    config: Mutex<PipelineConfig>,
    events: GuiEventProvider,
    control_thread: ControlThread,
    work_queue: WorkQueue,
    failure: Arc<FailureState>,
    backend: Arc<dyn RecordingBackend>,
    context: ContextMutex,
    root_scene: ControlId,
}

impl Reactivate for PipelineInner {
    fn request_activation(&self) {
        let this = self.this.clone();
        let posted = self.control_thread.post(move || {
            if let Some(inner) = this.upgrade() {
                if let Err(e) = inner.activate() {
                    error!("Requested activation failed: {}", e);
                }
            }
        });
        if let Err(e) = posted {
            debug!("Dropping activation request: {}", e);
        }
    }
}

impl PipelineInner {
    fn handle(&self) -> PipelineHandle {
        let this: Weak<dyn Reactivate> = self.this.clone();
        PipelineHandle::new(this)
    }

    fn root_env<'a>(&'a self, config: &'a PipelineConfig) -> RootEnv<'a> {
        RootEnv {
            config,
            backend: self.backend.as_ref(),
            pipeline: self.handle(),
            context: &self.context,
            work_queue: &self.work_queue,
            failure: &self.failure,
        }
    }

    /// Run `f` with the tree locked, then deliver the events it produced.
    fn run<R>(
        &self,
        f: impl FnOnce(&mut ControlTree) -> Result<(R, Vec<ControlEvent>), MediaError>,
    ) -> Result<R, MediaError> {
        let output = {
            let guard = self.tree.lock();
            let mut tree = guard
                .try_borrow_mut()
                .map_err(|_| MediaError::InvalidOperation("control tree is already being modified".into()))?;
            let output = f(&mut *tree);
            output
        };
        let (result, events) = output?;
        self.events.dispatch(&events);
        Ok(result)
    }

    fn read<R>(&self, f: impl FnOnce(&ControlTree) -> Result<R, MediaError>) -> Result<R, MediaError> {
        let guard = self.tree.lock();
        let tree = guard
            .try_borrow()
            .map_err(|_| MediaError::InvalidOperation("control tree is being modified".into()))?;
        let output = f(&*tree);
        output
    }

    /// Errors from `f` are fatal to the pipeline.
    fn guarded<R>(
        &self,
        tree: &mut ControlTree,
        f: impl FnOnce(&mut ControlTree) -> Result<R, MediaError>,
    ) -> Result<R, MediaError> {
        match f(tree) {
            Ok(value) => Ok(value),
            Err(e) => {
                let snapshot = serde_json::to_value(self.snapshot_of(tree)).ok();
                self.failure.report_with_snapshot(&e, snapshot);
                Err(e)
            }
        }
    }

    /// One pass over the tree from the pipeline root.
    fn activation_pass(&self, tree: &mut ControlTree) -> Result<Vec<ControlEvent>, MediaError> {
        let config = self.config.lock().clone();
        let env = self.root_env(&config);
        let root = tree.root();
        let scene = tree.root_control()?.scene();
        let mut cx = ActivationContext::new(tree.active.clone());

        if tree.node(root)?.disabled {
            cx.force_disabled = true;
            activate_control(tree, scene, &mut cx)?;
            tree.root_control_mut()?.deactivate_components();
            tree.active = cx.new_set;
            cx.events.push(ControlEvent::Activated { id: root, deactivated: true });
            return Ok(cx.events);
        }

        cx.new_set.push(root);
        cx.env = Some(tree.root_control_mut()?.activate_components(&env)?);
        activate_control(tree, scene, &mut cx)?;
        debug!("Activation pass visited {} controls", cx.new_set.len());
        tree.active = cx.new_set;
        cx.events.push(ControlEvent::Activated { id: root, deactivated: false });
        Ok(cx.events)
    }

    /// Build topologies from the active set and hand them to the video sink.
    fn switch_topology(&self, tree: &mut ControlTree) -> Result<(), MediaError> {
        let Some(components) = tree.root_control()?.components().cloned() else {
            tree.build_order.clear();
            return Ok(());
        };

        let (video, audio) = build_topologies(tree)?;
        if components.video_sink.is_started() {
            components.video_sink.switch_topologies(video, audio);
        } else {
            log_critical_operation("starting media clock");
            let start = components.time_source.now();
            components.video_sink.start_topologies(start, video, audio)?;
        }

        for chain in tree.root_control_mut()?.retired.drain(..) {
            chain.finish();
        }
        Ok(())
    }

    fn activate_locked(&self, tree: &mut ControlTree) -> Result<Vec<ControlEvent>, MediaError> {
        self.guarded(tree, |tree| {
            let events = self.activation_pass(tree)?;
            self.switch_topology(tree)?;
            Ok(events)
        })
    }

    fn activate_if_active(&self, tree: &mut ControlTree, id: ControlId) -> Result<Vec<ControlEvent>, MediaError> {
        if tree.active.contains(&id) {
            self.activate_locked(tree)
        } else {
            Ok(Vec::new())
        }
    }

    pub(crate) fn activate(&self) -> Result<(), MediaError> {
        self.run(|tree| Ok(((), self.activate_locked(tree)?)))
    }

    fn add_control(&self, parent: ControlId, name: &str, kind: ControlKind) -> Result<Option<ControlId>, MediaError> {
        self.run(|tree| {
            let id = tree.add_child(parent, name, kind)?;
            let events = match id {
                Some(id) => {
                    debug!("Added control '{}' ({}) to {}", name, id, parent);
                    vec![ControlEvent::ControlAdded { id, removed: false, parent }]
                }
                None => Vec::new(),
            };
            Ok((id, events))
        })
    }

    fn remove_control(&self, id: ControlId) -> Result<(), MediaError> {
        self.run(|tree| {
            let was_active = tree.active.contains(&id);
            let removed = tree.remove(id)?;
            let mut events: Vec<_> = removed
                .iter()
                .map(|&(id, parent)| ControlEvent::ControlAdded { id, removed: true, parent })
                .collect();
            if was_active {
                events.extend(self.activate_locked(tree)?);
            }
            Ok(((), events))
        })
    }

    fn move_control(&self, id: ControlId, position: usize) -> Result<(), MediaError> {
        self.run(|tree| {
            tree.move_to(id, position)?;
            Ok(((), self.activate_if_active(tree, id)?))
        })
    }

    fn set_disabled(&self, id: ControlId, disabled: bool) -> Result<(), MediaError> {
        self.run(|tree| {
            tree.node_mut(id)?.disabled = disabled;
            Ok(((), self.activate_locked(tree)?))
        })
    }

    /// Release `id` for one activation without remembering it as disabled.
    fn deactivate(&self, id: ControlId) -> Result<(), MediaError> {
        self.run(|tree| {
            let previous = std::mem::replace(&mut tree.node_mut(id)?.disabled, true);
            let events = self.activate_locked(tree);
            tree.node_mut(id)?.disabled = previous;
            Ok(((), events?))
        })
    }

    fn switch_scene(&self, parent: ControlId, scene: ControlId) -> Result<(), MediaError> {
        self.run(|tree| {
            if !tree.scene(parent)?.contains(scene) {
                return Err(MediaError::InvalidOperation(format!("{} is not a child of {}", scene, parent)));
            }
            tree.scene(scene)?;

            let old = tree.scene(parent)?.current_scene;
            if old == Some(scene) {
                return Ok(((), Vec::new()));
            }

            // Enable the new scene first so the components both scenes use survive.
            let mut events = self.guarded(tree, |tree| {
                tree.node_mut(scene)?.disabled = false;
                let mut events = self.activation_pass(tree)?;
                if let Some(old) = old {
                    tree.node_mut(old)?.disabled = true;
                    events.extend(self.activation_pass(tree)?);
                }
                self.switch_topology(tree)?;
                Ok(events)
            })?;

            tree.scene_mut(parent)?.current_scene = Some(scene);
            events.push(ControlEvent::SceneActivated { scene, deactivated: false });
            if let Some(old) = old {
                events.push(ControlEvent::SceneActivated { scene: old, deactivated: true });
            }
            info!("Switched scene {} -> {}", parent, scene);
            Ok(((), events))
        })
    }

    fn set_selected_control(&self, id: Option<ControlId>, mode: SelectionMode) -> Result<(), MediaError> {
        self.run(|tree| {
            if let Some(id) = id {
                tree.node(id)?;
            }
            match (mode, id) {
                (SelectionMode::Clear, _) => tree.selection.clear(),
                (SelectionMode::Set, id) => {
                    tree.selection.clear();
                    tree.selection.extend(id);
                }
                (SelectionMode::Add, Some(id)) => {
                    if !tree.selection.contains(&id) {
                        tree.selection.push(id);
                    }
                }
                (SelectionMode::Add, None) => {}
            }
            let selection = tree.selection.clone();
            Ok(((), vec![ControlEvent::SelectionChanged { selection }]))
        })
    }

    fn start_recording(&self) -> Result<(), MediaError> {
        self.run(|tree| {
            if tree.node(tree.root())?.disabled {
                return Err(MediaError::Recording("pipeline is disabled".into()));
            }
            let config = self.config.lock().clone();
            let env = self.root_env(&config);

            let root = tree.root_control_mut()?;
            if root.recording {
                return Err(MediaError::InvalidOperation("already recording".into()));
            }
            let components = root
                .components
                .as_mut()
                .ok_or_else(|| MediaError::Recording("pipeline is not active".into()))?;

            // Failing here leaves the preview untouched.
            log_critical_operation("creating recording chain");
            let chain = RecordingChain::create(components, &env)?;
            components.recording = Some(chain);
            root.recording = true;

            let events = self.activate_locked(tree)?;
            info!("Recording started");
            Ok(((), events))
        })
    }

    fn stop_recording(&self) -> Result<(), MediaError> {
        self.run(|tree| {
            let root = tree.root_control_mut()?;
            if !root.recording {
                return Ok(((), Vec::new()));
            }
            root.recording = false;
            let events = self.activate_locked(tree)?;
            info!("Recording stopped");
            Ok(((), events))
        })
    }

    fn apply_config(&self, config: PipelineConfig) -> Result<(), MediaError> {
        config.validate()?;
        self.run(|tree| {
            *self.config.lock() = config;
            tree.root_control_mut()?.restart_requested = true;
            let events = if tree.node(tree.root())?.disabled {
                Vec::new()
            } else {
                self.activate_locked(tree)?
            };
            Ok(((), events))
        })
    }

    fn shutdown(&self) -> Result<(), MediaError> {
        self.run(|tree| {
            let root = tree.root();
            tree.node_mut(root)?.disabled = true;
            let events = self.activate_locked(tree)?;
            info!("Pipeline shut down");
            Ok(((), events))
        })
    }

    fn snapshot_of(&self, tree: &ControlTree) -> PipelineSnapshot {
        let root = tree.root_control().ok();
        let components = root.and_then(|root| root.components());
        let pair = components.and_then(|c| c.video_sink.topologies());

        PipelineSnapshot {
            active: tree.active.clone(),
            build_order: tree.build_order.clone(),
            selection: tree.selection.clone(),
            recording: root.map_or(false, |root| root.is_recording()),
            failure: self.failure.reason(),
            controls: tree
                .ids()
                .filter_map(|id| {
                    let node = tree.node(id).ok()?;
                    Some(ControlSnapshot {
                        id,
                        name: node.name.clone(),
                        parent: node.parent,
                        control_type: node.kind.control_type(),
                        disabled: node.disabled,
                        binding: node.kind.binding_info(),
                    })
                })
                .collect(),
            video: pair.as_ref().map(|(video, _)| video.snapshot()),
            audio: pair.as_ref().map(|(_, audio)| audio.snapshot()),
            video_stats: components.map(|c| c.video_sink.stats().snapshot()),
            audio_stats: components.map(|c| c.audio_sink.stats().snapshot()),
        }
    }
}

/// Cloneable handle to a pipeline. Calls block until the control thread ran them.
#[derive(Clone)]
pub struct PipelineController {
    inner: Arc<PipelineInner>,
}

impl PipelineController {
    fn invoke<R, F>(&self, job: F) -> Result<R, MediaError>
    where
        R: Send + 'static,
        F: FnOnce(&PipelineInner) -> Result<R, MediaError> + Send + 'static,
    {
        let inner = self.inner.clone();
        self.inner.control_thread.invoke(move || job(&inner))?
    }

    pub fn root_scene(&self) -> ControlId {
        self.inner.root_scene
    }

    pub fn failure(&self) -> &Arc<FailureState> {
        &self.inner.failure
    }

    pub fn subscribe(&self, handler: Arc<dyn GuiEventHandler>) -> SubscriptionId {
        self.inner.events.subscribe(handler)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.events.unsubscribe(id)
    }

    pub fn activate(&self) -> Result<(), MediaError> {
        self.invoke(|inner| inner.activate())
    }

    /// Returns `None` when a sibling already has `name`.
    pub fn add_scene(&self, parent: ControlId, name: &str) -> Result<Option<ControlId>, MediaError> {
        let name = name.to_string();
        self.invoke(move |inner| inner.add_control(parent, &name, ControlKind::Scene(SceneControl::default())))
    }

    pub fn add_display_capture(&self, scene: ControlId, name: &str, device: DisplayDevice) -> Result<Option<ControlId>, MediaError> {
        let name = name.to_string();
        self.invoke(move |inner| {
            inner.add_control(scene, &name, ControlKind::DisplayCapture(SourceControl::new(device)))
        })
    }

    /// Add a webcam placed at its native size, offset from the canvas origin.
    pub fn add_vidcap_capture(&self, scene: ControlId, name: &str, device: VidcapDevice) -> Result<Option<ControlId>, MediaError> {
        let name = name.to_string();
        self.invoke(move |inner| {
            let placement = device.default_placement();
            let control = SourceControl::with_mixer_params(device, placement);
            inner.add_control(scene, &name, ControlKind::VidcapCapture(control))
        })
    }

    pub fn add_audio_capture(&self, scene: ControlId, name: &str, device: AudioDevice) -> Result<Option<ControlId>, MediaError> {
        let name = name.to_string();
        self.invoke(move |inner| {
            inner.add_control(scene, &name, ControlKind::AudioCapture(SourceControl::new(device)))
        })
    }

    pub fn remove_control(&self, id: ControlId) -> Result<(), MediaError> {
        self.invoke(move |inner| inner.remove_control(id))
    }

    /// Move `id` to `position` among its siblings.
    pub fn move_control(&self, id: ControlId, position: usize) -> Result<(), MediaError> {
        self.invoke(move |inner| inner.move_control(id, position))
    }

    /// Returns false when a sibling already has `name`.
    pub fn rename_control(&self, id: ControlId, name: &str) -> Result<bool, MediaError> {
        let name = name.to_string();
        self.invoke(move |inner| inner.run(|tree| Ok((tree.rename(id, &name)?, Vec::new()))))
    }

    /// Stage new device parameters; they apply on the next activation.
    pub fn set_display_params(&self, id: ControlId, device: DisplayDevice) -> Result<(), MediaError> {
        self.invoke(move |inner| {
            inner.run(|tree| {
                tree.display_mut(id)?.new_params = Some(device);
                Ok(((), Vec::new()))
            })
        })
    }

    /// Staging a different device also resets the canvas placement.
    pub fn set_vidcap_params(&self, id: ControlId, device: VidcapDevice) -> Result<(), MediaError> {
        self.invoke(move |inner| {
            inner.run(|tree| {
                let control = tree.vidcap_mut(id)?;
                if !control.params().same_link(&device) {
                    control.new_params = Some(device);
                }
                Ok(((), Vec::new()))
            })
        })
    }

    pub fn set_audio_params(&self, id: ControlId, device: AudioDevice) -> Result<(), MediaError> {
        self.invoke(move |inner| {
            inner.run(|tree| {
                tree.audio_mut(id)?.new_params = Some(device);
                Ok(((), Vec::new()))
            })
        })
    }

    /// Change where a display or webcam lands on the canvas. Takes effect on the next mix.
    pub fn set_video_mixer_params(&self, id: ControlId, params: VideoMixerParams) -> Result<(), MediaError> {
        self.invoke(move |inner| {
            inner.read(|tree| {
                tree.video_mixer_params(id)?.set(params);
                Ok(())
            })
        })
    }

    pub fn set_audio_mixer_params(&self, id: ControlId, params: AudioMixerParams) -> Result<(), MediaError> {
        self.invoke(move |inner| {
            inner.read(|tree| {
                tree.audio(id)?.mixer_params().set(params);
                Ok(())
            })
        })
    }

    pub fn disable(&self, id: ControlId) -> Result<(), MediaError> {
        self.invoke(move |inner| inner.set_disabled(id, true))
    }

    pub fn enable(&self, id: ControlId) -> Result<(), MediaError> {
        self.invoke(move |inner| inner.set_disabled(id, false))
    }

    pub fn deactivate(&self, id: ControlId) -> Result<(), MediaError> {
        self.invoke(move |inner| inner.deactivate(id))
    }

    pub fn switch_scene(&self, parent: ControlId, scene: ControlId) -> Result<(), MediaError> {
        self.invoke(move |inner| inner.switch_scene(parent, scene))
    }

    pub fn set_selected_control(&self, id: Option<ControlId>, mode: SelectionMode) -> Result<(), MediaError> {
        self.invoke(move |inner| inner.set_selected_control(id, mode))
    }

    pub fn selected_controls(&self) -> Result<Vec<ControlId>, MediaError> {
        self.invoke(|inner| inner.read(|tree| Ok(tree.selection.clone())))
    }

    pub fn start_recording(&self) -> Result<(), MediaError> {
        self.invoke(|inner| inner.start_recording())
    }

    pub fn stop_recording(&self) -> Result<(), MediaError> {
        self.invoke(|inner| inner.stop_recording())
    }

    pub fn is_recording(&self) -> Result<bool, MediaError> {
        self.invoke(|inner| inner.read(|tree| Ok(tree.root_control()?.is_recording())))
    }

    pub fn apply_config(&self, config: PipelineConfig) -> Result<(), MediaError> {
        self.invoke(move |inner| inner.apply_config(config))
    }

    pub fn config(&self) -> PipelineConfig {
        self.inner.config.lock().clone()
    }

    pub fn shutdown(&self) -> Result<(), MediaError> {
        self.invoke(|inner| inner.shutdown())
    }

    pub fn active_controls(&self) -> Result<Vec<ControlId>, MediaError> {
        self.invoke(|inner| inner.read(|tree| Ok(tree.active.clone())))
    }

    pub fn build_order(&self) -> Result<Vec<ControlId>, MediaError> {
        self.invoke(|inner| inner.read(|tree| Ok(tree.build_order.clone())))
    }

    pub fn binding(&self, id: ControlId) -> Result<BindingInfo, MediaError> {
        self.invoke(move |inner| inner.read(|tree| Ok(tree.node(id)?.kind.binding_info())))
    }

    pub fn display_component(&self, id: ControlId) -> Result<Option<Arc<DisplayCaptureSource>>, MediaError> {
        self.invoke(move |inner| inner.read(|tree| Ok(tree.display(id)?.binding().component().cloned())))
    }

    pub fn vidcap_component(&self, id: ControlId) -> Result<Option<Arc<VidcapCaptureSource>>, MediaError> {
        self.invoke(move |inner| inner.read(|tree| Ok(tree.vidcap(id)?.binding().component().cloned())))
    }

    pub fn video_mixer_params(&self, id: ControlId) -> Result<VideoMixerParams, MediaError> {
        self.invoke(move |inner| inner.read(|tree| Ok(tree.video_mixer_params(id)?.get())))
    }

    pub fn audio_component(&self, id: ControlId) -> Result<Option<Arc<AudioCaptureSource>>, MediaError> {
        self.invoke(move |inner| inner.read(|tree| Ok(tree.audio(id)?.binding().component().cloned())))
    }

    pub fn components(&self) -> Result<Option<PipelineComponents>, MediaError> {
        self.invoke(|inner| inner.read(|tree| Ok(tree.root_control()?.components().cloned())))
    }

    /// The video and audio topologies currently driven by the sink.
    pub fn topologies(&self) -> Result<Option<(Arc<Topology>, Arc<Topology>)>, MediaError> {
        Ok(self
            .components()?
            .and_then(|components| components.video_sink.topologies()))
    }

    pub fn snapshot(&self) -> Result<PipelineSnapshot, MediaError> {
        self.invoke(|inner| inner.read(|tree| Ok(inner.snapshot_of(tree))))
    }
}

/// A running pipeline. Dropping it shuts the pipeline down.
pub struct Pipeline {
    controller: PipelineController,
    runtime: Option<tokio::runtime::Runtime>,
}

impl Pipeline {
    pub fn new(config: PipelineConfig, options: PipelineOptions) -> Result<Self, MediaError> {
        config.validate()?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(options.worker_threads.max(1))
            .thread_name("streamcast-worker")
            .enable_all()
            .build()
            .map_err(|e| MediaError::Runtime(e.to_string()))?;
        let control_thread = ControlThread::spawn("streamcast-control")?;

        let tree = ControlTree::new();
        let root_scene = tree.root_scene();
        let work_queue = WorkQueue::new(runtime.handle().clone());

        let inner = Arc::new_cyclic(|this| PipelineInner {
            this: this.clone(),
            tree: ReentrantMutex::new(RefCell::new(tree)),
            config: Mutex::new(config),
            events: GuiEventProvider::new(),
            control_thread,
            work_queue,
            failure: FailureState::new(options.fatal_policy),
            backend: options.backend,
            context: ContextMutex::default(),
            root_scene,
        });
        info!("Pipeline created ({} worker threads)", options.worker_threads.max(1));

        Ok(Self {
            controller: PipelineController { inner },
            runtime: Some(runtime),
        })
    }

    pub fn controller(&self) -> PipelineController {
        self.controller.clone()
    }
}

impl Deref for Pipeline {
    type Target = PipelineController;

    fn deref(&self) -> &Self::Target {
        &self.controller
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        if let Err(e) = self.controller.shutdown() {
            warn!("Pipeline shutdown failed: {}", e);
        }
        self.controller.inner.control_thread.shutdown();
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

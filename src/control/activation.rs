//! One activation pass over the control tree
//!
//! Controls are visited depth first from the pipeline root. Each enabled
//! control appends itself to the new active set; a source control first
//! looks for an identical component among the controls already visited in
//! this pass (and becomes a reference to it), then among the controls of
//! the previous pass (and keeps it), and only then creates a component.

use std::fmt;
use std::sync::Arc;
use tracing::debug;

use super::events::ControlEvent;
use super::tree::{Binding, ControlId, ControlTree, ControlType, SourceControl};
use crate::components::{
    AudioCaptureSource, AudioDevice, AudioMixerParams, ContextMutex, DisplayCaptureSource,
    DisplayDevice, InstanceType, MediaComponent, ParamCell, PipelineHandle, VidcapCaptureSource,
    VidcapDevice, VideoMixerParams,
};
use crate::error::MediaError;
use crate::media::MediaKind;
use crate::session::MediaSession;
use crate::topology::{EdgeParams, StreamId, TopologyBuilder};

/// What source controls need to create components.
#[derive(Clone)]
pub(crate) struct ComponentEnv {
    pub video_session: Arc<MediaSession>,
    pub audio_session: Arc<MediaSession>,
    pub pipeline: PipelineHandle,
    pub context: ContextMutex,
    pub audio_channels: u32,
}

impl ComponentEnv {
    pub fn session(&self, kind: MediaKind) -> &Arc<MediaSession> {
        match kind {
            MediaKind::Video => &self.video_session,
            MediaKind::Audio => &self.audio_session,
        }
    }
}

pub(crate) struct ActivationContext {
    /// Active set of the previous pass
    pub last_set: Vec<ControlId>,
    /// Active set being built, in activation order
    pub new_set: Vec<ControlId>,
    /// Set while visiting beneath a disabled control
    pub force_disabled: bool,
    /// Present while the pipeline root is enabled
    pub env: Option<ComponentEnv>,
    pub events: Vec<ControlEvent>,
}

impl ActivationContext {
    pub fn new(last_set: Vec<ControlId>) -> Self {
        Self {
            last_set,
            new_set: Vec::new(),
            force_disabled: false,
            env: None,
            events: Vec::new(),
        }
    }
}

pub(crate) type DeviceControl<D> =
    SourceControl<D, <D as SourceDevice>::Component, <D as SourceDevice>::MixerParams>;

/// A device parameter type that a source control wraps.
pub(crate) trait SourceDevice: Clone + PartialEq + fmt::Debug + Send + Sync + 'static {
    type Component: MediaComponent;
    type MixerParams: Clone + Default + Send + Sync + 'static;

    fn media_kind() -> MediaKind;

    /// Whether a component built for `other` also serves `self`.
    fn same_device(&self, other: &Self) -> bool;

    fn create_component(&self, env: &ComponentEnv) -> Result<Arc<Self::Component>, MediaError>;

    fn control(tree: &ControlTree, id: ControlId) -> Result<&DeviceControl<Self>, MediaError>;

    fn control_mut(tree: &mut ControlTree, id: ControlId) -> Result<&mut DeviceControl<Self>, MediaError>;

    fn edge_params(cell: &Arc<ParamCell<Self::MixerParams>>) -> EdgeParams;

    /// Mixer parameters to install when the control gets new device parameters.
    fn default_mixer_params(&self) -> Option<Self::MixerParams> {
        None
    }

    /// May be empty while the device is unavailable.
    fn create_streams(component: &Arc<Self::Component>, builder: &mut TopologyBuilder) -> Vec<StreamId>;
}

impl SourceDevice for DisplayDevice {
    type Component = DisplayCaptureSource;
    type MixerParams = VideoMixerParams;

    fn media_kind() -> MediaKind {
        MediaKind::Video
    }

    fn same_device(&self, other: &Self) -> bool {
        self.adapter_ordinal == other.adapter_ordinal && self.output_ordinal == other.output_ordinal
    }

    fn create_component(&self, env: &ComponentEnv) -> Result<Arc<Self::Component>, MediaError> {
        DisplayCaptureSource::new(
            env.video_session.clone(),
            env.pipeline.clone(),
            self.clone(),
            env.context.clone(),
        )
    }

    fn control(tree: &ControlTree, id: ControlId) -> Result<&DeviceControl<Self>, MediaError> {
        tree.display(id)
    }

    fn control_mut(tree: &mut ControlTree, id: ControlId) -> Result<&mut DeviceControl<Self>, MediaError> {
        tree.display_mut(id)
    }

    fn edge_params(cell: &Arc<ParamCell<Self::MixerParams>>) -> EdgeParams {
        EdgeParams::Video(cell.clone())
    }

    fn create_streams(component: &Arc<Self::Component>, builder: &mut TopologyBuilder) -> Vec<StreamId> {
        vec![
            component.create_stream(builder),
            component.create_pointer_stream(builder),
        ]
    }
}

impl SourceDevice for VidcapDevice {
    type Component = VidcapCaptureSource;
    type MixerParams = VideoMixerParams;

    fn media_kind() -> MediaKind {
        MediaKind::Video
    }

    fn same_device(&self, other: &Self) -> bool {
        self.same_link(other)
    }

    fn create_component(&self, env: &ComponentEnv) -> Result<Arc<Self::Component>, MediaError> {
        VidcapCaptureSource::new(
            env.video_session.clone(),
            env.pipeline.clone(),
            self.clone(),
            env.context.clone(),
        )
    }

    fn control(tree: &ControlTree, id: ControlId) -> Result<&DeviceControl<Self>, MediaError> {
        tree.vidcap(id)
    }

    fn control_mut(tree: &mut ControlTree, id: ControlId) -> Result<&mut DeviceControl<Self>, MediaError> {
        tree.vidcap_mut(id)
    }

    fn edge_params(cell: &Arc<ParamCell<Self::MixerParams>>) -> EdgeParams {
        EdgeParams::Video(cell.clone())
    }

    fn default_mixer_params(&self) -> Option<Self::MixerParams> {
        Some(self.default_placement())
    }

    fn create_streams(component: &Arc<Self::Component>, builder: &mut TopologyBuilder) -> Vec<StreamId> {
        if component.is_initialized() {
            vec![component.create_stream(builder)]
        } else {
            Vec::new()
        }
    }
}

impl SourceDevice for AudioDevice {
    type Component = AudioCaptureSource;
    type MixerParams = AudioMixerParams;

    fn media_kind() -> MediaKind {
        MediaKind::Audio
    }

    fn same_device(&self, other: &Self) -> bool {
        self.same_endpoint(other)
    }

    fn create_component(&self, env: &ComponentEnv) -> Result<Arc<Self::Component>, MediaError> {
        AudioCaptureSource::new(
            env.audio_session.clone(),
            env.pipeline.clone(),
            self.clone(),
            env.audio_channels,
        )
    }

    fn control(tree: &ControlTree, id: ControlId) -> Result<&DeviceControl<Self>, MediaError> {
        tree.audio(id)
    }

    fn control_mut(tree: &mut ControlTree, id: ControlId) -> Result<&mut DeviceControl<Self>, MediaError> {
        tree.audio_mut(id)
    }

    fn edge_params(cell: &Arc<ParamCell<Self::MixerParams>>) -> EdgeParams {
        EdgeParams::Audio(cell.clone())
    }

    fn create_streams(component: &Arc<Self::Component>, builder: &mut TopologyBuilder) -> Vec<StreamId> {
        vec![component.create_stream(builder)]
    }
}

/// The component `control` holds, if it can serve `params` in `session`.
fn shareable_component<D: SourceDevice>(
    control: &DeviceControl<D>,
    params: &D,
    session: &Arc<MediaSession>,
) -> Option<Arc<D::Component>> {
    if !control.params.same_device(params) {
        return None;
    }
    let component = control.binding.component()?;
    let usable = component.instance_type() == InstanceType::Shareable
        && Arc::ptr_eq(component.session(), session);
    usable.then(|| component.clone())
}

/// Activate `id` and everything beneath it.
pub(crate) fn activate_control(tree: &mut ControlTree, id: ControlId, cx: &mut ActivationContext) -> Result<(), MediaError> {
    match tree.node(id)?.kind.control_type() {
        ControlType::Pipeline => Err(MediaError::Invariant("pipeline activated as a child")),
        ControlType::Scene => activate_scene(tree, id, cx),
        ControlType::DisplayCapture => activate_source::<DisplayDevice>(tree, id, cx),
        ControlType::VidcapCapture => activate_source::<VidcapDevice>(tree, id, cx),
        ControlType::AudioCapture => activate_source::<AudioDevice>(tree, id, cx),
    }
}

fn activate_scene(tree: &mut ControlTree, id: ControlId, cx: &mut ActivationContext) -> Result<(), MediaError> {
    let disabled = cx.force_disabled || tree.node(id)?.disabled;
    let children = tree.scene(id)?.children();

    if !disabled {
        cx.new_set.push(id);
    }

    let outer = cx.force_disabled;
    cx.force_disabled = disabled;
    let result = children
        .into_iter()
        .try_for_each(|child| activate_control(tree, child, cx));
    cx.force_disabled = outer;
    result?;

    cx.events.push(ControlEvent::Activated { id, deactivated: disabled });
    Ok(())
}

fn activate_source<D: SourceDevice>(tree: &mut ControlTree, id: ControlId, cx: &mut ActivationContext) -> Result<(), MediaError> {
    let disabled = cx.force_disabled || cx.env.is_none() || tree.node(id)?.disabled;
    let name = tree.node(id)?.name.clone();

    let params = {
        let control = D::control_mut(tree, id)?;
        control.streams.clear();
        if let Some(new_params) = control.new_params.take() {
            if let Some(mixer_params) = new_params.default_mixer_params() {
                control.mixer_params.set(mixer_params);
            }
            control.params = new_params;
            control.binding = Binding::Detached;
        }
        if disabled {
            control.binding = Binding::Detached;
        }
        control.params.clone()
    };

    let Some(env) = cx.env.as_ref().filter(|_| !disabled) else {
        debug!("Control '{}' ({}) deactivated", name, id);
        cx.events.push(ControlEvent::Activated { id, deactivated: true });
        return Ok(());
    };
    let session = env.session(D::media_kind());

    let shared = cx.new_set.iter().find_map(|&other| {
        let control = D::control(tree, other).ok()?;
        let component = shareable_component(control, &params, session)?;
        Some((control.binding.owner(other)?, component))
    });

    let binding = match shared {
        Some((owner, component)) => {
            debug!("Control '{}' ({}) references the component of {}", name, id, owner);
            Binding::Reference { owner, component }
        }
        None => {
            // The previous set includes this control itself.
            let reused = cx.last_set.iter().find_map(|&other| {
                let control = D::control(tree, other).ok()?;
                shareable_component(control, &params, session)
            });
            match reused {
                Some(component) => {
                    debug!("Control '{}' ({}) reuses its component", name, id);
                    Binding::Owned(component)
                }
                None => {
                    let component = params
                        .create_component(env)
                        .map_err(|e| MediaError::activation(name.clone(), e))?;
                    debug!("Control '{}' ({}) created a component", name, id);
                    Binding::Owned(component)
                }
            }
        }
    };

    D::control_mut(tree, id)?.binding = binding;
    cx.new_set.push(id);
    cx.events.push(ControlEvent::Activated { id, deactivated: false });
    Ok(())
}

/// Add the streams of source control `id` to `builder` and connect them to `mixer`.
///
/// An owning control creates streams; a referencing control connects the
/// owner's streams once more, so the mixer sees the source at both places.
pub(crate) fn build_source_branch<D: SourceDevice>(
    tree: &mut ControlTree,
    id: ControlId,
    builder: &mut TopologyBuilder,
    mixer: StreamId,
) -> Result<(), MediaError> {
    let (binding, edge_params) = {
        let control = D::control(tree, id)?;
        (control.binding.clone(), D::edge_params(&control.mixer_params))
    };

    let streams = match &binding {
        Binding::Detached => return Ok(()),
        Binding::Owned(component) => {
            let streams = D::create_streams(component, builder);
            D::control_mut(tree, id)?.streams = streams.clone();
            streams
        }
        Binding::Reference { owner, .. } => {
            let streams = D::control(tree, *owner)?.streams.clone();
            if streams.is_empty() {
                // The owner was built but its device is unavailable.
                if tree.build_order.contains(owner) {
                    return Ok(());
                }
                return Err(MediaError::Invariant("referenced control was not built before its reference"));
            }
            streams
        }
    };

    for stream in streams {
        builder.connect(mixer, stream, edge_params.clone())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::testing;
    use crate::control::tree::{BindingInfo, ControlKind, SceneControl};
    use crate::media::FrameRate;

    fn env(rt: &tokio::runtime::Runtime) -> ComponentEnv {
        ComponentEnv {
            video_session: testing::session(rt, MediaKind::Video, FrameRate::new(10, 1)),
            audio_session: testing::session(rt, MediaKind::Audio, FrameRate::sample_rate(48000)),
            pipeline: PipelineHandle::detached(),
            context: ContextMutex::default(),
            audio_channels: 2,
        }
    }

    fn add_display(tree: &mut ControlTree, parent: ControlId, name: &str, output: u32) -> ControlId {
        tree.add_child(
            parent,
            name,
            ControlKind::DisplayCapture(SourceControl::new(DisplayDevice::new(0, output, 8, 8))),
        )
        .unwrap()
        .unwrap()
    }

    fn add_audio(tree: &mut ControlTree, parent: ControlId, name: &str, device: &str) -> ControlId {
        tree.add_child(
            parent,
            name,
            ControlKind::AudioCapture(SourceControl::new(AudioDevice::new(device, name, true))),
        )
        .unwrap()
        .unwrap()
    }

    fn add_vidcap(tree: &mut ControlTree, parent: ControlId, name: &str, link: &str) -> ControlId {
        let device = VidcapDevice::new(name, link, 8, 6);
        let placement = device.default_placement();
        tree.add_child(
            parent,
            name,
            ControlKind::VidcapCapture(SourceControl::with_mixer_params(device, placement)),
        )
        .unwrap()
        .unwrap()
    }

    fn run_pass(tree: &mut ControlTree, env: &ComponentEnv) -> ActivationContext {
        let mut cx = ActivationContext::new(tree.active.clone());
        cx.env = Some(env.clone());
        let scene = tree.root_scene();
        activate_control(tree, scene, &mut cx).unwrap();
        tree.active = cx.new_set.clone();
        cx
    }

    #[test]
    fn test_identical_siblings_share_one_component() {
        let rt = testing::runtime();
        let env = env(&rt);
        let mut tree = ControlTree::new();
        let scene = tree.root_scene();
        let a = add_audio(&mut tree, scene, "a", "mic");
        let b = add_audio(&mut tree, scene, "b", "mic");

        run_pass(&mut tree, &env);

        assert_eq!(tree.audio(a).unwrap().binding.info(), BindingInfo::Owned);
        assert_eq!(tree.audio(b).unwrap().binding.info(), BindingInfo::Reference { owner: a });
        let ca = tree.audio(a).unwrap().binding.component().unwrap().clone();
        let cb = tree.audio(b).unwrap().binding.component().unwrap().clone();
        assert!(Arc::ptr_eq(&ca, &cb));
    }

    #[test]
    fn test_active_set_order_and_membership() {
        let rt = testing::runtime();
        let env = env(&rt);
        let mut tree = ControlTree::new();
        let scene = tree.root_scene();
        let d = add_display(&mut tree, scene, "d", 0);
        let a = add_audio(&mut tree, scene, "a", "mic");
        let off = add_display(&mut tree, scene, "off", 1);
        tree.node_mut(off).unwrap().disabled = true;

        let cx = run_pass(&mut tree, &env);
        assert_eq!(cx.new_set, vec![scene, d, a]);
        assert!(tree.display(off).unwrap().binding.component().is_none());
        // One event per visited control, parents after children.
        assert_eq!(cx.events.len(), 4);
        assert_eq!(
            cx.events.last(),
            Some(&ControlEvent::Activated { id: scene, deactivated: false })
        );
    }

    #[test]
    fn test_component_survives_reactivation() {
        let rt = testing::runtime();
        let env = env(&rt);
        let mut tree = ControlTree::new();
        let scene = tree.root_scene();
        let d = add_display(&mut tree, scene, "d", 0);
        let a = add_audio(&mut tree, scene, "a", "mic");

        run_pass(&mut tree, &env);
        let before = tree.display(d).unwrap().binding.component().unwrap().clone();

        tree.node_mut(a).unwrap().disabled = true;
        run_pass(&mut tree, &env);

        let after = tree.display(d).unwrap().binding.component().unwrap().clone();
        assert!(Arc::ptr_eq(&before, &after));
        assert!(tree.audio(a).unwrap().binding.component().is_none());
    }

    #[test]
    fn test_staged_params_force_new_component() {
        let rt = testing::runtime();
        let env = env(&rt);
        let mut tree = ControlTree::new();
        let scene = tree.root_scene();
        let d = add_display(&mut tree, scene, "d", 0);

        run_pass(&mut tree, &env);
        let before = tree.display(d).unwrap().binding.component().unwrap().clone();

        tree.display_mut(d).unwrap().new_params = Some(DisplayDevice::new(0, 0, 16, 16));
        run_pass(&mut tree, &env);

        let control = tree.display(d).unwrap();
        assert_eq!(control.params.width, 16);
        assert!(control.new_params.is_none());
        assert!(!Arc::ptr_eq(&before, control.binding.component().unwrap()));
    }

    #[test]
    fn test_unshareable_component_is_replaced() {
        let rt = testing::runtime();
        let env = env(&rt);
        let mut tree = ControlTree::new();
        let scene = tree.root_scene();
        let d = add_display(&mut tree, scene, "d", 0);

        run_pass(&mut tree, &env);
        let before = tree.display(d).unwrap().binding.component().unwrap().clone();
        before.mark_broken();

        run_pass(&mut tree, &env);
        let after = tree.display(d).unwrap().binding.component().unwrap().clone();
        assert!(!Arc::ptr_eq(&before, &after));
    }

    #[test]
    fn test_disabled_scene_releases_descendants() {
        let rt = testing::runtime();
        let env = env(&rt);
        let mut tree = ControlTree::new();
        let scene = tree.root_scene();
        let sub = tree
            .add_child(scene, "sub", ControlKind::Scene(SceneControl::default()))
            .unwrap()
            .unwrap();
        let d = add_display(&mut tree, sub, "d", 0);

        run_pass(&mut tree, &env);
        assert!(tree.active.contains(&d));

        tree.node_mut(sub).unwrap().disabled = true;
        let cx = run_pass(&mut tree, &env);
        assert_eq!(cx.new_set, vec![scene]);
        assert!(tree.display(d).unwrap().binding.component().is_none());
        assert!(cx.events.contains(&ControlEvent::Activated { id: d, deactivated: true }));
    }

    #[test]
    fn test_reference_connects_owner_streams() {
        let rt = testing::runtime();
        let env = env(&rt);
        let mut tree = ControlTree::new();
        let scene = tree.root_scene();
        let a = add_display(&mut tree, scene, "a", 0);
        let b = add_display(&mut tree, scene, "b", 0);
        run_pass(&mut tree, &env);

        let clock = testing::clock(&env.video_session);
        let mut builder = TopologyBuilder::new(MediaKind::Video, clock);
        let video_mixer = crate::components::VideoMixer::new(
            env.video_session.clone(),
            PipelineHandle::detached(),
            8,
            8,
            ContextMutex::default(),
        );
        let mixer = video_mixer.create_stream(&mut builder);

        build_source_branch::<DisplayDevice>(&mut tree, a, &mut builder, mixer).unwrap();
        build_source_branch::<DisplayDevice>(&mut tree, b, &mut builder, mixer).unwrap();

        assert_eq!(tree.display(a).unwrap().streams.len(), 2);
        assert!(tree.display(b).unwrap().streams.is_empty());
        assert_eq!(builder.input_count(mixer), 4);
    }

    #[test]
    fn test_webcams_share_by_symbolic_link() {
        let rt = testing::runtime();
        let env = env(&rt);
        let mut tree = ControlTree::new();
        let scene = tree.root_scene();
        let a = add_vidcap(&mut tree, scene, "front", r"\\?\usb#cam_1");
        let b = add_vidcap(&mut tree, scene, "front copy", r"\\?\USB#CAM_1");
        let c = add_vidcap(&mut tree, scene, "side", r"\\?\usb#cam_2");

        let cx = run_pass(&mut tree, &env);
        assert_eq!(cx.new_set, vec![scene, a, b, c]);
        assert_eq!(tree.vidcap(a).unwrap().binding.info(), BindingInfo::Owned);
        assert_eq!(tree.vidcap(b).unwrap().binding.info(), BindingInfo::Reference { owner: a });
        assert_eq!(tree.vidcap(c).unwrap().binding.info(), BindingInfo::Owned);

        let ca = tree.vidcap(a).unwrap().binding.component().unwrap().clone();
        let cc = tree.vidcap(c).unwrap().binding.component().unwrap().clone();
        assert!(!Arc::ptr_eq(&ca, &cc));
    }

    #[test]
    fn test_unshareable_webcam_is_not_referenced() {
        let rt = testing::runtime();
        let env = env(&rt);
        let mut tree = ControlTree::new();
        let scene = tree.root_scene();
        let a = add_vidcap(&mut tree, scene, "cam", "usb#cam_1");

        run_pass(&mut tree, &env);
        let before = tree.vidcap(a).unwrap().binding.component().unwrap().clone();
        before.request_reinitialization();

        let b = add_vidcap(&mut tree, scene, "cam again", "usb#cam_1");
        run_pass(&mut tree, &env);

        let after = tree.vidcap(a).unwrap().binding.component().unwrap().clone();
        assert!(!Arc::ptr_eq(&before, &after));
        // The fresh component is shareable again, so the sibling references it.
        assert_eq!(tree.vidcap(b).unwrap().binding.info(), BindingInfo::Reference { owner: a });
    }

    #[test]
    fn test_webcam_params_reset_placement() {
        let rt = testing::runtime();
        let env = env(&rt);
        let mut tree = ControlTree::new();
        let scene = tree.root_scene();
        let a = add_vidcap(&mut tree, scene, "cam", "usb#cam_1");
        run_pass(&mut tree, &env);

        let cell = tree.vidcap(a).unwrap().mixer_params.clone();
        cell.set(VideoMixerParams::default());

        let device = VidcapDevice::new("cam", "usb#cam_2", 4, 4);
        tree.vidcap_mut(a).unwrap().new_params = Some(device.clone());
        run_pass(&mut tree, &env);

        assert_eq!(cell.get(), device.default_placement());
        assert!(tree.vidcap(a).unwrap().params.same_link(&device));
    }

    #[test]
    fn test_unplugged_webcam_adds_no_stream() {
        let rt = testing::runtime();
        let env = env(&rt);
        let mut tree = ControlTree::new();
        let scene = tree.root_scene();
        let a = add_vidcap(&mut tree, scene, "cam", "usb#cam_1");
        let b = add_vidcap(&mut tree, scene, "cam again", "usb#cam_1");
        run_pass(&mut tree, &env);
        tree.vidcap(a).unwrap().binding.component().unwrap().device_removed();

        let clock = testing::clock(&env.video_session);
        let mut builder = TopologyBuilder::new(MediaKind::Video, clock);
        let video_mixer = crate::components::VideoMixer::new(
            env.video_session.clone(),
            PipelineHandle::detached(),
            8,
            8,
            ContextMutex::default(),
        );
        let mixer = video_mixer.create_stream(&mut builder);

        tree.build_order.clear();
        for id in [a, b] {
            build_source_branch::<VidcapDevice>(&mut tree, id, &mut builder, mixer).unwrap();
            tree.build_order.push(id);
        }
        assert!(tree.vidcap(a).unwrap().streams.is_empty());
        assert_eq!(builder.input_count(mixer), 0);
    }
}

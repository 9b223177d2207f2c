//! The control tree
//!
//! Controls form a parent/child hierarchy: the pipeline root owns one root
//! scene, scenes own scenes and sources. Nodes live in an arena indexed by
//! [`ControlId`]; removed nodes leave a hole so ids are never reused.

use serde::Serialize;
use std::fmt;
use std::sync::Arc;

use super::root::RootControl;
use crate::components::{
    AudioCaptureSource, AudioDevice, AudioMixerParams, DisplayCaptureSource, DisplayDevice,
    ParamCell, VidcapCaptureSource, VidcapDevice, VideoMixerParams,
};
use crate::error::MediaError;
use crate::topology::StreamId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ControlId(usize);

impl ControlId {
    pub(crate) fn from_index(index: usize) -> Self {
        Self(index)
    }

    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for ControlId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlType {
    Pipeline,
    Scene,
    DisplayCapture,
    VidcapCapture,
    AudioCapture,
}

/// Which mixers a control can feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub video: bool,
    pub audio: bool,
}

/// How a source control holds its component after activation.
pub enum Binding<C> {
    Detached,
    /// This control created or kept the component and contributes its streams
    Owned(Arc<C>),
    /// Another control in the active set owns the identical component
    Reference { owner: ControlId, component: Arc<C> },
}

impl<C> Binding<C> {
    pub fn component(&self) -> Option<&Arc<C>> {
        match self {
            Self::Detached => None,
            Self::Owned(component) | Self::Reference { component, .. } => Some(component),
        }
    }

    /// The control whose streams carry this binding's component.
    pub fn owner(&self, this: ControlId) -> Option<ControlId> {
        match self {
            Self::Detached => None,
            Self::Owned(_) => Some(this),
            Self::Reference { owner, .. } => Some(*owner),
        }
    }

    pub fn info(&self) -> BindingInfo {
        match self {
            Self::Detached => BindingInfo::Detached,
            Self::Owned(_) => BindingInfo::Owned,
            Self::Reference { owner, .. } => BindingInfo::Reference { owner: *owner },
        }
    }
}

impl<C> Clone for Binding<C> {
    fn clone(&self) -> Self {
        match self {
            Self::Detached => Self::Detached,
            Self::Owned(component) => Self::Owned(component.clone()),
            Self::Reference { owner, component } => Self::Reference {
                owner: *owner,
                component: component.clone(),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "binding", rename_all = "snake_case")]
pub enum BindingInfo {
    Detached,
    Owned,
    Reference { owner: ControlId },
}

/// A leaf control wrapping one capture device.
pub struct SourceControl<D, C, P> {
    pub(crate) params: D,
    /// Staged by `set_params`, applied by the next activation
    pub(crate) new_params: Option<D>,
    pub(crate) binding: Binding<C>,
    /// Live placement or gain, read by the mixer every take
    pub(crate) mixer_params: Arc<ParamCell<P>>,
    /// Streams this control added to the topology being built
    pub(crate) streams: Vec<StreamId>,
}

impl<D, C, P: Default + Clone> SourceControl<D, C, P> {
    pub fn new(params: D) -> Self {
        Self {
            params,
            new_params: None,
            binding: Binding::Detached,
            mixer_params: ParamCell::new(P::default()),
            streams: Vec::new(),
        }
    }
}

impl<D, C, P: Clone> SourceControl<D, C, P> {
    pub fn with_mixer_params(params: D, mixer_params: P) -> Self {
        Self {
            params,
            new_params: None,
            binding: Binding::Detached,
            mixer_params: ParamCell::new(mixer_params),
            streams: Vec::new(),
        }
    }
}

impl<D, C, P> SourceControl<D, C, P> {
    pub fn params(&self) -> &D {
        &self.params
    }

    pub fn binding(&self) -> &Binding<C> {
        &self.binding
    }

    pub fn mixer_params(&self) -> &Arc<ParamCell<P>> {
        &self.mixer_params
    }
}

pub type DisplayControl = SourceControl<DisplayDevice, DisplayCaptureSource, VideoMixerParams>;
pub type VidcapControl = SourceControl<VidcapDevice, VidcapCaptureSource, VideoMixerParams>;
pub type AudioControl = SourceControl<AudioDevice, AudioCaptureSource, AudioMixerParams>;

/// Container of other controls. Video children are kept in z-order.
#[derive(Debug, Default)]
pub struct SceneControl {
    pub(crate) video_controls: Vec<ControlId>,
    pub(crate) audio_controls: Vec<ControlId>,
    /// Child scene shown by the last `switch_scene`
    pub(crate) current_scene: Option<ControlId>,
}

impl SceneControl {
    /// Children in activation order, each once.
    pub fn children(&self) -> Vec<ControlId> {
        let mut children = self.video_controls.clone();
        for id in &self.audio_controls {
            if !children.contains(id) {
                children.push(*id);
            }
        }
        children
    }

    pub fn contains(&self, id: ControlId) -> bool {
        self.video_controls.contains(&id) || self.audio_controls.contains(&id)
    }

    fn remove(&mut self, id: ControlId) {
        self.video_controls.retain(|c| *c != id);
        self.audio_controls.retain(|c| *c != id);
        if self.current_scene == Some(id) {
            self.current_scene = None;
        }
    }
}

pub enum ControlKind {
    Pipeline(RootControl),
    Scene(SceneControl),
    DisplayCapture(DisplayControl),
    VidcapCapture(VidcapControl),
    AudioCapture(AudioControl),
}

impl ControlKind {
    pub fn control_type(&self) -> ControlType {
        match self {
            Self::Pipeline(_) => ControlType::Pipeline,
            Self::Scene(_) => ControlType::Scene,
            Self::DisplayCapture(_) => ControlType::DisplayCapture,
            Self::VidcapCapture(_) => ControlType::VidcapCapture,
            Self::AudioCapture(_) => ControlType::AudioCapture,
        }
    }

    pub fn capabilities(&self) -> Capabilities {
        match self {
            Self::Pipeline(_) | Self::Scene(_) => Capabilities { video: true, audio: true },
            Self::DisplayCapture(_) | Self::VidcapCapture(_) => Capabilities { video: true, audio: false },
            Self::AudioCapture(_) => Capabilities { video: false, audio: true },
        }
    }

    pub fn binding_info(&self) -> BindingInfo {
        match self {
            Self::DisplayCapture(control) => control.binding.info(),
            Self::VidcapCapture(control) => control.binding.info(),
            Self::AudioCapture(control) => control.binding.info(),
            Self::Pipeline(_) | Self::Scene(_) => BindingInfo::Detached,
        }
    }
}

pub struct ControlNode {
    pub(crate) name: String,
    pub(crate) parent: Option<ControlId>,
    pub(crate) disabled: bool,
    pub(crate) kind: ControlKind,
}

impl ControlNode {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> Option<ControlId> {
        self.parent
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    pub fn kind(&self) -> &ControlKind {
        &self.kind
    }
}

/// Arena of controls plus the bookkeeping of the last activation.
pub struct ControlTree {
    nodes: Vec<Option<ControlNode>>,
    root: ControlId,
    root_scene: ControlId,
    /// Controls that took part in the last activation, in activation order
    pub(crate) active: Vec<ControlId>,
    /// Controls in the order their branches were added to the last topology
    pub(crate) build_order: Vec<ControlId>,
    pub(crate) selection: Vec<ControlId>,
}

impl ControlTree {
    pub fn new() -> Self {
        let root = ControlId(0);
        let root_scene = ControlId(1);
        let nodes = vec![
            Some(ControlNode {
                name: "Pipeline".to_string(),
                parent: None,
                disabled: false,
                kind: ControlKind::Pipeline(RootControl::new(root_scene)),
            }),
            Some(ControlNode {
                name: "Root scene".to_string(),
                parent: Some(root),
                disabled: false,
                kind: ControlKind::Scene(SceneControl::default()),
            }),
        ];
        Self {
            nodes,
            root,
            root_scene,
            active: Vec::new(),
            build_order: Vec::new(),
            selection: Vec::new(),
        }
    }

    pub fn root(&self) -> ControlId {
        self.root
    }

    pub fn root_scene(&self) -> ControlId {
        self.root_scene
    }

    pub fn contains(&self, id: ControlId) -> bool {
        matches!(self.nodes.get(id.0), Some(Some(_)))
    }

    pub fn node(&self, id: ControlId) -> Result<&ControlNode, MediaError> {
        self.nodes
            .get(id.0)
            .and_then(Option::as_ref)
            .ok_or_else(|| MediaError::UnknownControl(id.to_string()))
    }

    pub fn node_mut(&mut self, id: ControlId) -> Result<&mut ControlNode, MediaError> {
        self.nodes
            .get_mut(id.0)
            .and_then(Option::as_mut)
            .ok_or_else(|| MediaError::UnknownControl(id.to_string()))
    }

    pub fn root_control(&self) -> Result<&RootControl, MediaError> {
        match &self.node(self.root)?.kind {
            ControlKind::Pipeline(root) => Ok(root),
            _ => Err(MediaError::Invariant("tree root is not the pipeline")),
        }
    }

    pub fn root_control_mut(&mut self) -> Result<&mut RootControl, MediaError> {
        let root = self.root;
        match &mut self.node_mut(root)?.kind {
            ControlKind::Pipeline(root) => Ok(root),
            _ => Err(MediaError::Invariant("tree root is not the pipeline")),
        }
    }

    pub fn scene(&self, id: ControlId) -> Result<&SceneControl, MediaError> {
        match &self.node(id)?.kind {
            ControlKind::Scene(scene) => Ok(scene),
            _ => Err(MediaError::InvalidOperation(format!("{} is not a scene", id))),
        }
    }

    pub fn scene_mut(&mut self, id: ControlId) -> Result<&mut SceneControl, MediaError> {
        match &mut self.node_mut(id)?.kind {
            ControlKind::Scene(scene) => Ok(scene),
            _ => Err(MediaError::InvalidOperation(format!("{} is not a scene", id))),
        }
    }

    pub fn display(&self, id: ControlId) -> Result<&DisplayControl, MediaError> {
        match &self.node(id)?.kind {
            ControlKind::DisplayCapture(control) => Ok(control),
            _ => Err(MediaError::InvalidOperation(format!("{} is not a display capture", id))),
        }
    }

    pub fn display_mut(&mut self, id: ControlId) -> Result<&mut DisplayControl, MediaError> {
        match &mut self.node_mut(id)?.kind {
            ControlKind::DisplayCapture(control) => Ok(control),
            _ => Err(MediaError::InvalidOperation(format!("{} is not a display capture", id))),
        }
    }

    pub fn vidcap(&self, id: ControlId) -> Result<&VidcapControl, MediaError> {
        match &self.node(id)?.kind {
            ControlKind::VidcapCapture(control) => Ok(control),
            _ => Err(MediaError::InvalidOperation(format!("{} is not a video capture", id))),
        }
    }

    pub fn vidcap_mut(&mut self, id: ControlId) -> Result<&mut VidcapControl, MediaError> {
        match &mut self.node_mut(id)?.kind {
            ControlKind::VidcapCapture(control) => Ok(control),
            _ => Err(MediaError::InvalidOperation(format!("{} is not a video capture", id))),
        }
    }

    /// Canvas placement of any control feeding the video mixer.
    pub fn video_mixer_params(&self, id: ControlId) -> Result<&Arc<ParamCell<VideoMixerParams>>, MediaError> {
        match &self.node(id)?.kind {
            ControlKind::DisplayCapture(control) => Ok(control.mixer_params()),
            ControlKind::VidcapCapture(control) => Ok(control.mixer_params()),
            _ => Err(MediaError::InvalidOperation(format!("{} has no canvas placement", id))),
        }
    }

    pub fn audio(&self, id: ControlId) -> Result<&AudioControl, MediaError> {
        match &self.node(id)?.kind {
            ControlKind::AudioCapture(control) => Ok(control),
            _ => Err(MediaError::InvalidOperation(format!("{} is not an audio capture", id))),
        }
    }

    pub fn audio_mut(&mut self, id: ControlId) -> Result<&mut AudioControl, MediaError> {
        match &mut self.node_mut(id)?.kind {
            ControlKind::AudioCapture(control) => Ok(control),
            _ => Err(MediaError::InvalidOperation(format!("{} is not an audio capture", id))),
        }
    }

    /// Ids of every live control, in arena order.
    pub fn ids(&self) -> impl Iterator<Item = ControlId> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, node)| node.is_some())
            .map(|(index, _)| ControlId(index))
    }

    /// Whether a direct child of `parent` is already called `name`.
    pub fn has_child_named(&self, parent: ControlId, name: &str) -> Result<bool, MediaError> {
        let scene = self.scene(parent)?;
        Ok(scene
            .children()
            .into_iter()
            .filter_map(|id| self.node(id).ok())
            .any(|node| node.name == name))
    }

    /// Attach a new control to the scene `parent`. Returns `None` if a sibling has the same name.
    pub fn add_child(&mut self, parent: ControlId, name: &str, kind: ControlKind) -> Result<Option<ControlId>, MediaError> {
        if self.has_child_named(parent, name)? {
            return Ok(None);
        }

        let capabilities = kind.capabilities();
        let id = ControlId(self.nodes.len());
        self.nodes.push(Some(ControlNode {
            name: name.to_string(),
            parent: Some(parent),
            disabled: false,
            kind,
        }));

        let scene = self.scene_mut(parent)?;
        if capabilities.video {
            scene.video_controls.push(id);
        }
        if capabilities.audio {
            scene.audio_controls.push(id);
        }
        Ok(Some(id))
    }

    /// Detach `id` and its subtree. Returns every removed id with its parent, `id` first.
    pub fn remove(&mut self, id: ControlId) -> Result<Vec<(ControlId, ControlId)>, MediaError> {
        if id == self.root || id == self.root_scene {
            return Err(MediaError::InvalidOperation("the root controls cannot be removed".into()));
        }
        let parent = self
            .node(id)?
            .parent
            .ok_or(MediaError::Invariant("non-root control without a parent"))?;
        self.scene_mut(parent)?.remove(id);

        let mut removed = Vec::new();
        let mut pending = vec![id];
        while let Some(next) = pending.pop() {
            if let Some(node) = self.nodes.get_mut(next.0).and_then(Option::take) {
                if let ControlKind::Scene(scene) = &node.kind {
                    pending.extend(scene.children());
                }
                removed.push((next, node.parent.unwrap_or(parent)));
            }
        }
        self.selection.retain(|c| !removed.iter().any(|(id, _)| id == c));
        Ok(removed)
    }

    /// Move `id` to `position` among its siblings. Video z-order follows the video list.
    pub fn move_to(&mut self, id: ControlId, position: usize) -> Result<(), MediaError> {
        let parent = self
            .node(id)?
            .parent
            .ok_or_else(|| MediaError::InvalidOperation("the pipeline cannot be moved".into()))?;
        let scene = self.scene_mut(parent)?;
        for list in [&mut scene.video_controls, &mut scene.audio_controls] {
            if let Some(current) = list.iter().position(|c| *c == id) {
                list.remove(current);
                let position = position.min(list.len());
                list.insert(position, id);
            }
        }
        Ok(())
    }

    pub fn rename(&mut self, id: ControlId, name: &str) -> Result<bool, MediaError> {
        if let Some(parent) = self.node(id)?.parent {
            if self.node(id)?.name != name && self.has_child_named(parent, name)? {
                return Ok(false);
            }
        }
        self.node_mut(id)?.name = name.to_string();
        Ok(true)
    }

    /// Whether `id` or any ancestor is disabled.
    pub fn is_effectively_disabled(&self, id: ControlId) -> Result<bool, MediaError> {
        let mut next = Some(id);
        while let Some(current) = next {
            let node = self.node(current)?;
            if node.disabled {
                return Ok(true);
            }
            next = node.parent;
        }
        Ok(false)
    }
}

impl Default for ControlTree {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn display(tree: &mut ControlTree, parent: ControlId, name: &str) -> ControlId {
        tree.add_child(
            parent,
            name,
            ControlKind::DisplayCapture(SourceControl::new(DisplayDevice::new(0, 0, 8, 8))),
        )
        .unwrap()
        .unwrap()
    }

    fn audio(tree: &mut ControlTree, parent: ControlId, name: &str) -> ControlId {
        tree.add_child(
            parent,
            name,
            ControlKind::AudioCapture(SourceControl::new(AudioDevice::new("dev", name, true))),
        )
        .unwrap()
        .unwrap()
    }

    #[test]
    fn test_new_tree_has_root_and_scene() {
        let tree = ControlTree::new();
        assert_eq!(tree.node(tree.root()).unwrap().kind.control_type(), ControlType::Pipeline);
        assert_eq!(tree.node(tree.root_scene()).unwrap().parent, Some(tree.root()));
        assert!(tree.scene(tree.root_scene()).unwrap().children().is_empty());
    }

    #[test]
    fn test_children_are_listed_by_capability() {
        let mut tree = ControlTree::new();
        let scene = tree.root_scene();
        let d = display(&mut tree, scene, "d");
        let a = audio(&mut tree, scene, "a");
        let sub = tree
            .add_child(scene, "sub", ControlKind::Scene(SceneControl::default()))
            .unwrap()
            .unwrap();

        let root_scene = tree.scene(scene).unwrap();
        assert_eq!(root_scene.video_controls, vec![d, sub]);
        assert_eq!(root_scene.audio_controls, vec![a, sub]);
        assert_eq!(root_scene.children(), vec![d, sub, a]);
    }

    #[test]
    fn test_duplicate_sibling_name_is_rejected() {
        let mut tree = ControlTree::new();
        let scene = tree.root_scene();
        display(&mut tree, scene, "capture");
        let again = tree
            .add_child(
                scene,
                "capture",
                ControlKind::AudioCapture(SourceControl::new(AudioDevice::new("x", "x", true))),
            )
            .unwrap();
        assert!(again.is_none());
    }

    #[test]
    fn test_remove_takes_subtree() {
        let mut tree = ControlTree::new();
        let scene = tree.root_scene();
        let sub = tree
            .add_child(scene, "sub", ControlKind::Scene(SceneControl::default()))
            .unwrap()
            .unwrap();
        let inner = display(&mut tree, sub, "inner");
        tree.selection = vec![inner];

        let removed = tree.remove(sub).unwrap();
        assert_eq!(removed, vec![(sub, scene), (inner, sub)]);
        assert!(!tree.contains(sub));
        assert!(!tree.contains(inner));
        assert!(tree.selection.is_empty());
        assert!(!tree.scene(scene).unwrap().contains(sub));
        assert!(tree.remove(tree.root_scene()).is_err());
    }

    #[test]
    fn test_move_reorders_video_list() {
        let mut tree = ControlTree::new();
        let scene = tree.root_scene();
        let a = display(&mut tree, scene, "a");
        let b = display(&mut tree, scene, "b");
        let c = display(&mut tree, scene, "c");

        tree.move_to(c, 0).unwrap();
        assert_eq!(tree.scene(scene).unwrap().video_controls, vec![c, a, b]);
        tree.move_to(c, 99).unwrap();
        assert_eq!(tree.scene(scene).unwrap().video_controls, vec![a, b, c]);
    }

    #[test]
    fn test_rename_respects_siblings() {
        let mut tree = ControlTree::new();
        let scene = tree.root_scene();
        let a = display(&mut tree, scene, "a");
        display(&mut tree, scene, "b");

        assert!(!tree.rename(a, "b").unwrap());
        assert!(tree.rename(a, "a").unwrap());
        assert!(tree.rename(a, "renamed").unwrap());
        assert_eq!(tree.node(a).unwrap().name(), "renamed");
    }

    #[test]
    fn test_disabled_ancestor_disables_descendants() {
        let mut tree = ControlTree::new();
        let scene = tree.root_scene();
        let sub = tree
            .add_child(scene, "sub", ControlKind::Scene(SceneControl::default()))
            .unwrap()
            .unwrap();
        let leaf = display(&mut tree, sub, "leaf");

        assert!(!tree.is_effectively_disabled(leaf).unwrap());
        tree.node_mut(sub).unwrap().disabled = true;
        assert!(tree.is_effectively_disabled(leaf).unwrap());
    }
}

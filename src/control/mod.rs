//! The control tree and the pipeline built from it
//!
//! Controls are what a user edits: scenes and capture sources. Activating
//! the tree decides which components exist and who shares them, then
//! rebuilds the topologies and switches the running pipeline over.

mod activation;
mod backend;
mod events;
mod pipeline;
mod root;
mod thread;
mod tree;

pub use backend::{FileBackend, MemoryBackend, RecordingBackend};
pub use events::{ControlEvent, GuiEventHandler, GuiEventProvider, SubscriptionId};
pub use pipeline::{
    ControlSnapshot, Pipeline, PipelineController, PipelineOptions, PipelineSnapshot, SelectionMode,
};
pub use root::{PipelineComponents, RecordingChain, RootControl};
pub use thread::ControlThread;
pub use tree::{
    AudioControl, Binding, BindingInfo, Capabilities, ControlId, ControlKind, ControlNode,
    ControlTree, ControlType, DisplayControl, SceneControl, SourceControl, VidcapControl,
};

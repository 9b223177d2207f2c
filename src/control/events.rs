//! Notifications for a user interface observing the control tree
//!
//! Events are collected while the tree is locked and delivered after the
//! lock is released, on the control thread. Handlers may call back into the
//! pipeline.

use parking_lot::Mutex;
use std::sync::Arc;
use tracing::trace;

use super::tree::ControlId;

/// Callbacks fired on the control thread. Every method defaults to doing nothing.
pub trait GuiEventHandler: Send + Sync {
    /// `id` finished an activation pass; `deactivated` when it ended up holding nothing.
    fn on_activate(&self, _id: ControlId, _deactivated: bool) {}

    /// `parent` is the scene the control was added to or removed from.
    fn on_control_added(&self, _id: ControlId, _removed: bool, _parent: ControlId) {}

    fn on_scene_activate(&self, _scene: ControlId, _deactivated: bool) {}

    fn on_control_selection_changed(&self, _selection: &[ControlId]) {}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlEvent {
    Activated { id: ControlId, deactivated: bool },
    ControlAdded { id: ControlId, removed: bool, parent: ControlId },
    SceneActivated { scene: ControlId, deactivated: bool },
    SelectionChanged { selection: Vec<ControlId> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Default)]
struct Subscribers {
    next_id: u64,
    handlers: Vec<(SubscriptionId, Arc<dyn GuiEventHandler>)>,
}

/// Fan-out of control events to subscribed handlers.
#[derive(Default)]
pub struct GuiEventProvider {
    subscribers: Mutex<Subscribers>,
}

impl GuiEventProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, handler: Arc<dyn GuiEventHandler>) -> SubscriptionId {
        let mut subscribers = self.subscribers.lock();
        let id = SubscriptionId(subscribers.next_id);
        subscribers.next_id += 1;
        subscribers.handlers.push((id, handler));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.lock();
        let before = subscribers.handlers.len();
        subscribers.handlers.retain(|(sub, _)| *sub != id);
        subscribers.handlers.len() != before
    }

    pub fn dispatch(&self, events: &[ControlEvent]) {
        if events.is_empty() {
            return;
        }
        // Handlers may subscribe or unsubscribe while being called.
        let handlers: Vec<_> = self
            .subscribers
            .lock()
            .handlers
            .iter()
            .map(|(_, handler)| handler.clone())
            .collect();

        for event in events {
            trace!("Dispatching {:?}", event);
            for handler in &handlers {
                match event {
                    ControlEvent::Activated { id, deactivated } => handler.on_activate(*id, *deactivated),
                    ControlEvent::ControlAdded { id, removed, parent } => {
                        handler.on_control_added(*id, *removed, *parent)
                    }
                    ControlEvent::SceneActivated { scene, deactivated } => {
                        handler.on_scene_activate(*scene, *deactivated)
                    }
                    ControlEvent::SelectionChanged { selection } => {
                        handler.on_control_selection_changed(selection)
                    }
                }
            }
        }
    }
}

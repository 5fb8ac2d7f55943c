//! Typed event stream emitted by the tracker.
//!
//! Events are delivered synchronously, in emission order, to handlers
//! registered through [`EventBus::on`]. There is no subscription lifecycle
//! beyond `on`/`off`; handlers must not call back into the tracker.

use serde::{Deserialize, Serialize};

use crate::builder::{DomTree, TreeNode};

/// Observable field changes carried by update/match events
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeChanges {
    /// New label, if it changed
    pub label: Option<String>,
    /// New form value, if it changed
    pub value: Option<String>,
    /// New checked state, if it changed
    pub checked: Option<bool>,
    /// New disabled state, if it changed
    pub disabled: Option<bool>,
    /// New visibility, if it changed
    pub visible: Option<bool>,
}

impl NodeChanges {
    /// Whether no observable field changed
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.label.is_none()
            && self.value.is_none()
            && self.checked.is_none()
            && self.disabled.is_none()
            && self.visible.is_none()
    }
}

/// Discriminant for event subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrackerEventKind {
    /// Initial tree built
    TreeInitialized,
    /// A new logical node entered the tree
    NodeAdded,
    /// A node was purged after its grace period
    NodeRemoved,
    /// Observable fields of a node changed
    NodeUpdated,
    /// A node was re-identified across a re-render
    NodeMatched,
    /// A modal became active
    ModalOpened,
    /// The active modal closed
    ModalClosed,
    /// Unexpected fault during batch processing
    TreeError,
}

/// One event emitted by the tracker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TrackerEvent {
    /// Initial tree built
    TreeInitialized {
        /// The freshly built tree
        tree: DomTree,
    },
    /// A new logical node entered the tree
    NodeAdded {
        /// The added subtree
        node: TreeNode,
        /// Parent it was added under, `None` for the root
        parent_id: Option<String>,
        /// Index among the parent's children
        index: usize,
    },
    /// A node was purged after its grace period expired
    NodeRemoved {
        /// Logical id of the purged node
        node_id: String,
    },
    /// Observable fields of a node changed in place
    NodeUpdated {
        /// Logical id
        node_id: String,
        /// What changed
        changes: NodeChanges,
    },
    /// A node was re-identified across a re-render
    NodeMatched {
        /// Logical id (unchanged across the re-render)
        node_id: String,
        /// Confidence of the accepted match
        confidence: f64,
        /// Observable drift absorbed by the match
        changes: NodeChanges,
    },
    /// A modal became active
    ModalOpened {
        /// Logical id of the modal node
        modal_id: String,
    },
    /// The active modal closed
    ModalClosed {
        /// Logical id of the modal node
        modal_id: String,
    },
    /// Unexpected fault during batch processing; tracking continues
    TreeError {
        /// Captured fault message
        error: String,
    },
}

impl TrackerEvent {
    /// The subscription discriminant of this event
    #[must_use]
    pub const fn kind(&self) -> TrackerEventKind {
        match self {
            Self::TreeInitialized { .. } => TrackerEventKind::TreeInitialized,
            Self::NodeAdded { .. } => TrackerEventKind::NodeAdded,
            Self::NodeRemoved { .. } => TrackerEventKind::NodeRemoved,
            Self::NodeUpdated { .. } => TrackerEventKind::NodeUpdated,
            Self::NodeMatched { .. } => TrackerEventKind::NodeMatched,
            Self::ModalOpened { .. } => TrackerEventKind::ModalOpened,
            Self::ModalClosed { .. } => TrackerEventKind::ModalClosed,
            Self::TreeError { .. } => TrackerEventKind::TreeError,
        }
    }
}

/// Token returned by `on`, consumed by `off`
pub type HandlerToken = u64;

struct HandlerEntry {
    token: HandlerToken,
    kind: Option<TrackerEventKind>,
    callback: Box<dyn FnMut(&TrackerEvent)>,
}

/// Registry of event handlers with synchronous in-order dispatch
#[derive(Default)]
pub struct EventBus {
    handlers: Vec<HandlerEntry>,
    next_token: HandlerToken,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

impl EventBus {
    /// Create an empty bus
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for one event kind
    pub fn on(
        &mut self,
        kind: TrackerEventKind,
        callback: impl FnMut(&TrackerEvent) + 'static,
    ) -> HandlerToken {
        self.register(Some(kind), Box::new(callback))
    }

    /// Register a handler for every event kind
    pub fn on_any(&mut self, callback: impl FnMut(&TrackerEvent) + 'static) -> HandlerToken {
        self.register(None, Box::new(callback))
    }

    /// Remove a handler. Unknown tokens are ignored.
    pub fn off(&mut self, token: HandlerToken) {
        self.handlers.retain(|h| h.token != token);
    }

    /// Deliver an event to every matching handler, in registration order
    pub fn emit(&mut self, event: &TrackerEvent) {
        let kind = event.kind();
        for handler in &mut self.handlers {
            if handler.kind.is_none() || handler.kind == Some(kind) {
                (handler.callback)(event);
            }
        }
    }

    fn register(
        &mut self,
        kind: Option<TrackerEventKind>,
        callback: Box<dyn FnMut(&TrackerEvent)>,
    ) -> HandlerToken {
        self.next_token += 1;
        let token = self.next_token;
        self.handlers.push(HandlerEntry {
            token,
            kind,
            callback,
        });
        token
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn test_kind_filter() {
        let mut bus = EventBus::new();
        let hits = Rc::new(RefCell::new(0));
        let sink = Rc::clone(&hits);
        bus.on(TrackerEventKind::NodeRemoved, move |_| {
            *sink.borrow_mut() += 1;
        });
        bus.emit(&TrackerEvent::NodeRemoved {
            node_id: "a".to_string(),
        });
        bus.emit(&TrackerEvent::ModalClosed {
            modal_id: "m".to_string(),
        });
        assert_eq!(*hits.borrow(), 1);
    }

    #[test]
    fn test_off_removes_handler() {
        let mut bus = EventBus::new();
        let hits = Rc::new(RefCell::new(0));
        let sink = Rc::clone(&hits);
        let token = bus.on_any(move |_| {
            *sink.borrow_mut() += 1;
        });
        bus.off(token);
        bus.emit(&TrackerEvent::NodeRemoved {
            node_id: "a".to_string(),
        });
        assert_eq!(*hits.borrow(), 0);
    }

    #[test]
    fn test_dispatch_in_registration_order() {
        let mut bus = EventBus::new();
        let order = Rc::new(RefCell::new(Vec::new()));
        for tag in ["first", "second"] {
            let sink = Rc::clone(&order);
            bus.on_any(move |_| sink.borrow_mut().push(tag));
        }
        bus.emit(&TrackerEvent::NodeRemoved {
            node_id: "a".to_string(),
        });
        assert_eq!(*order.borrow(), vec!["first", "second"]);
    }

    #[test]
    fn test_changes_is_empty() {
        assert!(NodeChanges::default().is_empty());
        let changed = NodeChanges {
            value: Some("x".to_string()),
            ..NodeChanges::default()
        };
        assert!(!changed.is_empty());
    }
}

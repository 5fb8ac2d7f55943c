//! In-process live tree: the mutating host structure the tracker observes.
//!
//! A [`LiveDocument`] owns a tree of [`LiveNode`]s and a mutation-observer
//! seam. All mutations go through the document so they queue
//! [`MutationRecord`]s; the host (or a test) then calls
//! [`LiveDocument::deliver_mutations`] to flush one settled batch to every
//! registered observer. This mirrors how a framework re-render lands as one
//! burst of child-list, attribute, and character-data records.
//!
//! Nodes are `Rc`-backed and single-threaded. The tracker holds only
//! [`LiveRef`] weak handles, so it never keeps a removed element alive.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

use serde::{Deserialize, Serialize};

use crate::geometry::{BoundingBox, Viewport};

/// Tags that act as structural landmarks
pub const LANDMARK_TAGS: &[&str] = &["nav", "main", "header", "footer", "aside", "form", "dialog"];

/// ARIA roles that act as structural landmarks
pub const LANDMARK_ROLES: &[&str] = &[
    "navigation",
    "main",
    "banner",
    "contentinfo",
    "complementary",
    "form",
    "search",
    "region",
    "dialog",
    "alertdialog",
];

/// One option of a select element
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectOption {
    /// Submitted value
    pub value: String,
    /// Visible label
    pub label: String,
}

impl SelectOption {
    /// Create a new option
    #[must_use]
    pub fn new(value: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            label: label.into(),
        }
    }
}

/// Subset of computed style the tracker cares about
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputedStyle {
    /// CSS display value
    pub display: String,
    /// CSS visibility value
    pub visibility: String,
    /// CSS position value
    pub position: String,
    /// CSS cursor value
    pub cursor: String,
}

impl Default for ComputedStyle {
    fn default() -> Self {
        Self {
            display: "block".to_string(),
            visibility: "visible".to_string(),
            position: "static".to_string(),
            cursor: "auto".to_string(),
        }
    }
}

struct NodeData {
    tag: String,
    attributes: HashMap<String, String>,
    text: String,
    value: Option<String>,
    checked: Option<bool>,
    disabled: bool,
    options: Vec<SelectOption>,
    style: ComputedStyle,
    rect: BoundingBox,
    children: Vec<LiveNode>,
    parent: Option<Weak<RefCell<NodeData>>>,
}

/// Strong handle to a live node. Clones are cheap and share identity.
#[derive(Clone)]
pub struct LiveNode(Rc<RefCell<NodeData>>);

/// Weak, non-owning handle to a live node
#[derive(Clone)]
pub struct LiveRef(Weak<RefCell<NodeData>>);

impl LiveRef {
    /// Attempt to resolve the node. `None` once the host dropped it.
    #[must_use]
    pub fn upgrade(&self) -> Option<LiveNode> {
        self.0.upgrade().map(LiveNode)
    }
}

impl fmt::Debug for LiveRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.upgrade() {
            Some(node) => write!(f, "LiveRef({})", node.tag()),
            None => write!(f, "LiveRef(<dead>)"),
        }
    }
}

impl PartialEq for LiveNode {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for LiveNode {}

impl fmt::Debug for LiveNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.0.borrow();
        write!(
            f,
            "<{} children={} text={:?}>",
            inner.tag,
            inner.children.len(),
            inner.text
        )
    }
}

impl LiveNode {
    /// Create a detached node with the given tag
    #[must_use]
    pub fn new(tag: impl Into<String>) -> Self {
        Self(Rc::new(RefCell::new(NodeData {
            tag: tag.into().to_ascii_lowercase(),
            attributes: HashMap::new(),
            text: String::new(),
            value: None,
            checked: None,
            disabled: false,
            options: Vec::new(),
            style: ComputedStyle::default(),
            rect: BoundingBox::default(),
            children: Vec::new(),
            parent: None,
        })))
    }

    /// Set an attribute while building a detached subtree
    #[must_use]
    pub fn with_attr(self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.0
            .borrow_mut()
            .attributes
            .insert(name.into().to_ascii_lowercase(), value.into());
        self
    }

    /// Set direct text while building a detached subtree
    #[must_use]
    pub fn with_text(self, text: impl Into<String>) -> Self {
        self.0.borrow_mut().text = text.into();
        self
    }

    /// Set geometry while building a detached subtree
    #[must_use]
    pub fn with_rect(self, rect: BoundingBox) -> Self {
        self.0.borrow_mut().rect = rect;
        self
    }

    /// Set computed style while building a detached subtree
    #[must_use]
    pub fn with_style(self, style: ComputedStyle) -> Self {
        self.0.borrow_mut().style = style;
        self
    }

    /// Set the current form value while building a detached subtree
    #[must_use]
    pub fn with_value(self, value: impl Into<String>) -> Self {
        self.0.borrow_mut().value = Some(value.into());
        self
    }

    /// Set checked state while building a detached subtree
    #[must_use]
    pub fn with_checked(self, checked: bool) -> Self {
        self.0.borrow_mut().checked = Some(checked);
        self
    }

    /// Set disabled state while building a detached subtree
    #[must_use]
    pub fn with_disabled(self, disabled: bool) -> Self {
        self.0.borrow_mut().disabled = disabled;
        self
    }

    /// Set select options while building a detached subtree
    #[must_use]
    pub fn with_options(self, options: Vec<SelectOption>) -> Self {
        self.0.borrow_mut().options = options;
        self
    }

    /// Append a child while building a detached subtree
    #[must_use]
    pub fn with_child(self, child: LiveNode) -> Self {
        child.0.borrow_mut().parent = Some(Rc::downgrade(&self.0));
        self.0.borrow_mut().children.push(child);
        self
    }

    /// Stable pointer identity of this node for the lifetime of the handle
    #[must_use]
    pub fn ptr_id(&self) -> usize {
        Rc::as_ptr(&self.0) as usize
    }

    /// Downgrade to a weak, non-owning handle
    #[must_use]
    pub fn downgrade(&self) -> LiveRef {
        LiveRef(Rc::downgrade(&self.0))
    }

    /// Lowercased tag name
    #[must_use]
    pub fn tag(&self) -> String {
        self.0.borrow().tag.clone()
    }

    /// Attribute value, if present
    #[must_use]
    pub fn attr(&self, name: &str) -> Option<String> {
        self.0.borrow().attributes.get(name).cloned()
    }

    /// Whether the attribute is present at all
    #[must_use]
    pub fn has_attr(&self, name: &str) -> bool {
        self.0.borrow().attributes.contains_key(name)
    }

    /// Explicit ARIA role, if any
    #[must_use]
    pub fn role(&self) -> Option<String> {
        self.attr("role")
    }

    /// Current form value
    #[must_use]
    pub fn value(&self) -> Option<String> {
        self.0.borrow().value.clone()
    }

    /// Current checked state (checkbox/radio/switch)
    #[must_use]
    pub fn checked(&self) -> Option<bool> {
        self.0.borrow().checked
    }

    /// Current disabled state
    #[must_use]
    pub fn disabled(&self) -> bool {
        self.0.borrow().disabled
    }

    /// Select options
    #[must_use]
    pub fn options(&self) -> Vec<SelectOption> {
        self.0.borrow().options.clone()
    }

    /// Computed style snapshot
    #[must_use]
    pub fn style(&self) -> ComputedStyle {
        self.0.borrow().style.clone()
    }

    /// Bounding box snapshot
    #[must_use]
    pub fn rect(&self) -> BoundingBox {
        self.0.borrow().rect
    }

    /// Direct (non-descendant) text, whitespace-normalized
    #[must_use]
    pub fn direct_text(&self) -> String {
        normalize_ws(&self.0.borrow().text)
    }

    /// Concatenated text of this node and all descendants, capped at `max_len` chars
    #[must_use]
    pub fn full_text(&self, max_len: usize) -> String {
        let mut out = String::new();
        self.collect_text(&mut out, max_len);
        normalize_ws(&out)
    }

    fn collect_text(&self, out: &mut String, max_len: usize) {
        if out.len() >= max_len {
            return;
        }
        let inner = self.0.borrow();
        if !inner.text.trim().is_empty() {
            if !out.is_empty() {
                out.push(' ');
            }
            out.push_str(inner.text.trim());
        }
        for child in &inner.children {
            if out.len() >= max_len {
                break;
            }
            child.collect_text(out, max_len);
        }
    }

    /// Ordered children
    #[must_use]
    pub fn children(&self) -> Vec<LiveNode> {
        self.0.borrow().children.clone()
    }

    /// Parent node, if attached and alive
    #[must_use]
    pub fn parent(&self) -> Option<LiveNode> {
        self.0
            .borrow()
            .parent
            .as_ref()
            .and_then(Weak::upgrade)
            .map(LiveNode)
    }

    /// Whether walking parent edges reaches `root`
    #[must_use]
    pub fn is_attached_under(&self, root: &LiveNode) -> bool {
        let mut current = self.clone();
        loop {
            if current == *root {
                return true;
            }
            match current.parent() {
                Some(parent) => current = parent,
                None => return false,
            }
        }
    }

    /// Whether the node is rendered (not display:none / hidden)
    #[must_use]
    pub fn is_visible(&self) -> bool {
        let inner = self.0.borrow();
        inner.style.display != "none"
            && inner.style.visibility != "hidden"
            && !inner.attributes.contains_key("hidden")
            && inner.attributes.get("aria-hidden").map(String::as_str) != Some("true")
    }

    /// Whether this node is a structural landmark
    #[must_use]
    pub fn is_landmark(&self) -> bool {
        self.landmark_role().is_some()
    }

    /// The landmark role of this node, from its explicit role or its tag
    #[must_use]
    pub fn landmark_role(&self) -> Option<String> {
        if let Some(role) = self.role() {
            if LANDMARK_ROLES.contains(&role.as_str()) {
                return Some(role);
            }
        }
        let tag = self.tag();
        match tag.as_str() {
            "nav" => Some("navigation".to_string()),
            "main" => Some("main".to_string()),
            "header" => Some("banner".to_string()),
            "footer" => Some("contentinfo".to_string()),
            "aside" => Some("complementary".to_string()),
            "form" => Some("form".to_string()),
            "dialog" => Some("dialog".to_string()),
            _ => None,
        }
    }

    /// Index among same-tag siblings, 0 when detached
    #[must_use]
    pub fn same_tag_sibling_index(&self) -> usize {
        let tag = self.tag();
        self.parent().map_or(0, |parent| {
            parent
                .children()
                .iter()
                .filter(|c| c.tag() == tag)
                .position(|c| *c == *self)
                .unwrap_or(0)
        })
    }

    /// Absolute index among all siblings, 0 when detached
    #[must_use]
    pub fn child_index(&self) -> usize {
        self.parent().map_or(0, |parent| {
            parent
                .children()
                .iter()
                .position(|c| *c == *self)
                .unwrap_or(0)
        })
    }

    /// The sibling immediately before this node
    #[must_use]
    pub fn previous_sibling(&self) -> Option<LiveNode> {
        let parent = self.parent()?;
        let siblings = parent.children();
        let idx = siblings.iter().position(|c| c == self)?;
        idx.checked_sub(1).map(|i| siblings[i].clone())
    }

    /// The sibling immediately after this node
    #[must_use]
    pub fn next_sibling(&self) -> Option<LiveNode> {
        let parent = self.parent()?;
        let siblings = parent.children();
        let idx = siblings.iter().position(|c| c == self)?;
        siblings.get(idx + 1).cloned()
    }

    /// This node and all descendants, in document order
    #[must_use]
    pub fn descendants(&self) -> Vec<LiveNode> {
        let mut out = Vec::new();
        self.collect_descendants(&mut out);
        out
    }

    fn collect_descendants(&self, out: &mut Vec<LiveNode>) {
        out.push(self.clone());
        for child in self.children() {
            child.collect_descendants(out);
        }
    }

    fn set_parent(&self, parent: Option<&LiveNode>) {
        self.0.borrow_mut().parent = parent.map(|p| Rc::downgrade(&p.0));
    }
}

fn normalize_ws(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// One observed change to the live tree
#[derive(Debug, Clone)]
pub enum MutationRecord {
    /// A subtree was inserted
    ChildAdded {
        /// Root of the inserted subtree
        node: LiveNode,
        /// Parent it was inserted under
        parent: LiveNode,
    },
    /// A subtree was removed
    ChildRemoved {
        /// Root of the removed subtree
        node: LiveNode,
        /// Parent it was removed from
        parent: LiveNode,
    },
    /// An attribute changed
    Attribute {
        /// Affected node
        node: LiveNode,
        /// Attribute name
        name: String,
        /// Previous value, `None` if newly set
        old_value: Option<String>,
    },
    /// Direct text changed
    CharacterData {
        /// Affected node
        node: LiveNode,
        /// Previous text
        old_text: String,
    },
}

/// What an observer wants delivered
#[derive(Debug, Clone)]
pub struct ObserverFilter {
    /// Deliver subtree insert/remove records
    pub child_list: bool,
    /// Deliver direct-text change records
    pub character_data: bool,
    /// Attribute allow-list; empty means no attribute records
    pub attributes: Vec<String>,
}

impl Default for ObserverFilter {
    fn default() -> Self {
        Self {
            child_list: true,
            character_data: true,
            attributes: Vec::new(),
        }
    }
}

impl ObserverFilter {
    fn accepts(&self, record: &MutationRecord) -> bool {
        match record {
            MutationRecord::ChildAdded { .. } | MutationRecord::ChildRemoved { .. } => {
                self.child_list
            }
            MutationRecord::CharacterData { .. } => self.character_data,
            MutationRecord::Attribute { name, .. } => {
                self.attributes.iter().any(|a| a == name)
            }
        }
    }
}

/// Handle for removing an installed observer
pub type ObserverToken = u64;

struct ObserverEntry {
    token: ObserverToken,
    filter: ObserverFilter,
    callback: Box<dyn FnMut(Vec<MutationRecord>)>,
}

/// The live, mutating document the tracker observes.
///
/// All mutations go through this type so they queue mutation records;
/// `deliver_mutations` flushes one settled batch to observers.
pub struct LiveDocument {
    root: LiveNode,
    location: RefCell<String>,
    title: RefCell<String>,
    viewport: Cell<Viewport>,
    pending: RefCell<Vec<MutationRecord>>,
    observers: RefCell<Vec<ObserverEntry>>,
    next_token: Cell<ObserverToken>,
    event_log: RefCell<Vec<(usize, String)>>,
    scrolled_to: Cell<Option<usize>>,
}

impl fmt::Debug for LiveDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveDocument")
            .field("location", &self.location.borrow())
            .field("title", &self.title.borrow())
            .field("pending", &self.pending.borrow().len())
            .field("observers", &self.observers.borrow().len())
            .finish()
    }
}

impl Default for LiveDocument {
    fn default() -> Self {
        Self::new()
    }
}

impl LiveDocument {
    /// Create a document with an empty `body` root
    #[must_use]
    pub fn new() -> Self {
        Self {
            root: LiveNode::new("body"),
            location: RefCell::new("about:blank".to_string()),
            title: RefCell::new(String::new()),
            viewport: Cell::new(Viewport::default()),
            pending: RefCell::new(Vec::new()),
            observers: RefCell::new(Vec::new()),
            next_token: Cell::new(1),
            event_log: RefCell::new(Vec::new()),
            scrolled_to: Cell::new(None),
        }
    }

    /// Set the document location
    #[must_use]
    pub fn with_location(self, location: impl Into<String>) -> Self {
        *self.location.borrow_mut() = location.into();
        self
    }

    /// Set the document title
    #[must_use]
    pub fn with_title(self, title: impl Into<String>) -> Self {
        *self.title.borrow_mut() = title.into();
        self
    }

    /// Set the viewport size
    #[must_use]
    pub fn with_viewport(self, viewport: Viewport) -> Self {
        self.viewport.set(viewport);
        self
    }

    /// Document root
    #[must_use]
    pub fn root(&self) -> LiveNode {
        self.root.clone()
    }

    /// Document location
    #[must_use]
    pub fn location(&self) -> String {
        self.location.borrow().clone()
    }

    /// Document title
    #[must_use]
    pub fn title(&self) -> String {
        self.title.borrow().clone()
    }

    /// Viewport size
    #[must_use]
    pub fn viewport(&self) -> Viewport {
        self.viewport.get()
    }

    /// Whether the node is currently attached under this document's root
    #[must_use]
    pub fn contains(&self, node: &LiveNode) -> bool {
        node.is_attached_under(&self.root)
    }

    /// Find the first attached node carrying `id="..."`
    #[must_use]
    pub fn find_by_id(&self, id: &str) -> Option<LiveNode> {
        self.root
            .descendants()
            .into_iter()
            .find(|n| n.attr("id").as_deref() == Some(id))
    }

    /// All attached nodes with the given tag
    #[must_use]
    pub fn query_tag(&self, tag: &str) -> Vec<LiveNode> {
        let tag = tag.to_ascii_lowercase();
        self.root
            .descendants()
            .into_iter()
            .filter(|n| n.tag() == tag)
            .collect()
    }

    /// Append `child` (possibly a whole detached subtree) under `parent`
    pub fn append_child(&self, parent: &LiveNode, child: LiveNode) {
        child.set_parent(Some(parent));
        parent.0.borrow_mut().children.push(child.clone());
        if self.contains(parent) {
            self.queue(MutationRecord::ChildAdded {
                node: child,
                parent: parent.clone(),
            });
        }
    }

    /// Insert `child` under `parent` at `index` (clamped)
    pub fn insert_child(&self, parent: &LiveNode, index: usize, child: LiveNode) {
        child.set_parent(Some(parent));
        {
            let mut inner = parent.0.borrow_mut();
            let index = index.min(inner.children.len());
            inner.children.insert(index, child.clone());
        }
        if self.contains(parent) {
            self.queue(MutationRecord::ChildAdded {
                node: child,
                parent: parent.clone(),
            });
        }
    }

    /// Detach `node` from its parent
    pub fn remove(&self, node: &LiveNode) {
        let Some(parent) = node.parent() else { return };
        let was_attached = self.contains(node);
        parent.0.borrow_mut().children.retain(|c| c != node);
        node.set_parent(None);
        if was_attached {
            self.queue(MutationRecord::ChildRemoved {
                node: node.clone(),
                parent,
            });
        }
    }

    /// Set an attribute value
    pub fn set_attribute(&self, node: &LiveNode, name: &str, value: impl Into<String>) {
        let name = name.to_ascii_lowercase();
        let old_value = node
            .0
            .borrow_mut()
            .attributes
            .insert(name.clone(), value.into());
        if self.contains(node) {
            self.queue(MutationRecord::Attribute {
                node: node.clone(),
                name,
                old_value,
            });
        }
    }

    /// Remove an attribute
    pub fn remove_attribute(&self, node: &LiveNode, name: &str) {
        let name = name.to_ascii_lowercase();
        let old_value = node.0.borrow_mut().attributes.remove(&name);
        if old_value.is_some() && self.contains(node) {
            self.queue(MutationRecord::Attribute {
                node: node.clone(),
                name,
                old_value,
            });
        }
    }

    /// Replace the direct text of a node
    pub fn set_text(&self, node: &LiveNode, text: impl Into<String>) {
        let old_text = {
            let mut inner = node.0.borrow_mut();
            std::mem::replace(&mut inner.text, text.into())
        };
        if self.contains(node) {
            self.queue(MutationRecord::CharacterData {
                node: node.clone(),
                old_text,
            });
        }
    }

    /// Set the current form value
    pub fn set_value(&self, node: &LiveNode, value: impl Into<String>) {
        let old_value = {
            let mut inner = node.0.borrow_mut();
            inner.value.replace(value.into())
        };
        if self.contains(node) {
            self.queue(MutationRecord::Attribute {
                node: node.clone(),
                name: "value".to_string(),
                old_value,
            });
        }
    }

    /// Set the checked state
    pub fn set_checked(&self, node: &LiveNode, checked: bool) {
        let old = {
            let mut inner = node.0.borrow_mut();
            inner.checked.replace(checked)
        };
        if self.contains(node) {
            self.queue(MutationRecord::Attribute {
                node: node.clone(),
                name: "checked".to_string(),
                old_value: old.map(|c| c.to_string()),
            });
        }
    }

    /// Set the disabled state
    pub fn set_disabled(&self, node: &LiveNode, disabled: bool) {
        let old = {
            let mut inner = node.0.borrow_mut();
            std::mem::replace(&mut inner.disabled, disabled)
        };
        if old != disabled && self.contains(node) {
            self.queue(MutationRecord::Attribute {
                node: node.clone(),
                name: "disabled".to_string(),
                old_value: Some(old.to_string()),
            });
        }
    }

    /// Update geometry. Layout shifts do not queue mutation records.
    pub fn set_rect(&self, node: &LiveNode, rect: BoundingBox) {
        node.0.borrow_mut().rect = rect;
    }

    /// Update computed style
    pub fn set_style(&self, node: &LiveNode, style: ComputedStyle) {
        let changed = {
            let mut inner = node.0.borrow_mut();
            let changed = inner.style != style;
            inner.style = style;
            changed
        };
        // visibility flips surface as a style attribute record
        if changed && self.contains(node) {
            self.queue(MutationRecord::Attribute {
                node: node.clone(),
                name: "style".to_string(),
                old_value: None,
            });
        }
    }

    /// Dispatch a synthetic event (click/input/change/scroll) on a node.
    /// Recorded in the event log for assertions by the host.
    pub fn dispatch(&self, node: &LiveNode, event: &str) {
        self.event_log
            .borrow_mut()
            .push((node.ptr_id(), event.to_string()));
    }

    /// Drain the synthetic-event log
    #[must_use]
    pub fn take_events(&self) -> Vec<(usize, String)> {
        std::mem::take(&mut self.event_log.borrow_mut())
    }

    /// Record that the host scrolled a node into view
    pub fn mark_scrolled_to(&self, node: &LiveNode) {
        self.scrolled_to.set(Some(node.ptr_id()));
    }

    /// Pointer id of the most recently scrolled-to node
    #[must_use]
    pub fn scrolled_to(&self) -> Option<usize> {
        self.scrolled_to.get()
    }

    /// Install a mutation observer. Records matching `filter` are delivered
    /// on each `deliver_mutations` call.
    pub fn observe(
        &self,
        filter: ObserverFilter,
        callback: impl FnMut(Vec<MutationRecord>) + 'static,
    ) -> ObserverToken {
        let token = self.next_token.get();
        self.next_token.set(token + 1);
        self.observers.borrow_mut().push(ObserverEntry {
            token,
            filter,
            callback: Box::new(callback),
        });
        token
    }

    /// Remove a previously installed observer
    pub fn disconnect(&self, token: ObserverToken) {
        self.observers.borrow_mut().retain(|o| o.token != token);
    }

    /// Number of queued, undelivered mutation records
    #[must_use]
    pub fn pending_mutations(&self) -> usize {
        self.pending.borrow().len()
    }

    /// Flush all queued records to every observer as one batch.
    ///
    /// Callbacks run with the observer list swapped out, so they may mutate
    /// the document (queuing records for the next batch) but must not install
    /// or disconnect observers.
    ///
    /// Queued child-list records hold strong clones of the nodes they name,
    /// so a removed subtree stays alive until the next flush.
    pub fn deliver_mutations(&self) {
        let records = std::mem::take(&mut *self.pending.borrow_mut());
        if records.is_empty() {
            return;
        }
        let mut observers = std::mem::take(&mut *self.observers.borrow_mut());
        for entry in &mut observers {
            let matched: Vec<MutationRecord> = records
                .iter()
                .filter(|r| entry.filter.accepts(r))
                .cloned()
                .collect();
            if !matched.is_empty() {
                (entry.callback)(matched);
            }
        }
        let mut slot = self.observers.borrow_mut();
        observers.extend(slot.drain(..));
        *slot = observers;
    }

    fn queue(&self, record: MutationRecord) {
        self.pending.borrow_mut().push(record);
    }
}

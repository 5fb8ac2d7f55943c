//! Tree builder: classifies a live subtree into a stable logical hierarchy.
//!
//! The builder walks the live tree, assigns each node a kind, extracts an
//! accessible label, and flattens semantically-empty wrapper nodes so the
//! visible hierarchy stays proportional to meaningful content rather than
//! incidental markup nesting. Interactive nodes never own children; their
//! descendant text is consolidated into the label instead.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::TrackerConfig;
use crate::dom::{LiveDocument, LiveNode, SelectOption};
use crate::fingerprint::Fingerprint;

/// Cap on consolidated interactive labels, in characters
const LABEL_CAP: usize = 120;

/// Fraction of the viewport a positioned overlay must cover to count as a modal
const MODAL_VIEWPORT_COVERAGE: f64 = 0.3;

/// Tags that never produce tree nodes
const SKIPPED_TAGS: &[&str] = &[
    "script", "style", "meta", "link", "head", "template", "noscript", "title",
];

/// ARIA roles that mark a node interactive
const INTERACTIVE_ROLES: &[&str] = &[
    "button",
    "link",
    "checkbox",
    "radio",
    "switch",
    "tab",
    "menuitem",
    "menuitemcheckbox",
    "menuitemradio",
    "combobox",
    "listbox",
    "option",
    "slider",
    "searchbox",
    "textbox",
    "spinbutton",
];

/// Classification of a logical tree node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeKind {
    /// Clickable/editable element
    Interactive,
    /// Text content
    Text,
    /// Image, video, audio, canvas
    Media,
    /// Structural container
    Container,
    /// Ordered/unordered list
    List,
    /// List item
    ListItem,
    /// Table or table fragment
    Table,
}

/// Subtype of an interactive node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InteractiveKind {
    /// Push button
    Button,
    /// Hyperlink
    Link,
    /// Single-line text input
    TextInput,
    /// Multi-line text input
    Textarea,
    /// Checkbox
    Checkbox,
    /// Radio button
    Radio,
    /// Select/combobox
    Select,
    /// Range slider
    Slider,
    /// Toggle switch
    Switch,
    /// Anything else with interactivity signals
    Other,
}

/// Synchronized form state of an interactive node
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FormState {
    /// Current value
    pub value: Option<String>,
    /// Checked state
    pub checked: Option<bool>,
    /// Disabled state
    pub disabled: bool,
    /// Select options
    pub options: Vec<SelectOption>,
}

/// A classified entry in the logical hierarchy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeNode {
    /// Logical id, equal to the fingerprint id
    pub id: String,
    /// Lowercased tag
    pub tag: String,
    /// Node classification
    pub kind: NodeKind,
    /// Current label
    pub label: String,
    /// Label at build time
    pub original_label: String,
    /// Optional description (aria-description)
    pub description: Option<String>,
    /// Depth in the logical tree
    pub depth: usize,
    /// Default expand state
    pub expanded: bool,
    /// Whether the live node is rendered
    pub visible: bool,
    /// Whether this node is the active modal
    pub is_modal: bool,
    /// Ordered children; always empty for interactive nodes
    pub children: Vec<TreeNode>,
    /// Interactive subtype
    pub interactive: Option<InteractiveKind>,
    /// Heading level for h1..h6
    pub heading_level: Option<u8>,
    /// Alt text for media nodes
    pub media_alt: Option<String>,
    /// Form state for interactive nodes
    pub form: Option<FormState>,
}

impl TreeNode {
    /// Find a node by id in this subtree
    #[must_use]
    pub fn find(&self, id: &str) -> Option<&TreeNode> {
        if self.id == id {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(id))
    }

    /// Find a node mutably by id in this subtree
    pub fn find_mut(&mut self, id: &str) -> Option<&mut TreeNode> {
        if self.id == id {
            return Some(self);
        }
        self.children.iter_mut().find_map(|c| c.find_mut(id))
    }

    /// Detach and return the subtree rooted at `id` (never the receiver itself)
    pub fn remove_subtree(&mut self, id: &str) -> Option<TreeNode> {
        if let Some(pos) = self.children.iter().position(|c| c.id == id) {
            return Some(self.children.remove(pos));
        }
        self.children
            .iter_mut()
            .find_map(|c| c.remove_subtree(id))
    }

    /// All ids in this subtree, receiver first
    #[must_use]
    pub fn subtree_ids(&self) -> Vec<String> {
        let mut out = vec![self.id.clone()];
        for child in &self.children {
            out.extend(child.subtree_ids());
        }
        out
    }

    /// Flattened view of this subtree in document order
    #[must_use]
    pub fn flatten(&self) -> Vec<&TreeNode> {
        let mut out = vec![self];
        for child in &self.children {
            out.extend(child.flatten());
        }
        out
    }

    /// Whether any node in this subtree is interactive
    #[must_use]
    pub fn has_interactive_descendant(&self) -> bool {
        self.kind == NodeKind::Interactive
            || self.children.iter().any(TreeNode::has_interactive_descendant)
    }
}

/// The authoritative logical tree for one tracking session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomTree {
    /// Root node (the document body)
    pub root: TreeNode,
    /// Number of logical nodes
    pub node_count: usize,
    /// Deepest logical depth
    pub max_depth: usize,
    /// Active modal, if one is open
    pub active_modal_id: Option<String>,
    /// Source document location
    pub location: String,
    /// Source document title
    pub title: String,
}

/// One built node paired with its live handle and fingerprint
#[derive(Debug, Clone)]
pub struct BuiltEntry {
    /// Logical id
    pub id: String,
    /// Parent logical id, `None` for the root
    pub parent_id: Option<String>,
    /// Live counterpart
    pub node: LiveNode,
    /// Captured fingerprint
    pub fingerprint: Fingerprint,
}

/// Output of a full build
#[derive(Debug, Clone)]
pub struct BuildOutput {
    /// The logical tree
    pub tree: DomTree,
    /// Every built node with its live handle
    pub entries: Vec<BuiltEntry>,
}

/// Walks a live subtree and produces the logical hierarchy
#[derive(Debug)]
pub struct TreeBuilder<'a> {
    config: &'a TrackerConfig,
}

impl<'a> TreeBuilder<'a> {
    /// Create a builder over the given configuration
    #[must_use]
    pub const fn new(config: &'a TrackerConfig) -> Self {
        Self { config }
    }

    /// Build the full logical tree for a document
    #[must_use]
    pub fn build(&self, doc: &LiveDocument, now_ms: u64) -> BuildOutput {
        let root_live = doc.root();
        let mut entries = Vec::new();
        let root_fp = Fingerprint::capture(&root_live, doc.viewport(), now_ms);
        let root_id = root_fp.id.clone();
        entries.push(BuiltEntry {
            id: root_id.clone(),
            parent_id: None,
            node: root_live.clone(),
            fingerprint: root_fp,
        });
        let mut root = TreeNode {
            id: root_id.clone(),
            tag: root_live.tag(),
            kind: NodeKind::Container,
            label: String::new(),
            original_label: String::new(),
            description: None,
            depth: 0,
            expanded: true,
            visible: true,
            is_modal: false,
            children: Vec::new(),
            interactive: None,
            heading_level: None,
            media_alt: None,
            form: None,
        };
        for child in root_live.children() {
            let (nodes, mut child_entries) =
                self.build_subtree(doc, &child, 1, &root_id, now_ms, entries.len());
            root.children.extend(nodes);
            entries.append(&mut child_entries);
        }
        self.apply_expand_policy(&mut root);
        let mut tree = DomTree {
            node_count: entries.len(),
            max_depth: entries
                .iter()
                .filter_map(|e| root.find(&e.id).map(|n| n.depth))
                .max()
                .unwrap_or(0),
            active_modal_id: None,
            location: doc.location(),
            title: doc.title(),
            root,
        };
        self.mark_active_modal(doc, &mut tree, &entries);
        debug!(nodes = tree.node_count, depth = tree.max_depth, "built tree");
        BuildOutput { tree, entries }
    }

    /// Build the logical nodes for one live subtree.
    ///
    /// Returns promoted children instead of the node itself when the node is
    /// a semantically-empty wrapper. `budget_used` is the number of entries
    /// already minted, so the tracked-node ceiling holds across one build.
    #[must_use]
    pub fn build_subtree(
        &self,
        doc: &LiveDocument,
        node: &LiveNode,
        depth: usize,
        parent_id: &str,
        now_ms: u64,
        budget_used: usize,
    ) -> (Vec<TreeNode>, Vec<BuiltEntry>) {
        let mut entries = Vec::new();
        let nodes = self.build_inner(doc, node, depth, parent_id, now_ms, budget_used, &mut entries);
        (nodes, entries)
    }

    #[allow(clippy::too_many_arguments)]
    fn build_inner(
        &self,
        doc: &LiveDocument,
        node: &LiveNode,
        depth: usize,
        parent_id: &str,
        now_ms: u64,
        budget_used: usize,
        entries: &mut Vec<BuiltEntry>,
    ) -> Vec<TreeNode> {
        if depth > self.config.max_depth
            || budget_used + entries.len() >= self.config.max_tracked_nodes
        {
            return Vec::new();
        }
        let Some(kind) = self.classify(node) else {
            return Vec::new();
        };

        // flattening: promote children of semantically-empty wrappers
        if kind == NodeKind::Container && self.is_meaningless_wrapper(node) {
            let mut promoted = Vec::new();
            for child in node.children() {
                promoted.extend(
                    self.build_inner(doc, &child, depth, parent_id, now_ms, budget_used, entries),
                );
            }
            return promoted;
        }

        let fingerprint = Fingerprint::capture(node, doc.viewport(), now_ms);
        let id = fingerprint.id.clone();
        let label = self.extract_label(doc, node, kind);
        let interactive = if kind == NodeKind::Interactive {
            Some(interactive_kind(node))
        } else {
            None
        };
        let mut tree_node = TreeNode {
            id: id.clone(),
            tag: node.tag(),
            kind,
            original_label: label.clone(),
            label,
            description: node.attr("aria-description"),
            depth,
            expanded: true,
            visible: node.is_visible(),
            is_modal: false,
            children: Vec::new(),
            interactive,
            heading_level: heading_level(node),
            media_alt: if kind == NodeKind::Media {
                node.attr("alt")
            } else {
                None
            },
            form: if kind == NodeKind::Interactive {
                Some(form_state(node))
            } else {
                None
            },
        };
        entries.push(BuiltEntry {
            id: id.clone(),
            parent_id: Some(parent_id.to_string()),
            node: node.clone(),
            fingerprint,
        });

        // interactive nodes never own children
        if kind != NodeKind::Interactive {
            for child in node.children() {
                tree_node.children.extend(self.build_inner(
                    doc,
                    &child,
                    depth + 1,
                    &id,
                    now_ms,
                    budget_used,
                    entries,
                ));
            }
        }
        vec![tree_node]
    }

    /// Assign a node kind, or `None` for nodes that never enter the tree
    #[must_use]
    pub fn classify(&self, node: &LiveNode) -> Option<NodeKind> {
        let tag = node.tag();
        if SKIPPED_TAGS.contains(&tag.as_str()) {
            return None;
        }
        if is_interactive(node) {
            return Some(NodeKind::Interactive);
        }
        Some(match tag.as_str() {
            "ul" | "ol" | "dl" => NodeKind::List,
            "li" | "dt" | "dd" => NodeKind::ListItem,
            "table" | "thead" | "tbody" | "tfoot" | "tr" | "td" | "th" => NodeKind::Table,
            "img" | "video" | "audio" | "svg" | "canvas" | "picture" | "figure" => NodeKind::Media,
            "h1" | "h2" | "h3" | "h4" | "h5" | "h6" | "p" | "span" | "label" | "strong" | "em"
            | "b" | "i" | "blockquote" | "code" | "pre" | "small" | "caption" | "legend" => {
                NodeKind::Text
            }
            _ => NodeKind::Container,
        })
    }

    /// Resolve a node's label, in priority order: referenced label, explicit
    /// accessible label, title, direct text, role name, landmark name, then
    /// full text as a last resort for non-structural nodes.
    #[must_use]
    pub fn extract_label(&self, doc: &LiveDocument, node: &LiveNode, kind: NodeKind) -> String {
        if let Some(referenced) = referenced_label(doc, node) {
            return truncate(&referenced, LABEL_CAP);
        }
        if let Some(label) = node.attr("aria-label").filter(|l| !l.trim().is_empty()) {
            return truncate(label.trim(), LABEL_CAP);
        }
        if kind == NodeKind::Interactive {
            return truncate(&consolidated_label(node), LABEL_CAP);
        }
        if let Some(title) = node.attr("title").filter(|t| !t.trim().is_empty()) {
            return truncate(title.trim(), LABEL_CAP);
        }
        let direct = node.direct_text();
        if !direct.is_empty() {
            return truncate(&direct, LABEL_CAP);
        }
        if let Some(role) = node.role() {
            return role;
        }
        if let Some(landmark) = node.landmark_role() {
            return landmark;
        }
        if kind == NodeKind::Container {
            return String::new();
        }
        truncate(&node.full_text(LABEL_CAP), LABEL_CAP)
    }

    /// Whether a label is built from the generic wrapper vocabulary.
    ///
    /// Tunable heuristic: legitimately-labeled containers that happen to use
    /// these words will be flattened too.
    #[must_use]
    pub fn is_generic_label(&self, label: &str) -> bool {
        let words: Vec<&str> = label.split_whitespace().collect();
        !words.is_empty()
            && words.iter().all(|w| {
                self.config
                    .generic_label_words
                    .iter()
                    .any(|g| g.eq_ignore_ascii_case(w))
            })
    }

    /// A structural node with no direct text, no accessible label, title or
    /// role, that is not a landmark, carries no meaning of its own. A label
    /// or title built entirely from the generic wrapper vocabulary does not
    /// rescue the node.
    fn is_meaningless_wrapper(&self, node: &LiveNode) -> bool {
        if node.is_landmark() {
            return false;
        }
        if !node.direct_text().is_empty() {
            return false;
        }
        if node.attr("role").is_some_and(|v| !v.trim().is_empty()) {
            return false;
        }
        for attr in ["aria-label", "title"] {
            if node
                .attr(attr)
                .is_some_and(|v| !v.trim().is_empty() && !self.is_generic_label(v.trim()))
            {
                return false;
            }
        }
        if node
            .attr("id")
            .is_some_and(|id| crate::fingerprint::is_stable_identifier(&id))
        {
            return false;
        }
        true
    }

    /// Whether a node is the active modal overlay: dialog-like role, or a
    /// fixed/absolutely positioned box covering at least 30% of the viewport
    /// with interactive descendants
    #[must_use]
    pub fn is_modal_candidate(&self, doc: &LiveDocument, node: &LiveNode) -> bool {
        if !node.is_visible() {
            return false;
        }
        if matches!(node.role().as_deref(), Some("dialog" | "alertdialog")) || node.tag() == "dialog"
        {
            return true;
        }
        let style = node.style();
        if style.position != "fixed" && style.position != "absolute" {
            return false;
        }
        if node.rect().area() < MODAL_VIEWPORT_COVERAGE * doc.viewport().area() {
            return false;
        }
        node.descendants().iter().any(is_interactive)
    }

    fn mark_active_modal(&self, doc: &LiveDocument, tree: &mut DomTree, entries: &[BuiltEntry]) {
        // last candidate in document order wins; only one modal is active
        let active = entries
            .iter()
            .skip(1)
            .filter(|e| self.is_modal_candidate(doc, &e.node))
            .next_back();
        if let Some(entry) = active {
            if let Some(node) = tree.root.find_mut(&entry.id) {
                node.is_modal = true;
                tree.active_modal_id = Some(entry.id.clone());
            }
        }
    }

    /// Default expand/collapse state: always expand nodes with an interactive
    /// descendant or within the initial-depth band; collapse oversized child
    /// lists; expand small groups
    pub fn apply_expand_policy(&self, node: &mut TreeNode) {
        node.expanded = if node.has_interactive_descendant() {
            true
        } else if node.children.len() > self.config.collapse_child_ceiling {
            false
        } else {
            node.depth < self.config.initial_expand_depth
                || node.children.len() <= self.config.small_group_size
        };
        for child in &mut node.children {
            self.apply_expand_policy(child);
        }
    }
}

fn truncate(text: &str, cap: usize) -> String {
    if text.chars().count() <= cap {
        text.to_string()
    } else {
        text.chars().take(cap).collect()
    }
}

/// Interactivity signals: semantic tags, ARIA roles, inline handlers, a
/// non-negative tab index, or pointer-cursor styling over non-trivial content
/// (fallback signal only)
#[must_use]
pub fn is_interactive(node: &LiveNode) -> bool {
    let tag = node.tag();
    match tag.as_str() {
        "button" | "input" | "select" | "textarea" | "summary" => return true,
        "a" => {
            if node.has_attr("href") {
                return true;
            }
        }
        _ => {}
    }
    if node
        .role()
        .is_some_and(|r| INTERACTIVE_ROLES.contains(&r.as_str()))
    {
        return true;
    }
    if node.has_attr("onclick") {
        return true;
    }
    if node
        .attr("tabindex")
        .and_then(|t| t.parse::<i32>().ok())
        .is_some_and(|t| t >= 0)
    {
        return true;
    }
    // weakest signal: styled like a control and carries content
    node.style().cursor == "pointer"
        && (!node.direct_text().is_empty() || node.attr("aria-label").is_some())
}

fn interactive_kind(node: &LiveNode) -> InteractiveKind {
    let role = node.role();
    if let Some(role) = role.as_deref() {
        match role {
            "button" => return InteractiveKind::Button,
            "link" => return InteractiveKind::Link,
            "checkbox" => return InteractiveKind::Checkbox,
            "radio" => return InteractiveKind::Radio,
            "switch" => return InteractiveKind::Switch,
            "slider" => return InteractiveKind::Slider,
            "combobox" | "listbox" => return InteractiveKind::Select,
            "textbox" | "searchbox" => return InteractiveKind::TextInput,
            _ => {}
        }
    }
    match node.tag().as_str() {
        "button" => InteractiveKind::Button,
        "a" => InteractiveKind::Link,
        "select" => InteractiveKind::Select,
        "textarea" => InteractiveKind::Textarea,
        "input" => match node.attr("type").as_deref() {
            Some("checkbox") => InteractiveKind::Checkbox,
            Some("radio") => InteractiveKind::Radio,
            Some("range") => InteractiveKind::Slider,
            Some("button" | "submit" | "reset") => InteractiveKind::Button,
            _ => InteractiveKind::TextInput,
        },
        _ => InteractiveKind::Other,
    }
}

/// Consolidated label for interactive nodes: all descendant text, then value,
/// placeholder, alt and title as fallbacks
fn consolidated_label(node: &LiveNode) -> String {
    let text = node.full_text(LABEL_CAP);
    if !text.is_empty() {
        return text;
    }
    for source in [
        node.value(),
        node.attr("placeholder"),
        node.attr("alt"),
        node.attr("title"),
    ] {
        if let Some(value) = source.filter(|v| !v.trim().is_empty()) {
            return value.trim().to_string();
        }
    }
    String::new()
}

/// Label referenced through aria-labelledby or a matching label\[for\]
fn referenced_label(doc: &LiveDocument, node: &LiveNode) -> Option<String> {
    if let Some(ids) = node.attr("aria-labelledby") {
        let parts: Vec<String> = ids
            .split_whitespace()
            .filter_map(|id| doc.find_by_id(id))
            .map(|n| n.full_text(LABEL_CAP))
            .filter(|t| !t.is_empty())
            .collect();
        if !parts.is_empty() {
            return Some(parts.join(" "));
        }
    }
    let own_id = node.attr("id")?;
    doc.root()
        .descendants()
        .into_iter()
        .find(|n| n.tag() == "label" && n.attr("for").as_deref() == Some(own_id.as_str()))
        .map(|l| l.full_text(LABEL_CAP))
        .filter(|t| !t.is_empty())
}

fn heading_level(node: &LiveNode) -> Option<u8> {
    match node.tag().as_str() {
        "h1" => Some(1),
        "h2" => Some(2),
        "h3" => Some(3),
        "h4" => Some(4),
        "h5" => Some(5),
        "h6" => Some(6),
        _ => None,
    }
}

/// Snapshot the form state of an interactive node
#[must_use]
pub fn form_state(node: &LiveNode) -> FormState {
    FormState {
        value: node.value().or_else(|| node.attr("value")),
        checked: node.checked(),
        disabled: node.disabled() || node.has_attr("disabled"),
        options: node.options(),
    }
}

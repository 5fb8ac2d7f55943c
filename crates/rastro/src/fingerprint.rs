//! Multi-attribute fingerprints: the stable-identity record for a live node.
//!
//! A fingerprint is captured once when a node enters the tree and refreshed
//! on every successful re-match. Its `id` never changes; everything else is
//! volatile. Matching never relies on framework-generated identifiers or
//! CSS-in-JS class names; those are filtered out at capture time.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::dom::LiveNode;
use crate::geometry::{BoundingBox, Point, Viewport};

/// Maximum ancestor-path depth captured per fingerprint
pub const ANCESTOR_DEPTH: usize = 4;

/// Cap on captured node text, in characters
const TEXT_CAP: usize = 200;

/// Cap on captured neighbor text, in characters
const NEIGHBOR_TEXT_CAP: usize = 80;

/// One level of the truncated ancestor chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AncestorStep {
    /// Ancestor tag
    pub tag: String,
    /// Explicit ARIA role, if any
    #[serde(default)]
    pub role: Option<String>,
    /// Stable author identifier, if any
    #[serde(default)]
    pub identifier: Option<String>,
    /// Landmark role, if the ancestor is a landmark
    #[serde(default)]
    pub landmark: Option<String>,
    /// Ancestor's index among its siblings
    #[serde(default)]
    pub index: usize,
}

/// Nearest landmark ancestor, the most durable path anchor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LandmarkAnchor {
    /// Landmark role (navigation, main, form, ...)
    pub role: String,
    /// Parent-edge distance from the fingerprinted node
    pub distance: usize,
}

/// Identity signal drawn from a node's textual surroundings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NeighborContext {
    /// Text of the previous sibling
    #[serde(default)]
    pub previous_text: Option<String>,
    /// Text of the next sibling
    #[serde(default)]
    pub next_text: Option<String>,
    /// Direct text of the parent
    #[serde(default)]
    pub parent_text: Option<String>,
}

/// The stable-identity record for a live node.
///
/// Invariant: `id` is assigned once and never changes; all other fields may
/// be refreshed on every successful re-match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fingerprint {
    /// Logical identity, assigned once
    pub id: String,
    /// Lowercased tag
    pub tag: String,
    /// Explicit test identifier (data-testid)
    #[serde(default)]
    pub test_id: Option<String>,
    /// Stable author-assigned id attribute
    #[serde(default)]
    pub stable_id: Option<String>,
    /// Explicit ARIA role
    #[serde(default)]
    pub role: Option<String>,
    /// Accessible label
    #[serde(default)]
    pub label: Option<String>,
    /// Form name attribute
    #[serde(default)]
    pub name: Option<String>,
    /// Visible text
    #[serde(default)]
    pub text: Option<String>,
    /// Placeholder text
    #[serde(default)]
    pub placeholder: Option<String>,
    /// Current form value
    #[serde(default)]
    pub value: Option<String>,
    /// Image alt text
    #[serde(default)]
    pub alt: Option<String>,
    /// Title attribute
    #[serde(default)]
    pub title: Option<String>,
    /// Normalized link target
    #[serde(default)]
    pub href: Option<String>,
    /// Input subtype (type attribute)
    #[serde(default)]
    pub input_type: Option<String>,
    /// Truncated ancestor chain, nearest first
    #[serde(default)]
    pub ancestors: Vec<AncestorStep>,
    /// Index among same-tag siblings
    #[serde(default)]
    pub sibling_index: usize,
    /// Absolute index among all siblings
    #[serde(default)]
    pub child_index: usize,
    /// Nearest landmark ancestor
    #[serde(default)]
    pub landmark: Option<LandmarkAnchor>,
    /// Adjacent and parent text
    #[serde(default)]
    pub neighbors: NeighborContext,
    /// Bounding box at capture time
    #[serde(default)]
    pub rect: BoundingBox,
    /// Center position as a fraction of the viewport
    #[serde(default)]
    pub viewport_ratio: Point,
    /// Width/height ratio
    #[serde(default)]
    pub aspect_ratio: f64,
    /// Capture timestamp, milliseconds since epoch
    pub captured_at_ms: u64,
    /// Confidence of the most recent successful match
    #[serde(default)]
    pub last_confidence: f64,
}

impl Fingerprint {
    /// Capture a fresh fingerprint from the node's current state
    #[must_use]
    pub fn capture(node: &LiveNode, viewport: Viewport, now_ms: u64) -> Self {
        let rect = node.rect();
        let center = rect.center();
        let text = {
            let direct = node.direct_text();
            if direct.is_empty() {
                let full = node.full_text(TEXT_CAP);
                if full.is_empty() { None } else { Some(full) }
            } else {
                Some(direct)
            }
        };
        let (ancestors, landmark) = capture_ancestors(node);
        Self {
            id: format!("el-{}", Uuid::new_v4()),
            tag: node.tag(),
            test_id: node.attr("data-testid"),
            stable_id: node.attr("id").filter(|id| is_stable_identifier(id)),
            role: node.role(),
            label: node.attr("aria-label"),
            name: node.attr("name"),
            text,
            placeholder: node.attr("placeholder"),
            value: node.value().or_else(|| node.attr("value")),
            alt: node.attr("alt"),
            title: node.attr("title"),
            href: node.attr("href").map(|h| normalize_href(&h)),
            input_type: node.attr("type"),
            ancestors,
            sibling_index: node.same_tag_sibling_index(),
            child_index: node.child_index(),
            landmark,
            neighbors: capture_neighbors(node),
            rect,
            viewport_ratio: Point::new(
                ratio(center.x, viewport.width),
                ratio(center.y, viewport.height),
            ),
            aspect_ratio: rect.aspect_ratio(),
            captured_at_ms: now_ms,
            last_confidence: 1.0,
        }
    }

    /// Refresh volatile fields after a successful re-match.
    ///
    /// Identity and structural fields are preserved; only text, label,
    /// value, geometry, timestamp and confidence are updated.
    pub fn refresh(&mut self, node: &LiveNode, viewport: Viewport, confidence: f64, now_ms: u64) {
        let direct = node.direct_text();
        self.text = if direct.is_empty() {
            let full = node.full_text(TEXT_CAP);
            if full.is_empty() { None } else { Some(full) }
        } else {
            Some(direct)
        };
        self.label = node.attr("aria-label");
        self.value = node.value().or_else(|| node.attr("value"));
        let rect = node.rect();
        let center = rect.center();
        self.rect = rect;
        self.viewport_ratio = Point::new(
            ratio(center.x, viewport.width),
            ratio(center.y, viewport.height),
        );
        self.aspect_ratio = rect.aspect_ratio();
        self.captured_at_ms = now_ms;
        self.last_confidence = confidence;
    }

    /// The strongest stable identifier carried by this fingerprint
    #[must_use]
    pub fn strongest_identifier(&self) -> Option<(&'static str, &str)> {
        if let Some(id) = self.test_id.as_deref() {
            return Some(("data-testid", id));
        }
        if let Some(id) = self.stable_id.as_deref() {
            return Some(("id", id));
        }
        if let Some(href) = self.href.as_deref() {
            return Some(("href", href));
        }
        if let Some(name) = self.name.as_deref() {
            return Some(("name", name));
        }
        if let Some(label) = self.label.as_deref() {
            return Some(("aria-label", label));
        }
        None
    }
}

fn ratio(value: f64, extent: f64) -> f64 {
    if extent <= 0.0 {
        0.0
    } else {
        (value / extent).clamp(0.0, 1.0)
    }
}

/// Walk the ancestor chain, bounded at [`ANCESTOR_DEPTH`], stopping early
/// after the first landmark or stable-identified ancestor. Context past a
/// landmark adds churn without signal.
fn capture_ancestors(node: &LiveNode) -> (Vec<AncestorStep>, Option<LandmarkAnchor>) {
    let mut steps = Vec::new();
    let mut landmark = None;
    let mut current = node.parent();
    let mut distance = 1usize;
    while let Some(ancestor) = current {
        if steps.len() >= ANCESTOR_DEPTH {
            break;
        }
        let ancestor_landmark = ancestor.landmark_role();
        let identifier = ancestor.attr("id").filter(|id| is_stable_identifier(id));
        if landmark.is_none() {
            if let Some(role) = &ancestor_landmark {
                landmark = Some(LandmarkAnchor {
                    role: role.clone(),
                    distance,
                });
            }
        }
        let stop = ancestor_landmark.is_some() || identifier.is_some();
        steps.push(AncestorStep {
            tag: ancestor.tag(),
            role: ancestor.role(),
            identifier,
            landmark: ancestor_landmark,
            index: ancestor.child_index(),
        });
        if stop {
            break;
        }
        current = ancestor.parent();
        distance += 1;
    }
    (steps, landmark)
}

fn capture_neighbors(node: &LiveNode) -> NeighborContext {
    let sibling_text = |sibling: Option<LiveNode>| {
        sibling
            .map(|s| s.full_text(NEIGHBOR_TEXT_CAP))
            .filter(|t| !t.is_empty())
    };
    NeighborContext {
        previous_text: sibling_text(node.previous_sibling()),
        next_text: sibling_text(node.next_sibling()),
        parent_text: node
            .parent()
            .map(|p| p.direct_text())
            .filter(|t| !t.is_empty()),
    }
}

/// Normalize a link target: lowercase, drop the fragment, drop a trailing slash
#[must_use]
pub fn normalize_href(href: &str) -> String {
    let href = href.trim().to_lowercase();
    let href = href.split('#').next().unwrap_or_default();
    href.trim_end_matches('/').to_string()
}

#[allow(clippy::expect_used)]
fn hex_hash_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[0-9a-fA-F]{6,}$").expect("valid regex"))
}

#[allow(clippy::expect_used)]
fn numeric_suffix_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"[-_][0-9]{3,}$").expect("valid regex"))
}

#[allow(clippy::expect_used)]
fn hash_token_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9]{8,}$").expect("valid regex"))
}

/// Identifier prefixes minted by common frameworks; never stable across renders
const FRAMEWORK_ID_PREFIXES: &[&str] = &[
    "ember-",
    "react-",
    "ng-",
    "vue-",
    "svelte-",
    "radix-",
    "headlessui-",
    "mui-",
    "chakra-",
    "mantine-",
    "downshift-",
    ":r",
];

/// Class-name prefixes minted by CSS-in-JS libraries
const GENERATED_CLASS_PREFIXES: &[&str] = &["css-", "sc-", "jss", "emotion-", "_"];

/// Whether an id attribute looks author-assigned rather than framework-minted.
///
/// Rejects purely numeric ids, short hash-like hex strings, ids with long
/// numeric tails, and known framework prefixes.
#[must_use]
pub fn is_stable_identifier(id: &str) -> bool {
    let id = id.trim();
    if id.len() < 3 {
        return false;
    }
    if id.chars().all(|c| c.is_ascii_digit()) {
        return false;
    }
    if hex_hash_pattern().is_match(id) {
        return false;
    }
    if numeric_suffix_pattern().is_match(id) {
        return false;
    }
    let lower = id.to_lowercase();
    if FRAMEWORK_ID_PREFIXES
        .iter()
        .any(|prefix| lower.starts_with(prefix))
    {
        return false;
    }
    // uuid-shaped ids
    if id.len() >= 32 && id.chars().all(|c| c.is_ascii_hexdigit() || c == '-') {
        return false;
    }
    true
}

/// Whether a class name looks generated (CSS-in-JS hash), so matching must
/// never rely on it.
#[must_use]
pub fn is_high_entropy_class(name: &str) -> bool {
    let name = name.trim();
    if name.is_empty() {
        return false;
    }
    let lower = name.to_lowercase();
    if GENERATED_CLASS_PREFIXES
        .iter()
        .any(|prefix| lower.starts_with(prefix))
    {
        return true;
    }
    // css-modules style tails: styles__button___a8Xq2
    if let Some(tail) = name.rsplit(['_', '-']).next() {
        if tail.len() >= 5
            && tail != name
            && tail.chars().filter(char::is_ascii_digit).count() >= 2
        {
            return true;
        }
    }
    // bare hash tokens: digit-heavy mixed-case runs
    if hash_token_pattern().is_match(name) {
        let digits = name.chars().filter(char::is_ascii_digit).count();
        let has_upper = name.chars().any(|c| c.is_ascii_uppercase());
        let has_lower = name.chars().any(|c| c.is_ascii_lowercase());
        if digits >= 2 && has_upper && has_lower {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::LiveDocument;

    fn fixture() -> (LiveDocument, LiveNode) {
        let doc = LiveDocument::new();
        let nav = LiveNode::new("nav");
        let list = LiveNode::new("ul");
        let item = LiveNode::new("li").with_text("Home");
        let link = LiveNode::new("a")
            .with_attr("href", "https://example.com/Home/#top")
            .with_text("Home");
        doc.append_child(&doc.root(), nav.clone());
        doc.append_child(&nav, list.clone());
        doc.append_child(&list, item.clone());
        doc.append_child(&item, link.clone());
        (doc, link)
    }

    #[test]
    fn test_capture_basics() {
        let (doc, link) = fixture();
        let fp = Fingerprint::capture(&link, doc.viewport(), 1_000);
        assert_eq!(fp.tag, "a");
        assert_eq!(fp.text.as_deref(), Some("Home"));
        assert_eq!(fp.href.as_deref(), Some("https://example.com/home"));
        assert_eq!(fp.captured_at_ms, 1_000);
        assert!(fp.id.starts_with("el-"));
    }

    #[test]
    fn test_ancestor_walk_stops_at_landmark() {
        let (doc, link) = fixture();
        let fp = Fingerprint::capture(&link, doc.viewport(), 0);
        // li -> ul -> nav, and the walk stops at the nav landmark
        assert_eq!(fp.ancestors.len(), 3);
        assert_eq!(fp.ancestors[2].tag, "nav");
        assert_eq!(fp.ancestors[2].landmark.as_deref(), Some("navigation"));
        let anchor = fp.landmark.as_ref().unwrap();
        assert_eq!(anchor.role, "navigation");
        assert_eq!(anchor.distance, 3);
    }

    #[test]
    fn test_ancestor_walk_bounded_depth() {
        let doc = LiveDocument::new();
        let mut parent = doc.root();
        for _ in 0..8 {
            let div = LiveNode::new("div");
            doc.append_child(&parent, div.clone());
            parent = div;
        }
        let leaf = LiveNode::new("span").with_text("deep");
        doc.append_child(&parent, leaf.clone());
        let fp = Fingerprint::capture(&leaf, doc.viewport(), 0);
        assert_eq!(fp.ancestors.len(), ANCESTOR_DEPTH);
        assert!(fp.landmark.is_none());
    }

    #[test]
    fn test_refresh_preserves_identity_and_structure() {
        let (doc, link) = fixture();
        let mut fp = Fingerprint::capture(&link, doc.viewport(), 1_000);
        let id = fp.id.clone();
        let ancestors = fp.ancestors.clone();
        doc.set_text(&link, "Start");
        fp.refresh(&link, doc.viewport(), 0.82, 2_000);
        assert_eq!(fp.id, id);
        assert_eq!(fp.ancestors, ancestors);
        assert_eq!(fp.text.as_deref(), Some("Start"));
        assert_eq!(fp.captured_at_ms, 2_000);
        assert!((fp.last_confidence - 0.82).abs() < f64::EPSILON);
    }

    #[test]
    fn test_neighbor_context() {
        let doc = LiveDocument::new();
        let row = LiveNode::new("div").with_text("Billing");
        let before = LiveNode::new("span").with_text("Name:");
        let input = LiveNode::new("input");
        let after = LiveNode::new("span").with_text("(required)");
        doc.append_child(&doc.root(), row.clone());
        doc.append_child(&row, before);
        doc.append_child(&row, input.clone());
        doc.append_child(&row, after);
        let fp = Fingerprint::capture(&input, doc.viewport(), 0);
        assert_eq!(fp.neighbors.previous_text.as_deref(), Some("Name:"));
        assert_eq!(fp.neighbors.next_text.as_deref(), Some("(required)"));
        assert_eq!(fp.neighbors.parent_text.as_deref(), Some("Billing"));
    }

    #[test]
    fn test_stable_identifier_rejections() {
        assert!(!is_stable_identifier("12345"));
        assert!(!is_stable_identifier("a3f9c2"));
        assert!(!is_stable_identifier("ember-419"));
        assert!(!is_stable_identifier("react-select-2-input"));
        assert!(!is_stable_identifier(":r1:"));
        assert!(!is_stable_identifier("radix-:R2kq:"));
        assert!(!is_stable_identifier("item_0042"));
        assert!(!is_stable_identifier("ab"));
    }

    #[test]
    fn test_stable_identifier_acceptance() {
        assert!(is_stable_identifier("checkout-button"));
        assert!(is_stable_identifier("main-nav"));
        assert!(is_stable_identifier("search"));
    }

    #[test]
    fn test_high_entropy_class_detection() {
        assert!(is_high_entropy_class("css-1q2w3e"));
        assert!(is_high_entropy_class("sc-bdVaJa"));
        assert!(is_high_entropy_class("styles__button___a8Xq2"));
        assert!(is_high_entropy_class("xK9f2Qz8"));
        assert!(!is_high_entropy_class("btn-primary"));
        assert!(!is_high_entropy_class("nav-list"));
        assert!(!is_high_entropy_class(""));
    }

    #[test]
    fn test_normalize_href() {
        assert_eq!(normalize_href("/Pricing/#plans"), "/pricing");
        assert_eq!(normalize_href("https://a.example/x/"), "https://a.example/x");
    }

    #[test]
    fn test_strongest_identifier_priority() {
        let (doc, link) = fixture();
        let mut fp = Fingerprint::capture(&link, doc.viewport(), 0);
        assert_eq!(
            fp.strongest_identifier(),
            Some(("href", "https://example.com/home"))
        );
        fp.test_id = Some("home-link".to_string());
        assert_eq!(
            fp.strongest_identifier(),
            Some(("data-testid", "home-link"))
        );
    }
}

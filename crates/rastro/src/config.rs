//! Tracker configuration and match weights.

use serde::{Deserialize, Serialize};

/// Default confidence threshold for accepting a fuzzy match
pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.6;

/// Default grace period before a vanished node is declared lost,
/// tuned to absorb one full batched re-render cycle
pub const DEFAULT_GRACE_PERIOD_MS: u64 = 120;

/// Default pixel distance at which position similarity reaches zero
pub const DEFAULT_POSITION_THRESHOLD_PX: f64 = 300.0;

/// Per-category weights for confidence scoring.
///
/// Categories absent on both sides are excluded from the weighted average,
/// so these weights only need to be meaningful relative to each other.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MatchWeights {
    /// Explicit/author identifier equality
    pub identity: f64,
    /// Role, accessible label, form name
    pub semantic: f64,
    /// Visible text, placeholder, alt, link target
    pub content: f64,
    /// Ancestor chain and sibling indices
    pub structural: f64,
    /// Adjacent and parent text
    pub neighbor: f64,
    /// Box overlap and normalized distance
    pub position: f64,
}

impl Default for MatchWeights {
    fn default() -> Self {
        Self {
            identity: 0.30,
            semantic: 0.20,
            content: 0.20,
            structural: 0.15,
            neighbor: 0.10,
            position: 0.05,
        }
    }
}

/// Tracker configuration surface
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Minimum confidence for accepting a fuzzy match
    pub confidence_threshold: f64,
    /// How long a vanished node stays `searching` before being purged
    pub grace_period_ms: u64,
    /// Hard ceiling on registry size
    pub max_tracked_nodes: usize,
    /// Maximum tree depth built/tracked
    pub max_depth: usize,
    /// Depth band that is always auto-expanded
    pub initial_expand_depth: usize,
    /// Nodes with more children than this start collapsed
    pub collapse_child_ceiling: usize,
    /// Groups at or below this size are always expanded
    pub small_group_size: usize,
    /// Pixel distance at which position similarity reaches zero
    pub position_threshold_px: f64,
    /// Attributes the change subscription watches
    pub attribute_allowlist: Vec<String>,
    /// Generic words treated as meaningless wrapper labels (tunable heuristic)
    pub generic_label_words: Vec<String>,
    /// Per-category match weights
    pub weights: MatchWeights,
    /// Verbose match-decision logging
    pub debug: bool,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            grace_period_ms: DEFAULT_GRACE_PERIOD_MS,
            max_tracked_nodes: 5_000,
            max_depth: 25,
            initial_expand_depth: 3,
            collapse_child_ceiling: 20,
            small_group_size: 5,
            position_threshold_px: DEFAULT_POSITION_THRESHOLD_PX,
            attribute_allowlist: [
                "id",
                "class",
                "style",
                "value",
                "checked",
                "disabled",
                "hidden",
                "href",
                "src",
                "alt",
                "title",
                "placeholder",
                "role",
                "aria-label",
                "aria-labelledby",
                "aria-hidden",
                "aria-expanded",
                "data-testid",
                "tabindex",
                "type",
                "name",
            ]
            .iter()
            .map(ToString::to_string)
            .collect(),
            generic_label_words: [
                "div", "container", "wrapper", "content", "inner", "outer", "box", "row", "col",
                "column", "section", "block", "item", "main", "root", "layout",
            ]
            .iter()
            .map(ToString::to_string)
            .collect(),
            weights: MatchWeights::default(),
            debug: false,
        }
    }
}

impl TrackerConfig {
    /// Create the default configuration
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the confidence threshold
    #[must_use]
    pub const fn with_confidence_threshold(mut self, threshold: f64) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    /// Set the grace period
    #[must_use]
    pub const fn with_grace_period_ms(mut self, ms: u64) -> Self {
        self.grace_period_ms = ms;
        self
    }

    /// Set the match weights
    #[must_use]
    pub const fn with_weights(mut self, weights: MatchWeights) -> Self {
        self.weights = weights;
        self
    }

    /// Set the tracked-node ceiling
    #[must_use]
    pub const fn with_max_tracked_nodes(mut self, max: usize) -> Self {
        self.max_tracked_nodes = max;
        self
    }

    /// Set the maximum depth
    #[must_use]
    pub const fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    /// Enable debug logging of match decisions
    #[must_use]
    pub const fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Apply a partial update, leaving unset fields untouched
    pub fn apply(&mut self, patch: ConfigPatch) {
        if let Some(v) = patch.confidence_threshold {
            self.confidence_threshold = v;
        }
        if let Some(v) = patch.grace_period_ms {
            self.grace_period_ms = v;
        }
        if let Some(v) = patch.max_tracked_nodes {
            self.max_tracked_nodes = v;
        }
        if let Some(v) = patch.max_depth {
            self.max_depth = v;
        }
        if let Some(v) = patch.position_threshold_px {
            self.position_threshold_px = v;
        }
        if let Some(v) = patch.generic_label_words {
            self.generic_label_words = v;
        }
        if let Some(v) = patch.weights {
            self.weights = v;
        }
        if let Some(v) = patch.debug {
            self.debug = v;
        }
    }
}

/// Partial configuration update for `set_config`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigPatch {
    /// New confidence threshold
    pub confidence_threshold: Option<f64>,
    /// New grace period
    pub grace_period_ms: Option<u64>,
    /// New registry ceiling
    pub max_tracked_nodes: Option<usize>,
    /// New maximum depth
    pub max_depth: Option<usize>,
    /// New position falloff threshold
    pub position_threshold_px: Option<f64>,
    /// New wrapper-label vocabulary
    pub generic_label_words: Option<Vec<String>>,
    /// New match weights
    pub weights: Option<MatchWeights>,
    /// New debug flag
    pub debug: Option<bool>,
}

//! Confidence-scored matching of stored fingerprints against live candidates.
//!
//! Tag equality is a hard prerequisite, and an explicit test identifier on
//! both sides short-circuits the whole computation. Everything else is a
//! weighted average over six signal categories, where a category absent on
//! both sides is excluded rather than counted against the candidate.

use std::collections::HashMap;

use tracing::trace;

use crate::config::{MatchWeights, TrackerConfig};
use crate::dom::LiveNode;
use crate::fingerprint::Fingerprint;
use crate::geometry::Viewport;
use crate::similarity::{overlap_ratio, position_similarity, text_similarity};

/// How a match was established
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum MatchStrategy {
    /// Explicit identifier equality or a reconnected original reference
    Exact,
    /// Weighted multi-category fingerprint scoring
    Fuzzy,
    /// Pure structural position match, the least anchored signal
    PositionFallback,
}

/// Per-category score breakdown. `None` means the category had no data on
/// either side and was excluded from the average.
#[derive(Debug, Clone, Copy, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct MatchDetails {
    /// Explicit/author identifier equality
    pub identity: Option<f64>,
    /// Role, accessible label, form name
    pub semantic: Option<f64>,
    /// Visible text, placeholder, alt, link target
    pub content: Option<f64>,
    /// Ancestor chain and sibling indices
    pub structural: Option<f64>,
    /// Adjacent and parent text
    pub neighbor: Option<f64>,
    /// Box overlap and normalized distance
    pub position: Option<f64>,
}

/// A scored candidate
#[derive(Debug, Clone)]
pub struct MatchResult {
    /// The candidate live node
    pub node: LiveNode,
    /// Confidence in [0, 1]
    pub confidence: f64,
    /// Per-category breakdown
    pub details: MatchDetails,
    /// Strategy that produced this result
    pub strategy: MatchStrategy,
}

/// Everything scoring needs beyond the fingerprint and candidate
#[derive(Debug, Clone, Copy)]
pub struct MatchContext {
    /// Per-category weights
    pub weights: MatchWeights,
    /// Minimum confidence for `find_best_match`
    pub threshold: f64,
    /// Pixel distance at which position similarity reaches zero
    pub position_threshold_px: f64,
    /// Current viewport, for capturing candidate geometry
    pub viewport: Viewport,
    /// Current time for transient candidate fingerprints
    pub now_ms: u64,
}

impl MatchContext {
    /// Build a context from tracker configuration
    #[must_use]
    pub fn from_config(config: &TrackerConfig, viewport: Viewport, now_ms: u64) -> Self {
        Self {
            weights: config.weights,
            threshold: config.confidence_threshold,
            position_threshold_px: config.position_threshold_px,
            viewport,
            now_ms,
        }
    }
}

/// Stateless matching kernel
#[derive(Debug, Clone, Copy, Default)]
pub struct Matcher;

impl Matcher {
    /// Score one candidate against a stored fingerprint
    #[must_use]
    pub fn score(fingerprint: &Fingerprint, candidate: &LiveNode, ctx: &MatchContext) -> MatchResult {
        let snapshot = Fingerprint::capture(candidate, ctx.viewport, ctx.now_ms);
        let (confidence, details, strategy) =
            Self::score_fingerprints(fingerprint, &snapshot, &ctx.weights, ctx.position_threshold_px);
        MatchResult {
            node: candidate.clone(),
            confidence,
            details,
            strategy,
        }
    }

    /// Score a stored fingerprint against a candidate snapshot
    #[must_use]
    pub fn score_fingerprints(
        stored: &Fingerprint,
        candidate: &Fingerprint,
        weights: &MatchWeights,
        position_threshold_px: f64,
    ) -> (f64, MatchDetails, MatchStrategy) {
        // tag equality is a hard prerequisite, not a weighted factor
        if stored.tag != candidate.tag {
            return (0.0, MatchDetails::default(), MatchStrategy::Fuzzy);
        }

        // explicit test identifiers short-circuit: equal is certain identity,
        // unequal is certain non-identity, no partial credit either way
        if let (Some(a), Some(b)) = (&stored.test_id, &candidate.test_id) {
            let confidence = if a == b { 1.0 } else { 0.0 };
            let details = MatchDetails {
                identity: Some(confidence),
                ..MatchDetails::default()
            };
            return (confidence, details, MatchStrategy::Exact);
        }

        let details = MatchDetails {
            identity: identity_score(stored, candidate),
            semantic: semantic_score(stored, candidate),
            content: content_score(stored, candidate),
            structural: Some(structural_score(stored, candidate)),
            neighbor: neighbor_score(stored, candidate),
            position: position_score(stored, candidate, position_threshold_px),
        };

        let mut weighted = 0.0;
        let mut applicable = 0.0;
        for (score, weight) in [
            (details.identity, weights.identity),
            (details.semantic, weights.semantic),
            (details.content, weights.content),
            (details.structural, weights.structural),
            (details.neighbor, weights.neighbor),
            (details.position, weights.position),
        ] {
            if let Some(score) = score {
                weighted += score * weight;
                applicable += weight;
            }
        }
        let confidence = if applicable > 0.0 {
            (weighted / applicable).clamp(0.0, 1.0)
        } else {
            0.0
        };
        (confidence, details, MatchStrategy::Fuzzy)
    }

    /// Best candidate at or above `ctx.threshold`, or `None`
    #[must_use]
    pub fn find_best_match(
        fingerprint: &Fingerprint,
        candidates: &[LiveNode],
        ctx: &MatchContext,
    ) -> Option<MatchResult> {
        let mut best: Option<MatchResult> = None;
        for candidate in candidates {
            if candidate.tag() != fingerprint.tag {
                continue;
            }
            let result = Self::score(fingerprint, candidate, ctx);
            trace!(
                fingerprint = %fingerprint.id,
                confidence = result.confidence,
                "scored candidate"
            );
            if best.as_ref().map_or(true, |b| result.confidence > b.confidence) {
                best = Some(result);
            }
        }
        best.filter(|b| b.confidence >= ctx.threshold)
    }

    /// Batch-match many fingerprints against many candidates.
    ///
    /// Candidates are grouped by tag first. Returns a best-match-or-none per
    /// fingerprint; no one-to-one assignment is enforced, so callers resolve
    /// conflicts by consuming matches in descending confidence order.
    #[must_use]
    pub fn match_all(
        fingerprints: &[&Fingerprint],
        candidates: &[LiveNode],
        ctx: &MatchContext,
    ) -> Vec<(String, Option<MatchResult>)> {
        let mut by_tag: HashMap<String, Vec<LiveNode>> = HashMap::new();
        for candidate in candidates {
            by_tag
                .entry(candidate.tag())
                .or_default()
                .push(candidate.clone());
        }
        fingerprints
            .iter()
            .map(|fp| {
                let best = by_tag
                    .get(&fp.tag)
                    .and_then(|group| Self::find_best_match(fp, group, ctx));
                (fp.id.clone(), best)
            })
            .collect()
    }

    /// Whether two fingerprints share any exact stable identifier
    #[must_use]
    pub fn exact_identifier_match(stored: &Fingerprint, candidate: &Fingerprint) -> bool {
        if stored.tag != candidate.tag {
            return false;
        }
        let pairs = [
            (&stored.test_id, &candidate.test_id),
            (&stored.stable_id, &candidate.stable_id),
            (&stored.href, &candidate.href),
            (&stored.name, &candidate.name),
            (&stored.label, &candidate.label),
        ];
        pairs
            .iter()
            .any(|(a, b)| matches!((a, b), (Some(x), Some(y)) if x == y))
    }

    /// Pure structural equality: same tag, same sibling/child indices, and an
    /// identical ancestor tag/index/landmark chain. Last-resort signal for
    /// nodes with no stable identifier at all.
    #[must_use]
    pub fn structural_match(stored: &Fingerprint, candidate: &Fingerprint) -> bool {
        stored.tag == candidate.tag
            && stored.sibling_index == candidate.sibling_index
            && stored.child_index == candidate.child_index
            && stored.ancestors.len() == candidate.ancestors.len()
            && stored
                .ancestors
                .iter()
                .zip(&candidate.ancestors)
                .all(|(a, b)| a.tag == b.tag && a.index == b.index && a.landmark == b.landmark)
    }
}

fn identity_score(stored: &Fingerprint, candidate: &Fingerprint) -> Option<f64> {
    match (&stored.stable_id, &candidate.stable_id) {
        (None, None) => None,
        (Some(a), Some(b)) => Some(if a == b { 1.0 } else { 0.0 }),
        _ => Some(0.0),
    }
}

fn pair_score(
    a: Option<&str>,
    b: Option<&str>,
    compare: impl Fn(&str, &str) -> f64,
) -> Option<f64> {
    match (a, b) {
        (None, None) => None,
        (Some(x), Some(y)) => Some(compare(x, y)),
        _ => Some(0.0),
    }
}

fn average(scores: &[Option<f64>]) -> Option<f64> {
    let present: Vec<f64> = scores.iter().flatten().copied().collect();
    if present.is_empty() {
        None
    } else {
        Some(present.iter().sum::<f64>() / present.len() as f64)
    }
}

fn exact(a: &str, b: &str) -> f64 {
    if a == b { 1.0 } else { 0.0 }
}

fn semantic_score(stored: &Fingerprint, candidate: &Fingerprint) -> Option<f64> {
    average(&[
        pair_score(stored.role.as_deref(), candidate.role.as_deref(), exact),
        pair_score(
            stored.label.as_deref(),
            candidate.label.as_deref(),
            text_similarity,
        ),
        pair_score(stored.name.as_deref(), candidate.name.as_deref(), exact),
    ])
}

fn content_score(stored: &Fingerprint, candidate: &Fingerprint) -> Option<f64> {
    average(&[
        pair_score(
            stored.text.as_deref(),
            candidate.text.as_deref(),
            text_similarity,
        ),
        pair_score(
            stored.placeholder.as_deref(),
            candidate.placeholder.as_deref(),
            text_similarity,
        ),
        pair_score(
            stored.alt.as_deref(),
            candidate.alt.as_deref(),
            text_similarity,
        ),
        pair_score(stored.href.as_deref(), candidate.href.as_deref(), exact),
    ])
}

fn structural_score(stored: &Fingerprint, candidate: &Fingerprint) -> f64 {
    let chain = ancestor_chain_similarity(stored, candidate);
    let sibling = index_proximity(stored.sibling_index, candidate.sibling_index);
    let child = index_proximity(stored.child_index, candidate.child_index);
    0.5 * chain + 0.25 * sibling + 0.25 * child
}

fn ancestor_chain_similarity(stored: &Fingerprint, candidate: &Fingerprint) -> f64 {
    let longest = stored.ancestors.len().max(candidate.ancestors.len());
    if longest == 0 {
        return 1.0;
    }
    let mut total = 0.0;
    for (a, b) in stored.ancestors.iter().zip(&candidate.ancestors) {
        if a.tag != b.tag {
            continue;
        }
        let mut step = 0.5;
        if a.identifier == b.identifier {
            step += 0.25;
        }
        if a.landmark == b.landmark {
            step += 0.15;
        }
        if a.index == b.index {
            step += 0.1;
        }
        total += step;
    }
    total / longest as f64
}

fn index_proximity(a: usize, b: usize) -> f64 {
    1.0 / (1.0 + a.abs_diff(b) as f64)
}

fn neighbor_score(stored: &Fingerprint, candidate: &Fingerprint) -> Option<f64> {
    average(&[
        pair_score(
            stored.neighbors.previous_text.as_deref(),
            candidate.neighbors.previous_text.as_deref(),
            text_similarity,
        ),
        pair_score(
            stored.neighbors.next_text.as_deref(),
            candidate.neighbors.next_text.as_deref(),
            text_similarity,
        ),
        pair_score(
            stored.neighbors.parent_text.as_deref(),
            candidate.neighbors.parent_text.as_deref(),
            text_similarity,
        ),
    ])
}

fn position_score(
    stored: &Fingerprint,
    candidate: &Fingerprint,
    threshold_px: f64,
) -> Option<f64> {
    if stored.rect.area() <= 0.0 && candidate.rect.area() <= 0.0 {
        return None;
    }
    let overlap = overlap_ratio(&stored.rect, &candidate.rect);
    let proximity = position_similarity(&stored.rect, &candidate.rect, threshold_px);
    Some(0.5 * overlap + 0.5 * proximity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::LiveDocument;
    use crate::geometry::BoundingBox;

    fn ctx() -> MatchContext {
        MatchContext::from_config(&TrackerConfig::default(), Viewport::default(), 0)
    }

    fn attached(doc: &LiveDocument, node: LiveNode) -> LiveNode {
        doc.append_child(&doc.root(), node.clone());
        node
    }

    #[test]
    fn test_tag_mismatch_is_zero() {
        let doc = LiveDocument::new();
        let button = attached(&doc, LiveNode::new("button").with_text("Submit Form"));
        let link = attached(&doc, LiveNode::new("a").with_text("Submit Form"));
        let fp = Fingerprint::capture(&button, doc.viewport(), 0);
        let result = Matcher::score(&fp, &link, &ctx());
        assert!(result.confidence.abs() < f64::EPSILON);
    }

    #[test]
    fn test_test_id_short_circuit_equal() {
        let doc = LiveDocument::new();
        let old = attached(
            &doc,
            LiveNode::new("button")
                .with_attr("data-testid", "cta")
                .with_text("Register Now"),
        );
        let fp = Fingerprint::capture(&old, doc.viewport(), 0);
        doc.remove(&old);
        // text drifted entirely, but the identifier pins identity
        let new = attached(
            &doc,
            LiveNode::new("button")
                .with_attr("data-testid", "cta")
                .with_text("Sign Up Today"),
        );
        let result = Matcher::score(&fp, &new, &ctx());
        assert!((result.confidence - 1.0).abs() < f64::EPSILON);
        assert_eq!(result.strategy, MatchStrategy::Exact);
    }

    #[test]
    fn test_test_id_short_circuit_unequal() {
        let doc = LiveDocument::new();
        let old = attached(
            &doc,
            LiveNode::new("button")
                .with_attr("data-testid", "cta")
                .with_text("Submit"),
        );
        let fp = Fingerprint::capture(&old, doc.viewport(), 0);
        let other = attached(
            &doc,
            LiveNode::new("button")
                .with_attr("data-testid", "cancel")
                .with_text("Submit"),
        );
        let result = Matcher::score(&fp, &other, &ctx());
        assert!(result.confidence.abs() < f64::EPSILON);
        assert_eq!(result.strategy, MatchStrategy::Exact);
    }

    #[test]
    fn test_content_match_scenario() {
        let doc = LiveDocument::new();
        let rect = BoundingBox::new(100.0, 100.0, 120.0, 40.0);
        let old = attached(
            &doc,
            LiveNode::new("button").with_text("Submit Form").with_rect(rect),
        );
        let fp = Fingerprint::capture(&old, doc.viewport(), 0);
        doc.remove(&old);
        let new = attached(
            &doc,
            LiveNode::new("button").with_text("Submit Form").with_rect(rect),
        );
        let result = Matcher::score(&fp, &new, &ctx());
        assert!(result.confidence > 0.7);
        assert!(result.details.content.unwrap_or(0.0) > 0.9);
    }

    #[test]
    fn test_absent_categories_do_not_penalize() {
        let doc = LiveDocument::new();
        let old = attached(&doc, LiveNode::new("span").with_text("Price"));
        let fp = Fingerprint::capture(&old, doc.viewport(), 0);
        doc.remove(&old);
        let new = attached(&doc, LiveNode::new("span").with_text("Price"));
        let result = Matcher::score(&fp, &new, &ctx());
        // no ids, labels or neighbors anywhere; content+structural carry it
        assert!(result.details.identity.is_none());
        assert!(result.details.semantic.is_none());
        assert!(result.details.neighbor.is_none());
        assert!(result.confidence > 0.9);
    }

    #[test]
    fn test_confidence_monotonic_in_content() {
        let doc = LiveDocument::new();
        let rect = BoundingBox::new(10.0, 10.0, 80.0, 30.0);
        let old = attached(
            &doc,
            LiveNode::new("button").with_text("Save draft now").with_rect(rect),
        );
        let fp = Fingerprint::capture(&old, doc.viewport(), 0);
        doc.remove(&old);
        let close = attached(
            &doc,
            LiveNode::new("button").with_text("Save draft").with_rect(rect),
        );
        let far = attached(
            &doc,
            LiveNode::new("button").with_text("Delete everything").with_rect(rect),
        );
        let close_result = Matcher::score(&fp, &close, &ctx());
        let far_result = Matcher::score(&fp, &far, &ctx());
        assert!(close_result.confidence > far_result.confidence);
    }

    #[test]
    fn test_find_best_match_respects_threshold() {
        let doc = LiveDocument::new();
        let old = attached(&doc, LiveNode::new("button").with_text("Checkout"));
        let fp = Fingerprint::capture(&old, doc.viewport(), 0);
        doc.remove(&old);
        let unrelated = attached(
            &doc,
            LiveNode::new("button")
                .with_text("Wipe account")
                .with_rect(BoundingBox::new(900.0, 900.0, 10.0, 10.0)),
        );
        let candidates = vec![unrelated];
        let mut strict = ctx();
        strict.threshold = 0.95;
        assert!(Matcher::find_best_match(&fp, &candidates, &strict).is_none());
    }

    #[test]
    fn test_match_all_groups_by_tag() {
        let doc = LiveDocument::new();
        let button = attached(&doc, LiveNode::new("button").with_text("Go"));
        let link = attached(&doc, LiveNode::new("a").with_text("Go"));
        let fp_button = Fingerprint::capture(&button, doc.viewport(), 0);
        let fp_link = Fingerprint::capture(&link, doc.viewport(), 0);
        let candidates = vec![button.clone(), link.clone()];
        let results = Matcher::match_all(&[&fp_button, &fp_link], &candidates, &ctx());
        assert_eq!(results.len(), 2);
        let (_, best_button) = &results[0];
        assert_eq!(best_button.as_ref().map(|r| r.node.clone()), Some(button));
        let (_, best_link) = &results[1];
        assert_eq!(best_link.as_ref().map(|r| r.node.clone()), Some(link));
    }

    #[test]
    fn test_exact_identifier_match() {
        let doc = LiveDocument::new();
        let a = attached(
            &doc,
            LiveNode::new("input").with_attr("name", "email").with_attr("type", "email"),
        );
        let fp_a = Fingerprint::capture(&a, doc.viewport(), 0);
        doc.remove(&a);
        let b = attached(
            &doc,
            LiveNode::new("input").with_attr("name", "email").with_attr("type", "email"),
        );
        let fp_b = Fingerprint::capture(&b, doc.viewport(), 0);
        assert!(Matcher::exact_identifier_match(&fp_a, &fp_b));
    }

    #[test]
    fn test_structural_match() {
        let doc = LiveDocument::new();
        let row = LiveNode::new("div");
        doc.append_child(&doc.root(), row.clone());
        let first = LiveNode::new("button").with_text("A");
        doc.append_child(&row, first.clone());
        let fp = Fingerprint::capture(&first, doc.viewport(), 0);
        doc.remove(&first);
        let replacement = LiveNode::new("button").with_text("B");
        doc.append_child(&row, replacement.clone());
        let snapshot = Fingerprint::capture(&replacement, doc.viewport(), 0);
        assert!(Matcher::structural_match(&fp, &snapshot));
    }
}

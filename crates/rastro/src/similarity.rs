//! Pure similarity primitives for fuzzy matching.
//!
//! String kernels (edit distance, prefix-weighted alignment, bigram overlap,
//! token sets) and geometric kernels (box overlap, position falloff, size and
//! aspect ratios). Everything here is a pure function of its inputs; the
//! weighting policy lives in the matcher.

use crate::config::DEFAULT_POSITION_THRESHOLD_PX;
use crate::geometry::BoundingBox;

/// Winkler prefix scaling factor
const WINKLER_PREFIX_SCALE: f64 = 0.1;

/// Winkler maximum counted common prefix
const WINKLER_MAX_PREFIX: usize = 4;

/// Weight of position falloff in combined visual similarity
pub const VISUAL_POSITION_WEIGHT: f64 = 0.5;

/// Weight of size ratio in combined visual similarity
pub const VISUAL_SIZE_WEIGHT: f64 = 0.3;

/// Weight of aspect ratio in combined visual similarity
pub const VISUAL_ASPECT_WEIGHT: f64 = 0.2;

/// Lowercase and collapse whitespace
#[must_use]
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Normalized Levenshtein similarity: `1 - distance / max_len`.
/// Both empty is 1.0; exactly one empty is 0.0.
#[must_use]
pub fn levenshtein_similarity(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let distance = levenshtein(&a, &b);
    1.0 - distance as f64 / a.len().max(b.len()) as f64
}

fn levenshtein(a: &[char], b: &[char]) -> usize {
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0usize; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = prev[j] + usize::from(ca != cb);
            current[j + 1] = substitution.min(prev[j + 1] + 1).min(current[j] + 1);
        }
        std::mem::swap(&mut prev, &mut current);
    }
    prev[b.len()]
}

/// Jaro-Winkler similarity: alignment similarity boosted by shared prefixes.
/// Identical strings score 1.0, fully disjoint strings 0.0.
#[must_use]
pub fn jaro_winkler(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let jaro = jaro_similarity(&a, &b);
    let prefix = a
        .iter()
        .zip(&b)
        .take(WINKLER_MAX_PREFIX)
        .take_while(|(x, y)| x == y)
        .count();
    jaro + prefix as f64 * WINKLER_PREFIX_SCALE * (1.0 - jaro)
}

fn jaro_similarity(a: &[char], b: &[char]) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let window = (a.len().max(b.len()) / 2).saturating_sub(1);
    let mut a_matched = vec![false; a.len()];
    let mut b_matched = vec![false; b.len()];
    let mut matches = 0usize;
    for (i, ca) in a.iter().enumerate() {
        let start = i.saturating_sub(window);
        let end = (i + window + 1).min(b.len());
        for j in start..end {
            if !b_matched[j] && b[j] == *ca {
                a_matched[i] = true;
                b_matched[j] = true;
                matches += 1;
                break;
            }
        }
    }
    if matches == 0 {
        return 0.0;
    }
    let mut transpositions = 0usize;
    let mut k = 0usize;
    for (i, matched) in a_matched.iter().enumerate() {
        if *matched {
            while !b_matched[k] {
                k += 1;
            }
            if a[i] != b[k] {
                transpositions += 1;
            }
            k += 1;
        }
    }
    let m = matches as f64;
    (m / a.len() as f64 + m / b.len() as f64 + (m - transpositions as f64 / 2.0) / m) / 3.0
}

/// Dice coefficient over character bigrams.
/// Strings shorter than two characters fall back to equality.
#[must_use]
pub fn bigram_similarity(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.len() < 2 || b.len() < 2 {
        return if a == b && !a.is_empty() { 1.0 } else { 0.0 };
    }
    let mut bigrams: Vec<(char, char)> = b.windows(2).map(|w| (w[0], w[1])).collect();
    let mut intersection = 0usize;
    for w in a.windows(2) {
        if let Some(pos) = bigrams.iter().position(|&bg| bg == (w[0], w[1])) {
            bigrams.swap_remove(pos);
            intersection += 1;
        }
    }
    2.0 * intersection as f64 / (a.len() + b.len() - 2) as f64
}

/// Order-independent token overlap (Dice over token sets).
/// Tolerant of added or removed words.
#[must_use]
pub fn token_set_similarity(a: &str, b: &str) -> f64 {
    let a_tokens: std::collections::HashSet<&str> = a.split_whitespace().collect();
    let b_tokens: std::collections::HashSet<&str> = b.split_whitespace().collect();
    if a_tokens.is_empty() && b_tokens.is_empty() {
        return 1.0;
    }
    if a_tokens.is_empty() || b_tokens.is_empty() {
        return 0.0;
    }
    let intersection = a_tokens.intersection(&b_tokens).count();
    2.0 * intersection as f64 / (a_tokens.len() + b_tokens.len()) as f64
}

/// Hybrid text similarity.
///
/// Short-circuits to 1.0 on case/whitespace-normalized equality; empty
/// against anything is 0.0. Single tokens use the prefix-weighted measure,
/// multi-word text uses the token-set measure.
#[must_use]
pub fn text_similarity(a: &str, b: &str) -> f64 {
    let a = normalize_text(a);
    let b = normalize_text(b);
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    if a == b {
        return 1.0;
    }
    let single_token = !a.contains(' ') && !b.contains(' ');
    if single_token {
        jaro_winkler(&a, &b)
    } else {
        token_set_similarity(&a, &b)
    }
}

/// Box overlap: intersection over union. Disjoint or touching boxes score 0.
#[must_use]
pub fn overlap_ratio(a: &BoundingBox, b: &BoundingBox) -> f64 {
    let intersection = a.intersection_area(b);
    if intersection <= 0.0 {
        return 0.0;
    }
    let union = a.area() + b.area() - intersection;
    if union <= 0.0 {
        0.0
    } else {
        intersection / union
    }
}

/// Linear falloff with Euclidean center distance, exactly 0 at `threshold_px`
#[must_use]
pub fn position_similarity(a: &BoundingBox, b: &BoundingBox, threshold_px: f64) -> f64 {
    let distance = a.center().distance_to(&b.center());
    if threshold_px <= 0.0 {
        return if distance == 0.0 { 1.0 } else { 0.0 };
    }
    (1.0 - distance / threshold_px).max(0.0)
}

/// Ratio of the smaller area to the larger. Two zero-area boxes score 1.0.
#[must_use]
pub fn size_similarity(a: &BoundingBox, b: &BoundingBox) -> f64 {
    let (area_a, area_b) = (a.area(), b.area());
    if area_a <= 0.0 && area_b <= 0.0 {
        return 1.0;
    }
    if area_a <= 0.0 || area_b <= 0.0 {
        return 0.0;
    }
    area_a.min(area_b) / area_a.max(area_b)
}

/// Ratio of the smaller aspect ratio to the larger
#[must_use]
pub fn aspect_ratio_similarity(a: &BoundingBox, b: &BoundingBox) -> f64 {
    let (ar_a, ar_b) = (a.aspect_ratio(), b.aspect_ratio());
    if ar_a <= 0.0 && ar_b <= 0.0 {
        return 1.0;
    }
    if ar_a <= 0.0 || ar_b <= 0.0 {
        return 0.0;
    }
    ar_a.min(ar_b) / ar_a.max(ar_b)
}

/// Combined visual similarity: 0.5 position, 0.3 size, 0.2 aspect
#[must_use]
pub fn visual_similarity(a: &BoundingBox, b: &BoundingBox) -> f64 {
    VISUAL_POSITION_WEIGHT * position_similarity(a, b, DEFAULT_POSITION_THRESHOLD_PX)
        + VISUAL_SIZE_WEIGHT * size_similarity(a, b)
        + VISUAL_ASPECT_WEIGHT * aspect_ratio_similarity(a, b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_levenshtein_identity() {
        assert!((levenshtein_similarity("submit", "submit") - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_levenshtein_one_edit() {
        // one substitution over six chars
        let sim = levenshtein_similarity("submit", "sobmit");
        assert!((sim - 5.0 / 6.0).abs() < 1e-9);
    }

    #[test]
    fn test_jaro_winkler_bounds() {
        assert!((jaro_winkler("save", "save") - 1.0).abs() < f64::EPSILON);
        assert!(jaro_winkler("abc", "xyz").abs() < f64::EPSILON);
    }

    #[test]
    fn test_jaro_winkler_prefix_boost() {
        // jaro 17/18, lifted to 0.9611 by the three-char shared prefix
        let boosted = jaro_winkler("martha", "marhta");
        assert!((boosted - 0.9611).abs() < 1e-3);
        // a rotation keeps every letter but shares no prefix and few
        // in-window alignments
        assert!(jaro_winkler("submitted", "ttedsubmi") < boosted);
    }

    #[test]
    fn test_bigram_similarity() {
        assert!((bigram_similarity("night", "night") - 1.0).abs() < f64::EPSILON);
        assert!(bigram_similarity("night", "nacht") > 0.0);
        assert!(bigram_similarity("ab", "cd").abs() < f64::EPSILON);
    }

    #[test]
    fn test_token_set_ignores_order() {
        let sim = token_set_similarity("save your work", "work your save");
        assert!((sim - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_token_set_tolerates_added_word() {
        let sim = token_set_similarity("submit form", "submit the form");
        assert!((sim - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_text_similarity_normalized_equality() {
        assert!((text_similarity("  Submit   Form ", "submit form") - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_text_similarity_empty_is_zero() {
        assert!(text_similarity("submit", "").abs() < f64::EPSILON);
        assert!(text_similarity("", "").abs() < f64::EPSILON);
    }

    #[test]
    fn test_overlap_touching_is_zero() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BoundingBox::new(10.0, 0.0, 10.0, 10.0);
        assert!(overlap_ratio(&a, &b).abs() < f64::EPSILON);
    }

    #[test]
    fn test_overlap_identical_is_one() {
        let a = BoundingBox::new(5.0, 5.0, 20.0, 10.0);
        assert!((overlap_ratio(&a, &a) - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_position_similarity_linear_falloff() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BoundingBox::new(150.0, 0.0, 10.0, 10.0);
        // centers 150px apart with a 300px threshold
        assert!((position_similarity(&a, &b, 300.0) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_position_similarity_zero_at_threshold() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BoundingBox::new(300.0, 0.0, 10.0, 10.0);
        assert!(position_similarity(&a, &b, 300.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_size_similarity() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BoundingBox::new(0.0, 0.0, 20.0, 10.0);
        assert!((size_similarity(&a, &b) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_visual_similarity_identical() {
        let a = BoundingBox::new(40.0, 40.0, 100.0, 50.0);
        assert!((visual_similarity(&a, &a) - 1.0).abs() < 1e-9);
    }

    proptest! {
        #[test]
        fn prop_text_similarity_in_unit_range(a in ".{0,24}", b in ".{0,24}") {
            let sim = text_similarity(&a, &b);
            prop_assert!((0.0..=1.0).contains(&sim));
        }

        #[test]
        fn prop_levenshtein_symmetry(a in "[a-z]{0,16}", b in "[a-z]{0,16}") {
            let forward = levenshtein_similarity(&a, &b);
            let backward = levenshtein_similarity(&b, &a);
            prop_assert!((forward - backward).abs() < 1e-12);
        }

        #[test]
        fn prop_token_set_symmetry(a in "[a-z ]{0,32}", b in "[a-z ]{0,32}") {
            let forward = token_set_similarity(&a, &b);
            let backward = token_set_similarity(&b, &a);
            prop_assert!((forward - backward).abs() < 1e-12);
        }

        #[test]
        fn prop_self_similarity_is_one(a in "[a-z][a-z ]{0,20}") {
            prop_assert!((text_similarity(&a, &a) - 1.0).abs() < 1e-12);
        }
    }
}

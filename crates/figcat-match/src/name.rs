//! Name similarity scoring.
//!
//! Names are short (2-40 chars) and the noise comes from OCR and crawl
//! drift (spacing, punctuation, homophone substitution) rather than
//! transposition, so this is a cheap explainable overlap heuristic, not
//! edit distance.

/// Similarity at or above this is worth fetching as a candidate for
/// image/price rematching.
pub const PLAUSIBLE: f64 = 0.5;
/// Similarity at or above this is acceptable for variant re-derivation.
pub const ACCEPTABLE: f64 = 0.6;
/// Similarity at or above this is treated as the same entity for merges.
pub const SAME_ENTITY: f64 = 0.9;

/// Flat bonus when both maker strings are present and one contains the
/// other.
const MAKER_BONUS: f64 = 0.15;

/// Strip bracket-delimited tags, whitespace and punctuation, then
/// lowercase. Keeps letters, digits and CJK characters.
pub fn normalize(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut bracket_depth = 0usize;
    for ch in input.chars() {
        match ch {
            '(' | '[' | '{' | '（' | '［' | '【' | '「' | '『' => bracket_depth += 1,
            ')' | ']' | '}' | '）' | '］' | '】' | '」' | '』' => {
                bracket_depth = bracket_depth.saturating_sub(1);
            }
            _ if bracket_depth > 0 => {}
            _ if ch.is_alphanumeric() => out.extend(ch.to_lowercase()),
            _ => {}
        }
    }
    out
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NameMatcher;

impl NameMatcher {
    pub fn new() -> Self {
        Self
    }

    /// Score textual similarity of two names in `[0, 1]`.
    ///
    /// Exact normalized equality scores 1.0; containment scores a 0.7
    /// base plus a length-ratio bonus; otherwise the score is the
    /// averaged bidirectional character overlap.
    pub fn score(&self, a: &str, b: &str) -> f64 {
        let na = normalize(a);
        let nb = normalize(b);
        if na.is_empty() && nb.is_empty() {
            // Punctuation-only names normalize away entirely; raw
            // equality is all that is left to compare.
            let (ta, tb) = (a.trim(), b.trim());
            return if !ta.is_empty() && ta == tb { 1.0 } else { 0.0 };
        }
        if na.is_empty() || nb.is_empty() {
            return 0.0;
        }
        if na == nb {
            return 1.0;
        }

        let len_a = na.chars().count() as f64;
        let len_b = nb.chars().count() as f64;
        if na.contains(&nb) || nb.contains(&na) {
            let ratio = len_a.min(len_b) / len_a.max(len_b);
            return 0.7 + ratio * 0.3;
        }

        let overlap_ab = char_overlap(&na, &nb);
        let overlap_ba = char_overlap(&nb, &na);
        (overlap_ab + overlap_ba) / 2.0
    }

    /// [`score`](Self::score) plus a flat maker-agreement bonus, capped
    /// at 1.0. The bonus applies only when both maker strings are
    /// non-empty and one contains the other.
    pub fn score_with_makers(
        &self,
        a: &str,
        maker_a: Option<&str>,
        b: &str,
        maker_b: Option<&str>,
    ) -> f64 {
        let base = self.score(a, b);
        if makers_agree(maker_a, maker_b) {
            (base + MAKER_BONUS).min(1.0)
        } else {
            base
        }
    }
}

pub fn makers_agree(a: Option<&str>, b: Option<&str>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => {
            let na = normalize(a);
            let nb = normalize(b);
            !na.is_empty() && !nb.is_empty() && (na.contains(&nb) || nb.contains(&na))
        }
        _ => false,
    }
}

/// Fraction of `a`'s characters that appear anywhere in `b`.
fn char_overlap(a: &str, b: &str) -> f64 {
    let total = a.chars().count();
    if total == 0 {
        return 0.0;
    }
    let hits = a.chars().filter(|c| b.contains(*c)).count();
    hits as f64 / total as f64
}

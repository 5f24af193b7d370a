//! Per-tuple reconciliation decisions.
//!
//! Given one incoming tuple and the index candidates for its name, decide
//! INSERT / UPDATE / SKIP. The wrong decision here silently corrupts the
//! catalog in one of two directions: merging two different variants into
//! one row, or fragmenting one variant into duplicates. Every branch is
//! therefore deliberately conservative, and ambiguity resolves to SKIP.

use figcat_core::{
    entry_from_tuple, CatalogEntry, EntryPatch, IncomingTuple, IngestionDecision, SkipReason,
};
use figcat_match::name::{self, NameMatcher};
use figcat_match::price::{within_tolerance, PRICE_TOLERANCE};
use figcat_match::KeywordTable;

#[derive(Clone)]
pub struct ReconciliationPolicy {
    matcher: NameMatcher,
    variants: KeywordTable,
}

impl Default for ReconciliationPolicy {
    fn default() -> Self {
        Self::new(KeywordTable::builtin().clone())
    }
}

impl ReconciliationPolicy {
    pub fn new(variants: KeywordTable) -> Self {
        Self {
            matcher: NameMatcher::new(),
            variants,
        }
    }

    /// Decide what one tuple means for the catalog. `candidates` come
    /// from [`figcat_store::CatalogIndex`]; this function re-scores them
    /// and only merges at the same-entity threshold.
    pub fn decide(
        &self,
        tuple: &IncomingTuple,
        candidates: &[CatalogEntry],
    ) -> IngestionDecision {
        let mut scored: Vec<(f64, &CatalogEntry)> = candidates
            .iter()
            .map(|c| {
                let score = self.matcher.score_with_makers(
                    &tuple.name,
                    tuple.maker.as_deref(),
                    &c.name,
                    c.maker.as_deref(),
                );
                (score, c)
            })
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).expect("scores are finite"));

        let matched: Vec<&CatalogEntry> = scored
            .iter()
            .filter(|(score, _)| *score >= name::SAME_ENTITY)
            .map(|(_, c)| *c)
            .collect();

        if matched.is_empty() {
            // Candidates that are close but not same-entity are exactly
            // the merges that corrupt catalogs; leave them for review.
            if scored.iter().any(|(score, _)| *score >= name::ACCEPTABLE) {
                return IngestionDecision::Skip {
                    reason: SkipReason::AmbiguousCandidates,
                };
            }
            return IngestionDecision::Insert(entry_from_tuple(tuple));
        }

        let tuple_price = tuple.price.or(tuple.list_price);

        match &tuple.variant {
            Some(label) => self.decide_with_variant(tuple, label, &matched, tuple_price),
            None => self.decide_without_variant(tuple, &matched, tuple_price),
        }
    }

    /// Tuple carries an explicit variant label (spec of the easier half):
    /// merge into the variant-equivalent row, retro-label a price-matching
    /// variantless row, or insert a new variant.
    fn decide_with_variant(
        &self,
        tuple: &IncomingTuple,
        label: &str,
        matched: &[&CatalogEntry],
        tuple_price: Option<f64>,
    ) -> IngestionDecision {
        if let Some(target) = matched.iter().find(|c| {
            c.variant
                .as_deref()
                .is_some_and(|v| self.variants.same_variant(v, label))
        }) {
            return IngestionDecision::Update {
                id: target.id,
                patch: fill_patch(target, tuple, None),
            };
        }

        // A versionless legacy row whose price agrees is this variant,
        // observed before anyone wrote the label down.
        if let Some(price) = tuple_price {
            if let Some(target) = matched.iter().find(|c| {
                c.variant.is_none()
                    && c.representative_price().is_some()
                    && price_compatible(c, price)
            }) {
                return IngestionDecision::Update {
                    id: target.id,
                    patch: fill_patch(target, tuple, Some(label)),
                };
            }
        }

        IngestionDecision::Insert(entry_from_tuple(tuple))
    }

    /// Tuple has no variant label: merge only into a variantless row with
    /// a compatible price; against all-labeled candidates a unique price
    /// match is the only safe merge, anything else is skipped.
    fn decide_without_variant(
        &self,
        tuple: &IncomingTuple,
        matched: &[&CatalogEntry],
        tuple_price: Option<f64>,
    ) -> IngestionDecision {
        let variantless: Vec<&&CatalogEntry> =
            matched.iter().filter(|c| c.variant.is_none()).collect();

        if let Some(target) = variantless
            .iter()
            .find(|c| tuple_price.map_or(true, |p| price_compatible(c, p)))
        {
            return IngestionDecision::Update {
                id: target.id,
                patch: fill_patch(target, tuple, None),
            };
        }

        if variantless.is_empty() {
            let price_hits: Vec<&&CatalogEntry> = match tuple_price {
                Some(price) => matched
                    .iter()
                    .filter(|c| c.representative_price().is_some() && price_compatible(c, price))
                    .collect(),
                None => Vec::new(),
            };
            if let [only] = price_hits.as_slice() {
                return IngestionDecision::Update {
                    id: only.id,
                    patch: fill_patch(only, tuple, None),
                };
            }
            return IngestionDecision::Skip {
                reason: SkipReason::VariantGuard,
            };
        }

        // Variantless rows exist but at a different price point: this is
        // a distinct variant sighting, the sweeper labels it later.
        IngestionDecision::Insert(entry_from_tuple(tuple))
    }
}

/// Whether an observed price is consistent with what the row already
/// knows: the official list price when present, otherwise the recorded
/// market range widened by the tolerance. Comparing against a single
/// bound would make merge eligibility depend on how far the range has
/// already drifted; the range check keeps it stable as the range grows.
fn price_compatible(entry: &CatalogEntry, price: f64) -> bool {
    if let Some(official) = entry.original_price {
        return within_tolerance(official, price);
    }
    match (entry.market_price_min, entry.market_price_max) {
        (Some(min), Some(max)) => {
            price >= min * (1.0 - PRICE_TOLERANCE) && price <= max * (1.0 + PRICE_TOLERANCE)
        }
        (Some(bound), None) | (None, Some(bound)) => within_tolerance(bound, price),
        (None, None) => true,
    }
}

/// Build the field-level patch for merging `tuple` into `entry`.
///
/// Populated fields are never replaced, empty incoming values never
/// erase anything, images only ever move up the trust ladder, and the
/// market range expands monotonically. The patch is empty when the tuple
/// adds nothing new.
fn fill_patch(
    entry: &CatalogEntry,
    tuple: &IncomingTuple,
    set_variant: Option<&str>,
) -> EntryPatch {
    let mut patch = EntryPatch::default();

    if entry.maker.is_none() {
        patch.maker = tuple.maker.clone();
    }
    if entry.scale.is_none() {
        patch.scale = tuple.scale.clone();
    }
    if let Some(label) = set_variant {
        if entry.variant.is_none() {
            patch.variant = Some(label.to_string());
        }
    }
    if entry.original_price.is_none() {
        patch.original_price = tuple.list_price;
    }

    if let Some(price) = tuple.price {
        let new_min = entry.market_price_min.map_or(price, |m| m.min(price));
        if entry.market_price_min != Some(new_min) {
            patch.market_price_min = Some(new_min);
        }
        let new_max = entry.market_price_max.map_or(price, |m| m.max(price));
        if entry.market_price_max != Some(new_max) {
            patch.market_price_max = Some(new_max);
        }
    }

    if let Some(image) = &tuple.image {
        let upgrades = match &entry.image {
            None => true,
            Some(existing) => image.trust > existing.trust,
        };
        if upgrades {
            patch.image = Some(image.clone());
        }
    }

    patch
}

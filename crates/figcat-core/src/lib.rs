//! Core domain model for the figcat catalog: entries, incoming tuples,
//! field-level patches and ingestion decisions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub const CRATE_NAME: &str = "figcat-core";

/// Provenance tier of a record or image. Set once at ingestion time and
/// carried explicitly; never inferred later from URL shape or string
/// heuristics.
///
/// Ordering matters: `Crawled < Submitted < Curated`. A field from a higher
/// tier is never overwritten by a lower one.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum TrustTier {
    Crawled,
    Submitted,
    Curated,
}

/// Reference to a representative image, tagged with the trust tier of
/// whoever supplied it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    pub url: String,
    pub trust: TrustTier,
}

/// One persisted catalog row: a single sellable variant of an item.
///
/// Invariant: among all entries sharing a `name`, each row denotes a
/// distinct real-world variant. Rows are mutated only through
/// [`EntryPatch`] application, never by whole-row overwrite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub id: Uuid,
    pub name: String,
    pub maker: Option<String>,
    pub variant: Option<String>,
    pub scale: Option<String>,
    pub original_price: Option<f64>,
    pub market_price_min: Option<f64>,
    pub market_price_max: Option<f64>,
    pub image: Option<ImageRef>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CatalogEntry {
    /// Completeness score, recomputed on demand rather than stored.
    /// Weighted by how hard each fact is to recover: a curated image
    /// outranks everything else, then maker, price, variant, scale.
    pub fn completeness_score(&self) -> u32 {
        let mut score = 0;
        if let Some(image) = &self.image {
            score += match image.trust {
                TrustTier::Curated => 16,
                TrustTier::Submitted => 3,
                TrustTier::Crawled => 1,
            };
        }
        if self.maker.is_some() {
            score += 8;
        }
        if self.original_price.is_some() {
            score += 4;
        }
        if self.variant.is_some() {
            score += 2;
        }
        if self.scale.is_some() {
            score += 1;
        }
        score
    }

    /// Best single price for comparing this entry against others: the
    /// official list price when known, else the low market bound.
    pub fn representative_price(&self) -> Option<f64> {
        self.original_price.or(self.market_price_min)
    }

    /// Apply a field-level patch in one step, bumping `updated_at`.
    /// Only fields present in the patch change; everything else is
    /// untouched.
    pub fn apply(&mut self, patch: &EntryPatch) {
        if let Some(maker) = &patch.maker {
            self.maker = Some(maker.clone());
        }
        if let Some(variant) = &patch.variant {
            self.variant = Some(variant.clone());
        }
        if let Some(scale) = &patch.scale {
            self.scale = Some(scale.clone());
        }
        if let Some(price) = patch.original_price {
            self.original_price = Some(price);
        }
        if let Some(min) = patch.market_price_min {
            self.market_price_min = Some(min);
        }
        if let Some(max) = patch.market_price_max {
            self.market_price_max = Some(max);
        }
        if let Some(image) = &patch.image {
            self.image = Some(image.clone());
        }
        self.updated_at = Utc::now();
    }
}

/// Field-level partial update. `None` means "leave the stored value
/// alone" — a patch can never null out a populated field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntryPatch {
    pub maker: Option<String>,
    pub variant: Option<String>,
    pub scale: Option<String>,
    pub original_price: Option<f64>,
    pub market_price_min: Option<f64>,
    pub market_price_max: Option<f64>,
    pub image: Option<ImageRef>,
}

impl EntryPatch {
    pub fn is_empty(&self) -> bool {
        self.maker.is_none()
            && self.variant.is_none()
            && self.scale.is_none()
            && self.original_price.is_none()
            && self.market_price_min.is_none()
            && self.market_price_max.is_none()
            && self.image.is_none()
    }
}

/// One incoming fact record about a catalog item, not yet reconciled.
/// Ephemeral: consumed once per ingestion decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncomingTuple {
    /// Identifier of the producing extractor (crawl run, OCR batch, ...).
    pub source: String,
    pub name: String,
    #[serde(default)]
    pub maker: Option<String>,
    /// Observed market/listing price.
    #[serde(default)]
    pub price: Option<f64>,
    /// Official list price, when the source states one (price sheets do,
    /// crawls usually do not).
    #[serde(default)]
    pub list_price: Option<f64>,
    #[serde(default)]
    pub variant: Option<String>,
    #[serde(default)]
    pub scale: Option<String>,
    #[serde(default)]
    pub image: Option<ImageRef>,
    pub trust: TrustTier,
    /// Optional live-source URL for price/variant re-verification. Lookups
    /// against it are rate limited by the runner.
    #[serde(default)]
    pub verify_url: Option<String>,
}

impl IncomingTuple {
    /// Reject malformed tuples before they reach candidate lookup.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::MissingName {
                source_id: self.source.clone(),
            });
        }
        for price in [self.price, self.list_price].into_iter().flatten() {
            if !price.is_finite() || price <= 0.0 {
                return Err(ValidationError::InvalidPrice {
                    name: self.name.clone(),
                    price,
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ValidationError {
    #[error("tuple from source {source_id} has no name")]
    MissingName { source_id: String },
    #[error("tuple for {name} carries invalid price {price}")]
    InvalidPrice { name: String, price: f64 },
}

/// Why a tuple was skipped rather than inserted or merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Candidates exist but none clears the match threshold cleanly.
    AmbiguousCandidates,
    /// All candidates carry a variant, the tuple none, and its price does
    /// not single out one of them.
    VariantGuard,
}

/// The outcome of reconciling one tuple against the catalog. Applied
/// atomically: one insert, one patch, or nothing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum IngestionDecision {
    Insert(CatalogEntry),
    Update { id: Uuid, patch: EntryPatch },
    Skip { reason: SkipReason },
}

/// Build a fresh entry from a tuple, minting an id and stamping times.
/// The observed price seeds the market range; only an explicit list
/// price seeds `original_price`.
pub fn entry_from_tuple(tuple: &IncomingTuple) -> CatalogEntry {
    let now = Utc::now();
    CatalogEntry {
        id: Uuid::new_v4(),
        name: tuple.name.trim().to_string(),
        maker: tuple.maker.clone(),
        variant: tuple.variant.clone(),
        scale: tuple.scale.clone(),
        original_price: tuple.list_price,
        market_price_min: tuple.price,
        market_price_max: tuple.price,
        image: tuple.image.clone(),
        created_at: now,
        updated_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str) -> CatalogEntry {
        let now = Utc::now();
        CatalogEntry {
            id: Uuid::new_v4(),
            name: name.to_string(),
            maker: None,
            variant: None,
            scale: None,
            original_price: None,
            market_price_min: None,
            market_price_max: None,
            image: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn trust_tiers_are_ordered() {
        assert!(TrustTier::Crawled < TrustTier::Submitted);
        assert!(TrustTier::Submitted < TrustTier::Curated);
    }

    #[test]
    fn completeness_prefers_curated_image_over_everything_else() {
        let mut bare = entry("Luffy");
        bare.image = Some(ImageRef {
            url: "https://img/curated.jpg".into(),
            trust: TrustTier::Curated,
        });

        let mut stacked = entry("Luffy");
        stacked.maker = Some("MegaHouse".into());
        stacked.original_price = Some(12000.0);
        stacked.variant = Some("Deluxe".into());
        stacked.scale = Some("1/6".into());

        assert!(bare.completeness_score() > stacked.completeness_score());
    }

    #[test]
    fn patch_only_touches_present_fields() {
        let mut e = entry("Zoro");
        e.maker = Some("Banpresto".into());
        let patch = EntryPatch {
            variant: Some("Deluxe".into()),
            ..Default::default()
        };
        e.apply(&patch);
        assert_eq!(e.maker.as_deref(), Some("Banpresto"));
        assert_eq!(e.variant.as_deref(), Some("Deluxe"));
    }

    #[test]
    fn validation_rejects_blank_name_and_bad_price() {
        let mut t = IncomingTuple {
            source: "crawl-1".into(),
            name: "  ".into(),
            maker: None,
            price: None,
            list_price: None,
            variant: None,
            scale: None,
            image: None,
            trust: TrustTier::Crawled,
            verify_url: None,
        };
        let err = t.validate().expect_err("blank name must be rejected");
        assert!(matches!(err, ValidationError::MissingName { .. }));
        assert_eq!(err.to_string(), "tuple from source crawl-1 has no name");

        t.name = "Luffy".into();
        t.price = Some(-5.0);
        assert!(matches!(
            t.validate(),
            Err(ValidationError::InvalidPrice { .. })
        ));

        t.price = Some(12000.0);
        assert!(t.validate().is_ok());
    }
}

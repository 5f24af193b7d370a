//! Matching heuristics for catalog reconciliation: name similarity,
//! variant-label equivalence and price-based variant inference.
//!
//! Everything in this crate is pure and synchronous so the decision logic
//! built on top of it stays unit-testable without I/O.

pub mod name;
pub mod price;
pub mod variant;

pub use name::NameMatcher;
pub use price::{cluster_labels, within_tolerance, PriceLabel, PRICE_TOLERANCE};
pub use variant::KeywordTable;

pub const CRATE_NAME: &str = "figcat-match";

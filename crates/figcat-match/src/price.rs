//! Price-based variant inference.
//!
//! When several rows share a name without variant labels but carry two or
//! more distinct official prices, the prices themselves are the only
//! disambiguation signal. This module turns a sorted price set into
//! ordinal labels; it never changes price values.

/// Relative tolerance used everywhere prices are compared for equality.
pub const PRICE_TOLERANCE: f64 = 0.08;

/// Whether two prices are close enough to count as the same price point.
pub fn within_tolerance(a: f64, b: f64) -> bool {
    let larger = a.abs().max(b.abs());
    if larger == 0.0 {
        return true;
    }
    (a - b).abs() <= larger * PRICE_TOLERANCE
}

#[derive(Debug, Clone, PartialEq)]
pub struct PriceLabel {
    pub price: f64,
    pub label: String,
}

/// Infer one label per distinct price, ascending.
///
/// Two prices get "Standard"/"Deluxe", three get
/// "Standard"/"Premium"/"Deluxe", more get lettered editions by rank.
/// Fewer than two distinct prices yields no labels at all: a single price
/// point is a dedup problem, not a labeling one.
pub fn cluster_labels(prices: &[f64]) -> Vec<PriceLabel> {
    let mut distinct: Vec<f64> = Vec::new();
    for &p in prices {
        if p.is_finite() && p > 0.0 && !distinct.iter().any(|&d| d == p) {
            distinct.push(p);
        }
    }
    distinct.sort_by(|a, b| a.partial_cmp(b).expect("finite prices compare"));

    match distinct.len() {
        0 | 1 => Vec::new(),
        2 => vec![
            PriceLabel { price: distinct[0], label: "Standard".to_string() },
            PriceLabel { price: distinct[1], label: "Deluxe".to_string() },
        ],
        3 => vec![
            PriceLabel { price: distinct[0], label: "Standard".to_string() },
            PriceLabel { price: distinct[1], label: "Premium".to_string() },
            PriceLabel { price: distinct[2], label: "Deluxe".to_string() },
        ],
        _ => distinct
            .into_iter()
            .enumerate()
            .map(|(rank, price)| PriceLabel {
                price,
                label: format!("{} Edition", letter_for_rank(rank)),
            })
            .collect(),
    }
}

/// The label whose bucket the price falls into, within tolerance.
/// Out-of-bucket prices get `None` and stay unlabeled rather than
/// mislabeled.
pub fn label_for_price(labels: &[PriceLabel], price: f64) -> Option<&str> {
    labels
        .iter()
        .find(|l| within_tolerance(l.price, price))
        .map(|l| l.label.as_str())
}

fn letter_for_rank(rank: usize) -> char {
    (b'A' + (rank % 26) as u8) as char
}

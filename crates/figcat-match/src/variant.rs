//! Variant-label equivalence.
//!
//! Two labels denote the same logical variant when they are equal, when
//! one contains the other ("高配" / "高配版"), or when both contain a
//! keyword from the same semantic group ("DX版" / "DX号"). The keyword
//! groups live in one versioned YAML table so every reconciliation path
//! shares the same vocabulary.

use std::path::Path;
use std::sync::OnceLock;

use anyhow::{Context, Result};
use serde::Deserialize;

const BUILTIN_TABLE: &str = include_str!("variant_groups.yaml");

#[derive(Debug, Clone, Deserialize)]
pub struct KeywordGroup {
    pub name: String,
    pub keywords: Vec<String>,
}

/// Versioned table of semantic keyword groups.
#[derive(Debug, Clone, Deserialize)]
pub struct KeywordTable {
    pub version: u32,
    pub groups: Vec<KeywordGroup>,
}

impl KeywordTable {
    /// The table shipped with the crate.
    pub fn builtin() -> &'static KeywordTable {
        static TABLE: OnceLock<KeywordTable> = OnceLock::new();
        TABLE.get_or_init(|| {
            serde_yaml::from_str(BUILTIN_TABLE).expect("embedded variant table is valid yaml")
        })
    }

    /// Load an override table from disk.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
    }

    /// Whether two variant labels denote the same real-world variant.
    pub fn same_variant(&self, a: &str, b: &str) -> bool {
        let a = a.trim().to_lowercase();
        let b = b.trim().to_lowercase();
        if a.is_empty() || b.is_empty() {
            return false;
        }
        if a == b || a.contains(&b) || b.contains(&a) {
            return true;
        }

        // Same-group membership: both labels carry a keyword from one group.
        self.groups.iter().any(|group| {
            let hit_a = group.keywords.iter().any(|kw| contains_keyword(&a, kw));
            let hit_b = group.keywords.iter().any(|kw| contains_keyword(&b, kw));
            hit_a && hit_b
        })
    }
}

/// Substring match with ASCII word boundaries, so "EX" matches "EX版" but
/// not "flex".
fn contains_keyword(label: &str, keyword: &str) -> bool {
    let kw = keyword.to_lowercase();
    if kw.is_empty() {
        return false;
    }
    for (idx, _) in label.match_indices(&kw) {
        let prev_ok = match label[..idx].chars().next_back() {
            Some(prev) => !(prev.is_ascii_alphanumeric() && starts_ascii(&kw)),
            None => true,
        };
        let next_ok = match label[idx + kw.len()..].chars().next() {
            Some(next) => !(next.is_ascii_alphanumeric() && ends_ascii(&kw)),
            None => true,
        };
        if prev_ok && next_ok {
            return true;
        }
    }
    false
}

fn starts_ascii(kw: &str) -> bool {
    kw.chars().next().is_some_and(|c| c.is_ascii_alphanumeric())
}

fn ends_ascii(kw: &str) -> bool {
    kw.chars().next_back().is_some_and(|c| c.is_ascii_alphanumeric())
}

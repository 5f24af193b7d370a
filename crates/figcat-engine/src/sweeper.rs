//! Batch catalog cleanup: retroactive duplicate removal and variant
//! labeling over name groups.
//!
//! The sweeper never mutates while classifying. `plan` produces the full
//! list of deletions and relabels against a snapshot; `apply` executes a
//! plan only when the caller explicitly asks for it. Running `plan` on an
//! already-clean catalog yields an empty plan, so apply-then-apply is a
//! no-op.

use std::collections::{BTreeMap, HashSet};

use figcat_core::{CatalogEntry, EntryPatch};
use figcat_match::name::normalize;
use figcat_match::price::{cluster_labels, label_for_price, within_tolerance};
use figcat_store::{CatalogStore, StoreError};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

const SCAN_PAGE: usize = 256;

#[derive(Debug, Clone, Serialize)]
pub struct Relabel {
    pub id: Uuid,
    pub name: String,
    pub to: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Deletion {
    pub id: Uuid,
    pub name: String,
    pub variant: Option<String>,
    /// The row that absorbs this one.
    pub survivor: Uuid,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepPlan {
    pub relabels: Vec<Relabel>,
    pub deletions: Vec<Deletion>,
}

impl SweepPlan {
    pub fn is_empty(&self) -> bool {
        self.relabels.is_empty() && self.deletions.is_empty()
    }

    /// Human-readable preview, printed before anything is applied.
    pub fn render_preview(&self) -> String {
        if self.is_empty() {
            return "catalog is clean: nothing to delete or relabel".to_string();
        }
        let mut lines = Vec::new();
        lines.push(format!(
            "planned: {} deletion(s), {} relabel(s)",
            self.deletions.len(),
            self.relabels.len()
        ));
        for d in &self.deletions {
            lines.push(format!(
                "  delete {} \"{}\" variant={} (absorbed by {})",
                d.id,
                d.name,
                d.variant.as_deref().unwrap_or("-"),
                d.survivor
            ));
        }
        for r in &self.relabels {
            lines.push(format!("  relabel {} \"{}\" -> \"{}\"", r.id, r.name, r.to));
        }
        lines.join("\n")
    }
}

#[derive(Debug, Default, Serialize)]
pub struct SweepOutcome {
    pub deleted: usize,
    pub relabeled: usize,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DedupSweeper;

impl DedupSweeper {
    pub fn new() -> Self {
        Self
    }

    /// Classify every name group and produce the cleanup plan. Read-only.
    pub async fn plan(&self, store: &dyn CatalogStore) -> Result<SweepPlan, StoreError> {
        let mut groups: BTreeMap<String, Vec<CatalogEntry>> = BTreeMap::new();
        let mut offset = 0;
        loop {
            let page = store.query_all(offset, SCAN_PAGE).await?;
            if page.is_empty() {
                break;
            }
            offset += page.len();
            for entry in page {
                let key = group_key(&entry.name);
                groups.entry(key).or_default().push(entry);
            }
        }

        let mut plan = SweepPlan::default();
        for rows in groups.values() {
            if rows.len() > 1 {
                plan_group(rows, &mut plan);
            }
        }
        info!(
            deletions = plan.deletions.len(),
            relabels = plan.relabels.len(),
            "sweep plan computed"
        );
        Ok(plan)
    }

    /// Execute a plan. Per-row failures are collected, not fatal: one bad
    /// row must not abort the rest of the cleanup.
    pub async fn apply(
        &self,
        store: &dyn CatalogStore,
        plan: &SweepPlan,
    ) -> Result<SweepOutcome, StoreError> {
        let mut outcome = SweepOutcome::default();

        // Relabels first: a 3a survivor inherits its label before the
        // labeled loser disappears.
        for relabel in &plan.relabels {
            let patch = EntryPatch {
                variant: Some(relabel.to.clone()),
                ..Default::default()
            };
            match store.update(relabel.id, &patch).await {
                Ok(()) => outcome.relabeled += 1,
                Err(err) => {
                    warn!(id = %relabel.id, error = %err, "relabel failed");
                    outcome.errors.push(format!("relabel {}: {err}", relabel.id));
                }
            }
        }

        for deletion in &plan.deletions {
            match store.delete(deletion.id).await {
                Ok(()) => outcome.deleted += 1,
                Err(err) => {
                    warn!(id = %deletion.id, error = %err, "delete failed");
                    outcome.errors.push(format!("delete {}: {err}", deletion.id));
                }
            }
        }

        Ok(outcome)
    }
}

fn group_key(raw_name: &str) -> String {
    let key = normalize(raw_name);
    if key.is_empty() {
        raw_name.trim().to_lowercase()
    } else {
        key
    }
}

fn plan_group(rows: &[CatalogEntry], plan: &mut SweepPlan) {
    let unlabeled: Vec<&CatalogEntry> = rows.iter().filter(|e| e.variant.is_none()).collect();
    let labeled: Vec<&CatalogEntry> = rows.iter().filter(|e| e.variant.is_some()).collect();

    if unlabeled.is_empty() {
        return;
    }
    if labeled.is_empty() {
        plan_all_unlabeled(&unlabeled, plan);
    } else {
        plan_mixed(rows, &unlabeled, &labeled, plan);
    }
}

/// Case 1: every row is variant-less. Rows sharing a `(price, scale)`
/// bucket are true duplicates of one variant; the rest are distinct
/// variants that still need labels.
fn plan_all_unlabeled(unlabeled: &[&CatalogEntry], plan: &mut SweepPlan) {
    let mut buckets: Vec<Vec<&CatalogEntry>> = Vec::new();
    for &row in unlabeled {
        match buckets.iter_mut().find(|b| same_bucket(b[0], row)) {
            Some(bucket) => bucket.push(row),
            None => buckets.push(vec![row]),
        }
    }

    let mut survivors: Vec<&CatalogEntry> = Vec::new();
    for bucket in &buckets {
        let survivor = pick_survivor(bucket);
        for &row in bucket {
            if row.id != survivor.id {
                plan.deletions.push(Deletion {
                    id: row.id,
                    name: row.name.clone(),
                    variant: None,
                    survivor: survivor.id,
                });
            }
        }
        survivors.push(survivor);
    }

    if survivors.len() < 2 {
        return;
    }

    // Labeling branch: official prices feed the clusterer; without two
    // distinct official prices, fall back to rank labels over whatever
    // prices were observed.
    let official: Vec<f64> = survivors.iter().filter_map(|e| e.original_price).collect();
    let labels = cluster_labels(&official);
    if !labels.is_empty() {
        for survivor in &survivors {
            if let Some(price) = survivor.original_price {
                if let Some(label) = label_for_price(&labels, price) {
                    plan.relabels.push(Relabel {
                        id: survivor.id,
                        name: survivor.name.clone(),
                        to: label.to_string(),
                    });
                }
            }
        }
    } else {
        for survivor in &survivors {
            if let Some(price) = survivor.representative_price() {
                if let Some(label) = rank_label(&survivors, price) {
                    plan.relabels.push(Relabel {
                        id: survivor.id,
                        name: survivor.name.clone(),
                        to: label,
                    });
                }
            }
        }
    }
}

/// Case 3: some rows labeled, some not. A variant-less row matching a
/// labeled row's `(price, scale)` is a duplicate across the variant
/// boundary (3a); one matching nothing is a genuine extra variant that
/// gets a rank label (3b).
fn plan_mixed(
    rows: &[CatalogEntry],
    unlabeled: &[&CatalogEntry],
    labeled: &[&CatalogEntry],
    plan: &mut SweepPlan,
) {
    let mut consumed: HashSet<Uuid> = HashSet::new();
    let group: Vec<&CatalogEntry> = rows.iter().collect();

    for &row in unlabeled {
        let twin = labeled
            .iter()
            .find(|l| !consumed.contains(&l.id) && same_bucket(row, l));

        match twin {
            Some(&twin) => {
                if row.completeness_score() > twin.completeness_score() {
                    // The unlabeled row is richer: it survives, inherits
                    // the label, and the labeled twin goes.
                    if let Some(label) = &twin.variant {
                        plan.relabels.push(Relabel {
                            id: row.id,
                            name: row.name.clone(),
                            to: label.clone(),
                        });
                    }
                    plan.deletions.push(Deletion {
                        id: twin.id,
                        name: twin.name.clone(),
                        variant: twin.variant.clone(),
                        survivor: row.id,
                    });
                    consumed.insert(twin.id);
                } else {
                    plan.deletions.push(Deletion {
                        id: row.id,
                        name: row.name.clone(),
                        variant: None,
                        survivor: twin.id,
                    });
                }
            }
            None => {
                if let Some(price) = row.representative_price() {
                    if let Some(label) = rank_label(&group, price) {
                        plan.relabels.push(Relabel {
                            id: row.id,
                            name: row.name.clone(),
                            to: label,
                        });
                    }
                }
            }
        }
    }
}

/// Two rows sit in one `(price, scale)` bucket when their prices agree
/// within tolerance (None matches only None) and their scales match.
fn same_bucket(a: &CatalogEntry, b: &CatalogEntry) -> bool {
    let price_match = match (a.representative_price(), b.representative_price()) {
        (Some(pa), Some(pb)) => within_tolerance(pa, pb),
        (None, None) => true,
        _ => false,
    };
    price_match && scale_eq(a.scale.as_deref(), b.scale.as_deref())
}

fn scale_eq(a: Option<&str>, b: Option<&str>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a.trim().eq_ignore_ascii_case(b.trim()),
        (None, None) => true,
        _ => false,
    }
}

/// Highest completeness survives; on a tie the oldest row keeps its id.
fn pick_survivor<'a>(bucket: &[&'a CatalogEntry]) -> &'a CatalogEntry {
    bucket
        .iter()
        .copied()
        .max_by(|a, b| {
            a.completeness_score()
                .cmp(&b.completeness_score())
                .then_with(|| b.created_at.cmp(&a.created_at))
        })
        .expect("bucket is never empty")
}

/// Label by relative price rank within the group: the top price, the
/// bottom price, or a price-tagged middle label.
fn rank_label(group: &[&CatalogEntry], price: f64) -> Option<String> {
    let prices: Vec<f64> = group.iter().filter_map(|e| e.representative_price()).collect();
    let max = prices.iter().copied().fold(f64::MIN, f64::max);
    let min = prices.iter().copied().fold(f64::MAX, f64::min);
    if prices.len() < 2 || within_tolerance(min, max) {
        return None;
    }
    if within_tolerance(price, max) {
        Some("Top Edition".to_string())
    } else if within_tolerance(price, min) {
        Some("Base Edition".to_string())
    } else {
        Some(format!("{} Edition", price.round() as i64))
    }
}

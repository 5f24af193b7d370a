//! Batch ingestion orchestration.
//!
//! Tuples flow validate -> candidate lookup -> policy decision -> store
//! write, strictly in arrival order within a name group. The runner is
//! resumable (checkpoint pinned to the input's sha256), polite to live
//! sources (fixed delay + client-side token bucket around external
//! lookups), and never lets one bad tuple abort the batch.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use figcat_core::{IncomingTuple, IngestionDecision};
use figcat_match::name::normalize;
use figcat_store::{CatalogIndex, CatalogStore, Checkpoint, LookupClient};
use serde::Serialize;
use tokio::fs;
use tracing::{info, warn};
use uuid::Uuid;

use crate::policy::ReconciliationPolicy;

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub checkpoint_path: Option<PathBuf>,
    pub reports_dir: Option<PathBuf>,
    /// Persist the checkpoint every N processed tuples.
    pub checkpoint_every: usize,
    /// Minimum pause before each external lookup, on top of the lookup
    /// client's own token bucket.
    pub lookup_delay: Duration,
    /// Worker count. 1 means fully sequential; above 1, tuples are
    /// sharded by name so same-name tuples never race.
    pub concurrency: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            checkpoint_path: None,
            reports_dir: None,
            checkpoint_every: 25,
            lookup_delay: Duration::from_secs(2),
            concurrency: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TupleFailure {
    pub name: String,
    pub error: String,
}

/// A tuple whose external verification kept failing. Recorded with its
/// source and URL so a later pass can re-feed exactly these.
#[derive(Debug, Clone, Serialize)]
pub struct UnresolvedTuple {
    pub source: String,
    pub name: String,
    pub url: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub processed: usize,
    pub inserted: usize,
    pub updated: usize,
    pub skipped: usize,
    pub unresolved: Vec<UnresolvedTuple>,
    pub errors: Vec<TupleFailure>,
}

#[derive(Debug, Default)]
struct Counts {
    processed: usize,
    inserted: usize,
    updated: usize,
    skipped: usize,
    unresolved: Vec<UnresolvedTuple>,
    errors: Vec<TupleFailure>,
}

impl Counts {
    fn absorb(&mut self, other: Counts) {
        self.processed += other.processed;
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.skipped += other.skipped;
        self.unresolved.extend(other.unresolved);
        self.errors.extend(other.errors);
    }
}

struct RunnerCtx {
    store: Arc<dyn CatalogStore>,
    index: CatalogIndex,
    policy: ReconciliationPolicy,
    lookup: Option<Arc<LookupClient>>,
    lookup_delay: Duration,
    cancel: AtomicBool,
}

pub struct IngestionRunner {
    ctx: Arc<RunnerCtx>,
    config: RunnerConfig,
}

impl IngestionRunner {
    pub fn new(
        store: Arc<dyn CatalogStore>,
        policy: ReconciliationPolicy,
        lookup: Option<Arc<LookupClient>>,
        config: RunnerConfig,
    ) -> Self {
        let index = CatalogIndex::new(store.clone());
        Self {
            ctx: Arc::new(RunnerCtx {
                store,
                index,
                policy,
                lookup,
                lookup_delay: config.lookup_delay,
                cancel: AtomicBool::new(false),
            }),
            config,
        }
    }

    /// Request a cooperative stop; checked between tuples, never
    /// mid-write, so the catalog stays consistent.
    pub fn request_cancel(&self) {
        self.ctx.cancel.store(true, Ordering::Relaxed);
    }

    /// Run one batch. `input_sha256` pins checkpoints to this input; pass
    /// the hash of the tuple file when resumability matters.
    pub async fn run(
        &self,
        tuples: Vec<IncomingTuple>,
        input_sha256: Option<String>,
    ) -> Result<RunSummary> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let total = tuples.len();

        let start_offset = self.resume_offset(input_sha256.as_deref()).await?;
        if start_offset > 0 {
            info!(start_offset, total, "resuming from checkpoint");
        }
        let remaining: Vec<IncomingTuple> = tuples.into_iter().skip(start_offset).collect();

        let mut counts = if self.config.concurrency <= 1 {
            self.run_sequential(run_id, remaining, start_offset, input_sha256.as_deref())
                .await?
        } else {
            self.run_sharded(run_id, remaining, start_offset, input_sha256.as_deref())
                .await?
        };
        counts.processed += start_offset;

        let finished_at = Utc::now();
        let summary = RunSummary {
            run_id,
            started_at,
            finished_at,
            processed: counts.processed,
            inserted: counts.inserted,
            updated: counts.updated,
            skipped: counts.skipped,
            unresolved: counts.unresolved,
            errors: counts.errors,
        };

        if let Some(reports_dir) = &self.config.reports_dir {
            write_report(reports_dir, &summary).await?;
        }
        info!(
            run_id = %summary.run_id,
            inserted = summary.inserted,
            updated = summary.updated,
            skipped = summary.skipped,
            unresolved = summary.unresolved.len(),
            errors = summary.errors.len(),
            "ingestion run finished"
        );
        Ok(summary)
    }

    async fn resume_offset(&self, input_sha256: Option<&str>) -> Result<usize> {
        let (Some(path), Some(fingerprint)) = (&self.config.checkpoint_path, input_sha256) else {
            return Ok(0);
        };
        match Checkpoint::load(path).await? {
            Some(cp) if cp.input_sha256 == fingerprint => Ok(cp.last_offset),
            Some(_) => {
                warn!("checkpoint belongs to a different input; starting over");
                Ok(0)
            }
            None => Ok(0),
        }
    }

    async fn save_checkpoint(&self, offset: usize, input_sha256: Option<&str>) -> Result<()> {
        let (Some(path), Some(fingerprint)) = (&self.config.checkpoint_path, input_sha256) else {
            return Ok(());
        };
        Checkpoint {
            processed_count: offset,
            last_offset: offset,
            input_sha256: fingerprint.to_string(),
            updated_at: Utc::now(),
        }
        .save(path)
        .await
    }

    async fn run_sequential(
        &self,
        run_id: Uuid,
        tuples: Vec<IncomingTuple>,
        start_offset: usize,
        input_sha256: Option<&str>,
    ) -> Result<Counts> {
        let mut counts = Counts::default();
        let mut offset = start_offset;

        for tuple in tuples {
            if self.ctx.cancel.load(Ordering::Relaxed) {
                warn!(offset, "cancellation requested; stopping between tuples");
                break;
            }
            process_tuple(&self.ctx, run_id, tuple, &mut counts).await;
            offset += 1;
            if offset % self.config.checkpoint_every.max(1) == 0 {
                self.save_checkpoint(offset, input_sha256).await?;
            }
        }

        self.save_checkpoint(offset, input_sha256).await?;
        Ok(counts)
    }

    /// Parallelism is safe across distinct names only; shard by name key
    /// and keep each shard strictly sequential and in arrival order.
    ///
    /// Shards finish out of input order, so a mid-run offset would claim
    /// tuples done that another shard has not reached yet; only a fully
    /// completed batch yields a checkpoint.
    async fn run_sharded(
        &self,
        run_id: Uuid,
        tuples: Vec<IncomingTuple>,
        start_offset: usize,
        input_sha256: Option<&str>,
    ) -> Result<Counts> {
        let batch_len = tuples.len();
        let mut shard_of: HashMap<String, usize> = HashMap::new();
        let workers = self.config.concurrency;
        let mut shards: Vec<Vec<IncomingTuple>> = (0..workers).map(|_| Vec::new()).collect();
        let mut next = 0usize;
        for tuple in tuples {
            let key = normalize(&tuple.name);
            let shard = *shard_of.entry(key).or_insert_with(|| {
                let s = next % workers;
                next += 1;
                s
            });
            shards[shard].push(tuple);
        }

        let mut handles = Vec::new();
        for shard in shards {
            if shard.is_empty() {
                continue;
            }
            let ctx = self.ctx.clone();
            handles.push(tokio::spawn(async move {
                let mut counts = Counts::default();
                for tuple in shard {
                    if ctx.cancel.load(Ordering::Relaxed) {
                        break;
                    }
                    process_tuple(&ctx, run_id, tuple, &mut counts).await;
                }
                counts
            }));
        }

        let mut counts = Counts::default();
        for handle in handles {
            counts.absorb(handle.await.context("ingestion worker panicked")?);
        }

        if !self.ctx.cancel.load(Ordering::Relaxed) {
            self.save_checkpoint(start_offset + batch_len, input_sha256)
                .await?;
        }
        Ok(counts)
    }
}

async fn process_tuple(
    ctx: &RunnerCtx,
    run_id: Uuid,
    mut tuple: IncomingTuple,
    counts: &mut Counts,
) {
    counts.processed += 1;

    if let Err(err) = tuple.validate() {
        warn!(source = %tuple.source, error = %err, "rejected malformed tuple");
        counts.errors.push(TupleFailure {
            name: tuple.name.clone(),
            error: err.to_string(),
        });
        return;
    }

    // Re-verify price/variant against the live source when the tuple asks
    // for it and is missing either. Exhausted retries leave the tuple
    // unresolved for a later pass rather than half-merged now.
    if let (Some(lookup), Some(url)) = (&ctx.lookup, tuple.verify_url.clone()) {
        if tuple.price.is_none() || tuple.variant.is_none() {
            tokio::time::sleep(ctx.lookup_delay).await;
            match lookup.fetch_verification(run_id, &url).await {
                Ok(verification) => {
                    if tuple.price.is_none() {
                        tuple.price = verification.price;
                    }
                    if tuple.variant.is_none() {
                        tuple.variant = verification.variant;
                    }
                }
                Err(err) => {
                    warn!(url, error = %err, "external lookup failed; tuple unresolved");
                    counts.unresolved.push(UnresolvedTuple {
                        source: tuple.source.clone(),
                        name: tuple.name.clone(),
                        url,
                        error: err.to_string(),
                    });
                    return;
                }
            }
        }
    }

    let candidates = match ctx
        .index
        .find_candidates(&tuple.name, tuple.maker.as_deref())
        .await
    {
        Ok(candidates) => candidates,
        Err(err) => {
            counts.errors.push(TupleFailure {
                name: tuple.name.clone(),
                error: err.to_string(),
            });
            return;
        }
    };

    let decision = ctx.policy.decide(&tuple, &candidates);
    let write = match decision {
        IngestionDecision::Insert(entry) => {
            let outcome = ctx.store.insert(entry).await;
            if outcome.is_ok() {
                counts.inserted += 1;
            }
            outcome
        }
        IngestionDecision::Update { id, patch } => {
            let outcome = if patch.is_empty() {
                Ok(())
            } else {
                ctx.store.update(id, &patch).await
            };
            if outcome.is_ok() {
                counts.updated += 1;
            }
            outcome
        }
        IngestionDecision::Skip { reason } => {
            info!(name = %tuple.name, ?reason, "tuple skipped for manual review");
            counts.skipped += 1;
            Ok(())
        }
    };

    if let Err(err) = write {
        warn!(name = %tuple.name, error = %err, "catalog write failed; continuing batch");
        counts.errors.push(TupleFailure {
            name: tuple.name.clone(),
            error: err.to_string(),
        });
    }
}

/// Load a tuple batch from a JSON file, returning the tuples plus the
/// file's sha256 for checkpoint pinning.
pub async fn load_tuple_file(path: &Path) -> Result<(Vec<IncomingTuple>, String)> {
    let bytes = fs::read(path)
        .await
        .with_context(|| format!("reading tuple input {}", path.display()))?;
    let fingerprint = figcat_store::sha256_hex(&bytes);
    let tuples: Vec<IncomingTuple> = serde_json::from_slice(&bytes)
        .with_context(|| format!("parsing tuple input {}", path.display()))?;
    Ok((tuples, fingerprint))
}

async fn write_report(reports_dir: &Path, summary: &RunSummary) -> Result<()> {
    let dir = reports_dir.join(summary.run_id.to_string());
    fs::create_dir_all(&dir)
        .await
        .with_context(|| format!("creating {}", dir.display()))?;

    let json = serde_json::to_vec_pretty(summary).context("serializing run summary")?;
    fs::write(dir.join("summary.json"), json)
        .await
        .context("writing summary.json")?;

    let mut brief = format!(
        "# figcat ingestion brief\n\n- Run ID: `{}`\n- Started: {}\n- Finished: {}\n- Processed: {}\n- Inserted: {}\n- Updated: {}\n- Skipped: {}\n- Unresolved: {}\n- Errors: {}\n",
        summary.run_id,
        summary.started_at,
        summary.finished_at,
        summary.processed,
        summary.inserted,
        summary.updated,
        summary.skipped,
        summary.unresolved.len(),
        summary.errors.len(),
    );
    if !summary.unresolved.is_empty() {
        brief.push_str("\n## Unresolved (re-feed these)\n\n");
        for item in &summary.unresolved {
            brief.push_str(&format!(
                "- `{}` from `{}` via {}: {}\n",
                item.name, item.source, item.url, item.error
            ));
        }
    }
    fs::write(dir.join("brief.md"), brief)
        .await
        .context("writing brief.md")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use figcat_core::TrustTier;
    use figcat_store::{BackoffPolicy, JsonCatalogStore, LookupConfig};
    use tempfile::tempdir;

    fn tuple(name: &str, price: Option<f64>, variant: Option<&str>) -> IncomingTuple {
        IncomingTuple {
            source: "crawl-test".into(),
            name: name.into(),
            maker: None,
            price,
            list_price: None,
            variant: variant.map(str::to_string),
            scale: None,
            image: None,
            trust: TrustTier::Crawled,
            verify_url: None,
        }
    }

    async fn runner_with_store(
        dir: &tempfile::TempDir,
        config: RunnerConfig,
    ) -> (IngestionRunner, Arc<JsonCatalogStore>) {
        let store = Arc::new(
            JsonCatalogStore::open(dir.path().join("catalog.json"))
                .await
                .expect("open"),
        );
        let runner = IngestionRunner::new(
            store.clone(),
            ReconciliationPolicy::default(),
            None,
            config,
        );
        (runner, store)
    }

    #[tokio::test]
    async fn scenario_a_single_tuple_creates_one_entry() {
        let dir = tempdir().expect("tempdir");
        let (runner, store) = runner_with_store(&dir, RunnerConfig::default()).await;

        let summary = runner
            .run(vec![tuple("Luffy", Some(12000.0), None)], None)
            .await
            .expect("run");
        assert_eq!(summary.inserted, 1);
        assert_eq!(summary.errors.len(), 0);

        let rows = store.query_by_name("Luffy").await.expect("query");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].market_price_min, Some(12000.0));
        assert_eq!(rows[0].market_price_max, Some(12000.0));
        assert!(rows[0].variant.is_none());
    }

    #[tokio::test]
    async fn duplicate_tuple_updates_instead_of_second_insert() {
        let dir = tempdir().expect("tempdir");
        let (runner, store) = runner_with_store(&dir, RunnerConfig::default()).await;

        let batch = vec![
            tuple("Luffy", Some(12000.0), None),
            tuple("Luffy", Some(12000.0), None),
        ];
        let summary = runner.run(batch, None).await.expect("run");
        assert_eq!(summary.inserted, 1);
        assert_eq!(summary.updated, 1);

        let rows = store.query_by_name("Luffy").await.expect("query");
        assert_eq!(rows.len(), 1, "same tuple twice must not fragment");
    }

    #[tokio::test]
    async fn malformed_tuples_are_reported_without_aborting() {
        let dir = tempdir().expect("tempdir");
        let (runner, store) = runner_with_store(&dir, RunnerConfig::default()).await;

        let batch = vec![
            tuple("", Some(5000.0), None),
            tuple("Nami", Some(-1.0), None),
            tuple("Zoro", Some(9000.0), None),
        ];
        let summary = runner.run(batch, None).await.expect("run");
        assert_eq!(summary.errors.len(), 2);
        assert_eq!(summary.inserted, 1);
        assert_eq!(store.query_by_name("Zoro").await.expect("q").len(), 1);
    }

    #[tokio::test]
    async fn checkpoint_resume_skips_processed_prefix() {
        let dir = tempdir().expect("tempdir");
        let checkpoint_path = dir.path().join("run.checkpoint.json");
        let config = RunnerConfig {
            checkpoint_path: Some(checkpoint_path.clone()),
            ..Default::default()
        };

        let fingerprint = figcat_store::sha256_hex(b"batch-1");
        let (runner, store) = runner_with_store(&dir, config.clone()).await;
        let batch = vec![
            tuple("Luffy", Some(12000.0), None),
            tuple("Zoro", Some(9000.0), None),
        ];
        runner
            .run(batch.clone(), Some(fingerprint.clone()))
            .await
            .expect("first run");

        let cp = Checkpoint::load(&checkpoint_path)
            .await
            .expect("load")
            .expect("saved");
        assert_eq!(cp.last_offset, 2);

        // Re-running the same input resumes past everything: no double
        // processing, catalog unchanged.
        let (runner2, _) = {
            let store = store.clone();
            let runner = IngestionRunner::new(
                store.clone(),
                ReconciliationPolicy::default(),
                None,
                config,
            );
            (runner, store)
        };
        let summary = runner2
            .run(batch, Some(fingerprint))
            .await
            .expect("second run");
        assert_eq!(summary.inserted, 0);
        assert_eq!(summary.updated, 0);
        assert_eq!(summary.processed, 2);
        assert_eq!(store.query_by_name("Luffy").await.expect("q").len(), 1);
    }

    #[tokio::test]
    async fn cancellation_stops_between_tuples() {
        let dir = tempdir().expect("tempdir");
        let (runner, store) = runner_with_store(&dir, RunnerConfig::default()).await;
        runner.request_cancel();

        let summary = runner
            .run(vec![tuple("Luffy", Some(12000.0), None)], None)
            .await
            .expect("run");
        assert_eq!(summary.inserted, 0);
        assert!(store.query_by_name("Luffy").await.expect("q").is_empty());
    }

    #[tokio::test]
    async fn sharded_mode_keeps_same_name_tuples_in_order() {
        let dir = tempdir().expect("tempdir");
        let config = RunnerConfig {
            concurrency: 4,
            ..Default::default()
        };
        let (runner, store) = runner_with_store(&dir, config).await;

        let mut batch = Vec::new();
        for name in ["Luffy", "Zoro", "Nami", "Sanji"] {
            batch.push(tuple(name, Some(9000.0), None));
            batch.push(tuple(name, Some(9000.0), None));
        }
        let summary = runner.run(batch, None).await.expect("run");
        assert_eq!(summary.inserted, 4, "one row per name");
        assert_eq!(summary.updated, 4);
        for name in ["Luffy", "Zoro", "Nami", "Sanji"] {
            assert_eq!(store.query_by_name(name).await.expect("q").len(), 1);
        }
    }

    #[tokio::test]
    async fn sharded_run_checkpoints_on_completion() {
        let dir = tempdir().expect("tempdir");
        let checkpoint_path = dir.path().join("run.checkpoint.json");
        let config = RunnerConfig {
            checkpoint_path: Some(checkpoint_path.clone()),
            concurrency: 4,
            ..Default::default()
        };
        let fingerprint = figcat_store::sha256_hex(b"batch-sharded");
        let (runner, store) = runner_with_store(&dir, config.clone()).await;
        let batch = vec![
            tuple("Luffy", Some(12000.0), None),
            tuple("Zoro", Some(9000.0), None),
            tuple("Nami", Some(7000.0), None),
        ];
        runner
            .run(batch.clone(), Some(fingerprint.clone()))
            .await
            .expect("first run");

        let cp = Checkpoint::load(&checkpoint_path)
            .await
            .expect("load")
            .expect("saved");
        assert_eq!(cp.last_offset, 3);

        // The rerun resumes past the whole batch instead of reinserting.
        let runner2 = IngestionRunner::new(
            store.clone(),
            ReconciliationPolicy::default(),
            None,
            config,
        );
        let summary = runner2
            .run(batch, Some(fingerprint))
            .await
            .expect("second run");
        assert_eq!(summary.inserted, 0);
        assert_eq!(summary.processed, 3);
        for name in ["Luffy", "Zoro", "Nami"] {
            assert_eq!(store.query_by_name(name).await.expect("q").len(), 1);
        }
    }

    #[tokio::test]
    async fn verify_url_fills_missing_price_and_variant() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            use tokio::io::{AsyncReadExt, AsyncWriteExt};
            while let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;
                let body = r#"{"price": 12000.0, "variant": "Deluxe"}"#;
                let response = format!(
                    "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = socket.write_all(response.as_bytes()).await;
            }
        });

        let dir = tempdir().expect("tempdir");
        let config = RunnerConfig {
            lookup_delay: Duration::ZERO,
            ..Default::default()
        };
        let store = Arc::new(
            JsonCatalogStore::open(dir.path().join("catalog.json"))
                .await
                .expect("open"),
        );
        let lookup = LookupClient::new(LookupConfig {
            timeout: Duration::from_secs(5),
            user_agent: None,
            backoff: BackoffPolicy::default(),
            token_bucket: None,
        })
        .expect("client");
        let runner = IngestionRunner::new(
            store.clone(),
            ReconciliationPolicy::default(),
            Some(Arc::new(lookup)),
            config,
        );

        let mut t = tuple("Luffy", None, None);
        t.verify_url = Some(format!("http://{addr}/item"));

        let summary = runner.run(vec![t], None).await.expect("run");
        assert_eq!(summary.inserted, 1);
        assert!(summary.unresolved.is_empty());

        let rows = store.query_by_name("Luffy").await.expect("q");
        assert_eq!(rows[0].variant.as_deref(), Some("Deluxe"));
        assert_eq!(rows[0].market_price_min, Some(12000.0));
    }

    #[tokio::test]
    async fn exhausted_lookup_retries_leave_tuple_unresolved() {
        // Bind-then-drop guarantees a closed local port.
        let closed_port = {
            let reserved = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
            reserved.local_addr().expect("addr").port()
        };

        let dir = tempdir().expect("tempdir");
        let config = RunnerConfig {
            lookup_delay: Duration::ZERO,
            ..Default::default()
        };
        let store = Arc::new(
            JsonCatalogStore::open(dir.path().join("catalog.json"))
                .await
                .expect("open"),
        );
        let lookup = LookupClient::new(LookupConfig {
            timeout: Duration::from_secs(1),
            user_agent: None,
            backoff: BackoffPolicy {
                max_retries: 1,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(1),
            },
            token_bucket: None,
        })
        .expect("client");
        let runner = IngestionRunner::new(
            store.clone(),
            ReconciliationPolicy::default(),
            Some(Arc::new(lookup)),
            config,
        );

        let mut t = tuple("Luffy", None, None);
        t.verify_url = Some(format!("http://127.0.0.1:{closed_port}/item"));

        let summary = runner.run(vec![t], None).await.expect("run");
        assert_eq!(summary.unresolved.len(), 1);
        assert_eq!(summary.unresolved[0].name, "Luffy");
        assert_eq!(summary.unresolved[0].source, "crawl-test");
        assert_eq!(summary.inserted, 0);
        assert!(store.query_by_name("Luffy").await.expect("q").is_empty());
    }

    #[tokio::test]
    async fn reports_land_under_run_id() {
        let dir = tempdir().expect("tempdir");
        let config = RunnerConfig {
            reports_dir: Some(dir.path().join("reports")),
            ..Default::default()
        };
        let (runner, _store) = runner_with_store(&dir, config).await;
        let summary = runner
            .run(vec![tuple("Luffy", Some(12000.0), None)], None)
            .await
            .expect("run");

        let report_dir = dir.path().join("reports").join(summary.run_id.to_string());
        assert!(report_dir.join("summary.json").exists());
        assert!(report_dir.join("brief.md").exists());
    }
}

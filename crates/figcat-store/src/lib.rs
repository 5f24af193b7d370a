//! Catalog persistence + candidate lookup + external verification client.
//!
//! The store is a JSON snapshot on disk, loaded once per run and written
//! back atomically (temp file + rename) after every mutation. The catalog
//! is the only shared mutable resource in the system, so all mutation goes
//! through the [`CatalogStore`] trait one field-patch at a time.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use figcat_core::{CatalogEntry, EntryPatch};
use figcat_match::name::normalize;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use strsim::jaro_winkler;
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::info_span;
use uuid::Uuid;

pub const CRATE_NAME: &str = "figcat-store";

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("entry {0} not found")]
    NotFound(Uuid),
    #[error("entry {0} already exists")]
    Conflict(Uuid),
    #[error("catalog io at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("catalog snapshot at {path} is malformed: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Storage operations the reconciliation core needs; nothing more.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn insert(&self, entry: CatalogEntry) -> Result<(), StoreError>;
    async fn update(&self, id: Uuid, patch: &EntryPatch) -> Result<(), StoreError>;
    async fn delete(&self, id: Uuid) -> Result<(), StoreError>;
    /// Exact case-insensitive name match.
    async fn query_by_name(&self, name: &str) -> Result<Vec<CatalogEntry>, StoreError>;
    async fn query_all(&self, offset: usize, limit: usize) -> Result<Vec<CatalogEntry>, StoreError>;
}

#[derive(Debug, Serialize, Deserialize)]
struct CatalogSnapshot {
    #[allow(dead_code)]
    version: u32,
    entries: Vec<CatalogEntry>,
}

/// File-backed store: one JSON snapshot, rewritten atomically per
/// mutation via a temp file and rename.
pub struct JsonCatalogStore {
    path: PathBuf,
    state: Mutex<BTreeMap<Uuid, CatalogEntry>>,
}

impl JsonCatalogStore {
    /// Load the snapshot at `path`; a missing file is an empty catalog.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let mut entries = BTreeMap::new();
        match fs::read(&path).await {
            Ok(bytes) => {
                let snapshot: CatalogSnapshot =
                    serde_json::from_slice(&bytes).map_err(|source| StoreError::Malformed {
                        path: path.clone(),
                        source,
                    })?;
                for entry in snapshot.entries {
                    entries.insert(entry.id, entry);
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(source) => {
                return Err(StoreError::Io {
                    path: path.clone(),
                    source,
                })
            }
        }
        Ok(Self {
            path,
            state: Mutex::new(entries),
        })
    }

    async fn persist(&self, entries: &BTreeMap<Uuid, CatalogEntry>) -> Result<(), StoreError> {
        let snapshot = CatalogSnapshot {
            version: 1,
            entries: entries.values().cloned().collect(),
        };
        let bytes = serde_json::to_vec_pretty(&snapshot).map_err(|source| StoreError::Malformed {
            path: self.path.clone(),
            source,
        })?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await.map_err(|source| StoreError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        let temp_path = self
            .path
            .with_extension(format!("tmp.{}", Uuid::new_v4()));
        let mut file = fs::File::create(&temp_path)
            .await
            .map_err(|source| StoreError::Io {
                path: temp_path.clone(),
                source,
            })?;
        file.write_all(&bytes).await.map_err(|source| StoreError::Io {
            path: temp_path.clone(),
            source,
        })?;
        file.flush().await.map_err(|source| StoreError::Io {
            path: temp_path.clone(),
            source,
        })?;
        drop(file);

        match fs::rename(&temp_path, &self.path).await {
            Ok(()) => Ok(()),
            Err(source) => {
                let _ = fs::remove_file(&temp_path).await;
                Err(StoreError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        }
    }
}

#[async_trait]
impl CatalogStore for JsonCatalogStore {
    async fn insert(&self, entry: CatalogEntry) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if state.contains_key(&entry.id) {
            return Err(StoreError::Conflict(entry.id));
        }
        state.insert(entry.id, entry);
        self.persist(&state).await
    }

    async fn update(&self, id: Uuid, patch: &EntryPatch) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let entry = state.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        entry.apply(patch);
        self.persist(&state).await
    }

    async fn delete(&self, id: Uuid) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if state.remove(&id).is_none() {
            return Err(StoreError::NotFound(id));
        }
        self.persist(&state).await
    }

    async fn query_by_name(&self, name: &str) -> Result<Vec<CatalogEntry>, StoreError> {
        let needle = name.trim().to_lowercase();
        let state = self.state.lock().await;
        Ok(state
            .values()
            .filter(|e| e.name.trim().to_lowercase() == needle)
            .cloned()
            .collect())
    }

    async fn query_all(&self, offset: usize, limit: usize) -> Result<Vec<CatalogEntry>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.values().skip(offset).take(limit).cloned().collect())
    }
}

/// Upper bound on candidates handed back per lookup; disambiguation past
/// this point belongs to the caller's matcher, not the index.
pub const MAX_CANDIDATES: usize = 10;
const FUZZY_PREFIX_LEN: usize = 16;
const FUZZY_PREFIX_THRESHOLD: f64 = 0.85;
const SCAN_PAGE: usize = 256;

/// Two-tier candidate retrieval: exact case-insensitive name match first,
/// and only when that is empty a fuzzy pass over a bounded name prefix.
/// The prefix bound keeps OCR-drift recall without per-tuple full-string
/// scans on long names.
pub struct CatalogIndex {
    store: Arc<dyn CatalogStore>,
}

impl CatalogIndex {
    pub fn new(store: Arc<dyn CatalogStore>) -> Self {
        Self { store }
    }

    pub async fn find_candidates(
        &self,
        name: &str,
        maker: Option<&str>,
    ) -> Result<Vec<CatalogEntry>, StoreError> {
        let mut exact = self.store.query_by_name(name).await?;
        if !exact.is_empty() {
            // Rank before capping so a maker-agreeing candidate past the
            // cap is kept rather than dropped.
            order_by_maker(&mut exact, maker);
            exact.truncate(MAX_CANDIDATES);
            return Ok(exact);
        }

        let query_prefix = bounded_prefix(name);
        if query_prefix.is_empty() {
            return Ok(Vec::new());
        }

        let mut candidates = Vec::new();
        let mut offset = 0;
        loop {
            let page = self.store.query_all(offset, SCAN_PAGE).await?;
            if page.is_empty() {
                break;
            }
            offset += page.len();
            for entry in page {
                let entry_prefix = bounded_prefix(&entry.name);
                if entry_prefix.is_empty() {
                    continue;
                }
                let contained = entry_prefix.contains(&query_prefix)
                    || query_prefix.contains(&entry_prefix);
                if contained || jaro_winkler(&query_prefix, &entry_prefix) >= FUZZY_PREFIX_THRESHOLD
                {
                    candidates.push(entry);
                    if candidates.len() >= MAX_CANDIDATES {
                        order_by_maker(&mut candidates, maker);
                        return Ok(candidates);
                    }
                }
            }
        }
        order_by_maker(&mut candidates, maker);
        Ok(candidates)
    }
}

fn bounded_prefix(name: &str) -> String {
    normalize(name).chars().take(FUZZY_PREFIX_LEN).collect()
}

/// Stable-sort maker-agreeing candidates to the front so the policy sees
/// the strongest matches first. Scale and maker are tiebreakers only.
fn order_by_maker(candidates: &mut [CatalogEntry], maker: Option<&str>) {
    if let Some(maker) = maker {
        candidates.sort_by_key(|e| {
            !figcat_match::name::makers_agree(e.maker.as_deref(), Some(maker))
        });
    }
}

/// Resumable-run checkpoint, overwritten periodically during a batch.
/// `input_sha256` pins the checkpoint to one input file so a stale
/// checkpoint is ignored instead of skipping the wrong tuples.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub processed_count: usize,
    pub last_offset: usize,
    pub input_sha256: String,
    pub updated_at: DateTime<Utc>,
}

impl Checkpoint {
    pub async fn load(path: &Path) -> anyhow::Result<Option<Checkpoint>> {
        match fs::read(path).await {
            Ok(bytes) => {
                let checkpoint = serde_json::from_slice(&bytes)
                    .with_context(|| format!("parsing checkpoint {}", path.display()))?;
                Ok(Some(checkpoint))
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => {
                Err(err).with_context(|| format!("reading checkpoint {}", path.display()))
            }
        }
    }

    pub async fn save(&self, path: &Path) -> anyhow::Result<()> {
        let bytes = serde_json::to_vec_pretty(self).context("serializing checkpoint")?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("creating {}", parent.display()))?;
            }
        }
        let temp = path.with_extension(format!("tmp.{}", Uuid::new_v4()));
        fs::write(&temp, &bytes)
            .await
            .with_context(|| format!("writing checkpoint temp {}", temp.display()))?;
        fs::rename(&temp, path)
            .await
            .with_context(|| format!("renaming checkpoint into {}", path.display()))?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

/// 429 and 5xx are polite-retry territory; 403 is how the sources under
/// crawl signal a block/CAPTCHA wall, which usually clears after backoff.
pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::FORBIDDEN
    {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor);
        delay.min(self.max_delay)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TokenBucketConfig {
    pub capacity: u32,
    pub refill_every: Duration,
}

/// Minimal token bucket serializing polite access to external sources.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: u32,
    refill_every: Duration,
    state: Mutex<TokenBucketState>,
}

#[derive(Debug, Clone, Copy)]
struct TokenBucketState {
    tokens: u32,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(capacity: u32, refill_every: Duration) -> Self {
        Self {
            capacity,
            refill_every,
            state: Mutex::new(TokenBucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    pub async fn take(&self) {
        loop {
            let mut state = self.state.lock().await;
            let elapsed = state.last_refill.elapsed();
            if elapsed >= self.refill_every && self.refill_every.as_millis() > 0 {
                let refills = (elapsed.as_millis() / self.refill_every.as_millis()) as u32;
                state.tokens = state.tokens.saturating_add(refills).min(self.capacity);
                state.last_refill = Instant::now();
            }

            if state.tokens > 0 {
                state.tokens -= 1;
                return;
            }

            let sleep_for = self.refill_every;
            drop(state);
            tokio::time::sleep(sleep_for).await;
        }
    }
}

#[derive(Debug, Clone)]
pub struct LookupConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub backoff: BackoffPolicy,
    pub token_bucket: Option<TokenBucketConfig>,
}

impl Default for LookupConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: None,
            backoff: BackoffPolicy::default(),
            token_bucket: Some(TokenBucketConfig {
                capacity: 1,
                refill_every: Duration::from_secs(2),
            }),
        }
    }
}

#[derive(Debug, Error)]
pub enum LookupError {
    #[error("lookup request failed after retries: {0}")]
    Request(#[from] reqwest::Error),
    #[error("lookup http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("lookup response from {url} is not valid json: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Fields a live source can confirm for one item.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Verification {
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub variant: Option<String>,
}

/// Rate-limited client for price/variant re-verification against live
/// sources. Retries with exponential backoff on retryable failures; the
/// caller decides what an exhausted retry budget means.
pub struct LookupClient {
    client: reqwest::Client,
    token_bucket: Option<Arc<TokenBucket>>,
    backoff: BackoffPolicy,
}

impl LookupClient {
    pub fn new(config: LookupConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);
        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }
        let client = builder.build().context("building reqwest client")?;
        let token_bucket = config
            .token_bucket
            .map(|c| Arc::new(TokenBucket::new(c.capacity, c.refill_every)));
        Ok(Self {
            client,
            token_bucket,
            backoff: config.backoff,
        })
    }

    pub async fn fetch_verification(
        &self,
        run_id: Uuid,
        url: &str,
    ) -> Result<Verification, LookupError> {
        if let Some(bucket) = &self.token_bucket {
            bucket.take().await;
        }

        let span = info_span!("external_lookup", %run_id, url);
        let _guard = span.enter();

        let mut last_request_error: Option<reqwest::Error> = None;

        for attempt in 0..=self.backoff.max_retries {
            match self.client.get(url).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    let final_url = resp.url().to_string();

                    if status.is_success() {
                        let body = resp.bytes().await?;
                        return serde_json::from_slice(&body).map_err(|source| {
                            LookupError::Decode {
                                url: final_url,
                                source,
                            }
                        });
                    }

                    if classify_status(status) == RetryDisposition::Retryable
                        && attempt < self.backoff.max_retries
                    {
                        tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                        continue;
                    }

                    return Err(LookupError::HttpStatus {
                        status: status.as_u16(),
                        url: final_url,
                    });
                }
                Err(err) => {
                    if classify_reqwest_error(&err) == RetryDisposition::Retryable
                        && attempt < self.backoff.max_retries
                    {
                        last_request_error = Some(err);
                        tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                        continue;
                    }
                    return Err(LookupError::Request(err));
                }
            }
        }

        Err(LookupError::Request(
            last_request_error.expect("retry loop captures a request error"),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figcat_core::TrustTier;
    use tempfile::tempdir;

    fn entry(name: &str, maker: Option<&str>) -> CatalogEntry {
        let now = Utc::now();
        CatalogEntry {
            id: Uuid::new_v4(),
            name: name.to_string(),
            maker: maker.map(str::to_string),
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

    #[tokio::test]
    async fn snapshot_survives_reopen() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("catalog.json");

        let store = JsonCatalogStore::open(&path).await.expect("open");
        let mut e = entry("Luffy", Some("MegaHouse"));
        e.market_price_min = Some(12000.0);
        e.market_price_max = Some(12000.0);
        let id = e.id;
        store.insert(e).await.expect("insert");

        let reopened = JsonCatalogStore::open(&path).await.expect("reopen");
        let rows = reopened.query_by_name("luffy").await.expect("query");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, id);
        assert_eq!(rows[0].market_price_min, Some(12000.0));
    }

    #[tokio::test]
    async fn insert_rejects_duplicate_ids() {
        let dir = tempdir().expect("tempdir");
        let store = JsonCatalogStore::open(dir.path().join("c.json"))
            .await
            .expect("open");
        let e = entry("Zoro", None);
        store.insert(e.clone()).await.expect("first insert");
        assert!(matches!(
            store.insert(e).await,
            Err(StoreError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn update_patches_and_delete_removes() {
        let dir = tempdir().expect("tempdir");
        let store = JsonCatalogStore::open(dir.path().join("c.json"))
            .await
            .expect("open");
        let e = entry("Nami", None);
        let id = e.id;
        store.insert(e).await.expect("insert");

        let patch = EntryPatch {
            variant: Some("Deluxe".into()),
            image: Some(figcat_core::ImageRef {
                url: "https://img/n.jpg".into(),
                trust: TrustTier::Curated,
            }),
            ..Default::default()
        };
        store.update(id, &patch).await.expect("update");
        let rows = store.query_by_name("Nami").await.expect("query");
        assert_eq!(rows[0].variant.as_deref(), Some("Deluxe"));

        store.delete(id).await.expect("delete");
        assert!(matches!(
            store.delete(id).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn index_prefers_exact_tier() {
        let dir = tempdir().expect("tempdir");
        let store = Arc::new(
            JsonCatalogStore::open(dir.path().join("c.json"))
                .await
                .expect("open"),
        );
        store.insert(entry("Luffy", None)).await.expect("insert");
        store.insert(entry("Luffy Gear 5", None)).await.expect("insert");

        let index = CatalogIndex::new(store);
        let hits = index.find_candidates("luffy", None).await.expect("find");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].name, "Luffy");
    }

    #[tokio::test]
    async fn maker_match_survives_candidate_cap() {
        let dir = tempdir().expect("tempdir");
        let store = Arc::new(
            JsonCatalogStore::open(dir.path().join("c.json"))
                .await
                .expect("open"),
        );
        for _ in 0..(MAX_CANDIDATES + 2) {
            store.insert(entry("Luffy", None)).await.expect("insert");
        }
        store
            .insert(entry("Luffy", Some("MegaHouse")))
            .await
            .expect("insert");

        let index = CatalogIndex::new(store);
        let hits = index
            .find_candidates("Luffy", Some("MegaHouse"))
            .await
            .expect("find");
        assert_eq!(hits.len(), MAX_CANDIDATES);
        assert_eq!(hits[0].maker.as_deref(), Some("MegaHouse"));
    }

    #[tokio::test]
    async fn index_falls_back_to_fuzzy_prefix() {
        let dir = tempdir().expect("tempdir");
        let store = Arc::new(
            JsonCatalogStore::open(dir.path().join("c.json"))
                .await
                .expect("open"),
        );
        store
            .insert(entry("Roronoa Zoro", Some("Banpresto")))
            .await
            .expect("insert");
        store.insert(entry("Sanji", None)).await.expect("insert");

        let index = CatalogIndex::new(store);
        // OCR drift: dropped space, different casing.
        let hits = index
            .find_candidates("RoronoaZorro", Some("Banpresto"))
            .await
            .expect("find");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].name, "Roronoa Zoro");
    }

    #[tokio::test]
    async fn checkpoint_roundtrips() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("run.checkpoint.json");
        assert!(Checkpoint::load(&path).await.expect("load none").is_none());

        let cp = Checkpoint {
            processed_count: 42,
            last_offset: 42,
            input_sha256: sha256_hex(b"tuples"),
            updated_at: Utc::now(),
        };
        cp.save(&path).await.expect("save");
        let loaded = Checkpoint::load(&path).await.expect("load").expect("some");
        assert_eq!(loaded.processed_count, 42);
        assert_eq!(loaded.input_sha256, cp.input_sha256);
    }

    #[test]
    fn backoff_is_exponential_and_capped() {
        let policy = BackoffPolicy {
            max_retries: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
        };
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(350));
        assert_eq!(policy.delay_for_attempt(5), Duration::from_millis(350));
    }

    #[test]
    fn block_and_throttle_statuses_are_retryable() {
        assert_eq!(
            classify_status(StatusCode::TOO_MANY_REQUESTS),
            RetryDisposition::Retryable
        );
        assert_eq!(
            classify_status(StatusCode::FORBIDDEN),
            RetryDisposition::Retryable
        );
        assert_eq!(
            classify_status(StatusCode::BAD_GATEWAY),
            RetryDisposition::Retryable
        );
        assert_eq!(
            classify_status(StatusCode::NOT_FOUND),
            RetryDisposition::NonRetryable
        );
    }
}

//! Reconciliation engine: per-tuple decision policy, batch ingestion
//! orchestration and the catalog dedup sweeper.

use std::path::PathBuf;

pub mod policy;
pub mod runner;
pub mod sweeper;

pub use policy::ReconciliationPolicy;
pub use runner::{IngestionRunner, RunSummary, RunnerConfig};
pub use sweeper::{DedupSweeper, SweepOutcome, SweepPlan};

pub const CRATE_NAME: &str = "figcat-engine";

/// Engine defaults, overridable by CLI flags.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub catalog_path: PathBuf,
    pub checkpoint_path: Option<PathBuf>,
    pub reports_dir: PathBuf,
    pub user_agent: String,
    pub http_timeout_secs: u64,
    pub lookup_delay_ms: u64,
    pub concurrency: usize,
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self {
            catalog_path: std::env::var("FIGCAT_CATALOG")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./catalog.json")),
            checkpoint_path: std::env::var("FIGCAT_CHECKPOINT").ok().map(PathBuf::from),
            reports_dir: std::env::var("FIGCAT_REPORTS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./reports")),
            user_agent: std::env::var("FIGCAT_USER_AGENT")
                .unwrap_or_else(|_| "figcat-bot/0.1".to_string()),
            http_timeout_secs: std::env::var("FIGCAT_HTTP_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(20),
            lookup_delay_ms: std::env::var("FIGCAT_LOOKUP_DELAY_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(2000),
            concurrency: std::env::var("FIGCAT_CONCURRENCY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(1),
        }
    }
}

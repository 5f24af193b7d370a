use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use figcat_engine::{
    runner::load_tuple_file, DedupSweeper, EngineConfig, IngestionRunner, ReconciliationPolicy,
    RunnerConfig,
};
use figcat_match::KeywordTable;
use figcat_store::{JsonCatalogStore, LookupClient, LookupConfig};
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "figcat")]
#[command(about = "Figure catalog reconciliation and dedup")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Reconcile a batch of incoming tuples against the catalog.
    Reconcile {
        /// JSON file with the incoming tuple batch.
        #[arg(long)]
        input: PathBuf,
        /// Catalog snapshot path; created when missing.
        #[arg(long)]
        catalog: Option<PathBuf>,
        /// Checkpoint path for resumable runs.
        #[arg(long)]
        checkpoint: Option<PathBuf>,
        /// Directory for per-run reports.
        #[arg(long)]
        reports_dir: Option<PathBuf>,
        /// Worker count; above 1 shards the batch by name.
        #[arg(long)]
        concurrency: Option<usize>,
        /// Minimum delay before each external lookup, in milliseconds.
        #[arg(long)]
        lookup_delay_ms: Option<u64>,
        /// Skip external verification lookups entirely.
        #[arg(long)]
        offline: bool,
        /// Override the built-in variant keyword table.
        #[arg(long)]
        variant_table: Option<PathBuf>,
    },
    /// Scan the catalog for duplicates and missing variant labels.
    Dedup {
        /// Catalog snapshot path.
        #[arg(long)]
        catalog: Option<PathBuf>,
        /// Actually apply the planned deletions/relabels. Off by
        /// default: without it only the preview is printed.
        #[arg(long)]
        apply: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let defaults = EngineConfig::from_env();

    match cli.command {
        Commands::Reconcile {
            input,
            catalog,
            checkpoint,
            reports_dir,
            concurrency,
            lookup_delay_ms,
            offline,
            variant_table,
        } => {
            let catalog_path = catalog.unwrap_or(defaults.catalog_path);
            let store = Arc::new(
                JsonCatalogStore::open(&catalog_path)
                    .await
                    .with_context(|| format!("opening catalog {}", catalog_path.display()))?,
            );

            let table = match variant_table {
                Some(path) => KeywordTable::from_path(path)?,
                None => KeywordTable::builtin().clone(),
            };
            let policy = ReconciliationPolicy::new(table);

            let lookup = if offline {
                None
            } else {
                Some(Arc::new(LookupClient::new(LookupConfig {
                    timeout: Duration::from_secs(defaults.http_timeout_secs),
                    user_agent: Some(defaults.user_agent.clone()),
                    ..Default::default()
                })?))
            };

            let config = RunnerConfig {
                checkpoint_path: checkpoint.or(defaults.checkpoint_path),
                reports_dir: Some(reports_dir.unwrap_or(defaults.reports_dir)),
                lookup_delay: Duration::from_millis(
                    lookup_delay_ms.unwrap_or(defaults.lookup_delay_ms),
                ),
                concurrency: concurrency.unwrap_or(defaults.concurrency),
                ..Default::default()
            };

            let runner = Arc::new(IngestionRunner::new(store, policy, lookup, config));
            let cancel_runner = runner.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("interrupt received; finishing current tuple then stopping");
                    cancel_runner.request_cancel();
                }
            });

            let (tuples, fingerprint) = load_tuple_file(&input).await?;
            let summary = runner.run(tuples, Some(fingerprint)).await?;
            println!(
                "reconcile complete: run_id={} processed={} inserted={} updated={} skipped={} unresolved={} errors={}",
                summary.run_id,
                summary.processed,
                summary.inserted,
                summary.updated,
                summary.skipped,
                summary.unresolved.len(),
                summary.errors.len()
            );
            for item in &summary.unresolved {
                eprintln!("  unresolved [{}]: {} ({})", item.name, item.url, item.error);
            }
            for failure in &summary.errors {
                eprintln!("  error [{}]: {}", failure.name, failure.error);
            }
        }
        Commands::Dedup { catalog, apply } => {
            let catalog_path = catalog.unwrap_or(defaults.catalog_path);
            let store = JsonCatalogStore::open(&catalog_path)
                .await
                .with_context(|| format!("opening catalog {}", catalog_path.display()))?;

            let sweeper = DedupSweeper::new();
            let plan = sweeper.plan(&store).await?;
            println!("{}", plan.render_preview());

            if !apply {
                if !plan.is_empty() {
                    println!("preview only; re-run with --apply to execute");
                }
                return Ok(());
            }

            let outcome = sweeper.apply(&store, &plan).await?;
            println!(
                "dedup applied: deleted={} relabeled={} errors={}",
                outcome.deleted,
                outcome.relabeled,
                outcome.errors.len()
            );
            for error in &outcome.errors {
                eprintln!("  {error}");
            }
        }
    }

    Ok(())
}

//! Ingest service - loads CMS Medicare source files into Postgres
//!
//! Usage:
//!   ingest                          # claims, betos, taxonomy
//!   ingest --dataset betos-codes    # one dataset
//!   ingest --dry-run --json         # in-memory store, JSON report

use anyhow::{Context, Result};
use clap::Parser;
use cms_ingest::dedup::first_wins;
use cms_ingest::store::{EntityStore, MemoryStore, PgStore};
use cms_ingest::{run_all, DatasetKind, RunSummary, Settings};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "ingest", about = "Loads CMS claims, BETOS and RBCS data into Postgres")]
struct Args {
    /// Dataset to load (repeatable). Defaults to claims, betos and taxonomy.
    #[arg(long = "dataset", value_enum)]
    datasets: Vec<DatasetKind>,

    /// Dry run - normalize and dedup against an in-memory store
    #[arg(long, default_value = "false")]
    dry_run: bool,

    /// Apply sql/schema.sql before loading
    #[arg(long, default_value = "false")]
    init_schema: bool,

    /// Print the run summary as JSON
    #[arg(long, default_value = "false")]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let (datasets, _) = if args.datasets.is_empty() {
        (DatasetKind::DEFAULT_SET.to_vec(), 0)
    } else {
        first_wins(args.datasets.clone(), |d| *d)
    };

    // Fails before any file or network I/O.
    let settings = Settings::from_env(&datasets, args.dry_run)?;

    println!("=== CMS Claims Ingest ===");
    println!(
        "Datasets: {}",
        datasets.iter().map(|d| d.name()).collect::<Vec<_>>().join(", ")
    );
    println!("Mode: {}", if args.dry_run { "dry-run" } else { "live" });

    let mut store: Box<dyn EntityStore> = match &settings.database {
        Some(db) => {
            let mut pg = PgStore::connect(db)
                .await
                .with_context(|| format!("Failed to connect to {}:{}/{}", db.host, db.port, db.name))?;
            if args.init_schema {
                if let Err(e) = pg.ensure_schema().await {
                    pg.close().await;
                    return Err(e).context("Failed to apply schema");
                }
                println!("Schema applied");
            }
            Box::new(pg)
        }
        None => {
            if args.init_schema {
                println!("Dry run - --init-schema ignored");
            }
            Box::new(MemoryStore::new())
        }
    };

    let result = run_all(store.as_mut(), &datasets, &settings).await;
    store.close().await;
    let summary = result?;

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&summary).context("Failed to encode summary")?
        );
    } else {
        print_summary(&summary);
    }

    let failed: Vec<&str> = summary
        .datasets
        .iter()
        .filter(|d| !d.is_ok())
        .map(|d| d.dataset.name())
        .collect();
    if !failed.is_empty() {
        anyhow::bail!("{} dataset(s) failed: {}", failed.len(), failed.join(", "));
    }
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    println!("\n=== Summary (run {}, {}) ===", summary.run_id, summary.backend);
    for report in &summary.datasets {
        println!("\n[{}]", report.dataset);
        if let Some(err) = &report.error {
            println!("  FAILED: {}", err);
            continue;
        }
        println!(
            "  rows read: {} (of {} in source), accepted: {}, rejected: {}",
            report.rows_read, report.rows_in_source, report.accepted, report.rejected
        );
        println!(
            "  {:<15} {:>8} {:>8} {:>8} {:>8} {:>8} {:>8}",
            "table", "records", "rejected", "dupes", "inserted", "skipped", "failed"
        );
        for t in &report.tables {
            println!(
                "  {:<15} {:>8} {:>8} {:>8} {:>8} {:>8} {:>8}",
                t.table, t.records, t.rejected, t.duplicates_dropped, t.inserted, t.skipped_existing, t.failed
            );
        }
        println!(
            "  inserted: {}, skipped as duplicate: {}",
            report.inserted(),
            report.skipped_existing()
        );
    }
}

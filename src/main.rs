use ansrecon::{
    fetch::HttpFetcher,
    pipeline::{aggregate_stage, consolidate_stage, enrich_stage, fetch_statements, run_all},
    PipelineConfig,
};
use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Consolidate ANS financial statements and reconcile them against the operator registry"
)]
struct Cli {
    /// YAML config file; built-in defaults when omitted
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Download the latest quarterly statement archives
    Fetch,
    /// Build the per-period consolidated artifact from local archives
    Consolidate,
    /// Join the consolidated artifact onto the registry and validate tax ids
    Enrich,
    /// Group the final artifact by operator and state
    Aggregate,
    /// Every stage in order, then write the run summary
    Run,
}

fn main() -> Result<()> {
    // ─── 1) init logging ─────────────────────────────────────────────
    let env = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,ansrecon=info"));
    fmt::Subscriber::builder()
        .with_env_filter(env)
        .with_span_events(fmt::format::FmtSpan::CLOSE)
        .init();

    // ─── 2) config ───────────────────────────────────────────────────
    let cli = Cli::parse();
    let cfg = PipelineConfig::load(cli.config.as_deref())?;
    info!(command = ?cli.command, "startup");

    // ─── 3) dispatch ─────────────────────────────────────────────────
    match cli.command {
        Command::Fetch => {
            let fetcher = HttpFetcher::new(&cfg.sources)?;
            let report = fetch_statements(&fetcher, &cfg)?;
            info!(selected = ?report.selected, "fetch done");
        }
        Command::Consolidate => {
            let report = consolidate_stage(&cfg)?;
            info!(
                processed = report.processed.len(),
                skipped = report.skipped.len(),
                rows = report.rows_written,
                "consolidate done"
            );
        }
        Command::Enrich => {
            let fetcher = HttpFetcher::new(&cfg.sources)?;
            let report = enrich_stage(&fetcher, &cfg)?;
            info!(
                rows = report.rows_written,
                unmatched = report.join.unmatched_rows,
                invalid_tax_ids = report.invalid_tax_ids,
                "enrich done"
            );
        }
        Command::Aggregate => {
            let report = aggregate_stage(&cfg)?;
            info!(groups = report.groups, "aggregate done");
        }
        Command::Run => {
            let fetcher = HttpFetcher::new(&cfg.sources)?;
            let summary = run_all(&fetcher, &cfg)?;
            info!(
                elapsed_ms = (summary.finished_at - summary.started_at).num_milliseconds(),
                "run done"
            );
        }
    }
    Ok(())
}

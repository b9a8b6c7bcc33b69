// src/bin/verify.rs

use ansrecon::{
    process::{
        columns::{normalize_headers, CanonicalColumn},
        consolidate::read_consolidated,
        filter::ExpenseFilter,
        load_tabular_zip,
        period::parse_period,
        RawTable,
    },
    registry::{join::normalize_join_key, reconciled::read_final},
    PipelineConfig,
};
use anyhow::{bail, Context, Result};
use clap::Parser;
use glob::glob;
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about = "Recount expense rows across pipeline stages")]
struct Args {
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let cfg = PipelineConfig::load(args.config.as_deref())?;
    let filter = ExpenseFilter::new(&cfg.expense_keywords);

    // 1) Count filtered expense rows straight from the archives
    let pattern = cfg.paths.raw_dir.join("*.zip");
    let pattern = pattern.to_string_lossy();
    let zip_paths: Vec<PathBuf> = glob(&pattern)
        .with_context(|| format!("Failed to read glob pattern '{}'", pattern))?
        .filter_map(|entry| entry.ok())
        .collect();
    if zip_paths.is_empty() {
        bail!("No ZIP files found under '{}'", pattern);
    }

    let mut total_archives = 0usize;
    for zip_path in &zip_paths {
        let name = zip_path.file_name().map(|n| n.to_string_lossy().into_owned());
        if name.as_deref().and_then(parse_period).is_none() {
            println!("skip {} (no period token)", zip_path.display());
            continue;
        }
        let table = match load_tabular_zip(zip_path, &cfg.input) {
            Ok(t) => t,
            Err(e) => {
                println!("skip {} ({})", zip_path.display(), e);
                continue;
            }
        };
        let desc = normalize_headers(&table.headers).position(CanonicalColumn::Description);
        total_archives += table
            .rows
            .iter()
            .filter(|row| filter.matches(desc.and_then(|i| RawTable::cell(row, i))))
            .count();
    }

    // 2) Consolidated artifact
    let consolidated_path = cfg.consolidated_path();
    let consolidated = read_consolidated(&consolidated_path)
        .with_context(|| format!("Failed to read '{}'", consolidated_path.display()))?;
    let joinable = consolidated
        .iter()
        .filter(|r| r.registration_id.as_deref().and_then(normalize_join_key).is_some())
        .count();

    // 3) Final artifact, if enrichment has run
    let final_path = cfg.final_path();
    let total_final = if final_path.is_file() {
        Some(read_final(&final_path)?.len())
    } else {
        None
    };

    // 4) Print summary table
    //
    // delta = count(stage) - count(archives)
    let delta = |n: usize| n as isize - total_archives as isize;
    println!("\n{: <25} {:>15} {:>15}", "Stage", "Count", "Delta vs zip");
    println!("{:-<55}", "");
    println!("{: <25} {:>15} {:>15}", "archives", total_archives, 0);
    println!(
        "{: <25} {:>15} {:>15}",
        "consolidated",
        consolidated.len(),
        delta(consolidated.len())
    );
    println!("{: <25} {:>15} {:>15}", "joinable keys", joinable, delta(joinable));
    match total_final {
        Some(n) => println!("{: <25} {:>15} {:>15}", "final", n, delta(n)),
        None => println!("{: <25} {:>15} {:>15}", "final", "-", "-"),
    }

    if consolidated.len() != total_archives {
        println!("\nconsolidated row count differs from the archives");
    }
    if let Some(n) = total_final {
        if n != joinable {
            bail!(
                "join cardinality violated: {} final rows for {} joinable expense rows",
                n,
                joinable
            );
        }
    }
    Ok(())
}

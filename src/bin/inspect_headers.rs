use ansrecon::{
    process::{
        columns::{normalize_headers, schema_warning, CanonicalColumn, ALIAS_TABLE_VERSION},
        load_tabular_zip,
        period::parse_period,
    },
    PipelineConfig,
};
use anyhow::{Context, Result};
use clap::Parser;
use glob::glob;
use serde::Serialize;
use std::path::{Path, PathBuf};

#[derive(Serialize)]
struct ColumnMapping {
    canonical: &'static str,
    source: Option<String>,
    vintage: Option<&'static str>,
}

#[derive(Serialize)]
struct ArchiveHeaders {
    archive: String,
    period: Option<String>,
    entry: Option<String>,
    headers: Vec<String>,
    mapping: Vec<ColumnMapping>,
    warning: Option<String>,
    error: Option<String>,
}

#[derive(Parser)]
#[command(author, version, about = "Show how each archive's headers resolve to canonical columns")]
struct Args {
    #[arg(long)]
    config: Option<PathBuf>,
    /// Directory of statement archives; defaults to the configured raw dir
    #[arg(long)]
    dir: Option<PathBuf>,
}

fn inspect(path: &Path, cfg: &PipelineConfig) -> ArchiveHeaders {
    let archive = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    let mut report = ArchiveHeaders {
        period: parse_period(&archive).map(|p| p.to_string()),
        archive,
        entry: None,
        headers: Vec::new(),
        mapping: Vec::new(),
        warning: None,
        error: None,
    };

    let table = match load_tabular_zip(path, &cfg.input) {
        Ok(t) => t,
        Err(e) => {
            report.error = Some(e.to_string());
            return report;
        }
    };

    let normalized = normalize_headers(&table.headers);
    report.mapping = CanonicalColumn::ALL
        .into_iter()
        .map(|column| ColumnMapping {
            canonical: column.as_str(),
            source: normalized
                .position(column)
                .and_then(|idx| table.headers.get(idx).cloned()),
            vintage: normalized.matched_alias(column).map(|a| a.vintage),
        })
        .collect();
    report.warning = schema_warning(&table.source, &normalized).map(|w| w.to_string());
    report.entry = Some(table.source);
    report.headers = table.headers;
    report
}

fn main() -> Result<()> {
    let args = Args::parse();
    let cfg = PipelineConfig::load(args.config.as_deref())?;
    let dir = args.dir.unwrap_or_else(|| cfg.paths.raw_dir.clone());

    let pattern = dir.join("*.zip");
    let pattern = pattern.to_string_lossy();
    let mut paths: Vec<PathBuf> = glob(&pattern)
        .with_context(|| format!("Failed to read glob pattern '{}'", pattern))?
        .filter_map(|entry| entry.ok())
        .collect();
    paths.sort();

    let reports: Vec<ArchiveHeaders> = paths.iter().map(|p| inspect(p, &cfg)).collect();
    println!("# alias table v{}", ALIAS_TABLE_VERSION);
    println!("{}", serde_yaml::to_string(&reports)?);
    Ok(())
}

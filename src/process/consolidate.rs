use anyhow::{anyhow, Context, Result};
use csv::{ReaderBuilder, WriterBuilder};
use serde::Serialize;
use std::{
    fs::{self, File},
    io::{Read, Write},
    path::{Path, PathBuf},
};
use tracing::{error, info, instrument, warn};
use zip::{write::SimpleFileOptions, CompressionMethod, ZipWriter};

use super::{
    columns::{normalize_headers, schema_warning, CanonicalColumn, SchemaWarning},
    filter::ExpenseFilter,
    load_tabular_zip,
    numeric::{format_decimal, parse_br_decimal, parse_dot_decimal},
    period::{parse_period, Period},
    RawTable,
};
use crate::{config::PipelineConfig, error::ArchiveError};

pub const CONSOLIDATED_HEADERS: [&str; 4] = ["RegistroANS", "Ano", "Trimestre", "Valor Despesas"];

/// An expense row after alias resolution and keyword filtering, tagged with its period.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpenseRecord {
    pub registration_id: Option<String>,
    pub description: Option<String>,
    pub value: Option<f64>,
    pub year: String,
    pub quarter: String,
}

/// What one archive contributed.
#[derive(Debug, Clone)]
pub struct ArchiveOutcome {
    pub archive: String,
    pub period: Period,
    pub rows_read: usize,
    pub records: Vec<ExpenseRecord>,
    pub warning: Option<SchemaWarning>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ArchiveSummary {
    pub archive: String,
    pub period: Period,
    pub rows_read: usize,
    pub rows_kept: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SkippedArchive {
    pub archive: String,
    pub reason: String,
}

/// All archives of one run merged into a single dataset.
#[derive(Debug, Default)]
pub struct Consolidation {
    pub records: Vec<ExpenseRecord>,
    pub processed: Vec<ArchiveSummary>,
    pub skipped: Vec<SkippedArchive>,
    pub warnings: Vec<SchemaWarning>,
}

fn archive_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Normalise, filter and parse an already-extracted table.
pub fn normalize_table(
    table: &RawTable,
    period: Period,
    filter: &ExpenseFilter,
) -> (Vec<ExpenseRecord>, Option<SchemaWarning>) {
    let normalized = normalize_headers(&table.headers);
    let warning = schema_warning(&table.source, &normalized);

    let reg_idx = normalized.position(CanonicalColumn::RegistrationId);
    let desc_idx = normalized.position(CanonicalColumn::Description);
    let value_idx = normalized.position(CanonicalColumn::Value);
    fn cell(row: &[String], idx: Option<usize>) -> Option<&str> {
        idx.and_then(|i| RawTable::cell(row, i))
    }

    let records = table
        .rows
        .iter()
        .filter(|row| filter.matches(cell(row, desc_idx)))
        .map(|row| ExpenseRecord {
            registration_id: cell(row, reg_idx).map(str::to_string),
            description: cell(row, desc_idx).map(str::to_string),
            value: cell(row, value_idx).and_then(parse_br_decimal),
            year: period.year_str(),
            quarter: period.quarter_str(),
        })
        .collect();

    (records, warning)
}

/// Extract → normalise → filter → parse one archive.
#[instrument(level = "info", skip(zip_path, cfg, filter), fields(zip = %zip_path.display()))]
pub fn process_archive(
    zip_path: &Path,
    cfg: &PipelineConfig,
    filter: &ExpenseFilter,
) -> Result<ArchiveOutcome, ArchiveError> {
    let archive = archive_name(zip_path);
    let period = parse_period(&archive).ok_or_else(|| ArchiveError::NoPeriod {
        archive: archive.clone(),
    })?;

    let table = load_tabular_zip(zip_path, &cfg.input)?;
    let (records, warning) = normalize_table(&table, period, filter);
    info!(
        %period,
        rows_read = table.len(),
        rows_kept = records.len(),
        "archive normalised"
    );

    Ok(ArchiveOutcome {
        archive,
        period,
        rows_read: table.len(),
        records,
        warning,
    })
}

/// Process archives one at a time in period order. Failures are logged and skipped.
pub fn consolidate_archives(paths: &[PathBuf], cfg: &PipelineConfig) -> Consolidation {
    let filter = ExpenseFilter::new(&cfg.expense_keywords);

    let mut ordered: Vec<&PathBuf> = paths.iter().collect();
    ordered.sort_by_key(|p| (parse_period(&archive_name(p)), archive_name(p)));

    let mut out = Consolidation::default();
    for path in ordered {
        match process_archive(path, cfg, &filter) {
            Ok(outcome) => {
                out.processed.push(ArchiveSummary {
                    archive: outcome.archive,
                    period: outcome.period,
                    rows_read: outcome.rows_read,
                    rows_kept: outcome.records.len(),
                });
                out.warnings.extend(outcome.warning);
                out.records.extend(outcome.records);
            }
            Err(e) => {
                error!(archive = %e.archive(), error = %e, "skipping archive");
                out.skipped.push(SkippedArchive {
                    archive: e.archive().to_string(),
                    reason: e.to_string(),
                });
            }
        }
    }

    info!(
        processed = out.processed.len(),
        skipped = out.skipped.len(),
        records = out.records.len(),
        "consolidation finished"
    );
    out
}

/// Write the per-period artifact (`;`-separated, UTF-8, dot decimal).
pub fn write_consolidated<P: AsRef<Path>>(path: P, records: &[ExpenseRecord]) -> Result<usize> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("creating {:?}", parent))?;
    }

    let mut wtr = WriterBuilder::new()
        .delimiter(b';')
        .from_path(path)
        .with_context(|| format!("creating {:?}", path))?;
    wtr.write_record(CONSOLIDATED_HEADERS)?;
    for r in records {
        wtr.write_record([
            r.registration_id.as_deref().unwrap_or(""),
            r.year.as_str(),
            r.quarter.as_str(),
            format_decimal(r.value).as_str(),
        ])?;
    }
    wtr.flush().with_context(|| format!("flushing {:?}", path))?;
    Ok(records.len())
}

/// Pack the consolidated CSV into a single-entry ZIP next to it.
pub fn zip_consolidated<P: AsRef<Path>, Q: AsRef<Path>>(csv_path: P, zip_path: Q) -> Result<()> {
    let csv_path = csv_path.as_ref();
    let zip_path = zip_path.as_ref();

    let mut data = Vec::new();
    File::open(csv_path)
        .with_context(|| format!("opening {:?}", csv_path))?
        .read_to_end(&mut data)?;

    let entry_name = archive_name(csv_path);
    let file = File::create(zip_path).with_context(|| format!("creating {:?}", zip_path))?;
    let mut zip = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    zip.start_file(entry_name, options)?;
    zip.write_all(&data)?;
    zip.finish().context("finishing consolidated zip")?;
    Ok(())
}

/// Load a consolidated artifact written by [`write_consolidated`].
pub fn read_consolidated<P: AsRef<Path>>(path: P) -> Result<Vec<ExpenseRecord>> {
    let path = path.as_ref();
    let mut rdr = ReaderBuilder::new()
        .delimiter(b';')
        .has_headers(true)
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("opening {:?}", path))?;

    let headers = rdr.headers()?.clone();
    let column = |name: &str| {
        headers
            .iter()
            .position(|h| h.trim() == name)
            .ok_or_else(|| anyhow!("{:?} has no `{}` column", path, name))
    };
    let reg_idx = column(CONSOLIDATED_HEADERS[0])?;
    let year_idx = column(CONSOLIDATED_HEADERS[1])?;
    let quarter_idx = column(CONSOLIDATED_HEADERS[2])?;
    let value_idx = column(CONSOLIDATED_HEADERS[3])?;

    let mut records = Vec::new();
    for (idx, result) in rdr.records().enumerate() {
        let record = result.with_context(|| format!("{:?} record {}", path, idx))?;
        let field = |i: usize| record.get(i).unwrap_or("").trim();
        if record.len() < headers.len() {
            warn!(record = idx, "short record in consolidated artifact");
        }
        records.push(ExpenseRecord {
            registration_id: Some(field(reg_idx)).filter(|s| !s.is_empty()).map(str::to_string),
            description: None,
            value: parse_dot_decimal(field(value_idx)),
            year: field(year_idx).to_string(),
            quarter: field(quarter_idx).to_string(),
        });
    }
    Ok(records)
}

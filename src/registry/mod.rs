// src/registry/mod.rs
pub mod columns;
pub mod join;
pub mod reconciled;

use anyhow::{Context, Result};
use csv::ReaderBuilder;
use std::{
    fs::{self, File},
    io::Cursor,
    path::Path,
};
use tracing::{debug, info, instrument, warn};

use self::columns::{resolve_registry_columns, RegistryColumns, RegistryField};
use crate::config::InputConfig;
use crate::process::{find_tabular_entry, RawTable};

/// One operator as listed in the registry, fields as the registry spells them.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OperatorRecord {
    pub registration_id: String,
    pub tax_id: String,
    pub legal_name: String,
    pub modality: String,
    pub state: String,
}

#[derive(Debug, Clone, Default)]
pub struct RegistryTable {
    pub records: Vec<OperatorRecord>,
    /// Malformed rows dropped while reading.
    pub skipped_rows: usize,
}

impl RegistryTable {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Read registry text. Rows the CSV reader rejects, and rows with more fields
/// than the header, are counted and skipped.
pub fn parse_registry(bytes: &[u8], input: &InputConfig) -> Result<RegistryTable> {
    let text = input.encoding.decode(bytes);
    let mut rdr = ReaderBuilder::new()
        .delimiter(input.delimiter_byte())
        .has_headers(true)
        .flexible(true)
        .from_reader(Cursor::new(text.as_bytes()));

    let headers: Vec<String> = rdr
        .headers()
        .context("reading registry header row")?
        .iter()
        .map(str::to_string)
        .collect();
    let cols = resolve_registry_columns(&headers);
    let missing = cols.missing();
    if !missing.is_empty() {
        warn!(?missing, "registry columns not found; fields will be blank");
    }

    let mut table = RegistryTable::default();
    for (idx, result) in rdr.records().enumerate() {
        let record = match result {
            Ok(r) => r,
            Err(e) => {
                debug!(record = idx, error = %e, "skipping malformed registry row");
                table.skipped_rows += 1;
                continue;
            }
        };
        if record.len() > headers.len() {
            debug!(
                record = idx,
                fields = record.len(),
                expected = headers.len(),
                "skipping registry row with extra fields"
            );
            table.skipped_rows += 1;
            continue;
        }
        let row: Vec<String> = record.iter().map(str::to_string).collect();
        table.records.push(operator_from_row(&row, &cols));
    }

    if table.skipped_rows > 0 {
        warn!(skipped = table.skipped_rows, "malformed registry rows skipped");
    }
    Ok(table)
}

fn operator_from_row(row: &[String], cols: &RegistryColumns) -> OperatorRecord {
    let get = |field: RegistryField| {
        cols.position(field)
            .and_then(|idx| RawTable::cell(row, idx))
            .unwrap_or("")
            .to_string()
    };
    OperatorRecord {
        registration_id: get(RegistryField::RegistrationId),
        tax_id: get(RegistryField::TaxId),
        legal_name: get(RegistryField::LegalName),
        modality: get(RegistryField::Modality),
        state: get(RegistryField::State),
    }
}

/// Load the registry from a `.csv` file, or from the tabular entry of a `.zip`.
#[instrument(level = "info", skip(path, input), fields(path = %path.as_ref().display()))]
pub fn load_registry<P: AsRef<Path>>(path: P, input: &InputConfig) -> Result<RegistryTable> {
    let path = path.as_ref();
    let is_zip = path
        .extension()
        .and_then(|e| e.to_str())
        .map_or(false, |e| e.eq_ignore_ascii_case("zip"));

    let bytes = if is_zip {
        let file = File::open(path).with_context(|| format!("opening {:?}", path))?;
        find_tabular_entry(&path.display().to_string(), file, input)?.bytes
    } else {
        fs::read(path).with_context(|| format!("reading {:?}", path))?
    };

    let table = parse_registry(&bytes, input)?;
    info!(operators = table.len(), "registry loaded");
    Ok(table)
}

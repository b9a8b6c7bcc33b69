use anyhow::{anyhow, Context, Result};
use csv::{ReaderBuilder, WriterBuilder};
use std::{fs, path::Path};
use tracing::info;

use super::join::JoinedRecord;
use crate::process::{
    numeric::{format_decimal, parse_dot_decimal},
    utils::digits_only,
};
use crate::validate::TaxIdValidator;

pub const FINAL_HEADERS: [&str; 9] = [
    "RegistroANS",
    "Ano",
    "Trimestre",
    "Valor Despesas",
    "CNPJ",
    "RazaoSocial",
    "UF",
    "Modalidade",
    "CNPJ_Valido",
];

/// Final artifact row: expense + operator identity + tax-id validity.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconciledRecord {
    pub registration_id: String,
    pub year: String,
    pub quarter: String,
    pub value: Option<f64>,
    /// Digits only.
    pub tax_id: String,
    pub legal_name: String,
    pub state: String,
    pub modality: String,
    pub tax_id_valid: bool,
}

/// Attach `tax_id_valid` to every joined row. Nothing is removed.
pub fn annotate_tax_ids(
    joined: Vec<JoinedRecord>,
    validator: &TaxIdValidator,
) -> (Vec<ReconciledRecord>, usize) {
    let mut invalid = 0;
    let records: Vec<ReconciledRecord> = joined
        .into_iter()
        .map(|row| {
            let tax_id = digits_only(&row.operator.tax_id);
            let tax_id_valid = validator.is_valid(&tax_id);
            if !tax_id_valid {
                invalid += 1;
            }
            ReconciledRecord {
                registration_id: row.registration_id,
                year: row.expense.year,
                quarter: row.expense.quarter,
                value: row.expense.value,
                tax_id,
                legal_name: row.operator.legal_name,
                state: row.operator.state,
                modality: row.operator.modality,
                tax_id_valid,
            }
        })
        .collect();
    info!(invalid, total = records.len(), "tax ids validated");
    (records, invalid)
}

pub fn write_final<P: AsRef<Path>>(path: P, records: &[ReconciledRecord]) -> Result<usize> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("creating {:?}", parent))?;
    }
    let mut wtr = WriterBuilder::new()
        .delimiter(b';')
        .from_path(path)
        .with_context(|| format!("creating {:?}", path))?;
    wtr.write_record(FINAL_HEADERS)?;
    for r in records {
        wtr.write_record([
            r.registration_id.as_str(),
            r.year.as_str(),
            r.quarter.as_str(),
            format_decimal(r.value).as_str(),
            r.tax_id.as_str(),
            r.legal_name.as_str(),
            r.state.as_str(),
            r.modality.as_str(),
            if r.tax_id_valid { "true" } else { "false" },
        ])?;
    }
    wtr.flush().with_context(|| format!("flushing {:?}", path))?;
    Ok(records.len())
}

pub fn read_final<P: AsRef<Path>>(path: P) -> Result<Vec<ReconciledRecord>> {
    let path = path.as_ref();
    let mut rdr = ReaderBuilder::new()
        .delimiter(b';')
        .has_headers(true)
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("opening {:?}", path))?;

    let headers = rdr.headers()?.clone();
    let mut idx = [0usize; 9];
    for (slot, name) in idx.iter_mut().zip(FINAL_HEADERS) {
        *slot = headers
            .iter()
            .position(|h| h.trim() == name)
            .ok_or_else(|| anyhow!("{:?} has no `{}` column", path, name))?;
    }

    let mut records = Vec::new();
    for (n, result) in rdr.records().enumerate() {
        let record = result.with_context(|| format!("{:?} record {}", path, n))?;
        let field = |i: usize| record.get(idx[i]).unwrap_or("").trim().to_string();
        records.push(ReconciledRecord {
            registration_id: field(0),
            year: field(1),
            quarter: field(2),
            value: parse_dot_decimal(&field(3)),
            tax_id: field(4),
            legal_name: field(5),
            state: field(6),
            modality: field(7),
            tax_id_valid: field(8).eq_ignore_ascii_case("true"),
        });
    }
    Ok(records)
}

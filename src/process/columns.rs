//! Canonical column mapping for the statement tables.
//!
//! Header spellings drift between reporting vintages. Each header is reduced to
//! a lower-cased, trimmed key and looked up in [`COLUMN_ALIASES`], an ordered
//! table of exact spellings. Precedence is table order: when two headers in the
//! same file resolve to the same canonical column, the one matching the earlier
//! alias wins and the other keeps its lower-cased name.

use serde::Serialize;
use std::{collections::BTreeMap, fmt};
use tracing::warn;

use super::utils::header_key;

/// Bumped whenever an alias is added, removed or reordered.
pub const ALIAS_TABLE_VERSION: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CanonicalColumn {
    RegistrationId,
    AccountCode,
    Value,
    Description,
}

impl CanonicalColumn {
    pub const ALL: [CanonicalColumn; 4] = [
        CanonicalColumn::RegistrationId,
        CanonicalColumn::AccountCode,
        CanonicalColumn::Value,
        CanonicalColumn::Description,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CanonicalColumn::RegistrationId => "registration_id",
            CanonicalColumn::AccountCode => "account_code",
            CanonicalColumn::Value => "value",
            CanonicalColumn::Description => "description",
        }
    }
}

impl fmt::Display for CanonicalColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single source spelling and the vintage it was seen in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnAlias {
    pub alias: &'static str,
    pub canonical: CanonicalColumn,
    pub vintage: &'static str,
}

const fn alias(alias: &'static str, canonical: CanonicalColumn, vintage: &'static str) -> ColumnAlias {
    ColumnAlias {
        alias,
        canonical,
        vintage,
    }
}

use CanonicalColumn::{AccountCode, Description, RegistrationId, Value};

pub static COLUMN_ALIASES: &[ColumnAlias] = &[
    // canonical names map onto themselves so re-normalising is a no-op
    alias("registration_id", RegistrationId, "canonical"),
    alias("account_code", AccountCode, "canonical"),
    alias("value", Value, "canonical"),
    alias("description", Description, "canonical"),
    // current layout
    alias("reg_ans", RegistrationId, "current"),
    alias("cd_conta_contabil", AccountCode, "current"),
    alias("vl_saldo_final", Value, "current"),
    alias("descricao", Description, "current"),
    // earlier layouts
    alias("registro_ans", RegistrationId, "legacy"),
    alias("registroans", RegistrationId, "legacy"),
    alias("cd_operadora", RegistrationId, "legacy"),
    alias("cd_conta", AccountCode, "legacy"),
    alias("conta_contabil", AccountCode, "legacy"),
    alias("conta", AccountCode, "legacy"),
    alias("vl_saldo_fim", Value, "legacy"),
    alias("saldo_final", Value, "legacy"),
    alias("valor", Value, "legacy"),
    alias("descrição", Description, "legacy"),
    alias("ds_conta", Description, "legacy"),
    alias("descricao_conta", Description, "legacy"),
    alias("desc_conta", Description, "legacy"),
];

/// The canonical `value` column could not be found. Processing continues.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchemaWarning {
    pub source: String,
    pub missing: CanonicalColumn,
    pub headers: Vec<String>,
}

impl fmt::Display for SchemaWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: no `{}` column after normalisation (headers: {})",
            self.source,
            self.missing,
            self.headers.join(", ")
        )
    }
}

/// Header list after alias resolution, plus where each canonical column lives.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedHeaders {
    pub headers: Vec<String>,
    matched: BTreeMap<CanonicalColumn, (usize, ColumnAlias)>,
}

impl NormalizedHeaders {
    pub fn position(&self, column: CanonicalColumn) -> Option<usize> {
        self.matched.get(&column).map(|(idx, _)| *idx)
    }

    /// Alias entry that produced `column`, if any.
    pub fn matched_alias(&self, column: CanonicalColumn) -> Option<&ColumnAlias> {
        self.matched.get(&column).map(|(_, a)| a)
    }

    pub fn missing(&self) -> Vec<CanonicalColumn> {
        CanonicalColumn::ALL
            .into_iter()
            .filter(|c| !self.matched.contains_key(c))
            .collect()
    }
}

/// Resolve `raw` headers against [`COLUMN_ALIASES`].
pub fn normalize_headers(raw: &[String]) -> NormalizedHeaders {
    let keys: Vec<String> = raw.iter().map(|h| header_key(h)).collect();
    let mut headers = keys.clone();
    let mut matched: BTreeMap<CanonicalColumn, (usize, ColumnAlias)> = BTreeMap::new();

    for entry in COLUMN_ALIASES {
        if matched.contains_key(&entry.canonical) {
            continue;
        }
        let taken = |idx: usize| matched.values().any(|(i, _)| *i == idx);
        if let Some(idx) = keys
            .iter()
            .enumerate()
            .position(|(idx, key)| key == entry.alias && !taken(idx))
        {
            headers[idx] = entry.canonical.as_str().to_string();
            matched.insert(entry.canonical, (idx, *entry));
        }
    }

    NormalizedHeaders { headers, matched }
}

/// `Some` when the normalised headers lack a `value` column.
pub fn schema_warning(source: &str, normalized: &NormalizedHeaders) -> Option<SchemaWarning> {
    if normalized.position(CanonicalColumn::Value).is_some() {
        return None;
    }
    let warning = SchemaWarning {
        source: source.to_string(),
        missing: CanonicalColumn::Value,
        headers: normalized.headers.clone(),
    };
    warn!(%warning, "schema warning");
    Some(warning)
}

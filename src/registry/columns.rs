//! Column heuristic for the operator registry.
//!
//! Independent of the statement alias table. Exact aliases are tried first; any
//! field still unresolved goes through ordered substring rules. Each header is
//! bound to the first rule it satisfies, and fields are filled in rule order, so
//! `razao` beats `fantasia` for the legal name regardless of column order.

use std::{collections::BTreeMap, fmt};

use crate::process::utils::{fold_accents, header_key};

/// Bumped whenever an exact alias or substring rule changes.
pub const REGISTRY_RULES_VERSION: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RegistryField {
    RegistrationId,
    TaxId,
    LegalName,
    Modality,
    State,
}

impl RegistryField {
    pub fn as_str(&self) -> &'static str {
        match self {
            RegistryField::RegistrationId => "registration_id",
            RegistryField::TaxId => "tax_id",
            RegistryField::LegalName => "legal_name",
            RegistryField::Modality => "modality",
            RegistryField::State => "state",
        }
    }
}

impl fmt::Display for RegistryField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

static EXACT_ALIASES: &[(&str, RegistryField)] = &[
    ("registration_id", RegistryField::RegistrationId),
    ("tax_id", RegistryField::TaxId),
    ("legal_name", RegistryField::LegalName),
    ("modality", RegistryField::Modality),
    ("state", RegistryField::State),
    ("registro_ans", RegistryField::RegistrationId),
    ("registroans", RegistryField::RegistrationId),
    ("reg_ans", RegistryField::RegistrationId),
    ("cnpj", RegistryField::TaxId),
    ("razao_social", RegistryField::LegalName),
    ("razaosocial", RegistryField::LegalName),
    ("uf", RegistryField::State),
    ("modalidade", RegistryField::Modality),
];

/// A header satisfies the rule when it contains every needle.
#[derive(Debug, Clone, Copy)]
pub struct SubstringRule {
    pub needles: &'static [&'static str],
    pub field: RegistryField,
}

pub static SUBSTRING_RULES: &[SubstringRule] = &[
    SubstringRule {
        needles: &["registro", "ans"],
        field: RegistryField::RegistrationId,
    },
    SubstringRule {
        needles: &["cnpj"],
        field: RegistryField::TaxId,
    },
    SubstringRule {
        needles: &["razao"],
        field: RegistryField::LegalName,
    },
    SubstringRule {
        needles: &["fantasia"],
        field: RegistryField::LegalName,
    },
    SubstringRule {
        needles: &["uf"],
        field: RegistryField::State,
    },
    SubstringRule {
        needles: &["modalidade"],
        field: RegistryField::Modality,
    },
];

/// Where each registry field lives in the header row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegistryColumns {
    positions: BTreeMap<RegistryField, usize>,
}

impl RegistryColumns {
    pub fn position(&self, field: RegistryField) -> Option<usize> {
        self.positions.get(&field).copied()
    }

    pub fn missing(&self) -> Vec<RegistryField> {
        [
            RegistryField::RegistrationId,
            RegistryField::TaxId,
            RegistryField::LegalName,
            RegistryField::Modality,
            RegistryField::State,
        ]
        .into_iter()
        .filter(|f| !self.positions.contains_key(f))
        .collect()
    }
}

pub fn resolve_registry_columns(headers: &[String]) -> RegistryColumns {
    let keys: Vec<String> = headers.iter().map(|h| fold_accents(&header_key(h))).collect();
    let mut positions: BTreeMap<RegistryField, usize> = BTreeMap::new();
    let mut used = vec![false; keys.len()];

    // 1) exact aliases, first header wins per field
    for (idx, key) in keys.iter().enumerate() {
        if let Some((_, field)) = EXACT_ALIASES.iter().find(|(alias, _)| alias == key) {
            if !positions.contains_key(field) {
                positions.insert(*field, idx);
                used[idx] = true;
            }
        }
    }

    // 2) each leftover header picks the first rule it satisfies
    let first_rule: Vec<Option<usize>> = keys
        .iter()
        .enumerate()
        .map(|(idx, key)| {
            if used[idx] {
                return None;
            }
            SUBSTRING_RULES
                .iter()
                .position(|rule| rule.needles.iter().all(|n| key.contains(n)))
        })
        .collect();

    // 3) fill unresolved fields in rule order
    for (rule_idx, rule) in SUBSTRING_RULES.iter().enumerate() {
        if positions.contains_key(&rule.field) {
            continue;
        }
        if let Some(idx) = first_rule.iter().position(|r| *r == Some(rule_idx)) {
            positions.insert(rule.field, idx);
        }
    }

    RegistryColumns { positions }
}

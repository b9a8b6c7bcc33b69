use serde::Serialize;
use std::collections::HashMap;
use tracing::{info, warn};

use super::OperatorRecord;
use crate::process::consolidate::ExpenseRecord;

pub const UNKNOWN_LEGAL_NAME: &str = "DESCONHECIDO";
pub const UNKNOWN_STATE: &str = "IND";
pub const UNKNOWN_MODALITY: &str = "Desconhecida";

/// An expense row with its registry match, or the sentinel operator.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinedRecord {
    pub expense: ExpenseRecord,
    /// Normalised join key; always a plain digit string.
    pub registration_id: String,
    pub operator: OperatorRecord,
    pub matched: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct JoinReport {
    pub expense_rows: usize,
    pub registry_rows: usize,
    /// Expense rows whose key failed numeric coercion. Dropped before the join.
    pub dropped_expense_keys: usize,
    /// Registry rows whose key failed numeric coercion. Dropped before the join.
    pub dropped_registry_keys: usize,
    /// Registry rows sharing a key with an earlier row; the first one is used.
    pub duplicate_registry_keys: usize,
    pub joined_rows: usize,
    pub unmatched_rows: usize,
}

/// Coerce a registration id through a number and back, so "123.0", "0123" and
/// " 123 " all become "123". Negative, fractional or non-numeric keys fail.
pub fn normalize_join_key(raw: &str) -> Option<String> {
    let value: f64 = raw.trim().trim_matches('"').trim().parse().ok()?;
    if !value.is_finite() || value < 0.0 || value.fract() != 0.0 || value > u64::MAX as f64 {
        return None;
    }
    Some((value as u64).to_string())
}

fn sentinel_operator() -> OperatorRecord {
    OperatorRecord {
        registration_id: String::new(),
        tax_id: String::new(),
        legal_name: UNKNOWN_LEGAL_NAME.to_string(),
        modality: UNKNOWN_MODALITY.to_string(),
        state: UNKNOWN_STATE.to_string(),
    }
}

fn fill_blank(field: &mut String, sentinel: &str) {
    if field.trim().is_empty() {
        *field = sentinel.to_string();
    }
}

/// Left-join expenses onto the registry. Every expense row with a valid key
/// appears exactly once in the output.
pub fn join_registry(
    expenses: Vec<ExpenseRecord>,
    registry: &[OperatorRecord],
) -> (Vec<JoinedRecord>, JoinReport) {
    let mut report = JoinReport {
        expense_rows: expenses.len(),
        registry_rows: registry.len(),
        ..JoinReport::default()
    };

    let mut index: HashMap<String, &OperatorRecord> = HashMap::with_capacity(registry.len());
    for op in registry {
        match normalize_join_key(&op.registration_id) {
            Some(key) => {
                if index.contains_key(&key) {
                    report.duplicate_registry_keys += 1;
                } else {
                    index.insert(key, op);
                }
            }
            None => report.dropped_registry_keys += 1,
        }
    }

    let mut joined = Vec::with_capacity(expenses.len());
    for expense in expenses {
        let Some(key) = expense
            .registration_id
            .as_deref()
            .and_then(normalize_join_key)
        else {
            report.dropped_expense_keys += 1;
            continue;
        };

        let (mut operator, matched) = match index.get(&key) {
            Some(op) => (
                OperatorRecord {
                    registration_id: key.clone(),
                    ..(*op).clone()
                },
                true,
            ),
            None => (
                OperatorRecord {
                    registration_id: key.clone(),
                    ..sentinel_operator()
                },
                false,
            ),
        };
        if !matched {
            report.unmatched_rows += 1;
        }
        // a matched registry row may still carry blank identity fields
        fill_blank(&mut operator.legal_name, UNKNOWN_LEGAL_NAME);
        fill_blank(&mut operator.state, UNKNOWN_STATE);
        fill_blank(&mut operator.modality, UNKNOWN_MODALITY);
        joined.push(JoinedRecord {
            expense,
            registration_id: key,
            operator,
            matched,
        });
    }
    report.joined_rows = joined.len();

    if report.dropped_expense_keys > 0 || report.dropped_registry_keys > 0 {
        warn!(
            expense = report.dropped_expense_keys,
            registry = report.dropped_registry_keys,
            "rows dropped for non-numeric registration ids"
        );
    }
    if report.duplicate_registry_keys > 0 {
        warn!(
            duplicates = report.duplicate_registry_keys,
            "duplicate registry keys; first occurrence used"
        );
    }
    if report.unmatched_rows > 0 {
        warn!(
            unmatched = report.unmatched_rows,
            "expense rows without a registry match"
        );
    }
    info!(joined = report.joined_rows, "registry join finished");

    (joined, report)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expense(reg: Option<&str>, value: Option<f64>) -> ExpenseRecord {
        ExpenseRecord {
            registration_id: reg.map(str::to_string),
            description: Some("EVENTOS".into()),
            value,
            year: "2024".into(),
            quarter: "1".into(),
        }
    }

    fn operator(reg: &str, name: &str, uf: &str) -> OperatorRecord {
        OperatorRecord {
            registration_id: reg.into(),
            tax_id: "11444777000161".into(),
            legal_name: name.into(),
            modality: "Medicina de Grupo".into(),
            state: uf.into(),
        }
    }

    #[test]
    fn join_key_normalisation() {
        assert_eq!(normalize_join_key("419761"), Some("419761".into()));
        assert_eq!(normalize_join_key("419761.0"), Some("419761".into()));
        assert_eq!(normalize_join_key("0419761"), Some("419761".into()));
        assert_eq!(normalize_join_key(" \"322\" "), Some("322".into()));
        assert_eq!(normalize_join_key("419761.5"), None);
        assert_eq!(normalize_join_key("-1"), None);
        assert_eq!(normalize_join_key("abc"), None);
        assert_eq!(normalize_join_key(""), None);
    }

    #[test]
    fn left_join_preserves_expense_cardinality() {
        let expenses = vec![
            expense(Some("419761"), Some(100.0)),
            expense(Some("0419761"), Some(200.0)),
            expense(Some("555"), Some(50.0)),
            expense(Some("322.0"), None),
        ];
        // duplicate key in registry must not fan out expense rows
        let registry = vec![
            operator("419761", "A", "SP"),
            operator("419761.0", "A-dup", "SP"),
            operator("322", "B", "RJ"),
            operator("n/a", "broken", "MG"),
        ];

        let (joined, report) = join_registry(expenses.clone(), &registry);
        assert_eq!(joined.len(), expenses.len());
        assert_eq!(report.joined_rows, 4);
        assert_eq!(report.duplicate_registry_keys, 1);
        assert_eq!(report.dropped_registry_keys, 1);
        assert_eq!(report.unmatched_rows, 1);

        assert_eq!(joined[0].operator.legal_name, "A");
        assert_eq!(joined[1].operator.legal_name, "A");
        assert_eq!(joined[1].registration_id, "419761");
        assert_eq!(joined[3].operator.legal_name, "B");
        // missing value survives the join untouched
        assert_eq!(joined[3].expense.value, None);
    }

    #[test]
    fn unmatched_rows_carry_exact_sentinels() {
        let (joined, report) = join_registry(
            vec![expense(Some("1"), Some(1.0)), expense(Some("2"), Some(2.0))],
            &[],
        );
        assert_eq!(report.unmatched_rows, 2);
        for row in &joined {
            assert!(!row.matched);
            assert_eq!(row.operator.legal_name, "DESCONHECIDO");
            assert_eq!(row.operator.state, "IND");
            assert_eq!(row.operator.modality, "Desconhecida");
            assert_eq!(row.operator.tax_id, "");
        }
    }

    #[test]
    fn matched_rows_with_blank_identity_fields_get_sentinels() {
        let blank = OperatorRecord {
            registration_id: "1".into(),
            tax_id: "11444777000161".into(),
            legal_name: "".into(),
            modality: " ".into(),
            state: "".into(),
        };
        let partial = OperatorRecord {
            state: "".into(),
            ..operator("2", "C", "MG")
        };
        let (joined, report) = join_registry(
            vec![expense(Some("1"), Some(1.0)), expense(Some("2"), Some(2.0))],
            &[blank, partial],
        );
        assert_eq!(report.unmatched_rows, 0);

        assert!(joined[0].matched);
        assert_eq!(joined[0].operator.legal_name, "DESCONHECIDO");
        assert_eq!(joined[0].operator.state, "IND");
        assert_eq!(joined[0].operator.modality, "Desconhecida");
        assert_eq!(joined[0].operator.tax_id, "11444777000161");

        assert_eq!(joined[1].operator.legal_name, "C");
        assert_eq!(joined[1].operator.state, "IND");
        assert_eq!(joined[1].operator.modality, "Medicina de Grupo");
    }

    #[test]
    fn rows_with_uncoercible_keys_are_dropped_and_counted() {
        let (joined, report) = join_registry(
            vec![
                expense(None, Some(1.0)),
                expense(Some("x12"), Some(1.0)),
                expense(Some("12"), Some(1.0)),
            ],
            &[operator("12", "C", "MG")],
        );
        assert_eq!(joined.len(), 1);
        assert_eq!(report.dropped_expense_keys, 2);
        assert_eq!(report.expense_rows, 3);
    }
}

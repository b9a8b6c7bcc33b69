use anyhow::{Context, Result};
use csv::WriterBuilder;
use serde::Serialize;
use std::{collections::HashMap, fs, path::Path};

use crate::process::numeric::format_decimal;
use crate::registry::reconciled::ReconciledRecord;

pub const AGGREGATED_HEADERS: [&str; 6] = [
    "RazaoSocial",
    "UF",
    "Despesa_Total",
    "Despesa_Media_Trimestral",
    "Desvio_Padrao",
    "Qtd_Registros",
];

/// Expense statistics for one (legal name, state) group.
///
/// Missing values are left out of every statistic. `total` of an all-missing
/// group is 0; `mean` needs one value and `stddev` (sample, n - 1) needs two.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperatorExpense {
    pub legal_name: String,
    pub state: String,
    pub total: f64,
    pub mean: Option<f64>,
    pub stddev: Option<f64>,
    pub count: usize,
}

fn summarize(legal_name: String, state: String, values: &[f64]) -> OperatorExpense {
    let count = values.len();
    let total: f64 = values.iter().sum();
    let mean = (count > 0).then(|| total / count as f64);
    let stddev = match mean {
        Some(m) if count > 1 => {
            let ss: f64 = values.iter().map(|v| (v - m).powi(2)).sum();
            Some((ss / (count - 1) as f64).sqrt())
        }
        _ => None,
    };
    OperatorExpense {
        legal_name,
        state,
        total,
        mean,
        stddev,
        count,
    }
}

/// Group by (legal name, state) and sort by total, descending. Ties keep the
/// order in which groups were first seen.
pub fn aggregate(records: &[ReconciledRecord]) -> Vec<OperatorExpense> {
    let mut order: Vec<(String, String)> = Vec::new();
    let mut groups: HashMap<(String, String), Vec<f64>> = HashMap::new();

    for r in records {
        let key = (r.legal_name.clone(), r.state.clone());
        let values = groups.entry(key.clone()).or_insert_with(|| {
            order.push(key);
            Vec::new()
        });
        if let Some(v) = r.value {
            values.push(v);
        }
    }

    let mut out: Vec<OperatorExpense> = order
        .into_iter()
        .map(|key| {
            let values = groups.remove(&key).unwrap_or_default();
            summarize(key.0, key.1, &values)
        })
        .collect();
    out.sort_by(|a, b| b.total.total_cmp(&a.total));
    out
}

pub fn write_aggregated<P: AsRef<Path>>(path: P, rows: &[OperatorExpense]) -> Result<usize> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("creating {:?}", parent))?;
    }
    let mut wtr = WriterBuilder::new()
        .delimiter(b';')
        .from_path(path)
        .with_context(|| format!("creating {:?}", path))?;
    wtr.write_record(AGGREGATED_HEADERS)?;
    for row in rows {
        wtr.write_record([
            row.legal_name.as_str(),
            row.state.as_str(),
            format_decimal(Some(row.total)).as_str(),
            format_decimal(row.mean).as_str(),
            format_decimal(row.stddev).as_str(),
            row.count.to_string().as_str(),
        ])?;
    }
    wtr.flush().with_context(|| format!("flushing {:?}", path))?;
    Ok(rows.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use tempfile::tempdir;

    fn record(name: &str, uf: &str, value: Option<f64>) -> ReconciledRecord {
        ReconciledRecord {
            registration_id: "1".into(),
            year: "2024".into(),
            quarter: "1".into(),
            value,
            tax_id: String::new(),
            legal_name: name.into(),
            state: uf.into(),
            modality: String::new(),
            tax_id_valid: false,
        }
    }

    #[test]
    fn groups_and_sorts_by_total() {
        let rows = aggregate(&[
            record("B", "RJ", Some(50.0)),
            record("A", "SP", Some(100.0)),
            record("A", "SP", Some(200.0)),
        ]);
        assert_eq!(rows.len(), 2);

        assert_eq!((rows[0].legal_name.as_str(), rows[0].state.as_str()), ("A", "SP"));
        assert_eq!(rows[0].total, 300.0);
        assert_eq!(rows[0].mean, Some(150.0));
        assert_eq!(rows[0].count, 2);
        // sample standard deviation of {100, 200}
        let sd = rows[0].stddev.expect("stddev for two values");
        assert!((sd - 70.710_678_118_654_76).abs() < 1e-9);

        assert_eq!((rows[1].legal_name.as_str(), rows[1].state.as_str()), ("B", "RJ"));
        assert_eq!(rows[1].total, 50.0);
        assert_eq!(rows[1].mean, Some(50.0));
        assert_eq!(rows[1].stddev, None);
        assert_eq!(rows[1].count, 1);
    }

    #[test]
    fn missing_values_are_excluded_not_zeroed() {
        let rows = aggregate(&[
            record("A", "SP", Some(10.0)),
            record("A", "SP", None),
            record("A", "SP", Some(30.0)),
            record("C", "MG", None),
        ]);
        assert_eq!(rows[0].count, 2);
        assert_eq!(rows[0].mean, Some(20.0));
        assert_eq!(rows[1].legal_name, "C");
        assert_eq!(rows[1].total, 0.0);
        assert_eq!(rows[1].mean, None);
        assert_eq!(rows[1].count, 0);
    }

    #[test]
    fn ties_keep_first_seen_order() {
        let rows = aggregate(&[
            record("Z", "AC", Some(5.0)),
            record("M", "AM", Some(5.0)),
            record("A", "AP", Some(5.0)),
        ]);
        let names: Vec<&str> = rows.iter().map(|r| r.legal_name.as_str()).collect();
        assert_eq!(names, vec!["Z", "M", "A"]);
    }

    #[test]
    fn same_name_in_two_states_are_separate_groups() {
        let rows = aggregate(&[record("A", "SP", Some(1.0)), record("A", "RJ", Some(2.0))]);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].state, "RJ");
    }

    #[test]
    fn writes_aggregated_artifact() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("agg.csv");
        let rows = aggregate(&[
            record("A", "SP", Some(100.0)),
            record("A", "SP", Some(200.0)),
            record("B", "RJ", Some(50.0)),
        ]);
        write_aggregated(&path, &rows)?;
        let text = fs::read_to_string(&path)?;
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines[0],
            "RazaoSocial;UF;Despesa_Total;Despesa_Media_Trimestral;Desvio_Padrao;Qtd_Registros"
        );
        assert!(lines[1].starts_with("A;SP;300;150;70.71"));
        assert!(lines[1].ends_with(";2"));
        assert_eq!(lines[2], "B;RJ;50;50;;1");
        Ok(())
    }
}

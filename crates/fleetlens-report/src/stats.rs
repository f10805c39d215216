//! Summary statistics for numeric result columns.

use fleetlens_cache::ResultSet;
use serde::Serialize;

/// min/max/avg/total over the non-null cells of one numeric column.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnStats {
    pub column: String,
    pub min: f64,
    pub max: f64,
    pub avg: f64,
    pub total: f64,
    /// Non-null cells the statistics were computed from.
    pub count: usize,
}

/// Statistics for every integer or float column, in column order.
/// Columns without a non-null cell are skipped.
#[must_use]
pub fn numeric_column_stats(result: &ResultSet) -> Vec<ColumnStats> {
    result
        .column_types()
        .into_iter()
        .enumerate()
        .filter(|(_, ty)| ty.is_numeric())
        .filter_map(|(i, _)| {
            let values: Vec<f64> = result
                .rows
                .iter()
                .filter_map(|row| row.get(i).and_then(serde_json::Value::as_f64))
                .collect();
            if values.is_empty() {
                return None;
            }
            let total: f64 = values.iter().sum();
            Some(ColumnStats {
                column: result.columns[i].clone(),
                min: values.iter().copied().fold(f64::INFINITY, f64::min),
                max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
                avg: total / values.len() as f64,
                total,
                count: values.len(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    #[test]
    fn stats_cover_numeric_columns_only() {
        let rs = ResultSet::new(
            vec!["device".into(), "trips".into(), "km".into()],
            vec![
                vec![json!("a"), json!(2), json!(1.5)],
                vec![json!("b"), json!(4), Value::Null],
                vec![json!("c"), json!(9), json!(4.5)],
            ],
        );

        let stats = numeric_column_stats(&rs);

        assert_eq!(stats.len(), 2);
        assert_eq!(stats[0].column, "trips");
        assert_eq!(stats[0].min, 2.0);
        assert_eq!(stats[0].max, 9.0);
        assert_eq!(stats[0].total, 15.0);
        assert_eq!(stats[0].avg, 5.0);
        assert_eq!(stats[1].column, "km");
        assert_eq!(stats[1].count, 2);
        assert_eq!(stats[1].avg, 3.0);
    }

    #[test]
    fn empty_result_has_no_stats() {
        let rs = ResultSet::new(vec!["n".into()], vec![]);
        assert!(numeric_column_stats(&rs).is_empty());
    }
}

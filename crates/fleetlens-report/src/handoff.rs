//! Result hand-off: decide whether a result goes inline into the assistant's
//! context or into the cache, and render what the assistant sees.

use fleetlens_cache::{CacheResult, Provenance, ResultSet, TableStore};
use fleetlens_core::config::HandoffConfig;
use tracing::info;

use crate::format::{MAX_COLUMN_WIDTH, format_decimal, format_table, group_thousands};
use crate::stats::numeric_column_stats;

/// Numeric columns listed in a cached-result summary.
const SUMMARY_STATS_COLUMNS: usize = 10;

/// Inline results with more numeric columns than this get no quick stats.
const INLINE_STATS_COLUMNS: usize = 5;

/// Inline results with more columns than this also list every column name.
const INLINE_COLUMN_LIST_THRESHOLD: usize = 10;

/// What the assistant host receives for one result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Handoff {
    /// The result was stored as a table; `summary` describes it.
    Cached { table_name: String, summary: String },
    /// The result was small enough to render in full (or nearly).
    Inline(String),
}

impl Handoff {
    /// Markdown shown to the assistant.
    #[must_use]
    pub fn text(&self) -> &str {
        match self {
            Self::Cached { summary, .. } => summary,
            Self::Inline(text) => text,
        }
    }

    #[must_use]
    pub fn table_name(&self) -> Option<&str> {
        match self {
            Self::Cached { table_name, .. } => Some(table_name),
            Self::Inline(_) => None,
        }
    }
}

/// Caches `result` when it has more than `config.large_result_threshold`
/// rows, otherwise renders it inline.
///
/// # Errors
///
/// Propagates the store's error when caching fails.
pub fn hand_off(
    store: &mut TableStore,
    provenance: &Provenance,
    result: &ResultSet,
    config: &HandoffConfig,
) -> CacheResult<Handoff> {
    if result.row_count() <= config.large_result_threshold {
        return Ok(Handoff::Inline(render_inline(
            result,
            config.inline_preview_rows,
        )));
    }

    let table_name = store.store(provenance, result)?;
    info!(
        table = %table_name,
        rows = result.row_count(),
        threshold = config.large_result_threshold,
        "large result cached"
    );
    let summary = render_cached_summary(&table_name, result, config.sample_rows);
    Ok(Handoff::Cached {
        table_name,
        summary,
    })
}

/// Summary of a result that was stored as `table_name`.
#[must_use]
pub fn render_cached_summary(table_name: &str, result: &ResultSet, sample_rows: usize) -> String {
    let total = group_thousands(result.row_count() as u64);
    let sample = result.head(sample_rows);

    let mut parts = vec![
        "**Large Dataset Cached**".to_string(),
        format!("- Total Rows: {total}"),
        format!("- Columns: {}", result.column_count()),
        format!("- Table Name: `{table_name}`"),
        format!(
            "\n**Sample Data** (first {} of {total} rows):",
            sample.row_count()
        ),
        format!(
            "```\n{}\n```",
            format_table(&sample.columns, &sample.rows, MAX_COLUMN_WIDTH)
        ),
        format!("\n**All Columns ({})**:", result.column_count()),
        result.columns.join(", "),
    ];

    let stats = numeric_column_stats(result);
    if !stats.is_empty() {
        parts.push(format!("\n**Numeric Columns ({})**:", stats.len()));
        for s in stats.iter().take(SUMMARY_STATS_COLUMNS) {
            parts.push(format!(
                "- {}: min={}, max={}, avg={}",
                s.column,
                format_decimal(s.min, 1),
                format_decimal(s.max, 1),
                format_decimal(s.avg, 1)
            ));
        }
    }

    parts.push("\n**Query this data with SQL**:".to_string());
    parts.push(format!(
        "Example: `SELECT * FROM {table_name} ORDER BY 1 DESC LIMIT 50`"
    ));
    parts.join("\n")
}

/// A small result rendered in full, up to `preview_rows` rows.
#[must_use]
pub fn render_inline(result: &ResultSet, preview_rows: usize) -> String {
    if result.is_empty() {
        return "Query completed but returned no rows.".to_string();
    }

    let preview = result.head(preview_rows);
    let table = format_table(&preview.columns, &preview.rows, MAX_COLUMN_WIDTH);
    let hidden = result.row_count() - preview.row_count();

    let mut parts = vec![format!(
        "**Dataset** ({} rows x {} columns)\n```\n{table}{}\n```",
        group_thousands(result.row_count() as u64),
        result.column_count(),
        if hidden > 0 {
            format!("\n\n... and {hidden} more rows")
        } else {
            String::new()
        }
    )];

    if result.column_count() > INLINE_COLUMN_LIST_THRESHOLD {
        parts.push(format!("**All Columns**: {}", result.columns.join(", ")));
    }

    let stats = numeric_column_stats(result);
    if !stats.is_empty() && stats.len() <= INLINE_STATS_COLUMNS {
        let quick = stats
            .iter()
            .map(|s| {
                format!(
                    "{}: Total={}, Avg={}",
                    s.column,
                    format_decimal(s.total, 0),
                    format_decimal(s.avg, 1)
                )
            })
            .collect::<Vec<_>>()
            .join("; ");
        parts.push(format!("**Quick Stats**: {quick}"));
    }

    parts.join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn speeds(n: i64) -> ResultSet {
        ResultSet::new(
            vec!["device".into(), "speed".into()],
            (0..n).map(|i| vec![json!(format!("d{i}")), json!(i)]).collect(),
        )
    }

    #[test]
    fn inline_shows_overflow_note() {
        let text = render_inline(&speeds(8), 5);
        assert!(text.starts_with("**Dataset** (8 rows x 2 columns)"));
        assert!(text.contains("... and 3 more rows"));
        assert!(text.contains("**Quick Stats**: speed: Total=28, Avg=3.5"));
    }

    #[test]
    fn inline_empty_result() {
        assert_eq!(
            render_inline(&speeds(0), 5),
            "Query completed but returned no rows."
        );
    }

    #[test]
    fn summary_lists_columns_and_stats() {
        let text = render_cached_summary("ace_c_m", &speeds(1500), 3);
        assert!(text.contains("- Total Rows: 1,500"));
        assert!(text.contains("- Table Name: `ace_c_m`"));
        assert!(text.contains("(first 3 of 1,500 rows)"));
        assert!(text.contains("device, speed"));
        assert!(text.contains("- speed: min=0.0, max=1,499.0, avg=749.5"));
        assert!(text.contains("SELECT * FROM ace_c_m"));
    }

    #[test]
    fn threshold_decides_between_inline_and_cache() {
        let mut store = TableStore::in_memory(500).unwrap();
        let config = HandoffConfig {
            large_result_threshold: 10,
            ..HandoffConfig::default()
        };

        let small = hand_off(&mut store, &Provenance::new("c", "a"), &speeds(10), &config).unwrap();
        assert!(small.table_name().is_none());
        assert!(!store.table_exists("ace_c_a"));

        let large = hand_off(&mut store, &Provenance::new("c", "b"), &speeds(11), &config).unwrap();
        assert_eq!(large.table_name(), Some("ace_c_b"));
        assert_eq!(store.get_info("ace_c_b").unwrap().row_count, 11);
        assert!(large.text().contains("Large Dataset Cached"));
    }
}

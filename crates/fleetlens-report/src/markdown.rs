//! Markdown renderers for query results, dataset listings, and maintenance
//! summaries, as shown to the assistant.

use fleetlens_cache::{CleanupStats, ConsolidationStats, DatasetListing, QueryOutput};

use crate::format::{format_decimal, format_table, group_thousands, truncate};
use crate::stats::numeric_column_stats;

/// Rows rendered for a query result; the rest are summarized.
pub const MAX_DISPLAY_ROWS: usize = 100;

/// Results with more numeric columns than this get no statistics block.
const MAX_STATS_COLUMNS: usize = 5;

/// Column names shown per dataset in a listing.
const LISTING_COLUMNS: usize = 5;

/// Provenance text is cut to this many characters in a listing.
const LISTING_TEXT_CHARS: usize = 100;

const QUERY_COLUMN_WIDTH: usize = 50;

/// Renders the result of a guarded query against `table_name`.
///
/// `origin_query` is the upstream query that produced the cached table, when
/// known.
#[must_use]
pub fn render_query_output(
    table_name: &str,
    output: &QueryOutput,
    origin_query: Option<&str>,
) -> String {
    let meta = &output.metadata;
    let mut parts = vec![
        "**Query Results**".to_string(),
        format!("- Table: `{table_name}`"),
        format!("- Rows returned: {}", group_thousands(meta.row_count as u64)),
        format!("- Columns: {}", meta.column_count),
    ];

    if output.rows.is_empty() {
        parts.push("\nNo rows matched your query.".to_string());
    } else {
        let shown = output.rows.len().min(MAX_DISPLAY_ROWS);
        parts.push(format!(
            "\n**Results:**\n```\n{}\n```",
            format_table(output.columns(), &output.rows[..shown], QUERY_COLUMN_WIDTH)
        ));
        if output.rows.len() > shown {
            parts.push(format!("\n*Showing {shown} of {} rows*", output.rows.len()));
        }

        let stats = numeric_column_stats(&output.to_result_set());
        if !stats.is_empty() && stats.len() <= MAX_STATS_COLUMNS {
            parts.push("\n**Statistics:**".to_string());
            for s in &stats {
                parts.push(format!(
                    "- {}: min={}, max={}, avg={}, total={}",
                    s.column,
                    format_decimal(s.min, 1),
                    format_decimal(s.max, 1),
                    format_decimal(s.avg, 1),
                    format_decimal(s.total, 1)
                ));
            }
        }
    }

    if let Some(query) = origin_query.filter(|q| !q.trim().is_empty()) {
        parts.push(format!("\n**Original Query:**\n```sql\n{query}\n```"));
    }

    parts.join("\n")
}

/// Renders every cached dataset with its provenance, followed by cache-wide
/// statistics and any cleanup recommendation.
#[must_use]
pub fn render_listing(listing: &DatasetListing) -> String {
    if listing.datasets.is_empty() {
        return "No cached datasets available.\n\n\
                Large results are cached automatically and will appear here."
            .to_string();
    }

    let mut parts = vec![format!(
        "**Cached Datasets** ({} total)\n",
        listing.datasets.len()
    )];

    for ds in &listing.datasets {
        let shown: Vec<&str> = ds
            .columns
            .iter()
            .take(LISTING_COLUMNS)
            .map(String::as_str)
            .collect();
        let more = if ds.columns.len() > LISTING_COLUMNS { ", ..." } else { "" };

        parts.push(format!("**Table: `{}`**", ds.table_name));
        parts.push(format!("- Rows: {}", group_thousands(ds.row_count)));
        parts.push(format!(
            "- Columns: {} ({}{more})",
            ds.column_count,
            shown.join(", ")
        ));
        if !ds.origin_question.is_empty() {
            parts.push(format!(
                "- Original question: {}",
                truncate(&ds.origin_question, LISTING_TEXT_CHARS)
            ));
        }
        if !ds.origin_query.is_empty() {
            parts.push(format!(
                "- Generating query: `{}`",
                truncate(&ds.origin_query, LISTING_TEXT_CHARS)
            ));
        }
        parts.push(format!(
            "- Created: {}",
            ds.created_at.format("%Y-%m-%d %H:%M:%S UTC")
        ));
        parts.push(format!(
            "- Accessed: {} times, last {}",
            ds.access_count,
            ds.last_accessed_at.format("%Y-%m-%d %H:%M:%S UTC")
        ));
        parts.push(format!(
            "- Identifiers: session `{}`, subsession `{}`",
            ds.session_id, ds.subsession_id
        ));
        parts.push(String::new());
    }

    let info = &listing.cache_info;
    parts.push("**Cache Info:**".to_string());
    parts.push(format!(
        "- Size: {} / {} MB",
        info.total_size_mb, info.max_size_mb
    ));
    parts.push(format!(
        "- Oldest access: {} days ago",
        info.oldest_access_age_days
    ));
    if let Some(reason) = &info.cleanup_reason {
        parts.push(format!("- Cleanup recommended: {reason}"));
    }

    parts.join("\n")
}

/// One-paragraph summary of a cleanup run.
#[must_use]
pub fn render_cleanup(stats: &CleanupStats) -> String {
    format!(
        "**Cache Cleanup Complete**\n\
         - Removed datasets: {}\n\
         - Space freed: {} MB\n\
         - Remaining datasets: {}\n\
         - Cache size: {} MB",
        stats.removed_count, stats.removed_size_mb, stats.remaining_datasets, stats.cache_size_mb
    )
}

/// One-paragraph summary of a consolidation run.
#[must_use]
pub fn render_consolidation(stats: &ConsolidationStats) -> String {
    if stats.consolidated_count == 0 {
        return "No datasets were consolidated.".to_string();
    }
    format!(
        "**Consolidation Complete**\n\
         - Consolidated tables created: {}\n\
         - Space saved: {} MB",
        stats.consolidated_count, stats.space_saved_mb
    )
}

//! Read-only query guard.
//!
//! A lexical allow/deny check, not a SQL parser. It runs before every ad-hoc
//! query; [`TableStore::query`](crate::TableStore::query) additionally refuses
//! any prepared statement SQLite does not report as read-only.
//!
//! Keywords inside string literals are rejected too (`WHERE note = 'drop'`).

use once_cell::sync::Lazy;
use regex::Regex;

use crate::{CacheError, CacheResult};

/// Keywords that may not appear anywhere in an ad-hoc query.
pub const FORBIDDEN_KEYWORDS: &[&str] = &[
    "CREATE", "ALTER", "DROP", "INSERT", "UPDATE", "DELETE", "TRUNCATE", "GRANT", "REVOKE",
    "ATTACH", "DETACH", "PRAGMA", "COPY", "IMPORT", "EXPORT", "VACUUM", "REINDEX",
];

static READ_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(SELECT|WITH)\b").expect("read prefix pattern is valid"));

static FORBIDDEN_PATTERN: Lazy<Regex> = Lazy::new(|| {
    let alternation = FORBIDDEN_KEYWORDS.join("|");
    Regex::new(&format!(r"(?i)\b({alternation})\b")).expect("forbidden keyword pattern is valid")
});

/// Fails with [`CacheError::ForbiddenOperation`] unless `sql` is a plain read.
///
/// The query must start with `SELECT` or `WITH` and contain none of
/// [`FORBIDDEN_KEYWORDS`] as a standalone word.
pub fn validate_query(sql: &str) -> CacheResult<()> {
    let trimmed = sql.trim();

    if !READ_PREFIX.is_match(trimmed) {
        return Err(CacheError::ForbiddenOperation {
            reason: "only SELECT queries and CTEs (WITH ... SELECT) are allowed".to_string(),
        });
    }

    if let Some(found) = FORBIDDEN_PATTERN.find(trimmed) {
        return Err(CacheError::ForbiddenOperation {
            reason: format!(
                "forbidden SQL keyword detected: {}",
                found.as_str().to_ascii_uppercase()
            ),
        });
    }

    Ok(())
}

/// Strips surrounding whitespace and trailing semicolons.
#[must_use]
pub fn normalize_query(sql: &str) -> &str {
    sql.trim()
        .trim_end_matches(|c: char| c == ';' || c.is_whitespace())
}

/// Wraps `sql` so that at most `limit` rows come back, whatever `LIMIT` the
/// caller wrote inside it.
///
/// The inner query is placed on its own lines so a trailing `--` comment
/// cannot swallow the closing parenthesis. Limits beyond SQLite's 64-bit
/// range are clamped to `i64::MAX`.
#[must_use]
pub fn enforce_row_limit(sql: &str, limit: usize) -> String {
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);
    format!(
        "SELECT * FROM (\n{}\n) AS capped LIMIT {limit}",
        normalize_query(sql)
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

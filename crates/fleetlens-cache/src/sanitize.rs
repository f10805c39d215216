//! Identifier sanitization and table-name validation.
//!
//! SQLite cannot bind identifiers as parameters, so every table name that is
//! interpolated into SQL text must first pass [`validate_table_name`]. Table
//! names are built only from fragments produced by [`sanitize_identifier`].

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::{CacheError, CacheResult, TABLE_PREFIX};

static TABLE_NAME_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^ace_[A-Za-z0-9_]+$").expect("table name pattern is valid"));

/// Fragment used when a caller-supplied identifier sanitizes to nothing.
const EMPTY_FRAGMENT: &str = "default";

/// Sub-identifier recorded for consolidated tables.
pub const CONSOLIDATED_SUBSESSION: &str = "consolidated";

/// Replaces every character outside `[A-Za-z0-9_]` with `_` and prefixes a
/// leading digit with `_`.
///
/// Total over all inputs; the empty string maps to the empty string.
///
/// ```
/// use fleetlens_cache::sanitize::sanitize_identifier;
///
/// assert_eq!(sanitize_identifier("chat-42.a"), "chat_42_a");
/// assert_eq!(sanitize_identifier("9lives"), "_9lives");
/// assert_eq!(sanitize_identifier(""), "");
/// ```
#[must_use]
pub fn sanitize_identifier(raw: &str) -> String {
    let mut sanitized: String = raw
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();

    if sanitized.starts_with(|c: char| c.is_ascii_digit()) {
        sanitized.insert(0, '_');
    }
    sanitized
}

/// Fails with [`CacheError::InvalidIdentifier`] unless `name` matches
/// `ace_[A-Za-z0-9_]+`.
pub fn validate_table_name(name: &str) -> CacheResult<()> {
    if TABLE_NAME_PATTERN.is_match(name) {
        Ok(())
    } else {
        Err(CacheError::InvalidIdentifier {
            name: name.to_string(),
        })
    }
}

/// Composes `ace_<session>_<subsession>` from raw caller identifiers.
pub fn table_name_for(session_id: &str, subsession_id: &str) -> CacheResult<String> {
    let name = format!(
        "{TABLE_PREFIX}_{}_{}",
        fragment(session_id),
        fragment(subsession_id)
    );
    validate_table_name(&name)?;
    Ok(name)
}

/// Composes `ace_<session>_consolidated_<timestamp>` for a merged table.
pub fn consolidated_table_name(session_id: &str, now: DateTime<Utc>) -> CacheResult<String> {
    let name = format!(
        "{TABLE_PREFIX}_{}_{CONSOLIDATED_SUBSESSION}_{}",
        fragment(session_id),
        now.format("%Y%m%d_%H%M%S_%3f")
    );
    validate_table_name(&name)?;
    Ok(name)
}

/// Quotes a column name for use in DDL. Column names come from the upstream
/// result header and are never validated against the table-name pattern.
#[must_use]
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn fragment(raw: &str) -> String {
    let sanitized = sanitize_identifier(raw);
    if sanitized.is_empty() {
        EMPTY_FRAGMENT.to_string()
    } else {
        sanitized
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

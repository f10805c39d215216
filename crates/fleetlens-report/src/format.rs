//! Plain-text building blocks shared by the renderers: text tables,
//! grouped numbers, and truncation.

use serde_json::Value;
use tabled::builder::Builder;
use tabled::settings::{Alignment, Padding, Style};

/// Widest a table cell may be before it is cut with `...`.
pub const MAX_COLUMN_WIDTH: usize = 40;

const ELLIPSIS: &str = "...";

/// Renders rows as a borderless text table with a header line.
///
/// Columns are left aligned with two spaces between them. Cells wider than
/// `max_width` characters are truncated, and missing trailing cells render
/// as `NULL`.
///
/// ```
/// use fleetlens_report::format::format_table;
/// use serde_json::json;
///
/// let text = format_table(
///     &["device".to_string(), "trips".to_string()],
///     &[vec![json!("b1"), json!(12)]],
///     40,
/// );
/// let lines: Vec<&str> = text.lines().collect();
/// assert_eq!(lines.len(), 2);
/// assert!(lines[0].starts_with("device"));
/// assert_eq!(lines[0].find("trips"), lines[1].find("12"));
/// ```
#[must_use]
pub fn format_table(columns: &[String], rows: &[Vec<Value>], max_width: usize) -> String {
    let mut builder = Builder::new();
    builder.push_record(columns.iter().map(|c| truncate(c, max_width)));
    for row in rows {
        builder.push_record(
            (0..columns.len())
                .map(|i| truncate(&cell_text(row.get(i).unwrap_or(&Value::Null)), max_width)),
        );
    }

    let mut table = builder.build();
    table
        .with(Style::empty())
        .with(Padding::new(0, 2, 0, 0))
        .with(Alignment::left());

    table
        .to_string()
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Display text of one cell. Strings are shown without quotes.
#[must_use]
pub fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Cuts `text` to at most `max_chars` characters, ending in `...` when cut.
#[must_use]
pub fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let keep = max_chars.saturating_sub(ELLIPSIS.len());
    let mut out: String = text.chars().take(keep).collect();
    out.push_str(ELLIPSIS);
    out
}

/// Formats an integer with `,` thousands separators.
///
/// ```
/// use fleetlens_report::format::group_thousands;
///
/// assert_eq!(group_thousands(1234567), "1,234,567");
/// assert_eq!(group_thousands(999), "999");
/// ```
#[must_use]
pub fn group_thousands(n: u64) -> String {
    group_digits(&n.to_string())
}

/// Formats a float with `decimals` fractional digits and `,` separators.
#[must_use]
pub fn format_decimal(value: f64, decimals: usize) -> String {
    if !value.is_finite() {
        return value.to_string();
    }
    let text = format!("{:.*}", decimals, value.abs());
    let (int_part, frac_part) = match text.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (text.as_str(), None),
    };

    let mut out = String::new();
    if value < 0.0 && text.chars().any(|c| c.is_ascii_digit() && c != '0') {
        out.push('-');
    }
    out.push_str(&group_digits(int_part));
    if let Some(frac) = frac_part {
        out.push('.');
        out.push_str(frac);
    }
    out
}

fn group_digits(digits: &str) -> String {
    let len = digits.len();
    let mut out = String::with_capacity(len + len / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (len - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn table_aligns_columns() {
        let text = format_table(
            &["zone".to_string(), "stops".to_string()],
            &[
                vec![json!("north-east"), json!(4)],
                vec![json!("s"), Value::Null],
            ],
            40,
        );
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("zone"));
        assert!(lines[1].starts_with("north-east"));
        assert!(lines[2].starts_with('s'));
        let column = lines[0].find("stops");
        assert_eq!(lines[1].find('4'), column);
        assert_eq!(lines[2].find("NULL"), column);
        assert!(lines.iter().all(|l| l == &l.trim_end()));
    }

    #[test]
    fn table_truncates_wide_cells() {
        let long = "x".repeat(60);
        let text = format_table(&["v".to_string()], &[vec![json!(long)]], 10);
        assert_eq!(text.lines().nth(1).map(str::trim), Some("xxxxxxx..."));
    }

    #[test]
    fn table_pads_short_rows() {
        let text = format_table(&["a".to_string(), "b".to_string()], &[vec![json!(1)]], 40);
        let lines: Vec<&str> = text.lines().collect();
        assert!(lines[1].starts_with('1'));
        assert!(lines[1].ends_with("NULL"));
    }

    #[test]
    fn header_only_table() {
        let text = format_table(&["device".to_string()], &[], 40);
        assert_eq!(text.trim(), "device");
    }

    #[test]
    fn truncate_keeps_short_text() {
        assert_eq!(truncate("abc", 5), "abc");
        assert_eq!(truncate("abcdef", 5), "ab...");
        assert_eq!(truncate("名前名前名前", 5), "名前...");
    }

    #[test]
    fn decimal_grouping() {
        assert_eq!(format_decimal(1234567.891, 1), "1,234,567.9");
        assert_eq!(format_decimal(-1234.5, 1), "-1,234.5");
        assert_eq!(format_decimal(0.04, 1), "0.0");
        assert_eq!(format_decimal(-0.04, 1), "0.0");
        assert_eq!(format_decimal(42.0, 0), "42");
    }
}

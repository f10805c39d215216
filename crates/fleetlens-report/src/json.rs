//! JSON output for machine consumers of listings and maintenance stats.
//!
//! Output is pretty-printed and deterministic: struct fields serialize in
//! declaration order and `dtypes` maps are `BTreeMap`s.

use fleetlens_core::CoreResult;
use serde::Serialize;

/// Serializes any report value (a [`DatasetListing`](fleetlens_cache::DatasetListing),
/// [`CleanupStats`](fleetlens_cache::CleanupStats), ...) as pretty JSON.
///
/// # Errors
///
/// Returns [`CoreError::Serialization`](fleetlens_core::CoreError::Serialization)
/// if the value cannot be represented as JSON.
pub fn to_json<T: Serialize + ?Sized>(value: &T) -> CoreResult<String> {
    Ok(serde_json::to_string_pretty(value)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetlens_cache::{CleanupStats, ConsolidationStats};

    #[test]
    fn cleanup_stats_field_order_is_stable() {
        let json = to_json(&CleanupStats {
            removed_count: 1,
            removed_size_bytes: 2048,
            removed_size_mb: 0,
            remaining_datasets: 2,
            cache_size_mb: 7,
        })
        .unwrap();

        let removed = json.find("removed_count").unwrap();
        let remaining = json.find("remaining_datasets").unwrap();
        assert!(removed < remaining);
        assert!(json.contains("\"cache_size_mb\": 7"));
    }

    #[test]
    fn output_is_deterministic() {
        let stats = ConsolidationStats {
            consolidated_count: 1,
            space_saved_mb: 4,
        };
        assert_eq!(to_json(&stats).unwrap(), to_json(&stats).unwrap());
        let back: serde_json::Value = serde_json::from_str(&to_json(&stats).unwrap()).unwrap();
        assert_eq!(back["space_saved_mb"], 4);
    }
}

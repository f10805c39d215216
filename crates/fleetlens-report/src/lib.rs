//! Fleetlens Report -- what the assistant host shows for cached results.
//!
//! [`handoff`] decides whether a fresh result is rendered inline or cached
//! and summarized. [`markdown`] renders query results, dataset listings, and
//! maintenance summaries. [`json`] serializes the same values for machines.

pub mod format;
pub mod handoff;
pub mod json;
pub mod markdown;
pub mod stats;

pub use handoff::{Handoff, hand_off, render_cached_summary, render_inline};
pub use json::to_json;
pub use markdown::{render_cleanup, render_consolidation, render_listing, render_query_output};
pub use stats::{ColumnStats, numeric_column_stats};

//! End-to-end flow as an assistant host drives it: hand off a large result,
//! query the cached table, list datasets, run maintenance, and render each
//! step.

use chrono::{Duration, Utc};
use fleetlens_cache::{CleanupPolicy, Provenance, ResultSet, TableStore};
use fleetlens_core::config::{CacheConfig, HandoffConfig};
use fleetlens_report::{
    Handoff, hand_off, render_cleanup, render_consolidation, render_listing, render_query_output,
    to_json,
};
use serde_json::json;

fn idle_report(rows: i64) -> ResultSet {
    ResultSet::new(
        vec!["device".into(), "idle_minutes".into(), "fuel_l".into()],
        (0..rows)
            .map(|i| vec![json!(format!("truck-{}", i % 25)), json!(i % 90), json!(i as f64 / 4.0)])
            .collect(),
    )
}

fn open_store(dir: &std::path::Path) -> TableStore {
    TableStore::open(&CacheConfig {
        path: Some(dir.join("cache.sqlite3").to_string_lossy().into_owned()),
        ..CacheConfig::default()
    })
    .unwrap()
}

#[test]
fn large_result_is_cached_then_queried() {
    let tmp = tempfile::tempdir().unwrap();
    let mut store = open_store(tmp.path());
    let provenance = Provenance::new("chat-42", "turn-3")
        .with_question("Which trucks idled the most last week?")
        .with_query("SELECT device, idle_minutes, fuel_l FROM idle_log");

    let handoff = hand_off(
        &mut store,
        &provenance,
        &idle_report(600),
        &HandoffConfig::default(),
    )
    .unwrap();

    let Handoff::Cached { table_name, summary } = handoff else {
        panic!("600 rows must exceed the default threshold");
    };
    assert_eq!(table_name, "ace_chat_42_turn_3");
    assert!(summary.contains("- Total Rows: 600"));
    assert!(summary.contains("(first 20 of 600 rows)"));

    let output = store
        .query(
            &format!(
                "SELECT device, SUM(idle_minutes) AS idle FROM {table_name} \
                 GROUP BY device ORDER BY idle DESC"
            ),
            10,
        )
        .unwrap();
    assert_eq!(output.rows.len(), 10);

    let origin = store.get_info(&table_name).map(|t| t.origin_query.clone());
    let text = render_query_output(&table_name, &output, origin.as_deref());
    assert!(text.contains(&format!("- Table: `{table_name}`")));
    assert!(text.contains("- Rows returned: 10"));
    assert!(text.contains("SELECT device, idle_minutes, fuel_l FROM idle_log"));
    assert_eq!(store.get_info(&table_name).unwrap().access_count, 1);
}

#[test]
fn small_result_stays_inline() {
    let mut store = TableStore::in_memory(500).unwrap();
    let handoff = hand_off(
        &mut store,
        &Provenance::new("chat", "turn"),
        &idle_report(12),
        &HandoffConfig::default(),
    )
    .unwrap();

    assert!(matches!(handoff, Handoff::Inline(_)));
    assert!(handoff.text().contains("(12 rows x 3 columns)"));
    assert!(store.list().datasets.is_empty());
}

#[test]
fn listing_renders_provenance_and_recommendation() {
    let mut store = TableStore::in_memory(500).unwrap();
    let t0 = Utc::now() - Duration::days(30);
    let long_question = "q".repeat(150);
    store
        .store_at(
            &Provenance::new("chat", "turn").with_question(long_question.clone()),
            &idle_report(5),
            t0,
        )
        .unwrap();

    let listing = store.list();
    let text = render_listing(&listing);

    assert!(text.contains("**Cached Datasets** (1 total)"));
    assert!(text.contains("- Columns: 3 (device, idle_minutes, fuel_l)"));
    assert!(text.contains(&format!("- Original question: {}...", "q".repeat(97))));
    assert!(!text.contains(&long_question));
    assert!(text.contains("session `chat`, subsession `turn`"));
    assert!(text.contains("Cleanup recommended: Old datasets detected (oldest: 30 days)"));

    let json = to_json(&listing).unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed["cache_info"]["total_datasets"], 1);
    assert_eq!(parsed["datasets"][0]["dtypes"]["fuel_l"], "float");
}

#[test]
fn maintenance_summaries_render() {
    let mut store = TableStore::in_memory(500).unwrap();
    let t0 = Utc::now();
    for turn in ["a", "b", "c"] {
        store
            .store_at(&Provenance::new("chat", turn), &idle_report(4), t0)
            .unwrap();
    }

    let merged = store.consolidate_at(t0, Some("chat"), 5).unwrap();
    assert!(render_consolidation(&merged).contains("Consolidated tables created: 1"));

    let cleaned = store
        .cleanup_at(t0 + Duration::days(15), &CleanupPolicy::default())
        .unwrap();
    let text = render_cleanup(&cleaned);
    assert!(text.contains("- Removed datasets: 1"));
    assert!(text.contains("- Remaining datasets: 0"));
}

#[test]
fn empty_listing_message() {
    let store = TableStore::in_memory(500).unwrap();
    assert!(render_listing(&store.list()).starts_with("No cached datasets available."));
}

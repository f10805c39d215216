//! Durable metadata ledger: one row per cached table.
//!
//! The ledger lives in the same SQLite file as the cached tables, in
//! `_cache_metadata`. `columns` and `dtypes` are stored as JSON text so they
//! round-trip exactly. On load, rows whose physical table is gone are deleted,
//! and prefixed tables without a row are dropped, so a row exists if and only
//! if its table does.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::sanitize::validate_table_name;
use crate::{CacheError, CacheResult};

/// Name of the ledger table. Never matches the cached-table pattern.
pub const METADATA_TABLE: &str = "_cache_metadata";

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS _cache_metadata (
    table_name TEXT PRIMARY KEY,
    session_id TEXT NOT NULL,
    subsession_id TEXT NOT NULL,
    question TEXT NOT NULL DEFAULT '',
    generating_query TEXT NOT NULL DEFAULT '',
    created_at INTEGER NOT NULL,
    last_accessed_at INTEGER NOT NULL,
    access_count INTEGER NOT NULL DEFAULT 0,
    row_count INTEGER NOT NULL,
    column_count INTEGER NOT NULL,
    columns TEXT NOT NULL DEFAULT '[]',
    dtypes TEXT NOT NULL DEFAULT '{}',
    size_bytes INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_cache_last_accessed ON _cache_metadata(last_accessed_at);
CREATE INDEX IF NOT EXISTS idx_cache_access_count ON _cache_metadata(access_count);
CREATE INDEX IF NOT EXISTS idx_cache_session ON _cache_metadata(session_id);
";

const SELECT_COLUMNS: &str = "table_name, session_id, subsession_id, question, generating_query,
    created_at, last_accessed_at, access_count, row_count, column_count, columns, dtypes,
    size_bytes";

// ---------------------------------------------------------------------------
// CachedTable
// ---------------------------------------------------------------------------

/// Metadata for one cached table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedTable {
    pub table_name: String,
    /// Caller-supplied conversation identifier, unsanitized.
    pub session_id: String,
    /// Caller-supplied exchange identifier, unsanitized.
    pub subsession_id: String,
    /// Natural-language question that produced the data. May be empty.
    pub origin_question: String,
    /// Query that generated the data upstream. May be empty.
    pub origin_query: String,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    pub access_count: u64,
    pub row_count: u64,
    pub column_count: u64,
    /// Column names in source order.
    pub columns: Vec<String>,
    /// Column name to type name. Informational only.
    pub dtypes: BTreeMap<String, String>,
    pub size_bytes: u64,
}

impl CachedTable {
    /// Whole days since the table was last read.
    #[must_use]
    pub fn idle_days(&self, now: DateTime<Utc>) -> i64 {
        (now - self.last_accessed_at).num_days().max(0)
    }

    /// Records one successful read at `now`. The timestamp never moves backwards.
    pub(crate) fn record_access(&mut self, now: DateTime<Utc>) {
        self.access_count += 1;
        if now > self.last_accessed_at {
            self.last_accessed_at = now;
        }
    }
}

// ---------------------------------------------------------------------------
// MetadataLedger
// ---------------------------------------------------------------------------

/// Ledger operations over a borrowed connection.
pub struct MetadataLedger<'c> {
    conn: &'c Connection,
}

impl<'c> MetadataLedger<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    /// Creates the ledger table and its indexes.
    pub fn init_schema(&self) -> CacheResult<()> {
        self.conn
            .execute_batch(SCHEMA_SQL)
            .map_err(|e| CacheError::Database(format!("init ledger: {e}")))?;
        debug!("metadata ledger and indexes initialized");
        Ok(())
    }

    /// Inserts or replaces the row for `entry.table_name`.
    pub fn upsert(&self, entry: &CachedTable) -> CacheResult<()> {
        let columns = serde_json::to_string(&entry.columns)
            .map_err(|e| CacheError::Serialization(format!("columns: {e}")))?;
        let dtypes = serde_json::to_string(&entry.dtypes)
            .map_err(|e| CacheError::Serialization(format!("dtypes: {e}")))?;

        self.conn
            .execute(
                "INSERT OR REPLACE INTO _cache_metadata
                 (table_name, session_id, subsession_id, question, generating_query,
                  created_at, last_accessed_at, access_count, row_count, column_count,
                  columns, dtypes, size_bytes)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                params![
                    entry.table_name,
                    entry.session_id,
                    entry.subsession_id,
                    entry.origin_question,
                    entry.origin_query,
                    entry.created_at.timestamp_millis(),
                    entry.last_accessed_at.timestamp_millis(),
                    to_i64(entry.access_count),
                    to_i64(entry.row_count),
                    to_i64(entry.column_count),
                    columns,
                    dtypes,
                    to_i64(entry.size_bytes),
                ],
            )
            .map_err(|e| CacheError::Database(format!("upsert {}: {e}", entry.table_name)))?;
        Ok(())
    }

    /// Deletes the row for `table_name`, if any.
    pub fn delete(&self, table_name: &str) -> CacheResult<()> {
        self.conn
            .execute(
                "DELETE FROM _cache_metadata WHERE table_name = ?1",
                params![table_name],
            )
            .map_err(|e| CacheError::Database(format!("delete {table_name}: {e}")))?;
        Ok(())
    }

    /// Bumps access statistics for one read at `now`.
    pub fn record_access(&self, table_name: &str, now: DateTime<Utc>) -> CacheResult<()> {
        self.conn
            .execute(
                "UPDATE _cache_metadata
                 SET last_accessed_at = MAX(last_accessed_at, ?2),
                     access_count = access_count + 1
                 WHERE table_name = ?1",
                params![table_name, now.timestamp_millis()],
            )
            .map_err(|e| CacheError::Database(format!("record access {table_name}: {e}")))?;
        Ok(())
    }

    /// Reads one row.
    pub fn get(&self, table_name: &str) -> CacheResult<Option<CachedTable>> {
        self.conn
            .query_row(
                &format!("SELECT {SELECT_COLUMNS} FROM _cache_metadata WHERE table_name = ?1"),
                params![table_name],
                row_to_entry,
            )
            .optional()
            .map_err(|e| CacheError::Database(format!("get {table_name}: {e}")))
    }

    /// Reads every row without reconciliation.
    pub fn entries(&self) -> CacheResult<Vec<CachedTable>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {SELECT_COLUMNS} FROM _cache_metadata ORDER BY created_at, table_name"
            ))
            .map_err(|e| CacheError::Database(format!("list ledger: {e}")))?;

        let rows = stmt
            .query_map([], row_to_entry)
            .map_err(|e| CacheError::Database(format!("list ledger: {e}")))?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row.map_err(|e| CacheError::Database(format!("read ledger row: {e}")))?);
        }
        Ok(entries)
    }

    /// Reads every row and reconciles the ledger with the catalog.
    ///
    /// Rows without a physical table are deleted. Prefixed tables without a
    /// row cannot be tracked or evicted and are dropped (best-effort).
    pub fn load_reconciled(&self) -> CacheResult<Vec<CachedTable>> {
        let mut live = Vec::new();

        for entry in self.entries()? {
            if validate_table_name(&entry.table_name).is_ok()
                && self.physical_table_exists(&entry.table_name)?
            {
                live.push(entry);
            } else {
                self.delete(&entry.table_name)?;
                info!(table = %entry.table_name, "removed orphaned metadata row");
            }
        }

        for table_name in self.untracked_tables()? {
            match self
                .conn
                .execute_batch(&format!("DROP TABLE IF EXISTS {table_name}"))
            {
                Ok(()) => info!(table = %table_name, "dropped untracked cache table"),
                Err(e) => warn!(table = %table_name, error = %e, "failed to drop untracked table"),
            }
        }

        Ok(live)
    }

    /// Sum of `size_bytes` over all rows.
    pub fn total_size_bytes(&self) -> CacheResult<u64> {
        self.conn
            .query_row(
                "SELECT COALESCE(SUM(size_bytes), 0) FROM _cache_metadata",
                [],
                |row| row.get::<_, i64>(0),
            )
            .map(to_u64)
            .map_err(|e| CacheError::Database(format!("total size: {e}")))
    }

    /// Checks the catalog for a physical table.
    pub fn physical_table_exists(&self, table_name: &str) -> CacheResult<bool> {
        self.conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                params![table_name],
                |row| row.get::<_, i64>(0),
            )
            .map(|n| n > 0)
            .map_err(|e| CacheError::Database(format!("catalog lookup {table_name}: {e}")))
    }

    /// Prefixed tables in the catalog that have no ledger row. Only names that
    /// pass the table-name pattern are returned.
    fn untracked_tables(&self) -> CacheResult<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT name FROM sqlite_master
                 WHERE type = 'table' AND name LIKE 'ace\\_%' ESCAPE '\\'
                   AND name NOT IN (SELECT table_name FROM _cache_metadata)",
            )
            .map_err(|e| CacheError::Database(format!("list untracked tables: {e}")))?;

        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|e| CacheError::Database(format!("list untracked tables: {e}")))?
            .filter_map(Result::ok)
            .filter(|name| validate_table_name(name).is_ok())
            .collect();
        Ok(names)
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

fn row_to_entry(row: &Row<'_>) -> rusqlite::Result<CachedTable> {
    let table_name: String = row.get(0)?;
    let columns_json: String = row.get(10)?;
    let dtypes_json: String = row.get(11)?;

    let columns = serde_json::from_str(&columns_json).unwrap_or_else(|e| {
        warn!(table = %table_name, error = %e, "unreadable columns JSON in ledger");
        Vec::new()
    });
    let dtypes = serde_json::from_str(&dtypes_json).unwrap_or_else(|e| {
        warn!(table = %table_name, error = %e, "unreadable dtypes JSON in ledger");
        BTreeMap::new()
    });

    Ok(CachedTable {
        table_name,
        session_id: row.get(1)?,
        subsession_id: row.get(2)?,
        origin_question: row.get(3)?,
        origin_query: row.get(4)?,
        created_at: from_millis(row.get(5)?),
        last_accessed_at: from_millis(row.get(6)?),
        access_count: to_u64(row.get(7)?),
        row_count: to_u64(row.get(8)?),
        column_count: to_u64(row.get(9)?),
        columns,
        dtypes,
        size_bytes: to_u64(row.get(12)?),
    })
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

fn to_i64(n: u64) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

fn to_u64(n: i64) -> u64 {
    u64::try_from(n).unwrap_or(0)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn ledger_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        MetadataLedger::new(&conn).init_schema().unwrap();
        conn
    }

    fn entry(name: &str, now: DateTime<Utc>) -> CachedTable {
        CachedTable {
            table_name: name.to_string(),
            session_id: "chat-1".to_string(),
            subsession_id: "group-1".to_string(),
            origin_question: "Which vehicles idled most?".to_string(),
            origin_query: "SELECT * FROM trips".to_string(),
            created_at: now,
            last_accessed_at: now,
            access_count: 0,
            row_count: 2,
            column_count: 2,
            columns: vec!["zeta".to_string(), "alpha".to_string()],
            dtypes: BTreeMap::from([
                ("zeta".to_string(), "integer".to_string()),
                ("alpha".to_string(), "text".to_string()),
            ]),
            size_bytes: 4096,
        }
    }

    fn now_ms() -> DateTime<Utc> {
        from_millis(Utc::now().timestamp_millis())
    }

    #[test]
    fn upsert_and_get_roundtrip() {
        let conn = ledger_conn();
        let ledger = MetadataLedger::new(&conn);
        let e = entry("ace_chat_1_group_1", now_ms());

        ledger.upsert(&e).unwrap();
        let back = ledger.get("ace_chat_1_group_1").unwrap().unwrap();

        assert_eq!(back, e);
        // Source order survives, not alphabetical order.
        assert_eq!(back.columns, vec!["zeta", "alpha"]);
    }

    #[test]
    fn ledger_table_is_never_a_cached_table() {
        assert!(validate_table_name(METADATA_TABLE).is_err());
    }

    #[test]
    fn get_missing_returns_none() {
        let conn = ledger_conn();
        assert!(MetadataLedger::new(&conn).get("ace_nope").unwrap().is_none());
    }

    #[test]
    fn record_access_never_moves_backwards() {
        let conn = ledger_conn();
        let ledger = MetadataLedger::new(&conn);
        let now = now_ms();
        ledger.upsert(&entry("ace_t", now)).unwrap();

        ledger.record_access("ace_t", now + Duration::hours(1)).unwrap();
        ledger.record_access("ace_t", now - Duration::hours(5)).unwrap();

        let back = ledger.get("ace_t").unwrap().unwrap();
        assert_eq!(back.access_count, 2);
        assert_eq!(back.last_accessed_at, now + Duration::hours(1));
    }

    #[test]
    fn total_size_sums_rows() {
        let conn = ledger_conn();
        let ledger = MetadataLedger::new(&conn);
        assert_eq!(ledger.total_size_bytes().unwrap(), 0);

        let now = now_ms();
        ledger.upsert(&entry("ace_a", now)).unwrap();
        ledger.upsert(&entry("ace_b", now)).unwrap();
        assert_eq!(ledger.total_size_bytes().unwrap(), 8192);
    }

    #[test]
    fn reconcile_removes_rows_without_tables() {
        let conn = ledger_conn();
        let ledger = MetadataLedger::new(&conn);
        let now = now_ms();
        conn.execute_batch("CREATE TABLE ace_live (x INTEGER)").unwrap();
        ledger.upsert(&entry("ace_live", now)).unwrap();
        ledger.upsert(&entry("ace_gone", now)).unwrap();

        let live = ledger.load_reconciled().unwrap();

        assert_eq!(live.len(), 1);
        assert_eq!(live[0].table_name, "ace_live");
        assert!(ledger.get("ace_gone").unwrap().is_none());
    }

    #[test]
    fn reconcile_drops_untracked_prefixed_tables() {
        let conn = ledger_conn();
        let ledger = MetadataLedger::new(&conn);
        conn.execute_batch("CREATE TABLE ace_stray (x INTEGER); CREATE TABLE other (x INTEGER)")
            .unwrap();

        ledger.load_reconciled().unwrap();

        assert!(!ledger.physical_table_exists("ace_stray").unwrap());
        assert!(ledger.physical_table_exists("other").unwrap());
    }

    #[test]
    fn unreadable_json_falls_back_to_empty() {
        let conn = ledger_conn();
        let ledger = MetadataLedger::new(&conn);
        ledger.upsert(&entry("ace_t", now_ms())).unwrap();
        conn.execute(
            "UPDATE _cache_metadata SET columns = 'not json', dtypes = '{oops'",
            [],
        )
        .unwrap();

        let back = ledger.get("ace_t").unwrap().unwrap();
        assert!(back.columns.is_empty());
        assert!(back.dtypes.is_empty());
    }
}

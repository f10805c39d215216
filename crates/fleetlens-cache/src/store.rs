//! SQLite-backed table store.
//!
//! [`TableStore`] owns the database connection, the physical cached tables,
//! and an in-memory copy of the metadata ledger. The copy is rebuilt from the
//! ledger on open and updated after every committed mutation; the ledger stays
//! the source of truth.
//!
//! Every method that mutates state takes `&mut self`. A host that dispatches
//! concurrent tool calls must put the store behind a `Mutex`.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use fleetlens_core::config::CacheConfig;
use rusqlite::{Connection, params_from_iter};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::dataset::{QueryMetadata, QueryOutput, ResultSet, from_sql_ref_declared, to_sql_value};
use crate::guard::{enforce_row_limit, normalize_query, validate_query};
use crate::ledger::{CachedTable, MetadataLedger};
use crate::sanitize::{quote_identifier, table_name_for, validate_table_name};
use crate::{CacheError, CacheResult};

/// Bytes per cell assumed when the engine cannot report a table's size.
pub const FALLBACK_BYTES_PER_CELL: u64 = 50;

/// Cache size above which `list()` recommends a cleanup, in percent of the cap.
const SIZE_WARNING_PERCENT: u64 = 80;

/// Idle age above which `list()` recommends a cleanup.
const STALE_AFTER_DAYS: i64 = 14;

pub(crate) const BYTES_PER_MB: u64 = 1024 * 1024;

// ---------------------------------------------------------------------------
// Provenance
// ---------------------------------------------------------------------------

/// Where a result came from: the caller's correlation identifiers plus the
/// question and query that produced it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    pub session_id: String,
    pub subsession_id: String,
    pub question: String,
    pub generating_query: String,
}

impl Provenance {
    pub fn new(session_id: impl Into<String>, subsession_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            subsession_id: subsession_id.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_question(mut self, question: impl Into<String>) -> Self {
        self.question = question.into();
        self
    }

    #[must_use]
    pub fn with_query(mut self, generating_query: impl Into<String>) -> Self {
        self.generating_query = generating_query.into();
        self
    }
}

// ---------------------------------------------------------------------------
// Listing
// ---------------------------------------------------------------------------

/// Cache-wide statistics returned with a listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheInfo {
    pub total_datasets: usize,
    pub total_size_bytes: u64,
    /// Whole MiB, rounded down.
    pub total_size_mb: u64,
    pub max_size_mb: u64,
    /// Idle days of the least recently accessed table; 0 for an empty cache.
    pub oldest_access_age_days: i64,
    pub cleanup_recommended: bool,
    pub cleanup_reason: Option<String>,
}

/// Every cached table plus cache-wide statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetListing {
    pub datasets: Vec<CachedTable>,
    pub cache_info: CacheInfo,
}

// ---------------------------------------------------------------------------
// TableStore
// ---------------------------------------------------------------------------

/// Owner of the cached tables and their metadata.
pub struct TableStore {
    pub(crate) conn: Connection,
    pub(crate) tables: BTreeMap<String, CachedTable>,
    max_size_mb: u64,
    default_query_limit: usize,
}

impl TableStore {
    /// Opens (or creates) the database at the configured storage path and
    /// reconciles the metadata ledger against the catalog.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::PathValidation`] if the path contains a `..`
    /// component or, when relative, resolves outside the working directory.
    pub fn open(config: &CacheConfig) -> CacheResult<Self> {
        let path = validate_storage_path(config.storage_path())?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                CacheError::Io(format!("cannot create '{}': {e}", parent.display()))
            })?;
        }

        let conn = Connection::open(&path).map_err(|e| {
            CacheError::Database(format!("cannot open '{}': {e}", path.display()))
        })?;

        let store = Self::with_connection(conn, config.max_size_mb)?
            .with_default_query_limit(config.default_query_limit);
        info!(
            path = %path.display(),
            datasets = store.tables.len(),
            max_size_mb = store.max_size_mb,
            default_query_limit = store.default_query_limit,
            "table store opened"
        );
        Ok(store)
    }

    /// Creates a store backed by an in-memory database (useful for testing).
    pub fn in_memory(max_size_mb: u64) -> CacheResult<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| CacheError::Database(format!("cannot open in-memory store: {e}")))?;
        Self::with_connection(conn, max_size_mb)
    }

    fn with_connection(conn: Connection, max_size_mb: u64) -> CacheResult<Self> {
        let ledger = MetadataLedger::new(&conn);
        ledger.init_schema()?;
        let tables = ledger
            .load_reconciled()?
            .into_iter()
            .map(|entry| (entry.table_name.clone(), entry))
            .collect();

        Ok(Self {
            conn,
            tables,
            max_size_mb,
            default_query_limit: CacheConfig::default().default_query_limit,
        })
    }

    /// Replaces the row cap used by [`query_default`](Self::query_default).
    #[must_use]
    pub fn with_default_query_limit(mut self, limit: usize) -> Self {
        self.default_query_limit = limit;
        self
    }

    pub(crate) fn ledger(&self) -> MetadataLedger<'_> {
        MetadataLedger::new(&self.conn)
    }

    /// Configured size cap in MiB.
    #[must_use]
    pub fn max_size_mb(&self) -> u64 {
        self.max_size_mb
    }

    /// Row cap applied when the caller gives none.
    #[must_use]
    pub fn default_query_limit(&self) -> usize {
        self.default_query_limit
    }

    // -- store --------------------------------------------------------------

    /// Persists `result` as a table named after the provenance identifiers,
    /// replacing any table with the same name. Returns the table name.
    pub fn store(&mut self, provenance: &Provenance, result: &ResultSet) -> CacheResult<String> {
        self.store_at(provenance, result, Utc::now())
    }

    /// [`store`](Self::store) with an explicit creation time.
    pub fn store_at(
        &mut self,
        provenance: &Provenance,
        result: &ResultSet,
        now: DateTime<Utc>,
    ) -> CacheResult<String> {
        result.validate()?;
        let table_name = table_name_for(&provenance.session_id, &provenance.subsession_id)?;

        let types = result.column_types();
        let column_defs = result
            .columns
            .iter()
            .zip(&types)
            .map(|(name, ty)| format!("{} {}", quote_identifier(name), ty.sql_type()))
            .collect::<Vec<_>>()
            .join(", ");
        let placeholders = vec!["?"; result.column_count()].join(", ");

        let tx = self
            .conn
            .transaction()
            .map_err(|e| CacheError::Database(format!("begin store: {e}")))?;

        tx.execute_batch(&format!(
            "DROP TABLE IF EXISTS {table_name}; CREATE TABLE {table_name} ({column_defs});"
        ))
        .map_err(|e| CacheError::Database(format!("create {table_name}: {e}")))?;

        {
            let mut insert = tx
                .prepare(&format!("INSERT INTO {table_name} VALUES ({placeholders})"))
                .map_err(|e| CacheError::Database(format!("prepare insert: {e}")))?;
            for row in &result.rows {
                insert
                    .execute(params_from_iter(row.iter().map(to_sql_value)))
                    .map_err(|e| CacheError::Database(format!("insert into {table_name}: {e}")))?;
            }
        }

        let row_count = result.row_count() as u64;
        let column_count = result.column_count() as u64;
        let size_bytes = estimate_table_size(&tx, &table_name, row_count, column_count);

        let entry = CachedTable {
            table_name: table_name.clone(),
            session_id: provenance.session_id.clone(),
            subsession_id: provenance.subsession_id.clone(),
            origin_question: provenance.question.clone(),
            origin_query: provenance.generating_query.clone(),
            created_at: now,
            last_accessed_at: now,
            access_count: 0,
            row_count,
            column_count,
            columns: result.columns.clone(),
            dtypes: result.dtypes(),
            size_bytes,
        };
        MetadataLedger::new(&tx).upsert(&entry)?;

        tx.commit()
            .map_err(|e| CacheError::Database(format!("commit store: {e}")))?;
        self.tables.insert(table_name.clone(), entry);

        info!(
            table = %table_name,
            rows = row_count,
            columns = column_count,
            size_bytes,
            "stored dataset"
        );
        Ok(table_name)
    }

    // -- query --------------------------------------------------------------

    /// Runs a read-only query, returning at most `limit` rows whatever
    /// `LIMIT` the query itself carries.
    ///
    /// Every known table whose name appears in `sql` has its access
    /// statistics bumped. The check is a substring match, so a table whose
    /// name is contained in another identifier is counted too.
    ///
    /// # Errors
    ///
    /// [`CacheError::ForbiddenOperation`] if the query is not a pure read,
    /// [`CacheError::Query`] with the engine's message if SQLite rejects it.
    pub fn query(&mut self, sql: &str, limit: usize) -> CacheResult<QueryOutput> {
        self.query_at(sql, limit, Utc::now())
    }

    /// [`query`](Self::query) capped at the configured
    /// `cache.default_query_limit`.
    pub fn query_default(&mut self, sql: &str) -> CacheResult<QueryOutput> {
        self.query_at(sql, self.default_query_limit, Utc::now())
    }

    /// [`query`](Self::query) with an explicit access time.
    pub fn query_at(
        &mut self,
        sql: &str,
        limit: usize,
        now: DateTime<Utc>,
    ) -> CacheResult<QueryOutput> {
        validate_query(sql)?;
        let original_query = normalize_query(sql).to_string();
        let query_executed = enforce_row_limit(sql, limit);

        let (columns, rows) = {
            let mut stmt = self
                .conn
                .prepare(&query_executed)
                .map_err(|e| CacheError::Query(e.to_string()))?;

            if !stmt.readonly() {
                return Err(CacheError::ForbiddenOperation {
                    reason: "statement is not read-only".to_string(),
                });
            }

            let (columns, declared): (Vec<String>, Vec<Option<String>>) = stmt
                .columns()
                .iter()
                .map(|c| (c.name().to_string(), c.decl_type().map(str::to_string)))
                .unzip();
            let width = columns.len();

            let mut cursor = stmt
                .query([])
                .map_err(|e| CacheError::Query(e.to_string()))?;
            let mut rows = Vec::new();
            while let Some(row) = cursor.next().map_err(|e| CacheError::Query(e.to_string()))? {
                let mut cells = Vec::with_capacity(width);
                for i in 0..width {
                    let cell = row
                        .get_ref(i)
                        .map_err(|e| CacheError::Query(e.to_string()))?;
                    cells.push(from_sql_ref_declared(cell, declared[i].as_deref()));
                }
                rows.push(cells);
            }
            (columns, rows)
        };

        self.track_access(&original_query, now);

        debug!(rows = rows.len(), limit, "query executed");
        Ok(QueryOutput {
            metadata: QueryMetadata {
                row_count: rows.len(),
                column_count: columns.len(),
                columns,
                query_executed,
                original_query,
            },
            rows,
        })
    }

    /// Returns the first `n` rows of a cached table.
    pub fn sample(&mut self, table_name: &str, n: usize) -> CacheResult<QueryOutput> {
        validate_table_name(table_name)?;
        self.query(&format!("SELECT * FROM {table_name}"), n)
    }

    fn track_access(&mut self, sql: &str, now: DateTime<Utc>) {
        let touched: Vec<String> = self
            .tables
            .keys()
            .filter(|name| sql.contains(name.as_str()))
            .cloned()
            .collect();

        for name in touched {
            if let Err(e) = self.ledger().record_access(&name, now) {
                warn!(table = %name, error = %e, "failed to record access");
                continue;
            }
            if let Some(entry) = self.tables.get_mut(&name) {
                entry.record_access(now);
            }
        }
    }

    // -- inspection ---------------------------------------------------------

    /// Metadata for one table, if cached.
    #[must_use]
    pub fn get_info(&self, table_name: &str) -> Option<&CachedTable> {
        self.tables.get(table_name)
    }

    #[must_use]
    pub fn table_exists(&self, table_name: &str) -> bool {
        self.tables.contains_key(table_name)
    }

    /// All cached tables, oldest first.
    pub fn datasets(&self) -> impl Iterator<Item = &CachedTable> {
        let mut all: Vec<&CachedTable> = self.tables.values().collect();
        all.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.table_name.cmp(&b.table_name))
        });
        all.into_iter()
    }

    /// Total estimated size of all cached tables in bytes.
    #[must_use]
    pub fn total_size_bytes(&self) -> u64 {
        self.ledger().total_size_bytes().unwrap_or_else(|e| {
            warn!(error = %e, "ledger size lookup failed; using in-memory totals");
            self.tables.values().map(|t| t.size_bytes).sum()
        })
    }

    /// Lists every dataset with cache-wide statistics.
    #[must_use]
    pub fn list(&self) -> DatasetListing {
        self.list_at(Utc::now())
    }

    /// [`list`](Self::list) evaluated at `now`.
    #[must_use]
    pub fn list_at(&self, now: DateTime<Utc>) -> DatasetListing {
        let datasets: Vec<CachedTable> = self.datasets().cloned().collect();
        let total_size_bytes = self.total_size_bytes();
        let total_size_mb = total_size_bytes / BYTES_PER_MB;
        let oldest_access_age_days = datasets
            .iter()
            .map(|t| t.idle_days(now))
            .max()
            .unwrap_or(0);

        let near_cap = total_size_mb.saturating_mul(100)
            > self.max_size_mb.saturating_mul(SIZE_WARNING_PERCENT);

        let cleanup_reason = if near_cap {
            Some(format!(
                "Cache size approaching limit ({total_size_mb}/{} MB)",
                self.max_size_mb
            ))
        } else if oldest_access_age_days > STALE_AFTER_DAYS {
            Some(format!(
                "Old datasets detected (oldest: {oldest_access_age_days} days)"
            ))
        } else {
            None
        };

        DatasetListing {
            cache_info: CacheInfo {
                total_datasets: datasets.len(),
                total_size_bytes,
                total_size_mb,
                max_size_mb: self.max_size_mb,
                oldest_access_age_days,
                cleanup_recommended: cleanup_reason.is_some(),
                cleanup_reason,
            },
            datasets,
        }
    }

    // -- drop ---------------------------------------------------------------

    /// Drops a cached table and its metadata. Returns the bytes freed.
    ///
    /// An engine failure is logged and reported as 0 bytes freed, with the
    /// metadata left in place. Dropping an unknown table returns 0.
    ///
    /// # Errors
    ///
    /// Only [`CacheError::InvalidIdentifier`].
    pub fn drop_table(&mut self, table_name: &str) -> CacheResult<u64> {
        validate_table_name(table_name)?;
        let size_bytes = self.tables.get(table_name).map_or(0, |t| t.size_bytes);

        if let Err(e) = self
            .conn
            .execute_batch(&format!("DROP TABLE IF EXISTS {table_name}"))
        {
            warn!(table = %table_name, error = %e, "failed to drop table");
            return Ok(0);
        }
        if let Err(e) = self.ledger().delete(table_name) {
            warn!(table = %table_name, error = %e, "failed to delete metadata row");
        }

        if self.tables.remove(table_name).is_some() {
            info!(table = %table_name, size_bytes, "dropped dataset");
        }
        Ok(size_bytes)
    }

    /// Reclaims free pages. Failures are logged.
    pub(crate) fn vacuum(&self) {
        match self.conn.execute_batch("VACUUM") {
            Ok(()) => debug!("storage reclaimed"),
            Err(e) => warn!(error = %e, "VACUUM failed"),
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Size of a table from the `dbstat` virtual table, or a per-cell estimate
/// when `dbstat` is unavailable.
pub(crate) fn estimate_table_size(
    conn: &Connection,
    table_name: &str,
    row_count: u64,
    column_count: u64,
) -> u64 {
    let measured = conn.query_row(
        "SELECT SUM(pgsize) FROM dbstat WHERE name = ?1",
        [table_name],
        |row| row.get::<_, Option<i64>>(0),
    );

    match measured {
        Ok(Some(bytes)) if bytes > 0 => bytes.unsigned_abs(),
        Ok(_) => row_count * column_count * FALLBACK_BYTES_PER_CELL,
        Err(e) => {
            debug!(table = %table_name, error = %e, "dbstat unavailable; estimating size");
            row_count * column_count * FALLBACK_BYTES_PER_CELL
        }
    }
}

/// Checks the configured storage path and resolves it against the working
/// directory.
pub fn validate_storage_path(raw: &str) -> CacheResult<PathBuf> {
    let reject = |reason: &str| CacheError::PathValidation {
        path: raw.to_string(),
        reason: reason.to_string(),
    };

    if raw.trim().is_empty() {
        return Err(reject("path is empty"));
    }

    let path = Path::new(raw);
    if path.components().any(|c| matches!(c, Component::ParentDir)) {
        return Err(reject("parent directory traversal ('..') is not allowed"));
    }

    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }

    let cwd = std::env::current_dir()
        .and_then(|d| d.canonicalize())
        .map_err(|e| CacheError::Io(format!("cannot resolve working directory: {e}")))?;
    let resolved = cwd.join(path);

    // Symlinks in the existing part of the path may still point elsewhere.
    let existing = resolved
        .ancestors()
        .find(|p| p.exists())
        .unwrap_or(cwd.as_path());
    let canonical = existing
        .canonicalize()
        .map_err(|e| CacheError::Io(format!("cannot resolve '{}': {e}", existing.display())))?;
    if !canonical.starts_with(&cwd) {
        return Err(reject("path resolves outside the working directory"));
    }

    Ok(resolved)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

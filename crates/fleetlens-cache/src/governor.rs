//! Cache maintenance: age/LRU eviction and same-session consolidation.
//!
//! Both operations are methods on [`TableStore`] so that they go through the
//! same drop path and keep the in-memory mapping in sync with the ledger.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use fleetlens_core::config::CleanupConfig;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::ledger::{CachedTable, MetadataLedger};
use crate::sanitize::{
    CONSOLIDATED_SUBSESSION, consolidated_table_name, quote_identifier, validate_table_name,
};
use crate::store::{BYTES_PER_MB, TableStore, estimate_table_size};
use crate::{CacheError, CacheResult};

// ---------------------------------------------------------------------------
// CleanupPolicy
// ---------------------------------------------------------------------------

/// Parameters of one cleanup run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupPolicy {
    /// Tables idle for longer than this are evicted in the age phase.
    pub max_age_days: u32,
    /// Target total size for the LRU phase, in MiB.
    pub max_size_mb: u64,
    /// Exempt tables with `access_count >= min_access_count` from both phases.
    pub keep_frequently_used: bool,
    pub min_access_count: u64,
}

impl Default for CleanupPolicy {
    fn default() -> Self {
        Self {
            max_age_days: 14,
            max_size_mb: 500,
            keep_frequently_used: true,
            min_access_count: 5,
        }
    }
}

impl CleanupPolicy {
    /// Builds a policy from the `cleanup` config section and the cache cap.
    #[must_use]
    pub fn from_config(config: &CleanupConfig, max_size_mb: u64) -> Self {
        Self {
            max_age_days: config.max_age_days,
            max_size_mb,
            keep_frequently_used: config.keep_frequently_used,
            min_access_count: config.min_access_count,
        }
    }

    /// Returns `true` if `table` may not be evicted under this policy.
    #[must_use]
    pub fn is_exempt(&self, table: &CachedTable) -> bool {
        self.keep_frequently_used && table.access_count >= self.min_access_count
    }
}

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

/// Outcome of [`TableStore::cleanup`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupStats {
    pub removed_count: usize,
    pub removed_size_bytes: u64,
    pub removed_size_mb: u64,
    pub remaining_datasets: usize,
    pub cache_size_mb: u64,
}

/// Outcome of [`TableStore::consolidate`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsolidationStats {
    /// Number of consolidated tables created (one per merged group).
    pub consolidated_count: usize,
    /// Member sizes minus the consolidated table's size, in whole MiB.
    pub space_saved_mb: u64,
}

/// Column name and declared type, in column order.
type Schema = Vec<(String, String)>;

// ---------------------------------------------------------------------------
// Cleanup
// ---------------------------------------------------------------------------

impl TableStore {
    /// Evicts idle tables, then least recently used ones until the cache fits
    /// in `policy.max_size_mb`, then reclaims free pages.
    pub fn cleanup(&mut self, policy: &CleanupPolicy) -> CacheResult<CleanupStats> {
        self.cleanup_at(Utc::now(), policy)
    }

    /// [`cleanup`](Self::cleanup) evaluated at `now`.
    pub fn cleanup_at(
        &mut self,
        now: DateTime<Utc>,
        policy: &CleanupPolicy,
    ) -> CacheResult<CleanupStats> {
        let mut stats = CleanupStats::default();

        // Phase 1: age. A window reaching past chrono's range expires nothing.
        let cutoff = Duration::try_days(i64::from(policy.max_age_days))
            .and_then(|window| now.checked_sub_signed(window));
        let expired: Vec<String> = match cutoff {
            Some(cutoff) => self
                .tables
                .values()
                .filter(|t| t.last_accessed_at < cutoff && !policy.is_exempt(t))
                .map(|t| t.table_name.clone())
                .collect(),
            None => Vec::new(),
        };
        for name in &expired {
            self.evict(name, &mut stats)?;
        }
        debug!(
            removed = stats.removed_count,
            cutoff = ?cutoff,
            "age eviction finished"
        );

        // Phase 2: LRU down to the size cap.
        let cap_bytes = policy.max_size_mb.saturating_mul(BYTES_PER_MB);
        let mut total = self.total_size_bytes();
        if total > cap_bytes {
            let mut candidates: Vec<(DateTime<Utc>, String)> = self
                .tables
                .values()
                .filter(|t| !policy.is_exempt(t))
                .map(|t| (t.last_accessed_at, t.table_name.clone()))
                .collect();
            candidates.sort();

            for (_, name) in candidates {
                if total <= cap_bytes {
                    break;
                }
                self.evict(&name, &mut stats)?;
                total = self.total_size_bytes();
            }

            if total > cap_bytes {
                warn!(
                    total_size_bytes = total,
                    max_size_mb = policy.max_size_mb,
                    "cache still over its size cap; remaining tables are exempt"
                );
            }
        }

        self.vacuum();

        stats.removed_size_mb = stats.removed_size_bytes / BYTES_PER_MB;
        stats.remaining_datasets = self.tables.len();
        stats.cache_size_mb = self.total_size_bytes() / BYTES_PER_MB;
        info!(
            removed = stats.removed_count,
            removed_size_mb = stats.removed_size_mb,
            remaining = stats.remaining_datasets,
            cache_size_mb = stats.cache_size_mb,
            "cache cleanup finished"
        );
        Ok(stats)
    }

    fn evict(&mut self, name: &str, stats: &mut CleanupStats) -> CacheResult<()> {
        let freed = self.drop_table(name)?;
        if !self.table_exists(name) {
            stats.removed_count += 1;
            stats.removed_size_bytes += freed;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Consolidation
    // -----------------------------------------------------------------------

    /// Merges schema-identical tables of the same session into one
    /// deduplicated table, optionally for one session only. At most
    /// `max_tables` members are merged per session and call.
    pub fn consolidate(
        &mut self,
        session_id: Option<&str>,
        max_tables: usize,
    ) -> CacheResult<ConsolidationStats> {
        self.consolidate_at(Utc::now(), session_id, max_tables)
    }

    /// [`consolidate`](Self::consolidate) with an explicit creation time for
    /// the new tables.
    pub fn consolidate_at(
        &mut self,
        now: DateTime<Utc>,
        session_id: Option<&str>,
        max_tables: usize,
    ) -> CacheResult<ConsolidationStats> {
        let mut groups: BTreeMap<String, Vec<CachedTable>> = BTreeMap::new();
        for table in self.tables.values() {
            if session_id.is_some_and(|s| s != table.session_id) {
                continue;
            }
            groups
                .entry(table.session_id.clone())
                .or_default()
                .push(table.clone());
        }

        let mut stats = ConsolidationStats::default();
        let mut saved_bytes = 0u64;

        for (session, mut members) in groups {
            if members.len() < 2 {
                continue;
            }
            members.sort_by(|a, b| {
                a.created_at
                    .cmp(&b.created_at)
                    .then_with(|| a.table_name.cmp(&b.table_name))
            });
            members.truncate(max_tables);
            if members.len() < 2 {
                continue;
            }

            match self.consolidate_group(&session, &members, now) {
                Ok(Some((entry, members_bytes))) => {
                    saved_bytes += members_bytes.saturating_sub(entry.size_bytes);
                    stats.consolidated_count += 1;
                    info!(
                        table = %entry.table_name,
                        session = %session,
                        members = members.len(),
                        rows = entry.row_count,
                        "consolidated datasets"
                    );
                    for member in &members {
                        self.tables.remove(&member.table_name);
                    }
                    self.tables.insert(entry.table_name.clone(), entry);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(session = %session, error = %e, "consolidation failed; originals kept");
                }
            }
        }

        stats.space_saved_mb = saved_bytes / BYTES_PER_MB;
        if stats.consolidated_count > 0 {
            self.vacuum();
        }
        Ok(stats)
    }

    /// Merges one group in a single transaction. Returns `None` when the
    /// group is skipped, otherwise the new ledger entry and the members'
    /// combined size.
    fn consolidate_group(
        &mut self,
        session: &str,
        members: &[CachedTable],
        now: DateTime<Utc>,
    ) -> CacheResult<Option<(CachedTable, u64)>> {
        let mut schemas = Vec::with_capacity(members.len());
        for member in members {
            validate_table_name(&member.table_name)?;
            schemas.push(table_schema(&self.conn, &member.table_name)?);
        }
        let first = &schemas[0];
        if first.is_empty() || schemas.iter().any(|s| s != first) {
            debug!(session = %session, "skipping consolidation: schemas differ");
            return Ok(None);
        }

        let consolidated = match consolidated_table_name(session, now) {
            Ok(name) if !self.tables.contains_key(&name) => name,
            Ok(name) => {
                debug!(table = %name, "skipping consolidation: name already taken");
                return Ok(None);
            }
            Err(e) => {
                warn!(session = %session, error = %e, "skipping consolidation: invalid name");
                return Ok(None);
            }
        };

        let column_defs = first
            .iter()
            .map(|(name, ty)| format!("{} {ty}", quote_identifier(name)))
            .collect::<Vec<_>>()
            .join(", ");
        let union = members
            .iter()
            .map(|m| format!("SELECT * FROM {}", m.table_name))
            .collect::<Vec<_>>()
            .join(" UNION ALL ");

        let tx = self
            .conn
            .transaction()
            .map_err(|e| CacheError::Database(format!("begin consolidate: {e}")))?;

        tx.execute_batch(&format!(
            "CREATE TABLE {consolidated} ({column_defs});
             INSERT INTO {consolidated} SELECT DISTINCT * FROM ({union});"
        ))
        .map_err(|e| CacheError::Database(format!("create {consolidated}: {e}")))?;

        let row_count: i64 = tx
            .query_row(&format!("SELECT COUNT(*) FROM {consolidated}"), [], |row| {
                row.get(0)
            })
            .map_err(|e| CacheError::Database(format!("count {consolidated}: {e}")))?;
        let row_count = u64::try_from(row_count).unwrap_or(0);
        let column_count = first.len() as u64;
        let size_bytes = estimate_table_size(&tx, &consolidated, row_count, column_count);

        let entry = CachedTable {
            table_name: consolidated.clone(),
            session_id: session.to_string(),
            subsession_id: CONSOLIDATED_SUBSESSION.to_string(),
            origin_question: format!("Consolidated from {} tables", members.len()),
            origin_query: String::new(),
            created_at: now,
            last_accessed_at: now,
            access_count: 0,
            row_count,
            column_count,
            columns: first.iter().map(|(name, _)| name.clone()).collect(),
            dtypes: members[0].dtypes.clone(),
            size_bytes,
        };

        let ledger = MetadataLedger::new(&tx);
        ledger.upsert(&entry)?;
        for member in members {
            tx.execute_batch(&format!("DROP TABLE {}", member.table_name))
                .map_err(|e| CacheError::Database(format!("drop {}: {e}", member.table_name)))?;
            ledger.delete(&member.table_name)?;
        }

        tx.commit()
            .map_err(|e| CacheError::Database(format!("commit consolidate: {e}")))?;

        let members_bytes = members.iter().map(|m| m.size_bytes).sum();
        Ok(Some((entry, members_bytes)))
    }
}

/// Column names and declared types of a table, in column order.
fn table_schema(conn: &Connection, table_name: &str) -> CacheResult<Schema> {
    let mut stmt = conn
        .prepare("SELECT name, type FROM pragma_table_info(?1) ORDER BY cid")
        .map_err(|e| CacheError::Database(format!("schema of {table_name}: {e}")))?;
    let rows = stmt
        .query_map([table_name], |row| Ok((row.get(0)?, row.get(1)?)))
        .map_err(|e| CacheError::Database(format!("schema of {table_name}: {e}")))?;

    let mut schema = Vec::new();
    for row in rows {
        schema.push(row.map_err(|e| CacheError::Database(format!("schema of {table_name}: {e}")))?);
    }
    Ok(schema)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

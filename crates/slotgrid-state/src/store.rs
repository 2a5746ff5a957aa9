//! StateStore: redb-backed state persistence for slotgrid.
//!
//! Provides typed operations over scheduling history and fair-share
//! records. All values are JSON-serialized into redb's `&[u8]` value
//! columns. The store supports both on-disk and in-memory backends (the
//! latter for testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::{debug, warn};

use slotgrid_core::config::RetryPolicy;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
    retry: RetryPolicy,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self {
            db: Arc::new(db),
            retry: RetryPolicy::default(),
        };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self {
            db: Arc::new(db),
            retry: RetryPolicy::default(),
        };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Replace the retry policy applied to read-modify-write operations.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        for scope in HistoryScope::ALL {
            txn.open_table(history_table(scope)).map_err(map_err!(Table))?;
        }
        txn.open_table(DOMAIN_FAIR_SHARES).map_err(map_err!(Table))?;
        txn.open_table(PROJECT_FAIR_SHARES).map_err(map_err!(Table))?;
        txn.open_table(USER_FAIR_SHARES).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Run `op` until it succeeds, fails permanently, or the policy gives up.
    fn retrying<T>(&self, op_name: &str, mut op: impl FnMut() -> StateResult<T>) -> StateResult<T> {
        let mut attempt = 1;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.retry.max_attempts => {
                    let delay = self.retry.delay_after(attempt);
                    warn!(op = op_name, attempt, ?delay, error = %e, "transient state error, retrying");
                    std::thread::sleep(delay);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    // ── Scheduling history ─────────────────────────────────────────

    /// Read the latest entry of `scope_id` and write whatever `decide`
    /// returns for it, inside one write transaction.
    ///
    /// `decide` may run more than once when the transaction is retried.
    pub fn record_history_with<F>(
        &self,
        scope: HistoryScope,
        scope_id: &str,
        mut decide: F,
    ) -> StateResult<SchedulingHistoryEntry>
    where
        F: FnMut(Option<&SchedulingHistoryEntry>) -> SchedulingHistoryEntry,
    {
        let mut written =
            self.record_history_batch_with(scope, &[scope_id], |_, latest| decide(latest))?;
        written
            .pop()
            .ok_or_else(|| StateError::NotFound(format!("{scope} history for {scope_id}")))
    }

    /// Batch form of [`record_history_with`](Self::record_history_with).
    ///
    /// Items are applied in order within one transaction, so an item sees
    /// the rows written by earlier items of the same batch. `decide`
    /// receives the item index and the current latest entry of its scope id.
    pub fn record_history_batch_with<F>(
        &self,
        scope: HistoryScope,
        scope_ids: &[&str],
        mut decide: F,
    ) -> StateResult<Vec<SchedulingHistoryEntry>>
    where
        F: FnMut(usize, Option<&SchedulingHistoryEntry>) -> SchedulingHistoryEntry,
    {
        self.retrying("record_history", || {
            let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
            let mut written = Vec::with_capacity(scope_ids.len());
            {
                let mut table = txn
                    .open_table(history_table(scope))
                    .map_err(map_err!(Table))?;
                for (idx, scope_id) in scope_ids.iter().enumerate() {
                    let latest = latest_in(&table, scope_id)?;
                    let entry = decide(idx, latest.as_ref());
                    let key = entry.table_key();
                    let value = serde_json::to_vec(&entry).map_err(map_err!(Serialize))?;
                    table
                        .insert(key.as_str(), value.as_slice())
                        .map_err(map_err!(Write))?;
                    written.push(entry);
                }
            }
            txn.commit().map_err(map_err!(Transaction))?;
            Ok(written)
        })
    }

    /// Most recent entry (by `created_at`) for a scope id.
    pub fn latest_history(
        &self,
        scope: HistoryScope,
        scope_id: &str,
    ) -> StateResult<Option<SchedulingHistoryEntry>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn
            .open_table(history_table(scope))
            .map_err(map_err!(Table))?;
        latest_in(&table, scope_id)
    }

    /// Full timeline of a scope id, newest first.
    pub fn list_history(
        &self,
        scope: HistoryScope,
        scope_id: &str,
    ) -> StateResult<Vec<SchedulingHistoryEntry>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn
            .open_table(history_table(scope))
            .map_err(map_err!(Table))?;
        let mut entries = scan_scope(&table, scope_id)?;
        sort_newest_first(&mut entries);
        Ok(entries)
    }

    /// Filtered, paginated history search, newest first.
    pub fn search_history(&self, query: &HistoryQuery) -> StateResult<Page<SchedulingHistoryEntry>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn
            .open_table(history_table(query.scope))
            .map_err(map_err!(Table))?;
        let candidates = match &query.scope_id {
            Some(scope_id) => scan_scope(&table, scope_id)?,
            None => {
                let mut all = Vec::new();
                for entry in table.iter().map_err(map_err!(Read))? {
                    let (_, value) = entry.map_err(map_err!(Read))?;
                    all.push(decode_entry(value.value())?);
                }
                all
            }
        };
        let mut matching: Vec<_> = candidates.into_iter().filter(|e| query.matches(e)).collect();
        sort_newest_first(&mut matching);
        Ok(Page::from_ordered(matching, query.offset, query.limit))
    }

    // ── Fair shares ────────────────────────────────────────────────

    /// Insert or update a fair-share record.
    pub fn put_fair_share(&self, row: &FairShareRow) -> StateResult<()> {
        self.put_fair_shares(std::slice::from_ref(row))
    }

    /// Insert or update many fair-share records in one transaction.
    pub fn put_fair_shares(&self, rows: &[FairShareRow]) -> StateResult<()> {
        let encoded = rows
            .iter()
            .map(|row| -> StateResult<_> {
                let value = serde_json::to_vec(row).map_err(map_err!(Serialize))?;
                Ok((row.key.level(), row.key.table_key(), value))
            })
            .collect::<StateResult<Vec<_>>>()?;
        self.retrying("put_fair_shares", || {
            let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
            for (level, key, value) in &encoded {
                let mut table = txn
                    .open_table(fair_share_table(*level))
                    .map_err(map_err!(Table))?;
                table
                    .insert(key.as_str(), value.as_slice())
                    .map_err(map_err!(Write))?;
            }
            txn.commit().map_err(map_err!(Transaction))?;
            Ok(())
        })?;
        debug!(count = rows.len(), "fair share records stored");
        Ok(())
    }

    /// Get a fair-share record by its unique key.
    pub fn get_fair_share(&self, key: &FairShareKey) -> StateResult<Option<FairShareRow>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn
            .open_table(fair_share_table(key.level()))
            .map_err(map_err!(Table))?;
        match table.get(key.table_key().as_str()).map_err(map_err!(Read))? {
            Some(guard) => {
                let row: FairShareRow =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(row))
            }
            None => Ok(None),
        }
    }

    /// List the fair-share records of one level within a resource group.
    pub fn list_fair_shares(
        &self,
        level: FairShareLevel,
        resource_group: &str,
    ) -> StateResult<Vec<FairShareRow>> {
        let prefix = format!("{resource_group}/");
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn
            .open_table(fair_share_table(level))
            .map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.range(prefix.as_str()..).map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if !key.value().starts_with(&prefix) {
                break;
            }
            let row: FairShareRow =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(row);
        }
        Ok(results)
    }

    /// Delete a fair-share record. Returns true if it existed.
    pub fn delete_fair_share(&self, key: &FairShareKey) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn
                .open_table(fair_share_table(key.level()))
                .map_err(map_err!(Table))?;
            existed = table
                .remove(key.table_key().as_str())
                .map_err(map_err!(Write))?
                .is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(key = %key.table_key(), existed, "fair share record deleted");
        Ok(existed)
    }
}

fn decode_entry(bytes: &[u8]) -> StateResult<SchedulingHistoryEntry> {
    serde_json::from_slice(bytes).map_err(map_err!(Deserialize))
}

/// All rows of one scope id, in key order.
fn scan_scope<T>(table: &T, scope_id: &str) -> StateResult<Vec<SchedulingHistoryEntry>>
where
    T: ReadableTable<&'static str, &'static [u8]>,
{
    let prefix = format!("{scope_id}:");
    let mut entries = Vec::new();
    for entry in table.range(prefix.as_str()..).map_err(map_err!(Read))? {
        let (key, value) = entry.map_err(map_err!(Read))?;
        if !key.value().starts_with(&prefix) {
            break;
        }
        entries.push(decode_entry(value.value())?);
    }
    Ok(entries)
}

fn latest_in<T>(table: &T, scope_id: &str) -> StateResult<Option<SchedulingHistoryEntry>>
where
    T: ReadableTable<&'static str, &'static [u8]>,
{
    Ok(scan_scope(table, scope_id)?
        .into_iter()
        .max_by_key(|e| (e.created_at, e.id)))
}

fn sort_newest_first(entries: &mut [SchedulingHistoryEntry]) {
    entries.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
}

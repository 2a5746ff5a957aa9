//! Merge-on-retry scheduling history.
//!
//! Every scheduling attempt is recorded against its scope (session,
//! kernel, deployment or route). When the latest row of the scope agrees
//! with the new attempt on `(phase, error_code, to_status)` the row's
//! `attempts` counter is bumped instead of adding a row, so a workload
//! stuck behind the same limit keeps one row with a growing counter.
//!
//! The recorder owns the merge decision. The [`HistoryStore`] it writes to
//! must run the read of the latest row and the write of the decided row
//! atomically per scope id.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

use slotgrid_core::SchedulingResult;
use slotgrid_state::{
    HistoryScope, SchedulingHistoryEntry, StateResult, StateStore, SubStepResult,
};

/// One attempt to be recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryAttempt {
    pub scope: HistoryScope,
    pub scope_id: String,
    pub phase: String,
    pub from_status: Option<String>,
    pub to_status: Option<String>,
    pub result: SchedulingResult,
    pub error_code: Option<String>,
    pub message: String,
    pub sub_steps: Vec<SubStepResult>,
}

impl HistoryAttempt {
    pub fn new(
        scope: HistoryScope,
        scope_id: impl Into<String>,
        phase: impl Into<String>,
        result: SchedulingResult,
    ) -> Self {
        Self {
            scope,
            scope_id: scope_id.into(),
            phase: phase.into(),
            from_status: None,
            to_status: None,
            result,
            error_code: None,
            message: String::new(),
            sub_steps: Vec::new(),
        }
    }

    pub fn with_status(mut self, from: Option<&str>, to: Option<&str>) -> Self {
        self.from_status = from.map(String::from);
        self.to_status = to.map(String::from);
        self
    }

    pub fn with_error_code(mut self, code: impl Into<String>) -> Self {
        self.error_code = Some(code.into());
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn with_sub_steps(mut self, sub_steps: Vec<SubStepResult>) -> Self {
        self.sub_steps = sub_steps;
        self
    }

    fn merge_key(&self) -> (&str, Option<&str>, Option<&str>) {
        (
            self.phase.as_str(),
            self.error_code.as_deref(),
            self.to_status.as_deref(),
        )
    }

    fn into_entry(self, now: DateTime<Utc>) -> SchedulingHistoryEntry {
        SchedulingHistoryEntry {
            id: Uuid::now_v7(),
            scope: self.scope,
            scope_id: self.scope_id,
            phase: self.phase,
            from_status: self.from_status,
            to_status: self.to_status,
            result: self.result,
            error_code: self.error_code,
            message: self.message,
            sub_steps: self.sub_steps,
            attempts: 1,
            created_at: now,
            updated_at: now,
        }
    }
}

/// The row that should exist after `attempt` lands on top of `latest`.
pub fn merge_or_insert(
    latest: Option<&SchedulingHistoryEntry>,
    attempt: &HistoryAttempt,
    now: DateTime<Utc>,
) -> SchedulingHistoryEntry {
    match latest {
        Some(entry) if entry.merge_key() == attempt.merge_key() => SchedulingHistoryEntry {
            attempts: entry.attempts.saturating_add(1),
            updated_at: now,
            ..entry.clone()
        },
        _ => attempt.clone().into_entry(now),
    }
}

/// Storage collaborator of the recorder.
///
/// `record_with` must read the latest entry of the scope id and persist
/// what `decide` returns for it as one atomic step. `decide` may be called
/// more than once if the store retries.
pub trait HistoryStore: Send + Sync {
    fn record_with(
        &self,
        scope: HistoryScope,
        scope_id: &str,
        decide: &mut dyn FnMut(Option<&SchedulingHistoryEntry>) -> SchedulingHistoryEntry,
    ) -> StateResult<SchedulingHistoryEntry>;

    /// Items are applied in order; each sees the rows of earlier items.
    fn record_batch_with(
        &self,
        scope: HistoryScope,
        scope_ids: &[&str],
        decide: &mut dyn FnMut(usize, Option<&SchedulingHistoryEntry>) -> SchedulingHistoryEntry,
    ) -> StateResult<Vec<SchedulingHistoryEntry>>;

    fn latest(
        &self,
        scope: HistoryScope,
        scope_id: &str,
    ) -> StateResult<Option<SchedulingHistoryEntry>>;

    /// Newest first.
    fn list(&self, scope: HistoryScope, scope_id: &str) -> StateResult<Vec<SchedulingHistoryEntry>>;
}

impl HistoryStore for StateStore {
    fn record_with(
        &self,
        scope: HistoryScope,
        scope_id: &str,
        decide: &mut dyn FnMut(Option<&SchedulingHistoryEntry>) -> SchedulingHistoryEntry,
    ) -> StateResult<SchedulingHistoryEntry> {
        self.record_history_with(scope, scope_id, |latest| decide(latest))
    }

    fn record_batch_with(
        &self,
        scope: HistoryScope,
        scope_ids: &[&str],
        decide: &mut dyn FnMut(usize, Option<&SchedulingHistoryEntry>) -> SchedulingHistoryEntry,
    ) -> StateResult<Vec<SchedulingHistoryEntry>> {
        self.record_history_batch_with(scope, scope_ids, |idx, latest| decide(idx, latest))
    }

    fn latest(
        &self,
        scope: HistoryScope,
        scope_id: &str,
    ) -> StateResult<Option<SchedulingHistoryEntry>> {
        self.latest_history(scope, scope_id)
    }

    fn list(&self, scope: HistoryScope, scope_id: &str) -> StateResult<Vec<SchedulingHistoryEntry>> {
        self.list_history(scope, scope_id)
    }
}

/// Process-local history store. Rows live in insertion order per scope id.
#[derive(Debug, Default)]
pub struct InMemoryHistoryStore {
    rows: Mutex<HashMap<(HistoryScope, String), Vec<SchedulingHistoryEntry>>>,
}

impl InMemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn upsert(rows: &mut Vec<SchedulingHistoryEntry>, entry: SchedulingHistoryEntry) {
        match rows.iter_mut().find(|e| e.id == entry.id) {
            Some(existing) => *existing = entry,
            None => rows.push(entry),
        }
    }
}

impl HistoryStore for InMemoryHistoryStore {
    fn record_with(
        &self,
        scope: HistoryScope,
        scope_id: &str,
        decide: &mut dyn FnMut(Option<&SchedulingHistoryEntry>) -> SchedulingHistoryEntry,
    ) -> StateResult<SchedulingHistoryEntry> {
        let mut rows = self.rows.lock().unwrap_or_else(PoisonError::into_inner);
        let timeline = rows.entry((scope, scope_id.to_string())).or_default();
        let entry = decide(timeline.last());
        Self::upsert(timeline, entry.clone());
        Ok(entry)
    }

    fn record_batch_with(
        &self,
        scope: HistoryScope,
        scope_ids: &[&str],
        decide: &mut dyn FnMut(usize, Option<&SchedulingHistoryEntry>) -> SchedulingHistoryEntry,
    ) -> StateResult<Vec<SchedulingHistoryEntry>> {
        let mut rows = self.rows.lock().unwrap_or_else(PoisonError::into_inner);
        let mut written = Vec::with_capacity(scope_ids.len());
        for (idx, scope_id) in scope_ids.iter().enumerate() {
            let timeline = rows.entry((scope, scope_id.to_string())).or_default();
            let entry = decide(idx, timeline.last());
            Self::upsert(timeline, entry.clone());
            written.push(entry);
        }
        Ok(written)
    }

    fn latest(
        &self,
        scope: HistoryScope,
        scope_id: &str,
    ) -> StateResult<Option<SchedulingHistoryEntry>> {
        let rows = self.rows.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(rows
            .get(&(scope, scope_id.to_string()))
            .and_then(|timeline| timeline.last().cloned()))
    }

    fn list(&self, scope: HistoryScope, scope_id: &str) -> StateResult<Vec<SchedulingHistoryEntry>> {
        let rows = self.rows.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(rows
            .get(&(scope, scope_id.to_string()))
            .map(|timeline| timeline.iter().rev().cloned().collect())
            .unwrap_or_default())
    }
}

#[derive(Clone)]
pub struct SchedulingHistoryRecorder {
    store: Arc<dyn HistoryStore>,
}

impl SchedulingHistoryRecorder {
    pub fn new(store: Arc<dyn HistoryStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn HistoryStore> {
        &self.store
    }

    /// Record one attempt, merging into the latest row when it matches.
    pub fn record(&self, attempt: HistoryAttempt) -> StateResult<SchedulingHistoryEntry> {
        let now = Utc::now();
        let entry = self
            .store
            .record_with(attempt.scope, &attempt.scope_id, &mut |latest| {
                merge_or_insert(latest, &attempt, now)
            })?;
        log_written(&entry);
        Ok(entry)
    }

    /// Record attempts of one scope in order, in a single store call.
    ///
    /// Two attempts for the same scope id in one batch merge with each
    /// other like consecutive [`record`](Self::record) calls would.
    pub fn record_batch(
        &self,
        scope: HistoryScope,
        attempts: &[HistoryAttempt],
    ) -> StateResult<Vec<SchedulingHistoryEntry>> {
        if attempts.is_empty() {
            return Ok(Vec::new());
        }
        let now = Utc::now();
        let scope_ids: Vec<&str> = attempts.iter().map(|a| a.scope_id.as_str()).collect();
        let written = self
            .store
            .record_batch_with(scope, &scope_ids, &mut |idx, latest| {
                merge_or_insert(latest, &attempts[idx], now)
            })?;
        written.iter().for_each(log_written);
        Ok(written)
    }

    pub fn latest(
        &self,
        scope: HistoryScope,
        scope_id: &str,
    ) -> StateResult<Option<SchedulingHistoryEntry>> {
        self.store.latest(scope, scope_id)
    }

    pub fn list(&self, scope: HistoryScope, scope_id: &str) -> StateResult<Vec<SchedulingHistoryEntry>> {
        self.store.list(scope, scope_id)
    }
}

fn log_written(entry: &SchedulingHistoryEntry) {
    if entry.attempts > 1 {
        debug!(
            scope = %entry.scope,
            scope_id = %entry.scope_id,
            phase = %entry.phase,
            attempts = entry.attempts,
            "history merged"
        );
    } else {
        debug!(
            scope = %entry.scope,
            scope_id = %entry.scope_id,
            phase = %entry.phase,
            result = %entry.result,
            "history inserted"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attempt(phase: &str, code: Option<&str>, to: &str, result: SchedulingResult) -> HistoryAttempt {
        let mut a = HistoryAttempt::new(HistoryScope::Session, "s-1", phase, result)
            .with_status(Some("PENDING"), Some(to))
            .with_message(format!("{phase} {result}"));
        if let Some(code) = code {
            a = a.with_error_code(code);
        }
        a
    }

    fn recorders() -> Vec<SchedulingHistoryRecorder> {
        vec![
            SchedulingHistoryRecorder::new(Arc::new(InMemoryHistoryStore::new())),
            SchedulingHistoryRecorder::new(Arc::new(StateStore::open_in_memory().unwrap())),
        ]
    }

    #[test]
    fn identical_attempts_merge() {
        for recorder in recorders() {
            let failing = attempt("scheduling", Some("NO_AVAILABLE_AGENT"), "PENDING", SchedulingResult::Failure);
            let first = recorder.record(failing.clone()).unwrap();
            recorder.record(failing.clone()).unwrap();
            let third = recorder.record(failing).unwrap();

            assert_eq!(third.id, first.id);
            assert_eq!(third.attempts, 3);
            assert_eq!(third.created_at, first.created_at);
            assert!(third.updated_at >= first.updated_at);
            assert_eq!(recorder.list(HistoryScope::Session, "s-1").unwrap().len(), 1);
        }
    }

    #[test]
    fn result_and_from_status_do_not_split_rows() {
        for recorder in recorders() {
            recorder
                .record(attempt("scheduling", None, "SCHEDULED", SchedulingResult::Failure))
                .unwrap();
            let mut success = attempt("scheduling", None, "SCHEDULED", SchedulingResult::Success);
            success.from_status = Some("SCHEDULED".into());
            let merged = recorder.record(success).unwrap();

            assert_eq!(merged.attempts, 2);
            assert_eq!(merged.result, SchedulingResult::Failure);
        }
    }

    #[test]
    fn different_triple_inserts_and_merging_only_looks_at_latest() {
        for recorder in recorders() {
            let a = attempt("scheduling", Some("CONCURRENCY_LIMIT_EXCEEDED"), "PENDING", SchedulingResult::Failure);
            let b = attempt("scheduling", Some("NO_AVAILABLE_AGENT"), "PENDING", SchedulingResult::Failure);

            recorder.record(a.clone()).unwrap();
            recorder.record(a.clone()).unwrap();
            recorder.record(b).unwrap();
            let back_to_a = recorder.record(a).unwrap();

            assert_eq!(back_to_a.attempts, 1);
            let timeline = recorder.list(HistoryScope::Session, "s-1").unwrap();
            let attempts: Vec<u32> = timeline.iter().map(|e| e.attempts).collect();
            assert_eq!(attempts, vec![1, 1, 2]);
            assert_eq!(
                recorder.latest(HistoryScope::Session, "s-1").unwrap().unwrap().id,
                back_to_a.id
            );
        }
    }

    #[test]
    fn batch_merges_within_itself() {
        for recorder in recorders() {
            let mut other = attempt("scheduling", None, "SCHEDULED", SchedulingResult::Success);
            other.scope_id = "s-2".into();
            let same = attempt("scheduling", Some("X"), "PENDING", SchedulingResult::Failure);

            let written = recorder
                .record_batch(HistoryScope::Session, &[same.clone(), other, same])
                .unwrap();
            assert_eq!(written.len(), 3);
            assert_eq!(written[2].id, written[0].id);
            assert_eq!(written[2].attempts, 2);
            assert_eq!(written[1].attempts, 1);
            assert_eq!(recorder.list(HistoryScope::Session, "s-1").unwrap().len(), 1);
        }
    }

    #[test]
    fn scopes_are_separate_timelines() {
        let recorder = SchedulingHistoryRecorder::new(Arc::new(InMemoryHistoryStore::new()));
        let session = attempt("scheduling", None, "SCHEDULED", SchedulingResult::Success);
        let mut kernel = session.clone();
        kernel.scope = HistoryScope::Kernel;

        recorder.record(session).unwrap();
        let k = recorder.record(kernel).unwrap();
        assert_eq!(k.attempts, 1);
        assert_eq!(k.scope, HistoryScope::Kernel);
    }
}

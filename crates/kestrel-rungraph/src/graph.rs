// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Notify;

use crate::record::{NewRunAttrs, RunRecord, RunStatus};
use crate::RunGraphError;

/// Wait semantics for `RunGraph::await_ids` (spec §4.G `await`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitMode {
    WaitAll,
    WaitAny,
}

/// In-process, persistence-backed table of run records (spec §4.G).
///
/// The table itself is a plain `Mutex<HashMap<..>>` — transitions are cheap
/// in-memory CAS operations, so there is no need for the async
/// `tokio::sync::Mutex`. A shared `Notify` wakes every pending `await_ids`
/// call on each transition; callers never poll.
#[derive(Clone)]
pub struct RunGraph {
    inner: Arc<Mutex<HashMap<String, RunRecord>>>,
    notify: Arc<Notify>,
}

impl Default for RunGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl RunGraph {
    pub fn new() -> Self {
        Self { inner: Arc::new(Mutex::new(HashMap::new())), notify: Arc::new(Notify::new()) }
    }

    /// Seed the table from records loaded off disk (used by
    /// `persist::load_and_recover` during startup crash recovery).
    pub fn from_records(records: Vec<RunRecord>) -> Self {
        let graph = Self::new();
        let mut table = graph.inner.lock().unwrap();
        for r in records {
            table.insert(r.id.clone(), r);
        }
        drop(table);
        graph
    }

    pub fn new_run(&self, attrs: NewRunAttrs) -> String {
        let id = uuid::Uuid::new_v4().simple().to_string()[..12].to_string();
        let record = RunRecord::new(id.clone(), attrs);
        self.inner.lock().unwrap().insert(id.clone(), record);
        self.notify.notify_waiters();
        id
    }

    pub fn get(&self, id: &str) -> Option<RunRecord> {
        self.inner.lock().unwrap().get(id).cloned()
    }

    pub fn list(&self, status_filter: Option<RunStatus>) -> Vec<RunRecord> {
        self.inner
            .lock()
            .unwrap()
            .values()
            .filter(|r| status_filter.map(|s| r.status == s).unwrap_or(true))
            .cloned()
            .collect()
    }

    pub fn mark_running(&self, id: &str) -> Result<(), RunGraphError> {
        self.transition(id, RunStatus::Running, None, None)
    }

    pub fn finish(&self, id: &str, result: serde_json::Value) -> Result<(), RunGraphError> {
        self.transition(id, RunStatus::Completed, Some(result), None)
    }

    pub fn fail(&self, id: &str, reason: impl Into<String>) -> Result<(), RunGraphError> {
        self.transition(id, RunStatus::Error, None, Some(reason.into()))
    }

    pub fn kill(&self, id: &str) -> Result<(), RunGraphError> {
        self.transition(id, RunStatus::Killed, None, None)
    }

    pub fn cancel(&self, id: &str) -> Result<(), RunGraphError> {
        self.transition(id, RunStatus::Cancelled, None, None)
    }

    fn mark_lost(&self, id: &str) -> Result<(), RunGraphError> {
        self.transition(id, RunStatus::Lost, None, Some("lost_on_restart".to_string()))
    }

    /// Compare-and-set: only succeeds if `new_status`'s rank strictly
    /// exceeds the current rank (spec §3.6 invariant 4, §4.G concurrency
    /// invariants). Forced transitions used only by crash recovery
    /// (`mark_lost`) bypass the rank check via `force`.
    fn transition(
        &self,
        id: &str,
        new_status: RunStatus,
        result: Option<serde_json::Value>,
        error: Option<String>,
    ) -> Result<(), RunGraphError> {
        let mut table = self.inner.lock().unwrap();
        let record = table.get_mut(id).ok_or_else(|| RunGraphError::NotFound(id.to_string()))?;
        if new_status.rank() <= record.status.rank() {
            return Err(RunGraphError::InvalidTransition { id: id.to_string(), from: record.status, to: new_status });
        }
        let now = Utc::now();
        record.status = new_status;
        record.updated_at = now;
        if new_status == RunStatus::Running {
            record.started_at = Some(now);
        }
        if new_status.is_terminal() {
            record.completed_at = Some(now);
        }
        if result.is_some() {
            record.result = result;
        }
        if error.is_some() {
            record.error = error;
        }
        drop(table);
        self.notify.notify_waiters();
        Ok(())
    }

    /// Sets `child.parent := parent` and prepends `child` to
    /// `parent.children` (reverse-insertion order).
    pub fn add_child(&self, parent: &str, child: &str) -> Result<(), RunGraphError> {
        let mut table = self.inner.lock().unwrap();
        if !table.contains_key(parent) {
            return Err(RunGraphError::NotFound(parent.to_string()));
        }
        if !table.contains_key(child) {
            return Err(RunGraphError::NotFound(child.to_string()));
        }
        table.get_mut(child).unwrap().parent = Some(parent.to_string());
        table.get_mut(parent).unwrap().children.insert(0, child.to_string());
        Ok(())
    }

    /// Waits for `ids` to reach a terminal state per `mode`, driven by a
    /// shared `Notify` rather than polling (spec §4.G).
    pub async fn await_ids(
        &self,
        ids: &[String],
        mode: WaitMode,
        timeout_ms: u64,
    ) -> Result<Vec<RunRecord>, RunGraphError> {
        for id in ids {
            if self.get(id).is_none() {
                return Err(RunGraphError::NotFound(id.clone()));
            }
        }

        let wait = async {
            loop {
                // Register interest before checking, so a transition that
                // races with this check is never missed (see `Notify`'s
                // documented wait-then-check-then-await pattern).
                let notified = self.notify.notified();
                if let Some(records) = self.check_done(ids, mode) {
                    return records;
                }
                notified.await;
            }
        };

        tokio::time::timeout(Duration::from_millis(timeout_ms), wait)
            .await
            .map_err(|_| RunGraphError::Timeout)
    }

    fn check_done(&self, ids: &[String], mode: WaitMode) -> Option<Vec<RunRecord>> {
        let table = self.inner.lock().unwrap();
        let records: Vec<RunRecord> = ids.iter().filter_map(|id| table.get(id).cloned()).collect();
        match mode {
            WaitMode::WaitAll => {
                if records.iter().all(|r| r.status.is_terminal()) {
                    Some(records)
                } else {
                    None
                }
            }
            WaitMode::WaitAny => records.into_iter().find(|r| r.status.is_terminal()).map(|r| vec![r]),
        }
    }

    /// Removes terminal records whose `completed_at` is older than
    /// `ttl_seconds` (spec §4.G persistence contract).
    pub fn cleanup(&self, ttl_seconds: i64) {
        let cutoff = Utc::now() - chrono::Duration::seconds(ttl_seconds);
        let mut table = self.inner.lock().unwrap();
        table.retain(|_, r| !(r.status.is_terminal() && r.completed_at.map(|c| c < cutoff).unwrap_or(false)));
    }

    pub fn snapshot(&self) -> Vec<RunRecord> {
        self.inner.lock().unwrap().values().cloned().collect()
    }

    /// Crash recovery: every record still `running` at process start is
    /// rewritten to `lost` (spec §4.G persistence contract). Called once
    /// after loading records from disk.
    pub fn recover_from_crash(&self) {
        let running_ids: Vec<String> = self
            .inner
            .lock()
            .unwrap()
            .values()
            .filter(|r| r.status == RunStatus::Running)
            .map(|r| r.id.clone())
            .collect();
        for id in running_ids {
            let _ = self.mark_lost(&id);
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn graph() -> RunGraph {
        RunGraph::new()
    }

    #[test]
    fn new_run_starts_queued_and_get_roundtrips() {
        let g = graph();
        let id = g.new_run(NewRunAttrs { run_type: "task".into(), ..Default::default() });
        let r = g.get(&id).unwrap();
        assert_eq!(r.status, RunStatus::Queued);
    }

    #[test]
    fn mark_running_then_finish_succeeds_forward() {
        let g = graph();
        let id = g.new_run(NewRunAttrs::default());
        g.mark_running(&id).unwrap();
        g.finish(&id, serde_json::json!({"ok": true})).unwrap();
        let r = g.get(&id).unwrap();
        assert_eq!(r.status, RunStatus::Completed);
        assert!(r.result.is_some());
        assert!(r.completed_at.is_some());
    }

    #[test]
    fn rank_regression_is_rejected() {
        let g = graph();
        let id = g.new_run(NewRunAttrs::default());
        g.mark_running(&id).unwrap();
        g.finish(&id, serde_json::Value::Null).unwrap();
        // Terminal is a sink: a second, different terminal status must fail.
        let err = g.fail(&id, "too late").unwrap_err();
        assert!(matches!(err, RunGraphError::InvalidTransition { .. }));
    }

    #[test]
    fn concurrent_mark_running_exactly_one_wins() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::thread;

        let g = graph();
        let id = g.new_run(NewRunAttrs::default());
        let ok_count = Arc::new(AtomicUsize::new(0));
        let err_count = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..50)
            .map(|_| {
                let g = g.clone();
                let id = id.clone();
                let ok_count = ok_count.clone();
                let err_count = err_count.clone();
                thread::spawn(move || match g.mark_running(&id) {
                    Ok(()) => {
                        ok_count.fetch_add(1, Ordering::SeqCst);
                    }
                    Err(_) => {
                        err_count.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(ok_count.load(Ordering::SeqCst), 1);
        assert_eq!(err_count.load(Ordering::SeqCst), 49);
        assert_eq!(g.get(&id).unwrap().status, RunStatus::Running);
    }

    #[test]
    fn add_child_prepends_in_reverse_insertion_order() {
        let g = graph();
        let parent = g.new_run(NewRunAttrs::default());
        let c1 = g.new_run(NewRunAttrs::default());
        let c2 = g.new_run(NewRunAttrs::default());
        g.add_child(&parent, &c1).unwrap();
        g.add_child(&parent, &c2).unwrap();
        let p = g.get(&parent).unwrap();
        assert_eq!(p.children, vec![c2, c1]);
    }

    #[test]
    fn add_child_unknown_parent_not_found() {
        let g = graph();
        let c1 = g.new_run(NewRunAttrs::default());
        assert!(matches!(g.add_child("nope", &c1), Err(RunGraphError::NotFound(_))));
    }

    #[tokio::test]
    async fn await_ids_wakes_on_state_change_within_timeout() {
        let g = graph();
        let id = g.new_run(NewRunAttrs::default());
        g.mark_running(&id).unwrap();

        let g2 = g.clone();
        let id2 = id.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            g2.finish(&id2, serde_json::json!({"result": "done"})).unwrap();
        });

        let start = tokio::time::Instant::now();
        let records = g.await_ids(&[id.clone()], WaitMode::WaitAll, 5_000).await.unwrap();
        assert!(start.elapsed() < Duration::from_millis(200));
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, RunStatus::Completed);
    }

    #[tokio::test]
    async fn await_ids_times_out_when_never_terminal() {
        let g = graph();
        let id = g.new_run(NewRunAttrs::default());
        let err = g.await_ids(&[id], WaitMode::WaitAll, 30).await.unwrap_err();
        assert!(matches!(err, RunGraphError::Timeout));
    }

    #[tokio::test]
    async fn await_ids_wait_any_returns_first_terminal() {
        let g = graph();
        let a = g.new_run(NewRunAttrs::default());
        let b = g.new_run(NewRunAttrs::default());
        g.mark_running(&a).unwrap();
        g.mark_running(&b).unwrap();
        g.finish(&a, serde_json::Value::Null).unwrap();

        let records = g.await_ids(&[a.clone(), b.clone()], WaitMode::WaitAny, 1_000).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, a);
    }

    #[test]
    fn cleanup_removes_old_terminal_records_only() {
        let g = graph();
        let id = g.new_run(NewRunAttrs::default());
        g.finish(&id, serde_json::Value::Null).unwrap();
        {
            let mut table = g.inner.lock().unwrap();
            table.get_mut(&id).unwrap().completed_at = Some(Utc::now() - chrono::Duration::days(2));
        }
        let still_running = g.new_run(NewRunAttrs::default());
        g.mark_running(&still_running).unwrap();

        g.cleanup(3600);
        assert!(g.get(&id).is_none());
        assert!(g.get(&still_running).is_some());
    }

    #[test]
    fn recover_from_crash_rewrites_running_to_lost() {
        let g = graph();
        let id = g.new_run(NewRunAttrs::default());
        g.mark_running(&id).unwrap();
        g.recover_from_crash();
        let r = g.get(&id).unwrap();
        assert_eq!(r.status, RunStatus::Lost);
        assert_eq!(r.error.as_deref(), Some("lost_on_restart"));
    }
}

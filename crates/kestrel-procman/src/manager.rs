// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::io::Write as _;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{broadcast, Notify};
use tracing::debug;

use kestrel_config::ProcessConfig;

use crate::record::{LogRing, ProcessRecord, ProcessStatus};
use crate::sanitize::sanitize;
use crate::ProcessError;

/// Signal requested by a `kill` call (spec §4.H). Without a process-signalling
/// crate beyond `libc` in the workspace, both variants resolve to the same
/// `libc::kill` call with a different signal number on unix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillSignal {
    Sigterm,
    Sigkill,
}

/// Outcome of `exec_sync` (spec §4.H).
pub enum ExecSyncOutcome {
    /// Completed within `timeout_ms`.
    Result(PolledResult),
    /// Still running at `yield_ms`; continues in the background under `id`.
    Spawned(String),
}

/// Snapshot returned by `poll`.
#[derive(Debug, Clone)]
pub struct PolledResult {
    pub id: String,
    pub status: ProcessStatus,
    pub exit_code: Option<i32>,
    pub cancelled: bool,
    pub log_tail: Vec<String>,
    pub full_output_path: Option<String>,
}

/// Runtime-only state not persisted with the record: the stdin pipe, the
/// update broadcaster, and the completion notifier.
struct RuntimeEntry {
    stdin: Option<ChildStdin>,
    updates: broadcast::Sender<String>,
    completed: Arc<Notify>,
    cancel_requested: Arc<AtomicBool>,
}

/// Tracks long-lived external child processes (spec §4.H). Cloning shares
/// the underlying tables — the same owns-a-shared-table-behind-typed-methods
/// idiom `RunGraph` uses, generalized with `Arc` since background pump tasks
/// must reach back into the table independently of any caller.
#[derive(Clone)]
pub struct ProcessManager {
    records: Arc<Mutex<HashMap<String, ProcessRecord>>>,
    runtime: Arc<Mutex<HashMap<String, RuntimeEntry>>>,
    cfg: ProcessConfig,
}

impl ProcessManager {
    pub fn new(cfg: ProcessConfig) -> Self {
        Self { records: Arc::new(Mutex::new(HashMap::new())), runtime: Arc::new(Mutex::new(HashMap::new())), cfg }
    }

    fn new_id(&self) -> String {
        let records = self.records.lock().unwrap();
        loop {
            let candidate = uuid::Uuid::new_v4().simple().to_string()[..12].to_string();
            if !records.contains_key(&candidate) {
                return candidate;
            }
        }
    }

    /// Start a command asynchronously; returns once spawned and running.
    pub async fn exec(
        &self,
        command: &str,
        cwd: Option<&str>,
        env: HashMap<String, String>,
    ) -> Result<String, ProcessError> {
        let id = self.new_id();

        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command);
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }
        for (k, v) in &env {
            cmd.env(k, v);
        }
        cmd.stdin(std::process::Stdio::piped());
        cmd.stdout(std::process::Stdio::piped());
        cmd.stderr(std::process::Stdio::piped());

        let mut child = cmd.spawn()?;
        let os_pid = child.id();
        let stdin = child.stdin.take();

        let mut record = ProcessRecord::new(id.clone(), command.to_string(), cwd.map(String::from), env, self.cfg.max_lines);
        record.os_pid = os_pid;
        self.records.lock().unwrap().insert(id.clone(), record);

        let (tx, _rx) = broadcast::channel(256);
        let completed = Arc::new(Notify::new());
        let cancel_requested = Arc::new(AtomicBool::new(false));
        self.runtime.lock().unwrap().insert(
            id.clone(),
            RuntimeEntry { stdin, updates: tx.clone(), completed: completed.clone(), cancel_requested: cancel_requested.clone() },
        );

        debug!(id = %id, command, "procman: spawned");
        self.spawn_pump(id.clone(), child, tx, completed, cancel_requested);
        Ok(id)
    }

    fn spawn_pump(
        &self,
        id: String,
        mut child: Child,
        updates: broadcast::Sender<String>,
        completed: Arc<Notify>,
        cancel_requested: Arc<AtomicBool>,
    ) {
        let records = self.records.clone();
        let runtime = self.runtime.clone();
        let max_bytes = self.cfg.max_bytes;

        tokio::spawn(async move {
            let mut stdout = child.stdout.take();
            let mut stderr = child.stderr.take();
            let mut out_buf = [0u8; 4096];
            let mut err_buf = [0u8; 4096];
            let mut stdout_done = stdout.is_none();
            let mut stderr_done = stderr.is_none();
            let mut spill_file: Option<std::fs::File> = None;

            while !stdout_done || !stderr_done {
                tokio::select! {
                    res = async { stdout.as_mut().unwrap().read(&mut out_buf).await }, if !stdout_done => {
                        match res {
                            Ok(0) | Err(_) => stdout_done = true,
                            Ok(n) => Self::ingest_chunk(&records, &id, &updates, max_bytes, &mut spill_file, &out_buf[..n]),
                        }
                    }
                    res = async { stderr.as_mut().unwrap().read(&mut err_buf).await }, if !stderr_done => {
                        match res {
                            Ok(0) | Err(_) => stderr_done = true,
                            Ok(n) => Self::ingest_chunk(&records, &id, &updates, max_bytes, &mut spill_file, &err_buf[..n]),
                        }
                    }
                }
            }

            let status = child.wait().await;
            let cancelled = cancel_requested.load(Ordering::SeqCst);
            let existing = { records.lock().unwrap().get(&id).cloned() };
            if let Some(mut record) = existing {
                let (new_status, exit_code) = match status {
                    _ if cancelled => (ProcessStatus::Killed, None),
                    Ok(s) => match s.code() {
                        Some(0) => (ProcessStatus::Completed, Some(0)),
                        Some(code) => (ProcessStatus::Error, Some(code)),
                        None => (ProcessStatus::Killed, None),
                    },
                    Err(_) => (ProcessStatus::Error, None),
                };
                record.status = new_status;
                record.exit_code = exit_code;
                record.cancelled = cancelled;
                record.completed_at = Some(chrono::Utc::now());
                records.lock().unwrap().insert(id.clone(), record);
            }
            runtime.lock().unwrap().remove(&id);
            completed.notify_waiters();
        });
    }

    fn ingest_chunk(
        records: &Arc<Mutex<HashMap<String, ProcessRecord>>>,
        id: &str,
        updates: &broadcast::Sender<String>,
        max_bytes: usize,
        spill_file: &mut Option<std::fs::File>,
        raw: &[u8],
    ) {
        let text = String::from_utf8_lossy(raw).into_owned();
        let clean = sanitize(&text);

        let mut records = records.lock().unwrap();
        if let Some(record) = records.get_mut(id) {
            if record.log.total_bytes + clean.len() > max_bytes && spill_file.is_none() {
                let path = std::env::temp_dir().join(format!("kestrel-proc-{id}.log"));
                if let Ok(f) = std::fs::File::create(&path) {
                    *spill_file = Some(f);
                    record.log.full_output_path = Some(path.display().to_string());
                }
            }
            if let Some(f) = spill_file {
                let _ = f.write_all(clean.as_bytes());
            }
            record.log.push(&clean);
        }
        drop(records);
        let _ = updates.send(clean);
    }

    /// Run synchronously up to `timeout_ms`; see spec §4.H for the
    /// `yield_ms` early-return-to-background behavior.
    pub async fn exec_sync(
        &self,
        command: &str,
        cwd: Option<&str>,
        env: HashMap<String, String>,
        timeout_ms: Option<u64>,
        yield_ms: Option<u64>,
    ) -> Result<ExecSyncOutcome, ProcessError> {
        let id = self.exec(command, cwd, env).await?;
        let timeout = Duration::from_millis(timeout_ms.unwrap_or(30_000));

        let wait_for = |mgr: &Self, id: &str| {
            let notify = mgr.runtime.lock().unwrap().get(id).map(|r| r.completed.clone());
            notify
        };

        match yield_ms {
            Some(y) if y > 0 => {
                let yield_dur = Duration::from_millis(y).min(timeout);
                if self.poll(&id, None).map(|r| r.status != ProcessStatus::Running).unwrap_or(true) {
                    return Ok(ExecSyncOutcome::Result(self.poll(&id, None)?));
                }
                let notify = wait_for(self, &id);
                match notify {
                    Some(n) => match tokio::time::timeout(yield_dur, n.notified()).await {
                        Ok(_) => Ok(ExecSyncOutcome::Result(self.poll(&id, None)?)),
                        Err(_) => Ok(ExecSyncOutcome::Spawned(id)),
                    },
                    None => Ok(ExecSyncOutcome::Result(self.poll(&id, None)?)),
                }
            }
            _ => {
                if self.poll(&id, None).map(|r| r.status != ProcessStatus::Running).unwrap_or(true) {
                    return Ok(ExecSyncOutcome::Result(self.poll(&id, None)?));
                }
                let notify = wait_for(self, &id);
                match notify {
                    Some(n) => match tokio::time::timeout(timeout, n.notified()).await {
                        Ok(_) => Ok(ExecSyncOutcome::Result(self.poll(&id, None)?)),
                        Err(_) => {
                            let _ = self.kill(&id, KillSignal::Sigkill).await;
                            Err(ProcessError::Timeout(id))
                        }
                    },
                    None => Ok(ExecSyncOutcome::Result(self.poll(&id, None)?)),
                }
            }
        }
    }

    /// Tail-truncated view of a process's current state.
    pub fn poll(&self, id: &str, lines: Option<usize>) -> Result<PolledResult, ProcessError> {
        let records = self.records.lock().unwrap();
        let record = records.get(id).ok_or_else(|| ProcessError::NotFound(id.to_string()))?;
        Ok(PolledResult {
            id: record.id.clone(),
            status: record.status,
            exit_code: record.exit_code,
            cancelled: record.cancelled,
            log_tail: record.log.tail(lines.or(Some(self.cfg.max_lines))),
            full_output_path: record.log.full_output_path.clone(),
        })
    }

    pub fn logs(&self, id: &str) -> Result<Vec<String>, ProcessError> {
        Ok(self.poll(id, None)?.log_tail)
    }

    /// Subscribe to sanitized output chunks as they arrive.
    pub fn subscribe(&self, id: &str) -> Result<broadcast::Receiver<String>, ProcessError> {
        let runtime = self.runtime.lock().unwrap();
        let entry = runtime.get(id).ok_or_else(|| ProcessError::NotFound(id.to_string()))?;
        Ok(entry.updates.subscribe())
    }

    /// Feed `data` to the process's stdin.
    pub async fn write(&self, id: &str, data: &[u8]) -> Result<(), ProcessError> {
        let stdin = {
            let mut runtime = self.runtime.lock().unwrap();
            let entry = runtime.get_mut(id).ok_or_else(|| ProcessError::NotFound(id.to_string()))?;
            entry.stdin.take()
        };
        let mut stdin = match stdin {
            Some(s) => s,
            None => return Err(ProcessError::NotFound(id.to_string())),
        };
        let result = stdin.write_all(data).await;
        if let Some(entry) = self.runtime.lock().unwrap().get_mut(id) {
            entry.stdin = Some(stdin);
        }
        result.map_err(ProcessError::Io)
    }

    /// Send `signal` to the process's OS pid.
    pub async fn kill(&self, id: &str, signal: KillSignal) -> Result<(), ProcessError> {
        let os_pid = {
            let records = self.records.lock().unwrap();
            let record = records.get(id).ok_or_else(|| ProcessError::NotFound(id.to_string()))?;
            record.os_pid
        };
        if let Some(entry) = self.runtime.lock().unwrap().get(id) {
            entry.cancel_requested.store(true, Ordering::SeqCst);
        }
        if let Some(pid) = os_pid {
            send_signal(pid, signal);
        }
        Ok(())
    }

    /// Remove a single terminal record from the table.
    pub fn clear(&self, id: &str) -> Result<(), ProcessError> {
        let mut records = self.records.lock().unwrap();
        match records.get(id) {
            Some(r) if r.status == ProcessStatus::Running => Err(ProcessError::NotFound(id.to_string())),
            Some(_) => {
                records.remove(id);
                Ok(())
            }
            None => Err(ProcessError::NotFound(id.to_string())),
        }
    }

    /// Remove every terminal record completed more than `ttl_seconds` ago.
    pub fn clear_old(&self, ttl_seconds: i64) {
        let cutoff = chrono::Utc::now() - chrono::Duration::seconds(ttl_seconds);
        let mut records = self.records.lock().unwrap();
        records.retain(|_, r| r.status == ProcessStatus::Running || r.completed_at.map(|t| t > cutoff).unwrap_or(true));
    }

    pub fn list(&self, status_filter: Option<ProcessStatus>) -> Vec<ProcessRecord> {
        let records = self.records.lock().unwrap();
        records.values().filter(|r| status_filter.map(|s| s == r.status).unwrap_or(true)).cloned().collect()
    }

    pub fn active_count(&self) -> usize {
        let records = self.records.lock().unwrap();
        records.values().filter(|r| r.status == ProcessStatus::Running).count()
    }
}

#[cfg(unix)]
fn send_signal(pid: u32, signal: KillSignal) {
    let sig = match signal {
        KillSignal::Sigterm => libc::SIGTERM,
        KillSignal::Sigkill => libc::SIGKILL,
    };
    unsafe {
        libc::kill(pid as i32, sig);
    }
}

#[cfg(not(unix))]
fn send_signal(_pid: u32, _signal: KillSignal) {}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> ProcessManager {
        ProcessManager::new(ProcessConfig { max_bytes: 200_000, max_lines: 2_000, ttl_seconds: 86_400 })
    }

    #[tokio::test]
    async fn exec_runs_and_completes_successfully() {
        let mgr = manager();
        let id = mgr.exec("echo hello", None, Default::default()).await.unwrap();
        for _ in 0..50 {
            if mgr.poll(&id, None).unwrap().status != ProcessStatus::Running {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let result = mgr.poll(&id, None).unwrap();
        assert_eq!(result.status, ProcessStatus::Completed);
        assert_eq!(result.exit_code, Some(0));
        assert!(result.log_tail.iter().any(|l| l.contains("hello")));
    }

    #[tokio::test]
    async fn exec_nonzero_exit_is_error_status() {
        let mgr = manager();
        let id = mgr.exec("exit 3", None, Default::default()).await.unwrap();
        for _ in 0..50 {
            if mgr.poll(&id, None).unwrap().status != ProcessStatus::Running {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let result = mgr.poll(&id, None).unwrap();
        assert_eq!(result.status, ProcessStatus::Error);
        assert_eq!(result.exit_code, Some(3));
    }

    #[tokio::test]
    async fn exec_sync_returns_result_for_fast_command() {
        let mgr = manager();
        match mgr.exec_sync("echo fast", None, Default::default(), Some(5_000), None).await.unwrap() {
            ExecSyncOutcome::Result(r) => assert_eq!(r.status, ProcessStatus::Completed),
            ExecSyncOutcome::Spawned(_) => panic!("expected immediate completion"),
        }
    }

    #[tokio::test]
    async fn exec_sync_yields_process_id_for_slow_command() {
        let mgr = manager();
        match mgr.exec_sync("sleep 5", None, Default::default(), Some(5_000), Some(30)).await.unwrap() {
            ExecSyncOutcome::Spawned(id) => {
                mgr.kill(&id, KillSignal::Sigkill).await.unwrap();
            }
            ExecSyncOutcome::Result(_) => panic!("sleep should not finish within 30ms"),
        }
    }

    #[tokio::test]
    async fn exec_sync_times_out_and_kills_without_yield() {
        let mgr = manager();
        let result = mgr.exec_sync("sleep 5", None, Default::default(), Some(50), None).await;
        assert!(matches!(result, Err(ProcessError::Timeout(_))));
    }

    #[tokio::test]
    async fn kill_marks_process_killed_and_cancelled() {
        let mgr = manager();
        let id = mgr.exec("sleep 5", None, Default::default()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        mgr.kill(&id, KillSignal::Sigkill).await.unwrap();
        for _ in 0..50 {
            if mgr.poll(&id, None).unwrap().status != ProcessStatus::Running {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let result = mgr.poll(&id, None).unwrap();
        assert_eq!(result.status, ProcessStatus::Killed);
        assert!(result.exit_code.is_none());
        assert!(result.cancelled);
    }

    #[tokio::test]
    async fn poll_unknown_id_is_not_found() {
        let mgr = manager();
        assert!(matches!(mgr.poll("nope", None), Err(ProcessError::NotFound(_))));
    }

    #[tokio::test]
    async fn list_filters_by_status() {
        let mgr = manager();
        mgr.exec("echo a", None, Default::default()).await.unwrap();
        let id2 = mgr.exec("sleep 5", None, Default::default()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        let running = mgr.list(Some(ProcessStatus::Running));
        assert!(running.iter().any(|r| r.id == id2));
        mgr.kill(&id2, KillSignal::Sigkill).await.unwrap();
    }

    #[tokio::test]
    async fn active_count_reflects_running_processes() {
        let mgr = manager();
        assert_eq!(mgr.active_count(), 0);
        let id = mgr.exec("sleep 5", None, Default::default()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(mgr.active_count(), 1);
        mgr.kill(&id, KillSignal::Sigkill).await.unwrap();
    }
}

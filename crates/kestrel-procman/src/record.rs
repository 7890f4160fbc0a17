// SPDX-License-Identifier: Apache-2.0
use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// Status of a tracked child process (spec §3.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessStatus {
    Running,
    Completed,
    Error,
    Killed,
}

/// A bounded ring of log lines, oldest dropped first once `capacity` lines
/// have accumulated. Mirrors `run_terminal_command`'s tail-truncation but
/// keeps the tail incrementally instead of truncating one big buffer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogRing {
    lines: VecDeque<String>,
    capacity: usize,
    /// Total bytes ever pushed, including lines since evicted.
    pub total_bytes: usize,
    /// Set once `total_bytes` exceeds the configured spill threshold; the
    /// full raw output lives at this path instead of only in memory.
    pub full_output_path: Option<String>,
}

impl LogRing {
    pub fn new(capacity: usize) -> Self {
        Self { lines: VecDeque::new(), capacity, total_bytes: 0, full_output_path: None }
    }

    pub fn push_line(&mut self, line: &str) {
        self.total_bytes += line.len() + 1;
        self.lines.push_back(line.to_string());
        while self.lines.len() > self.capacity {
            self.lines.pop_front();
        }
    }

    pub fn push(&mut self, chunk: &str) {
        for line in chunk.split_inclusive('\n') {
            self.push_line(line.trim_end_matches('\n'));
        }
    }

    pub fn tail(&self, lines: Option<usize>) -> Vec<String> {
        let n = lines.unwrap_or(self.lines.len()).min(self.lines.len());
        self.lines.iter().rev().take(n).rev().cloned().collect()
    }
}

/// A tracked external process (spec §3.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessRecord {
    pub id: String,
    pub command: String,
    pub cwd: Option<String>,
    pub env: std::collections::HashMap<String, String>,
    pub os_pid: Option<u32>,
    pub status: ProcessStatus,
    pub exit_code: Option<i32>,
    /// Set iff the process was terminated by a `kill`/timeout rather than
    /// exiting on its own (§4.H exit-code policy).
    pub cancelled: bool,
    pub inserted_at: chrono::DateTime<chrono::Utc>,
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
    pub log: LogRing,
}

impl ProcessRecord {
    pub fn new(
        id: String,
        command: String,
        cwd: Option<String>,
        env: std::collections::HashMap<String, String>,
        max_lines: usize,
    ) -> Self {
        Self {
            id,
            command,
            cwd,
            env,
            os_pid: None,
            status: ProcessStatus::Running,
            exit_code: None,
            cancelled: false,
            inserted_at: chrono::Utc::now(),
            completed_at: None,
            log: LogRing::new(max_lines),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_ring_evicts_oldest_past_capacity() {
        let mut ring = LogRing::new(2);
        ring.push_line("a");
        ring.push_line("b");
        ring.push_line("c");
        assert_eq!(ring.tail(None), vec!["b".to_string(), "c".to_string()]);
    }

    #[test]
    fn log_ring_push_splits_multiline_chunks() {
        let mut ring = LogRing::new(10);
        ring.push("one\ntwo\nthree");
        assert_eq!(ring.tail(None), vec!["one", "two", "three"]);
    }

    #[test]
    fn tail_respects_requested_line_count() {
        let mut ring = LogRing::new(10);
        ring.push("a\nb\nc\nd");
        assert_eq!(ring.tail(Some(2)), vec!["c".to_string(), "d".to_string()]);
    }

    #[test]
    fn new_record_starts_running_with_no_exit_code() {
        let r = ProcessRecord::new("p1".into(), "echo hi".into(), None, Default::default(), 100);
        assert_eq!(r.status, ProcessStatus::Running);
        assert!(r.exit_code.is_none());
        assert!(!r.cancelled);
    }
}

// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A run's lifecycle status (spec §3.4). The number documented alongside
/// each variant in the spec is the **terminal rank**: `queued` = 0,
/// `running` = 1, every terminal state = 2. A status may only move to a
/// strictly greater rank; once at rank 2 it is a sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    Running,
    Completed,
    Error,
    Killed,
    Cancelled,
    Lost,
    Unknown,
}

impl RunStatus {
    pub fn rank(self) -> u8 {
        match self {
            RunStatus::Queued => 0,
            RunStatus::Running => 1,
            _ => 2,
        }
    }

    pub fn is_terminal(self) -> bool {
        self.rank() == 2
    }
}

/// One node in the `RunGraph` table (spec §3.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: String,
    pub status: RunStatus,
    pub parent: Option<String>,
    /// Prepended on `add_child`, so this is in reverse-insertion order.
    pub children: Vec<String>,
    #[serde(rename = "type")]
    pub run_type: String,
    pub description: String,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    pub inserted_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// Attributes supplied to `RunGraph::new_run`.
#[derive(Debug, Clone, Default)]
pub struct NewRunAttrs {
    pub run_type: String,
    pub description: String,
    pub parent: Option<String>,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl RunRecord {
    pub fn new(id: String, attrs: NewRunAttrs) -> Self {
        let now = Utc::now();
        Self {
            id,
            status: RunStatus::Queued,
            parent: attrs.parent,
            children: Vec::new(),
            run_type: attrs.run_type,
            description: attrs.description,
            result: None,
            error: None,
            metadata: attrs.metadata,
            inserted_at: now,
            started_at: None,
            completed_at: None,
            updated_at: now,
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rank_orders_queued_running_terminal() {
        assert!(RunStatus::Queued.rank() < RunStatus::Running.rank());
        assert!(RunStatus::Running.rank() < RunStatus::Completed.rank());
    }

    #[test]
    fn all_terminal_variants_share_rank_two() {
        for s in [RunStatus::Completed, RunStatus::Error, RunStatus::Killed, RunStatus::Cancelled, RunStatus::Lost, RunStatus::Unknown] {
            assert_eq!(s.rank(), 2);
            assert!(s.is_terminal());
        }
    }

    #[test]
    fn queued_and_running_are_not_terminal() {
        assert!(!RunStatus::Queued.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
    }

    #[test]
    fn new_run_record_starts_queued() {
        let r = RunRecord::new("r1".into(), NewRunAttrs { run_type: "task".into(), ..Default::default() });
        assert_eq!(r.status, RunStatus::Queued);
        assert!(r.children.is_empty());
        assert!(r.started_at.is_none());
    }
}

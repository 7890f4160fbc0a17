// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entry::{Entry, EntryKind, MessageContent, MessageRole, PendingEntry, ThinkingLevel};
use crate::SessionError;

/// Header of a session file (spec §3.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionHeader {
    pub id: String,
    pub version: u32,
    pub cwd: String,
    pub parent_session: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Current on-disk format version. `SessionLog::load` migrates older
/// headers up to this version.
pub const CURRENT_VERSION: u32 = 1;

/// Model settings derived from the active branch (spec §4.A "context
/// materialization rules").
#[derive(Debug, Clone)]
pub struct Context {
    pub messages: Vec<kestrel_model::Message>,
    pub thinking_level: ThinkingLevel,
    pub model: Option<(String, String)>,
}

/// In-memory indexed log of session entries forming a tree (spec §4.A).
#[derive(Debug, Clone)]
pub struct EntryStore {
    pub header: SessionHeader,
    entries: Vec<Entry>,
    by_id: HashMap<String, usize>,
    leaf_id: Option<String>,
}

impl EntryStore {
    pub fn new(cwd: impl Into<String>) -> Self {
        Self::with_parent(cwd, None)
    }

    pub fn with_parent(cwd: impl Into<String>, parent_session: Option<String>) -> Self {
        Self {
            header: SessionHeader {
                id: new_id(&HashMap::new()),
                version: CURRENT_VERSION,
                cwd: cwd.into(),
                parent_session,
                timestamp: Utc::now(),
            },
            entries: Vec::new(),
            by_id: HashMap::new(),
            leaf_id: None,
        }
    }

    /// Reconstruct a store from a header and an ordered entry list, as done
    /// after `SessionLog::load`. Rebuilds `by_id`; `leaf_id` is left unset
    /// for the caller to compute (see §4.C loading behavior).
    pub fn from_parts(header: SessionHeader, entries: Vec<Entry>) -> Result<Self, SessionError> {
        let mut by_id = HashMap::with_capacity(entries.len());
        for (idx, e) in entries.iter().enumerate() {
            if by_id.insert(e.id.clone(), idx).is_some() {
                return Err(SessionError::IdCollision(e.id.clone()));
            }
        }
        Ok(Self { header, entries, by_id, leaf_id: None })
    }

    pub fn leaf_id(&self) -> Option<&str> {
        self.leaf_id.as_deref()
    }

    pub fn set_leaf_id(&mut self, id: Option<String>) -> Result<(), SessionError> {
        if let Some(ref id) = id {
            if !self.by_id.contains_key(id) {
                return Err(SessionError::NotFound(id.clone()));
            }
        }
        self.leaf_id = id;
        Ok(())
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn get_entry(&self, id: &str) -> Option<&Entry> {
        self.by_id.get(id).map(|&idx| &self.entries[idx])
    }

    /// Children of `parent`, in insertion order; `None` yields roots.
    pub fn get_children(&self, parent: Option<&str>) -> Vec<&Entry> {
        self.entries.iter().filter(|e| e.parent_id.as_deref() == parent).collect()
    }

    /// Entries with no children — the tree's leaves.
    pub fn leaves(&self) -> Vec<&Entry> {
        self.entries
            .iter()
            .filter(|e| !self.entries.iter().any(|o| o.parent_id.as_deref() == Some(e.id.as_str())))
            .collect()
    }

    /// Appends `pending`, assigning `id`/`parent_id`/`timestamp` where
    /// unset, and advances `leaf_id` to the new entry (spec §4.A
    /// `append_entry`).
    pub fn append_entry(&mut self, pending: PendingEntry) -> Result<&Entry, SessionError> {
        let id = match pending.id {
            Some(id) => {
                if self.by_id.contains_key(&id) {
                    return Err(SessionError::IdCollision(id));
                }
                id
            }
            None => new_id(&self.by_id),
        };
        let parent_id = pending.parent_id.or_else(|| self.leaf_id.clone());
        if let Some(ref p) = parent_id {
            if !self.by_id.contains_key(p) {
                tracing::warn!(parent = %p, "append_entry: parent_id does not resolve, entry becomes a root");
            }
        }
        let timestamp = pending.timestamp.unwrap_or_else(Utc::now);

        let entry = Entry { id: id.clone(), parent_id, timestamp, kind: pending.kind };
        self.entries.push(entry);
        let idx = self.entries.len() - 1;
        self.by_id.insert(id.clone(), idx);
        self.leaf_id = Some(id);
        Ok(&self.entries[idx])
    }

    /// Sugar for a `Message` entry, always auto-linked to the current leaf.
    pub fn append_message(&mut self, role: MessageRole, content: MessageContent) -> Result<&Entry, SessionError> {
        self.append_entry(Entry::pending(EntryKind::Message {
            role,
            content,
            metadata: serde_json::Value::Null,
        }))
    }

    pub fn append_compaction(
        &mut self,
        summary: impl Into<String>,
        first_kept_entry_id: Option<String>,
        tokens_before: usize,
        details: serde_json::Value,
    ) -> Result<&Entry, SessionError> {
        self.append_entry(Entry::pending(EntryKind::Compaction {
            summary: summary.into(),
            first_kept_entry_id,
            tokens_before,
            details,
        }))
    }

    /// Root-first walk from `from` (or the current `leaf_id`) to the root.
    /// Stops and returns the truncated path if a `parent_id` fails to
    /// resolve (spec §4.A, testable property 1).
    pub fn get_branch(&self, from: Option<&str>) -> Vec<&Entry> {
        let start = from.or(self.leaf_id.as_deref());
        let mut path = Vec::new();
        let mut cursor = start;
        while let Some(id) = cursor {
            match self.get_entry(id) {
                Some(e) => {
                    path.push(e);
                    cursor = e.parent_id.as_deref();
                }
                None => break,
            }
        }
        path.reverse();
        path
    }

    /// Materialize the LM-visible message list plus thinking level and
    /// model settings from the active branch (spec §4.A).
    pub fn build_context(&self) -> Context {
        self.build_context_from(self.leaf_id.as_deref())
    }

    pub fn build_context_from(&self, leaf: Option<&str>) -> Context {
        let branch = self.get_branch(leaf);

        let compaction_idx = branch.iter().rposition(|e| matches!(e.kind, EntryKind::Compaction { .. }));

        let mut thinking_level = ThinkingLevel::default();
        let mut model: Option<(String, String)> = None;
        for e in &branch {
            match &e.kind {
                EntryKind::ThinkingLevelChange { level } => thinking_level = *level,
                EntryKind::ModelChange { provider, model_id } => {
                    model = Some((provider.clone(), model_id.clone()))
                }
                _ => {}
            }
        }

        let mut messages = Vec::new();

        // Entries from `first_kept_entry_id` onward survive verbatim; the
        // Compaction entry itself is metadata, already excluded by the
        // materialization match below, and appears at or after that index.
        let retained_from = match compaction_idx {
            Some(idx) => {
                if let EntryKind::Compaction { summary, first_kept_entry_id, .. } = &branch[idx].kind {
                    messages.push(kestrel_model::Message::user(format!("[compaction summary]\n{summary}")));
                    first_kept_entry_id
                        .as_deref()
                        .and_then(|kept| branch.iter().position(|e| e.id == kept))
                        .unwrap_or(idx + 1)
                } else {
                    unreachable!("compaction_idx only matches Compaction entries")
                }
            }
            None => 0,
        };
        for e in &branch[retained_from..] {
            match &e.kind {
                EntryKind::Message { role, content, .. } => {
                    messages.push(entry_message(*role, content));
                }
                EntryKind::CustomMessage { content, .. } => {
                    messages.push(kestrel_model::Message::user(content.as_text()));
                }
                EntryKind::BranchSummary { summary, .. } => {
                    messages.push(kestrel_model::Message::user(format!("[branch summary]\n{summary}")));
                }
                EntryKind::ThinkingLevelChange { .. }
                | EntryKind::ModelChange { .. }
                | EntryKind::Label { .. }
                | EntryKind::SessionInfo { .. }
                | EntryKind::Custom { .. }
                | EntryKind::Compaction { .. } => {}
            }
        }

        Context { messages, thinking_level, model }
    }
}

fn entry_message(role: MessageRole, content: &MessageContent) -> kestrel_model::Message {
    let text = content.as_text();
    match role {
        MessageRole::User | MessageRole::BashExecution | MessageRole::Custom => {
            kestrel_model::Message::user(text)
        }
        MessageRole::Assistant => kestrel_model::Message::assistant(text),
        MessageRole::ToolResult => kestrel_model::Message::tool_result("unknown", text),
        MessageRole::BranchSummary | MessageRole::CompactionSummary => kestrel_model::Message::user(text),
    }
}

/// Uniformly random 8+ char hex id, rejection-sampled against `existing`
/// (spec §4.A "Id generation"). Built from a UUIDv4's hex digits rather than
/// a bare RNG, following the teacher's use of `uuid` for id generation
/// throughout (`Session::new`, run/process ids).
fn new_id(existing: &HashMap<String, usize>) -> String {
    loop {
        let full = uuid::Uuid::new_v4().simple().to_string();
        let candidate = full[..8].to_string();
        if !existing.contains_key(&candidate) {
            return candidate;
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

// SPDX-License-Identifier: Apache-2.0
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use kestrel_config::ThinkingLevel;

/// Role an entry's `Message` content was produced under. Distinct from
/// `kestrel_model::Role`: this set additionally distinguishes
/// `bash_execution`, `branch_summary` and `compaction_summary` results that
/// the model-facing wire protocol never sees directly (they are flattened
/// into plain text/user-role messages at context-build time).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
    ToolResult,
    BashExecution,
    Custom,
    BranchSummary,
    CompactionSummary,
}

/// One item in an ordered content-block sequence (spec §3.2). Producers
/// preserve block order; text extraction skips non-textual blocks and joins
/// the rest with `\n`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ContentBlock {
    Text { text: String },
    Image { data: String, mime_type: String },
    Thinking { thinking: String },
    ToolCall { id: String, name: String, arguments: String },
}

/// A message payload: either a plain string or an ordered block sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

impl MessageContent {
    pub fn text(s: impl Into<String>) -> Self {
        MessageContent::Text(s.into())
    }

    /// Plain-text view, joining textual blocks with `\n` and skipping the
    /// rest. Used by `build_context` when flattening entries into model
    /// messages.
    pub fn as_text(&self) -> String {
        match self {
            MessageContent::Text(t) => t.clone(),
            MessageContent::Blocks(blocks) => blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

/// The closed set of entry payload kinds (spec §3.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[allow(clippy::large_enum_variant)]
pub enum EntryKind {
    Message {
        role: MessageRole,
        content: MessageContent,
        #[serde(default)]
        metadata: serde_json::Value,
    },
    ThinkingLevelChange {
        level: ThinkingLevel,
    },
    ModelChange {
        provider: String,
        model_id: String,
    },
    Compaction {
        summary: String,
        first_kept_entry_id: Option<String>,
        tokens_before: usize,
        #[serde(default)]
        details: serde_json::Value,
    },
    BranchSummary {
        from_id: String,
        summary: String,
        #[serde(default)]
        details: serde_json::Value,
    },
    Label {
        target_id: String,
        label: String,
    },
    SessionInfo {
        name: String,
    },
    Custom {
        custom_type: String,
        data: serde_json::Value,
    },
    CustomMessage {
        custom_type: String,
        content: MessageContent,
        display: Option<bool>,
        #[serde(default)]
        details: serde_json::Value,
    },
}

/// One immutable record in an `EntryStore`'s tree.
///
/// `id` is never reused within the lifetime of a session file (spec §3.6
/// invariant 5). `parent_id` of `None` marks a root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entry {
    pub id: String,
    pub parent_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub kind: EntryKind,
}

impl Entry {
    /// Construct an entry with `id`/`parent_id`/`timestamp` unset, to be
    /// filled in by `EntryStore::append_entry`.
    pub fn pending(kind: EntryKind) -> PendingEntry {
        PendingEntry { id: None, parent_id: None, timestamp: None, kind }
    }
}

/// An entry awaiting id/parent/timestamp assignment by `EntryStore`.
///
/// Mirrors spec §4.A's `append_entry` contract: if `id`/`parent_id` arrive
/// unset, the store assigns them; explicit values (e.g. when replaying a
/// loaded file) are preserved as-is.
#[derive(Debug, Clone)]
pub struct PendingEntry {
    pub id: Option<String>,
    pub parent_id: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    pub kind: EntryKind,
}

impl PendingEntry {
    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_timestamp(mut self, ts: DateTime<Utc>) -> Self {
        self.timestamp = Some(ts);
        self
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_content_text_round_trip() {
        let c = MessageContent::text("hello");
        assert_eq!(c.as_text(), "hello");
    }

    #[test]
    fn message_content_blocks_skips_non_text() {
        let c = MessageContent::Blocks(vec![
            ContentBlock::Text { text: "a".into() },
            ContentBlock::Image { data: "x".into(), mime_type: "image/png".into() },
            ContentBlock::Text { text: "b".into() },
        ]);
        assert_eq!(c.as_text(), "a\nb");
    }

    #[test]
    fn entry_kind_serializes_and_round_trips() {
        let kind = EntryKind::Message {
            role: MessageRole::User,
            content: MessageContent::text("hi"),
            metadata: serde_json::Value::Null,
        };
        let json = serde_json::to_string(&kind).unwrap();
        let back: EntryKind = serde_json::from_str(&json).unwrap();
        match back {
            EntryKind::Message { role, content, .. } => {
                assert_eq!(role, MessageRole::User);
                assert_eq!(content.as_text(), "hi");
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn pending_entry_builder_sets_fields() {
        let p = Entry::pending(EntryKind::SessionInfo { name: "s".into() })
            .with_id("abc12345")
            .with_parent("root0000");
        assert_eq!(p.id.as_deref(), Some("abc12345"));
        assert_eq!(p.parent_id.as_deref(), Some("root0000"));
    }
}

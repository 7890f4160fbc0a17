// SPDX-License-Identifier: Apache-2.0
//! Token-budget compaction (spec §4.E). Kept close to the teacher's
//! `compact.rs` (`compact_session_with_strategy`, `emergency_compact`,
//! `smart_truncate`) but adapted to walk a `kestrel_session::EntryStore`
//! branch and append a `Compaction` entry rather than mutating a message
//! list in place.
use futures::StreamExt;
use kestrel_config::{AgentConfig, CompactionStrategy};
use kestrel_model::{CompletionRequest, Message, ModelProvider, ResponseEvent};
use kestrel_session::{Context, Entry, EntryKind, EntryStore, MessageRole};
use kestrel_tools::OutputCategory;

use crate::error::ActorError;

const SUMMARIZE_PROMPT: &str = "You are a context compaction assistant. Summarise the \
following conversation history in a concise, information-dense way. Preserve all \
technical details, decisions, file names, code snippets, and tool outputs that may be \
relevant to future work. The summary will replace the original history to free up \
context space.";

const STRUCTURED_COMPACTION_PROMPT: &str = "You are a context compaction assistant. \
Produce a checkpoint of the conversation history below using exactly these Markdown \
sections, omitting a section only if it is genuinely empty:\n\n\
## Active Task\n## Key Decisions & Rationale\n## Files & Artifacts\n\
## Constraints & Requirements\n## Pending Items\n## Session Narrative\n\n\
Preserve file names, commands, and concrete values verbatim.";

/// Result of a successful compaction.
pub struct CompactionOutcome {
    pub summary_entry_id: String,
    pub tokens_before: usize,
}

/// Estimate the token cost of a materialized `Context` (spec §9 open
/// question: the estimator is an injected function, not a fixed method, so
/// callers can override it in tests).
pub fn estimate_tokens(ctx: &Context) -> usize {
    ctx.messages.iter().map(Message::approx_tokens).sum()
}

/// `true` once the active branch has grown past the compaction trigger
/// (spec §4.E "context_window - reserve_tokens").
pub fn should_compact(ctx: &Context, cfg: &AgentConfig, estimate: &(dyn Fn(&Context) -> usize + Sync)) -> bool {
    let projected = estimate(ctx);
    let threshold = (cfg.compaction_threshold - cfg.compaction_overhead_reserve).max(0.1);
    projected as f32 > cfg.context_window as f32 * threshold
}

/// Summarize everything on the active branch before the last
/// `compaction_keep_recent` message entries, replacing it with a single
/// `Compaction` entry the model produced. Requires a live model call since,
/// unlike the teacher's in-place `Vec<Message>` rewrite, the summary text
/// must come from somewhere before it can be stored.
pub async fn compact_branch(store: &mut EntryStore, model: &dyn ModelProvider, cfg: &AgentConfig) -> Result<CompactionOutcome, ActorError> {
    let ctx = store.build_context();
    let tokens_before = estimate_tokens(&ctx);

    let branch = store.get_branch(None);
    let message_positions: Vec<usize> = branch
        .iter()
        .enumerate()
        .filter(|(_, e)| matches!(e.kind, EntryKind::Message { .. }))
        .map(|(i, _)| i)
        .collect();
    if message_positions.len() <= cfg.compaction_keep_recent {
        return Err(ActorError::CannotCompact("not enough messages on the active branch to compact".into()));
    }

    let keep_from_pos = message_positions.len() - cfg.compaction_keep_recent;
    let first_kept_idx = message_positions[keep_from_pos];
    let first_kept_entry_id = branch[first_kept_idx].id.clone();
    let history_text = serialize_entries(&branch[..first_kept_idx]);

    let prompt = match cfg.compaction_strategy {
        CompactionStrategy::Structured => STRUCTURED_COMPACTION_PROMPT,
        CompactionStrategy::Narrative => SUMMARIZE_PROMPT,
    };
    let request = CompletionRequest {
        messages: vec![Message::user(format!("{prompt}\n\n---\n\n{history_text}"))],
        ..Default::default()
    };

    let mut stream = model.complete(request).await.map_err(|e| ActorError::CannotCompact(e.to_string()))?;
    let mut summary = String::new();
    while let Some(event) = stream.next().await {
        match event.map_err(|e| ActorError::CannotCompact(e.to_string()))? {
            ResponseEvent::TextDelta(t) => summary.push_str(&t),
            ResponseEvent::Done => break,
            ResponseEvent::Error(e) => return Err(ActorError::CannotCompact(e)),
            ResponseEvent::ThinkingDelta(_) | ResponseEvent::ToolCall { .. } | ResponseEvent::Usage { .. } => {}
        }
    }
    if summary.trim().is_empty() {
        return Err(ActorError::CannotCompact("model returned an empty summary".into()));
    }

    let entry = store.append_compaction(summary, Some(first_kept_entry_id), tokens_before, serde_json::Value::Null)?;
    Ok(CompactionOutcome { summary_entry_id: entry.id.clone(), tokens_before })
}

/// Deterministic, model-free fallback when a live summarization call isn't
/// possible (e.g. the model stream itself errored while already over
/// budget): drops everything but the last `keep_recent` message entries,
/// recorded as a zero-detail `Compaction` entry so `build_context` still
/// renders a visible break in history.
pub fn emergency_compact(store: &mut EntryStore, keep_recent: usize) -> Option<CompactionOutcome> {
    let ctx = store.build_context();
    let tokens_before = estimate_tokens(&ctx);

    let branch = store.get_branch(None);
    let message_positions: Vec<usize> = branch
        .iter()
        .enumerate()
        .filter(|(_, e)| matches!(e.kind, EntryKind::Message { .. }))
        .map(|(i, _)| i)
        .collect();
    if message_positions.len() <= keep_recent {
        return None;
    }
    let keep_from_pos = message_positions.len() - keep_recent;
    let first_kept_entry_id = branch[message_positions[keep_from_pos]].id.clone();

    let entry = store
        .append_compaction(
            "[emergency compaction: prior history dropped without a model-generated summary]",
            Some(first_kept_entry_id),
            tokens_before,
            serde_json::json!({"emergency": true}),
        )
        .ok()?;
    Some(CompactionOutcome { summary_entry_id: entry.id.clone(), tokens_before })
}

/// Truncate a tool result string to fit within `cap_tokens`, shaping the cut
/// to the tool's declared `OutputCategory` (spec §4.E
/// "tool_result_token_cap").
pub fn smart_truncate(content: &str, category: OutputCategory, cap_tokens: usize) -> String {
    let cap_chars = cap_tokens.saturating_mul(4);
    if content.len() <= cap_chars {
        return content.to_string();
    }
    match category {
        OutputCategory::HeadTail => head_tail_lines(content, cap_chars, 60, 40),
        OutputCategory::MatchList => head_lines(content, cap_chars),
        OutputCategory::FileContent => head_tail_lines(content, cap_chars, usize::MAX, usize::MAX),
        OutputCategory::Generic => hard_truncate(content, cap_chars),
    }
}

fn notice(omitted_bytes: usize, omitted_lines: usize) -> String {
    format!("\n\n… [truncated: {omitted_bytes} bytes / {omitted_lines} lines omitted] …\n\n")
}

fn head_lines(content: &str, cap_chars: usize) -> String {
    let lines: Vec<&str> = content.lines().collect();
    let mut out = String::new();
    let mut used_lines = 0;
    for line in &lines {
        if out.len() + line.len() + 1 > cap_chars {
            break;
        }
        out.push_str(line);
        out.push('\n');
        used_lines += 1;
    }
    let omitted_lines = lines.len() - used_lines;
    if omitted_lines > 0 {
        out.push_str(&notice(content.len() - out.len(), omitted_lines));
    }
    out
}

fn head_tail_lines(content: &str, cap_chars: usize, max_head: usize, max_tail: usize) -> String {
    let lines: Vec<&str> = content.lines().collect();
    if lines.len() <= max_head.saturating_add(max_tail) {
        return hard_truncate(content, cap_chars);
    }

    let (head_budget, tail_budget) = if max_head == usize::MAX {
        (cap_chars / 2, cap_chars - cap_chars / 2)
    } else {
        (cap_chars * 3 / 5, cap_chars * 2 / 5)
    };

    let mut head = String::new();
    let mut head_lines_used = 0;
    for line in &lines {
        if head.len() + line.len() + 1 > head_budget || (max_head != usize::MAX && head_lines_used >= max_head) {
            break;
        }
        head.push_str(line);
        head.push('\n');
        head_lines_used += 1;
    }

    let mut tail = String::new();
    let mut tail_lines_used = 0;
    for line in lines.iter().rev() {
        if tail.len() + line.len() + 1 > tail_budget || (max_tail != usize::MAX && tail_lines_used >= max_tail) {
            break;
        }
        tail.insert_str(0, "\n");
        tail.insert_str(0, line);
        tail_lines_used += 1;
    }

    let omitted_lines = lines.len().saturating_sub(head_lines_used + tail_lines_used);
    let omitted_bytes = content.len().saturating_sub(head.len() + tail.len());
    format!("{head}{}{tail}", notice(omitted_bytes, omitted_lines))
}

fn hard_truncate(content: &str, cap_chars: usize) -> String {
    let mut end = cap_chars.min(content.len());
    while end > 0 && !content.is_char_boundary(end) {
        end -= 1;
    }
    if let Some(nl) = content[..end].rfind('\n') {
        end = nl + 1;
    }
    let omitted_bytes = content.len() - end;
    let omitted_lines = content[end..].lines().count();
    format!("{}{}", &content[..end], notice(omitted_bytes, omitted_lines))
}

/// Role-prefixed plain-text rendering of entries destined to be folded into
/// a compaction summary, skipping entries with no model-facing text.
fn serialize_entries(entries: &[&Entry]) -> String {
    let mut out = String::new();
    for e in entries {
        match &e.kind {
            EntryKind::Message { role, content, .. } => {
                if matches!(role, MessageRole::Custom) {
                    continue;
                }
                out.push_str(&format!("[{role:?}] {}\n", content.as_text()));
            }
            EntryKind::CustomMessage { content, custom_type, .. } => {
                out.push_str(&format!("[{custom_type}] {}\n", content.as_text()));
            }
            EntryKind::BranchSummary { summary, .. } => {
                out.push_str(&format!("[branch summary] {summary}\n"));
            }
            EntryKind::Compaction { summary, .. } => {
                out.push_str(&format!("[earlier compaction] {summary}\n"));
            }
            EntryKind::ThinkingLevelChange { .. }
            | EntryKind::ModelChange { .. }
            | EntryKind::Label { .. }
            | EntryKind::SessionInfo { .. }
            | EntryKind::Custom { .. } => {}
        }
    }
    out
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_model::MockProvider;
    use kestrel_session::MessageContent;

    fn fill(store: &mut EntryStore, n: usize) {
        for i in 0..n {
            store.append_message(MessageRole::User, MessageContent::text(format!("msg {i}"))).unwrap();
        }
    }

    #[tokio::test]
    async fn compact_branch_replaces_prefix_with_model_summary() {
        let mut store = EntryStore::new("/w");
        fill(&mut store, 10);
        let cfg = AgentConfig { compaction_keep_recent: 3, ..Default::default() };
        let outcome = compact_branch(&mut store, &MockProvider, &cfg).await.unwrap();
        assert!(outcome.tokens_before > 0);

        let ctx = store.build_context();
        // 1 summary message + 3 kept tail messages.
        assert_eq!(ctx.messages.len(), 4);
    }

    #[tokio::test]
    async fn compact_branch_rejects_short_history() {
        let mut store = EntryStore::new("/w");
        fill(&mut store, 2);
        let cfg = AgentConfig { compaction_keep_recent: 6, ..Default::default() };
        let err = compact_branch(&mut store, &MockProvider, &cfg).await.unwrap_err();
        assert!(matches!(err, ActorError::CannotCompact(_)));
    }

    #[test]
    fn emergency_compact_keeps_only_the_tail() {
        let mut store = EntryStore::new("/w");
        fill(&mut store, 10);
        let outcome = emergency_compact(&mut store, 2).unwrap();
        assert!(outcome.tokens_before > 0);
        let ctx = store.build_context();
        assert_eq!(ctx.messages.len(), 3);
    }

    #[test]
    fn emergency_compact_is_none_when_not_enough_history() {
        let mut store = EntryStore::new("/w");
        fill(&mut store, 2);
        assert!(emergency_compact(&mut store, 6).is_none());
    }

    #[test]
    fn smart_truncate_leaves_short_content_untouched() {
        let out = smart_truncate("short", OutputCategory::Generic, 100);
        assert_eq!(out, "short");
    }

    #[test]
    fn smart_truncate_head_tail_keeps_both_ends() {
        let lines: Vec<String> = (0..200).map(|i| format!("line {i}")).collect();
        let content = lines.join("\n");
        let out = smart_truncate(&content, OutputCategory::HeadTail, 50);
        assert!(out.contains("line 0"));
        assert!(out.contains("line 199"));
        assert!(out.contains("truncated"));
    }

    #[test]
    fn smart_truncate_generic_cuts_at_line_boundary() {
        let content = "a".repeat(10).to_string() + "\n" + &"b".repeat(500);
        let out = smart_truncate(&content, OutputCategory::Generic, 5);
        assert!(out.starts_with("aaaaaaaaaa\n"));
    }
}

// SPDX-License-Identifier: Apache-2.0
//! System prompt construction. The teacher's `prompts.rs` injects
//! `AGENTS.md`, skill descriptions, subagent roster, and git/CI state into
//! the base instructions; all of that belongs to the workspace-bootstrapping
//! layer this crate doesn't own. What's left is the part that's genuinely
//! ambient: a fixed base instruction block plus a per-config override hook.
use kestrel_config::AgentConfig;

const BASE_PROMPT: &str = "You are an autonomous coding agent. You have access to tools for \
running shell commands and delegating sub-tasks. Use tools when they let you make progress \
faster than reasoning alone would; otherwise answer directly. Keep responses focused on the \
task at hand.";

/// Build the system message for one turn. `cfg.system_prompt`, when set,
/// replaces the base instructions entirely rather than appending to them —
/// callers who want both concatenate on their own config value.
pub fn system_prompt(cfg: &AgentConfig) -> String {
    match &cfg.system_prompt {
        Some(custom) if !custom.trim().is_empty() => custom.clone(),
        _ => BASE_PROMPT.to_string(),
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

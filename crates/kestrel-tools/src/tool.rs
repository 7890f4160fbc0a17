// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use serde_json::Value;

use crate::abort::AbortSignal;
use crate::policy::ApprovalPolicy;

/// A single tool invocation requested by the model.
#[derive(Debug, Clone)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub args: Value,
}

/// A single content block in a tool result (spec §6's `ToolResult`).
#[derive(Debug, Clone)]
pub enum ContentBlock {
    Text(String),
}

/// The result of executing a tool (spec §6: `{content: [ContentBlock], details?: map}`).
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub call_id: String,
    pub content: Vec<ContentBlock>,
    pub details: Option<Value>,
    pub is_error: bool,
    /// Set when the tool returned early because its `abort_signal` fired.
    pub cancelled: bool,
}

impl ToolOutput {
    pub fn ok(call_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self { call_id: call_id.into(), content: vec![ContentBlock::Text(text.into())], details: None, is_error: false, cancelled: false }
    }

    pub fn err(call_id: impl Into<String>, msg: impl Into<String>) -> Self {
        Self { call_id: call_id.into(), content: vec![ContentBlock::Text(msg.into())], details: None, is_error: true, cancelled: false }
    }

    pub fn cancelled(call_id: impl Into<String>) -> Self {
        Self { call_id: call_id.into(), content: vec![ContentBlock::Text("cancelled".into())], details: None, is_error: true, cancelled: true }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn text(&self) -> String {
        self.content
            .iter()
            .map(|b| match b {
                ContentBlock::Text(t) => t.as_str(),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// An incremental progress update a streaming tool reports via `on_update`.
#[derive(Debug, Clone)]
pub struct ToolUpdate {
    pub call_id: String,
    pub partial_text: String,
}

/// Callback a tool invokes with partial progress. Returning `false` asks
/// the tool to stop producing further updates (the subscriber went away).
pub type OnUpdate<'a> = &'a (dyn Fn(ToolUpdate) -> bool + Send + Sync);

/// How a tool's output should be truncated when it exceeds the
/// per-result token cap (spec §4.E "tool_result_token_cap"). Dispatching on
/// category rather than tool name keeps `kestrel_core::compact`'s smart
/// truncation independent of this crate's concrete tool list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputCategory {
    Generic,
    HeadTail,
    MatchList,
    FileContent,
}

/// Trait every tool implements (spec §4.F / §6's inbound tool interface).
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters_schema(&self) -> Value;
    fn default_policy(&self) -> ApprovalPolicy;

    /// Truncation strategy for this tool's output. Defaults to `Generic`
    /// (hard truncation at the nearest line boundary).
    fn output_category(&self) -> OutputCategory {
        OutputCategory::Generic
    }

    /// Execute the tool. Implementations are expected to poll `abort_signal`
    /// between units of work and return [`ToolOutput::cancelled`] promptly
    /// once it fires (spec §5's cancellation semantics).
    async fn execute(&self, call: &ToolCall, abort_signal: &AbortSignal, on_update: OnUpdate<'_>) -> ToolOutput;
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ok_output_joins_text_parts() {
        let out = ToolOutput::ok("c1", "hello");
        assert_eq!(out.text(), "hello");
        assert!(!out.is_error);
    }

    #[test]
    fn err_output_is_marked_error() {
        let out = ToolOutput::err("c1", "boom");
        assert!(out.is_error);
        assert_eq!(out.text(), "boom");
    }

    #[test]
    fn cancelled_output_sets_cancelled_flag() {
        let out = ToolOutput::cancelled("c1");
        assert!(out.cancelled);
        assert!(out.is_error);
    }

    #[test]
    fn with_details_attaches_structured_payload() {
        let out = ToolOutput::ok("c1", "hi").with_details(serde_json::json!({"exit_code": 0}));
        assert_eq!(out.details.unwrap()["exit_code"], 0);
    }
}

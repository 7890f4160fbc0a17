// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::abort::AbortSignal;
use crate::policy::ApprovalPolicy;
use crate::tool::{OnUpdate, Tool, ToolCall, ToolOutput};

/// Which backend runs the sub-agent. `Internal` spawns a nested
/// `SessionState`; the others shell out to an external coding-agent CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubAgentEngine {
    Internal,
    Codex,
    Claude,
    Kimi,
}

impl SubAgentEngine {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "internal" => Some(Self::Internal),
            "codex" => Some(Self::Codex),
            "claude" => Some(Self::Claude),
            "kimi" => Some(Self::Kimi),
            _ => None,
        }
    }
}

/// A validated request to launch one sub-agent, built by `TaskTool` and
/// handed to whatever implements [`SubAgentLauncher`].
#[derive(Debug, Clone)]
pub struct SubAgentSpec {
    pub description: String,
    pub prompt: String,
    pub role: Option<String>,
    pub engine: SubAgentEngine,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubAgentStatus {
    Completed,
    Error,
    Timeout,
    Aborted,
}

/// Result of one sub-agent run (spec §4.J's `run_subagents` per-spec result).
#[derive(Debug, Clone)]
pub struct SubAgentOutcome {
    pub status: SubAgentStatus,
    pub result: Option<String>,
    pub error: Option<String>,
}

impl SubAgentOutcome {
    pub fn completed(result: impl Into<String>) -> Self {
        Self { status: SubAgentStatus::Completed, result: Some(result.into()), error: None }
    }

    pub fn error(reason: impl Into<String>) -> Self {
        Self { status: SubAgentStatus::Error, result: None, error: Some(reason.into()) }
    }
}

/// The Coordinator's actual launch mechanism, injected so `kestrel-tools`
/// never depends on `kestrel-core` (which depends on this crate for its
/// tool registry, so the reverse edge would be circular).
#[async_trait]
pub trait SubAgentLauncher: Send + Sync {
    async fn launch(&self, spec: SubAgentSpec, abort_signal: AbortSignal) -> SubAgentOutcome;

    /// Known subagent role names the `role` argument may resolve to.
    fn known_roles(&self) -> Vec<String>;
}

/// The `task` tool (spec §4.J): the Coordinator's entry point for
/// launching one sub-agent session.
pub struct TaskTool {
    launcher: Arc<dyn SubAgentLauncher>,
    default_timeout_ms: u64,
}

impl TaskTool {
    pub fn new(launcher: Arc<dyn SubAgentLauncher>, default_timeout_ms: u64) -> Self {
        Self { launcher, default_timeout_ms }
    }
}

#[async_trait]
impl Tool for TaskTool {
    fn name(&self) -> &str {
        "task"
    }

    fn description(&self) -> &str {
        "Launch a sub-agent session to complete a focused task and return its final answer."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "description": { "type": "string", "description": "Short label for the task" },
                "prompt": { "type": "string", "description": "The task given to the sub-agent" },
                "role": { "type": "string", "description": "Subagent role to assume (optional)" },
                "engine": {
                    "type": "string",
                    "enum": ["internal", "codex", "claude", "kimi"],
                    "description": "Which engine runs the sub-agent (default: internal)"
                },
                "timeout_ms": { "type": "integer", "description": "Timeout in milliseconds (optional)" }
            },
            "required": ["description", "prompt"],
            "additionalProperties": false
        })
    }

    fn default_policy(&self) -> ApprovalPolicy {
        ApprovalPolicy::Ask
    }

    async fn execute(&self, call: &ToolCall, abort_signal: &AbortSignal, _on_update: OnUpdate<'_>) -> ToolOutput {
        if abort_signal.is_aborted() {
            let mut out = ToolOutput::err(call.id.as_str(), "Operation aborted");
            out.cancelled = true;
            return out;
        }

        let description = match call.args.get("description").and_then(|v| v.as_str()) {
            Some(d) if !d.trim().is_empty() => d.to_string(),
            _ => return ToolOutput::err(call.id.as_str(), "'description' must be a non-empty string"),
        };
        let prompt = match call.args.get("prompt").and_then(|v| v.as_str()) {
            Some(p) if !p.trim().is_empty() => p.to_string(),
            _ => return ToolOutput::err(call.id.as_str(), "'prompt' must be a non-empty string"),
        };
        let role = match call.args.get("role").and_then(|v| v.as_str()) {
            Some(r) => {
                let known = self.launcher.known_roles();
                if !known.iter().any(|k| k == r) {
                    return ToolOutput::err(call.id.as_str(), format!("unknown subagent role: {r}"))
                        .with_details(json!({"kind": "unknown_role", "known_roles": known}));
                }
                Some(r.to_string())
            }
            None => None,
        };
        let engine = match call.args.get("engine").and_then(|v| v.as_str()) {
            Some(e) => match SubAgentEngine::parse(e) {
                Some(engine) => engine,
                None => return ToolOutput::err(call.id.as_str(), format!("unknown engine: {e}")),
            },
            None => SubAgentEngine::Internal,
        };
        let timeout_ms = call.args.get("timeout_ms").and_then(|v| v.as_u64()).unwrap_or(self.default_timeout_ms);

        let spec = SubAgentSpec { description, prompt, role, engine, timeout_ms };
        let outcome = self.launcher.launch(spec, abort_signal.clone()).await;

        match outcome.status {
            SubAgentStatus::Completed => ToolOutput::ok(call.id.as_str(), outcome.result.unwrap_or_default()),
            SubAgentStatus::Aborted => {
                let mut out = ToolOutput::err(call.id.as_str(), "Operation aborted");
                out.cancelled = true;
                out
            }
            SubAgentStatus::Timeout => {
                ToolOutput::err(call.id.as_str(), "sub-agent timed out").with_details(json!({"kind": "timeout"}))
            }
            SubAgentStatus::Error => ToolOutput::err(call.id.as_str(), outcome.error.unwrap_or_else(|| "sub-agent error".into())),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use kestrel_procman::{KillSignal, ProcessManager, ProcessStatus};

use crate::abort::AbortSignal;
use crate::policy::ApprovalPolicy;
use crate::tool::{OnUpdate, OutputCategory, Tool, ToolCall, ToolOutput};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// The one concrete tool kept from the teacher's catalogue, demonstrating
/// the F↔H integration point: tool dispatch delegating to the process
/// manager rather than shelling out directly.
pub struct BashTool {
    procman: ProcessManager,
    default_timeout_secs: u64,
}

impl BashTool {
    pub fn new(procman: ProcessManager, default_timeout_secs: u64) -> Self {
        Self { procman, default_timeout_secs }
    }
}

#[async_trait]
impl Tool for BashTool {
    fn name(&self) -> &str {
        "bash"
    }

    fn description(&self) -> &str {
        "Executes a shell command via the process manager. Supports a per-call \
         timeout_secs; the process is killed if the timeout elapses or the call \
         is aborted."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": { "type": "string", "description": "The shell command to run" },
                "workdir": { "type": "string", "description": "Working directory (optional)" },
                "timeout_secs": { "type": "integer", "description": "Execution timeout in seconds" }
            },
            "required": ["command"],
            "additionalProperties": false
        })
    }

    fn default_policy(&self) -> ApprovalPolicy {
        ApprovalPolicy::Ask
    }

    fn output_category(&self) -> OutputCategory {
        OutputCategory::HeadTail
    }

    async fn execute(&self, call: &ToolCall, abort_signal: &AbortSignal, _on_update: OnUpdate<'_>) -> ToolOutput {
        let Some(command) = call.args.get("command").and_then(|v| v.as_str()) else {
            return ToolOutput::err(call.id.as_str(), "missing 'command' argument");
        };
        let workdir = call.args.get("workdir").and_then(|v| v.as_str());
        let timeout_secs = call.args.get("timeout_secs").and_then(|v| v.as_u64()).unwrap_or(self.default_timeout_secs);

        let id = match self.procman.exec(command, workdir, HashMap::new()).await {
            Ok(id) => id,
            Err(e) => return ToolOutput::err(call.id.as_str(), format!("spawn error: {e}")),
        };

        let deadline = tokio::time::sleep(Duration::from_secs(timeout_secs));
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = &mut deadline => {
                    let _ = self.procman.kill(&id, KillSignal::Sigkill).await;
                    return ToolOutput::err(call.id.as_str(), format!("timeout after {timeout_secs}s"))
                        .with_details(json!({"kind": "timeout", "process_id": id}));
                }
                _ = abort_signal.cancelled() => {
                    let _ = self.procman.kill(&id, KillSignal::Sigkill).await;
                    return ToolOutput::cancelled(call.id.as_str());
                }
                _ = tokio::time::sleep(POLL_INTERVAL) => {
                    let Ok(result) = self.procman.poll(&id, None) else {
                        return ToolOutput::err(call.id.as_str(), "process record disappeared");
                    };
                    if result.status != ProcessStatus::Running {
                        let text = result.log_tail.join("\n");
                        return match result.status {
                            ProcessStatus::Completed => ToolOutput::ok(call.id.as_str(), text),
                            _ => ToolOutput::err(call.id.as_str(), format!("[exit {:?}]\n{text}", result.exit_code))
                                .with_details(json!({"kind": "tool_failed", "exit_code": result.exit_code})),
                        };
                    }
                }
            }
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_config::ProcessConfig;

    fn tool() -> BashTool {
        BashTool::new(ProcessManager::new(ProcessConfig { max_bytes: 100_000, max_lines: 1_000, ttl_seconds: 3600 }), 5)
    }

    fn call(args: Value) -> ToolCall {
        ToolCall { id: "c1".into(), name: "bash".into(), args }
    }

    #[tokio::test]
    async fn runs_command_and_returns_stdout() {
        let t = tool();
        let out = t.execute(&call(json!({"command": "echo hi"})), &AbortSignal::new(), &|_| true).await;
        assert!(!out.is_error);
        assert!(out.text().contains("hi"));
    }

    #[tokio::test]
    async fn nonzero_exit_is_error() {
        let t = tool();
        let out = t.execute(&call(json!({"command": "exit 2"})), &AbortSignal::new(), &|_| true).await;
        assert!(out.is_error);
    }

    #[tokio::test]
    async fn missing_command_argument_errors_without_spawning() {
        let t = tool();
        let out = t.execute(&call(json!({})), &AbortSignal::new(), &|_| true).await;
        assert!(out.is_error);
        assert!(out.text().contains("missing"));
    }

    #[tokio::test]
    async fn abort_signal_kills_in_flight_command() {
        let t = tool();
        let signal = AbortSignal::new();
        let signal2 = signal.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            signal2.abort();
        });
        let out = t.execute(&call(json!({"command": "sleep 5"})), &signal, &|_| true).await;
        assert!(out.cancelled);
    }

    #[tokio::test]
    async fn timeout_kills_long_running_command() {
        let t = tool();
        let out = t.execute(&call(json!({"command": "sleep 5", "timeout_secs": 0})), &AbortSignal::new(), &|_| true).await;
        assert!(out.is_error);
        assert!(out.text().contains("timeout"));
    }
}

// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use kestrel_config::ToolsConfig;

use crate::abort::AbortSignal;
use crate::policy::{ApprovalPolicy, ToolPolicy};
use crate::registry::ToolRegistry;
use crate::tool::{OnUpdate, ToolCall, ToolOutput};

/// Outcome of an out-of-band approval request (spec §6's inbound approval
/// interface: `request_approval(...) -> :approved | :rejected | :timeout`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalDecision {
    Approved,
    Rejected,
    TimedOut,
}

/// External surface the dispatcher calls out to when a tool requires
/// approval. Left unset, any `Ask`-policy tool runs without a wrapper —
/// the approval UI itself is out of scope (spec §1 non-goals).
#[async_trait]
pub trait ApprovalChannel: Send + Sync {
    async fn request_approval(&self, tool_name: &str, action_fingerprint: &str, timeout: Duration) -> ApprovalDecision;
}

/// Invokes tools safely: registry lookup, optional approval gate, panic
/// isolation via `tokio::spawn` (spec §4.F).
pub struct ToolDispatcher {
    registry: ToolRegistry,
    policy: ToolPolicy,
    approval: Option<std::sync::Arc<dyn ApprovalChannel>>,
    approval_timeout: Duration,
    /// `(tool_name, action_fingerprint) -> decision`, consulted before
    /// re-prompting for an identical call.
    decisions: Mutex<HashMap<(String, String), ApprovalPolicy>>,
}

impl ToolDispatcher {
    pub fn new(registry: ToolRegistry, cfg: &ToolsConfig, approval: Option<std::sync::Arc<dyn ApprovalChannel>>) -> Self {
        Self {
            policy: ToolPolicy::from_config(cfg),
            registry,
            approval,
            approval_timeout: Duration::from_secs(cfg.approval_timeout_secs),
            decisions: Mutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    fn action_fingerprint(call: &ToolCall) -> String {
        serde_json::to_string(&call.args).unwrap_or_default()
    }

    /// Run one tool call to completion, never propagating a panic.
    pub async fn execute(&self, call: ToolCall, abort_signal: AbortSignal, on_update: OnUpdate<'_>) -> ToolOutput {
        let Some(tool) = self.registry.get(&call.name) else {
            return ToolOutput::err(call.id.as_str(), format!("unknown tool: {}", call.name)).with_details(json!({"kind": "unknown_tool"}));
        };

        if abort_signal.is_aborted() {
            return ToolOutput::cancelled(call.id.as_str());
        }

        match self.gate(&call, &tool.default_policy()).await {
            ApprovalOutcome::Proceed => {}
            ApprovalOutcome::Rejected => {
                return ToolOutput::err(call.id.as_str(), "tool call rejected by policy").with_details(json!({"kind": "rejected"}));
            }
            ApprovalOutcome::TimedOut => {
                return ToolOutput::err(call.id.as_str(), "timed out waiting for approval").with_details(json!({"kind": "timed_out_waiting_for_approval"}));
            }
        }

        // `tokio::spawn` gives true panic isolation (matches
        // `run_agentic_loop_cancellable`'s `task.await` -> `Err(e)` handling)
        // but requires a 'static future; `on_update` borrows the caller's
        // closure, so updates are relayed through a channel instead of
        // moving it into the spawned task.
        self.execute_isolated(call, tool, abort_signal, on_update).await
    }

    async fn execute_isolated(
        &self,
        call: ToolCall,
        tool: std::sync::Arc<dyn crate::tool::Tool>,
        abort_signal: AbortSignal,
        on_update: OnUpdate<'_>,
    ) -> ToolOutput {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let call_id = call.id.clone();
        let mut handle = tokio::spawn(async move {
            let forward = move |update: crate::tool::ToolUpdate| -> bool { tx.send(update).is_ok() };
            tool.execute(&call, &abort_signal, &forward).await
        });

        loop {
            tokio::select! {
                update = rx.recv() => {
                    if let Some(u) = update {
                        on_update(u);
                    }
                }
                result = &mut handle => {
                    while let Ok(u) = rx.try_recv() {
                        on_update(u);
                    }
                    return match result {
                        Ok(output) => output,
                        Err(e) => ToolOutput::err(call_id.as_str(), format!("tool panicked: {e}")).with_details(json!({"kind": "tool_failed", "reason": "panic"})),
                    };
                }
            }
        }
    }

    async fn gate(&self, call: &ToolCall, default_policy: &ApprovalPolicy) -> ApprovalOutcome {
        let command_like = call.args.get("command").and_then(|v| v.as_str()).unwrap_or(&call.name);
        let effective = self.policy.effective(*default_policy, command_like);
        if effective != ApprovalPolicy::Ask {
            return if effective == ApprovalPolicy::Deny { ApprovalOutcome::Rejected } else { ApprovalOutcome::Proceed };
        }

        let fingerprint = Self::action_fingerprint(call);
        let key = (call.name.clone(), fingerprint.clone());
        if let Some(cached) = self.decisions.lock().unwrap().get(&key) {
            if *cached == ApprovalPolicy::Auto {
                return ApprovalOutcome::Proceed;
            }
        }

        let Some(channel) = &self.approval else {
            return ApprovalOutcome::Proceed;
        };
        match channel.request_approval(&call.name, &fingerprint, self.approval_timeout).await {
            ApprovalDecision::Approved => {
                self.decisions.lock().unwrap().insert(key, ApprovalPolicy::Auto);
                ApprovalOutcome::Proceed
            }
            ApprovalDecision::Rejected => ApprovalOutcome::Rejected,
            ApprovalDecision::TimedOut => ApprovalOutcome::TimedOut,
        }
    }
}

enum ApprovalOutcome {
    Proceed,
    Rejected,
    TimedOut,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::tool::{Tool, ToolCall};

    struct OkTool;
    #[async_trait]
    impl Tool for OkTool {
        fn name(&self) -> &str {
            "ok_tool"
        }
        fn description(&self) -> &str {
            "always succeeds"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            json!({"type": "object"})
        }
        fn default_policy(&self) -> ApprovalPolicy {
            ApprovalPolicy::Auto
        }
        async fn execute(&self, call: &ToolCall, _abort: &AbortSignal, _on_update: OnUpdate<'_>) -> ToolOutput {
            ToolOutput::ok(call.id.as_str(), "done")
        }
    }

    struct PanicTool;
    #[async_trait]
    impl Tool for PanicTool {
        fn name(&self) -> &str {
            "panic_tool"
        }
        fn description(&self) -> &str {
            "always panics"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            json!({"type": "object"})
        }
        fn default_policy(&self) -> ApprovalPolicy {
            ApprovalPolicy::Auto
        }
        async fn execute(&self, _call: &ToolCall, _abort: &AbortSignal, _on_update: OnUpdate<'_>) -> ToolOutput {
            panic!("boom");
        }
    }

    struct DenyTool;
    #[async_trait]
    impl Tool for DenyTool {
        fn name(&self) -> &str {
            "deny_tool"
        }
        fn description(&self) -> &str {
            "always denied"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            json!({"type": "object"})
        }
        fn default_policy(&self) -> ApprovalPolicy {
            ApprovalPolicy::Deny
        }
        async fn execute(&self, call: &ToolCall, _abort: &AbortSignal, _on_update: OnUpdate<'_>) -> ToolOutput {
            ToolOutput::ok(call.id.as_str(), "should never run")
        }
    }

    fn dispatcher_with(tools: Vec<Box<dyn Fn(&mut ToolRegistry)>>) -> ToolDispatcher {
        let mut reg = ToolRegistry::new();
        for f in tools {
            f(&mut reg);
        }
        ToolDispatcher::new(reg, &ToolsConfig::default(), None)
    }

    fn call(name: &str) -> ToolCall {
        ToolCall { id: "c1".into(), name: name.into(), args: json!({}) }
    }

    #[tokio::test]
    async fn unknown_tool_returns_structured_error() {
        let d = dispatcher_with(vec![]);
        let out = d.execute(call("missing"), AbortSignal::new(), &|_| true).await;
        assert!(out.is_error);
        assert_eq!(out.details.unwrap()["kind"], "unknown_tool");
    }

    #[tokio::test]
    async fn known_tool_executes_successfully() {
        let d = dispatcher_with(vec![Box::new(|r: &mut ToolRegistry| r.register(OkTool))]);
        let out = d.execute(call("ok_tool"), AbortSignal::new(), &|_| true).await;
        assert!(!out.is_error);
        assert_eq!(out.text(), "done");
    }

    #[tokio::test]
    async fn panicking_tool_never_crashes_dispatcher() {
        let d = dispatcher_with(vec![Box::new(|r: &mut ToolRegistry| r.register(PanicTool))]);
        let out = d.execute(call("panic_tool"), AbortSignal::new(), &|_| true).await;
        assert!(out.is_error);
        assert_eq!(out.details.unwrap()["kind"], "tool_failed");
    }

    #[tokio::test]
    async fn deny_policy_blocks_execution() {
        let d = dispatcher_with(vec![Box::new(|r: &mut ToolRegistry| r.register(DenyTool))]);
        let out = d.execute(call("deny_tool"), AbortSignal::new(), &|_| true).await;
        assert!(out.is_error);
        assert_eq!(out.details.unwrap()["kind"], "rejected");
    }

    #[tokio::test]
    async fn already_aborted_signal_short_circuits() {
        let d = dispatcher_with(vec![Box::new(|r: &mut ToolRegistry| r.register(OkTool))]);
        let signal = AbortSignal::new();
        signal.abort();
        let out = d.execute(call("ok_tool"), signal, &|_| true).await;
        assert!(out.cancelled);
    }
}

// SPDX-License-Identifier: Apache-2.0
//! Coordinator (spec §4.J): launches sub-agent sessions on behalf of the
//! `task` tool and tracks them in the `RunGraph`. Applies the same
//! launch/timeout/abort handling an external-process sub-agent engine would
//! need, generalized from "spawn an external CLI process" to "spawn a nested
//! `SessionState` through `SessionSupervisor`" — the only engine this
//! runtime can actually host in-process.
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use kestrel_rungraph::{NewRunAttrs, RunGraph, RunRecord};
use kestrel_tools::{AbortSignal, SubAgentEngine, SubAgentLauncher, SubAgentOutcome, SubAgentSpec, SubAgentStatus};
use tokio::sync::Mutex as AsyncMutex;

use crate::event_bus::SessionEvent;
use crate::session_actor::{SessionHandle, SessionOptions};
use crate::supervisor::SessionSupervisor;

struct ActiveRun {
    handle: SessionHandle,
    abort: AbortSignal,
}

/// Fans prompts out to nested sessions and tracks their lifecycle in a
/// `RunGraph`. One `Coordinator` is shared by every `task` tool call within
/// a session tree.
#[derive(Clone)]
pub struct Coordinator {
    supervisor: SessionSupervisor,
    run_graph: RunGraph,
    parent_session: Option<String>,
    roles: Vec<String>,
    active: Arc<AsyncMutex<HashMap<String, ActiveRun>>>,
}

impl Coordinator {
    pub fn new(supervisor: SessionSupervisor, run_graph: RunGraph, parent_session: Option<String>, roles: Vec<String>) -> Self {
        Self { supervisor, run_graph, parent_session, roles, active: Arc::new(AsyncMutex::new(HashMap::new())) }
    }

    /// Every run this coordinator has started that hasn't reached a
    /// terminal status yet.
    pub fn list_active(&self) -> Vec<RunRecord> {
        self.run_graph.list(None).into_iter().filter(|r| !r.status.is_terminal()).collect()
    }

    /// Abort every currently active sub-agent session.
    pub async fn abort_all(&self) {
        let active = self.active.lock().await;
        for run in active.values() {
            run.abort.abort();
            let _ = run.handle.abort().await;
        }
    }

    /// Launch several sub-agents concurrently. Each gets its own
    /// `AbortSignal`, so `abort_all` stops the ones still running without
    /// disturbing ones that already finished.
    pub async fn run_subagents(&self, specs: Vec<SubAgentSpec>) -> Vec<SubAgentOutcome> {
        let futures = specs.into_iter().map(|spec| self.run_subagent(spec, AbortSignal::new()));
        join_all(futures).await
    }

    async fn run_subagent(&self, spec: SubAgentSpec, abort_signal: AbortSignal) -> SubAgentOutcome {
        if spec.engine != SubAgentEngine::Internal {
            return SubAgentOutcome::error(format!("engine {:?} has no in-process driver in this runtime", spec.engine));
        }

        let mut metadata = HashMap::new();
        if let Some(role) = &spec.role {
            metadata.insert("role".to_string(), serde_json::json!(role));
        }
        let run_id = self.run_graph.new_run(NewRunAttrs {
            run_type: "subagent".into(),
            description: spec.description.clone(),
            parent: self.parent_session.clone(),
            metadata,
        });

        let handle = self
            .supervisor
            .start_session(SessionOptions { cwd: ".".into(), parent_session: self.parent_session.clone(), session_file: None })
            .await;

        self.active.lock().await.insert(run_id.clone(), ActiveRun { handle: handle.clone(), abort: abort_signal.clone() });
        let _ = self.run_graph.mark_running(&run_id);

        let final_text = Arc::new(StdMutex::new(String::new()));
        let capture = final_text.clone();
        let _subscription = handle
            .subscribe_callback(move |event| {
                if let SessionEvent::MessageEnd { complete_message } = &event {
                    if let Some(text) = complete_message.as_text() {
                        *capture.lock().unwrap() = text.to_string();
                    }
                }
            })
            .await;

        let outcome = tokio::select! {
            _ = abort_signal.cancelled() => {
                let _ = handle.abort().await;
                let _ = self.run_graph.cancel(&run_id);
                SubAgentOutcome { status: SubAgentStatus::Aborted, result: None, error: None }
            }
            result = tokio::time::timeout(Duration::from_millis(spec.timeout_ms), handle.prompt(spec.prompt.clone())) => {
                match result {
                    Ok(Ok(())) => {
                        let text = final_text.lock().unwrap().clone();
                        let _ = self.run_graph.finish(&run_id, serde_json::json!({"result": text.clone()}));
                        SubAgentOutcome::completed(text)
                    }
                    Ok(Err(e)) => {
                        let _ = self.run_graph.fail(&run_id, e.to_string());
                        SubAgentOutcome::error(e.to_string())
                    }
                    Err(_) => {
                        let _ = self.run_graph.fail(&run_id, "timeout");
                        SubAgentOutcome { status: SubAgentStatus::Timeout, result: None, error: Some("sub-agent timed out".into()) }
                    }
                }
            }
        };

        self.active.lock().await.remove(&run_id);
        let _ = self.supervisor.stop_session(handle.id()).await;
        outcome
    }
}

#[async_trait]
impl SubAgentLauncher for Coordinator {
    async fn launch(&self, spec: SubAgentSpec, abort_signal: AbortSignal) -> SubAgentOutcome {
        self.run_subagent(spec, abort_signal).await
    }

    fn known_roles(&self) -> Vec<String> {
        self.roles.clone()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_config::{AgentConfig, ToolsConfig};
    use kestrel_model::MockProvider;
    use kestrel_tools::{ToolDispatcher, ToolRegistry};

    use crate::session_actor::SessionDeps;

    fn coordinator() -> Coordinator {
        let deps = SessionDeps {
            model: Arc::new(MockProvider),
            dispatcher: Arc::new(ToolDispatcher::new(ToolRegistry::new(), &ToolsConfig::default(), None)),
            run_graph: RunGraph::new(),
            agent_config: AgentConfig::default(),
        };
        let run_graph = deps.run_graph.clone();
        let supervisor = SessionSupervisor::new(deps);
        Coordinator::new(supervisor, run_graph, None, vec!["reviewer".into()])
    }

    fn spec(prompt: &str) -> SubAgentSpec {
        SubAgentSpec { description: "d".into(), prompt: prompt.into(), role: None, engine: SubAgentEngine::Internal, timeout_ms: 5_000 }
    }

    #[tokio::test]
    async fn launch_runs_through_mock_provider_and_completes() {
        let c = coordinator();
        let outcome = c.launch(spec("hello"), AbortSignal::new()).await;
        assert_eq!(outcome.status, SubAgentStatus::Completed);
        assert!(outcome.result.unwrap().contains("MOCK: hello"));
    }

    #[tokio::test]
    async fn non_internal_engine_is_rejected() {
        let c = coordinator();
        let mut s = spec("hello");
        s.engine = SubAgentEngine::Codex;
        let outcome = c.launch(s, AbortSignal::new()).await;
        assert_eq!(outcome.status, SubAgentStatus::Error);
    }

    #[tokio::test]
    async fn run_subagents_tracks_each_to_completion() {
        let c = coordinator();
        let outcomes = c.run_subagents(vec![spec("a"), spec("b")]).await;
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(|o| o.status == SubAgentStatus::Completed));
        assert!(c.list_active().is_empty());
    }

    #[test]
    fn known_roles_reflects_constructor_argument() {
        let c = coordinator();
        assert_eq!(c.known_roles(), vec!["reviewer".to_string()]);
    }
}

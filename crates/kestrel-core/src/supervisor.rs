// SPDX-License-Identifier: Apache-2.0
//! SessionSupervisor (spec §4.I): a registry of live `SessionHandle`s keyed
//! by session id, one level up from the actors themselves. Grounded on the
//! subscriber-table idiom `event_bus.rs` uses internally (`Arc<Mutex<...>>`
//! guarding a `HashMap`), applied here to actor handles instead of event
//! callbacks.
use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::error::ActorError;
use crate::session_actor::{SessionActor, SessionDeps, SessionHandle, SessionOptions};

/// Liveness snapshot for one tracked session.
#[derive(Debug, Clone)]
pub struct SessionHealth {
    pub id: String,
    pub alive: bool,
}

/// Aggregate counts over `health_all()`, handy for a status line.
#[derive(Debug, Clone, Copy, Default)]
pub struct HealthSummary {
    pub total: usize,
    pub alive: usize,
    pub dead: usize,
}

/// Owns every session this process has started. Cheap to clone; the
/// registry itself lives behind an `Arc`.
#[derive(Clone)]
pub struct SessionSupervisor {
    sessions: Arc<Mutex<HashMap<String, SessionHandle>>>,
    deps: SessionDeps,
}

impl SessionSupervisor {
    pub fn new(deps: SessionDeps) -> Self {
        Self { sessions: Arc::new(Mutex::new(HashMap::new())), deps }
    }

    /// Spawn a new session actor and register its handle under its id.
    pub async fn start_session(&self, opts: SessionOptions) -> SessionHandle {
        let handle = SessionActor::spawn(opts, self.deps.clone());
        self.sessions.lock().await.insert(handle.id().to_string(), handle.clone());
        handle
    }

    /// Ask a session to shut down and drop it from the registry. Returns an
    /// error if no session with that id was ever registered here.
    pub async fn stop_session(&self, id: &str) -> Result<(), ActorError> {
        let handle = self.sessions.lock().await.remove(id).ok_or_else(|| ActorError::SessionNotFound(id.to_string()))?;
        handle.shutdown().await
    }

    /// Look up a previously started session's handle.
    pub async fn lookup(&self, id: &str) -> Option<SessionHandle> {
        self.sessions.lock().await.get(id).cloned()
    }

    /// Ids of every session this supervisor currently tracks, including
    /// ones whose actor has since exited (`stop_session` is how those are
    /// pruned; `health_all` is how a caller notices one died on its own).
    pub async fn list_sessions(&self) -> Vec<String> {
        self.sessions.lock().await.keys().cloned().collect()
    }

    /// Liveness of every tracked session.
    pub async fn health_all(&self) -> Vec<SessionHealth> {
        self.sessions
            .lock()
            .await
            .values()
            .map(|h| SessionHealth { id: h.id().to_string(), alive: !h.is_closed() })
            .collect()
    }

    /// Aggregate counts over `health_all()`.
    pub async fn health_summary(&self) -> HealthSummary {
        let health = self.health_all().await;
        let alive = health.iter().filter(|h| h.alive).count();
        HealthSummary { total: health.len(), alive, dead: health.len() - alive }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_config::{AgentConfig, ToolsConfig};
    use kestrel_model::MockProvider;
    use kestrel_rungraph::RunGraph;
    use kestrel_tools::{ToolDispatcher, ToolRegistry};

    fn deps() -> SessionDeps {
        SessionDeps {
            model: Arc::new(MockProvider),
            dispatcher: Arc::new(ToolDispatcher::new(ToolRegistry::new(), &ToolsConfig::default(), None)),
            run_graph: RunGraph::new(),
            agent_config: AgentConfig::default(),
        }
    }

    #[tokio::test]
    async fn stop_unknown_session_errors() {
        let sup = SessionSupervisor::new(deps());
        let err = sup.stop_session("missing").await.unwrap_err();
        assert!(matches!(err, ActorError::SessionNotFound(_)));
    }

    #[tokio::test]
    async fn start_then_lookup_then_stop() {
        let sup = SessionSupervisor::new(deps());
        let handle = sup.start_session(SessionOptions { cwd: "/tmp".into(), parent_session: None, session_file: None }).await;
        let id = handle.id().to_string();

        assert!(sup.lookup(&id).await.is_some());
        assert_eq!(sup.list_sessions().await, vec![id.clone()]);

        sup.stop_session(&id).await.unwrap();
        assert!(sup.lookup(&id).await.is_none());
    }
}

// SPDX-License-Identifier: Apache-2.0
//! SessionState actor (spec §4.C): one `tokio` task owns an `EntryStore`,
//! serializing every caller through a mailbox so concurrent callers never
//! race on the same entry tree (spec §5's single-threaded cooperative actor
//! requirement). One task owns the session and drives its turns end to end;
//! callers only ever reach it through the mailbox, never directly.
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;

use kestrel_config::{AgentConfig, ThinkingLevel};
use kestrel_model::ModelProvider;
use kestrel_rungraph::RunGraph;
use kestrel_session::{EntryKind, EntryStore, MessageContent, MessageRole, SessionLog};
use kestrel_tools::{AbortSignal, ToolDispatcher};
use tokio::sync::{mpsc, oneshot};

use crate::error::ActorError;
use crate::event_bus::{EventBus, EventStream, OverflowStrategy, SessionEvent, Unsubscribe};

/// Shared, cloneable dependencies every session actor needs (spec §4.C/§6).
#[derive(Clone)]
pub struct SessionDeps {
    pub model: Arc<dyn ModelProvider>,
    pub dispatcher: Arc<ToolDispatcher>,
    pub run_graph: RunGraph,
    pub agent_config: AgentConfig,
}

/// Where a new session's `EntryStore` comes from (spec §4.C construction).
pub struct SessionOptions {
    pub cwd: String,
    pub parent_session: Option<String>,
    /// When set, the session resumes from (and later saves to) this file.
    pub session_file: Option<PathBuf>,
}

/// Commands accepted by the actor's mailbox. Every public `SessionHandle`
/// method is a thin wrapper sending one of these and, where a result
/// matters to the caller, awaiting a `oneshot` reply.
pub enum SessionCommand {
    Prompt { text: String, reply: oneshot::Sender<Result<(), ActorError>> },
    Steer { text: String },
    FollowUp { text: String },
    Abort,
    SubscribeCallback { f: Box<dyn Fn(SessionEvent) + Send + Sync>, reply: oneshot::Sender<Unsubscribe> },
    SubscribeStream { max_queue: usize, strategy: OverflowStrategy, reply: oneshot::Sender<EventStream> },
    NavigateTree { entry_id: Option<String>, summarize_abandoned: bool, reply: oneshot::Sender<Result<(), ActorError>> },
    SetThinkingLevel { level: ThinkingLevel },
    SwitchModel { provider: String, model_id: String },
    Reset { reply: oneshot::Sender<()> },
    Compact { reply: oneshot::Sender<Result<(), ActorError>> },
    Save { reply: oneshot::Sender<Result<(), ActorError>> },
    Shutdown,
}

/// What a mid-turn command tells `run_turn`'s select loop to do once
/// applied (spec §5: steering/admin ops may arrive while a turn streams).
pub(crate) enum MidTurnOutcome {
    Continue,
    ResetTurn,
    Shutdown,
}

/// A handle callers use to talk to a session actor. Cheap to clone (it's
/// just a sender), so it can be held by a supervisor, a CLI, and any number
/// of tool callbacks at once.
#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::Sender<SessionCommand>,
    id: String,
}

impl SessionHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Whether the actor's mailbox loop has exited (e.g. after `Shutdown`).
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    pub async fn prompt(&self, text: impl Into<String>) -> Result<(), ActorError> {
        let (tx, rx) = oneshot::channel();
        self.tx.send(SessionCommand::Prompt { text: text.into(), reply: tx }).await?;
        rx.await?
    }

    pub async fn steer(&self, text: impl Into<String>) -> Result<(), ActorError> {
        self.tx.send(SessionCommand::Steer { text: text.into() }).await?;
        Ok(())
    }

    pub async fn follow_up(&self, text: impl Into<String>) -> Result<(), ActorError> {
        self.tx.send(SessionCommand::FollowUp { text: text.into() }).await?;
        Ok(())
    }

    pub async fn abort(&self) -> Result<(), ActorError> {
        self.tx.send(SessionCommand::Abort).await?;
        Ok(())
    }

    pub async fn subscribe_callback(&self, f: impl Fn(SessionEvent) + Send + Sync + 'static) -> Result<Unsubscribe, ActorError> {
        let (tx, rx) = oneshot::channel();
        self.tx.send(SessionCommand::SubscribeCallback { f: Box::new(f), reply: tx }).await?;
        Ok(rx.await?)
    }

    pub async fn subscribe_stream(&self, max_queue: usize, strategy: OverflowStrategy) -> Result<EventStream, ActorError> {
        let (tx, rx) = oneshot::channel();
        self.tx.send(SessionCommand::SubscribeStream { max_queue, strategy, reply: tx }).await?;
        Ok(rx.await?)
    }

    pub async fn navigate_tree(&self, entry_id: Option<String>, summarize_abandoned: bool) -> Result<(), ActorError> {
        let (tx, rx) = oneshot::channel();
        self.tx.send(SessionCommand::NavigateTree { entry_id, summarize_abandoned, reply: tx }).await?;
        rx.await?
    }

    pub async fn set_thinking_level(&self, level: ThinkingLevel) -> Result<(), ActorError> {
        self.tx.send(SessionCommand::SetThinkingLevel { level }).await?;
        Ok(())
    }

    pub async fn switch_model(&self, provider: impl Into<String>, model_id: impl Into<String>) -> Result<(), ActorError> {
        self.tx.send(SessionCommand::SwitchModel { provider: provider.into(), model_id: model_id.into() }).await?;
        Ok(())
    }

    pub async fn reset(&self) -> Result<(), ActorError> {
        let (tx, rx) = oneshot::channel();
        self.tx.send(SessionCommand::Reset { reply: tx }).await?;
        Ok(rx.await?)
    }

    pub async fn compact(&self) -> Result<(), ActorError> {
        let (tx, rx) = oneshot::channel();
        self.tx.send(SessionCommand::Compact { reply: tx }).await?;
        rx.await?
    }

    pub async fn save(&self) -> Result<(), ActorError> {
        let (tx, rx) = oneshot::channel();
        self.tx.send(SessionCommand::Save { reply: tx }).await?;
        rx.await?
    }

    pub async fn shutdown(&self) -> Result<(), ActorError> {
        self.tx.send(SessionCommand::Shutdown).await?;
        Ok(())
    }
}

/// The actor itself. `pub(crate)` fields are read/written directly by
/// `turn_loop`'s `impl SessionActor` block in the sibling module.
pub struct SessionActor {
    pub(crate) store: EntryStore,
    pub(crate) deps: SessionDeps,
    pub(crate) bus: EventBus,
    pub(crate) session_file: Option<PathBuf>,
    pub(crate) streaming: bool,
    pub(crate) steering_queue: VecDeque<String>,
    pub(crate) follow_up_queue: VecDeque<String>,
}

impl SessionActor {
    /// Construct the actor and spawn its mailbox loop, returning a handle.
    pub fn spawn(opts: SessionOptions, deps: SessionDeps) -> SessionHandle {
        let store = match &opts.session_file {
            Some(path) => kestrel_session::load_or_new(path, opts.cwd.clone()),
            None => EntryStore::with_parent(opts.cwd.clone(), opts.parent_session.clone()),
        };
        let id = store.header.id.clone();
        let actor = SessionActor {
            store,
            deps,
            bus: EventBus::new(),
            session_file: opts.session_file,
            streaming: false,
            steering_queue: VecDeque::new(),
            follow_up_queue: VecDeque::new(),
        };
        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(actor.run(rx));
        SessionHandle { tx, id }
    }

    async fn run(mut self, mut mailbox: mpsc::Receiver<SessionCommand>) {
        while let Some(cmd) = mailbox.recv().await {
            match cmd {
                SessionCommand::Prompt { text, reply } => {
                    if self.streaming {
                        let _ = reply.send(Err(ActorError::AlreadyStreaming));
                        continue;
                    }
                    if let Err(e) = self.store.append_message(MessageRole::User, MessageContent::text(text)) {
                        let _ = reply.send(Err(e.into()));
                        continue;
                    }
                    self.streaming = true;
                    let outcome = self.run_turn(&mut mailbox).await;
                    self.streaming = false;
                    let _ = reply.send(Ok(()));
                    if matches!(outcome, MidTurnOutcome::Shutdown) {
                        break;
                    }
                }
                other => {
                    if matches!(self.handle_admin_command(other).await, MidTurnOutcome::Shutdown) {
                        break;
                    }
                }
            }
        }
    }

    /// Apply a non-`Prompt` command outside of an active turn. Shared with
    /// `turn_loop`'s mid-turn `select!` arm via `handle_command_mid_turn`.
    pub(crate) async fn handle_admin_command(&mut self, cmd: SessionCommand) -> MidTurnOutcome {
        match cmd {
            SessionCommand::Prompt { reply, .. } => {
                let _ = reply.send(Err(ActorError::AlreadyStreaming));
                MidTurnOutcome::Continue
            }
            SessionCommand::Steer { text } => {
                self.steering_queue.push_back(text);
                MidTurnOutcome::Continue
            }
            SessionCommand::FollowUp { text } => {
                self.follow_up_queue.push_back(text);
                MidTurnOutcome::Continue
            }
            SessionCommand::Abort => MidTurnOutcome::Continue,
            SessionCommand::SubscribeCallback { f, reply } => {
                let handle = self.bus.subscribe_callback(move |e| f(e));
                let _ = reply.send(handle);
                MidTurnOutcome::Continue
            }
            SessionCommand::SubscribeStream { max_queue, strategy, reply } => {
                let stream = self.bus.subscribe_stream(max_queue, strategy);
                let _ = reply.send(stream);
                MidTurnOutcome::Continue
            }
            SessionCommand::NavigateTree { entry_id, summarize_abandoned, reply } => {
                let _ = reply.send(self.navigate_tree(entry_id, summarize_abandoned));
                MidTurnOutcome::Continue
            }
            SessionCommand::SetThinkingLevel { level } => {
                let _ = self.store.append_entry(kestrel_session::Entry::pending(EntryKind::ThinkingLevelChange { level }));
                MidTurnOutcome::Continue
            }
            SessionCommand::SwitchModel { provider, model_id } => {
                let _ = self.store.append_entry(kestrel_session::Entry::pending(EntryKind::ModelChange { provider, model_id }));
                MidTurnOutcome::Continue
            }
            SessionCommand::Reset { reply } => {
                self.store = EntryStore::with_parent(self.store.header.cwd.clone(), self.store.header.parent_session.clone());
                self.steering_queue.clear();
                self.follow_up_queue.clear();
                let _ = reply.send(());
                MidTurnOutcome::ResetTurn
            }
            SessionCommand::Compact { reply } => {
                let outcome = crate::compact::compact_branch(&mut self.store, self.deps.model.as_ref(), &self.deps.agent_config).await;
                let _ = reply.send(outcome.map(|_| ()));
                MidTurnOutcome::Continue
            }
            SessionCommand::Save { reply } => {
                let _ = reply.send(self.save());
                MidTurnOutcome::Continue
            }
            SessionCommand::Shutdown => MidTurnOutcome::Shutdown,
        }
    }

    fn save(&self) -> Result<(), ActorError> {
        match &self.session_file {
            Some(path) => SessionLog::save(path, &self.store).map_err(ActorError::from),
            None => Ok(()),
        }
    }

    /// Navigate the active leaf to `entry_id` (spec §4.C `navigate_tree`).
    /// When `summarize_abandoned` is set and the current branch diverges
    /// from the target, the diverging suffix is folded into a
    /// `BranchSummary` entry attached to the branch point, rather than
    /// silently discarded — a deterministic text summary, not a model call
    /// (compaction's summary synthesis is the only place that pays for one).
    fn navigate_tree(&mut self, entry_id: Option<String>, summarize_abandoned: bool) -> Result<(), ActorError> {
        if let Some(ref id) = entry_id {
            if self.store.get_entry(id).is_none() {
                return Err(ActorError::EntryNotFound(id.clone()));
            }
        }

        if summarize_abandoned {
            if let Some(current_leaf) = self.store.leaf_id().map(str::to_string) {
                let abandoned = self.store.get_branch(Some(&current_leaf));
                let target_branch = self.store.get_branch(entry_id.as_deref());
                let target_ids: std::collections::HashSet<&str> = target_branch.iter().map(|e| e.id.as_str()).collect();
                let diverging: Vec<String> = abandoned
                    .iter()
                    .filter(|e| !target_ids.contains(e.id.as_str()))
                    .filter_map(|e| match &e.kind {
                        EntryKind::Message { content, .. } => Some(content.as_text()),
                        _ => None,
                    })
                    .collect();
                if !diverging.is_empty() {
                    let summary = diverging.join("\n");
                    self.store.append_entry(kestrel_session::Entry::pending(EntryKind::BranchSummary {
                        from_id: current_leaf,
                        summary,
                        details: serde_json::Value::Null,
                    }))?;
                }
            }
        }

        self.store.set_leaf_id(entry_id).map_err(ActorError::from)
    }
}

// SPDX-License-Identifier: Apache-2.0
//! TurnLoop state machine (spec §4.E): `BuildContext -> ModelStreaming ->
//! {DispatchTools -> BuildContext | TurnComplete | TurnError | Cancelled}`.
//! The model-stream consumption, the tool-call phase split (push tool-call
//! message, execute concurrently, push tool-result messages), and
//! cancellation-preserves-partial-text behavior publish through `EventBus`
//! instead of a single `mpsc::Sender`, interleaving mailbox commands via
//! `tokio::select!` for the full duration of both phases (spec §5's
//! prompt-cancellation requirement).
use futures::future::join_all;
use futures::StreamExt;
use kestrel_model::{CompletionRequest, Message, ModelProvider, ResponseEvent, ToolSchema as ModelToolSchema};
use kestrel_session::{Entry, EntryKind, MessageContent, MessageRole};
use kestrel_tools::{AbortSignal, OutputCategory, Tool, ToolCall, ToolUpdate};
use tokio::sync::mpsc;

use crate::event_bus::{MessageAccumulator, MessageDelta, NotifyLevel, SessionEvent, ToolCallPreview};
use crate::session_actor::{MidTurnOutcome, SessionActor, SessionCommand};

impl SessionActor {
    /// Drives one user prompt through as many model/tool round-trips as it
    /// takes, interleaving the active mailbox so administrative commands
    /// (and `Abort`) are never starved by an in-flight stream or tool call.
    pub(crate) async fn run_turn(&mut self, mailbox: &mut mpsc::Receiver<SessionCommand>) -> MidTurnOutcome {
        let abort_signal = AbortSignal::new();
        let mut rounds: u32 = 0;

        'round: loop {
            while let Some(text) = self.steering_queue.pop_front() {
                if let Err(e) = self.store.append_message(MessageRole::User, MessageContent::text(text)) {
                    tracing::warn!(error = %e, "failed to append steered message");
                }
            }

            let ctx = self.store.build_context();
            if crate::compact::should_compact(&ctx, &self.deps.agent_config, &crate::compact::estimate_tokens) {
                if crate::compact::compact_branch(&mut self.store, self.deps.model.as_ref(), &self.deps.agent_config)
                    .await
                    .is_err()
                {
                    crate::compact::emergency_compact(&mut self.store, self.deps.agent_config.compaction_keep_recent);
                }
            }
            let ctx = self.store.build_context();

            let allow_tools = rounds < self.deps.agent_config.max_tool_rounds;
            let tools: Vec<ModelToolSchema> = if allow_tools {
                self.deps
                    .dispatcher
                    .registry()
                    .schemas()
                    .into_iter()
                    .map(|s| ModelToolSchema { name: s.name, description: s.description, parameters: s.parameters })
                    .collect()
            } else {
                Vec::new()
            };

            let mut messages = Vec::with_capacity(ctx.messages.len() + 1);
            messages.push(Message::system(crate::prompts::system_prompt(&self.deps.agent_config)));
            messages.extend(ctx.messages);

            let request = CompletionRequest { messages, tools, max_tokens: None, temperature: None, thinking_level: ctx.thinking_level };

            let mut stream = match self.deps.model.complete(request).await {
                Ok(s) => s,
                Err(e) => {
                    self.bus.publish(SessionEvent::Error { reason: e.to_string(), partial_state: None }).await;
                    break 'round;
                }
            };

            let mut acc = MessageAccumulator::new();
            let mut pending_calls: Vec<ToolCall> = Vec::new();
            let mut cancelled = false;
            let mut turn_error: Option<String> = None;
            self.bus.publish(SessionEvent::MessageStart { partial_message: acc.partial.clone() }).await;

            'stream: loop {
                tokio::select! {
                    biased;
                    _ = abort_signal.cancelled() => {
                        cancelled = true;
                        break 'stream;
                    }
                    cmd = mailbox.recv() => {
                        match cmd {
                            Some(SessionCommand::Abort) => abort_signal.abort(),
                            Some(other) => match self.handle_admin_command(other).await {
                                MidTurnOutcome::Continue => {}
                                outcome => return outcome,
                            },
                            None => return MidTurnOutcome::Shutdown,
                        }
                    }
                    event = stream.next() => {
                        match event {
                            Some(Ok(ResponseEvent::TextDelta(text))) => {
                                acc.partial.text.push_str(&text);
                                let idx = acc.next_idx();
                                self.bus.publish(SessionEvent::MessageUpdate {
                                    partial_message: acc.partial.clone(),
                                    delta: MessageDelta::TextDelta { idx, text },
                                }).await;
                            }
                            Some(Ok(ResponseEvent::ThinkingDelta(text))) => {
                                acc.partial.thinking.push_str(&text);
                                let idx = acc.next_idx();
                                self.bus.publish(SessionEvent::MessageUpdate {
                                    partial_message: acc.partial.clone(),
                                    delta: MessageDelta::ThinkingDelta { idx, text },
                                }).await;
                            }
                            Some(Ok(ResponseEvent::ToolCall { id, name, arguments })) => {
                                let preview = ToolCallPreview { id: id.clone(), name: name.clone() };
                                acc.partial.tool_calls.push(preview.clone());
                                // The underlying provider interface delivers a tool call as one
                                // complete unit; synthesize the spec's start/end delta pair
                                // back-to-back rather than accumulating across several events.
                                let start_idx = acc.next_idx();
                                self.bus.publish(SessionEvent::MessageUpdate {
                                    partial_message: acc.partial.clone(),
                                    delta: MessageDelta::ToolCallStart { idx: start_idx, tool: preview.clone() },
                                }).await;
                                let end_idx = acc.next_idx();
                                self.bus.publish(SessionEvent::MessageUpdate {
                                    partial_message: acc.partial.clone(),
                                    delta: MessageDelta::ToolCallEnd { idx: end_idx, tool: preview },
                                }).await;
                                let args = serde_json::from_str(&arguments).unwrap_or(serde_json::Value::Null);
                                pending_calls.push(ToolCall { id, name, args });
                            }
                            Some(Ok(ResponseEvent::Usage { input_tokens, output_tokens })) => {
                                tracing::debug!(input_tokens, output_tokens, "model usage");
                            }
                            Some(Ok(ResponseEvent::Done)) | None => break 'stream,
                            Some(Ok(ResponseEvent::Error(reason))) => {
                                turn_error = Some(reason);
                                break 'stream;
                            }
                            Some(Err(e)) => {
                                turn_error = Some(e.to_string());
                                break 'stream;
                            }
                        }
                    }
                }
            }

            let mut blocks = Vec::new();
            if !acc.partial.thinking.is_empty() {
                blocks.push(kestrel_session::ContentBlock::Thinking { thinking: acc.partial.thinking.clone() });
            }
            if !acc.partial.text.is_empty() {
                blocks.push(kestrel_session::ContentBlock::Text { text: acc.partial.text.clone() });
            }
            for call in &pending_calls {
                blocks.push(kestrel_session::ContentBlock::ToolCall {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    arguments: call.args.to_string(),
                });
            }

            let metadata = if cancelled {
                serde_json::json!({"stop_reason": "aborted"})
            } else if turn_error.is_some() {
                serde_json::json!({"stop_reason": "error"})
            } else {
                serde_json::Value::Null
            };
            let content = if blocks.is_empty() { MessageContent::text(String::new()) } else { MessageContent::Blocks(blocks) };

            self.bus.publish(SessionEvent::MessageEnd { complete_message: Message::assistant(acc.partial.text.clone()) }).await;

            if let Err(e) = self.store.append_entry(Entry::pending(EntryKind::Message { role: MessageRole::Assistant, content, metadata })) {
                self.bus.publish(SessionEvent::Error { reason: e.to_string(), partial_state: Some(acc.partial.text.clone()) }).await;
                break 'round;
            }

            if cancelled {
                self.steering_queue.clear();
                self.bus.publish(SessionEvent::AgentEnd { final_messages: Vec::new() }).await;
                break 'round;
            }
            if let Some(reason) = turn_error {
                self.bus.publish(SessionEvent::Error { reason, partial_state: Some(acc.partial.text.clone()) }).await;
                break 'round;
            }

            rounds += 1;

            if pending_calls.is_empty() {
                if let Some(next) = self.follow_up_queue.pop_front() {
                    if let Err(e) = self.store.append_message(MessageRole::User, MessageContent::text(next)) {
                        tracing::warn!(error = %e, "failed to append follow-up message");
                        break 'round;
                    }
                    continue 'round;
                }
                self.steering_queue.clear();
                self.bus.publish(SessionEvent::AgentEnd { final_messages: Vec::new() }).await;
                break 'round;
            }

            // Boundary between ModelStreaming and DispatchTools: a steer
            // that arrived mid-stream must land ahead of the tool-result
            // messages about to be appended, not after them.
            while let Some(text) = self.steering_queue.pop_front() {
                if let Err(e) = self.store.append_message(MessageRole::User, MessageContent::text(text)) {
                    tracing::warn!(error = %e, "failed to append steered message");
                }
            }

            match self.dispatch_tools(pending_calls, &abort_signal, mailbox).await {
                MidTurnOutcome::Continue => {}
                outcome => return outcome,
            }

            if abort_signal.is_aborted() {
                self.steering_queue.clear();
                self.bus.publish(SessionEvent::AgentEnd { final_messages: Vec::new() }).await;
                break 'round;
            }
        }

        MidTurnOutcome::Continue
    }

    /// Execute every tool call from one round concurrently, racing the
    /// combined future against the mailbox so `Abort` reaches every
    /// in-flight call promptly via the `AbortSignal` clone each holds.
    async fn dispatch_tools(&mut self, calls: Vec<ToolCall>, abort_signal: &AbortSignal, mailbox: &mut mpsc::Receiver<SessionCommand>) -> MidTurnOutcome {
        let futures = calls.into_iter().map(|call| {
            let dispatcher = self.deps.dispatcher.clone();
            let bus = self.bus.clone();
            let signal = abort_signal.clone();
            async move {
                bus.publish(SessionEvent::ToolStart { call_id: call.id.clone(), name: call.name.clone(), args: call.args.clone() }).await;

                let update_bus = bus.clone();
                let update_call_id = call.id.clone();
                let on_update = move |update: ToolUpdate| -> bool {
                    let bus = update_bus.clone();
                    let call_id = update_call_id.clone();
                    tokio::spawn(async move {
                        bus.publish(SessionEvent::ToolUpdate { call_id, partial_result: update.partial_text }).await;
                    });
                    true
                };

                let output = dispatcher.execute(call.clone(), signal, &on_update).await;
                let result = if output.is_error { Err(output.text()) } else { Ok(output.text()) };
                bus.publish(SessionEvent::ToolEnd { call_id: call.id.clone(), name: call.name.clone(), result }).await;
                (call, output)
            }
        });

        let combined = join_all(futures);
        tokio::pin!(combined);

        let results = loop {
            tokio::select! {
                biased;
                cmd = mailbox.recv() => {
                    match cmd {
                        Some(SessionCommand::Abort) => abort_signal.abort(),
                        Some(other) => match self.handle_admin_command(other).await {
                            MidTurnOutcome::Continue => {}
                            outcome => return outcome,
                        },
                        None => return MidTurnOutcome::Shutdown,
                    }
                }
                results = &mut combined => break results,
            }
        };

        for (call, output) in results {
            let category = self.deps.dispatcher.registry().get(&call.name).map(|t| t.output_category()).unwrap_or(OutputCategory::Generic);
            let truncated = crate::compact::smart_truncate(&output.text(), category, self.deps.agent_config.tool_result_token_cap);
            let metadata = serde_json::json!({
                "tool_call_id": call.id,
                "tool_name": call.name,
                "is_error": output.is_error,
                "cancelled": output.cancelled,
            });
            if let Err(e) = self.store.append_entry(Entry::pending(EntryKind::Message {
                role: MessageRole::ToolResult,
                content: MessageContent::text(truncated),
                metadata,
            })) {
                tracing::warn!(error = %e, "failed to append tool result entry");
            }
        }

        if abort_signal.is_aborted() {
            self.bus.publish(SessionEvent::Notify { text: "turn aborted during tool dispatch".into(), level: NotifyLevel::Warn }).await;
        }

        MidTurnOutcome::Continue
    }
}

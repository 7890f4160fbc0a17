// SPDX-License-Identifier: Apache-2.0
use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::{CompletionRequest, ResponseEvent};

pub type ResponseStream = Pin<Box<dyn Stream<Item = anyhow::Result<ResponseEvent>> + Send>>;

/// Model-stream interface consumed by the turn loop (spec §6 "Model stream
/// interface (inbound)"). Concrete HTTP-backed adapters are out of scope;
/// callers supply their own `ModelProvider` impl or use `MockProvider`.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Human-readable provider name for status/log output.
    fn name(&self) -> &str;

    /// Model identifier as reported to users and recorded in
    /// `ModelChange` entries.
    fn model_name(&self) -> &str;

    /// Send a completion request and return a streaming response. The
    /// turn loop consumes the stream event-by-event, feeding
    /// `TextDelta`/`ThinkingDelta` to `on_update` and `ToolCall` to the
    /// `ToolDispatcher`, until `Done` or `Error` (or the stream ends).
    async fn complete(&self, req: CompletionRequest) -> anyhow::Result<ResponseStream>;
}

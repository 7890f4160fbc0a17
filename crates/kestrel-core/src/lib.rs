// SPDX-License-Identifier: Apache-2.0
//! Runtime core: the session actor, its turn loop, compaction, the event
//! bus, and the supervisor/coordinator layers built on top of it.
mod compact;
mod coordinator;
mod error;
mod event_bus;
mod prompts;
mod session_actor;
mod supervisor;
mod template;
mod turn_loop;

pub use coordinator::Coordinator;
pub use error::ActorError;
pub use event_bus::{
    EventBus, EventStream, MessageAccumulator, MessageDelta, NotifyLevel, OverflowStrategy,
    PartialMessage, SessionEvent, ToolCallPreview, Unsubscribe,
};
pub use session_actor::{SessionActor, SessionCommand, SessionDeps, SessionHandle, SessionOptions};
pub use supervisor::{HealthSummary, SessionHealth, SessionSupervisor};
pub use template::{interpolate, interpolate_named};

pub use compact::{estimate_tokens, should_compact, CompactionOutcome};

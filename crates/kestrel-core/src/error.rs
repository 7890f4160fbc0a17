// SPDX-License-Identifier: Apache-2.0
use thiserror::Error;

/// Closed error taxonomy for the session actor (spec §7).
#[derive(Debug, Error)]
pub enum ActorError {
    #[error("a turn is already streaming")]
    AlreadyStreaming,
    #[error("entry not found: {0}")]
    EntryNotFound(String),
    #[error("session not found: {0}")]
    SessionNotFound(String),
    #[error("cannot compact: {0}")]
    CannotCompact(String),
    #[error("io error: {0}")]
    Io(#[from] kestrel_session::SessionError),
    #[error("session actor is closed")]
    Closed,
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for ActorError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        ActorError::Closed
    }
}

impl From<tokio::sync::oneshot::error::RecvError> for ActorError {
    fn from(_: tokio::sync::oneshot::error::RecvError) -> Self {
        ActorError::Closed
    }
}

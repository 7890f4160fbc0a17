// SPDX-License-Identifier: Apache-2.0
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RunGraphError {
    #[error("run not found: {0}")]
    NotFound(String),
    #[error("invalid status transition for run {id}: {from:?} -> {to:?}")]
    InvalidTransition { id: String, from: crate::RunStatus, to: crate::RunStatus },
    #[error("timed out waiting for run(s) to complete")]
    Timeout,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

// SPDX-License-Identifier: Apache-2.0
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),
    #[error("tool failed ({kind}): {message}")]
    ToolFailed { kind: String, message: String },
    #[error("timed out waiting for approval")]
    TimedOutWaitingForApproval,
    #[error("tool call rejected")]
    Rejected,
}

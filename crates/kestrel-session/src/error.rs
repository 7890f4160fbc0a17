// SPDX-License-Identifier: Apache-2.0
use thiserror::Error;

/// Closed error taxonomy for `EntryStore`/`SessionLog` (spec §7).
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("entry not found: {0}")]
    NotFound(String),
    #[error("entry id collision: {0}")]
    IdCollision(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("session file is empty")]
    EmptyFile,
    #[error("unsupported session file version: {0}")]
    UnsupportedVersion(u32),
}

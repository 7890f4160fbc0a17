// SPDX-License-Identifier: Apache-2.0
mod bash;
mod task;

pub use bash::BashTool;
pub use task::{SubAgentEngine, SubAgentLauncher, SubAgentOutcome, SubAgentSpec, SubAgentStatus, TaskTool};

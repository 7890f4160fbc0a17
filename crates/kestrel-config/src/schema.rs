// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};

/// Serde default helper — returns `true`.
fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub rungraph: RunGraphConfig,
    #[serde(default)]
    pub process: ProcessConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Provider identifier, forwarded verbatim to whatever `ModelProvider`
    /// the caller constructs. Not validated here — concrete provider wiring
    /// lives outside this crate.
    pub provider: String,
    /// Model name forwarded to the provider API.
    pub name: String,
    /// Environment variable that holds the API key (read at runtime).
    pub api_key_env: Option<String>,
    /// Maximum tokens to request in a single completion.
    pub max_tokens: Option<u32>,
    /// Sampling temperature (0.0-2.0).
    pub temperature: Option<f32>,
    /// Attach a provider-side prompt-cache marker to the system message,
    /// where the provider supports it.
    #[serde(default = "default_true")]
    pub cache_system_prompt: bool,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: "mock".to_string(),
            name: "mock-model".to_string(),
            api_key_env: None,
            max_tokens: None,
            temperature: None,
            cache_system_prompt: true,
        }
    }
}

/// Compaction checkpoint format.
///
/// `structured` (default): a typed Markdown checkpoint with fixed sections.
/// `narrative`: a free-form summarization prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompactionStrategy {
    #[default]
    Structured,
    Narrative,
}

impl std::fmt::Display for CompactionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompactionStrategy::Structured => write!(f, "structured"),
            CompactionStrategy::Narrative => write!(f, "narrative"),
        }
    }
}

/// Model "reasoning effort" level, recorded as a `ThinkingLevelChange` entry
/// and carried in `Context`. Orthogonal to the model/provider choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThinkingLevel {
    #[default]
    Off,
    Low,
    Medium,
    High,
}

impl std::fmt::Display for ThinkingLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ThinkingLevel::Off => write!(f, "off"),
            ThinkingLevel::Low => write!(f, "low"),
            ThinkingLevel::Medium => write!(f, "medium"),
            ThinkingLevel::High => write!(f, "high"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Maximum number of autonomous tool-call rounds before the turn loop
    /// forces a tool-free wrap-up turn.
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: u32,
    /// Total context window in tokens, used with `compaction_threshold` and
    /// `compaction_overhead_reserve` to decide when to compact
    /// (spec §4.E "context_window - reserve_tokens").
    #[serde(default = "default_context_window")]
    pub context_window: usize,
    /// Token fraction at which proactive compaction triggers (0.0-1.0).
    #[serde(default = "default_compaction_threshold")]
    pub compaction_threshold: f32,
    /// Number of recent non-system messages preserved verbatim during
    /// compaction (the "keep tail" per §4.A `first_kept_entry_id`).
    #[serde(default = "default_compaction_keep_recent")]
    pub compaction_keep_recent: usize,
    #[serde(default)]
    pub compaction_strategy: CompactionStrategy,
    /// Maximum tokens allowed for a single tool result before truncation.
    #[serde(default = "default_tool_result_token_cap")]
    pub tool_result_token_cap: usize,
    /// Fraction of the context window reserved for schema/tool overhead and
    /// token-estimate error (spec §4.E "context_window - reserve_tokens").
    #[serde(default = "default_compaction_overhead_reserve")]
    pub compaction_overhead_reserve: f32,
    /// Starting thinking level for newly created sessions.
    #[serde(default)]
    pub default_thinking_level: ThinkingLevel,
    /// System prompt override; `None` uses the built-in prompt.
    #[serde(default)]
    pub system_prompt: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_tool_rounds: default_max_tool_rounds(),
            context_window: default_context_window(),
            compaction_threshold: default_compaction_threshold(),
            compaction_keep_recent: default_compaction_keep_recent(),
            compaction_strategy: CompactionStrategy::default(),
            tool_result_token_cap: default_tool_result_token_cap(),
            compaction_overhead_reserve: default_compaction_overhead_reserve(),
            default_thinking_level: ThinkingLevel::default(),
            system_prompt: None,
        }
    }
}

fn default_max_tool_rounds() -> u32 {
    50
}
fn default_context_window() -> usize {
    200_000
}
fn default_compaction_threshold() -> f32 {
    0.85
}
fn default_compaction_keep_recent() -> usize {
    6
}
fn default_tool_result_token_cap() -> usize {
    4_000
}
fn default_compaction_overhead_reserve() -> f32 {
    0.10
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Auto-approve shell commands matching these glob patterns.
    #[serde(default = "default_auto_approve")]
    pub auto_approve_patterns: Vec<String>,
    /// Block shell commands matching these glob patterns.
    #[serde(default)]
    pub deny_patterns: Vec<String>,
    /// Timeout in seconds for a single tool call.
    #[serde(default = "default_tool_timeout_secs")]
    pub timeout_secs: u64,
    /// Timeout in seconds while awaiting an external approval decision.
    #[serde(default = "default_approval_timeout_secs")]
    pub approval_timeout_secs: u64,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            auto_approve_patterns: default_auto_approve(),
            deny_patterns: Vec::new(),
            timeout_secs: default_tool_timeout_secs(),
            approval_timeout_secs: default_approval_timeout_secs(),
        }
    }
}

fn default_auto_approve() -> Vec<String> {
    vec!["cat *".to_string(), "ls*".to_string(), "ls".to_string()]
}
fn default_tool_timeout_secs() -> u64 {
    30
}
fn default_approval_timeout_secs() -> u64 {
    120
}

/// Configuration for the shared `RunGraph` table (§4.G).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunGraphConfig {
    /// Terminal records older than this TTL are reaped by `cleanup`.
    #[serde(default = "default_run_ttl_secs")]
    pub ttl_seconds: u64,
}

impl Default for RunGraphConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: default_run_ttl_secs(),
        }
    }
}

fn default_run_ttl_secs() -> u64 {
    24 * 60 * 60
}

/// Configuration for `ProcessManager` (§4.H).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessConfig {
    /// Maximum in-memory log bytes retained per process before the full
    /// capture spills to a tmp file.
    #[serde(default = "default_process_max_bytes")]
    pub max_bytes: usize,
    /// Maximum in-memory log lines retained (tail-truncated) per `poll`.
    #[serde(default = "default_process_max_lines")]
    pub max_lines: usize,
    /// Terminal process records older than this TTL are reaped by
    /// `clear_old`.
    #[serde(default = "default_run_ttl_secs")]
    pub ttl_seconds: u64,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            max_bytes: default_process_max_bytes(),
            max_lines: default_process_max_lines(),
            ttl_seconds: default_run_ttl_secs(),
        }
    }
}

fn default_process_max_bytes() -> usize {
    200_000
}
fn default_process_max_lines() -> usize {
    2_000
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_default_has_mock_provider() {
        let cfg = Config::default();
        assert_eq!(cfg.model.provider, "mock");
    }

    #[test]
    fn agent_default_thinking_level_is_off() {
        assert_eq!(AgentConfig::default().default_thinking_level, ThinkingLevel::Off);
    }

    #[test]
    fn thinking_level_display() {
        assert_eq!(ThinkingLevel::High.to_string(), "high");
    }

    #[test]
    fn compaction_strategy_display() {
        assert_eq!(CompactionStrategy::Narrative.to_string(), "narrative");
    }

    #[test]
    fn tools_default_auto_approves_ls() {
        let cfg = ToolsConfig::default();
        assert!(cfg.auto_approve_patterns.iter().any(|p| p.starts_with("ls")));
    }

    #[test]
    fn rungraph_default_ttl_is_24h() {
        assert_eq!(RunGraphConfig::default().ttl_seconds, 86_400);
    }

    #[test]
    fn round_trip_yaml() {
        let cfg = Config::default();
        let yaml = serde_yaml::to_string(&cfg).unwrap();
        let back: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back.model.provider, cfg.model.provider);
        assert_eq!(back.agent.max_tool_rounds, cfg.agent.max_tool_rounds);
    }
}

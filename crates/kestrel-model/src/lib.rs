// SPDX-License-Identifier: Apache-2.0
mod mock;
mod provider;
mod types;

pub use mock::{MockProvider, ScriptedMockProvider};
pub use provider::{ModelProvider, ResponseStream};
pub use types::{
    CompletionRequest, ContentPart, FunctionCall, Message, MessageContent, ResponseEvent, Role,
    ToolSchema,
};

use kestrel_config::ModelConfig;

/// Construct a boxed `ModelProvider` from configuration.
///
/// Concrete HTTP-backed drivers (OpenAI, Anthropic, ...) are not shipped by
/// this crate; callers that need one register it by matching on
/// `cfg.provider` before falling through to this function. The only driver
/// resolved here is the deterministic `mock` provider used for local
/// development and tests.
pub fn from_config(cfg: &ModelConfig) -> anyhow::Result<Box<dyn ModelProvider>> {
    match cfg.provider.as_str() {
        "mock" => Ok(Box::new(MockProvider)),
        other => anyhow::bail!(
            "unknown model provider '{other}' (only 'mock' is built in; register a driver upstream)"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_config_resolves_mock() {
        let cfg = ModelConfig::default();
        let provider = from_config(&cfg).unwrap();
        assert_eq!(provider.name(), "mock");
    }

    #[test]
    fn from_config_rejects_unknown_provider() {
        let mut cfg = ModelConfig::default();
        cfg.provider = "nonexistent".into();
        assert!(from_config(&cfg).is_err());
    }
}

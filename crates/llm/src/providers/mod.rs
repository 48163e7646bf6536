//! Provider capability contract and vendor adapters.
//!
//! Every vendor is one implementation of [`LlmProvider`]. Adapters are
//! constructed through [`ProviderFactory`] from a [`ProviderConfig`] and are
//! treated as immutable for the duration of a call.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

use crate::errors::Result;

pub mod anthropic_provider;
pub mod config;
pub mod factory;
pub mod ollama_provider;
pub mod openai_compatible;
mod transport;

pub use anthropic_provider::AnthropicProvider;
pub use config::{DeploymentMode, ProviderConfig, ProviderType, DEFAULT_TENANT};
pub use factory::{ProviderBuildContext, ProviderConstructor, ProviderFactory};
pub use ollama_provider::OllamaProvider;
pub use openai_compatible::OpenAiCompatibleProvider;

/// Upper bound for a single liveness probe.
pub const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// Request parameters that accompany a prompt.
///
/// `extra` is ordered so two equal option sets always hash to the same
/// cache key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, Value>,
}

impl GenerationOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_system_prompt(mut self, system_prompt: &str) -> Self {
        self.system_prompt = Some(system_prompt.to_string());
        self
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = Some(model.to_string());
        self
    }

    pub fn with_parameters(mut self, max_tokens: Option<u32>, temperature: Option<f32>) -> Self {
        self.max_tokens = max_tokens;
        self.temperature = temperature;
        self
    }

    pub fn with_stop(mut self, stop: &str) -> Self {
        self.stop.push(stop.to_string());
        self
    }

    pub fn with_extra(mut self, key: &str, value: Value) -> Self {
        self.extra.insert(key.to_string(), value);
        self
    }
}

/// Token usage statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl TokenUsage {
    /// Counts come straight from vendor payloads; the total saturates.
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens.saturating_add(completion_tokens),
        }
    }
}

/// Outcome of one generation.
///
/// Adapters fill the payload fields; the switcher stamps `provider_id`,
/// `cached` and `degraded` on the way out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationResult {
    pub text: String,
    pub model: String,
    #[serde(default)]
    pub provider_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
    #[serde(default)]
    pub latency_ms: u64,
    #[serde(default)]
    pub cached: bool,
    #[serde(default)]
    pub degraded: bool,
}

impl GenerationResult {
    pub fn new(text: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            model: model.into(),
            provider_id: String::new(),
            finish_reason: None,
            usage: None,
            latency_ms: 0,
            cached: false,
            degraded: false,
        }
    }
}

/// Static descriptive data about a provider instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderMetadata {
    pub provider_type: ProviderType,
    pub deployment_mode: DeploymentMode,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
}

/// Unified LLM Provider trait
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Run one generation. Vendor failures must already be classified:
    /// rate limits as `RateLimited`, auth/bad-request as `ClientError`,
    /// connection failures as `ProviderUnavailable`, and so on.
    async fn generate(&self, prompt: &str, options: &GenerationOptions)
        -> Result<GenerationResult>;

    /// Cheap, side-effect-free liveness probe. Any error counts as `false`.
    async fn health_check(&self) -> bool;

    /// Structural validation only; never touches the network.
    fn validate_config(&self) -> Result<()>;

    fn metadata(&self) -> ProviderMetadata;

    /// Hard deadline the switcher applies to each `generate` attempt.
    fn request_timeout(&self) -> Duration {
        match self.metadata().deployment_mode {
            DeploymentMode::Local => Duration::from_secs(30),
            DeploymentMode::Cloud => Duration::from_secs(60),
        }
    }

    /// Get human-readable name
    fn name(&self) -> String {
        let metadata = self.metadata();
        format!("{} ({})", metadata.provider_type, metadata.model)
    }
}

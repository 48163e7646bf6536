use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::anthropic_provider::AnthropicProvider;
use super::config::{DeploymentMode, ProviderConfig, ProviderType};
use super::ollama_provider::OllamaProvider;
use super::openai_compatible::OpenAiCompatibleProvider;
use super::LlmProvider;
use crate::errors::{LlmError, Result};

/// Inputs a constructor needs besides the stored config.
#[derive(Debug, Clone)]
pub struct ProviderBuildContext {
    /// Decrypted API key, if the config carried credentials.
    pub api_key: Option<String>,
    pub request_timeout: Duration,
}

pub type ProviderConstructor = Arc<
    dyn Fn(&ProviderConfig, ProviderBuildContext) -> Result<Arc<dyn LlmProvider>> + Send + Sync,
>;

/// Maps a provider type tag to the adapter that serves it.
#[derive(Clone)]
pub struct ProviderFactory {
    constructors: HashMap<String, ProviderConstructor>,
    local_timeout: Duration,
    cloud_timeout: Duration,
}

impl ProviderFactory {
    /// Factory with no adapters registered.
    pub fn empty() -> Self {
        Self {
            constructors: HashMap::new(),
            local_timeout: Duration::from_secs(30),
            cloud_timeout: Duration::from_secs(60),
        }
    }

    /// Factory with every built-in vendor adapter.
    pub fn with_builtin() -> Self {
        let mut factory = Self::empty();

        for provider_type in [
            ProviderType::OpenAI,
            ProviderType::Qwen,
            ProviderType::Zhipu,
            ProviderType::Baidu,
            ProviderType::Tencent,
            ProviderType::Docker,
        ] {
            factory.register(
                provider_type.as_str(),
                Arc::new(|config: &ProviderConfig, ctx: ProviderBuildContext| -> Result<Arc<dyn LlmProvider>> {
                    let provider = OpenAiCompatibleProvider::from_config(config, ctx)?;
                    Ok(Arc::new(provider) as Arc<dyn LlmProvider>)
                }),
            );
        }

        factory.register(
            ProviderType::Anthropic.as_str(),
            Arc::new(|config: &ProviderConfig, ctx: ProviderBuildContext| -> Result<Arc<dyn LlmProvider>> {
                let provider = AnthropicProvider::from_config(config, ctx)?;
                Ok(Arc::new(provider) as Arc<dyn LlmProvider>)
            }),
        );
        factory.register(
            ProviderType::Ollama.as_str(),
            Arc::new(|config: &ProviderConfig, ctx: ProviderBuildContext| -> Result<Arc<dyn LlmProvider>> {
                let provider = OllamaProvider::from_config(config, ctx)?;
                Ok(Arc::new(provider) as Arc<dyn LlmProvider>)
            }),
        );

        factory
    }

    /// Default request deadlines when a config has no `timeout_secs`.
    pub fn with_timeouts(mut self, local: Duration, cloud: Duration) -> Self {
        self.local_timeout = local;
        self.cloud_timeout = cloud;
        self
    }

    /// Register (or replace) the constructor for a type tag.
    pub fn register(&mut self, tag: &str, constructor: ProviderConstructor) {
        let tag = tag.trim().to_lowercase();
        debug!(provider_type = %tag, "Registered provider constructor");
        self.constructors.insert(tag, constructor);
    }

    pub fn supports(&self, provider_type: &ProviderType) -> bool {
        self.constructors.contains_key(provider_type.as_str())
    }

    pub fn request_timeout_for(&self, config: &ProviderConfig) -> Duration {
        match config.timeout_secs {
            Some(secs) => Duration::from_secs(secs.max(1)),
            None => match config.deployment_mode {
                DeploymentMode::Local => self.local_timeout,
                DeploymentMode::Cloud => self.cloud_timeout,
            },
        }
    }

    pub fn create(
        &self,
        config: &ProviderConfig,
        api_key: Option<String>,
    ) -> Result<Arc<dyn LlmProvider>> {
        let constructor = self
            .constructors
            .get(config.provider_type.as_str())
            .ok_or_else(|| {
                LlmError::config(format!(
                    "unsupported provider type '{}'",
                    config.provider_type
                ))
            })?;

        let ctx = ProviderBuildContext {
            api_key,
            request_timeout: self.request_timeout_for(config),
        };
        constructor(config, ctx)
    }
}

impl Default for ProviderFactory {
    fn default() -> Self {
        Self::with_builtin()
    }
}

impl std::fmt::Debug for ProviderFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut tags: Vec<_> = self.constructors.keys().collect();
        tags.sort();
        f.debug_struct("ProviderFactory")
            .field("provider_types", &tags)
            .field("local_timeout", &self.local_timeout)
            .field("cloud_timeout", &self.cloud_timeout)
            .finish()
    }
}

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, instrument};

use super::config::{DeploymentMode, ProviderConfig, ProviderType};
use super::factory::ProviderBuildContext;
use super::transport;
use super::{
    GenerationOptions, GenerationResult, LlmProvider, ProviderMetadata, TokenUsage,
    HEALTH_CHECK_TIMEOUT,
};
use crate::errors::{LlmError, Result};
use crate::retry::duration_ms;

const LABEL: &str = "ollama";

/// Locally hosted models behind an Ollama server.
#[derive(Debug, Clone)]
pub struct OllamaProvider {
    model: String,
    endpoint: String,
    deployment_mode: DeploymentMode,
    client: Client,
    timeout: Duration,
}

impl OllamaProvider {
    pub fn from_config(config: &ProviderConfig, ctx: ProviderBuildContext) -> Result<Self> {
        let client = transport::build_client(LABEL, ctx.request_timeout)?;
        Ok(Self {
            model: config.model.clone(),
            endpoint: config
                .endpoint
                .as_deref()
                .unwrap_or_default()
                .trim_end_matches('/')
                .to_string(),
            deployment_mode: config.deployment_mode,
            client,
            timeout: ctx.request_timeout,
        })
    }

    fn build_request(&self, prompt: &str, options: &GenerationOptions) -> OllamaChatRequest {
        let mut messages = Vec::new();
        if let Some(system_prompt) = &options.system_prompt {
            messages.push(OllamaMessage {
                role: "system".to_string(),
                content: system_prompt.clone(),
            });
        }
        messages.push(OllamaMessage {
            role: "user".to_string(),
            content: prompt.to_string(),
        });

        OllamaChatRequest {
            model: options.model.clone().unwrap_or_else(|| self.model.clone()),
            messages,
            stream: false,
            options: OllamaOptions {
                temperature: options.temperature,
                num_predict: options.max_tokens,
                stop: options.stop.clone(),
            },
        }
    }
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    #[instrument(skip(self, prompt, options), fields(provider = LABEL, model = %self.model))]
    async fn generate(&self, prompt: &str, options: &GenerationOptions) -> Result<GenerationResult> {
        let started = Instant::now();
        let body = self.build_request(prompt, options);

        let response = self
            .client
            .post(format!("{}/api/chat", self.endpoint))
            .json(&body)
            .send()
            .await
            .map_err(|e| transport::from_reqwest(LABEL, e, self.timeout))?;
        let response = transport::check_status(LABEL, response).await?;

        let parsed: OllamaChatResponse = response
            .json()
            .await
            .map_err(|e| transport::from_reqwest(LABEL, e, self.timeout))?;
        let message = parsed
            .message
            .ok_or_else(|| transport::malformed(LABEL, "response has no message"))?;

        let mut result = GenerationResult::new(message.content, parsed.model.unwrap_or_else(|| self.model.clone()));
        result.finish_reason = parsed.done_reason;
        if parsed.prompt_eval_count.is_some() || parsed.eval_count.is_some() {
            result.usage = Some(TokenUsage::new(
                parsed.prompt_eval_count.unwrap_or(0),
                parsed.eval_count.unwrap_or(0),
            ));
        }
        result.latency_ms = duration_ms(started.elapsed());

        debug!(latency_ms = result.latency_ms, "Ollama chat finished");
        Ok(result)
    }

    async fn health_check(&self) -> bool {
        let request = self
            .client
            .get(format!("{}/api/tags", self.endpoint))
            .timeout(HEALTH_CHECK_TIMEOUT);
        match request.send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!(provider = LABEL, error = %e, "Health probe failed");
                false
            }
        }
    }

    fn validate_config(&self) -> Result<()> {
        if self.model.trim().is_empty() {
            return Err(LlmError::config("ollama: model is required"));
        }
        if self.endpoint.is_empty() {
            return Err(LlmError::config("ollama: endpoint is required"));
        }
        transport::validate_endpoint(LABEL, &self.endpoint)
    }

    fn metadata(&self) -> ProviderMetadata {
        ProviderMetadata {
            provider_type: ProviderType::Ollama,
            deployment_mode: self.deployment_mode,
            model: self.model.clone(),
            region: None,
        }
    }

    fn request_timeout(&self) -> Duration {
        self.timeout
    }
}

#[derive(Debug, Serialize)]
struct OllamaChatRequest {
    model: String,
    messages: Vec<OllamaMessage>,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Debug, Serialize, Deserialize)]
struct OllamaMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    stop: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    message: Option<OllamaMessage>,
    #[serde(default)]
    done_reason: Option<String>,
    #[serde(default)]
    prompt_eval_count: Option<u32>,
    #[serde(default)]
    eval_count: Option<u32>,
}

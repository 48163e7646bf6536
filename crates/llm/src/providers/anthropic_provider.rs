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

const DEFAULT_ENDPOINT: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 1024;
const LABEL: &str = "anthropic";

#[derive(Debug, Clone)]
pub struct AnthropicProvider {
    model: String,
    endpoint: String,
    region: Option<String>,
    api_key: Option<String>,
    client: Client,
    timeout: Duration,
}

impl AnthropicProvider {
    pub fn from_config(config: &ProviderConfig, ctx: ProviderBuildContext) -> Result<Self> {
        let client = transport::build_client(LABEL, ctx.request_timeout)?;
        let endpoint = config.endpoint.as_deref().unwrap_or(DEFAULT_ENDPOINT);

        Ok(Self {
            model: config.model.clone(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            region: config.region.clone(),
            api_key: ctx.api_key.filter(|key| !key.trim().is_empty()),
            client,
            timeout: ctx.request_timeout,
        })
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let builder = builder.header("anthropic-version", API_VERSION);
        match &self.api_key {
            Some(key) => builder.header("x-api-key", key),
            None => builder,
        }
    }

    fn build_request(&self, prompt: &str, options: &GenerationOptions) -> MessagesRequest {
        MessagesRequest {
            model: options.model.clone().unwrap_or_else(|| self.model.clone()),
            max_tokens: options.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            system: options.system_prompt.clone(),
            messages: vec![MessagesInput {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            temperature: options.temperature,
            stop_sequences: options.stop.clone(),
        }
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    #[instrument(skip(self, prompt, options), fields(provider = LABEL, model = %self.model))]
    async fn generate(&self, prompt: &str, options: &GenerationOptions) -> Result<GenerationResult> {
        let started = Instant::now();
        let body = self.build_request(prompt, options);

        let response = self
            .request(
                self.client
                    .post(format!("{}/v1/messages", self.endpoint))
                    .json(&body),
            )
            .send()
            .await
            .map_err(|e| transport::from_reqwest(LABEL, e, self.timeout))?;
        let response = transport::check_status(LABEL, response).await?;

        let parsed: MessagesResponse = response
            .json()
            .await
            .map_err(|e| transport::from_reqwest(LABEL, e, self.timeout))?;

        let text: String = parsed
            .content
            .iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text.as_deref())
            .collect();
        if text.is_empty() && parsed.content.is_empty() {
            return Err(transport::malformed(LABEL, "response contained no content blocks"));
        }

        let mut result = GenerationResult::new(text, parsed.model.unwrap_or_else(|| self.model.clone()));
        result.finish_reason = parsed.stop_reason;
        result.usage = parsed
            .usage
            .map(|u| TokenUsage::new(u.input_tokens, u.output_tokens));
        result.latency_ms = duration_ms(started.elapsed());

        debug!(latency_ms = result.latency_ms, "Anthropic message finished");
        Ok(result)
    }

    async fn health_check(&self) -> bool {
        let request = self.request(
            self.client
                .get(format!("{}/v1/models", self.endpoint))
                .timeout(HEALTH_CHECK_TIMEOUT),
        );
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
            return Err(LlmError::config("anthropic: model is required"));
        }
        transport::validate_endpoint(LABEL, &self.endpoint)?;
        if self.api_key.is_none() {
            return Err(LlmError::config("anthropic: API key is required"));
        }
        Ok(())
    }

    fn metadata(&self) -> ProviderMetadata {
        ProviderMetadata {
            provider_type: ProviderType::Anthropic,
            deployment_mode: DeploymentMode::Cloud,
            model: self.model.clone(),
            region: self.region.clone(),
        }
    }

    fn request_timeout(&self) -> Duration {
        self.timeout
    }
}

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<MessagesInput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    stop_sequences: Vec<String>,
}

#[derive(Debug, Serialize)]
struct MessagesInput {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    usage: Option<MessagesUsage>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessagesUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

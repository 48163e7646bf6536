use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
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

/// Adapter for every vendor that speaks the `/chat/completions` dialect.
///
/// OpenAI, Qwen (DashScope compatible mode), Zhipu, Baidu Qianfan v2,
/// Tencent Hunyuan and local Docker model runners all share it; only the
/// default endpoint differs.
#[derive(Debug, Clone)]
pub struct OpenAiCompatibleProvider {
    provider_type: ProviderType,
    deployment_mode: DeploymentMode,
    model: String,
    endpoint: String,
    region: Option<String>,
    api_key: Option<String>,
    client: Client,
    timeout: Duration,
}

pub fn default_endpoint(provider_type: &ProviderType) -> Option<&'static str> {
    match provider_type {
        ProviderType::OpenAI => Some("https://api.openai.com/v1"),
        ProviderType::Qwen => Some("https://dashscope.aliyuncs.com/compatible-mode/v1"),
        ProviderType::Zhipu => Some("https://open.bigmodel.cn/api/paas/v4"),
        ProviderType::Baidu => Some("https://qianfan.baidubce.com/v2"),
        ProviderType::Tencent => Some("https://api.hunyuan.cloud.tencent.com/v1"),
        _ => None,
    }
}

impl OpenAiCompatibleProvider {
    pub fn from_config(config: &ProviderConfig, ctx: ProviderBuildContext) -> Result<Self> {
        let endpoint = config
            .endpoint
            .clone()
            .or_else(|| default_endpoint(&config.provider_type).map(str::to_string))
            .unwrap_or_default();
        let client = transport::build_client(config.provider_type.as_str(), ctx.request_timeout)?;

        Ok(Self {
            provider_type: config.provider_type.clone(),
            deployment_mode: config.deployment_mode,
            model: config.model.clone(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            region: config.region.clone(),
            api_key: ctx.api_key.filter(|key| !key.trim().is_empty()),
            client,
            timeout: ctx.request_timeout,
        })
    }

    fn label(&self) -> &str {
        self.provider_type.as_str()
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    fn build_body(&self, prompt: &str, options: &GenerationOptions) -> Value {
        let mut messages = Vec::new();
        if let Some(system_prompt) = &options.system_prompt {
            messages.push(ChatMessage {
                role: "system".to_string(),
                content: system_prompt.clone(),
            });
        }
        messages.push(ChatMessage {
            role: "user".to_string(),
            content: prompt.to_string(),
        });

        let mut body = Map::new();
        for (key, value) in &options.extra {
            body.insert(key.clone(), value.clone());
        }
        body.insert(
            "model".to_string(),
            Value::String(options.model.clone().unwrap_or_else(|| self.model.clone())),
        );
        body.insert("messages".to_string(), serde_json::json!(messages));
        body.insert("stream".to_string(), Value::Bool(false));
        if let Some(max_tokens) = options.max_tokens {
            body.insert("max_tokens".to_string(), Value::from(max_tokens));
        }
        if let Some(temperature) = options.temperature {
            body.insert("temperature".to_string(), Value::from(temperature));
        }
        if !options.stop.is_empty() {
            body.insert("stop".to_string(), serde_json::json!(options.stop));
        }
        Value::Object(body)
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatibleProvider {
    #[instrument(skip(self, prompt, options), fields(provider = %self.provider_type, model = %self.model))]
    async fn generate(&self, prompt: &str, options: &GenerationOptions) -> Result<GenerationResult> {
        let started = Instant::now();
        let body = self.build_body(prompt, options);

        let response = self
            .authorize(
                self.client
                    .post(format!("{}/chat/completions", self.endpoint))
                    .json(&body),
            )
            .send()
            .await
            .map_err(|e| transport::from_reqwest(self.label(), e, self.timeout))?;
        let response = transport::check_status(self.label(), response).await?;

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| transport::from_reqwest(self.label(), e, self.timeout))?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| transport::malformed(self.label(), "response contained no choices"))?;
        let text = choice
            .message
            .content
            .ok_or_else(|| transport::malformed(self.label(), "choice has no message content"))?;

        let mut result = GenerationResult::new(text, parsed.model.unwrap_or_else(|| self.model.clone()));
        result.finish_reason = choice.finish_reason;
        result.usage = parsed
            .usage
            .map(|u| TokenUsage::new(u.prompt_tokens, u.completion_tokens));
        result.latency_ms = duration_ms(started.elapsed());

        debug!(latency_ms = result.latency_ms, "Chat completion finished");
        Ok(result)
    }

    async fn health_check(&self) -> bool {
        let request = self.authorize(
            self.client
                .get(format!("{}/models", self.endpoint))
                .timeout(HEALTH_CHECK_TIMEOUT),
        );
        match request.send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!(provider = %self.provider_type, error = %e, "Health probe failed");
                false
            }
        }
    }

    fn validate_config(&self) -> Result<()> {
        if self.model.trim().is_empty() {
            return Err(LlmError::config(format!("{}: model is required", self.label())));
        }
        if self.endpoint.is_empty() {
            return Err(LlmError::config(format!(
                "{}: endpoint is required",
                self.label()
            )));
        }
        transport::validate_endpoint(self.label(), &self.endpoint)?;
        if self.deployment_mode == DeploymentMode::Cloud && self.api_key.is_none() {
            return Err(LlmError::config(format!(
                "{}: API key is required for cloud deployments",
                self.label()
            )));
        }
        Ok(())
    }

    fn metadata(&self) -> ProviderMetadata {
        ProviderMetadata {
            provider_type: self.provider_type.clone(),
            deployment_mode: self.deployment_mode,
            model: self.model.clone(),
            region: self.region.clone(),
        }
    }

    fn request_timeout(&self) -> Duration {
        self.timeout
    }
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_TENANT: &str = "default";

/// Vendor tag for a provider configuration.
///
/// Serialized as a lowercase string; unknown tags round-trip through
/// [`ProviderType::Custom`] so new adapters can be registered without
/// touching this enum.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ProviderType {
    OpenAI,
    Anthropic,
    Qwen,
    Zhipu,
    Baidu,
    Tencent,
    Ollama,
    Docker,
    Custom(String),
}

impl ProviderType {
    pub fn as_str(&self) -> &str {
        match self {
            ProviderType::OpenAI => "openai",
            ProviderType::Anthropic => "anthropic",
            ProviderType::Qwen => "qwen",
            ProviderType::Zhipu => "zhipu",
            ProviderType::Baidu => "baidu",
            ProviderType::Tencent => "tencent",
            ProviderType::Ollama => "ollama",
            ProviderType::Docker => "docker",
            ProviderType::Custom(tag) => tag,
        }
    }

    /// Where this vendor normally runs; used when a config omits the mode.
    pub fn default_deployment_mode(&self) -> DeploymentMode {
        match self {
            ProviderType::Ollama | ProviderType::Docker => DeploymentMode::Local,
            _ => DeploymentMode::Cloud,
        }
    }
}

impl fmt::Display for ProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_lowercase().as_str() {
            "openai" => ProviderType::OpenAI,
            "anthropic" | "claude" => ProviderType::Anthropic,
            "qwen" | "dashscope" => ProviderType::Qwen,
            "zhipu" | "glm" => ProviderType::Zhipu,
            "baidu" | "qianfan" => ProviderType::Baidu,
            "tencent" | "hunyuan" => ProviderType::Tencent,
            "ollama" => ProviderType::Ollama,
            "docker" => ProviderType::Docker,
            custom => ProviderType::Custom(custom.to_string()),
        })
    }
}

impl Serialize for ProviderType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ProviderType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(raw.parse().unwrap_or(ProviderType::Custom(raw)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentMode {
    Local,
    #[default]
    Cloud,
}

impl fmt::Display for DeploymentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeploymentMode::Local => write!(f, "local"),
            DeploymentMode::Cloud => write!(f, "cloud"),
        }
    }
}

/// Identity and connection data for one vendor instance.
///
/// `credentials` is ciphertext produced by the credential service; it is only
/// decrypted while a provider instance is being constructed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub id: String,
    #[serde(default = "default_tenant")]
    pub tenant_id: String,
    pub name: String,
    pub provider_type: ProviderType,
    #[serde(default)]
    pub deployment_mode: DeploymentMode,
    pub model: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<String>,
    /// Per-provider request deadline override in seconds.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub is_fallback: bool,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

fn default_tenant() -> String {
    DEFAULT_TENANT.to_string()
}

impl ProviderConfig {
    pub fn new(id: &str, name: &str, provider_type: ProviderType, model: &str) -> Self {
        let now = Utc::now();
        let deployment_mode = provider_type.default_deployment_mode();
        Self {
            id: id.to_string(),
            tenant_id: default_tenant(),
            name: name.to_string(),
            provider_type,
            deployment_mode,
            model: model.to_string(),
            endpoint: None,
            region: None,
            credentials: None,
            timeout_secs: None,
            is_active: false,
            is_fallback: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_tenant(mut self, tenant_id: &str) -> Self {
        self.tenant_id = tenant_id.to_string();
        self
    }

    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = Some(endpoint.to_string());
        self
    }

    pub fn with_region(mut self, region: &str) -> Self {
        self.region = Some(region.to_string());
        self
    }

    /// Attach already-encrypted credentials.
    pub fn with_credentials(mut self, ciphertext: String) -> Self {
        self.credentials = Some(ciphertext);
        self
    }

    pub fn with_deployment_mode(mut self, mode: DeploymentMode) -> Self {
        self.deployment_mode = mode;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = Some(timeout.as_secs().max(1));
        self
    }

    /// Checks shared by every provider type: identity fields must be present.
    pub fn missing_required_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.id.trim().is_empty() {
            missing.push("id");
        }
        if self.tenant_id.trim().is_empty() {
            missing.push("tenant_id");
        }
        if self.name.trim().is_empty() {
            missing.push("name");
        }
        if self.provider_type.as_str().trim().is_empty() {
            missing.push("provider_type");
        }
        if self.model.trim().is_empty() {
            missing.push("model");
        }
        missing
    }
}

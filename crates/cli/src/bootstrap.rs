//! Building a runtime from the command line: runtime config file, env
//! overrides and the `[[providers]]` file.

use anyhow::{bail, Context, Result};
use llm::{
    CredentialCipher, DeploymentMode, InMemoryConfigStore, LlmRuntime, PassthroughCipher,
    ProviderConfig, ProviderFactory, ProviderType, RuntimeConfig,
};
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// One `[[providers]]` table.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderEntry {
    pub id: String,
    pub name: Option<String>,
    pub provider_type: ProviderType,
    pub model: String,
    pub endpoint: Option<String>,
    pub region: Option<String>,
    /// Defaults by vendor: Ollama and Docker are local, the rest cloud.
    pub deployment_mode: Option<DeploymentMode>,
    pub timeout_secs: Option<u64>,
    /// Environment variable holding the API key.
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub fallback: bool,
}

#[derive(Debug, Default, Deserialize)]
struct ProvidersFile {
    #[serde(default)]
    providers: Vec<ProviderEntry>,
}

pub fn parse_providers(raw: &str) -> Result<Vec<ProviderEntry>> {
    let file: ProvidersFile = toml::from_str(raw).context("invalid providers file")?;

    let actives = file.providers.iter().filter(|p| p.active).count();
    let fallbacks = file.providers.iter().filter(|p| p.fallback).count();
    if actives > 1 || fallbacks > 1 {
        bail!("at most one provider may be marked active and one fallback");
    }
    if let Some(entry) = file.providers.iter().find(|p| p.active && p.fallback) {
        bail!("provider '{}' cannot be both active and fallback", entry.id);
    }
    Ok(file.providers)
}

impl ProviderEntry {
    /// Resolve the API key through `lookup` and encrypt it with `cipher`.
    pub fn into_config<F>(self, cipher: &dyn CredentialCipher, lookup: F) -> Result<ProviderConfig>
    where
        F: Fn(&str) -> Option<String>,
    {
        let name = self.name.clone().unwrap_or_else(|| self.id.clone());
        let mode = self
            .deployment_mode
            .unwrap_or_else(|| self.provider_type.default_deployment_mode());
        let mut config = ProviderConfig::new(&self.id, &name, self.provider_type, &self.model)
            .with_deployment_mode(mode);

        if let Some(endpoint) = &self.endpoint {
            config = config.with_endpoint(endpoint);
        }
        if let Some(region) = &self.region {
            config = config.with_region(region);
        }
        if let Some(secs) = self.timeout_secs {
            config = config.with_timeout(Duration::from_secs(secs));
        }
        if let Some(var) = &self.api_key_env {
            let key = lookup(var)
                .filter(|key| !key.trim().is_empty())
                .with_context(|| format!("provider '{}': environment variable {var} is not set", self.id))?;
            config = config.with_credentials(cipher.encrypt(&key)?);
        }
        config.is_active = self.active;
        config.is_fallback = self.fallback;
        Ok(config)
    }
}

/// Runtime config: defaults, then the optional file, then `LLM_SWITCH_*`.
pub async fn load_runtime_config(path: Option<&Path>) -> Result<RuntimeConfig> {
    let mut config = match path {
        Some(path) => RuntimeConfig::load(path)
            .await
            .with_context(|| format!("loading {}", path.display()))?,
        None => RuntimeConfig::default(),
    };
    config.apply_env_overrides()?;
    Ok(config)
}

/// Register every provider from `providers_path` and restore routing.
pub async fn build_runtime(config: RuntimeConfig, providers_path: &Path) -> Result<LlmRuntime> {
    let raw = tokio::fs::read_to_string(providers_path)
        .await
        .with_context(|| format!("reading {}", providers_path.display()))?;
    let entries = parse_providers(&raw)?;
    debug!(count = entries.len(), "Parsed providers file");

    let cipher = Arc::new(PassthroughCipher);
    let runtime = LlmRuntime::new(
        config,
        Arc::new(InMemoryConfigStore::new()),
        cipher.clone(),
        ProviderFactory::with_builtin(),
    )?;

    for entry in entries {
        let id = entry.id.clone();
        let config = entry.into_config(cipher.as_ref(), |var| std::env::var(var).ok())?;
        runtime
            .register_provider(&id, config)
            .await
            .with_context(|| format!("registering provider '{id}'"))?;
    }

    let routing = runtime.start().await?;
    info!(active = ?routing.active, fallback = ?routing.fallback, "Runtime ready");
    Ok(runtime)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const PROVIDERS: &str = r#"
        [[providers]]
        id = "qwen-main"
        provider_type = "qwen"
        model = "qwen-plus"
        api_key_env = "QWEN_KEY"
        active = true

        [[providers]]
        id = "local"
        name = "Local Ollama"
        provider_type = "ollama"
        model = "llama3.2"
        endpoint = "http://localhost:11434"
        fallback = true
    "#;

    #[test]
    fn test_parse_providers() {
        let entries = parse_providers(PROVIDERS).expect("valid file");
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].provider_type, ProviderType::Qwen);
        assert!(entries[0].active);
        assert!(entries[1].fallback);
    }

    #[test]
    fn test_entry_to_config() {
        let entries = parse_providers(PROVIDERS).expect("valid file");
        let env = HashMap::from([("QWEN_KEY", "sk-qwen")]);
        let lookup = |var: &str| env.get(var).map(|v| v.to_string());

        let qwen = entries[0]
            .clone()
            .into_config(&PassthroughCipher, lookup)
            .expect("qwen config");
        assert_eq!(qwen.credentials.as_deref(), Some("sk-qwen"));
        assert_eq!(qwen.deployment_mode, DeploymentMode::Cloud);
        assert_eq!(qwen.name, "qwen-main");
        assert!(qwen.is_active);

        let local = entries[1]
            .clone()
            .into_config(&PassthroughCipher, lookup)
            .expect("ollama config");
        assert_eq!(local.deployment_mode, DeploymentMode::Local);
        assert!(local.credentials.is_none());
        assert!(local.is_fallback);
    }

    #[test]
    fn test_missing_key_variable() {
        let entries = parse_providers(PROVIDERS).expect("valid file");
        let error = entries[0]
            .clone()
            .into_config(&PassthroughCipher, |_| None)
            .expect_err("key missing");
        assert!(error.to_string().contains("QWEN_KEY"));
    }

    #[test]
    fn test_conflicting_routing_flags() {
        let raw = r#"
            [[providers]]
            id = "a"
            provider_type = "openai"
            model = "gpt-4o-mini"
            active = true
            fallback = true
        "#;
        assert!(parse_providers(raw).is_err());
        assert!(parse_providers("[[providers]]\nid = \"a\"").is_err());
    }
}

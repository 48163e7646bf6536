//! Runtime configuration: TOML file, then `LLM_SWITCH_*` environment overrides.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::errors::{LlmError, Result};
use crate::provider_management::HealthMonitorConfig;
use crate::providers::DEFAULT_TENANT;
use crate::retry::RetryPolicy;
use crate::switcher::SwitcherSettings;

pub const ENV_PREFIX: &str = "LLM_SWITCH_";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub ttl_secs: u64,
    /// 0 disables the periodic sweep; expiry stays lazy.
    pub sweep_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: 3600,
            sweep_interval_secs: 300,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    pub interval_secs: u64,
    pub check_timeout_secs: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            check_timeout_secs: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub local_secs: u64,
    pub cloud_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            local_secs: 30,
            cloud_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    pub skip_unhealthy: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub tenant_id: String,
    pub retry: RetryPolicy,
    pub cache: CacheConfig,
    pub health: HealthConfig,
    pub timeouts: TimeoutConfig,
    pub routing: RoutingConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            tenant_id: DEFAULT_TENANT.to_string(),
            retry: RetryPolicy::default(),
            cache: CacheConfig::default(),
            health: HealthConfig::default(),
            timeouts: TimeoutConfig::default(),
            routing: RoutingConfig::default(),
        }
    }
}

impl RuntimeConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw).map_err(|e| LlmError::RuntimeConfig {
            reason: format!("failed to parse TOML: {e}"),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| LlmError::RuntimeConfig {
                reason: format!("failed to read {}: {e}", path.display()),
            })?;
        let config = Self::from_toml_str(&raw)?;
        info!(path = %path.display(), "Loaded runtime configuration");
        Ok(config)
    }

    /// Load `.env` if present, then apply `LLM_SWITCH_*` variables.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(path) = dotenv::dotenv() {
            debug!(path = %path.display(), "Loaded .env file");
        }
        self.apply_overrides_with(|key| std::env::var(key).ok())
    }

    /// Apply overrides from any key lookup. Unparseable values are logged
    /// and ignored.
    pub fn apply_overrides_with<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |suffix: &str| lookup(&format!("{ENV_PREFIX}{suffix}"));

        if let Some(tenant) = var("TENANT_ID") {
            self.tenant_id = tenant;
        }
        override_parsed(&var, "RETRY_MAX_ATTEMPTS", &mut self.retry.max_attempts);
        override_parsed(&var, "RETRY_BASE_DELAY_MS", &mut self.retry.base_delay_ms);
        override_parsed(&var, "RETRY_MAX_DELAY_MS", &mut self.retry.max_delay_ms);
        override_parsed(&var, "RETRY_JITTER", &mut self.retry.jitter);
        override_parsed(&var, "CACHE_ENABLED", &mut self.cache.enabled);
        override_parsed(&var, "CACHE_TTL_SECS", &mut self.cache.ttl_secs);
        override_parsed(&var, "CACHE_SWEEP_INTERVAL_SECS", &mut self.cache.sweep_interval_secs);
        override_parsed(&var, "HEALTH_INTERVAL_SECS", &mut self.health.interval_secs);
        override_parsed(&var, "HEALTH_CHECK_TIMEOUT_SECS", &mut self.health.check_timeout_secs);
        override_parsed(&var, "TIMEOUT_LOCAL_SECS", &mut self.timeouts.local_secs);
        override_parsed(&var, "TIMEOUT_CLOUD_SECS", &mut self.timeouts.cloud_secs);
        override_parsed(&var, "SKIP_UNHEALTHY", &mut self.routing.skip_unhealthy);

        self.validate()
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: &str| -> Result<()> {
            Err(LlmError::RuntimeConfig {
                reason: reason.to_string(),
            })
        };

        if self.tenant_id.trim().is_empty() {
            return invalid("tenant_id must not be empty");
        }
        if self.retry.max_attempts == 0 {
            return invalid("retry.max_attempts must be at least 1");
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return invalid("retry.base_delay_ms must not exceed retry.max_delay_ms");
        }
        if self.cache.ttl_secs == 0 {
            return invalid("cache.ttl_secs must be greater than 0");
        }
        if self.health.interval_secs == 0 || self.health.check_timeout_secs == 0 {
            return invalid("health intervals must be greater than 0");
        }
        if self.timeouts.local_secs == 0 || self.timeouts.cloud_secs == 0 {
            return invalid("provider timeouts must be greater than 0");
        }
        Ok(())
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.ttl_secs)
    }

    pub fn sweep_interval(&self) -> Option<Duration> {
        (self.cache.enabled && self.cache.sweep_interval_secs > 0)
            .then(|| Duration::from_secs(self.cache.sweep_interval_secs))
    }

    pub fn local_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.local_secs)
    }

    pub fn cloud_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.cloud_secs)
    }

    pub fn health_monitor(&self) -> HealthMonitorConfig {
        HealthMonitorConfig {
            interval: Duration::from_secs(self.health.interval_secs),
            check_timeout: Duration::from_secs(self.health.check_timeout_secs),
        }
    }

    pub fn switcher(&self) -> SwitcherSettings {
        SwitcherSettings {
            retry: self.retry.clone(),
            cache_enabled: self.cache.enabled,
            skip_unhealthy: self.routing.skip_unhealthy,
        }
    }
}

fn override_parsed<T, V>(var: &V, suffix: &str, target: &mut T)
where
    T: FromStr,
    V: Fn(&str) -> Option<String>,
{
    if let Some(raw) = var(suffix) {
        match raw.trim().parse() {
            Ok(value) => *target = value,
            Err(_) => warn!(variable = %format!("{ENV_PREFIX}{suffix}"), value = %raw, "Ignoring unparseable override"),
        }
    }
}

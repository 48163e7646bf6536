//! Request routing: cache lookup, retries on the active provider, failover
//! to the fallback provider.

use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::cache::ResponseCache;
use crate::errors::{LlmError, Result, RouteRole};
use crate::provider_management::{HealthBoard, ProviderManager, RoutingState, RoutingTable};
use crate::providers::{GenerationOptions, GenerationResult, LlmProvider};
use crate::retry::{duration_ms, execute_with_retry, RetryPolicy};
use crate::usage::UsageCounter;

/// An answer together with the instance that produced it.
type Served = (GenerationResult, Arc<dyn LlmProvider>);

#[derive(Debug, Clone)]
pub struct SwitcherSettings {
    pub retry: RetryPolicy,
    pub cache_enabled: bool,
    /// Refuse to dial a provider the health monitor currently marks down.
    pub skip_unhealthy: bool,
}

impl Default for SwitcherSettings {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            cache_enabled: true,
            skip_unhealthy: false,
        }
    }
}

/// Routes generation requests to the active provider and fails over to the
/// fallback provider once the active one's retries are exhausted.
///
/// Providers are held by id and resolved through the manager on every
/// attempt, so configuration updates take effect on the next attempt.
pub struct LlmSwitcher {
    manager: Arc<ProviderManager>,
    routing: Arc<RoutingTable>,
    health: Arc<HealthBoard>,
    cache: Arc<ResponseCache>,
    stats: UsageCounter,
    settings: SwitcherSettings,
}

impl LlmSwitcher {
    pub fn new(
        manager: Arc<ProviderManager>,
        cache: Arc<ResponseCache>,
        settings: SwitcherSettings,
    ) -> Self {
        Self {
            routing: manager.routing(),
            health: manager.health_board(),
            manager,
            cache,
            stats: UsageCounter::new(),
            settings,
        }
    }

    pub fn routing(&self) -> RoutingState {
        self.routing.snapshot()
    }

    /// Route requests to `id`. Fails if the provider is unknown, marked
    /// unhealthy, or already the fallback.
    #[instrument(skip(self))]
    pub async fn set_active(&self, id: &str) -> Result<()> {
        let previous = self.manager.assign_route(RouteRole::Active, id).await?;
        info!(provider_id = %id, previous = ?previous, "Active provider set");
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn set_fallback(&self, id: &str) -> Result<()> {
        let previous = self.manager.assign_route(RouteRole::Fallback, id).await?;
        info!(provider_id = %id, previous = ?previous, "Fallback provider set");
        Ok(())
    }

    pub async fn clear_fallback(&self) -> Result<()> {
        if let Some(previous) = self.manager.clear_fallback().await? {
            info!(provider_id = %previous, "Fallback provider cleared");
        }
        Ok(())
    }

    pub async fn generate(&self, prompt: &str, options: &GenerationOptions) -> Result<GenerationResult> {
        self.generate_cancellable(prompt, options, None, &CancellationToken::new())
            .await
    }

    /// Like [`generate`](Self::generate), but an explicit `provider_override`
    /// is called directly, with retries and without failover.
    pub async fn generate_with(
        &self,
        prompt: &str,
        options: &GenerationOptions,
        provider_override: Option<&str>,
    ) -> Result<GenerationResult> {
        self.generate_cancellable(prompt, options, provider_override, &CancellationToken::new())
            .await
    }

    /// Full entry point. Cancelling `cancel` aborts the attempt in flight and
    /// returns [`LlmError::Cancelled`] without trying the fallback.
    #[instrument(skip(self, prompt, options, cancel), fields(prompt_len = prompt.len(), provider_override = ?provider_override))]
    pub async fn generate_cancellable(
        &self,
        prompt: &str,
        options: &GenerationOptions,
        provider_override: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<GenerationResult> {
        let key = ResponseCache::key_for(self.manager.tenant_id(), prompt, options, provider_override);
        if self.settings.cache_enabled {
            if let Some(mut hit) = self.cache.get(&key) {
                debug!(provider_id = %hit.provider_id, "Cache hit");
                hit.cached = true;
                return Ok(hit);
            }
        }

        if let Some(id) = provider_override {
            let served = self.call_with_retry(id, prompt, options, cancel).await?;
            return Ok(self.finish(key, id, served, false).await);
        }

        let RoutingState { active, fallback } = self.routing.snapshot();
        let active = active.ok_or(LlmError::NoActiveProvider)?;

        let primary_error = match self.call_with_retry(&active, prompt, options, cancel).await {
            Ok(served) => return Ok(self.finish(key, &active, served, false).await),
            Err(LlmError::Cancelled) => return Err(LlmError::Cancelled),
            Err(e) => e,
        };

        let Some(fallback) = fallback else {
            error!(provider_id = %active, error = %primary_error, "Active provider failed and no fallback is configured");
            return Err(LlmError::AllProvidersFailed {
                primary: Box::new(primary_error),
                fallback: None,
            });
        };

        warn!(from = %active, to = %fallback, error = %primary_error, "Failing over to fallback provider");
        match self.call_with_retry(&fallback, prompt, options, cancel).await {
            Ok(served) => Ok(self.finish(key, &fallback, served, true).await),
            Err(LlmError::Cancelled) => Err(LlmError::Cancelled),
            Err(fallback_error) => {
                error!(
                    active = %active,
                    fallback = %fallback,
                    primary_error = %primary_error,
                    fallback_error = %fallback_error,
                    "All providers failed"
                );
                Err(LlmError::AllProvidersFailed {
                    primary: Box::new(primary_error),
                    fallback: Some(Box::new(fallback_error)),
                })
            }
        }
    }

    pub fn usage_stats(&self) -> BTreeMap<String, u64> {
        self.stats.snapshot()
    }

    pub fn reset_usage(&self) {
        self.stats.reset();
        info!("Usage counters reset");
    }

    pub fn reset_usage_for(&self, id: &str) {
        self.stats.reset_provider(id);
        info!(provider_id = %id, "Usage counter reset");
    }

    /// Up to `max_attempts` sequential attempts, each under the provider's
    /// own deadline. A timed-out attempt is dropped, which aborts its request.
    /// Returns the answer with the instance that produced it.
    async fn call_with_retry(
        &self,
        id: &str,
        prompt: &str,
        options: &GenerationOptions,
        cancel: &CancellationToken,
    ) -> Result<Served> {
        if self.settings.skip_unhealthy && self.health.is_unhealthy(id) {
            warn!(provider_id = %id, "Skipping provider marked unhealthy");
            return Err(LlmError::ProviderUnhealthy { id: id.to_string() });
        }

        execute_with_retry(&self.settings.retry, id, cancel, |_attempt| async move {
            let provider = self.manager.get(id).await?;
            let deadline = provider.request_timeout();
            let started = Instant::now();

            let mut result = tokio::time::timeout(deadline, provider.generate(prompt, options))
                .await
                .map_err(|_| LlmError::Timeout {
                    provider: id.to_string(),
                    after: deadline,
                })??;
            result.latency_ms = duration_ms(started.elapsed());
            Ok((result, provider))
        })
        .await
    }

    async fn finish(&self, key: String, id: &str, served: Served, degraded: bool) -> GenerationResult {
        let (mut result, provider) = served;
        result.provider_id = id.to_string();
        result.cached = false;
        result.degraded = degraded;
        if self.settings.cache_enabled {
            let value = result.clone();
            let stored = self
                .manager
                .while_current(id, &provider, || self.cache.set(key, value, None))
                .await;
            if !stored {
                debug!(provider_id = %id, "Provider replaced during the call; answer not cached");
            }
        }
        self.stats.increment(id);
        result
    }
}

impl std::fmt::Debug for LlmSwitcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmSwitcher")
            .field("tenant_id", &self.manager.tenant_id())
            .field("routing", &self.routing.snapshot())
            .field("settings", &self.settings)
            .field("cached_entries", &self.cache.len())
            .finish()
    }
}

//! Tenant-scoped runtime: wires store, manager, monitor and switcher, and
//! owns the background tasks.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cache::ResponseCache;
use crate::config::RuntimeConfig;
use crate::errors::{LlmError, Result};
use crate::provider_management::{
    AlertSink, HealthMonitor, HealthStatus, ProviderManager, ProviderSummary, RoutingState,
};
use crate::providers::{GenerationOptions, GenerationResult, ProviderConfig, ProviderFactory};
use crate::store::{ConfigStore, CredentialCipher};
use crate::switcher::LlmSwitcher;

/// Constructed at startup, torn down with [`shutdown`](Self::shutdown).
pub struct LlmRuntime {
    config: RuntimeConfig,
    manager: Arc<ProviderManager>,
    monitor: Arc<HealthMonitor>,
    switcher: Arc<LlmSwitcher>,
    cache: Arc<ResponseCache>,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl LlmRuntime {
    pub fn new(
        config: RuntimeConfig,
        store: Arc<dyn ConfigStore>,
        cipher: Arc<dyn CredentialCipher>,
        factory: ProviderFactory,
    ) -> Result<Self> {
        config.validate()?;

        let factory = factory.with_timeouts(config.local_timeout(), config.cloud_timeout());
        let cache = Arc::new(ResponseCache::new(config.cache_ttl()));
        let manager = Arc::new(
            ProviderManager::new(&config.tenant_id, store, cipher, factory).with_cache(cache.clone()),
        );
        let monitor = Arc::new(HealthMonitor::new(manager.clone(), config.health_monitor()));
        let switcher = Arc::new(LlmSwitcher::new(manager.clone(), cache.clone(), config.switcher()));

        Ok(Self {
            config,
            manager,
            monitor,
            switcher,
            cache,
            shutdown: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Restore routing from the stored flags and start the background tasks.
    pub async fn start(&self) -> Result<RoutingState> {
        if self.shutdown.is_cancelled() {
            return Err(LlmError::RuntimeConfig {
                reason: "runtime has already been shut down".to_string(),
            });
        }

        let routing = self.manager.restore_routing().await?;
        info!(
            tenant_id = %self.config.tenant_id,
            active = ?routing.active,
            fallback = ?routing.fallback,
            "Restored routing"
        );

        let mut tasks = self.tasks.lock();
        if !tasks.is_empty() {
            warn!("Runtime already started; background tasks left running");
            return Ok(routing);
        }
        tasks.push(self.monitor.clone().spawn(self.shutdown.child_token()));
        if let Some(every) = self.config.sweep_interval() {
            tasks.push(self.cache.clone().spawn_sweeper(every, self.shutdown.child_token()));
        }
        Ok(routing)
    }

    /// Deliver health transitions to `sink` until shutdown.
    pub fn forward_alerts(&self, sink: Arc<dyn AlertSink>) {
        let handle = self.monitor.forward_to(sink, self.shutdown.child_token());
        self.tasks.lock().push(handle);
    }

    /// Stop background tasks and wait for them to exit.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        for outcome in futures::future::join_all(tasks).await {
            if let Err(e) = outcome {
                warn!(error = %e, "Background task ended abnormally");
            }
        }
        info!(tenant_id = %self.config.tenant_id, "Runtime shut down");
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn manager(&self) -> Arc<ProviderManager> {
        self.manager.clone()
    }

    pub fn switcher(&self) -> Arc<LlmSwitcher> {
        self.switcher.clone()
    }

    pub fn monitor(&self) -> Arc<HealthMonitor> {
        self.monitor.clone()
    }

    pub async fn register_provider(&self, id: &str, config: ProviderConfig) -> Result<()> {
        self.manager.register(id, config).await
    }

    pub async fn update_provider(&self, id: &str, config: ProviderConfig) -> Result<()> {
        self.manager.update(id, config).await
    }

    pub async fn delete_provider(&self, id: &str) -> Result<()> {
        self.manager.delete(id).await?;
        self.switcher.reset_usage_for(id);
        Ok(())
    }

    pub async fn set_active(&self, id: &str) -> Result<()> {
        self.switcher.set_active(id).await
    }

    pub async fn set_fallback(&self, id: &str) -> Result<()> {
        self.switcher.set_fallback(id).await
    }

    pub async fn generate(
        &self,
        prompt: &str,
        options: &GenerationOptions,
        provider_override: Option<&str>,
    ) -> Result<GenerationResult> {
        self.switcher
            .generate_with(prompt, options, provider_override)
            .await
    }

    pub async fn generate_cancellable(
        &self,
        prompt: &str,
        options: &GenerationOptions,
        provider_override: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<GenerationResult> {
        self.switcher
            .generate_cancellable(prompt, options, provider_override, cancel)
            .await
    }

    pub async fn list_providers(&self) -> Result<Vec<ProviderSummary>> {
        self.manager.list().await
    }

    /// `Ok(None)` until the first health check for a registered provider.
    pub async fn get_health(&self, id: &str) -> Result<Option<HealthStatus>> {
        if !self.manager.contains(id).await {
            return Err(LlmError::not_found(id));
        }
        Ok(self.monitor.board().get(id))
    }

    /// Request counts for every registered provider, zero included.
    pub async fn get_usage_stats(&self) -> Result<BTreeMap<String, u64>> {
        let mut stats: BTreeMap<String, u64> = self
            .manager
            .provider_ids()
            .await?
            .into_iter()
            .map(|id| (id, 0))
            .collect();
        stats.extend(self.switcher.usage_stats());
        Ok(stats)
    }

    pub fn reset_usage(&self) {
        self.switcher.reset_usage();
    }

    pub fn reset_usage_for(&self, id: &str) {
        self.switcher.reset_usage_for(id);
    }
}

impl std::fmt::Debug for LlmRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmRuntime")
            .field("config", &self.config)
            .field("switcher", &self.switcher)
            .field("running_tasks", &self.tasks.lock().len())
            .finish()
    }
}

impl Drop for LlmRuntime {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

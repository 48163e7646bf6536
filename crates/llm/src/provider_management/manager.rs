//! Provider Manager - owns provider configurations and their live instances

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use super::health::{HealthBoard, HealthState};
use super::routing::{RoutingState, RoutingTable};
use crate::cache::ResponseCache;
use crate::errors::{LlmError, Result, RouteRole};
use crate::providers::{DeploymentMode, LlmProvider, ProviderConfig, ProviderFactory, ProviderType};
use crate::store::{ConfigStore, CredentialCipher};

/// Row returned by [`ProviderManager::list`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderSummary {
    pub id: String,
    pub name: String,
    pub provider_type: ProviderType,
    pub deployment_mode: DeploymentMode,
    pub model: String,
    pub status: HealthState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<RouteRole>,
}

/// Tenant-scoped registry of provider configurations.
///
/// `register`, `update`, `delete`, lazy materialization in `get` and routing
/// changes are serialized by one registry mutex. Routing slots live in a
/// separate [`RoutingTable`] so request routing reads never wait on it.
pub struct ProviderManager {
    tenant_id: String,
    store: Arc<dyn ConfigStore>,
    cipher: Arc<dyn CredentialCipher>,
    factory: ProviderFactory,
    registry: Mutex<HashMap<String, Arc<dyn LlmProvider>>>,
    routing: Arc<RoutingTable>,
    health: Arc<HealthBoard>,
    cache: Option<Arc<ResponseCache>>,
}

impl std::fmt::Debug for ProviderManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderManager")
            .field("tenant_id", &self.tenant_id)
            .field("factory", &self.factory)
            .field("routing", &self.routing.snapshot())
            .field(
                "materialized",
                &self.registry.try_lock().map_or(0, |r| r.len()),
            )
            .finish()
    }
}

impl ProviderManager {
    pub fn new(
        tenant_id: &str,
        store: Arc<dyn ConfigStore>,
        cipher: Arc<dyn CredentialCipher>,
        factory: ProviderFactory,
    ) -> Self {
        Self {
            tenant_id: tenant_id.to_string(),
            store,
            cipher,
            factory,
            registry: Mutex::new(HashMap::new()),
            routing: Arc::new(RoutingTable::new()),
            health: Arc::new(HealthBoard::new()),
            cache: None,
        }
    }

    /// Response cache to invalidate when a provider changes or goes away.
    pub fn with_cache(mut self, cache: Arc<ResponseCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    pub fn routing(&self) -> Arc<RoutingTable> {
        self.routing.clone()
    }

    pub fn health_board(&self) -> Arc<HealthBoard> {
        self.health.clone()
    }

    /// Validate, persist and memoize a new provider.
    ///
    /// `id` is authoritative over `config.id`; the config is always stored
    /// under this manager's tenant. Nothing is persisted if validation fails.
    #[instrument(skip(self, config), fields(tenant_id = %self.tenant_id))]
    pub async fn register(&self, id: &str, mut config: ProviderConfig) -> Result<()> {
        config.id = id.to_string();
        config.tenant_id = self.tenant_id.clone();
        let now = Utc::now();
        config.created_at = now;
        config.updated_at = now;

        let provider = self.build(&config)?;

        let mut registry = self.registry.lock().await;
        if self.store.load_config(id).await?.is_some() {
            return Err(LlmError::config(format!("provider '{id}' already exists")));
        }
        self.store.save_config(&config).await?;
        registry.insert(id.to_string(), provider);
        drop(registry);

        info!(provider_id = %id, provider_type = %config.provider_type, "Registered provider");
        Ok(())
    }

    /// Live instance for `id`, constructed from the stored config on first use.
    pub async fn get(&self, id: &str) -> Result<Arc<dyn LlmProvider>> {
        let mut registry = self.registry.lock().await;
        self.materialize(&mut registry, id).await
    }

    /// Run `write` only while `instance` is still the memoized provider for
    /// `id`. Returns whether it ran.
    ///
    /// `update` and `delete` drop cached answers under the same lock, so an
    /// answer produced by a replaced instance is never written back.
    pub async fn while_current<F>(&self, id: &str, instance: &Arc<dyn LlmProvider>, write: F) -> bool
    where
        F: FnOnce(),
    {
        let registry = self.registry.lock().await;
        let current = registry
            .get(id)
            .is_some_and(|memoized| Arc::ptr_eq(memoized, instance));
        if current {
            write();
        }
        current
    }

    /// Replace config and instance together. Calls already holding the old
    /// instance finish on it; later `get` calls see the new one.
    #[instrument(skip(self, config), fields(tenant_id = %self.tenant_id))]
    pub async fn update(&self, id: &str, mut config: ProviderConfig) -> Result<()> {
        let mut registry = self.registry.lock().await;
        let existing = self.load_owned(id).await?;

        config.id = id.to_string();
        config.tenant_id = self.tenant_id.clone();
        config.created_at = existing.created_at;
        config.updated_at = Utc::now();
        config.is_active = existing.is_active;
        config.is_fallback = existing.is_fallback;

        let provider = self.build(&config)?;
        self.store.save_config(&config).await?;
        registry.insert(id.to_string(), provider);
        // Old health and cached answers describe the previous configuration.
        self.invalidate_cached(id);
        drop(registry);

        self.health.remove(id);
        info!(provider_id = %id, "Updated provider");
        Ok(())
    }

    /// Remove a provider that is neither the active nor the fallback target.
    #[instrument(skip(self), fields(tenant_id = %self.tenant_id))]
    pub async fn delete(&self, id: &str) -> Result<()> {
        let mut registry = self.registry.lock().await;
        if let Some(role) = self.routing.role_of(id) {
            warn!(provider_id = %id, role = %role, "Refusing to delete routed provider");
            return Err(LlmError::ActiveProviderDeletion {
                id: id.to_string(),
                role,
            });
        }

        self.load_owned(id).await?;
        self.store.delete_config(id).await?;
        registry.remove(id);
        self.invalidate_cached(id);
        drop(registry);

        self.health.remove(id);
        info!(provider_id = %id, "Deleted provider");
        Ok(())
    }

    pub async fn list(&self) -> Result<Vec<ProviderSummary>> {
        let mut configs = self.store.list_configs(&self.tenant_id).await?;
        configs.sort_by(|a, b| a.id.cmp(&b.id));

        Ok(configs
            .into_iter()
            .map(|config| ProviderSummary {
                status: self.health.state(&config.id),
                role: self.routing.role_of(&config.id),
                id: config.id,
                name: config.name,
                provider_type: config.provider_type,
                deployment_mode: config.deployment_mode,
                model: config.model,
            })
            .collect())
    }

    pub async fn config(&self, id: &str) -> Result<ProviderConfig> {
        self.load_owned(id).await
    }

    pub async fn provider_ids(&self) -> Result<Vec<String>> {
        let mut ids: Vec<String> = self
            .store
            .list_configs(&self.tenant_id)
            .await?
            .into_iter()
            .map(|config| config.id)
            .collect();
        ids.sort();
        Ok(ids)
    }

    pub async fn contains(&self, id: &str) -> bool {
        matches!(
            self.store.load_config(id).await,
            Ok(Some(config)) if config.tenant_id == self.tenant_id
        )
    }

    /// Point `role` at `id` and return the id it replaces.
    ///
    /// The provider must exist, must not be marked unhealthy and cannot fill
    /// both slots. The existence check, the stored flags and the routing
    /// table all change under the registry lock, so a concurrent `delete`
    /// either removes the provider first or sees its new role.
    #[instrument(skip(self), fields(tenant_id = %self.tenant_id))]
    pub async fn assign_route(&self, role: RouteRole, id: &str) -> Result<Option<String>> {
        let mut registry = self.registry.lock().await;
        self.materialize(&mut registry, id).await?;
        if self.health.is_unhealthy(id) {
            return Err(LlmError::ProviderUnhealthy { id: id.to_string() });
        }

        let mut next = self.routing.snapshot();
        let (slot, other, other_role) = match role {
            RouteRole::Active => (&mut next.active, &next.fallback, RouteRole::Fallback),
            RouteRole::Fallback => (&mut next.fallback, &next.active, RouteRole::Active),
        };
        if other.as_deref() == Some(id) {
            return Err(LlmError::config(format!(
                "provider '{id}' is already the {other_role} provider"
            )));
        }
        let previous = slot.replace(id.to_string());

        self.write_routing_flags(&next).await?;
        self.routing.restore(next);
        Ok(previous)
    }

    /// Empty the fallback slot and return the id it held.
    pub async fn clear_fallback(&self) -> Result<Option<String>> {
        let _registry = self.registry.lock().await;
        let mut next = self.routing.snapshot();
        let previous = next.fallback.take();
        self.write_routing_flags(&next).await?;
        self.routing.restore(next);
        Ok(previous)
    }

    /// Load the persisted routing into the routing table.
    pub async fn restore_routing(&self) -> Result<RoutingState> {
        let _registry = self.registry.lock().await;
        let routing = self.stored_routing().await?;
        self.routing.restore(routing.clone());
        Ok(routing)
    }

    /// Routing recorded by the persisted flags. When several configs claim
    /// the same slot the most recently updated one wins.
    pub async fn stored_routing(&self) -> Result<RoutingState> {
        let configs = self.store.list_configs(&self.tenant_id).await?;

        let pick = |flag: fn(&ProviderConfig) -> bool, exclude: Option<&str>| {
            let mut claims: Vec<&ProviderConfig> = configs
                .iter()
                .filter(|c| flag(c) && Some(c.id.as_str()) != exclude)
                .collect();
            claims.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
            if claims.len() > 1 {
                warn!(
                    claimants = claims.len(),
                    chosen = %claims[0].id,
                    "Multiple providers flagged for the same routing slot"
                );
            }
            claims.first().map(|c| c.id.clone())
        };

        let active = pick(|c| c.is_active, None);
        let fallback = pick(|c| c.is_fallback, active.as_deref());
        Ok(RoutingState { active, fallback })
    }

    /// Write `is_active`/`is_fallback` so exactly the routed ids carry them.
    /// Callers hold the registry lock.
    async fn write_routing_flags(&self, routing: &RoutingState) -> Result<()> {
        for mut config in self.store.list_configs(&self.tenant_id).await? {
            let is_active = routing.active.as_deref() == Some(config.id.as_str());
            let is_fallback = routing.fallback.as_deref() == Some(config.id.as_str());
            if config.is_active != is_active || config.is_fallback != is_fallback {
                config.is_active = is_active;
                config.is_fallback = is_fallback;
                config.updated_at = Utc::now();
                self.store.save_config(&config).await?;
            }
        }
        Ok(())
    }

    async fn materialize(
        &self,
        registry: &mut HashMap<String, Arc<dyn LlmProvider>>,
        id: &str,
    ) -> Result<Arc<dyn LlmProvider>> {
        if let Some(provider) = registry.get(id) {
            return Ok(provider.clone());
        }

        let config = self.load_owned(id).await?;
        let provider = self.build(&config)?;
        registry.insert(id.to_string(), provider.clone());
        debug!(provider_id = %id, "Materialized provider instance");
        Ok(provider)
    }

    async fn load_owned(&self, id: &str) -> Result<ProviderConfig> {
        match self.store.load_config(id).await? {
            Some(config) if config.tenant_id == self.tenant_id => Ok(config),
            _ => Err(LlmError::not_found(id)),
        }
    }

    /// Structural checks, credential decryption and adapter construction.
    /// The plaintext key only lives for the duration of this call.
    fn build(&self, config: &ProviderConfig) -> Result<Arc<dyn LlmProvider>> {
        let missing = config.missing_required_fields();
        if !missing.is_empty() {
            return Err(LlmError::config(format!(
                "missing required fields: {}",
                missing.join(", ")
            )));
        }

        let api_key = match &config.credentials {
            Some(ciphertext) => Some(self.cipher.decrypt(ciphertext)?),
            None => None,
        };
        let provider = self.factory.create(config, api_key)?;
        provider.validate_config()?;
        Ok(provider)
    }

    fn invalidate_cached(&self, id: &str) {
        if let Some(cache) = &self.cache {
            cache.invalidate_provider(id);
        }
    }
}

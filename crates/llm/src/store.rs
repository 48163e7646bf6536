//! Collaborator seams: durable configuration storage and credential encryption.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;

use crate::errors::{LlmError, Result};
use crate::providers::ProviderConfig;

/// Durable, strongly consistent store of provider configurations.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn load_config(&self, id: &str) -> Result<Option<ProviderConfig>>;

    async fn save_config(&self, config: &ProviderConfig) -> Result<()>;

    async fn list_configs(&self, tenant_id: &str) -> Result<Vec<ProviderConfig>>;

    /// Returns whether a config was removed.
    async fn delete_config(&self, id: &str) -> Result<bool>;
}

/// Credential encryption service. Plaintext only lives for one provider
/// construction.
pub trait CredentialCipher: Send + Sync {
    fn encrypt(&self, plaintext: &str) -> Result<String>;

    fn decrypt(&self, ciphertext: &str) -> Result<String>;
}

#[derive(Debug, Default)]
pub struct InMemoryConfigStore {
    configs: RwLock<BTreeMap<String, ProviderConfig>>,
}

impl InMemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.configs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.configs.read().is_empty()
    }
}

#[async_trait]
impl ConfigStore for InMemoryConfigStore {
    async fn load_config(&self, id: &str) -> Result<Option<ProviderConfig>> {
        Ok(self.configs.read().get(id).cloned())
    }

    async fn save_config(&self, config: &ProviderConfig) -> Result<()> {
        if config.id.is_empty() {
            return Err(LlmError::Store {
                reason: "cannot save a config without an id".to_string(),
            });
        }
        self.configs
            .write()
            .insert(config.id.clone(), config.clone());
        Ok(())
    }

    async fn list_configs(&self, tenant_id: &str) -> Result<Vec<ProviderConfig>> {
        Ok(self
            .configs
            .read()
            .values()
            .filter(|config| config.tenant_id == tenant_id)
            .cloned()
            .collect())
    }

    async fn delete_config(&self, id: &str) -> Result<bool> {
        Ok(self.configs.write().remove(id).is_some())
    }
}

/// Identity cipher for development setups. Performs no encryption at all.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughCipher;

impl CredentialCipher for PassthroughCipher {
    fn encrypt(&self, plaintext: &str) -> Result<String> {
        Ok(plaintext.to_string())
    }

    fn decrypt(&self, ciphertext: &str) -> Result<String> {
        Ok(ciphertext.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::ProviderType;

    #[tokio::test]
    async fn test_in_memory_store_scopes_by_tenant() {
        let store = InMemoryConfigStore::new();
        let a = ProviderConfig::new("a", "A", ProviderType::OpenAI, "gpt-4o-mini");
        let b = ProviderConfig::new("b", "B", ProviderType::Qwen, "qwen-plus").with_tenant("acme");
        store.save_config(&a).await.expect("save a");
        store.save_config(&b).await.expect("save b");

        let default_tenant = store.list_configs("default").await.expect("list");
        assert_eq!(default_tenant.len(), 1);
        assert_eq!(default_tenant[0].id, "a");

        assert!(store.delete_config("a").await.expect("delete"));
        assert!(!store.delete_config("a").await.expect("delete again"));
        assert!(store.load_config("a").await.expect("load").is_none());
    }

    #[test]
    fn test_passthrough_cipher() {
        let cipher = PassthroughCipher;
        let ciphertext = cipher.encrypt("sk-test").expect("encrypt");
        assert_eq!(cipher.decrypt(&ciphertext).expect("decrypt"), "sk-test");
    }
}

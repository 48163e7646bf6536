//! Provider switching and resilience runtime for LLM backends.
//!
//! Requests go through [`LlmSwitcher`]: a TTL response cache, retries with
//! exponential backoff on the active provider, then failover to a fallback
//! provider. [`HealthMonitor`] polls providers in the background and
//! [`LlmRuntime`] ties everything together for one tenant.

pub mod cache;
pub mod config;
pub mod errors;
pub mod provider_management;
pub mod providers;
pub mod retry;
pub mod runtime;
pub mod store;
pub mod switcher;
pub mod usage;

pub use cache::ResponseCache;
pub use config::RuntimeConfig;
pub use errors::{ClientErrorKind, ErrorKind, LlmError, Result, RouteRole};
pub use provider_management::{
    AlertSink, HealthBoard, HealthMonitor, HealthMonitorConfig, HealthState, HealthStatus,
    HealthTransition, LogAlertSink, ProviderManager, ProviderSummary, RoutingState,
};
pub use providers::{
    DeploymentMode, GenerationOptions, GenerationResult, LlmProvider, ProviderBuildContext,
    ProviderConfig, ProviderFactory, ProviderMetadata, ProviderType, TokenUsage,
};
pub use retry::{RetryDecision, RetryPolicy};
pub use runtime::LlmRuntime;
pub use store::{ConfigStore, CredentialCipher, InMemoryConfigStore, PassthroughCipher};
pub use switcher::{LlmSwitcher, SwitcherSettings};
pub use usage::UsageCounter;

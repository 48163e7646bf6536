#![allow(dead_code)]

use async_trait::async_trait;
use llm::{
    ConfigStore, DeploymentMode, GenerationOptions, GenerationResult, InMemoryConfigStore, LlmError,
    LlmProvider, LlmRuntime, PassthroughCipher, ProviderConfig, ProviderFactory, ProviderMetadata,
    ProviderType, RuntimeConfig,
};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

pub const SCRIPTED: &str = "scripted";

/// One scripted outcome of a `generate` call.
#[derive(Debug, Clone)]
pub enum Step {
    Reply(String),
    /// Reply after the given time has passed.
    ReplyAfter(Duration, String),
    Fail(LlmError),
    Hang,
}

/// Shared behaviour and call log for one scripted provider id.
#[derive(Debug)]
pub struct Script {
    steps: Mutex<VecDeque<Step>>,
    default: Mutex<Step>,
    calls: Mutex<Vec<Instant>>,
    in_flight: AtomicUsize,
    healthy: AtomicBool,
    health_hangs: AtomicBool,
    health_checks: AtomicUsize,
    reject_config: AtomicBool,
}

impl Script {
    pub fn new() -> Self {
        Self {
            steps: Mutex::new(VecDeque::new()),
            default: Mutex::new(Step::Reply("ok".to_string())),
            calls: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            healthy: AtomicBool::new(true),
            health_hangs: AtomicBool::new(false),
            health_checks: AtomicUsize::new(0),
            reject_config: AtomicBool::new(false),
        }
    }

    /// Outcome for every call once queued steps run out.
    pub fn always(&self, step: Step) -> &Self {
        *self.default.lock().unwrap() = step;
        self
    }

    pub fn then(&self, step: Step) -> &Self {
        self.steps.lock().unwrap().push_back(step);
        self
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn hang_health_checks(&self, hang: bool) {
        self.health_hangs.store(hang, Ordering::SeqCst);
    }

    pub fn reject_config(&self, reject: bool) {
        self.reject_config.store(reject, Ordering::SeqCst);
    }

    pub fn call_times(&self) -> Vec<Instant> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Gaps between consecutive calls.
    pub fn gaps(&self) -> Vec<Duration> {
        self.call_times()
            .windows(2)
            .map(|pair| pair[1] - pair[0])
            .collect()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn health_checks(&self) -> usize {
        self.health_checks.load(Ordering::SeqCst)
    }

    fn next_step(&self) -> Step {
        match self.steps.lock().unwrap().pop_front() {
            Some(step) => step,
            None => self.default.lock().unwrap().clone(),
        }
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct ScriptedProvider {
    model: String,
    script: Arc<Script>,
    timeout: Duration,
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    async fn generate(&self, prompt: &str, _options: &GenerationOptions) -> llm::Result<GenerationResult> {
        self.script.calls.lock().unwrap().push(Instant::now());
        let _guard = InFlight::enter(&self.script.in_flight);

        match self.script.next_step() {
            Step::Reply(text) => {
                let mut result = GenerationResult::new(text, self.model.clone());
                result.finish_reason = Some(format!("echo:{}", prompt.len()));
                Ok(result)
            }
            Step::ReplyAfter(delay, text) => {
                tokio::time::sleep(delay).await;
                Ok(GenerationResult::new(text, self.model.clone()))
            }
            Step::Fail(error) => Err(error),
            Step::Hang => std::future::pending().await,
        }
    }

    async fn health_check(&self) -> bool {
        self.script.health_checks.fetch_add(1, Ordering::SeqCst);
        if self.script.health_hangs.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        self.script.healthy.load(Ordering::SeqCst)
    }

    fn validate_config(&self) -> llm::Result<()> {
        if self.script.reject_config.load(Ordering::SeqCst) {
            return Err(LlmError::config("scripted provider rejected its config"));
        }
        Ok(())
    }

    fn metadata(&self) -> ProviderMetadata {
        ProviderMetadata {
            provider_type: ProviderType::Custom(SCRIPTED.to_string()),
            deployment_mode: DeploymentMode::Cloud,
            model: self.model.clone(),
            region: None,
        }
    }

    fn request_timeout(&self) -> Duration {
        self.timeout
    }
}

pub type Scripts = Arc<Mutex<HashMap<String, Arc<Script>>>>;

/// Factory with the builtin adapters plus the scripted test provider.
pub fn scripted_factory(scripts: Scripts) -> ProviderFactory {
    let mut factory = ProviderFactory::with_builtin();
    factory.register(
        SCRIPTED,
        Arc::new(move |config: &ProviderConfig, ctx: llm::ProviderBuildContext| -> llm::Result<Arc<dyn LlmProvider>> {
            let script = scripts
                .lock()
                .unwrap()
                .get(&config.id)
                .cloned()
                .ok_or_else(|| LlmError::config(format!("no script for '{}'", config.id)))?;
            Ok(Arc::new(ScriptedProvider {
                model: config.model.clone(),
                script,
                timeout: ctx.request_timeout,
            }) as Arc<dyn LlmProvider>)
        }),
    );
    factory
}

pub fn scripted_config(id: &str) -> ProviderConfig {
    ProviderConfig::new(
        id,
        &format!("Scripted {id}"),
        ProviderType::Custom(SCRIPTED.to_string()),
        "scripted-model",
    )
}

/// Exact backoff so paused-clock assertions can be precise.
pub fn test_config() -> RuntimeConfig {
    let mut config = RuntimeConfig::default();
    config.retry.jitter = false;
    config
}

pub fn unavailable(id: &str) -> LlmError {
    LlmError::ProviderUnavailable {
        provider: id.to_string(),
        reason: "connection refused".to_string(),
    }
}

/// In-memory store whose every call takes a configurable amount of time.
#[derive(Debug, Default)]
pub struct SlowStore {
    inner: InMemoryConfigStore,
    latency_ms: AtomicU64,
}

impl SlowStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_latency(&self, latency: Duration) {
        let millis = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        self.latency_ms.store(millis, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    async fn pause(&self) {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
    }
}

#[async_trait]
impl ConfigStore for SlowStore {
    async fn load_config(&self, id: &str) -> llm::Result<Option<ProviderConfig>> {
        self.pause().await;
        self.inner.load_config(id).await
    }

    async fn save_config(&self, config: &ProviderConfig) -> llm::Result<()> {
        self.pause().await;
        self.inner.save_config(config).await
    }

    async fn list_configs(&self, tenant_id: &str) -> llm::Result<Vec<ProviderConfig>> {
        self.pause().await;
        self.inner.list_configs(tenant_id).await
    }

    async fn delete_config(&self, id: &str) -> llm::Result<bool> {
        self.pause().await;
        self.inner.delete_config(id).await
    }
}

pub struct Harness {
    pub runtime: LlmRuntime,
    pub store: Arc<SlowStore>,
    scripts: Scripts,
    config: RuntimeConfig,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: RuntimeConfig) -> Self {
        let scripts: Scripts = Arc::new(Mutex::new(HashMap::new()));
        let store = Arc::new(SlowStore::new());
        let runtime = LlmRuntime::new(
            config.clone(),
            store.clone(),
            Arc::new(PassthroughCipher),
            scripted_factory(scripts.clone()),
        )
        .expect("valid runtime config");

        Self {
            runtime,
            store,
            scripts,
            config,
        }
    }

    /// A fresh runtime over the same store and scripts, as after a restart.
    pub fn restart(&self) -> LlmRuntime {
        LlmRuntime::new(
            self.config.clone(),
            self.store.clone(),
            Arc::new(PassthroughCipher),
            scripted_factory(self.scripts.clone()),
        )
        .expect("valid runtime config")
    }

    pub fn script(&self, id: &str) -> Arc<Script> {
        self.scripts
            .lock()
            .unwrap()
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Script::new()))
            .clone()
    }

    /// Register a scripted provider and return its script.
    pub async fn add(&self, id: &str) -> Arc<Script> {
        let script = self.script(id);
        self.runtime
            .register_provider(id, scripted_config(id))
            .await
            .expect("register scripted provider");
        script
    }

    /// `active` and `fallback` registered and routed.
    pub async fn pair(&self, active: &str, fallback: &str) -> (Arc<Script>, Arc<Script>) {
        let primary = self.add(active).await;
        let secondary = self.add(fallback).await;
        self.runtime.set_active(active).await.expect("set active");
        self.runtime.set_fallback(fallback).await.expect("set fallback");
        (primary, secondary)
    }
}

//! Background provider health tracking.
//!
//! [`HealthBoard`] is the copy-on-write status map read on every routing
//! decision; [`HealthMonitor`] is the polling loop that writes it.

use arc_swap::ArcSwap;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::manager::ProviderManager;

const EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Unknown,
    Healthy,
    Unhealthy,
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthState::Unknown => write!(f, "unknown"),
            HealthState::Healthy => write!(f, "healthy"),
            HealthState::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Latest health record for one provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub provider_id: String,
    pub is_healthy: bool,
    pub last_checked_at: DateTime<Utc>,
    pub consecutive_failures: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl HealthStatus {
    pub fn state(&self) -> HealthState {
        if self.is_healthy {
            HealthState::Healthy
        } else {
            HealthState::Unhealthy
        }
    }
}

/// Emitted only when a provider's state changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthTransition {
    pub provider_id: String,
    pub from: HealthState,
    pub to: HealthState,
    pub timestamp: DateTime<Utc>,
}

/// Read-mostly status map. Readers load an immutable snapshot and never
/// wait on the writer.
#[derive(Debug, Default)]
pub struct HealthBoard {
    statuses: ArcSwap<HashMap<String, HealthStatus>>,
}

impl HealthBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Arc<HashMap<String, HealthStatus>> {
        self.statuses.load_full()
    }

    pub fn get(&self, provider_id: &str) -> Option<HealthStatus> {
        self.statuses.load().get(provider_id).cloned()
    }

    pub fn state(&self, provider_id: &str) -> HealthState {
        self.statuses
            .load()
            .get(provider_id)
            .map(HealthStatus::state)
            .unwrap_or(HealthState::Unknown)
    }

    pub fn is_unhealthy(&self, provider_id: &str) -> bool {
        self.state(provider_id) == HealthState::Unhealthy
    }

    /// Apply one check outcome. A single failure flips a healthy provider
    /// and a single success restores it; returns the transition, if any.
    pub fn record(
        &self,
        provider_id: &str,
        outcome: std::result::Result<(), String>,
    ) -> Option<HealthTransition> {
        let now = Utc::now();
        let mut transition = None;

        self.statuses.rcu(|current| {
            let mut next = HashMap::clone(current);
            let previous = next.get(provider_id).map(HealthStatus::state);
            let from = previous.unwrap_or(HealthState::Unknown);

            let status = next
                .entry(provider_id.to_string())
                .or_insert_with(|| HealthStatus {
                    provider_id: provider_id.to_string(),
                    is_healthy: false,
                    last_checked_at: now,
                    consecutive_failures: 0,
                    last_error: None,
                });
            status.last_checked_at = now;
            match &outcome {
                Ok(()) => {
                    status.is_healthy = true;
                    status.consecutive_failures = 0;
                    status.last_error = None;
                }
                Err(reason) => {
                    status.is_healthy = false;
                    status.consecutive_failures = status.consecutive_failures.saturating_add(1);
                    status.last_error = Some(reason.clone());
                }
            }

            let to = status.state();
            transition = (from != to).then(|| HealthTransition {
                provider_id: provider_id.to_string(),
                from,
                to,
                timestamp: now,
            });
            next
        });

        transition
    }

    pub fn remove(&self, provider_id: &str) {
        self.statuses.rcu(|current| {
            let mut next = HashMap::clone(current);
            next.remove(provider_id);
            next
        });
    }

    /// Drop statuses for ids no longer registered.
    pub fn retain_ids(&self, ids: &HashSet<String>) {
        let current = self.statuses.load();
        if current.keys().all(|id| ids.contains(id)) {
            return;
        }
        self.statuses.rcu(|current| {
            current
                .iter()
                .filter(|(id, _)| ids.contains(*id))
                .map(|(id, status)| (id.clone(), status.clone()))
                .collect::<HashMap<_, _>>()
        });
    }
}

/// Receiver for health transition events.
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn notify(&self, transition: &HealthTransition);
}

/// Writes transitions to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAlertSink;

#[async_trait]
impl AlertSink for LogAlertSink {
    async fn notify(&self, transition: &HealthTransition) {
        match transition.to {
            HealthState::Unhealthy => warn!(
                target: "llm::alerts",
                provider_id = %transition.provider_id,
                from = %transition.from,
                "Provider became unhealthy"
            ),
            _ => info!(
                target: "llm::alerts",
                provider_id = %transition.provider_id,
                from = %transition.from,
                to = %transition.to,
                "Provider health changed"
            ),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HealthMonitorConfig {
    pub interval: Duration,
    pub check_timeout: Duration,
}

impl Default for HealthMonitorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            check_timeout: Duration::from_secs(5),
        }
    }
}

/// Polls every provider known to the manager on a fixed interval.
///
/// Providers are looked up by id on each cycle, never held across cycles.
pub struct HealthMonitor {
    manager: Arc<ProviderManager>,
    board: Arc<HealthBoard>,
    config: HealthMonitorConfig,
    events: broadcast::Sender<HealthTransition>,
}

impl HealthMonitor {
    pub fn new(manager: Arc<ProviderManager>, config: HealthMonitorConfig) -> Self {
        let board = manager.health_board();
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            manager,
            board,
            config,
            events,
        }
    }

    pub fn board(&self) -> Arc<HealthBoard> {
        self.board.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HealthTransition> {
        self.events.subscribe()
    }

    /// Run one poll over every registered provider.
    ///
    /// Checks run concurrently, each under its own timeout, so one hanging
    /// provider cannot hold up the others. Returns the transitions observed.
    pub async fn check_now(&self) -> Vec<HealthTransition> {
        let ids = match self.manager.provider_ids().await {
            Ok(ids) => ids,
            Err(e) => {
                warn!(error = %e, "Could not list providers for health check");
                return Vec::new();
            }
        };
        self.board.retain_ids(&ids.iter().cloned().collect());

        let mut checks = JoinSet::new();
        for id in ids {
            let manager = self.manager.clone();
            let check_timeout = self.config.check_timeout;
            checks.spawn(async move {
                // The instance lookup can wait on the store or the registry
                // lock, so it counts against the same deadline as the probe.
                let probe = async {
                    let provider = manager.get(&id).await.map_err(|e| e.to_string())?;
                    Ok::<bool, String>(provider.health_check().await)
                };
                let outcome = match tokio::time::timeout(check_timeout, probe).await {
                    Ok(Ok(true)) => Ok(()),
                    Ok(Ok(false)) => Err("health check failed".to_string()),
                    Ok(Err(e)) => Err(e),
                    Err(_) => Err(format!("health check timed out after {check_timeout:?}")),
                };
                (id, outcome)
            });
        }

        let mut transitions = Vec::new();
        while let Some(joined) = checks.join_next().await {
            let (id, outcome) = match joined {
                Ok(result) => result,
                Err(e) => {
                    warn!(error = %e, "Health check task failed");
                    continue;
                }
            };

            // Deregistered while the check was running.
            if !self.manager.contains(&id).await {
                debug!(provider_id = %id, "Skipping health result for removed provider");
                continue;
            }

            if let Some(transition) = self.board.record(&id, outcome) {
                match transition.to {
                    HealthState::Unhealthy => warn!(
                        provider_id = %id,
                        from = %transition.from,
                        error = %self.board.get(&id).and_then(|s| s.last_error).unwrap_or_default(),
                        "Provider marked unhealthy"
                    ),
                    _ => info!(provider_id = %id, from = %transition.from, "Provider marked healthy"),
                }
                // No subscribers is fine.
                let _ = self.events.send(transition.clone());
                transitions.push(transition);
            }
        }
        transitions
    }

    /// Start the polling loop. It stops within one in-flight check of
    /// `shutdown` firing; dropping the cycle aborts outstanding probes.
    pub fn spawn(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(interval_secs = self.config.interval.as_secs(), "Health monitor started");

            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break,
                    _ = self.check_now() => {}
                }
            }

            info!("Health monitor stopped");
        })
    }

    /// Forward transitions to `sink` from a separate task, so a slow sink
    /// only delays its own deliveries.
    pub fn forward_to(
        &self,
        sink: Arc<dyn AlertSink>,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let mut events = self.subscribe();
        tokio::spawn(async move {
            loop {
                let received = tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break,
                    received = events.recv() => received,
                };
                match received {
                    Ok(transition) => sink.notify(&transition).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Alert sink fell behind; dropped health events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

impl fmt::Debug for HealthMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HealthMonitor")
            .field("config", &self.config)
            .field("tracked", &self.board.snapshot().len())
            .finish()
    }
}

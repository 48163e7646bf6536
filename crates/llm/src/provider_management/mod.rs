//! Provider registry, routing slots and health monitoring.

pub mod health;
pub mod manager;
pub mod routing;

pub use health::{
    AlertSink, HealthBoard, HealthMonitor, HealthMonitorConfig, HealthState, HealthStatus,
    HealthTransition, LogAlertSink,
};
pub use manager::{ProviderManager, ProviderSummary};
pub use routing::{RoutingState, RoutingTable};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::errors::RouteRole;

/// Current routing targets, by provider id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingState {
    pub active: Option<String>,
    pub fallback: Option<String>,
}

/// Active/fallback slots behind their own lock, independent of the
/// provider registry lock.
#[derive(Debug, Default)]
pub struct RoutingTable {
    state: RwLock<RoutingState>,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> RoutingState {
        self.state.read().clone()
    }

    pub fn active(&self) -> Option<String> {
        self.state.read().active.clone()
    }

    pub fn fallback(&self) -> Option<String> {
        self.state.read().fallback.clone()
    }

    pub fn set_active(&self, id: &str) -> Option<String> {
        self.state.write().active.replace(id.to_string())
    }

    pub fn set_fallback(&self, id: &str) -> Option<String> {
        self.state.write().fallback.replace(id.to_string())
    }

    pub fn clear_fallback(&self) -> Option<String> {
        self.state.write().fallback.take()
    }

    pub fn restore(&self, state: RoutingState) {
        *self.state.write() = state;
    }

    pub fn role_of(&self, id: &str) -> Option<RouteRole> {
        let state = self.state.read();
        if state.active.as_deref() == Some(id) {
            Some(RouteRole::Active)
        } else if state.fallback.as_deref() == Some(id) {
            Some(RouteRole::Fallback)
        } else {
            None
        }
    }
}

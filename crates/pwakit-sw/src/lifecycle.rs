//! Worker lifecycle state machine and stale-cache eviction.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::cache::SharedCaches;
use crate::ServiceWorkerError;

/// Service worker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ServiceWorkerState {
    /// Initial state, script parsed.
    #[default]
    Parsed,
    /// Installing (install event).
    Installing,
    /// Installed but waiting for activation.
    Installed,
    /// Activating (activate event).
    Activating,
    /// Active and controlling pages.
    Activated,
    /// Redundant (install failed or replaced).
    Redundant,
}

/// Tracks the current state and rejects out-of-order transitions.
#[derive(Debug, Clone, Default)]
pub struct Lifecycle {
    state: ServiceWorkerState,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ServiceWorkerState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == ServiceWorkerState::Activated
    }

    /// Move to `to`, provided the current state allows it.
    pub fn transition(&mut self, to: ServiceWorkerState) -> Result<(), ServiceWorkerError> {
        use ServiceWorkerState::*;

        let allowed = matches!(
            (self.state, to),
            (Parsed, Installing)
                | (Installing, Installed)
                | (Installing, Redundant)
                | (Installed, Activating)
                | (Activating, Activated)
                | (Activating, Redundant)
                | (Installed, Redundant)
                | (Activated, Redundant)
        );

        if !allowed {
            return Err(ServiceWorkerError::StateError(format!(
                "cannot move from {:?} to {:?}",
                self.state, to
            )));
        }

        debug!(from = ?self.state, to = ?to, "Lifecycle transition");
        self.state = to;
        Ok(())
    }
}

/// Delete every cache generation not named in `keep`.
///
/// Returns the deleted names, sorted.
pub async fn evict_stale_caches(caches: &SharedCaches, keep: &[&str]) -> Vec<String> {
    let mut storage = caches.write().await;
    let stale: Vec<String> = storage
        .keys()
        .into_iter()
        .filter(|name| !keep.contains(&name.as_str()))
        .collect();

    for name in &stale {
        info!(cache = %name, "Removing old cache");
        storage.delete(name);
    }
    stale
}

//! Connectivity tracking and the sync-readiness gate.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

/// Whether the internet (and so the remote store) can actually be reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Reachability {
    Reachable,
    Unreachable,
    /// The platform has not determined reachability yet.
    Unknown,
}

impl From<Option<bool>> for Reachability {
    fn from(value: Option<bool>) -> Self {
        match value {
            Some(true) => Reachability::Reachable,
            Some(false) => Reachability::Unreachable,
            None => Reachability::Unknown,
        }
    }
}

/// Snapshot of the device's connectivity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkState {
    /// Link-layer connectivity.
    pub connected: bool,
    pub reachability: Reachability,
}

impl NetworkState {
    pub fn new(connected: bool, reachability: Reachability) -> Self {
        Self {
            connected,
            reachability,
        }
    }

    /// Connected with confirmed internet access.
    pub fn online() -> Self {
        Self::new(true, Reachability::Reachable)
    }

    pub fn offline() -> Self {
        Self::new(false, Reachability::Unknown)
    }
}

/// Decide whether a dispatch cycle is worth making.
///
/// Only an explicit `Reachable` on a connected link passes. Captive portals
/// and half-initialized radios report connected with unknown or negative
/// reachability, and are treated as offline.
pub fn should_attempt_sync(state: &NetworkState) -> bool {
    state.connected && state.reachability == Reachability::Reachable
}

/// Platform-provided source of connectivity state.
#[async_trait]
pub trait NetworkSource: Send + Sync {
    /// Query the current state. Called once per dispatch cycle.
    async fn current_state(&self) -> NetworkState;
}

/// Source that always reports the same state.
#[derive(Debug, Clone, Copy)]
pub struct StaticNetworkSource(pub NetworkState);

#[async_trait]
impl NetworkSource for StaticNetworkSource {
    async fn current_state(&self) -> NetworkState {
        self.0
    }
}

/// Source fed by platform push notifications.
///
/// The platform layer publishes every change through the paired
/// `watch::Sender`; subscribers may use the changes to trigger cycles.
#[derive(Debug, Clone)]
pub struct WatchNetworkSource {
    rx: watch::Receiver<NetworkState>,
}

impl WatchNetworkSource {
    /// Create a source starting at `initial`, returning the publishing side.
    pub fn new(initial: NetworkState) -> (Self, watch::Sender<NetworkState>) {
        let (tx, rx) = watch::channel(initial);
        (Self { rx }, tx)
    }

    /// Receiver that resolves on every published change.
    pub fn subscribe(&self) -> watch::Receiver<NetworkState> {
        self.rx.clone()
    }
}

#[async_trait]
impl NetworkSource for WatchNetworkSource {
    async fn current_state(&self) -> NetworkState {
        *self.rx.borrow()
    }
}

/// Re-queries the network source on every check; nothing is cached.
#[derive(Clone)]
pub struct NetworkMonitor {
    source: Arc<dyn NetworkSource>,
}

impl NetworkMonitor {
    pub fn new(source: Arc<dyn NetworkSource>) -> Self {
        Self { source }
    }

    /// Fresh state from the source.
    pub async fn snapshot(&self) -> NetworkState {
        let state = self.source.current_state().await;
        debug!(
            "Network state: connected={}, reachability={:?}",
            state.connected, state.reachability
        );
        state
    }

    /// Query the source and apply the readiness gate.
    pub async fn should_attempt_sync(&self) -> bool {
        should_attempt_sync(&self.snapshot().await)
    }
}

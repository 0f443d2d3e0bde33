//! Fieldsync Sync Queue
//!
//! This module moves captured surveys from the device to the remote store:
//! - Admission through validation and the storage guard
//! - Durable queue items with an explicit delivery state machine
//! - Retry scheduling with exponential backoff and a retry ceiling
//! - A network gate consulted once per dispatch cycle
//! - Background scheduling on demand, on a timer and on network changes

pub mod config;
pub mod network;
pub mod queue;
pub mod retry;
pub mod scheduler;
pub mod state;

// Re-export main types
pub use config::{FieldSyncConfig, SyncConfig};
pub use network::{
    should_attempt_sync, NetworkMonitor, NetworkSource, NetworkState, Reachability,
    StaticNetworkSource, WatchNetworkSource,
};
pub use queue::{CycleStatus, DispatchReport, EnqueueError, QueueBackends, SyncQueue};
pub use retry::{RetryDecision, RetryPolicy};
pub use scheduler::{DispatchScheduler, DispatchSchedulerHandle};
pub use state::{ItemEvent, ItemStatus, QueueItem};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_exports() {
        let config = FieldSyncConfig::default();
        let _policy = RetryPolicy::from_config(&config.sync);
        let _state = NetworkState::offline();
        assert!(!ItemStatus::Pending.is_terminal());
    }
}

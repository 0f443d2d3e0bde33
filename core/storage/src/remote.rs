//! Remote store trait definition and an in-memory implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;

use fieldsync_common::SurveyId;

/// Acknowledgement of an accepted upsert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ack {
    /// Record key the remote stored the payload under.
    pub record_id: String,
    /// When the remote accepted the record.
    pub accepted_at: DateTime<Utc>,
}

impl Ack {
    pub fn now(record_id: &SurveyId) -> Self {
        Self {
            record_id: record_id.to_string(),
            accepted_at: Utc::now(),
        }
    }
}

/// Failed delivery attempt.
///
/// Every variant is transient: the queue records it on the item and
/// schedules another attempt until the retry ceiling is reached.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    /// Transport-level failure (connection refused, DNS, TLS).
    #[error("Remote unavailable: {0}")]
    Unavailable(String),

    /// No response within the allotted time.
    #[error("Remote call timed out after {0:?}")]
    Timeout(Duration),

    /// The remote answered with a non-success status.
    #[error("Remote rejected record ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// The payload could not be encoded.
    #[error("Payload encoding failed: {0}")]
    Encoding(String),
}

/// Remote persistence backend.
///
/// # Idempotence
/// Upserting the same `record_id` twice must leave exactly one remote
/// record, so a retry after a partial failure never duplicates data.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Get the backend name (e.g., "memory", "http").
    fn name(&self) -> &str;

    /// Insert or replace the record keyed by `record_id`.
    async fn upsert(
        &self,
        record_id: &SurveyId,
        payload: &serde_json::Value,
    ) -> Result<Ack, RemoteError>;
}

#[derive(Default)]
struct MemoryRemoteState {
    records: HashMap<String, serde_json::Value>,
    scripted_failures: VecDeque<RemoteError>,
    failing: Option<RemoteError>,
    calls: usize,
}

/// In-memory remote store.
///
/// Useful for testing and offline development. Failures can be scripted
/// to exercise the retry path. Clones share state.
#[derive(Clone, Default)]
pub struct MemoryRemote {
    state: Arc<Mutex<MemoryRemoteState>>,
    latency: Option<Duration>,
}

impl MemoryRemote {
    /// Create a new remote that accepts everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every upsert by `latency` before answering.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Fail the next upsert with `error`. Queued failures are consumed in order.
    pub fn fail_next(&self, error: RemoteError) {
        if let Ok(mut state) = self.state.lock() {
            state.scripted_failures.push_back(error);
        }
    }

    /// Fail every upsert with `error` until cleared with `None`.
    pub fn set_failing(&self, error: Option<RemoteError>) {
        if let Ok(mut state) = self.state.lock() {
            state.failing = error;
        }
    }

    /// Stored payload for a record.
    pub fn record(&self, record_id: &str) -> Option<serde_json::Value> {
        self.state
            .lock()
            .ok()
            .and_then(|s| s.records.get(record_id).cloned())
    }

    /// Number of distinct records stored.
    pub fn record_count(&self) -> usize {
        self.state.lock().map(|s| s.records.len()).unwrap_or(0)
    }

    /// Number of upsert calls received, successful or not.
    pub fn call_count(&self) -> usize {
        self.state.lock().map(|s| s.calls).unwrap_or(0)
    }
}

#[async_trait]
impl RemoteStore for MemoryRemote {
    fn name(&self) -> &str {
        "memory"
    }

    async fn upsert(
        &self,
        record_id: &SurveyId,
        payload: &serde_json::Value,
    ) -> Result<Ack, RemoteError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let mut state = self
            .state
            .lock()
            .map_err(|_| RemoteError::Unavailable("memory remote lock poisoned".to_string()))?;
        state.calls += 1;

        if let Some(err) = state.scripted_failures.pop_front() {
            return Err(err);
        }
        if let Some(err) = state.failing.clone() {
            return Err(err);
        }

        state
            .records
            .insert(record_id.to_string(), payload.clone());
        Ok(Ack::now(record_id))
    }
}

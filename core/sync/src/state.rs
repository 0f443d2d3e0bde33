//! Queue item state and its transitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use fieldsync_common::{Error, QueueItemId, Result, SurveyId};
use fieldsync_validation::Survey;

/// Delivery status of a queue item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ItemStatus {
    /// Waiting for the next eligible dispatch.
    Pending,
    /// A remote upsert is in flight.
    Attempting,
    /// Accepted by the remote store. Terminal.
    Delivered,
    /// Retry ceiling reached; waits for an operator. Terminal.
    Exhausted,
}

/// Something that happened to a queue item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemEvent {
    /// A cycle picked the item for delivery.
    Dispatch,
    /// The remote acknowledged the upsert.
    Succeed,
    /// The upsert failed or timed out.
    Fail,
    /// The scheduler found the retry budget spent.
    Exhaust,
    /// An operator asked for a fresh set of retries.
    Requeue,
    /// The cycle that dispatched the item never finished.
    Recover,
}

impl ItemStatus {
    /// The status after `event`, or an error if the event is illegal here.
    pub fn apply(self, event: ItemEvent) -> Result<ItemStatus> {
        use ItemEvent::*;
        use ItemStatus::*;

        match (self, event) {
            (Pending, Dispatch) => Ok(Attempting),
            (Pending, Exhaust) => Ok(Exhausted),
            (Attempting, Succeed) => Ok(Delivered),
            (Attempting, Fail) => Ok(Pending),
            (Attempting, Recover) => Ok(Pending),
            (Exhausted, Requeue) => Ok(Pending),
            (from, event) => Err(Error::InvalidTransition {
                from: from.to_string(),
                event: format!("{:?}", event),
            }),
        }
    }

    /// Whether no further automatic transition can happen.
    pub fn is_terminal(self) -> bool {
        matches!(self, ItemStatus::Delivered | ItemStatus::Exhausted)
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ItemStatus::Pending => "pending",
            ItemStatus::Attempting => "attempting",
            ItemStatus::Delivered => "delivered",
            ItemStatus::Exhausted => "exhausted",
        };
        f.write_str(name)
    }
}

/// A survey plus its delivery bookkeeping.
///
/// Bookkeeping only changes through the transition methods, so the retry
/// count and the last-attempt time always move together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    pub(crate) id: QueueItemId,
    /// Insertion order; dispatch runs oldest first.
    pub(crate) sequence: u64,
    pub(crate) survey: Survey,
    pub(crate) retry_count: u32,
    pub(crate) max_retries: u32,
    pub(crate) last_attempt: Option<DateTime<Utc>>,
    pub(crate) last_error: Option<String>,
    pub(crate) status: ItemStatus,
    pub(crate) enqueued_at: DateTime<Utc>,
}

impl QueueItem {
    /// Create a pending item that has never been attempted.
    pub fn new(survey: Survey, max_retries: u32, sequence: u64) -> Self {
        Self {
            id: QueueItemId::generate(),
            sequence,
            survey,
            retry_count: 0,
            max_retries,
            last_attempt: None,
            last_error: None,
            status: ItemStatus::Pending,
            enqueued_at: Utc::now(),
        }
    }

    pub fn id(&self) -> QueueItemId {
        self.id
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn survey(&self) -> &Survey {
        &self.survey
    }

    pub fn survey_id(&self) -> &SurveyId {
        &self.survey.id
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn last_attempt(&self) -> Option<DateTime<Utc>> {
        self.last_attempt
    }

    /// Message of the most recent delivery failure.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn status(&self) -> ItemStatus {
        self.status
    }

    pub fn enqueued_at(&self) -> DateTime<Utc> {
        self.enqueued_at
    }

    /// Key under which the item is persisted.
    pub fn store_key(&self) -> String {
        self.id.to_string()
    }

    fn apply(&mut self, event: ItemEvent) -> Result<()> {
        self.status = self.status.apply(event)?;
        Ok(())
    }

    /// Pending -> Attempting.
    pub fn begin_attempt(&mut self) -> Result<()> {
        self.apply(ItemEvent::Dispatch)
    }

    /// Attempting -> Delivered.
    pub fn record_success(&mut self) -> Result<()> {
        self.apply(ItemEvent::Succeed)?;
        self.last_error = None;
        Ok(())
    }

    /// Attempting -> Pending, consuming one retry.
    pub fn record_failure(&mut self, at: DateTime<Utc>, error: impl Into<String>) -> Result<()> {
        self.apply(ItemEvent::Fail)?;
        self.retry_count = self.retry_count.saturating_add(1);
        self.last_attempt = Some(at);
        self.last_error = Some(error.into());
        Ok(())
    }

    /// Pending -> Exhausted.
    pub fn mark_exhausted(&mut self) -> Result<()> {
        self.apply(ItemEvent::Exhaust)
    }

    /// Exhausted -> Pending with a fresh retry budget.
    pub fn requeue(&mut self) -> Result<()> {
        self.apply(ItemEvent::Requeue)?;
        self.retry_count = 0;
        self.last_attempt = None;
        self.last_error = None;
        Ok(())
    }

    /// Attempting -> Pending without consuming a retry.
    pub fn recover(&mut self) -> Result<()> {
        self.apply(ItemEvent::Recover)
    }

    /// Serialize for the record store.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize from the record store.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| Error::Serialization(e.to_string()))
    }
}

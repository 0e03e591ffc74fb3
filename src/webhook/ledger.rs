//! Idempotency Ledger
//!
//! Durable record of every event id this service has ever admitted.
//! Provider delivery is at-least-once: retries after a timeout produce
//! exact duplicates, sometimes near-simultaneously. Without this gate a
//! double-delivered checkout event would provision the same subscription
//! period twice.
//!
//! `try_begin` is the sole admission-control point and must be linearizable
//! per event id: of two concurrent deliveries of the same id, exactly one
//! is admitted and the other observes `AlreadyApplied` or `InProgress`.
//!
//! The ledger is injected as a trait object so it can be backed by any
//! durable key-value store with an atomic conditional insert. The bundled
//! [`InMemoryLedger`] serializes admission behind a mutex and serves
//! single-process deployments and tests.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::webhook::error::LedgerError;

/// Lifecycle of one idempotency record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerStatus {
    /// Admitted; processing has not finished
    InProgress,
    /// Processing finished and state was (or intentionally was not) mutated
    Applied,
    /// Processing failed; a future retry may re-admit
    Failed,
}

/// One record per distinct event id ever seen. Records are never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    /// The provider-assigned event id
    pub event_id: String,

    /// Current lifecycle status
    pub status: LedgerStatus,

    /// When this id was first admitted (reset on re-admission)
    pub first_seen_at: DateTime<Utc>,

    /// When processing completed, if it has
    pub applied_at: Option<DateTime<Utc>>,

    /// How many times this id has been admitted
    pub attempts: u32,
}

/// Result of an admission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// This caller owns processing for the event id
    Admitted,
    /// The event already mutated state; do not process again
    AlreadyApplied,
    /// Another delivery of the same id is being processed right now
    InProgress,
}

/// Admission control over event ids.
#[async_trait]
pub trait IdempotencyLedger: Send + Sync + 'static {
    /// Atomically insert an in-progress record if the id is unseen.
    ///
    /// Must be linearizable per event id. A `Failed` record re-admits, as
    /// does an `InProgress` record older than the implementation's reclaim
    /// window (the admitting process may have crashed mid-update).
    async fn try_begin(&self, event_id: &str) -> Result<Admission, LedgerError>;

    /// Terminal transition: the event's effect is committed.
    ///
    /// `InProgress -> Applied` is the only path to `Applied`.
    async fn mark_applied(&self, event_id: &str) -> Result<(), LedgerError>;

    /// Processing failed after admission; allow a provider retry to
    /// re-admit rather than treating the redelivery as a duplicate.
    async fn mark_failed(&self, event_id: &str) -> Result<(), LedgerError>;
}

/// Default reclaim window for records stuck in progress.
pub const DEFAULT_RECLAIM_AFTER: Duration = Duration::from_secs(60);

/// Mutex-backed ledger for single-process deployments and tests.
pub struct InMemoryLedger {
    records: Mutex<HashMap<String, IdempotencyRecord>>,
    reclaim_after: Duration,
}

impl InMemoryLedger {
    /// Create a ledger that re-admits in-progress records older than
    /// `reclaim_after`.
    pub fn new(reclaim_after: Duration) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            reclaim_after,
        }
    }

    /// Look up the record for an event id, if any.
    pub fn record(&self, event_id: &str) -> Option<IdempotencyRecord> {
        self.records.lock().get(event_id).cloned()
    }

    /// Number of distinct event ids ever seen.
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Whether the ledger has seen no events yet.
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    fn reclaimable(&self, record: &IdempotencyRecord, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(record.first_seen_at)
            .to_std()
            .map(|age| age > self.reclaim_after)
            .unwrap_or(false)
    }
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        Self::new(DEFAULT_RECLAIM_AFTER)
    }
}

#[async_trait]
impl IdempotencyLedger for InMemoryLedger {
    async fn try_begin(&self, event_id: &str) -> Result<Admission, LedgerError> {
        let now = Utc::now();
        let mut records = self.records.lock();

        match records.entry(event_id.to_string()) {
            Entry::Vacant(slot) => {
                slot.insert(IdempotencyRecord {
                    event_id: event_id.to_string(),
                    status: LedgerStatus::InProgress,
                    first_seen_at: now,
                    applied_at: None,
                    attempts: 1,
                });
                Ok(Admission::Admitted)
            }
            Entry::Occupied(mut slot) => {
                let record = slot.get_mut();
                match record.status {
                    LedgerStatus::Applied => Ok(Admission::AlreadyApplied),
                    LedgerStatus::Failed => {
                        record.status = LedgerStatus::InProgress;
                        record.first_seen_at = now;
                        record.attempts += 1;
                        Ok(Admission::Admitted)
                    }
                    LedgerStatus::InProgress => {
                        if self.reclaimable(record, now) {
                            // The previous owner likely crashed; take over
                            record.first_seen_at = now;
                            record.attempts += 1;
                            Ok(Admission::Admitted)
                        } else {
                            Ok(Admission::InProgress)
                        }
                    }
                }
            }
        }
    }

    async fn mark_applied(&self, event_id: &str) -> Result<(), LedgerError> {
        let mut records = self.records.lock();
        if let Some(record) = records.get_mut(event_id) {
            if record.status == LedgerStatus::InProgress {
                record.status = LedgerStatus::Applied;
                record.applied_at = Some(Utc::now());
            }
        }
        Ok(())
    }

    async fn mark_failed(&self, event_id: &str) -> Result<(), LedgerError> {
        let mut records = self.records.lock();
        if let Some(record) = records.get_mut(event_id) {
            if record.status == LedgerStatus::InProgress {
                record.status = LedgerStatus::Failed;
            }
        }
        Ok(())
    }
}

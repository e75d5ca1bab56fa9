//! Duplicate-delivery suppression for change events.
//!
//! Change events arrive at least once, so every side-effecting handler asks
//! the guard before mutating counters. The guard fails closed: when storage
//! cannot answer, the handler aborts and redelivery retries later.

use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;

use crate::{
    dao::{models::ProcessedEventRecord, storage::StorageError, store::Store},
    error::ServiceError,
};

/// Store-backed registry of already-processed event identifiers.
pub struct IdempotencyGuard {
    store: Arc<dyn Store>,
    ttl: Duration,
}

impl IdempotencyGuard {
    /// Guard over the given store, retaining markers for `ttl`.
    pub fn new(store: Arc<dyn Store>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// Whether the event already produced its side effects. Expired markers
    /// count as unprocessed; the sweep removes them lazily.
    pub async fn already_processed(
        &self,
        event_id: &str,
        now: OffsetDateTime,
    ) -> Result<bool, ServiceError> {
        let marker = self.store.find_processed_event(event_id).await?;
        Ok(marker.is_some_and(|m| m.expires_at > now))
    }

    /// Record that the event has been processed. A marker written by a racing
    /// handler is treated as success; the work was done exactly once either
    /// way.
    pub async fn mark_processed(
        &self,
        event_id: &str,
        event_type: &str,
        subject: &str,
        now: OffsetDateTime,
    ) -> Result<(), ServiceError> {
        let record = ProcessedEventRecord {
            event_id: event_id.to_owned(),
            event_type: event_type.to_owned(),
            subject: subject.to_owned(),
            processed_at: now,
            expires_at: now + self.ttl,
        };

        match self.store.insert_processed_event(record).await {
            Ok(()) | Err(StorageError::AlreadyExists { .. }) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

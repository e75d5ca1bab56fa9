//! Per-user, per-action sliding-window rate limiting.
//!
//! The request history lives in the store so every instance shares one
//! budget. Writes are optimistic: a version conflict means another request
//! from the same subject landed first, so the attempt re-reads and retries.
//! When storage cannot answer at all the limiter fails open; losing a little
//! protection beats rejecting legitimate traffic.

use std::sync::Arc;

use time::OffsetDateTime;
use tracing::warn;

use crate::{
    clock::Clock,
    config::RateLimitRule,
    dao::{models::RateLimitRecord, storage::StorageError, store::Store},
    error::ServiceError,
};

const MAX_WRITE_ATTEMPTS: u32 = 5;

/// Read-only view of a subject's current budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitStatus {
    /// Requests inside the current window.
    pub count: u32,
    /// Requests left before the limit trips.
    pub remaining: u32,
    /// When the oldest in-window request falls out, freeing one slot.
    pub reset_at: Option<OffsetDateTime>,
}

/// Store-backed sliding-window limiter.
pub struct RateLimiter {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    /// Limiter over the given store and clock.
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Check the subject's budget for `action` and consume one slot.
    ///
    /// Returns `RateLimited` when the window already holds the maximum number
    /// of requests. Storage failures and retry exhaustion allow the request.
    pub async fn check_and_consume(
        &self,
        subject: &str,
        action: &str,
        rule: RateLimitRule,
    ) -> Result<(), ServiceError> {
        let now_ms = unix_millis(self.clock.now());
        let cutoff = now_ms - (rule.window_secs as i64) * 1000;

        for _ in 0..MAX_WRITE_ATTEMPTS {
            let existing = match self.store.find_rate_limit(subject, action).await {
                Ok(existing) => existing,
                Err(err) => {
                    self.log_fail_open(subject, action, &err);
                    return Ok(());
                }
            };

            let mut record = existing.unwrap_or_else(|| RateLimitRecord {
                subject: subject.to_owned(),
                action: action.to_owned(),
                request_times: Vec::new(),
                updated_at: self.clock.now(),
                version: 0,
            });

            let in_window = record
                .request_times
                .iter()
                .filter(|&&ts| ts > cutoff)
                .count();
            if in_window >= rule.max_requests as usize {
                return Err(ServiceError::RateLimited {
                    window_secs: rule.window_secs,
                });
            }

            record.request_times.push(now_ms);
            // Cap the stored history; anything beyond twice the budget can
            // never matter for a window check.
            let keep = 2 * rule.max_requests as usize;
            if record.request_times.len() > keep {
                let drop = record.request_times.len() - keep;
                record.request_times.drain(..drop);
            }
            record.updated_at = self.clock.now();

            match self.store.put_rate_limit(record).await {
                Ok(_) => return Ok(()),
                Err(StorageError::Conflict { .. }) => continue,
                Err(err) => {
                    self.log_fail_open(subject, action, &err);
                    return Ok(());
                }
            }
        }

        warn!(
            subject,
            action, "rate-limit write contention exhausted retries; allowing request"
        );
        Ok(())
    }

    /// Inspect the subject's budget without consuming anything.
    pub async fn status(
        &self,
        subject: &str,
        action: &str,
        rule: RateLimitRule,
    ) -> Result<RateLimitStatus, ServiceError> {
        let now_ms = unix_millis(self.clock.now());
        let cutoff = now_ms - (rule.window_secs as i64) * 1000;

        let record = self.store.find_rate_limit(subject, action).await?;
        let in_window: Vec<i64> = record
            .map(|r| {
                r.request_times
                    .into_iter()
                    .filter(|&ts| ts > cutoff)
                    .collect()
            })
            .unwrap_or_default();

        let count = in_window.len() as u32;
        let reset_at = in_window
            .iter()
            .min()
            .map(|&oldest| from_unix_millis(oldest + (rule.window_secs as i64) * 1000));

        Ok(RateLimitStatus {
            count,
            remaining: rule.max_requests.saturating_sub(count),
            reset_at,
        })
    }

    /// Clear the subject's history for one action.
    pub async fn reset(&self, subject: &str, action: &str) -> Result<(), ServiceError> {
        self.store.delete_rate_limit(subject, action).await?;
        Ok(())
    }

    fn log_fail_open(&self, subject: &str, action: &str, err: &StorageError) {
        warn!(
            subject,
            action,
            error = %err,
            "rate-limit storage unavailable; allowing request"
        );
    }
}

/// Consume one slot of `subject`'s budget for `action`, using the rule
/// configured for that action. Convenience entry point for route handlers.
pub async fn enforce(
    state: &crate::state::SharedState,
    subject: uuid::Uuid,
    action: &str,
) -> Result<(), ServiceError> {
    let store = state.store().await?;
    let limiter = RateLimiter::new(store, state.clock.clone());
    limiter
        .check_and_consume(&subject.to_string(), action, state.config.rate_limit(action))
        .await
}

fn unix_millis(at: OffsetDateTime) -> i64 {
    (at.unix_timestamp_nanos() / 1_000_000) as i64
}

fn from_unix_millis(ms: i64) -> OffsetDateTime {
    OffsetDateTime::from_unix_timestamp_nanos((ms as i128) * 1_000_000)
        .unwrap_or(OffsetDateTime::UNIX_EPOCH)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{clock::ManualClock, dao::memory::MemoryStore};
    use std::time::Duration;
    use time::macros::datetime;

    fn limiter(store: &MemoryStore, clock: Arc<ManualClock>) -> RateLimiter {
        RateLimiter::new(Arc::new(store.clone()), clock)
    }

    const RULE: RateLimitRule = RateLimitRule {
        max_requests: 10,
        window_secs: 60,
    };

    #[tokio::test]
    async fn eleventh_request_in_window_is_rejected() {
        let store = MemoryStore::new();
        let clock = Arc::new(ManualClock::starting_at(datetime!(2024-06-01 12:00 UTC)));
        let limiter = limiter(&store, clock.clone());

        for _ in 0..10 {
            limiter.check_and_consume("u1", "joinGame", RULE).await.unwrap();
            clock.advance(Duration::from_secs(1));
        }

        let result = limiter.check_and_consume("u1", "joinGame", RULE).await;
        assert!(matches!(
            result,
            Err(ServiceError::RateLimited { window_secs: 60 })
        ));
    }

    #[tokio::test]
    async fn request_succeeds_once_the_window_slides_past() {
        let store = MemoryStore::new();
        let clock = Arc::new(ManualClock::starting_at(datetime!(2024-06-01 12:00 UTC)));
        let limiter = limiter(&store, clock.clone());

        for _ in 0..10 {
            limiter.check_and_consume("u1", "joinGame", RULE).await.unwrap();
        }
        assert!(limiter.check_and_consume("u1", "joinGame", RULE).await.is_err());

        clock.advance(Duration::from_secs(61));
        limiter.check_and_consume("u1", "joinGame", RULE).await.unwrap();
    }

    #[tokio::test]
    async fn subjects_and_actions_have_independent_budgets() {
        let store = MemoryStore::new();
        let clock = Arc::new(ManualClock::starting_at(datetime!(2024-06-01 12:00 UTC)));
        let limiter = limiter(&store, clock.clone());

        for _ in 0..10 {
            limiter.check_and_consume("u1", "joinGame", RULE).await.unwrap();
        }
        assert!(limiter.check_and_consume("u1", "joinGame", RULE).await.is_err());

        limiter.check_and_consume("u2", "joinGame", RULE).await.unwrap();
        limiter.check_and_consume("u1", "castVote", RULE).await.unwrap();
    }

    #[tokio::test]
    async fn storage_failure_fails_open() {
        let store = MemoryStore::new();
        let clock = Arc::new(ManualClock::starting_at(datetime!(2024-06-01 12:00 UTC)));
        let limiter = limiter(&store, clock.clone());
        store.set_unavailable(true);

        limiter.check_and_consume("u1", "joinGame", RULE).await.unwrap();
    }

    #[tokio::test]
    async fn history_is_trimmed_to_twice_the_budget() {
        let store = MemoryStore::new();
        let clock = Arc::new(ManualClock::starting_at(datetime!(2024-06-01 12:00 UTC)));
        let limiter = limiter(&store, clock.clone());

        let rule = RateLimitRule {
            max_requests: 3,
            window_secs: 10,
        };
        for _ in 0..30 {
            let _ = limiter.check_and_consume("u1", "joinGame", rule).await;
            clock.advance(Duration::from_secs(5));
        }

        let record = store.find_rate_limit("u1", "joinGame").await.unwrap().unwrap();
        assert!(record.request_times.len() <= 6);
    }

    #[tokio::test]
    async fn status_reports_remaining_budget_and_reset() {
        let store = MemoryStore::new();
        let clock = Arc::new(ManualClock::starting_at(datetime!(2024-06-01 12:00 UTC)));
        let limiter = limiter(&store, clock.clone());

        for _ in 0..4 {
            limiter.check_and_consume("u1", "joinGame", RULE).await.unwrap();
        }

        let status = limiter.status("u1", "joinGame", RULE).await.unwrap();
        assert_eq!(status.count, 4);
        assert_eq!(status.remaining, 6);
        assert_eq!(
            status.reset_at,
            Some(datetime!(2024-06-01 12:01 UTC))
        );

        limiter.reset("u1", "joinGame").await.unwrap();
        let status = limiter.status("u1", "joinGame", RULE).await.unwrap();
        assert_eq!(status.count, 0);
        assert_eq!(status.remaining, 10);
    }
}

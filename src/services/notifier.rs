//! Push-notification fan-out.
//!
//! Delivery is best effort everywhere: a failed or partial send is logged and
//! never rolls back the state change that triggered it.

use futures::future::BoxFuture;
use tracing::{info, warn};
use uuid::Uuid;

/// Outcome of one batch send.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SendReport {
    /// Recipients the push service accepted.
    pub delivered: usize,
    /// Recipients the push service rejected.
    pub failed: usize,
}

/// A notification addressed to a set of users.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// Target users; tokens are resolved by the implementation.
    pub recipients: Vec<Uuid>,
    /// Short headline.
    pub title: String,
    /// Message body.
    pub body: String,
}

impl Notification {
    /// Notification for a single recipient.
    pub fn to_user(recipient: Uuid, title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            recipients: vec![recipient],
            title: title.into(),
            body: body.into(),
        }
    }
}

/// Delivery backend for push notifications.
pub trait Notifier: Send + Sync {
    /// Send one notification to every recipient, returning per-batch counts.
    fn send(&self, notification: Notification) -> BoxFuture<'static, Result<SendReport, String>>;
}

/// Notifier that only logs; used when no push backend is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn send(&self, notification: Notification) -> BoxFuture<'static, Result<SendReport, String>> {
        Box::pin(async move {
            info!(
                recipients = notification.recipients.len(),
                title = %notification.title,
                "notification (log only)"
            );
            Ok(SendReport {
                delivered: notification.recipients.len(),
                failed: 0,
            })
        })
    }
}

/// Fire a notification without letting its failure surface to the caller.
pub async fn send_best_effort(notifier: &dyn Notifier, notification: Notification) {
    let recipients = notification.recipients.len();
    match notifier.send(notification).await {
        Ok(report) if report.failed > 0 => {
            warn!(
                delivered = report.delivered,
                failed = report.failed,
                "notification partially delivered"
            );
        }
        Ok(_) => {}
        Err(err) => {
            warn!(recipients, error = %err, "notification delivery failed");
        }
    }
}

#[cfg(test)]
pub mod testing {
    use std::sync::Mutex;

    use super::*;

    /// Test notifier that records every send and can be told to fail.
    #[derive(Default)]
    pub struct RecordingNotifier {
        sent: Mutex<Vec<Notification>>,
        fail: std::sync::atomic::AtomicBool,
    }

    impl RecordingNotifier {
        /// Make every subsequent send fail.
        pub fn set_failing(&self, failing: bool) {
            self.fail
                .store(failing, std::sync::atomic::Ordering::SeqCst);
        }

        /// Notifications recorded so far.
        pub fn sent(&self) -> Vec<Notification> {
            self.sent.lock().unwrap().clone()
        }
    }

    impl Notifier for RecordingNotifier {
        fn send(
            &self,
            notification: Notification,
        ) -> BoxFuture<'static, Result<SendReport, String>> {
            if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
                return Box::pin(async { Err("push backend offline".to_owned()) });
            }
            let delivered = notification.recipients.len();
            self.sent.lock().unwrap().push(notification);
            Box::pin(async move {
                Ok(SendReport {
                    delivered,
                    failed: 0,
                })
            })
        }
    }
}

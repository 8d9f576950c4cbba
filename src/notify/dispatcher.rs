use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::Utc;
use crossbeam::channel::{bounded, Sender};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::notify::sink::{Category, Notification, NotificationSink, NotifyError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts after the first one, only taken on rate limits.
    pub max_retries: u32,
    /// Upper bound on any single wait.
    pub max_wait: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            max_wait: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    fn wait(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        retry_after
            .unwrap_or_else(|| Duration::from_secs(2 * u64::from(attempt + 1)))
            .min(self.max_wait)
    }
}

/// Delivers one notification, sleeping and retrying while the sink says it is rate limited.
pub fn deliver_with_retry(
    sink: &dyn NotificationSink,
    notification: &Notification,
    policy: &RetryPolicy,
) -> Result<(), NotifyError> {
    let mut attempt = 0;
    loop {
        match sink.deliver(notification) {
            Err(NotifyError::RateLimited { retry_after }) if attempt < policy.max_retries => {
                let wait = policy.wait(attempt, retry_after);
                info!(
                    category = ?notification.category,
                    attempt = attempt + 1,
                    max = policy.max_retries,
                    "sink rate limited, retrying in {:?}",
                    wait
                );
                thread::sleep(wait);
                attempt += 1;
            }
            other => return other,
        }
    }
}

enum Mode {
    Inline(Arc<dyn NotificationSink>),
    Background(Sender<Notification>),
}

/// Fire-and-forget front of the notification sink.
///
/// `notify` never fails: encoding and delivery errors are logged and dropped.
pub struct Notifier {
    mode: Mode,
    policy: RetryPolicy,
}

impl Notifier {
    /// Delivers on the calling thread.
    pub fn inline(sink: Arc<dyn NotificationSink>, policy: RetryPolicy) -> Self {
        Self {
            mode: Mode::Inline(sink),
            policy,
        }
    }

    /// Delivers on a dedicated worker thread. The worker exits once every
    /// `Notifier` clone of the sender is dropped; join the handle to flush.
    pub fn background(sink: Arc<dyn NotificationSink>, policy: RetryPolicy) -> (Self, JoinHandle<()>) {
        let (tx, rx) = bounded::<Notification>(256);
        let handle = thread::spawn(move || {
            info!("Notification worker started");
            for notification in rx {
                if let Err(e) = deliver_with_retry(sink.as_ref(), &notification, &policy) {
                    error!(category = ?notification.category, "Notification dropped: {}", e);
                }
            }
            info!("Notification worker finished");
        });

        (
            Self {
                mode: Mode::Background(tx),
                policy,
            },
            handle,
        )
    }

    pub fn notify(&self, category: Category, title: impl Into<String>, payload: impl Serialize) {
        let payload = match serde_json::to_value(payload) {
            Ok(value) => value,
            Err(e) => {
                error!(?category, "Could not encode notification payload: {}", e);
                return;
            }
        };
        let notification = Notification {
            category,
            title: title.into(),
            payload,
            timestamp: Utc::now(),
        };

        match &self.mode {
            Mode::Inline(sink) => {
                if let Err(e) = deliver_with_retry(sink.as_ref(), &notification, &self.policy) {
                    error!(?category, "Notification dropped: {}", e);
                }
            }
            Mode::Background(tx) => {
                if tx.send(notification).is_err() {
                    warn!(?category, "Notification worker is gone, dropping notification");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::sink::RecordingSink;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Rate limits the first `limited` calls, then records.
    struct FlakySink {
        limited: u32,
        calls: AtomicU32,
        inner: RecordingSink,
    }

    impl NotificationSink for FlakySink {
        fn deliver(&self, notification: &Notification) -> Result<(), NotifyError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.limited {
                return Err(NotifyError::RateLimited {
                    retry_after: Some(Duration::from_millis(1)),
                });
            }
            self.inner.deliver(notification)
        }
    }

    struct BrokenSink;

    impl NotificationSink for BrokenSink {
        fn deliver(&self, _: &Notification) -> Result<(), NotifyError> {
            Err(NotifyError::Delivery("webhook returned 500".into()))
        }
    }

    fn quick_policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            max_wait: Duration::from_millis(5),
        }
    }

    #[test]
    fn test_rate_limit_is_retried() {
        let sink = Arc::new(FlakySink {
            limited: 2,
            calls: AtomicU32::new(0),
            inner: RecordingSink::new(),
        });
        let notifier = Notifier::inline(sink.clone(), quick_policy());

        notifier.notify(Category::Reports, "3 dislikes", json!({ "threshold": 3 }));

        assert_eq!(sink.calls.load(Ordering::SeqCst), 3);
        assert_eq!(sink.inner.notifications().len(), 1);
    }

    #[test]
    fn test_retries_are_bounded() {
        let sink = Arc::new(FlakySink {
            limited: u32::MAX,
            calls: AtomicU32::new(0),
            inner: RecordingSink::new(),
        });
        let notifier = Notifier::inline(sink.clone(), quick_policy());

        notifier.notify(Category::Admin, "purge", json!({}));

        assert_eq!(sink.calls.load(Ordering::SeqCst), 4);
        assert!(sink.inner.notifications().is_empty());
    }

    #[test]
    fn test_other_failures_are_not_retried() {
        let sink = BrokenSink;
        let n = Notification {
            category: Category::Admin,
            title: "t".into(),
            payload: json!(null),
            timestamp: Utc::now(),
        };
        let result = deliver_with_retry(&sink, &n, &quick_policy());
        assert!(matches!(result, Err(NotifyError::Delivery(_))));
    }

    #[test]
    fn test_background_worker_drains_before_exit() {
        let sink = Arc::new(RecordingSink::new());
        let (notifier, handle) = Notifier::background(sink.clone(), quick_policy());

        for i in 0..5 {
            notifier.notify(Category::Likes, format!("vote {i}"), json!({ "i": i }));
        }
        drop(notifier);
        handle.join().unwrap();

        assert_eq!(sink.notifications().len(), 5);
    }

    #[test]
    fn test_default_wait_grows_with_attempt() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.wait(0, None), Duration::from_secs(2));
        assert_eq!(policy.wait(1, None), Duration::from_secs(4));
        assert_eq!(policy.wait(0, Some(Duration::from_secs(90))), Duration::from_secs(30));
    }
}

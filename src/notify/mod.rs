pub mod dispatcher;
pub mod sink;
pub mod webhook;

pub use dispatcher::{deliver_with_retry, Notifier, RetryPolicy};
pub use sink::{Category, JsonLinesSink, LogSink, Notification, NotificationSink, NotifyError, RecordingSink};
pub use webhook::{WebhookSink, WebhookUrls};

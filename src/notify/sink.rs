use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::info;

/// Moderator channel a notification is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Submissions,
    Comments,
    Likes,
    Reports,
    Moderation,
    Admin,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub category: Category,
    pub title: String,
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("rate limited by sink")]
    RateLimited { retry_after: Option<Duration> },

    #[error("delivery failed: {0}")]
    Delivery(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("could not encode notification: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Where notifications end up. Implementations must not panic on failure.
pub trait NotificationSink: Send + Sync {
    fn deliver(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Writes every notification to the tracing log.
pub struct LogSink;

impl NotificationSink for LogSink {
    fn deliver(&self, notification: &Notification) -> Result<(), NotifyError> {
        let payload = serde_json::to_string(&notification.payload)?;
        info!(
            category = ?notification.category,
            title = %notification.title,
            %payload,
            "notification"
        );
        Ok(())
    }
}

/// Appends one JSON document per line.
pub struct JsonLinesSink {
    file: Mutex<File>,
}

impl JsonLinesSink {
    pub fn open(path: &Path) -> Result<Self, NotifyError> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

impl NotificationSink for JsonLinesSink {
    fn deliver(&self, notification: &Notification) -> Result<(), NotifyError> {
        let line = serde_json::to_string(notification)?;
        let mut file = self
            .file
            .lock()
            .map_err(|_| NotifyError::Delivery("notification file lock poisoned".into()))?;
        writeln!(file, "{line}")?;
        Ok(())
    }
}

/// Keeps everything it receives. Handy for assertions and dry runs.
#[derive(Default)]
pub struct RecordingSink {
    seen: Mutex<Vec<Notification>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.seen.lock().map(|seen| seen.clone()).unwrap_or_default()
    }

    pub fn in_category(&self, category: Category) -> Vec<Notification> {
        self.notifications()
            .into_iter()
            .filter(|n| n.category == category)
            .collect()
    }
}

impl NotificationSink for RecordingSink {
    fn deliver(&self, notification: &Notification) -> Result<(), NotifyError> {
        self.seen
            .lock()
            .map_err(|_| NotifyError::Delivery("recording sink lock poisoned".into()))?
            .push(notification.clone());
        Ok(())
    }
}

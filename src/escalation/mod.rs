pub mod watcher;

pub use watcher::{Dedupe, EscalationWatcher, DEFAULT_THRESHOLDS};

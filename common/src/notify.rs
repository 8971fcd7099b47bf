// common/src/notify.rs
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;

const LOG_CATEGORY: &str = "Notifications";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    Success,
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationOptions {
    /// Notifications sharing a toast id replace each other
    pub toast_id: Option<String>,
}

impl NotificationOptions {
    pub fn toast(id: impl Into<String>) -> Self {
        Self {
            toast_id: Some(id.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub level: NotificationLevel,
    pub message: String,
    pub toast_id: Option<String>,
}

/// User-facing notification sink consumed by the application shell.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, level: NotificationLevel, message: &str, options: NotificationOptions);

    fn success(&self, message: &str, options: NotificationOptions) {
        self.notify(NotificationLevel::Success, message, options);
    }

    fn info(&self, message: &str, options: NotificationOptions) {
        self.notify(NotificationLevel::Info, message, options);
    }

    fn warning(&self, message: &str, options: NotificationOptions) {
        self.notify(NotificationLevel::Warning, message, options);
    }

    fn error(&self, message: &str, options: NotificationOptions) {
        self.notify(NotificationLevel::Error, message, options);
    }
}

/// Sink that only writes notifications to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl NotificationSink for LogNotifier {
    fn notify(&self, level: NotificationLevel, message: &str, options: NotificationOptions) {
        let toast_id = options.toast_id.as_deref().unwrap_or("-");
        match level {
            NotificationLevel::Error => {
                tracing::error!(category = LOG_CATEGORY, toast_id, "{}", message)
            }
            NotificationLevel::Warning => {
                tracing::warn!(category = LOG_CATEGORY, toast_id, "{}", message)
            }
            _ => tracing::info!(category = LOG_CATEGORY, toast_id, ?level, "{}", message),
        }
    }
}

/// Bounded in-memory list of notifications the UI drains.
#[derive(Debug)]
pub struct NotificationCenter {
    capacity: usize,
    entries: Mutex<VecDeque<Notification>>,
}

impl Default for NotificationCenter {
    fn default() -> Self {
        Self::new(50)
    }
}

impl NotificationCenter {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Mutex::new(VecDeque::new()),
        }
    }

    pub fn snapshot(&self) -> Vec<Notification> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.iter().cloned().collect()
    }

    pub fn drain(&self) -> Vec<Notification> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.drain(..).collect()
    }

    pub fn count(&self, level: NotificationLevel) -> usize {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.iter().filter(|n| n.level == level).count()
    }
}

impl NotificationSink for NotificationCenter {
    fn notify(&self, level: NotificationLevel, message: &str, options: NotificationOptions) {
        LogNotifier.notify(level, message, options.clone());

        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(id) = options.toast_id.as_deref() {
            entries.retain(|n| n.toast_id.as_deref() != Some(id));
        }
        if entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(Notification {
            level,
            message: message.to_string(),
            toast_id: options.toast_id,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toast_id_replaces_previous_entry() {
        let center = NotificationCenter::new(10);
        center.info("Reconnecting...", NotificationOptions::toast("wallet"));
        center.success("Reconnected", NotificationOptions::toast("wallet"));
        center.error("Unrelated", NotificationOptions::default());

        let all = center.snapshot();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].message, "Reconnected");
        assert_eq!(center.count(NotificationLevel::Error), 1);
    }

    #[test]
    fn capacity_drops_oldest() {
        let center = NotificationCenter::new(2);
        center.info("one", NotificationOptions::default());
        center.info("two", NotificationOptions::default());
        center.info("three", NotificationOptions::default());

        let messages: Vec<_> = center.drain().into_iter().map(|n| n.message).collect();
        assert_eq!(messages, vec!["two", "three"]);
        assert!(center.snapshot().is_empty());
    }
}

//! User-facing notices raised by session operations.
//!
//! The bridge reports outcomes (signed in, check your inbox, bad password)
//! through the [`Notifier`] port; the front end decides how to show them.

use chrono::{DateTime, Utc};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Success,
    Error,
    Info,
}

impl fmt::Display for NoticeLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NoticeLevel::Success => write!(f, "success"),
            NoticeLevel::Error => write!(f, "error"),
            NoticeLevel::Info => write!(f, "info"),
        }
    }
}

/// A single toast-style message
#[derive(Debug, Clone)]
pub struct Notice {
    pub level: NoticeLevel,
    pub title: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl Notice {
    fn new(level: NoticeLevel, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level,
            title: title.into(),
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn success(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Success, title, message)
    }

    pub fn error(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Error, title, message)
    }

    pub fn info(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Info, title, message)
    }

    /// Marker shown before the title on text surfaces
    pub fn symbol(&self) -> &'static str {
        match self.level {
            NoticeLevel::Success => "✔",
            NoticeLevel::Error => "✖",
            NoticeLevel::Info => "ℹ",
        }
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}: {}", self.symbol(), self.title, self.message)
    }
}

pub trait Notifier: Send + Sync {
    fn notify(&self, notice: &Notice);
}

/// Emits notices as structured log events
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, notice: &Notice) {
        match notice.level {
            NoticeLevel::Error => tracing::warn!(
                level = %notice.level,
                title = %notice.title,
                "{}",
                notice.message
            ),
            _ => tracing::info!(
                level = %notice.level,
                title = %notice.title,
                "{}",
                notice.message
            ),
        }
    }
}

/// Prints notices for the command line; errors go to stderr
pub struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn notify(&self, notice: &Notice) {
        match notice.level {
            NoticeLevel::Error => eprintln!("{}", notice),
            _ => println!("{}", notice),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notice_display() {
        let notice = Notice::error("Sign in failed", "Invalid login credentials");
        assert_eq!(
            notice.to_string(),
            "✖ Sign in failed: Invalid login credentials"
        );
        assert_eq!(notice.level, NoticeLevel::Error);
    }

    #[test]
    fn test_level_display() {
        assert_eq!(NoticeLevel::Success.to_string(), "success");
        assert_eq!(Notice::info("a", "b").symbol(), "ℹ");
    }
}

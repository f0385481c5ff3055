use std::path::Path;
use std::time::Duration;

use log::{error, info, warn};

/// How long a capture confirmation stays on screen.
pub const CAPTURE_NOTICE_TTL: Duration = Duration::from_millis(1200);
/// How long every other transient notice stays on screen.
pub const DEFAULT_NOTICE_TTL: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Error,
    /// Stays up until the user acts (e.g. grants camera access).
    Blocking,
}

/// A short, auto-dismissing message for the operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
    /// `None` means the notice is not dismissed automatically.
    pub ttl: Option<Duration>,
}

impl Notice {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Info,
            message: message.into(),
            ttl: Some(DEFAULT_NOTICE_TTL),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            message: message.into(),
            ttl: Some(DEFAULT_NOTICE_TTL),
        }
    }

    pub fn blocking(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Blocking,
            message: message.into(),
            ttl: None,
        }
    }

    pub fn capture_saved(path: &Path) -> Self {
        Self {
            level: NoticeLevel::Info,
            message: format!("Image saved to {}", path.display()),
            ttl: Some(CAPTURE_NOTICE_TTL),
        }
    }
}

/// Anything that can put a [`Notice`] in front of the operator.
pub trait NoticeSink: Send + Sync {
    fn show(&self, notice: Notice);
}

/// Writes notices to the log; the CLI has no overlay to draw them on.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotices;

impl NoticeSink for LogNotices {
    fn show(&self, notice: Notice) {
        match notice.level {
            NoticeLevel::Info => info!("[notice] {}", notice.message),
            NoticeLevel::Error => warn!("[notice] {}", notice.message),
            NoticeLevel::Blocking => error!("[notice] {}", notice.message),
        }
    }
}

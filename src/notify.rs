// User-facing notifications
// The host shows these as toasts; the headless build only logs them.

use parking_lot::Mutex;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Success,
    Info,
    Warning,
    Error,
}

/// Toast-style notification sink injected into every component that talks to the user.
pub trait Notifier: Send + Sync {
    fn notify(&self, level: NoticeLevel, message: &str);

    fn success(&self, message: &str) {
        self.notify(NoticeLevel::Success, message);
    }

    fn info(&self, message: &str) {
        self.notify(NoticeLevel::Info, message);
    }

    fn warning(&self, message: &str) {
        self.notify(NoticeLevel::Warning, message);
    }

    fn error(&self, message: &str) {
        self.notify(NoticeLevel::Error, message);
    }
}

/// Notifier that routes every notice into the log.
#[derive(Debug, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, level: NoticeLevel, message: &str) {
        match level {
            NoticeLevel::Success | NoticeLevel::Info => info!(target: "mediadeck::notice", "{}", message),
            NoticeLevel::Warning => warn!(target: "mediadeck::notice", "{}", message),
            NoticeLevel::Error => error!(target: "mediadeck::notice", "{}", message),
        }
    }
}

/// Keeps every notice in memory. Handy for embedding hosts that drain notices
/// on their own schedule, and for tests.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    notices: Mutex<Vec<(NoticeLevel, String)>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notices(&self) -> Vec<(NoticeLevel, String)> {
        self.notices.lock().clone()
    }

    pub fn count(&self, level: NoticeLevel) -> usize {
        self.notices.lock().iter().filter(|(l, _)| *l == level).count()
    }

    pub fn drain(&self) -> Vec<(NoticeLevel, String)> {
        std::mem::take(&mut *self.notices.lock())
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, level: NoticeLevel, message: &str) {
        self.notices.lock().push((level, message.to_string()));
    }
}

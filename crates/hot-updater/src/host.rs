//! Interface to the embedding application: progress display, notices and
//! lifecycle hooks.

use async_trait::async_trait;

const KB: u64 = 1024;
const MB: u64 = 1024 * 1024;

/// Action offered next to the always-present exit button of a notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeAction {
    /// Restart the update sequence.
    Retry,
    /// Start downloading the planned files.
    Update,
    /// Send the user to the store to reinstall.
    OpenStore,
}

/// Blocking message shown to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    /// Message body.
    pub message: String,
    /// Label of the exit button.
    pub exit_label: String,
    /// Optional second button with its label.
    pub action: Option<(NoticeAction, String)>,
}

/// Button the user picked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeChoice {
    /// Exit the application.
    Exit,
    /// The offered action.
    Action,
}

/// Information published once the eligibility table has been resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    /// Client language from the update configuration.
    pub lang: Option<String>,
    /// Installed content version.
    pub version: String,
    /// Platform tag.
    pub platform: String,
    /// Installed build is a beta build.
    pub beta: bool,
    /// Installed build is under review.
    pub review: bool,
    /// Server list URL for this build.
    pub server_list_url: String,
    /// First auxiliary service URL.
    pub gift_url: String,
    /// Second auxiliary service URL.
    pub event_url: String,
}

/// Callbacks into the embedding application.
#[async_trait]
pub trait UpdateHost: Send + Sync {
    /// Update the progress display; `fraction` is within `0.0..=1.0`.
    fn progress(&self, fraction: f32, label: &str);

    /// Show a notice and wait for the user's choice.
    async fn notice(&self, notice: Notice) -> NoticeChoice;

    /// Whether the device is on a trusted local network.
    fn is_local_network(&self) -> bool {
        false
    }

    /// Called once the session parameters are known.
    fn on_session(&self, _session: &SessionInfo) {}

    /// Called when the update sequence reaches a settled state.
    fn on_update_end(&self) {}
}

/// Compact size used in confirmation messages.
pub fn format_size(size: u64) -> String {
    if size < KB {
        "1KB".to_string()
    } else if size < MB {
        format!("{}KB", size / KB)
    } else {
        format!("{:.1}MB", size as f64 / MB as f64)
    }
}

/// `done / total` pair used in progress labels, scaled by `total`.
pub fn format_progress(done: u64, total: u64) -> String {
    if total < KB {
        format!("{} / 1 KB", done / KB)
    } else if total < MB {
        format!("{} / {} KB", done / KB, total / KB)
    } else {
        format!(
            "{:.1} / {:.1} MB",
            done as f64 / MB as f64,
            total as f64 / MB as f64
        )
    }
}

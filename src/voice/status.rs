//! Avatar status and user-visible notices
//!
//! Both are last-write-wins signals backed by `tokio::sync::watch`; the UI
//! subscribes and renders whatever the latest value is.

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// What the assistant avatar should show
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AvatarStatus {
    #[default]
    Idle,
    Listening,
    Speaking,
    Thinking,
}

impl fmt::Display for AvatarStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Listening => write!(f, "listening"),
            Self::Speaking => write!(f, "speaking"),
            Self::Thinking => write!(f, "thinking"),
        }
    }
}

/// Error shown to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notice {
    /// Starting the voice session failed
    MicrophoneUnavailable,
    /// The live connection dropped mid-session
    ConnectionLost,
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MicrophoneUnavailable => {
                write!(f, "Could not access microphone or start AI session.")
            }
            Self::ConnectionLost => write!(f, "A real-time connection error occurred."),
        }
    }
}

/// Status and notice channels the session writes to
#[derive(Debug, Clone)]
pub struct Signals {
    status: watch::Sender<AvatarStatus>,
    notice: watch::Sender<Option<Notice>>,
}

impl Default for Signals {
    fn default() -> Self {
        Self::new()
    }
}

impl Signals {
    /// Create signals starting at idle with no notice
    #[must_use]
    pub fn new() -> Self {
        let (status, _) = watch::channel(AvatarStatus::Idle);
        let (notice, _) = watch::channel(None);
        Self { status, notice }
    }

    /// Replace the avatar status
    pub fn set_status(&self, status: AvatarStatus) {
        let previous = self.status.send_replace(status);
        if previous != status {
            tracing::debug!(%previous, %status, "avatar status changed");
        }
    }

    /// Current avatar status
    #[must_use]
    pub fn status(&self) -> AvatarStatus {
        *self.status.borrow()
    }

    /// Surface an error to the user
    pub fn set_notice(&self, notice: Notice) {
        self.notice.send_replace(Some(notice));
    }

    /// Clear any visible error
    pub fn clear_notice(&self) {
        self.notice.send_replace(None);
    }

    /// Current notice, if any
    #[must_use]
    pub fn notice(&self) -> Option<Notice> {
        *self.notice.borrow()
    }

    /// Subscribe to status changes
    #[must_use]
    pub fn subscribe_status(&self) -> watch::Receiver<AvatarStatus> {
        self.status.subscribe()
    }

    /// Subscribe to notices
    #[must_use]
    pub fn subscribe_notice(&self) -> watch::Receiver<Option<Notice>> {
        self.notice.subscribe()
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Counters describing one sync pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Issues taken from the primary listing and fully processed.
    pub issues_seen: u32,
    pub issues_created: u32,
    pub states_updated: u32,
    pub comments_mirrored: u32,
    pub attachments_mirrored: u32,
    /// Best-effort calls the tracker answered with "not implemented".
    pub unsupported_skipped: u32,
}

impl SyncReport {
    pub fn start() -> Self {
        Self {
            started_at: Utc::now(),
            finished_at: None,
            issues_seen: 0,
            issues_created: 0,
            states_updated: 0,
            comments_mirrored: 0,
            attachments_mirrored: 0,
            unsupported_skipped: 0,
        }
    }

    pub fn finish(mut self) -> Self {
        self.finished_at = Some(Utc::now());
        self
    }

    /// Total number of entities created on either tracker.
    pub fn created(&self) -> u32 {
        self.issues_created + self.comments_mirrored + self.attachments_mirrored
    }
}

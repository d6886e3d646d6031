use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::types::{
    Attachment, AttachmentBody, AttachmentId, Comment, CommentId, Issue, IssueId, State,
    TrackerId,
};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors returned by tracker adapters.
#[derive(Debug, Error)]
pub enum TrackerError {
    /// The adapter does not support this capability.
    ///
    /// The sync engine treats this as a no-op for every capability except
    /// listing issues on the primary and creating issues on the secondary.
    #[error("{0}: not implemented")]
    NotImplemented(&'static str),

    #[error("not found: {0}")]
    NotFound(String),

    /// The remote API answered with an error status.
    #[error("tracker API error: {status} {message}")]
    Api { status: u16, message: String },

    /// Network-level failure talking to the tracker.
    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid ID {0:?}")]
    InvalidId(String),

    #[error("tracker configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TrackerError {
    pub fn is_not_implemented(&self) -> bool {
        matches!(self, TrackerError::NotImplemented(_))
    }
}

pub type Result<T> = std::result::Result<T, TrackerError>;

// ---------------------------------------------------------------------------
// Tracker
// ---------------------------------------------------------------------------

/// The minimal issue tracker interface consumed by the sync engine.
///
/// Mutating capabilities default to [`TrackerError::NotImplemented`], so a
/// read-only adapter only has to provide the listings.
#[async_trait]
pub trait Tracker: Send + Sync {
    /// Stable identity of this tracker instance.
    fn id(&self) -> &TrackerId;

    /// Full data for one issue.
    async fn get_issue(&self, _id: &IssueId) -> Result<Issue> {
        Err(TrackerError::NotImplemented("get_issue"))
    }

    /// Issues created or changed at or after `since` (`None`: no lower bound).
    ///
    /// Only `id`, and `secondary_id` where the tracker stores it, have to be
    /// filled. Implementations may cap the number of results.
    async fn list_issues(&self, since: Option<DateTime<Utc>>) -> Result<Vec<Issue>>;

    /// Create the issue, returning its new ID.
    async fn create_issue(&self, _issue: &Issue) -> Result<IssueId> {
        Err(TrackerError::NotImplemented("create_issue"))
    }

    async fn update_issue_state(&self, _id: &IssueId, _state: &State) -> Result<()> {
        Err(TrackerError::NotImplemented("update_issue_state"))
    }

    /// Record the counterpart ID natively, so later listings carry it.
    async fn set_secondary_id(&self, _primary: &IssueId, _secondary: &IssueId) -> Result<()> {
        Err(TrackerError::NotImplemented("set_secondary_id"))
    }

    async fn add_comment(&self, _issue: &IssueId, _comment: &Comment) -> Result<CommentId> {
        Err(TrackerError::NotImplemented("add_comment"))
    }

    async fn list_comments(&self, issue: &IssueId) -> Result<Vec<Comment>>;

    /// Upload `body` as a new attachment described by `attachment`.
    ///
    /// The body is consumed; it is dropped (and its handle released) when
    /// the call returns, whether it succeeded or not.
    async fn add_attachment(
        &self,
        _issue: &IssueId,
        _attachment: &Attachment,
        _body: AttachmentBody,
    ) -> Result<AttachmentId> {
        Err(TrackerError::NotImplemented("add_attachment"))
    }

    async fn list_attachments(&self, issue: &IssueId) -> Result<Vec<Attachment>>;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

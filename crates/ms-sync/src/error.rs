use ms_core::bucket::EntityKind;
use ms_core::store::StoreError;
use ms_core::tracker::TrackerError;
use ms_core::types::{IssueId, TrackerId};
use thiserror::Error;

/// A failure that aborts the current sync pass.
///
/// Each variant names the phase and the entity being processed, so the
/// failing step can be located without re-running.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("list issues on {tracker}: {source}")]
    ListIssues {
        tracker: TrackerId,
        source: TrackerError,
    },

    #[error("get issue {issue} on {tracker}: {source}")]
    GetIssue {
        tracker: TrackerId,
        issue: IssueId,
        source: TrackerError,
    },

    #[error("create counterpart of issue {issue} on {tracker}: {source}")]
    CreateIssue {
        tracker: TrackerId,
        issue: IssueId,
        source: TrackerError,
    },

    #[error("update state of {issue} on {tracker}: {source}")]
    UpdateState {
        tracker: TrackerId,
        issue: IssueId,
        source: TrackerError,
    },

    #[error("set secondary ID of {issue} on {tracker}: {source}")]
    SetSecondaryId {
        tracker: TrackerId,
        issue: IssueId,
        source: TrackerError,
    },

    #[error("list {kind}s of issue {issue} on {tracker}: {source}")]
    ListChildren {
        kind: EntityKind,
        tracker: TrackerId,
        issue: IssueId,
        source: TrackerError,
    },

    #[error("open content of attachment {id} on {tracker}: {source}")]
    OpenAttachment {
        tracker: TrackerId,
        id: String,
        source: TrackerError,
    },

    #[error("copy {kind} {id} to issue {issue} on {tracker}: {source}")]
    CopyChild {
        kind: EntityKind,
        id: String,
        tracker: TrackerId,
        issue: IssueId,
        source: TrackerError,
    },

    #[error("correspondence store: {0}")]
    Store(#[from] StoreError),

    #[error("invalid stored watermark {0:?}")]
    Watermark(String),
}

impl SyncError {
    /// Whether the underlying tracker call was NotImplemented.
    pub fn is_not_implemented(&self) -> bool {
        match self {
            SyncError::ListIssues { source, .. }
            | SyncError::GetIssue { source, .. }
            | SyncError::CreateIssue { source, .. }
            | SyncError::UpdateState { source, .. }
            | SyncError::SetSecondaryId { source, .. }
            | SyncError::ListChildren { source, .. }
            | SyncError::OpenAttachment { source, .. }
            | SyncError::CopyChild { source, .. } => source.is_not_implemented(),
            SyncError::Store(_) | SyncError::Watermark(_) => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;

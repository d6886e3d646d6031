use std::fmt;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncRead;

use crate::tracker::Result;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

string_id!(
    /// Identifies a tracker instance, usually its credential-free base URL.
    TrackerId
);
string_id!(IssueId);
string_id!(CommentId);
string_id!(AttachmentId);
string_id!(UserId);
string_id!(
    /// Tracker-native workflow state name ("open", "resolved", ...).
    State
);

// ---------------------------------------------------------------------------
// Entities
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub real_name: String,
    pub email: String,
}

/// An issue as seen by one tracker.
///
/// Listings only guarantee `id` (and `secondary_id` when the tracker stores
/// the foreign ID natively); everything else is filled by `get_issue`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub id: IssueId,
    /// Counterpart ID on the other tracker, when this tracker already knows it.
    pub secondary_id: Option<IssueId>,
    pub summary: String,
    pub description: String,
    pub author: User,
    pub created_at: Option<DateTime<Utc>>,
    pub state: State,
}

impl Issue {
    /// A sparse issue carrying only its ID, as returned by listings.
    pub fn with_id(id: impl Into<IssueId>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    /// True when only the identity fields are populated.
    pub fn is_sparse(&self) -> bool {
        self.summary.is_empty() && self.description.is_empty() && self.state.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub id: CommentId,
    pub author: User,
    pub created_at: Option<DateTime<Utc>>,
    pub body: String,
}

// ---------------------------------------------------------------------------
// Attachments
// ---------------------------------------------------------------------------

/// Readable attachment content. Dropping it releases the underlying
/// connection or file handle.
pub type AttachmentBody = Pin<Box<dyn AsyncRead + Send>>;

/// Deferred access to an attachment's bytes.
///
/// `open` may be called more than once; every call yields a fresh stream.
#[async_trait]
pub trait ContentSource: Send + Sync {
    async fn open(&self) -> Result<AttachmentBody>;
}

/// Content that is already in memory.
#[derive(Debug, Clone, Default)]
pub struct InlineContent(Arc<[u8]>);

impl InlineContent {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(Arc::from(bytes.into()))
    }
}

#[async_trait]
impl ContentSource for InlineContent {
    async fn open(&self) -> Result<AttachmentBody> {
        Ok(Box::pin(std::io::Cursor::new(self.0.to_vec())))
    }
}

#[derive(Clone)]
pub struct Attachment {
    pub id: AttachmentId,
    pub name: String,
    pub mime_type: String,
    pub author: User,
    pub created_at: Option<DateTime<Utc>>,
    pub content: Arc<dyn ContentSource>,
}

impl Attachment {
    pub fn new(
        id: impl Into<AttachmentId>,
        name: impl Into<String>,
        content: Arc<dyn ContentSource>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            mime_type: "application/octet-stream".to_string(),
            author: User::default(),
            created_at: None,
            content,
        }
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = mime_type.into();
        self
    }
}

impl fmt::Debug for Attachment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Attachment")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("mime_type", &self.mime_type)
            .field("author", &self.author)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! Correspondence store namespaces.
//!
//! A bucket name joins two tracker IDs and a one-letter kind label with tabs:
//! `"{first}\t{second}\t{K}"`. Each mirrored creation writes a forward record
//! into one bucket and the reverse record into the bucket with the tracker IDs
//! swapped.
//!
//! Which tracker comes first depends on the entity kind:
//!
//! - issues: `(source, target)` maps source IDs to target IDs
//! - comments and attachments: `(target, source)` maps source IDs to target IDs
//!
//! Both orderings are what existing store files contain, so they are kept.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::TrackerId;

/// The kind of entity a correspondence record links.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Issue,
    Comment,
    Attachment,
}

impl EntityKind {
    pub const ALL: [EntityKind; 3] = [EntityKind::Issue, EntityKind::Comment, EntityKind::Attachment];

    /// Label used in stored bucket names.
    pub fn label(self) -> char {
        match self {
            EntityKind::Issue => 'I',
            EntityKind::Comment => 'C',
            EntityKind::Attachment => 'A',
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EntityKind::Issue => "issue",
            EntityKind::Comment => "comment",
            EntityKind::Attachment => "attachment",
        };
        f.write_str(s)
    }
}

/// A named namespace inside the correspondence store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Bucket(String);

impl Bucket {
    pub fn new(first: &TrackerId, second: &TrackerId, kind: EntityKind) -> Self {
        Self::labelled(first, second, kind.label())
    }

    /// Bucket holding the last-sync watermark of a primary/secondary pair.
    pub fn watermark(primary: &TrackerId, secondary: &TrackerId) -> Self {
        Self::labelled(primary, secondary, 'W')
    }

    /// Bucket consulted for an issue of `source` mirrored onto `target`.
    pub fn issue_lookup(source: &TrackerId, target: &TrackerId) -> Self {
        Self::new(source, target, EntityKind::Issue)
    }

    /// Bucket consulted for a comment or attachment of `source` mirrored
    /// onto `target`.
    pub fn child_lookup(source: &TrackerId, target: &TrackerId, kind: EntityKind) -> Self {
        Self::new(target, source, kind)
    }

    fn labelled(first: &TrackerId, second: &TrackerId, label: char) -> Self {
        Self(format!("{first}\t{second}\t{label}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Bucket {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

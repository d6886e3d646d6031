//! Comment and attachment reconciliation for one mirrored issue pair.
//!
//! Both kinds follow the same steps: list each side, then for every item
//! whose ID is missing on the other side and that has no stored counterpart,
//! copy it over and record the forward and reverse IDs. The A→B direction
//! finishes before B→A starts.
//!
//! A side that cannot list a kind is treated as having none. A target that
//! cannot accept a kind ends that direction without recording anything.

use std::collections::HashSet;

use async_trait::async_trait;
use ms_core::bucket::{Bucket, EntityKind};
use ms_core::store::{CorrespondenceStore, Record};
use ms_core::tracker::{Tracker, TrackerError};
use ms_core::types::{Attachment, Comment, IssueId};
use tracing::{debug, info, warn};

use crate::error::{Result, SyncError};

/// One side of a reconciliation: a tracker and its copy of the issue.
#[derive(Clone, Copy)]
pub(crate) struct Side<'a> {
    pub tracker: &'a dyn Tracker,
    pub issue: &'a IssueId,
}

/// A kind of issue child that can be listed and copied between trackers.
#[async_trait]
pub(crate) trait ChildKind: Sync {
    type Item: Send + Sync;

    const KIND: EntityKind;

    fn id(item: &Self::Item) -> &str;

    async fn list(&self, side: Side<'_>) -> std::result::Result<Vec<Self::Item>, TrackerError>;

    /// Create a copy of `item` on `to`, returning the new ID.
    async fn copy(&self, from: Side<'_>, to: Side<'_>, item: &Self::Item) -> Result<String>;
}

pub(crate) struct Comments;

#[async_trait]
impl ChildKind for Comments {
    type Item = Comment;

    const KIND: EntityKind = EntityKind::Comment;

    fn id(item: &Comment) -> &str {
        item.id.as_str()
    }

    async fn list(&self, side: Side<'_>) -> std::result::Result<Vec<Comment>, TrackerError> {
        side.tracker.list_comments(side.issue).await
    }

    async fn copy(&self, _from: Side<'_>, to: Side<'_>, item: &Comment) -> Result<String> {
        let id = to
            .tracker
            .add_comment(to.issue, item)
            .await
            .map_err(|source| copy_error::<Self>(to, Self::id(item), source))?;
        Ok(id.to_string())
    }
}

pub(crate) struct Attachments;

#[async_trait]
impl ChildKind for Attachments {
    type Item = Attachment;

    const KIND: EntityKind = EntityKind::Attachment;

    fn id(item: &Attachment) -> &str {
        item.id.as_str()
    }

    async fn list(&self, side: Side<'_>) -> std::result::Result<Vec<Attachment>, TrackerError> {
        side.tracker.list_attachments(side.issue).await
    }

    async fn copy(&self, from: Side<'_>, to: Side<'_>, item: &Attachment) -> Result<String> {
        let body = item
            .content
            .open()
            .await
            .map_err(|source| SyncError::OpenAttachment {
                tracker: from.tracker.id().clone(),
                id: item.id.to_string(),
                source,
            })?;
        // `body` moves into the call and is dropped when it returns.
        let id = to
            .tracker
            .add_attachment(to.issue, item, body)
            .await
            .map_err(|source| copy_error::<Self>(to, Self::id(item), source))?;
        Ok(id.to_string())
    }
}

fn copy_error<K: ChildKind>(to: Side<'_>, id: &str, source: TrackerError) -> SyncError {
    SyncError::CopyChild {
        kind: K::KIND,
        id: id.to_string(),
        tracker: to.tracker.id().clone(),
        issue: to.issue.clone(),
        source,
    }
}

/// What one reconciliation did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Tally {
    pub created: u32,
    /// NotImplemented capabilities that were skipped.
    pub unsupported: u32,
}

/// Reconcile children of kind `K` between `a` and `b`.
pub(crate) async fn reconcile<K: ChildKind>(
    kind: &K,
    store: &dyn CorrespondenceStore,
    a: Side<'_>,
    b: Side<'_>,
) -> Result<Tally> {
    let mut tally = Tally::default();
    let a_items = list(kind, a, &mut tally).await?;
    let b_items = list(kind, b, &mut tally).await?;

    let a_ids: HashSet<&str> = a_items.iter().map(K::id).collect();
    let b_ids: HashSet<&str> = b_items.iter().map(K::id).collect();

    copy_missing(kind, store, a, &a_items, b, &b_ids, &mut tally).await?;
    copy_missing(kind, store, b, &b_items, a, &a_ids, &mut tally).await?;
    Ok(tally)
}

async fn list<K: ChildKind>(
    kind: &K,
    side: Side<'_>,
    tally: &mut Tally,
) -> Result<Vec<K::Item>> {
    match kind.list(side).await {
        Ok(items) => Ok(items),
        Err(e) if e.is_not_implemented() => {
            warn!(
                kind = %K::KIND,
                tracker = %side.tracker.id(),
                error = %e,
                "cannot list, treating as empty"
            );
            tally.unsupported += 1;
            Ok(Vec::new())
        }
        Err(source) => Err(SyncError::ListChildren {
            kind: K::KIND,
            tracker: side.tracker.id().clone(),
            issue: side.issue.clone(),
            source,
        }),
    }
}

async fn copy_missing<K: ChildKind>(
    kind: &K,
    store: &dyn CorrespondenceStore,
    from: Side<'_>,
    items: &[K::Item],
    to: Side<'_>,
    present: &HashSet<&str>,
    tally: &mut Tally,
) -> Result<()> {
    let forward = Bucket::child_lookup(from.tracker.id(), to.tracker.id(), K::KIND);
    let reverse = Bucket::child_lookup(to.tracker.id(), from.tracker.id(), K::KIND);

    for item in items {
        let id = K::id(item);
        if present.contains(id) {
            continue;
        }
        if let Some(existing) = store.get(forward.as_str(), id)? {
            debug!(kind = %K::KIND, id, counterpart = %existing, "already mirrored");
            continue;
        }
        let new_id = match kind.copy(from, to, item).await {
            Ok(new_id) => new_id,
            // The target lacks the capability; later items would fail the same way.
            Err(e @ SyncError::CopyChild { .. }) if e.is_not_implemented() => {
                warn!(error = %e, "target cannot accept copies, skipping direction");
                tally.unsupported += 1;
                return Ok(());
            }
            Err(e) if e.is_not_implemented() => {
                warn!(error = %e, "skipping item");
                tally.unsupported += 1;
                continue;
            }
            Err(e) => return Err(e),
        };
        store.put_many(&[
            Record::new(&forward, id, new_id.as_str()),
            Record::new(&reverse, new_id.as_str(), id),
        ])?;
        info!(
            kind = %K::KIND,
            id,
            counterpart = %new_id,
            target = %to.tracker.id(),
            issue = %to.issue,
            "mirrored"
        );
        tally.created += 1;
    }
    Ok(())
}

use std::sync::Arc;

use chrono::{DateTime, Utc};
use ms_core::bucket::Bucket;
use ms_core::config::WatermarkPolicy;
use ms_core::store::{CorrespondenceStore, Record};
use ms_core::tracker::{self, Tracker, TrackerError};
use ms_core::types::{Issue, IssueId};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::children::{self, Attachments, Comments, Side};
use crate::error::{Result, SyncError};
use crate::report::SyncReport;

const WATERMARK_KEY: &str = "since";

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// How a pass ended, when it did not fail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "report", rename_all = "snake_case")]
pub enum SyncOutcome {
    Completed(SyncReport),
    /// The cancellation token fired; issues processed before it keep their
    /// records.
    Cancelled(SyncReport),
}

impl SyncOutcome {
    pub fn report(&self) -> &SyncReport {
        match self {
            SyncOutcome::Completed(r) | SyncOutcome::Cancelled(r) => r,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, SyncOutcome::Cancelled(_))
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Mirrors a primary tracker onto a secondary one.
pub struct SyncEngine {
    store: Arc<dyn CorrespondenceStore>,
    primary: Arc<dyn Tracker>,
    secondary: Arc<dyn Tracker>,
    watermark: WatermarkPolicy,
}

impl SyncEngine {
    pub fn new(
        store: Arc<dyn CorrespondenceStore>,
        primary: Arc<dyn Tracker>,
        secondary: Arc<dyn Tracker>,
    ) -> Self {
        Self {
            store,
            primary,
            secondary,
            watermark: WatermarkPolicy::default(),
        }
    }

    pub fn with_watermark(mut self, policy: WatermarkPolicy) -> Self {
        self.watermark = policy;
        self
    }

    /// Run one pass.
    ///
    /// Issues are processed one at a time in listing order. `cancel` is
    /// checked before each issue; an issue that has started is finished
    /// before the pass stops. Any error other than a tolerated "not
    /// implemented" aborts the pass, leaving committed records in place.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<SyncOutcome> {
        let mut report = SyncReport::start();
        let primary_id = self.primary.id().clone();
        info!(primary = %primary_id, secondary = %self.secondary.id(), "sync pass starting");

        if cancel.is_cancelled() {
            return Ok(SyncOutcome::Cancelled(report.finish()));
        }

        let since = self.load_watermark()?;
        let listed = tokio::select! {
            _ = cancel.cancelled() => return Ok(SyncOutcome::Cancelled(report.finish())),
            listed = self.primary.list_issues(since) => listed,
        };
        let issues = listed.map_err(|source| SyncError::ListIssues {
            tracker: primary_id.clone(),
            source,
        })?;
        debug!(count = issues.len(), since = ?since, "listed primary issues");

        for issue in issues {
            if cancel.is_cancelled() {
                info!(issues_seen = report.issues_seen, "sync pass cancelled");
                return Ok(SyncOutcome::Cancelled(report.finish()));
            }
            self.sync_issue(issue, &mut report).await?;
        }

        self.store_watermark(report.started_at)?;
        let report = report.finish();
        info!(
            issues_seen = report.issues_seen,
            issues_created = report.issues_created,
            states_updated = report.states_updated,
            comments = report.comments_mirrored,
            attachments = report.attachments_mirrored,
            "sync pass complete"
        );
        Ok(SyncOutcome::Completed(report))
    }

    async fn sync_issue(&self, mut issue: Issue, report: &mut SyncReport) -> Result<()> {
        let issue_bucket = Bucket::issue_lookup(self.primary.id(), self.secondary.id());

        let native = issue.secondary_id.take().filter(|id| !id.is_empty());
        let known_natively = native.is_some();
        let known = match native {
            Some(id) => Some(id),
            None => self
                .store
                .get(issue_bucket.as_str(), issue.id.as_str())?
                .map(IssueId::from),
        };

        let secondary_id = match known {
            Some(secondary_id) => {
                self.propagate_state(&mut issue, &secondary_id, report).await?;
                secondary_id
            }
            None => self.create_counterpart(&mut issue, &issue_bucket, report).await?,
        };

        if !known_natively {
            let result = self
                .primary
                .set_secondary_id(&issue.id, &secondary_id)
                .await;
            let stored = tolerate(result, report).map_err(|source| SyncError::SetSecondaryId {
                tracker: self.primary.id().clone(),
                issue: issue.id.clone(),
                source,
            })?;
            if stored.is_none() {
                debug!(issue = %issue.id, "primary cannot store secondary IDs");
            }
        }

        let a = Side {
            tracker: self.primary.as_ref(),
            issue: &issue.id,
        };
        let b = Side {
            tracker: self.secondary.as_ref(),
            issue: &secondary_id,
        };
        let comments = children::reconcile(&Comments, self.store.as_ref(), a, b).await?;
        report.comments_mirrored += comments.created;
        report.unsupported_skipped += comments.unsupported;
        let attachments = children::reconcile(&Attachments, self.store.as_ref(), a, b).await?;
        report.attachments_mirrored += attachments.created;
        report.unsupported_skipped += attachments.unsupported;

        report.issues_seen += 1;
        Ok(())
    }

    async fn propagate_state(
        &self,
        issue: &mut Issue,
        secondary_id: &IssueId,
        report: &mut SyncReport,
    ) -> Result<()> {
        if issue.state.is_empty() {
            self.hydrate(issue, report).await?;
        }
        if issue.state.is_empty() {
            debug!(issue = %issue.id, "no state to propagate");
            return Ok(());
        }
        let result = self
            .secondary
            .update_issue_state(secondary_id, &issue.state)
            .await;
        let updated = tolerate(result, report).map_err(|source| SyncError::UpdateState {
            tracker: self.secondary.id().clone(),
            issue: secondary_id.clone(),
            source,
        })?;
        if updated.is_some() {
            report.states_updated += 1;
        }
        Ok(())
    }

    async fn create_counterpart(
        &self,
        issue: &mut Issue,
        issue_bucket: &Bucket,
        report: &mut SyncReport,
    ) -> Result<IssueId> {
        if issue.is_sparse() {
            self.hydrate(issue, report).await?;
        }
        let secondary_id = self
            .secondary
            .create_issue(issue)
            .await
            .map_err(|source| SyncError::CreateIssue {
                tracker: self.secondary.id().clone(),
                issue: issue.id.clone(),
                source,
            })?;

        let reverse = Bucket::issue_lookup(self.secondary.id(), self.primary.id());
        self.store.put_many(&[
            Record::new(issue_bucket, issue.id.as_str(), secondary_id.as_str()),
            Record::new(&reverse, secondary_id.as_str(), issue.id.as_str()),
        ])?;
        report.issues_created += 1;
        info!(issue = %issue.id, counterpart = %secondary_id, "created secondary issue");
        Ok(secondary_id)
    }

    /// Replace a sparsely listed issue by its full data, when the primary
    /// can provide it.
    async fn hydrate(&self, issue: &mut Issue, report: &mut SyncReport) -> Result<()> {
        let result = self.primary.get_issue(&issue.id).await;
        let full = tolerate(result, report).map_err(|source| SyncError::GetIssue {
            tracker: self.primary.id().clone(),
            issue: issue.id.clone(),
            source,
        })?;
        if let Some(mut full) = full {
            full.id = issue.id.clone();
            full.secondary_id = None;
            *issue = full;
        }
        Ok(())
    }

    fn load_watermark(&self) -> Result<Option<DateTime<Utc>>> {
        if self.watermark != WatermarkPolicy::Persisted {
            return Ok(None);
        }
        let bucket = Bucket::watermark(self.primary.id(), self.secondary.id());
        match self.store.get(bucket.as_str(), WATERMARK_KEY)? {
            None => Ok(None),
            Some(raw) => DateTime::parse_from_rfc3339(&raw)
                .map(|t| Some(t.with_timezone(&Utc)))
                .map_err(|_| SyncError::Watermark(raw)),
        }
    }

    fn store_watermark(&self, started_at: DateTime<Utc>) -> Result<()> {
        if self.watermark != WatermarkPolicy::Persisted {
            return Ok(());
        }
        let bucket = Bucket::watermark(self.primary.id(), self.secondary.id());
        self.store
            .put(bucket.as_str(), WATERMARK_KEY, &started_at.to_rfc3339())?;
        Ok(())
    }
}

/// Map "not implemented" to `Ok(None)`, counting it in the report.
fn tolerate<T>(
    result: tracker::Result<T>,
    report: &mut SyncReport,
) -> std::result::Result<Option<T>, TrackerError> {
    match result {
        Ok(v) => Ok(Some(v)),
        Err(e) if e.is_not_implemented() => {
            warn!(error = %e, "skipping unsupported capability");
            report.unsupported_skipped += 1;
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

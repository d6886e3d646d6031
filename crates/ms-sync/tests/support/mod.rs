//! In-memory trackers and stores for driving the engine in tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ms_core::store::{Buckets, CorrespondenceStore, MemoryStore, Record, Result as StoreResult};
use ms_core::tracker::{Result, Tracker, TrackerError};
use ms_core::types::{
    Attachment, AttachmentBody, AttachmentId, Comment, CommentId, ContentSource, Issue, IssueId,
    State, TrackerId,
};
use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf};
use tokio_util::sync::CancellationToken;

// ---------------------------------------------------------------------------
// Calls
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    ListIssues(Option<DateTime<Utc>>),
    GetIssue(String),
    CreateIssue { source: String, summary: String },
    UpdateState { issue: String, state: String },
    SetSecondaryId { primary: String, secondary: String },
    ListComments(String),
    AddComment { issue: String, body: String },
    ListAttachments(String),
    AddAttachment { issue: String, name: String, content: Vec<u8> },
}

impl Call {
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            Call::CreateIssue { .. }
                | Call::UpdateState { .. }
                | Call::SetSecondaryId { .. }
                | Call::AddComment { .. }
                | Call::AddAttachment { .. }
        )
    }
}

// ---------------------------------------------------------------------------
// FakeTracker
// ---------------------------------------------------------------------------

/// Which optional capabilities the fake supports.
#[derive(Debug, Clone, Copy)]
pub struct Caps {
    pub get_issue: bool,
    pub create_issue: bool,
    pub update_state: bool,
    pub set_secondary_id: bool,
    pub add_comment: bool,
    pub list_comments: bool,
    pub add_attachment: bool,
    pub list_attachments: bool,
}

impl Caps {
    /// Listings and reads only.
    pub fn read_only() -> Self {
        Self {
            create_issue: false,
            update_state: false,
            set_secondary_id: false,
            add_comment: false,
            add_attachment: false,
            ..Self::default()
        }
    }
}

impl Default for Caps {
    fn default() -> Self {
        Self {
            get_issue: true,
            create_issue: true,
            update_state: true,
            set_secondary_id: true,
            add_comment: true,
            list_comments: true,
            add_attachment: true,
            list_attachments: true,
        }
    }
}

#[derive(Default)]
struct FakeState {
    issues: Vec<Issue>,
    full: HashMap<IssueId, Issue>,
    comments: HashMap<IssueId, Vec<Comment>>,
    attachments: HashMap<IssueId, Vec<Attachment>>,
    next: u32,
    calls: Vec<Call>,
    fail_list: bool,
    fail_add_attachment: bool,
    cancel_on_create: Option<CancellationToken>,
}

pub struct FakeTracker {
    id: TrackerId,
    prefix: &'static str,
    caps: Caps,
    state: Mutex<FakeState>,
}

impl FakeTracker {
    pub fn new(id: &str, prefix: &'static str) -> Self {
        Self::with_caps(id, prefix, Caps::default())
    }

    pub fn with_caps(id: &str, prefix: &'static str, caps: Caps) -> Self {
        Self {
            id: TrackerId::new(id),
            prefix,
            caps,
            state: Mutex::new(FakeState::default()),
        }
    }

    /// Add an issue to the listing. Its full data is served by `get_issue`.
    pub fn add_issue(&self, issue: Issue) {
        let mut st = self.state.lock().unwrap();
        st.full.insert(issue.id.clone(), issue.clone());
        st.issues.push(issue);
    }

    /// Add an issue whose listing entry carries only the ID.
    pub fn add_sparse_issue(&self, issue: Issue) {
        let mut st = self.state.lock().unwrap();
        let mut listed = Issue::with_id(issue.id.clone());
        listed.secondary_id = issue.secondary_id.clone();
        st.full.insert(issue.id.clone(), issue);
        st.issues.push(listed);
    }

    pub fn add_existing_comment(&self, issue: &str, id: &str, body: &str) {
        let comment = Comment {
            id: CommentId::new(id),
            body: body.to_string(),
            ..Comment::default()
        };
        self.state
            .lock()
            .unwrap()
            .comments
            .entry(IssueId::new(issue))
            .or_default()
            .push(comment);
    }

    pub fn add_existing_attachment(&self, issue: &str, attachment: Attachment) {
        self.state
            .lock()
            .unwrap()
            .attachments
            .entry(IssueId::new(issue))
            .or_default()
            .push(attachment);
    }

    pub fn fail_list(&self) {
        self.state.lock().unwrap().fail_list = true;
    }

    pub fn fail_add_attachment(&self) {
        self.state.lock().unwrap().fail_add_attachment = true;
    }

    /// Fire `token` as soon as an issue has been created here.
    pub fn cancel_on_create(&self, token: CancellationToken) {
        self.state.lock().unwrap().cancel_on_create = Some(token);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn mutations(&self) -> Vec<Call> {
        self.calls().into_iter().filter(Call::is_mutation).collect()
    }

    pub fn comments(&self, issue: &str) -> Vec<Comment> {
        self.state
            .lock()
            .unwrap()
            .comments
            .get(&IssueId::new(issue))
            .cloned()
            .unwrap_or_default()
    }

    pub fn attachments(&self, issue: &str) -> Vec<Attachment> {
        self.state
            .lock()
            .unwrap()
            .attachments
            .get(&IssueId::new(issue))
            .cloned()
            .unwrap_or_default()
    }

    pub fn issue_count(&self) -> usize {
        self.state.lock().unwrap().issues.len()
    }

    fn record(&self, call: Call) {
        self.state.lock().unwrap().calls.push(call);
    }

    fn next_id(&self, kind: &str) -> String {
        let mut st = self.state.lock().unwrap();
        st.next += 1;
        format!("{}{}{}", self.prefix, kind, st.next)
    }
}

#[async_trait]
impl Tracker for FakeTracker {
    fn id(&self) -> &TrackerId {
        &self.id
    }

    async fn get_issue(&self, id: &IssueId) -> Result<Issue> {
        self.record(Call::GetIssue(id.to_string()));
        if !self.caps.get_issue {
            return Err(TrackerError::NotImplemented("get_issue"));
        }
        self.state
            .lock()
            .unwrap()
            .full
            .get(id)
            .cloned()
            .ok_or_else(|| TrackerError::NotFound(id.to_string()))
    }

    async fn list_issues(&self, since: Option<DateTime<Utc>>) -> Result<Vec<Issue>> {
        self.record(Call::ListIssues(since));
        let st = self.state.lock().unwrap();
        if st.fail_list {
            return Err(TrackerError::Transport("connection reset".into()));
        }
        Ok(st.issues.clone())
    }

    async fn create_issue(&self, issue: &Issue) -> Result<IssueId> {
        self.record(Call::CreateIssue {
            source: issue.id.to_string(),
            summary: issue.summary.clone(),
        });
        if !self.caps.create_issue {
            return Err(TrackerError::NotImplemented("create_issue"));
        }
        let id = IssueId::new(self.next_id(""));
        let mut created = issue.clone();
        created.id = id.clone();
        created.secondary_id = None;
        let mut st = self.state.lock().unwrap();
        st.full.insert(id.clone(), created.clone());
        st.issues.push(created);
        if let Some(token) = &st.cancel_on_create {
            token.cancel();
        }
        Ok(id)
    }

    async fn update_issue_state(&self, id: &IssueId, state: &State) -> Result<()> {
        self.record(Call::UpdateState {
            issue: id.to_string(),
            state: state.to_string(),
        });
        if !self.caps.update_state {
            return Err(TrackerError::NotImplemented("update_issue_state"));
        }
        Ok(())
    }

    async fn set_secondary_id(&self, primary: &IssueId, secondary: &IssueId) -> Result<()> {
        self.record(Call::SetSecondaryId {
            primary: primary.to_string(),
            secondary: secondary.to_string(),
        });
        if !self.caps.set_secondary_id {
            return Err(TrackerError::NotImplemented("set_secondary_id"));
        }
        let mut st = self.state.lock().unwrap();
        if let Some(issue) = st.issues.iter_mut().find(|i| &i.id == primary) {
            issue.secondary_id = Some(secondary.clone());
        }
        Ok(())
    }

    async fn add_comment(&self, issue: &IssueId, comment: &Comment) -> Result<CommentId> {
        self.record(Call::AddComment {
            issue: issue.to_string(),
            body: comment.body.clone(),
        });
        if !self.caps.add_comment {
            return Err(TrackerError::NotImplemented("add_comment"));
        }
        let id = CommentId::new(self.next_id("C"));
        let mut copy = comment.clone();
        copy.id = id.clone();
        self.state
            .lock()
            .unwrap()
            .comments
            .entry(issue.clone())
            .or_default()
            .push(copy);
        Ok(id)
    }

    async fn list_comments(&self, issue: &IssueId) -> Result<Vec<Comment>> {
        self.record(Call::ListComments(issue.to_string()));
        if !self.caps.list_comments {
            return Err(TrackerError::NotImplemented("list_comments"));
        }
        Ok(self.comments(issue.as_str()))
    }

    async fn add_attachment(
        &self,
        issue: &IssueId,
        attachment: &Attachment,
        mut body: AttachmentBody,
    ) -> Result<AttachmentId> {
        if !self.caps.add_attachment {
            self.record(Call::AddAttachment {
                issue: issue.to_string(),
                name: attachment.name.clone(),
                content: Vec::new(),
            });
            return Err(TrackerError::NotImplemented("add_attachment"));
        }
        if self.state.lock().unwrap().fail_add_attachment {
            self.record(Call::AddAttachment {
                issue: issue.to_string(),
                name: attachment.name.clone(),
                content: Vec::new(),
            });
            return Err(TrackerError::Api {
                status: 413,
                message: "payload too large".into(),
            });
        }
        let mut content = Vec::new();
        body.read_to_end(&mut content).await?;
        self.record(Call::AddAttachment {
            issue: issue.to_string(),
            name: attachment.name.clone(),
            content: content.clone(),
        });
        let id = AttachmentId::new(self.next_id("A"));
        let copy = Attachment {
            id: id.clone(),
            content: Arc::new(ms_core::types::InlineContent::new(content)),
            ..attachment.clone()
        };
        self.state
            .lock()
            .unwrap()
            .attachments
            .entry(issue.clone())
            .or_default()
            .push(copy);
        Ok(id)
    }

    async fn list_attachments(&self, issue: &IssueId) -> Result<Vec<Attachment>> {
        self.record(Call::ListAttachments(issue.to_string()));
        if !self.caps.list_attachments {
            return Err(TrackerError::NotImplemented("list_attachments"));
        }
        Ok(self
            .state
            .lock()
            .unwrap()
            .attachments
            .get(issue)
            .cloned()
            .unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// Attachment content that tracks open handles
// ---------------------------------------------------------------------------

pub struct TrackedContent {
    bytes: Vec<u8>,
    open: Arc<AtomicUsize>,
    opened: Arc<AtomicUsize>,
}

impl TrackedContent {
    pub fn new(bytes: &[u8]) -> Self {
        Self {
            bytes: bytes.to_vec(),
            open: Arc::new(AtomicUsize::new(0)),
            opened: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Handles currently open.
    pub fn open_handles(&self) -> Arc<AtomicUsize> {
        self.open.clone()
    }

    /// Handles opened so far.
    pub fn times_opened(&self) -> Arc<AtomicUsize> {
        self.opened.clone()
    }
}

struct TrackedReader {
    inner: std::io::Cursor<Vec<u8>>,
    open: Arc<AtomicUsize>,
}

impl AsyncRead for TrackedReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl Drop for TrackedReader {
    fn drop(&mut self) {
        self.open.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ContentSource for TrackedContent {
    async fn open(&self) -> Result<AttachmentBody> {
        self.open.fetch_add(1, Ordering::SeqCst);
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::pin(TrackedReader {
            inner: std::io::Cursor::new(self.bytes.clone()),
            open: self.open.clone(),
        }))
    }
}

// ---------------------------------------------------------------------------
// Store that counts lookups
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct CountingStore {
    inner: MemoryStore,
    gets: Mutex<Vec<String>>,
}

impl CountingStore {
    /// Buckets looked up so far, in order.
    pub fn lookups(&self) -> Vec<String> {
        self.gets.lock().unwrap().clone()
    }
}

impl CorrespondenceStore for CountingStore {
    fn get(&self, bucket: &str, key: &str) -> StoreResult<Option<String>> {
        self.gets.lock().unwrap().push(bucket.to_string());
        self.inner.get(bucket, key)
    }

    fn put_many(&self, records: &[Record]) -> StoreResult<()> {
        self.inner.put_many(records)
    }

    fn snapshot(&self) -> StoreResult<Buckets> {
        self.inner.snapshot()
    }

    fn close(&self) -> StoreResult<()> {
        self.inner.close()
    }
}

pub fn issue(id: &str, summary: &str, state: &str) -> Issue {
    Issue {
        id: IssueId::new(id),
        summary: summary.to_string(),
        state: State::new(state),
        ..Issue::default()
    }
}

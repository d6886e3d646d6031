//! MantisBT adapter over the REST API (`/api/rest`).
//!
//! The userinfo password (or the username when there is no password) is the
//! API token. URL options `project_id` and `category` (default `General`)
//! configure issue creation. `max_upload_bytes` bounds the size of one
//! uploaded attachment, which is held in memory for the base64 payload.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use ms_core::tracker::{Result, Tracker, TrackerError};
use ms_core::types::{
    Attachment, AttachmentBody, AttachmentId, Comment, CommentId, ContentSource, Issue, IssueId,
    State, TrackerId, User, UserId,
};
use serde::Deserialize;
use serde_json::json;
use tokio::io::AsyncReadExt;
use tracing::debug;

use crate::http::{self, Auth, Endpoint};

const PAGE_SIZE: usize = 50;
const LIST_CAP: usize = 1000;
/// Pages fetched by one listing, whether or not a bound filters them.
const MAX_PAGES: usize = LIST_CAP / PAGE_SIZE;
/// Default for the `max_upload_bytes` option.
const MAX_UPLOAD_BYTES: u64 = 32 * 1024 * 1024;

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
struct MantisAccount {
    #[serde(default)]
    id: u64,
    name: Option<String>,
    real_name: Option<String>,
    email: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct MantisStatus {
    name: String,
}

#[derive(Debug, Clone, Deserialize)]
struct MantisNote {
    id: u64,
    #[serde(default)]
    text: String,
    reporter: Option<MantisAccount>,
    created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
struct MantisFile {
    id: u64,
    filename: String,
    content_type: Option<String>,
    reporter: Option<MantisAccount>,
    created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
struct MantisIssue {
    id: u64,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    description: String,
    reporter: Option<MantisAccount>,
    handler: Option<MantisAccount>,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
    status: Option<MantisStatus>,
    #[serde(default)]
    notes: Vec<MantisNote>,
    #[serde(default)]
    attachments: Vec<MantisFile>,
}

#[derive(Debug, Deserialize)]
struct IssueList {
    #[serde(default)]
    issues: Vec<MantisIssue>,
}

#[derive(Debug, Deserialize)]
struct Id {
    id: u64,
}

#[derive(Debug, Deserialize)]
struct CreatedIssue {
    issue: Id,
}

#[derive(Debug, Deserialize)]
struct CreatedNote {
    note: Id,
}

#[derive(Debug, Deserialize)]
struct FileContent {
    content: String,
}

#[derive(Debug, Deserialize)]
struct FileList {
    #[serde(default)]
    files: Vec<FileContent>,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct MantisTracker {
    id: TrackerId,
    api: String,
    auth: Auth,
    project_id: Option<String>,
    category: String,
    max_upload: u64,
    client: reqwest::Client,
}

impl MantisTracker {
    pub fn new(raw_url: &str) -> Result<Self> {
        let endpoint = Endpoint::parse(raw_url)?;
        let auth = match &endpoint.credentials {
            Some(c) => Auth::Token(c.password.clone().unwrap_or_else(|| c.username.clone())),
            None => Auth::None,
        };
        let max_upload = match endpoint.option("max_upload_bytes") {
            Some(raw) => raw.parse().map_err(|_| {
                TrackerError::Config(format!("max_upload_bytes {raw:?} is not a byte count"))
            })?,
            None => MAX_UPLOAD_BYTES,
        };
        Ok(Self {
            id: TrackerId::new(endpoint.base.clone()),
            api: format!("{}/api/rest", endpoint.base),
            auth,
            project_id: endpoint.option("project_id").map(str::to_string),
            category: endpoint.option("category").unwrap_or("General").to_string(),
            max_upload,
            client: reqwest::Client::new(),
        })
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        let req = self.auth.apply(self.client.get(format!("{}{path}", self.api)));
        http::json(req.send().await.map_err(http::transport)?).await
    }

    async fn post<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<T> {
        let req = self
            .auth
            .apply(self.client.post(format!("{}{path}", self.api)).json(body));
        http::json(req.send().await.map_err(http::transport)?).await
    }

    async fn fetch(&self, id: &IssueId) -> Result<MantisIssue> {
        let n = numeric(id.as_str())?;
        let list: IssueList = self.get(&format!("/issues/{n}")).await?;
        list.issues
            .into_iter()
            .next()
            .ok_or_else(|| TrackerError::NotFound(format!("mantis issue {n}")))
    }

    fn to_attachment(&self, issue: u64, f: MantisFile) -> Attachment {
        let content = FileDownload {
            client: self.client.clone(),
            url: format!("{}/issues/{issue}/files/{}", self.api, f.id),
            auth: self.auth.clone(),
        };
        Attachment {
            id: AttachmentId::new(f.id.to_string()),
            name: f.filename,
            mime_type: f
                .content_type
                .unwrap_or_else(|| "application/octet-stream".to_string()),
            author: read_user([f.reporter.as_ref()]),
            created_at: f.created_at,
            content: Arc::new(content),
        }
    }
}

#[async_trait]
impl Tracker for MantisTracker {
    fn id(&self) -> &TrackerId {
        &self.id
    }

    async fn get_issue(&self, id: &IssueId) -> Result<Issue> {
        let mi = self.fetch(id).await?;
        Ok(Issue {
            id: IssueId::new(mi.id.to_string()),
            secondary_id: None,
            summary: mi.summary,
            description: mi.description,
            author: read_user([mi.reporter.as_ref(), mi.handler.as_ref()]),
            created_at: mi.created_at,
            state: State::new(mi.status.map(|s| s.name).unwrap_or_default()),
        })
    }

    async fn list_issues(&self, since: Option<DateTime<Utc>>) -> Result<Vec<Issue>> {
        let project = self
            .project_id
            .as_ref()
            .map(|p| format!("&project_id={}", urlencoding::encode(p)))
            .unwrap_or_default();
        let mut issues = Vec::new();
        let mut page = 1;
        loop {
            let list: IssueList = self
                .get(&format!("/issues?page_size={PAGE_SIZE}&page={page}{project}"))
                .await?;
            let fetched = list.issues.len();
            issues.extend(
                list.issues
                    .into_iter()
                    .filter(|mi| match (since, mi.updated_at) {
                        (Some(since), Some(updated)) => updated >= since,
                        _ => true,
                    })
                    .map(|mi| Issue::with_id(mi.id.to_string())),
            );
            if fetched < PAGE_SIZE || issues.len() >= LIST_CAP || page >= MAX_PAGES {
                break;
            }
            page += 1;
        }
        issues.truncate(LIST_CAP);
        debug!(tracker = %self.id, count = issues.len(), "listed mantis issues");
        Ok(issues)
    }

    async fn create_issue(&self, issue: &Issue) -> Result<IssueId> {
        let project = self
            .project_id
            .as_ref()
            .ok_or(TrackerError::NotImplemented("create_issue"))?;
        let project_id = numeric(project)?;
        let summary = if issue.summary.is_empty() {
            format!("Issue {}", issue.id)
        } else {
            issue.summary.clone()
        };
        // Mantis rejects an empty description.
        let description = if issue.description.is_empty() {
            summary.clone()
        } else {
            issue.description.clone()
        };
        let created: CreatedIssue = self
            .post(
                "/issues",
                &json!({
                    "summary": summary,
                    "description": description,
                    "category": { "name": self.category },
                    "project": { "id": project_id },
                }),
            )
            .await?;
        Ok(IssueId::new(created.issue.id.to_string()))
    }

    async fn update_issue_state(&self, id: &IssueId, state: &State) -> Result<()> {
        let n = numeric(id.as_str())?;
        let req = self.auth.apply(
            self.client
                .patch(format!("{}/issues/{n}", self.api))
                .json(&json!({ "status": { "name": state.as_str() } })),
        );
        http::check(req.send().await.map_err(http::transport)?).await?;
        Ok(())
    }

    async fn add_comment(&self, id: &IssueId, comment: &Comment) -> Result<CommentId> {
        let n = numeric(id.as_str())?;
        let created: CreatedNote = self
            .post(
                &format!("/issues/{n}/notes"),
                &json!({ "text": comment.body, "view_state": { "name": "public" } }),
            )
            .await?;
        Ok(CommentId::new(created.note.id.to_string()))
    }

    async fn list_comments(&self, id: &IssueId) -> Result<Vec<Comment>> {
        let mi = self.fetch(id).await?;
        Ok(mi
            .notes
            .into_iter()
            .map(|n| Comment {
                id: CommentId::new(n.id.to_string()),
                author: read_user([n.reporter.as_ref()]),
                created_at: n.created_at,
                body: n.text,
            })
            .collect())
    }

    async fn add_attachment(
        &self,
        id: &IssueId,
        attachment: &Attachment,
        body: AttachmentBody,
    ) -> Result<AttachmentId> {
        let n = numeric(id.as_str())?;
        let mut bytes = Vec::new();
        body.take(self.max_upload.saturating_add(1)).read_to_end(&mut bytes).await?;
        if bytes.len() as u64 > self.max_upload {
            return Err(TrackerError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!(
                    "attachment {:?} is larger than the {} byte upload limit",
                    attachment.name, self.max_upload
                ),
            )));
        }

        let before: BTreeSet<u64> = self
            .fetch(id)
            .await?
            .attachments
            .iter()
            .map(|f| f.id)
            .collect();

        let req = self.auth.apply(
            self.client
                .post(format!("{}/issues/{n}/files", self.api))
                .json(&json!({
                    "files": [{
                        "name": attachment.name,
                        "content": base64::engine::general_purpose::STANDARD.encode(&bytes),
                    }]
                })),
        );
        http::check(req.send().await.map_err(http::transport)?).await?;

        // The upload response carries no file ID; find the new one.
        let after = self.fetch(id).await?.attachments;
        let new: Vec<&MantisFile> = after.iter().filter(|f| !before.contains(&f.id)).collect();
        new.iter()
            .filter(|f| f.filename == attachment.name)
            .map(|f| f.id)
            .max()
            .or_else(|| new.iter().map(|f| f.id).max())
            .map(|id| AttachmentId::new(id.to_string()))
            .ok_or_else(|| TrackerError::Api {
                status: 201,
                message: format!("uploaded file {:?} not found on issue {n}", attachment.name),
            })
    }

    async fn list_attachments(&self, id: &IssueId) -> Result<Vec<Attachment>> {
        let mi = self.fetch(id).await?;
        let issue = mi.id;
        Ok(mi
            .attachments
            .into_iter()
            .map(|f| self.to_attachment(issue, f))
            .collect())
    }
}

// ---------------------------------------------------------------------------
// File download
// ---------------------------------------------------------------------------

/// Mantis serves file content base64-encoded inside a JSON document.
#[derive(Debug, Clone)]
struct FileDownload {
    client: reqwest::Client,
    url: String,
    auth: Auth,
}

#[async_trait]
impl ContentSource for FileDownload {
    async fn open(&self) -> Result<AttachmentBody> {
        let req = self.auth.apply(self.client.get(&self.url));
        let list: FileList = http::json(req.send().await.map_err(http::transport)?).await?;
        let file = list
            .files
            .into_iter()
            .next()
            .ok_or_else(|| TrackerError::NotFound(self.url.clone()))?;
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(file.content.trim())
            .map_err(|e| TrackerError::Api {
                status: 200,
                message: format!("{}: invalid base64 content: {e}", self.url),
            })?;
        Ok(Box::pin(std::io::Cursor::new(bytes)))
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn numeric(id: &str) -> Result<u64> {
    id.parse()
        .map_err(|_| TrackerError::InvalidId(format!("{id:?} is not a MantisBT ID")))
}

/// First account with both an ID and an email address.
fn read_user<'a>(candidates: impl IntoIterator<Item = Option<&'a MantisAccount>>) -> User {
    candidates
        .into_iter()
        .flatten()
        .find(|u| u.id != 0 && u.email.as_deref().is_some_and(|e| !e.is_empty()))
        .map(|u| User {
            id: UserId::new(u.id.to_string()),
            real_name: u
                .real_name
                .clone()
                .or_else(|| u.name.clone())
                .unwrap_or_default(),
            email: u.email.clone().unwrap_or_default(),
        })
        .unwrap_or_default()
}

//! Jira adapter over the REST API v2.
//!
//! URL options:
//! - `project`: key of the project new issues are created in; without it
//!   `create_issue` is not implemented
//! - `issuetype`: issue type name for new issues (default `Task`)
//!
//! Userinfo credentials become HTTP basic auth.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ms_core::tracker::{Result, Tracker, TrackerError};
use ms_core::types::{
    Attachment, AttachmentBody, AttachmentId, Comment, CommentId, Issue, IssueId, State,
    TrackerId, User, UserId,
};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::http::{self, Auth, Endpoint, HttpContent};

/// Page size for issue searches.
const PAGE_SIZE: usize = 100;
/// Maximum number of issues returned by one listing.
const LIST_CAP: usize = 1000;
/// JQL reads dates in the searching user's time zone, not UTC. The lower
/// bound is moved back this far so no offset can skip an update.
const BOUND_OVERLAP_HOURS: i64 = 24;

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JiraUser {
    account_id: Option<String>,
    name: Option<String>,
    email_address: Option<String>,
    display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct JiraStatus {
    name: String,
}

#[derive(Debug, Default, Deserialize)]
struct JiraFields {
    summary: Option<String>,
    description: Option<String>,
    reporter: Option<JiraUser>,
    creator: Option<JiraUser>,
    created: Option<String>,
    status: Option<JiraStatus>,
    #[serde(default)]
    attachment: Vec<JiraAttachment>,
}

#[derive(Debug, Deserialize)]
struct JiraIssue {
    id: String,
    #[serde(default)]
    fields: JiraFields,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchPage {
    #[serde(default)]
    total: usize,
    #[serde(default)]
    issues: Vec<JiraIssue>,
}

#[derive(Debug, Deserialize)]
struct Created {
    id: String,
}

#[derive(Debug, Deserialize)]
struct JiraComment {
    id: String,
    #[serde(default)]
    body: String,
    created: Option<String>,
    author: Option<JiraUser>,
    #[serde(rename = "updateAuthor")]
    update_author: Option<JiraUser>,
}

#[derive(Debug, Deserialize)]
struct CommentPage {
    #[serde(default)]
    comments: Vec<JiraComment>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JiraAttachment {
    id: String,
    filename: String,
    mime_type: Option<String>,
    created: Option<String>,
    author: Option<JiraUser>,
    content: String,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct JiraTracker {
    id: TrackerId,
    base: String,
    auth: Auth,
    project: Option<String>,
    issue_type: String,
    client: reqwest::Client,
}

impl JiraTracker {
    pub fn new(raw_url: &str) -> Result<Self> {
        let endpoint = Endpoint::parse(raw_url)?;
        let auth = match &endpoint.credentials {
            Some(c) => Auth::Basic {
                username: c.username.clone(),
                password: c.password.clone(),
            },
            None => Auth::None,
        };
        Ok(Self {
            id: TrackerId::new(endpoint.base.clone()),
            project: endpoint.option("project").map(str::to_string),
            issue_type: endpoint.option("issuetype").unwrap_or("Task").to_string(),
            base: endpoint.base,
            auth,
            client: reqwest::Client::new(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base
    }

    // -- request helpers ----------------------------------------------------

    fn url(&self, path: &str) -> String {
        format!("{}/rest/api/2{}", self.base, path)
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        let req = self.auth.apply(self.client.get(self.url(path)));
        http::json(req.send().await.map_err(http::transport)?).await
    }

    async fn post<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<T> {
        let req = self.auth.apply(self.client.post(self.url(path)).json(body));
        http::json(req.send().await.map_err(http::transport)?).await
    }

    fn jql(&self, since: Option<DateTime<Utc>>) -> String {
        let mut clauses = Vec::new();
        if let Some(project) = &self.project {
            clauses.push(format!("project = \"{project}\""));
        }
        if let Some(since) = since {
            let bound = since - chrono::Duration::hours(BOUND_OVERLAP_HOURS);
            clauses.push(format!("updated >= \"{}\"", bound.format("%Y/%m/%d %H:%M")));
        }
        let order = if since.is_some() { "updated" } else { "created" };
        if clauses.is_empty() {
            format!("ORDER BY {order} ASC")
        } else {
            format!("{} ORDER BY {order} ASC", clauses.join(" AND "))
        }
    }

    fn to_attachment(&self, a: JiraAttachment) -> Attachment {
        let content = HttpContent::new(self.client.clone(), a.content, self.auth.clone());
        Attachment {
            id: AttachmentId::new(a.id),
            name: a.filename,
            mime_type: a
                .mime_type
                .unwrap_or_else(|| "application/octet-stream".to_string()),
            author: read_user([a.author.as_ref()]),
            created_at: a.created.as_deref().and_then(parse_time),
            content: Arc::new(content),
        }
    }
}

#[async_trait]
impl Tracker for JiraTracker {
    fn id(&self) -> &TrackerId {
        &self.id
    }

    async fn get_issue(&self, id: &IssueId) -> Result<Issue> {
        let ji: JiraIssue = self
            .get(&format!(
                "/issue/{id}?fields=summary,description,reporter,creator,created,status"
            ))
            .await?;
        let f = ji.fields;
        Ok(Issue {
            id: IssueId::new(ji.id),
            secondary_id: None,
            summary: f.summary.unwrap_or_default(),
            description: f.description.unwrap_or_default(),
            author: read_user([f.reporter.as_ref(), f.creator.as_ref()]),
            created_at: f.created.as_deref().and_then(parse_time),
            state: State::new(f.status.map(|s| s.name).unwrap_or_default()),
        })
    }

    async fn list_issues(&self, since: Option<DateTime<Utc>>) -> Result<Vec<Issue>> {
        let jql = self.jql(since);
        let mut issues = Vec::new();
        loop {
            let page: SearchPage = self
                .post(
                    "/search",
                    &json!({
                        "jql": jql,
                        "startAt": issues.len(),
                        "maxResults": PAGE_SIZE,
                        "fields": ["id", "key"],
                    }),
                )
                .await?;
            let fetched = page.issues.len();
            issues.extend(page.issues.into_iter().map(|ji| Issue::with_id(ji.id)));
            if fetched == 0 || issues.len() >= page.total || issues.len() >= LIST_CAP {
                break;
            }
        }
        issues.truncate(LIST_CAP);
        debug!(tracker = %self.id, count = issues.len(), "listed jira issues");
        Ok(issues)
    }

    async fn create_issue(&self, issue: &Issue) -> Result<IssueId> {
        let project = self
            .project
            .as_ref()
            .ok_or(TrackerError::NotImplemented("create_issue"))?;
        let summary = if issue.summary.is_empty() {
            format!("Issue {}", issue.id)
        } else {
            issue.summary.clone()
        };
        let created: Created = self
            .post(
                "/issue",
                &json!({
                    "fields": {
                        "project": { "key": project },
                        "summary": summary,
                        "description": issue.description,
                        "issuetype": { "name": self.issue_type },
                    }
                }),
            )
            .await?;
        Ok(IssueId::new(created.id))
    }

    async fn add_comment(&self, issue: &IssueId, comment: &Comment) -> Result<CommentId> {
        let created: Created = self
            .post(
                &format!("/issue/{issue}/comment"),
                &json!({ "body": comment.body }),
            )
            .await?;
        Ok(CommentId::new(created.id))
    }

    async fn list_comments(&self, issue: &IssueId) -> Result<Vec<Comment>> {
        let page: CommentPage = self
            .get(&format!("/issue/{issue}/comment?maxResults={LIST_CAP}"))
            .await?;
        Ok(page
            .comments
            .into_iter()
            .map(|c| Comment {
                id: CommentId::new(c.id),
                author: read_user([c.update_author.as_ref(), c.author.as_ref()]),
                created_at: c.created.as_deref().and_then(parse_time),
                body: c.body,
            })
            .collect())
    }

    async fn add_attachment(
        &self,
        issue: &IssueId,
        attachment: &Attachment,
        body: AttachmentBody,
    ) -> Result<AttachmentId> {
        let part = reqwest::multipart::Part::stream(http::request_body(body))
            .file_name(attachment.name.clone())
            .mime_str(&attachment.mime_type)
            .map_err(http::transport)?;
        let form = reqwest::multipart::Form::new().part("file", part);
        let req = self.auth.apply(
            self.client
                .post(self.url(&format!("/issue/{issue}/attachments")))
                .header("X-Atlassian-Token", "no-check")
                .multipart(form),
        );
        let created: Vec<Created> = http::json(req.send().await.map_err(http::transport)?).await?;
        created
            .into_iter()
            .next()
            .map(|c| AttachmentId::new(c.id))
            .ok_or_else(|| TrackerError::Api {
                status: 200,
                message: "attachment upload returned no attachment".into(),
            })
    }

    async fn list_attachments(&self, issue: &IssueId) -> Result<Vec<Attachment>> {
        let ji: JiraIssue = self.get(&format!("/issue/{issue}?fields=attachment")).await?;
        Ok(ji
            .fields
            .attachment
            .into_iter()
            .map(|a| self.to_attachment(a))
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Jira timestamps look like `2020-01-02T03:04:05.000+0000`.
fn parse_time(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f%z")
        .or_else(|_| DateTime::parse_from_rfc3339(s))
        .map(|t| t.with_timezone(&Utc))
        .ok()
}

/// First user with an identity among `candidates`.
fn read_user<'a>(candidates: impl IntoIterator<Item = Option<&'a JiraUser>>) -> User {
    candidates
        .into_iter()
        .flatten()
        .find_map(|u| {
            let id = u.account_id.as_ref().or(u.name.as_ref())?;
            Some(User {
                id: UserId::new(id.clone()),
                real_name: u.display_name.clone().unwrap_or_default(),
                email: u.email_address.clone().unwrap_or_default(),
            })
        })
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

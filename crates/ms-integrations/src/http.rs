//! Shared HTTP plumbing for the adapters: base URL parsing with credential
//! stripping, authentication, status checks and body streaming.

use async_trait::async_trait;
use futures::TryStreamExt;
use ms_core::tracker::{Result, TrackerError};
use ms_core::types::{AttachmentBody, ContentSource};
use tokio_util::io::{ReaderStream, StreamReader};
use url::Url;

// ---------------------------------------------------------------------------
// Endpoint
// ---------------------------------------------------------------------------

/// Credentials found in the userinfo part of a tracker URL.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

/// A tracker base URL with credentials and query removed.
#[derive(Debug, Clone)]
pub struct Endpoint {
    /// Credential-free base URL without query or trailing slash.
    pub base: String,
    pub credentials: Option<Credentials>,
    /// Query parameters of the given URL (adapter options).
    pub options: Vec<(String, String)>,
}

impl Endpoint {
    pub fn parse(raw: &str) -> Result<Self> {
        let mut url =
            Url::parse(raw).map_err(|e| TrackerError::Config(format!("{raw:?}: {e}")))?;
        if url.cannot_be_a_base() {
            return Err(TrackerError::Config(format!("{raw:?} is not a base URL")));
        }

        let credentials = if url.username().is_empty() && url.password().is_none() {
            None
        } else {
            Some(Credentials {
                username: decode(url.username()),
                password: url.password().map(decode),
            })
        };
        // Neither call can fail for a URL that can be a base.
        let _ = url.set_username("");
        let _ = url.set_password(None);

        let options = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        url.set_query(None);
        url.set_fragment(None);

        Ok(Self {
            base: url.as_str().trim_end_matches('/').to_string(),
            credentials,
            options,
        })
    }

    pub fn option(&self, name: &str) -> Option<&str> {
        self.options
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

fn decode(s: &str) -> String {
    urlencoding::decode(s)
        .map(|v| v.into_owned())
        .unwrap_or_else(|_| s.to_string())
}

// ---------------------------------------------------------------------------
// Auth
// ---------------------------------------------------------------------------

#[derive(Clone, PartialEq, Eq)]
pub enum Auth {
    None,
    Basic { username: String, password: Option<String> },
    /// Raw value of the `Authorization` header.
    Token(String),
}

impl std::fmt::Debug for Auth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Auth::None => f.write_str("None"),
            Auth::Basic { username, .. } => write!(f, "Basic({username}, ***)"),
            Auth::Token(_) => f.write_str("Token(***)"),
        }
    }
}

impl Auth {
    pub fn apply(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self {
            Auth::None => req,
            Auth::Basic { username, password } => req.basic_auth(username, password.as_ref()),
            Auth::Token(token) => req.header(reqwest::header::AUTHORIZATION, token),
        }
    }
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

pub fn transport(err: reqwest::Error) -> TrackerError {
    TrackerError::Transport(err.to_string())
}

/// Turn a non-success response into [`TrackerError::Api`] (or `NotFound`).
pub async fn check(resp: reqwest::Response) -> Result<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let url = resp.url().to_string();
    let body = resp.text().await.unwrap_or_default();
    if status == reqwest::StatusCode::NOT_FOUND {
        return Err(TrackerError::NotFound(url));
    }
    Err(TrackerError::Api {
        status: status.as_u16(),
        message: format!("{} {}: {}", status.canonical_reason().unwrap_or(""), url, body),
    })
}

pub async fn json<T: serde::de::DeserializeOwned>(resp: reqwest::Response) -> Result<T> {
    check(resp).await?.json().await.map_err(transport)
}

/// Stream a response body as an [`AttachmentBody`].
pub fn body_reader(resp: reqwest::Response) -> AttachmentBody {
    let stream = resp.bytes_stream().map_err(std::io::Error::other);
    Box::pin(StreamReader::new(stream))
}

/// Wrap an [`AttachmentBody`] as a streaming request body.
pub fn request_body(body: AttachmentBody) -> reqwest::Body {
    reqwest::Body::wrap_stream(ReaderStream::new(body))
}

// ---------------------------------------------------------------------------
// Lazy download
// ---------------------------------------------------------------------------

/// Attachment content downloaded with a plain authenticated GET on `open`.
#[derive(Debug, Clone)]
pub struct HttpContent {
    client: reqwest::Client,
    url: String,
    auth: Auth,
}

impl HttpContent {
    pub fn new(client: reqwest::Client, url: impl Into<String>, auth: Auth) -> Self {
        Self {
            client,
            url: url.into(),
            auth,
        }
    }
}

#[async_trait]
impl ContentSource for HttpContent {
    async fn open(&self) -> Result<AttachmentBody> {
        let req = self.auth.apply(self.client.get(&self.url));
        let resp = check(req.send().await.map_err(transport)?).await?;
        Ok(body_reader(resp))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

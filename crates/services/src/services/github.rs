//! Minimal GitHub REST client for milestones, issues, labels and OAuth.
//!
//! List endpoints are paginated through the `Link` response header; pages
//! are fetched one after another until no `rel="next"` entry remains.
//! Failures are returned as-is, nothing is retried.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, header};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum GitHubError {
    #[error("GitHub request timed out")]
    Timeout,
    #[error("GitHub request failed: {0}")]
    Transport(String),
    #[error("GitHub returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Unexpected GitHub payload: {0}")]
    Decode(String),
    #[error("Invalid GitHub URL: {0}")]
    Url(#[from] url::ParseError),
    #[error("OAuth code exchange failed: {0}")]
    OAuth(String),
}

fn map_reqwest_error(e: reqwest::Error) -> GitHubError {
    if e.is_timeout() {
        GitHubError::Timeout
    } else {
        GitHubError::Transport(e.to_string())
    }
}

fn decode<T: DeserializeOwned>(value: &Value) -> Result<T, GitHubError> {
    T::deserialize(value).map_err(|e| GitHubError::Decode(e.to_string()))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Label {
    pub name: String,
    #[serde(default)]
    pub color: String,
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct Milestone {
    pub number: i64,
    pub title: String,
    pub due_on: Option<DateTime<Utc>>,
    /// The payload exactly as GitHub returned it.
    pub raw: Value,
}

#[derive(Deserialize)]
struct MilestoneFields {
    number: i64,
    title: String,
    #[serde(default)]
    due_on: Option<DateTime<Utc>>,
}

impl Milestone {
    pub fn from_value(raw: Value) -> Result<Self, GitHubError> {
        let fields: MilestoneFields = decode(&raw)?;
        Ok(Self {
            number: fields.number,
            title: fields.title,
            due_on: fields.due_on,
            raw,
        })
    }
}

#[derive(Debug, Clone)]
pub struct Issue {
    pub number: i64,
    pub title: String,
    pub open: bool,
    pub labels: Vec<Label>,
    pub updated_at: DateTime<Utc>,
    pub events_url: Option<String>,
    pub raw: Value,
}

#[derive(Deserialize)]
struct IssueFields {
    number: i64,
    title: String,
    state: String,
    #[serde(default)]
    labels: Vec<Label>,
    updated_at: DateTime<Utc>,
    #[serde(default)]
    events_url: Option<String>,
}

impl Issue {
    pub fn from_value(raw: Value) -> Result<Self, GitHubError> {
        let fields: IssueFields = decode(&raw)?;
        Ok(Self {
            number: fields.number,
            title: fields.title,
            open: fields.state == "open",
            labels: fields.labels,
            updated_at: fields.updated_at,
            events_url: fields.events_url,
            raw,
        })
    }

    pub fn label_names(&self) -> impl Iterator<Item = &str> {
        self.labels.iter().map(|l| l.name.as_str())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Actor {
    pub login: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IssueEvent {
    pub event: String,
    #[serde(default)]
    pub actor: Option<Actor>,
    #[serde(default)]
    pub label: Option<Label>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Organization {
    pub login: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitHubUser {
    pub login: String,
}

#[derive(Deserialize)]
struct AccessTokenResponse {
    access_token: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

/// The URL of the `rel="next"` entry of a `Link` header, if any.
pub fn next_page_url(link_header: &str) -> Option<String> {
    link_header.split(',').find_map(|entry| {
        let mut parts = entry.split(';');
        let target = parts.next()?.trim();
        let is_next = parts.any(|param| param.trim() == r#"rel="next""#);
        if !is_next {
            return None;
        }
        target
            .strip_prefix('<')
            .and_then(|t| t.strip_suffix('>'))
            .map(str::to_string)
    })
}

/// Whether a milestone due at `due_on` is within `window_days` of `now`.
/// The difference is counted in whole days, rounded towards the past, so a
/// milestone due one hour ago is one day away.
pub fn is_within_window(due_on: DateTime<Utc>, now: DateTime<Utc>, window_days: i64) -> bool {
    let days = (due_on - now).num_seconds().div_euclid(86_400);
    days.abs() <= window_days
}

enum Credentials<'a> {
    /// The service token, sent as basic auth.
    Service,
    /// A user's OAuth token.
    User(&'a str),
}

#[derive(Clone)]
pub struct GitHubClient {
    http: Client,
    api_url: String,
    web_url: String,
    token: Option<Arc<SecretString>>,
}

impl std::fmt::Debug for GitHubClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHubClient")
            .field("api_url", &self.api_url)
            .field("web_url", &self.web_url)
            .field("token", &self.token.as_ref().map(|_| "<secret>"))
            .finish()
    }
}

impl GitHubClient {
    const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

    pub fn new(
        api_url: &str,
        web_url: &str,
        token: Option<Arc<SecretString>>,
    ) -> Result<Self, GitHubError> {
        let http = Client::builder()
            .timeout(Self::REQUEST_TIMEOUT)
            .user_agent(concat!("sprints/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(map_reqwest_error)?;

        Ok(Self {
            http,
            api_url: api_url.trim_end_matches('/').to_string(),
            web_url: web_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    pub fn has_token(&self) -> bool {
        self.token.is_some()
    }

    fn api(&self, path: &str, params: &[(&str, &str)]) -> Result<Url, GitHubError> {
        Ok(Url::parse_with_params(
            &format!("{}{}", self.api_url, path),
            params,
        )?)
    }

    fn authorize(&self, request: RequestBuilder, credentials: &Credentials<'_>) -> RequestBuilder {
        let request = request.header(header::ACCEPT, "application/vnd.github+json");
        match credentials {
            Credentials::Service => match &self.token {
                Some(token) => request.basic_auth(token.expose_secret(), Some("x-oauth-basic")),
                None => request,
            },
            Credentials::User(token) => {
                request.header(header::AUTHORIZATION, format!("token {token}"))
            }
        }
    }

    async fn send(
        &self,
        url: &str,
        credentials: &Credentials<'_>,
    ) -> Result<reqwest::Response, GitHubError> {
        tracing::debug!(url = %url, "GitHub GET");
        let response = self
            .authorize(self.http.get(url), credentials)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        tracing::warn!(status = status.as_u16(), url = %url, "GitHub returned error");
        Err(GitHubError::Status {
            status: status.as_u16(),
            body,
        })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        credentials: &Credentials<'_>,
    ) -> Result<T, GitHubError> {
        self.send(url, credentials)
            .await?
            .json::<T>()
            .await
            .map_err(|e| GitHubError::Decode(e.to_string()))
    }

    /// Every item of a list endpoint, following `Link: rel="next"`.
    async fn get_all_pages(
        &self,
        first: Url,
        credentials: &Credentials<'_>,
    ) -> Result<Vec<Value>, GitHubError> {
        let mut items = Vec::new();
        let mut next = Some(first.to_string());

        while let Some(url) = next.take() {
            let response = self.send(&url, credentials).await?;
            next = response
                .headers()
                .get(header::LINK)
                .and_then(|v| v.to_str().ok())
                .and_then(next_page_url);

            let page: Vec<Value> = response
                .json()
                .await
                .map_err(|e| GitHubError::Decode(e.to_string()))?;
            items.extend(page);
        }

        Ok(items)
    }

    pub async fn list_milestones(&self, repo: &str) -> Result<Vec<Milestone>, GitHubError> {
        let url = self.api(&format!("/repos/{repo}/milestones"), &[("state", "all")])?;
        self.get_all_pages(url, &Credentials::Service)
            .await?
            .into_iter()
            .map(Milestone::from_value)
            .collect()
    }

    /// Milestones with a due date within `window_days` of `now`.
    pub async fn recent_milestones(
        &self,
        repo: &str,
        now: DateTime<Utc>,
        window_days: i64,
    ) -> Result<Vec<Milestone>, GitHubError> {
        let milestones = self.list_milestones(repo).await?;
        Ok(milestones
            .into_iter()
            .filter(|m| {
                m.due_on
                    .is_some_and(|due_on| is_within_window(due_on, now, window_days))
            })
            .collect())
    }

    pub async fn list_issues(
        &self,
        repo: &str,
        milestone_number: i64,
    ) -> Result<Vec<Issue>, GitHubError> {
        let milestone = milestone_number.to_string();
        let url = self.api(
            &format!("/repos/{repo}/issues"),
            &[("state", "all"), ("milestone", milestone.as_str())],
        )?;
        self.get_all_pages(url, &Credentials::Service)
            .await?
            .into_iter()
            .map(Issue::from_value)
            .collect()
    }

    pub async fn list_labels(&self, repo: &str) -> Result<Vec<Label>, GitHubError> {
        let url = self.api(&format!("/repos/{repo}/labels"), &[])?;
        self.get_all_pages(url, &Credentials::Service)
            .await?
            .iter()
            .map(decode)
            .collect()
    }

    pub async fn list_issue_events(&self, events_url: &str) -> Result<Vec<IssueEvent>, GitHubError> {
        let url = Url::parse(events_url)?;
        self.get_all_pages(url, &Credentials::Service)
            .await?
            .iter()
            .map(decode)
            .collect()
    }

    pub async fn user_orgs(&self, user_token: &str) -> Result<Vec<Organization>, GitHubError> {
        let url = self.api("/user/orgs", &[])?;
        self.get_all_pages(url, &Credentials::User(user_token))
            .await?
            .iter()
            .map(decode)
            .collect()
    }

    pub async fn current_user(&self, user_token: &str) -> Result<GitHubUser, GitHubError> {
        let url = self.api("/user", &[])?;
        self.get_json(url.as_str(), &Credentials::User(user_token))
            .await
    }

    /// The page a browser is sent to in order to start the OAuth flow.
    pub fn authorize_url(
        &self,
        client_id: &str,
        redirect_uri: &str,
        state: &str,
    ) -> Result<Url, GitHubError> {
        Ok(Url::parse_with_params(
            &format!("{}/login/oauth/authorize", self.web_url),
            &[
                ("client_id", client_id),
                ("redirect_uri", redirect_uri),
                ("scope", "read:org"),
                ("state", state),
            ],
        )?)
    }

    /// Trade an OAuth `code` for the user's access token.
    pub async fn exchange_code(
        &self,
        client_id: &str,
        client_secret: &SecretString,
        code: &str,
    ) -> Result<String, GitHubError> {
        let url = format!("{}/login/oauth/access_token", self.web_url);
        let response = self
            .http
            .post(&url)
            .header(header::ACCEPT, "application/json")
            .query(&[
                ("client_id", client_id),
                ("client_secret", client_secret.expose_secret()),
                ("code", code),
            ])
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GitHubError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let token: AccessTokenResponse = response
            .json()
            .await
            .map_err(|e| GitHubError::Decode(e.to_string()))?;
        match (token.access_token, token.error) {
            (Some(access_token), None) => Ok(access_token),
            (_, error) => Err(GitHubError::OAuth(
                token
                    .error_description
                    .or(error)
                    .unwrap_or_else(|| "no access token returned".to_string()),
            )),
        }
    }
}

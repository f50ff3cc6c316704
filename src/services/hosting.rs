//! Source Hosting Client
//!
//! Fetches the latest commit of a (repository, branch) pair from GitHub,
//! GitLab or Gitea over their JSON APIs. Responses are capped at 1 MiB;
//! transient failures are retried with a fixed delay, client errors
//! (4xx) are surfaced immediately since bad credentials or a missing
//! branch will not self-heal.

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::header;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::{Platform, RepoRef};
use crate::models::{short_fingerprint, CommitInfo};

/// Response body cap; anything larger fails the probe as malformed
const MAX_RESPONSE_BYTES: usize = 1024 * 1024;

/// Retry budget for non-4xx failures
const MAX_RETRIES: u32 = 3;

/// Fixed delay between retries
const RETRY_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum HostingError {
    /// 4xx response: bad credentials, missing repository or branch
    #[error("hosting API rejected the request (status {status}): {message}")]
    AuthOrNotFound { status: u16, message: String },

    /// 5xx or transport failure; retried before being surfaced
    #[error("transient hosting failure: {0}")]
    Transient(String),

    /// Undecodable or oversized response body
    #[error("malformed hosting response: {0}")]
    MalformedResponse(String),

    /// Repository URL does not carry the expected host/owner/name shape
    #[error("repository URL not in a recognized form: {0}")]
    InvalidUrl(String),

    /// HTTP client could not be constructed
    #[error("failed to construct HTTP client: {0}")]
    Client(String),
}

impl HostingError {
    /// Only transient and decode failures are worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::MalformedResponse(_))
    }
}

/// Shared HTTP client for all hosting platforms. Cloning is cheap; the
/// underlying connection pool is shared.
#[derive(Debug, Clone)]
pub struct HostingClient {
    client: reqwest::Client,
}

impl HostingClient {
    /// Build a client with the given overall per-request timeout.
    pub fn new(timeout: Duration) -> Result<Self, HostingError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| HostingError::Client(err.to_string()))?;
        Ok(Self { client })
    }

    /// Fetch the latest commit on a branch, retrying transient failures
    /// up to the fixed budget. 4xx responses fail immediately.
    pub async fn latest_commit(
        &self,
        repo: RepoRef<'_>,
        branch: &str,
    ) -> Result<CommitInfo, HostingError> {
        let mut attempt = 0;
        loop {
            match self.fetch(repo, branch).await {
                Ok(commit) => {
                    debug!(
                        url = repo.url,
                        branch,
                        sha = short_fingerprint(&commit.sha),
                        "probe succeeded"
                    );
                    return Ok(commit);
                }
                Err(err) if err.is_retryable() && attempt < MAX_RETRIES => {
                    attempt += 1;
                    warn!(
                        url = repo.url,
                        branch,
                        attempt,
                        max_retries = MAX_RETRIES,
                        error = %err,
                        "retrying hosting API call"
                    );
                    tokio::time::sleep(RETRY_DELAY).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn fetch(&self, repo: RepoRef<'_>, branch: &str) -> Result<CommitInfo, HostingError> {
        let request = match repo.platform {
            Platform::Github => self.github_request(repo, branch)?,
            Platform::Gitlab => self.gitlab_request(repo, branch)?,
            Platform::Gitea => self.gitea_request(repo, branch)?,
        };

        let response = request
            .send()
            .await
            .map_err(|err| HostingError::Transient(format!("HTTP request failed: {err}")))?;

        let status = response.status();
        if status.is_client_error() {
            let body = read_capped(response).await.unwrap_or_default();
            return Err(HostingError::AuthOrNotFound {
                status: status.as_u16(),
                message: error_snippet(&body),
            });
        }
        if !status.is_success() {
            return Err(HostingError::Transient(format!(
                "hosting API returned status {status}"
            )));
        }

        let body = read_capped(response).await?;
        match repo.platform {
            // Gitea's commit payload mirrors the GitHub shape.
            Platform::Github | Platform::Gitea => {
                let commit: GitHubCommit = serde_json::from_slice(&body)
                    .map_err(|err| HostingError::MalformedResponse(err.to_string()))?;
                Ok(CommitInfo {
                    sha: commit.sha,
                    message: commit.commit.message,
                    author: commit.commit.author.name,
                    timestamp: commit.commit.author.date,
                    url: commit.html_url,
                })
            }
            Platform::Gitlab => {
                let commit: GitLabCommit = serde_json::from_slice(&body)
                    .map_err(|err| HostingError::MalformedResponse(err.to_string()))?;
                Ok(CommitInfo {
                    sha: commit.id,
                    message: commit.title,
                    author: commit.author_name,
                    timestamp: commit.created_at,
                    url: commit.web_url,
                })
            }
        }
    }

    fn github_request(
        &self,
        repo: RepoRef<'_>,
        branch: &str,
    ) -> Result<reqwest::RequestBuilder, HostingError> {
        let (owner, name) = owner_and_repo(repo.url)?;
        let url = format!("https://api.github.com/repos/{owner}/{name}/commits/{branch}");
        Ok(self
            .client
            .get(url)
            .header(header::AUTHORIZATION, format!("token {}", repo.auth.token))
            .header(header::ACCEPT, "application/vnd.github.v3+json"))
    }

    fn gitlab_request(
        &self,
        repo: RepoRef<'_>,
        branch: &str,
    ) -> Result<reqwest::RequestBuilder, HostingError> {
        let (base, project_path) = base_and_path(repo.url)?;
        let encoded = project_path.replace('/', "%2F");
        let url = format!("{base}/api/v4/projects/{encoded}/repository/commits/{branch}");
        Ok(self
            .client
            .get(url)
            .header(header::AUTHORIZATION, format!("Bearer {}", repo.auth.token)))
    }

    fn gitea_request(
        &self,
        repo: RepoRef<'_>,
        branch: &str,
    ) -> Result<reqwest::RequestBuilder, HostingError> {
        let (base, _) = base_and_path(repo.url)?;
        let (owner, name) = owner_and_repo(repo.url)?;
        let url = format!("{base}/api/v1/repos/{owner}/{name}/commits/{branch}");
        Ok(self
            .client
            .get(url)
            .header(header::AUTHORIZATION, format!("token {}", repo.auth.token)))
    }
}

/// Read a response body, failing once the 1 MiB cap is exceeded.
async fn read_capped(mut response: reqwest::Response) -> Result<Vec<u8>, HostingError> {
    let mut body = Vec::new();
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|err| HostingError::Transient(format!("failed to read response body: {err}")))?
    {
        if body.len() + chunk.len() > MAX_RESPONSE_BYTES {
            return Err(HostingError::MalformedResponse(format!(
                "response body exceeds {MAX_RESPONSE_BYTES} byte cap"
            )));
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body)
}

/// Short printable slice of an error body for diagnostics.
fn error_snippet(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    let trimmed = text.trim();
    let mut snippet: String = trimmed.chars().take(200).collect();
    if snippet.len() < trimmed.len() {
        snippet.push_str("...");
    }
    snippet
}

/// Extract the trailing `owner/name` pair from a repository URL.
fn owner_and_repo(url: &str) -> Result<(&str, &str), HostingError> {
    let trimmed = url.trim_end_matches('/');
    let rest = trimmed
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(trimmed);

    let mut segments = rest.rsplit('/');
    let name = segments.next().filter(|segment| !segment.is_empty());
    let owner = segments.next().filter(|segment| !segment.is_empty());
    match (owner, name) {
        (Some(owner), Some(name)) => Ok((owner, name)),
        _ => Err(HostingError::InvalidUrl(url.to_string())),
    }
}

/// Split a repository URL into `scheme://host` and the project path.
fn base_and_path(url: &str) -> Result<(String, String), HostingError> {
    let trimmed = url.trim_end_matches('/');
    let (scheme, rest) = trimmed
        .split_once("://")
        .ok_or_else(|| HostingError::InvalidUrl(url.to_string()))?;
    let (host, path) = rest
        .split_once('/')
        .ok_or_else(|| HostingError::InvalidUrl(url.to_string()))?;
    if host.is_empty() || path.is_empty() {
        return Err(HostingError::InvalidUrl(url.to_string()));
    }
    Ok((format!("{scheme}://{host}"), path.to_string()))
}

#[derive(Debug, Deserialize)]
struct GitHubCommit {
    sha: String,
    commit: GitHubCommitDetail,
    html_url: String,
}

#[derive(Debug, Deserialize)]
struct GitHubCommitDetail {
    message: String,
    author: GitHubCommitAuthor,
}

#[derive(Debug, Deserialize)]
struct GitHubCommitAuthor {
    name: String,
    date: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct GitLabCommit {
    id: String,
    title: String,
    author_name: String,
    created_at: DateTime<Utc>,
    web_url: String,
}

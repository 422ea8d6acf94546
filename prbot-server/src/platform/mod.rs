//! The hosted-platform seam.
//!
//! Everything the command handlers know about GitHub or GitLab goes through
//! [`PlatformClient`]. A client is bound to one pull request; the
//! [`PlatformFactory`] builds one per job.

pub mod github;
pub mod gitlab;
pub mod middleware;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use prbot_core::{
    CheckRun, Comment, Commit, Issue, IssueSearch, ItemState, MergeMethod, ParseEnumError,
    Permission, PermissionSet, PullRequest, Review,
};
use reqwest::Client;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use thiserror::Error;

use crate::config::Config;
pub use github::GitHubClient;
pub use gitlab::GitLabClient;
pub use middleware::{RequestIdMiddleware, REQUEST_ID_HEADER};

#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("platform API returned {status}: {message}")]
    Api { status: u16, message: String },
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest_middleware::Error),
    #[error("failed to decode response: {0}")]
    Decode(String),
    #[error("{0} is not supported on this platform")]
    Unsupported(&'static str),
    #[error("git: {0}")]
    Git(String),
}

impl PlatformError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

pub type PlatformResult<T> = Result<T, PlatformError>;

/// Closed set of supported platforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Platform {
    GitHub,
    GitLab,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GitHub => "github",
            Self::GitLab => "gitlab",
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            Self::GitHub => "https://api.github.com",
            Self::GitLab => "https://gitlab.com/api/v4",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "github" => Ok(Self::GitHub),
            "gitlab" => Ok(Self::GitLab),
            other => Err(ParseEnumError::new("platform", other)),
        }
    }
}

/// The pull request a client is bound to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PrTarget {
    pub owner: String,
    pub repo: String,
    pub number: u64,
}

impl PrTarget {
    pub fn new(owner: impl Into<String>, repo: impl Into<String>, number: u64) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
            number,
        }
    }

    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }
}

impl fmt::Display for PrTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}#{}", self.owner, self.repo, self.number)
    }
}

/// Fresh PR state, as opposed to the snapshot taken when a job starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrStatus {
    pub state: ItemState,
    pub merged: bool,
    pub draft: bool,
}

#[async_trait]
pub trait PlatformClient: Send + Sync {
    fn target(&self) -> &PrTarget;

    async fn get_pr(&self) -> PlatformResult<PullRequest>;
    async fn check_pr_status(&self) -> PlatformResult<PrStatus>;

    async fn post_comment(&self, body: &str) -> PlatformResult<()>;
    async fn get_comments(&self) -> PlatformResult<Vec<Comment>>;

    async fn get_reviews(&self) -> PlatformResult<Vec<Review>>;
    async fn approve_pr(&self, body: &str) -> PlatformResult<()>;
    /// Dismiss approvals previously submitted by this service.
    async fn dismiss_approve(&self, message: &str) -> PlatformResult<()>;

    async fn get_requested_reviewers(&self) -> PlatformResult<Vec<String>>;
    async fn assign_reviewers(&self, users: &[String]) -> PlatformResult<()>;
    async fn remove_reviewers(&self, users: &[String]) -> PlatformResult<()>;

    async fn get_user_permission(&self, user: &str) -> PlatformResult<Permission>;
    async fn check_user_permissions(
        &self,
        user: &str,
        allowed: &PermissionSet,
    ) -> PlatformResult<bool> {
        Ok(allowed.contains(self.get_user_permission(user).await?))
    }

    /// Check runs for the PR head commit.
    async fn check_runs_status(&self) -> PlatformResult<Vec<CheckRun>>;
    async fn get_workflow_run_ids_from_check_suite(&self, suite_id: u64)
        -> PlatformResult<Vec<u64>>;
    async fn rerun_workflow_run_failed_jobs(&self, run_id: u64) -> PlatformResult<()>;

    async fn merge_pr(&self, method: MergeMethod) -> PlatformResult<()>;
    async fn rebase_pr(&self) -> PlatformResult<()>;
    async fn close_pr(&self) -> PlatformResult<()>;
    async fn get_available_merge_methods(&self) -> PlatformResult<Vec<MergeMethod>>;
    async fn get_commits(&self) -> PlatformResult<Vec<Commit>>;

    async fn get_labels(&self) -> PlatformResult<Vec<String>>;
    async fn add_labels(&self, labels: &[String]) -> PlatformResult<()>;
    async fn remove_labels(&self, labels: &[String]) -> PlatformResult<()>;

    async fn get_issue(&self, number: u64) -> PlatformResult<Issue>;
    async fn update_issue_body(&self, number: u64, body: &str) -> PlatformResult<()>;
    async fn find_issue(&self, search: &IssueSearch) -> PlatformResult<Option<Issue>>;
    async fn update_pr_body(&self, body: &str) -> PlatformResult<()>;

    /// Create `name` pointing at the head of branch `base`.
    async fn create_branch(&self, name: &str, base: &str) -> PlatformResult<()>;
    /// `Ok(false)` when the branch does not exist.
    async fn branch_exists(&self, name: &str) -> PlatformResult<bool>;
    /// Replay one commit on top of `branch`; returns the new commit SHA.
    async fn cherry_pick_commit(&self, sha: &str, branch: &str) -> PlatformResult<String>;
    async fn create_pr(
        &self,
        title: &str,
        body: &str,
        head: &str,
        base: &str,
    ) -> PlatformResult<PullRequest>;

    async fn dispatch_workflow(
        &self,
        workflow_file: &str,
        git_ref: &str,
        inputs: &BTreeMap<String, String>,
    ) -> PlatformResult<()>;
}

/// Builds a client bound to one pull request.
pub trait PlatformFactory: Send + Sync {
    fn client(
        &self,
        target: &PrTarget,
        request_id: Option<&str>,
    ) -> PlatformResult<Arc<dyn PlatformClient>>;
}

/// Credentials shared by every client a factory builds.
#[derive(Clone)]
pub struct Credentials {
    pub token: String,
    pub comment_token: Option<String>,
}

/// Factory for the real HTTP clients.
#[derive(Clone)]
pub struct HttpPlatformFactory {
    platform: Platform,
    base_url: String,
    credentials: Credentials,
    http: ClientWithMiddleware,
}

impl HttpPlatformFactory {
    pub fn new(
        platform: Platform,
        base_url: Option<String>,
        credentials: Credentials,
    ) -> PlatformResult<Self> {
        Ok(Self {
            platform,
            base_url: base_url.unwrap_or_else(|| platform.default_base_url().to_string()),
            credentials,
            http: create_http_client()?,
        })
    }

    pub fn from_config(config: &Config) -> PlatformResult<Self> {
        Self::new(
            config.platform,
            config.base_url.clone(),
            Credentials {
                token: config.token.clone(),
                comment_token: config.comment_token.clone(),
            },
        )
    }
}

impl PlatformFactory for HttpPlatformFactory {
    fn client(
        &self,
        target: &PrTarget,
        request_id: Option<&str>,
    ) -> PlatformResult<Arc<dyn PlatformClient>> {
        let request_id = request_id.map(str::to_string);
        Ok(match self.platform {
            Platform::GitHub => Arc::new(GitHubClient::new(
                self.http.clone(),
                self.base_url.clone(),
                self.credentials.clone(),
                target.clone(),
                request_id,
            )),
            Platform::GitLab => Arc::new(GitLabClient::new(
                self.http.clone(),
                self.base_url.clone(),
                self.credentials.clone(),
                target.clone(),
                request_id,
            )),
        })
    }
}

pub fn create_http_client() -> PlatformResult<ClientWithMiddleware> {
    let client = Client::builder()
        .user_agent(concat!("prbot/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| PlatformError::Http(e.into()))?;

    Ok(ClientBuilder::new(client)
        .with(RequestIdMiddleware)
        .build())
}

/// Read an error response into [`PlatformError`].
pub(crate) async fn error_from_response(response: reqwest::Response, what: &str) -> PlatformError {
    let status = response.status();
    let message = response
        .text()
        .await
        .unwrap_or_else(|e| format!("<failed to read body: {}>", e));
    if status == reqwest::StatusCode::NOT_FOUND {
        PlatformError::NotFound(what.to_string())
    } else {
        PlatformError::Api {
            status: status.as_u16(),
            message,
        }
    }
}

//! Webhook payloads from GitHub and GitLab, reduced to the events the bot acts
//! on.

use std::collections::BTreeMap;

use prbot_core::command::is_command;
use serde::Deserialize;
use thiserror::Error;

use crate::config::PrEventConfig;
use crate::handler::CommandJob;
use crate::platform::{Platform, PrTarget};

#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("malformed payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("payload has no {0}")]
    Missing(&'static str),
}

/// A pull request event that triggers a workflow dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrEvent {
    pub target: PrTarget,
    pub action: String,
    pub head_ref: String,
    pub head_sha: String,
    pub base_ref: String,
    pub sender: String,
    pub event_id: Option<String>,
}

impl PrEvent {
    /// Dispatch inputs: the configured static inputs, overridden by the
    /// event's own keys.
    pub fn inputs(&self, statics: &BTreeMap<String, String>) -> BTreeMap<String, String> {
        let mut inputs = statics.clone();
        inputs.extend([
            ("pr_number".to_string(), self.target.number.to_string()),
            ("pr_action".to_string(), self.action.clone()),
            ("head_ref".to_string(), self.head_ref.clone()),
            ("head_sha".to_string(), self.head_sha.clone()),
            ("base_ref".to_string(), self.base_ref.clone()),
            ("sender".to_string(), self.sender.clone()),
        ]);
        inputs
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookEvent {
    Comment(CommandJob),
    PullRequest(PrEvent),
}

impl WebhookEvent {
    pub fn target(&self) -> &PrTarget {
        match self {
            Self::Comment(job) => &job.target,
            Self::PullRequest(event) => &event.target,
        }
    }
}

/// What to do with a delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Event(WebhookEvent),
    /// Valid but not for us; answered with 200 and the reason.
    Skipped(String),
}

fn skip(reason: impl Into<String>) -> Result<Delivery, PayloadError> {
    Ok(Delivery::Skipped(reason.into()))
}

/// Repository the payload belongs to, as `owner/name`, when it names one.
pub fn repository(platform: Platform, body: &[u8]) -> Option<String> {
    match platform {
        Platform::GitHub => serde_json::from_slice::<GhRepoOnly>(body)
            .ok()
            .and_then(|p| p.repository)
            .map(|r| r.full_name),
        Platform::GitLab => serde_json::from_slice::<GlProjectOnly>(body)
            .ok()
            .and_then(|p| p.project)
            .map(|p| p.path_with_namespace),
    }
}

pub fn parse(
    platform: Platform,
    event: &str,
    body: &[u8],
    event_id: &str,
    pr_events: Option<&PrEventConfig>,
) -> Result<Delivery, PayloadError> {
    match platform {
        Platform::GitHub => parse_github(event, body, event_id, pr_events),
        Platform::GitLab => parse_gitlab(event, body, event_id, pr_events),
    }
}

#[derive(Deserialize)]
struct GhRepoOnly {
    repository: Option<GhRepository>,
}

#[derive(Deserialize)]
struct GhRepository {
    name: String,
    full_name: String,
    owner: GhUser,
}

#[derive(Deserialize)]
struct GhUser {
    login: String,
}

#[derive(Deserialize)]
struct GhIssueCommentPayload {
    action: String,
    issue: GhIssue,
    comment: GhComment,
    repository: GhRepository,
}

#[derive(Deserialize)]
struct GhIssue {
    number: u64,
    pull_request: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct GhComment {
    body: Option<String>,
    user: GhUser,
}

#[derive(Deserialize)]
struct GhPullRequestPayload {
    action: String,
    number: u64,
    pull_request: GhPullRequest,
    repository: GhRepository,
    sender: GhUser,
}

#[derive(Deserialize)]
struct GhPullRequest {
    #[serde(default)]
    draft: bool,
    head: GhRef,
    base: GhRef,
}

#[derive(Deserialize)]
struct GhRef {
    #[serde(rename = "ref")]
    ref_name: String,
    sha: String,
}

fn parse_github(
    event: &str,
    body: &[u8],
    event_id: &str,
    pr_events: Option<&PrEventConfig>,
) -> Result<Delivery, PayloadError> {
    match event {
        "issue_comment" => {
            let payload: GhIssueCommentPayload = serde_json::from_slice(body)?;
            if payload.action != "created" {
                return skip(format!("comment action {} ignored", payload.action));
            }
            if payload.issue.pull_request.is_none() {
                return skip("comment is not on a pull request");
            }
            let body = payload.comment.body.unwrap_or_default();
            if !is_command(&body) {
                return skip("comment is not a command");
            }
            Ok(Delivery::Event(WebhookEvent::Comment(CommandJob {
                target: PrTarget::new(
                    payload.repository.owner.login,
                    payload.repository.name,
                    payload.issue.number,
                ),
                commenter: payload.comment.user.login,
                body,
                event_id: Some(event_id.to_string()),
            })))
        }
        "pull_request" => {
            let Some(pr_events) = pr_events else {
                return skip("pull request events are disabled");
            };
            let payload: GhPullRequestPayload = serde_json::from_slice(body)?;
            pr_event(
                pr_events,
                payload.pull_request.draft,
                PrEvent {
                    target: PrTarget::new(
                        payload.repository.owner.login,
                        payload.repository.name,
                        payload.number,
                    ),
                    action: payload.action,
                    head_ref: payload.pull_request.head.ref_name,
                    head_sha: payload.pull_request.head.sha,
                    base_ref: payload.pull_request.base.ref_name,
                    sender: payload.sender.login,
                    event_id: Some(event_id.to_string()),
                },
            )
        }
        "ping" => skip("ping"),
        other => skip(format!("event {} ignored", other)),
    }
}

/// Apply the action allow-set and the draft rule.
fn pr_event(config: &PrEventConfig, draft: bool, event: PrEvent) -> Result<Delivery, PayloadError> {
    if !config.actions.iter().any(|a| a == &event.action) {
        return skip(format!("pull request action {} ignored", event.action));
    }
    if draft && event.action != "ready_for_review" {
        return skip("pull request is a draft");
    }
    Ok(Delivery::Event(WebhookEvent::PullRequest(event)))
}

#[derive(Deserialize)]
struct GlProjectOnly {
    project: Option<GlProject>,
}

#[derive(Deserialize)]
struct GlProject {
    path_with_namespace: String,
}

#[derive(Deserialize)]
struct GlUser {
    username: String,
}

#[derive(Deserialize)]
struct GlNotePayload {
    user: GlUser,
    project: GlProject,
    object_attributes: GlNote,
    merge_request: Option<GlMergeRequestRef>,
}

#[derive(Deserialize)]
struct GlNote {
    note: String,
    noteable_type: String,
    action: Option<String>,
}

#[derive(Deserialize)]
struct GlMergeRequestRef {
    iid: u64,
}

#[derive(Deserialize)]
struct GlMergeRequestPayload {
    user: GlUser,
    project: GlProject,
    object_attributes: GlMergeRequest,
}

#[derive(Deserialize)]
struct GlMergeRequest {
    iid: u64,
    action: Option<String>,
    source_branch: String,
    target_branch: String,
    #[serde(default)]
    draft: bool,
    #[serde(default)]
    work_in_progress: bool,
    last_commit: Option<GlCommit>,
}

#[derive(Deserialize)]
struct GlCommit {
    id: String,
}

/// `group/sub/project` is owner `group/sub`, repo `project`.
fn gitlab_target(path: &str, iid: u64) -> PrTarget {
    match path.rsplit_once('/') {
        Some((owner, repo)) => PrTarget::new(owner, repo, iid),
        None => PrTarget::new("", path, iid),
    }
}

/// GitLab merge request actions in GitHub's vocabulary.
fn gitlab_action(action: &str) -> String {
    match action {
        "open" => "opened",
        "reopen" => "reopened",
        "update" => "synchronize",
        "close" => "closed",
        "merge" => "merged",
        other => other,
    }
    .to_string()
}

fn parse_gitlab(
    event: &str,
    body: &[u8],
    event_id: &str,
    pr_events: Option<&PrEventConfig>,
) -> Result<Delivery, PayloadError> {
    match event {
        "Note Hook" => {
            let payload: GlNotePayload = serde_json::from_slice(body)?;
            let note = payload.object_attributes;
            if note.action.as_deref().is_some_and(|a| a != "create") {
                return skip("note action ignored");
            }
            if note.noteable_type != "MergeRequest" {
                return skip("comment is not on a merge request");
            }
            let merge_request = payload
                .merge_request
                .ok_or(PayloadError::Missing("merge_request"))?;
            if !is_command(&note.note) {
                return skip("comment is not a command");
            }
            Ok(Delivery::Event(WebhookEvent::Comment(CommandJob {
                target: gitlab_target(&payload.project.path_with_namespace, merge_request.iid),
                commenter: payload.user.username,
                body: note.note,
                event_id: Some(event_id.to_string()),
            })))
        }
        "Merge Request Hook" => {
            let Some(pr_events) = pr_events else {
                return skip("merge request events are disabled");
            };
            let payload: GlMergeRequestPayload = serde_json::from_slice(body)?;
            let mr = payload.object_attributes;
            let action = gitlab_action(mr.action.as_deref().unwrap_or(""));
            pr_event(
                pr_events,
                mr.draft || mr.work_in_progress,
                PrEvent {
                    target: gitlab_target(&payload.project.path_with_namespace, mr.iid),
                    action,
                    head_ref: mr.source_branch,
                    head_sha: mr.last_commit.map(|c| c.id).unwrap_or_default(),
                    base_ref: mr.target_branch,
                    sender: payload.user.username,
                    event_id: Some(event_id.to_string()),
                },
            )
        }
        other => skip(format!("event {} ignored", other)),
    }
}

/// Whether `full_name` passes the allow-list. An empty list allows all.
pub fn repo_allowed(allowed: &[String], full_name: &str) -> bool {
    if allowed.is_empty() {
        return true;
    }
    let full_name = full_name.to_lowercase();
    allowed.iter().any(|pattern| {
        let pattern = pattern.to_lowercase();
        match pattern.strip_suffix("/*") {
            _ if pattern == "*" => true,
            Some(owner) => full_name
                .rsplit_once('/')
                .is_some_and(|(repo_owner, _)| repo_owner == owner),
            None => pattern == full_name,
        }
    })
}

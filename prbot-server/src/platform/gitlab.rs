use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use prbot_core::{
    CheckConclusion, CheckRun, CheckStatus, Comment, Commit, GitRef, Issue, IssueSearch,
    ItemState, MergeMethod, Permission, PullRequest, Review, ReviewState,
};
use reqwest::Method;
use reqwest_middleware::{ClientWithMiddleware, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use super::{
    error_from_response, Credentials, PlatformClient, PlatformError, PlatformResult, PrStatus,
    PrTarget, REQUEST_ID_HEADER,
};

const PAGE_SIZE: usize = 100;

/// GitLab REST v4 client bound to one merge request.
///
/// Merge requests are addressed by their project-scoped `iid`; the project by
/// its URL-encoded `owner/repo` path.
#[derive(Clone)]
pub struct GitLabClient {
    http: ClientWithMiddleware,
    base_url: String,
    credentials: Credentials,
    target: PrTarget,
    request_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UserWire {
    id: u64,
    username: String,
}

#[derive(Debug, Deserialize)]
struct MergeRequestWire {
    iid: u64,
    title: String,
    description: Option<String>,
    state: String,
    #[serde(default)]
    draft: bool,
    author: UserWire,
    web_url: String,
    source_branch: String,
    target_branch: String,
    sha: Option<String>,
    diff_refs: Option<DiffRefsWire>,
    #[serde(default)]
    reviewers: Vec<UserWire>,
    #[serde(default)]
    labels: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct DiffRefsWire {
    base_sha: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NoteWire {
    id: u64,
    body: String,
    author: UserWire,
    created_at: DateTime<Utc>,
    #[serde(default)]
    system: bool,
}

#[derive(Debug, Deserialize)]
struct ApprovalsWire {
    #[serde(default)]
    approved_by: Vec<ApproverWire>,
    updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct ApproverWire {
    user: UserWire,
}

#[derive(Debug, Deserialize)]
struct MemberWire {
    access_level: u32,
}

#[derive(Debug, Deserialize)]
struct PipelineWire {
    id: u64,
}

#[derive(Debug, Deserialize)]
struct JobWire {
    name: String,
    stage: String,
    status: String,
    web_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProjectWire {
    merge_method: Option<String>,
    squash_option: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CommitWire {
    id: String,
    message: String,
    author_name: String,
}

#[derive(Debug, Deserialize)]
struct IssueWire {
    iid: u64,
    title: String,
    state: String,
    author: UserWire,
    description: Option<String>,
    web_url: String,
    created_at: DateTime<Utc>,
    #[serde(default)]
    labels: Vec<String>,
}

impl MergeRequestWire {
    fn into_model(self, target: &PrTarget) -> PlatformResult<PullRequest> {
        let merged = self.state == "merged";
        Ok(PullRequest {
            owner: target.owner.clone(),
            repo: target.repo.clone(),
            number: self.iid,
            title: self.title,
            body: self.description.unwrap_or_default(),
            state: parse_state(&self.state)?,
            merged,
            author: self.author.username,
            url: self.web_url,
            head: GitRef {
                branch: self.source_branch,
                sha: self.sha.unwrap_or_default(),
            },
            base: GitRef {
                branch: self.target_branch,
                sha: self
                    .diff_refs
                    .and_then(|d| d.base_sha)
                    .unwrap_or_default(),
            },
        })
    }
}

impl IssueWire {
    fn into_model(self, target: &PrTarget) -> PlatformResult<Issue> {
        Ok(Issue {
            owner: target.owner.clone(),
            repo: target.repo.clone(),
            number: self.iid,
            title: self.title,
            state: parse_state(&self.state)?,
            author: self.author.username,
            body: self.description.unwrap_or_default(),
            url: self.web_url,
            created_at: self.created_at,
            labels: self.labels,
        })
    }
}

fn parse_state(state: &str) -> PlatformResult<ItemState> {
    state
        .parse::<ItemState>()
        .map_err(|e| PlatformError::Decode(e.to_string()))
}

/// Map a project access level onto the four-level permission scale.
fn permission_from_access_level(level: u32) -> Permission {
    match level {
        40.. => Permission::Admin,
        30..=39 => Permission::Write,
        10..=29 => Permission::Read,
        _ => Permission::None,
    }
}

/// Map a CI job status onto check-run status and conclusion.
fn job_state(status: &str) -> (CheckStatus, Option<CheckConclusion>) {
    match status {
        "running" => (CheckStatus::InProgress, None),
        "success" => (CheckStatus::Completed, Some(CheckConclusion::Success)),
        "failed" => (CheckStatus::Completed, Some(CheckConclusion::Failure)),
        "canceled" => (CheckStatus::Completed, Some(CheckConclusion::Cancelled)),
        "skipped" => (CheckStatus::Completed, Some(CheckConclusion::Skipped)),
        "manual" => (CheckStatus::Completed, Some(CheckConclusion::Neutral)),
        _ => (CheckStatus::Queued, None),
    }
}

impl GitLabClient {
    pub fn new(
        http: ClientWithMiddleware,
        base_url: String,
        credentials: Credentials,
        target: PrTarget,
        request_id: Option<String>,
    ) -> Self {
        Self {
            http,
            base_url,
            credentials,
            target,
            request_id,
        }
    }

    fn project_url(&self, path: &str) -> String {
        format!(
            "{}/projects/{}{}",
            self.base_url,
            urlencoding::encode(&self.target.full_name()),
            path
        )
    }

    fn mr_url(&self, path: &str) -> String {
        self.project_url(&format!("/merge_requests/{}{}", self.target.number, path))
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        self.request_with_token(method, url, &self.credentials.token)
    }

    fn request_with_token(&self, method: Method, url: &str, token: &str) -> RequestBuilder {
        let builder = self
            .http
            .request(method, url)
            .header("PRIVATE-TOKEN", token);
        match &self.request_id {
            Some(id) => builder.header(REQUEST_ID_HEADER, id),
            None => builder,
        }
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        builder: RequestBuilder,
        what: &str,
    ) -> PlatformResult<T> {
        let response = builder.send().await?;
        if !response.status().is_success() {
            let err = error_from_response(response, what).await;
            warn!("GitLab API error for {}: {}", what, err);
            return Err(err);
        }
        response
            .json::<T>()
            .await
            .map_err(|e| PlatformError::Decode(format!("{}: {}", what, e)))
    }

    async fn send_empty(&self, builder: RequestBuilder, what: &str) -> PlatformResult<()> {
        let response = builder.send().await?;
        if !response.status().is_success() {
            let err = error_from_response(response, what).await;
            warn!("GitLab API error for {}: {}", what, err);
            return Err(err);
        }
        Ok(())
    }

    async fn get_paginated<T: DeserializeOwned>(
        &self,
        url: &str,
        extra: &[(&str, &str)],
        what: &str,
    ) -> PlatformResult<Vec<T>> {
        let mut items = Vec::new();
        let mut page = 1usize;
        loop {
            let batch: Vec<T> = self
                .send_json(
                    self.request(Method::GET, url)
                        .query(extra)
                        .query(&[("per_page", PAGE_SIZE), ("page", page)]),
                    what,
                )
                .await?;
            let done = batch.len() < PAGE_SIZE;
            items.extend(batch);
            if done {
                return Ok(items);
            }
            page += 1;
        }
    }

    async fn get_mr(&self) -> PlatformResult<MergeRequestWire> {
        self.send_json(self.request(Method::GET, &self.mr_url("")), "merge request")
            .await
    }

    async fn user_id(&self, username: &str) -> PlatformResult<u64> {
        let users: Vec<UserWire> = self
            .send_json(
                self.request(Method::GET, &format!("{}/users", self.base_url))
                    .query(&[("username", username)]),
                "user lookup",
            )
            .await?;
        users
            .into_iter()
            .next()
            .map(|u| u.id)
            .ok_or_else(|| PlatformError::NotFound(format!("user {}", username)))
    }

    async fn set_reviewers(&self, ids: Vec<u64>) -> PlatformResult<()> {
        self.send_empty(
            self.request(Method::PUT, &self.mr_url(""))
                .json(&json!({ "reviewer_ids": ids })),
            "update reviewers",
        )
        .await
    }

    async fn update_mr(&self, body: serde_json::Value, what: &str) -> PlatformResult<()> {
        self.send_empty(self.request(Method::PUT, &self.mr_url("")).json(&body), what)
            .await
    }
}

#[async_trait]
impl PlatformClient for GitLabClient {
    fn target(&self) -> &PrTarget {
        &self.target
    }

    async fn get_pr(&self) -> PlatformResult<PullRequest> {
        info!("Fetching MR {}", self.target);
        self.get_mr().await?.into_model(&self.target)
    }

    async fn check_pr_status(&self) -> PlatformResult<PrStatus> {
        let mr = self.get_mr().await?;
        Ok(PrStatus {
            state: parse_state(&mr.state)?,
            merged: mr.state == "merged",
            draft: mr.draft,
        })
    }

    async fn post_comment(&self, body: &str) -> PlatformResult<()> {
        info!("Posting note to {}", self.target);
        let token = self
            .credentials
            .comment_token
            .as_deref()
            .unwrap_or(&self.credentials.token);
        self.send_empty(
            self.request_with_token(Method::POST, &self.mr_url("/notes"), token)
                .json(&json!({ "body": body })),
            "post note",
        )
        .await
    }

    async fn get_comments(&self) -> PlatformResult<Vec<Comment>> {
        let notes: Vec<NoteWire> = self
            .get_paginated(
                &self.mr_url("/notes"),
                &[("sort", "asc"), ("order_by", "created_at")],
                "notes",
            )
            .await?;
        Ok(notes
            .into_iter()
            .filter(|n| !n.system)
            .map(|n| Comment {
                id: n.id,
                url: format!("{}#note_{}", self.target, n.id),
                author: n.author.username,
                body: n.body,
                created_at: n.created_at,
            })
            .collect())
    }

    async fn get_reviews(&self) -> PlatformResult<Vec<Review>> {
        let approvals: ApprovalsWire = self
            .send_json(
                self.request(Method::GET, &self.mr_url("/approvals")),
                "approvals",
            )
            .await?;
        // GitLab keeps no per-approval timestamp; the approval state's last
        // update stands in for all of them.
        let at = approvals.updated_at.unwrap_or_else(Utc::now);
        Ok(approvals
            .approved_by
            .into_iter()
            .map(|a| Review {
                author: a.user.username,
                state: ReviewState::Approved,
                body: String::new(),
                submitted_at: at,
            })
            .collect())
    }

    async fn approve_pr(&self, body: &str) -> PlatformResult<()> {
        info!("Approving {}", self.target);
        self.send_empty(
            self.request(Method::POST, &self.mr_url("/approve")),
            "approve",
        )
        .await?;
        self.post_comment(body).await
    }

    async fn dismiss_approve(&self, message: &str) -> PlatformResult<()> {
        info!("Revoking approval on {}", self.target);
        self.send_empty(
            self.request(Method::POST, &self.mr_url("/unapprove")),
            "unapprove",
        )
        .await?;
        self.post_comment(message).await
    }

    async fn get_requested_reviewers(&self) -> PlatformResult<Vec<String>> {
        Ok(self
            .get_mr()
            .await?
            .reviewers
            .into_iter()
            .map(|u| u.username)
            .collect())
    }

    async fn assign_reviewers(&self, users: &[String]) -> PlatformResult<()> {
        info!("Adding reviewers {:?} to {}", users, self.target);
        let mut ids: Vec<u64> = self.get_mr().await?.reviewers.iter().map(|u| u.id).collect();
        for user in users {
            let id = self.user_id(user).await?;
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        self.set_reviewers(ids).await
    }

    async fn remove_reviewers(&self, users: &[String]) -> PlatformResult<()> {
        info!("Removing reviewers {:?} from {}", users, self.target);
        let ids: Vec<u64> = self
            .get_mr()
            .await?
            .reviewers
            .into_iter()
            .filter(|r| !users.iter().any(|u| u.eq_ignore_ascii_case(&r.username)))
            .map(|r| r.id)
            .collect();
        self.set_reviewers(ids).await
    }

    async fn get_user_permission(&self, user: &str) -> PlatformResult<Permission> {
        let id = match self.user_id(user).await {
            Ok(id) => id,
            Err(e) if e.is_not_found() => return Ok(Permission::None),
            Err(e) => return Err(e),
        };
        let member: PlatformResult<MemberWire> = self
            .send_json(
                self.request(Method::GET, &self.project_url(&format!("/members/all/{}", id))),
                "project member",
            )
            .await;
        match member {
            Ok(member) => Ok(permission_from_access_level(member.access_level)),
            Err(e) if e.is_not_found() => Ok(Permission::None),
            Err(e) => Err(e),
        }
    }

    async fn check_runs_status(&self) -> PlatformResult<Vec<CheckRun>> {
        let pipelines: Vec<PipelineWire> = self
            .send_json(
                self.request(Method::GET, &self.mr_url("/pipelines")),
                "pipelines",
            )
            .await?;
        // Newest pipeline first.
        let Some(latest) = pipelines.first() else {
            return Ok(Vec::new());
        };
        let jobs: Vec<JobWire> = self
            .get_paginated(
                &self.project_url(&format!("/pipelines/{}/jobs", latest.id)),
                &[],
                "pipeline jobs",
            )
            .await?;
        Ok(jobs
            .into_iter()
            .map(|job| {
                let (status, conclusion) = job_state(&job.status);
                CheckRun {
                    name: format!("{} / {}", job.stage, job.name),
                    status,
                    conclusion,
                    url: job.web_url.unwrap_or_default(),
                    app_slug: "gitlab-ci".to_string(),
                    check_suite_id: Some(latest.id),
                }
            })
            .collect())
    }

    async fn get_workflow_run_ids_from_check_suite(
        &self,
        suite_id: u64,
    ) -> PlatformResult<Vec<u64>> {
        // A pipeline is both the suite and the run.
        Ok(vec![suite_id])
    }

    async fn rerun_workflow_run_failed_jobs(&self, run_id: u64) -> PlatformResult<()> {
        info!("Retrying failed jobs of pipeline {}", run_id);
        self.send_empty(
            self.request(
                Method::POST,
                &self.project_url(&format!("/pipelines/{}/retry", run_id)),
            ),
            "retry pipeline",
        )
        .await
    }

    async fn merge_pr(&self, method: MergeMethod) -> PlatformResult<()> {
        info!("Merging {} with {}", self.target, method);
        // Merge commit versus fast-forward is a project setting; only
        // squashing can be chosen per merge.
        self.send_empty(
            self.request(Method::PUT, &self.mr_url("/merge"))
                .json(&json!({ "squash": method == MergeMethod::Squash })),
            "merge",
        )
        .await
    }

    async fn rebase_pr(&self) -> PlatformResult<()> {
        info!("Rebasing {}", self.target);
        self.send_empty(self.request(Method::PUT, &self.mr_url("/rebase")), "rebase")
            .await
    }

    async fn close_pr(&self) -> PlatformResult<()> {
        info!("Closing {}", self.target);
        self.update_mr(json!({ "state_event": "close" }), "close").await
    }

    async fn get_available_merge_methods(&self) -> PlatformResult<Vec<MergeMethod>> {
        let project: ProjectWire = self
            .send_json(self.request(Method::GET, &self.project_url("")), "project")
            .await?;
        let mut methods = Vec::new();
        match project.merge_method.as_deref() {
            Some("merge") | None => methods.push(MergeMethod::Merge),
            Some(_) => methods.push(MergeMethod::Rebase),
        }
        if project.squash_option.as_deref() != Some("never") {
            methods.push(MergeMethod::Squash);
        }
        Ok(methods)
    }

    async fn get_commits(&self) -> PlatformResult<Vec<Commit>> {
        let commits: Vec<CommitWire> = self
            .get_paginated(&self.mr_url("/commits"), &[], "commits")
            .await?;
        // GitLab lists newest first.
        Ok(commits
            .into_iter()
            .rev()
            .map(|c| Commit {
                sha: c.id,
                message: c.message,
                author: c.author_name,
            })
            .collect())
    }

    async fn get_labels(&self) -> PlatformResult<Vec<String>> {
        Ok(self.get_mr().await?.labels)
    }

    async fn add_labels(&self, labels: &[String]) -> PlatformResult<()> {
        info!("Adding labels {:?} to {}", labels, self.target);
        self.update_mr(json!({ "add_labels": labels.join(",") }), "add labels")
            .await
    }

    async fn remove_labels(&self, labels: &[String]) -> PlatformResult<()> {
        info!("Removing labels {:?} from {}", labels, self.target);
        self.update_mr(json!({ "remove_labels": labels.join(",") }), "remove labels")
            .await
    }

    async fn get_issue(&self, number: u64) -> PlatformResult<Issue> {
        let issue: IssueWire = self
            .send_json(
                self.request(Method::GET, &self.project_url(&format!("/issues/{}", number))),
                "issue",
            )
            .await?;
        issue.into_model(&self.target)
    }

    async fn update_issue_body(&self, number: u64, body: &str) -> PlatformResult<()> {
        info!("Updating description of issue #{}", number);
        self.send_empty(
            self.request(Method::PUT, &self.project_url(&format!("/issues/{}", number)))
                .json(&json!({ "description": body })),
            "update issue",
        )
        .await
    }

    async fn find_issue(&self, search: &IssueSearch) -> PlatformResult<Option<Issue>> {
        let mut query: Vec<(&str, String)> = vec![
            ("order_by", "created_at".to_string()),
            ("sort", "desc".to_string()),
            ("per_page", PAGE_SIZE.to_string()),
        ];
        match search.state {
            Some(ItemState::Open) => query.push(("state", "opened".to_string())),
            Some(ItemState::Closed) => query.push(("state", "closed".to_string())),
            None => {}
        }
        if let Some(title) = &search.title {
            query.push(("search", title.clone()));
            query.push(("in", "title".to_string()));
        }
        if !search.labels.is_empty() {
            query.push(("labels", search.labels.join(",")));
        }
        let found: Vec<IssueWire> = self
            .send_json(
                self.request(Method::GET, &self.project_url("/issues")).query(&query),
                "issue search",
            )
            .await?;
        let issues = found
            .into_iter()
            .map(|i| i.into_model(&self.target))
            .collect::<PlatformResult<Vec<Issue>>>()?;
        Ok(search.best_match(&issues).cloned())
    }

    async fn update_pr_body(&self, body: &str) -> PlatformResult<()> {
        info!("Updating description of {}", self.target);
        self.update_mr(json!({ "description": body }), "update description")
            .await
    }

    async fn create_branch(&self, name: &str, base: &str) -> PlatformResult<()> {
        info!("Creating branch {} from {}", name, base);
        self.send_empty(
            self.request(Method::POST, &self.project_url("/repository/branches"))
                .json(&json!({ "branch": name, "ref": base })),
            "create branch",
        )
        .await
    }

    async fn branch_exists(&self, name: &str) -> PlatformResult<bool> {
        let url = self.project_url(&format!(
            "/repository/branches/{}",
            urlencoding::encode(name)
        ));
        match self
            .send_empty(self.request(Method::GET, &url), "branch")
            .await
        {
            Ok(()) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn cherry_pick_commit(&self, sha: &str, branch: &str) -> PlatformResult<String> {
        info!("Cherry-picking {} onto {}", sha, branch);
        let commit: CommitWire = self
            .send_json(
                self.request(
                    Method::POST,
                    &self.project_url(&format!("/repository/commits/{}/cherry_pick", sha)),
                )
                .json(&json!({ "branch": branch })),
                "cherry-pick",
            )
            .await?;
        Ok(commit.id)
    }

    async fn create_pr(
        &self,
        title: &str,
        body: &str,
        head: &str,
        base: &str,
    ) -> PlatformResult<PullRequest> {
        info!("Opening MR {} -> {}", head, base);
        let mr: MergeRequestWire = self
            .send_json(
                self.request(Method::POST, &self.project_url("/merge_requests"))
                    .json(&json!({
                        "title": title,
                        "description": body,
                        "source_branch": head,
                        "target_branch": base,
                    })),
                "create merge request",
            )
            .await?;
        mr.into_model(&self.target)
    }

    async fn dispatch_workflow(
        &self,
        workflow_file: &str,
        git_ref: &str,
        inputs: &BTreeMap<String, String>,
    ) -> PlatformResult<()> {
        // Pipelines are defined by the project's CI file, so the workflow
        // name only appears in the log.
        info!("Creating pipeline on {} for {}", git_ref, workflow_file);
        let variables: Vec<serde_json::Value> = inputs
            .iter()
            .map(|(k, v)| json!({ "key": k, "value": v }))
            .collect();
        self.send_empty(
            self.request(Method::POST, &self.project_url("/pipeline"))
                .json(&json!({ "ref": git_ref, "variables": variables })),
            "create pipeline",
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_levels() {
        assert_eq!(permission_from_access_level(50), Permission::Admin);
        assert_eq!(permission_from_access_level(40), Permission::Admin);
        assert_eq!(permission_from_access_level(30), Permission::Write);
        assert_eq!(permission_from_access_level(20), Permission::Read);
        assert_eq!(permission_from_access_level(5), Permission::None);
    }

    #[test]
    fn test_job_state() {
        assert_eq!(
            job_state("failed"),
            (CheckStatus::Completed, Some(CheckConclusion::Failure))
        );
        assert_eq!(job_state("running"), (CheckStatus::InProgress, None));
        assert_eq!(job_state("pending"), (CheckStatus::Queued, None));
    }

    #[test]
    fn test_project_path_is_encoded() {
        let client = GitLabClient::new(
            super::super::create_http_client().unwrap(),
            "https://gitlab.example/api/v4".to_string(),
            Credentials {
                token: "t".to_string(),
                comment_token: None,
            },
            PrTarget::new("group/sub", "project", 9),
            None,
        );
        assert_eq!(
            client.mr_url("/notes"),
            "https://gitlab.example/api/v4/projects/group%2Fsub%2Fproject/merge_requests/9/notes"
        );
    }

    #[test]
    fn test_merged_state_conversion() {
        let wire: MergeRequestWire = serde_json::from_value(json!({
            "iid": 9,
            "title": "t",
            "description": "d",
            "state": "merged",
            "author": { "id": 1, "username": "dave" },
            "web_url": "https://gitlab.example/g/p/-/merge_requests/9",
            "source_branch": "feature",
            "target_branch": "main",
            "sha": "abc",
            "diff_refs": { "base_sha": "def" }
        }))
        .unwrap();
        let pr = wire.into_model(&PrTarget::new("g", "p", 9)).unwrap();
        assert!(pr.merged);
        assert_eq!(pr.state, ItemState::Closed);
        assert_eq!(pr.base.sha, "def");
    }
}

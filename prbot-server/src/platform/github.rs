use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use prbot_core::cherry_pick::{synthesize_tree, TreeChange};
use prbot_core::{
    CheckConclusion, CheckRun, CheckStatus, Comment, Commit, GitRef, Issue, IssueSearch,
    ItemState, MergeMethod, Permission, PullRequest, Review, ReviewState, TreeEntry,
};
use reqwest::Method;
use reqwest_middleware::{ClientWithMiddleware, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use super::{
    error_from_response, Credentials, PlatformClient, PlatformError, PlatformResult, PrStatus,
    PrTarget, REQUEST_ID_HEADER,
};

const PAGE_SIZE: usize = 100;

/// GitHub REST v3 client bound to one pull request.
#[derive(Clone)]
pub struct GitHubClient {
    http: ClientWithMiddleware,
    base_url: String,
    credentials: Credentials,
    target: PrTarget,
    request_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UserWire {
    login: String,
}

#[derive(Debug, Deserialize)]
struct RefWire {
    #[serde(rename = "ref")]
    ref_name: String,
    sha: String,
}

#[derive(Debug, Deserialize)]
struct PullWire {
    number: u64,
    title: String,
    body: Option<String>,
    state: String,
    merged: Option<bool>,
    merged_at: Option<String>,
    draft: Option<bool>,
    user: UserWire,
    html_url: String,
    head: RefWire,
    base: RefWire,
}

#[derive(Debug, Deserialize)]
struct CommentWire {
    id: u64,
    user: UserWire,
    body: Option<String>,
    html_url: String,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct ReviewWire {
    id: u64,
    user: Option<UserWire>,
    state: String,
    body: Option<String>,
    submitted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct RequestedReviewersWire {
    users: Vec<UserWire>,
}

#[derive(Debug, Deserialize)]
struct PermissionWire {
    permission: String,
}

#[derive(Debug, Deserialize)]
struct CheckRunsWire {
    total_count: usize,
    check_runs: Vec<CheckRunWire>,
}

#[derive(Debug, Deserialize)]
struct CheckRunWire {
    name: String,
    status: String,
    conclusion: Option<String>,
    html_url: Option<String>,
    app: Option<AppWire>,
    check_suite: Option<IdWire>,
}

#[derive(Debug, Deserialize)]
struct AppWire {
    slug: String,
}

#[derive(Debug, Deserialize)]
struct IdWire {
    id: u64,
}

#[derive(Debug, Deserialize)]
struct WorkflowRunsWire {
    workflow_runs: Vec<IdWire>,
}

#[derive(Debug, Deserialize)]
struct MergeResultWire {
    merged: bool,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RepoWire {
    allow_merge_commit: Option<bool>,
    allow_squash_merge: Option<bool>,
    allow_rebase_merge: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct PullCommitWire {
    sha: String,
    commit: CommitDetailWire,
    author: Option<UserWire>,
}

#[derive(Debug, Deserialize)]
struct CommitDetailWire {
    message: String,
    author: Option<CommitAuthorWire>,
}

#[derive(Debug, Deserialize)]
struct CommitAuthorWire {
    name: String,
}

#[derive(Debug, Deserialize)]
struct LabelWire {
    name: String,
}

#[derive(Debug, Deserialize)]
struct IssueWire {
    number: u64,
    title: String,
    state: String,
    user: UserWire,
    body: Option<String>,
    html_url: String,
    created_at: DateTime<Utc>,
    #[serde(default)]
    labels: Vec<LabelWire>,
    pull_request: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct GitRefWire {
    object: ShaWire,
}

#[derive(Debug, Deserialize)]
struct ShaWire {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct GitCommitWire {
    sha: String,
    message: String,
    tree: ShaWire,
    parents: Vec<ShaWire>,
}

#[derive(Debug, Deserialize)]
struct TreeWire {
    tree: Vec<TreeEntryWire>,
}

#[derive(Debug, Deserialize)]
struct TreeEntryWire {
    path: String,
    mode: String,
    #[serde(rename = "type")]
    kind: String,
    sha: Option<String>,
}

#[derive(Debug, Serialize)]
struct NewTreeEntry<'a> {
    path: &'a str,
    mode: &'a str,
    #[serde(rename = "type")]
    kind: &'a str,
    /// `None` serializes as `null`, which deletes the path.
    sha: Option<&'a str>,
}

impl PullWire {
    fn into_model(self, target: &PrTarget) -> PlatformResult<PullRequest> {
        Ok(PullRequest {
            owner: target.owner.clone(),
            repo: target.repo.clone(),
            number: self.number,
            title: self.title,
            body: self.body.unwrap_or_default(),
            state: parse_state(&self.state)?,
            merged: self.merged.unwrap_or(false) || self.merged_at.is_some(),
            author: self.user.login,
            url: self.html_url,
            head: GitRef {
                branch: self.head.ref_name,
                sha: self.head.sha,
            },
            base: GitRef {
                branch: self.base.ref_name,
                sha: self.base.sha,
            },
        })
    }
}

impl IssueWire {
    fn into_model(self, target: &PrTarget) -> PlatformResult<Issue> {
        Ok(Issue {
            owner: target.owner.clone(),
            repo: target.repo.clone(),
            number: self.number,
            title: self.title,
            state: parse_state(&self.state)?,
            author: self.user.login,
            body: self.body.unwrap_or_default(),
            url: self.html_url,
            created_at: self.created_at,
            labels: self.labels.into_iter().map(|l| l.name).collect(),
        })
    }
}

impl TreeEntryWire {
    fn into_model(self) -> TreeEntry {
        TreeEntry {
            path: self.path,
            mode: self.mode,
            kind: self.kind,
            sha: self.sha.unwrap_or_default(),
        }
    }
}

fn parse_state(state: &str) -> PlatformResult<ItemState> {
    state
        .parse::<ItemState>()
        .map_err(|e| PlatformError::Decode(e.to_string()))
}

fn parse_check_status(status: &str) -> CheckStatus {
    match status {
        "completed" => CheckStatus::Completed,
        "in_progress" => CheckStatus::InProgress,
        _ => CheckStatus::Queued,
    }
}

impl GitHubClient {
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

    fn repo_url(&self, path: &str) -> String {
        format!(
            "{}/repos/{}/{}{}",
            self.base_url, self.target.owner, self.target.repo, path
        )
    }

    fn pull_url(&self, path: &str) -> String {
        self.repo_url(&format!("/pulls/{}{}", self.target.number, path))
    }

    fn issue_url(&self, path: &str) -> String {
        self.repo_url(&format!("/issues/{}{}", self.target.number, path))
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        self.request_with_token(method, url, &self.credentials.token)
    }

    fn request_with_token(&self, method: Method, url: &str, token: &str) -> RequestBuilder {
        let builder = self
            .http
            .request(method, url)
            .header("Authorization", format!("Bearer {}", token))
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28");
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
            warn!("GitHub API error for {}: {}", what, err);
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
            warn!("GitHub API error for {}: {}", what, err);
            return Err(err);
        }
        Ok(())
    }

    /// GET every page of a list endpoint.
    async fn get_paginated<T: DeserializeOwned>(
        &self,
        url: &str,
        what: &str,
    ) -> PlatformResult<Vec<T>> {
        let mut items = Vec::new();
        let mut page = 1usize;
        loop {
            let batch: Vec<T> = self
                .send_json(
                    self.request(Method::GET, url)
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

    async fn get_pull(&self) -> PlatformResult<PullWire> {
        self.send_json(self.request(Method::GET, &self.pull_url("")), "pull request")
            .await
    }

    async fn branch_head(&self, branch: &str) -> PlatformResult<String> {
        let reference: GitRefWire = self
            .send_json(
                self.request(
                    Method::GET,
                    &self.repo_url(&format!("/git/ref/heads/{}", branch)),
                ),
                "branch ref",
            )
            .await?;
        Ok(reference.object.sha)
    }

    async fn git_commit(&self, sha: &str) -> PlatformResult<GitCommitWire> {
        self.send_json(
            self.request(Method::GET, &self.repo_url(&format!("/git/commits/{}", sha))),
            "git commit",
        )
        .await
    }

    async fn git_tree(&self, sha: &str) -> PlatformResult<Vec<TreeEntry>> {
        let tree: TreeWire = self
            .send_json(
                self.request(Method::GET, &self.repo_url(&format!("/git/trees/{}", sha))),
                "git tree",
            )
            .await?;
        Ok(tree.tree.into_iter().map(TreeEntryWire::into_model).collect())
    }

    async fn authenticated_login(&self) -> PlatformResult<String> {
        let user: UserWire = self
            .send_json(
                self.request(Method::GET, &format!("{}/user", self.base_url)),
                "authenticated user",
            )
            .await?;
        Ok(user.login)
    }
}

#[async_trait]
impl PlatformClient for GitHubClient {
    fn target(&self) -> &PrTarget {
        &self.target
    }

    async fn get_pr(&self) -> PlatformResult<PullRequest> {
        info!("Fetching PR {}", self.target);
        self.get_pull().await?.into_model(&self.target)
    }

    async fn check_pr_status(&self) -> PlatformResult<PrStatus> {
        let pull = self.get_pull().await?;
        Ok(PrStatus {
            state: parse_state(&pull.state)?,
            merged: pull.merged.unwrap_or(false) || pull.merged_at.is_some(),
            draft: pull.draft.unwrap_or(false),
        })
    }

    async fn post_comment(&self, body: &str) -> PlatformResult<()> {
        info!("Posting comment to {}", self.target);
        let token = self
            .credentials
            .comment_token
            .as_deref()
            .unwrap_or(&self.credentials.token);
        self.send_empty(
            self.request_with_token(Method::POST, &self.issue_url("/comments"), token)
                .json(&json!({ "body": body })),
            "post comment",
        )
        .await
    }

    async fn get_comments(&self) -> PlatformResult<Vec<Comment>> {
        let comments: Vec<CommentWire> = self
            .get_paginated(&self.issue_url("/comments"), "comments")
            .await?;
        info!("Fetched {} comments for {}", comments.len(), self.target);
        Ok(comments
            .into_iter()
            .map(|c| Comment {
                id: c.id,
                author: c.user.login,
                body: c.body.unwrap_or_default(),
                url: c.html_url,
                created_at: c.created_at,
            })
            .collect())
    }

    async fn get_reviews(&self) -> PlatformResult<Vec<Review>> {
        let reviews: Vec<ReviewWire> = self
            .get_paginated(&self.pull_url("/reviews"), "reviews")
            .await?;
        // Pending reviews have no submission time and are invisible to others.
        Ok(reviews
            .into_iter()
            .filter_map(|r| {
                Some(Review {
                    author: r.user?.login,
                    state: ReviewState::from(r.state.as_str()),
                    body: r.body.unwrap_or_default(),
                    submitted_at: r.submitted_at?,
                })
            })
            .collect())
    }

    async fn approve_pr(&self, body: &str) -> PlatformResult<()> {
        info!("Approving {}", self.target);
        self.send_empty(
            self.request(Method::POST, &self.pull_url("/reviews"))
                .json(&json!({ "event": "APPROVE", "body": body })),
            "approve",
        )
        .await
    }

    async fn dismiss_approve(&self, message: &str) -> PlatformResult<()> {
        let me = self.authenticated_login().await?;
        let reviews: Vec<ReviewWire> = self
            .get_paginated(&self.pull_url("/reviews"), "reviews")
            .await?;
        let own_approvals = reviews.iter().filter(|r| {
            r.state.eq_ignore_ascii_case("APPROVED")
                && r.user
                    .as_ref()
                    .is_some_and(|u| u.login.eq_ignore_ascii_case(&me))
        });
        for review in own_approvals {
            info!("Dismissing approval {} on {}", review.id, self.target);
            self.send_empty(
                self.request(
                    Method::PUT,
                    &self.pull_url(&format!("/reviews/{}/dismissals", review.id)),
                )
                .json(&json!({ "message": message, "event": "DISMISS" })),
                "dismiss review",
            )
            .await?;
        }
        Ok(())
    }

    async fn get_requested_reviewers(&self) -> PlatformResult<Vec<String>> {
        let reviewers: RequestedReviewersWire = self
            .send_json(
                self.request(Method::GET, &self.pull_url("/requested_reviewers")),
                "requested reviewers",
            )
            .await?;
        Ok(reviewers.users.into_iter().map(|u| u.login).collect())
    }

    async fn assign_reviewers(&self, users: &[String]) -> PlatformResult<()> {
        info!("Requesting review from {:?} on {}", users, self.target);
        self.send_empty(
            self.request(Method::POST, &self.pull_url("/requested_reviewers"))
                .json(&json!({ "reviewers": users })),
            "request reviewers",
        )
        .await
    }

    async fn remove_reviewers(&self, users: &[String]) -> PlatformResult<()> {
        info!("Removing review requests {:?} on {}", users, self.target);
        self.send_empty(
            self.request(Method::DELETE, &self.pull_url("/requested_reviewers"))
                .json(&json!({ "reviewers": users })),
            "remove reviewers",
        )
        .await
    }

    async fn get_user_permission(&self, user: &str) -> PlatformResult<Permission> {
        let result: PlatformResult<PermissionWire> = self
            .send_json(
                self.request(
                    Method::GET,
                    &self.repo_url(&format!("/collaborators/{}/permission", user)),
                ),
                "collaborator permission",
            )
            .await;
        match result {
            Ok(wire) => Ok(wire.permission.parse().unwrap_or(Permission::None)),
            Err(e) if e.is_not_found() => Ok(Permission::None),
            Err(e) => Err(e),
        }
    }

    async fn check_runs_status(&self) -> PlatformResult<Vec<CheckRun>> {
        let head = self.get_pull().await?.head.sha;
        let url = self.repo_url(&format!("/commits/{}/check-runs", head));
        let mut runs = Vec::new();
        let mut page = 1usize;
        loop {
            let batch: CheckRunsWire = self
                .send_json(
                    self.request(Method::GET, &url)
                        .query(&[("per_page", PAGE_SIZE), ("page", page)]),
                    "check runs",
                )
                .await?;
            let received = batch.check_runs.len();
            runs.extend(batch.check_runs.into_iter().map(|run| CheckRun {
                name: run.name,
                status: parse_check_status(&run.status),
                conclusion: run.conclusion.as_deref().map(CheckConclusion::from),
                url: run.html_url.unwrap_or_default(),
                app_slug: run.app.map(|a| a.slug).unwrap_or_default(),
                check_suite_id: run.check_suite.map(|s| s.id),
            }));
            if received < PAGE_SIZE || runs.len() >= batch.total_count {
                break;
            }
            page += 1;
        }
        info!("Fetched {} check runs for {} at {}", runs.len(), self.target, head);
        Ok(runs)
    }

    async fn get_workflow_run_ids_from_check_suite(
        &self,
        suite_id: u64,
    ) -> PlatformResult<Vec<u64>> {
        let runs: WorkflowRunsWire = self
            .send_json(
                self.request(Method::GET, &self.repo_url("/actions/runs"))
                    .query(&[("check_suite_id", suite_id)]),
                "workflow runs",
            )
            .await?;
        Ok(runs.workflow_runs.into_iter().map(|r| r.id).collect())
    }

    async fn rerun_workflow_run_failed_jobs(&self, run_id: u64) -> PlatformResult<()> {
        info!("Rerunning failed jobs of workflow run {}", run_id);
        self.send_empty(
            self.request(
                Method::POST,
                &self.repo_url(&format!("/actions/runs/{}/rerun-failed-jobs", run_id)),
            ),
            "rerun failed jobs",
        )
        .await
    }

    async fn merge_pr(&self, method: MergeMethod) -> PlatformResult<()> {
        info!("Merging {} with {}", self.target, method);
        let result: MergeResultWire = self
            .send_json(
                self.request(Method::PUT, &self.pull_url("/merge"))
                    .json(&json!({ "merge_method": method.as_str() })),
                "merge",
            )
            .await?;
        if result.merged {
            Ok(())
        } else {
            Err(PlatformError::Api {
                status: 200,
                message: result
                    .message
                    .unwrap_or_else(|| "pull request was not merged".to_string()),
            })
        }
    }

    async fn rebase_pr(&self) -> PlatformResult<()> {
        let head = self.get_pull().await?.head.sha;
        info!("Updating branch of {} from its base", self.target);
        self.send_empty(
            self.request(Method::PUT, &self.pull_url("/update-branch"))
                .json(&json!({ "expected_head_sha": head })),
            "update branch",
        )
        .await
    }

    async fn close_pr(&self) -> PlatformResult<()> {
        info!("Closing {}", self.target);
        self.send_empty(
            self.request(Method::PATCH, &self.pull_url(""))
                .json(&json!({ "state": "closed" })),
            "close",
        )
        .await
    }

    async fn get_available_merge_methods(&self) -> PlatformResult<Vec<MergeMethod>> {
        let repo: RepoWire = self
            .send_json(self.request(Method::GET, &self.repo_url("")), "repository")
            .await?;
        let mut methods = Vec::new();
        if repo.allow_merge_commit == Some(true) {
            methods.push(MergeMethod::Merge);
        }
        if repo.allow_squash_merge == Some(true) {
            methods.push(MergeMethod::Squash);
        }
        if repo.allow_rebase_merge == Some(true) {
            methods.push(MergeMethod::Rebase);
        }
        Ok(methods)
    }

    async fn get_commits(&self) -> PlatformResult<Vec<Commit>> {
        let commits: Vec<PullCommitWire> = self
            .get_paginated(&self.pull_url("/commits"), "commits")
            .await?;
        Ok(commits
            .into_iter()
            .map(|c| Commit {
                sha: c.sha,
                author: c
                    .author
                    .map(|a| a.login)
                    .or_else(|| c.commit.author.map(|a| a.name))
                    .unwrap_or_default(),
                message: c.commit.message,
            })
            .collect())
    }

    async fn get_labels(&self) -> PlatformResult<Vec<String>> {
        let labels: Vec<LabelWire> = self
            .get_paginated(&self.issue_url("/labels"), "labels")
            .await?;
        Ok(labels.into_iter().map(|l| l.name).collect())
    }

    async fn add_labels(&self, labels: &[String]) -> PlatformResult<()> {
        info!("Adding labels {:?} to {}", labels, self.target);
        self.send_empty(
            self.request(Method::POST, &self.issue_url("/labels"))
                .json(&json!({ "labels": labels })),
            "add labels",
        )
        .await
    }

    async fn remove_labels(&self, labels: &[String]) -> PlatformResult<()> {
        for label in labels {
            info!("Removing label {} from {}", label, self.target);
            let url = self.issue_url(&format!("/labels/{}", urlencoding::encode(label)));
            match self
                .send_empty(self.request(Method::DELETE, &url), "remove label")
                .await
            {
                Err(e) if e.is_not_found() => {
                    warn!("Label {} was not on {}", label, self.target);
                }
                other => other?,
            }
        }
        Ok(())
    }

    async fn get_issue(&self, number: u64) -> PlatformResult<Issue> {
        let issue: IssueWire = self
            .send_json(
                self.request(Method::GET, &self.repo_url(&format!("/issues/{}", number))),
                "issue",
            )
            .await?;
        issue.into_model(&self.target)
    }

    async fn update_issue_body(&self, number: u64, body: &str) -> PlatformResult<()> {
        info!("Updating body of issue #{}", number);
        self.send_empty(
            self.request(
                Method::PATCH,
                &self.repo_url(&format!("/issues/{}", number)),
            )
            .json(&json!({ "body": body })),
            "update issue",
        )
        .await
    }

    async fn find_issue(&self, search: &IssueSearch) -> PlatformResult<Option<Issue>> {
        let state = match search.state {
            Some(ItemState::Open) => "open",
            Some(ItemState::Closed) => "closed",
            None => "all",
        };
        let mut query: Vec<(&str, String)> = vec![
            ("state", state.to_string()),
            ("sort", "created".to_string()),
            ("direction", "desc".to_string()),
            ("per_page", PAGE_SIZE.to_string()),
        ];
        if !search.labels.is_empty() {
            query.push(("labels", search.labels.join(",")));
        }
        let found: Vec<IssueWire> = self
            .send_json(
                self.request(Method::GET, &self.repo_url("/issues")).query(&query),
                "issue search",
            )
            .await?;
        let issues = found
            .into_iter()
            .filter(|i| i.pull_request.is_none())
            .map(|i| i.into_model(&self.target))
            .collect::<PlatformResult<Vec<Issue>>>()?;
        Ok(search.best_match(&issues).cloned())
    }

    async fn update_pr_body(&self, body: &str) -> PlatformResult<()> {
        info!("Updating description of {}", self.target);
        self.send_empty(
            self.request(Method::PATCH, &self.pull_url(""))
                .json(&json!({ "body": body })),
            "update pull request",
        )
        .await
    }

    async fn create_branch(&self, name: &str, base: &str) -> PlatformResult<()> {
        let sha = self.branch_head(base).await?;
        info!("Creating branch {} from {} at {}", name, base, sha);
        self.send_empty(
            self.request(Method::POST, &self.repo_url("/git/refs"))
                .json(&json!({ "ref": format!("refs/heads/{}", name), "sha": sha })),
            "create branch",
        )
        .await
    }

    async fn branch_exists(&self, name: &str) -> PlatformResult<bool> {
        match self
            .send_empty(
                self.request(Method::GET, &self.repo_url(&format!("/branches/{}", name))),
                "branch",
            )
            .await
        {
            Ok(()) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn cherry_pick_commit(&self, sha: &str, branch: &str) -> PlatformResult<String> {
        let commit = self.git_commit(sha).await?;
        let parent = commit.parents.first().ok_or_else(|| {
            PlatformError::Git(format!("{} has no parent and cannot be cherry-picked", sha))
        })?;
        let parent_commit = self.git_commit(&parent.sha).await?;
        let head = self.branch_head(branch).await?;
        let head_commit = self.git_commit(&head).await?;

        let parent_tree = self.git_tree(&parent_commit.tree.sha).await?;
        let commit_tree = self.git_tree(&commit.tree.sha).await?;
        let target_tree = self.git_tree(&head_commit.tree.sha).await?;
        let changes = synthesize_tree(&parent_tree, &commit_tree, &target_tree);
        info!(
            "Cherry-picking {} onto {} ({} path changes)",
            sha,
            branch,
            changes.len()
        );

        let tree_sha = if changes.is_empty() {
            head_commit.tree.sha.clone()
        } else {
            let entries: Vec<NewTreeEntry<'_>> = changes
                .iter()
                .map(|change| match change {
                    TreeChange::Upsert(entry) => NewTreeEntry {
                        path: &entry.path,
                        mode: &entry.mode,
                        kind: &entry.kind,
                        sha: Some(&entry.sha),
                    },
                    TreeChange::Delete(path) => NewTreeEntry {
                        path,
                        mode: "100644",
                        kind: "blob",
                        sha: None,
                    },
                })
                .collect();
            let tree: ShaWire = self
                .send_json(
                    self.request(Method::POST, &self.repo_url("/git/trees"))
                        .json(&json!({ "base_tree": head_commit.tree.sha, "tree": entries })),
                    "create tree",
                )
                .await?;
            tree.sha
        };

        let new_commit: ShaWire = self
            .send_json(
                self.request(Method::POST, &self.repo_url("/git/commits"))
                    .json(&json!({
                        "message": format!("{}\n\n(cherry picked from commit {})", commit.message, commit.sha),
                        "tree": tree_sha,
                        "parents": [head],
                    })),
                "create commit",
            )
            .await?;

        self.send_empty(
            self.request(
                Method::PATCH,
                &self.repo_url(&format!("/git/refs/heads/{}", branch)),
            )
            .json(&json!({ "sha": new_commit.sha, "force": false })),
            "update ref",
        )
        .await?;

        Ok(new_commit.sha)
    }

    async fn create_pr(
        &self,
        title: &str,
        body: &str,
        head: &str,
        base: &str,
    ) -> PlatformResult<PullRequest> {
        info!("Opening PR {} -> {}", head, base);
        let pull: PullWire = self
            .send_json(
                self.request(Method::POST, &self.repo_url("/pulls")).json(&json!({
                    "title": title,
                    "body": body,
                    "head": head,
                    "base": base,
                })),
                "create pull request",
            )
            .await?;
        pull.into_model(&self.target)
    }

    async fn dispatch_workflow(
        &self,
        workflow_file: &str,
        git_ref: &str,
        inputs: &BTreeMap<String, String>,
    ) -> PlatformResult<()> {
        info!("Dispatching workflow {} on {}", workflow_file, git_ref);
        self.send_empty(
            self.request(
                Method::POST,
                &self.repo_url(&format!("/actions/workflows/{}/dispatches", workflow_file)),
            )
            .json(&json!({ "ref": git_ref, "inputs": inputs })),
            "workflow dispatch",
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pull_wire_conversion() {
        let wire: PullWire = serde_json::from_value(json!({
            "number": 12,
            "title": "Add widget",
            "body": null,
            "state": "closed",
            "merged": null,
            "merged_at": "2024-05-01T10:00:00Z",
            "draft": false,
            "user": { "login": "dave" },
            "html_url": "https://github.com/acme/widgets/pull/12",
            "head": { "ref": "feature", "sha": "abc" },
            "base": { "ref": "main", "sha": "def" }
        }))
        .unwrap();
        let pr = wire
            .into_model(&PrTarget::new("acme", "widgets", 12))
            .unwrap();
        assert_eq!(pr.state, ItemState::Closed);
        assert!(pr.merged);
        assert_eq!(pr.body, "");
        assert_eq!(pr.head.branch, "feature");
        assert_eq!(pr.base.sha, "def");
    }

    #[test]
    fn test_check_status_mapping() {
        assert_eq!(parse_check_status("completed"), CheckStatus::Completed);
        assert_eq!(parse_check_status("in_progress"), CheckStatus::InProgress);
        assert_eq!(parse_check_status("waiting"), CheckStatus::Queued);
    }

    #[test]
    fn test_tree_deletions_serialize_null_sha() {
        let entry = NewTreeEntry {
            path: "old.rs",
            mode: "100644",
            kind: "blob",
            sha: None,
        };
        assert_eq!(
            serde_json::to_value(&entry).unwrap(),
            json!({ "path": "old.rs", "mode": "100644", "type": "blob", "sha": null })
        );
    }
}

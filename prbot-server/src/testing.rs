//! In-memory platform for handler, executor and router tests.
//!
//! [`FakePlatform`] answers from scripted state and records every call by
//! operation name, so tests can assert on the sequence of platform calls a
//! command produced.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use prbot_core::{
    normalize_login, CheckRun, Comment, Commit, GitRef, Issue, IssueSearch, ItemState,
    MergeMethod, Permission, PullRequest, Review, ReviewState,
};

use crate::config::{Config, ConfigError};
use crate::platform::{
    PlatformClient, PlatformError, PlatformFactory, PlatformResult, PrStatus, PrTarget,
};

/// Login the fake posts comments as.
pub const BOT_LOGIN: &str = "prbot";

/// One recorded platform call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub op: &'static str,
    pub args: Vec<String>,
}

/// A pull request opened through [`PlatformClient::create_pr`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedPr {
    pub title: String,
    pub body: String,
    pub head: String,
    pub base: String,
}

struct FakeState {
    pr: PullRequest,
    draft: bool,
    comments: Vec<Comment>,
    reviews: Vec<Review>,
    permissions: HashMap<String, Permission>,
    check_runs: Vec<CheckRun>,
    workflow_runs: HashMap<u64, Vec<u64>>,
    commits: Vec<Commit>,
    merge_methods: Vec<MergeMethod>,
    labels: Vec<String>,
    reviewers: Vec<String>,
    issues: Vec<Issue>,
    branches: HashSet<String>,
    failures: HashMap<&'static str, String>,
    calls: Vec<Call>,
    posted: Vec<String>,
    approvals: Vec<String>,
    dismissals: Vec<String>,
    merged_with: Option<MergeMethod>,
    created_prs: Vec<CreatedPr>,
    created_branches: Vec<(String, String)>,
    dispatched: Vec<(String, String, BTreeMap<String, String>)>,
    clock: DateTime<Utc>,
    next_id: u64,
}

pub struct FakePlatform {
    target: PrTarget,
    state: Mutex<FakeState>,
}

/// Fixed point in time the fake's clock starts from.
pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0)
        .single()
        .unwrap_or_default()
}

/// An open PR from `author` on `acme/widgets`.
pub fn pull_request(number: u64, author: &str) -> PullRequest {
    PullRequest {
        owner: "acme".to_string(),
        repo: "widgets".to_string(),
        number,
        title: "Add widget".to_string(),
        body: String::new(),
        state: ItemState::Open,
        merged: false,
        author: author.to_string(),
        url: format!("https://github.com/acme/widgets/pull/{}", number),
        head: GitRef {
            branch: "feature".to_string(),
            sha: "ffff0000ffff0000".to_string(),
        },
        base: GitRef {
            branch: "main".to_string(),
            sha: "0000ffff0000ffff".to_string(),
        },
    }
}

/// Config with a token plus the given variables.
pub fn config(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
    let vars: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .chain([("PRBOT_TOKEN".to_string(), "test-token".to_string())])
        .collect();
    Config::from_lookup(|key| vars.get(key).cloned())
}

impl FakePlatform {
    pub fn new(pr: PullRequest) -> Self {
        let target = PrTarget::new(pr.owner.clone(), pr.repo.clone(), pr.number);
        let branches = [pr.base.branch.clone()].into_iter().collect();
        Self {
            target,
            state: Mutex::new(FakeState {
                pr,
                draft: false,
                comments: Vec::new(),
                reviews: Vec::new(),
                permissions: HashMap::new(),
                check_runs: Vec::new(),
                workflow_runs: HashMap::new(),
                commits: Vec::new(),
                merge_methods: vec![MergeMethod::Merge, MergeMethod::Squash, MergeMethod::Rebase],
                labels: Vec::new(),
                reviewers: Vec::new(),
                issues: Vec::new(),
                branches,
                failures: HashMap::new(),
                calls: Vec::new(),
                posted: Vec::new(),
                approvals: Vec::new(),
                dismissals: Vec::new(),
                merged_with: None,
                created_prs: Vec::new(),
                created_branches: Vec::new(),
                dispatched: Vec::new(),
                clock: epoch(),
                next_id: 1,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn tick(state: &mut FakeState) -> (u64, DateTime<Utc>) {
        state.clock += Duration::minutes(1);
        state.next_id += 1;
        (state.next_id, state.clock)
    }

    fn call(&self, op: &'static str, args: &[&str]) -> PlatformResult<()> {
        let mut state = self.state();
        state.calls.push(Call {
            op,
            args: args.iter().map(|a| a.to_string()).collect(),
        });
        match state.failures.get(op) {
            Some(message) => Err(PlatformError::Api {
                status: 500,
                message: message.clone(),
            }),
            None => Ok(()),
        }
    }

    // Scripting.

    pub fn add_comment(&self, author: &str, body: &str) {
        let mut state = self.state();
        let (id, at) = Self::tick(&mut state);
        state.comments.push(Comment {
            id,
            author: author.to_string(),
            body: body.to_string(),
            url: format!("https://github.com/acme/widgets/pull/1#issuecomment-{}", id),
            created_at: at,
        });
    }

    pub fn add_review(&self, author: &str, review_state: ReviewState) {
        let mut state = self.state();
        let (_, at) = Self::tick(&mut state);
        state.reviews.push(Review {
            author: author.to_string(),
            state: review_state,
            body: String::new(),
            submitted_at: at,
        });
    }

    pub fn set_permission(&self, user: &str, permission: Permission) {
        self.state()
            .permissions
            .insert(normalize_login(user), permission);
    }

    pub fn set_check_runs(&self, runs: Vec<CheckRun>) {
        self.state().check_runs = runs;
    }

    pub fn set_workflow_runs(&self, suite_id: u64, runs: Vec<u64>) {
        self.state().workflow_runs.insert(suite_id, runs);
    }

    pub fn set_commits(&self, commits: Vec<Commit>) {
        self.state().commits = commits;
    }

    pub fn set_merge_methods(&self, methods: Vec<MergeMethod>) {
        self.state().merge_methods = methods;
    }

    pub fn set_body(&self, body: &str) {
        self.state().pr.body = body.to_string();
    }

    pub fn set_merged(&self) {
        let mut state = self.state();
        state.pr.merged = true;
        state.pr.state = ItemState::Closed;
    }

    pub fn set_closed(&self) {
        self.state().pr.state = ItemState::Closed;
    }

    pub fn add_issue(&self, issue: Issue) {
        self.state().issues.push(issue);
    }

    pub fn add_branch(&self, name: &str) {
        self.state().branches.insert(name.to_string());
    }

    /// Make every later call to `op` fail with a 500.
    pub fn fail(&self, op: &'static str, message: &str) {
        self.state().failures.insert(op, message.to_string());
    }

    // Inspection.

    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    pub fn ops(&self) -> Vec<&'static str> {
        self.state().calls.iter().map(|c| c.op).collect()
    }

    /// Arguments of every call to `op`.
    pub fn calls_to(&self, op: &str) -> Vec<Vec<String>> {
        self.state()
            .calls
            .iter()
            .filter(|c| c.op == op)
            .map(|c| c.args.clone())
            .collect()
    }

    pub fn posted_comments(&self) -> Vec<String> {
        self.state().posted.clone()
    }

    pub fn approvals(&self) -> Vec<String> {
        self.state().approvals.clone()
    }

    pub fn dismissals(&self) -> Vec<String> {
        self.state().dismissals.clone()
    }

    pub fn merged_with(&self) -> Option<MergeMethod> {
        self.state().merged_with
    }

    pub fn labels(&self) -> Vec<String> {
        self.state().labels.clone()
    }

    pub fn reviewers(&self) -> Vec<String> {
        self.state().reviewers.clone()
    }

    pub fn body(&self) -> String {
        self.state().pr.body.clone()
    }

    pub fn issue_body(&self, number: u64) -> Option<String> {
        self.state()
            .issues
            .iter()
            .find(|i| i.number == number)
            .map(|i| i.body.clone())
    }

    pub fn created_prs(&self) -> Vec<CreatedPr> {
        self.state().created_prs.clone()
    }

    pub fn created_branches(&self) -> Vec<(String, String)> {
        self.state().created_branches.clone()
    }

    pub fn dispatched(&self) -> Vec<(String, String, BTreeMap<String, String>)> {
        self.state().dispatched.clone()
    }
}

#[async_trait]
impl PlatformClient for FakePlatform {
    fn target(&self) -> &PrTarget {
        &self.target
    }

    async fn get_pr(&self) -> PlatformResult<PullRequest> {
        self.call("get_pr", &[])?;
        Ok(self.state().pr.clone())
    }

    async fn check_pr_status(&self) -> PlatformResult<PrStatus> {
        self.call("check_pr_status", &[])?;
        let state = self.state();
        Ok(PrStatus {
            state: state.pr.state,
            merged: state.pr.merged,
            draft: state.draft,
        })
    }

    async fn post_comment(&self, body: &str) -> PlatformResult<()> {
        self.call("post_comment", &[body])?;
        let mut state = self.state();
        let (id, at) = Self::tick(&mut state);
        state.posted.push(body.to_string());
        state.comments.push(Comment {
            id,
            author: BOT_LOGIN.to_string(),
            body: body.to_string(),
            url: String::new(),
            created_at: at,
        });
        Ok(())
    }

    async fn get_comments(&self) -> PlatformResult<Vec<Comment>> {
        self.call("get_comments", &[])?;
        Ok(self.state().comments.clone())
    }

    async fn get_reviews(&self) -> PlatformResult<Vec<Review>> {
        self.call("get_reviews", &[])?;
        Ok(self.state().reviews.clone())
    }

    async fn approve_pr(&self, body: &str) -> PlatformResult<()> {
        self.call("approve_pr", &[body])?;
        self.state().approvals.push(body.to_string());
        Ok(())
    }

    async fn dismiss_approve(&self, message: &str) -> PlatformResult<()> {
        self.call("dismiss_approve", &[message])?;
        self.state().dismissals.push(message.to_string());
        Ok(())
    }

    async fn get_requested_reviewers(&self) -> PlatformResult<Vec<String>> {
        self.call("get_requested_reviewers", &[])?;
        Ok(self.state().reviewers.clone())
    }

    async fn assign_reviewers(&self, users: &[String]) -> PlatformResult<()> {
        let args: Vec<&str> = users.iter().map(String::as_str).collect();
        self.call("assign_reviewers", &args)?;
        let mut state = self.state();
        for user in users {
            if !state.reviewers.contains(user) {
                state.reviewers.push(user.clone());
            }
        }
        Ok(())
    }

    async fn remove_reviewers(&self, users: &[String]) -> PlatformResult<()> {
        let args: Vec<&str> = users.iter().map(String::as_str).collect();
        self.call("remove_reviewers", &args)?;
        self.state().reviewers.retain(|r| !users.contains(r));
        Ok(())
    }

    async fn get_user_permission(&self, user: &str) -> PlatformResult<Permission> {
        self.call("get_user_permission", &[user])?;
        Ok(self
            .state()
            .permissions
            .get(&normalize_login(user))
            .copied()
            .unwrap_or(Permission::None))
    }

    async fn check_user_permissions(
        &self,
        user: &str,
        allowed: &prbot_core::PermissionSet,
    ) -> PlatformResult<bool> {
        let allowed_str = allowed.to_string();
        self.call("check_user_permissions", &[user, &allowed_str])?;
        let permission = self
            .state()
            .permissions
            .get(&normalize_login(user))
            .copied()
            .unwrap_or(Permission::None);
        Ok(allowed.contains(permission))
    }

    async fn check_runs_status(&self) -> PlatformResult<Vec<CheckRun>> {
        self.call("check_runs_status", &[])?;
        Ok(self.state().check_runs.clone())
    }

    async fn get_workflow_run_ids_from_check_suite(
        &self,
        suite_id: u64,
    ) -> PlatformResult<Vec<u64>> {
        self.call("get_workflow_run_ids_from_check_suite", &[&suite_id.to_string()])?;
        Ok(self
            .state()
            .workflow_runs
            .get(&suite_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn rerun_workflow_run_failed_jobs(&self, run_id: u64) -> PlatformResult<()> {
        self.call("rerun_workflow_run_failed_jobs", &[&run_id.to_string()])
    }

    async fn merge_pr(&self, method: MergeMethod) -> PlatformResult<()> {
        self.call("merge_pr", &[method.as_str()])?;
        let mut state = self.state();
        state.merged_with = Some(method);
        state.pr.merged = true;
        state.pr.state = ItemState::Closed;
        Ok(())
    }

    async fn rebase_pr(&self) -> PlatformResult<()> {
        self.call("rebase_pr", &[])
    }

    async fn close_pr(&self) -> PlatformResult<()> {
        self.call("close_pr", &[])?;
        self.state().pr.state = ItemState::Closed;
        Ok(())
    }

    async fn get_available_merge_methods(&self) -> PlatformResult<Vec<MergeMethod>> {
        self.call("get_available_merge_methods", &[])?;
        Ok(self.state().merge_methods.clone())
    }

    async fn get_commits(&self) -> PlatformResult<Vec<Commit>> {
        self.call("get_commits", &[])?;
        Ok(self.state().commits.clone())
    }

    async fn get_labels(&self) -> PlatformResult<Vec<String>> {
        self.call("get_labels", &[])?;
        Ok(self.state().labels.clone())
    }

    async fn add_labels(&self, labels: &[String]) -> PlatformResult<()> {
        let args: Vec<&str> = labels.iter().map(String::as_str).collect();
        self.call("add_labels", &args)?;
        let mut state = self.state();
        for label in labels {
            if !state.labels.contains(label) {
                state.labels.push(label.clone());
            }
        }
        Ok(())
    }

    async fn remove_labels(&self, labels: &[String]) -> PlatformResult<()> {
        let args: Vec<&str> = labels.iter().map(String::as_str).collect();
        self.call("remove_labels", &args)?;
        self.state().labels.retain(|l| !labels.contains(l));
        Ok(())
    }

    async fn get_issue(&self, number: u64) -> PlatformResult<Issue> {
        self.call("get_issue", &[&number.to_string()])?;
        self.state()
            .issues
            .iter()
            .find(|i| i.number == number)
            .cloned()
            .ok_or_else(|| PlatformError::NotFound(format!("issue #{}", number)))
    }

    async fn update_issue_body(&self, number: u64, body: &str) -> PlatformResult<()> {
        self.call("update_issue_body", &[&number.to_string(), body])?;
        let mut state = self.state();
        match state.issues.iter_mut().find(|i| i.number == number) {
            Some(issue) => {
                issue.body = body.to_string();
                Ok(())
            }
            None => Err(PlatformError::NotFound(format!("issue #{}", number))),
        }
    }

    async fn find_issue(&self, search: &IssueSearch) -> PlatformResult<Option<Issue>> {
        self.call(
            "find_issue",
            &[
                search.title.as_deref().unwrap_or(""),
                search.author.as_deref().unwrap_or(""),
            ],
        )?;
        Ok(search.best_match(&self.state().issues).cloned())
    }

    async fn update_pr_body(&self, body: &str) -> PlatformResult<()> {
        self.call("update_pr_body", &[body])?;
        self.state().pr.body = body.to_string();
        Ok(())
    }

    async fn create_branch(&self, name: &str, base: &str) -> PlatformResult<()> {
        self.call("create_branch", &[name, base])?;
        let mut state = self.state();
        state.branches.insert(name.to_string());
        state
            .created_branches
            .push((name.to_string(), base.to_string()));
        Ok(())
    }

    async fn branch_exists(&self, name: &str) -> PlatformResult<bool> {
        self.call("branch_exists", &[name])?;
        Ok(self.state().branches.contains(name))
    }

    async fn cherry_pick_commit(&self, sha: &str, branch: &str) -> PlatformResult<String> {
        self.call("cherry_pick_commit", &[sha, branch])?;
        Ok(format!("picked-{}", sha))
    }

    async fn create_pr(
        &self,
        title: &str,
        body: &str,
        head: &str,
        base: &str,
    ) -> PlatformResult<PullRequest> {
        self.call("create_pr", &[title, head, base])?;
        let mut state = self.state();
        state.created_prs.push(CreatedPr {
            title: title.to_string(),
            body: body.to_string(),
            head: head.to_string(),
            base: base.to_string(),
        });
        let number = 1000 + state.created_prs.len() as u64;
        let mut pr = pull_request(number, BOT_LOGIN);
        pr.title = title.to_string();
        pr.body = body.to_string();
        pr.head.branch = head.to_string();
        pr.base.branch = base.to_string();
        Ok(pr)
    }

    async fn dispatch_workflow(
        &self,
        workflow_file: &str,
        git_ref: &str,
        inputs: &BTreeMap<String, String>,
    ) -> PlatformResult<()> {
        self.call("dispatch_workflow", &[workflow_file, git_ref])?;
        self.state().dispatched.push((
            workflow_file.to_string(),
            git_ref.to_string(),
            inputs.clone(),
        ));
        Ok(())
    }
}

/// Hands out the same [`FakePlatform`] for every target.
pub struct FakeFactory {
    platform: Arc<FakePlatform>,
    targets: Mutex<Vec<(PrTarget, Option<String>)>>,
}

impl FakeFactory {
    pub fn new(platform: Arc<FakePlatform>) -> Self {
        Self {
            platform,
            targets: Mutex::new(Vec::new()),
        }
    }

    /// Targets and request ids clients were built for.
    pub fn requested(&self) -> Vec<(PrTarget, Option<String>)> {
        self.targets
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl PlatformFactory for FakeFactory {
    fn client(
        &self,
        target: &PrTarget,
        request_id: Option<&str>,
    ) -> PlatformResult<Arc<dyn PlatformClient>> {
        self.targets
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((target.clone(), request_id.map(str::to_string)));
        Ok(self.platform.clone())
    }
}

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use prbot_core::render::{self, Settings};
use prbot_core::{
    collect_voters, login_matches, Comment, LgtmVotes, Permission, PullRequest, Review,
    VoteInputs,
};
use tokio::sync::{Mutex, OnceCell};
use tracing::info;

use super::{CommandError, CommandResult, Registry};
use crate::config::Config;
use crate::metrics::Metrics;
use crate::platform::PlatformClient;

/// State shared by every command run for one comment.
///
/// The PR and its comments are fetched at most once and reused by later
/// sub-commands. Nothing here outlives the job.
pub struct CommandContext {
    client: Arc<dyn PlatformClient>,
    config: Arc<Config>,
    registry: Arc<Registry>,
    metrics: Arc<Metrics>,
    commenter: String,
    pr_sender: Option<String>,
    pr: OnceCell<PullRequest>,
    comments: OnceCell<Vec<Comment>>,
    permissions: Mutex<HashMap<String, Permission>>,
    builtins_run: Mutex<HashSet<String>>,
}

impl CommandContext {
    pub fn new(
        client: Arc<dyn PlatformClient>,
        config: Arc<Config>,
        registry: Arc<Registry>,
        metrics: Arc<Metrics>,
        commenter: String,
    ) -> Self {
        Self {
            client,
            config,
            registry,
            metrics,
            commenter,
            pr_sender: None,
            pr: OnceCell::new(),
            comments: OnceCell::new(),
            permissions: Mutex::new(HashMap::new()),
            builtins_run: Mutex::new(HashSet::new()),
        }
    }

    /// Known PR author, used instead of fetching the PR.
    pub fn with_pr_sender(mut self, sender: Option<String>) -> Self {
        self.pr_sender = sender;
        self
    }

    pub fn client(&self) -> &dyn PlatformClient {
        self.client.as_ref()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn commenter(&self) -> &str {
        &self.commenter
    }

    pub fn settings(&self) -> Settings<'_> {
        Settings {
            threshold: self.config.lgtm_threshold,
            permissions: &self.config.lgtm_permissions,
            merge_policy: self.config.merge_policy,
        }
    }

    pub async fn pr(&self) -> CommandResult<&PullRequest> {
        self.pr
            .get_or_try_init(|| async { self.client.get_pr().await.map_err(CommandError::from) })
            .await
    }

    pub async fn comments(&self) -> CommandResult<&[Comment]> {
        let comments = self
            .comments
            .get_or_try_init(|| async {
                self.client
                    .get_comments()
                    .await
                    .map_err(CommandError::from)
            })
            .await?;
        Ok(comments.as_slice())
    }

    /// PR author, preferring a known sender over a fetch.
    pub async fn pr_author(&self) -> CommandResult<String> {
        match &self.pr_sender {
            Some(sender) => Ok(sender.clone()),
            None => Ok(self.pr().await?.author.clone()),
        }
    }

    pub async fn commenter_is_author(&self) -> CommandResult<bool> {
        Ok(login_matches(&self.commenter, &self.pr_author().await?))
    }

    /// Permission of `user`, looked up once per job.
    pub async fn permission_of(&self, user: &str) -> CommandResult<Permission> {
        let key = prbot_core::normalize_login(user);
        if let Some(permission) = self.permissions.lock().await.get(&key) {
            return Ok(*permission);
        }
        let permission = self.client.get_user_permission(user).await?;
        self.permissions.lock().await.insert(key, permission);
        Ok(permission)
    }

    /// Fold `reviews` and the cached comments into votes.
    ///
    /// With `ignore_user_remove`, that user's latest withdrawal is skipped.
    pub async fn tally(
        &self,
        reviews: &[Review],
        ignore_user_remove: Option<&str>,
    ) -> CommandResult<LgtmVotes> {
        let comments = self.comments().await?;
        let pr_author = self.pr_author().await?;
        let voters = collect_voters(&VoteInputs {
            reviews,
            comments,
            pr_author: &pr_author,
            debug: self.config.debug,
            robot_accounts: &self.config.robot_accounts,
            ignore_user_remove,
        });

        let mut users = BTreeMap::new();
        for (login, display) in voters {
            let permission = self.permission_of(&display).await?;
            users.insert(login, permission);
        }
        let votes = LgtmVotes::from_permissions(users, &self.config.lgtm_permissions);
        info!(
            "{} has {}/{} valid LGTM votes",
            self.client.target(),
            votes.valid,
            self.config.lgtm_threshold
        );
        Ok(votes)
    }

    pub async fn votes(&self) -> CommandResult<LgtmVotes> {
        let reviews = self.client.get_reviews().await?;
        self.tally(&reviews, None).await
    }

    pub async fn post(&self, body: &str) -> CommandResult {
        self.client.post_comment(body).await?;
        Ok(())
    }

    /// Post `message` and fail with the commented marker.
    pub async fn deny<T>(&self, message: String, reason: impl Into<String>) -> CommandResult<T> {
        self.post(&message).await?;
        Err(CommandError::commented(reason))
    }

    /// Fail unless the commenter holds one of the voting permissions.
    pub async fn require_permission(&self) -> CommandResult {
        let allowed = &self.config.lgtm_permissions;
        if self
            .client
            .check_user_permissions(&self.commenter, allowed)
            .await?
        {
            return Ok(());
        }
        self.deny(
            render::insufficient_permissions(&self.commenter, allowed),
            format!("{} lacks permission", self.commenter),
        )
        .await
    }

    /// Like [`Self::require_permission`] but the PR author always passes.
    pub async fn require_permission_or_author(&self) -> CommandResult {
        let allowed = &self.config.lgtm_permissions;
        if self
            .client
            .check_user_permissions(&self.commenter, allowed)
            .await?
            || self.commenter_is_author().await?
        {
            return Ok(());
        }
        self.deny(
            render::insufficient_permissions(&self.commenter, allowed),
            format!("{} lacks permission", self.commenter),
        )
        .await
    }

    /// Record that built-in `name` is running. False if it already ran.
    pub(super) async fn begin_builtin(&self, name: &str) -> bool {
        self.builtins_run.lock().await.insert(name.to_string())
    }
}

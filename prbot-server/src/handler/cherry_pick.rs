use std::sync::Arc;

use async_trait::async_trait;
use prbot_core::cherry_pick::{backport_title, branch_name, requested_branches};
use prbot_core::render;
use prbot_core::{Commit, ItemState, PullRequest};
use tracing::{error, info, warn};

use super::{CommandContext, CommandError, CommandHandler, CommandResult};
use crate::git::CherryPicker;
use crate::platform::PlatformResult;

/// Creates backport branches and PRs, through the platform API or a
/// [`CherryPicker`].
pub struct CherryPickEngine {
    picker: Option<Arc<dyn CherryPicker>>,
}

impl CherryPickEngine {
    pub fn new(picker: Option<Arc<dyn CherryPicker>>) -> Self {
        Self { picker }
    }

    /// Cherry-pick the PR onto each branch, reporting every outcome.
    async fn perform_all(&self, ctx: &CommandContext, targets: &[String]) -> CommandResult {
        let mut failed = Vec::new();
        for target in targets {
            match self.perform(ctx, target).await {
                Ok(()) => {}
                Err(e) if e.is_commented() => failed.push(target.clone()),
                Err(e) => return Err(e),
            }
        }
        if failed.is_empty() {
            Ok(())
        } else {
            Err(CommandError::commented(format!(
                "cherry-pick failed for {}",
                failed.join(", ")
            )))
        }
    }

    async fn perform(&self, ctx: &CommandContext, target: &str) -> CommandResult {
        match ctx.client().branch_exists(target).await {
            Ok(true) => {}
            Ok(false) => {
                info!("Cherry-pick target {} does not exist", target);
                return ctx.post(&render::cherry_pick_branch_missing(target)).await;
            }
            Err(e) if e.is_not_found() => {
                return ctx.post(&render::cherry_pick_branch_missing(target)).await;
            }
            Err(e) => warn!(
                "Could not check branch {}, trying the cherry-pick anyway: {}",
                target, e
            ),
        }

        let pr = ctx.pr().await?;
        let commits = ctx.client().get_commits().await?;
        if commits.is_empty() {
            return Err(CommandError::Invalid("the PR has no commits".to_string()));
        }

        match self.apply(ctx, pr, &commits, target).await {
            Ok(url) => {
                ctx.post(&render::cherry_pick_created(target, &url))
                    .await
            }
            Err(e) => {
                error!("Cherry-pick of {} to {} failed: {}", pr.number, target, e);
                ctx.deny(
                    render::cherry_pick_failed(target, &e.to_string()),
                    format!("cherry-pick to {} failed: {}", target, e),
                )
                .await
            }
        }
    }

    /// Build the backport branch and open its PR; returns the PR URL.
    async fn apply(
        &self,
        ctx: &CommandContext,
        pr: &PullRequest,
        commits: &[Commit],
        target: &str,
    ) -> PlatformResult<String> {
        let client = ctx.client();
        let branch = match &self.picker {
            Some(picker) => {
                let branch = picker.branch_name(pr.number, &pr.head.sha, target);
                picker.cherry_pick_commits(commits, target, &branch).await?;
                branch
            }
            None => {
                let branch = branch_name(pr.number, target, &pr.head.sha);
                client.create_branch(&branch, target).await?;
                for commit in commits {
                    let picked = client.cherry_pick_commit(&commit.sha, &branch).await?;
                    info!("Picked {} as {} on {}", commit.sha, picked, branch);
                }
                branch
            }
        };

        let created = client
            .create_pr(
                &backport_title(&pr.title),
                &render::cherry_pick_body(pr.number, &pr.url, commits),
                &branch,
                target,
            )
            .await?;
        Ok(created.url)
    }
}

fn targets(args: &[String]) -> Vec<String> {
    let mut targets: Vec<String> = Vec::new();
    for arg in args {
        if !targets.contains(arg) {
            targets.push(arg.clone());
        }
    }
    targets
}

/// `/cherry-pick <branch>...`: acknowledged while the PR is open, performed
/// once it is merged.
pub struct CherryPick {
    engine: Arc<CherryPickEngine>,
}

impl CherryPick {
    pub fn new(engine: Arc<CherryPickEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl CommandHandler for CherryPick {
    async fn run(&self, ctx: &CommandContext, args: &[String]) -> CommandResult {
        let targets = targets(args);
        if targets.is_empty() {
            return Err(CommandError::Invalid(
                "cherry-pick needs a target branch".to_string(),
            ));
        }

        let status = ctx.client().check_pr_status().await?;
        if status.merged {
            return self.engine.perform_all(ctx, &targets).await;
        }
        if status.state == ItemState::Open {
            for target in &targets {
                ctx.post(&render::cherry_pick_scheduled(target)).await?;
            }
            return Ok(());
        }
        ctx.deny(render::cherry_pick_unmerged(), "PR closed without merging")
            .await
    }
}

/// `__cherry-pick [branch...]`: performs the cherry-picks requested in the
/// comments, or the given branches. Runs after a merge.
pub struct CherryPickBuiltin {
    engine: Arc<CherryPickEngine>,
}

impl CherryPickBuiltin {
    pub fn new(engine: Arc<CherryPickEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl CommandHandler for CherryPickBuiltin {
    async fn run(&self, ctx: &CommandContext, args: &[String]) -> CommandResult {
        let targets = if args.is_empty() {
            requested_branches(ctx.comments().await?)
        } else {
            targets(args)
        };
        if targets.is_empty() {
            info!("No cherry-picks requested");
            return Ok(());
        }

        let status = ctx.client().check_pr_status().await?;
        if !status.merged {
            return Err(CommandError::Invalid(
                "cherry-picks run only on merged PRs".to_string(),
            ));
        }
        self.engine.perform_all(ctx, &targets).await
    }
}

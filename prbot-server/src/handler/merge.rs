//! `/merge`: the merge gate.
//!
//! Stages run in order and any of them may stop the merge with a comment:
//! permission, CI, votes, method choice, the rebase single-commit rule, the
//! merge itself. After a merge, result markers are written and requested
//! cherry-picks are started.

use async_trait::async_trait;
use prbot_core::checks::blocking_checks;
use prbot_core::cherry_pick::requested_branches;
use prbot_core::merge::{choose_auto, rebase_needs_squash, resolve_policy};
use prbot_core::render;
use prbot_core::{LgtmVotes, MergeMethod, MergePolicy, SubCommand};
use tracing::{error, info, warn};

use super::{CommandContext, CommandError, CommandHandler, CommandResult};
use crate::results::{record_results, HAS_CHERRY_PICK_COMMENTS, MERGE_SUCCESSFUL};

pub struct Merge;

#[async_trait]
impl CommandHandler for Merge {
    async fn run(&self, ctx: &CommandContext, args: &[String]) -> CommandResult {
        ctx.require_permission_or_author().await?;
        check_ci(ctx).await?;
        let votes = check_votes(ctx).await?;
        let method = choose_method(ctx, args).await?;
        if method == MergeMethod::Rebase {
            validate_rebase(ctx).await?;
        }
        execute(ctx, method).await?;
        post_merge(ctx, method, &votes).await
    }
}

async fn check_ci(ctx: &CommandContext) -> CommandResult {
    let runs = ctx.client().check_runs_status().await?;
    let failed = blocking_checks(&runs, ctx.config().self_check_name.as_deref());
    if failed.is_empty() {
        return Ok(());
    }
    info!("{} check(s) block the merge", failed.len());
    ctx.deny(
        render::ci_failed(&failed),
        format!("{} check(s) not passing", failed.len()),
    )
    .await
}

async fn check_votes(ctx: &CommandContext) -> CommandResult<LgtmVotes> {
    ctx.comments().await?;
    let votes = ctx.votes().await?;
    let settings = ctx.settings();
    if votes.valid >= settings.threshold {
        return Ok(votes);
    }
    ctx.deny(
        render::not_enough_lgtm(&votes, &settings),
        format!(
            "not enough LGTM votes ({}/{})",
            votes.valid, settings.threshold
        ),
    )
    .await
}

async fn choose_method(ctx: &CommandContext, args: &[String]) -> CommandResult<MergeMethod> {
    match resolve_policy(args, ctx.config().merge_policy) {
        MergePolicy::Method(method) => Ok(method),
        MergePolicy::Auto => {
            let available = ctx.client().get_available_merge_methods().await?;
            let method = choose_auto(&available);
            info!("Auto merge picked {} from {:?}", method, available);
            Ok(method)
        }
    }
}

async fn validate_rebase(ctx: &CommandContext) -> CommandResult {
    let commits = match ctx.client().get_commits().await {
        Ok(commits) => commits,
        Err(e) => {
            warn!("Could not list commits, merging anyway: {}", e);
            return Ok(());
        }
    };
    if !rebase_needs_squash(&commits) {
        return Ok(());
    }
    ctx.deny(
        render::rebase_needs_single_commit(&commits),
        format!("rebase merge needs one commit, found {}", commits.len()),
    )
    .await
}

async fn execute(ctx: &CommandContext, method: MergeMethod) -> CommandResult {
    info!("Merging {} with {}", ctx.client().target(), method);
    if let Err(e) = ctx.client().merge_pr(method).await {
        error!("Merge of {} failed: {}", ctx.client().target(), e);
        return ctx
            .deny(render::merge_failed(&e.to_string()), format!("merge failed: {}", e))
            .await;
    }
    Ok(())
}

async fn post_merge(ctx: &CommandContext, method: MergeMethod, votes: &LgtmVotes) -> CommandResult {
    let branches = requested_branches(ctx.comments().await?);
    record_results(
        ctx.config().results_dir.as_deref(),
        &[
            (MERGE_SUCCESSFUL, "true".to_string()),
            (HAS_CHERRY_PICK_COMMENTS, (!branches.is_empty()).to_string()),
        ],
    )
    .await;

    ctx.post(&render::merge_succeeded(
        method,
        ctx.commenter(),
        votes,
        &ctx.settings(),
        &branches,
    ))
    .await?;

    if !branches.is_empty() {
        info!("Starting cherry-picks to {:?}", branches);
        let builtin = SubCommand::new("__cherry-pick", branches);
        match ctx.invoke(&builtin).await {
            Ok(()) => {}
            Err(e @ CommandError::Commented { .. }) => {
                info!("Cherry-pick after merge reported: {}", e)
            }
            Err(e) => warn!("Cherry-pick after merge failed: {}", e),
        }
    }
    Ok(())
}

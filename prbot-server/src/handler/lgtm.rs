use async_trait::async_trait;
use prbot_core::lgtm::effective_reviews;
use prbot_core::render;
use prbot_core::{normalize_login, ReviewState};
use tracing::info;

use super::{CommandContext, CommandHandler, CommandResult};

/// `/lgtm`: record a vote and approve once the threshold is reached.
pub struct Lgtm;

#[async_trait]
impl CommandHandler for Lgtm {
    async fn run(&self, ctx: &CommandContext, _args: &[String]) -> CommandResult {
        if !ctx.config().debug && ctx.commenter_is_author().await? {
            return ctx
                .deny(
                    render::self_vote_denied(ctx.commenter()),
                    "authors cannot LGTM their own PR",
                )
                .await;
        }
        ctx.require_permission().await?;

        let votes = ctx.votes().await?;
        let settings = ctx.settings();
        if votes.valid >= settings.threshold {
            info!("LGTM threshold reached, approving");
            ctx.client()
                .approve_pr(&render::lgtm_approved(&votes, &settings))
                .await?;
        } else {
            ctx.post(&render::lgtm_pending(&votes, &settings)).await?;
        }
        Ok(())
    }
}

/// `/remove-lgtm` and `/lgtm cancel`.
///
/// The approval is dismissed only when this withdrawal takes the PR from at
/// or above the threshold to below it.
pub struct RemoveLgtm;

#[async_trait]
impl CommandHandler for RemoveLgtm {
    async fn run(&self, ctx: &CommandContext, _args: &[String]) -> CommandResult {
        let reviews = ctx.client().get_reviews().await?;
        let commenter = normalize_login(ctx.commenter());
        let has_approving_review = effective_reviews(&reviews)
            .get(&commenter)
            .is_some_and(|r| r.state == ReviewState::Approved);
        if has_approving_review {
            return ctx
                .deny(
                    render::remove_lgtm_review_still_approved(ctx.commenter()),
                    "approving review still counts",
                )
                .await;
        }

        let before = ctx.tally(&reviews, Some(ctx.commenter())).await?;
        let after = ctx.tally(&reviews, None).await?;
        let settings = ctx.settings();

        if before.valid >= settings.threshold && after.valid < settings.threshold {
            info!(
                "LGTM votes dropped from {} to {}, dismissing approval",
                before.valid, after.valid
            );
            ctx.client()
                .dismiss_approve(&render::remove_lgtm_dismissed(&after, &settings))
                .await?;
        } else {
            ctx.post(&render::remove_lgtm_recorded(&after, &settings))
                .await?;
        }
        Ok(())
    }
}

use async_trait::async_trait;
use prbot_core::render;
use tracing::info;

use super::{CommandContext, CommandError, CommandHandler, CommandResult};

pub struct Help;

#[async_trait]
impl CommandHandler for Help {
    async fn run(&self, ctx: &CommandContext, _args: &[String]) -> CommandResult {
        ctx.post(&render::help(&ctx.settings())).await
    }
}

/// Usernames from arguments, defaulting to the commenter.
fn users_or_commenter(ctx: &CommandContext, args: &[String]) -> Vec<String> {
    let users: Vec<String> = args
        .iter()
        .map(|a| a.trim_start_matches('@').to_string())
        .filter(|a| !a.is_empty())
        .collect();
    if users.is_empty() {
        vec![ctx.commenter().to_string()]
    } else {
        users
    }
}

pub struct Assign;

#[async_trait]
impl CommandHandler for Assign {
    async fn run(&self, ctx: &CommandContext, args: &[String]) -> CommandResult {
        let users = users_or_commenter(ctx, args);
        info!("Requesting review from {:?}", users);
        ctx.client().assign_reviewers(&users).await?;
        Ok(())
    }
}

pub struct Unassign;

#[async_trait]
impl CommandHandler for Unassign {
    async fn run(&self, ctx: &CommandContext, args: &[String]) -> CommandResult {
        let users = users_or_commenter(ctx, args);
        info!("Removing review requests for {:?}", users);
        ctx.client().remove_reviewers(&users).await?;
        Ok(())
    }
}

fn labels(args: &[String], command: &str) -> CommandResult<Vec<String>> {
    if args.is_empty() {
        return Err(CommandError::Invalid(format!(
            "{} needs at least one label",
            command
        )));
    }
    Ok(args.to_vec())
}

pub struct Label;

#[async_trait]
impl CommandHandler for Label {
    async fn run(&self, ctx: &CommandContext, args: &[String]) -> CommandResult {
        let labels = labels(args, "label")?;
        ctx.client().add_labels(&labels).await?;
        Ok(())
    }
}

pub struct Unlabel;

#[async_trait]
impl CommandHandler for Unlabel {
    async fn run(&self, ctx: &CommandContext, args: &[String]) -> CommandResult {
        let labels = labels(args, "unlabel")?;
        ctx.client().remove_labels(&labels).await?;
        Ok(())
    }
}

pub struct Close;

#[async_trait]
impl CommandHandler for Close {
    async fn run(&self, ctx: &CommandContext, _args: &[String]) -> CommandResult {
        ctx.require_permission_or_author().await?;
        ctx.client().close_pr().await?;
        Ok(())
    }
}

pub struct Rebase;

#[async_trait]
impl CommandHandler for Rebase {
    async fn run(&self, ctx: &CommandContext, _args: &[String]) -> CommandResult {
        ctx.require_permission_or_author().await?;
        ctx.client().rebase_pr().await?;
        Ok(())
    }
}

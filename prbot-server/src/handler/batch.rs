//! `/batch` and `/check`: several sub-commands in one comment, reported in a
//! single summary.

use async_trait::async_trait;
use prbot_core::checks::blocking_checks;
use prbot_core::command::split_sub_commands;
use prbot_core::render::{self, BatchEntry, BatchOutcome};
use prbot_core::SubCommand;
use tracing::info;

use super::{CommandContext, CommandError, CommandHandler, CommandResult};

pub const BATCH_HEADER: &str = "Batch Execution Results:";
pub const CHECK_HEADER: &str = "Check Command Results:";

pub fn header_for(command: &str) -> &'static str {
    if command == "check" {
        CHECK_HEADER
    } else {
        BATCH_HEADER
    }
}

pub fn sub_commands(args: &[String]) -> Vec<SubCommand> {
    split_sub_commands(args)
}

/// Commands that must run on their own.
fn allowed_in_batch(cmd: &SubCommand) -> bool {
    if cmd.is_builtin() {
        return false;
    }
    match cmd.command.as_str() {
        "batch" | "lgtm" | "remove-lgtm" => false,
        "check" => cmd.args.is_empty(),
        _ => true,
    }
}

/// Run `subs` in order and post one summary. Fails with the commented marker
/// when any entry failed.
pub async fn run_batch(ctx: &CommandContext, header: &str, subs: Vec<SubCommand>) -> CommandResult {
    if subs.is_empty() {
        return ctx.post(&render::batch_empty(header)).await;
    }

    let mut entries = Vec::with_capacity(subs.len());
    for cmd in subs {
        let outcome = if !allowed_in_batch(&cmd) {
            info!("{} is not allowed in a batch", cmd);
            BatchOutcome::NotAllowed
        } else {
            match ctx.invoke(&cmd).await {
                Ok(()) => BatchOutcome::Succeeded,
                Err(e) => BatchOutcome::Failed(e.root_cause()),
            }
        };
        entries.push(BatchEntry {
            command: cmd.to_string(),
            outcome,
        });
    }

    ctx.post(&render::batch_summary(header, &entries)).await?;
    let failed = entries.iter().filter(|e| e.failed()).count();
    if failed == 0 {
        Ok(())
    } else {
        Err(CommandError::commented(format!(
            "{} of {} batch command(s) failed",
            failed,
            entries.len()
        )))
    }
}

pub struct Batch;

#[async_trait]
impl CommandHandler for Batch {
    async fn run(&self, ctx: &CommandContext, args: &[String]) -> CommandResult {
        run_batch(ctx, BATCH_HEADER, sub_commands(args)).await
    }
}

/// `/check` reports LGTM and CI status; with arguments it runs them as a batch.
pub struct Check;

#[async_trait]
impl CommandHandler for Check {
    async fn run(&self, ctx: &CommandContext, args: &[String]) -> CommandResult {
        if !args.is_empty() {
            return run_batch(ctx, CHECK_HEADER, sub_commands(args)).await;
        }

        let votes = ctx.votes().await?;
        let runs = ctx.client().check_runs_status().await?;
        let failing = blocking_checks(&runs, ctx.config().self_check_name.as_deref());
        ctx.post(&render::status_report(&votes, &ctx.settings(), &failing))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cmd(name: &str, args: &[&str]) -> SubCommand {
        SubCommand::new(name, args.iter().map(|s| s.to_string()).collect())
    }

    #[test]
    fn test_allowed_in_batch() {
        assert!(allowed_in_batch(&cmd("assign", &["alice"])));
        assert!(allowed_in_batch(&cmd("merge", &[])));
        assert!(allowed_in_batch(&cmd("check", &[])));
        assert!(!allowed_in_batch(&cmd("check", &["/merge"])));
        assert!(!allowed_in_batch(&cmd("batch", &["/help"])));
        assert!(!allowed_in_batch(&cmd("lgtm", &[])));
        assert!(!allowed_in_batch(&cmd("remove-lgtm", &[])));
        assert!(!allowed_in_batch(&cmd("__cherry-pick", &[])));
    }

    #[test]
    fn test_header_for() {
        assert_eq!(header_for("check"), CHECK_HEADER);
        assert_eq!(header_for("batch"), BATCH_HEADER);
    }
}

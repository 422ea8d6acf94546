use std::collections::BTreeSet;

use async_trait::async_trait;
use prbot_core::checks::{completed_failures, plan_retest};
use prbot_core::render;
use tracing::{info, warn};

use super::{CommandContext, CommandHandler, CommandResult};

/// `/retest [pipeline...]`: rerun failed CI.
///
/// Actions check suites get their failed jobs rerun through the API; other
/// checks are retriggered by posting `/test <pipeline>` for the CI bot.
pub struct Retest;

#[async_trait]
impl CommandHandler for Retest {
    async fn run(&self, ctx: &CommandContext, args: &[String]) -> CommandResult {
        let runs = ctx.client().check_runs_status().await?;
        let failed = completed_failures(&runs);
        if failed.is_empty() {
            return ctx.post(&render::retest_nothing_to_do()).await;
        }

        if !args.is_empty() {
            for pipeline in args {
                ctx.post(&format!("/test {}", pipeline)).await?;
            }
            return ctx.post(&render::retest_summary(0, args, &[])).await;
        }

        let config = ctx.config();
        let plan = plan_retest(
            &failed,
            config.self_check_name.as_deref(),
            &config.retest_skip_patterns,
        );
        info!(
            "Retest plan for {}: {} suite(s), {} pipeline(s), {} skipped",
            ctx.client().target(),
            plan.check_suites.len(),
            plan.pipelines.len(),
            plan.skipped.len()
        );

        let mut reran = BTreeSet::new();
        for suite in &plan.check_suites {
            let run_ids = ctx
                .client()
                .get_workflow_run_ids_from_check_suite(*suite)
                .await?;
            for run_id in run_ids {
                if !reran.insert(run_id) {
                    continue;
                }
                if let Err(e) = ctx.client().rerun_workflow_run_failed_jobs(run_id).await {
                    warn!("Rerun of workflow run {} failed: {}", run_id, e);
                    reran.remove(&run_id);
                }
            }
        }

        for pipeline in &plan.pipelines {
            ctx.post(&format!("/test {}", pipeline)).await?;
        }

        ctx.post(&render::retest_summary(
            reran.len(),
            &plan.pipelines,
            &plan.skipped,
        ))
        .await
    }
}

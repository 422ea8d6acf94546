//! Check-run classification for the merge gate and `/retest`.

use crate::model::{CheckConclusion, CheckRun, CheckStatus};

/// App slug GitHub reports for Actions-produced check runs.
pub const GITHUB_ACTIONS_APP: &str = "github-actions";

/// Checks `/retest` never retriggers: they are owned by external services.
pub const DEFAULT_RETEST_SKIP_PATTERNS: &[&str] = &[
    "codecov",
    "sonarcloud",
    "license",
    "cla",
    "semantic",
    "dependabot",
    "gitguardian",
    "security",
    "merge conflict",
];

const COMMON_TASK_NAMES: &[&str] = &["build", "test", "deploy", "lint", "check", "scan", "analyze"];

/// Whether `name` is this service's own check run, either exactly or as the
/// job part of a `Workflow / job` name.
pub fn is_self_check(name: &str, self_check: Option<&str>) -> bool {
    match self_check {
        Some(own) if !own.is_empty() => name == own || name.ends_with(&format!("/ {}", own)),
        _ => false,
    }
}

/// Checks that block a merge.
///
/// A check fails when it completed with anything other than success or
/// skipped, or when it has not completed yet. An incomplete self-check is
/// exempt so the gate never waits on itself.
pub fn blocking_checks<'a>(runs: &'a [CheckRun], self_check: Option<&str>) -> Vec<&'a CheckRun> {
    runs.iter()
        .filter(|run| match run.status {
            CheckStatus::Completed => is_failed_conclusion(run.conclusion.as_ref()),
            _ => !is_self_check(&run.name, self_check),
        })
        .collect()
}

/// Whether a completed check counts as failed: any conclusion other than
/// success or skipped.
fn is_failed_conclusion(conclusion: Option<&CheckConclusion>) -> bool {
    !matches!(
        conclusion,
        Some(CheckConclusion::Success) | Some(CheckConclusion::Skipped)
    )
}

/// Checks that finished unsuccessfully, by the same rule as
/// [`blocking_checks`]; pending ones are not retest candidates.
pub fn completed_failures(runs: &[CheckRun]) -> Vec<&CheckRun> {
    runs.iter()
        .filter(|run| {
            run.status == CheckStatus::Completed && is_failed_conclusion(run.conclusion.as_ref())
        })
        .collect()
}

/// Derive the CI pipeline name from a check name.
///
/// `Workflow / job` yields `job`; when the last segment is a generic task
/// name and there are at least three segments the one before it is used, so
/// `CI / integration / test` yields `integration`.
pub fn pipeline_name(check_name: &str) -> String {
    let segments: Vec<&str> = check_name.split(" / ").map(str::trim).collect();
    let last = segments.last().copied().unwrap_or(check_name);
    if segments.len() >= 3 && COMMON_TASK_NAMES.contains(&last.to_lowercase().as_str()) {
        segments[segments.len() - 2].to_string()
    } else {
        last.to_string()
    }
}

/// What `/retest` will do with the failed checks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetestPlan {
    /// Check names left alone.
    pub skipped: Vec<String>,
    /// Unique check suites whose workflow runs get their failed jobs rerun.
    pub check_suites: Vec<u64>,
    /// Unique pipeline names to retrigger with `/test <name>`.
    pub pipelines: Vec<String>,
}

impl RetestPlan {
    pub fn is_empty(&self) -> bool {
        self.check_suites.is_empty() && self.pipelines.is_empty()
    }
}

pub fn plan_retest(
    failed: &[&CheckRun],
    self_check: Option<&str>,
    skip_patterns: &[String],
) -> RetestPlan {
    let mut plan = RetestPlan::default();

    for run in failed {
        let lowered = run.name.to_lowercase();
        let excluded = skip_patterns
            .iter()
            .any(|pattern| lowered.contains(&pattern.to_lowercase()));
        if is_self_check(&run.name, self_check) || excluded {
            plan.skipped.push(run.name.clone());
            continue;
        }

        if run.app_slug == GITHUB_ACTIONS_APP {
            if let Some(suite) = run.check_suite_id {
                if !plan.check_suites.contains(&suite) {
                    plan.check_suites.push(suite);
                }
                continue;
            }
        }

        let pipeline = pipeline_name(&run.name);
        if !plan.pipelines.contains(&pipeline) {
            plan.pipelines.push(pipeline);
        }
    }

    plan
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(name: &str, status: CheckStatus, conclusion: Option<&str>) -> CheckRun {
        CheckRun {
            name: name.into(),
            status,
            conclusion: conclusion.map(CheckConclusion::from),
            url: String::new(),
            app_slug: String::new(),
            check_suite_id: None,
        }
    }

    fn skip_list() -> Vec<String> {
        DEFAULT_RETEST_SKIP_PATTERNS
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    #[test]
    fn test_incomplete_self_check_is_not_blocking() {
        let runs = vec![
            run("CI / pr-gate", CheckStatus::InProgress, None),
            run("CI / tests", CheckStatus::Queued, None),
        ];
        let blocking = blocking_checks(&runs, Some("pr-gate"));
        assert_eq!(blocking.len(), 1);
        assert_eq!(blocking[0].name, "CI / tests");
    }

    #[test]
    fn test_completed_conclusions() {
        let runs = vec![
            run("a", CheckStatus::Completed, Some("success")),
            run("b", CheckStatus::Completed, Some("skipped")),
            run("c", CheckStatus::Completed, Some("failure")),
            run("d", CheckStatus::Completed, Some("neutral")),
            run("e", CheckStatus::Completed, Some("timed_out")),
        ];
        let names: Vec<&str> = blocking_checks(&runs, None)
            .iter()
            .map(|r| r.name.as_str())
            .collect();
        assert_eq!(names, vec!["c", "d", "e"]);
    }

    #[test]
    fn test_self_check_matching() {
        assert!(is_self_check("pr-gate", Some("pr-gate")));
        assert!(is_self_check("CI / pr-gate", Some("pr-gate")));
        assert!(!is_self_check("CI / pr-gate-extra", Some("pr-gate")));
        assert!(!is_self_check("pr-gate", None));
        assert!(!is_self_check("pr-gate", Some("")));
    }

    #[test]
    fn test_pipeline_name() {
        assert_eq!(pipeline_name("unit-tests"), "unit-tests");
        assert_eq!(pipeline_name("CI / unit-tests"), "unit-tests");
        assert_eq!(pipeline_name("CI / integration / test"), "integration");
        assert_eq!(pipeline_name("CI / build"), "build");
        assert_eq!(pipeline_name("a / b / lint-extra"), "lint-extra");
    }

    #[test]
    fn test_plan_retest_partitions_failures() {
        let mut actions_a = run("CI / unit", CheckStatus::Completed, Some("failure"));
        actions_a.app_slug = GITHUB_ACTIONS_APP.into();
        actions_a.check_suite_id = Some(7);
        let mut actions_b = run("CI / lint", CheckStatus::Completed, Some("failure"));
        actions_b.app_slug = GITHUB_ACTIONS_APP.into();
        actions_b.check_suite_id = Some(7);
        let runs = vec![
            actions_a,
            actions_b,
            run("codecov/patch", CheckStatus::Completed, Some("failure")),
            run("CI / pr-gate", CheckStatus::Completed, Some("failure")),
            run("jenkins / e2e / test", CheckStatus::Completed, Some("failure")),
            run("jenkins / e2e / build", CheckStatus::Completed, Some("failure")),
        ];
        let failed: Vec<&CheckRun> = runs.iter().collect();
        let plan = plan_retest(&failed, Some("pr-gate"), &skip_list());

        assert_eq!(plan.check_suites, vec![7]);
        assert_eq!(plan.pipelines, vec!["e2e".to_string()]);
        assert_eq!(
            plan.skipped,
            vec!["codecov/patch".to_string(), "CI / pr-gate".to_string()]
        );
        assert!(!plan.is_empty());
    }

    #[test]
    fn test_completed_failures_ignores_pending() {
        let runs = vec![
            run("a", CheckStatus::InProgress, None),
            run("b", CheckStatus::Completed, Some("cancelled")),
            run("c", CheckStatus::Completed, Some("success")),
        ];
        let names: Vec<&str> = completed_failures(&runs)
            .iter()
            .map(|r| r.name.as_str())
            .collect();
        assert_eq!(names, vec!["b"]);
    }

    #[test]
    fn test_completed_failures_agree_with_merge_gate() {
        let runs = vec![
            run("a", CheckStatus::Completed, Some("success")),
            run("b", CheckStatus::Completed, Some("skipped")),
            run("c", CheckStatus::Completed, Some("failure")),
            run("d", CheckStatus::Completed, Some("neutral")),
            run("e", CheckStatus::Completed, Some("timed_out")),
            run("f", CheckStatus::Completed, None),
        ];
        let retest: Vec<&str> = completed_failures(&runs)
            .iter()
            .map(|r| r.name.as_str())
            .collect();
        let blocking: Vec<&str> = blocking_checks(&runs, None)
            .iter()
            .map(|r| r.name.as_str())
            .collect();
        assert_eq!(retest, vec!["c", "d", "e", "f"]);
        assert_eq!(retest, blocking);
    }
}

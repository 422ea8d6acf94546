//! Markdown bodies for comments and reviews posted back to the PR.

use std::fmt::Write as _;

use crate::lgtm::LgtmVotes;
use crate::merge::{commit_subject, short_sha};
use crate::model::{CheckRun, Commit, MergeMethod, MergePolicy, PermissionSet};

/// Settings shown in `/help` and status comments.
#[derive(Debug, Clone)]
pub struct Settings<'a> {
    pub threshold: usize,
    pub permissions: &'a PermissionSet,
    pub merge_policy: MergePolicy,
}

const HELP_ROWS: &[(&str, &str)] = &[
    ("`/help`", "Show this message"),
    ("`/assign [users...]`", "Request review (defaults to you)"),
    ("`/unassign [users...]`", "Remove review requests (defaults to you)"),
    ("`/lgtm`", "Vote to approve this PR"),
    ("`/remove-lgtm`, `/lgtm cancel`", "Withdraw your vote"),
    (
        "`/merge [merge\\|squash\\|rebase\\|auto]`, `/ready`",
        "Merge once CI and votes pass",
    ),
    ("`/rebase`", "Update the branch from its base"),
    ("`/close`", "Close this PR"),
    (
        "`/cherry-pick <branch>`, `/cherrypick`",
        "Backport to a branch once merged",
    ),
    ("`/label <labels...>`", "Add labels"),
    ("`/unlabel <labels...>`", "Remove labels"),
    ("`/retest [pipelines...]`", "Rerun failed CI"),
    ("`/checkbox`", "Tick every box in the PR description"),
    (
        "`/checkbox-issue [number] [--title T] [--author A]`",
        "Tick every box in an issue",
    ),
    ("`/check [commands...]`", "Report status, or run commands"),
    ("`/batch <commands...>`", "Run several commands in order"),
];

pub fn help(settings: &Settings<'_>) -> String {
    let mut out = String::from("### Available commands\n\n| Command | Description |\n|---|---|\n");
    for (command, description) in HELP_ROWS {
        let _ = writeln!(out, "| {} | {} |", command, description);
    }
    let _ = write!(
        out,
        "\n**Settings:** LGTM threshold `{}`, voting permissions `{}`, default merge method `{}`.",
        settings.threshold, settings.permissions, settings.merge_policy
    );
    out
}

/// Voters with their permission and whether the vote counts.
pub fn vote_table(votes: &LgtmVotes, permissions: &PermissionSet) -> String {
    if votes.users.is_empty() {
        return "_No votes yet._".to_string();
    }
    let mut out = String::from("| Reviewer | Permission | Counts |\n|---|---|---|");
    for (user, permission) in &votes.users {
        let mark = if permissions.contains(*permission) {
            "✅"
        } else {
            "❌"
        };
        let _ = write!(out, "\n| @{} | {} | {} |", user, permission, mark);
    }
    out
}

/// Comment posted when a vote was recorded but the threshold is not reached.
pub fn lgtm_pending(votes: &LgtmVotes, settings: &Settings<'_>) -> String {
    format!(
        "### LGTM pending\n\n**{}/{} LGTM votes**, {} more required.\n\nVotes count from users with permission: {}.\n\n{}",
        votes.valid,
        settings.threshold,
        votes.missing(settings.threshold),
        settings.permissions,
        vote_table(votes, settings.permissions)
    )
}

/// Review body used when the threshold is reached.
pub fn lgtm_approved(votes: &LgtmVotes, settings: &Settings<'_>) -> String {
    format!(
        "### LGTM threshold reached\n\n**{}/{} LGTM votes**\n\n{}",
        votes.valid,
        settings.threshold,
        vote_table(votes, settings.permissions)
    )
}

pub fn self_vote_denied(user: &str) -> String {
    format!("@{} you cannot LGTM your own pull request.", user)
}

pub fn remove_lgtm_dismissed(votes: &LgtmVotes, settings: &Settings<'_>) -> String {
    format!(
        "LGTM withdrawn; approval dismissed. Now at **{}/{} LGTM votes**.",
        votes.valid, settings.threshold
    )
}

pub fn remove_lgtm_recorded(votes: &LgtmVotes, settings: &Settings<'_>) -> String {
    format!(
        "LGTM withdrawn. Now at **{}/{} LGTM votes**.",
        votes.valid, settings.threshold
    )
}

pub fn remove_lgtm_review_still_approved(user: &str) -> String {
    format!(
        "@{} your approving review still counts. Submit a review requesting changes or dismiss it to withdraw your vote.",
        user
    )
}

pub fn insufficient_permissions(user: &str, permissions: &PermissionSet) -> String {
    format!(
        "@{} you do not have permission to do that. Required: {}.",
        user, permissions
    )
}

pub fn unknown_command(name: &str) -> String {
    format!("Unknown command `/{}`. Comment `/help` for the list.", name)
}

pub fn builtin_refused(name: &str) -> String {
    format!("Command `/{}` is internal and cannot be run from a comment.", name)
}

/// Table of checks blocking a merge.
pub fn ci_failed(failed: &[&CheckRun]) -> String {
    let mut out = String::from("### CI is not passing\n\n| Check | State |\n|---|---|");
    for run in failed {
        let name = if run.url.is_empty() {
            run.name.clone()
        } else {
            format!("[{}]({})", run.name, run.url)
        };
        let _ = write!(out, "\n| {} | {} |", name, run.state_label());
    }
    out
}

pub fn not_enough_lgtm(votes: &LgtmVotes, settings: &Settings<'_>) -> String {
    format!(
        "### Not enough LGTM\n\n**{}/{} LGTM votes**, {} more required.\n\n{}",
        votes.valid,
        settings.threshold,
        votes.missing(settings.threshold),
        vote_table(votes, settings.permissions)
    )
}

/// Refusal listing the commits that block a rebase merge.
pub fn rebase_needs_single_commit(commits: &[Commit]) -> String {
    let mut out = format!(
        "### Rebase merge needs a single commit\n\nThis PR has {} commits. Squash them first, or use `/merge squash`.\n\n| SHA | Message |\n|---|---|",
        commits.len()
    );
    for commit in commits {
        let _ = write!(
            out,
            "\n| `{}` | {} |",
            short_sha(&commit.sha),
            commit_subject(&commit.message).replace('|', "\\|")
        );
    }
    out
}

pub fn merge_failed(error: &str) -> String {
    format!("### Merge failed\n\n```\n{}\n```", error)
}

pub fn merge_succeeded(
    method: MergeMethod,
    merged_by: &str,
    votes: &LgtmVotes,
    settings: &Settings<'_>,
    cherry_picks: &[String],
) -> String {
    let voters: Vec<String> = votes
        .users
        .iter()
        .filter(|(_, p)| settings.permissions.contains(**p))
        .map(|(user, _)| format!("@{}", user))
        .collect();
    let mut out = format!(
        "### Merged\n\nMerged with `{}` by @{}.\n\n**LGTM votes ({}/{}):** {}",
        method,
        merged_by,
        votes.valid,
        settings.threshold,
        voters.join(", ")
    );
    if !cherry_picks.is_empty() {
        let targets: Vec<String> = cherry_picks.iter().map(|b| format!("`{}`", b)).collect();
        let _ = write!(out, "\n\nCherry-picks requested to: {}", targets.join(", "));
    }
    out
}

pub fn cherry_pick_scheduled(branch: &str) -> String {
    format!(
        "Cherry-pick to `{}` scheduled. It will run once this PR is merged.",
        branch
    )
}

pub fn cherry_pick_branch_missing(branch: &str) -> String {
    format!("Cherry-pick skipped: branch `{}` does not exist.", branch)
}

pub fn cherry_pick_unmerged() -> String {
    "Cherry-pick refused: this PR was closed without being merged.".to_string()
}

pub fn cherry_pick_created(branch: &str, pr_url: &str) -> String {
    format!("Cherry-pick to `{}` opened: {}", branch, pr_url)
}

pub fn cherry_pick_failed(branch: &str, error: &str) -> String {
    format!("Cherry-pick to `{}` failed:\n\n```\n{}\n```", branch, error)
}

pub fn cherry_pick_body(pr_number: u64, pr_url: &str, commits: &[Commit]) -> String {
    let mut out = format!("Cherry-pick of #{} ({}).\n\nCommits:", pr_number, pr_url);
    for commit in commits {
        let _ = write!(
            out,
            "\n- `{}` {}",
            short_sha(&commit.sha),
            commit_subject(&commit.message)
        );
    }
    out
}

pub fn checkbox_no_description(target: &str) -> String {
    format!("{} has no description.", target)
}

pub fn checkbox_already_checked(target: &str) -> String {
    format!("All checkboxes in {} are already checked.", target)
}

pub fn checkbox_updated(target: &str, count: usize) -> String {
    let noun = if count == 1 { "checkbox" } else { "checkboxes" };
    format!("Checked {} {} in {}.", count, noun, target)
}

pub fn checkbox_update_failed(target: &str, reason: &str) -> String {
    format!("❌ Could not update the checkboxes in {}: {}", target, reason)
}

pub fn retest_nothing_to_do() -> String {
    "Nothing to retest: no failed checks.".to_string()
}

pub fn retest_summary(
    workflow_runs: usize,
    pipelines: &[String],
    skipped: &[String],
) -> String {
    let mut out = String::from("### Retest\n");
    if workflow_runs > 0 {
        let _ = write!(
            out,
            "\n- Reran failed jobs in {} workflow run(s)",
            workflow_runs
        );
    }
    let mut list = |label: &str, items: &[String]| {
        if !items.is_empty() {
            let items: Vec<String> = items.iter().map(|i| format!("`{}`", i)).collect();
            let _ = write!(out, "\n- {}: {}", label, items.join(", "));
        }
    };
    list("Triggered pipelines", pipelines);
    list("Skipped", skipped);
    out
}

/// Read-only report produced by `/check` without arguments.
pub fn status_report(votes: &LgtmVotes, settings: &Settings<'_>, failing: &[&CheckRun]) -> String {
    let lgtm = if votes.missing(settings.threshold) == 0 {
        format!("✅ {}/{} votes", votes.valid, settings.threshold)
    } else {
        format!(
            "⏳ {}/{} votes, {} more required",
            votes.valid,
            settings.threshold,
            votes.missing(settings.threshold)
        )
    };
    let ci = if failing.is_empty() {
        "✅ all checks passing".to_string()
    } else {
        format!("❌ {} check(s) not passing", failing.len())
    };
    let mut out = format!("### PR status\n\n**LGTM:** {}\n**CI:** {}", lgtm, ci);
    for run in failing {
        let _ = write!(out, "\n- {} ({})", run.name, run.state_label());
    }
    out
}

/// Result of one sub-command in a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOutcome {
    Succeeded,
    Failed(String),
    NotAllowed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchEntry {
    /// The command as `/name args`.
    pub command: String,
    pub outcome: BatchOutcome,
}

impl BatchEntry {
    pub fn failed(&self) -> bool {
        !matches!(self.outcome, BatchOutcome::Succeeded)
    }
}

pub fn batch_summary(header: &str, entries: &[BatchEntry]) -> String {
    let mut out = format!("**{}**", header);
    if entries.iter().any(BatchEntry::failed) {
        out.push_str(" (⚠️ Some commands failed)");
    }
    out.push('\n');
    for entry in entries {
        let line = match &entry.outcome {
            BatchOutcome::Succeeded => {
                format!("✅ Command `{}` executed successfully", entry.command)
            }
            BatchOutcome::Failed(reason) => {
                format!("❌ Command `{}` failed: {}", entry.command, reason)
            }
            BatchOutcome::NotAllowed => {
                format!("❌ Command `{}` is not allowed in batch execution", entry.command)
            }
        };
        out.push('\n');
        out.push_str(&line);
    }
    out
}

pub fn batch_empty(header: &str) -> String {
    format!("**{}**\n\nNo commands given.", header)
}

/// Reply to a single command that was rejected before doing anything.
pub fn command_failed(command: &str, reason: &str) -> String {
    format!("❌ Command `{}` failed: {}", command, reason)
}

pub fn checkbox_issue_not_found(title: &str, author: &str) -> String {
    format!(
        "No open issue titled like `{}` by @{} was found.",
        title, author
    )
}

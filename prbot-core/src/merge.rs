//! Merge method selection and pre-merge commit inspection.

use crate::model::{Commit, MergeMethod, MergePolicy};

/// Preference order when the policy is `auto`.
pub const AUTO_PRIORITY: [MergeMethod; 3] =
    [MergeMethod::Rebase, MergeMethod::Squash, MergeMethod::Merge];

const COMMIT_SUBJECT_LIMIT: usize = 60;

/// Resolve the policy for one `/merge` invocation.
///
/// A first argument naming a method (or `auto`) overrides the configured
/// default; anything else is ignored.
pub fn resolve_policy(args: &[String], default: MergePolicy) -> MergePolicy {
    args.first()
        .and_then(|arg| arg.parse::<MergePolicy>().ok())
        .unwrap_or(default)
}

/// First allowed method in [`AUTO_PRIORITY`]; squash when the repository
/// reports nothing.
pub fn choose_auto(available: &[MergeMethod]) -> MergeMethod {
    AUTO_PRIORITY
        .iter()
        .copied()
        .find(|method| available.contains(method))
        .unwrap_or(MergeMethod::Squash)
}

pub fn short_sha(sha: &str) -> &str {
    match sha.char_indices().nth(7) {
        Some((idx, _)) => &sha[..idx],
        None => sha,
    }
}

/// First line of a commit message, cut to 60 characters with a `...` marker.
pub fn commit_subject(message: &str) -> String {
    let first = message.lines().next().unwrap_or("").trim_end();
    if first.chars().count() > COMMIT_SUBJECT_LIMIT {
        let cut: String = first.chars().take(COMMIT_SUBJECT_LIMIT - 3).collect();
        format!("{}...", cut)
    } else {
        first.to_string()
    }
}

/// Rebase-merging replays every commit onto the base; refuse when there is
/// more than one so history does not fill with fixups.
pub fn rebase_needs_squash(commits: &[Commit]) -> bool {
    commits.len() > 1
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_resolve_policy_override() {
        let default = MergePolicy::Method(MergeMethod::Squash);
        assert_eq!(
            resolve_policy(&args(&["rebase"]), default),
            MergePolicy::Method(MergeMethod::Rebase)
        );
        assert_eq!(resolve_policy(&args(&["AUTO"]), default), MergePolicy::Auto);
        assert_eq!(resolve_policy(&args(&["please"]), default), default);
        assert_eq!(resolve_policy(&[], MergePolicy::Auto), MergePolicy::Auto);
    }

    #[test]
    fn test_choose_auto_priority() {
        assert_eq!(
            choose_auto(&[MergeMethod::Merge, MergeMethod::Rebase]),
            MergeMethod::Rebase
        );
        assert_eq!(
            choose_auto(&[MergeMethod::Merge, MergeMethod::Squash]),
            MergeMethod::Squash
        );
        assert_eq!(choose_auto(&[MergeMethod::Merge]), MergeMethod::Merge);
        assert_eq!(choose_auto(&[]), MergeMethod::Squash);
    }

    #[test]
    fn test_short_sha() {
        assert_eq!(short_sha("0123456789abcdef"), "0123456");
        assert_eq!(short_sha("abc"), "abc");
    }

    #[test]
    fn test_commit_subject_truncation() {
        assert_eq!(commit_subject("fix: typo\n\nlonger body"), "fix: typo");
        let long = "x".repeat(80);
        let subject = commit_subject(&long);
        assert_eq!(subject.chars().count(), 60);
        assert!(subject.ends_with("..."));
        assert_eq!(commit_subject(&"y".repeat(60)), "y".repeat(60));
    }
}

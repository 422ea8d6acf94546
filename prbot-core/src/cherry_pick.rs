//! Cherry-pick planning: branch names, requested targets, tree replay.

use std::collections::HashMap;

use crate::command::{parse_comment, ParsedCommand};
use crate::merge::short_sha;
use crate::model::{Comment, TreeEntry};

/// Name of the branch a backport is pushed to.
pub fn branch_name(pr_number: u64, target: &str, sha: &str) -> String {
    format!("cherry-pick-{}-to-{}-{}", pr_number, target, short_sha(sha))
}

/// Title of the backport pull request.
pub fn backport_title(original_title: &str) -> String {
    format!("[Cherry-pick] {}", original_title)
}

/// Every target branch named by `/cherry-pick` or `/cherrypick` in the
/// comments, in first-seen order without duplicates.
pub fn requested_branches(comments: &[Comment]) -> Vec<String> {
    let mut branches: Vec<String> = Vec::new();
    for comment in comments {
        let Ok(parsed) = parse_comment(&comment.body) else {
            continue;
        };
        let commands = match parsed {
            ParsedCommand::BuiltIn(_) => continue,
            other => other.commands(),
        };
        for command in commands.iter().filter(|c| c.command == "cherry-pick") {
            for branch in &command.args {
                if !branches.contains(branch) {
                    branches.push(branch.clone());
                }
            }
        }
    }
    branches
}

/// One change to apply to the target tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeChange {
    Upsert(TreeEntry),
    Delete(String),
}

impl TreeChange {
    pub fn path(&self) -> &str {
        match self {
            Self::Upsert(entry) => &entry.path,
            Self::Delete(path) => path,
        }
    }
}

/// Changes that replay `commit` (relative to its first parent) onto `target`.
///
/// Paths changed or added by the commit are written with the commit's entry.
/// Paths the commit removed are deleted, when the target still has them.
/// Everything else keeps the target's version. Trees are flat: subtree
/// entries are compared by their own SHA only.
pub fn synthesize_tree(
    parent: &[TreeEntry],
    commit: &[TreeEntry],
    target: &[TreeEntry],
) -> Vec<TreeChange> {
    let parent_by_path: HashMap<&str, &TreeEntry> =
        parent.iter().map(|e| (e.path.as_str(), e)).collect();
    let commit_by_path: HashMap<&str, &TreeEntry> =
        commit.iter().map(|e| (e.path.as_str(), e)).collect();
    let target_by_path: HashMap<&str, &TreeEntry> =
        target.iter().map(|e| (e.path.as_str(), e)).collect();

    let mut changes = Vec::new();

    for entry in commit {
        let changed = parent_by_path
            .get(entry.path.as_str())
            .map_or(true, |old| old.sha != entry.sha || old.mode != entry.mode);
        let already_there = target_by_path
            .get(entry.path.as_str())
            .is_some_and(|t| t.sha == entry.sha && t.mode == entry.mode);
        if changed && !already_there {
            changes.push(TreeChange::Upsert(entry.clone()));
        }
    }

    for entry in parent {
        if !commit_by_path.contains_key(entry.path.as_str())
            && target_by_path.contains_key(entry.path.as_str())
        {
            changes.push(TreeChange::Delete(entry.path.clone()));
        }
    }

    changes
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn entry(path: &str, sha: &str) -> TreeEntry {
        TreeEntry {
            path: path.into(),
            mode: "100644".into(),
            kind: "blob".into(),
            sha: sha.into(),
        }
    }

    fn comment(body: &str) -> Comment {
        Comment {
            id: 1,
            author: "alice".into(),
            body: body.into(),
            url: String::new(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_branch_name() {
        assert_eq!(
            branch_name(42, "release-1.0", "abcdef0123456"),
            "cherry-pick-42-to-release-1.0-abcdef0"
        );
    }

    #[test]
    fn test_requested_branches_union() {
        let comments = vec![
            comment("/cherry-pick release-1.0"),
            comment("/cherrypick release-2.0 release-1.0"),
            comment("please /cherry-pick release-3.0"),
            comment("/label bug\n/cherry-pick release-4.0"),
            comment("/__cherry-pick release-5.0"),
        ];
        assert_eq!(
            requested_branches(&comments),
            vec!["release-1.0", "release-2.0", "release-4.0"]
        );
    }

    #[test]
    fn test_synthesize_tree() {
        let parent = vec![
            entry("README.md", "r1"),
            entry("lib.rs", "l1"),
            entry("old.rs", "o1"),
            entry("gone.rs", "g1"),
        ];
        let commit = vec![
            entry("README.md", "r1"),
            entry("lib.rs", "l2"),
            entry("new.rs", "n1"),
        ];
        let target = vec![
            entry("README.md", "r0"),
            entry("lib.rs", "l0"),
            entry("old.rs", "o1"),
            entry("extra.rs", "e1"),
        ];

        let changes = synthesize_tree(&parent, &commit, &target);
        assert_eq!(
            changes,
            vec![
                TreeChange::Upsert(entry("lib.rs", "l2")),
                TreeChange::Upsert(entry("new.rs", "n1")),
                TreeChange::Delete("old.rs".into()),
            ]
        );
    }

    #[test]
    fn test_synthesize_tree_skips_changes_already_on_target() {
        let parent = vec![entry("a", "1")];
        let commit = vec![entry("a", "2")];
        let target = vec![entry("a", "2")];
        assert!(synthesize_tree(&parent, &commit, &target).is_empty());
    }
}

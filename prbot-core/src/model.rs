//! Platform-neutral data model.
//!
//! These types mirror what GitHub and GitLab report about pull requests,
//! reviews and checks, but are our own so the core logic never depends on a
//! particular wire format.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::ParseEnumError;

/// Lowercase a login and drop a leading `@`, for comparisons.
pub fn normalize_login(login: &str) -> String {
    login.trim().trim_start_matches('@').to_lowercase()
}

/// Strip a trailing `[bot]` or `-bot` suffix.
pub fn strip_bot_suffix(login: &str) -> &str {
    login
        .strip_suffix("[bot]")
        .or_else(|| login.strip_suffix("-bot"))
        .unwrap_or(login)
}

/// Case-insensitive login match that also treats `renovate`, `renovate[bot]`
/// and `renovate-bot` as the same account.
pub fn login_matches(actual: &str, configured: &str) -> bool {
    let actual = normalize_login(actual);
    let configured = normalize_login(configured);
    actual == configured || strip_bot_suffix(&actual) == strip_bot_suffix(&configured)
}

/// Repository permission level of a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    Admin,
    Write,
    Read,
    None,
}

impl Permission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Write => "write",
            Self::Read => "read",
            Self::None => "none",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Permission {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "admin" => Ok(Self::Admin),
            // GitHub reports maintain/triage in role_name; fold them onto the
            // legacy four-level scale.
            "write" | "maintain" => Ok(Self::Write),
            "read" | "triage" => Ok(Self::Read),
            "none" => Ok(Self::None),
            other => Err(ParseEnumError::new("permission", other)),
        }
    }
}

/// The set of permission levels whose holders may vote and merge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionSet(BTreeSet<Permission>);

impl PermissionSet {
    pub fn new(perms: impl IntoIterator<Item = Permission>) -> Self {
        Self(perms.into_iter().collect())
    }

    pub fn contains(&self, perm: Permission) -> bool {
        self.0.contains(&perm)
    }

    pub fn iter(&self) -> impl Iterator<Item = Permission> + '_ {
        self.0.iter().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_vec(&self) -> Vec<Permission> {
        self.iter().collect()
    }
}

impl Default for PermissionSet {
    fn default() -> Self {
        Self::new([Permission::Admin, Permission::Write])
    }
}

impl fmt::Display for PermissionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.iter().map(|p| p.as_str()).collect();
        f.write_str(&names.join(", "))
    }
}

impl FromStr for PermissionSet {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(Permission::from_str)
            .collect::<Result<BTreeSet<_>, _>>()
            .map(Self)
    }
}

/// Open/closed state shared by pull requests and issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemState {
    Open,
    Closed,
}

impl ItemState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Closed => "closed",
        }
    }
}

impl FromStr for ItemState {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "open" | "opened" | "reopened" => Ok(Self::Open),
            "closed" | "merged" | "locked" => Ok(Self::Closed),
            other => Err(ParseEnumError::new("state", other)),
        }
    }
}

/// A branch name plus the commit it points at.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GitRef {
    pub branch: String,
    pub sha: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    pub owner: String,
    pub repo: String,
    pub number: u64,
    pub title: String,
    pub body: String,
    pub state: ItemState,
    pub merged: bool,
    pub author: String,
    pub url: String,
    pub head: GitRef,
    pub base: GitRef,
}

impl PullRequest {
    pub fn is_open(&self) -> bool {
        self.state == ItemState::Open && !self.merged
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub owner: String,
    pub repo: String,
    pub number: u64,
    pub title: String,
    pub state: ItemState,
    pub author: String,
    pub body: String,
    pub url: String,
    pub created_at: DateTime<Utc>,
    pub labels: Vec<String>,
}

/// Filters used to locate an issue when no number is given.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IssueSearch {
    /// Case-insensitive substring of the title.
    pub title: Option<String>,
    /// Author login; bot suffixes are ignored when matching.
    pub author: Option<String>,
    /// Every label listed must be present.
    pub labels: Vec<String>,
    pub state: Option<ItemState>,
}

impl IssueSearch {
    pub fn matches(&self, issue: &Issue) -> bool {
        if let Some(title) = &self.title {
            if !issue.title.to_lowercase().contains(&title.to_lowercase()) {
                return false;
            }
        }
        if let Some(author) = &self.author {
            if !login_matches(&issue.author, author) {
                return false;
            }
        }
        if let Some(state) = self.state {
            if issue.state != state {
                return false;
            }
        }
        self.labels.iter().all(|wanted| {
            issue
                .labels
                .iter()
                .any(|have| have.eq_ignore_ascii_case(wanted))
        })
    }

    /// Pick the most recently created matching issue.
    pub fn best_match<'a>(&self, issues: &'a [Issue]) -> Option<&'a Issue> {
        issues
            .iter()
            .filter(|issue| self.matches(issue))
            .max_by_key(|issue| issue.created_at)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub id: u64,
    pub author: String,
    pub body: String,
    pub url: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReviewState {
    Approved,
    ChangesRequested,
    Commented,
    Dismissed,
    Pending,
    Other(String),
}

impl ReviewState {
    /// Whether this state can displace an older review from the same author.
    pub fn is_actionable(&self) -> bool {
        matches!(
            self,
            Self::Approved | Self::ChangesRequested | Self::Dismissed
        )
    }
}

impl From<&str> for ReviewState {
    fn from(s: &str) -> Self {
        match s.trim().to_uppercase().as_str() {
            "APPROVED" => Self::Approved,
            "CHANGES_REQUESTED" => Self::ChangesRequested,
            "COMMENTED" => Self::Commented,
            "DISMISSED" => Self::Dismissed,
            "PENDING" => Self::Pending,
            other => Self::Other(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Review {
    pub author: String,
    pub state: ReviewState,
    pub body: String,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Queued,
    InProgress,
    Completed,
}

impl CheckStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckConclusion {
    Success,
    Failure,
    Cancelled,
    TimedOut,
    Skipped,
    Neutral,
    ActionRequired,
    Stale,
    Other(String),
}

impl CheckConclusion {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Cancelled => "cancelled",
            Self::TimedOut => "timed_out",
            Self::Skipped => "skipped",
            Self::Neutral => "neutral",
            Self::ActionRequired => "action_required",
            Self::Stale => "stale",
            Self::Other(s) => s,
        }
    }
}

impl From<&str> for CheckConclusion {
    fn from(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "success" => Self::Success,
            "failure" | "failed" => Self::Failure,
            "cancelled" | "canceled" => Self::Cancelled,
            "timed_out" => Self::TimedOut,
            "skipped" => Self::Skipped,
            "neutral" => Self::Neutral,
            "action_required" => Self::ActionRequired,
            "stale" => Self::Stale,
            other => Self::Other(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckRun {
    pub name: String,
    pub status: CheckStatus,
    pub conclusion: Option<CheckConclusion>,
    pub url: String,
    pub app_slug: String,
    pub check_suite_id: Option<u64>,
}

impl CheckRun {
    /// Short label for status tables: the conclusion once completed,
    /// otherwise the status.
    pub fn state_label(&self) -> &str {
        match (&self.status, &self.conclusion) {
            (CheckStatus::Completed, Some(conclusion)) => conclusion.as_str(),
            (status, _) => status.as_str(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    pub sha: String,
    pub message: String,
    pub author: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeMethod {
    Merge,
    Squash,
    Rebase,
}

impl MergeMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Merge => "merge",
            Self::Squash => "squash",
            Self::Rebase => "rebase",
        }
    }
}

impl fmt::Display for MergeMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MergeMethod {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "merge" => Ok(Self::Merge),
            "squash" => Ok(Self::Squash),
            "rebase" => Ok(Self::Rebase),
            other => Err(ParseEnumError::new("merge method", other)),
        }
    }
}

/// Configured merge behaviour: a fixed method, or ask the repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MergePolicy {
    Method(MergeMethod),
    Auto,
}

impl Default for MergePolicy {
    fn default() -> Self {
        Self::Method(MergeMethod::Squash)
    }
}

impl fmt::Display for MergePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Method(method) => method.fmt(f),
            Self::Auto => f.write_str("auto"),
        }
    }
}

impl FromStr for MergePolicy {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("auto") {
            Ok(Self::Auto)
        } else {
            MergeMethod::from_str(s).map(Self::Method)
        }
    }
}

/// One entry of a flat git tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeEntry {
    pub path: String,
    pub mode: String,
    pub kind: String,
    pub sha: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_login_matching_ignores_case_and_bot_suffix() {
        assert!(login_matches("Alice", "alice"));
        assert!(login_matches("renovate[bot]", "renovate"));
        assert!(login_matches("renovate-bot", "Renovate[bot]"));
        assert!(login_matches("@bob", "bob"));
        assert!(!login_matches("alice", "alicia"));
    }

    #[test]
    fn test_permission_set_parse_and_display() {
        let set: PermissionSet = "write, admin".parse().unwrap();
        assert!(set.contains(Permission::Admin));
        assert!(set.contains(Permission::Write));
        assert!(!set.contains(Permission::Read));
        assert_eq!(set.to_string(), "admin, write");

        assert!("admin,owner".parse::<PermissionSet>().is_err());
    }

    #[test]
    fn test_merge_policy_parse() {
        assert_eq!("auto".parse::<MergePolicy>().unwrap(), MergePolicy::Auto);
        assert_eq!(
            "Rebase".parse::<MergePolicy>().unwrap(),
            MergePolicy::Method(MergeMethod::Rebase)
        );
        assert!("fast-forward".parse::<MergePolicy>().is_err());
    }

    #[test]
    fn test_review_state_actionable() {
        assert!(ReviewState::from("APPROVED").is_actionable());
        assert!(ReviewState::from("changes_requested").is_actionable());
        assert!(ReviewState::from("DISMISSED").is_actionable());
        assert!(!ReviewState::from("COMMENTED").is_actionable());
        assert_eq!(
            ReviewState::from("SOMETHING"),
            ReviewState::Other("SOMETHING".to_string())
        );
    }

    fn issue(title: &str, author: &str, day: u32, labels: &[&str]) -> Issue {
        Issue {
            owner: "o".into(),
            repo: "r".into(),
            number: day as u64,
            title: title.into(),
            state: ItemState::Open,
            author: author.into(),
            body: String::new(),
            url: String::new(),
            created_at: chrono::TimeZone::with_ymd_and_hms(&Utc, 2024, 1, day, 0, 0, 0).unwrap(),
            labels: labels.iter().map(|l| l.to_string()).collect(),
        }
    }

    #[test]
    fn test_issue_search_picks_newest_match() {
        let issues = vec![
            issue("Dependency Dashboard", "renovate[bot]", 1, &[]),
            issue("Dependency Dashboard", "renovate[bot]", 3, &["deps"]),
            issue("Unrelated", "renovate[bot]", 5, &[]),
        ];
        let search = IssueSearch {
            title: Some("dependency dashboard".into()),
            author: Some("renovate".into()),
            ..Default::default()
        };
        assert_eq!(search.best_match(&issues).map(|i| i.number), Some(3));

        let labelled = IssueSearch {
            labels: vec!["DEPS".into()],
            ..Default::default()
        };
        assert_eq!(labelled.best_match(&issues).map(|i| i.number), Some(3));
    }
}

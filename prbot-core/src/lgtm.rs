//! LGTM vote folding.
//!
//! Votes come from two places: formal platform reviews and `/lgtm` comments.
//! Reviews are authoritative. For each author only the latest review in an
//! actionable state counts, and comment votes never override an effective
//! approval. Folding is pure; permission lookups happen in the caller.

use std::collections::{BTreeMap, HashMap};
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;

use crate::model::{normalize_login, Comment, Permission, PermissionSet, Review, ReviewState};

// Matched in this order: `/lgtm cancel` must win over the bare `/lgtm` prefix.
static REMOVE_LGTM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?im)^\s*/remove-lgtm(\s|$)").expect("valid regex"));
static LGTM_CANCEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?im)^\s*/lgtm\s+cancel(\s|$)").expect("valid regex"));
static LGTM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?im)^\s*/lgtm(\s|$)").expect("valid regex"));

/// What a comment says about its author's vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteAction {
    Add,
    Remove,
}

/// Classify a comment body as a vote, removal, or neither.
pub fn classify_vote(body: &str) -> Option<VoteAction> {
    if REMOVE_LGTM.is_match(body) || LGTM_CANCEL.is_match(body) {
        Some(VoteAction::Remove)
    } else if LGTM.is_match(body) {
        Some(VoteAction::Add)
    } else {
        None
    }
}

/// Inputs to [`collect_voters`].
#[derive(Debug, Clone)]
pub struct VoteInputs<'a> {
    pub reviews: &'a [Review],
    pub comments: &'a [Comment],
    pub pr_author: &'a str,
    /// Allows the PR author to vote for their own PR via `/lgtm`.
    pub debug: bool,
    /// Bot accounts; their reviews and comments never count.
    pub robot_accounts: &'a [String],
    /// Ignore the latest `/remove-lgtm` from this user, to see what the votes
    /// looked like before the removal currently being processed.
    pub ignore_user_remove: Option<&'a str>,
}

/// The latest actionable review per (normalized) author.
///
/// `COMMENTED` and pending reviews never displace an older approval.
pub fn effective_reviews(reviews: &[Review]) -> HashMap<String, &Review> {
    let mut latest: HashMap<String, &Review> = HashMap::new();
    for review in reviews.iter().filter(|r| r.state.is_actionable()) {
        let author = normalize_login(&review.author);
        match latest.get(&author) {
            Some(existing) if existing.submitted_at > review.submitted_at => {}
            _ => {
                latest.insert(author, review);
            }
        }
    }
    latest
}

/// Fold reviews and comments into the current set of voters.
///
/// Returns normalized login mapped to the login as it was last written, for
/// display.
pub fn collect_voters(inputs: &VoteInputs<'_>) -> BTreeMap<String, String> {
    let author = normalize_login(inputs.pr_author);
    let robots: Vec<String> = inputs
        .robot_accounts
        .iter()
        .map(|r| normalize_login(r))
        .collect();
    let is_robot = |login: &str| robots.iter().any(|r| r == login);

    let effective = effective_reviews(inputs.reviews);
    let approved = |login: &str| {
        effective
            .get(login)
            .is_some_and(|r| r.state == ReviewState::Approved)
    };
    // A later CHANGES_REQUESTED or DISMISSED review voids earlier comment votes.
    let revoked_at = |login: &str| -> Option<DateTime<Utc>> {
        effective
            .get(login)
            .filter(|r| r.state != ReviewState::Approved)
            .map(|r| r.submitted_at)
    };

    let mut voters: BTreeMap<String, String> = BTreeMap::new();

    for (login, review) in &effective {
        if review.state == ReviewState::Approved && *login != author && !is_robot(login.as_str()) {
            voters.insert(login.clone(), review.author.clone());
        }
    }

    let mut comments: Vec<&Comment> = inputs.comments.iter().collect();
    comments.sort_by_key(|c| c.created_at);

    let skipped_removal = inputs.ignore_user_remove.and_then(|user| {
        let user = normalize_login(user);
        comments
            .iter()
            .rposition(|c| {
                normalize_login(&c.author) == user
                    && classify_vote(&c.body) == Some(VoteAction::Remove)
            })
    });

    for (idx, comment) in comments.iter().enumerate() {
        if Some(idx) == skipped_removal {
            continue;
        }
        let login = normalize_login(&comment.author);
        if is_robot(login.as_str()) {
            continue;
        }
        match classify_vote(&comment.body) {
            Some(VoteAction::Remove) => {
                if !approved(login.as_str()) {
                    voters.remove(&login);
                }
            }
            Some(VoteAction::Add) => {
                if login == author && !inputs.debug {
                    continue;
                }
                if approved(login.as_str()) {
                    continue;
                }
                if revoked_at(login.as_str()).is_some_and(|at| comment.created_at <= at) {
                    continue;
                }
                voters.insert(login, comment.author.clone());
            }
            None => {}
        }
    }

    voters
}

/// Voters with their resolved permissions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LgtmVotes {
    /// Number of voters whose permission is in the allowed set.
    pub valid: usize,
    /// Every voter, including those without sufficient permission.
    pub users: BTreeMap<String, Permission>,
}

impl LgtmVotes {
    pub fn from_permissions(
        users: BTreeMap<String, Permission>,
        allowed: &PermissionSet,
    ) -> Self {
        let valid = users.values().filter(|p| allowed.contains(**p)).count();
        Self { valid, users }
    }

    pub fn is_valid_voter(&self, login: &str, allowed: &PermissionSet) -> bool {
        self.users
            .get(&normalize_login(login))
            .is_some_and(|p| allowed.contains(*p))
    }

    /// Votes still needed to reach `threshold`.
    pub fn missing(&self, threshold: usize) -> usize {
        threshold.saturating_sub(self.valid)
    }
}

use std::sync::Arc;

use prbot_core::{
    CheckConclusion, CheckRun, CheckStatus, Commit, Issue, ItemState, MergeMethod, Permission,
    ReviewState,
};

use super::*;
use crate::results::{HAS_CHERRY_PICK_COMMENTS, MERGE_SUCCESSFUL};
use crate::testing::{self, epoch, FakeFactory, FakePlatform};

const AUTHOR: &str = "dave";

struct Harness {
    platform: Arc<FakePlatform>,
    executor: Executor,
}

impl Harness {
    fn new(vars: &[(&str, &str)]) -> Self {
        let platform = Arc::new(FakePlatform::new(testing::pull_request(1, AUTHOR)));
        let config = testing::config(vars).unwrap();
        let executor = Executor::from_config(
            Arc::new(FakeFactory::new(platform.clone())),
            Arc::new(config),
            Arc::new(Metrics::new()),
        );
        Self { platform, executor }
    }

    /// Post `body` as `user` and run it, the way a webhook delivery would.
    async fn comment(&self, user: &str, body: &str) -> CommandResult {
        self.platform.add_comment(user, body);
        self.executor
            .execute(&CommandJob {
                target: PrTarget::new("acme", "widgets", 1),
                commenter: user.to_string(),
                body: body.to_string(),
                event_id: Some("delivery-1".to_string()),
            })
            .await
    }
}

fn check(name: &str, status: CheckStatus, conclusion: Option<CheckConclusion>) -> CheckRun {
    CheckRun {
        name: name.to_string(),
        status,
        conclusion,
        url: String::new(),
        app_slug: "github-actions".to_string(),
        check_suite_id: None,
    }
}

fn commit(sha: &str, message: &str) -> Commit {
    Commit {
        sha: sha.to_string(),
        message: message.to_string(),
        author: "dave".to_string(),
    }
}

fn assert_subsequence(ops: &[&str], expected: &[&str]) {
    let mut remaining = ops.iter();
    for want in expected {
        assert!(
            remaining.any(|op| op == want),
            "expected {:?} in order within {:?}",
            expected,
            ops
        );
    }
}

fn last_comment(platform: &FakePlatform) -> String {
    platform.posted_comments().pop().unwrap_or_default()
}

#[tokio::test]
async fn test_help_posts_one_comment_with_settings() {
    let h = Harness::new(&[("PRBOT_LGTM_THRESHOLD", "2")]);
    h.comment("alice", "/help").await.unwrap();

    let posted = h.platform.posted_comments();
    assert_eq!(posted.len(), 1);
    assert!(posted[0].contains("| Command | Description |"));
    assert!(posted[0].contains("LGTM threshold `2`"));
    assert!(posted[0].contains("voting permissions `admin, write`"));
    assert!(posted[0].contains("default merge method `squash`"));
    assert_eq!(h.executor.metrics().command_count("help", "ok"), 1);
}

#[tokio::test]
async fn test_lgtm_below_threshold_reports_pending() {
    let h = Harness::new(&[("PRBOT_LGTM_THRESHOLD", "2")]);
    h.platform.set_permission("bob", Permission::Write);

    h.comment("bob", "/lgtm").await.unwrap();

    let posted = h.platform.posted_comments();
    assert_eq!(posted.len(), 1);
    assert!(posted[0].contains("**1/2 LGTM votes**, 1 more required"));
    assert!(posted[0].contains("admin, write"));
    assert!(posted[0].contains("| @bob | write | ✅ |"));
    assert!(h.platform.approvals().is_empty());
}

#[tokio::test]
async fn test_lgtm_reaching_threshold_approves() {
    let h = Harness::new(&[("PRBOT_LGTM_THRESHOLD", "1")]);
    h.platform.set_permission("carol", Permission::Admin);

    h.comment("carol", "/lgtm").await.unwrap();

    let approvals = h.platform.approvals();
    assert_eq!(approvals.len(), 1);
    assert!(approvals[0].contains("**1/1 LGTM votes**"));
    assert!(approvals[0].contains("| @carol | admin | ✅ |"));
    assert!(h.platform.posted_comments().is_empty());
}

#[tokio::test]
async fn test_lgtm_from_author_is_refused() {
    let h = Harness::new(&[]);
    h.platform.set_permission(AUTHOR, Permission::Admin);

    let err = h.comment(AUTHOR, "/lgtm").await.unwrap_err();

    assert!(err.is_commented());
    assert!(last_comment(&h.platform).contains("cannot LGTM your own pull request"));
    assert!(h.platform.approvals().is_empty());
}

#[tokio::test]
async fn test_lgtm_from_author_counts_in_debug_mode() {
    let h = Harness::new(&[("PRBOT_DEBUG", "true")]);
    h.platform.set_permission(AUTHOR, Permission::Admin);

    h.comment(AUTHOR, "/lgtm").await.unwrap();

    assert_eq!(h.platform.approvals().len(), 1);
}

#[tokio::test]
async fn test_lgtm_without_permission_is_refused() {
    let h = Harness::new(&[]);
    h.platform.set_permission("eve", Permission::Read);

    let err = h.comment("eve", "/lgtm").await.unwrap_err();

    assert!(err.is_commented());
    assert!(last_comment(&h.platform).contains("@eve you do not have permission"));
}

#[tokio::test]
async fn test_merge_full_pass_call_sequence() {
    let h = Harness::new(&[
        ("PRBOT_LGTM_THRESHOLD", "2"),
        ("PRBOT_MERGE_METHOD", "squash"),
    ]);
    h.platform.set_permission("e", Permission::Admin);
    h.platform.set_permission("f", Permission::Write);
    h.platform.set_permission("g", Permission::Admin);
    h.platform.add_review("e", ReviewState::Approved);
    h.platform.add_review("f", ReviewState::Approved);

    h.comment("g", "/merge").await.unwrap();

    assert_subsequence(
        &h.platform.ops(),
        &[
            "check_user_permissions",
            "check_runs_status",
            "get_comments",
            "get_reviews",
            "merge_pr",
            "post_comment",
        ],
    );
    assert_eq!(
        h.platform.calls_to("check_user_permissions"),
        vec![vec!["g".to_string(), "admin, write".to_string()]]
    );
    assert_eq!(h.platform.merged_with(), Some(MergeMethod::Squash));
    let posted = last_comment(&h.platform);
    assert!(posted.contains("Merged with `squash` by @g"));
    assert!(posted.contains("**LGTM votes (2/2):** @e, @f"));
}

#[tokio::test]
async fn test_merge_with_single_lgtm_at_threshold_one() {
    let h = Harness::new(&[("PRBOT_LGTM_THRESHOLD", "1")]);
    h.platform.set_permission("bob", Permission::Write);
    h.platform.add_comment("bob", "/lgtm");

    h.comment(AUTHOR, "/merge").await.unwrap();

    assert_eq!(h.platform.merged_with(), Some(MergeMethod::Squash));
}

#[tokio::test]
async fn test_review_and_comment_from_same_user_count_once() {
    let h = Harness::new(&[("PRBOT_LGTM_THRESHOLD", "2")]);
    h.platform.set_permission("g", Permission::Admin);
    h.platform.set_permission("h", Permission::Write);
    h.platform.add_review("h", ReviewState::Approved);
    h.platform.add_comment("h", "/lgtm");

    let err = h.comment("g", "/merge").await.unwrap_err();

    assert!(err.is_commented());
    assert!(!h.platform.ops().contains(&"merge_pr"));
    let posted = last_comment(&h.platform);
    assert!(posted.contains("### Not enough LGTM"));
    assert!(posted.contains("**1/2 LGTM votes**, 1 more required"));
}

#[tokio::test]
async fn test_merge_refused_without_permission() {
    let h = Harness::new(&[]);
    h.platform.set_permission("mallory", Permission::Read);

    let err = h.comment("mallory", "/merge").await.unwrap_err();

    assert!(err.is_commented());
    assert_eq!(h.platform.ops().first(), Some(&"check_user_permissions"));
    assert!(!h.platform.ops().contains(&"check_runs_status"));
}

#[tokio::test]
async fn test_merge_rebase_single_commit() {
    let h = Harness::new(&[("PRBOT_MERGE_METHOD", "rebase")]);
    h.platform.set_permission("bob", Permission::Write);
    h.platform.add_review("bob", ReviewState::Approved);
    h.platform.set_commits(vec![commit("aaaa1110000", "only")]);

    h.comment(AUTHOR, "/merge").await.unwrap();

    assert_eq!(h.platform.merged_with(), Some(MergeMethod::Rebase));
    assert!(last_comment(&h.platform).contains("Merged with `rebase`"));
}

#[tokio::test]
async fn test_merge_rebase_multiple_commits_refused() {
    let h = Harness::new(&[("PRBOT_MERGE_METHOD", "rebase")]);
    h.platform.set_permission("bob", Permission::Write);
    h.platform.add_review("bob", ReviewState::Approved);
    h.platform.set_commits(vec![
        commit("aaaa1110000", "first"),
        commit("bbbb2220000", "second"),
        commit("cccc3330000", "third"),
    ]);

    let err = h.comment(AUTHOR, "/merge").await.unwrap_err();

    assert!(err.is_commented());
    assert!(!h.platform.ops().contains(&"merge_pr"));
    let posted = h.platform.posted_comments();
    assert_eq!(posted.len(), 1);
    assert!(posted[0].contains("3 commits"));
    for sha in ["`aaaa111`", "`bbbb222`", "`cccc333`"] {
        assert!(posted[0].contains(sha), "{} missing from {}", sha, posted[0]);
    }
}

#[tokio::test]
async fn test_merge_argument_overrides_default_method() {
    let h = Harness::new(&[("PRBOT_MERGE_METHOD", "squash")]);
    h.platform.set_permission("bob", Permission::Write);
    h.platform.add_review("bob", ReviewState::Approved);

    h.comment(AUTHOR, "/ready merge").await.unwrap();

    assert_eq!(h.platform.merged_with(), Some(MergeMethod::Merge));
}

#[tokio::test]
async fn test_merge_auto_picks_available_method() {
    let h = Harness::new(&[("PRBOT_MERGE_METHOD", "auto")]);
    h.platform.set_permission("bob", Permission::Write);
    h.platform.add_review("bob", ReviewState::Approved);
    h.platform.set_merge_methods(vec![MergeMethod::Merge]);

    h.comment(AUTHOR, "/merge").await.unwrap();

    assert_eq!(h.platform.merged_with(), Some(MergeMethod::Merge));
}

#[tokio::test]
async fn test_merge_auto_defaults_to_squash_when_nothing_is_allowed() {
    let h = Harness::new(&[("PRBOT_MERGE_METHOD", "auto")]);
    h.platform.set_permission("bob", Permission::Write);
    h.platform.add_review("bob", ReviewState::Approved);
    h.platform.set_merge_methods(Vec::new());

    h.comment(AUTHOR, "/merge").await.unwrap();

    assert_eq!(h.platform.merged_with(), Some(MergeMethod::Squash));
}

#[tokio::test]
async fn test_merge_ignores_own_pending_check() {
    let h = Harness::new(&[("PRBOT_SELF_CHECK_NAME", "pr-gate")]);
    h.platform.set_permission("bob", Permission::Write);
    h.platform.add_review("bob", ReviewState::Approved);
    h.platform.set_check_runs(vec![
        check("CI / pr-gate", CheckStatus::InProgress, None),
        check("CI / build", CheckStatus::Completed, Some(CheckConclusion::Success)),
    ]);

    h.comment(AUTHOR, "/merge").await.unwrap();

    assert_eq!(h.platform.merged_with(), Some(MergeMethod::Squash));
}

#[tokio::test]
async fn test_merge_blocked_by_pending_check() {
    let h = Harness::new(&[("PRBOT_SELF_CHECK_NAME", "pr-gate")]);
    h.platform.set_permission("bob", Permission::Write);
    h.platform.add_review("bob", ReviewState::Approved);
    h.platform.set_check_runs(vec![
        check("CI / pr-gate", CheckStatus::InProgress, None),
        check("CI / tests", CheckStatus::InProgress, None),
    ]);

    let err = h.comment(AUTHOR, "/merge").await.unwrap_err();

    assert!(err.is_commented());
    assert_eq!(h.platform.merged_with(), None);
    let posted = last_comment(&h.platform);
    assert!(posted.contains("### CI is not passing"));
    assert!(posted.contains("CI / tests"));
    assert!(!posted.contains("CI / pr-gate"));
}

#[tokio::test]
async fn test_merge_failure_is_reported() {
    let h = Harness::new(&[]);
    h.platform.set_permission("bob", Permission::Write);
    h.platform.add_review("bob", ReviewState::Approved);
    h.platform.fail("merge_pr", "Pull Request is not mergeable");

    let err = h.comment(AUTHOR, "/merge").await.unwrap_err();

    assert!(err.is_commented());
    assert!(last_comment(&h.platform).contains("Pull Request is not mergeable"));
}

#[tokio::test]
async fn test_merge_writes_results_and_runs_requested_cherry_picks() {
    let dir = tempfile::tempdir().unwrap();
    let results = dir.path().to_string_lossy().to_string();
    let h = Harness::new(&[("PRBOT_RESULTS_DIR", results.as_str())]);
    h.platform.set_permission("bob", Permission::Write);
    h.platform.add_review("bob", ReviewState::Approved);
    h.platform.add_branch("release-1.0");
    h.platform.add_comment("bob", "/cherry-pick release-1.0");
    h.platform
        .set_commits(vec![commit("aaaa1110000", "Add widget")]);

    h.comment(AUTHOR, "/merge").await.unwrap();

    assert_eq!(
        std::fs::read_to_string(dir.path().join(MERGE_SUCCESSFUL)).unwrap(),
        "true"
    );
    assert_eq!(
        std::fs::read_to_string(dir.path().join(HAS_CHERRY_PICK_COMMENTS)).unwrap(),
        "true"
    );
    let posted = h.platform.posted_comments();
    assert!(posted[0].contains("Cherry-picks requested to: `release-1.0`"));
    let created = h.platform.created_prs();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].base, "release-1.0");
    assert_eq!(created[0].title, "[Cherry-pick] Add widget");
}

#[tokio::test]
async fn test_remove_lgtm_dismisses_when_dropping_below_threshold() {
    let h = Harness::new(&[("PRBOT_LGTM_THRESHOLD", "1")]);
    h.platform.set_permission("bob", Permission::Write);
    h.platform.add_comment("bob", "/lgtm");

    h.comment("bob", "/remove-lgtm").await.unwrap();

    let dismissals = h.platform.dismissals();
    assert_eq!(dismissals.len(), 1);
    assert!(dismissals[0].contains("0/1 LGTM votes"));
}

#[tokio::test]
async fn test_lgtm_cancel_records_withdrawal_below_threshold() {
    let h = Harness::new(&[("PRBOT_LGTM_THRESHOLD", "3")]);
    h.platform.set_permission("bob", Permission::Write);
    h.platform.add_comment("bob", "/lgtm");

    h.comment("bob", "/lgtm cancel").await.unwrap();

    assert!(h.platform.dismissals().is_empty());
    assert!(last_comment(&h.platform).contains("LGTM withdrawn. Now at **0/3 LGTM votes**."));
    assert_eq!(h.executor.metrics().command_count("remove-lgtm", "ok"), 1);
}

#[tokio::test]
async fn test_remove_lgtm_with_approving_review_is_refused() {
    let h = Harness::new(&[]);
    h.platform.set_permission("bob", Permission::Write);
    h.platform.add_review("bob", ReviewState::Approved);

    let err = h.comment("bob", "/remove-lgtm").await.unwrap_err();

    assert!(err.is_commented());
    assert!(last_comment(&h.platform).contains("approving review still counts"));
    assert!(h.platform.dismissals().is_empty());
}

#[tokio::test]
async fn test_batch_rejects_lgtm_and_runs_merge() {
    let h = Harness::new(&[]);
    h.platform.set_permission("bob", Permission::Write);
    h.platform.add_review("bob", ReviewState::Approved);

    let err = h.comment(AUTHOR, "/batch /lgtm /merge").await.unwrap_err();

    assert!(err.is_commented());
    assert_eq!(h.platform.merged_with(), Some(MergeMethod::Squash));
    assert_eq!(
        last_comment(&h.platform),
        "**Batch Execution Results:** (⚠️ Some commands failed)\n\n\
         ❌ Command `/lgtm` is not allowed in batch execution\n\
         ✅ Command `/merge` executed successfully"
    );
}

#[tokio::test]
async fn test_multi_line_batch_reports_unknown_commands() {
    let h = Harness::new(&[]);

    let err = h
        .comment("alice", "/batch\n/assign bob\n/unknowncmd\n/__cherry-pick main")
        .await
        .unwrap_err();

    assert!(err.is_commented());
    assert_eq!(h.platform.reviewers(), vec!["bob".to_string()]);
    insta::assert_snapshot!(last_comment(&h.platform), @r"
    **Batch Execution Results:** (⚠️ Some commands failed)

    ✅ Command `/assign bob` executed successfully
    ❌ Command `/unknowncmd` failed: unknown command: unknowncmd
    ❌ Command `/__cherry-pick main` is not allowed in batch execution
    ");
}

#[tokio::test]
async fn test_plain_multi_command_comment_runs_as_batch() {
    let h = Harness::new(&[]);

    h.comment("alice", "/label bug\nsome text\n/assign").await.unwrap();

    assert_eq!(h.platform.labels(), vec!["bug".to_string()]);
    assert_eq!(h.platform.reviewers(), vec!["alice".to_string()]);
    assert!(last_comment(&h.platform).starts_with("**Batch Execution Results:**\n"));
}

#[tokio::test]
async fn test_check_without_arguments_reports_status() {
    let h = Harness::new(&[("PRBOT_LGTM_THRESHOLD", "2")]);
    h.platform.set_permission("bob", Permission::Write);
    h.platform.add_review("bob", ReviewState::Approved);
    h.platform.set_check_runs(vec![check(
        "CI / tests",
        CheckStatus::Completed,
        Some(CheckConclusion::Failure),
    )]);

    h.comment("alice", "/check").await.unwrap();

    insta::assert_snapshot!(last_comment(&h.platform), @r"
    ### PR status

    **LGTM:** ⏳ 1/2 votes, 1 more required
    **CI:** ❌ 1 check(s) not passing
    - CI / tests (failure)
    ");
    assert!(!h.platform.ops().contains(&"merge_pr"));
}

#[tokio::test]
async fn test_check_with_arguments_uses_check_header() {
    let h = Harness::new(&[]);

    h.comment("alice", "/check /label ready").await.unwrap();

    assert_eq!(h.platform.labels(), vec!["ready".to_string()]);
    assert!(last_comment(&h.platform).starts_with("**Check Command Results:**"));
}

#[tokio::test]
async fn test_unknown_command_is_reported() {
    let h = Harness::new(&[]);

    let err = h.comment("alice", "/frobnicate now").await.unwrap_err();

    assert!(err.is_commented());
    assert_eq!(
        h.platform.posted_comments(),
        vec!["Unknown command `/frobnicate`. Comment `/help` for the list.".to_string()]
    );
}

#[tokio::test]
async fn test_builtin_from_user_is_refused() {
    let h = Harness::new(&[]);
    h.platform.set_merged();

    let err = h.comment("alice", "/__cherry-pick main").await.unwrap_err();

    assert!(err.is_commented());
    assert!(last_comment(&h.platform).contains("is internal"));
    assert!(h.platform.created_prs().is_empty());
}

#[tokio::test]
async fn test_builtin_runs_from_internal_pathway() {
    let h = Harness::new(&[]);
    h.platform.set_merged();
    h.platform.add_branch("release-1.0");
    h.platform.set_commits(vec![commit("aaaa1110000", "fix")]);

    let job = CommandJob {
        target: PrTarget::new("acme", "widgets", 1),
        commenter: "prbot".to_string(),
        body: "/__cherry-pick release-1.0".to_string(),
        event_id: None,
    };
    h.executor.execute_internal(&job).await.unwrap();

    assert_eq!(h.platform.created_prs().len(), 1);
}

#[tokio::test]
async fn test_not_a_command_posts_nothing() {
    let h = Harness::new(&[]);

    let err = h.comment("alice", "looks good to me").await.unwrap_err();

    assert!(matches!(err, CommandError::Invalid(_)));
    assert!(h.platform.calls().is_empty());
}

#[tokio::test]
async fn test_label_without_arguments_is_reported() {
    let h = Harness::new(&[]);

    let err = h.comment("alice", "/label").await.unwrap_err();

    assert!(err.is_commented());
    assert_eq!(
        last_comment(&h.platform),
        "❌ Command `/label` failed: label needs at least one label"
    );
}

#[tokio::test]
async fn test_assign_and_unassign() {
    let h = Harness::new(&[]);

    h.comment("alice", "/assign @bob carol").await.unwrap();
    h.comment("alice", "/unassign bob").await.unwrap();

    assert_eq!(h.platform.reviewers(), vec!["carol".to_string()]);
    assert!(h.platform.posted_comments().is_empty());
}

#[tokio::test]
async fn test_close_by_author_and_by_stranger() {
    let h = Harness::new(&[]);

    let err = h.comment("stranger", "/close").await.unwrap_err();
    assert!(err.is_commented());
    assert!(!h.platform.ops().contains(&"close_pr"));

    h.comment(AUTHOR, "/close").await.unwrap();
    assert!(h.platform.ops().contains(&"close_pr"));
}

#[tokio::test]
async fn test_cherry_pick_on_open_pr_is_scheduled() {
    let h = Harness::new(&[]);

    h.comment("alice", "/cherrypick release-1.0 release-2.0").await.unwrap();

    assert_eq!(
        h.platform.posted_comments(),
        vec![
            "Cherry-pick to `release-1.0` scheduled. It will run once this PR is merged."
                .to_string(),
            "Cherry-pick to `release-2.0` scheduled. It will run once this PR is merged."
                .to_string(),
        ]
    );
    assert!(h.platform.created_prs().is_empty());
}

#[tokio::test]
async fn test_cherry_pick_on_merged_pr_opens_backport() {
    let h = Harness::new(&[]);
    h.platform.set_merged();
    h.platform.add_branch("release-1.0");
    h.platform.set_commits(vec![
        commit("aaaa1110000", "first"),
        commit("bbbb2220000", "second"),
    ]);

    h.comment("alice", "/cherry-pick release-1.0").await.unwrap();

    assert_eq!(
        h.platform.created_branches(),
        vec![(
            "cherry-pick-1-to-release-1.0-ffff000".to_string(),
            "release-1.0".to_string()
        )]
    );
    assert_eq!(h.platform.calls_to("cherry_pick_commit").len(), 2);
    let created = h.platform.created_prs();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].head, "cherry-pick-1-to-release-1.0-ffff000");
    assert!(created[0].body.contains("`aaaa111` first"));
    assert!(last_comment(&h.platform).starts_with("Cherry-pick to `release-1.0` opened: "));
}

#[tokio::test]
async fn test_cherry_pick_to_missing_branch_is_skipped() {
    let h = Harness::new(&[]);
    h.platform.set_merged();

    h.comment("alice", "/cherry-pick release-9").await.unwrap();

    assert_eq!(
        last_comment(&h.platform),
        "Cherry-pick skipped: branch `release-9` does not exist."
    );
    assert!(h.platform.created_branches().is_empty());
}

#[tokio::test]
async fn test_cherry_pick_on_closed_pr_is_refused() {
    let h = Harness::new(&[]);
    h.platform.set_closed();

    let err = h.comment("alice", "/cherry-pick release-1.0").await.unwrap_err();

    assert!(err.is_commented());
    assert!(last_comment(&h.platform).contains("closed without being merged"));
}

#[tokio::test]
async fn test_checkbox_ticks_pr_description() {
    let h = Harness::new(&[]);
    h.platform.set_body("Tasks:\n- [ ] one\n- [x] two\n- [ ] three");

    h.comment("alice", "/checkbox").await.unwrap();

    assert_eq!(h.platform.body(), "Tasks:\n- [x] one\n- [x] two\n- [x] three");
    assert_eq!(
        last_comment(&h.platform),
        "Checked 2 checkboxes in this PR."
    );
}

#[tokio::test]
async fn test_checkbox_with_nothing_to_tick_is_refused() {
    let h = Harness::new(&[]);
    h.platform.set_body("- [x] done");

    let err = h.comment("alice", "/checkbox").await.unwrap_err();

    assert!(err.is_commented());
    assert!(!h.platform.ops().contains(&"update_pr_body"));
}

#[tokio::test]
async fn test_checkbox_issue_finds_dashboard() {
    let h = Harness::new(&[]);
    h.platform.add_issue(Issue {
        owner: "acme".to_string(),
        repo: "widgets".to_string(),
        number: 7,
        title: "Dependency Dashboard".to_string(),
        state: ItemState::Open,
        author: "renovate[bot]".to_string(),
        body: "- [ ] Update serde".to_string(),
        url: "https://github.com/acme/widgets/issues/7".to_string(),
        created_at: epoch(),
        labels: Vec::new(),
    });

    h.comment("alice", "/checkbox-issue").await.unwrap();

    assert_eq!(h.platform.issue_body(7).as_deref(), Some("- [x] Update serde"));
    assert_eq!(
        last_comment(&h.platform),
        "Checked 1 checkbox in issue #7."
    );
}

#[tokio::test]
async fn test_checkbox_issue_missing_is_reported() {
    let h = Harness::new(&[]);

    let err = h
        .comment("alice", "/checkbox-issue --title Release Plan --author bob")
        .await
        .unwrap_err();

    assert!(err.is_commented());
    assert_eq!(
        last_comment(&h.platform),
        "No open issue titled like `Release Plan` by @bob was found."
    );
}

#[tokio::test]
async fn test_retest_reruns_actions_and_triggers_pipelines() {
    let h = Harness::new(&[("PRBOT_SELF_CHECK_NAME", "pr-gate")]);
    let mut unit = check("CI / unit", CheckStatus::Completed, Some(CheckConclusion::Failure));
    unit.check_suite_id = Some(10);
    let mut lint = check("CI / lint", CheckStatus::Completed, Some(CheckConclusion::TimedOut));
    lint.check_suite_id = Some(10);
    let mut integration = check(
        "jenkins / integration / test",
        CheckStatus::Completed,
        Some(CheckConclusion::Failure),
    );
    integration.app_slug = "jenkins".to_string();
    let mut coverage = check(
        "codecov/patch",
        CheckStatus::Completed,
        Some(CheckConclusion::Failure),
    );
    coverage.app_slug = "codecov".to_string();
    h.platform.set_check_runs(vec![
        unit,
        lint,
        integration,
        coverage,
        check("CI / pr-gate", CheckStatus::Completed, Some(CheckConclusion::Failure)),
        check("CI / docs", CheckStatus::InProgress, None),
    ]);
    h.platform.set_workflow_runs(10, vec![100, 101]);

    h.comment("alice", "/retest").await.unwrap();

    assert_eq!(h.platform.calls_to("get_workflow_run_ids_from_check_suite").len(), 1);
    assert_eq!(
        h.platform.calls_to("rerun_workflow_run_failed_jobs"),
        vec![vec!["100".to_string()], vec!["101".to_string()]]
    );
    let posted = h.platform.posted_comments();
    assert_eq!(posted[0], "/test integration");
    insta::assert_snapshot!(posted[1], @r"
    ### Retest

    - Reran failed jobs in 2 workflow run(s)
    - Triggered pipelines: `integration`
    - Skipped: `codecov/patch`, `CI / pr-gate`
    ");
}

#[tokio::test]
async fn test_retest_with_named_pipelines() {
    let h = Harness::new(&[]);
    h.platform.set_check_runs(vec![check(
        "CI / unit",
        CheckStatus::Completed,
        Some(CheckConclusion::Failure),
    )]);

    h.comment("alice", "/retest e2e").await.unwrap();

    let posted = h.platform.posted_comments();
    assert_eq!(posted[0], "/test e2e");
    assert!(h.platform.calls_to("rerun_workflow_run_failed_jobs").is_empty());
}

#[tokio::test]
async fn test_retest_with_everything_green() {
    let h = Harness::new(&[]);
    h.platform.set_check_runs(vec![check(
        "CI / unit",
        CheckStatus::Completed,
        Some(CheckConclusion::Success),
    )]);

    h.comment("alice", "/retest").await.unwrap();

    assert_eq!(
        h.platform.posted_comments(),
        vec!["Nothing to retest: no failed checks.".to_string()]
    );
}

#[tokio::test]
async fn test_retest_reruns_neutral_check_that_blocks_merge() {
    let h = Harness::new(&[]);
    h.platform.set_permission("bob", Permission::Write);
    h.platform.add_review("bob", ReviewState::Approved);
    h.platform.set_check_runs(vec![check(
        "CI / lint",
        CheckStatus::Completed,
        Some(CheckConclusion::Neutral),
    )]);

    let err = h.comment(AUTHOR, "/merge").await.unwrap_err();
    assert!(err.is_commented());
    assert_eq!(h.platform.merged_with(), None);

    h.comment("alice", "/retest").await.unwrap();

    let posted = h.platform.posted_comments();
    assert!(posted.contains(&"/test lint".to_string()));
    assert!(!posted.contains(&"Nothing to retest: no failed checks.".to_string()));
}

#[tokio::test]
async fn test_platform_failure_after_validation_is_reported() {
    let h = Harness::new(&[]);
    h.platform.fail("add_labels", "boom");

    let err = h.comment("alice", "/label bug").await.unwrap_err();

    assert!(err.is_commented());
    assert_eq!(
        h.platform.posted_comments(),
        vec!["❌ Command `/label bug` failed: platform API returned 500: boom".to_string()]
    );
    assert_eq!(h.executor.metrics().command_count("label", "error"), 1);
}

#[tokio::test]
async fn test_checkbox_write_failure_is_reported() {
    let h = Harness::new(&[]);
    h.platform.set_body("- [ ] a");
    h.platform.fail("update_pr_body", "boom");

    let err = h.comment("alice", "/checkbox").await.unwrap_err();

    assert!(err.is_commented());
    assert_eq!(
        h.platform.posted_comments(),
        vec![
            "❌ Could not update the checkboxes in this PR: platform API returned 500: boom"
                .to_string()
        ]
    );
    assert_eq!(h.platform.body(), "- [ ] a");
}

#[tokio::test]
async fn test_checkbox_write_failure_inside_batch_is_summarized() {
    let h = Harness::new(&[]);
    h.platform.set_body("- [ ] a");
    h.platform.fail("update_pr_body", "boom");

    let err = h.comment("alice", "/batch /checkbox").await.unwrap_err();

    assert!(err.is_commented());
    let posted = h.platform.posted_comments();
    assert_eq!(posted.len(), 2);
    assert!(posted[0].starts_with("❌ Could not update the checkboxes in this PR"));
    assert!(posted[1].contains("(⚠️ Some commands failed)"));
}

#[tokio::test]
async fn test_configured_pr_sender_only_applies_when_requested() {
    let vars = [("PRBOT_PR_SENDER", "alice")];

    // Webhook deliveries look the author up on the PR itself.
    let h = Harness::new(&vars);
    let err = h.comment("alice", "/close").await.unwrap_err();
    assert!(err.is_commented());
    assert!(!h.platform.ops().contains(&"close_pr"));

    // One-shot runs may name the author up front.
    let platform = Arc::new(FakePlatform::new(testing::pull_request(1, AUTHOR)));
    let config = testing::config(&vars).unwrap();
    let pr_sender = config.pr_sender.clone();
    let executor = Executor::from_config(
        Arc::new(FakeFactory::new(platform.clone())),
        Arc::new(config),
        Arc::new(Metrics::new()),
    )
    .with_pr_sender(pr_sender);
    executor
        .execute(&CommandJob {
            target: PrTarget::new("acme", "widgets", 1),
            commenter: "alice".to_string(),
            body: "/close".to_string(),
            event_id: None,
        })
        .await
        .unwrap();
    assert!(platform.ops().contains(&"close_pr"));
}

#[tokio::test]
async fn test_executor_passes_delivery_id_to_factory() {
    let platform = Arc::new(FakePlatform::new(testing::pull_request(1, AUTHOR)));
    let factory = Arc::new(FakeFactory::new(platform.clone()));
    let executor = Executor::from_config(
        factory.clone(),
        Arc::new(testing::config(&[]).unwrap()),
        Arc::new(Metrics::new()),
    );

    executor
        .execute(&CommandJob {
            target: PrTarget::new("acme", "widgets", 1),
            commenter: "alice".to_string(),
            body: "/help".to_string(),
            event_id: Some("abc-123".to_string()),
        })
        .await
        .unwrap();

    assert_eq!(
        factory.requested(),
        vec![(
            PrTarget::new("acme", "widgets", 1),
            Some("abc-123".to_string())
        )]
    );
}

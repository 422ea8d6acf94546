use std::path::PathBuf;

use async_trait::async_trait;
use prbot_core::cherry_pick::branch_name;
use prbot_core::Commit;
use tokio::process::Command;
use tracing::{info, warn};

use crate::platform::{PlatformError, PlatformResult};

/// Replays commits onto a new branch outside the platform API.
#[async_trait]
pub trait CherryPicker: Send + Sync {
    /// Branch the backport of `sha` onto `target` is pushed to.
    fn branch_name(&self, pr_number: u64, sha: &str, target: &str) -> String {
        branch_name(pr_number, target, sha)
    }

    /// Create `branch` from `target`, apply `commits` in order and push it.
    async fn cherry_pick_commits(
        &self,
        commits: &[Commit],
        target: &str,
        branch: &str,
    ) -> PlatformResult<()>;
}

/// Cherry-picks with `git` subprocesses in an existing clone.
pub struct GitCliCherryPicker {
    workdir: PathBuf,
    remote: String,
}

impl GitCliCherryPicker {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
            remote: "origin".to_string(),
        }
    }

    async fn git(&self, args: &[&str]) -> PlatformResult<String> {
        info!("Running git {}", args.join(" "));
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .output()
            .await
            .map_err(|e| {
                PlatformError::Git(format!(
                    "failed to run git in {}: {}",
                    self.workdir.display(),
                    e
                ))
            })?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            Err(PlatformError::Git(format!(
                "git {} exited with {}: {}",
                args.join(" "),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }
}

#[async_trait]
impl CherryPicker for GitCliCherryPicker {
    async fn cherry_pick_commits(
        &self,
        commits: &[Commit],
        target: &str,
        branch: &str,
    ) -> PlatformResult<()> {
        self.git(&["fetch", &self.remote, target]).await?;
        for commit in commits {
            self.git(&["fetch", &self.remote, &commit.sha]).await?;
        }

        let start = format!("{}/{}", self.remote, target);
        self.git(&["checkout", "-B", branch, &start]).await?;

        for commit in commits {
            if let Err(e) = self.git(&["cherry-pick", "-x", &commit.sha]).await {
                if let Err(abort) = self.git(&["cherry-pick", "--abort"]).await {
                    warn!("Failed to abort cherry-pick of {}: {}", commit.sha, abort);
                }
                return Err(e);
            }
        }

        self.git(&["push", &self.remote, &format!("HEAD:refs/heads/{}", branch)])
            .await?;
        info!(
            "Pushed {} with {} commit(s) on top of {}",
            branch,
            commits.len(),
            target
        );
        Ok(())
    }
}

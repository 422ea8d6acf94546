//! Result marker files read by the CI job that ran the bot.

use std::io;
use std::path::Path;

use tokio::fs;
use tracing::{info, warn};

pub const MERGE_SUCCESSFUL: &str = "merge-successful";
pub const HAS_CHERRY_PICK_COMMENTS: &str = "has-cherry-pick-comments";

/// Write one file per result into `dir`, containing the value.
///
/// Does nothing when `dir` does not exist; the directory is the caller's
/// signal that results are wanted.
pub async fn write_results(dir: &Path, results: &[(&str, String)]) -> io::Result<bool> {
    let is_dir = fs::metadata(dir).await.map(|m| m.is_dir()).unwrap_or(false);
    if !is_dir {
        info!(
            "Results directory {} does not exist, not writing results",
            dir.display()
        );
        return Ok(false);
    }
    for (name, value) in results {
        let path = dir.join(name);
        fs::write(&path, value).await?;
        set_mode(&path).await?;
        info!("Wrote result {}={}", name, value);
    }
    Ok(true)
}

/// Like [`write_results`] but logs failures instead of returning them.
pub async fn record_results(dir: Option<&Path>, results: &[(&str, String)]) {
    let Some(dir) = dir else {
        return;
    };
    if let Err(e) = write_results(dir, results).await {
        warn!("Failed to write results to {}: {}", dir.display(), e);
    }
}

#[cfg(unix)]
async fn set_mode(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, std::fs::Permissions::from_mode(0o644)).await
}

#[cfg(not(unix))]
async fn set_mode(_path: &Path) -> io::Result<()> {
    Ok(())
}

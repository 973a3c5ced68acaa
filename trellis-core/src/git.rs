//! Version-control synchronization for the per-category remote documents
//! and the managed root itself. All commands run through the bounded-wait
//! runner; a hang is a failure of that step only.

use crate::category::Category;
use crate::command::{run_checked, run_with_timeout};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Local clones of the per-category remote repositories.
pub struct CategoryRepos {
    clones_dir: PathBuf,
    username: String,
    timeout: Duration,
}

impl CategoryRepos {
    pub fn new(root: &Path, username: &str, timeout: Duration) -> Self {
        Self {
            clones_dir: root.join(crate::store::TRELLIS_DIR).join("clones"),
            username: username.to_string(),
            timeout,
        }
    }

    /// Path a category's clone lives at (whether or not it exists yet).
    pub fn clone_path(&self, category: Category) -> PathBuf {
        self.clones_dir.join(category.as_str())
    }

    /// Clone the category repository if absent, otherwise check out the
    /// default branch and pull. Returns the local path.
    pub fn ensure_clone(&self, category: Category) -> crate::Result<PathBuf> {
        let local = self.clone_path(category);

        if local.join(".git").exists() {
            let branch = self.default_branch(&local);
            debug!(category = %category, branch, "updating category clone");
            self.git(&local, &["checkout", &branch])?;
            self.git(&local, &["pull", "origin", &branch])?;
        } else {
            std::fs::create_dir_all(&self.clones_dir)?;
            let url = format!("https://github.com/{}/{}.git", self.username, category);
            info!(category = %category, url, "cloning category repository");
            let mut cmd = Command::new("git");
            cmd.args(["clone", &url]).arg(&local);
            run_checked(cmd, self.timeout)?;
        }

        Ok(local)
    }

    /// Stage, commit, and push the clone. Returns false when there was
    /// nothing to commit.
    pub fn publish(&self, category: Category, message: &str) -> crate::Result<bool> {
        let local = self.clone_path(category);

        self.git(&local, &["add", "-A"])?;
        let status = self.git(&local, &["status", "--porcelain"])?;
        if status.trim().is_empty() {
            debug!(category = %category, "category clone unchanged, nothing to publish");
            return Ok(false);
        }

        self.git(&local, &["commit", "-m", message])?;
        let branch = self.default_branch(&local);
        self.git(&local, &["push", "origin", &branch])?;
        info!(category = %category, "published category repository");
        Ok(true)
    }

    /// Resolve the clone's default branch, falling back to main then master.
    fn default_branch(&self, local: &Path) -> String {
        let mut cmd = Command::new("git");
        cmd.args(["symbolic-ref", "refs/remotes/origin/HEAD"])
            .current_dir(local);
        if let Ok(output) = run_with_timeout(cmd, self.timeout) {
            if output.success {
                if let Some(branch) = output.stdout.trim().rsplit('/').next() {
                    if !branch.is_empty() {
                        return branch.to_string();
                    }
                }
            }
        }

        let mut cmd = Command::new("git");
        cmd.args(["rev-parse", "--verify", "origin/main"])
            .current_dir(local);
        match run_with_timeout(cmd, self.timeout) {
            Ok(output) if output.success => "main".to_string(),
            _ => "master".to_string(),
        }
    }

    fn git(&self, dir: &Path, args: &[&str]) -> crate::Result<String> {
        let mut cmd = Command::new("git");
        cmd.args(args).current_dir(dir);
        run_checked(cmd, self.timeout)
    }
}

/// Commit all changes in the managed root, if it is a git repository.
/// Returns false when there was nothing to commit. A failing push is logged
/// and tolerated; the commit itself is what coalesced edits need.
pub fn commit_all(root: &Path, message: &str, timeout: Duration) -> crate::Result<bool> {
    if !root.join(".git").exists() {
        debug!(root = %root.display(), "managed root is not a git repository, skipping commit");
        return Ok(false);
    }

    let git = |args: &[&str]| {
        let mut cmd = Command::new("git");
        cmd.args(args).current_dir(root);
        run_checked(cmd, timeout)
    };

    git(&["add", "-A"])?;
    let status = git(&["status", "--porcelain"])?;
    if status.trim().is_empty() {
        return Ok(false);
    }

    git(&["commit", "-m", message])?;
    info!(root = %root.display(), message, "committed managed root");

    if let Err(e) = git(&["push"]) {
        warn!(error = %e, "push of managed root failed, commit kept locally");
    }
    Ok(true)
}

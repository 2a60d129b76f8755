//! Minimal async git wrapper for the branch fix-apply strategy. Shells out
//! to the `git` binary; failures are fatal for the operation, never retried.

use std::future::Future;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::errors::AatError;
use crate::models::FileChange;

pub struct GitOps {
    repo_path: PathBuf,
}

impl GitOps {
    pub fn new(repo_path: impl Into<PathBuf>) -> Self {
        Self {
            repo_path: repo_path.into(),
        }
    }

    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    async fn run_git(&self, args: &[&str]) -> Result<String, AatError> {
        debug!("git {}", args.join(" "));
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.repo_path)
            .output()
            .await
            .map_err(|e| AatError::GitOps(format!("cannot spawn git: {e}")))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AatError::GitOps(format!(
                "git {} failed ({}): {}",
                args.join(" "),
                output.status,
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    pub async fn is_git_repo(&self) -> bool {
        self.run_git(&["rev-parse", "--is-inside-work-tree"])
            .await
            .map(|out| out == "true")
            .unwrap_or(false)
    }

    pub async fn current_branch(&self) -> Result<String, AatError> {
        self.run_git(&["rev-parse", "--abbrev-ref", "HEAD"]).await
    }

    pub async fn has_uncommitted_changes(&self) -> Result<bool, AatError> {
        let status = self.run_git(&["status", "--porcelain"]).await?;
        Ok(!status.is_empty())
    }

    /// Create `name` and switch to it.
    pub async fn create_branch(&self, name: &str) -> Result<(), AatError> {
        self.run_git(&["checkout", "-b", name]).await?;
        Ok(())
    }

    pub async fn checkout(&self, name: &str) -> Result<(), AatError> {
        self.run_git(&["checkout", name]).await?;
        Ok(())
    }

    pub async fn delete_branch(&self, name: &str) -> Result<(), AatError> {
        self.run_git(&["branch", "-D", name]).await?;
        Ok(())
    }

    /// Write each proposed file content into the working tree, creating
    /// parent directories as needed.
    pub async fn apply_file_changes(&self, changes: &[FileChange]) -> Result<(), AatError> {
        for change in changes {
            let path = self.repo_path.join(&change.path);
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&path, &change.modified).await?;
            debug!("wrote {}", path.display());
        }
        Ok(())
    }

    /// Stage everything and commit. Returns the short hash of the new commit.
    pub async fn commit_changes(&self, message: &str) -> Result<String, AatError> {
        self.run_git(&["add", "-A"]).await?;
        self.run_git(&["commit", "-m", message]).await?;
        self.run_git(&["rev-parse", "--short", "HEAD"]).await
    }

    /// Run `f` on a freshly created branch, then restore the branch that
    /// was active on entry, on success and on error alike.
    pub async fn on_fix_branch<F, Fut, T>(&self, name: &str, f: F) -> Result<T, AatError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, AatError>>,
    {
        let original = self.current_branch().await?;
        self.create_branch(name).await?;

        let result = f().await;

        match self.checkout(&original).await {
            Ok(()) => result,
            Err(restore_err) => match result {
                // The scoped work failed first; that error wins.
                Err(e) => {
                    warn!("cannot restore branch {original:?}: {restore_err}");
                    Err(e)
                }
                Ok(_) => Err(restore_err),
            },
        }
    }
}

use std::path::Path;

use crate::errors::AatError;
use crate::git_ops::GitOps;
use crate::models::FileChange;

fn git(dir: &Path, args: &[&str]) {
    let out = std::process::Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .unwrap();
    assert!(
        out.status.success(),
        "git {args:?} failed: {}",
        String::from_utf8_lossy(&out.stderr)
    );
}

fn init_repo() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    git(dir.path(), &["init", "-b", "main"]);
    git(dir.path(), &["config", "user.email", "qa@example.test"]);
    git(dir.path(), &["config", "user.name", "QA Bot"]);
    std::fs::write(dir.path().join("README.md"), "# demo\n").unwrap();
    git(dir.path(), &["add", "-A"]);
    git(dir.path(), &["commit", "-m", "initial"]);
    dir
}

fn change(path: &str, contents: &str) -> FileChange {
    FileChange {
        path: path.to_string(),
        original: String::new(),
        modified: contents.to_string(),
        description: String::new(),
    }
}

#[tokio::test]
async fn detects_repository_and_branch() {
    let repo = init_repo();
    let ops = GitOps::new(repo.path());
    assert!(ops.is_git_repo().await);
    assert_eq!(ops.current_branch().await.unwrap(), "main");

    let plain = tempfile::tempdir().unwrap();
    assert!(!GitOps::new(plain.path()).is_git_repo().await);
}

#[tokio::test]
async fn detects_uncommitted_changes() {
    let repo = init_repo();
    let ops = GitOps::new(repo.path());
    assert!(!ops.has_uncommitted_changes().await.unwrap());

    std::fs::write(repo.path().join("dirty.txt"), "wip").unwrap();
    assert!(ops.has_uncommitted_changes().await.unwrap());
}

#[tokio::test]
async fn apply_file_changes_creates_parent_directories() {
    let repo = init_repo();
    let ops = GitOps::new(repo.path());

    ops.apply_file_changes(&[
        change("src/pages/login.ts", "export const login = 1;\n"),
        change("notes.md", "updated\n"),
    ])
    .await
    .unwrap();

    assert!(repo.path().join("src/pages/login.ts").exists());
    assert!(repo.path().join("notes.md").exists());
}

#[tokio::test]
async fn commit_changes_returns_short_hash() {
    let repo = init_repo();
    let ops = GitOps::new(repo.path());

    std::fs::write(repo.path().join("fix.txt"), "patched\n").unwrap();
    let hash = ops.commit_changes("apply fix").await.unwrap();
    assert!(!hash.is_empty() && hash.len() <= 12);
    assert!(!ops.has_uncommitted_changes().await.unwrap());
}

#[tokio::test]
async fn on_fix_branch_restores_entry_branch_on_success() {
    let repo = init_repo();
    let ops = GitOps::new(repo.path());

    let commit = ops
        .on_fix_branch("aat/fix-001", || async {
            assert_eq!(ops.current_branch().await.unwrap(), "aat/fix-001");
            ops.apply_file_changes(&[change("fix.txt", "patched\n")])
                .await?;
            ops.commit_changes("aat: fix login selector").await
        })
        .await
        .unwrap();

    assert!(!commit.is_empty());
    assert_eq!(ops.current_branch().await.unwrap(), "main");
    // The commit lives on the fix branch, not on main.
    assert!(!repo.path().join("fix.txt").exists());
}

#[tokio::test]
async fn on_fix_branch_restores_entry_branch_on_error() {
    let repo = init_repo();
    let ops = GitOps::new(repo.path());

    let result: Result<(), AatError> = ops
        .on_fix_branch("aat/fix-002", || async {
            Err(AatError::GitOps("simulated apply failure".to_string()))
        })
        .await;

    assert!(matches!(result, Err(AatError::GitOps(_))));
    assert_eq!(ops.current_branch().await.unwrap(), "main");
}

#[tokio::test]
async fn delete_branch_removes_it() {
    let repo = init_repo();
    let ops = GitOps::new(repo.path());

    ops.create_branch("aat/fix-003").await.unwrap();
    ops.checkout("main").await.unwrap();
    ops.delete_branch("aat/fix-003").await.unwrap();
    assert!(ops.checkout("aat/fix-003").await.is_err());
}

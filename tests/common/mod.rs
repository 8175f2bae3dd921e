//! Shared test utilities for integration tests.

use std::path::Path;
use std::process::Command;

/// Check if git is available on the system.
#[must_use]
pub fn git_available() -> bool {
    Command::new("git").arg("--version").output().is_ok()
}

/// Initialize a git repository in `path` with an initial commit on `main`.
///
/// # Panics
///
/// Panics if any git command fails.
pub fn init_git_repo(path: &Path) {
    let output = Command::new("git")
        .args(["init", "-b", "main"])
        .current_dir(path)
        .output()
        .expect("failed to run git init");
    assert!(output.status.success(), "git init failed");

    Command::new("git")
        .args(["config", "user.email", "gateway-test@example.com"])
        .current_dir(path)
        .output()
        .expect("failed to configure git user.email");
    Command::new("git")
        .args(["config", "user.name", "Gateway Test"])
        .current_dir(path)
        .output()
        .expect("failed to configure git user.name");
    Command::new("git")
        .args(["config", "commit.gpgsign", "false"])
        .current_dir(path)
        .output()
        .expect("failed to disable commit signing");

    std::fs::write(path.join("README.md"), "# test repo\n").expect("failed to write README.md");

    let output = Command::new("git")
        .args(["add", "."])
        .current_dir(path)
        .output()
        .expect("failed to run git add");
    assert!(output.status.success(), "git add failed");

    let output = Command::new("git")
        .args(["commit", "-m", "initial commit"])
        .current_dir(path)
        .output()
        .expect("failed to run git commit");
    assert!(output.status.success(), "git commit failed: {}", String::from_utf8_lossy(&output.stderr));
}

/// Initialize a git repository in `path` with an `origin` remote pointing at
/// a local bare repository, so push operations have somewhere real to land.
///
/// # Panics
///
/// Panics if any git command fails.
pub fn init_git_repo_with_bare_origin(path: &Path, bare_path: &Path) {
    let output = Command::new("git")
        .args(["init", "--bare", "-b", "main"])
        .arg(bare_path)
        .output()
        .expect("failed to run git init --bare");
    assert!(output.status.success(), "git init --bare failed");

    init_git_repo(path);

    let output = Command::new("git")
        .args(["remote", "add", "origin"])
        .arg(bare_path)
        .current_dir(path)
        .output()
        .expect("failed to add git remote");
    assert!(output.status.success(), "git remote add failed: {}", String::from_utf8_lossy(&output.stderr));
}

//! Best-effort git repo/branch detection, derived once at session create
//! time from `workingDir` (spec §3 `gitRepoPath`, `gitBranch`). Shells out
//! to `git` rather than parsing `.git` internals; absence of git or a
//! non-repo directory is not an error, just `None`.

use std::path::Path;
use std::process::Command;

#[derive(Debug, Clone, Default)]
pub struct GitInfo {
    pub repo_path: Option<String>,
    pub branch: Option<String>,
}

pub fn detect(working_dir: &Path) -> GitInfo {
    let Some(repo_path) = toplevel(working_dir) else {
        return GitInfo::default();
    };
    let branch = current_branch(working_dir);
    GitInfo {
        repo_path: Some(repo_path),
        branch,
    }
}

fn toplevel(dir: &Path) -> Option<String> {
    let output = Command::new("git")
        .arg("rev-parse")
        .arg("--show-toplevel")
        .current_dir(dir)
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8(output.stdout).ok()?;
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn current_branch(dir: &Path) -> Option<String> {
    let output = Command::new("git")
        .arg("rev-parse")
        .arg("--abbrev-ref")
        .arg("HEAD")
        .current_dir(dir)
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8(output.stdout).ok()?;
    let trimmed = text.trim();
    if trimmed.is_empty() || trimmed == "HEAD" {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_repo_directory_yields_no_git_info() {
        let dir = tempfile::tempdir().unwrap();
        let info = detect(dir.path());
        assert!(info.repo_path.is_none());
        assert!(info.branch.is_none());
    }
}

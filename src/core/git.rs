#![forbid(unsafe_code)]

//! Read-only repository queries on top of the `git` CLI.
//!
//! Queries that only make sense inside a repository answer with an empty,
//! `false` or `None` value when git fails. Path resolution that needs the
//! main checkout fails loudly with [`WtprError::NoRepoContext`] instead.

use std::path::{Path, PathBuf};

use crate::core::exec::{self, ExecError};
use crate::core::naming::sanitize_for_filesystem;
use crate::core::reconcile::RepoQueries;
use crate::core::worktree::{Worktree, parse_worktree_porcelain};
use crate::error::WtprError;

const GIT: &str = "git";

#[derive(Debug, Clone)]
pub struct Git {
    repo_root: PathBuf,
}

impl Git {
    pub fn from_cwd() -> Result<Self, WtprError> {
        let cwd = std::env::current_dir()
            .map_err(|e| WtprError::Other(format!("failed to get cwd: {e}")))?;
        Self::from_dir(&cwd)
    }

    pub fn from_dir(dir: &Path) -> Result<Self, WtprError> {
        let repo_root = find_repo_root(dir)
            .or_else(|| Self::is_inside_repository(dir).then(|| dir.to_path_buf()))
            .ok_or(WtprError::NotInGitRepo)?;
        Ok(Self { repo_root })
    }

    #[must_use]
    pub fn new(repo_root: PathBuf) -> Self {
        Self { repo_root }
    }

    /// Fails with [`WtprError::GitNotFound`] when git cannot be run at all.
    pub fn ensure_installed(dir: &Path) -> Result<(), WtprError> {
        exec::run(GIT, &["--version"], dir)?;
        Ok(())
    }

    #[must_use]
    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    #[must_use]
    pub fn is_inside_repository(dir: &Path) -> bool {
        exec::run(GIT, &["rev-parse", "--is-inside-work-tree"], dir)
            .is_ok_and(|out| out.trim() == "true")
            || exec::run(GIT, &["rev-parse", "--is-bare-repository"], dir)
                .is_ok_and(|out| out.trim() == "true")
    }

    pub fn remote_url(&self) -> Option<String> {
        self.run(&["remote", "get-url", "origin"])
            .ok()
            .map(|s| s.trim().to_owned())
            .filter(|s| !s.is_empty())
    }

    pub fn list_worktrees(&self) -> Vec<Worktree> {
        match self.run(&["worktree", "list", "--porcelain"]) {
            Ok(out) => parse_worktree_porcelain(&out),
            Err(e) => {
                tracing::debug!(error = %e, "worktree listing failed");
                Vec::new()
            }
        }
    }

    /// The trunk branch: origin's symbolic HEAD, else `main`, else `master`,
    /// else the literal `main`.
    pub fn default_branch(&self) -> String {
        if let Ok(out) = self.run(&[
            "symbolic-ref",
            "--quiet",
            "--short",
            "refs/remotes/origin/HEAD",
        ]) {
            let short = out.trim();
            let name = short.strip_prefix("origin/").unwrap_or(short);
            if !name.is_empty() {
                return name.to_owned();
            }
        }
        for candidate in ["main", "master"] {
            if self.branch_exists(candidate) {
                return candidate.to_owned();
            }
        }
        "main".to_owned()
    }

    pub fn branch_exists(&self, branch: &str) -> bool {
        self.check(&[
            "show-ref",
            "--verify",
            "--quiet",
            &format!("refs/heads/{branch}"),
        ])
    }

    pub fn head_commit(&self, branch: &str) -> Option<String> {
        self.run(&[
            "rev-parse",
            "--verify",
            "--quiet",
            &format!("refs/heads/{branch}^{{commit}}"),
        ])
        .ok()
        .map(|s| s.trim().to_owned())
        .filter(|s| !s.is_empty())
    }

    pub fn commit_exists(&self, sha: &str) -> bool {
        if sha.trim().is_empty() {
            return false;
        }
        self.check(&["cat-file", "-e", &format!("{sha}^{{commit}}")])
    }

    /// True iff `ancestor` is reachable from `descendant`.
    pub fn is_ancestor(&self, ancestor: &str, descendant: &str) -> bool {
        self.check(&["merge-base", "--is-ancestor", ancestor, descendant])
    }

    /// True iff `branch` has a non-merge commit that `sha` does not contain.
    pub fn non_merge_commits_after(&self, branch: &str, sha: &str) -> bool {
        let range = format!("{sha}..refs/heads/{branch}");
        match self.run(&["rev-list", "--count", "--no-merges", &range]) {
            Ok(out) => out.trim().parse::<u64>().is_ok_and(|n| n > 0),
            Err(e) => {
                tracing::debug!(branch, sha, error = %e, "rev-list failed");
                false
            }
        }
    }

    pub fn has_uncommitted_changes(&self, worktree_path: &Path) -> bool {
        match exec::run(GIT, &["status", "--porcelain"], worktree_path) {
            Ok(out) => out.lines().any(|l| !l.trim().is_empty()),
            Err(e) => {
                tracing::debug!(path = %worktree_path.display(), error = %e, "git status failed");
                false
            }
        }
    }

    /// The main checkout: the working tree that owns the shared git dir, or
    /// the bare repository itself.
    pub fn main_checkout(&self) -> Result<PathBuf, WtprError> {
        let out = self
            .run(&["rev-parse", "--path-format=absolute", "--git-common-dir"])
            .map_err(|e| self.no_context(e))?;
        let common = PathBuf::from(out.trim());
        if common.file_name().is_some_and(|n| n == ".git") {
            common
                .parent()
                .map(Path::to_path_buf)
                .ok_or_else(|| WtprError::NoRepoContext(common.display().to_string()))
        } else {
            Ok(common)
        }
    }

    /// Directory holding the main checkout and its sibling worktrees.
    pub fn worktrees_dir(&self) -> Result<PathBuf, WtprError> {
        let main = self.main_checkout()?;
        main.parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| WtprError::NoRepoContext(main.display().to_string()))
    }

    pub fn sibling_path(&self, name: &str) -> Result<PathBuf, WtprError> {
        let dir = self.worktrees_dir()?;
        let component = sanitize_for_filesystem(name);
        if component.is_empty() {
            return Err(WtprError::Other(format!("invalid worktree name '{name}'")));
        }
        Ok(dir.join(component))
    }

    pub fn remove_worktree(&self, path: &Path, force: bool) -> Result<(), WtprError> {
        let path = path.to_string_lossy();
        if force {
            self.run_streamed(&["worktree", "remove", "--force", &path])
        } else {
            self.run_streamed(&["worktree", "remove", &path])
        }
    }

    pub fn delete_branch(&self, branch: &str, force: bool) -> Result<(), WtprError> {
        if force {
            self.run_streamed(&["branch", "-D", branch])
        } else {
            self.run_streamed(&["branch", "-d", branch])
        }
    }

    pub fn run(&self, args: &[&str]) -> Result<String, WtprError> {
        Ok(exec::run(GIT, args, &self.repo_root)?)
    }

    fn run_streamed(&self, args: &[&str]) -> Result<(), WtprError> {
        Ok(exec::run_streamed(GIT, args, &self.repo_root)?)
    }

    fn check(&self, args: &[&str]) -> bool {
        match exec::run_status(GIT, args, &self.repo_root) {
            Ok(ok) => ok,
            Err(e) => {
                tracing::debug!(args = %args.join(" "), error = %e, "git check failed");
                false
            }
        }
    }

    fn no_context(&self, e: WtprError) -> WtprError {
        match e {
            WtprError::Exec(ExecError::Failed { .. }) => {
                WtprError::NoRepoContext(self.repo_root.display().to_string())
            }
            other => other,
        }
    }
}

impl RepoQueries for Git {
    fn head_commit(&self, branch: &str) -> Option<String> {
        Self::head_commit(self, branch)
    }

    fn commit_exists(&self, sha: &str) -> bool {
        Self::commit_exists(self, sha)
    }

    fn is_ancestor(&self, ancestor: &str, descendant: &str) -> bool {
        Self::is_ancestor(self, ancestor, descendant)
    }

    fn non_merge_commits_after(&self, branch: &str, sha: &str) -> bool {
        Self::non_merge_commits_after(self, branch, sha)
    }

    fn has_uncommitted_changes(&self, worktree_path: &Path) -> bool {
        Self::has_uncommitted_changes(self, worktree_path)
    }
}

fn find_repo_root(start: &Path) -> Option<PathBuf> {
    let mut cur = Some(start);
    while let Some(dir) = cur {
        let candidate = dir.join(".git");
        if candidate.is_dir() || candidate.is_file() {
            return Some(dir.to_path_buf());
        }
        cur = dir.parent();
    }
    None
}

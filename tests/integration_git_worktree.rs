use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Command;

use wtpr::core::cache::StatusCache;
use wtpr::core::git::Git;
use wtpr::core::reconcile::{Reconciler, WorktreeStatus};
use wtpr::review::{BatchReviews, Disabled, Review, ReviewState, ReviewSystem};

/// Review system answering from fixed per-branch reviews.
struct StaticReviews {
    by_branch: BTreeMap<String, Review>,
}

impl StaticReviews {
    fn merged(branch: &str, number: u64, head: &str) -> Self {
        let mut by_branch = BTreeMap::new();
        by_branch.insert(
            branch.to_owned(),
            Review {
                number,
                state: ReviewState::Merged,
                head_commit: head.to_owned(),
                head_branch: Some(branch.to_owned()),
            },
        );
        Self { by_branch }
    }
}

impl ReviewSystem for StaticReviews {
    fn is_available(&self) -> bool {
        true
    }

    fn find_review_for_branch(&self, branch: &str) -> Option<Review> {
        self.by_branch.get(branch).cloned()
    }

    fn batch_fetch_review_states(&self, ids: &[u64]) -> BatchReviews {
        BatchReviews::resolved(
            self.by_branch
                .values()
                .filter(|r| ids.contains(&r.number))
                .map(|r| (r.number, r.clone()))
                .collect(),
        )
    }
}

struct Fixture {
    _td: tempfile::TempDir,
    root: PathBuf,
    repo: PathBuf,
    feature: PathBuf,
}

fn git_available() -> bool {
    Command::new("git").arg("--version").output().is_ok()
}

/// `repo` on `main` with one commit, plus a `feature` worktree one commit
/// ahead and a detached `scratch` worktree.
fn fixture() -> Fixture {
    let td = tempfile::tempdir().expect("tempdir");
    let root = td.path().canonicalize().expect("canonicalize");
    let repo = root.join("repo");
    std::fs::create_dir_all(&repo).expect("mkdir repo");

    run(&repo, &["init"]);
    run(&repo, &["symbolic-ref", "HEAD", "refs/heads/main"]);
    run(&repo, &["config", "user.email", "test@example.com"]);
    run(&repo, &["config", "user.name", "Test"]);
    run(&repo, &["config", "commit.gpgsign", "false"]);
    commit_file(&repo, "README.md", "hello\n", "init");

    let feature = root.join("feature");
    run(
        &repo,
        &["worktree", "add", "-b", "feature", &feature.to_string_lossy()],
    );
    commit_file(&feature, "feature.txt", "one\n", "feature work");

    let scratch = root.join("scratch");
    run(
        &repo,
        &["worktree", "add", "--detach", &scratch.to_string_lossy(), "main"],
    );

    Fixture {
        _td: td,
        root,
        repo,
        feature,
    }
}

#[test]
fn lists_worktrees_and_resolves_paths() {
    if !git_available() {
        eprintln!("skipping: git not found");
        return;
    }
    let fx = fixture();

    let git = Git::from_dir(&fx.feature).expect("git from dir");
    assert_eq!(git.repo_root(), fx.feature.as_path());

    let listed = git.list_worktrees();
    assert_eq!(listed.len(), 3);
    assert_eq!(listed[0].path, fx.repo);
    assert_eq!(listed[0].branch_name(), Some("main"));
    let feature = listed.iter().find(|w| w.name() == "feature").expect("feature");
    assert_eq!(feature.branch_name(), Some("feature"));
    let scratch = listed.iter().find(|w| w.name() == "scratch").expect("scratch");
    assert!(scratch.is_detached);
    assert_eq!(scratch.branch_name(), None);

    assert_eq!(git.default_branch(), "main");
    assert!(git.branch_exists("feature"));
    assert!(!git.branch_exists("nope"));

    assert_eq!(git.main_checkout().expect("main checkout"), fx.repo);
    assert_eq!(git.worktrees_dir().expect("worktrees dir"), fx.root);
    assert_eq!(
        git.sibling_path("fix/login").expect("sibling"),
        fx.root.join("fix-login")
    );
}

#[test]
fn outside_a_repository_has_no_context() {
    if !git_available() {
        eprintln!("skipping: git not found");
        return;
    }
    let td = tempfile::tempdir().expect("tempdir");
    let dir = td.path().canonicalize().expect("canonicalize");

    // A bare handle on a plain directory answers read-only queries quietly.
    let git = Git::new(dir);
    assert!(git.list_worktrees().is_empty());
    assert_eq!(git.head_commit("main"), None);
    assert!(git.main_checkout().is_err());
    assert!(git.sibling_path("x").is_err());
}

#[test]
fn commit_graph_queries() {
    if !git_available() {
        eprintln!("skipping: git not found");
        return;
    }
    let fx = fixture();
    let git = Git::from_dir(&fx.repo).expect("git from dir");

    let main_head = git.head_commit("main").expect("main head");
    let feature_head = git.head_commit("feature").expect("feature head");
    assert_ne!(main_head, feature_head);
    assert_eq!(git.head_commit("missing"), None);

    assert!(git.commit_exists(&feature_head));
    assert!(!git.commit_exists("0000000000000000000000000000000000000000"));
    assert!(!git.commit_exists(""));

    assert!(git.is_ancestor(&main_head, &feature_head));
    assert!(!git.is_ancestor(&feature_head, &main_head));

    assert!(git.non_merge_commits_after("feature", &main_head));
    assert!(!git.non_merge_commits_after("feature", &feature_head));

    // Pulling a merge commit back into the branch is not new work.
    run(&fx.repo, &["merge", "--no-ff", "-m", "merge feature", "feature"]);
    run(&fx.feature, &["merge", "--ff-only", "main"]);
    let pulled = git.head_commit("feature").expect("feature head");
    assert_ne!(pulled, feature_head);
    assert!(!git.non_merge_commits_after("feature", &feature_head));

    assert!(!git.has_uncommitted_changes(&fx.feature));
    std::fs::write(fx.feature.join("wip.txt"), "wip\n").expect("write");
    assert!(git.has_uncommitted_changes(&fx.feature));
}

#[test]
fn reconciles_against_a_real_repository() {
    if !git_available() {
        eprintln!("skipping: git not found");
        return;
    }
    let fx = fixture();
    let git = Git::from_dir(&fx.repo).expect("git from dir");
    let worktrees = git.list_worktrees();
    let merged_head = git.head_commit("feature").expect("feature head");
    let reviews = StaticReviews::merged("feature", 7, &merged_head);
    let cache = StatusCache::for_dir(&fx.root, ".wtpr-status.json");

    let first = Reconciler::new(&git, &reviews).reconcile(&worktrees, "main", cache.load());
    assert_eq!(first.statuses["main"].status, WorktreeStatus::Main);
    assert_eq!(first.statuses["feature"].status, WorktreeStatus::Merged);
    assert_eq!(first.statuses["feature"].pr_number, Some(7));
    assert!(first.cache_changed);
    cache.save(&first.cache);
    assert_eq!(cache.load().get("feature"), Some(&7));

    std::fs::write(fx.feature.join("wip.txt"), "wip\n").expect("write");
    let dirty = Reconciler::new(&git, &reviews).reconcile(&worktrees, "main", cache.load());
    assert_eq!(dirty.statuses["feature"].status, WorktreeStatus::Dirty);
    assert!(!dirty.cache_changed);

    run(&fx.feature, &["add", "."]);
    run(&fx.feature, &["commit", "-m", "more work"]);
    let worktrees = git.list_worktrees();
    let moved = Reconciler::new(&git, &reviews).reconcile(&worktrees, "main", cache.load());
    assert_eq!(
        moved.statuses["feature"].status,
        WorktreeStatus::ChangesSinceMerge
    );
    assert_eq!(moved.statuses["feature"].pr_number, Some(7));

    let offline = Reconciler::new(&git, &Disabled).reconcile(&worktrees, "main", cache.load());
    assert_eq!(offline.statuses["feature"].status, WorktreeStatus::NoPr);
    assert_eq!(offline.statuses["main"].status, WorktreeStatus::Main);
    assert!(!offline.statuses.contains_key("scratch"));
}

fn commit_file(dir: &Path, name: &str, contents: &str, message: &str) {
    std::fs::write(dir.join(name), contents).expect("write");
    run(dir, &["add", "."]);
    run(dir, &["commit", "-m", message]);
}

fn run(dir: &Path, args: &[&str]) {
    let out = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .expect("git command");
    if !out.status.success() {
        panic!(
            "git {:?} failed: {}",
            args,
            String::from_utf8_lossy(&out.stderr)
        );
    }
}

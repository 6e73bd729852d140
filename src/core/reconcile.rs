#![forbid(unsafe_code)]

//! Worktree review-status reconciliation.
//!
//! Given the worktrees of one repository, decide for each branch whether it
//! has no review, an open/closed one, a merged one, or new work after a
//! merge. The branch -> review number cache comes in as a value and goes
//! out updated; the caller owns loading and persisting it.
//!
//! Remote cost is bounded per run: one single-branch lookup per uncached
//! branch, one batch state fetch, plus at most one extra lookup for a branch
//! whose cached review looks stale or shows new work after its merge.
//! Cached ids that the review system cannot resolve, or that stay stale after
//! the extra lookup, are dropped from the cache.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::cache::PrNumbers;
use crate::core::worktree::Worktree;
use crate::review::{BatchReviews, Review, ReviewState, ReviewSystem};

/// Fresh lookups allowed after a cached review turns out to be stale.
const MAX_STALE_RETRIES: u8 = 1;

/// Local commit-graph queries the engine needs.
pub trait RepoQueries {
    fn head_commit(&self, branch: &str) -> Option<String>;
    fn commit_exists(&self, sha: &str) -> bool;
    fn is_ancestor(&self, ancestor: &str, descendant: &str) -> bool;
    fn non_merge_commits_after(&self, branch: &str, sha: &str) -> bool;
    fn has_uncommitted_changes(&self, worktree_path: &Path) -> bool;
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "kebab-case")]
pub enum WorktreeStatus {
    NoPr,
    Open,
    Merged,
    Closed,
    ChangesSinceMerge,
    Main,
    /// Merged upstream but the worktree has uncommitted changes.
    Dirty,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct BranchStatus {
    pub status: WorktreeStatus,
    pub pr_number: Option<u64>,
}

impl BranchStatus {
    #[must_use]
    pub fn new(status: WorktreeStatus, pr_number: Option<u64>) -> Self {
        Self { status, pr_number }
    }

    fn with_review(status: WorktreeStatus, review: &Review) -> Self {
        Self::new(status, Some(review.number))
    }

    fn no_pr() -> Self {
        Self::new(WorktreeStatus::NoPr, None)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    pub statuses: BTreeMap<String, BranchStatus>,
    pub cache: PrNumbers,
    /// True when `cache` differs from what was passed in.
    pub cache_changed: bool,
}

/// Cache corrections found while classifying; `None` drops the entry.
type CacheUpdates = BTreeMap<String, Option<u64>>;

pub struct Reconciler<'a, R, S> {
    repo: &'a R,
    reviews: &'a S,
}

impl<'a, R: RepoQueries, S: ReviewSystem> Reconciler<'a, R, S> {
    #[must_use]
    pub fn new(repo: &'a R, reviews: &'a S) -> Self {
        Self { repo, reviews }
    }

    #[must_use]
    pub fn reconcile(
        &self,
        worktrees: &[Worktree],
        default_branch: &str,
        mut cache: PrNumbers,
    ) -> Reconciliation {
        let mut statuses = BTreeMap::new();

        let mut pending: Vec<(&Worktree, &str)> = Vec::new();
        for wt in worktrees {
            let Some(branch) = wt.branch_name() else {
                continue;
            };
            if branch == default_branch {
                statuses.insert(
                    branch.to_owned(),
                    BranchStatus::new(WorktreeStatus::Main, None),
                );
            } else {
                pending.push((wt, branch));
            }
        }

        if pending.is_empty() {
            return Reconciliation {
                statuses,
                cache,
                cache_changed: false,
            };
        }

        if !self.reviews.is_available() {
            tracing::debug!(branches = pending.len(), "review lookups unavailable");
            for (_, branch) in pending {
                statuses.insert(branch.to_owned(), BranchStatus::no_pr());
            }
            return Reconciliation {
                statuses,
                cache,
                cache_changed: false,
            };
        }

        let mut cache_changed = false;
        for (_, branch) in &pending {
            if cache.contains_key(*branch) {
                continue;
            }
            if let Some(review) = self.reviews.find_review_for_branch(branch) {
                tracing::debug!(branch, pr = review.number, "discovered review");
                cache.insert((*branch).to_owned(), review.number);
                cache_changed = true;
            }
        }

        let ids: Vec<u64> = pending
            .iter()
            .filter_map(|(_, branch)| cache.get(*branch).copied())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let batch = if ids.is_empty() {
            BatchReviews::default()
        } else {
            self.reviews.batch_fetch_review_states(&ids)
        };

        let mut updates = CacheUpdates::new();
        // A batch with unresolvable ids is untrusted for this run; the ids are
        // evicted so the next run rediscovers those branches.
        let reviews = if batch.unresolved.is_empty() {
            batch.reviews
        } else {
            for (_, branch) in &pending {
                if let Some(&id) = cache.get(*branch)
                    && batch.unresolved.contains(&id)
                {
                    tracing::debug!(branch, pr = id, "evicting unresolvable cached review");
                    updates.insert((*branch).to_owned(), None);
                }
            }
            BTreeMap::new()
        };

        for (wt, branch) in pending {
            let review = cache.get(branch).and_then(|id| reviews.get(id));
            let mut status = self.classify(wt, branch, review, 0, &mut updates);
            if status.status == WorktreeStatus::Merged
                && self.repo.has_uncommitted_changes(&wt.path)
            {
                status.status = WorktreeStatus::Dirty;
            }
            tracing::debug!(branch, status = ?status.status, pr = ?status.pr_number, "classified");
            statuses.insert(branch.to_owned(), status);
        }

        for (branch, update) in updates {
            let changed = match update {
                Some(number) => cache.insert(branch, number) != Some(number),
                None => cache.remove(&branch).is_some(),
            };
            cache_changed |= changed;
        }

        Reconciliation {
            statuses,
            cache,
            cache_changed,
        }
    }

    fn classify(
        &self,
        wt: &Worktree,
        branch: &str,
        review: Option<&Review>,
        retries: u8,
        updates: &mut CacheUpdates,
    ) -> BranchStatus {
        let Some(review) = review else {
            return BranchStatus::no_pr();
        };
        match review.state {
            ReviewState::Open => BranchStatus::with_review(WorktreeStatus::Open, review),
            ReviewState::Closed => BranchStatus::with_review(WorktreeStatus::Closed, review),
            ReviewState::Merged => self.classify_merged(wt, branch, review, retries, updates),
        }
    }

    fn classify_merged(
        &self,
        wt: &Worktree,
        branch: &str,
        review: &Review,
        retries: u8,
        updates: &mut CacheUpdates,
    ) -> BranchStatus {
        if let Some(head_branch) = review.head_branch()
            && head_branch != branch
        {
            if retries >= MAX_STALE_RETRIES {
                updates.insert(branch.to_owned(), None);
                return BranchStatus::no_pr();
            }
            tracing::debug!(branch, pr = review.number, head_branch, "stale cached review");
            return match self.reviews.find_review_for_branch(branch) {
                Some(fresh) => {
                    updates.insert(branch.to_owned(), Some(fresh.number));
                    self.classify(wt, branch, Some(&fresh), retries + 1, updates)
                }
                None => {
                    updates.insert(branch.to_owned(), None);
                    BranchStatus::no_pr()
                }
            };
        }

        let Some(local) = self.repo.head_commit(branch).or_else(|| wt.head.clone()) else {
            tracing::debug!(branch, "no local head commit");
            return BranchStatus::no_pr();
        };
        let merged = BranchStatus::with_review(WorktreeStatus::Merged, review);
        let pr_head = review.head_commit.as_str();

        if local == pr_head {
            return merged;
        }
        // Not fetched locally: nothing can disprove the merge.
        if !self.repo.commit_exists(pr_head) {
            return merged;
        }
        // Commits were pushed to the review after this branch was last pulled.
        if self.repo.is_ancestor(&local, pr_head) {
            return merged;
        }
        if !self.repo.non_merge_commits_after(branch, pr_head) {
            return merged;
        }

        if retries == 0
            && let Some(fresh) = self.reviews.find_review_for_branch(branch)
            && fresh.number != review.number
            && fresh.state == ReviewState::Merged
            && fresh.head_commit == local
        {
            tracing::debug!(branch, old = review.number, new = fresh.number, "newer merged review");
            updates.insert(branch.to_owned(), Some(fresh.number));
            return BranchStatus::with_review(WorktreeStatus::Merged, &fresh);
        }
        BranchStatus::with_review(WorktreeStatus::ChangesSinceMerge, review)
    }
}

#![forbid(unsafe_code)]

//! Read-only view of the remote code-review system.

pub mod gh;

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum ReviewState {
    #[serde(alias = "open")]
    Open,
    #[serde(alias = "merged")]
    Merged,
    #[serde(alias = "closed")]
    Closed,
}

/// Snapshot of one pull request as the review CLI reports it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Review {
    pub number: u64,
    pub state: ReviewState,
    #[serde(rename = "headRefOid", default)]
    pub head_commit: String,
    #[serde(rename = "headRefName", default)]
    pub head_branch: Option<String>,
}

impl Review {
    /// The recorded head branch, if the review system reported one.
    #[must_use]
    pub fn head_branch(&self) -> Option<&str> {
        self.head_branch.as_deref().filter(|b| !b.is_empty())
    }
}

/// Result of one batch state fetch.
///
/// When any id is `unresolved` the whole response is untrusted and
/// `reviews` is empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReviews {
    pub reviews: BTreeMap<u64, Review>,
    /// Ids the review system reports as nonexistent.
    pub unresolved: BTreeSet<u64>,
}

impl BatchReviews {
    #[must_use]
    pub fn resolved(reviews: BTreeMap<u64, Review>) -> Self {
        Self {
            reviews,
            unresolved: BTreeSet::new(),
        }
    }

    #[must_use]
    pub fn unresolved(ids: BTreeSet<u64>) -> Self {
        Self {
            reviews: BTreeMap::new(),
            unresolved: ids,
        }
    }
}

/// Capability object for the review CLI.
///
/// Lookups never fail outright: an unreachable or broken CLI answers `None`
/// or an empty batch, which callers must read as "unknown".
pub trait ReviewSystem {
    fn is_available(&self) -> bool;

    /// Most recent review of any state whose head is `branch`.
    fn find_review_for_branch(&self, branch: &str) -> Option<Review>;

    /// Current state of every id, fetched in a single round-trip.
    fn batch_fetch_review_states(&self, ids: &[u64]) -> BatchReviews;
}

/// Stand-in used when review lookups are switched off in the config.
#[derive(Debug, Clone, Copy, Default)]
pub struct Disabled;

impl ReviewSystem for Disabled {
    fn is_available(&self) -> bool {
        false
    }

    fn find_review_for_branch(&self, _branch: &str) -> Option<Review> {
        None
    }

    fn batch_fetch_review_states(&self, _ids: &[u64]) -> BatchReviews {
        BatchReviews::default()
    }
}

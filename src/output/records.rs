#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use serde::Serialize;

use crate::core::reconcile::{BranchStatus, WorktreeStatus};
use crate::core::worktree::Worktree;

pub const BARE_MARKER: &str = "(bare)";
pub const DETACHED_MARKER: &str = "(detached)";

/// One row of `wtpr list --json`.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WorktreeRecord {
    pub name: String,
    pub path: String,
    pub branch: Option<String>,
    pub status: Option<String>,
    pub pr_number: Option<u64>,
}

#[must_use]
pub fn status_key(status: WorktreeStatus) -> &'static str {
    match status {
        WorktreeStatus::NoPr => "no-pr",
        WorktreeStatus::Open => "open",
        WorktreeStatus::Merged => "merged",
        WorktreeStatus::Closed => "closed",
        WorktreeStatus::ChangesSinceMerge => "changes-since-merge",
        WorktreeStatus::Main => "main",
        WorktreeStatus::Dirty => "dirty",
    }
}

#[must_use]
pub fn status_label(status: WorktreeStatus) -> &'static str {
    match status {
        WorktreeStatus::NoPr => "no PR",
        WorktreeStatus::Open => "open",
        WorktreeStatus::Merged => "merged",
        WorktreeStatus::Closed => "closed",
        WorktreeStatus::ChangesSinceMerge => "changes since merge",
        WorktreeStatus::Main => "main",
        WorktreeStatus::Dirty => "merged, uncommitted changes",
    }
}

/// Branch column text: the branch name or a literal bare/detached marker.
#[must_use]
pub fn branch_cell(wt: &Worktree) -> String {
    if wt.is_bare {
        return BARE_MARKER.to_owned();
    }
    if wt.is_detached {
        return DETACHED_MARKER.to_owned();
    }
    wt.branch.clone().unwrap_or_else(|| "-".to_owned())
}

#[must_use]
pub fn build_records(
    worktrees: &[Worktree],
    statuses: &BTreeMap<String, BranchStatus>,
) -> Vec<WorktreeRecord> {
    worktrees
        .iter()
        .map(|wt| {
            let (status, pr_number) = if wt.is_bare {
                (Some("bare".to_owned()), None)
            } else if wt.is_detached {
                (Some("detached".to_owned()), None)
            } else {
                match wt.branch_name().and_then(|b| statuses.get(b)) {
                    Some(s) => (Some(status_key(s.status).to_owned()), s.pr_number),
                    None => (None, None),
                }
            };
            WorktreeRecord {
                name: wt.name(),
                path: wt.path.to_string_lossy().to_string(),
                branch: wt.branch_name().map(str::to_owned),
                status,
                pr_number,
            }
        })
        .collect()
}

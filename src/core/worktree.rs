#![forbid(unsafe_code)]

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::WtprError;

/// One checkout directory as reported by `git worktree list --porcelain`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Worktree {
    pub path: PathBuf,
    pub head: Option<String>,
    pub branch: Option<String>,
    pub is_bare: bool,
    pub is_detached: bool,
}

impl Worktree {
    /// Directory name of the checkout, used as the worktree's display name.
    #[must_use]
    pub fn name(&self) -> String {
        self.path
            .file_name()
            .map_or_else(|| self.path.to_string_lossy(), |s| s.to_string_lossy())
            .to_string()
    }

    /// Branch name, unless the worktree is bare or detached.
    #[must_use]
    pub fn branch_name(&self) -> Option<&str> {
        if self.is_bare || self.is_detached {
            return None;
        }
        self.branch.as_deref()
    }
}

/// Parses the machine-readable worktree listing.
///
/// Records are separated by blank lines and start with a `worktree` line.
/// Unknown attribute lines (`locked`, `prunable`, ...) are ignored. The last
/// record is closed by end of input whether or not it carries a marker.
#[must_use]
pub fn parse_worktree_porcelain(out: &str) -> Vec<Worktree> {
    let mut entries = Vec::new();
    let mut cur: Option<Worktree> = None;

    for line in out.lines() {
        let line = line.trim_end();
        if line.is_empty() {
            if let Some(wt) = cur.take() {
                entries.push(wt);
            }
            continue;
        }

        if let Some(path) = line.strip_prefix("worktree ") {
            if let Some(wt) = cur.take() {
                entries.push(wt);
            }
            cur = Some(Worktree {
                path: PathBuf::from(path),
                head: None,
                branch: None,
                is_bare: false,
                is_detached: false,
            });
            continue;
        }

        let Some(wt) = cur.as_mut() else {
            continue;
        };
        if let Some(head) = line.strip_prefix("HEAD ") {
            wt.head = Some(head.trim().to_owned());
        } else if let Some(branch) = line.strip_prefix("branch ") {
            let branch = branch.trim();
            wt.branch = Some(
                branch
                    .strip_prefix("refs/heads/")
                    .unwrap_or(branch)
                    .to_owned(),
            );
        } else if line == "bare" {
            wt.is_bare = true;
        } else if line == "detached" {
            wt.is_detached = true;
        }
    }
    if let Some(wt) = cur.take() {
        entries.push(wt);
    }

    entries
}

/// Resolves `pattern` to exactly one worktree.
///
/// An exact match on directory name or branch wins; otherwise the pattern is
/// matched case-insensitively as a substring of name, branch and path.
pub fn find_one<'a>(worktrees: &'a [Worktree], pattern: &str) -> Result<&'a Worktree, WtprError> {
    let exact: Vec<&Worktree> = worktrees
        .iter()
        .filter(|wt| wt.name() == pattern || wt.branch_name() == Some(pattern))
        .collect();
    if let [one] = exact.as_slice() {
        return Ok(one);
    }
    if exact.len() > 1 {
        return Err(WtprError::AmbiguousWorktree(pattern.to_owned()));
    }

    let p = pattern.to_lowercase();
    let matches: Vec<&Worktree> = worktrees
        .iter()
        .filter(|wt| {
            wt.name().to_lowercase().contains(&p)
                || wt
                    .branch_name()
                    .is_some_and(|b| b.to_lowercase().contains(&p))
                || wt.path.to_string_lossy().to_lowercase().contains(&p)
        })
        .collect();
    match matches.as_slice() {
        [] => Err(WtprError::WorktreeNotFound(pattern.to_owned())),
        [one] => Ok(one),
        _ => Err(WtprError::AmbiguousWorktree(pattern.to_owned())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = "worktree /src/repo
HEAD 1111111111111111111111111111111111111111
branch refs/heads/main

worktree /src/feature-x
HEAD 2222222222222222222222222222222222222222
branch refs/heads/feature/x
locked

worktree /src/bare.git
bare

worktree /src/detached
HEAD 3333333333333333333333333333333333333333
detached
";

    #[test]
    fn parses_branch_bare_and_detached_records() {
        let entries = parse_worktree_porcelain(LISTING);
        assert_eq!(entries.len(), 4);
        assert_eq!(
            entries[0],
            Worktree {
                path: PathBuf::from("/src/repo"),
                head: Some("1111111111111111111111111111111111111111".to_owned()),
                branch: Some("main".to_owned()),
                is_bare: false,
                is_detached: false,
            }
        );
        assert_eq!(entries[1].branch_name(), Some("feature/x"));
        assert_eq!(entries[1].name(), "feature-x");

        assert!(entries[2].is_bare);
        assert_eq!(entries[2].head, None);
        assert_eq!(entries[2].branch_name(), None);

        assert!(entries[3].is_detached);
        assert_eq!(entries[3].branch_name(), None);
    }

    #[test]
    fn last_record_is_closed_by_end_of_input() {
        let entries = parse_worktree_porcelain("worktree /a\nHEAD abc");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].head.as_deref(), Some("abc"));
        assert_eq!(entries[0].branch, None);
        assert!(!entries[0].is_bare && !entries[0].is_detached);
    }

    #[test]
    fn empty_listing_yields_nothing() {
        assert!(parse_worktree_porcelain("").is_empty());
        assert!(parse_worktree_porcelain("\n\n").is_empty());
    }

    #[test]
    fn find_one_prefers_exact_matches() {
        let entries = parse_worktree_porcelain(LISTING);
        assert_eq!(find_one(&entries, "feature/x").unwrap().name(), "feature-x");
        assert_eq!(find_one(&entries, "detached").unwrap().name(), "detached");
        assert_eq!(find_one(&entries, "FEATURE").unwrap().name(), "feature-x");
        assert!(matches!(
            find_one(&entries, "nope"),
            Err(WtprError::WorktreeNotFound(_))
        ));
        assert!(matches!(
            find_one(&entries, "/src"),
            Err(WtprError::AmbiguousWorktree(_))
        ));
    }
}

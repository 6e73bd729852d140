#![forbid(unsafe_code)]

use std::cell::OnceCell;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::path::PathBuf;

use serde::Deserialize;

use crate::core::exec::{self, ExecError};
use crate::core::naming::RepoId;
use crate::review::{BatchReviews, Review, ReviewSystem};

const PR_FIELDS: &str = "number,state,headRefOid,headRefName";

/// GitHub CLI backed review lookups.
#[derive(Debug)]
pub struct GhCli {
    program: String,
    dir: PathBuf,
    repo: Option<RepoId>,
    host: String,
    available: OnceCell<bool>,
}

impl GhCli {
    #[must_use]
    pub fn new(program: String, dir: PathBuf, repo: Option<RepoId>, host: String) -> Self {
        Self {
            program,
            dir,
            repo,
            host,
            available: OnceCell::new(),
        }
    }

    fn check_available(&self) -> bool {
        let Some(repo) = self.repo.as_ref() else {
            tracing::debug!("origin remote is not a recognised hosting url");
            return false;
        };
        if !repo.is_hosted_on(&self.host) {
            tracing::debug!(remote_host = %repo.host, host = %self.host, "origin is not on the review host");
            return false;
        }
        match exec::run(&self.program, &["--version"], &self.dir) {
            Ok(_) => true,
            Err(e) if e.is_not_found() => {
                tracing::debug!(program = %self.program, "review CLI not installed");
                false
            }
            Err(e) => {
                tracing::debug!(program = %self.program, error = %e, "review CLI unavailable");
                false
            }
        }
    }

    fn repo_arg(&self) -> Option<String> {
        self.repo
            .as_ref()
            .map(|r| format!("{}/{}/{}", r.host, r.owner, r.repo))
    }
}

impl ReviewSystem for GhCli {
    fn is_available(&self) -> bool {
        *self.available.get_or_init(|| self.check_available())
    }

    fn find_review_for_branch(&self, branch: &str) -> Option<Review> {
        let repo = self.repo_arg()?;
        let out = match exec::run(
            &self.program,
            &[
                "pr", "list", "--repo", &repo, "--head", branch, "--state", "all", "--limit", "1",
                "--json", PR_FIELDS,
            ],
            &self.dir,
        ) {
            Ok(out) => out,
            Err(e) => {
                tracing::debug!(branch, error = %e, "review lookup failed");
                return None;
            }
        };
        match parse_pr_list(&out) {
            Ok(review) => review,
            Err(e) => {
                tracing::debug!(branch, error = %e, "unparsable review list");
                None
            }
        }
    }

    fn batch_fetch_review_states(&self, ids: &[u64]) -> BatchReviews {
        let Some(repo) = self.repo.as_ref() else {
            return BatchReviews::default();
        };
        if ids.is_empty() {
            return BatchReviews::default();
        }

        let query = format!("query={}", batch_query(ids));
        let owner = format!("owner={}", repo.owner);
        let name = format!("name={}", repo.repo);
        let body = match exec::run(
            &self.program,
            &[
                "api",
                "graphql",
                "--hostname",
                &repo.host,
                "-f",
                &query,
                "-f",
                &owner,
                "-f",
                &name,
            ],
            &self.dir,
        ) {
            Ok(out) => out,
            // `gh api` exits non-zero on GraphQL errors but still prints the body.
            Err(ExecError::Failed { stdout, stderr, .. }) if !stdout.trim().is_empty() => {
                tracing::debug!(count = ids.len(), stderr = %stderr, "batch review fetch reported errors");
                stdout
            }
            Err(e) => {
                tracing::debug!(count = ids.len(), error = %e, "batch review fetch failed");
                return BatchReviews::default();
            }
        };
        match parse_batch_response(&body) {
            Ok(mut batch) => {
                batch.unresolved.retain(|id| ids.contains(id));
                if !batch.unresolved.is_empty() {
                    tracing::debug!(unresolved = ?batch.unresolved, "review ids do not resolve");
                }
                batch
            }
            Err(e) => {
                tracing::debug!(error = %e, "unusable batch review response");
                BatchReviews::default()
            }
        }
    }
}

fn batch_query(ids: &[u64]) -> String {
    let mut q = String::from(
        "query($owner: String!, $name: String!) { repository(owner: $owner, name: $name) {",
    );
    for id in ids {
        let _ = write!(
            q,
            " pr{id}: pullRequest(number: {id}) {{ number state headRefOid headRefName }}"
        );
    }
    q.push_str(" } }");
    q
}

fn parse_pr_list(out: &str) -> Result<Option<Review>, serde_json::Error> {
    let reviews: Vec<Review> = serde_json::from_str(out)?;
    Ok(reviews.into_iter().next())
}

#[derive(Debug, Deserialize)]
struct GraphqlResponse {
    data: Option<GraphqlData>,
    #[serde(default)]
    errors: Vec<GraphqlError>,
}

#[derive(Debug, Deserialize)]
struct GraphqlData {
    repository: Option<BTreeMap<String, Option<Review>>>,
}

#[derive(Debug, Deserialize)]
struct GraphqlError {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    path: Vec<serde_json::Value>,
}

impl GraphqlError {
    /// Review number of a `prN` alias the server could not resolve.
    fn unresolved_id(&self) -> Option<u64> {
        if self.kind.as_deref() != Some("NOT_FOUND") {
            return None;
        }
        self.path
            .iter()
            .filter_map(serde_json::Value::as_str)
            .find_map(|seg| seg.strip_prefix("pr")?.parse().ok())
    }
}

/// Any GraphQL error discards the data; NOT_FOUND aliases are reported.
fn parse_batch_response(out: &str) -> Result<BatchReviews, String> {
    let resp: GraphqlResponse = serde_json::from_str(out).map_err(|e| e.to_string())?;
    if !resp.errors.is_empty() {
        let unresolved: BTreeSet<u64> = resp
            .errors
            .iter()
            .filter_map(GraphqlError::unresolved_id)
            .collect();
        if unresolved.is_empty() {
            return Err(format!("graphql returned {} error(s)", resp.errors.len()));
        }
        return Ok(BatchReviews::unresolved(unresolved));
    }
    let repository = resp
        .data
        .and_then(|d| d.repository)
        .ok_or_else(|| "response has no repository".to_owned())?;
    Ok(BatchReviews::resolved(
        repository
            .into_values()
            .flatten()
            .map(|r| (r.number, r))
            .collect(),
    ))
}

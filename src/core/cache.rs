#![forbid(unsafe_code)]

//! Best-effort branch -> review number cache.
//!
//! The file lives next to the worktrees and holds a single JSON document:
//! `{ "prNumbers": { "<branch>": <number> } }`. A missing or unreadable
//! document reads as empty and write failures are only logged.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use serde::{Deserialize, Serialize};

pub type PrNumbers = BTreeMap<String, u64>;

#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheDocument {
    #[serde(rename = "prNumbers", default)]
    pr_numbers: PrNumbers,
}

#[derive(Debug, Clone)]
pub struct StatusCache {
    path: PathBuf,
}

impl StatusCache {
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    #[must_use]
    pub fn for_dir(dir: &Path, file_name: &str) -> Self {
        Self::new(dir.join(file_name))
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn load(&self) -> PrNumbers {
        let data = match std::fs::read(&self.path) {
            Ok(data) => data,
            Err(e) => {
                tracing::debug!(path = %self.path.display(), error = %e, "status cache not readable");
                return PrNumbers::new();
            }
        };
        match serde_json::from_slice::<CacheDocument>(&data) {
            Ok(doc) => doc.pr_numbers,
            Err(e) => {
                tracing::debug!(path = %self.path.display(), error = %e, "ignoring malformed status cache");
                PrNumbers::new()
            }
        }
    }

    pub fn save(&self, pr_numbers: &PrNumbers) {
        if let Err(e) = self.try_save(pr_numbers) {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to write status cache");
        }
    }

    /// Drops the entry for `branch`, writing only when something changed.
    pub fn forget(&self, branch: &str) {
        let mut pr_numbers = self.load();
        if pr_numbers.remove(branch).is_some() {
            self.save(&pr_numbers);
        }
    }

    pub fn clear(&self) -> anyhow::Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => {
                Err(e).with_context(|| format!("failed to remove {}", self.path.display()))
            }
        }
    }

    fn try_save(&self, pr_numbers: &PrNumbers) -> anyhow::Result<()> {
        let doc = CacheDocument {
            pr_numbers: pr_numbers.clone(),
        };
        let mut data = serde_json::to_vec_pretty(&doc)?;
        data.push(b'\n');
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, &data)
            .with_context(|| format!("failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path).with_context(|| {
            format!(
                "failed to rename {} -> {}",
                tmp.display(),
                self.path.display()
            )
        })?;
        Ok(())
    }
}

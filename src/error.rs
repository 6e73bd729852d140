#![forbid(unsafe_code)]

use thiserror::Error;

use crate::core::exec::ExecError;

#[derive(Debug, Error)]
pub enum WtprError {
    #[error("not inside a git repository (run wtpr from a repository checkout or one of its worktrees)")]
    NotInGitRepo,

    #[error("no repository context for {0} (the current directory is not part of a git checkout)")]
    NoRepoContext(String),

    #[error("git is required but was not found in PATH")]
    GitNotFound,

    #[error("config error: {0}")]
    Config(String),

    #[error("invalid config key '{0}'")]
    InvalidConfigKey(String),

    #[error("invalid config value for '{key}': {msg}")]
    InvalidConfigValue { key: String, msg: String },

    #[error("worktree not found matching pattern: {0}")]
    WorktreeNotFound(String),

    #[error("multiple worktrees match pattern: {0}")]
    AmbiguousWorktree(String),

    #[error(transparent)]
    Exec(ExecError),

    #[error("{0}")]
    Other(String),
}

impl From<ExecError> for WtprError {
    fn from(e: ExecError) -> Self {
        match e {
            ExecError::NotFound { ref program } if program == "git" => Self::GitNotFound,
            other => Self::Exec(other),
        }
    }
}

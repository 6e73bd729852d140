#![forbid(unsafe_code)]

pub mod cache;
pub mod exec;
pub mod git;
pub mod naming;
pub mod reconcile;
pub mod worktree;

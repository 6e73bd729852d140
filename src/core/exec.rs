#![forbid(unsafe_code)]

//! Synchronous runner for the external tools (git, the review CLI).
//!
//! Every call blocks until the child exits. There are no retries and no
//! timeouts; callers decide whether a failure matters.

use std::io;
use std::path::Path;
use std::process::{Command, Output, Stdio};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("{program} is required but was not found in PATH")]
    NotFound { program: String },

    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("{program} {args}: {stderr}")]
    Failed {
        program: String,
        args: String,
        code: Option<i32>,
        /// Captured output; some tools print a usable body before failing.
        stdout: String,
        stderr: String,
    },
}

impl ExecError {
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Runs `program` with `args` in `dir` and returns its stdout.
///
/// A non-zero exit becomes [`ExecError::Failed`] carrying stdout and the
/// trimmed stderr.
pub fn run(program: &str, args: &[&str], dir: &Path) -> Result<String, ExecError> {
    let out = output(program, args, dir)?;
    let stdout = String::from_utf8_lossy(&out.stdout).to_string();
    if out.status.success() {
        Ok(stdout)
    } else {
        let stderr = String::from_utf8_lossy(&out.stderr);
        Err(ExecError::Failed {
            program: program.to_owned(),
            args: args.join(" "),
            code: out.status.code(),
            stdout,
            stderr: stderr.trim().to_owned(),
        })
    }
}

/// Runs a query whose answer is the exit status itself.
///
/// Only a failure to spawn is an error; any exit code maps to a bool.
pub fn run_status(program: &str, args: &[&str], dir: &Path) -> Result<bool, ExecError> {
    let out = output(program, args, dir)?;
    Ok(out.status.success())
}

/// Runs `program` with the caller's stdout/stderr attached.
pub fn run_streamed(program: &str, args: &[&str], dir: &Path) -> Result<(), ExecError> {
    tracing::debug!(program, args = %args.join(" "), dir = %dir.display(), "exec (streamed)");
    let status = Command::new(program)
        .args(args)
        .current_dir(dir)
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .status()
        .map_err(|e| spawn_error(program, e))?;
    if status.success() {
        Ok(())
    } else {
        Err(ExecError::Failed {
            program: program.to_owned(),
            args: args.join(" "),
            code: status.code(),
            stdout: String::new(),
            stderr: String::new(),
        })
    }
}

fn output(program: &str, args: &[&str], dir: &Path) -> Result<Output, ExecError> {
    tracing::debug!(program, args = %args.join(" "), dir = %dir.display(), "exec");
    Command::new(program)
        .args(args)
        .current_dir(dir)
        .stdin(Stdio::null())
        .output()
        .map_err(|e| spawn_error(program, e))
}

fn spawn_error(program: &str, e: io::Error) -> ExecError {
    match e.kind() {
        io::ErrorKind::NotFound => ExecError::NotFound {
            program: program.to_owned(),
        },
        _ => ExecError::Spawn {
            program: program.to_owned(),
            source: e,
        },
    }
}

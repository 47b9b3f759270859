//! Sandbox adapter: the git-tracked working tree listings are replayed into.
//!
//! The replay engine only talks to the [`Sandbox`] trait. [`git::GitSandbox`]
//! drives a real clone through the `git` CLI; [`mock::MockSandbox`] is a
//! scripted in-memory stand-in used by tests.
pub mod git;
pub mod mock;

use crate::verify::IgnoreSet;
use anyhow::Result;
use serde::Serialize;
use std::fmt;

/// A symbolic label resolved to a concrete commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitSpec {
    pub label: String,
    pub rev: String,
}

impl fmt::Display for CommitSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.label, self.rev)
    }
}

/// Captured result of one shell command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CommandOutput {
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code: Some(exit_code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Terminal view of the run: stdout followed by stderr.
    pub fn combined(&self) -> String {
        if self.stderr.is_empty() {
            return self.stdout.clone();
        }
        let mut text = self.stdout.clone();
        if !text.is_empty() && !text.ends_with('\n') {
            text.push('\n');
        }
        text.push_str(&self.stderr);
        text
    }
}

/// Operations the replay engine needs from a working tree.
///
/// Calls are blocking; paths are relative to the sandbox root and may not
/// escape it.
pub trait Sandbox {
    /// Map a chapter or listing label to a concrete commit.
    fn resolve_commit_spec(&mut self, label: &str) -> Result<CommitSpec>;

    fn checkout(&mut self, spec: &CommitSpec) -> Result<()>;

    /// Run a shell command. A non-zero exit is reported in the output, not as an error.
    fn run_command(&mut self, command: &str) -> Result<CommandOutput>;

    /// Diff against the expected reference; `None` means nothing but ignorable noise differs.
    fn diff(&mut self, ignore: &IgnoreSet) -> Result<Option<String>>;

    fn commit(&mut self, message: &str) -> Result<()>;

    fn write_file(&mut self, path: &str, contents: &str) -> Result<()>;

    fn read_file(&mut self, path: &str) -> Result<String>;

    /// Bring one file to its state at `spec`.
    fn restore_file(&mut self, spec: &CommitSpec, path: &str) -> Result<()>;

    fn apply_patch(&mut self, patch: &str) -> Result<()>;
}

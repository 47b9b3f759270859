//! Scripted in-memory sandbox for replay tests.
use super::{CommandOutput, CommitSpec, Sandbox};
use crate::verify::{strip_ignored, IgnoreSet};
use anyhow::{anyhow, Result};
use std::collections::BTreeMap;

/// One recorded sandbox interaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SandboxCall {
    Resolve(String),
    Checkout(String),
    Run(String),
    Diff,
    Commit(String),
    Write(String),
    Read(String),
    Restore { rev: String, path: String },
    ApplyPatch,
}

#[derive(Debug, Default)]
pub struct MockSandbox {
    commits: BTreeMap<String, String>,
    outputs: BTreeMap<String, CommandOutput>,
    files: BTreeMap<String, String>,
    committed_files: BTreeMap<(String, String), String>,
    diff_text: String,
    head: Option<String>,
    calls: Vec<SandboxCall>,
}

impl MockSandbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_commit(mut self, label: &str, rev: &str) -> Self {
        self.commits.insert(label.to_string(), rev.to_string());
        self
    }

    /// Output returned for an exact command string. Unknown commands succeed silently.
    pub fn with_output(mut self, command: &str, output: CommandOutput) -> Self {
        self.outputs.insert(command.to_string(), output);
        self
    }

    pub fn with_file(mut self, path: &str, contents: &str) -> Self {
        self.files.insert(path.to_string(), contents.to_string());
        self
    }

    pub fn with_committed_file(mut self, rev: &str, path: &str, contents: &str) -> Self {
        self.committed_files
            .insert((rev.to_string(), path.to_string()), contents.to_string());
        self
    }

    /// Raw diff text reported by [`Sandbox::diff`] before ignore filtering.
    pub fn with_diff(mut self, diff: &str) -> Self {
        self.diff_text = diff.to_string();
        self
    }

    pub fn calls(&self) -> &[SandboxCall] {
        &self.calls
    }

    /// Commands run so far, in order.
    pub fn commands(&self) -> Vec<&str> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                SandboxCall::Run(command) => Some(command.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn file(&self, path: &str) -> Option<&str> {
        self.files.get(path).map(String::as_str)
    }

    pub fn head(&self) -> Option<&str> {
        self.head.as_deref()
    }
}

impl Sandbox for MockSandbox {
    fn resolve_commit_spec(&mut self, label: &str) -> Result<CommitSpec> {
        self.calls.push(SandboxCall::Resolve(label.to_string()));
        let rev = self
            .commits
            .get(label)
            .ok_or_else(|| anyhow!("unknown commit label {label:?}"))?;
        Ok(CommitSpec {
            label: label.to_string(),
            rev: rev.clone(),
        })
    }

    fn checkout(&mut self, spec: &CommitSpec) -> Result<()> {
        self.calls.push(SandboxCall::Checkout(spec.rev.clone()));
        if !self.commits.values().any(|rev| rev == &spec.rev) {
            return Err(anyhow!("unknown revision {}", spec.rev));
        }
        self.head = Some(spec.rev.clone());
        Ok(())
    }

    fn run_command(&mut self, command: &str) -> Result<CommandOutput> {
        self.calls.push(SandboxCall::Run(command.to_string()));
        Ok(self
            .outputs
            .get(command)
            .cloned()
            .unwrap_or_else(|| CommandOutput::ok("")))
    }

    fn diff(&mut self, ignore: &IgnoreSet) -> Result<Option<String>> {
        self.calls.push(SandboxCall::Diff);
        Ok(strip_ignored(&self.diff_text, ignore))
    }

    fn commit(&mut self, message: &str) -> Result<()> {
        self.calls.push(SandboxCall::Commit(message.to_string()));
        Ok(())
    }

    fn write_file(&mut self, path: &str, contents: &str) -> Result<()> {
        self.calls.push(SandboxCall::Write(path.to_string()));
        self.files.insert(path.to_string(), contents.to_string());
        Ok(())
    }

    fn read_file(&mut self, path: &str) -> Result<String> {
        self.calls.push(SandboxCall::Read(path.to_string()));
        self.files
            .get(path)
            .cloned()
            .ok_or_else(|| anyhow!("no such file {path}"))
    }

    fn restore_file(&mut self, spec: &CommitSpec, path: &str) -> Result<()> {
        self.calls.push(SandboxCall::Restore {
            rev: spec.rev.clone(),
            path: path.to_string(),
        });
        let contents = self
            .committed_files
            .get(&(spec.rev.clone(), path.to_string()))
            .cloned()
            .ok_or_else(|| anyhow!("{path} not present at {}", spec.rev))?;
        self.files.insert(path.to_string(), contents);
        Ok(())
    }

    fn apply_patch(&mut self, _patch: &str) -> Result<()> {
        self.calls.push(SandboxCall::ApplyPatch);
        Ok(())
    }
}

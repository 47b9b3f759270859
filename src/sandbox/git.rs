//! Git-CLI backed sandbox.
//!
//! Each chapter run gets its own clone of the sample project. Labels resolve
//! first as branches on `origin`, then as commits in the reference history whose
//! message carries `--<label>--`.
use super::{CommandOutput, CommitSpec, Sandbox};
use crate::util::sandbox_path;
use crate::verify::{strip_ignored, IgnoreSet};
use anyhow::{anyhow, Context, Result};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Instant;
use tempfile::TempDir;

const COMMITTER_NAME: &str = "book-replay";
const COMMITTER_EMAIL: &str = "book-replay@localhost";

/// Inputs for provisioning a fresh sandbox.
#[derive(Debug, Clone)]
pub struct GitSandboxOptions {
    /// Path or URL of the sample project repository.
    pub repo: String,
    /// Revision the final tree is diffed against.
    pub reference: String,
    /// Clone into this directory instead of a temporary one.
    pub dest: Option<PathBuf>,
    /// Environment overrides for replayed commands.
    pub env: BTreeMap<String, String>,
}

pub struct GitSandbox {
    root: PathBuf,
    git: PathBuf,
    reference: String,
    env: BTreeMap<String, String>,
    // Held so the clone lives exactly as long as the sandbox.
    _tempdir: Option<TempDir>,
}

impl GitSandbox {
    /// Clone the sample project into a fresh working tree.
    pub fn provision(options: &GitSandboxOptions) -> Result<Self> {
        let git = which::which("git").context("locate git on PATH")?;
        let (tempdir, root) = match &options.dest {
            Some(dest) => {
                if dest.exists() && fs::read_dir(dest)?.next().is_some() {
                    return Err(anyhow!(
                        "sandbox directory {} is not empty",
                        dest.display()
                    ));
                }
                (None, dest.clone())
            }
            None => {
                let tempdir = tempfile::Builder::new()
                    .prefix("book-replay-")
                    .tempdir()
                    .context("create sandbox temp dir")?;
                let root = tempdir.path().join("tree");
                (Some(tempdir), root)
            }
        };

        let start = Instant::now();
        let output = Command::new(&git)
            .args(["clone", "--quiet", options.repo.as_str()])
            .arg(&root)
            .stdin(Stdio::null())
            .output()
            .context("spawn git clone")?;
        if !output.status.success() {
            return Err(anyhow!(
                "git clone {} failed: {}",
                options.repo,
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }
        tracing::info!(
            elapsed_ms = start.elapsed().as_millis(),
            repo = %options.repo,
            root = %root.display(),
            "sandbox provisioned"
        );

        let sandbox = Self {
            root,
            git,
            reference: options.reference.clone(),
            env: options.env.clone(),
            _tempdir: tempdir,
        };
        sandbox.configure_committer()?;
        Ok(sandbox)
    }

    /// Wrap an existing working tree without cloning.
    pub fn open(root: &Path, reference: &str, env: BTreeMap<String, String>) -> Result<Self> {
        let git = which::which("git").context("locate git on PATH")?;
        let root = root
            .canonicalize()
            .with_context(|| format!("resolve sandbox root {}", root.display()))?;
        let sandbox = Self {
            root,
            git,
            reference: reference.to_string(),
            env,
            _tempdir: None,
        };
        sandbox.configure_committer()?;
        Ok(sandbox)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn configure_committer(&self) -> Result<()> {
        self.git(&["config", "user.name", COMMITTER_NAME])?;
        self.git(&["config", "user.email", COMMITTER_EMAIL])?;
        self.git(&["config", "commit.gpgsign", "false"])?;
        Ok(())
    }

    fn git_command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new(&self.git);
        cmd.arg("-C").arg(&self.root).args(args);
        cmd.env("GIT_PAGER", "cat").stdin(Stdio::null());
        cmd
    }

    /// Run git and return stdout, failing on a non-zero exit.
    fn git(&self, args: &[&str]) -> Result<String> {
        let output = self
            .git_command(args)
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!(
                "git {} failed with status {}: {}",
                args.join(" "),
                output.status,
                stderr.trim()
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Like [`Self::git`] but a non-zero exit yields `None`.
    fn git_try(&self, args: &[&str]) -> Result<Option<String>> {
        let output = self
            .git_command(args)
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))?;
        if !output.status.success() {
            return Ok(None);
        }
        Ok(Some(String::from_utf8_lossy(&output.stdout).trim().to_string()))
    }
}

impl Sandbox for GitSandbox {
    fn resolve_commit_spec(&mut self, label: &str) -> Result<CommitSpec> {
        let candidates = [
            format!("refs/remotes/origin/{label}^{{commit}}"),
            format!("{}^{{/--{label}--}}", self.reference),
        ];
        for candidate in &candidates {
            if let Some(rev) =
                self.git_try(&["rev-parse", "--verify", "--quiet", candidate.as_str()])?
            {
                tracing::debug!(label, rev = %rev, "resolved commit label");
                return Ok(CommitSpec {
                    label: label.to_string(),
                    rev,
                });
            }
        }
        Err(anyhow!(
            "cannot resolve commit label {label:?} against {}",
            self.reference
        ))
    }

    fn checkout(&mut self, spec: &CommitSpec) -> Result<()> {
        self.git(&["checkout", "--quiet", spec.rev.as_str()])
            .with_context(|| format!("checkout {spec}"))?;
        Ok(())
    }

    fn run_command(&mut self, command: &str) -> Result<CommandOutput> {
        let start = Instant::now();
        let output = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&self.root)
            .env("GIT_PAGER", "cat")
            .env("PAGER", "cat")
            .envs(&self.env)
            .stdin(Stdio::null())
            .output()
            .with_context(|| format!("spawn sh -c {command:?}"))?;
        let result = CommandOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        tracing::info!(
            elapsed_ms = start.elapsed().as_millis(),
            exit_code = ?result.exit_code,
            stdout_bytes = result.stdout.len(),
            stderr_bytes = result.stderr.len(),
            "command complete"
        );
        Ok(result)
    }

    fn diff(&mut self, ignore: &IgnoreSet) -> Result<Option<String>> {
        let raw = self
            .git(&["diff", "-w", self.reference.as_str()])
            .with_context(|| format!("diff against {}", self.reference))?;
        Ok(strip_ignored(&raw, ignore))
    }

    fn commit(&mut self, message: &str) -> Result<()> {
        self.git(&["add", "-A"])?;
        self.git(&["commit", "--quiet", "--allow-empty", "-m", message])?;
        Ok(())
    }

    fn write_file(&mut self, path: &str, contents: &str) -> Result<()> {
        let dest = sandbox_path(&self.root, path)?;
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
        }
        fs::write(&dest, contents).with_context(|| format!("write {}", dest.display()))?;
        Ok(())
    }

    fn read_file(&mut self, path: &str) -> Result<String> {
        let source = sandbox_path(&self.root, path)?;
        fs::read_to_string(&source).with_context(|| format!("read {}", source.display()))
    }

    fn restore_file(&mut self, spec: &CommitSpec, path: &str) -> Result<()> {
        sandbox_path(&self.root, path)?;
        self.git(&["checkout", "--quiet", spec.rev.as_str(), "--", path])
            .with_context(|| format!("restore {path} from {spec}"))?;
        Ok(())
    }

    fn apply_patch(&mut self, patch: &str) -> Result<()> {
        let mut child = self
            .git_command(&["apply", "--whitespace=nowarn", "-"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .context("spawn git apply")?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(patch.as_bytes())
                .context("write patch to git apply")?;
        }
        let output = child.wait_with_output().context("wait for git apply")?;
        if !output.status.success() {
            return Err(anyhow!(
                "git apply failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }
        Ok(())
    }
}

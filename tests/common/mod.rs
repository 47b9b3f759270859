//! Shared test infrastructure for integration tests.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tempfile::TempDir;

/// Check if git is available; skip test if not.
pub fn skip_if_git_missing() -> bool {
    let missing = Command::new("git")
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .is_err();
    if missing {
        eprintln!("Skipping: git not available");
    }
    missing
}

/// A throwaway origin repository standing in for a book's sample project.
pub struct SampleRepo {
    dir: TempDir,
}

impl SampleRepo {
    pub fn init() -> anyhow::Result<Self> {
        let dir = TempDir::new()?;
        std::fs::create_dir_all(dir.path().join("origin"))?;
        let repo = Self { dir };
        repo.git(&["init", "--quiet"])?;
        repo.git(&["symbolic-ref", "HEAD", "refs/heads/main"])?;
        Ok(repo)
    }

    pub fn origin(&self) -> PathBuf {
        self.dir.path().join("origin")
    }

    /// Scratch space next to the origin, e.g. for a kept sandbox.
    pub fn scratch(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    pub fn write(&self, rel: &str, contents: &str) -> anyhow::Result<()> {
        let path = self.origin().join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn commit_all(&self, message: &str) -> anyhow::Result<()> {
        self.git(&["add", "-A"])?;
        self.git(&["commit", "--quiet", "--allow-empty", "-m", message])?;
        Ok(())
    }

    pub fn branch(&self, name: &str) -> anyhow::Result<()> {
        self.git(&["branch", name])?;
        Ok(())
    }

    fn git(&self, args: &[&str]) -> anyhow::Result<()> {
        run_git(&self.origin(), args)
    }
}

fn run_git(dir: &Path, args: &[&str]) -> anyhow::Result<()> {
    let output = Command::new("git")
        .arg("-C")
        .arg(dir)
        .args(["-c", "commit.gpgsign=false"])
        .args(args)
        .env("GIT_AUTHOR_NAME", "Sample Author")
        .env("GIT_AUTHOR_EMAIL", "author@example.com")
        .env("GIT_COMMITTER_NAME", "Sample Author")
        .env("GIT_COMMITTER_EMAIL", "author@example.com")
        .stdin(Stdio::null())
        .output()?;
    if !output.status.success() {
        return Err(anyhow::anyhow!(
            "git {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr)
        ));
    }
    Ok(())
}

//! Version-control operations used by the commit flow.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::runner::{CommandOutput, CommandResult, CommandRunner, ProcessError};

const DEFAULT_GIT_TIMEOUT_MS: u64 = 30_000;
const MAX_GIT_TIMEOUT_MS: u64 = 300_000;

/// `[vcs]` settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct GitSettings {
    pub git_timeout_ms: u64,
}

impl Default for GitSettings {
    fn default() -> Self {
        Self {
            git_timeout_ms: DEFAULT_GIT_TIMEOUT_MS,
        }
    }
}

impl GitSettings {
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.git_timeout_ms.clamp(100, MAX_GIT_TIMEOUT_MS))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GitError {
    #[error(transparent)]
    Process(#[from] ProcessError),
    #[error("commit message must not be empty")]
    EmptyMessage,
    #[error("nothing staged to commit")]
    NothingStaged,
}

/// One line of `git status --porcelain=1`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    pub index: char,
    pub worktree: char,
    pub path: String,
    /// Source path of a rename or copy.
    pub original: Option<String>,
}

impl StatusEntry {
    #[must_use]
    pub fn is_untracked(&self) -> bool {
        self.index == '?' && self.worktree == '?'
    }

    #[must_use]
    pub fn is_staged(&self) -> bool {
        !matches!(self.index, ' ' | '?' | '!')
    }

    fn parse(line: &str) -> Option<Self> {
        let mut chars = line.chars();
        let index = chars.next()?;
        let worktree = chars.next()?;
        let rest = line.get(3..)?;
        if rest.is_empty() {
            return None;
        }
        let (original, path) = match rest.split_once(" -> ") {
            Some((from, to)) => (Some(from.to_string()), to.to_string()),
            None => (None, rest.to_string()),
        };
        Some(Self {
            index,
            worktree,
            path,
            original,
        })
    }
}

#[must_use]
pub fn parse_porcelain(output: &str) -> Vec<StatusEntry> {
    output
        .lines()
        .filter(|line| !line.starts_with("##"))
        .filter_map(StatusEntry::parse)
        .collect()
}

#[derive(Debug, Clone)]
pub struct GitClient {
    runner: CommandRunner,
    workdir: PathBuf,
    timeout: Duration,
}

impl GitClient {
    pub fn new(workdir: impl Into<PathBuf>, settings: &GitSettings) -> Self {
        Self {
            runner: CommandRunner::new().with_env("GIT_TERMINAL_PROMPT", "0"),
            workdir: workdir.into(),
            timeout: settings.timeout(),
        }
    }

    #[must_use]
    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    async fn exec(&self, subcommand: &[&str]) -> CommandResult {
        let mut argv: Vec<&str> = vec!["git", "--no-pager", "-c", "color.ui=false"];
        // External diff drivers and textconv filters run arbitrary programs.
        match subcommand.split_first() {
            Some((cmd @ &("diff" | "show" | "log"), rest)) => {
                argv.push(*cmd);
                argv.extend(["--no-ext-diff", "--no-textconv"]);
                argv.extend(rest);
            }
            _ => argv.extend(subcommand),
        }
        tracing::debug!(args = ?subcommand, workdir = %self.workdir.display(), "git");
        self.runner.run(&argv, &self.workdir, self.timeout).await
    }

    async fn git(&self, subcommand: &[&str]) -> Result<CommandOutput, ProcessError> {
        self.exec(subcommand).await.into_output()
    }

    /// True inside a work tree. A missing `git` binary is an error, not `false`.
    pub async fn is_repository(&self) -> Result<bool, GitError> {
        let result = self.exec(&["rev-parse", "--is-inside-work-tree"]).await;
        if let CommandResult::Completed(output) = &result {
            return Ok(output.success() && output.stdout.trim() == "true");
        }
        result.into_output()?;
        Ok(false)
    }

    pub async fn status(&self) -> Result<Vec<StatusEntry>, GitError> {
        let output = self.git(&["status", "--porcelain=1"]).await?;
        Ok(parse_porcelain(&output.stdout))
    }

    pub async fn staged_diff(&self) -> Result<String, GitError> {
        let output = self.git(&["diff", "--cached"]).await?;
        if output.truncated {
            tracing::warn!("Staged diff exceeded the capture limit and was truncated");
        }
        Ok(output.stdout)
    }

    pub async fn stage_all(&self) -> Result<(), GitError> {
        self.git(&["add", "-A"]).await?;
        Ok(())
    }

    /// Commit the index. Returns the short hash when git reports one.
    pub async fn commit(&self, message: &str) -> Result<Option<String>, GitError> {
        let message = message.trim();
        if message.is_empty() {
            return Err(GitError::EmptyMessage);
        }
        if !self.status().await?.iter().any(StatusEntry::is_staged) {
            return Err(GitError::NothingStaged);
        }
        let output = self.git(&["commit", "-m", message]).await?;
        let hash = output
            .stdout
            .split_whitespace()
            .find(|s| s.len() >= 7 && s.chars().all(|c| c.is_ascii_hexdigit() || c == ']'))
            .map(|s| s.trim_end_matches(']').to_string());
        tracing::info!(hash = ?hash, "Committed");
        Ok(hash)
    }

    /// `None` on a detached HEAD.
    pub async fn current_branch(&self) -> Result<Option<String>, GitError> {
        match self.exec(&["symbolic-ref", "--short", "-q", "HEAD"]).await {
            CommandResult::Completed(output) if output.exit_code == Some(1) => Ok(None),
            result => {
                let output = result.into_output()?;
                let branch = output.stdout.trim();
                Ok((!branch.is_empty()).then(|| branch.to_string()))
            }
        }
    }
}

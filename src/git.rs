// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Git capabilities through libgit2.
//!
//! gkn needs very little from Git itself: whether a work tree is clean, a
//! cheap fingerprint that changes whenever the work tree or its HEAD changes,
//! and a way to clone repositories. The first two sit behind
//! [`WorkTreeProbe`] so callers can substitute a fake. Read-only views for
//! display, e.g., [`inspect`] and [`log`], go straight to libgit2.

use auth_git2::{GitAuthenticator, Prompter};
use chrono::{DateTime, Utc};
use git2::{
    build::RepoBuilder, Commit, Config, ErrorCode, FetchOptions, RemoteCallbacks, Repository, Sort,
};
use indicatif::{ProgressBar, ProgressStyle};
use inquire::{Password, Text};
use serde::Serialize;
use std::{
    io::{self, IsTerminal},
    path::{Path, PathBuf},
    time,
};
use tracing::{debug, info, instrument};

/// Fingerprint head component for a repository without commits.
pub const UNBORN_HEAD: &str = "unborn";

/// Layer of indirection for work tree inspection.
pub trait WorkTreeProbe: Send + Sync {
    /// Check if work tree has no changes, untracked files included.
    fn is_clean(&self, path: &Path) -> Result<bool>;

    /// Summarize HEAD revision and work tree status into one string.
    ///
    /// Two fingerprints differ whenever HEAD moves or the status of any file
    /// in the work tree changes.
    fn fingerprint(&self, path: &Path) -> Result<String>;
}

/// Work tree inspection through libgit2.
#[derive(Debug, Default, Clone, Copy)]
pub struct Git2Probe;

impl Git2Probe {
    fn open(path: &Path) -> Result<Repository> {
        Repository::open(path).map_err(|err| GitError::Open {
            source: err,
            path: path.to_path_buf(),
        })
    }

    fn status_lines(repository: &Repository, path: &Path) -> Result<Vec<String>> {
        let mut opts = git2::StatusOptions::new();
        opts.include_untracked(true)
            .include_ignored(false)
            .recurse_untracked_dirs(true);

        let statuses = repository
            .statuses(Some(&mut opts))
            .map_err(|err| GitError::Status {
                source: err,
                path: path.to_path_buf(),
            })?;

        let mut lines = statuses
            .iter()
            .map(|entry| {
                format!(
                    "{:04x} {}",
                    entry.status().bits(),
                    String::from_utf8_lossy(entry.path_bytes())
                )
            })
            .collect::<Vec<_>>();
        lines.sort();

        Ok(lines)
    }
}

impl WorkTreeProbe for Git2Probe {
    #[instrument(skip(self, path), level = "debug")]
    fn is_clean(&self, path: &Path) -> Result<bool> {
        let repository = Self::open(path)?;
        let lines = Self::status_lines(&repository, path)?;
        debug!("{} status entries in {:?}", lines.len(), path.display());

        Ok(lines.is_empty())
    }

    #[instrument(skip(self, path), level = "debug")]
    fn fingerprint(&self, path: &Path) -> Result<String> {
        let repository = Self::open(path)?;
        let head = head_commit(&repository, path)?
            .map(|commit| commit.id().to_string())
            .unwrap_or_else(|| UNBORN_HEAD.into());
        let lines = Self::status_lines(&repository, path)?;

        Ok(format!("{head}|{}", lines.join("\n")))
    }
}

/// Resolve HEAD to a commit, or nothing for an unborn branch.
fn head_commit<'r>(repository: &'r Repository, path: &Path) -> Result<Option<Commit<'r>>> {
    let head = match repository.head() {
        Ok(head) => head,
        Err(err) if matches!(err.code(), ErrorCode::UnbornBranch | ErrorCode::NotFound) => {
            return Ok(None)
        }
        Err(err) => {
            return Err(GitError::Head {
                source: err,
                path: path.to_path_buf(),
            })
        }
    };

    head.peel_to_commit()
        .map(Some)
        .map_err(|err| GitError::Head {
            source: err,
            path: path.to_path_buf(),
        })
}

/// One commit as shown by `repo info`, `repo recent` and `repo graph`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitSummary {
    pub id: String,
    pub time: DateTime<Utc>,
    pub summary: String,
}

impl CommitSummary {
    pub fn short_id(&self) -> &str {
        self.id.get(..7).unwrap_or(&self.id)
    }
}

impl From<&Commit<'_>> for CommitSummary {
    fn from(commit: &Commit<'_>) -> Self {
        Self {
            id: commit.id().to_string(),
            time: DateTime::from_timestamp(commit.time().seconds(), 0).unwrap_or_default(),
            summary: commit.summary().unwrap_or_default().to_owned(),
        }
    }
}

/// Branch, remote and status details of one repository.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct RepoDetail {
    /// URL of the `origin` remote.
    pub origin: Option<String>,

    /// Branch HEAD points at, `None` when detached.
    pub current_branch: Option<String>,

    /// Branch `origin/HEAD` points at, if the remote advertised one.
    pub default_branch: Option<String>,

    pub dirty: bool,
    pub last_commit: Option<CommitSummary>,
}

/// Gather [`RepoDetail`] for repository at `path`.
///
/// Missing pieces, e.g., no origin remote or no commits yet, are left empty
/// rather than treated as errors.
///
/// # Errors
///
/// - Return [`GitError::Open`] if the repository cannot be opened.
/// - Return [`GitError::Status`] if the work tree status cannot be read.
/// - Return [`GitError::Head`] if HEAD exists but cannot be resolved.
#[instrument(skip(path), level = "debug")]
pub fn inspect(path: impl AsRef<Path>) -> Result<RepoDetail> {
    let path = path.as_ref();
    let repository = Git2Probe::open(path)?;

    let origin = repository
        .find_remote("origin")
        .ok()
        .and_then(|remote| remote.url().map(str::to_owned));
    let current_branch = symbolic_branch(&repository, "HEAD", "refs/heads/");
    let default_branch =
        symbolic_branch(&repository, "refs/remotes/origin/HEAD", "refs/remotes/origin/");
    let dirty = !Git2Probe::status_lines(&repository, path)?.is_empty();
    let last_commit = head_commit(&repository, path)?.map(|commit| CommitSummary::from(&commit));

    Ok(RepoDetail {
        origin,
        current_branch,
        default_branch,
        dirty,
        last_commit,
    })
}

fn symbolic_branch(repository: &Repository, name: &str, prefix: &str) -> Option<String> {
    let reference = repository.find_reference(name).ok()?;
    let target = reference.symbolic_target()?;
    target.strip_prefix(prefix).map(str::to_owned)
}

/// Latest commit reachable from HEAD, `None` for an unborn branch.
///
/// # Errors
///
/// - Return [`GitError::Open`] if the repository cannot be opened.
/// - Return [`GitError::Head`] if HEAD exists but cannot be resolved.
pub fn last_commit(path: impl AsRef<Path>) -> Result<Option<CommitSummary>> {
    let path = path.as_ref();
    let repository = Git2Probe::open(path)?;
    let commit = head_commit(&repository, path)?;

    Ok(commit.map(|commit| CommitSummary::from(&commit)))
}

/// Walk history from HEAD, newest first, at most `limit` commits.
///
/// A `limit` of zero walks everything. An unborn branch has no history.
///
/// # Errors
///
/// - Return [`GitError::Open`] if the repository cannot be opened.
/// - Return [`GitError::Head`] if HEAD exists but cannot be resolved.
/// - Return [`GitError::Log`] if history cannot be walked.
#[instrument(skip(path), level = "debug")]
pub fn log(path: impl AsRef<Path>, limit: usize) -> Result<Vec<CommitSummary>> {
    let path = path.as_ref();
    let repository = Git2Probe::open(path)?;
    let Some(head) = head_commit(&repository, path)? else {
        return Ok(Vec::new());
    };

    let log_err = |err| GitError::Log {
        source: err,
        path: path.to_path_buf(),
    };
    let mut walk = repository.revwalk().map_err(log_err)?;
    walk.set_sorting(Sort::TOPOLOGICAL | Sort::TIME)
        .map_err(log_err)?;
    walk.push(head.id()).map_err(log_err)?;

    let limit = if limit == 0 { usize::MAX } else { limit };
    let mut commits = Vec::new();
    for oid in walk.take(limit) {
        let commit = repository
            .find_commit(oid.map_err(log_err)?)
            .map_err(log_err)?;
        commits.push(CommitSummary::from(&commit));
    }
    debug!("walked {} commits in {:?}", commits.len(), path.display());

    Ok(commits)
}

/// Clone remote repository with a regular work tree.
///
/// The progress of the clone is displayed through given progress bar. If
/// credentials are required, the user is prompted for them, suspending the
/// progress bar while doing so.
///
/// # Errors
///
/// - Return [`GitError::IndicatifStyleTemplate`] if progress bar cannot be
///   styled.
/// - Return [`GitError::Config`] if default Git configuration cannot be
///   opened.
/// - Return [`GitError::Clone`] if the clone itself fails.
#[instrument(skip(url, path, bar), level = "debug")]
pub fn clone_repository(
    url: impl AsRef<str>,
    path: impl AsRef<Path>,
    bar: ProgressBar,
) -> Result<Repository> {
    let (url, path) = (url.as_ref(), path.as_ref());
    info!("clone {url:?} into {:?}", path.display());

    let style = ProgressStyle::with_template(
        "{elapsed_precise:.green}  {msg:<50}  [{wide_bar:.yellow/blue}]",
    )?
    .progress_chars("-Cco.");
    bar.set_style(style);
    bar.set_message(url.to_string());
    bar.enable_steady_tick(time::Duration::from_millis(100));

    let authenticator = GitAuthenticator::default().set_prompter(ClonePrompter::new(bar.clone()));
    let config = Config::open_default().map_err(GitError::Config)?;

    let mut throttle = time::Instant::now();
    let mut rc = RemoteCallbacks::new();
    rc.credentials(authenticator.credentials(&config));
    rc.transfer_progress(|progress| {
        let stats = progress.to_owned();
        if throttle.elapsed() > time::Duration::from_millis(10) {
            throttle = time::Instant::now();
            bar.set_length(stats.total_objects() as u64);
            bar.set_position(stats.received_objects() as u64);
        }
        true
    });

    let mut fo = FetchOptions::new();
    fo.remote_callbacks(rc);
    let repository = RepoBuilder::new()
        .fetch_options(fo)
        .clone(url, path)
        .map_err(|err| GitError::Clone {
            source: err,
            url: url.to_owned(),
            path: path.to_path_buf(),
        })?;
    bar.finish_and_clear();

    Ok(repository)
}

/// Credential prompts for a single clone.
///
/// Prompts suspend the clone's progress bar while the user types. Without a
/// terminal on stdin nothing is asked and libgit2 sees no credentials.
#[derive(Debug, Clone)]
struct ClonePrompter {
    bar: ProgressBar,
    interactive: bool,
}

impl ClonePrompter {
    fn new(bar: ProgressBar) -> Self {
        Self {
            bar,
            interactive: io::stdin().is_terminal(),
        }
    }

    fn ask_secret(&self, label: &str) -> Option<String> {
        if !self.interactive {
            return None;
        }

        self.bar
            .suspend(|| Password::new(label).without_confirmation().prompt().ok())
    }
}

impl Prompter for ClonePrompter {
    fn prompt_username_password(
        &mut self,
        url: &str,
        _config: &git2::Config,
    ) -> Option<(String, String)> {
        info!("credentials required for {url}");
        if !self.interactive {
            return None;
        }

        let username = self.bar.suspend(|| Text::new("username").prompt().ok())?;
        let password = self.ask_secret("password")?;
        Some((username, password))
    }

    fn prompt_password(
        &mut self,
        username: &str,
        url: &str,
        _config: &git2::Config,
    ) -> Option<String> {
        info!("password required for {username} at {url}");
        self.ask_secret("password")
    }

    fn prompt_ssh_key_passphrase(
        &mut self,
        ssh_key_path: &Path,
        _config: &git2::Config,
    ) -> Option<String> {
        info!("passphrase required for {}", ssh_key_path.display());
        self.ask_secret("passphrase")
    }
}

/// Git capability error types.
#[derive(Debug, thiserror::Error)]
pub enum GitError {
    /// Repository cannot be opened.
    #[error("failed to open repository {:?}", path.display())]
    Open {
        #[source]
        source: git2::Error,
        path: PathBuf,
    },

    /// Work tree status cannot be read.
    #[error("failed to read status of {:?}", path.display())]
    Status {
        #[source]
        source: git2::Error,
        path: PathBuf,
    },

    /// HEAD cannot be resolved.
    #[error("failed to resolve HEAD of {:?}", path.display())]
    Head {
        #[source]
        source: git2::Error,
        path: PathBuf,
    },

    /// History cannot be walked.
    #[error("failed to walk history of {:?}", path.display())]
    Log {
        #[source]
        source: git2::Error,
        path: PathBuf,
    },

    /// Remote repository cannot be cloned.
    #[error("failed to clone {url:?} into {:?}", path.display())]
    Clone {
        #[source]
        source: git2::Error,
        url: String,
        path: PathBuf,
    },

    /// Default Git configuration cannot be opened.
    #[error(transparent)]
    Config(git2::Error),

    /// Style template cannot be set for progress bars.
    #[error(transparent)]
    IndicatifStyleTemplate(#[from] indicatif::style::TemplateError),
}

/// Friendly result alias :3
pub type Result<T, E = GitError> = std::result::Result<T, E>;

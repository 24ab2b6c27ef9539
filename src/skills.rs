// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Skills propagation across repositories.
//!
//! Every [`SyncTarget`] names a source directory and a set of destinations.
//! Relative destinations are resolved against each repository, so one
//! target fans out into one __placement__ per repository and destination.
//!
//! Operations here are batch operations. Anything that would make the whole
//! batch pointless, e.g., an invalid mode and policy pair or a source the
//! guard rejects, fails before any placement is touched. Past that point,
//! each placement is attempted regardless of how the others went, and its
//! outcome is recorded in its own [`Record`].

use crate::{
    config::SyncTarget,
    exec::{CommandRunner, Invocation, RunError},
    git::{clone_repository, GitError, WorkTreeProbe},
    guard::{Guard, GuardError},
    repo::{is_repository, Repository},
    sync::{
        clean, diff, list_files, resolve_destination, validate_mode, ConflictPolicy, DiffResult,
        SourceListing, SyncError, SyncMode, SyncOptions, SyncReport,
    },
};

use indicatif::ProgressBar;
use serde::Serialize;
use std::{
    collections::HashSet,
    fs, io,
    path::{Path, PathBuf},
};
use tracing::{info, instrument, warn};

/// One target destination inside one repository.
#[derive(Debug, Clone)]
pub struct Placement<'a> {
    pub repo: &'a Repository,
    pub target: &'a SyncTarget,
    pub destination: PathBuf,
}

/// Outcome of an operation on one placement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Record<T> {
    pub repo: String,
    pub target: String,
    pub destination: PathBuf,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<T>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> Record<T> {
    fn new(placement: &Placement<'_>, outcome: Result<T, impl ToString>) -> Self {
        let (outcome, error) = match outcome {
            Ok(outcome) => (Some(outcome), None),
            Err(err) => (None, Some(err.to_string())),
        };

        Self {
            repo: placement.repo.name().to_owned(),
            target: placement.target.name.clone(),
            destination: placement.destination.clone(),
            outcome,
            error,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Enumerate placements in repository, target, then destination order.
pub fn placements<'a>(
    repos: &'a [Repository],
    targets: &[&'a SyncTarget],
) -> Vec<Placement<'a>> {
    repos
        .iter()
        .flat_map(|repo| {
            targets.iter().flat_map(move |target| {
                target.dest.iter().map(move |dest| Placement {
                    repo,
                    target,
                    destination: resolve_destination(repo.path(), dest),
                })
            })
        })
        .collect()
}

/// Sync every target into every repository.
///
/// Each target source is listed once and that listing is placed into every
/// repository.
///
/// # Errors
///
/// - Return [`SkillsError::Sync`] for an invalid mode and policy pair, or a
///   target source that cannot be listed.
/// - Return [`SkillsError::Guard`] if a target source is rejected.
#[instrument(skip(repos, targets, guard), level = "debug")]
pub fn propagate(
    repos: &[Repository],
    targets: &[&SyncTarget],
    mode: SyncMode,
    policy: ConflictPolicy,
    dry_run: bool,
    guard: &Guard,
) -> Result<Vec<Record<SyncReport>>> {
    validate_mode(mode, policy)?;
    let mut listings = Vec::with_capacity(targets.len());
    for target in targets {
        guard.check_path(&target.src)?;
        listings.push(SourceListing::new(&target.src, &target.include, &target.exclude)?);
    }

    let options = SyncOptions {
        mode,
        conflict_policy: policy,
        dry_run,
        ..Default::default()
    };

    let mut records = Vec::new();
    for repo in repos {
        for (target, listing) in targets.iter().zip(&listings) {
            for placement in placements(std::slice::from_ref(repo), &[*target]) {
                let outcome = listing.sync_into(&placement.destination, &options, guard);
                if let Err(err) = &outcome {
                    warn!("{} {}: {err}", repo.name(), target.name);
                }

                records.push(Record::new(&placement, outcome));
            }
        }
    }

    Ok(records)
}

/// Diff every target against every repository.
#[instrument(skip(repos, targets), level = "debug")]
pub fn survey(repos: &[Repository], targets: &[&SyncTarget]) -> Vec<Record<DiffResult>> {
    placements(repos, targets)
        .iter()
        .map(|placement| {
            let outcome = diff(
                &placement.target.src,
                &placement.destination,
                &placement.target.include,
                &placement.target.exclude,
            );
            Record::new(placement, outcome)
        })
        .collect()
}

/// Remove files no longer part of their target source from every placement.
///
/// # Errors
///
/// - Return [`SkillsError::Sync`] if a target source cannot be listed.
#[instrument(skip(repos, targets, guard), level = "debug")]
pub fn prune(
    repos: &[Repository],
    targets: &[&SyncTarget],
    dry_run: bool,
    guard: &Guard,
) -> Result<Vec<Record<Vec<String>>>> {
    let mut keep_sets = Vec::with_capacity(targets.len());
    for target in targets {
        let files = list_files(&target.src, &target.include, &target.exclude)?;
        keep_sets.push((target.name.as_str(), files.into_iter().collect::<HashSet<_>>()));
    }

    let records = placements(repos, targets)
        .iter()
        .map(|placement| {
            let keep = keep_sets
                .iter()
                .find(|(name, _)| *name == placement.target.name)
                .map(|(_, keep)| keep);
            let outcome = match keep {
                Some(keep) => guard
                    .check_path(&placement.destination)
                    .map_err(SyncError::from)
                    .and_then(|_| clean(&placement.destination, keep, dry_run, guard)),
                None => Ok(Vec::new()),
            };

            Record::new(placement, outcome)
        })
        .collect();

    Ok(records)
}

/// What [`clone_or_update`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CloneOutcome {
    Cloned,
    Updated,
}

/// Clone skills remote into skills root, or update an existing clone.
///
/// An existing repository at the root gets `git pull` through the runner. An
/// existing directory that is not a repository is only replaced when forced.
/// A fresh clone is checked against the guard as `git clone <remote> <root>`.
///
/// # Errors
///
/// - Return [`SkillsError::NoRemote`] if remote is blank.
/// - Return [`SkillsError::RootExists`] if root is occupied and not forced.
/// - Return [`SkillsError::Run`] if the update fails.
/// - Return [`SkillsError::Guard`] if the clone or removal is rejected.
/// - Return [`SkillsError::Git`] if the clone fails.
#[instrument(skip(remote, root, runner, guard, bar), level = "debug")]
pub async fn clone_or_update<R: CommandRunner>(
    remote: &str,
    root: &Path,
    force: bool,
    runner: &R,
    guard: &Guard,
    bar: ProgressBar,
) -> Result<CloneOutcome> {
    let remote = remote.trim();
    if remote.is_empty() {
        return Err(SkillsError::NoRemote);
    }

    let exists = root.try_exists().map_err(|err| SkillsError::Inspect {
        source: err,
        path: root.to_path_buf(),
    })?;
    if exists {
        if is_repository(root) {
            info!("update skills at {:?}", root.display());
            runner
                .run(root, &Invocation::program("git", ["pull"]))
                .await?;
            return Ok(CloneOutcome::Updated);
        }

        if !force {
            return Err(SkillsError::RootExists {
                path: root.to_path_buf(),
            });
        }

        guard.check_path(root)?;
        warn!("remove {:?} to make room for clone", root.display());
        fs::remove_dir_all(root).map_err(|err| SkillsError::Remove {
            source: err,
            path: root.to_path_buf(),
        })?;
    }

    guard.check_command(format!("git clone {remote} {}", root.display()))?;
    let (remote, path) = (remote.to_owned(), root.to_path_buf());
    tokio::task::spawn_blocking(move || clone_repository(remote, path, bar)).await??;

    Ok(CloneOutcome::Cloned)
}

/// Fetch the skills repository and check out `reference` in it.
///
/// A dirty skills root is refused unless `force` is set, so local edits are
/// never carried across a checkout by accident.
///
/// # Errors
///
/// - Return [`SkillsError::NoReference`] if `reference` is blank.
/// - Return [`SkillsError::Git`] if the work tree cannot be inspected.
/// - Return [`SkillsError::Dirty`] if the root has changes and `force` is
///   not set.
/// - Return [`SkillsError::Run`] if fetch or checkout fails or is rejected.
#[instrument(skip(root, probe, runner), level = "debug")]
pub async fn pin<P, R>(
    root: &Path,
    reference: &str,
    force: bool,
    probe: &P,
    runner: &R,
) -> Result<()>
where
    P: WorkTreeProbe + Clone + 'static,
    R: CommandRunner,
{
    let reference = reference.trim();
    if reference.is_empty() {
        return Err(SkillsError::NoReference);
    }

    let (probe, path) = (probe.clone(), root.to_path_buf());
    let clean = tokio::task::spawn_blocking(move || probe.is_clean(&path)).await??;
    if !clean && !force {
        return Err(SkillsError::Dirty {
            path: root.to_path_buf(),
        });
    }

    info!("pin skills at {:?} to {reference:?}", root.display());
    runner
        .run(root, &Invocation::program("git", ["fetch"]))
        .await?;
    runner
        .run(root, &Invocation::program("git", ["checkout", reference]))
        .await?;

    Ok(())
}

/// Skills operation error types.
#[derive(Debug, thiserror::Error)]
pub enum SkillsError {
    /// Sync engine fails before any placement is attempted.
    #[error(transparent)]
    Sync(#[from] SyncError),

    /// Guard rejects a source, command, or path.
    #[error(transparent)]
    Guard(#[from] GuardError),

    /// External command fails.
    #[error(transparent)]
    Run(#[from] RunError),

    /// Clone fails.
    #[error(transparent)]
    Git(#[from] GitError),

    /// Blocking clone task cannot be joined.
    #[error(transparent)]
    Join(#[from] tokio::task::JoinError),

    /// No remote given and none configured.
    #[error("no skills remote configured, set skills_remote or pass --remote")]
    NoRemote,

    /// Pin requested without a revision.
    #[error("no revision given to pin")]
    NoReference,

    /// Skills root has local changes.
    #[error("skills root {:?} has local changes, use --force", path.display())]
    Dirty { path: PathBuf },

    /// Skills root exists and is not a repository.
    #[error("skills root {:?} exists and is not a repository, use --force", path.display())]
    RootExists { path: PathBuf },

    /// Path cannot be inspected.
    #[error("failed to inspect {:?}", path.display())]
    Inspect {
        #[source]
        source: io::Error,
        path: PathBuf,
    },

    /// Skills root cannot be removed.
    #[error("failed to remove {:?}", path.display())]
    Remove {
        #[source]
        source: io::Error,
        path: PathBuf,
    },

    /// Some placements failed.
    #[error("{failed} of {total} placements failed")]
    Incomplete { failed: usize, total: usize },
}

/// Friendly result alias :3
pub type Result<T, E = SkillsError> = std::result::Result<T, E>;

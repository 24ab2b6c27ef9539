// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Directory synchronization engine.
//!
//! Propagate the eligible files of a source directory into one or more
//! destination directories. Three propagation modes exist:
//!
//! - __copy__: copy file content and permission bits, leave anything else in
//!   the destination alone.
//! - __mirror__: copy like above, then remove destination files that are not
//!   part of the source listing.
//! - __link__: place symbolic links pointing back at the source files.
//!
//! # Conflicts
//!
//! A destination path that already exists is a __conflict__. Existence is
//! checked without following links, so dangling links and special files
//! count too. Under [`ConflictPolicy::Fail`] every file of a destination is
//! checked before anything is written there, so a conflict leaves that
//! destination untouched. Under [`ConflictPolicy::Overwrite`] the existing
//! path is removed before the new file is placed.
//!
//! Mirror mode deletes files, thus it demands the overwrite policy. The pair
//! is rejected before any destination is touched.
//!
//! # Partial Failure
//!
//! Destinations are processed in order. A failure aborts the current call,
//! and earlier writes, including whole destinations already synced, are not
//! rolled back.

pub mod diff;
pub mod walk;

pub use diff::{diff, file_hash, DiffResult};
pub use walk::{list_files, DEFAULT_INCLUDE};

use crate::guard::{Guard, GuardError};
use walk::join_slash_path;

use serde::{Deserialize, Serialize};
use std::{
    collections::HashSet,
    fmt::{Display, Formatter, Result as FmtResult},
    fs, io,
    path::{Path, PathBuf},
    str::FromStr,
};
use tracing::{debug, info, instrument};

/// How files get propagated into a destination.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    #[default]
    Copy,
    Mirror,
    Link,
}

impl FromStr for SyncMode {
    type Err = SyncError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        match data.trim() {
            "copy" => Ok(Self::Copy),
            "mirror" => Ok(Self::Mirror),
            "link" => Ok(Self::Link),
            other => Err(SyncError::UnknownMode {
                mode: other.to_owned(),
            }),
        }
    }
}

impl Display for SyncMode {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(match self {
            Self::Copy => "copy",
            Self::Mirror => "mirror",
            Self::Link => "link",
        })
    }
}

/// What to do when a destination path already exists.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictPolicy {
    #[default]
    Fail,
    Overwrite,
}

impl FromStr for ConflictPolicy {
    type Err = SyncError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        match data.trim() {
            "fail" => Ok(Self::Fail),
            "overwrite" => Ok(Self::Overwrite),
            other => Err(SyncError::UnknownPolicy {
                policy: other.to_owned(),
            }),
        }
    }
}

impl Display for ConflictPolicy {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(match self {
            Self::Fail => "fail",
            Self::Overwrite => "overwrite",
        })
    }
}

/// Options for a single sync invocation.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct SyncOptions {
    pub mode: SyncMode,
    pub conflict_policy: ConflictPolicy,

    /// Validate and report without mutating anything.
    pub dry_run: bool,

    /// Include rules, empty means [`DEFAULT_INCLUDE`].
    pub include: Vec<String>,

    /// Exclude rules.
    pub exclude: Vec<String>,
}

impl SyncOptions {
    /// Check that mode and conflict policy can be combined.
    ///
    /// # Errors
    ///
    /// - Return [`SyncError::MirrorRequiresOverwrite`] for mirror mode under
    ///   the fail policy.
    pub fn validate(&self) -> Result<()> {
        validate_mode(self.mode, self.conflict_policy)
    }
}

/// Check that mode and conflict policy can be combined.
///
/// # Errors
///
/// - Return [`SyncError::MirrorRequiresOverwrite`] for mirror mode under the
///   fail policy.
pub fn validate_mode(mode: SyncMode, policy: ConflictPolicy) -> Result<()> {
    if mode == SyncMode::Mirror && policy != ConflictPolicy::Overwrite {
        return Err(SyncError::MirrorRequiresOverwrite);
    }

    Ok(())
}

/// Outcome of syncing one destination.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Destination root that was synced.
    pub destination: PathBuf,

    /// Relative paths written, or that would be under dry run.
    pub written: Vec<String>,

    /// Relative paths removed, or that would be under dry run.
    pub removed: Vec<String>,
}

/// Propagate source root into every destination root.
///
/// Source root is listed once with the include and exclude rules of the
/// options, and the same listing is placed into each destination. Returns one
/// report per destination in the order given.
///
/// See the [module documentation](self) for conflict handling and failure
/// behavior.
///
/// # Errors
///
/// - Return [`SyncError::MirrorRequiresOverwrite`] for an invalid mode and
///   policy pair, before anything is touched.
/// - Return [`SyncError::Guard`] if a destination path is rejected.
/// - Return [`SyncError::Conflict`] if a destination path exists under the
///   fail policy.
/// - Return any other [`SyncError`] on file system failure.
#[instrument(skip(src_root, dest_roots, options, guard), level = "debug")]
pub fn sync(
    src_root: impl AsRef<Path>,
    dest_roots: &[impl AsRef<Path>],
    options: &SyncOptions,
    guard: &Guard,
) -> Result<Vec<SyncReport>> {
    options.validate()?;
    let listing = SourceListing::new(src_root, &options.include, &options.exclude)?;

    let mut reports = Vec::with_capacity(dest_roots.len());
    for dest_root in dest_roots {
        reports.push(listing.sync_into(dest_root, options, guard)?);
    }

    Ok(reports)
}

/// Eligible files of a source root, listed once and placed many times.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceListing {
    root: PathBuf,
    files: Vec<String>,
}

impl SourceListing {
    /// List eligible files of `src_root` under include and exclude rules.
    ///
    /// # Errors
    ///
    /// - Return [`SyncError::Inspect`] if the root cannot be made absolute.
    /// - Return any [`SyncError`] from [`list_files`].
    pub fn new(
        src_root: impl AsRef<Path>,
        include: &[impl AsRef<str>],
        exclude: &[impl AsRef<str>],
    ) -> Result<Self> {
        // INVARIANT: Links must point at an absolute source no matter where they live.
        let root = std::path::absolute(src_root.as_ref()).map_err(|err| SyncError::Inspect {
            source: err,
            path: src_root.as_ref().to_path_buf(),
        })?;
        let files = list_files(&root, include, exclude)?;
        debug!("{} eligible files under {:?}", files.len(), root.display());

        Ok(Self { root, files })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn files(&self) -> &[String] {
        &self.files
    }

    /// Place this listing into one destination root.
    ///
    /// Include and exclude rules of `options` are ignored, the listing
    /// already applied its own.
    ///
    /// # Errors
    ///
    /// - Return [`SyncError::MirrorRequiresOverwrite`] for an invalid mode
    ///   and policy pair.
    /// - Return [`SyncError::Guard`] if a destination path is rejected.
    /// - Return [`SyncError::Conflict`] if a destination path exists under
    ///   the fail policy.
    pub fn sync_into(
        &self,
        dest_root: impl AsRef<Path>,
        options: &SyncOptions,
        guard: &Guard,
    ) -> Result<SyncReport> {
        options.validate()?;
        sync_destination(&self.root, dest_root.as_ref(), &self.files, options, guard)
    }
}

fn sync_destination(
    src_root: &Path,
    dest_root: &Path,
    files: &[String],
    options: &SyncOptions,
    guard: &Guard,
) -> Result<SyncReport> {
    info!("sync {:?} into {:?}", src_root.display(), dest_root.display());
    guard.check_path(dest_root)?;

    // INVARIANT: Validate every placement before the first write.
    let mut placements = Vec::with_capacity(files.len());
    for rel in files {
        let dst = join_slash_path(dest_root, rel);
        guard.check_path(&dst)?;

        let exists = fs::symlink_metadata(&dst).is_ok();
        if exists && options.conflict_policy == ConflictPolicy::Fail {
            return Err(SyncError::Conflict { path: dst });
        }

        placements.push((rel, join_slash_path(src_root, rel), dst, exists));
    }

    let mut report = SyncReport {
        destination: dest_root.to_path_buf(),
        ..Default::default()
    };
    for (rel, src, dst, exists) in placements {
        if !options.dry_run {
            if exists {
                remove_path(&dst)?;
            }
            place_file(options.mode, &src, &dst)?;
        }

        debug!("placed {rel:?}");
        report.written.push(rel.clone());
    }

    if options.mode == SyncMode::Mirror {
        let keep: HashSet<String> = files.iter().cloned().collect();
        report.removed = clean(dest_root, &keep, options.dry_run, guard)?;
    }

    Ok(report)
}

fn place_file(mode: SyncMode, src: &Path, dst: &Path) -> Result<()> {
    if let Some(parent) = dst.parent() {
        mkdirp::mkdirp(parent).map_err(|err| SyncError::CreateDir {
            source: err,
            path: parent.to_path_buf(),
        })?;
    }

    match mode {
        SyncMode::Copy | SyncMode::Mirror => {
            // INVARIANT: Permission bits are carried over by the copy itself.
            fs::copy(src, dst).map_err(|err| SyncError::Copy {
                source: err,
                from: src.to_path_buf(),
                to: dst.to_path_buf(),
            })?;
        }
        SyncMode::Link => symlink(src, dst).map_err(|err| SyncError::Link {
            source: err,
            from: src.to_path_buf(),
            to: dst.to_path_buf(),
        })?,
    }

    Ok(())
}

#[cfg(unix)]
fn symlink(src: &Path, dst: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(src, dst)
}

#[cfg(windows)]
fn symlink(src: &Path, dst: &Path) -> io::Result<()> {
    std::os::windows::fs::symlink_file(src, dst)
}

fn remove_path(path: &Path) -> Result<()> {
    let metadata = fs::symlink_metadata(path).map_err(|err| SyncError::Inspect {
        source: err,
        path: path.to_path_buf(),
    })?;

    let result = if metadata.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };

    result.map_err(|err| SyncError::Remove {
        source: err,
        path: path.to_path_buf(),
    })
}

/// Remove every file under destination root not listed in keep.
///
/// Keep holds forward-slash paths relative to the destination root.
/// Directories are never removed, even when left empty. A missing destination
/// root has nothing to clean. Returns the relative paths removed, or that
/// would be under dry run.
///
/// # Errors
///
/// - Return [`SyncError::Guard`] if a path to remove is rejected.
/// - Return [`SyncError::Walk`] if destination root cannot be listed.
/// - Return [`SyncError::Remove`] if a file cannot be removed.
#[instrument(skip(dest_root, keep, guard), level = "debug")]
pub fn clean(
    dest_root: impl AsRef<Path>,
    keep: &HashSet<String>,
    dry_run: bool,
    guard: &Guard,
) -> Result<Vec<String>> {
    let dest_root = dest_root.as_ref();
    let exists = dest_root.try_exists().map_err(|err| SyncError::Inspect {
        source: err,
        path: dest_root.to_path_buf(),
    })?;
    if !exists {
        debug!("nothing to clean at {:?}", dest_root.display());
        return Ok(Vec::new());
    }

    let mut removed = Vec::new();
    for rel in list_files(dest_root, &[] as &[&str], &[] as &[&str])? {
        if keep.contains(&rel) {
            continue;
        }

        let path = join_slash_path(dest_root, &rel);
        guard.check_path(&path)?;
        if !dry_run {
            fs::remove_file(&path).map_err(|err| SyncError::Remove {
                source: err,
                path: path.clone(),
            })?;
        }

        info!("removed {:?}", path.display());
        removed.push(rel);
    }

    Ok(removed)
}

/// Resolve destination entry against a repository root.
///
/// A blank entry means the repository root itself, an absolute entry is used
/// verbatim, and a relative entry is joined onto the repository root.
pub fn resolve_destination(repo_root: impl AsRef<Path>, dest: impl AsRef<Path>) -> PathBuf {
    let repo_root = repo_root.as_ref();
    let dest = dest.as_ref();
    let trimmed = dest.to_string_lossy();
    let trimmed = trimmed.trim();

    if trimmed.is_empty() {
        return repo_root.to_path_buf();
    }

    let dest = Path::new(trimmed);
    if dest.is_absolute() {
        return dest.to_path_buf();
    }

    repo_root.join(dest)
}

/// Sync and diff error types.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Sync mode is not recognized.
    #[error("unknown sync mode {mode:?}, expected copy, mirror, or link")]
    UnknownMode { mode: String },

    /// Conflict policy is not recognized.
    #[error("unknown conflict policy {policy:?}, expected fail or overwrite")]
    UnknownPolicy { policy: String },

    /// Mirror mode paired with the fail policy.
    #[error("mirror mode requires overwrite conflict policy")]
    MirrorRequiresOverwrite,

    /// Destination path rejected by guard.
    #[error(transparent)]
    Guard(#[from] GuardError),

    /// Destination path already exists under the fail policy.
    #[error("conflict detected: {:?}", path.display())]
    Conflict { path: PathBuf },

    /// Directory tree cannot be listed.
    #[error("failed to walk {:?}", root.display())]
    Walk {
        #[source]
        source: ignore::Error,
        root: PathBuf,
    },

    /// Path cannot be inspected.
    #[error("failed to inspect {:?}", path.display())]
    Inspect {
        #[source]
        source: io::Error,
        path: PathBuf,
    },

    /// File content cannot be hashed.
    #[error("failed to hash {:?}", path.display())]
    Hash {
        #[source]
        source: io::Error,
        path: PathBuf,
    },

    /// Parent directory of a destination file cannot be created.
    #[error("failed to create directory {:?}", path.display())]
    CreateDir {
        #[source]
        source: io::Error,
        path: PathBuf,
    },

    /// File cannot be copied.
    #[error("failed to copy {:?} to {:?}", from.display(), to.display())]
    Copy {
        #[source]
        source: io::Error,
        from: PathBuf,
        to: PathBuf,
    },

    /// Symbolic link cannot be created.
    #[error("failed to link {:?} to {:?}", to.display(), from.display())]
    Link {
        #[source]
        source: io::Error,
        from: PathBuf,
        to: PathBuf,
    },

    /// Path cannot be removed.
    #[error("failed to remove {:?}", path.display())]
    Remove {
        #[source]
        source: io::Error,
        path: PathBuf,
    },
}

/// Friendly result alias :3
pub type Result<T, E = SyncError> = std::result::Result<T, E>;

// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Repository discovery and fuzzy resolution.
//!
//! gkn operates on a fleet of local repositories living somewhere under a
//! single __repository root__. Any directory under that root containing a
//! `.git` directory counts as a repository. Discovery stops descending once
//! a repository is found, so repositories nested inside other repositories
//! are never picked up.
//!
//! # Fuzzy Resolution
//!
//! Users refer to repositories by a search term rather than a full path.
//! A term with no wildcards is a plain, case-sensitive substring search on
//! repository names. A term containing `*` or `?` opts into glob matching
//! with the [path dialect](crate::glob::Dialect::Path) instead.
//!
//! A search may resolve to nothing, to exactly one repository, or to many.
//! The last case is not a failure. It is reported as
//! [`RepoError::MultipleMatches`] so the caller can list the candidates
//! and ask for a 1-based pick.

use crate::{
    git::{clone_repository, last_commit, CommitSummary, GitError},
    glob::{any_match, matches, Dialect},
    guard::{Guard, GuardError},
};

use ignore::WalkBuilder;
use indicatif::ProgressBar;
use serde::Serialize;
use std::{
    fs, io,
    path::{Path, PathBuf},
};
use tracing::{debug, info, instrument, warn};

/// Name of directory that marks a repository.
pub const VCS_MARKER: &str = ".git";

/// Local repository.
///
/// Identity is the path. The name is the last path segment, used for display
/// and fuzzy matching.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Repository {
    name: String,
    path: PathBuf,
}

impl Repository {
    /// Construct new repository entry, deriving name from path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());

        Self { name, path }
    }

    /// Name of repository.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Path to repository work tree.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Check if directory holds a repository marker.
pub fn is_repository(path: impl AsRef<Path>) -> bool {
    path.as_ref().join(VCS_MARKER).is_dir()
}

/// Discover repositories under root directory.
///
/// Symbolic links are not followed and ignore files are not honored. The
/// result is sorted by name, then by path.
///
/// # Errors
///
/// - Return [`RepoError::ReadRoot`] if root is missing or not a directory.
/// - Return [`RepoError::Walk`] if any directory under root cannot be read.
#[instrument(skip(root), level = "debug")]
pub fn scan(root: impl AsRef<Path>) -> Result<Vec<Repository>> {
    let root = root.as_ref();
    let metadata = fs::metadata(root).map_err(|err| RepoError::ReadRoot {
        source: err,
        root: root.to_path_buf(),
    })?;
    if !metadata.is_dir() {
        return Err(RepoError::ReadRoot {
            source: io::Error::other("not a directory"),
            root: root.to_path_buf(),
        });
    }

    // INVARIANT: Never descend into a repository once found.
    let walker = WalkBuilder::new(root)
        .standard_filters(false)
        .follow_links(false)
        .filter_entry(|entry| {
            entry.depth() == 0
                || !entry.path().parent().is_some_and(|parent| is_repository(parent))
        })
        .build();

    let mut repos = Vec::new();
    for entry in walker {
        let entry = entry.map_err(|err| RepoError::Walk {
            source: err,
            root: root.to_path_buf(),
        })?;

        let is_dir = entry.file_type().is_some_and(|kind| kind.is_dir());
        if is_dir && is_repository(entry.path()) {
            debug!("found repository at {:?}", entry.path().display());
            repos.push(Repository::new(entry.path()));
        }
    }

    repos.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.path.cmp(&b.path)));
    Ok(repos)
}

/// Filter repositories by name.
///
/// Keeps a repository if `only` is empty or its name matches an `only`
/// pattern, and its name matches no `exclude` pattern.
pub fn filter(
    repos: &[Repository],
    only: &[impl AsRef<str>],
    exclude: &[impl AsRef<str>],
) -> Vec<Repository> {
    repos
        .iter()
        .filter(|repo| only.is_empty() || any_match(Dialect::Path, only, repo.name()))
        .filter(|repo| !any_match(Dialect::Path, exclude, repo.name()))
        .cloned()
        .collect()
}

/// Search repositories by name.
///
/// A blank pattern matches nothing. Patterns with `*` or `?` are globs,
/// anything else is a substring search.
pub fn find(repos: &[Repository], pattern: impl AsRef<str>) -> MatchResult {
    let pattern = pattern.as_ref().trim();
    if pattern.is_empty() {
        return MatchResult::new(pattern, Vec::new());
    }

    let is_glob = pattern.contains(['*', '?']);
    let matched = repos
        .iter()
        .filter(|repo| {
            if is_glob {
                matches(Dialect::Path, pattern, repo.name())
            } else {
                repo.name().contains(pattern)
            }
        })
        .cloned()
        .collect();

    MatchResult::new(pattern, matched)
}

/// Repositories that matched a search pattern.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct MatchResult {
    pattern: String,
    matches: Vec<Repository>,
}

impl MatchResult {
    /// Construct new match result.
    pub fn new(pattern: impl Into<String>, matches: Vec<Repository>) -> Self {
        Self {
            pattern: pattern.into(),
            matches,
        }
    }

    /// Pattern that produced this result.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Matched repositories in scan order.
    pub fn matches(&self) -> &[Repository] {
        &self.matches
    }

    pub fn len(&self) -> usize {
        self.matches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }

    /// Select one repository out of the result.
    ///
    /// A single match is returned as is, ignoring `index`. With many matches,
    /// `index` is a 1-based position into the result.
    ///
    /// # Errors
    ///
    /// - Return [`RepoError::NoMatch`] if nothing matched.
    /// - Return [`RepoError::MultipleMatches`] if many matched and `index`
    ///   is missing or out of range.
    pub fn pick(&self, index: Option<usize>) -> Result<&Repository> {
        match self.matches.as_slice() {
            [] => Err(RepoError::NoMatch {
                pattern: self.pattern.clone(),
            }),
            [single] => Ok(single),
            many => index
                .filter(|index| (1..=many.len()).contains(index))
                .map(|index| &many[index - 1])
                .ok_or_else(|| RepoError::MultipleMatches {
                    pattern: self.pattern.clone(),
                    count: many.len(),
                }),
        }
    }

    /// Render disambiguation listing with 1-based indices.
    pub fn candidates(&self) -> Vec<String> {
        self.matches
            .iter()
            .enumerate()
            .map(|(index, repo)| format!("{}: {}", index + 1, repo.name()))
            .collect()
    }
}

/// Repository paired with its latest commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Recent {
    #[serde(flatten)]
    pub repo: Repository,
    pub last_commit: Option<CommitSummary>,
}

/// Order repositories by latest commit, newest first, keeping at most
/// `limit` of them. A `limit` of zero keeps everything.
///
/// Repositories without commits, or whose history cannot be read, sort last
/// in their original order.
#[instrument(skip(repos), level = "debug")]
pub fn recent(repos: &[Repository], limit: usize) -> Vec<Recent> {
    let mut recents = repos
        .iter()
        .map(|repo| {
            let last_commit = last_commit(repo.path()).unwrap_or_else(|err| {
                warn!("{}: {err}", repo.name());
                None
            });
            Recent {
                repo: repo.clone(),
                last_commit,
            }
        })
        .collect::<Vec<_>>();

    // INVARIANT: Stable sort, `None` orders below any commit time.
    recents.sort_by(|lhs, rhs| {
        let time = |recent: &Recent| recent.last_commit.as_ref().map(|commit| commit.time);
        time(rhs).cmp(&time(lhs))
    });
    if limit > 0 {
        recents.truncate(limit);
    }

    recents
}

/// Derive repository name from a clone URL.
///
/// The name is the last segment of the URL with any `.git` suffix removed,
/// treating both `/` and `:` as separators, e.g.,
/// `git@example.com:team/alpha.git` gives `alpha`.
pub fn name_from_url(url: impl AsRef<str>) -> Option<String> {
    let url = url.as_ref().trim().trim_end_matches(['/', '\\']);
    let last = url.rsplit(['/', '\\', ':']).next()?;
    let name = last.strip_suffix(".git").unwrap_or(last);

    is_valid_name(name).then(|| name.to_owned())
}

fn is_valid_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains(['/', '\\'])
}

/// Clone remote repository into the repository root.
///
/// The clone lands in `repos_root/<name>`, where the name is either given or
/// derived from the URL through [`name_from_url`].
///
/// # Errors
///
/// - Return [`RepoError::InvalidName`] if no usable name is given or
///   derivable.
/// - Return [`RepoError::DestinationExists`] if the destination exists.
/// - Return [`RepoError::Guard`] if the clone is rejected.
/// - Return [`RepoError::Git`] if the clone fails.
#[instrument(skip(url, repos_root, guard, bar), level = "debug")]
pub async fn clone(
    url: &str,
    repos_root: &Path,
    name: Option<&str>,
    guard: &Guard,
    bar: ProgressBar,
) -> Result<Repository> {
    let url = url.trim();
    let name = match name {
        Some(name) if is_valid_name(name.trim()) => name.trim().to_owned(),
        Some(name) => {
            return Err(RepoError::InvalidName {
                name: name.to_owned(),
            })
        }
        None => name_from_url(url).ok_or_else(|| RepoError::InvalidName {
            name: url.to_owned(),
        })?,
    };

    let destination = repos_root.join(&name);
    if fs::symlink_metadata(&destination).is_ok() {
        return Err(RepoError::DestinationExists { path: destination });
    }

    guard.check_path(&destination)?;
    guard.check_command(format!("git clone {url} {}", destination.display()))?;
    info!("clone {url:?} as {name:?}");

    let (remote, path) = (url.to_owned(), destination.clone());
    tokio::task::spawn_blocking(move || clone_repository(remote, path, bar)).await??;

    Ok(Repository::new(destination))
}

/// Repository discovery and resolution error types.
#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    /// Repository root cannot be read.
    #[error("failed to read repository root {:?}", root.display())]
    ReadRoot {
        #[source]
        source: io::Error,
        root: PathBuf,
    },

    /// Directory under repository root cannot be walked.
    #[error("failed to walk repository root {:?}", root.display())]
    Walk {
        #[source]
        source: ignore::Error,
        root: PathBuf,
    },

    /// Search pattern matched no repository.
    #[error("no repository matches {pattern:?}")]
    NoMatch { pattern: String },

    /// Search pattern matched many repositories without a valid pick.
    #[error("{count} repositories match {pattern:?}, pick one")]
    MultipleMatches { pattern: String, count: usize },

    /// Repository name is empty or is not a single path segment.
    #[error("invalid repository name {name:?}")]
    InvalidName { name: String },

    /// Clone destination is already occupied.
    #[error("destination {:?} already exists", path.display())]
    DestinationExists { path: PathBuf },

    #[error(transparent)]
    Guard(#[from] GuardError),

    #[error(transparent)]
    Git(#[from] GitError),

    /// Blocking clone task panicked or was cancelled.
    #[error(transparent)]
    Join(#[from] tokio::task::JoinError),
}

/// Friendly result alias :3
pub type Result<T, E = RepoError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use simple_test_case::test_case;

    fn repos(names: &[&str]) -> Vec<Repository> {
        names
            .iter()
            .map(|name| Repository::new(format!("/repos/{name}")))
            .collect()
    }

    fn names(repos: &[Repository]) -> Vec<&str> {
        repos.iter().map(Repository::name).collect()
    }

    #[test]
    fn repository_name_is_last_segment() {
        let repo = Repository::new("/home/user/repos/alpha");
        assert_eq!(repo.name(), "alpha");
        assert_eq!(repo.path(), Path::new("/home/user/repos/alpha"));
    }

    #[test]
    fn find_substring() {
        let result = find(&repos(&["alpha", "beta"]), "al");
        assert_eq!(names(result.matches()), vec!["alpha"]);
    }

    #[test]
    fn find_substring_is_case_sensitive() {
        let result = find(&repos(&["alpha", "beta"]), "AL");
        assert!(result.is_empty());
    }

    #[test]
    fn find_glob() {
        let result = find(&repos(&["alpha", "beta", "gamma"]), "*a");
        assert_eq!(names(result.matches()), vec!["alpha", "beta", "gamma"]);

        let result = find(&repos(&["alpha", "beta", "gamma"]), "?amma");
        assert_eq!(names(result.matches()), vec!["gamma"]);

        let result = find(&repos(&["alpha", "bet", "gamma"]), "*a");
        assert_eq!(names(result.matches()), vec!["alpha", "gamma"]);
    }

    #[test]
    fn find_blank_pattern_matches_nothing() {
        assert!(find(&repos(&["alpha"]), "   ").is_empty());
    }

    #[test]
    fn filter_only_and_exclude() {
        let all = repos(&["api", "api-docs", "web", "worker"]);
        assert_eq!(names(&filter(&all, &["api*"], &["*-docs"])), vec!["api"]);
        assert_eq!(
            names(&filter(&all, &[] as &[&str], &["w*"])),
            vec!["api", "api-docs"]
        );
        assert_eq!(names(&filter(&all, &[] as &[&str], &[] as &[&str])).len(), 4);
    }

    #[test]
    fn pick_outcomes() {
        let result = find(&repos(&["alpha", "alps", "beta"]), "al");

        assert!(matches!(
            result.pick(None),
            Err(RepoError::MultipleMatches { count: 2, .. })
        ));
        assert!(matches!(
            result.pick(Some(3)),
            Err(RepoError::MultipleMatches { .. })
        ));
        assert!(matches!(
            result.pick(Some(0)),
            Err(RepoError::MultipleMatches { .. })
        ));
        assert_eq!(result.pick(Some(2)).map(Repository::name).ok(), Some("alps"));

        let result = find(&repos(&["alpha", "beta"]), "bet");
        assert_eq!(result.pick(Some(9)).map(Repository::name).ok(), Some("beta"));

        let result = find(&repos(&["alpha"]), "zeta");
        assert!(matches!(result.pick(None), Err(RepoError::NoMatch { .. })));
    }

    #[test]
    fn candidates_are_one_based() {
        let result = find(&repos(&["alpha", "alps"]), "al");
        assert_eq!(result.candidates(), vec!["1: alpha", "2: alps"]);
    }

    #[test]
    fn scan_stops_at_repositories() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        for dir in [
            "zeta/.git",
            "group/alpha/.git",
            "group/alpha/vendor/nested/.git",
            "plain/src",
        ] {
            fs::create_dir_all(root.path().join(dir))?;
        }

        let result = scan(root.path())?;
        assert_eq!(names(&result), vec!["alpha", "zeta"]);
        assert_eq!(result[0].path(), root.path().join("group/alpha"));

        Ok(())
    }

    #[test]
    fn scan_missing_root_fails() {
        let result = scan("/definitely/not/a/real/root");
        assert!(matches!(result, Err(RepoError::ReadRoot { .. })));
    }

    #[test_case("https://example.com/team/alpha.git", Some("alpha"); "https with suffix")]
    #[test_case("git@example.com:team/beta.git", Some("beta"); "scp style")]
    #[test_case("git@example.com:gamma", Some("gamma"); "scp without group")]
    #[test_case("/srv/git/delta/", Some("delta"); "local path with slash")]
    #[test_case("https://example.com/", Some("example.com"); "host only")]
    #[test_case("", None; "empty")]
    #[test_case("https://example.com/..", None; "parent segment")]
    #[test]
    fn derive_name_from_url(url: &str, expect: Option<&str>) {
        pretty_assertions::assert_eq!(name_from_url(url).as_deref(), expect);
    }

    #[test]
    fn recent_without_history_keeps_order() {
        let result = recent(&repos(&["beta", "alpha", "gamma"]), 2);
        let result = result
            .iter()
            .map(|recent| (recent.repo.name(), recent.last_commit.is_none()))
            .collect::<Vec<_>>();
        assert_eq!(result, vec![("beta", true), ("alpha", true)]);
    }

    #[tokio::test]
    async fn clone_rejects_before_touching_remote() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        fs::create_dir_all(root.path().join("alpha"))?;
        let url = "https://example.invalid/team/alpha.git";

        let result = clone(url, root.path(), None, &Guard::new(), ProgressBar::hidden()).await;
        assert!(matches!(result, Err(RepoError::DestinationExists { .. })));

        let bar = ProgressBar::hidden();
        let result = clone(url, root.path(), Some("../escape"), &Guard::new(), bar).await;
        assert!(matches!(result, Err(RepoError::InvalidName { .. })));

        let guard = Guard {
            deny_commands: vec!["git clone *".into()],
            ..Default::default()
        };
        let result = clone(url, root.path(), Some("beta"), &guard, ProgressBar::hidden()).await;
        assert!(matches!(result, Err(RepoError::Guard(..))));
        assert!(!root.path().join("beta").exists());

        Ok(())
    }
}

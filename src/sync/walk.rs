// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Eligible file listing.
//!
//! Determine which files under a directory take part in a sync or diff,
//! according to include and exclude rules in the
//! [path dialect](crate::glob::Dialect::Path). Rules always see paths
//! relative to the walked root in forward-slash form, no matter the host
//! platform.

use crate::{
    glob::{any_match, Dialect},
    sync::{Result, SyncError},
};

use ignore::WalkBuilder;
use std::path::{Path, PathBuf};

/// Include rule used when none are given.
pub const DEFAULT_INCLUDE: &str = "**/*";

/// List files under root that pass include and exclude rules.
///
/// A directory whose relative path matches an exclude rule, either as is or
/// with a trailing `/`, is pruned without being descended into. A file is
/// listed if it matches an include rule and no exclude rule. An empty include
/// listing means [`DEFAULT_INCLUDE`].
///
/// Symbolic links are listed as files and never followed. Ignore files are
/// not honored. The result is sorted.
///
/// # Errors
///
/// - Return [`SyncError::Walk`] if root or anything under it cannot be read.
pub fn list_files(
    root: impl AsRef<Path>,
    include: &[impl AsRef<str>],
    exclude: &[impl AsRef<str>],
) -> Result<Vec<String>> {
    let root = root.as_ref();
    let include: Vec<String> = if include.is_empty() {
        vec![DEFAULT_INCLUDE.into()]
    } else {
        include.iter().map(|rule| rule.as_ref().to_owned()).collect()
    };
    let exclude: Vec<String> = exclude.iter().map(|rule| rule.as_ref().to_owned()).collect();

    let prune_root = root.to_path_buf();
    let prune_rules = exclude.clone();
    let walker = WalkBuilder::new(root)
        .standard_filters(false)
        .follow_links(false)
        .filter_entry(move |entry| {
            let is_dir = entry.file_type().is_some_and(|kind| kind.is_dir());
            if entry.depth() == 0 || !is_dir {
                return true;
            }

            let rel = relative_slash_path(&prune_root, entry.path());
            !(any_match(Dialect::Path, &prune_rules, &rel)
                || any_match(Dialect::Path, &prune_rules, &format!("{rel}/")))
        })
        .build();

    let mut files = Vec::new();
    for entry in walker {
        let entry = entry.map_err(|err| SyncError::Walk {
            source: err,
            root: root.to_path_buf(),
        })?;

        let is_dir = entry.file_type().is_some_and(|kind| kind.is_dir());
        if entry.depth() == 0 || is_dir {
            continue;
        }

        let rel = relative_slash_path(root, entry.path());
        if any_match(Dialect::Path, &exclude, &rel) || !any_match(Dialect::Path, &include, &rel) {
            continue;
        }

        files.push(rel);
    }

    files.sort();
    Ok(files)
}

/// Express path relative to root in forward-slash form.
pub(crate) fn relative_slash_path(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

/// Turn forward-slash relative path into host form under root.
pub(crate) fn join_slash_path(root: &Path, rel: &str) -> PathBuf {
    rel.split('/')
        .filter(|segment| !segment.is_empty())
        .fold(root.to_path_buf(), |path, segment| path.join(segment))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;

    fn tree(files: &[&str]) -> anyhow::Result<tempfile::TempDir> {
        let root = tempfile::tempdir()?;
        for file in files {
            let path = root.path().join(file);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(path, file)?;
        }

        Ok(root)
    }

    #[test]
    fn default_include_lists_everything() -> anyhow::Result<()> {
        let root = tree(&["b.md", "a/x.md", "a/b/y.txt"])?;
        let result = list_files(root.path(), &[] as &[&str], &[] as &[&str])?;
        assert_eq!(result, vec!["a/b/y.txt", "a/x.md", "b.md"]);

        Ok(())
    }

    #[test]
    fn include_and_exclude_rules() -> anyhow::Result<()> {
        let root = tree(&["top.md", "skill/SKILL.md", "skill/notes.txt", "skill/draft.md"])?;
        let result = list_files(root.path(), &["**/*.md"], &["**/draft.md"])?;
        assert_eq!(result, vec!["skill/SKILL.md", "top.md"]);

        Ok(())
    }

    #[test]
    fn excluded_directories_are_pruned() -> anyhow::Result<()> {
        let root = tree(&[".git/HEAD", ".git/refs/heads/main", "keep.md", "cache/blob", "deep/cache/x"])?;

        let result = list_files(root.path(), &["**/*"], &[".git/**", "cache"])?;
        assert_eq!(result, vec!["deep/cache/x", "keep.md"]);

        let result = list_files(root.path(), &["**/*"], &[".git", "**/cache"])?;
        assert_eq!(result, vec!["keep.md"]);

        Ok(())
    }

    #[test]
    fn missing_root_fails() {
        let result = list_files("/definitely/not/here", &[] as &[&str], &[] as &[&str]);
        assert!(matches!(result, Err(SyncError::Walk { .. })));
    }

    #[test]
    fn slash_path_conversions() {
        let root = Path::new("/root/dir");
        assert_eq!(relative_slash_path(root, &root.join("a").join("b.md")), "a/b.md");
        assert_eq!(join_slash_path(root, "a/b.md"), root.join("a").join("b.md"));
    }
}

// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Content-hash based directory diff.

use crate::sync::{walk::join_slash_path, list_files, Result, SyncError};

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::{collections::HashSet, fs::File, io, path::Path};
use tracing::{debug, instrument};

/// File level difference between source and destination roots.
///
/// Every listing holds sorted forward-slash paths relative to the roots.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct DiffResult {
    /// Files only in source.
    pub added: Vec<String>,

    /// Files only in destination.
    pub removed: Vec<String>,

    /// Files in both whose content differs.
    pub changed: Vec<String>,
}

impl DiffResult {
    /// Check if source and destination agree.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }
}

/// Compare source root to destination root.
///
/// Both roots are listed with the same include and exclude rules. A missing
/// destination root is not an error, it simply means every source file is
/// added.
///
/// # Errors
///
/// - Return [`SyncError::Walk`] if either root cannot be listed.
/// - Return [`SyncError::Inspect`] if destination existence cannot be
///   determined.
/// - Return [`SyncError::Hash`] if a shared file cannot be read.
#[instrument(skip(src_root, dest_root, include, exclude), level = "debug")]
pub fn diff(
    src_root: impl AsRef<Path>,
    dest_root: impl AsRef<Path>,
    include: &[impl AsRef<str>],
    exclude: &[impl AsRef<str>],
) -> Result<DiffResult> {
    let (src_root, dest_root) = (src_root.as_ref(), dest_root.as_ref());
    let src_files = list_files(src_root, include, exclude)?;

    let dest_exists = dest_root.try_exists().map_err(|err| SyncError::Inspect {
        source: err,
        path: dest_root.to_path_buf(),
    })?;
    if !dest_exists {
        debug!("destination {:?} missing, all files added", dest_root.display());
        return Ok(DiffResult {
            added: src_files,
            ..Default::default()
        });
    }

    let dest_files = list_files(dest_root, include, exclude)?;
    let src_set: HashSet<&str> = src_files.iter().map(String::as_str).collect();
    let dest_set: HashSet<&str> = dest_files.iter().map(String::as_str).collect();

    let mut result = DiffResult::default();
    for rel in &src_files {
        if !dest_set.contains(rel.as_str()) {
            result.added.push(rel.clone());
            continue;
        }

        let src_hash = file_hash(join_slash_path(src_root, rel))?;
        let dest_hash = file_hash(join_slash_path(dest_root, rel))?;
        if src_hash != dest_hash {
            result.changed.push(rel.clone());
        }
    }

    result.removed = dest_files
        .iter()
        .filter(|rel| !src_set.contains(rel.as_str()))
        .cloned()
        .collect();

    Ok(result)
}

/// Compute hex encoded SHA-256 digest of file content.
///
/// # Errors
///
/// - Return [`SyncError::Hash`] if file cannot be read.
pub fn file_hash(path: impl AsRef<Path>) -> Result<String> {
    let path = path.as_ref();
    let hash_error = |err| SyncError::Hash {
        source: err,
        path: path.to_path_buf(),
    };

    let mut file = File::open(path).map_err(hash_error)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher).map_err(hash_error)?;

    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;

    fn write(root: &Path, rel: &str, content: &str) -> anyhow::Result<()> {
        let path = root.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content)?;

        Ok(())
    }

    #[test]
    fn identical_roots_have_no_diff() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        write(root.path(), "a.md", "a")?;
        write(root.path(), "dir/b.md", "b")?;

        let result = diff(root.path(), root.path(), &[] as &[&str], &[] as &[&str])?;
        assert!(result.is_empty());

        Ok(())
    }

    #[test]
    fn classify_added_removed_changed() -> anyhow::Result<()> {
        let src = tempfile::tempdir()?;
        let dest = tempfile::tempdir()?;
        write(src.path(), "same.md", "same")?;
        write(dest.path(), "same.md", "same")?;
        write(src.path(), "edit.md", "new")?;
        write(dest.path(), "edit.md", "old")?;
        write(src.path(), "only/src.md", "x")?;
        write(dest.path(), "only/dest.md", "y")?;

        let result = diff(src.path(), dest.path(), &[] as &[&str], &[] as &[&str])?;
        let expect = DiffResult {
            added: vec!["only/src.md".into()],
            removed: vec!["only/dest.md".into()],
            changed: vec!["edit.md".into()],
        };
        assert_eq!(result, expect);

        Ok(())
    }

    #[test]
    fn missing_destination_means_all_added() -> anyhow::Result<()> {
        let src = tempfile::tempdir()?;
        write(src.path(), "a.md", "a")?;
        write(src.path(), "b/c.md", "c")?;

        let result = diff(
            src.path(),
            src.path().join("not-there"),
            &[] as &[&str],
            &[] as &[&str],
        )?;
        assert_eq!(result.added, vec!["a.md", "b/c.md"]);
        assert!(result.removed.is_empty() && result.changed.is_empty());

        Ok(())
    }

    #[test]
    fn same_rules_apply_to_both_roots() -> anyhow::Result<()> {
        let src = tempfile::tempdir()?;
        let dest = tempfile::tempdir()?;
        write(src.path(), "keep.md", "a")?;
        write(dest.path(), "keep.md", "a")?;
        write(dest.path(), "scratch.tmp", "junk")?;

        let result = diff(src.path(), dest.path(), &[] as &[&str], &["*.tmp"])?;
        assert!(result.is_empty());

        Ok(())
    }

    #[test]
    fn file_hash_is_sha256() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        write(root.path(), "hello.txt", "hello world")?;

        let result = file_hash(root.path().join("hello.txt"))?;
        assert_eq!(
            result,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );

        Ok(())
    }
}

// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Safety guard for commands and paths.
//!
//! Every external command gkn runs, and every path the sync engine writes to,
//! is first run by the [`Guard`]. The guard is a pure predicate over allow and
//! deny rule listings, and never touches the file system.
//!
//! # Evaluation Order
//!
//! 1. A value matching any deny rule is rejected. Deny always wins.
//! 2. An __empty__ allow listing accepts everything not denied.
//! 3. A non-empty allow listing accepts only values matching one of its rules.
//!
//! # Default Allow
//!
//! Rule two is easy to misread. An empty allow listing is __not__ a "deny
//! everything" posture, it is the opposite. This keeps gkn usable without any
//! configuration, but users who want least privilege must populate the allow
//! listings themselves.
//!
//! Command rules use the [command dialect](crate::glob::Dialect::Command) on
//! the raw command line. Path rules use the
//! [path dialect](crate::glob::Dialect::Path) on a lexically cleaned,
//! forward-slash form of the path.

use crate::glob::{any_match, Dialect};

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Allow and deny rules for commands and paths.
///
/// See the [module documentation](self) for evaluation order, in particular
/// the default-allow behavior of empty allow listings.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct Guard {
    /// Command rules to accept when non-empty.
    pub allow_commands: Vec<String>,

    /// Command rules to always reject.
    pub deny_commands: Vec<String>,

    /// Path rules to accept when non-empty.
    pub allow_paths: Vec<String>,

    /// Path rules to always reject.
    pub deny_paths: Vec<String>,
}

impl Guard {
    /// Construct new guard that accepts everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Check command line against command rules.
    ///
    /// # Errors
    ///
    /// - Return [`GuardError::DeniedCommand`] if a deny rule matches.
    /// - Return [`GuardError::CommandNotAllowed`] if no allow rule matches a
    ///   non-empty allow listing.
    pub fn check_command(&self, command: impl AsRef<str>) -> Result<()> {
        let command = command.as_ref();
        if any_match(Dialect::Command, &self.deny_commands, command) {
            return Err(GuardError::DeniedCommand {
                command: command.to_owned(),
            });
        }

        if self.allow_commands.is_empty()
            || any_match(Dialect::Command, &self.allow_commands, command)
        {
            return Ok(());
        }

        Err(GuardError::CommandNotAllowed {
            command: command.to_owned(),
        })
    }

    /// Check path against path rules.
    ///
    /// Path is cleaned lexically before matching, see [`clean_path`].
    ///
    /// # Errors
    ///
    /// - Return [`GuardError::DeniedPath`] if a deny rule matches.
    /// - Return [`GuardError::PathNotAllowed`] if no allow rule matches a
    ///   non-empty allow listing.
    pub fn check_path(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = clean_path(path);
        if any_match(Dialect::Path, &self.deny_paths, &path) {
            return Err(GuardError::DeniedPath { path });
        }

        if self.allow_paths.is_empty() || any_match(Dialect::Path, &self.allow_paths, &path) {
            return Ok(());
        }

        Err(GuardError::PathNotAllowed { path })
    }
}

/// Clean path lexically into forward-slash form.
///
/// Collapses repeated separators, drops `.` segments, and resolves `..`
/// against preceding segments without consulting the file system. Leading
/// `..` segments of a relative path are kept, and `..` at the root of an
/// absolute path is dropped. An empty result becomes `.`.
pub fn clean_path(path: impl AsRef<Path>) -> String {
    let raw = path.as_ref().to_string_lossy().replace('\\', "/");
    let rooted = raw.starts_with('/');

    let mut segments: Vec<&str> = Vec::new();
    for segment in raw.split('/') {
        match segment {
            "" | "." => continue,
            ".." => match segments.last() {
                Some(&last) if last != ".." => {
                    segments.pop();
                }
                _ if rooted => continue,
                _ => segments.push(".."),
            },
            _ => segments.push(segment),
        }
    }

    let joined = segments.join("/");
    match (rooted, joined.is_empty()) {
        (true, _) => format!("/{joined}"),
        (false, true) => ".".into(),
        (false, false) => joined,
    }
}

/// Guard rejection types.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GuardError {
    /// Command matched a deny rule.
    #[error("deny command: {command}")]
    DeniedCommand { command: String },

    /// Command matched no rule of a non-empty allow listing.
    #[error("command not allowed: {command}")]
    CommandNotAllowed { command: String },

    /// Path matched a deny rule.
    #[error("deny path: {path}")]
    DeniedPath { path: String },

    /// Path matched no rule of a non-empty allow listing.
    #[error("path not allowed: {path}")]
    PathNotAllowed { path: String },
}

/// Friendly result alias :3
pub type Result<T, E = GuardError> = std::result::Result<T, E>;

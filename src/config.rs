// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Configuration layout.
//!
//! Specify the layout of the configuration file gkn reads its settings from.
//! The file is TOML, and lives at `$XDG_CONFIG_HOME/gkn/config.toml` unless
//! told otherwise.
//!
//! # Defaults And Expansion
//!
//! Every field is optional. Parsing through [`FromStr`] fills in missing
//! fields with defaults, and then performs shell expansion on everything
//! that names a location: the root directories, guard path rules, and sync
//! target sources and destinations. Thus `~/Projects` or `$HOME/skills` can
//! be used freely.
//!
//! Default values derive from one another. Missing repository and skills
//! roots sit under the projects root, and the default sync target propagates
//! the skills root into every skill target directory.

use crate::{
    guard::Guard,
    sync::{ConflictPolicy, SyncMode},
};

use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Error as FmtError, Formatter, Result as FmtResult},
    fs, io,
    path::{Path, PathBuf},
    str::FromStr,
};
use tracing::{debug, instrument};

/// Default projects root.
pub const DEFAULT_PROJECTS_ROOT: &str = "~/Projects";

/// Name of default sync target.
pub const DEFAULT_TARGET_NAME: &str = "skills";

/// gkn configuration layout.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Directory holding everything gkn manages.
    pub projects_root: PathBuf,

    /// Directory scanned for repositories.
    pub repos_root: PathBuf,

    /// Local clone of the shared skills.
    pub skills_root: PathBuf,

    /// Remote URL to clone skills from.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub skills_remote: String,

    /// Skill directories relative to each repository.
    pub skill_targets: Vec<String>,

    pub allow_commands: Vec<String>,
    pub deny_commands: Vec<String>,
    pub allow_paths: Vec<String>,
    pub deny_paths: Vec<String>,

    /// Default propagation mode.
    pub sync_mode: SyncMode,

    /// Default conflict policy.
    pub conflict_policy: ConflictPolicy,

    /// Sync targets, listed last so they serialize as trailing tables.
    #[serde(rename = "sync_target")]
    pub sync_targets: Vec<SyncTarget>,
}

impl Config {
    /// Initial configuration written for new users.
    ///
    /// Unlike parsed configuration, paths are left unexpanded so the written
    /// file stays portable. Commands are restricted to common Git and editor
    /// invocations.
    pub fn template() -> Self {
        let mut config = Self {
            allow_commands: [
                "git init*",
                "git add*",
                "git commit*",
                "git status*",
                "git log*",
                "git rev-parse*",
                "git config*",
                "git remote*",
                "git clone*",
                "git fetch*",
                "git pull*",
                "git checkout*",
                "git push*",
                "code *",
            ]
            .into_iter()
            .map(Into::into)
            .collect(),
            ..Default::default()
        };
        config.apply_defaults();

        config
    }

    /// Load configuration file at path.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::Read`] if file cannot be read.
    /// - Return any other [`ConfigError`] if parsing fails.
    #[instrument(skip(path), level = "debug")]
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!("load configuration {:?}", path.display());
        fs::read_to_string(path)
            .map_err(|err| ConfigError::Read {
                source: err,
                path: path.to_path_buf(),
            })?
            .parse()
    }

    /// Write configuration to path, creating parent directories.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::Serialize`] if configuration cannot be
    ///   serialized.
    /// - Return [`ConfigError::Write`] if file cannot be written.
    #[instrument(skip(self, path), level = "debug")]
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let data = toml::ser::to_string_pretty(self)?;
        let write_error = |err| ConfigError::Write {
            source: err,
            path: path.to_path_buf(),
        };

        if let Some(parent) = path.parent() {
            mkdirp::mkdirp(parent).map_err(write_error)?;
        }
        fs::write(path, data).map_err(write_error)?;

        Ok(())
    }

    /// Fill in missing fields with defaults.
    pub fn apply_defaults(&mut self) {
        if is_blank_path(&self.projects_root) {
            self.projects_root = DEFAULT_PROJECTS_ROOT.into();
        }

        if is_blank_path(&self.repos_root) {
            self.repos_root = self.projects_root.join("repos");
        }

        if is_blank_path(&self.skills_root) {
            self.skills_root = self.projects_root.join("skills");
        }

        if self.skill_targets.is_empty() {
            self.skill_targets = vec![".codex/skills".into(), ".claude/skills".into()];
        }

        if self.sync_targets.is_empty() {
            self.sync_targets = vec![SyncTarget {
                name: DEFAULT_TARGET_NAME.into(),
                src: self.skills_root.clone(),
                dest: self.skill_targets.iter().map(PathBuf::from).collect(),
                include: vec!["**/*".into()],
                exclude: vec![".git/**".into()],
            }];
        }

        if self.deny_commands.is_empty() {
            self.deny_commands = vec!["rm -rf*".into(), "git reset --hard*".into()];
        }
    }

    /// Perform shell expansion on every location field.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::ShellExpansion`] if a variable cannot be
    ///   resolved.
    pub fn expand(&mut self) -> Result<()> {
        self.projects_root = expand_path(&self.projects_root)?;
        self.repos_root = expand_path(&self.repos_root)?;
        self.skills_root = expand_path(&self.skills_root)?;

        for rule in self.allow_paths.iter_mut().chain(self.deny_paths.iter_mut()) {
            *rule = expand_str(rule)?;
        }

        for target in &mut self.sync_targets {
            target.src = expand_path(&target.src)?;
            for dest in &mut target.dest {
                *dest = expand_path(dest)?;
            }
        }

        Ok(())
    }

    /// Check configuration for problems.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::Invalid`] listing every problem found.
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();
        for (field, path) in [
            ("projects_root", &self.projects_root),
            ("repos_root", &self.repos_root),
            ("skills_root", &self.skills_root),
        ] {
            if is_blank_path(path) {
                problems.push(format!("{field} is required"));
            }
        }

        for (index, target) in self.sync_targets.iter().enumerate() {
            if target.name.trim().is_empty() {
                problems.push(format!("sync_target[{index}].name is required"));
            }

            if is_blank_path(&target.src) {
                problems.push(format!("sync_target[{index}].src is required"));
            }

            if target.dest.is_empty() {
                problems.push(format!("sync_target[{index}].dest is required"));
            }
        }

        if !problems.is_empty() {
            return Err(ConfigError::Invalid { problems });
        }

        Ok(())
    }

    /// Select every sync target, or only the named one.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::UnknownTarget`] if no target has given name.
    pub fn select_targets(&self, name: Option<&str>) -> Result<Vec<&SyncTarget>> {
        let Some(name) = name.map(str::trim).filter(|name| !name.is_empty()) else {
            return Ok(self.sync_targets.iter().collect());
        };

        self.sync_targets
            .iter()
            .find(|target| target.name == name)
            .map(|target| vec![target])
            .ok_or_else(|| ConfigError::UnknownTarget { name: name.into() })
    }

    /// Build guard from allow and deny rules.
    pub fn guard(&self) -> Guard {
        Guard {
            allow_commands: self.allow_commands.clone(),
            deny_commands: self.deny_commands.clone(),
            allow_paths: self.allow_paths.clone(),
            deny_paths: self.deny_paths.clone(),
        }
    }
}

impl FromStr for Config {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let mut config: Config = toml::de::from_str(data).map_err(ConfigError::Deserialize)?;

        // INVARIANT: Defaults come first so derived defaults get expanded too.
        config.apply_defaults();
        config.expand()?;

        Ok(config)
    }
}

impl Display for Config {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(
            toml::ser::to_string_pretty(self)
                .map_err(ConfigError::Serialize)?
                .as_str(),
        )
    }
}

/// Directory propagated into every repository.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SyncTarget {
    /// Name used to select target.
    pub name: String,

    /// Source directory.
    pub src: PathBuf,

    /// Destinations, relative ones resolved against each repository.
    pub dest: Vec<PathBuf>,

    /// Include rules for source files.
    pub include: Vec<String>,

    /// Exclude rules for source files.
    pub exclude: Vec<String>,
}

fn is_blank_path(path: &Path) -> bool {
    path.to_string_lossy().trim().is_empty()
}

fn expand_str(data: &str) -> Result<String> {
    Ok(shellexpand::full(data.trim())?.into_owned())
}

fn expand_path(path: &Path) -> Result<PathBuf> {
    expand_str(&path.to_string_lossy()).map(PathBuf::from)
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read configuration {:?}", path.display())]
    Read {
        #[source]
        source: io::Error,
        path: PathBuf,
    },

    /// Failed to write configuration file.
    #[error("failed to write configuration {:?}", path.display())]
    Write {
        #[source]
        source: io::Error,
        path: PathBuf,
    },

    /// Failed to deserialize configuration.
    #[error(transparent)]
    Deserialize(#[from] toml::de::Error),

    /// Failed to serialize configuration.
    #[error(transparent)]
    Serialize(#[from] toml::ser::Error),

    /// Failed to perform shell expansion on configuration.
    #[error(transparent)]
    ShellExpansion(#[from] shellexpand::LookupError<std::env::VarError>),

    /// Configuration has problems.
    #[error("invalid configuration: {}", problems.join(", "))]
    Invalid { problems: Vec<String> },

    /// No sync target with given name.
    #[error("unknown sync target {name:?}")]
    UnknownTarget { name: String },
}

impl From<ConfigError> for FmtError {
    fn from(_: ConfigError) -> Self {
        FmtError
    }
}

/// Friendly result alias :3
pub type Result<T, E = ConfigError> = std::result::Result<T, E>;

// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Command execution across repositories.
//!
//! External commands are described by an [`Invocation`] and run through a
//! [`CommandRunner`]. The production [`ProcessRunner`] consults the
//! [`Guard`](crate::guard::Guard) before spawning anything, and can be put
//! into dry run mode where nothing is ever spawned.
//!
//! The [`Executor`] fans one invocation out over many repositories with
//! bounded concurrency. See [`pool`] for its scheduling rules.

pub mod pool;
pub mod runner;

pub use pool::{ExecOptions, ExecResult, Executor};
pub use runner::{CommandOutput, CommandRunner, Invocation, ProcessRunner};

use crate::guard::GuardError;

use std::{io, time::Duration};

/// Command execution error types.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    /// Command rejected by guard.
    #[error(transparent)]
    Denied(#[from] GuardError),

    /// Command could not be spawned.
    #[error("failed to spawn {command:?}")]
    Spawn {
        #[source]
        source: io::Error,
        command: String,
    },

    /// Command exited unsuccessfully.
    #[error("command failed: {command}")]
    Failed {
        command: String,
        output: CommandOutput,
    },

    /// Command exceeded its time limit and was killed.
    #[error("timed out after {timeout:?}")]
    TimedOut { timeout: Duration },

    /// Command was cancelled, or never started because of cancellation.
    #[error("cancelled")]
    Cancelled,
}

/// Friendly result alias :3
pub type Result<T, E = RunError> = std::result::Result<T, E>;

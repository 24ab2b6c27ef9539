// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! External command runners.

use crate::{
    exec::{Result, RunError},
    guard::Guard,
};

use std::{future::Future, path::Path, process::Stdio, time::Duration};
use tokio::{process::Command, time::Instant};
use tracing::{debug, info, instrument};

/// External command to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation {
    /// Program with arguments, no shell involved.
    Program { program: String, args: Vec<String> },

    /// Command line handed to `sh -c`.
    Shell(String),
}

impl Invocation {
    /// Construct new program invocation.
    pub fn program(
        program: impl Into<String>,
        args: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self::Program {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Construct new shell invocation.
    pub fn shell(line: impl Into<String>) -> Self {
        Self::Shell(line.into())
    }

    /// Command line as seen by the guard.
    ///
    /// Program invocations are the program and its arguments joined with
    /// single spaces. Shell invocations are the raw line.
    pub fn command_line(&self) -> String {
        match self {
            Self::Program { program, args } => std::iter::once(program.as_str())
                .chain(args.iter().map(String::as_str))
                .collect::<Vec<_>>()
                .join(" "),
            Self::Shell(line) => line.clone(),
        }
    }

    fn to_command(&self) -> Command {
        match self {
            Self::Program { program, args } => {
                let mut command = Command::new(program);
                command.args(args);
                command
            }
            Self::Shell(line) => {
                let mut command = Command::new("sh");
                command.arg("-c").arg(line);
                command
            }
        }
    }
}

/// Captured result of a command.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Layer of indirection for running external commands.
pub trait CommandRunner: Send + Sync {
    /// Run invocation inside given directory.
    ///
    /// # Errors
    ///
    /// - Return [`RunError::Failed`] carrying the captured output if the
    ///   command exits unsuccessfully.
    /// - Return any other [`RunError`] if the command cannot be run at all.
    fn run(
        &self,
        dir: &Path,
        invocation: &Invocation,
    ) -> impl Future<Output = Result<CommandOutput>> + Send;
}

/// Run commands as child processes of the current process.
///
/// Children never inherit standard input, and are killed if the future
/// running them is dropped, e.g., through a timeout or cancellation.
#[derive(Debug, Default, Clone)]
pub struct ProcessRunner {
    guard: Guard,
    dry_run: bool,
}

impl ProcessRunner {
    /// Construct new process runner.
    pub fn new(guard: Guard, dry_run: bool) -> Self {
        Self { guard, dry_run }
    }

    pub fn guard(&self) -> &Guard {
        &self.guard
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }
}

impl CommandRunner for ProcessRunner {
    #[instrument(skip(self, dir, invocation), level = "debug")]
    async fn run(&self, dir: &Path, invocation: &Invocation) -> Result<CommandOutput> {
        let command_line = invocation.command_line();
        self.guard.check_command(&command_line)?;

        if self.dry_run {
            info!("dry run {command_line:?} in {:?}", dir.display());
            return Ok(CommandOutput::default());
        }

        debug!("run {command_line:?} in {:?}", dir.display());
        let mut command = invocation.to_command();
        command
            .current_dir(dir)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let start = Instant::now();
        let output = command.output().await.map_err(|err| RunError::Spawn {
            source: err,
            command: command_line.clone(),
        })?;

        let output = CommandOutput {
            // INVARIANT: Death by signal has no exit code.
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            duration: start.elapsed(),
        };

        if !output.success() {
            return Err(RunError::Failed {
                command: command_line,
                output,
            });
        }

        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guard::GuardError;
    use pretty_assertions::assert_eq;

    #[test]
    fn command_line_forms() {
        let invocation = Invocation::program("git", ["status", "--porcelain"]);
        assert_eq!(invocation.command_line(), "git status --porcelain");

        let invocation = Invocation::program("git", Vec::<String>::new());
        assert_eq!(invocation.command_line(), "git");

        let invocation = Invocation::shell("git pull && git push");
        assert_eq!(invocation.command_line(), "git pull && git push");
    }

    #[tokio::test]
    async fn guard_checked_before_spawn() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let guard = Guard {
            deny_commands: vec!["touch *".into()],
            ..Default::default()
        };
        let runner = ProcessRunner::new(guard, false);

        let result = runner
            .run(root.path(), &Invocation::shell("touch marker"))
            .await;
        assert!(matches!(
            result,
            Err(RunError::Denied(GuardError::DeniedCommand { .. }))
        ));
        assert!(!root.path().join("marker").exists());

        Ok(())
    }

    #[tokio::test]
    async fn dry_run_never_spawns() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let runner = ProcessRunner::new(Guard::new(), true);

        let output = runner
            .run(root.path(), &Invocation::shell("touch marker"))
            .await?;
        assert_eq!(output, CommandOutput::default());
        assert!(!root.path().join("marker").exists());

        Ok(())
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn capture_output_in_directory() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        std::fs::write(root.path().join("hello.txt"), "hi")?;
        let runner = ProcessRunner::default();

        let output = runner
            .run(root.path(), &Invocation::shell("cat hello.txt; echo oops >&2"))
            .await?;
        assert_eq!(output.exit_code, 0);
        assert_eq!(output.stdout, "hi");
        assert_eq!(output.stderr, "oops\n");

        Ok(())
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_zero_exit_is_failure_with_output() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let runner = ProcessRunner::default();

        let result = runner
            .run(root.path(), &Invocation::shell("echo bad; exit 3"))
            .await;
        match result {
            Err(RunError::Failed { command, output }) => {
                assert_eq!(command, "echo bad; exit 3");
                assert_eq!(output.exit_code, 3);
                assert_eq!(output.stdout, "bad\n");
            }
            other => panic!("expected failure, got {other:?}"),
        }

        Ok(())
    }

    #[tokio::test]
    async fn missing_program_fails_to_spawn() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let runner = ProcessRunner::default();

        let result = runner
            .run(
                root.path(),
                &Invocation::program("gkn-definitely-not-a-program", ["--help"]),
            )
            .await;
        assert!(matches!(result, Err(RunError::Spawn { .. })));

        Ok(())
    }
}

// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Bounded parallel execution over repositories.
//!
//! # Scheduling
//!
//! One job exists per repository. All job indices are queued up front, then
//! a fixed number of workers pull from the shared queue until it runs dry.
//! Each worker hands back the index of every job it finished together with
//! its result, so the final listing lines up with the input no matter which
//! job finished first.
//!
//! # Job Lifecycle
//!
//! A job either gets skipped because its repository is dirty, or runs to
//! completion with success or an error. There are no retries, and the
//! failure of one job never affects another.
//!
//! Cancellation kills in-flight commands. Jobs that were still queued at that
//! point record a cancellation error without running.

use crate::{
    exec::{runner::CommandRunner, CommandOutput, Invocation, ProcessRunner, RunError},
    git::{Git2Probe, WorkTreeProbe},
    repo::Repository,
};

use futures::future::join_all;
use serde::{Serialize, Serializer};
use std::{collections::VecDeque, future::Future, path::PathBuf, sync::Arc, time::Duration};
use tokio::{sync::Mutex, time::Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Options for a batch execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOptions {
    /// Number of workers, clamped to at least one.
    pub concurrency: usize,

    /// Time limit per job.
    pub timeout: Option<Duration>,

    /// Skip repositories with a dirty work tree.
    pub require_clean: bool,
}

impl Default for ExecOptions {
    fn default() -> Self {
        Self {
            concurrency: 1,
            timeout: None,
            require_clean: false,
        }
    }
}

/// Outcome of one job.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ExecResult {
    pub name: String,
    pub path: PathBuf,

    /// Exit code of the command, if it ran at all.
    pub exit_code: Option<i32>,

    #[serde(serialize_with = "serialize_duration")]
    pub duration: Duration,

    /// Trimmed standard output.
    pub stdout: String,

    /// Trimmed standard error.
    pub stderr: String,

    /// Error text, if the job failed.
    pub error: Option<String>,

    /// Repository was dirty, so the command was not run.
    pub skipped: bool,
}

impl ExecResult {
    /// Construct new empty result for repository.
    pub fn new(repo: &Repository) -> Self {
        Self {
            name: repo.name().to_owned(),
            path: repo.path().to_path_buf(),
            ..Default::default()
        }
    }

    /// Check if job ran and succeeded.
    pub fn is_success(&self) -> bool {
        !self.skipped && self.error.is_none()
    }

    fn record(self, output: CommandOutput) -> Self {
        Self {
            exit_code: Some(output.exit_code),
            stdout: output.stdout.trim().to_owned(),
            stderr: output.stderr.trim().to_owned(),
            ..self
        }
    }

    fn fail(mut self, error: impl ToString) -> Self {
        self.error = Some(error.to_string());
        self
    }
}

fn serialize_duration<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format!("{duration:?}"))
}

/// Run one invocation across many repositories.
#[derive(Debug)]
pub struct Executor<R = ProcessRunner, P = Git2Probe>
where
    R: CommandRunner,
    P: WorkTreeProbe,
{
    runner: R,
    probe: Arc<P>,
    cancel: CancellationToken,
}

impl<R, P> Executor<R, P>
where
    R: CommandRunner,
    P: WorkTreeProbe + 'static,
{
    /// Construct new executor with its own cancellation token.
    pub fn new(runner: R, probe: P) -> Self {
        Self::with_cancel(runner, probe, CancellationToken::new())
    }

    /// Construct new executor bound to a parent cancellation token.
    pub fn with_cancel(runner: R, probe: P, cancel: CancellationToken) -> Self {
        Self {
            runner,
            probe: Arc::new(probe),
            cancel,
        }
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Run invocation inside every repository.
    ///
    /// Returns one result per repository in input order. Individual failures
    /// are recorded in their result and never abort the batch.
    #[instrument(skip(self, repos, invocation, options), level = "debug")]
    pub async fn execute_all(
        &self,
        repos: &[Repository],
        invocation: &Invocation,
        options: &ExecOptions,
    ) -> Vec<ExecResult> {
        let workers = options.concurrency.max(1);
        info!(
            "run {:?} across {} repositories with {workers} workers",
            invocation.command_line(),
            repos.len()
        );

        // INVARIANT: Queue is filled before any worker starts.
        let queue = Mutex::new((0..repos.len()).collect::<VecDeque<_>>());
        let finished = join_all(
            (0..workers).map(|worker| self.worker(worker, &queue, repos, invocation, options)),
        )
        .await;

        let mut slots: Vec<Option<ExecResult>> = vec![None; repos.len()];
        for (index, result) in finished.into_iter().flatten() {
            slots[index] = Some(result);
        }

        slots
            .into_iter()
            .zip(repos)
            .map(|(slot, repo)| {
                slot.unwrap_or_else(|| ExecResult::new(repo).fail(RunError::Cancelled))
            })
            .collect()
    }

    async fn worker(
        &self,
        worker: usize,
        queue: &Mutex<VecDeque<usize>>,
        repos: &[Repository],
        invocation: &Invocation,
        options: &ExecOptions,
    ) -> Vec<(usize, ExecResult)> {
        let mut finished = Vec::new();
        loop {
            let Some(index) = queue.lock().await.pop_front() else {
                break;
            };

            debug!("worker {worker} takes job {index}");
            finished.push((index, self.execute_one(&repos[index], invocation, options).await));
        }

        finished
    }

    async fn execute_one(
        &self,
        repo: &Repository,
        invocation: &Invocation,
        options: &ExecOptions,
    ) -> ExecResult {
        let result = ExecResult::new(repo);
        if self.cancel.is_cancelled() {
            return result.fail(RunError::Cancelled);
        }

        if options.require_clean {
            match self.check_clean(repo).await {
                Ok(true) => {}
                Ok(false) => {
                    warn!("skip dirty repository {:?}", repo.name());
                    return ExecResult {
                        skipped: true,
                        ..result
                    };
                }
                Err(err) => {
                    return ExecResult {
                        exit_code: Some(1),
                        ..result.fail(err)
                    }
                }
            }
        }

        let start = Instant::now();
        let outcome = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(RunError::Cancelled),
            outcome = with_timeout(options.timeout, self.runner.run(repo.path(), invocation)) => outcome,
        };
        let duration = start.elapsed();

        match outcome {
            Ok(output) => ExecResult {
                duration,
                ..result.record(output)
            },
            Err(err) => {
                let error = err.to_string();
                let result = match err {
                    RunError::Failed { output, .. } => result.record(output),
                    _ => result,
                };

                ExecResult {
                    duration,
                    ..result.fail(error)
                }
            }
        }
    }

    // INVARIANT: libgit2 status blocks, so it never runs on a worker's task.
    async fn check_clean(&self, repo: &Repository) -> Result<bool, String> {
        let probe = Arc::clone(&self.probe);
        let path = repo.path().to_path_buf();
        match tokio::task::spawn_blocking(move || probe.is_clean(&path)).await {
            Ok(clean) => clean.map_err(|err| err.to_string()),
            Err(err) => Err(err.to_string()),
        }
    }
}

async fn with_timeout<T>(
    timeout: Option<Duration>,
    run: impl Future<Output = Result<T, RunError>>,
) -> Result<T, RunError> {
    match timeout {
        Some(limit) => tokio::time::timeout(limit, run)
            .await
            .unwrap_or(Err(RunError::TimedOut { timeout: limit })),
        None => run.await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::GitError;
    use pretty_assertions::assert_eq;
    use std::{
        collections::HashSet,
        path::Path,
        sync::atomic::{AtomicUsize, Ordering},
    };

    /// Runner that sleeps per repository, then echoes the repository name.
    #[derive(Default)]
    struct FakeRunner {
        delays: Vec<(String, Duration)>,
        failing: HashSet<String>,
        running: AtomicUsize,
        peak: AtomicUsize,
    }

    impl FakeRunner {
        fn delay_of(&self, name: &str) -> Duration {
            self.delays
                .iter()
                .find(|(repo, _)| repo == name)
                .map(|(_, delay)| *delay)
                .unwrap_or_default()
        }
    }

    impl CommandRunner for FakeRunner {
        async fn run(&self, dir: &Path, _invocation: &Invocation) -> Result<CommandOutput, RunError> {
            let name = dir.file_name().unwrap().to_string_lossy().into_owned();
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);

            tokio::time::sleep(self.delay_of(&name)).await;
            self.running.fetch_sub(1, Ordering::SeqCst);

            let output = CommandOutput {
                exit_code: if self.failing.contains(&name) { 2 } else { 0 },
                stdout: format!("  {name}\n"),
                ..Default::default()
            };
            if !output.success() {
                return Err(RunError::Failed {
                    command: "fake".into(),
                    output,
                });
            }

            Ok(output)
        }
    }

    /// Probe where listed repositories are dirty and "broken" cannot be read.
    #[derive(Default)]
    struct FakeProbe {
        dirty: HashSet<String>,
    }

    impl WorkTreeProbe for FakeProbe {
        fn is_clean(&self, path: &Path) -> crate::git::Result<bool> {
            let name = path.file_name().unwrap().to_string_lossy().into_owned();
            if name == "broken" {
                return Err(GitError::Open {
                    source: git2::Error::from_str("not a repository"),
                    path: path.to_path_buf(),
                });
            }

            Ok(!self.dirty.contains(&name))
        }

        fn fingerprint(&self, _path: &Path) -> crate::git::Result<String> {
            Ok(String::new())
        }
    }

    /// Probe whose status check blocks its thread for a fixed time.
    struct BlockingProbe {
        delay: Duration,
    }

    impl WorkTreeProbe for BlockingProbe {
        fn is_clean(&self, _path: &Path) -> crate::git::Result<bool> {
            std::thread::sleep(self.delay);
            Ok(true)
        }

        fn fingerprint(&self, _path: &Path) -> crate::git::Result<String> {
            Ok(String::new())
        }
    }

    fn repos(names: &[&str]) -> Vec<Repository> {
        names
            .iter()
            .map(|name| Repository::new(format!("/repos/{name}")))
            .collect()
    }

    fn names(results: &[ExecResult]) -> Vec<&str> {
        results.iter().map(|result| result.name.as_str()).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn results_keep_input_order() {
        let names_in: Vec<String> = (0..10).map(|i| format!("repo-{i}")).collect();
        let repos = names_in
            .iter()
            .map(|name| Repository::new(format!("/repos/{name}")))
            .collect::<Vec<_>>();

        // INVARIANT: Earlier jobs take longer, so completion order is reversed.
        let runner = FakeRunner {
            delays: names_in
                .iter()
                .enumerate()
                .map(|(i, name)| (name.clone(), Duration::from_millis(100 * (10 - i as u64))))
                .collect(),
            ..Default::default()
        };
        let executor = Executor::new(runner, FakeProbe::default());
        let options = ExecOptions {
            concurrency: 4,
            ..Default::default()
        };

        let results = executor
            .execute_all(&repos, &Invocation::shell("echo"), &options)
            .await;
        assert_eq!(names(&results), names_in.iter().map(String::as_str).collect::<Vec<_>>());
        for (result, name) in results.iter().zip(&names_in) {
            assert_eq!(&result.stdout, name);
            assert_eq!(result.exit_code, Some(0));
            assert!(result.is_success());
        }
        assert_eq!(executor.runner.peak.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrency_clamped_to_one() {
        let executor = Executor::new(FakeRunner::default(), FakeProbe::default());
        let options = ExecOptions {
            concurrency: 0,
            ..Default::default()
        };

        let results = executor
            .execute_all(&repos(&["a", "b", "c"]), &Invocation::shell("echo"), &options)
            .await;
        assert_eq!(names(&results), vec!["a", "b", "c"]);
        assert_eq!(executor.runner.peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn require_clean_skips_dirty_repositories() {
        let probe = FakeProbe {
            dirty: HashSet::from(["dirty".to_owned()]),
        };
        let executor = Executor::new(FakeRunner::default(), probe);
        let options = ExecOptions {
            concurrency: 2,
            require_clean: true,
            ..Default::default()
        };

        let results = executor
            .execute_all(
                &repos(&["clean", "dirty", "broken"]),
                &Invocation::shell("echo"),
                &options,
            )
            .await;

        assert!(results[0].is_success());
        assert!(results[1].skipped);
        assert_eq!(results[1].error, None);
        assert_eq!(results[1].exit_code, None);
        assert!(!results[2].skipped);
        assert!(results[2].error.is_some());
        assert_eq!(results[2].exit_code, Some(1));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn clean_checks_run_in_parallel() {
        let probe = BlockingProbe {
            delay: Duration::from_millis(200),
        };
        let executor = Executor::new(FakeRunner::default(), probe);
        let options = ExecOptions {
            concurrency: 4,
            require_clean: true,
            ..Default::default()
        };

        let start = std::time::Instant::now();
        let results = executor
            .execute_all(&repos(&["a", "b", "c", "d"]), &Invocation::shell("echo"), &options)
            .await;
        let elapsed = start.elapsed();

        assert!(results.iter().all(ExecResult::is_success));
        assert!(elapsed < Duration::from_millis(500), "took {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn failure_does_not_affect_siblings() {
        let runner = FakeRunner {
            failing: HashSet::from(["bad".to_owned()]),
            ..Default::default()
        };
        let executor = Executor::new(runner, FakeProbe::default());
        let options = ExecOptions {
            concurrency: 3,
            ..Default::default()
        };

        let results = executor
            .execute_all(&repos(&["good", "bad", "fine"]), &Invocation::shell("echo"), &options)
            .await;

        assert!(results[0].is_success());
        assert_eq!(results[1].exit_code, Some(2));
        assert_eq!(results[1].stdout, "bad");
        assert_eq!(results[1].error.as_deref(), Some("command failed: fake"));
        assert!(results[2].is_success());
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_fails_only_slow_job() {
        let runner = FakeRunner {
            delays: vec![("slow".into(), Duration::from_secs(60))],
            ..Default::default()
        };
        let executor = Executor::new(runner, FakeProbe::default());
        let options = ExecOptions {
            concurrency: 2,
            timeout: Some(Duration::from_secs(5)),
            ..Default::default()
        };

        let results = executor
            .execute_all(&repos(&["slow", "quick"]), &Invocation::shell("echo"), &options)
            .await;

        assert_eq!(results[0].error.as_deref(), Some("timed out after 5s"));
        assert_eq!(results[0].exit_code, None);
        assert!(results[0].duration >= Duration::from_secs(5));
        assert!(results[1].is_success());
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_running_and_queued_jobs() {
        let runner = FakeRunner {
            delays: vec![("first".into(), Duration::from_secs(60))],
            ..Default::default()
        };
        let cancel = CancellationToken::new();
        let executor = Executor::with_cancel(runner, FakeProbe::default(), cancel.clone());
        let options = ExecOptions::default();

        let trigger = async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            cancel.cancel();
        };
        let targets = repos(&["first", "second"]);
        let invocation = Invocation::shell("echo");
        let (results, _) = tokio::join!(
            executor.execute_all(&targets, &invocation, &options),
            trigger,
        );

        assert_eq!(results[0].error.as_deref(), Some("cancelled"));
        assert_eq!(results[1].error.as_deref(), Some("cancelled"));
        assert_eq!(results[1].exit_code, None);
    }

    #[tokio::test]
    async fn empty_batch_returns_nothing() {
        let executor = Executor::new(FakeRunner::default(), FakeProbe::default());
        let results = executor
            .execute_all(&[], &Invocation::shell("echo"), &ExecOptions::default())
            .await;
        assert!(results.is_empty());
    }
}

// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use gkn::{
    config::{Config, ConfigError},
    exec::{CommandRunner, ExecOptions, Executor, Invocation, ProcessRunner},
    git::{self, Git2Probe, RepoDetail, WorkTreeProbe},
    output::Reporter,
    path::default_config_path,
    repo::{self, RepoError, Repository},
    skills::{self, CloneOutcome, Record},
    sync::{ConflictPolicy, DiffResult, SyncMode, SyncReport},
    watch::watch,
};

use anyhow::{anyhow, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::ProgressBar;
use inquire::Select;
use serde::Serialize;
use serde_json::json;
use std::{path::PathBuf, process::exit, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Exit code for ambiguous matches and failed verification.
const EXIT_MISMATCH: i32 = 2;

#[derive(Debug, Clone, Parser)]
#[command(
    about,
    override_usage = "gkn [options] <command>",
    subcommand_help_heading = "Commands",
    version
)]
struct Cli {
    /// Emit one JSON envelope per line.
    #[arg(long, global = true)]
    pub json: bool,

    /// Path to configuration file to use instead of the default.
    #[arg(long, global = true, value_name = "path")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    async fn run(self, cancel: CancellationToken) -> i32 {
        let mut reporter = Reporter::new(self.json);
        match self.dispatch(&mut reporter, cancel).await {
            Ok(code) => code,
            Err(error) => {
                debug!("{error:?}");
                if let Err(sink) = reporter.err(format!("{error:#}")) {
                    error!("{error:?}: {sink}");
                }
                1
            }
        }
    }

    async fn dispatch(self, reporter: &mut Reporter, cancel: CancellationToken) -> Result<i32> {
        let config_path = match self.config {
            Some(path) => path,
            None => default_config_path()?,
        };
        let ctx = Context {
            config_path,
            cancel,
        };

        match self.command {
            Command::Repo(command) => match command {
                RepoCommand::List(opts) => run_repo_list(&ctx, reporter, opts),
                RepoCommand::Status(opts) => run_repo_status(&ctx, reporter, opts),
                RepoCommand::Path(opts) => run_repo_path(&ctx, reporter, opts),
                RepoCommand::Info(opts) => run_repo_info(&ctx, reporter, opts),
                RepoCommand::Recent(opts) => run_repo_recent(&ctx, reporter, opts),
                RepoCommand::Graph(opts) => run_repo_graph(&ctx, reporter, opts),
                RepoCommand::Open(opts) => run_repo_open(&ctx, reporter, opts).await,
                RepoCommand::Clone(opts) => run_repo_clone(&ctx, reporter, opts).await,
                RepoCommand::Exec(opts) => run_repo_exec(&ctx, reporter, opts).await,
            },
            Command::Skills(command) => match command {
                SkillsCommand::Sync(opts) => run_skills_sync(&ctx, reporter, opts, None),
                SkillsCommand::Link(opts) => {
                    run_skills_sync(&ctx, reporter, opts, Some(SyncMode::Link))
                }
                SkillsCommand::Diff(opts) => run_skills_diff(&ctx, reporter, opts),
                SkillsCommand::Status(opts) => run_skills_status(&ctx, reporter, opts),
                SkillsCommand::Verify(opts) => run_skills_verify(&ctx, reporter, opts),
                SkillsCommand::Clean(opts) => run_skills_clean(&ctx, reporter, opts),
                SkillsCommand::Watch(opts) => run_skills_watch(&ctx, reporter, opts).await,
                SkillsCommand::Clone(opts) => run_skills_clone(&ctx, reporter, opts).await,
                SkillsCommand::Pin(opts) => run_skills_pin(&ctx, reporter, opts).await,
            },
            Command::Config(command) => match command {
                ConfigCommand::Init(opts) => run_config_init(&ctx, reporter, opts),
                ConfigCommand::Show => run_config_show(&ctx, reporter),
                ConfigCommand::Validate => run_config_validate(&ctx, reporter),
                ConfigCommand::Path => run_config_path(&ctx, reporter),
            },
        }
    }
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Inspect and operate on repositories under the repos root.
    #[command(subcommand)]
    Repo(RepoCommand),

    /// Propagate shared skills into repositories.
    #[command(subcommand)]
    Skills(SkillsCommand),

    /// Manage configuration file.
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Debug, Clone, Subcommand)]
enum RepoCommand {
    /// List repositories.
    #[command(override_usage = "gkn repo list [options]")]
    List(FilterOptions),

    /// Show whether each repository has uncommitted changes.
    #[command(override_usage = "gkn repo status [options]")]
    Status(FilterOptions),

    /// Print path of the repository matching a pattern.
    ///
    /// Use as `cd "$(gkn repo cd <pattern>)"` to change into it.
    #[command(alias = "cd", override_usage = "gkn repo path [options] <pattern>")]
    Path(PathOptions),

    /// Show branch, remote and status of the repository matching a pattern.
    #[command(override_usage = "gkn repo info [options] <pattern>")]
    Info(PathOptions),

    /// List repositories by latest commit, newest first.
    #[command(override_usage = "gkn repo recent [options]")]
    Recent(RecentArgs),

    /// Show recent history of the repository matching a pattern.
    #[command(override_usage = "gkn repo graph [options] <pattern>")]
    Graph(GraphArgs),

    /// Open the repository matching a pattern in an editor.
    #[command(override_usage = "gkn repo open [options] <pattern>")]
    Open(OpenArgs),

    /// Clone remote repository into the repos root.
    #[command(override_usage = "gkn repo clone [options] <url>")]
    Clone(RepoCloneArgs),

    /// Run shell command inside every repository.
    #[command(override_usage = "gkn repo exec [options] --cmd <line>")]
    Exec(ExecArgs),
}

#[derive(Debug, Clone, Subcommand)]
enum SkillsCommand {
    /// Sync skills into every repository.
    #[command(override_usage = "gkn skills sync [options]")]
    Sync(SyncArgs),

    /// Sync skills into every repository as symbolic links.
    #[command(override_usage = "gkn skills link [options]")]
    Link(SyncArgs),

    /// Show per file differences between skills and repositories.
    #[command(override_usage = "gkn skills diff [options]")]
    Diff(TargetOptions),

    /// Show whether each repository is in sync with skills.
    #[command(override_usage = "gkn skills status [options]")]
    Status(TargetOptions),

    /// Fail unless every repository is in sync with skills.
    #[command(override_usage = "gkn skills verify [options]")]
    Verify(TargetOptions),

    /// Remove files from repositories that are no longer part of skills.
    #[command(override_usage = "gkn skills clean [options]")]
    Clean(CleanArgs),

    /// Re-sync skills whenever the skills root changes.
    #[command(override_usage = "gkn skills watch [options]")]
    Watch(WatchArgs),

    /// Clone or update skills root from remote.
    #[command(override_usage = "gkn skills clone [options]")]
    Clone(CloneArgs),

    /// Check out a fixed revision of the skills root.
    #[command(override_usage = "gkn skills pin [options] --target <name> --ref <rev>")]
    Pin(PinArgs),
}

#[derive(Debug, Clone, Subcommand)]
enum ConfigCommand {
    /// Write initial configuration file.
    #[command(override_usage = "gkn config init [options]")]
    Init(InitOptions),

    /// Show effective configuration.
    Show,

    /// Check configuration for problems.
    Validate,

    /// Print path to configuration file.
    Path,
}

#[derive(Args, Clone, Debug)]
struct FilterOptions {
    /// Only keep repositories whose name matches pattern.
    #[arg(long, value_name = "pattern")]
    pub only: Vec<String>,

    /// Drop repositories whose name matches pattern.
    #[arg(long, value_name = "pattern")]
    pub exclude: Vec<String>,
}

#[derive(Args, Clone, Debug)]
struct PathOptions {
    /// Substring or glob to match repository names with.
    #[arg(required = true, value_name = "pattern")]
    pub pattern: String,

    /// Pick 1-based candidate when many repositories match.
    #[arg(short, long, value_name = "index", group = "choice")]
    pub pick: Option<usize>,

    /// Prompt for candidate when many repositories match.
    #[arg(short, long, group = "choice")]
    pub interactive: bool,
}

#[derive(Args, Clone, Debug)]
struct RecentArgs {
    /// Number of repositories to show, zero for all.
    #[arg(long, value_name = "count", default_value_t = 20)]
    pub limit: usize,

    #[command(flatten)]
    pub filter: FilterOptions,
}

#[derive(Args, Clone, Debug)]
struct GraphArgs {
    /// Number of commits to show, zero for all.
    #[arg(long, value_name = "count", default_value_t = 20)]
    pub limit: usize,

    #[command(flatten)]
    pub select: PathOptions,
}

#[derive(Args, Clone, Debug)]
struct OpenArgs {
    /// Program to open the repository with.
    #[arg(long = "with", value_name = "program", default_value = "code")]
    pub program: String,

    #[command(flatten)]
    pub select: PathOptions,
}

#[derive(Args, Clone, Debug)]
struct RepoCloneArgs {
    /// Remote URL to clone.
    #[arg(required = true, value_name = "url")]
    pub url: String,

    /// Directory name under the repos root instead of one derived from url.
    #[arg(long, value_name = "name")]
    pub name: Option<String>,
}

#[derive(Args, Clone, Debug)]
struct ExecArgs {
    /// Shell command line to run.
    #[arg(long, value_name = "line")]
    pub cmd: String,

    /// Number of repositories to run in at once.
    #[arg(long, value_name = "count", default_value_t = 1)]
    pub parallel: usize,

    /// Time limit per repository in seconds, zero for none.
    #[arg(long, value_name = "secs", default_value_t = 0)]
    pub timeout: u64,

    /// Skip repositories with uncommitted changes.
    #[arg(long)]
    pub require_clean: bool,

    /// Check commands against guard without running them.
    #[arg(long)]
    pub dry_run: bool,

    #[command(flatten)]
    pub filter: FilterOptions,
}

#[derive(Args, Clone, Debug)]
struct TargetOptions {
    /// Only operate on sync target with name.
    #[arg(short, long, value_name = "name")]
    pub target: Option<String>,

    #[command(flatten)]
    pub filter: FilterOptions,
}

#[derive(Args, Clone, Debug)]
struct SyncArgs {
    /// Propagation mode to use instead of the configured one.
    #[arg(short, long, value_name = "copy|mirror|link")]
    pub mode: Option<String>,

    /// Overwrite existing files.
    #[arg(short, long)]
    pub force: bool,

    /// Report what would be written without writing it.
    #[arg(long)]
    pub dry_run: bool,

    #[command(flatten)]
    pub targets: TargetOptions,
}

#[derive(Args, Clone, Debug)]
struct CleanArgs {
    /// Allow removal even under the fail conflict policy.
    #[arg(short, long)]
    pub force: bool,

    /// Report what would be removed without removing it.
    #[arg(long)]
    pub dry_run: bool,

    #[command(flatten)]
    pub targets: TargetOptions,
}

#[derive(Args, Clone, Debug)]
struct WatchArgs {
    /// Seconds between polls of the skills root.
    #[arg(long, value_name = "secs", default_value_t = 5)]
    pub interval: u64,

    /// Overwrite existing files.
    #[arg(short, long)]
    pub force: bool,

    #[command(flatten)]
    pub targets: TargetOptions,
}

#[derive(Args, Clone, Debug)]
struct CloneArgs {
    /// Remote URL to use instead of the configured one.
    #[arg(short, long, value_name = "url")]
    pub remote: Option<String>,

    /// Replace skills root if it exists and is not a repository.
    #[arg(short, long)]
    pub force: bool,
}

#[derive(Args, Clone, Debug)]
struct PinArgs {
    /// Sync target the pinned skills feed.
    #[arg(short, long, value_name = "name")]
    pub target: String,

    /// Commit, tag or branch to check out.
    #[arg(long = "ref", value_name = "rev")]
    pub reference: String,

    /// Check out even if the skills root has local changes.
    #[arg(short, long)]
    pub force: bool,
}

#[derive(Args, Clone, Debug)]
struct InitOptions {
    /// Overwrite existing configuration file.
    #[arg(short, long)]
    pub force: bool,
}

/// State shared by every command.
struct Context {
    config_path: PathBuf,
    cancel: CancellationToken,
}

impl Context {
    fn load_config(&self) -> Result<Config> {
        let config = Config::load(&self.config_path)?;
        config.validate()?;

        Ok(config)
    }

    fn scan(&self, config: &Config, filter: &FilterOptions) -> Result<Vec<Repository>> {
        let repos = repo::scan(&config.repos_root)?;
        Ok(repo::filter(&repos, &filter.only, &filter.exclude))
    }
}

#[tokio::main]
async fn main() {
    let layer = fmt::layer()
        .compact()
        .with_target(false)
        .with_timer(false)
        .without_time();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .init();

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            debug!("interrupted");
            interrupt.cancel();
        }
    });

    exit(Cli::parse().run(cancel).await)
}

fn run_repo_list(ctx: &Context, reporter: &mut Reporter, opts: FilterOptions) -> Result<i32> {
    let config = ctx.load_config()?;
    let repos = ctx.scan(&config, &opts)?;

    if reporter.is_json() {
        reporter.ok_with("repo list", &repos)?;
        return Ok(0);
    }

    for repo in &repos {
        reporter.ok(format!("{} {}", repo.name(), repo.path().display()))?;
    }

    Ok(0)
}

#[derive(Debug, Serialize)]
struct RepoStatus<'a> {
    name: &'a str,
    path: &'a std::path::Path,
    dirty: bool,
}

fn run_repo_status(ctx: &Context, reporter: &mut Reporter, opts: FilterOptions) -> Result<i32> {
    let config = ctx.load_config()?;
    let repos = ctx.scan(&config, &opts)?;

    let mut statuses = Vec::with_capacity(repos.len());
    for repo in &repos {
        let clean = Git2Probe
            .is_clean(repo.path())
            .map_err(|err| anyhow!("{}: {err}", repo.name()))?;
        statuses.push(RepoStatus {
            name: repo.name(),
            path: repo.path(),
            dirty: !clean,
        });
    }

    if reporter.is_json() {
        reporter.ok_with("repo status", &statuses)?;
        return Ok(0);
    }

    for status in &statuses {
        match status.dirty {
            true => reporter.warn(format!("{} dirty", status.name))?,
            false => reporter.ok(format!("{} clean", status.name))?,
        }
    }

    Ok(0)
}

/// Resolve pattern to one repository.
///
/// Returns `None` after reporting candidates when many repositories match
/// and no pick was made.
fn select(
    ctx: &Context,
    reporter: &mut Reporter,
    opts: &PathOptions,
) -> Result<Option<Repository>> {
    let config = ctx.load_config()?;
    let repos = repo::scan(&config.repos_root)?;
    let result = repo::find(&repos, &opts.pattern);

    match result.pick(opts.pick) {
        Ok(selected) => Ok(Some(selected.clone())),
        Err(RepoError::MultipleMatches { .. }) if opts.interactive => {
            let names = result
                .matches()
                .iter()
                .map(|repo| repo.name().to_owned())
                .collect::<Vec<_>>();
            let choice = Select::new("pick repository", names).raw_prompt()?;
            Ok(Some(result.matches()[choice.index].clone()))
        }
        Err(RepoError::MultipleMatches { .. }) => {
            if reporter.is_json() {
                reporter.warn_with("multiple matches", result.matches())?;
            } else {
                for line in result.candidates() {
                    reporter.warn(line)?;
                }
            }
            Ok(None)
        }
        Err(err) => Err(err.into()),
    }
}

fn run_repo_path(ctx: &Context, reporter: &mut Reporter, opts: PathOptions) -> Result<i32> {
    let Some(selected) = select(ctx, reporter, &opts)? else {
        return Ok(EXIT_MISMATCH);
    };

    if reporter.is_json() {
        reporter.ok_with("repo path", &selected)?;
    } else {
        reporter.raw(selected.path().display().to_string())?;
    }

    Ok(0)
}

#[derive(Debug, Serialize)]
struct RepoInfo {
    #[serde(flatten)]
    repo: Repository,

    #[serde(flatten)]
    detail: RepoDetail,
}

fn run_repo_info(ctx: &Context, reporter: &mut Reporter, opts: PathOptions) -> Result<i32> {
    let Some(selected) = select(ctx, reporter, &opts)? else {
        return Ok(EXIT_MISMATCH);
    };
    let detail = git::inspect(selected.path())?;

    if reporter.is_json() {
        reporter.ok_with(
            "repo info",
            &RepoInfo {
                repo: selected,
                detail,
            },
        )?;
        return Ok(0);
    }

    let last = match &detail.last_commit {
        Some(commit) => format!("{} {}", commit.short_id(), commit.time.to_rfc3339()),
        None => "none".into(),
    };
    reporter.ok(format!(
        "{} origin={} current={} default={} dirty={} last={last}",
        selected.name(),
        detail.origin.as_deref().unwrap_or("-"),
        detail.current_branch.as_deref().unwrap_or("-"),
        detail.default_branch.as_deref().unwrap_or("-"),
        detail.dirty,
    ))?;

    Ok(0)
}

fn run_repo_recent(ctx: &Context, reporter: &mut Reporter, opts: RecentArgs) -> Result<i32> {
    let config = ctx.load_config()?;
    let repos = ctx.scan(&config, &opts.filter)?;
    let recents = repo::recent(&repos, opts.limit);

    if reporter.is_json() {
        reporter.ok_with("repo recent", &recents)?;
        return Ok(0);
    }

    for recent in &recents {
        match &recent.last_commit {
            Some(commit) => {
                reporter.ok(format!("{} {}", recent.repo.name(), commit.time.to_rfc3339()))?
            }
            None => reporter.warn(format!("{} no-commits", recent.repo.name()))?,
        }
    }

    Ok(0)
}

fn run_repo_graph(ctx: &Context, reporter: &mut Reporter, opts: GraphArgs) -> Result<i32> {
    let Some(selected) = select(ctx, reporter, &opts.select)? else {
        return Ok(EXIT_MISMATCH);
    };
    let commits = git::log(selected.path(), opts.limit)?;

    if reporter.is_json() {
        reporter.ok_with(
            "repo graph",
            &json!({ "name": selected.name(), "log": commits }),
        )?;
        return Ok(0);
    }

    if commits.is_empty() {
        reporter.warn("no commits")?;
    }
    for commit in &commits {
        reporter.ok(format!("{} {}", commit.short_id(), commit.summary))?;
    }

    Ok(0)
}

async fn run_repo_open(ctx: &Context, reporter: &mut Reporter, opts: OpenArgs) -> Result<i32> {
    let Some(selected) = select(ctx, reporter, &opts.select)? else {
        return Ok(EXIT_MISMATCH);
    };
    let config = ctx.load_config()?;
    let runner = ProcessRunner::new(config.guard(), false);

    let path = selected.path().display().to_string();
    runner
        .run(selected.path(), &Invocation::program(&opts.program, [path]))
        .await?;
    reporter.ok(format!("opened {}", selected.name()))?;

    Ok(0)
}

async fn run_repo_clone(
    ctx: &Context,
    reporter: &mut Reporter,
    opts: RepoCloneArgs,
) -> Result<i32> {
    let config = ctx.load_config()?;
    let bar = match reporter.is_json() {
        true => ProgressBar::hidden(),
        false => ProgressBar::no_length(),
    };

    let cloned = repo::clone(
        &opts.url,
        &config.repos_root,
        opts.name.as_deref(),
        &config.guard(),
        bar,
    )
    .await?;
    reporter.ok_with(format!("cloned {}", cloned.name()), &cloned)?;

    Ok(0)
}

async fn run_repo_exec(ctx: &Context, reporter: &mut Reporter, opts: ExecArgs) -> Result<i32> {
    if opts.cmd.trim().is_empty() {
        return Err(anyhow!("--cmd must not be blank"));
    }

    let config = ctx.load_config()?;
    let repos = ctx.scan(&config, &opts.filter)?;
    let executor = Executor::with_cancel(
        ProcessRunner::new(config.guard(), opts.dry_run),
        Git2Probe,
        ctx.cancel.child_token(),
    );
    let options = ExecOptions {
        concurrency: opts.parallel,
        timeout: (opts.timeout > 0).then(|| Duration::from_secs(opts.timeout)),
        require_clean: opts.require_clean,
    };
    let results = executor
        .execute_all(&repos, &Invocation::shell(opts.cmd), &options)
        .await;

    if reporter.is_json() {
        reporter.ok_with("repo exec", &results)?;
        return Ok(0);
    }

    for result in &results {
        if result.skipped {
            reporter.warn(format!("{} skipped (dirty)", result.name))?;
            continue;
        }

        if let Some(error) = &result.error {
            reporter.err(format!("{} {error}", result.name))?;
            continue;
        }

        reporter.ok(format!("{} exit={}", result.name, result.exit_code.unwrap_or(0)))?;
        if !result.stdout.is_empty() {
            reporter.raw(&result.stdout)?;
        }
        if !result.stderr.is_empty() {
            reporter.raw(&result.stderr)?;
        }
    }

    Ok(0)
}

fn run_skills_sync(
    ctx: &Context,
    reporter: &mut Reporter,
    opts: SyncArgs,
    mode: Option<SyncMode>,
) -> Result<i32> {
    let config = ctx.load_config()?;
    let targets = config.select_targets(opts.targets.target.as_deref())?;
    let repos = ctx.scan(&config, &opts.targets.filter)?;

    let mode = match (mode, opts.mode) {
        (Some(mode), _) => mode,
        (None, Some(mode)) => mode.parse()?,
        (None, None) => config.sync_mode,
    };
    let policy = conflict_policy(&config, opts.force);

    let records = skills::propagate(&repos, &targets, mode, policy, opts.dry_run, &config.guard())?;
    let failed = report_sync(reporter, "skills sync", &records)?;

    Ok(if failed > 0 { 1 } else { 0 })
}

fn conflict_policy(config: &Config, force: bool) -> ConflictPolicy {
    if force {
        ConflictPolicy::Overwrite
    } else {
        config.conflict_policy
    }
}

/// Report sync records, returning the number of failed placements.
fn report_sync(
    reporter: &mut Reporter,
    label: &str,
    records: &[Record<SyncReport>],
) -> Result<usize> {
    let failed = records.iter().filter(|record| !record.is_ok()).count();
    if reporter.is_json() {
        match failed {
            0 => reporter.ok_with(label, records)?,
            _ => reporter.err_with(label, records)?,
        }
        return Ok(failed);
    }

    for record in records {
        match &record.error {
            Some(error) => reporter.err(format!("{} {}: {error}", record.repo, record.target))?,
            None => reporter.ok(format!(
                "{} {} {}",
                record.repo,
                record.target,
                record.destination.display()
            ))?,
        }
    }

    Ok(failed)
}

/// Report survey errors, returning the records that could be diffed.
fn split_survey<'a>(
    reporter: &mut Reporter,
    records: &'a [Record<DiffResult>],
) -> Result<Vec<(&'a Record<DiffResult>, &'a DiffResult)>> {
    let mut diffs = Vec::with_capacity(records.len());
    for record in records {
        match (&record.outcome, &record.error) {
            (Some(diff), _) => diffs.push((record, diff)),
            (None, Some(error)) if !reporter.is_json() => {
                reporter.err(format!("{} {}: {error}", record.repo, record.target))?
            }
            _ => {}
        }
    }

    Ok(diffs)
}

fn survey(ctx: &Context, opts: &TargetOptions) -> Result<Vec<Record<DiffResult>>> {
    let config = ctx.load_config()?;
    let targets = config.select_targets(opts.target.as_deref())?;
    let repos = ctx.scan(&config, &opts.filter)?;

    Ok(skills::survey(&repos, &targets))
}

fn failure_code<T>(records: &[Record<T>]) -> i32 {
    if records.iter().all(Record::is_ok) {
        0
    } else {
        1
    }
}

fn run_skills_diff(ctx: &Context, reporter: &mut Reporter, opts: TargetOptions) -> Result<i32> {
    let records = survey(ctx, &opts)?;
    if reporter.is_json() {
        reporter.ok_with("skills diff", &records)?;
        return Ok(failure_code(&records));
    }

    for (record, diff) in split_survey(reporter, &records)? {
        let prefix = format!("{} {}", record.repo, record.target);
        if diff.is_empty() {
            reporter.ok(format!("{prefix} clean"))?;
            continue;
        }

        for (label, files) in [
            ("added", &diff.added),
            ("removed", &diff.removed),
            ("changed", &diff.changed),
        ] {
            if !files.is_empty() {
                reporter.warn(format!("{prefix} {label}={}", files.len()))?;
            }
        }
    }

    Ok(failure_code(&records))
}

fn run_skills_status(ctx: &Context, reporter: &mut Reporter, opts: TargetOptions) -> Result<i32> {
    let records = survey(ctx, &opts)?;
    if reporter.is_json() {
        reporter.ok_with("skills status", &records)?;
        return Ok(failure_code(&records));
    }

    for (record, diff) in split_survey(reporter, &records)? {
        match diff.is_empty() {
            true => reporter.ok(format!("{} {} clean", record.repo, record.target))?,
            false => reporter.warn(format!("{} {} drift", record.repo, record.target))?,
        }
    }

    Ok(failure_code(&records))
}

fn run_skills_verify(ctx: &Context, reporter: &mut Reporter, opts: TargetOptions) -> Result<i32> {
    let records = survey(ctx, &opts)?;
    let errors = failure_code(&records);
    let mismatched = records
        .iter()
        .any(|record| record.outcome.as_ref().is_some_and(|diff| !diff.is_empty()));

    if reporter.is_json() {
        match (errors, mismatched) {
            (0, false) => reporter.ok_with("skills verify", &records)?,
            _ => reporter.err_with("skills verify", &records)?,
        }
    } else {
        for (record, diff) in split_survey(reporter, &records)? {
            match diff.is_empty() {
                true => reporter.ok(format!("{} {} ok", record.repo, record.target))?,
                false => reporter.err(format!("{} {} mismatch", record.repo, record.target))?,
            }
        }
    }

    Ok(match (errors, mismatched) {
        (0, false) => 0,
        (0, true) => EXIT_MISMATCH,
        _ => errors,
    })
}

fn run_skills_clean(ctx: &Context, reporter: &mut Reporter, opts: CleanArgs) -> Result<i32> {
    let config = ctx.load_config()?;
    if conflict_policy(&config, opts.force) != ConflictPolicy::Overwrite {
        return Err(anyhow!(
            "clean requires --force or conflict_policy = \"overwrite\""
        ));
    }

    let targets = config.select_targets(opts.targets.target.as_deref())?;
    let repos = ctx.scan(&config, &opts.targets.filter)?;
    let records = skills::prune(&repos, &targets, opts.dry_run, &config.guard())?;

    if reporter.is_json() {
        reporter.ok_with("skills clean", &records)?;
        return Ok(failure_code(&records));
    }

    for record in &records {
        match (&record.outcome, &record.error) {
            (Some(removed), _) if !removed.is_empty() => reporter.ok(format!(
                "{} {} removed={}",
                record.repo,
                record.target,
                removed.len()
            ))?,
            (_, Some(error)) => {
                reporter.err(format!("{} {}: {error}", record.repo, record.target))?
            }
            _ => {}
        }
    }
    reporter.ok("skills clean done")?;

    Ok(failure_code(&records))
}

async fn run_skills_watch(ctx: &Context, reporter: &mut Reporter, opts: WatchArgs) -> Result<i32> {
    let config = ctx.load_config()?;
    let targets = config.select_targets(opts.targets.target.as_deref())?;
    let policy = conflict_policy(&config, opts.force);
    let guard = config.guard();

    reporter.ok("watch started")?;
    let changes = watch(
        &Git2Probe,
        &config.skills_root,
        Duration::from_secs(opts.interval),
        &ctx.cancel,
        || -> Result<()> {
            let repos = ctx.scan(&config, &opts.targets.filter)?;
            let records =
                skills::propagate(&repos, &targets, config.sync_mode, policy, false, &guard)?;
            let failed = report_sync(reporter, "skills sync", &records)?;
            if failed > 0 {
                return Err(skills::SkillsError::Incomplete {
                    failed,
                    total: records.len(),
                }
                .into());
            }

            Ok(())
        },
    )
    .await?;
    reporter.ok_with("watch stopped", &json!({ "changes": changes }))?;

    Ok(0)
}

async fn run_skills_clone(ctx: &Context, reporter: &mut Reporter, opts: CloneArgs) -> Result<i32> {
    let config = ctx.load_config()?;
    let remote = opts.remote.unwrap_or_else(|| config.skills_remote.clone());
    let guard = config.guard();
    let runner = ProcessRunner::new(guard.clone(), false);
    let bar = match reporter.is_json() {
        true => ProgressBar::hidden(),
        false => ProgressBar::no_length(),
    };

    let outcome =
        skills::clone_or_update(&remote, &config.skills_root, opts.force, &runner, &guard, bar)
            .await?;
    match outcome {
        CloneOutcome::Cloned => reporter.ok("skills cloned")?,
        CloneOutcome::Updated => reporter.ok("skills updated")?,
    }

    Ok(0)
}

async fn run_skills_pin(ctx: &Context, reporter: &mut Reporter, opts: PinArgs) -> Result<i32> {
    let config = ctx.load_config()?;
    if opts.target.trim().is_empty() {
        return Err(anyhow!("--target must not be blank"));
    }
    config.select_targets(Some(&opts.target))?;

    let runner = ProcessRunner::new(config.guard(), false);
    skills::pin(
        &config.skills_root,
        &opts.reference,
        opts.force,
        &Git2Probe,
        &runner,
    )
    .await?;
    reporter.ok(format!("pinned {} to {}", opts.target, opts.reference.trim()))?;

    Ok(0)
}

fn run_config_init(ctx: &Context, reporter: &mut Reporter, opts: InitOptions) -> Result<i32> {
    if ctx.config_path.exists() && !opts.force {
        return Err(anyhow!("configuration already exists, use --force"));
    }

    Config::template().save(&ctx.config_path)?;
    reporter.ok_with(
        "config initialized",
        &json!({ "path": ctx.config_path.display().to_string() }),
    )?;

    Ok(0)
}

fn run_config_show(ctx: &Context, reporter: &mut Reporter) -> Result<i32> {
    let config = Config::load(&ctx.config_path)?;
    if reporter.is_json() {
        reporter.ok_with(ctx.config_path.display().to_string(), &config)?;
    } else {
        reporter.raw(toml::ser::to_string_pretty(&config)?.trim_end())?;
    }

    Ok(0)
}

fn run_config_validate(ctx: &Context, reporter: &mut Reporter) -> Result<i32> {
    let config = Config::load(&ctx.config_path)?;
    match config.validate() {
        Ok(()) => {
            reporter.ok_with(
                "config valid",
                &json!({ "path": ctx.config_path.display().to_string() }),
            )?;
            Ok(0)
        }
        Err(ConfigError::Invalid { problems }) => {
            for problem in problems {
                reporter.err(problem)?;
            }
            Ok(1)
        }
        Err(err) => Err(err.into()),
    }
}

fn run_config_path(ctx: &Context, reporter: &mut Reporter) -> Result<i32> {
    reporter.raw(ctx.config_path.display().to_string())?;
    Ok(0)
}

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use anyhow::{Context, bail};
use apworld_release::config::{Config, Verbosity, WorkerConfig};
use apworld_release::constants::{APDIFF_SCOPE_PREFIX, PUBLISH_SCOPE_PREFIX};
use apworld_release::git::SystemGit;
use apworld_release::github::GithubClient;
use apworld_release::mirror::RepoMirror;
use apworld_release::output;
use apworld_release::publish::{PublishPipeline, Services};
use apworld_release::review::{ReviewServices, ReviewWorker};
use apworld_release::services::EnvToken;
use apworld_release::task::{self, Action, Task};
use apworld_release::taskcluster::TaskclusterClient;
use clap::{Args, Parser, Subcommand};
use dialoguer::{Confirm, theme::ColorfulTheme};

/// Publishes reviewed apworld index pull requests
#[derive(Parser, Debug)]
#[command(name = "apworld-release")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Only print warnings and the final result
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// Print every step and git command
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Worker configuration file
    #[arg(long, value_name = "FILE")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct TaskArgs {
    /// Task definition file
    #[arg(long, value_name = "FILE")]
    task: PathBuf,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Merge a pull request and commit the generated patches
    Publish(TaskArgs),
    /// Push review branches for the apworlds a pull request changes
    Review(TaskArgs),
    /// Commit and push the patches of an already merged pull request
    Replay {
        #[command(flatten)]
        args: TaskArgs,
        /// Do not ask for confirmation
        #[arg(long)]
        yes: bool,
    },
}

impl Cli {
    fn runtime_config(&self) -> Config {
        let verbosity = if self.quiet {
            Verbosity::Quiet
        } else if self.verbose {
            Verbosity::Verbose
        } else {
            Verbosity::Normal
        };
        Config { verbosity }
    }
}

struct Worker {
    config: Config,
    settings: WorkerConfig,
    taskcluster: TaskclusterClient,
    tokens: EnvToken,
    mirror: RepoMirror,
}

impl Worker {
    fn new(config: Config, settings: WorkerConfig) -> anyhow::Result<Self> {
        let taskcluster = TaskclusterClient::new(&settings.taskcluster_root_url)?;
        let tokens = EnvToken {
            var: settings.token_env.clone(),
        };
        let mirror = RepoMirror::new(
            &settings.repo_cache,
            &settings.git_remote_base,
            settings.identity.clone(),
            Box::new(SystemGit),
        );
        Ok(Self {
            config,
            settings,
            taskcluster,
            tokens,
            mirror,
        })
    }

    fn publish(&self, task: &Task, replay: bool) -> anyhow::Result<ExitCode> {
        let target = task::resolve_target(PUBLISH_SCOPE_PREFIX, &task.scopes, &self.settings.repos)?;
        let request = task::publish_request(task, &target)?;
        let github = GithubClient::new(&self.settings.github_api_url, Box::new(self.tokens.clone()))?;

        let services = Services {
            provenance: &self.taskcluster,
            tokens: &self.tokens,
            merger: &github,
            locator: &self.taskcluster,
            fetcher: &self.taskcluster,
        };
        let pipeline = PublishPipeline::new(&self.mirror, services, &self.settings.work_dir)
            .with_main_branch(self.settings.main_branch.clone());

        let label = format!("{}/{}#{}", target.owner, target.repo, request.pr_number());
        let callbacks = output::PublishProgress::new(
            output::create_step_progress(&self.config),
            self.config,
            label,
        );

        let start = Instant::now();
        let result = if replay {
            pipeline.replay(&request, &callbacks)
        } else {
            pipeline.run(&request, &callbacks)
        };

        match result {
            Ok(report) => {
                output::print_publish_report(&report, start.elapsed(), &self.config);
                Ok(ExitCode::SUCCESS)
            }
            Err(err) => {
                log::error!("{}", err);
                output::print_publish_failure(&err);
                Ok(ExitCode::FAILURE)
            }
        }
    }

    fn review(&self, task: &Task, pr_number: u64) -> anyhow::Result<ExitCode> {
        let target = task::resolve_target(APDIFF_SCOPE_PREFIX, &task.scopes, &self.settings.repos)?;
        let review_repo = self
            .settings
            .target_repos
            .get(&target.key)
            .with_context(|| format!("no review repository configured for {}", target.key))?;
        let request = task::review_request(task, &target, pr_number, review_repo)?;

        let worker = ReviewWorker::new(
            &self.mirror,
            ReviewServices {
                provenance: &self.taskcluster,
                tokens: &self.tokens,
                locator: &self.taskcluster,
                fetcher: &self.taskcluster,
            },
        );

        let start = Instant::now();
        let branches = worker.run(&request)?;
        output::print_review_report(&branches, start.elapsed(), &self.config);
        Ok(ExitCode::SUCCESS)
    }
}

fn confirm_replay(task: &Task) -> anyhow::Result<bool> {
    let pr = task
        .payload
        .get("pr-number")
        .map(|v| v.to_string())
        .unwrap_or_else(|| "?".to_string());
    let confirmed = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(format!(
            "Replay patches for PR #{} without merging? Only do this if it is already merged.",
            pr.trim_matches('"')
        ))
        .default(false)
        .interact()?;
    Ok(confirmed)
}

fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    let config = cli.runtime_config();

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.log_level().as_str()),
    )
    .init();

    let settings = WorkerConfig::load(&cli.config)?;

    let (task_path, replay, skip_confirm) = match &cli.command {
        Command::Publish(args) | Command::Review(args) => (&args.task, false, true),
        Command::Replay { args, yes } => (&args.task, true, *yes),
    };
    let task = Task::load(task_path)
        .with_context(|| format!("failed to load task {}", task_path.display()))?;

    let action = match &cli.command {
        Command::Publish(_) | Command::Replay { .. } => Action::Publish,
        Command::Review(_) => task::review_action(APDIFF_SCOPE_PREFIX, &task.scopes)?,
    };

    if replay && !skip_confirm && !confirm_replay(&task)? {
        eprintln!("Aborted");
        return Ok(ExitCode::FAILURE);
    }

    let worker = Worker::new(config, settings)?;
    match (action, &cli.command) {
        (Action::Publish, _) => worker.publish(&task, replay),
        (Action::ReviewDiff { pr_number }, Command::Review(_)) => worker.review(&task, pr_number),
        (Action::ReviewDiff { .. }, _) => bail!("review actions are only accepted by `review`"),
    }
}

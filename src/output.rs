//! Spinners, colored output, and summary formatting.
//!
//! This module provides visual feedback while a pipeline runs: a spinner
//! with the current step, verbose step lines, and a colored summary.

use crate::config::Config;
use crate::constants::PROGRESS_TICK_MS;
use crate::patch::ApplyOutcome;
use crate::publish::{PatchKind, PublishCallbacks, PublishError, PublishReport, PublishStep};
use crate::review::ReviewBranch;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// No-op callbacks for when progress tracking is not needed.
/// This is the null object pattern for PublishCallbacks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NoOpCallbacks;

impl PublishCallbacks for NoOpCallbacks {
    fn on_step(&self, _step: PublishStep) {}
}

/// Prints a step progress message in verbose mode.
pub fn print_step(config: &Config, step: PublishStep) {
    if !config.is_verbose() {
        return;
    }
    eprintln!("  {}...", step.to_string().dimmed());
}

/// Spinner showing the current pipeline step.
/// Uses `Option` to avoid allocation when progress is hidden (quiet/verbose modes).
pub struct StepProgress {
    spinner: Option<ProgressBar>,
}

impl StepProgress {
    pub fn update(&self, message: &str) {
        if let Some(spinner) = &self.spinner {
            spinner.set_message(message.to_string());
        }
    }

    pub fn finish_success(&self, label: &str) {
        if let Some(spinner) = &self.spinner {
            spinner.finish_with_message(format!("{} {} done", "✓".green(), label));
        }
    }

    pub fn finish_failed(&self, label: &str, error: &str) {
        if let Some(spinner) = &self.spinner {
            spinner.finish_with_message(format!("{} {} failed: {}", "✗".red(), label, error));
        }
    }
}

/// Callbacks for a publish run.
/// Combines spinner updates with verbose output handling.
pub struct PublishProgress {
    progress: StepProgress,
    config: Config,
    label: String,
}

impl PublishProgress {
    pub fn new(progress: StepProgress, config: Config, label: impl Into<String>) -> Self {
        Self {
            progress,
            config,
            label: label.into(),
        }
    }
}

impl PublishCallbacks for PublishProgress {
    fn on_step(&self, step: PublishStep) {
        self.progress.update(format_step_message(step));
        print_step(&self.config, step);
    }

    fn on_complete(&self, result: &Result<PublishReport, PublishError>) {
        match result {
            Ok(_) => self.progress.finish_success(&self.label),
            Err(err) => self.progress.finish_failed(&self.label, &err.step.to_string()),
        }
    }
}

/// Creates a spinner-based progress tracker.
/// Returns a hidden tracker in quiet or verbose mode to avoid allocation.
#[must_use]
pub fn create_step_progress(config: &Config) -> StepProgress {
    let spinner = if config.is_quiet() || config.is_verbose() {
        None
    } else {
        let spinner = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner()
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏")
            .template("{spinner:.cyan} {msg}")
        {
            spinner.set_style(style);
        }
        spinner.enable_steady_tick(Duration::from_millis(PROGRESS_TICK_MS));
        Some(spinner)
    };

    StepProgress { spinner }
}

pub fn print_publish_report(report: &PublishReport, duration: Duration, config: &Config) {
    if config.is_quiet() {
        println!(
            "{}/{}#{} published at {}",
            report.owner, report.repo, report.pr_number, report.head
        );
        return;
    }

    print_section("Summary");
    println!(
        "{} {}/{}#{} in {}",
        "Published".green().bold(),
        report.owner,
        report.repo,
        report.pr_number,
        format_duration(duration)
    );
    for (kind, outcome) in &report.applied {
        let status = match outcome {
            ApplyOutcome::Applied => "committed".green(),
            ApplyOutcome::Skipped => "no change".yellow(),
        };
        println!("  {} {}", format_patch_kind(*kind).white(), status);
    }
    println!("  {} {}", "HEAD".white().bold(), report.head.cyan());
    println!();
}

pub fn print_review_report(branches: &[ReviewBranch], duration: Duration, config: &Config) {
    if config.is_quiet() {
        let pushed = branches.iter().filter(|b| b.pushed).count();
        println!("{}/{} review branches pushed", pushed, branches.len());
        return;
    }

    print_section("Summary");
    if branches.is_empty() {
        println!("{}", "No apworld to review".yellow().bold());
    }
    for branch in branches {
        let status = if branch.pushed {
            format!("{} commit(s) pushed", branch.commits).green()
        } else {
            "nothing to push".yellow()
        };
        println!("  {} {}", branch.branch.white(), status);
    }
    println!(
        "{}: {} branches in {}",
        "Total".white().bold(),
        branches.len(),
        format_duration(duration)
    );
}

/// Prints a pipeline failure, including the replay hint after a merge.
pub fn print_publish_failure(err: &PublishError) {
    eprintln!(
        "{} {}",
        "FAIL".red().bold(),
        format!("at {}: {}", err.step, err.source).red()
    );
    if err.merged {
        eprintln!(
            "  {}",
            "The pull request is merged upstream; run `replay` to finish publishing.".yellow()
        );
    } else if err.source.is_retryable() {
        eprintln!("  {}", "Nothing was merged; the task can be retried.".dimmed());
    }
}

fn format_duration(duration: Duration) -> String {
    format!("{:.2}s", duration.as_secs_f32())
}

fn print_section(title: &str) {
    let line = "=".repeat(50).cyan().dimmed();
    let padding = 50usize.saturating_sub(title.len()) / 2;
    let centered = format!("{:>width$}", title, width = padding + title.len());
    println!("\n{}\n{}\n{}\n", line, centered.cyan().bold(), line);
}

fn format_patch_kind(kind: PatchKind) -> &'static str {
    match kind {
        PatchKind::Expectations => "expectations",
        PatchKind::Lock => "index lock",
    }
}

fn format_step_message(step: PublishStep) -> &'static str {
    match step {
        PublishStep::Authorize => "Checking task provenance...",
        PublishStep::AcquireCredentials => "Preparing repository mirror...",
        PublishStep::FetchArtifacts => "Downloading patches...",
        PublishStep::DryRun => "Rehearsing merge and patches...",
        PublishStep::Merge => "Merging pull request...",
        PublishStep::Replay => "Committing patches...",
        PublishStep::Push => "Pushing to origin...",
        PublishStep::Cleanup => "Cleaning up...",
    }
}

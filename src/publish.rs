//! Publishing a reviewed pull request.
//!
//! The pipeline rehearses the whole merge-and-patch sequence on disposable
//! state first and only calls the (irreversible) merge endpoint once the
//! rehearsal succeeded:
//!
//! `Authorize → AcquireCredentials → FetchArtifacts → DryRun → Merge → Replay → Push → Cleanup`
//!
//! Cleanup always runs. Failures after `Merge` leave the pull request merged
//! upstream without the follow-up commits; [`PublishPipeline::replay`]
//! re-runs only the steps after the merge for that case.

use std::fmt;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::artifact::{self, ArtifactLocator, ByteFetch, PatchArtifact};
use crate::branch;
use crate::constants::{
    self, DEFAULT_MAIN_BRANCH, EXPECTATIONS_ARTIFACT, EXPECTATIONS_COMMIT_MESSAGE,
    EXPECTATIONS_PATHS, LOCK_ARTIFACT, LOCK_COMMIT_MESSAGE, LOCK_PATHS, ORIGIN,
};
use crate::error::{Error, Result};
use crate::git;
use crate::mirror::RepoMirror;
use crate::patch::{self, ApplyOutcome};
use crate::services::{ProvenanceOracle, PullRequestMerger, TokenProvider};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishStep {
    Authorize,
    AcquireCredentials,
    FetchArtifacts,
    DryRun,
    Merge,
    Replay,
    Push,
    Cleanup,
}

impl fmt::Display for PublishStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PublishStep::Authorize => "authorize",
            PublishStep::AcquireCredentials => "acquire credentials",
            PublishStep::FetchArtifacts => "fetch artifacts",
            PublishStep::DryRun => "dry run",
            PublishStep::Merge => "merge",
            PublishStep::Replay => "replay",
            PublishStep::Push => "push",
            PublishStep::Cleanup => "cleanup",
        };
        f.write_str(label)
    }
}

/// A pipeline failure, tagged with the step it happened in.
#[derive(Error, Debug)]
#[error("publish failed during {step} ({}): {source}", merge_note(.merged))]
pub struct PublishError {
    pub step: PublishStep,
    /// Whether the pull request was already merged upstream when it failed.
    pub merged: bool,
    pub source: Error,
}

fn merge_note(merged: &bool) -> &'static str {
    if *merged {
        "pull request already merged upstream, run replay"
    } else {
        "nothing was merged"
    }
}

fn at_step<T>(step: PublishStep, merged: bool, result: Result<T>) -> std::result::Result<T, PublishError> {
    result.map_err(|source| PublishError {
        step,
        merged,
        source,
    })
}

/// Receives progress notifications from a pipeline run.
pub trait PublishCallbacks {
    fn on_step(&self, step: PublishStep);
    fn on_complete(&self, _result: &std::result::Result<PublishReport, PublishError>) {}
}

/// The two generated patches, in the order they are applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchKind {
    Expectations,
    Lock,
}

impl PatchKind {
    pub fn artifact(self) -> &'static str {
        match self {
            PatchKind::Expectations => EXPECTATIONS_ARTIFACT,
            PatchKind::Lock => LOCK_ARTIFACT,
        }
    }

    pub fn commit_message(self) -> &'static str {
        match self {
            PatchKind::Expectations => EXPECTATIONS_COMMIT_MESSAGE,
            PatchKind::Lock => LOCK_COMMIT_MESSAGE,
        }
    }

    pub fn paths(self) -> &'static [&'static str] {
        match self {
            PatchKind::Expectations => EXPECTATIONS_PATHS,
            PatchKind::Lock => LOCK_PATHS,
        }
    }
}

/// Validated input of one publish run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishRequest {
    task_group_id: String,
    owner: String,
    repo: String,
    pr_number: u64,
    head_rev: String,
    diff_task: String,
    expectations_task: Option<String>,
}

impl PublishRequest {
    /// `task_group_id` identifies the invoking task; its provenance is
    /// checked against the pull request before anything else happens.
    pub fn new(
        task_group_id: &str,
        owner: &str,
        repo: &str,
        pr_number: u64,
        head_rev: &str,
        diff_task: &str,
        expectations_task: Option<&str>,
    ) -> Result<Self> {
        let invalid = |message: String| Err(Error::TaskVerification(message));

        if pr_number == 0 {
            return invalid("the pull request number must be positive".to_string());
        }
        // The merge endpoint compares `sha` against the full head commit id.
        let head_rev = head_rev.trim().to_lowercase();
        if !matches!(head_rev.len(), 40 | 64) || !head_rev.chars().all(|c| c.is_ascii_hexdigit()) {
            return invalid(format!("{:?} is not a full commit id", head_rev));
        }
        for (label, value) in [
            ("task group", Some(task_group_id)),
            ("diff task", Some(diff_task)),
            ("expectations task", expectations_task),
        ] {
            if value.is_some_and(|v| v.trim().is_empty()) {
                return invalid(format!("the {} id is empty", label));
            }
        }

        Ok(Self {
            task_group_id: task_group_id.to_string(),
            owner: owner.to_string(),
            repo: repo.to_string(),
            pr_number,
            head_rev,
            diff_task: diff_task.to_string(),
            expectations_task: expectations_task.map(str::to_string),
        })
    }

    pub fn task_group_id(&self) -> &str {
        &self.task_group_id
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn repo(&self) -> &str {
        &self.repo
    }

    pub fn pr_number(&self) -> u64 {
        self.pr_number
    }

    pub fn head_rev(&self) -> &str {
        &self.head_rev
    }

    pub fn diff_task(&self) -> &str {
        &self.diff_task
    }

    pub fn expectations_task(&self) -> Option<&str> {
        self.expectations_task.as_deref()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReport {
    pub owner: String,
    pub repo: String,
    pub pr_number: u64,
    /// Outcome of every patch, in application order.
    pub applied: Vec<(PatchKind, ApplyOutcome)>,
    /// Commit the main branch points to after the push.
    pub head: String,
}

/// Collaborators a pipeline run talks to.
#[derive(Clone, Copy)]
pub struct Services<'a> {
    pub provenance: &'a dyn ProvenanceOracle,
    pub tokens: &'a dyn TokenProvider,
    pub merger: &'a dyn PullRequestMerger,
    pub locator: &'a dyn ArtifactLocator,
    pub fetcher: &'a dyn ByteFetch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Full,
    ReplayOnly,
}

struct StagedPatch {
    kind: PatchKind,
    artifact: PatchArtifact,
}

pub struct PublishPipeline<'a> {
    mirror: &'a RepoMirror,
    services: Services<'a>,
    work_dir: PathBuf,
    main_branch: String,
}

impl<'a> PublishPipeline<'a> {
    pub fn new(mirror: &'a RepoMirror, services: Services<'a>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            mirror,
            services,
            work_dir: work_dir.into(),
            main_branch: DEFAULT_MAIN_BRANCH.to_string(),
        }
    }

    #[must_use]
    pub fn with_main_branch(mut self, branch: impl Into<String>) -> Self {
        self.main_branch = branch.into();
        self
    }

    /// Rehearses, merges, replays the patches and pushes.
    pub fn run(
        &self,
        request: &PublishRequest,
        callbacks: &dyn PublishCallbacks,
    ) -> std::result::Result<PublishReport, PublishError> {
        let result = self.execute(request, callbacks, Mode::Full);
        callbacks.on_complete(&result);
        result
    }

    /// Re-applies the patches and pushes for a pull request that is already
    /// merged upstream. Skips the rehearsal and the merge.
    pub fn replay(
        &self,
        request: &PublishRequest,
        callbacks: &dyn PublishCallbacks,
    ) -> std::result::Result<PublishReport, PublishError> {
        let result = self.execute(request, callbacks, Mode::ReplayOnly);
        callbacks.on_complete(&result);
        result
    }

    fn execute(
        &self,
        request: &PublishRequest,
        callbacks: &dyn PublishCallbacks,
        mode: Mode,
    ) -> std::result::Result<PublishReport, PublishError> {
        let premerged = mode == Mode::ReplayOnly;

        callbacks.on_step(PublishStep::Authorize);
        at_step(PublishStep::Authorize, premerged, self.authorize(request))?;

        callbacks.on_step(PublishStep::AcquireCredentials);
        let step = PublishStep::AcquireCredentials;
        let token = at_step(
            step,
            premerged,
            self.services
                .tokens
                .installation_token(request.owner(), request.repo()),
        )?;
        let path = at_step(
            step,
            premerged,
            self.mirror
                .ensure_with_token(request.owner(), request.repo(), Some(&token)),
        )?;
        let remote = at_step(
            step,
            premerged,
            self.mirror.with_credentialed_remote(&path, &token),
        )?;

        let outcome = self.publish_with_remote(request, &path, callbacks, mode);

        callbacks.on_step(PublishStep::Cleanup);
        match (outcome, remote.restore()) {
            (Ok(report), Ok(())) => {
                log::info!("Publish of #{} complete", request.pr_number());
                Ok(report)
            }
            (Ok(_), Err(e)) => Err(PublishError {
                step: PublishStep::Cleanup,
                merged: true,
                source: e,
            }),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(cleanup)) => {
                log::warn!(
                    "Failed to restore the remote URL after a {} failure: {}",
                    e.step,
                    cleanup
                );
                Err(e)
            }
        }
    }

    /// Everything between mounting the credentialed remote and restoring it.
    /// Downloaded patches are dropped, and their files deleted, on return.
    fn publish_with_remote(
        &self,
        request: &PublishRequest,
        repo: &Path,
        callbacks: &dyn PublishCallbacks,
        mode: Mode,
    ) -> std::result::Result<PublishReport, PublishError> {
        let mut merged = mode == Mode::ReplayOnly;

        callbacks.on_step(PublishStep::FetchArtifacts);
        let patches = at_step(PublishStep::FetchArtifacts, merged, self.fetch_patches(request))?;

        if mode == Mode::Full {
            callbacks.on_step(PublishStep::DryRun);
            at_step(
                PublishStep::DryRun,
                merged,
                self.rehearse(request, repo, &patches),
            )?;

            callbacks.on_step(PublishStep::Merge);
            log::info!(
                "Merging PR #{} on {}/{}",
                request.pr_number(),
                request.owner(),
                request.repo()
            );
            at_step(
                PublishStep::Merge,
                merged,
                self.services.merger.squash_merge(
                    request.owner(),
                    request.repo(),
                    request.pr_number(),
                    request.head_rev(),
                ),
            )?;
            merged = true;
            log::info!("PR #{} merged", request.pr_number());
        }

        callbacks.on_step(PublishStep::Replay);
        let applied = at_step(PublishStep::Replay, merged, self.replay_patches(repo, &patches))?;

        callbacks.on_step(PublishStep::Push);
        let head = at_step(PublishStep::Push, merged, self.push(repo))?;

        Ok(PublishReport {
            owner: request.owner().to_string(),
            repo: request.repo().to_string(),
            pr_number: request.pr_number(),
            applied,
            head,
        })
    }

    fn authorize(&self, request: &PublishRequest) -> Result<()> {
        let from_pr = self.services.provenance.is_from_pull_request(
            request.task_group_id(),
            request.owner(),
            request.repo(),
            request.pr_number(),
        )?;
        if !from_pr {
            return Err(Error::Authorization {
                task_id: request.task_group_id().to_string(),
                owner: request.owner().to_string(),
                repo: request.repo().to_string(),
                pr_number: request.pr_number(),
            });
        }
        Ok(())
    }

    fn fetch_patches(&self, request: &PublishRequest) -> Result<Vec<StagedPatch>> {
        let mut sources = Vec::new();
        if let Some(task) = request.expectations_task() {
            sources.push((PatchKind::Expectations, task));
        }
        sources.push((PatchKind::Lock, request.diff_task()));

        let mut patches = Vec::with_capacity(sources.len());
        for (kind, task) in sources {
            let artifact = artifact::download(
                self.services.locator,
                self.services.fetcher,
                task,
                kind.artifact(),
                &self.work_dir,
            )?;
            patches.push(StagedPatch { kind, artifact });
        }
        Ok(patches)
    }

    /// Runs the rehearsal and discards its state whatever the outcome.
    fn rehearse(&self, request: &PublishRequest, repo: &Path, patches: &[StagedPatch]) -> Result<()> {
        let scratch = constants::scratch_ref(request.pr_number());
        let result = self.rehearse_on_scratch(request, repo, patches, &scratch);
        if let Err(e) = self.discard_rehearsal(repo, &scratch) {
            log::warn!(
                "Failed to discard rehearsal state in {}: {}",
                repo.display(),
                e
            );
        }
        result
    }

    fn rehearse_on_scratch(
        &self,
        request: &PublishRequest,
        repo: &Path,
        patches: &[StagedPatch],
        scratch: &str,
    ) -> Result<()> {
        let vcs = self.mirror.vcs();

        git::fetch_prune(vcs, repo, ORIGIN)?;
        git::fetch_ref(
            vcs,
            repo,
            ORIGIN,
            &constants::pull_head_ref(request.pr_number()),
            scratch,
        )?;

        let fetched = git::rev_parse(vcs, repo, scratch)?;
        if fetched.to_lowercase() != request.head_rev() {
            return Err(Error::HeadMismatch {
                expected: request.head_rev().to_string(),
                actual: fetched,
            });
        }

        branch::sync(vcs, repo, &self.main_branch, false)?;
        log::info!(
            "Simulating squash merge of PR #{} onto {}",
            request.pr_number(),
            self.main_branch
        );
        git::merge_squash(vcs, repo, scratch)?;

        // Same order and staging as the replay, so a patch that only
        // conflicts with an earlier one is caught before the merge.
        for staged in patches {
            patch::rehearse(vcs, repo, &staged.artifact, staged.kind.paths())?;
        }
        Ok(())
    }

    fn discard_rehearsal(&self, repo: &Path, scratch: &str) -> Result<()> {
        let vcs = self.mirror.vcs();
        git::reset_hard(vcs, repo, None)?;
        git::clean_all(vcs, repo)?;
        if git::ref_exists(vcs, repo, scratch)? {
            git::delete_ref(vcs, repo, scratch)?;
        }
        Ok(())
    }

    fn replay_patches(&self, repo: &Path, patches: &[StagedPatch]) -> Result<Vec<(PatchKind, ApplyOutcome)>> {
        let vcs = self.mirror.vcs();

        git::fetch_prune(vcs, repo, ORIGIN)?;
        branch::sync(vcs, repo, &self.main_branch, false)?;

        let mut applied = Vec::with_capacity(patches.len());
        for staged in patches {
            let outcome = patch::apply(
                vcs,
                repo,
                &staged.artifact,
                staged.kind.commit_message(),
                staged.kind.paths(),
                self.mirror.identity(),
            )?;
            applied.push((staged.kind, outcome));
        }
        Ok(applied)
    }

    fn push(&self, repo: &Path) -> Result<String> {
        let vcs = self.mirror.vcs();
        log::info!("Pushing to {}", self.main_branch);
        git::push(vcs, repo, ORIGIN, &self.main_branch, false)?;
        git::rev_parse(vcs, repo, "HEAD")
    }
}

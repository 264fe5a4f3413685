//! Applying generated patches as single commits.

use std::path::Path;

use crate::artifact::PatchArtifact;
use crate::config::CommitIdentity;
use crate::error::{Error, Result};
use crate::git::{self, Vcs};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The patch changed the tree and a commit was created (or, for a
    /// rehearsal, the patch applied).
    Applied,
    /// Nothing to do: the patch was empty or produced no change.
    Skipped,
}

/// Applies `patch` and stages exactly `paths` without committing.
///
/// Used on throwaway state: running it for each patch in turn leaves the
/// working tree exactly as [`apply`] would before its commit, so a patch that
/// only conflicts with an earlier one in the sequence fails here too.
pub fn rehearse(vcs: &dyn Vcs, repo: &Path, patch: &PatchArtifact, paths: &[&str]) -> Result<ApplyOutcome> {
    if patch.is_empty() {
        log::info!("{} is empty, nothing to rehearse", patch.name());
        return Ok(ApplyOutcome::Skipped);
    }

    apply_to_tree(vcs, repo, patch)?;
    git::stage_paths(vcs, repo, paths)?;
    Ok(ApplyOutcome::Applied)
}

/// Applies `patch`, stages exactly `paths` and commits with `message`.
///
/// Empty patches and patches that leave the index unchanged are skipped;
/// a rejected hunk fails the whole patch and leaves the tree untouched.
pub fn apply(
    vcs: &dyn Vcs,
    repo: &Path,
    patch: &PatchArtifact,
    message: &str,
    paths: &[&str],
    identity: &CommitIdentity,
) -> Result<ApplyOutcome> {
    if patch.is_empty() {
        log::info!("{} is empty, skipping", patch.name());
        return Ok(ApplyOutcome::Skipped);
    }

    log::info!("Applying {} from task {}", patch.name(), patch.task_id());
    apply_to_tree(vcs, repo, patch)?;

    git::stage_paths(vcs, repo, paths)?;
    match git::commit(vcs, repo, message, identity) {
        Ok(()) => Ok(ApplyOutcome::Applied),
        Err(Error::CommitNoop) => {
            log::info!("{} produced no change, nothing committed", patch.name());
            Ok(ApplyOutcome::Skipped)
        }
        Err(e) => Err(e),
    }
}

fn apply_to_tree(vcs: &dyn Vcs, repo: &Path, patch: &PatchArtifact) -> Result<()> {
    git::apply_patch(vcs, repo, patch.path()).map_err(|e| Error::PatchApply {
        artifact: patch.name().to_string(),
        diagnostic: e.diagnostic(),
    })
}

//! Deterministic branch reset for reused mirrors.
//!
//! [`sync`] never trusts what a previous run left behind: it recomputes the
//! branch from the remote (or from nothing) and scrubs the working tree on
//! every call.

use std::fmt;
use std::path::Path;

use crate::constants::ORIGIN;
use crate::error::Result;
use crate::git::{self, Vcs};

/// Where the freshly synced branch came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchSource {
    /// Created from the remote-tracking ref.
    RemoteTracked,
    /// No remote branch exists; started with empty history.
    Orphan,
    /// A remote branch exists but was discarded in favour of empty history.
    ForceOverwritten,
}

impl fmt::Display for BranchSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            BranchSource::RemoteTracked => "remote-tracked",
            BranchSource::Orphan => "orphan",
            BranchSource::ForceOverwritten => "force-overwritten",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchState {
    pub branch: String,
    pub source: BranchSource,
}

/// Checks out a clean `branch` in `repo`.
///
/// Postcondition: HEAD is `branch`, the index matches HEAD and there are no
/// untracked or ignored files. With `overwrite` the branch always starts
/// with empty history, even when `origin` has it.
pub fn sync(vcs: &dyn Vcs, repo: &Path, branch: &str, overwrite: bool) -> Result<BranchState> {
    let local_ref = format!("refs/heads/{}", branch);
    let remote_ref = format!("refs/remotes/{}/{}", ORIGIN, branch);

    // Clears unmerged index entries an interrupted squash merge may have left.
    git::reset_hard(vcs, repo, None)?;

    if git::ref_exists(vcs, repo, &local_ref)? {
        log::info!("Deleting branch {} from local cache", branch);
        git::checkout_detached(vcs, repo, &local_ref)?;
        git::delete_branch_force(vcs, repo, branch)?;
    }

    let remote_exists = git::ref_exists(vcs, repo, &remote_ref)?;
    let source = if remote_exists && !overwrite {
        log::info!("Creating local {} to match {}/{}", branch, ORIGIN, branch);
        git::checkout_new_branch(vcs, repo, branch, &remote_ref)?;
        git::reset_hard(vcs, repo, Some(&remote_ref))?;
        BranchSource::RemoteTracked
    } else {
        log::info!("Starting {} with empty history", branch);
        git::checkout_orphan(vcs, repo, branch)?;
        if remote_exists {
            BranchSource::ForceOverwritten
        } else {
            BranchSource::Orphan
        }
    };

    git::reset_hard(vcs, repo, None)?;
    git::clean_all(vcs, repo)?;

    Ok(BranchState {
        branch: branch.to_string(),
        source,
    })
}

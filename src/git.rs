//! Git command wrappers.
//!
//! Every git invocation in the crate goes through the [`Vcs`] trait so the
//! publish pipeline can be exercised against a scripted fake. [`SystemGit`]
//! is the real implementation; the free functions below are thin, typed
//! helpers on top of whichever `Vcs` the caller holds.

use std::path::Path;
use std::process::Command;

use crate::config::CommitIdentity;
use crate::error::{Error, Result, VcsError};

/// Narrow command-execution interface for the version-control tool.
pub trait Vcs {
    /// Runs `git <args>` in `cwd` with extra environment variables and
    /// returns trimmed stdout. A non-zero exit is a [`VcsError::Failed`].
    fn run(&self, cwd: &Path, args: &[&str], env: &[(&str, &str)])
    -> std::result::Result<String, VcsError>;
}

/// Spawns the `git` binary found on `PATH`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemGit;

impl Vcs for SystemGit {
    fn run(
        &self,
        cwd: &Path,
        args: &[&str],
        env: &[(&str, &str)],
    ) -> std::result::Result<String, VcsError> {
        let command = describe(args);
        log::debug!("{} (in {})", command, cwd.display());

        let output = Command::new("git")
            .current_dir(cwd)
            .args(args)
            .envs(env.iter().copied())
            .env("GIT_TERMINAL_PROMPT", "0")
            .env("LC_ALL", "C")
            .output()
            .map_err(|source| VcsError::Spawn {
                command: command.clone(),
                source,
            })?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            Err(VcsError::Failed {
                command,
                code: output.status.code(),
                stdout: redact(String::from_utf8_lossy(&output.stdout).trim()),
                stderr: redact(String::from_utf8_lossy(&output.stderr).trim()),
            })
        }
    }
}

/// Runs git through [`SystemGit`]. Handy for tests and one-off probes.
pub fn run_git(repo: &Path, args: &[&str]) -> std::result::Result<String, VcsError> {
    SystemGit.run(repo, args, &[])
}

fn describe(args: &[&str]) -> String {
    redact(&format!("git {}", args.join(" ")))
}

/// Masks the userinfo part of every URL in `text`.
pub fn redact(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(scheme_end) = rest.find("://") {
        let authority_start = scheme_end + 3;
        out.push_str(&rest[..authority_start]);
        rest = &rest[authority_start..];

        let authority_end = rest
            .find(|c: char| c == '/' || c.is_whitespace())
            .unwrap_or(rest.len());
        match rest[..authority_end].rfind('@') {
            Some(at) => {
                out.push_str("***");
                rest = &rest[at..];
            }
            None => {
                out.push_str(&rest[..authority_end]);
                rest = &rest[authority_end..];
            }
        }
    }

    out.push_str(rest);
    out
}

fn validate_ref_name(name: &str) -> Result<()> {
    let invalid = name.is_empty()
        || name.starts_with('-')
        || name.contains("..")
        || name
            .chars()
            .any(|c| c.is_whitespace() || c.is_control() || "~^:?*[\\;".contains(c));
    if invalid {
        return Err(Error::TaskVerification(format!(
            "invalid ref name: {:?}",
            name
        )));
    }
    Ok(())
}

/// Returns true if `refname` resolves to a commit.
pub fn ref_exists(vcs: &dyn Vcs, repo: &Path, refname: &str) -> Result<bool> {
    validate_ref_name(refname)?;
    let target = format!("{}^{{commit}}", refname);
    match vcs.run(repo, &["rev-parse", "--verify", "--quiet", &target], &[]) {
        Ok(_) => Ok(true),
        Err(err) if err.code() == Some(1) => Ok(false),
        Err(err) => Err(err.into()),
    }
}

pub fn rev_parse(vcs: &dyn Vcs, repo: &Path, refname: &str) -> Result<String> {
    validate_ref_name(refname)?;
    Ok(vcs.run(repo, &["rev-parse", "--verify", refname], &[])?)
}

/// Name of the checked-out branch, also valid on an unborn branch.
pub fn current_branch(vcs: &dyn Vcs, repo: &Path) -> Result<String> {
    Ok(vcs.run(repo, &["symbolic-ref", "--short", "HEAD"], &[])?)
}

pub fn set_config(vcs: &dyn Vcs, repo: &Path, key: &str, value: &str) -> Result<()> {
    vcs.run(repo, &["config", key, value], &[])?;
    Ok(())
}

pub fn remote_url(vcs: &dyn Vcs, repo: &Path, remote: &str) -> Result<String> {
    Ok(vcs.run(repo, &["remote", "get-url", remote], &[])?)
}

pub fn set_remote_url(vcs: &dyn Vcs, repo: &Path, remote: &str, url: &str) -> Result<()> {
    vcs.run(repo, &["remote", "set-url", remote, url], &[])?;
    Ok(())
}

pub fn clone(vcs: &dyn Vcs, cwd: &Path, url: &str, target: &Path) -> Result<()> {
    let target = target.to_string_lossy();
    vcs.run(cwd, &["clone", url, target.as_ref()], &[])?;
    Ok(())
}

pub fn fetch_prune(vcs: &dyn Vcs, repo: &Path, remote: &str) -> Result<()> {
    vcs.run(repo, &["fetch", "--prune", remote], &[])?;
    Ok(())
}

/// Fetches a single refspec, forcing the local side.
pub fn fetch_ref(vcs: &dyn Vcs, repo: &Path, remote: &str, src: &str, dst: &str) -> Result<()> {
    validate_ref_name(src)?;
    validate_ref_name(dst)?;
    let refspec = format!("+{}:{}", src, dst);
    vcs.run(repo, &["fetch", remote, &refspec], &[])?;
    Ok(())
}

pub fn checkout_detached(vcs: &dyn Vcs, repo: &Path, target: &str) -> Result<()> {
    validate_ref_name(target)?;
    vcs.run(repo, &["checkout", "--force", "--detach", target], &[])?;
    Ok(())
}

pub fn delete_branch_force(vcs: &dyn Vcs, repo: &Path, branch: &str) -> Result<()> {
    validate_ref_name(branch)?;
    vcs.run(repo, &["branch", "-D", branch], &[])?;
    Ok(())
}

/// Creates (or resets) `branch` at `start_point` and checks it out.
pub fn checkout_new_branch(vcs: &dyn Vcs, repo: &Path, branch: &str, start_point: &str) -> Result<()> {
    validate_ref_name(branch)?;
    validate_ref_name(start_point)?;
    vcs.run(
        repo,
        &["checkout", "--force", "--no-track", "-B", branch, start_point],
        &[],
    )?;
    Ok(())
}

/// Switches to a new branch with no history.
pub fn checkout_orphan(vcs: &dyn Vcs, repo: &Path, branch: &str) -> Result<()> {
    validate_ref_name(branch)?;
    vcs.run(repo, &["checkout", "--orphan", branch], &[])?;
    Ok(())
}

pub fn reset_hard(vcs: &dyn Vcs, repo: &Path, target: Option<&str>) -> Result<()> {
    match target {
        Some(target) => {
            validate_ref_name(target)?;
            vcs.run(repo, &["reset", "--hard", target], &[])?;
        }
        None => {
            vcs.run(repo, &["reset", "--hard"], &[])?;
        }
    }
    Ok(())
}

/// Removes untracked and ignored files and directories, nested
/// repositories included.
pub fn clean_all(vcs: &dyn Vcs, repo: &Path) -> Result<()> {
    vcs.run(repo, &["clean", "-ffdx"], &[])?;
    Ok(())
}

pub fn stage_paths(vcs: &dyn Vcs, repo: &Path, paths: &[&str]) -> Result<()> {
    if paths.is_empty() {
        return Ok(());
    }
    let mut args = vec!["add", "--"];
    args.extend_from_slice(paths);
    vcs.run(repo, &args, &[])?;
    Ok(())
}

/// Commits the index under `identity`.
///
/// An empty index is reported as [`Error::CommitNoop`] so callers can decide
/// whether to tolerate it.
pub fn commit(vcs: &dyn Vcs, repo: &Path, message: &str, identity: &CommitIdentity) -> Result<()> {
    let env = identity.env();
    let env: Vec<(&str, &str)> = env.iter().map(|(k, v)| (*k, v.as_str())).collect();
    match vcs.run(repo, &["commit", "-m", message], &env) {
        Ok(_) => Ok(()),
        Err(err) if err.is_nothing_to_commit() => Err(Error::CommitNoop),
        Err(err) => Err(err.into()),
    }
}

/// Applies a patch file to the working tree. `git apply` is atomic: either
/// every hunk applies or the tree is left untouched.
pub fn apply_patch(vcs: &dyn Vcs, repo: &Path, patch: &Path) -> std::result::Result<(), VcsError> {
    let patch = patch.to_string_lossy();
    vcs.run(repo, &["apply", "--whitespace=nowarn", patch.as_ref()], &[])?;
    Ok(())
}

/// Squash-merges `source` into the working tree without committing.
pub fn merge_squash(vcs: &dyn Vcs, repo: &Path, source: &str) -> Result<()> {
    validate_ref_name(source)?;
    vcs.run(repo, &["merge", "--squash", source], &[])?;
    Ok(())
}

pub fn push(vcs: &dyn Vcs, repo: &Path, remote: &str, branch: &str, force: bool) -> Result<()> {
    validate_ref_name(branch)?;
    let mut args = vec!["push"];
    if force {
        args.push("--force");
    }
    args.extend_from_slice(&[remote, branch]);
    vcs.run(repo, &args, &[])?;
    Ok(())
}

pub fn delete_ref(vcs: &dyn Vcs, repo: &Path, refname: &str) -> Result<()> {
    validate_ref_name(refname)?;
    vcs.run(repo, &["update-ref", "-d", refname], &[])?;
    Ok(())
}

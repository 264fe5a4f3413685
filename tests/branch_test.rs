mod common;

use apworld_release::branch::{self, BranchSource};
use apworld_release::git::{self, SystemGit, run_git};
use common::{REPO, TestRemote, TestRepo};

fn status(repo: &TestRepo) -> anyhow::Result<String> {
    Ok(run_git(repo.path(), &["status", "--porcelain", "--ignored"])?)
}

#[test]
fn test_sync_tracks_remote_branch() -> anyhow::Result<()> {
    let remote = TestRemote::new(REPO)?;
    let repo = TestRepo::clone_of(&remote)?;

    let state = branch::sync(&SystemGit, repo.path(), "main", false)?;

    assert_eq!(state.branch, "main");
    assert_eq!(state.source, BranchSource::RemoteTracked);
    assert_eq!(git::current_branch(&SystemGit, repo.path())?, "main");
    assert_eq!(
        git::rev_parse(&SystemGit, repo.path(), "HEAD")?,
        remote.rev("main")?
    );
    Ok(())
}

#[test]
fn test_sync_scrubs_stale_mirror() -> anyhow::Result<()> {
    let remote = TestRemote::new(REPO)?;
    let repo = TestRepo::clone_of(&remote)?;

    // Leftovers of an aborted run: a local commit on main, a feature branch
    // checked out, a modified tracked file and untracked junk.
    repo.write("index.lock", "local only\n")?;
    repo.commit_all("Local commit")?;
    run_git(repo.path(), &["checkout", "-b", "leftover"])?;
    repo.write("README.md", "dirty\n")?;
    repo.write("junk/file.txt", "junk\n")?;

    let state = branch::sync(&SystemGit, repo.path(), "main", false)?;

    assert_eq!(state.source, BranchSource::RemoteTracked);
    assert_eq!(git::current_branch(&SystemGit, repo.path())?, "main");
    assert_eq!(
        git::rev_parse(&SystemGit, repo.path(), "HEAD")?,
        remote.rev("main")?
    );
    assert_eq!(status(&repo)?, "");
    assert!(!repo.file_exists("junk/file.txt"));
    Ok(())
}

#[test]
fn test_sync_removes_untracked_nested_repository() -> anyhow::Result<()> {
    let remote = TestRemote::new(REPO)?;
    let repo = TestRepo::clone_of(&remote)?;
    repo.write("junk/world.py", "print('hi')\n")?;
    run_git(&repo.path().join("junk"), &["init", "-q"])?;

    branch::sync(&SystemGit, repo.path(), "main", false)?;

    assert_eq!(status(&repo)?, "");
    assert!(!repo.file_exists("junk/world.py"));
    Ok(())
}

#[test]
fn test_sync_recovers_from_conflicted_squash_merge() -> anyhow::Result<()> {
    let remote = TestRemote::new(REPO)?;
    remote.open_pull_request(3, &[("meta/alttp.yaml", "expected: fail\n")])?;
    remote.commit_to_main(&[("meta/alttp.yaml", "expected: flaky\n")], "Tweak")?;
    let repo = TestRepo::clone_of(&remote)?;
    run_git(repo.path(), &["fetch", "origin", "+refs/pull/3/head:refs/scratch/pr-3"])?;
    assert!(run_git(repo.path(), &["merge", "--squash", "refs/scratch/pr-3"]).is_err());

    branch::sync(&SystemGit, repo.path(), "main", false)?;

    assert_eq!(status(&repo)?, "");
    assert_eq!(
        git::rev_parse(&SystemGit, repo.path(), "HEAD")?,
        remote.rev("main")?
    );
    Ok(())
}

#[test]
fn test_sync_overwrite_starts_empty_history() -> anyhow::Result<()> {
    let remote = TestRemote::new(REPO)?;
    let repo = TestRepo::clone_of(&remote)?;

    let state = branch::sync(&SystemGit, repo.path(), "main", true)?;

    assert_eq!(state.source, BranchSource::ForceOverwritten);
    assert_eq!(git::current_branch(&SystemGit, repo.path())?, "main");
    assert!(!git::ref_exists(&SystemGit, repo.path(), "HEAD")?);
    assert!(!repo.file_exists("README.md"));
    assert_eq!(status(&repo)?, "");
    Ok(())
}

#[test]
fn test_sync_missing_remote_branch_is_orphan() -> anyhow::Result<()> {
    let remote = TestRemote::new(REPO)?;
    let repo = TestRepo::clone_of(&remote)?;
    run_git(repo.path(), &["checkout", "-b", "pr-97-alttp"])?;
    repo.write("stale.txt", "from a previous run\n")?;
    repo.commit_all("Stale review commit")?;

    let state = branch::sync(&SystemGit, repo.path(), "pr-97-alttp", false)?;

    assert_eq!(state.source, BranchSource::Orphan);
    assert_eq!(git::current_branch(&SystemGit, repo.path())?, "pr-97-alttp");
    assert!(!git::ref_exists(&SystemGit, repo.path(), "refs/heads/pr-97-alttp")?);
    assert!(!repo.file_exists("stale.txt"));
    Ok(())
}

#[test]
fn test_sync_is_repeatable() -> anyhow::Result<()> {
    let remote = TestRemote::new(REPO)?;
    let repo = TestRepo::clone_of(&remote)?;

    let first = branch::sync(&SystemGit, repo.path(), "main", false)?;
    let second = branch::sync(&SystemGit, repo.path(), "main", false)?;

    assert_eq!(first, second);
    assert_eq!(status(&repo)?, "");
    Ok(())
}

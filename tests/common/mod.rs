//! Test infrastructure for apworld-release integration tests.

#![allow(dead_code)]

use anyhow::Result;
use apworld_release::artifact::{ArtifactLocator, ByteFetch};
use apworld_release::config::CommitIdentity;
use apworld_release::error::{self, Error};
use apworld_release::git::{SystemGit, run_git};
use apworld_release::mirror::RepoMirror;
use apworld_release::services::{ProvenanceOracle, PullRequestMerger};
use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub const OWNER: &str = "Eijebong";
pub const REPO: &str = "Archipelago-index";

/// A bare repository standing in for the hosted remote.
/// Lives at `<root>/<owner>/<repo>.git` so `root` works as a remote base.
pub struct TestRemote {
    root: TempDir,
    path: PathBuf,
}

impl TestRemote {
    /// Creates a remote whose `main` has an index lock and one expectation file.
    pub fn new(repo: &str) -> Result<Self> {
        let root = TempDir::new()?;
        let path = root.path().join(OWNER).join(format!("{}.git", repo));
        std::fs::create_dir_all(&path)?;
        run_git(&path, &["init", "--bare", "-b", "main"])?;

        let remote = Self { root, path };
        let seed = TestRepo::clone_of(&remote)?;
        seed.write("README.md", "# Index\n")?;
        seed.write("index.lock", "[worlds]\nalttp = \"1.0.0\"\n")?;
        seed.write("index/alttp.toml", "version = \"1.0.0\"\n")?;
        seed.write("meta/alttp.yaml", "expected: pass\nruns: 10\n")?;
        seed.commit_all("Initial commit")?;
        run_git(seed.path(), &["push", "origin", "HEAD:refs/heads/main"])?;

        Ok(remote)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remote base for a [`RepoMirror`].
    pub fn base(&self) -> String {
        self.root.path().to_string_lossy().into_owned()
    }

    pub fn rev(&self, refname: &str) -> Result<String> {
        Ok(run_git(&self.path, &["rev-parse", "--verify", refname])?)
    }

    pub fn has_ref(&self, refname: &str) -> bool {
        run_git(&self.path, &["rev-parse", "--verify", "--quiet", refname]).is_ok()
    }

    pub fn file_at(&self, refname: &str, file: &str) -> Result<String> {
        Ok(run_git(&self.path, &["show", &format!("{}:{}", refname, file)])?)
    }

    pub fn files_at(&self, refname: &str) -> Result<Vec<String>> {
        let listing = run_git(&self.path, &["ls-tree", "-r", "--name-only", refname])?;
        Ok(listing.lines().map(str::to_string).collect())
    }

    /// Commit subjects of `refname`, newest first.
    pub fn subjects(&self, refname: &str) -> Result<Vec<String>> {
        let log = run_git(&self.path, &["log", "--format=%s", refname])?;
        Ok(log.lines().map(str::to_string).collect())
    }

    pub fn message(&self, refname: &str) -> Result<String> {
        Ok(run_git(&self.path, &["log", "-1", "--format=%B", refname])?)
    }

    /// Pushes a pull request branching off `main` to `refs/pull/<n>/head`
    /// and returns its head commit.
    pub fn open_pull_request(&self, number: u64, files: &[(&str, &str)]) -> Result<String> {
        let work = TestRepo::clone_of(self)?;
        for (file, content) in files {
            work.write(file, content)?;
        }
        let head = work.commit_all(&format!("Change for PR {}", number))?;
        run_git(
            work.path(),
            &["push", "origin", &format!("HEAD:refs/pull/{}/head", number)],
        )?;
        Ok(head)
    }

    /// Pushes a commit straight to `main`.
    pub fn commit_to_main(&self, files: &[(&str, &str)], message: &str) -> Result<String> {
        let work = TestRepo::clone_of(self)?;
        for (file, content) in files {
            work.write(file, content)?;
        }
        let head = work.commit_all(message)?;
        run_git(work.path(), &["push", "origin", "HEAD:refs/heads/main"])?;
        Ok(head)
    }

    /// Unified diff of `files` against the current `main`.
    pub fn diff_against_main(&self, files: &[(&str, &str)]) -> Result<Vec<u8>> {
        let work = TestRepo::clone_of(self)?;
        for (file, content) in files {
            work.write(file, content)?;
        }
        let diff = run_git(work.path(), &["diff"])?;
        Ok(format!("{}\n", diff).into_bytes())
    }
}

/// A temporary working clone.
/// Automatically cleaned up when dropped.
pub struct TestRepo {
    _temp_dir: TempDir,
    path: PathBuf,
}

impl TestRepo {
    pub fn clone_of(remote: &TestRemote) -> Result<Self> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("work");
        let target = path.to_string_lossy().into_owned();
        let url = remote.path().to_string_lossy().into_owned();
        run_git(temp_dir.path(), &["clone", &url, &target])?;

        run_git(&path, &["config", "user.email", "test@example.com"])?;
        run_git(&path, &["config", "user.name", "Test User"])?;

        Ok(Self {
            _temp_dir: temp_dir,
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(&self, file: &str, content: &str) -> Result<()> {
        let target = self.path.join(file);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(target, content)?;
        Ok(())
    }

    pub fn file_exists(&self, file: &str) -> bool {
        self.path.join(file).exists()
    }

    /// Commits everything and returns the new HEAD.
    pub fn commit_all(&self, message: &str) -> Result<String> {
        run_git(&self.path, &["add", "-A"])?;
        run_git(&self.path, &["commit", "-m", message])?;
        Ok(run_git(&self.path, &["rev-parse", "HEAD"])?)
    }
}

/// A mirror cache in a temp dir, cloning from `remote`.
pub struct TestMirror {
    _cache: TempDir,
    pub mirror: RepoMirror,
}

impl TestMirror {
    pub fn new(remote: &TestRemote) -> Result<Self> {
        let cache = TempDir::new()?;
        let mirror = RepoMirror::new(
            cache.path(),
            remote.base(),
            CommitIdentity::default(),
            Box::new(SystemGit),
        );
        Ok(Self {
            _cache: cache,
            mirror,
        })
    }
}

/// Provenance answer fixed up front, optionally per task id.
pub struct FixedProvenance {
    pub default: bool,
    pub overrides: HashMap<String, bool>,
}

impl FixedProvenance {
    pub fn allow() -> Self {
        Self {
            default: true,
            overrides: HashMap::new(),
        }
    }

    pub fn deny(task_id: &str) -> Self {
        Self {
            default: true,
            overrides: HashMap::from([(task_id.to_string(), false)]),
        }
    }
}

impl ProvenanceOracle for FixedProvenance {
    fn is_from_pull_request(&self, task_id: &str, _: &str, _: &str, _: u64) -> error::Result<bool> {
        Ok(*self.overrides.get(task_id).unwrap_or(&self.default))
    }
}

/// In-memory artifact store keyed by `(task id, artifact name)`.
#[derive(Default)]
pub struct MemoryArtifacts {
    entries: HashMap<String, Vec<u8>>,
}

impl MemoryArtifacts {
    pub fn insert(&mut self, task_id: &str, name: &str, content: impl Into<Vec<u8>>) {
        self.entries
            .insert(format!("mem://{}/{}", task_id, name), content.into());
    }
}

impl ArtifactLocator for MemoryArtifacts {
    fn artifact_url(&self, task_id: &str, artifact: &str) -> error::Result<String> {
        Ok(format!("mem://{}/{}", task_id, artifact))
    }
}

impl ByteFetch for MemoryArtifacts {
    fn fetch(&self, url: &str) -> error::Result<Vec<u8>> {
        self.entries
            .get(url)
            .cloned()
            .ok_or_else(|| Error::ArtifactFetch {
                task_id: String::new(),
                artifact: url.to_string(),
                message: "404 Not Found".to_string(),
            })
    }
}

/// Squash-merges `refs/pull/<n>/head` into the bare remote's `main`,
/// refusing when the pull request head moved.
pub struct BareMerger {
    remote: PathBuf,
    pub merged: RefCell<Vec<u64>>,
}

impl BareMerger {
    pub fn new(remote: &TestRemote) -> Self {
        Self {
            remote: remote.path().to_path_buf(),
            merged: RefCell::new(Vec::new()),
        }
    }

    fn merge(&self, pr_number: u64, head_sha: &str) -> Result<()> {
        let head = run_git(
            &self.remote,
            &["rev-parse", &format!("refs/pull/{}/head", pr_number)],
        )?;
        anyhow::ensure!(head.starts_with(head_sha), "head moved to {}", head);

        let work = TempDir::new()?;
        let url = self.remote.to_string_lossy().into_owned();
        run_git(work.path(), &["clone", &url, "repo"])?;
        let repo = work.path().join("repo");
        run_git(&repo, &["config", "user.email", "merge@example.com"])?;
        run_git(&repo, &["config", "user.name", "Merge Bot"])?;
        run_git(
            &repo,
            &["fetch", "origin", &format!("refs/pull/{}/head", pr_number)],
        )?;
        run_git(&repo, &["merge", "--squash", "FETCH_HEAD"])?;
        run_git(&repo, &["commit", "-m", &format!("PR #{}", pr_number)])?;
        run_git(&repo, &["push", "origin", "HEAD:refs/heads/main"])?;
        Ok(())
    }
}

impl PullRequestMerger for BareMerger {
    fn squash_merge(&self, _: &str, _: &str, pr_number: u64, head_sha: &str) -> error::Result<()> {
        self.merge(pr_number, head_sha).map_err(|e| Error::Merge {
            pr_number,
            status: 409,
            message: e.to_string(),
        })?;
        self.merged.borrow_mut().push(pr_number);
        Ok(())
    }
}

pub fn dir_is_empty(path: &Path) -> Result<bool> {
    Ok(std::fs::read_dir(path)?.next().is_none())
}

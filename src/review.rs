//! Review branches for apworlds changed by a pull request.
//!
//! For every apworld the diff task reports as added, the archive is unpacked
//! onto an orphan branch `pr-{n}-{apworld}` of the review repository and
//! force-pushed, so reviewers can browse the exact files being published.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::Cursor;
use std::path::{Component, Path};

use semver::Version;
use serde_json::Value;

use crate::artifact::{self, ArtifactLocator, ByteFetch};
use crate::branch;
use crate::constants::{self, APDIFF_ARTIFACT, GIT_DIR, ORIGIN};
use crate::error::{Error, Result};
use crate::git;
use crate::mirror::RepoMirror;
use crate::services::{ProvenanceOracle, TokenProvider};

/// One entry of the apdiff document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApworldChange {
    Added { version: Version, checksum: String },
    /// Any other change kind. Nothing is done for these.
    Other(String),
}

/// Parses `{"<apworld>": [{"Added": ["<version>", "<checksum>"]}, ...]}`.
pub fn parse_apdiff(raw: &[u8]) -> Result<BTreeMap<String, Vec<ApworldChange>>> {
    let invalid = |message: String| Error::InvalidDiff(message);

    let document: BTreeMap<String, Vec<Value>> =
        serde_json::from_slice(raw).map_err(|e| invalid(e.to_string()))?;

    let mut parsed = BTreeMap::new();
    for (apworld, changes) in document {
        let mut entries = Vec::with_capacity(changes.len());
        for change in changes {
            let entry = match &change {
                Value::Object(map) => match map.get("Added") {
                    Some(added) => {
                        let (version, checksum) =
                            serde_json::from_value::<(String, String)>(added.clone()).map_err(
                                |e| invalid(format!("bad Added entry for {}: {}", apworld, e)),
                            )?;
                        let version = Version::parse(&version).map_err(|e| {
                            invalid(format!("bad version {:?} for {}: {}", version, apworld, e))
                        })?;
                        ApworldChange::Added { version, checksum }
                    }
                    None => ApworldChange::Other(
                        map.keys().next().cloned().unwrap_or_default(),
                    ),
                },
                Value::String(kind) => ApworldChange::Other(kind.clone()),
                other => ApworldChange::Other(other.to_string()),
            };
            entries.push(entry);
        }
        parsed.insert(apworld, entries);
    }
    Ok(parsed)
}

/// Validated input of one review run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewRequest {
    task_group_id: String,
    owner: String,
    repo: String,
    pr_number: u64,
    diff_task: String,
    review_owner: String,
    review_repo: String,
}

impl ReviewRequest {
    pub fn new(
        task_group_id: &str,
        owner: &str,
        repo: &str,
        pr_number: u64,
        diff_task: &str,
        review_owner: &str,
        review_repo: &str,
    ) -> Result<Self> {
        if pr_number == 0 {
            return Err(Error::TaskVerification(
                "the pull request number must be positive".to_string(),
            ));
        }
        if task_group_id.trim().is_empty() || diff_task.trim().is_empty() {
            return Err(Error::TaskVerification("empty task id".to_string()));
        }
        Ok(Self {
            task_group_id: task_group_id.to_string(),
            owner: owner.to_string(),
            repo: repo.to_string(),
            pr_number,
            diff_task: diff_task.to_string(),
            review_owner: review_owner.to_string(),
            review_repo: review_repo.to_string(),
        })
    }

    pub fn pr_number(&self) -> u64 {
        self.pr_number
    }

    pub fn diff_task(&self) -> &str {
        &self.diff_task
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewBranch {
    pub branch: String,
    pub commits: usize,
    pub pushed: bool,
}

/// Collaborators a review run talks to.
#[derive(Clone, Copy)]
pub struct ReviewServices<'a> {
    pub provenance: &'a dyn ProvenanceOracle,
    pub tokens: &'a dyn TokenProvider,
    pub locator: &'a dyn ArtifactLocator,
    pub fetcher: &'a dyn ByteFetch,
}

pub struct ReviewWorker<'a> {
    mirror: &'a RepoMirror,
    services: ReviewServices<'a>,
}

impl<'a> ReviewWorker<'a> {
    pub fn new(mirror: &'a RepoMirror, services: ReviewServices<'a>) -> Self {
        Self { mirror, services }
    }

    /// Builds and pushes one review branch per changed apworld.
    pub fn run(&self, request: &ReviewRequest) -> Result<Vec<ReviewBranch>> {
        for task_id in [request.task_group_id.as_str(), request.diff_task()] {
            let from_pr = self.services.provenance.is_from_pull_request(
                task_id,
                &request.owner,
                &request.repo,
                request.pr_number,
            )?;
            if !from_pr {
                return Err(Error::Authorization {
                    task_id: task_id.to_string(),
                    owner: request.owner.clone(),
                    repo: request.repo.clone(),
                    pr_number: request.pr_number,
                });
            }
        }

        let raw = artifact::fetch_bytes(
            self.services.locator,
            self.services.fetcher,
            request.diff_task(),
            APDIFF_ARTIFACT,
        )?;
        let apdiff = parse_apdiff(&raw)?;
        if apdiff.is_empty() {
            log::info!("No apworld changed in PR #{}", request.pr_number);
            return Ok(Vec::new());
        }

        let token = self
            .services
            .tokens
            .installation_token(&request.review_owner, &request.review_repo)?;
        let path = self.mirror.ensure_with_token(
            &request.review_owner,
            &request.review_repo,
            Some(&token),
        )?;
        let remote = self.mirror.with_credentialed_remote(&path, &token)?;

        let outcome = self.build_branches(request, &path, &apdiff);

        match (outcome, remote.restore()) {
            (Ok(branches), Ok(())) => Ok(branches),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(cleanup)) => {
                log::warn!("Failed to restore the remote URL: {}", cleanup);
                Err(e)
            }
        }
    }

    fn build_branches(
        &self,
        request: &ReviewRequest,
        repo: &Path,
        apdiff: &BTreeMap<String, Vec<ApworldChange>>,
    ) -> Result<Vec<ReviewBranch>> {
        let mut branches = Vec::with_capacity(apdiff.len());
        for (apworld, changes) in apdiff {
            branches.push(self.build_branch(request, repo, apworld, changes)?);
        }
        Ok(branches)
    }

    fn build_branch(
        &self,
        request: &ReviewRequest,
        repo: &Path,
        apworld: &str,
        changes: &[ApworldChange],
    ) -> Result<ReviewBranch> {
        let vcs = self.mirror.vcs();
        let branch_name = constants::review_branch(request.pr_number, apworld);
        branch::sync(vcs, repo, &branch_name, true)?;

        let mut commits = 0;
        for change in changes {
            let ApworldChange::Added { version, checksum } = change else {
                log::info!("Nothing to do for {} change of {}", describe(change), apworld);
                continue;
            };

            let archive = artifact::fetch_bytes(
                self.services.locator,
                self.services.fetcher,
                request.diff_task(),
                &constants::apworld_artifact(apworld, version),
            )?;
            let name = format!("{}-{}.apworld", apworld, version);
            let paths = extract_archive(&name, &archive, repo)?;
            let paths: Vec<&str> = paths.iter().map(String::as_str).collect();
            git::stage_paths(vcs, repo, &paths)?;

            let message = format!("{} {}\n\n{}", apworld, version, checksum);
            match git::commit(vcs, repo, &message, self.mirror.identity()) {
                Ok(()) => commits += 1,
                Err(Error::CommitNoop) => log::info!("{} produced no change", name),
                Err(e) => return Err(e),
            }
        }

        let pushed = commits > 0;
        if pushed {
            log::info!("Pushing {}", branch_name);
            git::push(vcs, repo, ORIGIN, &branch_name, true)?;
        }

        Ok(ReviewBranch {
            branch: branch_name,
            commits,
            pushed,
        })
    }
}

fn describe(change: &ApworldChange) -> &str {
    match change {
        ApworldChange::Added { .. } => "Added",
        ApworldChange::Other(kind) => kind,
    }
}

/// Unpacks `archive` into `dest` and returns the top-level paths it wrote.
///
/// Entries that would land outside `dest` or inside `.git` are rejected
/// before anything is written.
pub fn extract_archive(name: &str, archive: &[u8], dest: &Path) -> Result<BTreeSet<String>> {
    let bad = |message: String| Error::Archive {
        name: name.to_string(),
        message,
    };

    let mut zip = zip::ZipArchive::new(Cursor::new(archive)).map_err(|e| bad(e.to_string()))?;

    let mut entries = Vec::with_capacity(zip.len());
    for index in 0..zip.len() {
        let entry = zip.by_index(index).map_err(|e| bad(e.to_string()))?;
        let relative = entry
            .enclosed_name()
            .ok_or_else(|| bad(format!("entry {:?} escapes the working tree", entry.name())))?;
        let top = match relative.components().next() {
            Some(Component::Normal(top)) => top.to_string_lossy().into_owned(),
            _ => continue,
        };
        if top == GIT_DIR {
            return Err(bad(format!("entry {:?} writes into {}", entry.name(), GIT_DIR)));
        }
        entries.push((index, relative, top));
    }

    let mut top_level = BTreeSet::new();
    for (index, relative, top) in entries {
        let mut entry = zip.by_index(index).map_err(|e| bad(e.to_string()))?;
        let target = dest.join(&relative);
        if entry.is_dir() {
            std::fs::create_dir_all(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut out = File::create(&target)?;
            std::io::copy(&mut entry, &mut out)?;
        }
        top_level.insert(top);
    }

    Ok(top_level)
}

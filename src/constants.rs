//! Application-wide constants.
//!
//! Centralized names and defaults to avoid magic strings throughout the codebase.

/// Identity recorded on every generated commit.
pub const SERVICE_NAME: &str = "Taskcluster";
pub const SERVICE_EMAIL: &str = "eijebong+taskcluster@bananium.fr";

/// Remote every mirror fetches from and pushes to.
pub const ORIGIN: &str = "origin";

/// Git directory name used to detect repositories.
pub const GIT_DIR: &str = ".git";

/// Username GitHub expects alongside an installation token.
pub const TOKEN_USERNAME: &str = "x-access-token";

pub const DEFAULT_GITHUB_API_URL: &str = "https://api.github.com";
pub const DEFAULT_GIT_REMOTE_BASE: &str = "https://github.com";
pub const DEFAULT_TOKEN_ENV: &str = "GITHUB_TOKEN";
pub const DEFAULT_MAIN_BRANCH: &str = "main";

/// Artifacts produced by the CI tasks.
pub const LOCK_ARTIFACT: &str = "public/lock.diff";
pub const EXPECTATIONS_ARTIFACT: &str = "public/expectations.diff";
pub const APDIFF_ARTIFACT: &str = "public/diffs/apdiff.diff";

/// Paths each generated patch is allowed to touch.
pub const LOCK_PATHS: &[&str] = &["index.lock"];
pub const EXPECTATIONS_PATHS: &[&str] = &["meta"];

pub const LOCK_COMMIT_MESSAGE: &str = "Update index lock";
pub const EXPECTATIONS_COMMIT_MESSAGE: &str = "Update expectations";

/// Scope prefixes of the two workers.
pub const APDIFF_SCOPE_PREFIX: &str = "ap:apdiff";
pub const PUBLISH_SCOPE_PREFIX: &str = "ap:publish";

/// User agent sent to GitHub and Taskcluster.
pub const USER_AGENT: &str = concat!("apworld-release/", env!("CARGO_PKG_VERSION"));

/// Progress spinner tick interval in milliseconds.
pub const PROGRESS_TICK_MS: u64 = 80;

/// Artifact name of an apworld archive inside the diff task.
pub fn apworld_artifact(name: &str, version: &semver::Version) -> String {
    format!("public/diffs/{}-{}.apworld", name, version)
}

/// Local ref the pull request head is fetched into during a rehearsal.
pub fn scratch_ref(pr_number: u64) -> String {
    format!("refs/scratch/pr-{}", pr_number)
}

/// Remote ref GitHub exposes for a pull request head.
pub fn pull_head_ref(pr_number: u64) -> String {
    format!("refs/pull/{}/head", pr_number)
}

/// Review branch for one apworld of a pull request.
pub fn review_branch(pr_number: u64, apworld: &str) -> String {
    format!("pr-{}-{}", pr_number, apworld)
}

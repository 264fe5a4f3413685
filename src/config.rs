//! Configuration types: CLI verbosity and the worker's `config.json`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::constants::{
    DEFAULT_GITHUB_API_URL, DEFAULT_GIT_REMOTE_BASE, DEFAULT_MAIN_BRANCH, DEFAULT_TOKEN_ENV,
    SERVICE_EMAIL, SERVICE_NAME,
};
use crate::error::{Error, Result};

/// Runtime configuration derived from CLI arguments.
#[derive(Debug, Clone, Copy, Default)]
pub struct Config {
    /// Controls the verbosity level of CLI output.
    pub verbosity: Verbosity,
}

impl Config {
    #[must_use]
    pub fn is_quiet(&self) -> bool {
        self.verbosity == Verbosity::Quiet
    }

    #[must_use]
    pub fn is_verbose(&self) -> bool {
        self.verbosity == Verbosity::Verbose
    }

    /// Default log filter for this verbosity. `RUST_LOG` still wins when set.
    ///
    /// Normal mode draws a spinner on stderr, so step logs stay off there.
    #[must_use]
    pub fn log_level(&self) -> log::LevelFilter {
        match self.verbosity {
            Verbosity::Quiet | Verbosity::Normal => log::LevelFilter::Warn,
            Verbosity::Verbose => log::LevelFilter::Debug,
        }
    }
}

/// Verbosity level for CLI output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    Quiet,
    #[default]
    Normal,
    Verbose,
}

/// Author and committer used for every generated commit.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CommitIdentity {
    pub name: String,
    pub email: String,
}

impl Default for CommitIdentity {
    fn default() -> Self {
        Self {
            name: SERVICE_NAME.to_string(),
            email: SERVICE_EMAIL.to_string(),
        }
    }
}

impl CommitIdentity {
    /// Environment overriding both author and committer.
    pub fn env(&self) -> Vec<(&'static str, String)> {
        vec![
            ("GIT_AUTHOR_NAME", self.name.clone()),
            ("GIT_AUTHOR_EMAIL", self.email.clone()),
            ("GIT_COMMITTER_NAME", self.name.clone()),
            ("GIT_COMMITTER_EMAIL", self.email.clone()),
        ]
    }
}

/// Worker settings, read from the JSON file the task runner renders.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    /// Root directory of the repository mirrors.
    pub repo_cache: PathBuf,
    /// Directory for temporary patch files.
    pub work_dir: PathBuf,
    pub taskcluster_root_url: String,
    #[serde(default = "default_github_api_url")]
    pub github_api_url: String,
    /// Base of canonical clone URLs: `{base}/{owner}/{repo}.git`.
    #[serde(default = "default_git_remote_base")]
    pub git_remote_base: String,
    /// Scope key to `owner/repo` for repositories tasks may target.
    #[serde(default)]
    pub repos: BTreeMap<String, String>,
    /// Scope key to `owner/repo` of the matching review repository.
    #[serde(default)]
    pub target_repos: BTreeMap<String, String>,
    #[serde(default)]
    pub identity: CommitIdentity,
    /// Environment variable holding the installation token.
    #[serde(default = "default_token_env")]
    pub token_env: String,
    #[serde(default = "default_main_branch")]
    pub main_branch: String,
}

fn default_github_api_url() -> String {
    DEFAULT_GITHUB_API_URL.to_string()
}

fn default_git_remote_base() -> String {
    DEFAULT_GIT_REMOTE_BASE.to_string()
}

fn default_token_env() -> String {
    DEFAULT_TOKEN_ENV.to_string()
}

fn default_main_branch() -> String {
    DEFAULT_MAIN_BRANCH.to_string()
}

impl WorkerConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| Error::Config {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::from_json(&raw).map_err(|message| Error::Config {
            path: path.to_path_buf(),
            message,
        })
    }

    fn from_json(raw: &str) -> std::result::Result<Self, String> {
        let config: WorkerConfig = serde_json::from_str(raw).map_err(|e| e.to_string())?;
        for (key, target) in config.repos.iter().chain(config.target_repos.iter()) {
            if split_repo(target).is_none() {
                return Err(format!(
                    "repository '{}' for key '{}' is not of the form owner/repo",
                    target, key
                ));
            }
        }
        Ok(config)
    }
}

/// Splits `owner/repo`.
pub fn split_repo(full_name: &str) -> Option<(&str, &str)> {
    let (owner, repo) = full_name.split_once('/')?;
    if owner.is_empty() || repo.is_empty() || repo.contains('/') {
        return None;
    }
    Some((owner, repo))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_quiet_and_verbose_flags() {
        let quiet = Config {
            verbosity: Verbosity::Quiet,
        };
        assert!(quiet.is_quiet());
        assert!(!quiet.is_verbose());

        let verbose = Config {
            verbosity: Verbosity::Verbose,
        };
        assert!(!verbose.is_quiet());
        assert!(verbose.is_verbose());
    }

    #[test]
    fn test_log_level_stays_quiet_while_spinner_draws() {
        assert_eq!(
            Config {
                verbosity: Verbosity::Quiet
            }
            .log_level(),
            log::LevelFilter::Warn
        );
        assert_eq!(Config::default().log_level(), log::LevelFilter::Warn);
        assert_eq!(
            Config {
                verbosity: Verbosity::Verbose
            }
            .log_level(),
            log::LevelFilter::Debug
        );
    }

    #[test]
    fn test_worker_config_defaults() {
        let config = WorkerConfig::from_json(
            r#"{
                "repo_cache": "/var/cache/repos",
                "work_dir": "/tmp/work",
                "taskcluster_root_url": "https://tc.example",
                "repos": {"index": "Eijebong/Archipelago-index"}
            }"#,
        )
        .unwrap();

        assert_eq!(config.github_api_url, "https://api.github.com");
        assert_eq!(config.git_remote_base, "https://github.com");
        assert_eq!(config.main_branch, "main");
        assert_eq!(config.token_env, "GITHUB_TOKEN");
        assert_eq!(config.identity, CommitIdentity::default());
        assert_eq!(config.repos["index"], "Eijebong/Archipelago-index");
        assert!(config.target_repos.is_empty());
    }

    #[test]
    fn test_worker_config_rejects_malformed_repo() {
        let err = WorkerConfig::from_json(
            r#"{
                "repo_cache": "/c",
                "work_dir": "/w",
                "taskcluster_root_url": "https://tc.example",
                "repos": {"index": "no-slash"}
            }"#,
        )
        .unwrap_err();
        assert!(err.contains("owner/repo"));
    }

    #[test]
    fn test_load_reports_missing_file() {
        let err = WorkerConfig::load(Path::new("/no/such/config.json")).unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn test_split_repo() {
        assert_eq!(split_repo("o/r"), Some(("o", "r")));
        assert_eq!(split_repo("o/"), None);
        assert_eq!(split_repo("o/r/x"), None);
        assert_eq!(split_repo("plain"), None);
    }
}

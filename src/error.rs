//! Error types shared by the mirror, branch, patch and publish modules.
//!
//! `VcsError` describes a single failed `git` invocation. `Error` is the
//! crate-wide taxonomy; every variant aborts the enclosing run and none of
//! them is retried internally.

use std::path::PathBuf;

use thiserror::Error;

/// A failed version-control command.
///
/// The command line is always redacted before it is stored here, so the
/// error can be logged or shown to an operator as-is.
#[derive(Error, Debug)]
pub enum VcsError {
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` failed ({}): {}", describe_exit(.code), diagnostic(.stdout, .stderr))]
    Failed {
        command: String,
        code: Option<i32>,
        stdout: String,
        stderr: String,
    },
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {}", code),
        None => "terminated by signal".to_string(),
    }
}

fn diagnostic<'a>(stdout: &'a str, stderr: &'a str) -> &'a str {
    if stderr.trim().is_empty() {
        stdout.trim()
    } else {
        stderr.trim()
    }
}

impl VcsError {
    /// Exit code of the failed command, if it ran at all.
    pub fn code(&self) -> Option<i32> {
        match self {
            VcsError::Failed { code, .. } => *code,
            VcsError::Spawn { .. } => None,
        }
    }

    /// Combined diagnostic text (stderr, falling back to stdout).
    pub fn diagnostic(&self) -> String {
        match self {
            VcsError::Failed { stdout, stderr, .. } => diagnostic(stdout, stderr).to_string(),
            VcsError::Spawn { source, .. } => source.to_string(),
        }
    }

    fn output_contains(&self, needles: &[&str]) -> bool {
        match self {
            VcsError::Failed { stdout, stderr, .. } => {
                let stdout = stdout.to_lowercase();
                let stderr = stderr.to_lowercase();
                needles
                    .iter()
                    .any(|needle| stdout.contains(needle) || stderr.contains(needle))
            }
            VcsError::Spawn { .. } => false,
        }
    }

    /// True when `git commit` refused because the index matches HEAD.
    pub fn is_nothing_to_commit(&self) -> bool {
        self.output_contains(&[
            "nothing to commit",
            "nothing added to commit",
            "no changes added to commit",
        ])
    }

    /// True when the remote rejected our credentials. Never retry these.
    pub fn is_auth_failure(&self) -> bool {
        self.output_contains(&[
            "authentication failed",
            "permission denied",
            "invalid credentials",
            "invalid username or password",
            "could not read username",
        ])
    }

    /// True when the failure looks like a transient network problem.
    pub fn is_network_failure(&self) -> bool {
        self.output_contains(&[
            "could not resolve host",
            "connection refused",
            "connection timed out",
            "network is unreachable",
            "failed to connect",
            "couldn't connect to server",
            "the remote end hung up unexpectedly",
            "early eof",
        ])
    }
}

/// Errors produced by the release engine.
#[derive(Error, Debug)]
pub enum Error {
    #[error(
        "task {task_id} does not originate from {owner}/{repo}#{pr_number}; refusing to act on it"
    )]
    Authorization {
        task_id: String,
        owner: String,
        repo: String,
        pr_number: u64,
    },

    #[error("could not fetch artifact {artifact} from task {task_id}: {message}")]
    ArtifactFetch {
        task_id: String,
        artifact: String,
        message: String,
    },

    #[error("patch {artifact} does not apply: {diagnostic}")]
    PatchApply { artifact: String, diagnostic: String },

    #[error(transparent)]
    Vcs(#[from] VcsError),

    #[error("nothing to commit")]
    CommitNoop,

    #[error("merge of pull request #{pr_number} was rejected ({status}): {message}")]
    Merge {
        pr_number: u64,
        status: u16,
        message: String,
    },

    #[error("pull request head is {actual}, expected {expected}")]
    HeadMismatch { expected: String, actual: String },

    #[error("could not obtain credentials: {0}")]
    Credentials(String),

    #[error("provenance lookup failed: {0}")]
    Provenance(String),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("task verification failed: {0}")]
    TaskVerification(String),

    #[error("invalid apdiff document: {0}")]
    InvalidDiff(String),

    #[error("invalid apworld archive {name}: {message}")]
    Archive { name: String, message: String },

    #[error("failed to load configuration '{path}': {message}")]
    Config { path: PathBuf, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Returns true if re-running the whole operation later may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::ArtifactFetch { .. } | Error::Provenance(_) => true,
            Error::Vcs(err) => err.is_network_failure() && !err.is_auth_failure(),
            _ => false,
        }
    }
}

/// Result type for release engine operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    fn failed(stdout: &str, stderr: &str) -> VcsError {
        VcsError::Failed {
            command: "git commit -m msg".to_string(),
            code: Some(1),
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
        }
    }

    #[test]
    fn test_nothing_to_commit_is_detected_on_stdout() {
        let err = failed("On branch main\nnothing to commit, working tree clean", "");
        assert!(err.is_nothing_to_commit());
        assert!(!failed("", "fatal: bad object").is_nothing_to_commit());
    }

    #[test]
    fn test_display_prefers_stderr() {
        let err = failed("some stdout", "fatal: not a git repository");
        let message = err.to_string();
        assert!(message.contains("exit code 1"));
        assert!(message.contains("fatal: not a git repository"));
        assert!(!message.contains("some stdout"));
    }

    #[test]
    fn test_auth_failures_are_not_retryable() {
        let auth = Error::Vcs(failed(
            "",
            "remote: Invalid username or password.\nfatal: Authentication failed",
        ));
        assert!(!auth.is_retryable());

        let network = Error::Vcs(failed("", "fatal: unable to access: Could not resolve host"));
        assert!(network.is_retryable());

        let fetch = Error::ArtifactFetch {
            task_id: "abc".to_string(),
            artifact: "public/lock.diff".to_string(),
            message: "404".to_string(),
        };
        assert!(fetch.is_retryable());

        let denied = Error::Authorization {
            task_id: "abc".to_string(),
            owner: "o".to_string(),
            repo: "r".to_string(),
            pr_number: 1,
        };
        assert!(!denied.is_retryable());
    }

    #[test]
    fn test_http_client_errors_have_their_own_variant() {
        let request_error = reqwest::blocking::Client::new()
            .get("not a url")
            .send()
            .unwrap_err();
        let err = Error::from(request_error);

        assert!(matches!(err, Error::Http(_)));
        assert!(err.to_string().starts_with("HTTP client error"));
        assert!(!err.is_retryable());
    }
}

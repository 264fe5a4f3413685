//! External collaborators the engine consumes.
//!
//! Only the interfaces live here; HTTP implementations are in
//! [`crate::github`] and [`crate::taskcluster`].

use crate::error::{Error, Result};

/// Answers whether a task genuinely originates from a pull request.
pub trait ProvenanceOracle {
    fn is_from_pull_request(
        &self,
        task_id: &str,
        owner: &str,
        repo: &str,
        pr_number: u64,
    ) -> Result<bool>;
}

/// Hands out a bearer token scoped to one repository.
pub trait TokenProvider {
    fn installation_token(&self, owner: &str, repo: &str) -> Result<String>;
}

/// Squash-merges a pull request upstream, refusing if its head moved.
pub trait PullRequestMerger {
    fn squash_merge(&self, owner: &str, repo: &str, pr_number: u64, head_sha: &str) -> Result<()>;
}

/// A token known up front.
#[derive(Debug, Clone)]
pub struct StaticToken(pub String);

impl TokenProvider for StaticToken {
    fn installation_token(&self, _owner: &str, _repo: &str) -> Result<String> {
        Ok(self.0.clone())
    }
}

/// Reads the token from an environment variable at the time it is needed.
#[derive(Debug, Clone)]
pub struct EnvToken {
    pub var: String,
}

impl TokenProvider for EnvToken {
    fn installation_token(&self, _owner: &str, _repo: &str) -> Result<String> {
        match std::env::var(&self.var) {
            Ok(token) if !token.trim().is_empty() => Ok(token.trim().to_string()),
            _ => Err(Error::Credentials(format!(
                "environment variable {} is not set",
                self.var
            ))),
        }
    }
}

//! GitHub REST client for the merge endpoint.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::USER_AGENT;
use crate::error::{Error, Result};
use crate::services::{PullRequestMerger, TokenProvider};

const GITHUB_API_VERSION: &str = "2022-11-28";

#[derive(Debug, Serialize)]
struct MergeRequest<'a> {
    merge_method: &'a str,
    sha: &'a str,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

/// Squash-merges pull requests through the REST API.
pub struct GithubClient {
    api_base_url: String,
    tokens: Box<dyn TokenProvider>,
    http_client: reqwest::blocking::Client,
}

impl GithubClient {
    pub fn new(api_base_url: impl Into<String>, tokens: Box<dyn TokenProvider>) -> Result<Self> {
        let http_client = reqwest::blocking::Client::builder()
            .connect_timeout(Duration::from_secs(15))
            .timeout(Duration::from_secs(60))
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            api_base_url: api_base_url.into(),
            tokens,
            http_client,
        })
    }

    fn merge_endpoint(&self, owner: &str, repo: &str, pr_number: u64) -> String {
        format!(
            "{}/repos/{}/{}/pulls/{}/merge",
            self.api_base_url.trim_end_matches('/'),
            owner,
            repo,
            pr_number
        )
    }
}

impl PullRequestMerger for GithubClient {
    /// GitHub refuses the merge when `head_sha` is no longer the head of the
    /// pull request, which surfaces here as a non-2xx [`Error::Merge`].
    fn squash_merge(&self, owner: &str, repo: &str, pr_number: u64, head_sha: &str) -> Result<()> {
        let token = self.tokens.installation_token(owner, repo)?;
        let body = MergeRequest {
            merge_method: "squash",
            sha: head_sha,
        };

        // A transport failure leaves the upstream state unknown; status 0
        // marks that case.
        let response = self
            .http_client
            .put(self.merge_endpoint(owner, repo, pr_number))
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", GITHUB_API_VERSION)
            .bearer_auth(token)
            .json(&body)
            .send()
            .map_err(|e| Error::Merge {
                pr_number,
                status: 0,
                message: e.to_string(),
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let raw = response
            .text()
            .unwrap_or_else(|_| "unable to read merge response body".to_string());
        let message = serde_json::from_str::<ErrorBody>(&raw)
            .map(|body| body.message)
            .unwrap_or(raw);
        Err(Error::Merge {
            pr_number,
            status: status.as_u16(),
            message,
        })
    }
}

//! Taskcluster queue and GitHub-service client.
//!
//! Queries are anonymous: artifacts under `public/` and the build list need
//! no credentials.

use std::time::Duration;

use serde::Deserialize;
use url::Url;

use crate::artifact::{ArtifactLocator, ByteFetch};
use crate::constants::USER_AGENT;
use crate::error::{Error, Result};
use crate::services::ProvenanceOracle;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TaskDefinition {
    task_group_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Build {
    task_group_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BuildPage {
    #[serde(default)]
    builds: Vec<Build>,
    continuation_token: Option<String>,
}

pub struct TaskclusterClient {
    root_url: String,
    http_client: reqwest::blocking::Client,
}

impl TaskclusterClient {
    pub fn new(root_url: impl Into<String>) -> Result<Self> {
        let http_client = reqwest::blocking::Client::builder()
            .connect_timeout(Duration::from_secs(15))
            .timeout(Duration::from_secs(300))
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            root_url: root_url.into().trim_end_matches('/').to_string(),
            http_client,
        })
    }

    fn task_url(&self, task_id: &str) -> String {
        format!("{}/api/queue/v1/task/{}", self.root_url, task_id)
    }

    fn builds_url(&self, owner: &str, repo: &str, pr_number: u64, continuation: Option<&str>) -> Result<Url> {
        let base = format!("{}/api/github/v1/builds", self.root_url);
        let pr = pr_number.to_string();
        let mut params = vec![
            ("organization", owner),
            ("repository", repo),
            ("pullRequest", pr.as_str()),
        ];
        if let Some(token) = continuation {
            params.push(("continuationToken", token));
        }
        Url::parse_with_params(&base, &params)
            .map_err(|e| Error::Provenance(format!("invalid builds URL {}: {}", base, e)))
    }

    fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T> {
        let response = self
            .http_client
            .get(url)
            .send()
            .map_err(|e| Error::Provenance(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Provenance(format!("{} returned {}", url, status)));
        }
        response
            .json()
            .map_err(|e| Error::Provenance(format!("unexpected response from {}: {}", url, e)))
    }

    fn task_group_of(&self, task_id: &str) -> Result<String> {
        let task: TaskDefinition = self.get_json(&self.task_url(task_id))?;
        Ok(task.task_group_id)
    }
}

impl ArtifactLocator for TaskclusterClient {
    /// Latest run's artifact; the queue redirects to the storage backend.
    fn artifact_url(&self, task_id: &str, artifact: &str) -> Result<String> {
        Ok(format!("{}/artifacts/{}", self.task_url(task_id), artifact))
    }
}

impl ByteFetch for TaskclusterClient {
    fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let failed = |message: String| Error::ArtifactFetch {
            task_id: String::new(),
            artifact: url.to_string(),
            message,
        };

        let response = self
            .http_client
            .get(url)
            .send()
            .map_err(|e| failed(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(failed(status.to_string()));
        }
        let bytes = response.bytes().map_err(|e| failed(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}

impl ProvenanceOracle for TaskclusterClient {
    /// True when the task group of `task_id` is one of the builds the GitHub
    /// integration recorded for the pull request.
    fn is_from_pull_request(&self, task_id: &str, owner: &str, repo: &str, pr_number: u64) -> Result<bool> {
        let group = self.task_group_of(task_id)?;
        log::debug!("Task {} belongs to group {}", task_id, group);

        let mut continuation: Option<String> = None;
        loop {
            let url = self.builds_url(owner, repo, pr_number, continuation.as_deref())?;
            let page: BuildPage = self.get_json(url.as_str())?;
            if page.builds.iter().any(|build| build.task_group_id == group) {
                return Ok(true);
            }
            match page.continuation_token {
                Some(token) => continuation = Some(token),
                None => return Ok(false),
            }
        }
    }
}

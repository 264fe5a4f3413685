//! Task definitions handed to the worker and the scopes they carry.
//!
//! Scopes follow `<prefix>:<kind>:<value>[:<arg>...]`, e.g.
//! `ap:publish:repo:index` or `ap:apdiff:action:diff:97`.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::config::split_repo;
use crate::error::{Error, Result};
use crate::publish::PublishRequest;
use crate::review::ReviewRequest;

fn verification(message: impl Into<String>) -> Error {
    Error::TaskVerification(message.into())
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub task_group_id: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub payload: Map<String, Value>,
}

impl Task {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| verification(format!("malformed task: {}", e)))
    }

    fn payload_str(&self, key: &str) -> Result<Option<&str>> {
        match self.payload.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.as_str())),
            Some(other) => Err(verification(format!(
                "payload key {} must be a string, got {}",
                key, other
            ))),
        }
    }

    fn required_str(&self, key: &str) -> Result<&str> {
        self.payload_str(key)?
            .ok_or_else(|| verification(format!("missing {} from payload", key)))
    }

    /// Accepts a JSON number or a numeric string.
    fn required_u64(&self, key: &str) -> Result<u64> {
        let parsed = match self.payload.get(key) {
            None | Some(Value::Null) => {
                return Err(verification(format!("missing {} from payload", key)));
            }
            Some(Value::Number(n)) => n.as_u64(),
            Some(Value::String(s)) => s.trim().parse().ok(),
            Some(_) => None,
        };
        parsed.ok_or_else(|| verification(format!("payload key {} is not a positive integer", key)))
    }
}

/// Returns the `:`-separated values of every scope starting with
/// `<global_prefix>:<kind>`.
///
/// Fails when `scopes` is empty, when no scope matches, when more than one
/// matches with `only_one`, and when any value segment is empty.
pub fn extract_scopes(
    global_prefix: &str,
    kind: &str,
    scopes: &[String],
    only_one: bool,
) -> Result<Vec<Vec<String>>> {
    let full_prefix = format!("{}:{}", global_prefix, kind);
    if scopes.is_empty() {
        return Err(verification(format!(
            "you should pass at least one scope with the prefix {}",
            full_prefix
        )));
    }

    let relevant: Vec<&str> = scopes
        .iter()
        .filter_map(|scope| scope.strip_prefix(full_prefix.as_str()))
        .filter_map(|rest| rest.strip_prefix(':').or(rest.is_empty().then_some(rest)))
        .collect();

    if relevant.is_empty() {
        return Err(verification(format!("no {} scope found", kind)));
    }
    if only_one && relevant.len() > 1 {
        return Err(verification(format!("more than one {} scope found", kind)));
    }

    let values: Vec<Vec<String>> = relevant
        .iter()
        .map(|rest| rest.split(':').map(str::to_string).collect())
        .collect();
    if values.iter().flatten().any(String::is_empty) {
        return Err(verification("cannot pass empty argument in scope value"));
    }
    Ok(values)
}

/// A repository a task is allowed to act on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    /// Scope key the repository was selected by.
    pub key: String,
    pub owner: String,
    pub repo: String,
}

/// Maps the single `repo` scope through the allow-list.
pub fn resolve_target(
    global_prefix: &str,
    scopes: &[String],
    repos: &BTreeMap<String, String>,
) -> Result<Target> {
    let values = extract_scopes(global_prefix, "repo", scopes, true)?;
    let key = values
        .first()
        .map(|v| v.join(":"))
        .ok_or_else(|| verification("no repo scope found"))?;

    let full_name = repos
        .get(&key)
        .ok_or_else(|| verification(format!("unknown repository {}", key)))?;
    let (owner, repo) = split_repo(full_name)
        .ok_or_else(|| verification(format!("{} is not of the form owner/repo", full_name)))?;

    Ok(Target {
        key,
        owner: owner.to_string(),
        repo: repo.to_string(),
    })
}

/// What a worker invocation was asked to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Build review branches for the apworlds changed by a pull request.
    ReviewDiff { pr_number: u64 },
    /// Merge a pull request and commit the generated patches.
    Publish,
}

/// Parses the one `action` scope of a review task.
pub fn review_action(global_prefix: &str, scopes: &[String]) -> Result<Action> {
    let actions = extract_scopes(global_prefix, "action", scopes, false)?;
    let [action] = actions.as_slice() else {
        return Err(verification("only one action can be executed at a time"));
    };

    match action.split_first() {
        Some((name, args)) if name == "diff" => {
            let [pr] = args else {
                return Err(verification("you should provide one, and only one PR number"));
            };
            let pr_number: u64 = pr
                .parse()
                .map_err(|_| verification(format!("the PR number {:?} isn't an integer", pr)))?;
            if pr_number == 0 {
                return Err(verification("the PR number must be positive"));
            }
            Ok(Action::ReviewDiff { pr_number })
        }
        Some((name, _)) => Err(verification(format!("the action {} is not valid", name))),
        None => Err(verification("empty action scope")),
    }
}

/// Builds the publish request from a task targeting `target`.
pub fn publish_request(task: &Task, target: &Target) -> Result<PublishRequest> {
    PublishRequest::new(
        &task.task_group_id,
        &target.owner,
        &target.repo,
        task.required_u64("pr-number")?,
        task.required_str("head-rev")?,
        task.required_str("diff-task")?,
        task.payload_str("expectations-task")?,
    )
}

/// Builds the review request; branches land in `review_repo` (`owner/repo`).
pub fn review_request(
    task: &Task,
    target: &Target,
    pr_number: u64,
    review_repo: &str,
) -> Result<ReviewRequest> {
    let (review_owner, review_name) = split_repo(review_repo)
        .ok_or_else(|| verification(format!("{} is not of the form owner/repo", review_repo)))?;

    ReviewRequest::new(
        &task.task_group_id,
        &target.owner,
        &target.repo,
        pr_number,
        task.required_str("diff-task")?,
        review_owner,
        review_name,
    )
}

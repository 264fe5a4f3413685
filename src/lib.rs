//! Release engine for the apworld index.
//!
//! This crate publishes reviewed pull requests by:
//! - Checking that the invoking task really comes from the pull request
//! - Rehearsing the squash merge and the generated patches on a reused mirror
//! - Merging upstream only once the rehearsal succeeded
//! - Committing the expectations and lock patches and pushing them
//!
//! It also builds per-apworld review branches from a diff task.

pub mod artifact;
pub mod branch;
pub mod config;
pub mod constants;
pub mod error;
pub mod git;
pub mod github;
pub mod mirror;
pub mod output;
pub mod patch;
pub mod publish;
pub mod review;
pub mod services;
pub mod task;
pub mod taskcluster;

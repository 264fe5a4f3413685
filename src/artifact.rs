//! Downloaded task artifacts.
//!
//! A [`PatchArtifact`] owns a named temporary file. The file is removed when
//! the artifact is dropped, whatever path the caller leaves through.

use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;

use crate::error::{Error, Result};

/// Resolves a task artifact to a download URL.
pub trait ArtifactLocator {
    fn artifact_url(&self, task_id: &str, artifact: &str) -> Result<String>;
}

/// Retrieves the content behind a URL.
pub trait ByteFetch {
    fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

#[derive(Debug)]
pub struct PatchArtifact {
    task_id: String,
    name: String,
    file: NamedTempFile,
    len: u64,
}

impl PatchArtifact {
    /// Writes `content` to a fresh temporary file in `dir`.
    pub fn from_bytes(task_id: &str, name: &str, content: &[u8], dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let mut file = tempfile::Builder::new()
            .prefix("artifact-")
            .suffix(".diff")
            .tempfile_in(dir)?;
        file.write_all(content)?;
        file.flush()?;

        Ok(Self {
            task_id: task_id.to_string(),
            name: name.to_string(),
            file,
            len: content.len() as u64,
        })
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Fetches `artifact` of `task_id` into memory.
pub fn fetch_bytes(
    locator: &dyn ArtifactLocator,
    fetcher: &dyn ByteFetch,
    task_id: &str,
    artifact: &str,
) -> Result<Vec<u8>> {
    let url = locator.artifact_url(task_id, artifact)?;
    log::info!("Downloading {} from task {}", artifact, task_id);

    fetcher.fetch(&url).map_err(|e| match e {
        Error::ArtifactFetch { message, .. } => Error::ArtifactFetch {
            task_id: task_id.to_string(),
            artifact: artifact.to_string(),
            message,
        },
        other => other,
    })
}

/// Downloads `artifact` of `task_id` into a temporary file under `dir`.
pub fn download(
    locator: &dyn ArtifactLocator,
    fetcher: &dyn ByteFetch,
    task_id: &str,
    artifact: &str,
    dir: &Path,
) -> Result<PatchArtifact> {
    let content = fetch_bytes(locator, fetcher, task_id, artifact)?;
    let patch = PatchArtifact::from_bytes(task_id, artifact, &content, dir)?;
    log::debug!(
        "Stored {} ({} bytes) at {}",
        artifact,
        patch.len(),
        patch.path().display()
    );
    Ok(patch)
}

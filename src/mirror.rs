//! Reusable on-disk clones, one per `(owner, repository)`.
//!
//! A mirror directory is created on first use and only ever fetched
//! afterwards. Credentials are never written to the repository config for
//! longer than a [`CredentialedRemote`] scope.

use std::path::{Path, PathBuf};

use url::Url;

use crate::config::CommitIdentity;
use crate::constants::{GIT_DIR, ORIGIN, TOKEN_USERNAME};
use crate::error::{Error, Result};
use crate::git::{self, Vcs};

fn is_git_repo(path: &Path) -> bool {
    path.join(GIT_DIR).is_dir()
}

fn validate_component(kind: &str, value: &str) -> Result<()> {
    if value.is_empty()
        || value == "."
        || value == ".."
        || value.contains(['/', '\\'])
        || value.starts_with('-')
    {
        return Err(Error::TaskVerification(format!(
            "invalid {} name: {:?}",
            kind, value
        )));
    }
    Ok(())
}

/// Cache of repository clones rooted at an explicit directory.
pub struct RepoMirror {
    cache_root: PathBuf,
    remote_base: String,
    identity: CommitIdentity,
    vcs: Box<dyn Vcs>,
}

impl RepoMirror {
    pub fn new(
        cache_root: impl Into<PathBuf>,
        remote_base: impl Into<String>,
        identity: CommitIdentity,
        vcs: Box<dyn Vcs>,
    ) -> Self {
        Self {
            cache_root: cache_root.into(),
            remote_base: remote_base.into(),
            identity,
            vcs,
        }
    }

    pub fn vcs(&self) -> &dyn Vcs {
        self.vcs.as_ref()
    }

    pub fn identity(&self) -> &CommitIdentity {
        &self.identity
    }

    /// Directory the mirror of `owner/repo` lives in.
    pub fn path(&self, owner: &str, repo: &str) -> Result<PathBuf> {
        validate_component("owner", owner)?;
        validate_component("repository", repo)?;
        Ok(self.cache_root.join(owner).join(repo))
    }

    /// Credential-free URL the mirror is cloned from.
    pub fn clone_url(&self, owner: &str, repo: &str) -> String {
        format!(
            "{}/{}/{}.git",
            self.remote_base.trim_end_matches('/'),
            owner,
            repo
        )
    }

    /// Clones `owner/repo` if it is not mirrored yet, fetches it otherwise.
    ///
    /// `origin` is reset to the canonical URL first, which also drops any
    /// credential a killed process may have left behind.
    pub fn ensure(&self, owner: &str, repo: &str) -> Result<PathBuf> {
        self.ensure_with_token(owner, repo, None)
    }

    /// [`ensure`](Self::ensure), with the clone or fetch going through an
    /// authenticated URL when `token` is set, so private repositories can be
    /// mirrored. `origin` is left credential-free either way.
    pub fn ensure_with_token(&self, owner: &str, repo: &str, token: Option<&str>) -> Result<PathBuf> {
        let path = self.path(owner, repo)?;
        let url = self.clone_url(owner, repo);

        if is_git_repo(&path) {
            log::info!("Fetching {}/{} in {}", owner, repo, path.display());
            git::set_remote_url(self.vcs(), &path, ORIGIN, &url)?;
            match token {
                Some(token) => {
                    let remote = self.with_credentialed_remote(&path, token)?;
                    git::fetch_prune(self.vcs(), &path, ORIGIN)?;
                    remote.restore()?;
                }
                None => git::fetch_prune(self.vcs(), &path, ORIGIN)?,
            }
        } else {
            log::info!("Cloning {}/{} into {}", owner, repo, path.display());
            let source = match token {
                Some(token) => credentialed_url(&url, token)?,
                None => url.clone(),
            };
            self.clone_into(&path, &source, &url)?;
        }

        git::set_config(self.vcs(), &path, "user.name", &self.identity.name)?;
        git::set_config(self.vcs(), &path, "user.email", &self.identity.email)?;

        Ok(path)
    }

    /// Clones `source` next to `path` and renames into place, so `path` is
    /// either a complete repository or absent. `origin` is set to `clean_url`
    /// before the rename.
    fn clone_into(&self, path: &Path, source: &str, clean_url: &str) -> Result<()> {
        let parent = path.parent().unwrap_or(self.cache_root.as_path());
        std::fs::create_dir_all(parent)?;

        if path.exists() {
            log::warn!("Removing incomplete mirror at {}", path.display());
            std::fs::remove_dir_all(path)?;
        }

        let staging = tempfile::Builder::new()
            .prefix(".clone-")
            .tempdir_in(parent)?;
        let target = staging.path().join("repo");
        git::clone(self.vcs(), parent, source, &target)?;
        git::set_remote_url(self.vcs(), &target, ORIGIN, clean_url)?;
        std::fs::rename(&target, path)?;

        Ok(())
    }

    /// Points `origin` at an authenticated URL until the returned handle is
    /// restored or dropped.
    pub fn with_credentialed_remote(&self, path: &Path, token: &str) -> Result<CredentialedRemote<'_>> {
        let current = git::remote_url(self.vcs(), path, ORIGIN)?;
        let clean_url = strip_credentials(&current);
        let authenticated = credentialed_url(&clean_url, token)?;

        let guard = CredentialedRemote {
            vcs: self.vcs(),
            path: path.to_path_buf(),
            clean_url,
            restored: false,
        };
        git::set_remote_url(self.vcs(), path, ORIGIN, &authenticated)?;

        Ok(guard)
    }
}

/// RAII guard for a credentialed `origin` URL.
///
/// Dropping it restores the credential-free URL, so the secret does not
/// outlive the scope on any exit path, including unwinding.
pub struct CredentialedRemote<'a> {
    vcs: &'a dyn Vcs,
    path: PathBuf,
    clean_url: String,
    restored: bool,
}

impl CredentialedRemote<'_> {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Restores the URL now and reports failure instead of only logging it.
    pub fn restore(mut self) -> Result<()> {
        let result = self.reset();
        self.restored = result.is_ok();
        result
    }

    fn reset(&self) -> Result<()> {
        git::set_remote_url(self.vcs, &self.path, ORIGIN, &self.clean_url)
    }
}

impl Drop for CredentialedRemote<'_> {
    fn drop(&mut self) {
        if self.restored {
            return;
        }
        if let Err(e) = self.reset() {
            log::warn!(
                "Failed to restore remote URL of {}: {}",
                self.path.display(),
                e
            );
        }
    }
}

/// Embeds an installation token in an http(s) URL. Other URLs (local paths,
/// `file://`, ssh) are returned unchanged.
pub fn credentialed_url(url: &str, token: &str) -> Result<String> {
    if token.trim().is_empty() {
        return Err(Error::Credentials("installation token is empty".to_string()));
    }

    let mut parsed = match Url::parse(url) {
        Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => parsed,
        _ => return Ok(url.to_string()),
    };

    let embed_failed =
        || Error::Credentials(format!("cannot embed credentials in {}", git::redact(url)));
    parsed.set_username(TOKEN_USERNAME).map_err(|_| embed_failed())?;
    parsed.set_password(Some(token)).map_err(|_| embed_failed())?;

    Ok(parsed.to_string())
}

/// Removes any userinfo from `url`.
pub fn strip_credentials(url: &str) -> String {
    let mut parsed = match Url::parse(url) {
        Ok(parsed) => parsed,
        Err(_) => return url.to_string(),
    };
    if parsed.username().is_empty() && parsed.password().is_none() {
        return url.to_string();
    }
    if parsed.set_username("").is_err() || parsed.set_password(None).is_err() {
        return url.to_string();
    }
    parsed.to_string()
}

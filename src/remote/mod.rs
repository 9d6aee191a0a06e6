//! Remote content store protocol.
//!
//! Single-file get, create-or-update and delete against a version-controlled file store. Every
//! write is guarded by the file's version token (compare-and-swap); there is no lock service.

mod github;
#[cfg(test)]
pub mod memory;

pub use github::GitHubContentStore;

use std::fmt;

use async_trait::async_trait;

use crate::errors::AppError;
use crate::models::RepoId;

/// Opaque tokens presented by the caller for one request.
#[derive(Clone)]
pub struct Credential {
    pub token: String,
    /// Token of the service identity, if one is configured for the caller
    pub service_token: Option<String>,
}

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            service_token: None,
        }
    }

    pub fn with_service_token(mut self, token: impl Into<String>) -> Self {
        self.service_token = Some(token.into());
        self
    }

    /// Token that authors a commit as `identity`.
    pub fn token_for(&self, identity: CommitIdentity) -> Result<&str, AppError> {
        match identity {
            CommitIdentity::User => Ok(&self.token),
            CommitIdentity::Service => self.service_token.as_deref().ok_or_else(|| {
                AppError::PermissionDenied(
                    "No service identity is available; install the app on this repository or commit as yourself".to_string(),
                )
            }),
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"<redacted>")
            .field("service_token", &self.service_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Who authors a commit. Does not change concurrency semantics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CommitIdentity {
    #[default]
    User,
    Service,
}

#[derive(Debug, Clone, Default)]
pub struct CommitOptions {
    pub identity: CommitIdentity,
    /// Target branch; the repository default when absent
    pub branch: Option<String>,
}

/// A single create-or-update.
#[derive(Debug, Clone)]
pub struct FileWrite<'a> {
    pub path: &'a str,
    pub content: &'a str,
    pub message: &'a str,
    /// `None` creates the file and fails if it exists; `Some` is a compare-and-swap
    pub expected_token: Option<&'a str>,
    pub options: CommitOptions,
}

/// File content at the remote's current revision.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteFile {
    pub content: String,
    pub version_token: String,
}

/// Result of a successful write.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteReceipt {
    pub version_token: String,
    pub commit_id: String,
}

/// Remote file store.
///
/// Implemented by:
/// - `GitHubContentStore` - GitHub contents API over HTTP
/// - `MemoryContentStore` - in-memory store for tests
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Fetch a file. A missing file is `Ok(None)`.
    async fn get_file(
        &self,
        credential: &Credential,
        repo: &RepoId,
        path: &str,
    ) -> Result<Option<RemoteFile>, AppError>;

    /// Create a file, or replace it if `expected_token` still names the current revision.
    ///
    /// Fails with `Conflict` when creating over an existing path and with `VersionConflict`
    /// when the token is stale.
    async fn update_file(
        &self,
        credential: &Credential,
        repo: &RepoId,
        write: FileWrite<'_>,
    ) -> Result<WriteReceipt, AppError>;

    /// Delete a file at the expected revision.
    async fn delete_file(
        &self,
        credential: &Credential,
        repo: &RepoId,
        path: &str,
        expected_token: &str,
        message: &str,
    ) -> Result<(), AppError>;
}

pub(crate) fn permission_denied(repo: &RepoId, detail: &str) -> AppError {
    AppError::PermissionDenied(format!(
        "Access to {} was denied ({}); grant this account write access to the repository",
        repo, detail
    ))
}

pub(crate) fn version_conflict(repo: &RepoId, path: &str, current: Option<String>) -> AppError {
    AppError::VersionConflict {
        message: format!(
            "{} in {} was changed remotely; sync it and re-apply your edit",
            path, repo
        ),
        current_token: current,
    }
}
